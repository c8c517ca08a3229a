//! Browser session used to load fixtures and take screenshots.

use crate::config::Viewport;
use anyhow::{Result, anyhow};
use headless_chrome::protocol::cdp::Emulation::SetDeviceMetricsOverride;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, LaunchOptionsBuilder, Tab};
use log::{debug, info};
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// The browser operations the harness needs.
pub trait BrowserSession {
    /// Resize the visible area.
    ///
    /// # Errors
    ///
    /// Returns an error if the browser rejects the new size.
    fn set_viewport(&mut self, viewport: Viewport) -> Result<()>;

    /// Load `url` and wait for navigation to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if navigation fails.
    fn navigate(&mut self, url: &Url) -> Result<()>;

    /// Encoded image of the currently visible pixels.
    ///
    /// # Errors
    ///
    /// Returns an error if the screenshot cannot be taken.
    fn capture(&mut self) -> Result<Vec<u8>>;
}

/// A headless Chrome tab driven over the DevTools protocol.
pub struct ChromeSession {
    _browser: Browser,
    tab: Arc<Tab>,
    /// Size of the last device-metrics override sent to the tab
    applied: Option<Viewport>,
}

impl ChromeSession {
    /// Launch headless Chrome with a single tab.
    ///
    /// `chrome_bin` overrides executable discovery.
    ///
    /// # Errors
    ///
    /// Returns an error if Chrome cannot be started.
    pub fn launch(viewport: Viewport, chrome_bin: Option<PathBuf>) -> Result<Self> {
        let launch_opts = LaunchOptionsBuilder::default()
            .headless(true)
            .path(chrome_bin)
            .window_size(Some((viewport.width, viewport.height)))
            .idle_browser_timeout(Duration::from_secs(300))
            .args(vec![
                OsStr::new("--force-device-scale-factor=1"),
                OsStr::new("--disable-features=OverlayScrollbar"),
                OsStr::new("--allow-file-access-from-files"),
                OsStr::new("--disable-dev-shm-usage"),
                OsStr::new("--no-sandbox"),
                OsStr::new("--disable-extensions"),
                OsStr::new("--disable-sync"),
                OsStr::new("--hide-scrollbars"),
                OsStr::new("--mute-audio"),
                OsStr::new("--no-referrers"),
                OsStr::new("--force-color-profile=sRGB"),
            ])
            .build()
            .map_err(|err| anyhow!("Failed to build LaunchOptions for headless_chrome: {err}"))?;

        info!("Launching headless Chrome at {}x{}", viewport.width, viewport.height);
        let browser = Browser::new(launch_opts)?;
        let tab = browser.new_tab()?;
        let mut session = Self {
            _browser: browser,
            tab,
            applied: None,
        };
        session.set_viewport(viewport)?;
        Ok(session)
    }
}

impl BrowserSession for ChromeSession {
    fn set_viewport(&mut self, viewport: Viewport) -> Result<()> {
        if self.applied == Some(viewport) {
            return Ok(());
        }
        debug!("Emulating a {}x{} viewport", viewport.width, viewport.height);
        self.tab.call_method(SetDeviceMetricsOverride {
            width: viewport.width,
            height: viewport.height,
            device_scale_factor: 1.0,
            mobile: false,
            scale: None,
            screen_width: None,
            screen_height: None,
            position_x: None,
            position_y: None,
            dont_set_visible_size: None,
            screen_orientation: None,
            viewport: None,
            display_feature: None,
            device_posture: None,
        })?;
        self.applied = Some(viewport);
        Ok(())
    }

    fn navigate(&mut self, url: &Url) -> Result<()> {
        info!("Navigating tab to: {}", url.as_str());
        self.tab.navigate_to(url.as_str())?;
        self.tab.wait_until_navigated()?;
        Ok(())
    }

    fn capture(&mut self) -> Result<Vec<u8>> {
        let png = self
            .tab
            .capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)?;
        Ok(png)
    }
}
