#![allow(dead_code, reason = "each test binary uses a different subset of the helpers")]

use anyhow::{Result, anyhow, bail};
use image::{Rgba, RgbaImage};
use media_watch::capture::encode_png;
use media_watch::config::{BackoffSchedule, HarnessConfig, Viewport};
use media_watch::render::EmbedRenderer;
use media_watch::scorer::{ScoreError, Scorer};
use media_watch::session::BrowserSession;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs::{create_dir_all, write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub fn init_test_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A solid-colour PNG.
pub fn solid_png(width: u32, height: u32, shade: u8) -> Result<Vec<u8>> {
    let img = RgbaImage::from_pixel(width, height, Rgba([shade, shade, shade, 255]));
    Ok(encode_png(&img)?)
}

/// Store `<name>.png` of the given size in `dir`.
pub fn write_baseline(dir: &Path, name: &str, width: u32, height: u32) -> Result<PathBuf> {
    create_dir_all(dir)?;
    let path = dir.join(format!("{name}.png"));
    write(&path, solid_png(width, height, 0)?)?;
    Ok(path)
}

/// Config for tests: no sleeping, small budget, given directories.
pub fn fast_config(scratch: &Path, baselines: &Path) -> HarnessConfig {
    HarnessConfig {
        scratch_dir: scratch.to_path_buf(),
        baseline_dir: baselines.to_path_buf(),
        attempts: 3,
        backoff: BackoffSchedule::immediate(),
        settle: Duration::ZERO,
        ..HarnessConfig::default()
    }
}

/// Renders `<p>family:input</p>`, or fails for inputs listed in `failing`.
#[derive(Default)]
pub struct FakeRenderer {
    pub failing: Vec<String>,
    pub calls: RefCell<Vec<(String, String)>>,
}

impl EmbedRenderer for FakeRenderer {
    fn render(&self, family: &str, input: &str) -> Result<String> {
        self.calls
            .borrow_mut()
            .push((family.to_owned(), input.to_owned()));
        if self.failing.iter().any(|bad| bad == input) {
            bail!("no handler matched {input}");
        }
        Ok(format!("<p>{family}:{input}</p>"))
    }
}

/// A browser that replays queued screenshots.
///
/// Once the queue is empty every capture returns `fallback`.
pub struct FakeSession {
    frames: VecDeque<Result<Vec<u8>, String>>,
    fallback: Vec<u8>,
    pub navigations: Vec<Url>,
    pub viewports: Vec<Viewport>,
    pub captures: u32,
    pub fail_navigation: bool,
}

impl FakeSession {
    /// Every capture is a black frame of the default viewport size.
    pub fn new() -> Result<Self> {
        let viewport = Viewport::default();
        Ok(Self {
            frames: VecDeque::new(),
            fallback: solid_png(viewport.width, viewport.height, 0)?,
            navigations: Vec::new(),
            viewports: Vec::new(),
            captures: 0,
            fail_navigation: false,
        })
    }

    pub fn queue_frame(&mut self, png: Vec<u8>) {
        self.frames.push_back(Ok(png));
    }

    pub fn queue_failure(&mut self, message: &str) {
        self.frames.push_back(Err(message.to_owned()));
    }
}

impl BrowserSession for FakeSession {
    fn set_viewport(&mut self, viewport: Viewport) -> Result<()> {
        self.viewports.push(viewport);
        Ok(())
    }

    fn navigate(&mut self, url: &Url) -> Result<()> {
        if self.fail_navigation {
            bail!("net::ERR_FILE_NOT_FOUND");
        }
        self.navigations.push(url.clone());
        Ok(())
    }

    fn capture(&mut self) -> Result<Vec<u8>> {
        self.captures += 1;
        match self.frames.pop_front() {
            Some(Ok(png)) => Ok(png),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(self.fallback.clone()),
        }
    }
}

/// A scorer that replays scripted results, then repeats `fallback`.
pub struct ScriptedScorer {
    script: RefCell<VecDeque<Result<f64, ScoreError>>>,
    fallback: f64,
    calls: Cell<u32>,
}

impl ScriptedScorer {
    pub fn new(fallback: f64) -> Self {
        Self {
            script: RefCell::new(VecDeque::new()),
            fallback,
            calls: Cell::new(0),
        }
    }

    pub fn with_scores(scores: &[f64]) -> Self {
        let scorer = Self::new(scores.last().copied().unwrap_or(0.0));
        for &score in scores {
            scorer.push(Ok(score));
        }
        scorer
    }

    pub fn push(&self, result: Result<f64, ScoreError>) {
        self.script.borrow_mut().push_back(result);
    }

    pub fn calls(&self) -> u32 {
        self.calls.get()
    }
}

impl Scorer for ScriptedScorer {
    fn score(&self, expected: &Path, actual: &Path) -> Result<f64, ScoreError> {
        self.calls.set(self.calls.get() + 1);
        assert!(expected.is_file(), "missing expected {}", expected.display());
        assert!(actual.is_file(), "missing candidate {}", actual.display());
        self.script
            .borrow_mut()
            .pop_front()
            .unwrap_or(Ok(self.fallback))
    }
}
