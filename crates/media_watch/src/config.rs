//! Runtime configuration for the harness.
//!
//! Every knob that differed between the old per-environment harness copies
//! (viewport size, retry budget, backoff timing, sharding behaviour) lives in
//! [`HarnessConfig`]. Values come from `MEDIA_WATCH_*` environment variables
//! and fall back to defaults when unset or unparsable.

use core::time::Duration;
use std::env;
use std::path::PathBuf;

/// Default acceptance threshold for a case without an explicit one.
pub const DEFAULT_THRESHOLD: f64 = 0.11;

/// Well-known location of a locally built `dssim`.
pub const DEFAULT_DSSIM_PATH: &str = "/tmp/dssim-master/dssim";

/// Browser viewport in CSS pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    #[inline]
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Parse `WIDTHxHEIGHT` (for example `800x600`). Zero sizes are rejected.
    pub fn parse(text: &str) -> Option<Self> {
        let (width, height) = text.trim().split_once(['x', 'X'])?;
        let width = width.trim().parse::<u32>().ok()?;
        let height = height.trim().parse::<u32>().ok()?;
        (width > 0 && height > 0).then_some(Self { width, height })
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(800, 600)
    }
}

/// Linear backoff between comparison attempts.
///
/// Attempt `k` (1-indexed) waits `initial + step * (k - 1)` units.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffSchedule {
    pub initial: u32,
    pub step: u32,
    pub unit: Duration,
}

impl BackoffSchedule {
    /// Delay to wait before the given 1-indexed attempt.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let units = self
            .initial
            .saturating_add(self.step.saturating_mul(attempt.saturating_sub(1)));
        self.unit.saturating_mul(units)
    }

    /// A schedule that never sleeps.
    #[must_use]
    pub const fn immediate() -> Self {
        Self {
            initial: 0,
            step: 0,
            unit: Duration::ZERO,
        }
    }
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self {
            initial: 2,
            step: 2,
            unit: Duration::from_secs(1),
        }
    }
}

/// What a run does with each case.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunMode {
    /// Compare captures against the stored baselines.
    Compare,
    /// Record missing baselines instead of comparing.
    Record,
}

/// Harness configuration shared by the runner, comparator and recorder.
#[derive(Clone, Debug)]
pub struct HarnessConfig {
    /// Shared scratch directory for fixtures and candidate images
    pub scratch_dir: PathBuf,
    /// Directory holding `<name>.png` baselines and `<name>.png.txt` overrides
    pub baseline_dir: PathBuf,
    /// Viewport used for cases without a fixed size
    pub viewport: Viewport,
    /// Maximum number of comparison attempts per case (at least 1)
    pub attempts: u32,
    pub backoff: BackoffSchedule,
    /// Wait before capturing a new baseline
    pub settle: Duration,
    pub mode: RunMode,
    /// Skip cases whose fixture was already claimed by another shard
    pub sharded: bool,
    pub reverse: bool,
    /// Keep fixtures and candidate images after each case
    pub preserve_artifacts: bool,
    /// Optional `(size, index)` selecting one chunk of the catalog
    pub chunk: Option<(usize, usize)>,
    pub dssim_path: PathBuf,
    /// Browser executable; `None` lets `headless_chrome` find one
    pub chrome_bin: Option<PathBuf>,
    /// Rendering command line; the family and the input are appended
    pub renderer: Option<Vec<String>>,
    pub base_href: String,
    pub catalog_path: Option<PathBuf>,
    pub report_path: Option<PathBuf>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            scratch_dir: env::temp_dir(),
            baseline_dir: PathBuf::from("screenshots"),
            viewport: Viewport::default(),
            attempts: 6,
            backoff: BackoffSchedule::default(),
            settle: Duration::from_secs(10),
            mode: RunMode::Compare,
            sharded: false,
            reverse: false,
            preserve_artifacts: false,
            chunk: None,
            dssim_path: PathBuf::from(DEFAULT_DSSIM_PATH),
            chrome_bin: None,
            renderer: None,
            base_href: String::from("http://localhost/"),
            catalog_path: None,
            report_path: None,
        }
    }
}

impl HarnessConfig {
    /// Load configuration from the process environment.
    ///
    /// See [`HarnessConfig::from_lookup`] for the variables read.
    #[inline]
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// Reads `MEDIA_WATCH_SCRATCH_DIR`, `MEDIA_WATCH_BASELINE_DIR`,
    /// `MEDIA_WATCH_VIEWPORT`, `MEDIA_WATCH_ATTEMPTS`,
    /// `MEDIA_WATCH_BACKOFF_INITIAL`, `MEDIA_WATCH_BACKOFF_STEP`,
    /// `MEDIA_WATCH_BACKOFF_UNIT_MS`, `MEDIA_WATCH_SETTLE_SECS`,
    /// `MEDIA_WATCH_SHARDED`, `MEDIA_WATCH_RECORD`, `MEDIA_WATCH_REVERSE`,
    /// `MEDIA_WATCH_PRESERVE`, `MEDIA_WATCH_CHUNK_SIZE`,
    /// `MEDIA_WATCH_CHUNK_INDEX`, `MEDIA_WATCH_DSSIM`, `MEDIA_WATCH_RENDERER`,
    /// `MEDIA_WATCH_BASE_HREF`, `MEDIA_WATCH_CATALOG`, `MEDIA_WATCH_REPORT`
    /// and `CHROME_BIN`.
    ///
    /// Numbers are parsed at their field's width; anything out of range
    /// falls back to the default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|val| !val.trim().is_empty());
        let flag = |key: &str| non_empty(key).is_some_and(|val| val.trim() != "0");
        let text = |key: &str| non_empty(key).map(|val| val.trim().to_owned());
        let small = |key: &str| text(key).and_then(|val| val.parse::<u32>().ok());
        let large = |key: &str| text(key).and_then(|val| val.parse::<u64>().ok());
        let count = |key: &str| text(key).and_then(|val| val.parse::<usize>().ok());

        let backoff = BackoffSchedule {
            initial: small("MEDIA_WATCH_BACKOFF_INITIAL").unwrap_or(defaults.backoff.initial),
            step: small("MEDIA_WATCH_BACKOFF_STEP").unwrap_or(defaults.backoff.step),
            unit: large("MEDIA_WATCH_BACKOFF_UNIT_MS")
                .map_or(defaults.backoff.unit, Duration::from_millis),
        };
        let chunk = count("MEDIA_WATCH_CHUNK_SIZE")
            .filter(|size| *size > 0)
            .map(|size| (size, count("MEDIA_WATCH_CHUNK_INDEX").unwrap_or(0)));
        let renderer = non_empty("MEDIA_WATCH_RENDERER").map(|command| {
            command
                .split_whitespace()
                .map(str::to_owned)
                .collect::<Vec<_>>()
        });

        Self {
            scratch_dir: non_empty("MEDIA_WATCH_SCRATCH_DIR")
                .map_or(defaults.scratch_dir, PathBuf::from),
            baseline_dir: non_empty("MEDIA_WATCH_BASELINE_DIR")
                .map_or(defaults.baseline_dir, PathBuf::from),
            viewport: non_empty("MEDIA_WATCH_VIEWPORT")
                .and_then(|val| Viewport::parse(&val))
                .unwrap_or(defaults.viewport),
            attempts: small("MEDIA_WATCH_ATTEMPTS")
                .unwrap_or(defaults.attempts)
                .max(1),
            backoff,
            settle: large("MEDIA_WATCH_SETTLE_SECS").map_or(defaults.settle, Duration::from_secs),
            mode: if flag("MEDIA_WATCH_RECORD") {
                RunMode::Record
            } else {
                RunMode::Compare
            },
            sharded: flag("MEDIA_WATCH_SHARDED"),
            reverse: flag("MEDIA_WATCH_REVERSE"),
            preserve_artifacts: flag("MEDIA_WATCH_PRESERVE"),
            chunk,
            dssim_path: non_empty("MEDIA_WATCH_DSSIM").map_or(defaults.dssim_path, PathBuf::from),
            chrome_bin: non_empty("CHROME_BIN").map(PathBuf::from),
            renderer,
            base_href: non_empty("MEDIA_WATCH_BASE_HREF").unwrap_or(defaults.base_href),
            catalog_path: non_empty("MEDIA_WATCH_CATALOG").map(PathBuf::from),
            report_path: non_empty("MEDIA_WATCH_REPORT").map(PathBuf::from),
        }
    }
}
