//! Expected screenshots and the mode that records them.

use crate::capture::{CaptureError, CropRect, crop, decode, encode_png, image_dimensions};
use crate::catalog::TestCase;
use crate::session::BrowserSession;
use anyhow::{Context as _, Result};
use log::{info, warn};
use std::fs::{create_dir_all, read_to_string};
use std::io::{ErrorKind, Write as _};
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;
use tempfile::NamedTempFile;

/// The directory of `<name>.png` baselines and `<name>.png.txt` threshold overrides.
#[derive(Clone, Debug)]
pub struct BaselineStore {
    dir: PathBuf,
}

impl BaselineStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn image_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.png"))
    }

    pub fn override_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.png.txt"))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.image_path(name).is_file()
    }

    /// Size of the stored baseline, which is also the crop size for candidates.
    ///
    /// # Errors
    ///
    /// Returns an error if the baseline is missing or unreadable.
    pub fn dimensions(&self, name: &str) -> Result<CropRect, CaptureError> {
        image_dimensions(&self.image_path(name))
    }

    /// Threshold for `case`: the override file when present and valid,
    /// otherwise the catalog value.
    pub fn threshold_for(&self, case: &TestCase) -> f64 {
        let path = self.override_path(&case.name);
        let Ok(text) = read_to_string(&path) else {
            return case.threshold;
        };
        match text.trim().parse::<f64>() {
            Ok(threshold) if threshold.is_finite() && threshold >= 0.0 => threshold,
            _ => {
                warn!(
                    "Ignoring invalid threshold override {:?} in {}",
                    text.trim(),
                    path.display()
                );
                case.threshold
            }
        }
    }
}

/// Result of recording one baseline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded { path: PathBuf, width: u32, height: u32 },
    /// A baseline was already there and has been left untouched.
    AlreadyExists,
}

/// Captures the current page as a case's new baseline.
pub struct BaselineRecorder<'run, S: ?Sized> {
    session: &'run mut S,
    settle: Duration,
}

impl<'run, S: BrowserSession + ?Sized> BaselineRecorder<'run, S> {
    pub fn new(session: &'run mut S, settle: Duration) -> Self {
        Self { session, settle }
    }

    /// Wait for the page to settle, capture it and store it as the baseline.
    ///
    /// Cases with a fixed size are cropped to it; others keep the full capture.
    /// An existing baseline is never replaced, so recording is idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the capture fails or the baseline cannot be written.
    pub fn record(&mut self, store: &BaselineStore, case: &TestCase) -> Result<RecordOutcome> {
        let path = store.image_path(&case.name);
        if path.exists() {
            return Ok(RecordOutcome::AlreadyExists);
        }

        if !self.settle.is_zero() {
            sleep(self.settle);
        }
        let raw = self.session.capture().context("Screenshot failed")?;
        let mut img = decode(&raw)?;
        if let Some((width, height)) = case.fixed_size() {
            img = crop(img, CropRect { width, height })?;
        }
        let png = encode_png(&img)?;

        create_dir_all(store.dir())
            .with_context(|| format!("Failed to create {}", store.dir().display()))?;
        if !publish_new(&path, &png)? {
            return Ok(RecordOutcome::AlreadyExists);
        }
        info!("Recorded baseline {}", path.display());
        Ok(RecordOutcome::Recorded {
            path,
            width: img.width(),
            height: img.height(),
        })
    }
}

/// Write `bytes` to `path` only if nothing is there yet.
///
/// Each call stages its bytes in its own temporary file in the target
/// directory and links it into place without clobbering, so concurrent
/// recorders never see a partial file or replace each other's baseline.
fn publish_new(path: &Path, bytes: &[u8]) -> Result<bool> {
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut staged = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to stage a file in {}", dir.display()))?;
    staged
        .write_all(bytes)
        .with_context(|| format!("Failed to write {}", staged.path().display()))?;
    match staged.persist_noclobber(path) {
        Ok(_file) => Ok(true),
        Err(err) if err.error.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(err) => Err(err.error).with_context(|| format!("Failed to publish {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TestCase;
    use anyhow::anyhow;
    use std::fs::{read, read_dir, write};
    use std::thread;

    #[test]
    fn override_file_wins() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = BaselineStore::new(dir.path());
        let case = TestCase::new("amazon-ca", "http://www.amazon.ca/").with_threshold(0.308);
        assert!((store.threshold_for(&case) - 0.308).abs() < f64::EPSILON);

        write(store.override_path("amazon-ca"), "0.35\n")?;
        assert!((store.threshold_for(&case) - 0.35).abs() < f64::EPSILON);

        write(store.override_path("amazon-ca"), "lots")?;
        assert!((store.threshold_for(&case) - 0.308).abs() < f64::EPSILON);
        Ok(())
    }

    #[test]
    fn paths_follow_case_name() {
        let store = BaselineStore::new("/srv/screenshots");
        assert_eq!(store.image_path("gist"), PathBuf::from("/srv/screenshots/gist.png"));
        assert_eq!(
            store.override_path("gist"),
            PathBuf::from("/srv/screenshots/gist.png.txt")
        );
    }

    #[test]
    fn publish_never_overwrites() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("case.png");
        assert!(publish_new(&path, b"first")?);
        assert!(!publish_new(&path, b"second")?);
        assert_eq!(read_to_string(&path)?, "first");
        Ok(())
    }

    #[test]
    fn concurrent_publishers_leave_one_whole_baseline() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let payloads = [vec![0xAAu8; 4 << 20], vec![0x55u8; 4 << 20]];
        for round in 0..20 {
            let path = dir.path().join(format!("case-{round}.png"));
            let outcomes = thread::scope(|scope| {
                let handles: Vec<_> = payloads
                    .iter()
                    .map(|payload| {
                        let target = &path;
                        scope.spawn(move || publish_new(target, payload))
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| handle.join().map_err(|_| anyhow!("publisher panicked"))?)
                    .collect::<Result<Vec<bool>>>()
            })?;

            assert_eq!(outcomes.iter().filter(|&&won| won).count(), 1);
            let stored = read(&path)?;
            assert!(payloads.iter().any(|payload| *payload == stored), "torn baseline in round {round}");
        }
        let leftovers = read_dir(dir.path())?.count();
        assert_eq!(leftovers, 20);
        Ok(())
    }
}
