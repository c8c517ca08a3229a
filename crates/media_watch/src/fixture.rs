//! Rendered-HTML fixtures in the shared scratch directory.
//!
//! A fixture file doubles as the cross-shard claim on its case: whoever
//! creates `<name>.html` first owns the case, and everyone else skips it.

use crate::capture::write_atomically;
use crate::config::Viewport;
use anyhow::{Result, anyhow};
use log::{debug, warn};
use std::fs::{OpenOptions, remove_file};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use url::Url;

/// Wrap an embed fragment in the fixed page used for every capture.
pub fn document_shell(fragment: &str, viewport: Viewport, base_href: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head>\
         <style>body{{margin:0;background:#000}}</style>\
         <link rel=\"icon\" href=\"data:;base64,=\">\
         <base href=\"{base_href}\">\
         </head><body>\
         <div style=\"width:{}px;height:{}px;overflow:hidden\">{fragment}</div>\
         </body></html>",
        viewport.width, viewport.height
    )
}

/// Converts a file path to a file URL.
///
/// # Errors
///
/// Returns an error if the path cannot be converted to a valid file URL.
pub fn to_file_url(path: &Path) -> Result<Url> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    Url::from_file_path(&canonical)
        .map_err(|()| anyhow!("Invalid file path for URL: {}", canonical.display()))
}

/// How a claim is taken and what survives it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClaimOptions {
    /// Fail the claim when the fixture already exists
    pub exclusive: bool,
    /// Leave the fixture on disk when the claim is dropped
    pub keep_fixture: bool,
    /// Leave the candidate image on disk when the claim is dropped
    pub keep_candidate: bool,
}

/// Ownership of one case's scratch files for the duration of a run.
///
/// Dropping the claim removes the fixture and the candidate image unless
/// the options say to keep them.
#[derive(Debug)]
pub struct FixtureClaim {
    fixture: PathBuf,
    candidate: PathBuf,
    options: ClaimOptions,
}

impl FixtureClaim {
    /// Claim `<scratch>/<name>.html`.
    ///
    /// With `exclusive` set the file is created with `create_new`, so exactly
    /// one process wins; `Ok(None)` means another shard got there first.
    ///
    /// # Errors
    ///
    /// Returns an error for any I/O failure other than an existing fixture.
    pub fn acquire(scratch: &Path, name: &str, options: ClaimOptions) -> io::Result<Option<Self>> {
        let fixture = scratch.join(format!("{name}.html"));
        let candidate = scratch.join(format!("{name}.png"));

        let mut open = OpenOptions::new();
        open.write(true);
        if options.exclusive {
            open.create_new(true);
        } else {
            open.create(true).truncate(true);
        }
        match open.open(&fixture) {
            Ok(_file) => {
                debug!("Claimed {}", fixture.display());
                Ok(Some(Self {
                    fixture,
                    candidate,
                    options,
                }))
            }
            Err(err) if options.exclusive && err.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn fixture_path(&self) -> &Path {
        &self.fixture
    }

    /// Where this case's candidate screenshot is written.
    pub fn candidate_path(&self) -> &Path {
        &self.candidate
    }

    /// Replace the claimed fixture's contents in one rename.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary file cannot be written or renamed.
    pub fn write(&self, html: &str) -> io::Result<()> {
        write_atomically(&self.fixture, html.as_bytes())
    }

    /// File URL of the fixture for navigation.
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be expressed as a URL.
    pub fn url(&self) -> Result<Url> {
        to_file_url(&self.fixture)
    }
}

impl Drop for FixtureClaim {
    fn drop(&mut self) {
        if !self.options.keep_candidate {
            remove_if_present(&self.candidate);
        }
        if !self.options.keep_fixture {
            remove_if_present(&self.fixture);
        }
    }
}

fn remove_if_present(path: &Path) {
    if let Err(err) = remove_file(path)
        && err.kind() != ErrorKind::NotFound
    {
        warn!("Failed to remove {}: {err}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{read_to_string, write};

    const EXCLUSIVE: ClaimOptions = ClaimOptions {
        exclusive: true,
        keep_fixture: true,
        keep_candidate: false,
    };

    #[test]
    fn shell_wraps_fragment() {
        let html = document_shell("<iframe></iframe>", Viewport::new(640, 360), "http://localhost/");
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("background:#000"));
        assert!(html.contains("<base href=\"http://localhost/\">"));
        assert!(html.contains("width:640px;height:360px"));
        assert!(html.contains("<iframe></iframe></div>"));
    }

    #[test]
    fn exclusive_claim_is_single_winner() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let first = FixtureClaim::acquire(dir.path(), "gist", EXCLUSIVE)?;
        assert!(first.is_some());
        assert!(FixtureClaim::acquire(dir.path(), "gist", EXCLUSIVE)?.is_none());
        drop(first);
        // The fixture is kept as a "done" marker, so the case stays claimed.
        assert!(FixtureClaim::acquire(dir.path(), "gist", EXCLUSIVE)?.is_none());
        Ok(())
    }

    #[test]
    fn overwrite_claim_ignores_leftovers() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        write(dir.path().join("espn.html"), "stale")?;
        let claim = FixtureClaim::acquire(dir.path(), "espn", ClaimOptions::default())?
            .ok_or_else(|| anyhow!("claim refused"))?;
        assert_eq!(read_to_string(claim.fixture_path())?, "");
        claim.write("<p>fresh</p>")?;
        assert_eq!(read_to_string(claim.fixture_path())?, "<p>fresh</p>");
        Ok(())
    }

    #[test]
    fn drop_cleans_up_unless_kept() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let claim = FixtureClaim::acquire(dir.path(), "cnn-1", ClaimOptions::default())?
            .ok_or_else(|| anyhow!("claim refused"))?;
        write(claim.candidate_path(), b"png")?;
        let fixture = claim.fixture_path().to_path_buf();
        let candidate = claim.candidate_path().to_path_buf();
        drop(claim);
        assert!(!fixture.exists());
        assert!(!candidate.exists());

        let kept = ClaimOptions {
            exclusive: false,
            keep_fixture: true,
            keep_candidate: true,
        };
        let kept_claim = FixtureClaim::acquire(dir.path(), "cnn-2", kept)?
            .ok_or_else(|| anyhow!("claim refused"))?;
        write(kept_claim.candidate_path(), b"png")?;
        let kept_fixture = kept_claim.fixture_path().to_path_buf();
        let kept_candidate = kept_claim.candidate_path().to_path_buf();
        drop(kept_claim);
        assert!(kept_fixture.exists());
        assert!(kept_candidate.exists());
        Ok(())
    }

    #[test]
    fn fixture_url_is_file_scheme() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let claim = FixtureClaim::acquire(dir.path(), "blip-1", ClaimOptions::default())?
            .ok_or_else(|| anyhow!("claim refused"))?;
        let url = claim.url()?;
        assert_eq!(url.scheme(), "file");
        assert!(url.path().ends_with("/blip-1.html"));
        Ok(())
    }
}
