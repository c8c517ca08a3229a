//! Perceptual dissimilarity scoring through the external `dssim` tool.

use log::{debug, info};
use std::env;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

/// Name of the tool looked up on `PATH`.
const TOOL_NAME: &str = "dssim";

/// Tool path resolved for this process.
static RESOLVED_TOOL: OnceLock<PathBuf> = OnceLock::new();

/// Scoring failures.
#[derive(Debug, Clone, PartialEq)]
pub enum ScoreError {
    /// No executable was found at startup.
    ToolNotFound { searched: PathBuf },
    /// The tool could not be started.
    Spawn { tool: PathBuf, message: String },
    /// The tool exited with a nonzero status.
    Failed { status: Option<i32>, output: String },
    /// The tool succeeded but its output does not start with a number.
    Unparsable { output: String },
}

impl ScoreError {
    /// Raw tool output attached to the error, if any.
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::Failed { output, .. } | Self::Unparsable { output } => Some(output),
            Self::ToolNotFound { .. } | Self::Spawn { .. } => None,
        }
    }
}

impl Display for ScoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ToolNotFound { searched } => write!(
                f,
                "could not find {TOOL_NAME} at {} or on PATH",
                searched.display()
            ),
            Self::Spawn { tool, message } => {
                write!(f, "failed to run {}: {message}", tool.display())
            }
            Self::Failed { status, output } => match status {
                Some(code) => write!(f, "{TOOL_NAME} exited with status {code}: {output}"),
                None => write!(f, "{TOOL_NAME} was terminated by a signal: {output}"),
            },
            Self::Unparsable { output } => write!(f, "{TOOL_NAME} output {output}"),
        }
    }
}

impl std::error::Error for ScoreError {}

/// Anything that can score a candidate against a baseline.
pub trait Scorer {
    /// Dissimilarity of `actual` relative to `expected`, never negative.
    ///
    /// # Errors
    ///
    /// Returns an error when the score could not be produced.
    fn score(&self, expected: &Path, actual: &Path) -> Result<f64, ScoreError>;
}

/// Parse the leading, optionally signed, decimal token of tool output.
/// The sign is dropped.
pub fn parse_score(output: &str) -> Option<f64> {
    let trimmed = output.trim_start();
    let unsigned = trimmed.strip_prefix('-').unwrap_or(trimmed);
    let end = unsigned
        .find(|ch: char| !(ch.is_ascii_digit() || ch == '.'))
        .unwrap_or(unsigned.len());
    let token = &unsigned[..end];
    if token.is_empty() {
        return None;
    }
    token
        .parse::<f64>()
        .ok()
        .filter(|score| score.is_finite())
        .map(f64::abs)
}

#[cfg(unix)]
fn is_executable_file(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt as _;
    path.metadata()
        .is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable_file(path: &Path) -> bool {
    path.is_file()
}

/// Find the tool: the well-known path first, then every `PATH` entry.
///
/// # Errors
///
/// Returns [`ScoreError::ToolNotFound`] if neither location has an executable.
pub fn find_tool(well_known: &Path, search_path: Option<&str>) -> Result<PathBuf, ScoreError> {
    if is_executable_file(well_known) {
        return Ok(well_known.to_path_buf());
    }
    search_path
        .into_iter()
        .flat_map(env::split_paths)
        .map(|dir| dir.join(TOOL_NAME))
        .find(|candidate| is_executable_file(candidate))
        .ok_or_else(|| ScoreError::ToolNotFound {
            searched: well_known.to_path_buf(),
        })
}

/// `dssim` invoked as a subprocess.
#[derive(Clone, Debug)]
pub struct DssimScorer {
    tool: PathBuf,
}

impl DssimScorer {
    /// Use a specific executable without any lookup.
    pub fn with_tool(tool: PathBuf) -> Self {
        Self { tool }
    }

    /// Resolve the tool once per process and reuse it afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`ScoreError::ToolNotFound`] on the first call if no tool exists.
    pub fn resolve(well_known: &Path) -> Result<Self, ScoreError> {
        if let Some(tool) = RESOLVED_TOOL.get() {
            return Ok(Self::with_tool(tool.clone()));
        }
        let path_var = env::var("PATH").ok();
        let tool = find_tool(well_known, path_var.as_deref())?;
        info!("Using {TOOL_NAME} at {}", tool.display());
        let cached = RESOLVED_TOOL.get_or_init(|| tool);
        Ok(Self::with_tool(cached.clone()))
    }
}

impl Scorer for DssimScorer {
    fn score(&self, expected: &Path, actual: &Path) -> Result<f64, ScoreError> {
        let output = Command::new(&self.tool)
            .arg(expected)
            .arg(actual)
            .output()
            .map_err(|err| ScoreError::Spawn {
                tool: self.tool.clone(),
                message: err.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!("{TOOL_NAME} stdout={:?} stderr={:?}", stdout.trim(), stderr.trim());

        if !output.status.success() {
            let combined = format!("{}{}", stdout, stderr).trim().to_owned();
            return Err(ScoreError::Failed {
                status: output.status.code(),
                output: combined,
            });
        }
        parse_score(&stdout).ok_or_else(|| ScoreError::Unparsable {
            output: stdout.trim().to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_leading_number() {
        assert_eq!(parse_score("0.123 /tmp/a.png"), Some(0.123));
        assert_eq!(parse_score("  2\n"), Some(2.0));
        assert_eq!(parse_score(".5"), Some(0.5));
    }

    #[test]
    fn sign_is_discarded() {
        assert_eq!(parse_score("-0.04 b.png"), Some(0.04));
    }

    #[test]
    fn rejects_non_numbers() {
        assert_eq!(parse_score("decode error"), None);
        assert_eq!(parse_score(""), None);
        assert_eq!(parse_score("-"), None);
        assert_eq!(parse_score("1.2.3"), None);
        assert_eq!(parse_score("."), None);
    }

    #[test]
    fn missing_tool_is_reported() {
        let result = find_tool(Path::new("/nonexistent/dssim"), Some("/nonexistent-dir"));
        assert!(matches!(result, Err(ScoreError::ToolNotFound { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn finds_tool_on_path() -> anyhow::Result<()> {
        use std::fs::{set_permissions, write, Permissions};
        use std::os::unix::fs::PermissionsExt as _;

        let dir = tempfile::tempdir()?;
        let tool = dir.path().join(TOOL_NAME);
        write(&tool, "#!/bin/sh\necho 0.5\n")?;
        set_permissions(&tool, Permissions::from_mode(0o755))?;

        let joined = env::join_paths(["/nonexistent-dir", dir.path().to_str().unwrap_or_default()])?;
        let found = find_tool(Path::new("/nonexistent/dssim"), joined.to_str())?;
        assert_eq!(found, tool);
        Ok(())
    }

    /// `/bin/sh <script> <actual>` stands in for `dssim <expected> <actual>`.
    #[cfg(unix)]
    #[test]
    fn subprocess_results() -> anyhow::Result<()> {
        use std::fs::write;

        let dir = tempfile::tempdir()?;
        let ok_script = dir.path().join("ok.sh");
        write(&ok_script, "echo \"-0.25 $1\"\n")?;
        let bad_script = dir.path().join("bad.sh");
        write(&bad_script, "echo 'decode error' >&2\nexit 3\n")?;
        let garbled_script = dir.path().join("garbled.sh");
        write(&garbled_script, "echo 'usage: dssim a b'\n")?;

        let shell = DssimScorer::with_tool(PathBuf::from("/bin/sh"));
        let actual = dir.path().join("actual.png");

        let score = shell.score(&ok_script, &actual)?;
        assert!((score - 0.25).abs() < f64::EPSILON);

        assert_eq!(
            shell.score(&bad_script, &actual),
            Err(ScoreError::Failed {
                status: Some(3),
                output: "decode error".to_owned(),
            })
        );
        assert_eq!(
            shell.score(&garbled_script, &actual),
            Err(ScoreError::Unparsable {
                output: "usage: dssim a b".to_owned(),
            })
        );
        Ok(())
    }
}
