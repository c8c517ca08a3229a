//! Per-case outcomes and the end-of-run summary.

use crate::comparator::ComparisonResult;
use log::{error, info};
use serde::Serialize;
use std::path::PathBuf;

/// Why a case was not run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Another shard owns the fixture.
    ClaimedElsewhere,
    /// Record mode and the baseline already exists.
    BaselineExists,
}

/// Why a case failed.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CaseFailure {
    /// No expected screenshot to compare against.
    MissingBaseline { path: PathBuf },
    Render { message: String },
    Navigation { message: String },
    /// Scratch or baseline file handling failed.
    Io { message: String },
    /// Every attempt failed to produce a usable screenshot.
    Capture { message: String },
    /// Every attempt failed in the diff tool.
    Tool { output: String, attempts: u32 },
    /// Scores never got within the threshold.
    ThresholdExceeded {
        score: f64,
        threshold: f64,
        attempts: u32,
        diagnostic: Option<String>,
    },
}

impl CaseFailure {
    /// Classify a failed comparison.
    pub fn from_comparison(result: &ComparisonResult) -> Self {
        if let Some(score) = result.score {
            return Self::ThresholdExceeded {
                score,
                threshold: result.threshold,
                attempts: result.attempts_used,
                diagnostic: result.diagnostic_image.clone(),
            };
        }
        if let Some(output) = result.last_tool_output() {
            return Self::Tool {
                output: output.to_owned(),
                attempts: result.attempts_used,
            };
        }
        Self::Capture {
            message: result
                .last_capture_error()
                .unwrap_or("no attempt produced a score")
                .to_owned(),
        }
    }

    /// Why the case failed, without the diagnostic image.
    pub fn reason(&self) -> String {
        match self {
            Self::MissingBaseline { path } => format!("missing baseline {}", path.display()),
            Self::Render { message } => format!("render error: {message}"),
            Self::Navigation { message } => format!("navigation error: {message}"),
            Self::Io { message } => format!("I/O error: {message}"),
            Self::Capture { message } => format!("capture error: {message}"),
            Self::Tool { output, attempts } => {
                format!("dssim output {output} (after {attempts} attempts)")
            }
            Self::ThresholdExceeded {
                score, threshold, ..
            } => format!("{score} > {threshold}"),
        }
    }

    /// [`CaseFailure::reason`] followed by the diagnostic image, if any.
    fn describe(&self) -> String {
        match self {
            Self::ThresholdExceeded {
                diagnostic: Some(image),
                ..
            } => format!("{} {image}", self.reason()),
            _ => self.reason(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CaseStatus {
    Passed { score: f64, attempts: u32 },
    Recorded { path: PathBuf },
    Skipped { reason: SkipReason },
    Failed { failure: CaseFailure },
}

/// Outcome of one case.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CaseReport {
    pub name: String,
    pub input: String,
    #[serde(flatten)]
    pub status: CaseStatus,
}

impl CaseReport {
    pub fn is_failure(&self) -> bool {
        matches!(self.status, CaseStatus::Failed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.status, CaseStatus::Skipped { .. })
    }
}

/// Outcomes of every case a runner handled, in the order handled.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub cases: Vec<CaseReport>,
}

impl RunReport {
    pub fn push(&mut self, report: CaseReport) {
        self.cases.push(report);
    }

    pub fn failures(&self) -> impl Iterator<Item = &CaseReport> {
        self.cases.iter().filter(|case| case.is_failure())
    }

    /// Cases that ran here, as opposed to being skipped.
    pub fn attempted(&self) -> impl Iterator<Item = &CaseReport> {
        self.cases.iter().filter(|case| !case.is_skipped())
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    /// One line per failing case: `<input> failed: <reason>`.
    pub fn summary_lines(&self) -> Vec<String> {
        self.failures()
            .filter_map(|case| match &case.status {
                CaseStatus::Failed { failure } => {
                    Some(format!("{} failed: {}", case.input, failure.describe()))
                }
                CaseStatus::Passed { .. } | CaseStatus::Recorded { .. } | CaseStatus::Skipped { .. } => {
                    None
                }
            })
            .collect()
    }

    /// Pretty JSON of the whole report.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Log totals and the failure lines.
    pub fn log_summary(&self) {
        let total = self.cases.len();
        let skipped = self.cases.iter().filter(|case| case.is_skipped()).count();
        let lines = self.summary_lines();
        info!(
            "{} cases: {} ran, {} skipped, {} failed",
            total,
            total - skipped,
            skipped,
            lines.len()
        );
        if lines.is_empty() {
            return;
        }
        error!("{} case(s) failed:", lines.len());
        error!("────────────────────────────────────────");
        for line in &lines {
            error!("  ✗ {line}");
        }
        error!("────────────────────────────────────────");
    }
}
