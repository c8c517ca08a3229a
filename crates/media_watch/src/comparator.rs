//! Bounded retry loop around capture, crop and score.
//!
//! Embedded players and social widgets finish painting at unpredictable
//! times, so one screenshot is not enough. The comparator keeps capturing
//! with a growing delay until a capture scores within the threshold or the
//! attempt budget runs out:
//!
//! ```text
//! Rendering -> AwaitingStability -> Scored -> Passed
//!                     ^               |
//!                     +---------------+-> Exhausted
//! ```

use crate::capture::{CropRect, capture_to_file, encode_diagnostic};
use crate::config::BackoffSchedule;
use crate::scorer::Scorer;
use crate::session::BrowserSession;
use log::{debug, warn};
use serde::Serialize;
use std::path::Path;
use std::thread::sleep;

/// Comparator state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Phase {
    /// The fixture is loaded; nothing captured yet.
    Rendering,
    /// Waiting for the page to settle before the next attempt.
    AwaitingStability,
    /// An attempt finished; `None` when it produced no score.
    Scored(Option<f64>),
    Passed,
    Exhausted,
}

/// What happened during one attempt.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Scored { score: f64 },
    /// The diff tool failed; the attempt has no score.
    ToolError { message: String, output: Option<String> },
    /// The screenshot could not be taken, decoded or written.
    CaptureError { message: String },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AttemptRecord {
    /// 1-indexed
    pub attempt: u32,
    pub outcome: AttemptOutcome,
}

/// Files and limits for one comparison.
#[derive(Clone, Copy, Debug)]
pub struct ComparisonTarget<'paths> {
    pub expected: &'paths Path,
    pub candidate: &'paths Path,
    pub crop: CropRect,
    pub threshold: f64,
}

/// Verdict of a comparison.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ComparisonResult {
    /// Last observed score, `None` if no attempt produced one
    pub score: Option<f64>,
    pub threshold: f64,
    pub attempts_used: u32,
    pub passed: bool,
    /// Base64 PNG of the final candidate, only when the comparison failed
    pub diagnostic_image: Option<String>,
    pub attempts: Vec<AttemptRecord>,
}

impl ComparisonResult {
    /// Output of the most recent tool failure.
    pub fn last_tool_output(&self) -> Option<&str> {
        self.attempts
            .iter()
            .rev()
            .find_map(|record| match &record.outcome {
                AttemptOutcome::ToolError { message, output } => {
                    Some(output.as_deref().unwrap_or(message))
                }
                AttemptOutcome::Scored { .. } | AttemptOutcome::CaptureError { .. } => None,
            })
    }

    /// Message of the most recent capture failure.
    pub fn last_capture_error(&self) -> Option<&str> {
        self.attempts
            .iter()
            .rev()
            .find_map(|record| match &record.outcome {
                AttemptOutcome::CaptureError { message } => Some(message.as_str()),
                AttemptOutcome::Scored { .. } | AttemptOutcome::ToolError { .. } => None,
            })
    }
}

/// Drives capture and scoring for one case until it passes or runs out of attempts.
pub struct RetryingComparator<'run, S: ?Sized, D: ?Sized> {
    session: &'run mut S,
    scorer: &'run D,
    budget: u32,
    backoff: BackoffSchedule,
}

impl<'run, S, D> RetryingComparator<'run, S, D>
where
    S: BrowserSession + ?Sized,
    D: Scorer + ?Sized,
{
    /// `budget` is clamped to at least one attempt.
    pub fn new(session: &'run mut S, scorer: &'run D, budget: u32, backoff: BackoffSchedule) -> Self {
        Self {
            session,
            scorer,
            budget: budget.max(1),
            backoff,
        }
    }

    /// Run the state machine to completion.
    pub fn run(&mut self, target: &ComparisonTarget<'_>) -> ComparisonResult {
        let mut phase = Phase::Rendering;
        let mut attempt = 0u32;
        let mut last_score = None;
        let mut attempts = Vec::new();

        loop {
            let next = match phase {
                Phase::Rendering => Phase::AwaitingStability,
                Phase::AwaitingStability => {
                    attempt += 1;
                    let delay = self.backoff.delay(attempt);
                    if !delay.is_zero() {
                        debug!("Attempt {attempt}: waiting {delay:?} for the page to settle");
                        sleep(delay);
                    }
                    let outcome = self.attempt(target);
                    let score = match outcome {
                        AttemptOutcome::Scored { score } => Some(score),
                        AttemptOutcome::ToolError { .. } | AttemptOutcome::CaptureError { .. } => {
                            None
                        }
                    };
                    attempts.push(AttemptRecord { attempt, outcome });
                    if score.is_some() {
                        last_score = score;
                    }
                    Phase::Scored(score)
                }
                Phase::Scored(Some(score)) if score <= target.threshold => Phase::Passed,
                Phase::Scored(_) if attempt >= self.budget => Phase::Exhausted,
                Phase::Scored(_) => Phase::AwaitingStability,
                Phase::Passed | Phase::Exhausted => break,
            };
            debug!("{phase:?} -> {next:?}");
            phase = next;
        }

        let passed = phase == Phase::Passed;
        let diagnostic_image = if passed {
            None
        } else {
            encode_diagnostic(target.candidate).ok()
        };
        ComparisonResult {
            score: last_score,
            threshold: target.threshold,
            attempts_used: attempt,
            passed,
            diagnostic_image,
            attempts,
        }
    }

    fn attempt(&mut self, target: &ComparisonTarget<'_>) -> AttemptOutcome {
        let raw = match self.session.capture() {
            Ok(raw) => raw,
            Err(err) => {
                warn!("Screenshot failed: {err:#}");
                return AttemptOutcome::CaptureError {
                    message: format!("{err:#}"),
                };
            }
        };
        if let Err(err) = capture_to_file(&raw, target.crop, target.candidate) {
            warn!("Capture rejected: {err}");
            return AttemptOutcome::CaptureError {
                message: err.to_string(),
            };
        }
        match self.scorer.score(target.expected, target.candidate) {
            Ok(score) => {
                debug!("Scored {score} against threshold {}", target.threshold);
                AttemptOutcome::Scored { score }
            }
            Err(err) => {
                warn!("Tool failure: {err}");
                AttemptOutcome::ToolError {
                    message: err.to_string(),
                    output: err.output().map(str::to_owned),
                }
            }
        }
    }
}
