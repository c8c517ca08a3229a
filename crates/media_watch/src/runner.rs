//! Runs catalog cases one at a time against a shared scratch directory.

use crate::baseline::{BaselineRecorder, BaselineStore, RecordOutcome};
use crate::catalog::{Catalog, TestCase};
use crate::comparator::{ComparisonTarget, RetryingComparator};
use crate::config::{HarnessConfig, RunMode, Viewport};
use crate::fixture::{ClaimOptions, FixtureClaim, document_shell};
use crate::render::EmbedRenderer;
use crate::report::{CaseFailure, CaseReport, CaseStatus, RunReport, SkipReason};
use crate::scorer::Scorer;
use crate::session::BrowserSession;
use anyhow::{Result, bail};
use log::{error, info, warn};

/// Apply chunk selection, then reverse order, then the name filter.
///
/// # Errors
///
/// Returns an error if the configured chunk lies past the end of the catalog.
pub fn select_cases(catalog: &Catalog, config: &HarnessConfig, filter: Option<&str>) -> Result<Catalog> {
    let mut selected = match config.chunk {
        Some((size, index)) => {
            let chunk = catalog.chunk(size, index);
            if chunk.is_empty() && !catalog.is_empty() {
                bail!(
                    "Chunk {index} of size {size} is past the end of the {}-case catalog",
                    catalog.len()
                );
            }
            chunk
        }
        None => catalog.clone(),
    };
    if config.reverse {
        selected = selected.reversed();
    }
    Ok(match filter {
        Some(needle) => selected.filter(needle),
        None => selected,
    })
}

/// One shard of a run.
///
/// Cases are claimed through their fixture file, so several runners in
/// separate processes can share one scratch directory.
pub struct Runner<'run, R: ?Sized, S: ?Sized, D: ?Sized> {
    config: &'run HarnessConfig,
    renderer: &'run R,
    session: &'run mut S,
    scorer: &'run D,
    baselines: BaselineStore,
}

impl<'run, R, S, D> Runner<'run, R, S, D>
where
    R: EmbedRenderer + ?Sized,
    S: BrowserSession + ?Sized,
    D: Scorer + ?Sized,
{
    pub fn new(
        config: &'run HarnessConfig,
        renderer: &'run R,
        session: &'run mut S,
        scorer: &'run D,
    ) -> Self {
        Self {
            config,
            renderer,
            session,
            scorer,
            baselines: BaselineStore::new(&config.baseline_dir),
        }
    }

    /// Run every case in order. A failing case never stops the rest.
    pub fn run_all(&mut self, catalog: &Catalog) -> RunReport {
        let mut report = RunReport::default();
        for case in catalog.list() {
            report.push(self.run_case(case));
        }
        report
    }

    /// Claim, render, load and then compare or record one case.
    pub fn run_case(&mut self, case: &TestCase) -> CaseReport {
        let status = self.case_status(case);
        match &status {
            CaseStatus::Passed { score, attempts } => {
                info!("{}: passed with {score} after {attempts} attempt(s)", case.name);
            }
            CaseStatus::Recorded { path } => info!("{}: recorded {}", case.name, path.display()),
            CaseStatus::Skipped { reason } => info!("{}: skipped ({reason:?})", case.name),
            CaseStatus::Failed { failure } => error!("{}: failed: {}", case.name, failure.reason()),
        }
        CaseReport {
            name: case.name.clone(),
            input: case.input.clone(),
            status,
        }
    }

    fn case_status(&mut self, case: &TestCase) -> CaseStatus {
        let options = ClaimOptions {
            exclusive: self.config.sharded,
            keep_fixture: self.config.preserve_artifacts || self.config.sharded,
            keep_candidate: self.config.preserve_artifacts,
        };
        let claim = match FixtureClaim::acquire(&self.config.scratch_dir, &case.name, options) {
            Ok(Some(claim)) => claim,
            Ok(None) => {
                return CaseStatus::Skipped {
                    reason: SkipReason::ClaimedElsewhere,
                };
            }
            Err(err) => return io_failure(format!("Failed to claim fixture: {err}")),
        };

        let has_baseline = self.baselines.exists(&case.name);
        match self.config.mode {
            RunMode::Record if has_baseline => {
                return CaseStatus::Skipped {
                    reason: SkipReason::BaselineExists,
                };
            }
            RunMode::Compare if !has_baseline => {
                return CaseStatus::Failed {
                    failure: CaseFailure::MissingBaseline {
                        path: self.baselines.image_path(&case.name),
                    },
                };
            }
            RunMode::Record | RunMode::Compare => {}
        }

        let viewport = case
            .fixed_size()
            .map_or(self.config.viewport, |(width, height)| Viewport::new(width, height));
        if let Err(failure) = self.load(case, &claim, viewport) {
            return CaseStatus::Failed { failure };
        }

        match self.config.mode {
            RunMode::Compare => self.compare(case, &claim),
            RunMode::Record => self.record(case),
        }
    }

    fn load(&mut self, case: &TestCase, claim: &FixtureClaim, viewport: Viewport) -> Result<(), CaseFailure> {
        let fragment = self
            .renderer
            .render(case.family(), &case.input)
            .map_err(|err| CaseFailure::Render {
                message: format!("{err:#}"),
            })?;
        let html = document_shell(&fragment, viewport, &self.config.base_href);
        claim.write(&html).map_err(|err| CaseFailure::Io {
            message: format!("Failed to write {}: {err}", claim.fixture_path().display()),
        })?;

        let url = claim.url().map_err(|err| CaseFailure::Io {
            message: format!("{err:#}"),
        })?;
        self.session
            .set_viewport(viewport)
            .and_then(|()| self.session.navigate(&url))
            .map_err(|err| CaseFailure::Navigation {
                message: format!("{err:#}"),
            })
    }

    fn compare(&mut self, case: &TestCase, claim: &FixtureClaim) -> CaseStatus {
        let expected = self.baselines.image_path(&case.name);
        let crop = match self.baselines.dimensions(&case.name) {
            Ok(crop) => crop,
            Err(err) => {
                return io_failure(format!("Failed to read {}: {err}", expected.display()));
            }
        };
        let target = ComparisonTarget {
            expected: &expected,
            candidate: claim.candidate_path(),
            crop,
            threshold: self.baselines.threshold_for(case),
        };
        let result = RetryingComparator::new(
            &mut *self.session,
            self.scorer,
            self.config.attempts,
            self.config.backoff,
        )
        .run(&target);

        match result.score {
            Some(score) if result.passed => CaseStatus::Passed {
                score,
                attempts: result.attempts_used,
            },
            _ => CaseStatus::Failed {
                failure: CaseFailure::from_comparison(&result),
            },
        }
    }

    fn record(&mut self, case: &TestCase) -> CaseStatus {
        let mut recorder = BaselineRecorder::new(&mut *self.session, self.config.settle);
        match recorder.record(&self.baselines, case) {
            Ok(RecordOutcome::Recorded { path, .. }) => CaseStatus::Recorded { path },
            Ok(RecordOutcome::AlreadyExists) => CaseStatus::Skipped {
                reason: SkipReason::BaselineExists,
            },
            Err(err) => {
                warn!("Recording {} failed: {err:#}", case.name);
                CaseStatus::Failed {
                    failure: CaseFailure::Capture {
                        message: format!("{err:#}"),
                    },
                }
            }
        }
    }
}

fn io_failure(message: String) -> CaseStatus {
    CaseStatus::Failed {
        failure: CaseFailure::Io { message },
    }
}
