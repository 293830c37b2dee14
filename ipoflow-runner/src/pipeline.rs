//! Pipeline orchestrator.
//!
//! Sequences the five stages over a single store connection:
//!
//! ```text
//! Extract → Load → Transform → Mart → Export
//! ```
//!
//! Extract, Load and Transform tolerate per-item failures (Load and Transform
//! become fatal when nothing at all succeeds). Mart and Export are fail-fast.
//! The store is opened once, closed on the transition into `Done` or `Failed`,
//! and closed again by a drop guard if anything unwinds past that point.

use chrono::{DateTime, Local, NaiveDate, Utc};
use ipoflow_core::{ScrapeError, Scraper};
use std::path::PathBuf;
use thiserror::Error;
use tracing::Dispatch;

use crate::config::{AllSourcesFailed, PipelineConfig};
use crate::export::run_export;
use crate::extract::{default_scrapers, run_extraction, ScraperRegistry};
use crate::history::{RunHistory, RunSummary};
use crate::loader::run_load;
use crate::stage::{RunState, Stage, StageOutcome};
use crate::store::{AnalyticalStore, DuckDbConnector, StoreConnector, StoreError};
use crate::transform::{build_mart, run_transform};

const BANNER_WIDTH: usize = 60;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("analytical store unavailable at {location}: {source}")]
    StoreUnavailable {
        location: String,
        #[source]
        source: StoreError,
    },

    #[error("no source could be extracted")]
    NoSourcesExtracted,

    #[error("no raw tables were loaded")]
    NoRawTablesLoaded,

    #[error("no staging tables were created")]
    NoStagingTablesCreated,

    #[error("mart script not found: {}", .0.display())]
    MissingMartScript(PathBuf),

    #[error("mart build failed for {table}: {reason}")]
    MartBuild { table: String, reason: String },

    #[error("export failed writing {}: {source}", path.display())]
    ExportIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("export failed: {0}")]
    ExportStore(#[source] StoreError),

    #[error("invalid state transition {from} -> {to}")]
    InvalidTransition { from: RunState, to: RunState },

    #[error("run ended in state {0} without an export")]
    Incomplete(RunState),
}

/// Result of one `Pipeline::run`.
#[derive(Debug)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Terminal state: `Done` or `Failed`.
    pub state: RunState,
    pub outcomes: Vec<StageOutcome>,
    pub export_path: Option<PathBuf>,
    /// The fatal error, when the run failed.
    pub error: Option<PipelineError>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.state == RunState::Done
    }

    pub fn outcome(&self, stage: Stage) -> Option<&StageOutcome> {
        self.outcomes.iter().find(|o| o.stage == stage)
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    /// The export path on success, the fatal error otherwise.
    pub fn into_result(self) -> Result<PathBuf, PipelineError> {
        match (self.error, self.export_path) {
            (Some(e), _) => Err(e),
            (None, Some(path)) => Ok(path),
            (None, None) => Err(PipelineError::Incomplete(self.state)),
        }
    }
}

/// State and outcomes accumulated while a run progresses.
struct RunTracker {
    state: RunState,
    outcomes: Vec<StageOutcome>,
}

impl RunTracker {
    fn new() -> Self {
        Self {
            state: RunState::Init,
            outcomes: Vec::new(),
        }
    }

    fn transition(&mut self, next: RunState) -> Result<(), PipelineError> {
        if !self.state.can_transition_to(next) {
            return Err(PipelineError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!(from = %self.state, to = %next, "state transition");
        self.state = next;
        Ok(())
    }

    /// Move to `Failed` unless the run already ended.
    fn fail(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        if let Err(e) = self.transition(RunState::Failed) {
            tracing::warn!(error = %e, "could not mark run as failed");
        }
    }

    fn enter(&mut self, stage: Stage) -> Result<(), PipelineError> {
        self.transition(stage.state())?;
        tracing::info!("{}", "-".repeat(BANNER_WIDTH));
        tracing::info!("{}", stage.title());
        tracing::info!("{}", "-".repeat(BANNER_WIDTH));
        Ok(())
    }

    /// Record a finished stage. A fatal error marks the outcome and is returned.
    fn finish_stage(
        &mut self,
        mut outcome: StageOutcome,
        fatal: Option<PipelineError>,
    ) -> Result<(), PipelineError> {
        tracing::info!(
            stage = %outcome.stage,
            succeeded = outcome.completed.len(),
            failed = outcome.failed.len(),
            skipped = outcome.skipped.len(),
            duration_ms = outcome.duration_ms,
            "stage finished"
        );
        match fatal {
            Some(e) => {
                tracing::error!(stage = %outcome.stage, policy = ?outcome.stage.policy(), error = %e, "stage failed");
                outcome.fatal = true;
                self.outcomes.push(outcome);
                Err(e)
            }
            None => {
                self.outcomes.push(outcome);
                Ok(())
            }
        }
    }
}

/// Owns the store for the duration of a run and closes it on drop.
struct StoreGuard<S: AnalyticalStore> {
    store: S,
}

impl<S: AnalyticalStore> StoreGuard<S> {
    fn close(&mut self) {
        match self.store.close() {
            Ok(true) => tracing::info!("database connection closed"),
            Ok(false) => {}
            Err(e) => tracing::warn!(error = %e, "error closing database connection"),
        }
    }
}

impl<S: AnalyticalStore> Drop for StoreGuard<S> {
    fn drop(&mut self) {
        if self.store.is_open() {
            self.close();
        }
    }
}

fn banner(title: &str) {
    tracing::info!("{}", "=".repeat(BANNER_WIDTH));
    tracing::info!("{title}");
    tracing::info!("{}", "=".repeat(BANNER_WIDTH));
}

/// The IPO analytics pipeline, configured once and run end to end.
pub struct Pipeline<C: StoreConnector = DuckDbConnector> {
    config: PipelineConfig,
    connector: C,
    scrapers: ScraperRegistry,
    log_sink: Dispatch,
}

impl Pipeline<DuckDbConnector> {
    /// Pipeline over the configured DuckDB file with network adapters for
    /// every configured source.
    pub fn from_config(config: PipelineConfig) -> Result<Self, ScrapeError> {
        let scrapers = default_scrapers(&config)?;
        let connector = DuckDbConnector::new(config.paths.store_path.clone());
        Ok(Self::new(config, connector).with_scrapers(scrapers))
    }
}

impl<C: StoreConnector> Pipeline<C> {
    /// Pipeline with no adapters registered and a silent log sink.
    pub fn new(config: PipelineConfig, connector: C) -> Self {
        Self {
            config,
            connector,
            scrapers: ScraperRegistry::new(),
            log_sink: Dispatch::none(),
        }
    }

    /// Register the adapter for the source with display name `name`.
    pub fn with_scraper(mut self, name: impl Into<String>, scraper: Box<dyn Scraper>) -> Self {
        self.scrapers.insert(name.into(), scraper);
        self
    }

    pub fn with_scrapers(mut self, scrapers: ScraperRegistry) -> Self {
        self.scrapers.extend(scrapers);
        self
    }

    pub fn with_log_sink(mut self, dispatch: Dispatch) -> Self {
        self.log_sink = dispatch;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run(&self) -> RunReport {
        tracing::dispatcher::with_default(&self.log_sink, || self.run_scoped())
    }

    fn run_scoped(&self) -> RunReport {
        let started_at = Utc::now();
        let run_date = Local::now().date_naive();
        let mut run = RunTracker::new();

        banner("IPO ANALYTICS PIPELINE STARTED");
        tracing::info!(store = %self.connector.describe(), run_date = %run_date, "starting run");

        let (result, export_path) = match self.connector.connect() {
            Ok(store) => {
                let mut guard = StoreGuard { store };
                let result = self
                    .execute(&mut run, &mut guard.store, run_date)
                    .and_then(|path| run.transition(RunState::Done).map(|_| path));
                if result.is_err() {
                    run.fail();
                }
                guard.close();
                match result {
                    Ok(path) => (Ok(()), Some(path)),
                    Err(e) => (Err(e), None),
                }
            }
            Err(source) => {
                let err = PipelineError::StoreUnavailable {
                    location: self.connector.describe(),
                    source,
                };
                tracing::error!(error = %err, "could not open analytical store");
                run.fail();
                (Err(err), None)
            }
        };

        let report = RunReport {
            started_at,
            finished_at: Utc::now(),
            state: run.state,
            outcomes: run.outcomes,
            export_path,
            error: result.err(),
        };

        self.log_summary(&report);
        self.record_history(&report);
        report
    }

    fn execute<S: AnalyticalStore>(
        &self,
        run: &mut RunTracker,
        store: &mut S,
        run_date: NaiveDate,
    ) -> Result<PathBuf, PipelineError> {
        run.enter(Stage::Extract)?;
        let outcome = if self.config.extraction.enabled {
            run_extraction(&self.config, &self.scrapers)
        } else {
            tracing::info!("extraction disabled, using existing raw files");
            let mut outcome = StageOutcome::new(Stage::Extract);
            for source in &self.config.sources {
                outcome.skip(&source.name);
            }
            outcome
        };
        let nothing_extracted = self.config.extraction.enabled
            && !self.config.sources.is_empty()
            && outcome.succeeded_count() == 0;
        let fatal = match (nothing_extracted, self.config.extraction.on_all_failed) {
            (true, AllSourcesFailed::Abort) => Some(PipelineError::NoSourcesExtracted),
            (true, AllSourcesFailed::Continue) => {
                tracing::warn!("no source was extracted, continuing with existing raw files");
                None
            }
            (false, _) => None,
        };
        run.finish_stage(outcome, fatal)?;

        run.enter(Stage::Load)?;
        let outcome = run_load(&self.config, store);
        let fatal = (outcome.succeeded_count() == 0).then_some(PipelineError::NoRawTablesLoaded);
        run.finish_stage(outcome, fatal)?;

        run.enter(Stage::Transform)?;
        let outcome = run_transform(&self.config, store);
        let fatal =
            (outcome.succeeded_count() == 0).then_some(PipelineError::NoStagingTablesCreated);
        run.finish_stage(outcome, fatal)?;

        run.enter(Stage::Mart)?;
        let mut outcome = StageOutcome::new(Stage::Mart);
        let fatal = build_mart(&self.config, store, &mut outcome).err();
        run.finish_stage(outcome, fatal)?;

        run.enter(Stage::Export)?;
        let mut outcome = StageOutcome::new(Stage::Export);
        let result = run_export(&self.config, store, run_date, &mut outcome);
        let (path, fatal) = match result {
            Ok(path) => (Some(path), None),
            Err(e) => (None, Some(e)),
        };
        run.finish_stage(outcome, fatal)?;

        path.ok_or(PipelineError::Incomplete(run.state))
    }

    fn log_summary(&self, report: &RunReport) {
        let elapsed = report.duration().num_milliseconds();
        match &report.error {
            None => {
                banner("PIPELINE COMPLETED SUCCESSFULLY");
                for outcome in &report.outcomes {
                    for item in &outcome.completed {
                        tracing::info!(stage = %outcome.stage, item = %item.item, rows = item.rows, "ok");
                    }
                }
                if let Some(path) = &report.export_path {
                    tracing::info!(path = %path.display(), "output file");
                }
                tracing::info!(elapsed_ms = elapsed, "total run time");
            }
            Some(e) => {
                tracing::error!("{}", "!".repeat(BANNER_WIDTH));
                tracing::error!("PIPELINE FAILED: {e}");
                tracing::error!("{}", "!".repeat(BANNER_WIDTH));
                tracing::error!(state = %report.state, elapsed_ms = elapsed, "run aborted");
            }
        }
    }

    fn record_history(&self, report: &RunReport) {
        if !self.config.record_history {
            return;
        }
        let history = RunHistory::new(self.config.history_path());
        if let Err(e) = history.append(&RunSummary::from_report(report)) {
            tracing::warn!(path = %history.path().display(), error = %e, "failed to append run history");
        }
    }
}
