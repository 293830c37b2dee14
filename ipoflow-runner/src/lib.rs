//! ipoflow runner: orchestration of the IPO analytics pipeline.
//!
//! This crate builds on `ipoflow-core` to provide:
//! - `PipelineConfig`, the TOML-loadable description of a deployment
//! - Validated SQL identifiers (`TableName`)
//! - The analytical store abstraction and its DuckDB implementation
//! - Stage implementations: extract, load, transform, mart, export
//! - The `Pipeline` orchestrator with its run state machine
//! - Per-run log sinks and the JSONL run history

pub mod config;
pub mod export;
pub mod extract;
pub mod history;
pub mod identifier;
pub mod loader;
pub mod logging;
pub mod pipeline;
pub mod stage;
pub mod store;
pub mod transform;

pub use config::{
    AllSourcesFailed, ConfigError, ExportConfig, ExtractionConfig, PathsConfig, PipelineConfig,
    ScriptSpec, SourceSpec,
};
pub use extract::{default_scrapers, run_extraction, ScraperRegistry};
pub use history::{RunHistory, RunSummary, StageSummary};
pub use identifier::{IdentifierError, TableName};
pub use logging::{build_dispatch, LogLevel, LogSettings, LoggingError};
pub use pipeline::{Pipeline, PipelineError, RunReport};
pub use stage::{CompletedItem, FailurePolicy, ItemFailure, RunState, Stage, StageOutcome};
pub use store::{
    AnalyticalStore, CsvExportOptions, DuckDbConnector, DuckDbStore, StoreConnector, StoreError,
};
