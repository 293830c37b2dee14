//! Serializable pipeline configuration.
//!
//! Everything the orchestrator needs is in one `PipelineConfig` value passed in
//! at construction: filesystem layout, the source → raw file → raw table
//! mapping, the ordered staging scripts with the table each one must create,
//! the mart script, export options, and the extraction failure policy.
//! `PipelineConfig::default()` reproduces the production layout.

use chrono::NaiveDate;
use ipoflow_core::{SourceKind, SourceSettings};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::identifier::TableName;
use crate::logging::LogSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("table {0} is declared more than once")]
    DuplicateTable(String),

    #[error("raw file {0} is declared by more than one source")]
    DuplicateFile(String),

    #[error("source name {0:?} is declared more than once")]
    DuplicateSource(String),

    #[error("at least one staging script is required")]
    NoStagingScripts,

    #[error("export prefix {0:?} must be a plain file name stem")]
    InvalidExportPrefix(String),

    #[error("tickertape page_size must be at least 1")]
    InvalidPageSize,

    #[error("chittorgarh start_year {start} is after end_year {end}")]
    InvalidYearRange { start: i32, end: i32 },
}

/// Filesystem layout consumed and produced by a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Adapter outputs (one CSV per source).
    pub raw_data_dir: PathBuf,
    /// Final export destination.
    pub staged_data_dir: PathBuf,
    /// The single analytical store file.
    pub store_path: PathBuf,
    /// Per-run log files and the run history.
    pub log_dir: PathBuf,
    /// Staging and mart SQL scripts.
    pub sql_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            raw_data_dir: PathBuf::from("data/raw"),
            staged_data_dir: PathBuf::from("data/staged"),
            store_path: PathBuf::from("data/duckdb/ipo.duckdb"),
            log_dir: PathBuf::from("logs"),
            sql_dir: PathBuf::from("sql_transformations"),
        }
    }
}

/// One extraction source and where its data lands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Display name, also used to look up the registered adapter.
    pub name: String,
    pub kind: SourceKind,
    /// File name under `raw_data_dir`.
    pub file: String,
    /// Raw table the loader creates from the file.
    pub table: TableName,
}

/// A SQL script and the single table it is contracted to leave behind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptSpec {
    /// File name under `sql_dir`.
    pub script: String,
    pub table: TableName,
}

/// What to do when every extraction source fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllSourcesFailed {
    /// Keep going and load whatever raw files already exist.
    #[default]
    Continue,
    /// Fail the run before the load stage.
    Abort,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// When false, the extraction stage is skipped and existing raw files are loaded.
    pub enabled: bool,
    pub on_all_failed: AllSourcesFailed,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            on_all_failed: AllSourcesFailed::Continue,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// File stem; the run date is appended as `_{YYYYMMDD}.csv`.
    pub prefix: String,
    pub header: bool,
    pub delimiter: char,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            prefix: "mart_ipo_analytics".to_string(),
            header: true,
            delimiter: ',',
        }
    }
}

/// Complete configuration for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Append a JSON summary of every finished run to `{log_dir}/runs.jsonl`.
    pub record_history: bool,
    pub paths: PathsConfig,
    pub extraction: ExtractionConfig,
    pub export: ExportConfig,
    pub log: LogSettings,
    pub sources: Vec<SourceSpec>,
    /// Executed strictly in this order.
    pub staging: Vec<ScriptSpec>,
    pub mart: ScriptSpec,
    pub source_settings: SourceSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            record_history: true,
            paths: PathsConfig::default(),
            extraction: ExtractionConfig::default(),
            export: ExportConfig::default(),
            log: LogSettings::default(),
            sources: vec![
                source(
                    "IPO Metadata",
                    SourceKind::NsePastIssues,
                    "ipo_metadata.csv",
                    "raw_past_ipo_table_1",
                ),
                source(
                    "IPO Subscription",
                    SourceKind::ChittorgarhSubscription,
                    "ipo_subscription.csv",
                    "raw_pastipo_subscription_table_1",
                ),
                source(
                    "Tickertape Data",
                    SourceKind::TickertapeScreener,
                    "tickertape_full_screener.csv",
                    "raw_tickertape_data_1",
                ),
            ],
            staging: vec![
                script("stg_past_ipo_table.sql", "stg_past_ipo_table"),
                script(
                    "stg_pastipo_subscription_table.sql",
                    "stg_pastipo_subscription_table",
                ),
                script("stg_tickertape_data_table.sql", "stg_tickertape_data_table"),
            ],
            mart: script("mart_ipo_analytics.sql", "mart_ipo_analytics_1"),
            source_settings: SourceSettings::default(),
        }
    }
}

fn source(name: &str, kind: SourceKind, file: &str, raw_table: &'static str) -> SourceSpec {
    SourceSpec {
        name: name.to_string(),
        kind,
        file: file.to_string(),
        table: TableName::from_static(raw_table),
    }
}

fn script(script: &str, staging_table: &'static str) -> ScriptSpec {
    ScriptSpec {
        script: script.to_string(),
        table: TableName::from_static(staging_table),
    }
}

impl PipelineConfig {
    /// Load a config from a TOML file.
    ///
    /// Relative paths inside the file are resolved against the file's directory.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Ok(config.resolve_paths(base))
    }

    /// Parse and validate a config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Make every relative path absolute with respect to `base`.
    pub fn resolve_paths(mut self, base: &Path) -> Self {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.paths.raw_data_dir);
        resolve(&mut self.paths.staged_data_dir);
        resolve(&mut self.paths.store_path);
        resolve(&mut self.paths.log_dir);
        resolve(&mut self.paths.sql_dir);
        self
    }

    /// Check the cross-field invariants serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // The store folds unquoted identifiers, so names clash case-insensitively.
        let mut tables = HashSet::new();
        let declared = self
            .sources
            .iter()
            .map(|s| &s.table)
            .chain(self.staging.iter().map(|s| &s.table))
            .chain(std::iter::once(&self.mart.table));
        for table in declared {
            if !tables.insert(table.as_str().to_ascii_lowercase()) {
                return Err(ConfigError::DuplicateTable(table.to_string()));
            }
        }

        let mut files = HashSet::new();
        let mut names = HashSet::new();
        for source in &self.sources {
            if !files.insert(source.file.as_str()) {
                return Err(ConfigError::DuplicateFile(source.file.clone()));
            }
            if !names.insert(source.name.as_str()) {
                return Err(ConfigError::DuplicateSource(source.name.clone()));
            }
        }

        if self.staging.is_empty() {
            return Err(ConfigError::NoStagingScripts);
        }

        let prefix = &self.export.prefix;
        if prefix.is_empty() || prefix.contains(['/', '\\']) || prefix.starts_with('.') {
            return Err(ConfigError::InvalidExportPrefix(prefix.clone()));
        }

        if self.source_settings.tickertape.page_size == 0 {
            return Err(ConfigError::InvalidPageSize);
        }
        let years = &self.source_settings.chittorgarh;
        if years.start_year > years.end_year {
            return Err(ConfigError::InvalidYearRange {
                start: years.start_year,
                end: years.end_year,
            });
        }

        Ok(())
    }

    pub fn raw_file_path(&self, source: &SourceSpec) -> PathBuf {
        self.paths.raw_data_dir.join(&source.file)
    }

    pub fn script_path(&self, script: &ScriptSpec) -> PathBuf {
        self.paths.sql_dir.join(&script.script)
    }

    /// Export destination for a run on `date`. Same-day runs share a path.
    pub fn export_path(&self, date: NaiveDate) -> PathBuf {
        self.paths.staged_data_dir.join(format!(
            "{}_{}.csv",
            self.export.prefix,
            date.format("%Y%m%d")
        ))
    }

    pub fn history_path(&self) -> PathBuf {
        self.paths.log_dir.join("runs.jsonl")
    }

    pub fn source(&self, name: &str) -> Option<&SourceSpec> {
        self.sources.iter().find(|s| s.name == name)
    }
}
