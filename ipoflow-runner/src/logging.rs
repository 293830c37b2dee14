//! Log sink construction.
//!
//! The pipeline never installs a global subscriber. Callers build a
//! `tracing::Dispatch` here and hand it to `Pipeline::with_log_sink`; the
//! pipeline scopes every stage with `tracing::dispatcher::with_default`.
//!
//! A dispatch writes to the console (stdout), to a per-run file
//! `{log_dir}/pipeline_{YYYYmmdd_HHMMSS}.log`, or both. `RUST_LOG` directives
//! are honoured on top of the configured level.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use tracing::Dispatch;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt as tfmt, EnvFilter};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log level: {0}")]
    InvalidLevel(String),

    #[error("failed to create log directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to open log file: {0}")]
    Appender(#[from] InitError),
}

/// Minimum severity written by the pipeline's log sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_level_filter(self) -> LevelFilter {
        match self {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(LoggingError::InvalidLevel(s.to_string())),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: LogLevel,
    /// Mirror log lines to stdout.
    pub console: bool,
    /// Write a per-run log file under `log_dir`.
    pub file: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            console: true,
            file: true,
        }
    }
}

/// File name of the log for a run started at `started`.
pub fn run_log_file_name(started: NaiveDateTime) -> String {
    format!("pipeline_{}.log", started.format("%Y%m%d_%H%M%S"))
}

/// Compose the log sink for one run.
///
/// Returns the dispatch and, when file logging is enabled, the path of the
/// run's log file.
pub fn build_dispatch(
    settings: &LogSettings,
    log_dir: &Path,
    started: NaiveDateTime,
) -> Result<(Dispatch, Option<PathBuf>), LoggingError> {
    let filter = EnvFilter::builder()
        .with_default_directive(settings.level.to_level_filter().into())
        .from_env_lossy();

    let console = settings
        .console
        .then(|| tfmt::layer().with_target(false).with_writer(std::io::stdout));

    let (file_layer, log_path) = if settings.file {
        std::fs::create_dir_all(log_dir).map_err(|source| LoggingError::CreateDir {
            path: log_dir.to_path_buf(),
            source,
        })?;
        let stem = format!("pipeline_{}", started.format("%Y%m%d_%H%M%S"));
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(stem)
            .filename_suffix("log")
            .build(log_dir)?;
        let layer = tfmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(appender);
        (Some(layer), Some(log_dir.join(run_log_file_name(started))))
    } else {
        (None, None)
    };

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer);

    Ok((Dispatch::new(subscriber), log_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn started() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap()
    }

    #[test]
    fn level_parses_case_insensitively() {
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn log_file_name_uses_run_timestamp() {
        assert_eq!(run_log_file_name(started()), "pipeline_20260102_030405.log");
    }

    #[test]
    fn file_sink_writes_into_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let settings = LogSettings {
            level: LogLevel::Info,
            console: false,
            file: true,
        };
        let (dispatch, path) = build_dispatch(&settings, dir.path(), started()).unwrap();
        let path = path.unwrap();

        tracing::dispatcher::with_default(&dispatch, || {
            tracing::info!("hello from the sink");
        });

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("hello from the sink"));
    }

    #[test]
    fn console_only_sink_creates_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let settings = LogSettings {
            level: LogLevel::Warn,
            console: true,
            file: false,
        };
        let (_dispatch, path) = build_dispatch(&settings, dir.path(), started()).unwrap();
        assert!(path.is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
