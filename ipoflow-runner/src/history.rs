//! Run history: JSONL append-only record of finished runs.
//!
//! Each line is one `RunSummary`. Lines are independent, so a torn final write
//! only loses that run; readers skip lines that do not parse.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::RunReport;
use crate::stage::{RunState, Stage};

/// Condensed view of one stage for the history file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSummary {
    pub stage: Stage,
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
    pub fatal: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub state: RunState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub stages: Vec<StageSummary>,
    /// Raw table → BLAKE3 digest of the file it was loaded from.
    pub raw_fingerprints: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_path: Option<PathBuf>,
}

impl RunSummary {
    pub fn from_report(report: &RunReport) -> Self {
        let stages = report
            .outcomes
            .iter()
            .map(|o| StageSummary {
                stage: o.stage,
                succeeded: o.completed.iter().map(|c| c.item.clone()).collect(),
                failed: o.failed.iter().map(|f| f.item.clone()).collect(),
                skipped: o.skipped.clone(),
                fatal: o.fatal,
                duration_ms: o.duration_ms,
            })
            .collect();

        let raw_fingerprints = report
            .outcome(Stage::Load)
            .map(|load| {
                load.completed
                    .iter()
                    .filter_map(|c| Some((c.item.clone(), c.detail.clone()?)))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            started_at: report.started_at,
            finished_at: report.finished_at,
            state: report.state,
            error: report.error.as_ref().map(|e| e.to_string()),
            stages,
            raw_fingerprints,
            export_path: report.export_path.clone(),
        }
    }
}

/// JSONL history file manager.
pub struct RunHistory {
    path: PathBuf,
}

impl RunHistory {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn append(&self, summary: &RunSummary) -> io::Result<()> {
        let json = serde_json::to_string(summary)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{json}")?;
        file.flush()
    }

    /// Read all summaries, oldest first. Malformed lines are skipped.
    pub fn read_all(&self) -> io::Result<Vec<RunSummary>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let reader = io::BufReader::new(fs::File::open(&self.path)?);
        let mut summaries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(summary) = serde_json::from_str::<RunSummary>(&line) {
                summaries.push(summary);
            }
        }
        Ok(summaries)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
