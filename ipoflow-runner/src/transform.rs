//! Staging transformations and the mart build.
//!
//! Each SQL script is executed as one batch and must leave behind exactly the
//! table its configuration entry names. Staging scripts are isolated from one
//! another; the mart script is fail-fast.

use std::collections::BTreeSet;
use std::time::Instant;

use crate::config::{PipelineConfig, ScriptSpec};
use crate::pipeline::PipelineError;
use crate::stage::{elapsed_ms, Stage, StageOutcome};
use crate::store::{AnalyticalStore, StoreError};

#[derive(Debug, thiserror::Error)]
enum ScriptError {
    #[error("failed to read script: {0}")]
    Read(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("script did not create table {0}")]
    MissingTable(String),
}

fn table_set<S: AnalyticalStore + ?Sized>(store: &S) -> Result<BTreeSet<String>, StoreError> {
    Ok(store
        .list_tables()?
        .into_iter()
        .map(|t| t.to_lowercase())
        .collect())
}

/// Execute one script and return the declared table's row count.
fn execute_script<S: AnalyticalStore + ?Sized>(
    config: &PipelineConfig,
    spec: &ScriptSpec,
    store: &mut S,
) -> Result<usize, ScriptError> {
    let sql = std::fs::read_to_string(config.script_path(spec))?;

    // A table left over from an earlier run must not satisfy the existence check.
    store.execute_batch(&format!("DROP TABLE IF EXISTS {};", spec.table))?;
    let before = table_set(&*store)?;

    store.execute_batch(&sql)?;

    if !store.table_exists(&spec.table)? {
        return Err(ScriptError::MissingTable(spec.table.to_string()));
    }

    let declared = spec.table.as_str().to_lowercase();
    let extra: Vec<String> = table_set(&*store)?
        .difference(&before)
        .filter(|t| **t != declared)
        .cloned()
        .collect();
    if !extra.is_empty() {
        tracing::warn!(
            script = %spec.script,
            tables = ?extra,
            "script created tables beyond its declared one"
        );
    }

    Ok(store.row_count(&spec.table)?)
}

/// Run the staging scripts in declared order.
pub fn run_transform<S: AnalyticalStore + ?Sized>(
    config: &PipelineConfig,
    store: &mut S,
) -> StageOutcome {
    let started = Instant::now();
    let mut outcome = StageOutcome::new(Stage::Transform);

    for spec in &config.staging {
        let path = config.script_path(spec);
        if !path.exists() {
            tracing::warn!(script = %spec.script, path = %path.display(), "SQL file not found, skipping");
            outcome.skip(spec.table.as_str());
            continue;
        }

        tracing::info!(script = %spec.script, "executing staging script");
        match execute_script(config, spec, store) {
            Ok(rows) => {
                tracing::info!(table = %spec.table, rows, "staging table created");
                outcome.complete(spec.table.as_str(), rows, Some(spec.script.clone()));
            }
            Err(e) => {
                tracing::error!(script = %spec.script, error = %e, "staging script failed");
                outcome.fail(spec.table.as_str(), e);
            }
        }
    }

    outcome.duration_ms = elapsed_ms(started);
    outcome
}

/// Build the mart table. Any problem is fatal.
pub fn build_mart<S: AnalyticalStore + ?Sized>(
    config: &PipelineConfig,
    store: &mut S,
    outcome: &mut StageOutcome,
) -> Result<usize, PipelineError> {
    let started = Instant::now();
    let spec = &config.mart;
    let path = config.script_path(spec);

    let result = if !path.exists() {
        Err(PipelineError::MissingMartScript(path))
    } else {
        tracing::info!(script = %spec.script, "executing mart script");
        execute_script(config, spec, store).map_err(|e| PipelineError::MartBuild {
            table: spec.table.to_string(),
            reason: e.to_string(),
        })
    };

    outcome.duration_ms = elapsed_ms(started);
    match result {
        Ok(rows) => {
            tracing::info!(table = %spec.table, rows, "mart table created");
            outcome.complete(spec.table.as_str(), rows, Some(spec.script.clone()));
            Ok(rows)
        }
        Err(e) => {
            outcome.fail(spec.table.as_str(), &e);
            Err(e)
        }
    }
}
