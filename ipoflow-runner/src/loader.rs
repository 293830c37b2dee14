//! Load stage: mirror each raw CSV file into a store table.
//!
//! Tables are dropped and recreated on every run. A missing file is skipped
//! with a warning; a file the store cannot parse is recorded as a failure and
//! the remaining files still load.

use std::fs::File;
use std::io;
use std::path::Path;
use std::time::Instant;

use crate::config::PipelineConfig;
use crate::stage::{elapsed_ms, Stage, StageOutcome};
use crate::store::AnalyticalStore;

/// BLAKE3 digest of a file's bytes, hex encoded.
pub fn fingerprint_file(path: &Path) -> io::Result<String> {
    let mut hasher = blake3::Hasher::new();
    let mut file = File::open(path)?;
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}

pub fn run_load<S: AnalyticalStore + ?Sized>(config: &PipelineConfig, store: &mut S) -> StageOutcome {
    let started = Instant::now();
    let mut outcome = StageOutcome::new(Stage::Load);

    for source in &config.sources {
        let path = config.raw_file_path(source);
        let table = &source.table;

        if !path.exists() {
            tracing::warn!(
                table = %table,
                path = %path.display(),
                "raw file not found, skipping"
            );
            outcome.skip(table.as_str());
            continue;
        }

        tracing::info!(table = %table, path = %path.display(), "loading raw file");
        match store.replace_table_from_csv(table, &path) {
            Ok(rows) => {
                let fingerprint = match fingerprint_file(&path) {
                    Ok(hash) => Some(hash),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "could not fingerprint raw file");
                        None
                    }
                };
                tracing::info!(table = %table, rows, "raw table created");
                outcome.complete(table.as_str(), rows, fingerprint);
            }
            Err(e) => {
                tracing::error!(table = %table, path = %path.display(), error = %e, "failed to load raw file");
                outcome.fail(table.as_str(), e);
            }
        }
    }

    outcome.duration_ms = elapsed_ms(started);
    outcome
}
