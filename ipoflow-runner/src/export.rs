//! Export stage: write the mart table to a dated CSV file.
//!
//! The staged directory is created here and nowhere else, so a run that fails
//! earlier leaves it untouched. The file is written next to its destination
//! and renamed into place.

use chrono::NaiveDate;
use std::path::PathBuf;
use std::time::Instant;

use crate::config::PipelineConfig;
use crate::pipeline::PipelineError;
use crate::stage::{elapsed_ms, StageOutcome};
use crate::store::{AnalyticalStore, CsvExportOptions};

fn export_io(path: &std::path::Path) -> impl FnOnce(std::io::Error) -> PipelineError + '_ {
    move |source| PipelineError::ExportIo {
        path: path.to_path_buf(),
        source,
    }
}

pub fn run_export<S: AnalyticalStore + ?Sized>(
    config: &PipelineConfig,
    store: &mut S,
    run_date: NaiveDate,
    outcome: &mut StageOutcome,
) -> Result<PathBuf, PipelineError> {
    let started = Instant::now();
    let result = export_mart(config, store, run_date);
    outcome.duration_ms = elapsed_ms(started);

    match result {
        Ok((path, rows)) => {
            tracing::info!(path = %path.display(), rows, "mart exported");
            outcome.complete(
                config.mart.table.as_str(),
                rows,
                Some(path.display().to_string()),
            );
            Ok(path)
        }
        Err(e) => {
            outcome.fail(config.mart.table.as_str(), &e);
            Err(e)
        }
    }
}

fn export_mart<S: AnalyticalStore + ?Sized>(
    config: &PipelineConfig,
    store: &mut S,
    run_date: NaiveDate,
) -> Result<(PathBuf, usize), PipelineError> {
    let staged = &config.paths.staged_data_dir;
    std::fs::create_dir_all(staged).map_err(export_io(staged))?;

    let dest = config.export_path(run_date);
    let tmp = dest.with_extension("csv.tmp");
    let options = CsvExportOptions {
        header: config.export.header,
        delimiter: config.export.delimiter,
    };

    let rows = match store.export_csv(&config.mart.table, &tmp, &options) {
        Ok(rows) => rows,
        Err(e) => {
            let _ = std::fs::remove_file(&tmp);
            return Err(PipelineError::ExportStore(e));
        }
    };
    std::fs::rename(&tmp, &dest).map_err(export_io(&dest))?;

    Ok((dest, rows))
}
