//! Extraction stage: run every configured adapter and persist its raw CSV.
//!
//! A failing source is logged and recorded; the remaining sources still run.

use ipoflow_core::{build_scraper, ScrapeError, Scraper};
use std::collections::HashMap;
use std::time::Instant;

use crate::config::{PipelineConfig, SourceSpec};
use crate::stage::{elapsed_ms, Stage, StageOutcome};

/// Adapters keyed by source display name.
pub type ScraperRegistry = HashMap<String, Box<dyn Scraper>>;

/// Build the network adapters for every source in the configuration.
pub fn default_scrapers(config: &PipelineConfig) -> Result<ScraperRegistry, ScrapeError> {
    config
        .sources
        .iter()
        .map(|source| {
            let scraper = build_scraper(source.kind, &config.source_settings)?;
            Ok((source.name.clone(), scraper))
        })
        .collect()
}

fn extract_one(
    config: &PipelineConfig,
    source: &SourceSpec,
    scraper: &dyn Scraper,
) -> Result<usize, ScrapeError> {
    let mut dataset = scraper.scrape()?;
    let path = config.raw_file_path(source);
    scraper.save(&mut dataset, &path)
}

pub fn run_extraction(config: &PipelineConfig, scrapers: &ScraperRegistry) -> StageOutcome {
    let started = Instant::now();
    let mut outcome = StageOutcome::new(Stage::Extract);

    for source in &config.sources {
        tracing::info!(source = %source.name, "extracting");
        let Some(scraper) = scrapers.get(&source.name) else {
            tracing::error!(source = %source.name, "no adapter registered for source");
            outcome.fail(&source.name, "no adapter registered");
            continue;
        };

        match extract_one(config, source, scraper.as_ref()) {
            Ok(rows) => {
                let path = config.raw_file_path(source);
                tracing::info!(
                    source = %source.name,
                    rows,
                    path = %path.display(),
                    "source extracted"
                );
                outcome.complete(&source.name, rows, Some(path.display().to_string()));
            }
            Err(e) => {
                tracing::error!(source = %source.name, error = %e, "source extraction failed");
                outcome.fail(&source.name, e);
            }
        }
    }

    if !outcome.failed.is_empty() {
        let failed: Vec<&str> = outcome.failed.iter().map(|f| f.item.as_str()).collect();
        tracing::warn!(failed = ?failed, "some sources failed; pipeline will continue with available data");
    }

    outcome.duration_ms = elapsed_ms(started);
    outcome
}
