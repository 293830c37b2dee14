//! ipoflow CLI: run the IPO analytics pipeline.
//!
//! Commands:
//! - `run`: extract, load, transform, build the mart and export it
//! - `extract`: scrape and save raw CSVs for some or all sources
//! - `default-config`: print the default configuration as TOML

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use ipoflow_core::SourceKind;
use ipoflow_runner::{
    build_dispatch, default_scrapers, run_extraction, DuckDbConnector, LogLevel, Pipeline,
    PipelineConfig, SourceSpec,
};
use std::path::{Path, PathBuf};

/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "ipoflow.toml";

#[derive(Parser)]
#[command(name = "ipoflow", about = "ipoflow: IPO analytics pipeline orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline.
    Run {
        /// Path to a TOML config file. Defaults to ./ipoflow.toml if present.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Skip extraction and load the raw files already on disk.
        #[arg(long, default_value_t = false)]
        skip_extract: bool,

        /// Log level: trace, debug, info, warn, error.
        #[arg(long)]
        log_level: Option<LogLevel>,

        /// Do not write a per-run log file.
        #[arg(long, default_value_t = false)]
        no_log_file: bool,
    },
    /// Scrape sources and save their raw CSV files without loading them.
    Extract {
        /// Path to a TOML config file. Defaults to ./ipoflow.toml if present.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Sources to extract, by display name or kind (e.g. tickertape_screener). Defaults to all.
        sources: Vec<String>,
    },
    /// Print the default configuration as TOML.
    DefaultConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            skip_extract,
            log_level,
            no_log_file,
        } => run_pipeline_cmd(config.as_deref(), skip_extract, log_level, no_log_file),
        Commands::Extract { config, sources } => run_extract_cmd(config.as_deref(), &sources),
        Commands::DefaultConfig => {
            print!("{}", PipelineConfig::default().to_toml()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            PipelineConfig::from_file(Path::new(DEFAULT_CONFIG_FILE))
                .with_context(|| format!("failed to load {DEFAULT_CONFIG_FILE}"))
        }
        None => Ok(PipelineConfig::default()),
    }
}

fn run_pipeline_cmd(
    config_path: Option<&Path>,
    skip_extract: bool,
    log_level: Option<LogLevel>,
    no_log_file: bool,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if skip_extract {
        config.extraction.enabled = false;
    }
    if let Some(level) = log_level {
        config.log.level = level;
    }
    if no_log_file {
        config.log.file = false;
    }

    let (dispatch, log_file) =
        build_dispatch(&config.log, &config.paths.log_dir, Local::now().naive_local())
            .context("failed to set up logging")?;

    let pipeline = if config.extraction.enabled {
        Pipeline::from_config(config).context("failed to build extraction adapters")?
    } else {
        let connector = DuckDbConnector::new(config.paths.store_path.clone());
        Pipeline::new(config, connector)
    };
    let report = pipeline.with_log_sink(dispatch).run();

    if let Some(log_file) = log_file {
        println!("Log file: {}", log_file.display());
    }
    let export_path = report.into_result().context("pipeline failed")?;
    println!("Export written to: {}", export_path.display());
    Ok(())
}

/// Resolve a CLI source argument against the configured sources.
fn select_source<'a>(config: &'a PipelineConfig, arg: &str) -> Result<&'a SourceSpec> {
    if let Some(source) = config.source(arg) {
        return Ok(source);
    }
    if let Ok(kind) = arg.parse::<SourceKind>() {
        if let Some(source) = config.sources.iter().find(|s| s.kind == kind) {
            return Ok(source);
        }
    }
    let known: Vec<&str> = config.sources.iter().map(|s| s.name.as_str()).collect();
    bail!("unknown source {arg:?}; configured sources: {}", known.join(", "))
}

fn run_extract_cmd(config_path: Option<&Path>, sources: &[String]) -> Result<()> {
    let mut config = load_config(config_path)?;
    if !sources.is_empty() {
        let selected = sources
            .iter()
            .map(|arg| select_source(&config, arg).cloned())
            .collect::<Result<Vec<_>>>()?;
        config.sources = selected;
    }
    config.log.file = false;

    let (dispatch, _) = build_dispatch(&config.log, &config.paths.log_dir, Local::now().naive_local())
        .context("failed to set up logging")?;
    let scrapers = default_scrapers(&config).context("failed to build extraction adapters")?;
    let outcome =
        tracing::dispatcher::with_default(&dispatch, || run_extraction(&config, &scrapers));

    for item in &outcome.completed {
        println!("{:<20} {:>8} rows", item.item, item.rows);
    }
    for failure in &outcome.failed {
        eprintln!("{:<20} FAILED: {}", failure.item, failure.error);
    }
    if !outcome.failed.is_empty() {
        bail!(
            "{} of {} sources failed",
            outcome.failed.len(),
            config.sources.len()
        );
    }
    Ok(())
}
