//! Extraction adapters and their shared contract.
//!
//! The `Scraper` trait abstracts over the external listing sources (NSE past
//! issues, Chittorgarh subscription reports, the Tickertape screener) so the
//! pipeline can run against mocks in tests. Adapters know nothing about the
//! raw-data directory layout or the analytical store; they fetch and shape.

pub mod chittorgarh;
mod http;
pub mod nse;
pub mod tickertape;

pub use chittorgarh::{ChittorgarhScraper, ChittorgarhSettings};
pub use nse::{NseScraper, NseSettings};
pub use tickertape::{TickertapeScraper, TickertapeSettings};

use crate::dataset::{DatasetError, RawDataset};
use crate::schema::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Structured error types for extraction.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("failed to build HTTP client: {0}")]
    Client(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),
}

/// Trait for extraction adapters.
///
/// `scrape` fails on any unrecoverable fetch or parse error; the caller decides
/// whether that failure is fatal. Implementations must be `Send + Sync` so
/// independent sources can be fetched in parallel later without API changes.
pub trait Scraper: Send + Sync {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    /// Fetch the full result set from the source.
    fn scrape(&self) -> Result<RawDataset, ScrapeError>;

    /// Persist a result set as a CSV file with a header row.
    ///
    /// Returns the number of data rows written.
    fn save(&self, dataset: &mut RawDataset, path: &Path) -> Result<usize, ScrapeError> {
        Ok(dataset.write_csv(path)?)
    }
}

/// The built-in source types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    NsePastIssues,
    ChittorgarhSubscription,
    TickertapeScreener,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [
        SourceKind::NsePastIssues,
        SourceKind::ChittorgarhSubscription,
        SourceKind::TickertapeScreener,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::NsePastIssues => "nse_past_issues",
            SourceKind::ChittorgarhSubscription => "chittorgarh_subscription",
            SourceKind::TickertapeScreener => "tickertape_screener",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown source kind: {s}"))
    }
}

/// Per-source tuning knobs, all defaulted to the production values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub nse: NseSettings,
    pub chittorgarh: ChittorgarhSettings,
    pub tickertape: TickertapeSettings,
}

/// Build the adapter for a source kind.
pub fn build_scraper(
    kind: SourceKind,
    settings: &SourceSettings,
) -> Result<Box<dyn Scraper>, ScrapeError> {
    Ok(match kind {
        SourceKind::NsePastIssues => Box::new(NseScraper::new(settings.nse.clone())?),
        SourceKind::ChittorgarhSubscription => {
            Box::new(ChittorgarhScraper::new(settings.chittorgarh.clone())?)
        }
        SourceKind::TickertapeScreener => {
            Box::new(TickertapeScraper::new(settings.tickertape.clone())?)
        }
    })
}
