//! ipoflow core: the extraction side of the IPO analytics pipeline.
//!
//! This crate contains everything that talks to the outside world before data
//! reaches the analytical store:
//! - Extraction adapters for NSE past issues, Chittorgarh subscription
//!   reports and the Tickertape screener, behind the `Scraper` trait
//! - `RawDataset`, a typed tabular result built from JSON records
//! - Column-name normalization for display-oriented source keys
//! - The raw store writer (atomic CSV writes with a header row)

pub mod dataset;
pub mod schema;
pub mod sources;

pub use dataset::{DatasetError, RawDataset, Record};
pub use schema::{normalize_column_name, SchemaError};
pub use sources::{build_scraper, ScrapeError, Scraper, SourceKind, SourceSettings};
