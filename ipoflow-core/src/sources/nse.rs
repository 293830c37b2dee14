//! NSE past-issues adapter.
//!
//! Fetches the historical IPO listing from NSE's public past-issues endpoint in
//! a single request. NSE rejects requests without browser-like headers, so the
//! client always sends a referer and origin from the exchange's own site.
//! Column names are normalized before the dataset is built.

use super::http::{self, BROWSER_USER_AGENT, JSON_ACCEPT};
use super::{ScrapeError, Scraper};
use crate::dataset::{RawDataset, Record};
use crate::schema::normalize_records;
use chrono::NaiveDate;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const BASE_URL: &str = "https://www.nseindia.com/api/public-past-issues";

const HEADERS: &[(&str, &str)] = &[
    ("user-agent", BROWSER_USER_AGENT),
    ("accept", JSON_ACCEPT),
    (
        "referer",
        "https://www.nseindia.com/market-data/all-upcoming-issues-ipo",
    ),
    ("origin", "https://www.nseindia.com"),
];

/// Query window and security filter for the past-issues endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NseSettings {
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub security_type: String,
}

impl Default for NseSettings {
    fn default() -> Self {
        Self {
            from_date: NaiveDate::from_ymd_opt(2001, 1, 1).unwrap_or_default(),
            to_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap_or_default(),
            security_type: "all".to_string(),
        }
    }
}

pub struct NseScraper {
    client: Client,
    settings: NseSettings,
}

impl NseScraper {
    pub fn new(settings: NseSettings) -> Result<Self, ScrapeError> {
        Ok(Self {
            client: http::build_client(HEADERS)?,
            settings,
        })
    }

    /// Query parameters in the `dd-mm-YYYY` form the endpoint expects.
    fn query(&self) -> [(&'static str, String); 3] {
        [
            ("from_date", self.settings.from_date.format("%d-%m-%Y").to_string()),
            ("to_date", self.settings.to_date.format("%d-%m-%Y").to_string()),
            ("security_type", self.settings.security_type.clone()),
        ]
    }

    /// Parse the endpoint's JSON array into normalized records.
    pub fn parse_response(body: Value) -> Result<Vec<Record>, ScrapeError> {
        let records = http::object_array(body, "NSE past issues")?;
        Ok(normalize_records(records)?)
    }
}

impl Scraper for NseScraper {
    fn name(&self) -> &str {
        "IPO Metadata"
    }

    fn scrape(&self) -> Result<RawDataset, ScrapeError> {
        tracing::info!(url = BASE_URL, "fetching NSE IPO history");

        let body = http::send_json(self.client.get(BASE_URL).query(&self.query()))?;
        let records = Self::parse_response(body)?;

        tracing::info!(records = records.len(), "NSE IPO history fetched");
        Ok(RawDataset::from_records(self.name(), &records)?)
    }
}
