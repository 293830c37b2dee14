//! Tickertape screener adapter.
//!
//! Pages through the full screener sorted by market cap, descending, until a
//! page comes back empty. Each result is flattened from the nested
//! `stock.info` / `stock.advancedRatios` objects into one flat record.

use super::http::{self, JSON_ACCEPT};
use super::{ScrapeError, Scraper};
use crate::dataset::{RawDataset, Record};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

const URL: &str = "https://api.tickertape.in/screener/query";

const HEADERS: &[(&str, &str)] = &[
    ("accept", JSON_ACCEPT),
    ("content-type", "application/json"),
    ("user-agent", "Mozilla/5.0"),
    ("origin", "https://www.tickertape.in"),
    ("referer", "https://www.tickertape.in/"),
];

/// Ratio fields requested from the screener.
const PROJECTION: [&str; 8] = [
    "subindustry",
    "mrktCapf",
    "lastPrice",
    "apef",
    "4wpct",
    "pr1d",
    "roe",
    "pbr",
];

/// Output column → (nested object, source field).
const FIELDS: [(&str, &str, &str); 11] = [
    ("ticker", "info", "ticker"),
    ("name", "info", "name"),
    ("sector", "info", "sector"),
    ("subindustry", "advancedRatios", "subindustry"),
    ("market_cap", "advancedRatios", "mrktCapf"),
    ("last_price", "advancedRatios", "lastPrice"),
    ("pe", "advancedRatios", "apef"),
    ("roe", "advancedRatios", "roe"),
    ("pb", "advancedRatios", "pbr"),
    ("4w_return_pct", "advancedRatios", "4wpct"),
    ("1d_return_pct", "advancedRatios", "pr1d"),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TickertapeSettings {
    pub page_size: usize,
    /// Pause between pages, in milliseconds.
    pub pause_ms: u64,
}

impl Default for TickertapeSettings {
    fn default() -> Self {
        Self {
            page_size: 100,
            pause_ms: 400,
        }
    }
}

pub struct TickertapeScraper {
    client: Client,
    settings: TickertapeSettings,
}

impl TickertapeScraper {
    pub fn new(settings: TickertapeSettings) -> Result<Self, ScrapeError> {
        Ok(Self {
            client: http::build_client(HEADERS)?,
            settings,
        })
    }

    /// Request body for the page starting at `offset`.
    pub fn payload(&self, offset: usize) -> Value {
        json!({
            "match": {},
            "sortBy": "mrktCapf",
            "sortOrder": -1,
            "count": self.settings.page_size,
            "offset": offset,
            "project": PROJECTION,
            "sids": [],
        })
    }

    /// Flatten one screener page. An empty vector marks the last page.
    pub fn parse_page(body: &Value) -> Result<Vec<Record>, ScrapeError> {
        let results = body
            .pointer("/data/results")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                ScrapeError::ResponseFormatChanged("screener page has no data.results array".into())
            })?;

        Ok(results.iter().map(flatten_row).collect())
    }
}

fn flatten_row(row: &Value) -> Record {
    let mut record = Record::new();
    record.insert("sid".into(), row.get("sid").cloned().unwrap_or(Value::Null));

    let stock = row.get("stock");
    for (column, group, field) in FIELDS {
        let value = stock
            .and_then(|s| s.get(group))
            .and_then(|g| g.get(field))
            .cloned()
            .unwrap_or(Value::Null);
        record.insert(column.into(), value);
    }
    record
}

impl Scraper for TickertapeScraper {
    fn name(&self) -> &str {
        "Tickertape Data"
    }

    fn scrape(&self) -> Result<RawDataset, ScrapeError> {
        let mut all_rows = Vec::new();
        let mut offset = 0;
        let pause = Duration::from_millis(self.settings.pause_ms);

        loop {
            tracing::debug!(offset, "fetching screener page");
            let body = http::send_json(self.client.post(URL).json(&self.payload(offset)))?;
            let rows = Self::parse_page(&body)?;
            if rows.is_empty() {
                break;
            }

            all_rows.extend(rows);
            offset += self.settings.page_size;
            std::thread::sleep(pause);
        }

        tracing::info!(stocks = all_rows.len(), "collected screener rows");
        Ok(RawDataset::from_records(self.name(), &all_rows)?)
    }
}
