//! Chittorgarh IPO subscription adapter.
//!
//! Walks one calendar year at a time and fetches two reports per year: the
//! mainboard report and the SME report. Every row is tagged with `ipo_type`
//! and `year`. Requests are paced with a fixed sleep after each report to stay
//! under the site's rate limit.

use super::http::{self, BROWSER_USER_AGENT, JSON_ACCEPT};
use super::{ScrapeError, Scraper};
use crate::dataset::{RawDataset, Record};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

const BASE_URL: &str = "https://webnodejs.chittorgarh.com/cloud/report/data-read";

const HEADERS: &[(&str, &str)] = &[
    ("user-agent", BROWSER_USER_AGENT),
    ("accept", JSON_ACCEPT),
    ("origin", "https://www.chittorgarh.com"),
    ("referer", "https://www.chittorgarh.com/"),
];

/// The two report families published per year.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Board {
    Mainboard,
    Sme,
}

impl Board {
    pub fn report_id(self) -> u32 {
        match self {
            Board::Mainboard => 21,
            Board::Sme => 22,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Board::Mainboard => "MAINBOARD",
            Board::Sme => "SME",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChittorgarhSettings {
    /// First year fetched (inclusive).
    pub start_year: i32,
    /// Last year fetched (inclusive).
    pub end_year: i32,
    /// Pause after each mainboard request, in milliseconds.
    pub mainboard_pause_ms: u64,
    /// Pause after each SME request, in milliseconds.
    pub sme_pause_ms: u64,
}

impl Default for ChittorgarhSettings {
    fn default() -> Self {
        Self {
            start_year: 2001,
            end_year: 2026,
            mainboard_pause_ms: 400,
            sme_pause_ms: 600,
        }
    }
}

pub struct ChittorgarhScraper {
    client: Client,
    settings: ChittorgarhSettings,
}

impl ChittorgarhScraper {
    pub fn new(settings: ChittorgarhSettings) -> Result<Self, ScrapeError> {
        Ok(Self {
            client: http::build_client(HEADERS)?,
            settings,
        })
    }

    /// Report URL for one board and year.
    pub fn report_url(board: Board, year: i32) -> String {
        format!(
            "{BASE_URL}/{report}/1/1/{year}/{year}/0/0",
            report = board.report_id()
        )
    }

    /// Extract the report rows and tag each with board and year.
    ///
    /// A body without `reportTableData` is an empty year, not an error.
    pub fn parse_report(body: Value, board: Board, year: i32) -> Result<Vec<Record>, ScrapeError> {
        let rows = match body {
            Value::Object(mut map) => map.remove("reportTableData"),
            _ => {
                return Err(ScrapeError::ResponseFormatChanged(
                    "subscription report: expected a JSON object".into(),
                ))
            }
        };

        let Some(rows) = rows else {
            return Ok(Vec::new());
        };

        let mut records = http::object_array(rows, "subscription report rows")?;
        for record in &mut records {
            record.insert("ipo_type".into(), Value::from(board.label()));
            record.insert("year".into(), Value::from(year));
        }
        Ok(records)
    }

    fn fetch_report(&self, board: Board, year: i32) -> Result<Vec<Record>, ScrapeError> {
        let url = Self::report_url(board, year);
        let body = http::send_json(
            self.client
                .get(&url)
                .query(&[("search", ""), ("v", "06-17")]),
        )?;
        Self::parse_report(body, board, year)
    }

    fn pause_after(&self, board: Board) -> Duration {
        match board {
            Board::Mainboard => Duration::from_millis(self.settings.mainboard_pause_ms),
            Board::Sme => Duration::from_millis(self.settings.sme_pause_ms),
        }
    }
}

impl Scraper for ChittorgarhScraper {
    fn name(&self) -> &str {
        "IPO Subscription"
    }

    fn scrape(&self) -> Result<RawDataset, ScrapeError> {
        let mut all_rows = Vec::new();

        for year in self.settings.start_year..=self.settings.end_year {
            for board in [Board::Mainboard, Board::Sme] {
                let rows = self.fetch_report(board, year)?;
                tracing::info!(year, board = board.label(), rows = rows.len(), "fetched subscription report");
                all_rows.extend(rows);
                std::thread::sleep(self.pause_after(board));
            }
        }

        Ok(RawDataset::from_records(self.name(), &all_rows)?)
    }
}
