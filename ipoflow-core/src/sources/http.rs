//! Shared blocking HTTP plumbing for the scrapers.

use super::ScrapeError;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;
use std::time::Duration;

/// Fixed per-request timeout. There is no retry layer on top of it.
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) const BROWSER_USER_AGENT: &str = "Mozilla/5.0";
pub(crate) const JSON_ACCEPT: &str = "application/json, text/plain, */*";

/// Build a client that sends `headers` on every request.
///
/// Header names must be lowercase.
pub(crate) fn build_client(headers: &[(&'static str, &'static str)]) -> Result<Client, ScrapeError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.insert(*name, HeaderValue::from_static(*value));
    }

    Client::builder()
        .default_headers(map)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| ScrapeError::Client(e.to_string()))
}

/// Send a request and decode the body as JSON, failing on any non-2xx status.
pub(crate) fn send_json(request: RequestBuilder) -> Result<Value, ScrapeError> {
    let resp = request
        .send()
        .map_err(|e| ScrapeError::Network(e.to_string()))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(ScrapeError::HttpStatus {
            status: status.as_u16(),
            url: resp.url().to_string(),
        });
    }

    resp.json::<Value>()
        .map_err(|e| ScrapeError::ResponseFormatChanged(format!("invalid JSON body: {e}")))
}

/// Interpret a JSON array of objects as records.
pub(crate) fn object_array(value: Value, what: &str) -> Result<Vec<crate::dataset::Record>, ScrapeError> {
    let Value::Array(items) = value else {
        return Err(ScrapeError::ResponseFormatChanged(format!(
            "{what}: expected a JSON array"
        )));
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::Object(map) => Ok(map),
            other => Err(ScrapeError::ResponseFormatChanged(format!(
                "{what}: element {i} is not an object: {other}"
            ))),
        })
        .collect()
}
