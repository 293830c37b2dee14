//! Raw tabular datasets produced by the extraction adapters.
//!
//! A `RawDataset` wraps a Polars `DataFrame` built from loosely typed JSON
//! records. Column order follows first appearance across the records, and each
//! column's type is inferred from its non-null values:
//! - all integers (within `i64`) → `Int64`
//! - any other mix of numbers → `Float64`
//! - all booleans → `Boolean`
//! - anything else → `String` (objects and arrays are kept as JSON text)
//!
//! Writes are atomic: the CSV is written to a `.tmp` sibling and renamed into
//! place, so a failed save never leaves a truncated file behind for the loader.

use polars::prelude::*;
use serde_json::Value;
use std::collections::HashSet;
use std::fs::{self, File};
use std::path::Path;
use thiserror::Error;

/// One JSON object as returned by a source API.
pub type Record = serde_json::Map<String, Value>;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("dataframe error: {0}")]
    Frame(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One source's extracted tabular result.
#[derive(Debug, Clone)]
pub struct RawDataset {
    source: String,
    frame: DataFrame,
}

impl RawDataset {
    pub fn new(source: impl Into<String>, frame: DataFrame) -> Self {
        Self {
            source: source.into(),
            frame,
        }
    }

    /// Build a dataset from JSON records, inferring one typed column per key.
    pub fn from_records(source: impl Into<String>, records: &[Record]) -> Result<Self, DatasetError> {
        let names = column_names(records);
        let columns = names
            .iter()
            .map(|name| build_column(name, records))
            .collect::<Vec<_>>();
        let frame = DataFrame::new(columns).map_err(|e| DatasetError::Frame(e.to_string()))?;
        Ok(Self::new(source, frame))
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn row_count(&self) -> usize {
        self.frame.height()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.frame
            .get_column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect()
    }

    /// Write the dataset as a comma-delimited CSV with a header row.
    ///
    /// Parent directories are created as needed. Returns the number of data
    /// rows written.
    pub fn write_csv(&mut self, path: &Path) -> Result<usize, DatasetError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = path.with_extension("csv.tmp");
        {
            let mut file = File::create(&tmp_path)?;
            CsvWriter::new(&mut file)
                .include_header(true)
                .with_separator(b',')
                .finish(&mut self.frame)
                .map_err(|e| {
                    let _ = fs::remove_file(&tmp_path);
                    DatasetError::Frame(format!("CSV write failed: {e}"))
                })?;
        }

        fs::rename(&tmp_path, path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            DatasetError::Io(e)
        })?;

        Ok(self.frame.height())
    }
}

/// Column names in order of first appearance across all records.
fn column_names(records: &[Record]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    for record in records {
        for key in record.keys() {
            if seen.insert(key.as_str()) {
                names.push(key.clone());
            }
        }
    }
    names
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Integer,
    Float,
    Boolean,
    Text,
}

fn infer_kind<'a>(values: impl Iterator<Item = &'a Value>) -> ValueKind {
    let mut kind = None;
    for value in values {
        let this = match value {
            Value::Number(n) if n.as_i64().is_some() => ValueKind::Integer,
            Value::Number(_) => ValueKind::Float,
            Value::Bool(_) => ValueKind::Boolean,
            _ => return ValueKind::Text,
        };
        match kind {
            None => kind = Some(this),
            Some(ValueKind::Integer) if this == ValueKind::Float => kind = Some(this),
            Some(ValueKind::Float) if this == ValueKind::Integer => {}
            Some(k) if k != this => return ValueKind::Text,
            Some(_) => {}
        }
    }
    kind.unwrap_or(ValueKind::Text)
}

fn non_null<'a>(record: &'a Record, name: &str) -> Option<&'a Value> {
    record.get(name).filter(|v| !v.is_null())
}

fn build_column(name: &str, records: &[Record]) -> Column {
    let kind = infer_kind(records.iter().filter_map(|r| non_null(r, name)));
    match kind {
        ValueKind::Integer => {
            let values: Vec<Option<i64>> = records
                .iter()
                .map(|r| non_null(r, name).and_then(Value::as_i64))
                .collect();
            Column::new(name.into(), values)
        }
        ValueKind::Float => {
            let values: Vec<Option<f64>> = records
                .iter()
                .map(|r| non_null(r, name).and_then(Value::as_f64))
                .collect();
            Column::new(name.into(), values)
        }
        ValueKind::Boolean => {
            let values: Vec<Option<bool>> = records
                .iter()
                .map(|r| non_null(r, name).and_then(Value::as_bool))
                .collect();
            Column::new(name.into(), values)
        }
        ValueKind::Text => {
            let values: Vec<Option<String>> = records
                .iter()
                .map(|r| non_null(r, name).map(value_to_text))
                .collect();
            Column::new(name.into(), values)
        }
    }
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
