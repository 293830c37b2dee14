//! Column-name normalization for source records.
//!
//! Source APIs return display-oriented keys ("Issue Size (₹ Cr)", "Listing
//! Gain %"). Before a dataset is written, keys are normalized into plain
//! snake_case identifiers so the loader's type inference and the downstream
//! SQL can reference them without quoting.

use crate::dataset::Record;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static PARENS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[()]").expect("valid regex"));
static NON_ALNUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("valid regex"));
static VALID_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("valid regex"));

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("invalid column names after normalization: {0:?}")]
    InvalidColumns(Vec<String>),

    #[error("columns {first:?} and {second:?} both normalize to {normalized:?}")]
    DuplicateColumn {
        first: String,
        second: String,
        normalized: String,
    },
}

/// Normalize a single column name.
///
/// Lowercases and trims, spells out `₹` and `%`, drops parentheses, and turns
/// every run of other characters into a single underscore.
pub fn normalize_column_name(name: &str) -> String {
    let lowered = name.trim().to_lowercase();
    let spelled = lowered.replace('₹', " inr ").replace('%', " pct ");
    let unparenthesized = PARENS.replace_all(&spelled, "");
    let joined = NON_ALNUM.replace_all(&unparenthesized, "_");
    joined.trim_matches('_').to_string()
}

/// Whether a normalized name is usable as an unquoted column identifier.
pub fn is_valid_column_name(name: &str) -> bool {
    VALID_NAME.is_match(name)
}

/// Rename every key in `records` to its normalized form.
///
/// Fails if any normalized name is invalid or if two source keys collapse to
/// the same name.
pub fn normalize_records(records: Vec<Record>) -> Result<Vec<Record>, SchemaError> {
    let mut mapping: HashMap<String, String> = HashMap::new();
    let mut owners: HashMap<String, String> = HashMap::new();
    let mut bad = Vec::new();

    for record in &records {
        for key in record.keys() {
            if mapping.contains_key(key) {
                continue;
            }
            let normalized = normalize_column_name(key);
            if !is_valid_column_name(&normalized) {
                bad.push(normalized.clone());
            }
            if let Some(first) = owners.get(&normalized) {
                return Err(SchemaError::DuplicateColumn {
                    first: first.clone(),
                    second: key.clone(),
                    normalized,
                });
            }
            owners.insert(normalized.clone(), key.clone());
            mapping.insert(key.clone(), normalized);
        }
    }

    if !bad.is_empty() {
        return Err(SchemaError::InvalidColumns(bad));
    }

    Ok(records
        .into_iter()
        .map(|record| {
            record
                .into_iter()
                .map(|(key, value)| {
                    let renamed = mapping.get(&key).cloned().unwrap_or(key);
                    (renamed, value)
                })
                .collect()
        })
        .collect())
}
