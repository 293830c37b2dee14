//! Validated SQL identifiers and literals.
//!
//! Table names and file paths end up inside SQL text (DuckDB table functions
//! and `COPY` do not accept bound parameters for them). Every table name the
//! pipeline touches is a `TableName`, which can only be constructed from a
//! plain identifier, and every path goes through `sql_string_literal`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Longest identifier accepted; matches the common Postgres-family limit.
pub const MAX_IDENTIFIER_LEN: usize = 63;

const RESERVED: &[&str] = &[
    "all", "alter", "and", "as", "by", "case", "copy", "create", "delete", "drop", "from",
    "group", "having", "insert", "into", "join", "limit", "not", "null", "on", "or", "order",
    "select", "set", "table", "union", "update", "where", "with",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    #[error("table name is empty")]
    Empty,

    #[error("table name {0:?} is longer than {MAX_IDENTIFIER_LEN} characters")]
    TooLong(String),

    #[error("table name {0:?} must match [A-Za-z_][A-Za-z0-9_]*")]
    InvalidCharacters(String),

    #[error("table name {0:?} is a reserved SQL keyword")]
    Reserved(String),

    #[error("path {0:?} is not valid UTF-8")]
    NonUtf8Path(String),
}

/// A table name that is safe to interpolate unquoted into SQL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableName(String);

impl TableName {
    pub fn new(name: impl Into<String>) -> Result<Self, IdentifierError> {
        let name = name.into();
        if name.is_empty() {
            return Err(IdentifierError::Empty);
        }
        if name.len() > MAX_IDENTIFIER_LEN {
            return Err(IdentifierError::TooLong(name));
        }

        let mut chars = name.chars();
        let first_ok = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        if !first_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(IdentifierError::InvalidCharacters(name));
        }

        if RESERVED.contains(&name.to_ascii_lowercase().as_str()) {
            return Err(IdentifierError::Reserved(name));
        }

        Ok(Self(name))
    }

    /// Wrap a compile-time literal that is already a plain identifier.
    pub(crate) fn from_static(name: &'static str) -> Self {
        debug_assert!(Self::new(name).is_ok(), "invalid built-in table name {name}");
        Self(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TableName {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for TableName {
    type Error = IdentifierError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TableName> for String {
    fn from(value: TableName) -> Self {
        value.0
    }
}

impl std::str::FromStr for TableName {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Render text as a single-quoted SQL string literal.
pub fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Render a filesystem path as a single-quoted SQL string literal.
pub fn sql_string_literal(path: &Path) -> Result<String, IdentifierError> {
    let text = path
        .to_str()
        .ok_or_else(|| IdentifierError::NonUtf8Path(path.display().to_string()))?;
    Ok(quote_literal(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn accepts_plain_identifiers() {
        for name in ["raw_tickertape_data_1", "stg_past_ipo_table", "_tmp", "Mart1"] {
            assert_eq!(TableName::new(name).unwrap().as_str(), name);
        }
    }

    #[test]
    fn rejects_injection_attempts() {
        for name in ["t; DROP TABLE x", "a-b", "1abc", "raw table", "x'--", "\"quoted\""] {
            assert!(
                matches!(TableName::new(name), Err(IdentifierError::InvalidCharacters(_))),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_empty_long_and_reserved() {
        assert_eq!(TableName::new(""), Err(IdentifierError::Empty));
        assert!(matches!(
            TableName::new("a".repeat(64)),
            Err(IdentifierError::TooLong(_))
        ));
        assert!(matches!(
            TableName::new("Select"),
            Err(IdentifierError::Reserved(_))
        ));
    }

    #[test]
    fn deserialization_validates() {
        #[derive(Deserialize)]
        struct Wrapper {
            table: TableName,
        }
        assert!(toml::from_str::<Wrapper>(r#"table = "stg_ok""#).is_ok());
        assert!(toml::from_str::<Wrapper>(r#"table = "stg; drop""#).is_err());
    }

    #[test]
    fn literal_escapes_quotes() {
        let lit = sql_string_literal(Path::new("/data/o'brien/raw.csv")).unwrap();
        assert_eq!(lit, "'/data/o''brien/raw.csv'");
    }

    proptest! {
        #[test]
        fn valid_names_only_contain_identifier_chars(name in ".{0,70}") {
            if let Ok(table) = TableName::new(name) {
                let s = table.as_str();
                prop_assert!(s.len() <= MAX_IDENTIFIER_LEN);
                prop_assert!(s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
                prop_assert!(!s.chars().next().unwrap().is_ascii_digit());
            }
        }

        #[test]
        fn literal_never_leaves_an_odd_quote_run(text in ".{0,40}") {
            let lit = quote_literal(&text);
            let inner = &lit[1..lit.len() - 1];
            prop_assert_eq!(inner.replace("''", "").contains('\''), false);
        }
    }
}
