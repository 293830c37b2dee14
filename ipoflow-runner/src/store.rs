//! Analytical store: the single embedded database file shared by all stages.
//!
//! Stages only talk to the store through `AnalyticalStore`, so tests can wrap
//! or replace the DuckDB implementation. The orchestrator obtains its store
//! from a `StoreConnector` exactly once per run.

use duckdb::{params, Connection};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::identifier::{quote_literal, sql_string_literal, IdentifierError, TableName};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store error: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("store connection is already closed")]
    Closed,

    #[error(transparent)]
    Identifier(#[from] IdentifierError),

    #[error("store I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Options for `AnalyticalStore::export_csv`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvExportOptions {
    pub header: bool,
    pub delimiter: char,
}

impl Default for CsvExportOptions {
    fn default() -> Self {
        Self {
            header: true,
            delimiter: ',',
        }
    }
}

/// Operations the pipeline stages need from the analytical database.
pub trait AnalyticalStore {
    fn is_open(&self) -> bool;

    /// Drop `table` if present and recreate it from a CSV file with type
    /// inference. Returns the new table's row count.
    fn replace_table_from_csv(&mut self, table: &TableName, csv: &Path)
        -> Result<usize, StoreError>;

    /// Execute a multi-statement SQL batch.
    fn execute_batch(&mut self, sql: &str) -> Result<(), StoreError>;

    fn table_exists(&self, table: &TableName) -> Result<bool, StoreError>;

    /// Names of all tables in the current schema, sorted.
    fn list_tables(&self) -> Result<Vec<String>, StoreError>;

    fn row_count(&self, table: &TableName) -> Result<usize, StoreError>;

    /// Write `table` to `dest` as delimited text. Returns the number of rows written.
    fn export_csv(
        &mut self,
        table: &TableName,
        dest: &Path,
        options: &CsvExportOptions,
    ) -> Result<usize, StoreError>;

    /// Close the connection. Returns `Ok(false)` if it was already closed.
    fn close(&mut self) -> Result<bool, StoreError>;
}

/// Opens the store for a run.
pub trait StoreConnector {
    type Store: AnalyticalStore;

    fn connect(&self) -> Result<Self::Store, StoreError>;

    /// Human-readable location, used in logs.
    fn describe(&self) -> String;
}

/// File-backed DuckDB store.
pub struct DuckDbStore {
    path: PathBuf,
    conn: Option<Connection>,
}

impl DuckDbStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            conn: Some(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<&Connection, StoreError> {
        self.conn.as_ref().ok_or(StoreError::Closed)
    }
}

impl AnalyticalStore for DuckDbStore {
    fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    fn replace_table_from_csv(
        &mut self,
        table: &TableName,
        csv: &Path,
    ) -> Result<usize, StoreError> {
        let source = sql_string_literal(csv)?;
        let conn = self.conn()?;

        // The drop commits on its own: a failed load must not leave the
        // previous run's table behind.
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {table};"))?;
        conn.execute_batch(&format!(
            "CREATE TABLE {table} AS SELECT * FROM read_csv_auto({source}, \
             header=true, ignore_errors=true, all_varchar=false);"
        ))?;

        self.row_count(table)
    }

    fn execute_batch(&mut self, sql: &str) -> Result<(), StoreError> {
        self.conn()?.execute_batch(sql)?;
        Ok(())
    }

    fn table_exists(&self, table: &TableName) -> Result<bool, StoreError> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM information_schema.tables \
             WHERE table_schema = current_schema() AND lower(table_name) = lower(?)",
            params![table.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn list_tables(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = current_schema() ORDER BY table_name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn row_count(&self, table: &TableName) -> Result<usize, StoreError> {
        let count: i64 =
            self.conn()?
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn export_csv(
        &mut self,
        table: &TableName,
        dest: &Path,
        options: &CsvExportOptions,
    ) -> Result<usize, StoreError> {
        let target = sql_string_literal(dest)?;
        let delimiter = quote_literal(&options.delimiter.to_string());
        let sql = format!(
            "COPY {table} TO {target} (FORMAT CSV, HEADER {}, DELIMITER {delimiter})",
            options.header
        );
        self.conn()?.execute_batch(&sql)?;
        self.row_count(table)
    }

    fn close(&mut self) -> Result<bool, StoreError> {
        match self.conn.take() {
            Some(conn) => {
                conn.close().map_err(|(_, e)| StoreError::DuckDb(e))?;
                tracing::debug!(path = %self.path.display(), "store connection closed");
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Opens a `DuckDbStore` at a fixed path, creating the parent directory.
#[derive(Debug, Clone)]
pub struct DuckDbConnector {
    path: PathBuf,
}

impl DuckDbConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StoreConnector for DuckDbConnector {
    type Store = DuckDbStore;

    fn connect(&self) -> Result<DuckDbStore, StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        DuckDbStore::open(&self.path)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
