//! End-to-end pipeline runs against a real DuckDB file in a temp directory.
//! Adapters are replaced by in-memory scrapers; nothing touches the network.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ipoflow_core::{RawDataset, Record, ScrapeError, Scraper};
use ipoflow_runner::{
    AllSourcesFailed, AnalyticalStore, CsvExportOptions, DuckDbConnector, DuckDbStore, Pipeline,
    PipelineConfig, PipelineError, RunHistory, RunState, ScriptSpec, Stage, StoreConnector,
    StoreError, TableName,
};
use serde_json::json;
use tempfile::TempDir;

const METADATA: &str = "IPO Metadata";
const SUBSCRIPTION: &str = "IPO Subscription";
const TICKERTAPE: &str = "Tickertape Data";

/// Serves `rows` numbered records, ids starting at 1.
struct NumberedScraper {
    name: &'static str,
    rows: usize,
}

impl Scraper for NumberedScraper {
    fn name(&self) -> &str {
        self.name
    }

    fn scrape(&self) -> Result<RawDataset, ScrapeError> {
        let records: Vec<Record> = (1..=self.rows)
            .map(|i| {
                let mut record = Record::new();
                record.insert("id".into(), json!(i));
                record.insert("name".into(), json!(format!("company_{i}")));
                record.insert("price".into(), json!(i as f64 * 10.0));
                record
            })
            .collect();
        Ok(RawDataset::from_records(self.name, &records)?)
    }
}

struct UnreachableScraper(&'static str);

impl Scraper for UnreachableScraper {
    fn name(&self) -> &str {
        self.0
    }

    fn scrape(&self) -> Result<RawDataset, ScrapeError> {
        Err(ScrapeError::HttpStatus {
            status: 503,
            url: format!("https://example.invalid/{}", self.0),
        })
    }
}

fn numbered(name: &'static str) -> Box<dyn Scraper> {
    Box::new(NumberedScraper { name, rows: 10 })
}

const STG_METADATA: &str =
    "CREATE OR REPLACE TABLE stg_past_ipo_table AS SELECT id, name FROM raw_past_ipo_table_1;";
const STG_TICKERTAPE: &str = "CREATE OR REPLACE TABLE stg_tickertape_data_table AS \
     SELECT id + 2 AS id, price FROM raw_tickertape_data_1;";
const STG_SUBSCRIPTION: &str = "CREATE OR REPLACE TABLE stg_pastipo_subscription_table AS \
     SELECT id FROM raw_pastipo_subscription_table_1;";
const MART: &str = "CREATE OR REPLACE TABLE mart_ipo_analytics_1 AS \
     SELECT m.id, m.name, t.price \
     FROM stg_past_ipo_table m JOIN stg_tickertape_data_table t USING (id) \
     ORDER BY m.id;";

struct Workspace {
    dir: TempDir,
    config: PipelineConfig,
}

impl Workspace {
    /// Default layout under a temp dir with two staging scripts and a mart
    /// joining them on 8 of 10 ids.
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::default().resolve_paths(dir.path());
        config.log.console = false;
        config.log.file = false;
        config.staging = vec![
            script("stg_past_ipo_table.sql", "stg_past_ipo_table"),
            script("stg_tickertape_data_table.sql", "stg_tickertape_data_table"),
        ];

        std::fs::create_dir_all(&config.paths.sql_dir).unwrap();
        let ws = Self { dir, config };
        ws.write_sql("stg_past_ipo_table.sql", STG_METADATA);
        ws.write_sql("stg_tickertape_data_table.sql", STG_TICKERTAPE);
        ws.write_sql("mart_ipo_analytics.sql", MART);
        ws
    }

    fn write_sql(&self, file: &str, body: &str) {
        std::fs::write(self.config.paths.sql_dir.join(file), body).unwrap();
    }

    fn pipeline(&self) -> Pipeline {
        Pipeline::new(
            self.config.clone(),
            DuckDbConnector::new(self.config.paths.store_path.clone()),
        )
    }

    fn full_pipeline(&self) -> Pipeline {
        self.pipeline()
            .with_scraper(METADATA, numbered(METADATA))
            .with_scraper(SUBSCRIPTION, numbered(SUBSCRIPTION))
            .with_scraper(TICKERTAPE, numbered(TICKERTAPE))
    }

    fn staged_dir(&self) -> &Path {
        &self.config.paths.staged_data_dir
    }
}

fn script(file: &str, table: &str) -> ScriptSpec {
    ScriptSpec {
        script: file.to_string(),
        table: TableName::new(table).unwrap(),
    }
}

#[test]
fn mart_join_exports_header_plus_matched_rows() {
    let ws = Workspace::new();

    let report = ws.full_pipeline().run();

    assert!(report.succeeded(), "run failed: {:?}", report.error);
    assert_eq!(report.state, RunState::Done);

    let load = report.outcome(Stage::Load).unwrap();
    for table in [
        "raw_past_ipo_table_1",
        "raw_pastipo_subscription_table_1",
        "raw_tickertape_data_1",
    ] {
        assert_eq!(load.rows_for(table), Some(10), "{table}");
    }
    let transform = report.outcome(Stage::Transform).unwrap();
    assert_eq!(transform.rows_for("stg_past_ipo_table"), Some(10));
    assert_eq!(transform.rows_for("stg_tickertape_data_table"), Some(10));
    let mart = report.outcome(Stage::Mart).unwrap();
    assert_eq!(mart.rows_for("mart_ipo_analytics_1"), Some(8));

    let export_path = report.export_path.clone().unwrap();
    let file_name = export_path.file_name().unwrap().to_str().unwrap();
    assert!(file_name.starts_with("mart_ipo_analytics_"));
    assert!(file_name.ends_with(".csv"));

    let mut reader = csv::Reader::from_path(&export_path).unwrap();
    let headers = reader.headers().unwrap().clone();
    assert_eq!(headers.iter().collect::<Vec<_>>(), vec!["id", "name", "price"]);
    assert_eq!(reader.records().count(), 8);

    let text = std::fs::read_to_string(&export_path).unwrap();
    assert_eq!(text.lines().count(), 9);
}

#[test]
fn one_failing_source_still_reaches_mart() {
    let ws = Workspace::new();
    let pipeline = ws
        .pipeline()
        .with_scraper(METADATA, numbered(METADATA))
        .with_scraper(SUBSCRIPTION, Box::new(UnreachableScraper(SUBSCRIPTION)))
        .with_scraper(TICKERTAPE, numbered(TICKERTAPE));

    let report = pipeline.run();

    assert!(report.succeeded(), "run failed: {:?}", report.error);
    let extract = report.outcome(Stage::Extract).unwrap();
    assert_eq!(extract.succeeded_count(), 2);
    assert_eq!(extract.failed[0].item, SUBSCRIPTION);
    assert!(extract.failed[0].error.contains("503"));

    let load = report.outcome(Stage::Load).unwrap();
    assert_eq!(load.skipped, vec!["raw_pastipo_subscription_table_1".to_string()]);
    assert!(report.outcome(Stage::Mart).is_some());
}

#[test]
fn staging_script_on_missing_raw_table_fails_in_isolation() {
    let mut ws = Workspace::new();
    ws.config.staging.insert(
        1,
        script(
            "stg_pastipo_subscription_table.sql",
            "stg_pastipo_subscription_table",
        ),
    );
    ws.write_sql("stg_pastipo_subscription_table.sql", STG_SUBSCRIPTION);

    let report = ws
        .pipeline()
        .with_scraper(METADATA, numbered(METADATA))
        .with_scraper(SUBSCRIPTION, Box::new(UnreachableScraper(SUBSCRIPTION)))
        .with_scraper(TICKERTAPE, numbered(TICKERTAPE))
        .run();

    assert!(report.succeeded(), "run failed: {:?}", report.error);
    let transform = report.outcome(Stage::Transform).unwrap();
    assert_eq!(transform.succeeded_count(), 2);
    assert_eq!(transform.failed.len(), 1);
    assert_eq!(transform.failed[0].item, "stg_pastipo_subscription_table");
    assert_eq!(
        report.outcome(Stage::Mart).unwrap().rows_for("mart_ipo_analytics_1"),
        Some(8)
    );
}

#[test]
fn no_raw_files_fails_before_transform_and_writes_nothing() {
    let mut ws = Workspace::new();
    ws.config.extraction.enabled = false;

    let report = ws.pipeline().run();

    assert_eq!(report.state, RunState::Failed);
    assert!(matches!(report.error, Some(PipelineError::NoRawTablesLoaded)));
    assert!(report.outcome(Stage::Load).unwrap().fatal);
    assert!(report.outcome(Stage::Transform).is_none());
    assert!(report.export_path.is_none());
    assert!(!ws.staged_dir().exists());
}

#[test]
fn rerun_yields_identical_row_counts() {
    let ws = Workspace::new();

    let first = ws.full_pipeline().run();
    let second = ws.full_pipeline().run();

    assert!(first.succeeded() && second.succeeded());
    for stage in [Stage::Load, Stage::Transform, Stage::Mart] {
        let rows = |report: &ipoflow_runner::RunReport| {
            report
                .outcome(stage)
                .unwrap()
                .completed
                .iter()
                .map(|c| (c.item.clone(), c.rows))
                .collect::<Vec<_>>()
        };
        assert_eq!(rows(&first), rows(&second), "{stage}");
    }
    assert_eq!(first.export_path, second.export_path);

    let mut store = DuckDbStore::open(&ws.config.paths.store_path).unwrap();
    let raw = TableName::new("raw_past_ipo_table_1").unwrap();
    assert_eq!(store.row_count(&raw).unwrap(), 10);
    store.close().unwrap();
}

#[test]
fn skip_extract_loads_existing_raw_files() {
    let ws = Workspace::new();
    assert!(ws.full_pipeline().run().succeeded());

    let mut config = ws.config.clone();
    config.extraction.enabled = false;
    let report = Pipeline::new(config, DuckDbConnector::new(ws.config.paths.store_path.clone()))
        .run();

    assert!(report.succeeded(), "run failed: {:?}", report.error);
    let extract = report.outcome(Stage::Extract).unwrap();
    assert_eq!(extract.skipped.len(), 3);
    assert_eq!(extract.succeeded_count(), 0);
}

#[test]
fn abort_policy_stops_when_every_source_fails() {
    let mut ws = Workspace::new();
    ws.config.extraction.on_all_failed = AllSourcesFailed::Abort;

    let report = ws
        .pipeline()
        .with_scraper(METADATA, Box::new(UnreachableScraper(METADATA)))
        .with_scraper(SUBSCRIPTION, Box::new(UnreachableScraper(SUBSCRIPTION)))
        .with_scraper(TICKERTAPE, Box::new(UnreachableScraper(TICKERTAPE)))
        .run();

    assert_eq!(report.state, RunState::Failed);
    assert!(matches!(report.error, Some(PipelineError::NoSourcesExtracted)));
    assert!(report.outcome(Stage::Load).is_none());
}

#[test]
fn missing_mart_script_is_fatal() {
    let ws = Workspace::new();
    std::fs::remove_file(ws.config.paths.sql_dir.join("mart_ipo_analytics.sql")).unwrap();

    let report = ws.full_pipeline().run();

    assert_eq!(report.state, RunState::Failed);
    assert!(matches!(report.error, Some(PipelineError::MissingMartScript(_))));
    assert!(report.outcome(Stage::Export).is_none());
    assert!(!ws.staged_dir().exists());
}

#[test]
fn mart_script_that_creates_nothing_fails_even_after_a_good_run() {
    let ws = Workspace::new();
    assert!(ws.full_pipeline().run().succeeded());

    ws.write_sql("mart_ipo_analytics.sql", "SELECT 1;");
    let report = ws.full_pipeline().run();

    assert_eq!(report.state, RunState::Failed);
    assert!(matches!(report.error, Some(PipelineError::MartBuild { .. })));
    assert!(report.outcome(Stage::Export).is_none());
}

#[test]
fn finished_runs_are_appended_to_history() {
    let ws = Workspace::new();
    ws.full_pipeline().run();
    let mut failing = ws.config.clone();
    failing.extraction.enabled = false;
    failing.paths.raw_data_dir = ws.dir.path().join("empty_raw");
    Pipeline::new(failing, DuckDbConnector::new(ws.config.paths.store_path.clone())).run();

    let history = RunHistory::new(ws.config.history_path());
    let runs = history.read_all().unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].state, RunState::Done);
    assert_eq!(runs[0].raw_fingerprints.len(), 3);
    assert!(runs[0].export_path.is_some());
    assert_eq!(runs[1].state, RunState::Failed);
    assert_eq!(runs[1].error.as_deref(), Some("no raw tables were loaded"));
}

// -- connection lifecycle --------------------------------------------------

/// Wraps the DuckDB store and counts `close` calls.
struct CountingStore {
    inner: DuckDbStore,
    closes: Arc<AtomicUsize>,
}

impl AnalyticalStore for CountingStore {
    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn replace_table_from_csv(&mut self, table: &TableName, csv: &Path) -> Result<usize, StoreError> {
        self.inner.replace_table_from_csv(table, csv)
    }

    fn execute_batch(&mut self, sql: &str) -> Result<(), StoreError> {
        self.inner.execute_batch(sql)
    }

    fn table_exists(&self, table: &TableName) -> Result<bool, StoreError> {
        self.inner.table_exists(table)
    }

    fn list_tables(&self) -> Result<Vec<String>, StoreError> {
        self.inner.list_tables()
    }

    fn row_count(&self, table: &TableName) -> Result<usize, StoreError> {
        self.inner.row_count(table)
    }

    fn export_csv(
        &mut self,
        table: &TableName,
        dest: &Path,
        options: &CsvExportOptions,
    ) -> Result<usize, StoreError> {
        self.inner.export_csv(table, dest, options)
    }

    fn close(&mut self) -> Result<bool, StoreError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close()
    }
}

struct CountingConnector {
    inner: DuckDbConnector,
    closes: Arc<AtomicUsize>,
}

impl StoreConnector for CountingConnector {
    type Store = CountingStore;

    fn connect(&self) -> Result<CountingStore, StoreError> {
        Ok(CountingStore {
            inner: self.inner.connect()?,
            closes: Arc::clone(&self.closes),
        })
    }

    fn describe(&self) -> String {
        self.inner.describe()
    }
}

fn run_counting(ws: &Workspace, with_scrapers: bool) -> (ipoflow_runner::RunReport, usize) {
    let closes = Arc::new(AtomicUsize::new(0));
    let connector = CountingConnector {
        inner: DuckDbConnector::new(ws.config.paths.store_path.clone()),
        closes: Arc::clone(&closes),
    };
    let mut pipeline = Pipeline::new(ws.config.clone(), connector);
    if with_scrapers {
        pipeline = pipeline
            .with_scraper(METADATA, numbered(METADATA))
            .with_scraper(SUBSCRIPTION, numbered(SUBSCRIPTION))
            .with_scraper(TICKERTAPE, numbered(TICKERTAPE));
    }
    let report = pipeline.run();
    (report, closes.load(Ordering::SeqCst))
}

#[test]
fn connection_closed_once_on_load_failure() {
    let mut ws = Workspace::new();
    ws.config.extraction.enabled = false;
    let (report, closes) = run_counting(&ws, false);
    assert!(matches!(report.error, Some(PipelineError::NoRawTablesLoaded)));
    assert_eq!(closes, 1);
}

#[test]
fn connection_closed_once_on_transform_failure() {
    let ws = Workspace::new();
    ws.write_sql("stg_past_ipo_table.sql", "SELECT * FROM no_such_table;");
    ws.write_sql("stg_tickertape_data_table.sql", "THIS IS NOT SQL;");
    let (report, closes) = run_counting(&ws, true);
    assert!(matches!(report.error, Some(PipelineError::NoStagingTablesCreated)));
    assert_eq!(closes, 1);
}

#[test]
fn connection_closed_once_on_mart_failure() {
    let ws = Workspace::new();
    ws.write_sql("mart_ipo_analytics.sql", "SELECT * FROM stg_missing;");
    let (report, closes) = run_counting(&ws, true);
    assert!(matches!(report.error, Some(PipelineError::MartBuild { .. })));
    assert_eq!(report.state, RunState::Failed);
    assert_eq!(closes, 1);
}

#[test]
fn connection_closed_once_on_success() {
    let ws = Workspace::new();
    let (report, closes) = run_counting(&ws, true);
    assert!(report.succeeded());
    assert_eq!(closes, 1);
}
