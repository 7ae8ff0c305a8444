use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use widecol_loader::{
    CancelFlag, ChunkLedger, ChunkRange, ChunkState, ColumnSink, CsvSource, DatasetSpec,
    ImportDriver, ImportError, ImportOptions, ImportResult, JsonlStore, MemoryStore, OutputRecord,
    RetryPolicy, RowSource, SchemaRegistry, SinkFactory,
};

/// `rows` ratings with unique (userId, movieId) pairs.
fn ratings_csv(rows: usize) -> String {
    let mut csv = String::from("userId,movieId,rating,timestamp\n");
    for i in 0..rows {
        csv.push_str(&format!("{},{},{}.5,{}\n", i / 10 + 1, i % 10 + 1, i % 5, 1000 + i));
    }
    csv
}

fn source(csv: &str) -> Arc<dyn RowSource> {
    Arc::new(CsvSource::from_bytes(csv.as_bytes().to_vec()).unwrap())
}

fn spec(name: &str) -> DatasetSpec {
    SchemaRegistry::movielens().lookup(name).unwrap().clone()
}

fn options(workers: usize) -> ImportOptions {
    ImportOptions {
        workers,
        retry: RetryPolicy::none(),
        max_skip_ratio: None,
        state_dir: None,
    }
}

fn temp_dir(label: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("widecol-{}-{}", label, uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Memory store whose sessions for one chunk index reject writes after a
/// number of healthy ones.
#[derive(Clone, Default)]
struct FlakySink {
    store: MemoryStore,
    broken_chunk: Arc<Mutex<Option<(usize, usize)>>>,
    opened: Arc<Mutex<Vec<usize>>>,
}

impl FlakySink {
    fn break_chunk(&self, index: Option<usize>) {
        *self.broken_chunk.lock().unwrap() = index.map(|i| (i, 0));
    }

    fn break_chunk_after(&self, index: usize, healthy_puts: usize) {
        *self.broken_chunk.lock().unwrap() = Some((index, healthy_puts));
    }

    fn opened(&self) -> Vec<usize> {
        let mut opened = self.opened.lock().unwrap().clone();
        opened.sort();
        opened
    }

    fn reset_opened(&self) {
        self.opened.lock().unwrap().clear();
    }
}

struct FlakySession {
    inner: Box<dyn ColumnSink>,
    /// Writes left before failing; `None` never fails
    healthy_puts: Option<usize>,
}

#[async_trait]
impl ColumnSink for FlakySession {
    async fn put(&mut self, record: &OutputRecord) -> widecol_loader::Result<()> {
        match self.healthy_puts {
            Some(0) => return Err(ImportError::SinkWrite("injected failure".to_string())),
            Some(n) => self.healthy_puts = Some(n - 1),
            None => {}
        }
        self.inner.put(record).await
    }
}

#[async_trait]
impl SinkFactory for FlakySink {
    fn sink_type(&self) -> &'static str {
        "flaky"
    }

    async fn open_session(
        &self,
        spec: &DatasetSpec,
        range: &ChunkRange,
    ) -> widecol_loader::Result<Box<dyn ColumnSink>> {
        self.opened.lock().unwrap().push(range.index);
        let healthy_puts = match *self.broken_chunk.lock().unwrap() {
            Some((index, puts)) if index == range.index => Some(puts),
            _ => None,
        };
        let inner = self.store.open_session(spec, range).await?;
        Ok(Box::new(FlakySession {
            inner,
            healthy_puts,
        }))
    }
}

/// Memory store that raises a cancel flag from inside the first chunk's writes.
#[derive(Clone)]
struct CancellingSink {
    store: MemoryStore,
    cancel: CancelFlag,
}

struct CancellingSession {
    inner: Box<dyn ColumnSink>,
    cancel: Option<CancelFlag>,
}

#[async_trait]
impl ColumnSink for CancellingSession {
    async fn put(&mut self, record: &OutputRecord) -> widecol_loader::Result<()> {
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
        self.inner.put(record).await
    }
}

#[async_trait]
impl SinkFactory for CancellingSink {
    fn sink_type(&self) -> &'static str {
        "cancelling"
    }

    async fn open_session(
        &self,
        spec: &DatasetSpec,
        range: &ChunkRange,
    ) -> widecol_loader::Result<Box<dyn ColumnSink>> {
        let inner = self.store.open_session(spec, range).await?;
        let cancel = (range.index == 0).then(|| self.cancel.clone());
        Ok(Box::new(CancellingSession { inner, cancel }))
    }
}

#[tokio::test]
async fn test_ratings_import_in_twenty_chunks() {
    let store = MemoryStore::new();
    let driver = ImportDriver::new(Arc::new(store.clone()), options(4));

    let report = driver
        .import_dataset(&spec("ratings"), source(&ratings_csv(1000)))
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.chunks.len(), 20);
    assert_eq!(report.rows_written(), 1000);
    assert_eq!(report.rows_skipped(), 0);
    assert_eq!(store.row_count("ratings"), 1000);
    assert_eq!(store.sessions_opened(), 20);

    let row = store.get("ratings", "1_1").unwrap();
    assert_eq!(row["data:rating"], "0.5");
    assert_eq!(row["data:timestamp"], "1000");
    assert!(!row.contains_key("data:userId"));
    assert!(!row.contains_key("data:movieId"));
}

#[tokio::test]
async fn test_single_row_key_and_columns() {
    let store = MemoryStore::new();
    let driver = ImportDriver::new(Arc::new(store.clone()), options(1));

    driver
        .import_dataset(
            &spec("ratings"),
            source("userId,movieId,rating,timestamp\n7,42,4.5,999\n"),
        )
        .await
        .unwrap();

    let row = store.get("ratings", "7_42").unwrap();
    assert_eq!(row.len(), 2);
    assert_eq!(row["data:rating"], "4.5");
    assert_eq!(row["data:timestamp"], "999");
}

#[tokio::test]
async fn test_both_orderings_from_one_source() {
    let store = MemoryStore::new();
    let driver = ImportDriver::new(Arc::new(store.clone()), options(2));
    let csv = ratings_csv(100);

    driver.import_dataset(&spec("ratings"), source(&csv)).await.unwrap();
    driver.import_dataset(&spec("movie_ratings"), source(&csv)).await.unwrap();

    // i = 1: user 1 rated movie 2
    assert_eq!(store.get("ratings", "1_2").unwrap()["data:rating"], "1.5");
    assert_eq!(store.get("movie_ratings", "2_1").unwrap()["data:rating"], "1.5");
    assert_eq!(store.scan_prefix("movie_ratings", "2_").len(), 10);
    assert_eq!(store.scan_prefix("ratings", "1_").len(), 10);
}

#[tokio::test]
async fn test_reimport_leaves_store_unchanged() {
    let store = MemoryStore::new();
    let driver = ImportDriver::new(Arc::new(store.clone()), options(4));
    let csv = ratings_csv(300);

    driver.import_dataset(&spec("ratings"), source(&csv)).await.unwrap();
    let first = store.get("ratings", "3_7").unwrap();

    driver.import_dataset(&spec("ratings"), source(&csv)).await.unwrap();
    assert_eq!(store.row_count("ratings"), 300);
    assert_eq!(store.get("ratings", "3_7").unwrap(), first);
    assert_eq!(store.put_count(), 600);
}

#[tokio::test]
async fn test_import_chunk_imports_one_range() {
    let store = MemoryStore::new();
    let driver = ImportDriver::new(Arc::new(store.clone()), options(1));
    let spec = spec("ratings").large(4);
    let source = source(&ratings_csv(200));
    let plan = widecol_loader::ChunkPlanner::plan_dataset(&spec, source.as_ref()).unwrap();

    let result = driver
        .import_chunk(&spec, Arc::clone(&source), &plan.ranges[2])
        .await
        .unwrap();

    assert!(result.rows_written > 0);
    assert_eq!(result.rows_skipped, 0);
    assert_eq!(store.row_count("ratings") as u64, result.rows_written);
}

#[tokio::test]
async fn test_row_missing_key_column_is_skipped() {
    let store = MemoryStore::new();
    let driver = ImportDriver::new(Arc::new(store.clone()), options(1));

    let report = driver
        .import_dataset(
            &spec("ratings"),
            source("userId,movieId,rating,timestamp\n7,42,4.5,999\n8\n9,1,3.0,1000\n"),
        )
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.rows_written(), 2);
    assert_eq!(report.rows_skipped(), 1);
    assert_eq!(store.row_count("ratings"), 2);
    assert!(store.get("ratings", "9_1").is_some());
}

#[tokio::test]
async fn test_skip_threshold_fails_chunk() {
    let store = MemoryStore::new();
    let mut opts = options(1);
    opts.max_skip_ratio = Some(0.25);
    let driver = ImportDriver::new(Arc::new(store.clone()), opts);

    let report = driver
        .import_dataset(
            &spec("ratings"),
            source("userId,movieId,rating,timestamp\n1,1,4.0,1\n2\n3\n4,4,2.0,4\n"),
        )
        .await
        .unwrap();

    assert_eq!(report.failed_chunks(), 1);
    assert_eq!(report.chunks[0].state, ChunkState::Failed);
    let error = report.chunks[0].error.as_deref().unwrap();
    assert!(error.contains("skipped 2 of 4 rows"), "{}", error);
}

#[tokio::test]
async fn test_header_only_source_is_empty_chunk() {
    let driver = ImportDriver::new(Arc::new(MemoryStore::new()), options(1));

    let report = driver
        .import_dataset(&spec("movies"), source("movieId,title,genres\n"))
        .await
        .unwrap();

    assert_eq!(report.chunks.len(), 1);
    assert_eq!(report.failed_chunks(), 1);
    assert!(report.chunks[0]
        .error
        .as_deref()
        .unwrap()
        .contains("contains no rows"));
}

#[tokio::test]
async fn test_failed_chunk_does_not_stop_siblings() {
    let sink = FlakySink::default();
    sink.break_chunk(Some(1));
    let driver = ImportDriver::new(Arc::new(sink.clone()), options(4));

    let report = driver
        .import_dataset(&spec("ratings").large(4), source(&ratings_csv(200)))
        .await
        .unwrap();

    assert_eq!(report.chunks.len(), 4);
    assert_eq!(report.failed_chunks(), 1);
    assert_eq!(report.completed_chunks(), 3);
    assert_eq!(report.chunks[1].state, ChunkState::Failed);
    assert!(report.chunks[1]
        .error
        .as_deref()
        .unwrap()
        .contains("injected failure"));
    assert_eq!(sink.opened(), vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn test_resume_reimports_only_failed_chunk() {
    let state_dir = temp_dir("resume");
    let sink = FlakySink::default();
    let mut opts = options(2);
    opts.state_dir = Some(state_dir.clone());
    let driver = ImportDriver::new(Arc::new(sink.clone()), opts);
    let spec = spec("ratings").large(4);
    let csv = ratings_csv(200);

    sink.break_chunk(Some(2));
    let first = driver.import_dataset(&spec, source(&csv)).await.unwrap();
    assert_eq!(first.failed_chunks(), 1);
    assert!(sink.store.row_count("ratings") < 200);

    sink.break_chunk(None);
    sink.reset_opened();
    let second = driver.import_dataset(&spec, source(&csv)).await.unwrap();

    assert!(second.is_success());
    assert_eq!(sink.opened(), vec![2]);
    assert_eq!(sink.store.row_count("ratings"), 200);
    assert_eq!(second.chunks.iter().filter(|c| c.reused).count(), 3);
    assert_eq!(second.rows_written(), 200);

    std::fs::remove_dir_all(&state_dir).ok();
}

#[tokio::test]
async fn test_cancelled_import_starts_no_chunks() {
    let store = MemoryStore::new();
    let driver = ImportDriver::new(Arc::new(store.clone()), options(2));
    driver.cancel_flag().cancel();

    let report = driver
        .import_dataset(&spec("ratings").large(4), source(&ratings_csv(200)))
        .await
        .unwrap();

    assert!(report.cancelled);
    assert!(!report.is_success());
    assert_eq!(report.pending_chunks(), report.chunks.len());
    assert_eq!(store.sessions_opened(), 0);
}

#[tokio::test]
async fn test_cancel_during_run_finishes_running_chunk() {
    let state_dir = temp_dir("cancel");
    let cancel = CancelFlag::new();
    let sink = CancellingSink {
        store: MemoryStore::new(),
        cancel: cancel.clone(),
    };
    let mut opts = options(1);
    opts.state_dir = Some(state_dir.clone());
    let driver = ImportDriver::new(Arc::new(sink.clone()), opts).with_cancel_flag(cancel);

    let report = driver
        .import_dataset(&spec("ratings").large(4), source(&ratings_csv(200)))
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.chunks.len(), 4);
    assert_eq!(report.chunks[0].state, ChunkState::Completed);
    assert!(report.chunks[1..].iter().all(|c| c.state == ChunkState::Pending));
    assert_eq!(sink.store.sessions_opened(), 1);
    assert_eq!(sink.store.row_count("ratings") as u64, report.rows_written());

    let json = std::fs::read_to_string(ChunkLedger::path_for(&state_dir, "ratings")).unwrap();
    let ledger: ChunkLedger = serde_json::from_str(&json).unwrap();
    assert!(ledger.chunks.iter().all(|e| e.state != ChunkState::InProgress));
    assert_eq!(ledger.completed_count(), 1);

    std::fs::remove_dir_all(&state_dir).ok();
}

#[tokio::test]
async fn test_failed_chunk_reports_rows_written_before_failure() {
    let sink = FlakySink::default();
    sink.break_chunk_after(1, 5);
    let driver = ImportDriver::new(Arc::new(sink.clone()), options(2));

    let report = driver
        .import_dataset(&spec("ratings").large(4), source(&ratings_csv(200)))
        .await
        .unwrap();

    assert_eq!(report.chunks[1].state, ChunkState::Failed);
    assert_eq!(
        report.chunks[1].result,
        Some(ImportResult {
            rows_written: 5,
            rows_skipped: 0,
        })
    );

    let results = report.results();
    assert_eq!(results.len(), 4);
    let written: u64 = results.iter().map(|r| r.rows_written).sum();
    assert_eq!(written, report.rows_written());
    assert_eq!(written, sink.store.row_count("ratings") as u64);
}

#[tokio::test]
async fn test_grown_source_is_imported_again() {
    let state_dir = temp_dir("grown");
    let store = MemoryStore::new();
    let mut opts = options(1);
    opts.state_dir = Some(state_dir.clone());
    let driver = ImportDriver::new(Arc::new(store.clone()), opts);
    let mut spec = spec("ratings");
    spec.is_large = false;

    let first = driver.import_dataset(&spec, source(&ratings_csv(10))).await.unwrap();
    assert!(first.is_success());

    let second = driver.import_dataset(&spec, source(&ratings_csv(50))).await.unwrap();
    assert!(second.is_success());
    assert!(second.chunks.iter().all(|c| !c.reused));
    assert_eq!(store.row_count("ratings"), 50);

    std::fs::remove_dir_all(&state_dir).ok();
}

#[tokio::test]
async fn test_trailing_blank_line_adds_no_empty_chunk() {
    let store = MemoryStore::new();
    let driver = ImportDriver::new(Arc::new(store.clone()), options(4));
    let csv = format!("{}\n", ratings_csv(3));

    let report = driver.import_dataset(&spec("ratings"), source(&csv)).await.unwrap();

    assert!(report.is_success(), "{:?}", report.chunks);
    assert_eq!(report.rows_written(), 3);
    assert_eq!(store.row_count("ratings"), 3);
}

#[tokio::test]
async fn test_jsonl_reimport_with_fewer_chunks_replaces_output() {
    let output = temp_dir("jsonl-replan");
    let store = JsonlStore::new(output.clone());
    let driver = ImportDriver::new(Arc::new(store.clone()), options(2));
    let csv = ratings_csv(90);

    for chunks in [6, 2] {
        let report = driver
            .import_dataset(&spec("ratings").large(chunks), source(&csv))
            .await
            .unwrap();
        assert!(report.is_success());
    }

    let mut lines = 0;
    for entry in std::fs::read_dir(output.join("ratings")).unwrap() {
        let contents = std::fs::read_to_string(entry.unwrap().path()).unwrap();
        lines += contents.lines().count();
    }
    assert_eq!(lines, 90);

    std::fs::remove_dir_all(&output).ok();
}

#[tokio::test]
async fn test_missing_source_fails_only_its_dataset() {
    let data_dir = temp_dir("data");
    std::fs::write(data_dir.join("ratings.csv"), ratings_csv(150)).unwrap();

    let store = MemoryStore::new();
    let driver = ImportDriver::new(Arc::new(store.clone()), options(4));
    let specs = vec![spec("movies"), spec("ratings")];

    let summary = driver.import_datasets(&specs, &data_dir).await;

    assert_eq!(summary.datasets.len(), 2);
    assert_eq!(summary.failed_datasets(), 1);
    assert!(summary.datasets[0].error.is_some());
    assert!(summary.datasets[1].is_success());
    assert_eq!(summary.rows_written(), 150);
    assert!(summary.has_failures());
    assert_eq!(store.row_count("ratings"), 150);

    std::fs::remove_dir_all(&data_dir).ok();
}

#[tokio::test]
async fn test_jsonl_store_writes_one_file_per_chunk() {
    let output = temp_dir("jsonl");
    let store = JsonlStore::new(output.clone());
    let driver = ImportDriver::new(Arc::new(store.clone()), options(2));
    let spec = spec("ratings").large(3);

    let report = driver
        .import_dataset(&spec, source(&ratings_csv(90)))
        .await
        .unwrap();
    assert!(report.is_success());

    let mut lines = 0;
    for chunk in &report.chunks {
        let contents = std::fs::read_to_string(store.chunk_path(&spec, &chunk.range)).unwrap();
        for line in contents.lines() {
            let record: OutputRecord = serde_json::from_str(line).unwrap();
            assert_eq!(record.table, "ratings");
            assert!(record.columns.contains_key("rating"));
            lines += 1;
        }
    }
    assert_eq!(lines, 90);

    std::fs::remove_dir_all(&output).ok();
}

#[test]
fn test_unknown_dataset_is_rejected() {
    assert!(matches!(
        SchemaRegistry::movielens().lookup("users"),
        Err(ImportError::UnknownDataset(name)) if name == "users"
    ));
}
