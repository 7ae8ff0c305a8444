//! Import driver: chunk dispatch, row streaming and outcome bookkeeping.

use crate::chunk::{ChunkPlan, ChunkPlanner, ChunkRange};
use crate::error::{ImportError, Result};
use crate::import::{
    ChunkLedger, ChunkOutcome, ChunkState, DatasetReport, ImportResult, RetryPolicy, RunSummary,
};
use crate::registry::DatasetSpec;
use crate::rowkey;
use crate::sink::SinkFactory;
use crate::source::{CsvSource, RowSource, SourceRow};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Rows buffered between the blocking reader and the sink writer of a chunk
const ROW_BUFFER: usize = 1024;

/// Options controlling how chunks are imported
#[derive(Clone, Debug)]
pub struct ImportOptions {
    /// Maximum number of chunks imported at once
    pub workers: usize,
    /// Per-row sink retry policy
    pub retry: RetryPolicy,
    /// Fail a chunk when `skipped / read` exceeds this ratio
    pub max_skip_ratio: Option<f64>,
    /// Where chunk ledgers are persisted; `None` keeps them in memory
    pub state_dir: Option<PathBuf>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            retry: RetryPolicy::default(),
            max_skip_ratio: None,
            state_dir: None,
        }
    }
}

/// Shared cancellation request. Once raised, no new chunk is started;
/// chunks already running finish normally.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct ImportDriver {
    sinks: Arc<dyn SinkFactory>,
    options: ImportOptions,
    cancel: CancelFlag,
}

fn lock(ledger: &Mutex<ChunkLedger>) -> MutexGuard<'_, ChunkLedger> {
    ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ImportDriver {
    pub fn new(sinks: Arc<dyn SinkFactory>, options: ImportOptions) -> Self {
        Self {
            sinks,
            options,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn options(&self) -> &ImportOptions {
        &self.options
    }

    /// Import the rows of one chunk.
    ///
    /// Rows that cannot be composed are skipped and counted. Fails with
    /// `EmptyChunk` if the range holds no rows, with `SinkWrite` once a row
    /// exhausts its retries, and with `SkipThresholdExceeded` if too many rows
    /// were skipped.
    pub async fn import_chunk(
        &self,
        spec: &DatasetSpec,
        source: Arc<dyn RowSource>,
        range: &ChunkRange,
    ) -> Result<ImportResult> {
        let mut result = ImportResult::default();
        self.stream_chunk(spec, source, range, &mut result).await?;
        Ok(result)
    }

    /// Body of [`Self::import_chunk`]. `result` keeps the counts reached so
    /// far when the chunk fails.
    async fn stream_chunk(
        &self,
        spec: &DatasetSpec,
        source: Arc<dyn RowSource>,
        range: &ChunkRange,
        result: &mut ImportResult,
    ) -> Result<()> {
        debug!("Starting chunk {} of {}", range, spec.name);

        let mut session = self.sinks.open_session(spec, range).await?;

        // Source reads block, so they run on the blocking pool and hand rows
        // over through a bounded channel.
        let (tx, mut rx) = mpsc::channel::<Result<SourceRow>>(ROW_BUFFER);
        let window = range.clone();
        let reader = tokio::task::spawn_blocking(move || -> Result<()> {
            for row in source.rows(&window)? {
                if tx.blocking_send(row).is_err() {
                    break;
                }
            }
            Ok(())
        });

        while let Some(row) = rx.recv().await {
            let record = match row.and_then(|row| rowkey::compose_record(spec, &row)) {
                Ok(record) => record,
                Err(e) if e.is_row_level() => {
                    debug!(
                        "Skipping row {} of chunk {} in {}: {}",
                        result.rows_read() + 1,
                        range.index,
                        spec.name,
                        e
                    );
                    result.rows_skipped += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            self.options
                .retry
                .put_with_retry(session.as_mut(), &record)
                .await?;
            result.rows_written += 1;
        }
        reader.await??;

        session.finish().await?;

        if result.rows_read() == 0 {
            return Err(ImportError::EmptyChunk {
                dataset: spec.name.clone(),
                index: range.index,
            });
        }

        if let Some(max_ratio) = self.options.max_skip_ratio {
            let ratio = result.rows_skipped as f64 / result.rows_read() as f64;
            if ratio > max_ratio {
                warn!(
                    "Chunk {} of {} skipped {:.1}% of its rows",
                    range.index,
                    spec.name,
                    ratio * 100.0
                );
                return Err(ImportError::SkipThresholdExceeded {
                    dataset: spec.name.clone(),
                    index: range.index,
                    skipped: result.rows_skipped,
                    read: result.rows_read(),
                    max_ratio,
                });
            }
        }

        Ok(())
    }

    /// Plan and import a whole dataset, one outcome per chunk.
    ///
    /// Chunks recorded as completed in the ledger are not reprocessed. When
    /// the ledger starts over, the sink drops what earlier plans wrote.
    pub async fn import_dataset(
        &self,
        spec: &DatasetSpec,
        source: Arc<dyn RowSource>,
    ) -> Result<DatasetReport> {
        let state_dir = self.options.state_dir.clone();
        let planning_spec = spec.clone();
        let planning_source = Arc::clone(&source);
        let (plan, ledger) = tokio::task::spawn_blocking(move || -> Result<(ChunkPlan, ChunkLedger)> {
            let plan = ChunkPlanner::plan_dataset(&planning_spec, planning_source.as_ref())?;
            plan.validate()?;
            let ledger = ChunkLedger::load_or_new(state_dir.as_deref(), &plan)?;
            Ok((plan, ledger))
        })
        .await??;

        if !ledger.is_resumed() {
            self.sinks.clear_dataset(spec).await?;
        }

        self.run_plan(spec, source, &plan, ledger).await
    }

    async fn run_plan(
        &self,
        spec: &DatasetSpec,
        source: Arc<dyn RowSource>,
        plan: &ChunkPlan,
        ledger: ChunkLedger,
    ) -> Result<DatasetReport> {
        let run_id = Uuid::new_v4().to_string();
        info!(
            "📦 Importing {} into table {} ({} chunk(s), {} worker(s), run {})",
            spec.name,
            spec.table_name,
            plan.len(),
            self.options.workers.max(1),
            run_id
        );

        let ledger = Arc::new(Mutex::new(ledger));
        let shared_spec = Arc::new(spec.clone());
        let semaphore = Arc::new(Semaphore::new(self.options.workers.max(1)));
        let mut outcomes: BTreeMap<usize, ChunkOutcome> = BTreeMap::new();
        let mut tasks = JoinSet::new();
        let mut cancelled = false;

        for range in &plan.ranges {
            let previous = lock(&ledger).entry(range.index).cloned();
            if let Some(entry) = previous.filter(|e| e.state == ChunkState::Completed) {
                info!("⏭️  Chunk {} of {} already imported, skipping", range.index, spec.name);
                outcomes.insert(
                    range.index,
                    ChunkOutcome {
                        range: range.clone(),
                        state: ChunkState::Completed,
                        result: Some(ImportResult {
                            rows_written: entry.rows_written,
                            rows_skipped: entry.rows_skipped,
                        }),
                        error: None,
                        reused: true,
                    },
                );
                continue;
            }

            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|_| ImportError::Cancelled)?;
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let index = range.index;
            update_ledger(&ledger, move |l| l.mark_in_progress(index)).await?;

            let driver = self.clone();
            let spec = Arc::clone(&shared_spec);
            let source = Arc::clone(&source);
            let ledger = Arc::clone(&ledger);
            let range = range.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let mut counts = ImportResult::default();
                let outcome = driver.stream_chunk(&spec, source, &range, &mut counts).await;
                record_outcome(&spec, &ledger, range, counts, outcome).await
            });
        }

        if cancelled {
            warn!(
                "🛑 Cancellation requested; waiting for {} running chunk(s) of {}",
                tasks.len(),
                spec.name
            );
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    outcomes.insert(outcome.range.index, outcome);
                }
                Err(e) => error!("Chunk task of {} did not finish: {}", spec.name, e),
            }
        }

        // A chunk still in progress here lost its task
        let aborted = {
            let ledger = lock(&ledger);
            let aborted = plan
                .ranges
                .iter()
                .map(|r| r.index)
                .filter(|i| !outcomes.contains_key(i) && ledger.state(*i) == Some(ChunkState::InProgress))
                .collect::<Vec<_>>();
            aborted
        };
        if !aborted.is_empty() {
            let recorded = update_ledger(&ledger, move |l| {
                for index in aborted {
                    l.mark_failed(index, "chunk task aborted", &ImportResult::default())?;
                }
                Ok(())
            })
            .await;
            if let Err(e) = recorded {
                warn!("Could not record aborted chunks of {}: {}", spec.name, e);
            }
        }

        let ledger = lock(&ledger);
        let chunks = plan
            .ranges
            .iter()
            .map(|range| {
                outcomes.remove(&range.index).unwrap_or_else(|| {
                    let entry = ledger.entry(range.index);
                    ChunkOutcome {
                        range: range.clone(),
                        state: entry.map(|e| e.state).unwrap_or(ChunkState::Pending),
                        result: None,
                        error: entry.and_then(|e| e.error.clone()),
                        reused: false,
                    }
                })
            })
            .collect::<Vec<_>>();

        let report = DatasetReport {
            dataset: spec.name.clone(),
            table: spec.table_name.clone(),
            run_id,
            chunks,
            error: None,
            cancelled,
        };
        info!(
            "Finished {}: {} written, {} skipped, {}/{} chunk(s) completed",
            spec.name,
            report.rows_written(),
            report.rows_skipped(),
            report.completed_chunks(),
            report.chunks.len()
        );
        Ok(report)
    }

    /// Import several datasets one after another, reading each source from
    /// `data_dir`. A dataset whose source cannot be opened or planned is
    /// reported as failed without affecting the others.
    pub async fn import_datasets(&self, specs: &[DatasetSpec], data_dir: &Path) -> RunSummary {
        let mut summary = RunSummary::default();

        for spec in specs {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let path = data_dir.join(&spec.source_file);
            let open_path = path.clone();
            let opened = tokio::task::spawn_blocking(move || CsvSource::open(&open_path))
                .await
                .map_err(ImportError::from)
                .and_then(|opened| opened);
            let report = match opened {
                Ok(source) => {
                    let source: Arc<dyn RowSource> = Arc::new(source);
                    match self.import_dataset(spec, source).await {
                        Ok(report) => report,
                        Err(e) => {
                            error!("Import of {} failed before any chunk ran: {}", spec.name, e);
                            DatasetReport::setup_failed(
                                &spec.name,
                                &spec.table_name,
                                Uuid::new_v4().to_string(),
                                e.to_string(),
                            )
                        }
                    }
                }
                Err(e) => {
                    error!("Cannot open {} for {}: {}", path.display(), spec.name, e);
                    DatasetReport::setup_failed(
                        &spec.name,
                        &spec.table_name,
                        Uuid::new_v4().to_string(),
                        format!("cannot open {}: {}", path.display(), e),
                    )
                }
            };

            summary.cancelled |= report.cancelled;
            summary.datasets.push(report);
        }

        summary
    }
}

/// Apply `update` to the ledger on the blocking pool, since it persists to disk.
async fn update_ledger<F>(ledger: &Arc<Mutex<ChunkLedger>>, update: F) -> Result<()>
where
    F: FnOnce(&mut ChunkLedger) -> Result<()> + Send + 'static,
{
    let ledger = Arc::clone(ledger);
    tokio::task::spawn_blocking(move || update(&mut *lock(&ledger))).await?
}

async fn record_outcome(
    spec: &DatasetSpec,
    ledger: &Arc<Mutex<ChunkLedger>>,
    range: ChunkRange,
    counts: ImportResult,
    outcome: Result<()>,
) -> ChunkOutcome {
    let index = range.index;
    match outcome {
        Ok(()) => {
            info!(
                "✅ Chunk {} of {}: {} written, {} skipped",
                index, spec.name, counts.rows_written, counts.rows_skipped
            );
            if let Err(e) = update_ledger(ledger, move |l| l.mark_completed(index, &counts)).await {
                warn!("Could not record completion of chunk {}: {}", index, e);
            }
            ChunkOutcome {
                range,
                state: ChunkState::Completed,
                result: Some(counts),
                error: None,
                reused: false,
            }
        }
        Err(e) => {
            error!(
                "❌ Chunk {} of {} failed after {} written, {} skipped: {}",
                index, spec.name, counts.rows_written, counts.rows_skipped, e
            );
            let message = e.to_string();
            let recorded = message.clone();
            if let Err(e) = update_ledger(ledger, move |l| l.mark_failed(index, &recorded, &counts)).await {
                warn!("Could not record failure of chunk {}: {}", index, e);
            }
            ChunkOutcome {
                range,
                state: ChunkState::Failed,
                result: Some(counts),
                error: Some(message),
                reused: false,
            }
        }
    }
}
