//! Per-chunk, per-dataset and per-run import summaries.

use crate::chunk::ChunkRange;
use crate::import::{ChunkState, ImportResult};
use serde::Serialize;
use std::fmt;

#[derive(Clone, Debug, Serialize)]
pub struct ChunkOutcome {
    pub range: ChunkRange,
    pub state: ChunkState,
    /// Row counts; for a failed chunk, the rows handled before it failed.
    /// `None` for chunks that did not run.
    pub result: Option<ImportResult>,
    pub error: Option<String>,
    /// Completed by an earlier run and not reprocessed
    pub reused: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct DatasetReport {
    pub dataset: String,
    pub table: String,
    pub run_id: String,
    pub chunks: Vec<ChunkOutcome>,
    /// Failure before any chunk ran (missing source, invalid plan)
    pub error: Option<String>,
    pub cancelled: bool,
}

impl DatasetReport {
    pub fn setup_failed(dataset: &str, table: &str, run_id: String, error: String) -> Self {
        Self {
            dataset: dataset.to_string(),
            table: table.to_string(),
            run_id,
            chunks: Vec::new(),
            error: Some(error),
            cancelled: false,
        }
    }

    /// One result per chunk that ran (or was reused), in chunk order.
    pub fn results(&self) -> Vec<ImportResult> {
        self.chunks.iter().filter_map(|c| c.result).collect()
    }

    pub fn rows_written(&self) -> u64 {
        self.chunks.iter().filter_map(|c| c.result).map(|r| r.rows_written).sum()
    }

    pub fn rows_skipped(&self) -> u64 {
        self.chunks.iter().filter_map(|c| c.result).map(|r| r.rows_skipped).sum()
    }

    fn count(&self, state: ChunkState) -> usize {
        self.chunks.iter().filter(|c| c.state == state).count()
    }

    pub fn failed_chunks(&self) -> usize {
        self.count(ChunkState::Failed)
    }

    pub fn pending_chunks(&self) -> usize {
        self.count(ChunkState::Pending)
    }

    pub fn completed_chunks(&self) -> usize {
        self.count(ChunkState::Completed)
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.completed_chunks() == self.chunks.len()
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct RunSummary {
    pub datasets: Vec<DatasetReport>,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn rows_written(&self) -> u64 {
        self.datasets.iter().map(DatasetReport::rows_written).sum()
    }

    pub fn rows_skipped(&self) -> u64 {
        self.datasets.iter().map(DatasetReport::rows_skipped).sum()
    }

    pub fn failed_chunks(&self) -> usize {
        self.datasets.iter().map(DatasetReport::failed_chunks).sum()
    }

    pub fn failed_datasets(&self) -> usize {
        self.datasets.iter().filter(|d| d.error.is_some()).count()
    }

    /// A run fails when any chunk or dataset setup failed.
    pub fn has_failures(&self) -> bool {
        self.failed_chunks() > 0 || self.failed_datasets() > 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n=== Import Summary ===")?;
        for report in &self.datasets {
            writeln!(f, "\nDataset {} -> table {}", report.dataset, report.table)?;
            if let Some(ref error) = report.error {
                writeln!(f, "  FAILED: {}", error)?;
                continue;
            }
            writeln!(f, "  {:<8}{:<12}{:>12}{:>10}  note", "chunk", "state", "written", "skipped")?;
            for chunk in &report.chunks {
                let (written, skipped) = chunk
                    .result
                    .map(|r| (r.rows_written.to_string(), r.rows_skipped.to_string()))
                    .unwrap_or_else(|| ("-".to_string(), "-".to_string()));
                let note = match (&chunk.error, chunk.reused) {
                    (Some(error), _) => error.clone(),
                    (None, true) => "already imported".to_string(),
                    (None, false) => String::new(),
                };
                writeln!(
                    f,
                    "  {:<8}{:<12}{:>12}{:>10}  {}",
                    format!("#{}", chunk.range.index),
                    format!("{:?}", chunk.state),
                    written,
                    skipped,
                    note
                )?;
            }
            writeln!(
                f,
                "  total: written={} skipped={} failed_chunks={} pending_chunks={}",
                report.rows_written(),
                report.rows_skipped(),
                report.failed_chunks(),
                report.pending_chunks()
            )?;
        }
        writeln!(
            f,
            "\nRun: written={} skipped={} failed_chunks={} failed_datasets={}{}",
            self.rows_written(),
            self.rows_skipped(),
            self.failed_chunks(),
            self.failed_datasets(),
            if self.cancelled { " (cancelled)" } else { "" }
        )
    }
}
