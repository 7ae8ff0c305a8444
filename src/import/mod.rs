//! Import Driver - Streams chunks of a source through the row key composer
//! into a column sink
//!
//! - Chunks of one dataset run concurrently on a bounded worker pool
//! - Row-level failures are skipped and counted
//! - Sink writes are retried per row with backoff
//! - A persisted chunk ledger makes re-runs resume instead of restart

pub mod driver;
pub mod ledger;
pub mod report;
pub mod retry;

pub use driver::{CancelFlag, ImportDriver, ImportOptions};
pub use ledger::{ChunkEntry, ChunkLedger, ChunkState};
pub use report::{ChunkOutcome, DatasetReport, RunSummary};
pub use retry::RetryPolicy;

use serde::{Deserialize, Serialize};

/// Row counts of one chunk import
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportResult {
    pub rows_written: u64,
    pub rows_skipped: u64,
}

impl ImportResult {
    pub fn rows_read(&self) -> u64 {
        self.rows_written + self.rows_skipped
    }
}
