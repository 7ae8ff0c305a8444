//! widecol-loader: imports flat CSV datasets into a wide-column store.
//!
//! A [`SchemaRegistry`] describes each dataset's target table, column family,
//! row key and output columns. The [`ChunkPlanner`] splits large sources into
//! byte ranges that the [`ImportDriver`] streams concurrently through the row
//! key composer into a [`SinkFactory`].

pub mod chunk;
pub mod config;
pub mod error;
pub mod import;
pub mod registry;
pub mod rowkey;
pub mod sink;
pub mod source;

pub use chunk::{ChunkEnd, ChunkPlan, ChunkPlanner, ChunkRange};
pub use config::ImportConfig;
pub use error::{ImportError, Result};
pub use import::{
    CancelFlag, ChunkLedger, ChunkOutcome, ChunkState, DatasetReport, ImportDriver, ImportOptions,
    ImportResult, RetryPolicy, RunSummary,
};
pub use registry::{DatasetSpec, RowKeySpec, SchemaRegistry};
pub use rowkey::{compose, compose_record, decompose, ComposedRow};
pub use sink::{ColumnSink, JsonlStore, MemoryStore, OutputRecord, SinkFactory};
pub use source::{CsvSource, RowSource, SourceRow};
