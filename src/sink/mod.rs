//! Column Sink - Writer side of an import
//!
//! A [`SinkFactory`] hands out one [`ColumnSink`] session per chunk; sessions
//! are never shared between concurrently importing chunks. `put` has upsert
//! semantics: writing the same row key again overwrites the stored cells.

pub mod jsonl;
pub mod memory;

pub use jsonl::JsonlStore;
pub use memory::MemoryStore;

use crate::chunk::ChunkRange;
use crate::error::Result;
use crate::registry::DatasetSpec;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One row addressed at table / column family / row key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub table: String,
    pub column_family: String,
    pub row_key: String,
    pub columns: BTreeMap<String, String>,
}

impl OutputRecord {
    pub fn new(
        table: String,
        column_family: String,
        row_key: String,
        columns: BTreeMap<String, String>,
    ) -> Self {
        Self {
            table,
            column_family,
            row_key,
            columns,
        }
    }

    /// Cells as `family:qualifier` → value.
    pub fn cells(&self) -> impl Iterator<Item = (String, &str)> {
        self.columns
            .iter()
            .map(move |(qualifier, value)| (format!("{}:{}", self.column_family, qualifier), value.as_str()))
    }
}

/// A write session owned by a single chunk import.
#[async_trait]
pub trait ColumnSink: Send {
    /// Upsert one record. Any error is treated as retryable by the caller.
    async fn put(&mut self, record: &OutputRecord) -> Result<()>;

    /// Flush buffered writes. Called once after the last `put`.
    async fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Opens write sessions, one per concurrently importing chunk.
#[async_trait]
pub trait SinkFactory: Send + Sync {
    /// Sink type (e.g., "memory", "jsonl")
    fn sink_type(&self) -> &'static str;

    async fn open_session(&self, spec: &DatasetSpec, range: &ChunkRange) -> Result<Box<dyn ColumnSink>>;

    /// Drop output left by earlier imports of `spec` under a different chunk
    /// plan. Sinks whose writes are keyed by row key alone need nothing here.
    async fn clear_dataset(&self, _spec: &DatasetSpec) -> Result<()> {
        Ok(())
    }
}
