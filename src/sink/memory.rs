//! In-memory wide-column store with upsert semantics.

use crate::chunk::ChunkRange;
use crate::error::{ImportError, Result};
use crate::registry::DatasetSpec;
use crate::sink::{ColumnSink, OutputRecord, SinkFactory};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// `family:qualifier` → value
pub type StoredRow = BTreeMap<String, String>;

type Tables = BTreeMap<String, BTreeMap<String, StoredRow>>;

/// Shared store: table → row key → cells. Cloning shares the same data.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    puts: Arc<AtomicU64>,
    sessions: Arc<AtomicU64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn upsert(&self, record: &OutputRecord) {
        let mut tables = self.lock();
        let row = tables
            .entry(record.table.clone())
            .or_default()
            .entry(record.row_key.clone())
            .or_default();
        for (cell, value) in record.cells() {
            row.insert(cell, value.to_string());
        }
        self.puts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, table: &str, row_key: &str) -> Option<StoredRow> {
        self.lock().get(table)?.get(row_key).cloned()
    }

    /// Number of distinct row keys stored in `table`.
    pub fn row_count(&self, table: &str) -> usize {
        self.lock().get(table).map(BTreeMap::len).unwrap_or(0)
    }

    pub fn total_rows(&self) -> usize {
        self.lock().values().map(BTreeMap::len).sum()
    }

    /// Rows of `table` whose key starts with `prefix`, in key order.
    pub fn scan_prefix(&self, table: &str, prefix: &str) -> Vec<(String, StoredRow)> {
        let tables = self.lock();
        let Some(rows) = tables.get(table) else {
            return Vec::new();
        };
        rows.range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, row)| (key.clone(), row.clone()))
            .collect()
    }

    /// Total `put` calls accepted, including overwrites.
    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }

    pub fn sessions_opened(&self) -> u64 {
        self.sessions.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SinkFactory for MemoryStore {
    fn sink_type(&self) -> &'static str {
        "memory"
    }

    async fn open_session(&self, _spec: &DatasetSpec, _range: &ChunkRange) -> Result<Box<dyn ColumnSink>> {
        self.sessions.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MemorySession {
            store: self.clone(),
        }))
    }
}

struct MemorySession {
    store: MemoryStore,
}

#[async_trait]
impl ColumnSink for MemorySession {
    async fn put(&mut self, record: &OutputRecord) -> Result<()> {
        if record.row_key.is_empty() {
            return Err(ImportError::SinkWrite("empty row key".to_string()));
        }
        self.store.upsert(record);
        Ok(())
    }
}
