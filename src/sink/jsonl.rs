//! JSON-lines file store
//!
//! Each chunk session writes `<root>/<table>/<dataset>-chunk-<index>.jsonl`,
//! truncating any earlier file for the same chunk, so re-importing a chunk
//! replaces its output instead of appending to it.

use crate::chunk::ChunkRange;
use crate::error::Result;
use crate::registry::DatasetSpec;
use crate::sink::{ColumnSink, OutputRecord, SinkFactory};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

#[derive(Clone, Debug)]
pub struct JsonlStore {
    root: PathBuf,
}

impl JsonlStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn chunk_path(&self, spec: &DatasetSpec, range: &ChunkRange) -> PathBuf {
        self.root
            .join(&spec.table_name)
            .join(format!("{}{:04}.jsonl", chunk_prefix(spec), range.index))
    }
}

fn chunk_prefix(spec: &DatasetSpec) -> String {
    format!("{}-chunk-", spec.name)
}

#[async_trait]
impl SinkFactory for JsonlStore {
    fn sink_type(&self) -> &'static str {
        "jsonl"
    }

    async fn open_session(&self, spec: &DatasetSpec, range: &ChunkRange) -> Result<Box<dyn ColumnSink>> {
        let path = self.chunk_path(spec, range);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        debug!("Opening JSONL session at {}", path.display());
        let file = File::create(&path).await?;
        Ok(Box::new(JsonlSession {
            writer: BufWriter::new(file),
        }))
    }

    async fn clear_dataset(&self, spec: &DatasetSpec) -> Result<()> {
        let dir = self.root.join(&spec.table_name);
        if !tokio::fs::try_exists(&dir).await? {
            return Ok(());
        }

        let prefix = chunk_prefix(spec);
        let mut entries = tokio::fs::read_dir(&dir).await?;
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(&prefix) && name.ends_with(".jsonl") {
                tokio::fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!("Removed {} stale chunk file(s) of {} from {}", removed, spec.name, dir.display());
        }
        Ok(())
    }
}

struct JsonlSession {
    writer: BufWriter<File>,
}

#[async_trait]
impl ColumnSink for JsonlSession {
    async fn put(&mut self, record: &OutputRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        self.writer.flush().await?;
        Ok(())
    }
}
