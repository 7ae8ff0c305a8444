//! Chunk Ledger - Per-dataset chunk state for resumable imports
//!
//! Each chunk moves `Pending → InProgress → {Completed | Failed}`; a `Failed`
//! chunk may go back to `InProgress` on the next run. When a state directory is
//! configured the ledger is rewritten after every transition, so a later run
//! skips chunks that already completed under the same plan.

use crate::chunk::ChunkPlan;
use crate::error::{ImportError, Result};
use crate::import::ImportResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkState {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl ChunkState {
    pub fn can_transition_to(self, next: ChunkState) -> bool {
        matches!(
            (self, next),
            (ChunkState::Pending, ChunkState::InProgress)
                | (ChunkState::Failed, ChunkState::InProgress)
                | (ChunkState::InProgress, ChunkState::Completed)
                | (ChunkState::InProgress, ChunkState::Failed)
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkEntry {
    pub index: usize,
    pub state: ChunkState,
    pub attempts: u32,
    pub rows_written: u64,
    pub rows_skipped: u64,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ChunkEntry {
    fn new(index: usize) -> Self {
        Self {
            index,
            state: ChunkState::Pending,
            attempts: 0,
            rows_written: 0,
            rows_skipped: 0,
            error: None,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkLedger {
    pub dataset: String,
    pub plan_fingerprint: String,
    pub chunks: Vec<ChunkEntry>,
    #[serde(skip)]
    path: Option<PathBuf>,
    #[serde(skip)]
    resumed: bool,
}

impl ChunkLedger {
    /// Fresh in-memory ledger with every chunk `Pending`.
    pub fn new(plan: &ChunkPlan) -> Self {
        Self {
            dataset: plan.dataset.clone(),
            plan_fingerprint: plan.fingerprint(),
            chunks: plan.ranges.iter().map(|r| ChunkEntry::new(r.index)).collect(),
            path: None,
            resumed: false,
        }
    }

    pub fn path_for(state_dir: &Path, dataset: &str) -> PathBuf {
        state_dir.join(format!("{}.ledger.json", dataset))
    }

    /// Load the persisted ledger for `plan`, or start a new one.
    ///
    /// A persisted ledger recorded for different chunk boundaries is
    /// discarded. Chunks left `InProgress` by an interrupted run are reset to
    /// `Failed` so they are retried.
    pub fn load_or_new(state_dir: Option<&Path>, plan: &ChunkPlan) -> Result<Self> {
        let Some(state_dir) = state_dir else {
            return Ok(Self::new(plan));
        };

        let path = Self::path_for(state_dir, &plan.dataset);
        let mut ledger = if path.exists() {
            let json = std::fs::read_to_string(&path)?;
            let persisted: ChunkLedger = serde_json::from_str(&json)?;
            if persisted.plan_fingerprint == plan.fingerprint() && persisted.chunks.len() == plan.len() {
                info!(
                    "Resuming {} from ledger: {}/{} chunks completed",
                    plan.dataset,
                    persisted.completed_count(),
                    persisted.chunks.len()
                );
                ChunkLedger {
                    resumed: true,
                    ..persisted
                }
            } else {
                warn!(
                    "Ledger for {} was recorded for a different chunk plan; starting over",
                    plan.dataset
                );
                Self::new(plan)
            }
        } else {
            Self::new(plan)
        };

        for entry in ledger.chunks.iter_mut() {
            if entry.state == ChunkState::InProgress {
                warn!("Chunk {} of {} was interrupted; marking failed", entry.index, plan.dataset);
                entry.state = ChunkState::Failed;
                entry.error = Some("interrupted".to_string());
                entry.updated_at = Utc::now();
            }
        }

        std::fs::create_dir_all(state_dir)?;
        ledger.path = Some(path);
        ledger.save()?;
        Ok(ledger)
    }

    /// Remove the persisted ledger of `dataset`, if any.
    pub fn discard(state_dir: &Path, dataset: &str) -> Result<()> {
        let path = Self::path_for(state_dir, dataset);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    /// True when loaded from a ledger recorded for the same plan. A ledger
    /// that is not resumed means earlier output of the dataset is stale.
    pub fn is_resumed(&self) -> bool {
        self.resumed
    }

    pub fn entry(&self, index: usize) -> Option<&ChunkEntry> {
        self.chunks.get(index)
    }

    pub fn state(&self, index: usize) -> Option<ChunkState> {
        self.entry(index).map(|e| e.state)
    }

    pub fn completed_count(&self) -> usize {
        self.chunks
            .iter()
            .filter(|e| e.state == ChunkState::Completed)
            .count()
    }

    fn transition(&mut self, index: usize, next: ChunkState) -> Result<&mut ChunkEntry> {
        let dataset = self.dataset.clone();
        let entry = self.chunks.get_mut(index).ok_or_else(|| ImportError::InvalidTransition {
            dataset: dataset.clone(),
            index,
            reason: "no such chunk".to_string(),
        })?;
        if !entry.state.can_transition_to(next) {
            return Err(ImportError::InvalidTransition {
                dataset,
                index,
                reason: format!("{:?} -> {:?}", entry.state, next),
            });
        }
        entry.state = next;
        entry.updated_at = Utc::now();
        Ok(entry)
    }

    pub fn mark_in_progress(&mut self, index: usize) -> Result<()> {
        let entry = self.transition(index, ChunkState::InProgress)?;
        entry.attempts += 1;
        entry.error = None;
        self.save()
    }

    pub fn mark_completed(&mut self, index: usize, result: &ImportResult) -> Result<()> {
        let entry = self.transition(index, ChunkState::Completed)?;
        entry.rows_written = result.rows_written;
        entry.rows_skipped = result.rows_skipped;
        self.save()
    }

    /// Record a failure along with the rows handled before it.
    pub fn mark_failed(&mut self, index: usize, error: &str, partial: &ImportResult) -> Result<()> {
        let entry = self.transition(index, ChunkState::Failed)?;
        entry.rows_written = partial.rows_written;
        entry.rows_skipped = partial.rows_skipped;
        entry.error = Some(error.to_string());
        self.save()
    }

    /// Persist to the state directory; a no-op for in-memory ledgers.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}
