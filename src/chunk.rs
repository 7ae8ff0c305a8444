//! Chunk Planner - Splits a large source into independently importable ranges
//!
//! Partitioning is by byte offset, not by row content: evenly spaced target
//! offsets are snapped forward to the next row start, so chunks keep source
//! order and never split a row. No full scan of the source is needed.

use crate::error::{ImportError, Result};
use crate::registry::DatasetSpec;
use crate::source::RowSource;
use serde::{Deserialize, Serialize};
use std::fmt;

/// End of a chunk: an exclusive byte offset, or the end of the source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkEnd {
    Offset(u64),
    Unbounded,
}

/// Byte range `[start, end)` of one chunk. `start` is always a row start.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRange {
    pub index: usize,
    pub start: u64,
    pub end: ChunkEnd,
}

impl ChunkRange {
    pub fn new(index: usize, start: u64, end: ChunkEnd) -> Self {
        Self { index, start, end }
    }

    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.start
            && match self.end {
                ChunkEnd::Offset(end) => offset < end,
                ChunkEnd::Unbounded => true,
            }
    }
}

impl fmt::Display for ChunkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            ChunkEnd::Offset(end) => write!(f, "#{} [{}, {})", self.index, self.start, end),
            ChunkEnd::Unbounded => write!(f, "#{} [{}, end)", self.index, self.start),
        }
    }
}

/// Ordered, contiguous ranges covering a source's data region exactly once.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPlan {
    pub dataset: String,
    pub data_start: u64,
    /// Source size the plan was computed for
    pub source_size: u64,
    pub ranges: Vec<ChunkRange>,
}

impl ChunkPlan {
    /// One chunk spanning the whole source.
    pub fn single(dataset: impl Into<String>, data_start: u64, source_size: u64) -> Self {
        Self {
            dataset: dataset.into(),
            data_start,
            source_size,
            ranges: vec![ChunkRange::new(0, data_start, ChunkEnd::Unbounded)],
        }
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ChunkRange> {
        self.ranges.get(index)
    }

    /// Stable identity of the chunk boundaries and the source size, used to
    /// match a persisted ledger against a fresh plan. A source that grew or
    /// shrank never matches a ledger recorded before the change.
    pub fn fingerprint(&self) -> String {
        let starts = self
            .ranges
            .iter()
            .map(|r| r.start.to_string())
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "{}:{}:{}:[{}]",
            self.dataset,
            self.source_size,
            self.ranges.len(),
            starts
        )
    }

    /// Check that ranges are indexed in order, start at the data region,
    /// follow each other without gap or overlap, and that only the last one
    /// is unbounded.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| ImportError::InvalidChunkPlan {
            dataset: self.dataset.clone(),
            reason,
        };

        let first = self
            .ranges
            .first()
            .ok_or_else(|| invalid("plan has no ranges".to_string()))?;
        if first.start != self.data_start {
            return Err(invalid(format!(
                "first range starts at {} instead of {}",
                first.start, self.data_start
            )));
        }

        for (i, pair) in self.ranges.windows(2).enumerate() {
            let (current, next) = (&pair[0], &pair[1]);
            match current.end {
                ChunkEnd::Unbounded => {
                    return Err(invalid(format!("range {} is unbounded but not last", i)));
                }
                ChunkEnd::Offset(end) if end != next.start => {
                    return Err(invalid(format!(
                        "range {} ends at {} but range {} starts at {}",
                        i,
                        end,
                        i + 1,
                        next.start
                    )));
                }
                ChunkEnd::Offset(end) if end <= current.start => {
                    return Err(invalid(format!("range {} is empty", i)));
                }
                ChunkEnd::Offset(_) => {}
            }
        }

        for (i, range) in self.ranges.iter().enumerate() {
            if range.index != i {
                return Err(invalid(format!("range at position {} has index {}", i, range.index)));
            }
        }

        Ok(())
    }
}

pub struct ChunkPlanner;

impl ChunkPlanner {
    /// Partition `source` into at most `spec.chunk_count` ranges.
    ///
    /// `total_size_hint` is the expected source size in bytes; the last range
    /// is unbounded, so bytes past the hint still belong to it. Boundaries that
    /// snap onto an earlier boundary or onto the end are dropped, which yields
    /// fewer (never empty) chunks for sources with fewer rows than chunks.
    pub fn plan(spec: &DatasetSpec, total_size_hint: u64, source: &dyn RowSource) -> Result<ChunkPlan> {
        if spec.chunk_count < 1 {
            return Err(ImportError::InvalidChunkCount {
                dataset: spec.name.clone(),
                count: spec.chunk_count,
            });
        }

        let data_start = source.data_start();
        let span = total_size_hint.saturating_sub(data_start);
        let chunks = spec.chunk_count as u64;

        let mut boundaries = vec![data_start];
        for i in 1..chunks {
            let target = data_start + (span as u128 * i as u128 / chunks as u128) as u64;
            let boundary = source.next_row_start(target)?;
            let last = boundaries.last().copied().unwrap_or(data_start);
            if boundary > last && boundary < total_size_hint {
                boundaries.push(boundary);
            }
        }

        let ranges = boundaries
            .iter()
            .enumerate()
            .map(|(index, &start)| {
                let end = boundaries
                    .get(index + 1)
                    .map(|&next| ChunkEnd::Offset(next))
                    .unwrap_or(ChunkEnd::Unbounded);
                ChunkRange::new(index, start, end)
            })
            .collect();

        Ok(ChunkPlan {
            dataset: spec.name.clone(),
            data_start,
            source_size: total_size_hint,
            ranges,
        })
    }

    /// Plan a dataset: chunked when marked large, a single range otherwise.
    pub fn plan_dataset(spec: &DatasetSpec, source: &dyn RowSource) -> Result<ChunkPlan> {
        let total = source.total_size()?;
        if spec.is_large {
            Self::plan(spec, total, source)
        } else {
            Ok(ChunkPlan::single(spec.name.clone(), source.data_start(), total))
        }
    }
}
