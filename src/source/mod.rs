//! Row Source - Reader side of an import
//!
//! A [`RowSource`] hands out rows of a tabular file by byte range and can snap
//! an arbitrary byte offset forward to the next row start, which is all the
//! chunk planner needs to split a file without scanning it first.

pub mod csv_source;

pub use csv_source::CsvSource;

use crate::chunk::ChunkRange;
use crate::error::Result;
use std::sync::Arc;

/// One input line as an ordered column → raw value mapping.
///
/// Rows read from the same source share their header list. A row with fewer
/// values than headers simply lacks the trailing columns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceRow {
    headers: Arc<[String]>,
    values: Vec<String>,
}

impl SourceRow {
    pub fn new(headers: Arc<[String]>, values: Vec<String>) -> Self {
        Self { headers, values }
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let (headers, values): (Vec<String>, Vec<String>) = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .unzip();
        Self {
            headers: headers.into(),
            values,
        }
    }

    /// Value of `column`, or `None` if the row has no such column.
    pub fn get(&self, column: &str) -> Option<&str> {
        let idx = self.headers.iter().position(|h| h == column)?;
        self.values.get(idx).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .zip(self.values.iter())
            .map(|(h, v)| (h.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len().min(self.headers.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub type RowIter<'a> = Box<dyn Iterator<Item = Result<SourceRow>> + Send + 'a>;

/// Sequential, range-addressable access to a tabular source.
pub trait RowSource: Send + Sync {
    /// Column names from the header line
    fn headers(&self) -> &[String];

    /// Byte offset of the first data row
    fn data_start(&self) -> u64;

    /// Current size of the source in bytes
    fn total_size(&self) -> Result<u64>;

    /// Smallest row start that is `>= offset`, or `total_size` if none
    fn next_row_start(&self, offset: u64) -> Result<u64>;

    /// Rows whose first byte lies inside `range`, in source order
    fn rows(&self, range: &ChunkRange) -> Result<RowIter<'_>>;
}
