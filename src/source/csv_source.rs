//! CSV Source - Header-aware CSV reader over a file or an in-memory buffer

use crate::chunk::{ChunkEnd, ChunkRange};
use crate::error::{ImportError, Result};
use crate::source::{RowIter, RowSource, SourceRow};
use csv::ReaderBuilder;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const UTF8_BOM: &str = "\u{feff}";

#[derive(Clone, Debug)]
enum Backing {
    File(PathBuf),
    Memory(Arc<[u8]>),
}

/// CSV source with a header line.
///
/// Row boundaries are newline based: a row starts at offset 0 or right after a
/// `\n`. Quoted fields spanning several lines are not supported.
#[derive(Clone, Debug)]
pub struct CsvSource {
    backing: Backing,
    headers: Arc<[String]>,
    data_start: u64,
}

impl CsvSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let (headers, data_start) = Self::read_header(BufReader::new(file))?;
        Ok(Self {
            backing: Backing::File(path),
            headers,
            data_start,
        })
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let data: Arc<[u8]> = bytes.into().into();
        let (headers, data_start) = Self::read_header(&data[..])?;
        Ok(Self {
            backing: Backing::Memory(data),
            headers,
            data_start,
        })
    }

    fn read_header(mut reader: impl BufRead) -> Result<(Arc<[String]>, u64)> {
        let mut line = Vec::new();
        let consumed = reader.read_until(b'\n', &mut line)?;

        let mut rdr = ReaderBuilder::new()
            .has_headers(false)
            .from_reader(&line[..]);
        let mut record = csv::StringRecord::new();
        if !rdr.read_record(&mut record)? {
            return Err(ImportError::Config("CSV source has no header line".to_string()));
        }

        let headers = record
            .iter()
            .enumerate()
            .map(|(idx, h)| {
                if idx == 0 {
                    h.trim_start_matches(UTF8_BOM).to_string()
                } else {
                    h.to_string()
                }
            })
            .collect::<Vec<_>>();

        Ok((headers.into(), consumed as u64))
    }

    fn window(&self, range: &ChunkRange) -> Result<Box<dyn Read + Send>> {
        match &self.backing {
            Backing::File(path) => {
                let mut file = File::open(path)?;
                file.seek(SeekFrom::Start(range.start))?;
                let reader: Box<dyn Read + Send> = match range.end {
                    ChunkEnd::Offset(end) => {
                        Box::new(file.take(end.saturating_sub(range.start)))
                    }
                    ChunkEnd::Unbounded => Box::new(file),
                };
                Ok(reader)
            }
            Backing::Memory(data) => {
                let len = data.len() as u64;
                let end = match range.end {
                    ChunkEnd::Offset(end) => end.min(len),
                    ChunkEnd::Unbounded => len,
                };
                let start = range.start.min(end);
                Ok(Box::new(SharedWindow {
                    data: Arc::clone(data),
                    pos: start as usize,
                    end: end as usize,
                }))
            }
        }
    }
}

impl RowSource for CsvSource {
    fn headers(&self) -> &[String] {
        &self.headers
    }

    fn data_start(&self) -> u64 {
        self.data_start
    }

    fn total_size(&self) -> Result<u64> {
        match &self.backing {
            Backing::File(path) => Ok(std::fs::metadata(path)?.len()),
            Backing::Memory(data) => Ok(data.len() as u64),
        }
    }

    fn next_row_start(&self, offset: u64) -> Result<u64> {
        let total = self.total_size()?;
        if offset <= self.data_start {
            return Ok(self.data_start);
        }
        if offset >= total {
            return Ok(total);
        }

        // Scan from the byte before `offset`: if it is a newline, `offset`
        // already starts a row.
        let from = offset - 1;
        match &self.backing {
            Backing::File(path) => {
                let mut file = File::open(path)?;
                file.seek(SeekFrom::Start(from))?;
                snap_to_row(BufReader::new(file), from, total)
            }
            Backing::Memory(data) => snap_to_row(&data[from as usize..], from, total),
        }
    }

    fn rows(&self, range: &ChunkRange) -> Result<RowIter<'_>> {
        let window = self.window(range)?;
        let headers = Arc::clone(&self.headers);

        let records = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(window)
            .into_records()
            .map(move |record| -> Result<SourceRow> {
                let record = record?;
                Ok(SourceRow::new(
                    Arc::clone(&headers),
                    record.iter().map(String::from).collect(),
                ))
            });

        Ok(Box::new(records))
    }
}

/// Finish the line containing `from`, then skip blank lines. Returns the
/// offset of the next non-blank line, or `total` if there is none. The CSV
/// reader drops blank lines, so a chunk starting on one could hold no rows.
fn snap_to_row(mut reader: impl BufRead, from: u64, total: u64) -> Result<u64> {
    let mut line = Vec::new();
    let n = reader.read_until(b'\n', &mut line)?;
    if line.last() != Some(&b'\n') {
        return Ok(total);
    }

    let mut pos = from + n as u64;
    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line)?;
        if n == 0 {
            return Ok(total);
        }
        if !line.iter().all(|&b| b == b'\r' || b == b'\n') {
            return Ok(pos);
        }
        pos += n as u64;
    }
}

/// `Read` over a slice of a shared buffer.
struct SharedWindow {
    data: Arc<[u8]>,
    pos: usize,
    end: usize,
}

impl Read for SharedWindow {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = buf.len().min(self.end - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
