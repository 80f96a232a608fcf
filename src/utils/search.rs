//! Comparator-driven binary search over ordered line sources
//!
//! A single search routine serves every place a sorted sequence of lines is
//! probed: the in-memory boundary table, a fully loaded batch, a
//! memory-mapped batch, and a batch file read through seeks. Sources differ
//! only in how a position maps to a line:
//!
//! - index-addressed sources (`SliceSource`) treat each position as one
//!   element, so the record at `i` spans `[i, i + 1)`
//! - byte-addressed sources (`ByteSource`, `SeekSource`) treat positions as
//!   byte offsets; the record covering an offset is the newline-terminated
//!   line around it, found by scanning back to the previous delimiter

use crate::error::{IndexError, Result};
use memchr::{memchr, memrchr};
use std::cmp::Ordering;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::Path;

/// Bytes read per step while scanning for a line delimiter on disk
const SCAN_CHUNK: usize = 4096;

/// Result of a binary search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    /// Position of the matching record
    Found(u64),
    /// Position where the target would be inserted to keep the order
    NotFound(u64),
}

impl SearchOutcome {
    pub fn is_found(&self) -> bool {
        matches!(self, SearchOutcome::Found(_))
    }
}

/// A record returned by a [`LineSource`]
#[derive(Debug, Clone, Copy)]
pub struct Entry<'a> {
    /// First position covered by the record
    pub start: u64,
    /// One past the last position covered by the record
    pub end: u64,
    /// Line content without the delimiter
    pub line: &'a [u8],
}

/// Ordered, random-access source of lines addressed by position
pub trait LineSource {
    /// Range of valid positions
    fn span(&self) -> Range<u64>;

    /// Return the record covering `position`.
    ///
    /// `floor` is a position known to start a record; the returned record
    /// never starts before it.
    fn entry_at(&mut self, position: u64, floor: u64) -> Result<Entry<'_>>;
}

/// Binary search a source with a comparator.
///
/// `cmp` returns the ordering of a probed line relative to the target,
/// as in [`slice::binary_search_by`].
pub fn binary_search_by<S, F>(source: &mut S, mut cmp: F) -> Result<SearchOutcome>
where
    S: LineSource + ?Sized,
    F: FnMut(&[u8]) -> Ordering,
{
    let Range { start: mut lo, end: mut hi } = source.span();

    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let (ordering, start, end) = {
            let entry = source.entry_at(mid, lo)?;
            (cmp(entry.line), entry.start, entry.end)
        };

        match ordering {
            Ordering::Equal => return Ok(SearchOutcome::Found(start)),
            Ordering::Less => lo = end,
            Ordering::Greater => hi = start,
        }
    }

    Ok(SearchOutcome::NotFound(lo))
}

/// Binary search a source for an exact line
pub fn binary_search<S>(source: &mut S, target: &[u8]) -> Result<SearchOutcome>
where
    S: LineSource + ?Sized,
{
    binary_search_by(source, |line| line.cmp(target))
}

/// Index of the greatest element not greater than the target.
///
/// Only meaningful for index-addressed sources.
pub fn floor_index(outcome: SearchOutcome) -> Option<usize> {
    match outcome {
        SearchOutcome::Found(i) => Some(i as usize),
        SearchOutcome::NotFound(0) => None,
        SearchOutcome::NotFound(i) => Some(i as usize - 1),
    }
}

/// Index-addressed source over an in-memory slice of lines
pub struct SliceSource<'a, T> {
    items: &'a [T],
}

impl<'a, T: AsRef<[u8]>> SliceSource<'a, T> {
    pub fn new(items: &'a [T]) -> Self {
        Self { items }
    }
}

impl<T: AsRef<[u8]>> LineSource for SliceSource<'_, T> {
    fn span(&self) -> Range<u64> {
        0..self.items.len() as u64
    }

    fn entry_at(&mut self, position: u64, _floor: u64) -> Result<Entry<'_>> {
        let item = self.items.get(position as usize).ok_or_else(|| {
            IndexError::InvalidInput(format!("position {} out of range", position))
        })?;
        Ok(Entry {
            start: position,
            end: position + 1,
            line: item.as_ref(),
        })
    }
}

/// Byte-addressed source over a newline-delimited buffer
pub struct ByteSource<'a> {
    data: &'a [u8],
}

impl<'a> ByteSource<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl LineSource for ByteSource<'_> {
    fn span(&self) -> Range<u64> {
        0..self.data.len() as u64
    }

    fn entry_at(&mut self, position: u64, floor: u64) -> Result<Entry<'_>> {
        let pos = position as usize;
        let floor = floor as usize;
        if pos >= self.data.len() || floor > pos {
            return Err(IndexError::InvalidInput(format!(
                "position {} out of range",
                position
            )));
        }

        let start = memrchr(b'\n', &self.data[floor..pos])
            .map(|i| floor + i + 1)
            .unwrap_or(floor);
        let (line_end, end) = match memchr(b'\n', &self.data[pos..]) {
            Some(i) => (pos + i, pos + i + 1),
            None => (self.data.len(), self.data.len()),
        };

        Ok(Entry {
            start: start as u64,
            end: end as u64,
            line: &self.data[start..line_end],
        })
    }
}

/// Byte-addressed source over a region of a file, read through seeks.
///
/// Holds one line and one scan chunk in memory at a time. Each instance owns
/// its file handle, so concurrent searches never share a cursor.
pub struct SeekSource {
    file: File,
    base: u64,
    len: u64,
    chunk: Vec<u8>,
    line: Vec<u8>,
}

impl SeekSource {
    /// Open the region `[offset, offset + len)` of a file
    pub fn open(path: &Path, offset: u64, len: u64) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            file,
            base: offset,
            len,
            chunk: Vec::with_capacity(SCAN_CHUNK),
            line: Vec::new(),
        })
    }

    /// Read `[from, from + count)` of the region into the scan chunk
    fn read_chunk(&mut self, from: u64, count: usize) -> Result<()> {
        self.chunk.resize(count, 0);
        self.file.seek(SeekFrom::Start(self.base + from))?;
        self.file.read_exact(&mut self.chunk)?;
        Ok(())
    }

    /// Start of the line containing `position`, not before `floor`
    fn line_start(&mut self, position: u64, floor: u64) -> Result<u64> {
        let mut cursor = position;
        while cursor > floor {
            let from = cursor.saturating_sub(SCAN_CHUNK as u64).max(floor);
            self.read_chunk(from, (cursor - from) as usize)?;
            if let Some(i) = memrchr(b'\n', &self.chunk) {
                return Ok(from + i as u64 + 1);
            }
            cursor = from;
        }
        Ok(floor)
    }
}

impl LineSource for SeekSource {
    fn span(&self) -> Range<u64> {
        0..self.len
    }

    fn entry_at(&mut self, position: u64, floor: u64) -> Result<Entry<'_>> {
        if position >= self.len || floor > position {
            return Err(IndexError::InvalidInput(format!(
                "position {} out of range",
                position
            )));
        }

        let start = self.line_start(position, floor)?;

        self.line.clear();
        let mut cursor = start;
        let end = loop {
            if cursor >= self.len {
                break self.len;
            }
            let count = SCAN_CHUNK.min((self.len - cursor) as usize);
            self.read_chunk(cursor, count)?;
            if let Some(i) = memchr(b'\n', &self.chunk) {
                self.line.extend_from_slice(&self.chunk[..i]);
                break cursor + i as u64 + 1;
            }
            self.line.extend_from_slice(&self.chunk);
            cursor += count as u64;
        };

        Ok(Entry {
            start,
            end,
            line: &self.line,
        })
    }
}
