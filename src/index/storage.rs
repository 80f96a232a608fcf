//! Batched on-disk storage
//!
//! A resource directory holds one file per batch plus `index.meta`:
//!
//! ```text
//! batch_<generation>_<n>.dat   newline-terminated lines, strictly increasing
//! index.meta                   header, last line, per-batch locators, CRC32
//! ```
//!
//! `index.meta` is written last, under a temporary name, synced and renamed
//! into place. Batch file names carry the build generation, so a failed
//! rebuild never touches files the committed metadata still points at.

use super::types::*;
use crate::error::{IndexError, Result};
use crate::utils::search::{
    Entry, LineSource, SeekSource, SliceSource, binary_search, floor_index,
};
use memchr::{memchr, memchr_iter};
use memmap2::Mmap;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

/// magic + version + generation + total_line_count + batch_count
const META_HEADER_SIZE: usize = 4 + 4 + 8 + 8 + 4;

/// Trailing CRC32 of everything before it
const META_CHECKSUM_SIZE: usize = 4;

const WRITE_BUFFER_SIZE: usize = 65536;

/// File name of batch `index` in build `generation`
pub fn batch_file_name(generation: u64, index: usize) -> String {
    format!("batch_{:04}_{:06}.dat", generation, index)
}

fn is_batch_file_name(name: &str) -> bool {
    name.starts_with("batch_") && name.ends_with(".dat")
}

/// Read-only handle to a committed resource directory
#[derive(Debug)]
pub struct BatchedStorage {
    dir: PathBuf,
    meta: IndexMeta,
}

impl BatchedStorage {
    /// Open a resource directory, validating metadata and batch files
    pub fn open(dir: &Path) -> Result<Self> {
        let meta = load_metadata(dir)?;
        check_batch_files(dir, &meta)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            meta,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    pub fn batch_path(&self, locator: &BatchLocator) -> PathBuf {
        self.dir.join(&locator.file_name)
    }

    /// Read a whole batch into memory
    pub fn load_batch(&self, locator: &BatchLocator) -> Result<LoadedBatch> {
        let file = File::open(self.batch_path(locator))?;
        let file_len = file.metadata()?.len();
        let length = locator
            .byte_offset
            .checked_add(locator.byte_length)
            .filter(|&end| end <= file_len)
            .and_then(|_| usize::try_from(locator.byte_length).ok())
            .ok_or_else(|| {
                IndexError::corrupt(format!("batch {} lies outside its file", locator.file_name))
            })?;
        let mut data = vec![0u8; length];
        read_exact_at(&file, locator.byte_offset, &mut data)?;

        let batch = LoadedBatch::from_bytes(data)?;
        if batch.len() as u64 != locator.line_count {
            return Err(IndexError::corrupt(format!(
                "batch {} holds {} lines, metadata says {}",
                locator.file_name,
                batch.len(),
                locator.line_count
            )));
        }
        Ok(batch)
    }

    /// Seek-based source over one batch, with its own file handle
    pub fn seek_source(&self, locator: &BatchLocator) -> Result<SeekSource> {
        SeekSource::open(
            &self.batch_path(locator),
            locator.byte_offset,
            locator.byte_length,
        )
    }

    /// Line covering byte `position` of a batch
    pub fn line_at(&self, locator: &BatchLocator, position: u64) -> Result<Line> {
        let mut source = self.seek_source(locator)?;
        let entry = source.entry_at(position, 0)?;
        Ok(entry.line.to_vec())
    }

    /// Memory-map every batch, in batch order
    pub fn map_batches(&self) -> Result<Vec<MappedBatch>> {
        self.meta
            .batches
            .iter()
            .map(|batch| -> Result<MappedBatch> {
                let file = File::open(self.batch_path(&batch.locator))?;
                let map = unsafe { Mmap::map(&file)? };
                let region = usize::try_from(batch.locator.byte_offset)
                    .ok()
                    .zip(usize::try_from(batch.locator.byte_length).ok())
                    .and_then(|(start, len)| Some(start..start.checked_add(len)?));
                let range = match region {
                    Some(range) if range.end <= map.len() => range,
                    _ => {
                        return Err(IndexError::corrupt(format!(
                            "batch file {} truncated",
                            batch.locator.file_name
                        )));
                    }
                };
                Ok(MappedBatch { map, range })
            })
            .collect()
    }
}

/// Memory-mapped batch region
pub struct MappedBatch {
    map: Mmap,
    range: Range<usize>,
}

impl MappedBatch {
    pub fn bytes(&self) -> &[u8] {
        &self.map[self.range.clone()]
    }
}

/// A batch held in memory: the raw bytes plus the start of every line
#[derive(Debug)]
pub struct LoadedBatch {
    data: Vec<u8>,
    /// Line starts followed by `data.len()`
    bounds: Vec<usize>,
}

impl LoadedBatch {
    fn from_bytes(data: Vec<u8>) -> Result<Self> {
        if !data.is_empty() && data.last() != Some(&b'\n') {
            return Err(IndexError::corrupt("batch does not end with a newline"));
        }
        let mut bounds = Vec::with_capacity(data.len() / 8 + 2);
        bounds.push(0);
        bounds.extend(memchr_iter(b'\n', &data).map(|i| i + 1));
        Ok(Self { data, bounds })
    }

    pub fn len(&self) -> usize {
        self.bounds.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn line(&self, i: usize) -> Option<&[u8]> {
        let start = *self.bounds.get(i)?;
        let next = *self.bounds.get(i + 1)?;
        Some(&self.data[start..next - 1])
    }

    pub fn lines(&self) -> impl Iterator<Item = &[u8]> + '_ {
        (0..self.len()).filter_map(move |i| self.line(i))
    }

    pub fn first(&self) -> Option<&[u8]> {
        self.line(0)
    }

    pub fn last(&self) -> Option<&[u8]> {
        self.len().checked_sub(1).and_then(|i| self.line(i))
    }

    /// Index-addressed source over the loaded lines
    pub fn source(&self) -> LoadedSource<'_> {
        LoadedSource { batch: self }
    }

    pub fn contains(&self, line: &[u8]) -> Result<bool> {
        Ok(binary_search(&mut self.source(), line)?.is_found())
    }
}

/// [`LineSource`] over a [`LoadedBatch`]
pub struct LoadedSource<'a> {
    batch: &'a LoadedBatch,
}

impl LineSource for LoadedSource<'_> {
    fn span(&self) -> Range<u64> {
        0..self.batch.len() as u64
    }

    fn entry_at(&mut self, position: u64, _floor: u64) -> Result<Entry<'_>> {
        let line = self.batch.line(position as usize).ok_or_else(|| {
            IndexError::InvalidInput(format!("position {} out of range", position))
        })?;
        Ok(Entry {
            start: position,
            end: position + 1,
            line,
        })
    }
}

/// Split a strictly increasing stream into batches and commit the metadata.
///
/// `boundaries` holds the stream position each batch starts at; the first
/// is 0 and the last batch takes everything that remains. Metadata is only
/// committed after every batch file has been written and synced; on failure
/// the batch files of this generation are removed and any previously
/// committed index is left as it was.
pub fn write_batches<I>(
    dir: &Path,
    stream: I,
    boundaries: &[u64],
    generation: u64,
) -> Result<BatchedStorage>
where
    I: IntoIterator<Item = Result<Line>>,
{
    if boundaries.first().is_some_and(|&b| b != 0)
        || boundaries.windows(2).any(|w| w[0] >= w[1])
    {
        return Err(IndexError::InvalidInput(format!(
            "batch boundaries must start at 0 and increase: {:?}",
            boundaries
        )));
    }

    fs::create_dir_all(dir)?;

    let mut written = Vec::with_capacity(boundaries.len());
    let result = write_batch_files(dir, stream.into_iter(), boundaries, generation, &mut written)
        .and_then(|meta| {
            commit_metadata(dir, &meta)?;
            Ok(meta)
        });

    match result {
        Ok(meta) => {
            tracing::info!(
                "committed {} batches ({} lines) in {}",
                meta.batch_count(),
                meta.total_line_count,
                dir.display()
            );
            remove_stale_batches(dir, &meta);
            Ok(BatchedStorage {
                dir: dir.to_path_buf(),
                meta,
            })
        }
        Err(e) => {
            for path in &written {
                if let Err(err) = fs::remove_file(path) {
                    tracing::warn!("could not remove {}: {}", path.display(), err);
                }
            }
            Err(e)
        }
    }
}

fn write_batch_files<I>(
    dir: &Path,
    mut stream: I,
    boundaries: &[u64],
    generation: u64,
    written: &mut Vec<PathBuf>,
) -> Result<IndexMeta>
where
    I: Iterator<Item = Result<Line>>,
{
    let mut batches = Vec::with_capacity(boundaries.len());
    let mut previous: Option<Line> = None;
    let mut position = 0u64;

    for (index, &start) in boundaries.iter().enumerate() {
        let end = boundaries.get(index + 1).copied();
        let file_name = batch_file_name(generation, index);
        let path = dir.join(&file_name);
        written.push(path.clone());

        let mut file = BufWriter::with_capacity(WRITE_BUFFER_SIZE, File::create(&path)?);
        let mut first_line = None;
        let mut byte_length = 0u64;

        while end.is_none_or(|e| position < e) {
            let Some(item) = stream.next() else {
                break;
            };
            let line = item?;
            if memchr(b'\n', &line).is_some() {
                return Err(IndexError::InvalidInput(format!(
                    "line {} contains a newline",
                    position
                )));
            }
            if previous.as_ref().is_some_and(|p| line <= *p) {
                return Err(IndexError::UnsortedInput(format!(
                    "line {} is not greater than the line before it",
                    position
                )));
            }

            file.write_all(&line)?;
            file.write_all(b"\n")?;
            byte_length += line.len() as u64 + 1;
            if first_line.is_none() {
                first_line = Some(line.clone());
            }
            previous = Some(line);
            position += 1;
        }

        let Some(first_line) = first_line else {
            return Err(IndexError::InvalidInput(format!(
                "stream ended before batch {} started",
                index
            )));
        };

        let file = file.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;

        let line_count = position - start;
        tracing::debug!("wrote {} ({} lines, {} bytes)", file_name, line_count, byte_length);
        batches.push(BatchEntry {
            first_line,
            locator: BatchLocator {
                file_name,
                byte_offset: 0,
                byte_length,
                line_count,
            },
        });
    }

    if boundaries.is_empty() {
        if let Some(item) = stream.next() {
            item?;
            return Err(IndexError::InvalidInput(
                "stream has lines but no batch boundaries were given".to_string(),
            ));
        }
    }

    Ok(IndexMeta {
        version: META_VERSION,
        generation,
        total_line_count: position,
        last_line: previous.unwrap_or_default(),
        batches,
    })
}

/// Write metadata under a temporary name, sync, then rename into place
fn commit_metadata(dir: &Path, meta: &IndexMeta) -> Result<()> {
    let temp_path = dir.join(META_TEMP_FILE);
    let mut file = File::create(&temp_path)?;
    file.write_all(&encode_metadata(meta))?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, dir.join(META_FILE))?;
    sync_dir(dir)?;
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

/// Remove batch files the committed metadata does not reference
fn remove_stale_batches(dir: &Path, meta: &IndexMeta) {
    let live: HashSet<&str> = meta
        .batches
        .iter()
        .map(|b| b.locator.file_name.as_str())
        .collect();

    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if is_batch_file_name(name) && !live.contains(name) {
            match fs::remove_file(entry.path()) {
                Ok(()) => tracing::debug!("removed stale batch {}", name),
                Err(e) => tracing::warn!("could not remove stale batch {}: {}", name, e),
            }
        }
    }
}

/// Generation number for the next build in `dir`
pub fn next_generation(dir: &Path) -> u64 {
    load_metadata(dir).map(|m| m.generation + 1).unwrap_or(1)
}

/// Load and validate the metadata of a resource directory
pub fn load_metadata(dir: &Path) -> Result<IndexMeta> {
    let path = dir.join(META_FILE);
    let data = match fs::read(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(IndexError::corrupt(format!(
                "no index metadata in {}",
                dir.display()
            )));
        }
        Err(e) => return Err(e.into()),
    };
    decode_metadata(&data)
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

pub(crate) fn encode_metadata(meta: &IndexMeta) -> Vec<u8> {
    let mut buf = Vec::with_capacity(META_HEADER_SIZE + meta.batches.len() * 64);
    buf.extend_from_slice(&META_MAGIC.to_le_bytes());
    buf.extend_from_slice(&meta.version.to_le_bytes());
    buf.extend_from_slice(&meta.generation.to_le_bytes());
    buf.extend_from_slice(&meta.total_line_count.to_le_bytes());
    buf.extend_from_slice(&(meta.batches.len() as u32).to_le_bytes());
    put_bytes(&mut buf, &meta.last_line);

    for batch in &meta.batches {
        put_bytes(&mut buf, &batch.first_line);
        put_bytes(&mut buf, batch.locator.file_name.as_bytes());
        buf.extend_from_slice(&batch.locator.byte_offset.to_le_bytes());
        buf.extend_from_slice(&batch.locator.byte_length.to_le_bytes());
        buf.extend_from_slice(&batch.locator.line_count.to_le_bytes());
    }

    let checksum = crc32fast::hash(&buf);
    buf.extend_from_slice(&checksum.to_le_bytes());
    buf
}

/// Bounds-checked reader over the metadata body
struct MetaCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> MetaCursor<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| IndexError::corrupt("metadata truncated"))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u32(&mut self) -> Result<u32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(raw))
    }

    fn u64(&mut self) -> Result<u64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(raw))
    }

    fn bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    fn is_at_end(&self) -> bool {
        self.pos == self.data.len()
    }
}

pub(crate) fn decode_metadata(data: &[u8]) -> Result<IndexMeta> {
    if data.len() < META_HEADER_SIZE + META_CHECKSUM_SIZE {
        return Err(IndexError::corrupt("metadata truncated"));
    }

    let (body, checksum) = data.split_at(data.len() - META_CHECKSUM_SIZE);
    let mut cursor = MetaCursor { data: body, pos: 0 };

    if cursor.u32()? != META_MAGIC {
        return Err(IndexError::corrupt("bad metadata magic number"));
    }
    let version = cursor.u32()?;
    if version != META_VERSION {
        return Err(IndexError::corrupt(format!(
            "unsupported metadata version {}",
            version
        )));
    }

    let mut raw = [0u8; 4];
    raw.copy_from_slice(checksum);
    if crc32fast::hash(body) != u32::from_le_bytes(raw) {
        return Err(IndexError::corrupt("metadata checksum mismatch"));
    }

    let generation = cursor.u64()?;
    let total_line_count = cursor.u64()?;
    let batch_count = cursor.u32()? as usize;
    let last_line = cursor.bytes()?.to_vec();

    let mut batches = Vec::with_capacity(batch_count.min(body.len() / 32));
    for _ in 0..batch_count {
        let first_line = cursor.bytes()?.to_vec();
        let file_name = std::str::from_utf8(cursor.bytes()?)
            .map_err(|_| IndexError::corrupt("batch file name is not UTF-8"))?
            .to_string();
        if Path::new(&file_name).file_name().and_then(|n| n.to_str()) != Some(file_name.as_str()) {
            return Err(IndexError::corrupt(format!(
                "batch file name {:?} is not a plain file name",
                file_name
            )));
        }
        batches.push(BatchEntry {
            first_line,
            locator: BatchLocator {
                file_name,
                byte_offset: cursor.u64()?,
                byte_length: cursor.u64()?,
                line_count: cursor.u64()?,
            },
        });
    }

    if !cursor.is_at_end() {
        return Err(IndexError::corrupt(format!(
            "metadata holds more data than its {} batches",
            batch_count
        )));
    }

    let meta = IndexMeta {
        version,
        generation,
        total_line_count,
        last_line,
        batches,
    };
    check_consistency(&meta)?;
    Ok(meta)
}

fn check_consistency(meta: &IndexMeta) -> Result<()> {
    if meta.batches.windows(2).any(|w| w[0].first_line >= w[1].first_line) {
        return Err(IndexError::corrupt("batch boundaries are not ascending"));
    }

    let mut line_sum = 0u64;
    for batch in &meta.batches {
        let locator = &batch.locator;
        if locator.line_count == 0 || locator.byte_length < locator.line_count {
            return Err(IndexError::corrupt(format!(
                "batch {} has inconsistent size ({} lines, {} bytes)",
                locator.file_name, locator.line_count, locator.byte_length
            )));
        }
        if locator.byte_offset.checked_add(locator.byte_length).is_none()
            || usize::try_from(locator.byte_length).is_err()
        {
            return Err(IndexError::corrupt(format!(
                "batch {} has an out-of-range region ({} + {} bytes)",
                locator.file_name, locator.byte_offset, locator.byte_length
            )));
        }
        line_sum = line_sum.checked_add(locator.line_count).ok_or_else(|| {
            IndexError::corrupt(format!(
                "line count of batch {} overflows the total",
                locator.file_name
            ))
        })?;
    }
    if line_sum != meta.total_line_count {
        return Err(IndexError::corrupt(format!(
            "batches hold {} lines, metadata says {}",
            line_sum, meta.total_line_count
        )));
    }

    match meta.batches.last() {
        Some(last) if meta.last_line < last.first_line => Err(IndexError::corrupt(
            "last line sorts before the last batch boundary",
        )),
        None if !meta.last_line.is_empty() => {
            Err(IndexError::corrupt("empty index records a last line"))
        }
        _ => Ok(()),
    }
}

fn check_batch_files(dir: &Path, meta: &IndexMeta) -> Result<()> {
    for batch in &meta.batches {
        let locator = &batch.locator;
        let len = match fs::metadata(dir.join(&locator.file_name)) {
            Ok(m) => m.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(IndexError::corrupt(format!(
                    "batch file {} is missing",
                    locator.file_name
                )));
            }
            Err(e) => return Err(e.into()),
        };
        let end = locator
            .byte_offset
            .checked_add(locator.byte_length)
            .ok_or_else(|| {
                IndexError::corrupt(format!("batch {} region overflows", locator.file_name))
            })?;
        if len < end {
            return Err(IndexError::corrupt(format!(
                "batch file {} is truncated",
                locator.file_name
            )));
        }
    }
    Ok(())
}

#[cfg(unix)]
fn read_exact_at(file: &File, offset: u64, buf: &mut [u8]) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(not(unix))]
fn read_exact_at(mut file: &File, offset: u64, buf: &mut [u8]) -> io::Result<()> {
    use std::io::{Read, Seek, SeekFrom};
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(buf)
}

/// Search the boundary table for the batch that could hold `line`
pub(crate) fn find_batch(batches: &[BatchEntry], line: &[u8]) -> Result<Option<usize>> {
    let outcome = binary_search(&mut SliceSource::new(batches), line)?;
    Ok(floor_index(outcome))
}
