//! Membership queries against a committed index
//!
//! A lookup is two binary searches: one over the in-memory boundary table
//! to pick the only batch that could hold the line, then one inside that
//! batch. How the batch is read depends on the [`SearchMode`].

use super::storage::{BatchedStorage, LoadedBatch, MappedBatch, find_batch};
use super::types::*;
use crate::error::{IndexError, Result};
use crate::utils::search::{ByteSource, binary_search};
use lru::LruCache;
use memchr::memchr;
use rayon::prelude::*;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

/// Anything that answers "is this line in the set?"
pub trait LineIndex {
    fn has(&self, line: &[u8]) -> bool;
}

enum Backend {
    /// Load the whole batch per query, optionally caching recent batches
    Full {
        cache: Option<Mutex<LruCache<usize, Arc<LoadedBatch>>>>,
    },
    /// Fresh file handle per query
    Seek,
    Mapped(Vec<MappedBatch>),
}

/// An open, read-only index.
///
/// Safe to share across threads; every query either opens its own file
/// handle or reads immutable memory.
pub struct Index {
    storage: BatchedStorage,
    backend: Backend,
}

impl Index {
    pub fn open(dir: &Path, options: &QueryOptions) -> Result<Self> {
        let storage = BatchedStorage::open(dir)?;
        Self::from_storage(storage, options)
    }

    pub(crate) fn from_storage(storage: BatchedStorage, options: &QueryOptions) -> Result<Self> {
        let full = || Backend::Full {
            cache: NonZeroUsize::new(options.cache_batches).map(|n| Mutex::new(LruCache::new(n))),
        };
        let backend = match options.mode {
            SearchMode::FullLoad => full(),
            SearchMode::Seek => Backend::Seek,
            SearchMode::Mapped => Backend::Mapped(storage.map_batches()?),
            SearchMode::Auto if storage.meta().max_batch_bytes() <= options.full_load_limit => full(),
            SearchMode::Auto => Backend::Seek,
        };

        let index = Self { storage, backend };
        tracing::debug!(
            "opened index at {} ({} lines, {} batches, {:?})",
            index.storage.dir().display(),
            index.line_count(),
            index.batch_count(),
            index.resolved_mode()
        );
        Ok(index)
    }

    /// Membership test. I/O faults are logged and reported as absent;
    /// use [`Index::try_has`] to see them.
    pub fn has(&self, line: &[u8]) -> bool {
        match self.try_has(line) {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!("lookup failed: {}", e);
                false
            }
        }
    }

    pub fn try_has(&self, line: &[u8]) -> Result<bool> {
        // Never a member: contains a delimiter, or outside [first, last]
        if memchr(b'\n', line).is_some() {
            return Ok(false);
        }
        let meta = self.storage.meta();
        let Some(first) = meta.batches.first() else {
            return Ok(false);
        };
        if line < first.first_line.as_slice() || line > meta.last_line.as_slice() {
            return Ok(false);
        }

        let Some(batch) = find_batch(&meta.batches, line)? else {
            return Ok(false);
        };
        if meta.batches[batch].first_line == line {
            return Ok(true);
        }
        tracing::trace!("searching batch {} for a {}-byte line", batch, line.len());
        self.search_batch(batch, line)
    }

    fn search_batch(&self, batch: usize, line: &[u8]) -> Result<bool> {
        let locator = &self.storage.meta().batches[batch].locator;
        match &self.backend {
            Backend::Full { cache } => self.loaded_batch(batch, cache.as_ref())?.contains(line),
            Backend::Seek => {
                let mut source = self.storage.seek_source(locator)?;
                Ok(binary_search(&mut source, line)?.is_found())
            }
            Backend::Mapped(maps) => {
                let mut source = ByteSource::new(maps[batch].bytes());
                Ok(binary_search(&mut source, line)?.is_found())
            }
        }
    }

    fn loaded_batch(
        &self,
        batch: usize,
        cache: Option<&Mutex<LruCache<usize, Arc<LoadedBatch>>>>,
    ) -> Result<Arc<LoadedBatch>> {
        let locator = &self.storage.meta().batches[batch].locator;
        let Some(cache) = cache else {
            return Ok(Arc::new(self.storage.load_batch(locator)?));
        };

        if let Some(hit) = cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&batch)
        {
            return Ok(Arc::clone(hit));
        }

        let loaded = Arc::new(self.storage.load_batch(locator)?);
        cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(batch, Arc::clone(&loaded));
        Ok(loaded)
    }

    pub fn is_empty(&self) -> bool {
        self.storage.meta().batches.is_empty()
    }

    pub fn line_count(&self) -> u64 {
        self.storage.meta().total_line_count
    }

    pub fn batch_count(&self) -> usize {
        self.storage.meta().batch_count()
    }

    pub fn meta(&self) -> &IndexMeta {
        self.storage.meta()
    }

    pub fn dir(&self) -> &Path {
        self.storage.dir()
    }

    /// Search mode in effect after resolving [`SearchMode::Auto`]
    pub fn resolved_mode(&self) -> SearchMode {
        match self.backend {
            Backend::Full { .. } => SearchMode::FullLoad,
            Backend::Seek => SearchMode::Seek,
            Backend::Mapped(_) => SearchMode::Mapped,
        }
    }

    pub fn stats(&self) -> IndexStats {
        let meta = self.storage.meta();
        let lines = meta.batches.iter().map(|b| b.locator.line_count);
        IndexStats {
            version: meta.version,
            generation: meta.generation,
            line_count: meta.total_line_count,
            batch_count: meta.batch_count(),
            total_bytes: meta.batches.iter().map(|b| b.locator.byte_length).sum(),
            max_batch_bytes: meta.max_batch_bytes(),
            min_batch_lines: lines.clone().min().unwrap_or(0),
            max_batch_lines: lines.max().unwrap_or(0),
            mode: self.resolved_mode(),
        }
    }

    /// Read every batch and check it against the metadata and its
    /// neighbours
    pub fn verify(&self) -> Result<()> {
        let meta = self.storage.meta();
        let edges = meta
            .batches
            .par_iter()
            .enumerate()
            .map(|(i, batch)| self.verify_batch(i, batch))
            .collect::<Result<Vec<_>>>()?;

        for (i, pair) in edges.windows(2).enumerate() {
            if pair[0].1 >= pair[1].0 {
                return Err(IndexError::corrupt(format!(
                    "batches {} and {} overlap",
                    i,
                    i + 1
                )));
            }
        }
        if let Some((_, last)) = edges.last() {
            if *last != meta.last_line {
                return Err(IndexError::corrupt(
                    "last line of the final batch does not match the metadata",
                ));
            }
        }

        tracing::info!("verified {} batches", edges.len());
        Ok(())
    }

    /// Check one batch; returns its first and last line
    fn verify_batch(&self, i: usize, batch: &BatchEntry) -> Result<(Line, Line)> {
        let loaded = self.storage.load_batch(&batch.locator)?;

        let mut previous: Option<&[u8]> = None;
        for line in loaded.lines() {
            if previous.is_some_and(|p| line <= p) {
                return Err(IndexError::corrupt(format!(
                    "batch {} is not strictly increasing",
                    i
                )));
            }
            previous = Some(line);
        }

        match (loaded.first(), loaded.last()) {
            (Some(first), Some(last)) if first == batch.first_line.as_slice() => {
                Ok((first.to_vec(), last.to_vec()))
            }
            _ => Err(IndexError::corrupt(format!(
                "batch {} does not start with its boundary line",
                i
            ))),
        }
    }
}

impl LineIndex for Index {
    fn has(&self, line: &[u8]) -> bool {
        Index::has(self, line)
    }
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("dir", &self.storage.dir())
            .field("lines", &self.line_count())
            .field("batches", &self.batch_count())
            .field("mode", &self.resolved_mode())
            .finish()
    }
}
