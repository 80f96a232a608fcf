use crate::error::{IndexError, Result};
use serde::{Deserialize, Serialize};

/// A line is an opaque byte sequence ordered bytewise
pub type Line = Vec<u8>;

/// Name of the metadata file inside a resource directory
pub const META_FILE: &str = "index.meta";

/// Temporary name the metadata is written under before the commit rename
pub const META_TEMP_FILE: &str = "index.meta.tmp";

/// Magic number for the metadata file
pub const META_MAGIC: u32 = 0x4D494C46; // "FLIM" in little-endian

/// Current version of the metadata format
pub const META_VERSION: u32 = 1;

/// Allowed range for every batch count option
pub const FILE_COUNT_LIMITS: (usize, usize) = (1, 1_000_000_000);

/// Where a batch lives on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchLocator {
    /// File name relative to the resource directory
    pub file_name: String,
    pub byte_offset: u64,
    pub byte_length: u64,
    pub line_count: u64,
}

/// One row of the boundary table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    pub first_line: Line,
    pub locator: BatchLocator,
}

impl AsRef<[u8]> for BatchEntry {
    fn as_ref(&self) -> &[u8] {
        &self.first_line
    }
}

/// Boundary metadata plus the bookkeeping needed to reopen an index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMeta {
    pub version: u32,
    /// Build number; batch file names carry it so a rebuild never
    /// overwrites files the committed metadata still references
    pub generation: u64,
    pub total_line_count: u64,
    /// Greatest indexed line (empty when the index is empty)
    pub last_line: Line,
    pub batches: Vec<BatchEntry>,
}

impl IndexMeta {
    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    pub fn max_batch_bytes(&self) -> u64 {
        self.batches
            .iter()
            .map(|b| b.locator.byte_length)
            .max()
            .unwrap_or(0)
    }
}

/// How much preprocessing the indexer runs over its inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preprocess {
    /// Inputs already form one strictly increasing stream, in order
    None,
    /// Each input is sorted; merge them
    Merge,
    /// Arbitrary inputs; sort each, then merge
    #[default]
    SortAndMerge,
}

/// Intra-batch search strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Read the whole batch, then search in memory
    FullLoad,
    /// Binary search by seeking into the batch file
    Seek,
    /// Memory-map every batch file at open
    Mapped,
    /// Full load for small batches, seek otherwise
    #[default]
    Auto,
}

/// Batch count policy for the indexer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerOptions {
    pub min_file_count: usize,
    pub max_file_count: usize,
    /// Exact batch count to use instead of the size-based policy
    pub wanted_file_count: Option<usize>,
    /// Batch size the size-based policy aims for
    pub target_batch_bytes: u64,
    /// Build an always-false index from empty input instead of failing
    pub allow_empty: bool,
}

impl IndexerOptions {
    pub const DEFAULT_MIN_FILE_COUNT: usize = 1;
    pub const DEFAULT_MAX_FILE_COUNT: usize = 1_000_000;
    pub const DEFAULT_TARGET_BATCH_BYTES: u64 = 1024 * 1024;

    pub fn new(min_file_count: usize, max_file_count: usize) -> Self {
        Self {
            min_file_count,
            max_file_count,
            ..Self::default()
        }
    }

    pub fn with_wanted_file_count(mut self, count: usize) -> Self {
        self.wanted_file_count = Some(count);
        self
    }

    pub fn validate(&self) -> Result<()> {
        let (low, high) = FILE_COUNT_LIMITS;
        let counts = [
            Some(self.min_file_count),
            Some(self.max_file_count),
            self.wanted_file_count,
        ];
        for count in counts.into_iter().flatten() {
            if count < low || count > high {
                return Err(IndexError::InvalidOptions(format!(
                    "file count {} is outside {}..={}",
                    count, low, high
                )));
            }
        }
        if self.min_file_count > self.max_file_count {
            return Err(IndexError::InvalidOptions(format!(
                "min_file_count {} exceeds max_file_count {}",
                self.min_file_count, self.max_file_count
            )));
        }
        if let Some(wanted) = self.wanted_file_count {
            if wanted < self.min_file_count || wanted > self.max_file_count {
                return Err(IndexError::InvalidOptions(format!(
                    "wanted_file_count {} is outside {}..={}",
                    wanted, self.min_file_count, self.max_file_count
                )));
            }
        }
        if self.target_batch_bytes == 0 {
            return Err(IndexError::InvalidOptions(
                "target_batch_bytes must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for IndexerOptions {
    fn default() -> Self {
        Self {
            min_file_count: Self::DEFAULT_MIN_FILE_COUNT,
            max_file_count: Self::DEFAULT_MAX_FILE_COUNT,
            wanted_file_count: None,
            target_batch_bytes: Self::DEFAULT_TARGET_BATCH_BYTES,
            allow_empty: true,
        }
    }
}

/// Query-side configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    pub mode: SearchMode,
    /// Largest batch (bytes) `Auto` still loads in full
    pub full_load_limit: u64,
    /// Number of fully loaded batches kept in an LRU cache (0 disables it)
    pub cache_batches: usize,
}

impl QueryOptions {
    pub fn with_mode(mode: SearchMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            mode: SearchMode::Auto,
            full_load_limit: 4 * 1024 * 1024,
            cache_batches: 0,
        }
    }
}

/// Summary of an open index
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub version: u32,
    pub generation: u64,
    pub line_count: u64,
    pub batch_count: usize,
    pub total_bytes: u64,
    pub max_batch_bytes: u64,
    pub min_batch_lines: u64,
    pub max_batch_lines: u64,
    pub mode: SearchMode,
}
