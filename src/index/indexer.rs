//! Index construction
//!
//! An [`Indexer`] owns a resource directory and the batch count policy. It
//! runs the requested preprocessing, counts the resulting stream, picks the
//! batch count and boundaries, and hands the stream to batched storage. The
//! result is always an open [`Index`].

use super::preprocess::{are_valid_lines, merge_sorted_files, preprocess_lines, sort_files_together};
use super::query::Index;
use super::storage::{next_generation, write_batches};
use super::types::*;
use crate::error::{IndexError, Result};
use crate::utils::lines::{FileLines, count_file};
use crate::utils::progress::Progress;
use std::fs;
use std::path::{Path, PathBuf};

/// Scratch directory for separately sorted inputs
const SORT_DIR: &str = "sort";

/// Scratch directory for merged inputs
const MERGE_DIR: &str = "merge";

/// Builds indexes into one resource directory
#[derive(Debug, Clone)]
pub struct Indexer {
    resource_dir: PathBuf,
    options: IndexerOptions,
    query_options: QueryOptions,
}

impl Indexer {
    /// Create an indexer. Options are validated before anything touches disk.
    pub fn new(resource_dir: impl Into<PathBuf>, options: IndexerOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            resource_dir: resource_dir.into(),
            options,
            query_options: QueryOptions::default(),
        })
    }

    /// Query options used for the index returned by a build
    pub fn with_query_options(mut self, query_options: QueryOptions) -> Self {
        self.query_options = query_options;
        self
    }

    pub fn resource_dir(&self) -> &Path {
        &self.resource_dir
    }

    pub fn options(&self) -> &IndexerOptions {
        &self.options
    }

    /// Index arbitrary files (sorted, merged and deduplicated first)
    pub fn index<P: AsRef<Path>>(&self, paths: &[P]) -> Result<Index> {
        self.index_files(paths, Preprocess::SortAndMerge, &mut Progress::hidden())
    }

    pub fn index_files<P: AsRef<Path>>(
        &self,
        paths: &[P],
        preprocess: Preprocess,
        progress: &mut Progress,
    ) -> Result<Index> {
        fs::create_dir_all(&self.resource_dir)?;

        let sort_dir = self.resource_dir.join(SORT_DIR);
        let merge_dir = self.resource_dir.join(MERGE_DIR);
        let result = self.build_from_files(paths, preprocess, progress, &sort_dir, &merge_dir);

        for dir in [&sort_dir, &merge_dir] {
            if dir.exists() {
                if let Err(e) = fs::remove_dir_all(dir) {
                    tracing::warn!("could not remove {}: {}", dir.display(), e);
                }
            }
        }
        progress.report_done();
        result
    }

    fn build_from_files<P: AsRef<Path>>(
        &self,
        paths: &[P],
        preprocess: Preprocess,
        progress: &mut Progress,
        sort_dir: &Path,
        merge_dir: &Path,
    ) -> Result<Index> {
        let inputs: Vec<PathBuf> = match preprocess {
            Preprocess::None => paths.iter().map(|p| p.as_ref().to_path_buf()).collect(),
            Preprocess::Merge => merge_sorted_files(paths, merge_dir, progress)?,
            Preprocess::SortAndMerge => sort_files_together(paths, merge_dir, sort_dir, progress)?,
        };

        let mut line_count = 0u64;
        let mut byte_count = 0u64;
        for path in &inputs {
            let (lines, bytes) = count_file(path)?;
            line_count += lines;
            byte_count += bytes;
        }

        let sources = inputs
            .iter()
            .map(|path| FileLines::open(path))
            .collect::<Result<Vec<_>>>()?;
        self.build(sources.into_iter().flatten(), line_count, byte_count)
    }

    /// Index an in-memory list of lines
    pub fn index_lines<I, L>(&self, lines: I) -> Result<Index>
    where
        I: IntoIterator<Item = L>,
        L: AsRef<[u8]>,
    {
        let lines: Vec<Line> = lines.into_iter().map(|l| l.as_ref().to_vec()).collect();
        if !are_valid_lines(&lines) {
            return Err(IndexError::InvalidInput(
                "lines passed for indexing must not contain newlines".to_string(),
            ));
        }
        let lines = preprocess_lines(lines);
        let line_count = lines.len() as u64;
        let byte_count = lines.iter().map(|l| l.len() as u64 + 1).sum();

        fs::create_dir_all(&self.resource_dir)?;
        self.build(lines.into_iter().map(Ok), line_count, byte_count)
    }

    fn build<I>(&self, stream: I, line_count: u64, byte_count: u64) -> Result<Index>
    where
        I: Iterator<Item = Result<Line>>,
    {
        if line_count == 0 {
            if !self.options.allow_empty {
                return Err(IndexError::EmptyInput);
            }
            tracing::warn!("no lines to index; every lookup will return false");
        }

        let batch_count = self.batch_count(line_count, byte_count);
        let boundaries = batch_boundaries(line_count, batch_count);
        tracing::info!(
            "indexing {} lines ({} bytes) into {} batches",
            line_count,
            byte_count,
            batch_count
        );

        let generation = next_generation(&self.resource_dir);
        let storage = write_batches(&self.resource_dir, stream, &boundaries, generation)?;
        Index::from_storage(storage, &self.query_options)
    }

    /// Number of batches for a stream of `line_count` lines and `byte_count` bytes.
    ///
    /// Without a wanted count this is one batch per `target_batch_bytes`
    /// (1 MiB by default), clamped to `[min_file_count, max_file_count]`, so
    /// inputs smaller than the target always collapse to `min_file_count`
    /// batches. The result never exceeds `line_count`.
    pub fn batch_count(&self, line_count: u64, byte_count: u64) -> usize {
        if line_count == 0 {
            return 0;
        }

        let options = &self.options;
        let wanted = match options.wanted_file_count {
            Some(count) => count,
            None => byte_count
                .div_ceil(options.target_batch_bytes)
                .clamp(options.min_file_count as u64, options.max_file_count as u64)
                as usize,
        };

        // A batch holds at least one line
        if wanted as u64 > line_count {
            tracing::warn!(
                "only {} lines to index; using {} batches instead of {}",
                line_count,
                line_count,
                wanted
            );
            return line_count as usize;
        }
        wanted
    }

    /// Reopen the committed index with default query options
    pub fn load_index(&self) -> Result<Index> {
        self.load_index_with(&self.query_options)
    }

    pub fn load_index_with(&self, query_options: &QueryOptions) -> Result<Index> {
        Index::open(&self.resource_dir, query_options)
    }

    /// Remove the resource directory and everything in it
    pub fn drop_index(&self) -> Result<()> {
        if self.resource_dir.exists() {
            fs::remove_dir_all(&self.resource_dir)?;
            tracing::info!("dropped index at {}", self.resource_dir.display());
        }
        Ok(())
    }
}

/// Start position of each of `batch_count` batches over `line_count` lines:
/// batch `i` holds positions `[n*i/k, n*(i+1)/k)`
pub fn batch_boundaries(line_count: u64, batch_count: usize) -> Vec<u64> {
    let k = batch_count as u128;
    (0..k)
        .map(|i| (line_count as u128 * i / k) as u64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn indexer(dir: &Path, options: IndexerOptions) -> Indexer {
        Indexer::new(dir.join("index"), options).unwrap()
    }

    #[test]
    fn test_batch_boundaries() {
        assert_eq!(batch_boundaries(10, 3), vec![0, 3, 6]);
        assert_eq!(batch_boundaries(3, 3), vec![0, 1, 2]);
        assert_eq!(batch_boundaries(7, 1), vec![0]);
        assert!(batch_boundaries(0, 0).is_empty());
    }

    #[test]
    fn test_batch_count_policy() {
        let dir = tempdir().unwrap();
        let mut options = IndexerOptions::new(2, 8);
        options.target_batch_bytes = 100;
        let indexer = indexer(dir.path(), options);

        // Size-based, clamped to [min, max]
        assert_eq!(indexer.batch_count(1000, 50), 2);
        assert_eq!(indexer.batch_count(1000, 450), 5);
        assert_eq!(indexer.batch_count(1000, 100_000), 8);
        // Capped at the line count
        assert_eq!(indexer.batch_count(3, 100_000), 3);
        assert_eq!(indexer.batch_count(0, 0), 0);
    }

    #[test]
    fn test_small_input_collapses_to_min_file_count() {
        let dir = tempdir().unwrap();
        let narrow = indexer(dir.path(), IndexerOptions::new(1, 2));
        assert_eq!(narrow.batch_count(3, 6), 1);

        let wide = indexer(dir.path(), IndexerOptions::new(2, 4));
        assert_eq!(wide.batch_count(3, 6), 2);
    }

    #[test]
    fn test_batch_count_is_monotonic() {
        let dir = tempdir().unwrap();
        let mut options = IndexerOptions::new(1, 50);
        options.target_batch_bytes = 64;
        let indexer = indexer(dir.path(), options);

        let mut previous = 0;
        for bytes in (0..10_000).step_by(37) {
            let count = indexer.batch_count(1_000, bytes);
            assert!(count >= previous);
            previous = count;
        }
    }

    #[test]
    fn test_wanted_file_count_wins() {
        let dir = tempdir().unwrap();
        let indexer = indexer(dir.path(), IndexerOptions::new(1, 10).with_wanted_file_count(4));
        assert_eq!(indexer.batch_count(100, 1), 4);
        assert_eq!(indexer.batch_count(2, 1), 2);
    }

    #[test]
    fn test_invalid_options_fail_before_io() {
        let dir = tempdir().unwrap();
        let resource_dir = dir.path().join("index");
        let err = Indexer::new(&resource_dir, IndexerOptions::new(5, 1)).unwrap_err();
        assert!(matches!(err, IndexError::InvalidOptions(_)));
        assert!(!resource_dir.exists());
    }

    #[test]
    fn test_index_lines() {
        let dir = tempdir().unwrap();
        let indexer = indexer(dir.path(), IndexerOptions::new(1, 3).with_wanted_file_count(3));
        let index = indexer.index_lines(["pear", "apple", "fig", "apple", ""]).unwrap();

        assert_eq!(index.line_count(), 4);
        assert_eq!(index.batch_count(), 3);
        for line in ["", "apple", "fig", "pear"] {
            assert!(index.has(line.as_bytes()), "{:?}", line);
        }
        assert!(!index.has(b"kiwi"));
    }

    #[test]
    fn test_index_lines_rejects_newlines() {
        let dir = tempdir().unwrap();
        let indexer = indexer(dir.path(), IndexerOptions::default());
        let err = indexer.index_lines(["ok", "not\nok"]).unwrap_err();
        assert!(matches!(err, IndexError::InvalidInput(_)));
    }

    #[test]
    fn test_strict_empty_input() {
        let dir = tempdir().unwrap();
        let options = IndexerOptions {
            allow_empty: false,
            ..IndexerOptions::default()
        };
        let indexer = indexer(dir.path(), options);
        let err = indexer.index_lines(Vec::<&str>::new()).unwrap_err();
        assert!(matches!(err, IndexError::EmptyInput));
    }

    #[test]
    fn test_scratch_dirs_are_removed() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("input");
        fs::write(&input, "b\na\nc\n").unwrap();

        let indexer = indexer(dir.path(), IndexerOptions::default());
        indexer.index(&[&input]).unwrap();
        assert!(!indexer.resource_dir().join(SORT_DIR).exists());
        assert!(!indexer.resource_dir().join(MERGE_DIR).exists());
        assert!(input.exists());
    }

    #[test]
    fn test_drop_index() {
        let dir = tempdir().unwrap();
        let indexer = indexer(dir.path(), IndexerOptions::default());
        indexer.index_lines(["a"]).unwrap();
        assert!(indexer.resource_dir().exists());

        indexer.drop_index().unwrap();
        assert!(!indexer.resource_dir().exists());
        assert!(indexer.load_index().is_err());
        indexer.drop_index().unwrap();
    }
}
