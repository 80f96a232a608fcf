//! # fli - file line index
//!
//! Disk-backed membership index for large, rarely changing sets of lines.
//! Answers one question, "is this exact line in the set?", with bounded
//! latency and resident memory.
//!
//! ## Architecture
//!
//! - [`index`] - preprocessing, batched storage, index construction and queries
//! - [`utils`] - binary search, k-way merge, line files, progress, config
//! - [`error`] - the [`IndexError`](error::IndexError) classes
//!
//! Building runs in three stages. Input files are sorted one at a time,
//! merged into one deduplicated stream, and the stream is cut into batch
//! files whose first lines form an in-memory boundary table. A lookup
//! binary searches the boundary table for the single batch that could hold
//! the line, then searches inside that batch by loading it, seeking through
//! it, or reading a memory map of it.
//!
//! ## Quick Start
//!
//! ```no_run
//! use fli::index::{Indexer, IndexerOptions};
//!
//! let indexer = Indexer::new("/tmp/words-index", IndexerOptions::default())?;
//! let index = indexer.index(&["/usr/share/dict/words"])?;
//!
//! assert!(index.has(b"hello"));
//!
//! // Later, from another process
//! let index = indexer.load_index()?;
//! println!("{} lines in {} batches", index.line_count(), index.batch_count());
//! # Ok::<(), fli::error::IndexError>(())
//! ```

pub mod error;
pub mod index;
pub mod utils;

pub use error::{IndexError, Result};
pub use index::{Index, Indexer, LineIndex};
