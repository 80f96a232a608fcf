//! Building and querying line indexes
//!
//! - [`preprocess`] - sorting, merging and splitting of raw line files
//! - [`storage`] - batch files and the committed boundary metadata
//! - [`indexer`] - batch count policy and index construction
//! - [`query`] - membership lookups against an open index
//! - [`memory`] - in-memory reference index

pub mod indexer;
pub mod memory;
pub mod preprocess;
pub mod query;
pub mod storage;
pub mod types;

pub use indexer::Indexer;
pub use memory::MemoryIndex;
pub use preprocess::{SplitStrategy, merge_sorted_files, sort_files_separately};
pub use query::{Index, LineIndex};
pub use types::*;
