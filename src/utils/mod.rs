//! Shared building blocks.
//!
//! - [`search`] - one binary search over index, byte and file-backed line sources
//! - [`merge`] - deduplicating k-way merge of sorted line streams
//! - [`lines`] - newline-delimited line files
//! - [`progress`] - percentage progress reporting
//! - [`config`] - config file for the `fli` binary

pub mod config;
pub mod lines;
pub mod merge;
pub mod progress;
pub mod search;

pub use config::*;
pub use lines::FileLines;
pub use merge::KWayMerge;
pub use progress::Progress;
pub use search::*;
