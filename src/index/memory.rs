use super::preprocess::preprocess_lines;
use super::query::LineIndex;
use super::types::Line;
use crate::error::Result;
use crate::utils::lines::read_lines;
use std::path::Path;

/// Whole line set held in memory as one sorted vector.
///
/// Useful as a reference for small sets and in tests; answers the same
/// questions as an on-disk [`Index`](super::Index) built from the same lines.
#[derive(Debug, Clone, Default)]
pub struct MemoryIndex {
    lines: Vec<Line>,
}

impl MemoryIndex {
    pub fn new<I, L>(lines: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: AsRef<[u8]>,
    {
        Self {
            lines: preprocess_lines(lines),
        }
    }

    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut lines = Vec::new();
        for path in paths {
            lines.extend(read_lines(path.as_ref())?);
        }
        Ok(Self::new(lines))
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Sorted, distinct lines
    pub fn lines(&self) -> &[Line] {
        &self.lines
    }
}

impl LineIndex for MemoryIndex {
    fn has(&self, line: &[u8]) -> bool {
        self.lines
            .binary_search_by(|probe| probe.as_slice().cmp(line))
            .is_ok()
    }
}
