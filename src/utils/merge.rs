//! K-way merge of sorted line streams
//!
//! Pulls from P sorted sources through a min-heap keyed on each source's
//! current head. Equal lines, whether repeated inside one source or shared
//! across sources, are emitted once. Memory is one buffered line per source.

use crate::error::{IndexError, Result};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::iter::FusedIterator;

/// Current head of one source
struct Head {
    line: Vec<u8>,
    source: usize,
}

impl PartialEq for Head {
    fn eq(&self, other: &Self) -> bool {
        self.line == other.line && self.source == other.source
    }
}

impl Eq for Head {}

impl PartialOrd for Head {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Head {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse for min-heap
        other
            .line
            .cmp(&self.line)
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Lazy, deduplicating merge over sorted sources.
///
/// Yields `Err(UnsortedInput)` if a source goes backwards. After exhaustion
/// or the first error the iterator only returns `None`; merging again
/// requires reopening the sources.
pub struct KWayMerge<I> {
    sources: Vec<I>,
    heap: BinaryHeap<Head>,
    primed: bool,
    done: bool,
}

impl<I> KWayMerge<I>
where
    I: Iterator<Item = Result<Vec<u8>>>,
{
    pub fn new(sources: Vec<I>) -> Self {
        let heap = BinaryHeap::with_capacity(sources.len());
        Self {
            sources,
            heap,
            primed: false,
            done: false,
        }
    }

    /// Number of sources being merged
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Push the next distinct line of `source` onto the heap
    fn pull(&mut self, source: usize, previous: Option<&[u8]>) -> Result<()> {
        while let Some(item) = self.sources[source].next() {
            let line = item?;
            match previous.map(|p| line.as_slice().cmp(p)) {
                Some(Ordering::Less) => {
                    return Err(IndexError::UnsortedInput(format!(
                        "merge source {} is not sorted",
                        source
                    )));
                }
                Some(Ordering::Equal) => continue,
                _ => {
                    self.heap.push(Head { line, source });
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn prime(&mut self) -> Result<()> {
        self.primed = true;
        for source in 0..self.sources.len() {
            self.pull(source, None)?;
        }
        Ok(())
    }

    fn advance(&mut self) -> Result<Option<Vec<u8>>> {
        if !self.primed {
            self.prime()?;
        }

        let Some(head) = self.heap.pop() else {
            return Ok(None);
        };
        self.pull(head.source, Some(&head.line))?;

        // Every other source holding the same line has it as its head
        while self.heap.peek().is_some_and(|h| h.line == head.line) {
            if let Some(dup) = self.heap.pop() {
                self.pull(dup.source, Some(&dup.line))?;
            }
        }

        Ok(Some(head.line))
    }
}

impl<I> Iterator for KWayMerge<I>
where
    I: Iterator<Item = Result<Vec<u8>>>,
{
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(line)) => Some(Ok(line)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<I> FusedIterator for KWayMerge<I> where I: Iterator<Item = Result<Vec<u8>>> {}
