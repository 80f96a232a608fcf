//! Property tests over random line sets.

use fli::error::IndexError;
use fli::index::{Indexer, IndexerOptions, LineIndex, MemoryIndex, QueryOptions, SearchMode};
use fli::utils::merge::KWayMerge;
use proptest::collection::vec;
use proptest::prelude::*;
use std::fs;
use tempfile::tempdir;

/// Short lines over a small alphabet so inputs collide and duplicate often
fn line() -> impl Strategy<Value = Vec<u8>> {
    vec(prop_oneof![Just(b'a'), Just(b'b'), Just(b'c'), Just(0xffu8), Just(b' ')], 0..6)
}

fn file() -> impl Strategy<Value = Vec<Vec<u8>>> {
    vec(line(), 0..40)
}

fn to_content(lines: &[Vec<u8>]) -> Vec<u8> {
    let mut content = Vec::new();
    for line in lines {
        content.extend_from_slice(line);
        content.push(b'\n');
    }
    content
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_membership_matches_memory_index(
        files in vec(file(), 1..4),
        probes in vec(line(), 0..30),
        wanted in 1usize..6,
    ) {
        let dir = tempdir().unwrap();
        let mut paths = Vec::new();
        for (i, lines) in files.iter().enumerate() {
            let path = dir.path().join(format!("input{}", i));
            fs::write(&path, to_content(lines)).unwrap();
            paths.push(path);
        }

        let memory = MemoryIndex::new(files.iter().flatten());
        let options = IndexerOptions::new(1, 8).with_wanted_file_count(wanted);
        let indexer = Indexer::new(dir.path().join("index"), options).unwrap();
        let index = indexer.index(&paths).unwrap();

        // Wanted count, capped by the line count
        prop_assert_eq!(index.line_count(), memory.len() as u64);
        prop_assert_eq!(index.batch_count(), wanted.min(memory.len()));
        index.verify().unwrap();

        for mode in [SearchMode::FullLoad, SearchMode::Seek, SearchMode::Mapped] {
            let index = indexer.load_index_with(&QueryOptions::with_mode(mode)).unwrap();
            for line in memory.lines().iter().chain(probes.iter()) {
                prop_assert_eq!(index.has(line), memory.has(line), "{:?} {:?}", mode, line);
            }
        }
    }

    #[test]
    fn prop_merge_output_is_sorted_and_distinct(files in vec(file(), 0..5)) {
        let sources: Vec<_> = files
            .iter()
            .map(|lines| {
                let mut lines = lines.clone();
                lines.sort();
                lines.into_iter().map(Ok::<_, IndexError>).collect::<Vec<_>>().into_iter()
            })
            .collect();
        let merged: Vec<Vec<u8>> = KWayMerge::new(sources).map(|l| l.unwrap()).collect();

        prop_assert!(merged.windows(2).all(|w| w[0] < w[1]));
        let memory = MemoryIndex::new(files.iter().flatten());
        prop_assert_eq!(merged.as_slice(), memory.lines());
    }

    #[test]
    fn prop_batch_count_stays_in_bounds(
        min in 1usize..10,
        extra in 0usize..10,
        lines in 0u64..200,
        bytes_per_line in 1u64..200,
    ) {
        let dir = tempdir().unwrap();
        let mut options = IndexerOptions::new(min, min + extra);
        options.target_batch_bytes = 512;
        let indexer = Indexer::new(dir.path().join("index"), options).unwrap();

        let count = indexer.batch_count(lines, lines * bytes_per_line);
        prop_assert!(count as u64 <= lines);
        prop_assert!(count <= min + extra);
        if lines >= min as u64 {
            prop_assert!(count >= min);
        }
    }
}
