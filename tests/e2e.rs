//! End-to-end tests: files in, index built on disk, queries out.

use fli::error::IndexError;
use fli::index::storage::batch_file_name;
use fli::index::{
    Index, Indexer, IndexerOptions, LineIndex, MemoryIndex, Preprocess, QueryOptions, SearchMode,
    META_FILE,
};
use fli::utils::Progress;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use tempfile::{TempDir, tempdir};

const MODES: [SearchMode; 4] = [
    SearchMode::FullLoad,
    SearchMode::Seek,
    SearchMode::Mapped,
    SearchMode::Auto,
];

fn write_input(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

/// Numbered words, shuffled across three files with duplicates
fn word_inputs(dir: &Path, count: usize) -> (Vec<PathBuf>, Vec<String>) {
    let words: Vec<String> = (0..count).map(|i| format!("word-{:06}", i * 7)).collect();
    let mut files = vec![String::new(), String::new(), String::new()];
    for (i, word) in words.iter().enumerate().rev() {
        files[i % 3].push_str(word);
        files[i % 3].push('\n');
        if i % 5 == 0 {
            files[(i + 1) % 3].push_str(word);
            files[(i + 1) % 3].push('\n');
        }
    }
    let paths = files
        .iter()
        .enumerate()
        .map(|(i, content)| write_input(dir, &format!("input{}", i), content))
        .collect();
    (paths, words)
}

fn build_words(count: usize, options: IndexerOptions) -> (TempDir, Indexer, Vec<String>) {
    let dir = tempdir().unwrap();
    let inputs_dir = dir.path().join("inputs");
    fs::create_dir_all(&inputs_dir).unwrap();
    let (inputs, words) = word_inputs(&inputs_dir, count);

    let indexer = Indexer::new(dir.path().join("index"), options).unwrap();
    indexer.index(&inputs).unwrap();
    (dir, indexer, words)
}

#[test]
fn test_two_files_with_duplicates() {
    let dir = tempdir().unwrap();
    let a = write_input(dir.path(), "a", "b\na\na\n");
    let b = write_input(dir.path(), "b", "c\na\n");

    let indexer = Indexer::new(dir.path().join("index"), IndexerOptions::new(1, 2)).unwrap();
    let index = indexer.index(&[&a, &b]).unwrap();

    assert_eq!(index.line_count(), 3);
    assert!((1..=2).contains(&index.batch_count()));
    assert!(index.has(b"a"));
    assert!(index.has(b"b"));
    assert!(index.has(b"c"));
    assert!(!index.has(b"d"));
    assert!(!index.has(b""));
}

#[test]
fn test_two_files_into_two_batches() {
    let dir = tempdir().unwrap();
    let a = write_input(dir.path(), "a", "b\na\na\n");
    let b = write_input(dir.path(), "b", "c\na\n");

    let options = IndexerOptions::new(1, 2).with_wanted_file_count(2);
    let indexer = Indexer::new(dir.path().join("index"), options).unwrap();
    let index = indexer.index(&[&a, &b]).unwrap();

    assert_eq!(index.batch_count(), 2);
    let firsts: Vec<&[u8]> = index.meta().batches.iter().map(|b| b.first_line.as_slice()).collect();
    assert_eq!(firsts, vec![&b"a"[..], b"b"]);
    assert_eq!(index.meta().last_line, b"c");
    for mode in MODES {
        let index = indexer.load_index_with(&QueryOptions::with_mode(mode)).unwrap();
        assert!(index.has(b"a") && index.has(b"b") && index.has(b"c"));
        assert!(!index.has(b"d") && !index.has(b""));
    }
}

#[test]
fn test_empty_input_list() {
    let dir = tempdir().unwrap();
    let indexer = Indexer::new(dir.path().join("index"), IndexerOptions::default()).unwrap();
    let index = indexer.index::<&Path>(&[]).unwrap();

    assert!(index.is_empty());
    assert!(!index.has(b""));
    assert!(!index.has(b"anything"));

    let reopened = indexer.load_index().unwrap();
    assert!(reopened.is_empty());
}

#[test]
fn test_empty_input_list_strict() {
    let dir = tempdir().unwrap();
    let options = IndexerOptions {
        allow_empty: false,
        ..IndexerOptions::default()
    };
    let indexer = Indexer::new(dir.path().join("index"), options).unwrap();
    let err = indexer.index::<&Path>(&[]).unwrap_err();
    assert!(matches!(err, IndexError::EmptyInput));
    assert_eq!(err.code(), "EMPTY_INPUT");
}

#[test]
fn test_min_above_max_fails_before_io() {
    let dir = tempdir().unwrap();
    let resource_dir = dir.path().join("index");
    let err = Indexer::new(&resource_dir, IndexerOptions::new(5, 1)).unwrap_err();
    assert!(matches!(err, IndexError::InvalidOptions(_)));
    assert!(!resource_dir.exists());
}

#[test]
fn test_round_trip_in_every_mode() {
    let mut options = IndexerOptions::new(1, 64);
    options.target_batch_bytes = 512;
    let (_dir, indexer, words) = build_words(2_000, options);

    let memory = MemoryIndex::new(&words);
    for mode in MODES {
        let index = indexer.load_index_with(&QueryOptions::with_mode(mode)).unwrap();
        assert_eq!(index.line_count(), words.len() as u64);
        assert!(index.batch_count() > 1);

        for word in &words {
            assert!(index.has(word.as_bytes()), "{:?} missing in {:?}", word, mode);
        }
        // Every 7th number is indexed; the ones between are not
        for i in (0..2_000).step_by(13) {
            let absent = format!("word-{:06}", i * 7 + 3);
            assert!(!index.has(absent.as_bytes()));
            assert_eq!(index.has(absent.as_bytes()), memory.has(absent.as_bytes()));
        }
        assert!(!index.has(b"word-"));
        assert!(!index.has(b"zzz"));
    }
}

#[test]
fn test_batches_partition_the_stream() {
    let (_dir, indexer, words) = build_words(500, IndexerOptions::new(1, 10).with_wanted_file_count(7));
    let index = indexer.load_index().unwrap();
    index.verify().unwrap();

    let mut all = Vec::new();
    for batch in &index.meta().batches {
        let content = fs::read(index.dir().join(&batch.locator.file_name)).unwrap();
        let lines: Vec<Vec<u8>> = fli::utils::lines::split_lines(&content).map(|l| l.to_vec()).collect();
        assert_eq!(lines[0], batch.first_line);
        assert!(lines.windows(2).all(|w| w[0] < w[1]));
        all.extend(lines);
    }
    let mut expected: Vec<Vec<u8>> = words.iter().map(|w| w.as_bytes().to_vec()).collect();
    expected.sort();
    assert_eq!(all, expected);

    // n*i/k boundaries make batch sizes differ by at most one line
    let stats = index.stats();
    assert!(stats.max_batch_lines - stats.min_batch_lines <= 1);
}

#[test]
fn test_preprocess_none_requires_strictly_increasing_stream() {
    let dir = tempdir().unwrap();
    let a = write_input(dir.path(), "a", "a\nb\n");
    let b = write_input(dir.path(), "b", "c\nd\n");
    let indexer = Indexer::new(dir.path().join("index"), IndexerOptions::default()).unwrap();

    let index = indexer
        .index_files(&[&a, &b], Preprocess::None, &mut Progress::hidden())
        .unwrap();
    assert!(index.has(b"d"));

    // Files out of order
    let err = indexer
        .index_files(&[&b, &a], Preprocess::None, &mut Progress::hidden())
        .unwrap_err();
    assert!(matches!(err, IndexError::UnsortedInput(_)));
}

#[test]
fn test_preprocess_merge_requires_sorted_files() {
    let dir = tempdir().unwrap();
    let sorted = write_input(dir.path(), "sorted", "a\nc\n");
    let other = write_input(dir.path(), "other", "b\nb\nd\n");
    let unsorted = write_input(dir.path(), "unsorted", "z\ny\n");
    let indexer = Indexer::new(dir.path().join("index"), IndexerOptions::default()).unwrap();

    let index = indexer
        .index_files(&[&sorted, &other], Preprocess::Merge, &mut Progress::hidden())
        .unwrap();
    assert_eq!(index.line_count(), 4);

    let err = indexer
        .index_files(&[&sorted, &unsorted], Preprocess::Merge, &mut Progress::hidden())
        .unwrap_err();
    assert!(matches!(err, IndexError::UnsortedInput(_)));
    assert!(!indexer.resource_dir().join("merge").exists());
}

#[test]
fn test_failed_rebuild_keeps_previous_index() {
    let dir = tempdir().unwrap();
    let good = write_input(dir.path(), "good", "a\nb\nc\n");
    let bad = write_input(dir.path(), "bad", "c\nb\na\n");
    let indexer = Indexer::new(dir.path().join("index"), IndexerOptions::default()).unwrap();

    indexer.index(&[&good]).unwrap();
    let err = indexer
        .index_files(&[&bad], Preprocess::None, &mut Progress::hidden())
        .unwrap_err();
    assert!(matches!(err, IndexError::UnsortedInput(_)));

    let index = indexer.load_index().unwrap();
    assert_eq!(index.line_count(), 3);
    assert!(index.has(b"b"));
    index.verify().unwrap();
}

#[test]
fn test_rebuild_replaces_contents() {
    let dir = tempdir().unwrap();
    let first = write_input(dir.path(), "first", "a\nb\n");
    let second = write_input(dir.path(), "second", "x\ny\nz\n");
    let indexer = Indexer::new(dir.path().join("index"), IndexerOptions::default()).unwrap();

    let old = indexer.index(&[&first]).unwrap();
    let new = indexer.index(&[&second]).unwrap();
    assert_eq!(new.meta().generation, old.meta().generation + 1);
    assert!(!new.has(b"a"));
    assert!(new.has(b"y"));
    assert!(!indexer.resource_dir().join(batch_file_name(old.meta().generation, 0)).exists());
}

#[test]
fn test_corrupt_metadata_is_detected() {
    let (_dir, indexer, _) = build_words(100, IndexerOptions::default());
    let meta_path = indexer.resource_dir().join(META_FILE);

    let mut data = fs::read(&meta_path).unwrap();
    data[20] ^= 0xff;
    fs::write(&meta_path, &data).unwrap();

    let err = indexer.load_index().unwrap_err();
    assert!(matches!(err, IndexError::CorruptIndex(_)));
    assert_eq!(err.code(), "CORRUPT_INDEX");
}

#[test]
fn test_missing_batch_is_detected() {
    let (_dir, indexer, _) = build_words(100, IndexerOptions::new(1, 4).with_wanted_file_count(4));
    let index = indexer.load_index().unwrap();
    let victim = &index.meta().batches[2].locator.file_name;
    fs::remove_file(indexer.resource_dir().join(victim)).unwrap();

    assert!(matches!(indexer.load_index().unwrap_err(), IndexError::CorruptIndex(_)));
}

#[test]
fn test_index_is_relocatable() {
    let (dir, indexer, words) = build_words(200, IndexerOptions::default());
    let moved = dir.path().join("moved");
    fs::rename(indexer.resource_dir(), &moved).unwrap();

    let index = Index::open(&moved, &QueryOptions::default()).unwrap();
    assert!(index.has(words[17].as_bytes()));
}

#[test]
fn test_concurrent_queries() {
    let mut options = IndexerOptions::new(1, 16);
    options.target_batch_bytes = 256;
    let (_dir, indexer, words) = build_words(1_000, options);
    let words = Arc::new(words);

    for mode in [SearchMode::Seek, SearchMode::Mapped] {
        let index = Arc::new(indexer.load_index_with(&QueryOptions::with_mode(mode)).unwrap());
        let failures = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let index = Arc::clone(&index);
                let words = Arc::clone(&words);
                let failures = Arc::clone(&failures);
                thread::spawn(move || {
                    for word in words.iter().skip(t).step_by(8) {
                        if !index.has(word.as_bytes()) {
                            failures.lock().unwrap().push(word.clone());
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(failures.lock().unwrap().is_empty(), "{:?}", mode);
    }
}

#[test]
fn test_cached_full_load_across_threads() {
    let (_dir, indexer, words) = build_words(600, IndexerOptions::new(1, 8).with_wanted_file_count(8));
    let options = QueryOptions {
        mode: SearchMode::FullLoad,
        cache_batches: 2,
        ..QueryOptions::default()
    };
    let index = Arc::new(indexer.load_index_with(&options).unwrap());
    let words = Arc::new(words);

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let index = Arc::clone(&index);
            let words = Arc::clone(&words);
            thread::spawn(move || words.iter().skip(t).all(|w| index.has(w.as_bytes())))
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap());
    }
}

#[test]
fn test_long_lines_and_binary_bytes() {
    let dir = tempdir().unwrap();
    let mut content = Vec::new();
    let long = vec![b'q'; 20_000];
    content.extend_from_slice(&long);
    content.push(b'\n');
    content.extend_from_slice(b"\x00\x01\xff\n\xfe\n\n");
    let input = dir.path().join("binary");
    fs::write(&input, &content).unwrap();

    let indexer = Indexer::new(
        dir.path().join("index"),
        IndexerOptions::new(1, 2).with_wanted_file_count(2),
    )
    .unwrap();
    indexer.index(&[&input]).unwrap();

    for mode in MODES {
        let index = indexer.load_index_with(&QueryOptions::with_mode(mode)).unwrap();
        assert!(index.has(&long));
        assert!(index.has(b"\x00\x01\xff"));
        assert!(index.has(b"\xfe"));
        assert!(index.has(b""));
        assert!(!index.has(&long[1..]));
    }
}

#[test]
fn test_progress_is_reported() {
    let dir = tempdir().unwrap();
    let (inputs, _) = word_inputs(dir.path(), 90);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let mut progress = Progress::with_handler(move |p| sink.lock().unwrap().push(p));

    let indexer = Indexer::new(dir.path().join("index"), IndexerOptions::default()).unwrap();
    indexer
        .index_files(&inputs, Preprocess::SortAndMerge, &mut progress)
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.first(), Some(&0));
    assert_eq!(seen.last(), Some(&100));
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
}
