//! Preprocessing of raw line files
//!
//! Turns arbitrary input files into a globally sorted, deduplicated set of
//! files in two passes: each input is sorted on its own (one file resident
//! at a time), then the sorted files are merged through a k-way heap merge
//! whose memory is one line per input.

use super::types::Line;
use crate::error::{IndexError, Result};
use crate::utils::lines::{FileLines, count_file, count_lines, read_lines, write_lines};
use crate::utils::merge::KWayMerge;
use crate::utils::progress::Progress;
use memchr::memchr;
use rayon::prelude::*;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const WRITE_BUFFER_SIZE: usize = 65536;

/// How [`split_file`] sizes its parts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitStrategy {
    /// Split into this many parts of near-equal byte size
    Batches(usize),
    /// Split into parts of at most this many bytes
    Size(u64),
}

/// Sort and deduplicate one file. Returns the number of lines written.
pub fn sort_file(input: &Path, output: &Path) -> Result<u64> {
    let mut lines = read_lines(input)?;
    lines.par_sort_unstable();
    lines.dedup();
    write_lines(output, &lines)?;
    Ok(lines.len() as u64)
}

/// Sort every input into its own file under `out_dir`
pub fn sort_files_separately<P: AsRef<Path>>(
    paths: &[P],
    out_dir: &Path,
    progress: &mut Progress,
) -> Result<Vec<PathBuf>> {
    progress.report_start();
    fs::create_dir_all(out_dir)?;

    let names = output_names(paths)?;
    let mut outputs = Vec::with_capacity(paths.len());
    for (i, (path, name)) in paths.iter().zip(names).enumerate() {
        let output = out_dir.join(name);
        let count = sort_file(path.as_ref(), &output)?;
        tracing::debug!(
            "sorted {} into {} ({} distinct lines)",
            path.as_ref().display(),
            output.display(),
            count
        );
        outputs.push(output);
        progress.report((i + 1) as f64 / paths.len() as f64);
    }

    tracing::info!("sorted {} files into {}", outputs.len(), out_dir.display());
    progress.report_done();
    Ok(outputs)
}

/// Output file names for a separate sort: the input's name, suffixed with
/// its position when an earlier input already took that name
fn output_names<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<String>> {
    let mut taken = HashSet::with_capacity(paths.len());
    let mut names = Vec::with_capacity(paths.len());
    for (i, path) in paths.iter().enumerate() {
        let path = path.as_ref();
        let base = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                IndexError::InvalidInput(format!("{} has no file name", path.display()))
            })?;
        let name = if taken.contains(&base) {
            format!("{}.{}", base, i)
        } else {
            base
        };
        taken.insert(name.clone());
        names.push(name);
    }
    Ok(names)
}

/// Merge separately sorted files into at most `paths.len()` files under
/// `out_dir`, split evenly by the total input line count.
///
/// Inputs are left in place. `out_dir` must not be the directory of any
/// input.
pub fn merge_sorted_files<P: AsRef<Path>>(
    paths: &[P],
    out_dir: &Path,
    progress: &mut Progress,
) -> Result<Vec<PathBuf>> {
    merge_into(paths, out_dir, progress, false)
}

/// Like [`merge_sorted_files`], deleting each input once it is exhausted
pub fn merge_sorted_files_consuming<P: AsRef<Path>>(
    paths: &[P],
    out_dir: &Path,
    progress: &mut Progress,
) -> Result<Vec<PathBuf>> {
    merge_into(paths, out_dir, progress, true)
}

fn merge_into<P: AsRef<Path>>(
    paths: &[P],
    out_dir: &Path,
    progress: &mut Progress,
    consume: bool,
) -> Result<Vec<PathBuf>> {
    progress.report_start();
    fs::create_dir_all(out_dir)?;

    let out_canonical = out_dir.canonicalize()?;
    for path in paths {
        let parent = path.as_ref().canonicalize()?.parent().map(Path::to_path_buf);
        if parent.as_deref() == Some(out_canonical.as_path()) {
            return Err(IndexError::InvalidInput(format!(
                "merge output directory {} holds input {}",
                out_dir.display(),
                path.as_ref().display()
            )));
        }
    }

    let total = count_lines(paths)?;
    let sources = paths
        .iter()
        .map(|p| {
            if consume {
                FileLines::consuming(p.as_ref())
            } else {
                FileLines::open(p.as_ref())
            }
        })
        .collect::<Result<Vec<_>>>()?;
    let merge = KWayMerge::new(sources);

    let mut outputs = Vec::with_capacity(paths.len());
    if let Err(e) = write_parts(merge, total, out_dir, progress, &mut outputs) {
        for path in &outputs {
            if let Err(err) = fs::remove_file(path) {
                tracing::warn!("could not remove {}: {}", path.display(), err);
            }
        }
        return Err(e);
    }

    tracing::info!(
        "merged {} files ({} lines) into {} files",
        paths.len(),
        total,
        outputs.len()
    );
    progress.report_done();
    Ok(outputs)
}

/// Write the merged stream into parts; part `n` ends once the running line
/// count reaches `total * (n + 1) / parts`, the last part takes the rest
fn write_parts<I>(
    merge: KWayMerge<I>,
    total: u64,
    out_dir: &Path,
    progress: &mut Progress,
    outputs: &mut Vec<PathBuf>,
) -> Result<()>
where
    I: Iterator<Item = Result<Line>>,
{
    let part_count = merge.source_count();
    let width = part_count.saturating_sub(1).to_string().len();
    let mut merge = merge.peekable();
    let mut written = 0u64;

    for part in 0..part_count {
        if merge.peek().is_none() {
            break;
        }
        let limit = if part + 1 == part_count {
            u64::MAX
        } else {
            total * (part as u64 + 1) / part_count as u64
        };
        // Duplicates shrink the stream, so early parts can come up empty
        if written >= limit {
            continue;
        }

        let path = out_dir.join(format!("{:0width$}.sorted", outputs.len(), width = width));
        outputs.push(path.clone());
        let mut file = BufWriter::with_capacity(WRITE_BUFFER_SIZE, File::create(&path)?);
        while written < limit {
            let Some(line) = merge.next() else {
                break;
            };
            let line = line?;
            file.write_all(&line)?;
            file.write_all(b"\n")?;
            written += 1;
        }
        file.flush()?;
        progress.report((part + 1) as f64 / part_count as f64);
    }
    Ok(())
}

/// Sort inputs separately into `temp_dir`, merge them into `out_dir` and
/// remove `temp_dir`
pub fn sort_files_together<P: AsRef<Path>>(
    paths: &[P],
    out_dir: &Path,
    temp_dir: &Path,
    progress: &mut Progress,
) -> Result<Vec<PathBuf>> {
    let sorted = sort_files_separately(paths, temp_dir, &mut Progress::hidden())?;
    let merged = merge_sorted_files_consuming(&sorted, out_dir, progress);
    if temp_dir.exists() {
        fs::remove_dir_all(temp_dir)?;
    }
    merged
}

/// True if no line contains a newline
pub fn are_valid_lines<I, L>(lines: I) -> bool
where
    I: IntoIterator<Item = L>,
    L: AsRef<[u8]>,
{
    lines
        .into_iter()
        .all(|line| memchr(b'\n', line.as_ref()).is_none())
}

/// Strip newlines out of every line
pub fn fix_lines<I, L>(lines: I) -> Vec<Line>
where
    I: IntoIterator<Item = L>,
    L: AsRef<[u8]>,
{
    lines
        .into_iter()
        .map(|line| line.as_ref().iter().copied().filter(|&b| b != b'\n').collect())
        .collect()
}

/// Sort and deduplicate lines in memory
pub fn preprocess_lines<I, L>(lines: I) -> Vec<Line>
where
    I: IntoIterator<Item = L>,
    L: AsRef<[u8]>,
{
    let mut lines: Vec<Line> = lines.into_iter().map(|l| l.as_ref().to_vec()).collect();
    lines.par_sort_unstable();
    lines.dedup();
    lines
}

/// True if the file's lines never decrease
pub fn is_file_sorted(path: &Path) -> Result<bool> {
    let mut previous: Option<Line> = None;
    for line in FileLines::open(path)? {
        let line = line?;
        if previous.as_ref().is_some_and(|p| line < *p) {
            return Ok(false);
        }
        previous = Some(line);
    }
    Ok(true)
}

/// True if no line of a file sorts below a line of an earlier file
pub fn are_ordered_files<P: AsRef<Path>>(paths: &[P]) -> Result<bool> {
    let mut floor: Option<Line> = None;
    for path in paths {
        let mut greatest = floor.clone();
        for line in FileLines::open(path.as_ref())? {
            let line = line?;
            if floor.as_ref().is_some_and(|f| line < *f) {
                return Ok(false);
            }
            if greatest.as_ref().is_none_or(|g| line > *g) {
                greatest = Some(line);
            }
        }
        floor = greatest;
    }
    Ok(true)
}

/// Split a file on line boundaries into `<name>.<i>.batch` files.
///
/// Every part holds at least one line. With [`SplitStrategy::Size`] a line
/// longer than the limit is rejected.
pub fn split_file(input: &Path, out_dir: &Path, strategy: SplitStrategy) -> Result<Vec<PathBuf>> {
    match strategy {
        SplitStrategy::Batches(0) | SplitStrategy::Size(0) => {
            return Err(IndexError::InvalidOptions(format!(
                "split strategy {:?} must be positive",
                strategy
            )));
        }
        _ => {}
    }

    let base = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| IndexError::InvalidInput(format!("{} has no file name", input.display())))?;
    let (_, total_bytes) = count_file(input)?;
    fs::create_dir_all(out_dir)?;

    let mut lines = FileLines::open(input)?;
    let mut carry = lines.next().transpose()?;
    let mut outputs = Vec::new();
    let mut consumed = 0u64;

    while let Some(first) = carry.take() {
        let part = outputs.len();
        let limit = match strategy {
            SplitStrategy::Batches(n) if part + 1 >= n => u64::MAX,
            SplitStrategy::Batches(n) => total_bytes * (part as u64 + 1) / n as u64,
            SplitStrategy::Size(size) => {
                if first.len() as u64 + 1 > size {
                    return Err(IndexError::InvalidInput(format!(
                        "a line of {} bytes does not fit parts of {} bytes",
                        first.len() + 1,
                        size
                    )));
                }
                consumed + size
            }
        };

        let path = out_dir.join(format!("{}.{}.batch", base, part));
        let mut file = BufWriter::with_capacity(WRITE_BUFFER_SIZE, File::create(&path)?);
        file.write_all(&first)?;
        file.write_all(b"\n")?;
        consumed += first.len() as u64 + 1;

        for line in lines.by_ref() {
            let line = line?;
            let size = line.len() as u64 + 1;
            if consumed + size > limit {
                carry = Some(line);
                break;
            }
            file.write_all(&line)?;
            file.write_all(b"\n")?;
            consumed += size;
        }
        file.flush()?;
        outputs.push(path);
    }

    tracing::debug!("split {} into {} parts", input.display(), outputs.len());
    Ok(outputs)
}
