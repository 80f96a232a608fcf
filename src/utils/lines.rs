//! Newline-delimited line files
//!
//! A line is the byte sequence between `\n` delimiters. A final line without
//! a trailing delimiter still counts; a trailing delimiter does not start an
//! extra empty line.

use crate::error::Result;
use memchr::memchr_iter;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::iter::FusedIterator;
use std::path::{Path, PathBuf};

const BUFFER_SIZE: usize = 64 * 1024;

/// Split a buffer into lines
pub fn split_lines(data: &[u8]) -> impl Iterator<Item = &[u8]> {
    let count = if data.is_empty() { 0 } else { usize::MAX };
    let data = data.strip_suffix(b"\n").unwrap_or(data);
    data.split(|&b| b == b'\n').take(count)
}

/// Read every line of a file into memory
pub fn read_lines(path: &Path) -> Result<Vec<Vec<u8>>> {
    let data = fs::read(path)?;
    Ok(split_lines(&data).map(|l| l.to_vec()).collect())
}

/// Write lines, each followed by a delimiter. Returns the bytes written.
pub fn write_lines<I, L>(path: &Path, lines: I) -> Result<u64>
where
    I: IntoIterator<Item = L>,
    L: AsRef<[u8]>,
{
    let mut file = BufWriter::with_capacity(BUFFER_SIZE, File::create(path)?);
    let mut written = 0u64;
    for line in lines {
        let line = line.as_ref();
        file.write_all(line)?;
        file.write_all(b"\n")?;
        written += line.len() as u64 + 1;
    }
    file.flush()?;
    Ok(written)
}

/// Count lines and bytes of a file without holding it in memory
pub fn count_file(path: &Path) -> Result<(u64, u64)> {
    let mut file = File::open(path)?;
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut lines = 0u64;
    let mut bytes = 0u64;
    let mut last = b'\n';

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        lines += memchr_iter(b'\n', &buf[..n]).count() as u64;
        bytes += n as u64;
        last = buf[n - 1];
    }

    if last != b'\n' {
        lines += 1;
    }
    Ok((lines, bytes))
}

/// Total line count over several files
pub fn count_lines<P: AsRef<Path>>(paths: &[P]) -> Result<u64> {
    let mut total = 0;
    for path in paths {
        total += count_file(path.as_ref())?.0;
    }
    Ok(total)
}

/// Streaming line reader over a file.
///
/// Opened with [`FileLines::consuming`], the file is deleted as soon as its
/// last line has been read.
pub struct FileLines {
    reader: Option<BufReader<File>>,
    path: PathBuf,
    remove_when_done: bool,
    buf: Vec<u8>,
}

impl FileLines {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: Some(BufReader::with_capacity(BUFFER_SIZE, file)),
            path: path.to_path_buf(),
            remove_when_done: false,
            buf: Vec::new(),
        })
    }

    /// Open a file that is removed once fully read
    pub fn consuming(path: &Path) -> Result<Self> {
        let mut lines = Self::open(path)?;
        lines.remove_when_done = true;
        Ok(lines)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn finish(&mut self) -> Result<()> {
        // Close the handle before removing
        self.reader = None;
        if self.remove_when_done {
            fs::remove_file(&self.path)?;
            tracing::debug!("removed consumed file {}", self.path.display());
        }
        Ok(())
    }
}

impl Iterator for FileLines {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        let reader = self.reader.as_mut()?;
        self.buf.clear();
        match reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => self.finish().err().map(Err),
            Ok(_) => {
                if self.buf.last() == Some(&b'\n') {
                    self.buf.pop();
                }
                Some(Ok(std::mem::take(&mut self.buf)))
            }
            Err(e) => {
                self.reader = None;
                Some(Err(e.into()))
            }
        }
    }
}

impl FusedIterator for FileLines {}
