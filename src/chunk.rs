//! Sorted chunk files and read-ahead cursors over them.

use std::cmp::Ordering;
use std::io;
use std::io::prelude::*;
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::NamedTempFile;

pub(crate) const CHUNK_FILE_PREFIX: &str = "chunk";
pub(crate) const CHUNK_FILE_SUFFIX: &str = ".dat";

/// A sorted chunk stored on the file system.
///
/// The file holds the verbatim header block followed by the chunk's sorted
/// data lines, optionally gzip-compressed. The backing temporary file is
/// removed from disk when the value is dropped.
pub struct ChunkFile {
    file: NamedTempFile,
    /// Compressed stream buffer size; chunk data is gzip-compressed when set.
    compression: Option<usize>,
    rw_buf_size: usize,
}

impl ChunkFile {
    /// Writes the header block and the sorted lines to a fresh `chunk*.dat`
    /// temporary file in `dir`.
    ///
    /// When `collapse_duplicates` is set, adjacent lines equal under `compare`
    /// are written once. Cross-chunk duplicates are left for the merge phase.
    pub fn create<F>(
        dir: &Path,
        header: &[String],
        lines: impl IntoIterator<Item = String>,
        compare: F,
        collapse_duplicates: bool,
        compression: Option<usize>,
        rw_buf_size: usize,
    ) -> io::Result<ChunkFile>
    where
        F: Fn(&str, &str) -> Ordering,
    {
        let file = tempfile::Builder::new()
            .prefix(CHUNK_FILE_PREFIX)
            .suffix(CHUNK_FILE_SUFFIX)
            .tempfile_in(dir)?;

        if let Some(zip_buf_size) = compression {
            // Speed-optimized compression: chunks are short-lived scratch data.
            let encoder = GzEncoder::new(file.reopen()?, Compression::fast());
            let mut writer = io::BufWriter::with_capacity(zip_buf_size, encoder);
            Self::dump(&mut writer, header, lines, compare, collapse_duplicates)?;
            let encoder = writer.into_inner().map_err(|err| err.into_error())?;
            encoder.finish()?;
        } else {
            let mut writer = io::BufWriter::with_capacity(rw_buf_size, file.reopen()?);
            Self::dump(&mut writer, header, lines, compare, collapse_duplicates)?;
            writer.flush()?;
        }

        return Ok(ChunkFile {
            file,
            compression,
            rw_buf_size,
        });
    }

    fn dump<W, F>(
        writer: &mut W,
        header: &[String],
        lines: impl IntoIterator<Item = String>,
        compare: F,
        collapse_duplicates: bool,
    ) -> io::Result<()>
    where
        W: Write,
        F: Fn(&str, &str) -> Ordering,
    {
        for line in header {
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
        }

        let mut last: Option<String> = None;
        for line in lines {
            if collapse_duplicates {
                if let Some(last) = &last {
                    if compare(last, &line) == Ordering::Equal {
                        continue;
                    }
                }
            }
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
            last = Some(line);
        }

        return Ok(());
    }

    /// Opens a read-ahead cursor positioned at the chunk's first line.
    pub fn open(&self) -> io::Result<ChunkCursor> {
        let file = self.file.reopen()?;
        let reader: Box<dyn Read + Send> = match self.compression {
            Some(_) => Box::new(GzDecoder::new(file)),
            None => Box::new(file),
        };

        return ChunkCursor::new(io::BufReader::with_capacity(self.rw_buf_size, reader));
    }

    /// Path of the backing temporary file.
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// One-line-lookahead cursor over a sorted chunk.
///
/// [`ChunkCursor::peek`] always exposes the smallest not-yet-consumed line of
/// the chunk; [`ChunkCursor::pop`] consumes it and reads the next line ahead.
/// The underlying reader is closed when the cursor is dropped.
pub struct ChunkCursor {
    lines: io::Lines<io::BufReader<Box<dyn Read + Send>>>,
    peeked: Option<String>,
}

impl ChunkCursor {
    pub(crate) fn new(reader: io::BufReader<Box<dyn Read + Send>>) -> io::Result<Self> {
        let mut cursor = ChunkCursor {
            lines: reader.lines(),
            peeked: None,
        };
        cursor.advance()?;

        return Ok(cursor);
    }

    /// Returns the current head line without consuming it, or [`None`] once
    /// the chunk is exhausted.
    pub fn peek(&self) -> Option<&str> {
        self.peeked.as_deref()
    }

    /// Consumes and returns the current head line, reading the next one ahead.
    /// Read-ahead failures propagate to the caller.
    pub fn pop(&mut self) -> io::Result<Option<String>> {
        let head = self.peeked.take();
        if head.is_some() {
            self.advance()?;
        }

        return Ok(head);
    }

    /// True once every line of the chunk has been consumed.
    pub fn is_empty(&self) -> bool {
        self.peeked.is_none()
    }

    /// Discards the next `count` lines. Used to step over a chunk's header
    /// block before merging.
    pub fn skip(&mut self, count: usize) -> io::Result<()> {
        for _ in 0..count {
            if self.pop()?.is_none() {
                break;
            }
        }

        return Ok(());
    }

    fn advance(&mut self) -> io::Result<()> {
        self.peeked = self.lines.next().transpose()?;

        return Ok(());
    }
}

#[cfg(test)]
mod test {
    use std::cmp::Ordering;

    use rstest::*;

    use super::ChunkFile;

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn natural(a: &str, b: &str) -> Ordering {
        a.cmp(b)
    }

    fn owned(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|line| line.to_string()).collect()
    }

    #[rstest]
    #[case(None)]
    #[case(Some(2048))]
    fn test_chunk_cursor(tmp_dir: tempfile::TempDir, #[case] compression: Option<usize>) {
        let chunk = ChunkFile::create(
            tmp_dir.path(),
            &[],
            owned(&["alpha", "bravo", "charlie"]),
            natural,
            false,
            compression,
            8192,
        )
        .unwrap();

        let mut cursor = chunk.open().unwrap();

        assert_eq!(cursor.peek(), Some("alpha"));
        assert_eq!(cursor.peek(), Some("alpha"));
        assert_eq!(cursor.pop().unwrap(), Some("alpha".to_owned()));
        assert_eq!(cursor.peek(), Some("bravo"));
        assert_eq!(cursor.pop().unwrap(), Some("bravo".to_owned()));
        assert_eq!(cursor.is_empty(), false);
        assert_eq!(cursor.pop().unwrap(), Some("charlie".to_owned()));
        assert_eq!(cursor.is_empty(), true);
        assert_eq!(cursor.peek(), None);
        assert_eq!(cursor.pop().unwrap(), None);
    }

    #[rstest]
    fn test_chunk_retains_header(tmp_dir: tempfile::TempDir) {
        let header = owned(&["2", "# comment"]);
        let chunk = ChunkFile::create(
            tmp_dir.path(),
            &header,
            owned(&["apple", "banana"]),
            natural,
            false,
            None,
            8192,
        )
        .unwrap();

        let mut cursor = chunk.open().unwrap();
        assert_eq!(cursor.pop().unwrap(), Some("2".to_owned()));
        assert_eq!(cursor.pop().unwrap(), Some("# comment".to_owned()));
        assert_eq!(cursor.peek(), Some("apple"));

        let mut cursor = chunk.open().unwrap();
        cursor.skip(header.len()).unwrap();
        assert_eq!(cursor.peek(), Some("apple"));
    }

    #[rstest]
    fn test_adjacent_duplicates_collapsed(tmp_dir: tempfile::TempDir) {
        let chunk = ChunkFile::create(
            tmp_dir.path(),
            &[],
            owned(&["apple", "apple", "apple", "banana", "cherry", "cherry"]),
            natural,
            true,
            None,
            8192,
        )
        .unwrap();

        let mut cursor = chunk.open().unwrap();
        let mut restored = Vec::new();
        while let Some(line) = cursor.pop().unwrap() {
            restored.push(line);
        }

        assert_eq!(restored, owned(&["apple", "banana", "cherry"]));
    }

    #[rstest]
    fn test_chunk_file_removed_on_drop(tmp_dir: tempfile::TempDir) {
        let chunk = ChunkFile::create(
            tmp_dir.path(),
            &[],
            owned(&["apple"]),
            natural,
            false,
            None,
            8192,
        )
        .unwrap();

        let path = chunk.path().to_path_buf();
        assert!(path.exists());
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(super::CHUNK_FILE_PREFIX));
        assert!(name.ends_with(super::CHUNK_FILE_SUFFIX));

        drop(chunk);
        assert!(!path.exists());
    }
}
