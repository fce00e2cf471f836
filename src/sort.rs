//! External sorter.

use std::cmp::Ordering;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::Path;

use log;
use rayon::slice::ParallelSliceMut;
use sysinfo::System;

use crate::buffer::SizeLimitedBuffer;
use crate::chunk::ChunkFile;
use crate::merger::BinaryHeapMerger;

/// Default bound on the number of chunk files, and therefore on the merge fan-in.
pub const DEFAULT_MAX_TMP_FILES: usize = 1024;
/// Default compressed stream buffer size.
pub const DEFAULT_ZIP_BUF_SIZE: usize = 2048;
/// Default chunk file read/write buffer size.
pub const DEFAULT_RW_BUF_SIZE: usize = 64 * 1024;

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Invalid sorter configuration, reported before any file work starts.
    Config(String),
    /// Temporary directory or file creation error.
    TempDir(io::Error),
    /// Workers thread pool initialization error.
    ThreadPoolBuildError(rayon::ThreadPoolBuildError),
    /// Common I/O error.
    IO(io::Error),
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::Config(_) => None,
            SortError::TempDir(err) => Some(err),
            SortError::ThreadPoolBuildError(err) => Some(err),
            SortError::IO(err) => Some(err),
        }
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::Config(msg) => write!(f, "invalid configuration: {}", msg),
            SortError::TempDir(err) => write!(f, "temporary directory or file not created: {}", err),
            SortError::ThreadPoolBuildError(err) => write!(f, "thread pool initialization failed: {}", err),
            SortError::IO(err) => write!(f, "I/O operation failed: {}", err),
        }
    }
}

impl From<io::Error> for SortError {
    fn from(err: io::Error) -> Self {
        SortError::IO(err)
    }
}

/// External sorter builder. Provides methods for [`ExternalSorter`] initialization.
#[derive(Clone)]
pub struct ExternalSorterBuilder {
    /// Number of threads to be used to sort data in parallel.
    threads_number: Option<usize>,
    /// Directory to be used to store temporary data.
    tmp_dir: Option<Box<Path>>,
    /// Bound on the number of chunk files (merge fan-in).
    max_tmp_files: usize,
    /// Memory budget for one in-memory block; detected when not set.
    memory_limit: Option<u64>,
    /// Whether to sort in-memory blocks on the rayon thread pool.
    sort_in_parallel: bool,
    /// Whether to gzip-compress chunk files.
    use_zip: bool,
    /// Compressed stream buffer size.
    zip_buf_size: usize,
    /// Whether to drop duplicated lines from the output.
    remove_duplicates: bool,
    /// Number of input header lines copied verbatim and excluded from sorting.
    header_lines: usize,
    /// Chunk file read/write buffer size.
    rw_buf_size: usize,
}

impl ExternalSorterBuilder {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        ExternalSorterBuilder::default()
    }

    /// Builds an [`ExternalSorter`] instance using provided configuration.
    /// Fails fast on an invalid configuration, before any file work begins.
    pub fn build(self) -> Result<ExternalSorter, SortError> {
        if self.max_tmp_files == 0 {
            return Err(SortError::Config("temporary file bound must be at least 1".into()));
        }
        if self.rw_buf_size == 0 {
            return Err(SortError::Config("read/write buffer size must be non-zero".into()));
        }
        if self.use_zip && self.zip_buf_size == 0 {
            return Err(SortError::Config("compression buffer size must be non-zero".into()));
        }
        if self.memory_limit == Some(0) {
            return Err(SortError::Config("memory limit must be non-zero".into()));
        }

        let thread_pool = if self.sort_in_parallel {
            Some(ExternalSorter::init_thread_pool(self.threads_number)?)
        } else {
            None
        };
        let tmp_dir = ExternalSorter::init_tmp_directory(self.tmp_dir.as_deref())?;

        return Ok(ExternalSorter {
            thread_pool,
            tmp_dir,
            max_tmp_files: self.max_tmp_files,
            memory_limit: self.memory_limit,
            compression: self.use_zip.then_some(self.zip_buf_size),
            remove_duplicates: self.remove_duplicates,
            header_lines: self.header_lines,
            rw_buf_size: self.rw_buf_size,
        });
    }

    /// Sets number of threads to be used to sort data in parallel.
    pub fn with_threads_number(mut self, threads_number: usize) -> ExternalSorterBuilder {
        self.threads_number = Some(threads_number);
        return self;
    }

    /// Sets directory to be used to store temporary data.
    pub fn with_tmp_dir(mut self, path: &Path) -> ExternalSorterBuilder {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets the bound on the number of chunk files (merge fan-in).
    pub fn with_max_tmp_files(mut self, max_tmp_files: usize) -> ExternalSorterBuilder {
        self.max_tmp_files = max_tmp_files;
        return self;
    }

    /// Sets the memory budget for one in-memory block, overriding available
    /// memory detection.
    pub fn with_memory_limit(mut self, memory_limit: u64) -> ExternalSorterBuilder {
        self.memory_limit = Some(memory_limit);
        return self;
    }

    /// Enables or disables sorting of in-memory blocks on a thread pool.
    pub fn with_parallel_sort(mut self, enabled: bool) -> ExternalSorterBuilder {
        self.sort_in_parallel = enabled;
        return self;
    }

    /// Enables or disables gzip compression of chunk files.
    pub fn with_compression(mut self, enabled: bool) -> ExternalSorterBuilder {
        self.use_zip = enabled;
        return self;
    }

    /// Sets the compressed stream buffer size.
    pub fn with_zip_buf_size(mut self, buf_size: usize) -> ExternalSorterBuilder {
        self.zip_buf_size = buf_size;
        return self;
    }

    /// Enables or disables dropping of duplicated lines from the output.
    pub fn with_remove_duplicates(mut self, enabled: bool) -> ExternalSorterBuilder {
        self.remove_duplicates = enabled;
        return self;
    }

    /// Sets the number of input header lines copied verbatim to the output and
    /// excluded from sorting and deduplication.
    pub fn with_header_lines(mut self, header_lines: usize) -> ExternalSorterBuilder {
        self.header_lines = header_lines;
        return self;
    }

    /// Sets chunk read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> ExternalSorterBuilder {
        self.rw_buf_size = buf_size;
        return self;
    }
}

impl Default for ExternalSorterBuilder {
    fn default() -> Self {
        ExternalSorterBuilder {
            threads_number: None,
            tmp_dir: None,
            max_tmp_files: DEFAULT_MAX_TMP_FILES,
            memory_limit: None,
            sort_in_parallel: false,
            use_zip: false,
            zip_buf_size: DEFAULT_ZIP_BUF_SIZE,
            remove_duplicates: false,
            header_lines: 0,
            rw_buf_size: DEFAULT_RW_BUF_SIZE,
        }
    }
}

/// External sorter.
///
/// Sorts a newline-delimited text file in two phases: the split phase reads
/// the input in memory-bounded blocks, sorts each block and writes it to a
/// temporary chunk file; the merge phase streams the global minimum across all
/// chunks into the output file. Chunk files are deleted by the time sorting
/// returns, on both success and failure paths.
#[derive(Debug)]
pub struct ExternalSorter {
    /// Sorting thread pool; present when parallel block sorting is enabled.
    thread_pool: Option<rayon::ThreadPool>,
    /// Directory to be used to store temporary data.
    tmp_dir: tempfile::TempDir,
    max_tmp_files: usize,
    memory_limit: Option<u64>,
    compression: Option<usize>,
    remove_duplicates: bool,
    header_lines: usize,
    rw_buf_size: usize,
}

impl ExternalSorter {
    fn init_thread_pool(threads_number: Option<usize>) -> Result<rayon::ThreadPool, SortError> {
        let mut thread_pool_builder = rayon::ThreadPoolBuilder::new();

        if let Some(threads_number) = threads_number {
            log::info!("initializing thread-pool (threads: {})", threads_number);
            thread_pool_builder = thread_pool_builder.num_threads(threads_number);
        } else {
            log::info!("initializing thread-pool (threads: default)");
        }
        let thread_pool = thread_pool_builder
            .build()
            .map_err(|err| SortError::ThreadPoolBuildError(err))?;

        return Ok(thread_pool);
    }

    fn init_tmp_directory(tmp_path: Option<&Path>) -> Result<tempfile::TempDir, SortError> {
        let tmp_dir = if let Some(tmp_path) = tmp_path {
            tempfile::tempdir_in(tmp_path)
        } else {
            tempfile::tempdir()
        }
        .map_err(|err| SortError::TempDir(err))?;

        log::info!("using {} as a temporary directory", tmp_dir.path().display());

        return Ok(tmp_dir);
    }

    /// Sorts `input` into `output` using the natural lexicographic line order.
    /// Returns the number of data lines written (header lines excluded).
    ///
    /// # Arguments
    /// * `input` - Newline-delimited text file to be sorted
    /// * `output` - Result file; overwritten if it exists
    pub fn sort(&self, input: &Path, output: &Path) -> Result<u64, SortError> {
        self.sort_by(input, output, |a: &str, b: &str| a.cmp(b))
    }

    /// Sorts `input` into `output` using a custom line compare function, e.g.
    /// language-aware collation. Returns the number of data lines written
    /// (header lines excluded).
    ///
    /// # Arguments
    /// * `input` - Newline-delimited text file to be sorted
    /// * `output` - Result file; overwritten if it exists
    /// * `compare` - Function defining a total order over line content
    pub fn sort_by<F>(&self, input: &Path, output: &Path, compare: F) -> Result<u64, SortError>
    where
        F: Fn(&str, &str) -> Ordering + Sync + Send + Copy,
    {
        log::info!("sorting {} into {}", input.display(), output.display());

        let input_file = fs::File::open(input)?;
        let file_size = input_file.metadata()?.len();
        let reader = io::BufReader::new(input_file);

        let (header, chunks) = self.split(reader, file_size, compare)?;

        let mut writer = io::BufWriter::new(fs::File::create(output)?);
        let written = self.merge(&header, chunks, &mut writer, compare)?;
        writer.flush()?;

        log::info!("sort finished: {} data lines written", written);

        return Ok(written);
    }

    /// Split phase: reads the input in memory-bounded blocks, sorts each block
    /// and writes it to a chunk file. Returns the retained header lines and the
    /// ordered chunk file list.
    fn split<F>(
        &self,
        mut reader: impl BufRead,
        file_size: u64,
        compare: F,
    ) -> Result<(Vec<String>, Vec<ChunkFile>), SortError>
    where
        F: Fn(&str, &str) -> Ordering + Sync + Send + Copy,
    {
        let header = Self::read_header(&mut reader, self.header_lines)?;

        let block_size = usize::try_from(self.block_size(file_size)).unwrap_or(usize::MAX);
        log::debug!("splitting input into blocks of at most {} estimated bytes", block_size);

        let mut chunks = Vec::new();
        let mut buffer = SizeLimitedBuffer::new(block_size);

        for line in reader.lines() {
            buffer.push(line?);

            // The last permitted chunk absorbs the rest of the input so the
            // merge fan-in never exceeds the temporary file bound.
            if buffer.is_full() && chunks.len() + 1 < self.max_tmp_files {
                chunks.push(self.write_chunk(&header, buffer, compare)?);
                buffer = SizeLimitedBuffer::new(block_size);
            }
        }

        if !buffer.is_empty() {
            chunks.push(self.write_chunk(&header, buffer, compare)?);
        }

        log::debug!("split phase done, {} chunks created", chunks.len());

        return Ok((header, chunks));
    }

    /// Merge phase: writes the header, then streams the merged (optionally
    /// deduplicated) chunk lines into `writer`. Chunk files are deleted when
    /// this returns, on both success and failure paths.
    fn merge<F, W>(
        &self,
        header: &[String],
        chunks: Vec<ChunkFile>,
        writer: &mut W,
        compare: F,
    ) -> Result<u64, SortError>
    where
        F: Fn(&str, &str) -> Ordering + Sync + Send + Copy,
        W: Write,
    {
        log::debug!("merging {} sorted chunks", chunks.len());

        let mut cursors = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let mut cursor = chunk.open()?;
            // every chunk carries the header block; it is written once below
            cursor.skip(header.len())?;
            cursors.push(cursor);
        }

        for line in header {
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
        }

        let merger = BinaryHeapMerger::new(cursors, compare, self.remove_duplicates);

        let mut written = 0u64;
        for line in merger {
            let line = line?;
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
            written += 1;
        }

        return Ok(written);
    }

    /// Picks the in-memory block size for the split phase, in size-estimator
    /// currency: `max(ceil(2 * file_size / max_tmp_files), memory_budget / 2)`.
    /// The estimator counts roughly two bytes per input byte, so `2 * file_size`
    /// approximates the input's resident footprint. The first term keeps the
    /// chunk count within the temporary file bound, the second grows blocks
    /// when available memory allows fewer, larger chunks.
    fn block_size(&self, file_size: u64) -> u64 {
        let memory_budget = match self.memory_limit {
            Some(limit) => limit,
            None => {
                let system = System::new_all();
                let available = system.available_memory();
                log::debug!("detected {} bytes of available memory", available);
                available
            }
        };

        let per_chunk = (2 * file_size).div_ceil(self.max_tmp_files as u64);

        return per_chunk.max(memory_budget / 2);
    }

    fn write_chunk<F>(
        &self,
        header: &[String],
        mut buffer: SizeLimitedBuffer,
        compare: F,
    ) -> Result<ChunkFile, SortError>
    where
        F: Fn(&str, &str) -> Ordering + Sync + Send + Copy,
    {
        log::debug!("sorting chunk data ({} lines) ...", buffer.len());
        match &self.thread_pool {
            Some(thread_pool) => thread_pool.install(|| buffer.par_sort_by(|a, b| compare(a, b))),
            None => buffer.sort_by(compare),
        }

        log::debug!("saving chunk data");
        let chunk = ChunkFile::create(
            self.tmp_dir.path(),
            header,
            buffer,
            compare,
            self.remove_duplicates,
            self.compression,
            self.rw_buf_size,
        )?;

        return Ok(chunk);
    }

    fn read_header(reader: &mut impl BufRead, count: usize) -> io::Result<Vec<String>> {
        let mut header = Vec::with_capacity(count);
        for line in reader.by_ref().lines().take(count) {
            header.push(line?);
        }

        return Ok(header);
    }
}
