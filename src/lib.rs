//! `line-ext-sort` is an external merge sort implementation for huge line-oriented text files.
//!
//! External sorting is a class of sorting algorithms that can handle massive amounts of data. External sorting
//! is required when the data being sorted do not fit into the main memory (RAM) of a computer and instead must be
//! resided in slower external memory, usually a hard disk drive. Sorting is achieved in two passes. During the
//! first pass it sorts chunks of data that each fit in RAM, during the second pass it merges the sorted chunks
//! together. For more information see [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! `line-ext-sort` supports the following features:
//!
//! * **Custom ordering:**
//!   lines are compared with an injected compare function, so language-aware collation can be
//!   supplied by the caller while the natural lexicographic order is the default.
//! * **Header passthrough:**
//!   a fixed-count input prefix is copied verbatim to the top of the output and excluded from
//!   sorting and deduplication.
//! * **Deduplication:**
//!   duplicated lines can be dropped from the output, including runs that span multiple chunks.
//! * **Bounded resources:**
//!   the number of temporary chunk files (and therefore the merge fan-in) is bounded, the
//!   in-memory block size adapts to the available memory, and chunk files are removed by the
//!   time sorting returns, on both success and failure paths.
//! * **Chunk compression:**
//!   chunk files can be gzip-compressed with speed-optimized settings to trade CPU for disk space.
//! * **Multithreading support:**
//!   in-memory blocks can be sorted on a thread pool utilizing maximum CPU resources and
//!   reducing sorting time.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use line_ext_sort::{ExternalSorter, ExternalSorterBuilder};
//!
//! fn main() {
//!     let sorter: ExternalSorter = ExternalSorterBuilder::new()
//!         .with_tmp_dir(Path::new("./"))
//!         .with_parallel_sort(true)
//!         .with_remove_duplicates(true)
//!         .build()
//!         .unwrap();
//!
//!     let written = sorter
//!         .sort(Path::new("words.txt"), Path::new("words.sorted.txt"))
//!         .unwrap();
//!     println!("{} lines written", written);
//! }
//! ```

pub mod buffer;
pub mod chunk;
pub mod merger;
pub mod sort;

pub use buffer::{estimated_line_size, SizeLimitedBuffer};
pub use chunk::{ChunkCursor, ChunkFile};
pub use merger::BinaryHeapMerger;
pub use sort::{ExternalSorter, ExternalSorterBuilder, SortError};
