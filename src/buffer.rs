//! Line size estimation and the size-limited chunk buffer.

use std::cmp::Ordering;
use std::mem;

use rayon;

/// Per-line bookkeeping overhead: the string header (pointer, length, capacity)
/// plus allocator metadata, scaled by the detected pointer width.
const LINE_OVERHEAD: usize = 6 * mem::size_of::<usize>();

/// Estimates the resident memory footprint of a text line.
///
/// The estimate counts two bytes per input byte plus a fixed per-line overhead.
/// It is deliberately pessimistic: it may over-estimate the real footprint but
/// never under-estimates it, so a buffer bounded by it stays within its memory
/// budget.
pub fn estimated_line_size(line: &str) -> usize {
    LINE_OVERHEAD + 2 * line.len()
}

/// Line buffer limited by estimated memory consumption.
pub struct SizeLimitedBuffer {
    limit: usize,
    current_size: usize,
    lines: Vec<String>,
}

impl SizeLimitedBuffer {
    pub fn new(limit: usize) -> Self {
        SizeLimitedBuffer {
            limit,
            current_size: 0,
            lines: Vec::new(),
        }
    }

    /// Adds a new line to the buffer.
    pub fn push(&mut self, line: String) {
        self.current_size += estimated_line_size(&line);
        self.lines.push(line);
    }

    /// Returns buffer length.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Estimated memory consumed by the buffered lines.
    pub fn mem_size(&self) -> usize {
        self.current_size
    }

    /// Checks if the buffer reached its memory limit.
    pub fn is_full(&self) -> bool {
        self.current_size >= self.limit
    }

    /// Sorts the buffered lines sequentially.
    pub fn sort_by<F>(&mut self, compare: F)
    where
        F: Fn(&str, &str) -> Ordering,
    {
        self.lines.sort_by(|a, b| compare(a, b));
    }
}

impl IntoIterator for SizeLimitedBuffer {
    type Item = String;
    type IntoIter = <Vec<String> as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.lines.into_iter()
    }
}

impl rayon::slice::ParallelSliceMut<String> for SizeLimitedBuffer {
    fn as_parallel_slice_mut(&mut self) -> &mut [String] {
        self.lines.as_mut_slice()
    }
}

#[cfg(test)]
mod test {
    use super::{estimated_line_size, SizeLimitedBuffer};

    #[test]
    fn test_estimate_never_undercounts_content() {
        for line in ["", "a", "zymurgy", "a longer line with spaces"] {
            assert!(estimated_line_size(line) >= line.len());
        }
    }

    #[test]
    fn test_estimate_depends_on_length_only() {
        assert!(estimated_line_size("ab") > estimated_line_size("a"));
        assert_eq!(estimated_line_size("aa"), estimated_line_size("bb"));
    }

    #[test]
    fn test_size_limited_buffer() {
        let limit = estimated_line_size("apple") + estimated_line_size("banana");
        let mut buffer = SizeLimitedBuffer::new(limit);

        buffer.push("apple".to_owned());
        assert_eq!(buffer.is_full(), false);
        buffer.push("banana".to_owned());
        assert_eq!(buffer.is_full(), true);

        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.mem_size(), limit);

        let data = Vec::from_iter(buffer);
        assert_eq!(data, vec!["apple".to_owned(), "banana".to_owned()]);
    }

    #[test]
    fn test_buffer_sort() {
        let mut buffer = SizeLimitedBuffer::new(usize::MAX);
        for line in ["cherry", "apple", "banana"] {
            buffer.push(line.to_owned());
        }
        buffer.sort_by(|a, b| a.cmp(b));

        let data = Vec::from_iter(buffer);
        assert_eq!(data, vec!["apple", "banana", "cherry"]);
    }
}
