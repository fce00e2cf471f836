//! Binary heap merger.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::io;

use crate::chunk::ChunkCursor;

/// Binary heap merger implementation.
/// Merges multiple sorted chunk cursors into a single sorted line stream.
/// Time complexity is *m* \* log(*n*) in worst case where *m* is the number of lines,
/// *n* is the number of chunks (inputs).
pub struct BinaryHeapMerger<F>
where
    F: Fn(&str, &str) -> Ordering + Copy,
{
    heap: BinaryHeap<MergeEntry<F>>,
    compare: F,
    remove_duplicates: bool,
    last_written: Option<String>,
}

impl<F> BinaryHeapMerger<F>
where
    F: Fn(&str, &str) -> Ordering + Copy,
{
    /// Creates an instance of a binary heap merger using chunk cursors as inputs.
    /// Chunk lines should be sorted in ascending order under `compare` otherwise
    /// the result is undefined. Cursors that are already exhausted are discarded.
    ///
    /// With `remove_duplicates` set, a line equal to the previously written one
    /// under `compare` is skipped, collapsing runs of any length even when they
    /// span multiple chunks.
    pub fn new<I>(cursors: I, compare: F, remove_duplicates: bool) -> Self
    where
        I: IntoIterator<Item = ChunkCursor>,
    {
        let mut heap = BinaryHeap::new();
        for (index, cursor) in cursors.into_iter().enumerate() {
            if !cursor.is_empty() {
                heap.push(MergeEntry {
                    cursor,
                    index,
                    compare,
                });
            }
        }

        return BinaryHeapMerger {
            heap,
            compare,
            remove_duplicates,
            last_written: None,
        };
    }
}

impl<F> Iterator for BinaryHeapMerger<F>
where
    F: Fn(&str, &str) -> Ordering + Copy,
{
    type Item = io::Result<String>;

    /// Returns the next line from the inputs in ascending order.
    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let mut entry = self.heap.pop()?;

            let line = match entry.cursor.pop() {
                Ok(Some(line)) => line,
                // entries are only kept in the heap while non-empty
                Ok(None) => continue,
                Err(err) => return Some(Err(err)),
            };

            if !entry.cursor.is_empty() {
                self.heap.push(entry);
            }

            if self.remove_duplicates {
                if let Some(last) = &self.last_written {
                    if (self.compare)(last, &line) == Ordering::Equal {
                        continue;
                    }
                }
                self.last_written = Some(line.clone());
            }

            return Some(Ok(line));
        }
    }
}

/// A live chunk cursor keyed by its current head line.
///
/// The heap is a max-heap by default so the ordering is reversed to convert it
/// to a min-heap. Ties are broken by chunk index, which makes the merged output
/// deterministic regardless of how the input was chunked.
struct MergeEntry<F>
where
    F: Fn(&str, &str) -> Ordering + Copy,
{
    cursor: ChunkCursor,
    index: usize,
    compare: F,
}

impl<F> Ord for MergeEntry<F>
where
    F: Fn(&str, &str) -> Ordering + Copy,
{
    fn cmp(&self, other: &Self) -> Ordering {
        let by_line = match (self.cursor.peek(), other.cursor.peek()) {
            (Some(a), Some(b)) => (self.compare)(a, b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };

        by_line.then(self.index.cmp(&other.index)).reverse()
    }
}

impl<F> PartialOrd for MergeEntry<F>
where
    F: Fn(&str, &str) -> Ordering + Copy,
{
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<F> PartialEq for MergeEntry<F>
where
    F: Fn(&str, &str) -> Ordering + Copy,
{
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<F> Eq for MergeEntry<F> where F: Fn(&str, &str) -> Ordering + Copy {}
