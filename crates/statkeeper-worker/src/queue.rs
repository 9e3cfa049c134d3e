//! Indexed max-priority queue.
//!
//! An array-backed binary max-heap plus a map from key to heap position.
//! The map is updated on every swap, which makes re-scoring and removal of
//! an arbitrary key O(log n) instead of the O(n) search a plain heap needs.
//!
//! Ordering is by descending score; equal scores are ordered by first
//! insertion, so equally stale objects are served first-come first-served.
//! Re-pushing an existing key keeps its original insertion sequence.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

use statkeeper_entity::AnalysisJob;

/// An item that can be ordered by the [`PriorityQueue`].
pub trait QueueItem {
    /// Unique key; at most one entry per key lives in the queue.
    type Key: Eq + Hash + Clone;

    /// The item's key.
    fn queue_key(&self) -> Self::Key;

    /// The item's score (higher = popped first).
    fn score(&self) -> f64;
}

impl QueueItem for AnalysisJob {
    type Key = String;

    fn queue_key(&self) -> String {
        self.key().to_string()
    }

    fn score(&self) -> f64 {
        self.priority()
    }
}

/// One heap slot.
struct Entry<T: QueueItem> {
    key: T::Key,
    score: f64,
    seq: u64,
    item: T,
}

impl<T: QueueItem> Entry<T> {
    /// `Greater` means `self` must be popped before `other`.
    fn precedence(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Heap array and key index, always mutated together under one lock.
struct HeapState<T: QueueItem> {
    heap: Vec<Entry<T>>,
    index: HashMap<T::Key, usize>,
    next_seq: u64,
}

impl<T: QueueItem> HeapState<T> {
    fn new() -> Self {
        Self {
            heap: Vec::new(),
            index: HashMap::new(),
            next_seq: 0,
        }
    }

    fn push(&mut self, item: T) -> bool {
        let key = item.queue_key();
        let score = item.score();

        if let Some(&pos) = self.index.get(&key) {
            let entry = &mut self.heap[pos];
            entry.score = score;
            entry.item = item;
            self.fix(pos);
            return false;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let pos = self.heap.len();
        self.index.insert(key.clone(), pos);
        self.heap.push(Entry {
            key,
            score,
            seq,
            item,
        });
        self.sift_up(pos);
        true
    }

    fn pop_max(&mut self) -> Option<T> {
        if self.heap.is_empty() {
            return None;
        }
        self.remove_at(0)
    }

    fn remove<Q>(&mut self, key: &Q) -> Option<T>
    where
        T::Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let pos = *self.index.get(key)?;
        self.remove_at(pos)
    }

    /// Remove the entry at `pos`, moving the last entry into its place.
    fn remove_at(&mut self, pos: usize) -> Option<T> {
        let last = self.heap.len().checked_sub(1)?;
        self.swap(pos, last);
        let entry = self.heap.pop()?;
        self.index.remove(&entry.key);
        if pos < self.heap.len() {
            self.fix(pos);
        }
        Some(entry.item)
    }

    /// Restore the heap property around `pos` after its score changed.
    fn fix(&mut self, pos: usize) {
        if !self.sift_up(pos) {
            self.sift_down(pos);
        }
    }

    /// Returns `true` if the entry moved.
    fn sift_up(&mut self, mut pos: usize) -> bool {
        let start = pos;
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if self.heap[pos].precedence(&self.heap[parent]) != Ordering::Greater {
                break;
            }
            self.swap(pos, parent);
            pos = parent;
        }
        pos != start
    }

    fn sift_down(&mut self, mut pos: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * pos + 1;
            let right = left + 1;
            let mut best = pos;

            if left < len && self.heap[left].precedence(&self.heap[best]) == Ordering::Greater {
                best = left;
            }
            if right < len && self.heap[right].precedence(&self.heap[best]) == Ordering::Greater {
                best = right;
            }
            if best == pos {
                break;
            }
            self.swap(pos, best);
            pos = best;
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.heap.swap(a, b);
        if let Some(slot) = self.index.get_mut(&self.heap[a].key) {
            *slot = a;
        }
        if let Some(slot) = self.index.get_mut(&self.heap[b].key) {
            *slot = b;
        }
    }

    #[cfg(test)]
    fn assert_invariants(&self) {
        assert_eq!(self.heap.len(), self.index.len(), "index size drifted");
        for (pos, entry) in self.heap.iter().enumerate() {
            assert_eq!(self.index.get(&entry.key), Some(&pos), "index out of sync");
            if pos > 0 {
                let parent = &self.heap[(pos - 1) / 2];
                assert_ne!(
                    entry.precedence(parent),
                    Ordering::Greater,
                    "heap property violated at {pos}"
                );
            }
        }
    }
}

/// A keyed max-priority queue, safe to share between tasks.
///
/// Every operation takes one short-lived lock over the heap and its index,
/// so any interleaving of callers preserves both invariants.
pub struct PriorityQueue<T: QueueItem> {
    state: Mutex<HeapState<T>>,
}

impl<T: QueueItem> std::fmt::Debug for PriorityQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityQueue")
            .field("len", &self.len())
            .finish()
    }
}

impl<T: QueueItem> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: QueueItem> PriorityQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HeapState::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HeapState<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert `item`, or replace the entry with the same key and re-heapify.
    ///
    /// Returns `true` if the key was new. Repeated pushes of one key never
    /// grow the queue; the latest score wins.
    pub fn push(&self, item: T) -> bool {
        self.lock().push(item)
    }

    /// Remove and return the highest-priority entry.
    pub fn pop_max(&self) -> Option<T> {
        self.lock().pop_max()
    }

    /// Remove the entry for `key`. Returns `None` if absent.
    pub fn remove<Q>(&self, key: &Q) -> Option<T>
    where
        T::Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lock().remove(key)
    }

    /// Whether an entry for `key` is queued.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        T::Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lock().index.contains_key(key)
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().heap.is_empty()
    }

    /// Keys of all queued entries, in no particular order.
    pub fn keys(&self) -> Vec<T::Key> {
        self.lock().index.keys().cloned().collect()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.heap.clear();
        state.index.clear();
    }
}

impl<T: QueueItem + Clone> PriorityQueue<T> {
    /// The highest-priority entry, without removing it.
    pub fn peek(&self) -> Option<T> {
        self.lock().heap.first().map(|entry| entry.item.clone())
    }

    /// All entries in pop order, without removing them.
    pub fn snapshot(&self) -> Vec<T> {
        let state = self.lock();
        let mut entries: Vec<&Entry<T>> = state.heap.iter().collect();
        entries.sort_by(|a, b| b.precedence(a));
        entries.into_iter().map(|entry| entry.item.clone()).collect()
    }
}
