// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bounded keep-top-K selection.
//!
//! The harvest needs "the K most interesting segments" without a post-hoc
//! sort: a bounded heap that evicts its minimum on overflow. Ties and
//! priorities are encoded in the key type's `Ord`.

use crate::arena::SegmentId;
use std::collections::BinaryHeap;
use std::collections::HashSet;
use std::cmp::Reverse;

/// A bounded min-eviction heap over segments.
#[derive(Debug)]
pub struct BoundedHeap<K: Ord + Copy> {
    bound: usize,
    heap: BinaryHeap<Reverse<(K, SegmentId)>>,
}

impl<K: Ord + Copy> BoundedHeap<K> {
    /// A heap keeping at most `bound` entries.
    pub fn new(bound: usize) -> Self {
        Self {
            bound,
            heap: BinaryHeap::with_capacity(bound.min(4_096)),
        }
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// True when nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Insert a segment with the given key. When the heap is full, the
    /// smallest entry is evicted and returned; an insert below the current
    /// minimum evicts the inserted segment itself.
    pub fn insert(&mut self, key: K, id: SegmentId) -> Option<SegmentId> {
        if self.bound == 0 {
            return Some(id);
        }

        if self.heap.len() < self.bound {
            self.heap.push(Reverse((key, id)));
            return None;
        }

        let &Reverse((min_key, _)) = self.heap.peek().expect("heap is non-empty at capacity");
        if key <= min_key {
            return Some(id);
        }

        let Reverse((_, evicted)) = self.heap.pop().expect("heap is non-empty at capacity");
        self.heap.push(Reverse((key, id)));
        Some(evicted)
    }

    /// The retained segments as a set.
    pub fn into_set(self) -> HashSet<SegmentId> {
        self.heap.into_iter().map(|Reverse((_, id))| id).collect()
    }
}
