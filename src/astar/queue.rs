// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use std::collections::BinaryHeap;

use crate::sorted::SortedVec;

/// Frontier of discovered, but not yet expanded waypoints, ordered by their
/// estimated total cost (`fcost`).
pub trait OpenSet<K> {
    /// Queues `key` with the provided `fcost`. `previous` is the `fcost` under which
    /// `key` is already queued, if any.
    fn insert(&mut self, key: K, fcost: f64, previous: Option<f64>);

    /// Removes and returns the key with the lowest `fcost`.
    fn pop_min(&mut self) -> Option<K>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
struct QueueItem<K> {
    key: K,
    fcost: f64,
    seq: u64,
}

impl<K> PartialEq for QueueItem<K> {
    fn eq(&self, other: &Self) -> bool {
        self.fcost.eq(&other.fcost) && self.seq == other.seq
    }
}

impl<K> PartialOrd for QueueItem<K> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> Eq for QueueItem<K> {}

impl<K> Ord for QueueItem<K> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // NOTE: We revert the order of comparison,
        // as lower scores are considered better ("higher"),
        // and Rust's BinaryHeap is a max-heap. Ties go to the older item.
        other
            .fcost
            .total_cmp(&self.fcost)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// [OpenSet] backed by a binary heap with lazy deletion.
///
/// Re-inserting a key pushes a second entry instead of updating the first one.
/// The stale entry (always with a higher `fcost`) stays in the heap and is popped
/// after the key was already expanded, so [find_path](super::find_path)
/// discards keys which are already closed.
#[derive(Debug, Clone)]
pub struct HeapOpenSet<K> {
    heap: BinaryHeap<QueueItem<K>>,
    seq: u64,
}

impl<K> Default for HeapOpenSet<K> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::default(),
            seq: 0,
        }
    }
}

impl<K> HeapOpenSet<K> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<K> OpenSet<K> for HeapOpenSet<K> {
    fn insert(&mut self, key: K, fcost: f64, _previous: Option<f64>) {
        self.seq += 1;
        self.heap.push(QueueItem {
            key,
            fcost,
            seq: self.seq,
        });
    }

    fn pop_min(&mut self) -> Option<K> {
        self.heap.pop().map(|item| item.key)
    }

    fn len(&self) -> usize {
        self.heap.len()
    }
}

/// [OpenSet] backed by a sorted array with eager removal: re-inserting a key
/// first removes its previous entry, so every key is queued at most once.
pub struct SortedOpenSet<K> {
    entries: SortedVec<(K, f64), fn(&(K, f64)) -> f64>,
}

fn entry_fcost<K>(entry: &(K, f64)) -> f64 {
    entry.1
}

impl<K> Default for SortedOpenSet<K> {
    fn default() -> Self {
        Self {
            entries: SortedVec::new(entry_fcost::<K> as fn(&(K, f64)) -> f64),
        }
    }
}

impl<K> SortedOpenSet<K> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<K: PartialEq> OpenSet<K> for SortedOpenSet<K> {
    fn insert(&mut self, key: K, fcost: f64, previous: Option<f64>) {
        if let Some(previous) = previous {
            self.entries.remove_where(previous, |(k, _)| *k == key);
        }
        self.entries.add((key, fcost));
    }

    fn pop_min(&mut self) -> Option<K> {
        self.entries.shift().map(|(key, _)| key)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
