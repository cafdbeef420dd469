//! Bounded priority queue backed by a binomial heap.
//!
//! The mode picks the fast path: `Highest` keeps the largest priority at
//! the heap roots so `pull_highest` is cheap, `Lowest` the inverse. On
//! capacity overflow the item farthest from the mode's extreme is dropped.

use crate::binheap::{heap_key_ops_u64, BinomialHeap, HeapMode};
use crate::walk::WalkAction;
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PqueueMode {
    Highest,
    Lowest,
}

pub struct PriorityQueue<T> {
    heap: Mutex<BinomialHeap<T>>,
    mode: PqueueMode,
    max_size: usize,
}

impl<T> PriorityQueue<T> {
    pub fn new(mode: PqueueMode, max_size: usize) -> Self {
        let heap_mode = match mode {
            PqueueMode::Highest => HeapMode::Max,
            PqueueMode::Lowest => HeapMode::Min,
        };
        Self {
            heap: Mutex::new(BinomialHeap::new(heap_key_ops_u64(), heap_mode)),
            mode,
            max_size,
        }
    }

    pub fn mode(&self) -> PqueueMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert; when the queue is over capacity the entry farthest from the
    /// mode's extreme is evicted (and dropped).
    pub fn insert(&self, prio: u64, value: T) {
        let mut heap = self.heap.lock();
        heap.insert(&prio.to_ne_bytes(), value);
        while heap.len() > self.max_size {
            let _ = match self.mode {
                PqueueMode::Highest => heap.delete_minimum(),
                PqueueMode::Lowest => heap.delete_maximum(),
            };
        }
    }

    pub fn pull_highest(&self) -> Option<(u64, T)> {
        self.heap
            .lock()
            .delete_maximum()
            .ok()
            .map(|(key, value)| (decode_prio(&key), value))
    }

    pub fn pull_lowest(&self) -> Option<(u64, T)> {
        self.heap
            .lock()
            .delete_minimum()
            .ok()
            .map(|(key, value)| (decode_prio(&key), value))
    }

    /// Visit every entry with its priority.
    pub fn walk(&self, mut cb: impl FnMut(u64, &T) -> WalkAction) -> usize {
        self.heap.lock().walk(|key, value| cb(decode_prio(key), value))
    }
}

impl<T: PartialEq> PriorityQueue<T> {
    /// Remove the first entry whose value equals `value`.
    pub fn remove(&self, value: &T) -> bool {
        let mut heap = self.heap.lock();
        let mut found: Option<Vec<u8>> = None;
        heap.walk(|key, v| {
            if v == value {
                found = Some(key.to_vec());
                WalkAction::Stop
            } else {
                WalkAction::Continue
            }
        });
        match found {
            Some(key) => heap.delete(&key).is_ok(),
            None => false,
        }
    }
}

fn decode_prio(key: &[u8]) -> u64 {
    key.try_into().map(u64::from_ne_bytes).unwrap_or_default()
}
