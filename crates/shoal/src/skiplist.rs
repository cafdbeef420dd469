//! Skip list over byte keys. Single-threaded; the caller ensures exclusive
//! access.

use crate::comparators::CmpFn;
use crate::walk::WalkAction;
use rand::Rng;
use std::cmp::Ordering;
use std::ptr;

struct Node<T> {
    key: Box<[u8]>,
    value: T,
    /// Forward links, one per layer the node participates in.
    next: Vec<*mut Node<T>>,
}

pub struct SkipList<T> {
    /// Forward links out of the (keyless) head, one per layer.
    head: Vec<*mut Node<T>>,
    probability: f64,
    cmp: CmpFn,
    count: usize,
}

// Safety: raw pointers never escape; the &mut self API already serializes
// all access.
unsafe impl<T: Send> Send for SkipList<T> {}

impl<T> SkipList<T> {
    /// `num_layers` bounds the tower height; `probability` is the chance a
    /// node is promoted one layer up (typically 0.5).
    pub fn new(num_layers: usize, probability: f64, cmp: CmpFn) -> Self {
        let layers = num_layers.max(1);
        Self {
            head: vec![ptr::null_mut(); layers],
            probability,
            cmp,
            count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn random_height(&self) -> usize {
        let mut rng = rand::thread_rng();
        let mut height = 1;
        while height < self.head.len() && rng.gen_bool(self.probability) {
            height += 1;
        }
        height
    }

    /// For each layer, the last node whose key precedes `key` (null when
    /// that is the head).
    unsafe fn predecessors(&self, key: &[u8]) -> Vec<*mut Node<T>> {
        let layers = self.head.len();
        let mut update = vec![ptr::null_mut(); layers];
        let mut current: *mut Node<T> = ptr::null_mut();

        for layer in (0..layers).rev() {
            let mut next = if current.is_null() {
                self.head[layer]
            } else {
                (*current).next[layer]
            };
            while !next.is_null() && (self.cmp)(&(*next).key, key) == Ordering::Less {
                current = next;
                next = (*current).next[layer];
            }
            update[layer] = current;
        }
        update
    }

    /// Insert or replace; the previous value comes back on replacement.
    pub fn insert(&mut self, key: &[u8], value: T) -> Option<T> {
        // SAFETY: all node pointers belong to this list; &mut self makes
        // the accesses exclusive.
        unsafe {
            let mut update = self.predecessors(key);
            let candidate = if update[0].is_null() {
                self.head[0]
            } else {
                (*update[0]).next[0]
            };
            if !candidate.is_null() && (self.cmp)(&(*candidate).key, key) == Ordering::Equal {
                return Some(std::mem::replace(&mut (*candidate).value, value));
            }

            let height = self.random_height();
            let node = Box::into_raw(Box::new(Node {
                key: key.into(),
                value,
                next: vec![ptr::null_mut(); height],
            }));

            for layer in 0..height {
                if update[layer].is_null() {
                    (*node).next[layer] = self.head[layer];
                    self.head[layer] = node;
                } else {
                    (*node).next[layer] = (*update[layer]).next[layer];
                    (*update[layer]).next[layer] = node;
                }
            }
            self.count += 1;
            None
        }
    }

    pub fn search(&self, key: &[u8]) -> Option<&T> {
        // SAFETY: read-only traversal of owned nodes.
        unsafe {
            let update = self.predecessors(key);
            let candidate = if update[0].is_null() {
                self.head[0]
            } else {
                (*update[0]).next[0]
            };
            if !candidate.is_null() && (self.cmp)(&(*candidate).key, key) == Ordering::Equal {
                Some(&(*candidate).value)
            } else {
                None
            }
        }
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<T> {
        // SAFETY: as in insert.
        unsafe {
            let mut update = self.predecessors(key);
            let target = if update[0].is_null() {
                self.head[0]
            } else {
                (*update[0]).next[0]
            };
            if target.is_null() || (self.cmp)(&(*target).key, key) != Ordering::Equal {
                return None;
            }

            for layer in 0..(*target).next.len() {
                if update[layer].is_null() {
                    if self.head[layer] == target {
                        self.head[layer] = (*target).next[layer];
                    }
                } else if (*update[layer]).next[layer] == target {
                    (*update[layer]).next[layer] = (*target).next[layer];
                }
            }

            let node = Box::from_raw(target);
            self.count -= 1;
            Some(node.value)
        }
    }

    /// Visit entries in key order. Delete verdicts are applied after the
    /// walk. Returns the number of visits.
    pub fn walk(&mut self, mut cb: impl FnMut(&[u8], &T) -> WalkAction) -> usize {
        let mut visited = 0;
        let mut doomed: Vec<Box<[u8]>> = Vec::new();
        // SAFETY: read-only traversal of the bottom layer.
        unsafe {
            let mut current = self.head[0];
            while !current.is_null() {
                visited += 1;
                match cb(&(*current).key, &(*current).value) {
                    WalkAction::Continue => {}
                    WalkAction::Stop => break,
                    WalkAction::DeleteContinue => doomed.push((*current).key.clone()),
                    WalkAction::DeleteStop => {
                        doomed.push((*current).key.clone());
                        break;
                    }
                }
                current = (*current).next[0];
            }
        }
        for key in doomed {
            self.remove(&key);
        }
        visited
    }
}

impl<T> Drop for SkipList<T> {
    fn drop(&mut self) {
        // SAFETY: exclusive access in drop; walk the bottom layer, which
        // holds every node exactly once.
        unsafe {
            let mut current = self.head[0];
            while !current.is_null() {
                let next = (*current).next[0];
                drop(Box::from_raw(current));
                current = next;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparators::{cmp_bytes, cmp_u32};

    #[test]
    fn test_insert_search_remove() {
        let mut list = SkipList::new(8, 0.5, cmp_bytes);
        assert_eq!(list.insert(b"b", 2), None);
        assert_eq!(list.insert(b"a", 1), None);
        assert_eq!(list.insert(b"c", 3), None);
        assert_eq!(list.len(), 3);

        assert_eq!(list.search(b"b"), Some(&2));
        assert_eq!(list.insert(b"b", 20), Some(2));
        assert_eq!(list.len(), 3);

        assert_eq!(list.remove(b"b"), Some(20));
        assert_eq!(list.search(b"b"), None);
        assert_eq!(list.remove(b"b"), None);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_walk_is_sorted() {
        let mut list = SkipList::new(12, 0.5, cmp_u32);
        for i in [9u32, 1, 7, 3, 5, 0, 8, 2, 6, 4] {
            list.insert(&i.to_ne_bytes(), i);
        }
        let mut seen = Vec::new();
        list.walk(|_, v| {
            seen.push(*v);
            WalkAction::Continue
        });
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_large_churn() {
        let mut list = SkipList::new(16, 0.5, cmp_u32);
        for i in 0..1000u32 {
            list.insert(&i.to_ne_bytes(), i);
        }
        for i in (0..1000u32).step_by(2) {
            assert_eq!(list.remove(&i.to_ne_bytes()), Some(i));
        }
        assert_eq!(list.len(), 500);
        for i in 0..1000u32 {
            let expect = (i % 2 == 1).then_some(i);
            assert_eq!(list.search(&i.to_ne_bytes()).copied(), expect);
        }
    }

    #[test]
    fn test_walk_delete() {
        let mut list = SkipList::new(8, 0.5, cmp_u32);
        for i in 0..10u32 {
            list.insert(&i.to_ne_bytes(), i);
        }
        list.walk(|_, v| {
            if *v < 5 {
                WalkAction::DeleteContinue
            } else {
                WalkAction::Continue
            }
        });
        assert_eq!(list.len(), 5);
        assert_eq!(list.search(&2u32.to_ne_bytes()), None);
        assert_eq!(list.search(&7u32.to_ne_bytes()), Some(&7));
    }
}
