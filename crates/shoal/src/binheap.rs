//! Binomial heap over byte-encoded keys. Single-threaded.
//!
//! The mode decides which extreme sits at tree roots: `Max` keeps the
//! largest key of each binomial tree at its root, `Min` the smallest, so
//! the mode's own extreme is cheap and the opposite one costs a scan.

use crate::comparators::{self, CmpFn};
use crate::walk::WalkAction;
use std::cmp::Ordering;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapMode {
    Max,
    Min,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HeapError {
    #[error("heap is empty")]
    Empty,
    #[error("key not found")]
    NotFound,
    #[error("cannot merge heaps with different modes")]
    ModeMismatch,
}

/// Key management callbacks: total order plus increment/decrement used by
/// the key-adjustment operations.
#[derive(Clone, Copy)]
pub struct HeapKeyOps {
    pub cmp: CmpFn,
    pub incr: fn(&[u8], u64) -> Vec<u8>,
    pub decr: fn(&[u8], u64) -> Vec<u8>,
}

macro_rules! int_key_ops {
    ($(#[$doc:meta])* $name:ident, $ty:ty, $cmp:path) => {
        $(#[$doc])*
        pub fn $name() -> HeapKeyOps {
            fn incr(key: &[u8], amount: u64) -> Vec<u8> {
                const W: usize = std::mem::size_of::<$ty>();
                let v = key[..W]
                    .try_into()
                    .map(<$ty>::from_ne_bytes)
                    .unwrap_or_default();
                v.wrapping_add(amount as $ty).to_ne_bytes().to_vec()
            }
            fn decr(key: &[u8], amount: u64) -> Vec<u8> {
                const W: usize = std::mem::size_of::<$ty>();
                let v = key[..W]
                    .try_into()
                    .map(<$ty>::from_ne_bytes)
                    .unwrap_or_default();
                v.wrapping_sub(amount as $ty).to_ne_bytes().to_vec()
            }
            HeapKeyOps {
                cmp: $cmp,
                incr,
                decr,
            }
        }
    };
}

int_key_ops!(
    /// Callbacks for 16-bit signed keys.
    heap_key_ops_i16, i16, comparators::cmp_i16
);
int_key_ops!(
    /// Callbacks for 32-bit signed keys.
    heap_key_ops_i32, i32, comparators::cmp_i32
);
int_key_ops!(
    /// Callbacks for 64-bit signed keys.
    heap_key_ops_i64, i64, comparators::cmp_i64
);
int_key_ops!(
    /// Callbacks for 16-bit unsigned keys.
    heap_key_ops_u16, u16, comparators::cmp_u16
);
int_key_ops!(
    /// Callbacks for 32-bit unsigned keys.
    heap_key_ops_u32, u32, comparators::cmp_u32
);
int_key_ops!(
    /// Callbacks for 64-bit unsigned keys.
    heap_key_ops_u64, u64, comparators::cmp_u64
);

macro_rules! float_key_ops {
    ($(#[$doc:meta])* $name:ident, $ty:ty, $cmp:path) => {
        $(#[$doc])*
        pub fn $name() -> HeapKeyOps {
            fn incr(key: &[u8], amount: u64) -> Vec<u8> {
                const W: usize = std::mem::size_of::<$ty>();
                let v = key[..W]
                    .try_into()
                    .map(<$ty>::from_ne_bytes)
                    .unwrap_or_default();
                (v + amount as $ty).to_ne_bytes().to_vec()
            }
            fn decr(key: &[u8], amount: u64) -> Vec<u8> {
                const W: usize = std::mem::size_of::<$ty>();
                let v = key[..W]
                    .try_into()
                    .map(<$ty>::from_ne_bytes)
                    .unwrap_or_default();
                (v - amount as $ty).to_ne_bytes().to_vec()
            }
            HeapKeyOps {
                cmp: $cmp,
                incr,
                decr,
            }
        }
    };
}

float_key_ops!(
    /// Callbacks for 32-bit float keys.
    heap_key_ops_f32, f32, comparators::cmp_f32
);
float_key_ops!(
    /// Callbacks for 64-bit float keys.
    heap_key_ops_f64, f64, comparators::cmp_f64
);

struct Tree<T> {
    key: Vec<u8>,
    value: T,
    order: usize,
    /// Children in decreasing order of their own order.
    children: Vec<Tree<T>>,
}

pub struct BinomialHeap<T> {
    /// Roots in increasing order of tree order; at most one per order.
    roots: Vec<Tree<T>>,
    ops: HeapKeyOps,
    mode: HeapMode,
    count: usize,
}

impl<T> BinomialHeap<T> {
    pub fn new(ops: HeapKeyOps, mode: HeapMode) -> Self {
        Self {
            roots: Vec::new(),
            ops,
            mode,
            count: 0,
        }
    }

    pub fn mode(&self) -> HeapMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// True when `a` belongs above `b` for this heap's mode.
    fn dominates(&self, a: &[u8], b: &[u8]) -> bool {
        let ord = (self.ops.cmp)(a, b);
        match self.mode {
            HeapMode::Max => ord != Ordering::Less,
            HeapMode::Min => ord != Ordering::Greater,
        }
    }

    /// Link two trees of equal order; the dominated root becomes a child.
    fn link(&self, mut a: Tree<T>, mut b: Tree<T>) -> Tree<T> {
        debug_assert_eq!(a.order, b.order);
        if self.dominates(&a.key, &b.key) {
            a.children.push(b);
            a.order += 1;
            a
        } else {
            b.children.push(a);
            b.order += 1;
            b
        }
    }

    /// Binomial addition of a root list into ours.
    fn merge_roots(&mut self, others: Vec<Tree<T>>) {
        let mut merged: Vec<Tree<T>> = Vec::new();
        let mut carry: Option<Tree<T>> = None;

        let mut a = std::mem::take(&mut self.roots).into_iter().peekable();
        let mut b = others.into_iter().peekable();

        loop {
            // Pull the lowest-order tree among both lists and the carry.
            let next_order = [
                a.peek().map(|t| t.order),
                b.peek().map(|t| t.order),
                carry.as_ref().map(|t| t.order),
            ]
            .into_iter()
            .flatten()
            .min();
            let Some(order) = next_order else { break };

            let mut same_order: Vec<Tree<T>> = Vec::new();
            if carry.as_ref().is_some_and(|t| t.order == order) {
                same_order.push(carry.take().unwrap());
            }
            if a.peek().is_some_and(|t| t.order == order) {
                same_order.push(a.next().unwrap());
            }
            if b.peek().is_some_and(|t| t.order == order) {
                same_order.push(b.next().unwrap());
            }

            match same_order.len() {
                1 => merged.push(same_order.pop().unwrap()),
                2 => {
                    let y = same_order.pop().unwrap();
                    let x = same_order.pop().unwrap();
                    carry = Some(self.link(x, y));
                }
                3 => {
                    // One stays, two combine into the carry.
                    merged.push(same_order.pop().unwrap());
                    let y = same_order.pop().unwrap();
                    let x = same_order.pop().unwrap();
                    carry = Some(self.link(x, y));
                }
                _ => unreachable!("at most three trees share an order"),
            }
        }

        self.roots = merged;
    }

    pub fn insert(&mut self, key: &[u8], value: T) {
        self.merge_roots(vec![Tree {
            key: key.to_vec(),
            value,
            order: 0,
            children: Vec::new(),
        }]);
        self.count += 1;
    }

    /// Consume both heaps into one. Modes must match.
    pub fn merge(mut a: Self, b: Self) -> Result<Self, HeapError> {
        if a.mode != b.mode {
            return Err(HeapError::ModeMismatch);
        }
        a.merge_roots(b.roots);
        a.count += b.count;
        Ok(a)
    }

    /// Root index holding the mode's own extreme.
    fn top_root(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, tree) in self.roots.iter().enumerate() {
            match best {
                None => best = Some(i),
                Some(j) if self.dominates(&tree.key, &self.roots[j].key) => best = Some(i),
                Some(_) => {}
            }
        }
        best
    }

    /// Key of the entry a mode-side delete would remove.
    fn top_key(&self) -> Option<Vec<u8>> {
        self.top_root().map(|i| self.roots[i].key.clone())
    }

    /// Key of the opposite extreme; costs a full scan.
    fn bottom_key(&self) -> Option<Vec<u8>> {
        fn scan<'a, T>(tree: &'a Tree<T>, heap: &BinomialHeap<T>, best: &mut Option<&'a [u8]>) {
            let worse = match best {
                None => true,
                Some(b) => !heap.dominates(&tree.key, b) && tree.key.as_slice() != *b,
            };
            if worse {
                *best = Some(&tree.key);
            }
            for child in &tree.children {
                scan(child, heap, best);
            }
        }
        let mut best: Option<&[u8]> = None;
        for tree in &self.roots {
            scan(tree, self, &mut best);
        }
        best.map(<[u8]>::to_vec)
    }

    /// Largest key and its value.
    pub fn maximum(&self) -> Option<(Vec<u8>, &T)> {
        let key = match self.mode {
            HeapMode::Max => self.top_key()?,
            HeapMode::Min => self.bottom_key()?,
        };
        let value = self.find(&key)?;
        Some((key, value))
    }

    /// Smallest key and its value.
    pub fn minimum(&self) -> Option<(Vec<u8>, &T)> {
        let key = match self.mode {
            HeapMode::Min => self.top_key()?,
            HeapMode::Max => self.bottom_key()?,
        };
        let value = self.find(&key)?;
        Some((key, value))
    }

    fn find(&self, key: &[u8]) -> Option<&T> {
        fn search<'a, T>(tree: &'a Tree<T>, key: &[u8], cmp: CmpFn) -> Option<&'a T> {
            if cmp(&tree.key, key) == Ordering::Equal {
                return Some(&tree.value);
            }
            tree.children.iter().find_map(|c| search(c, key, cmp))
        }
        self.roots.iter().find_map(|t| search(t, key, self.ops.cmp))
    }

    /// Remove the mode-side extreme root and fold its children back in.
    fn extract_top(&mut self) -> Option<(Vec<u8>, T)> {
        let index = self.top_root()?;
        let tree = self.roots.remove(index);
        // Children are already held in increasing order of their order.
        self.merge_roots(tree.children);
        self.count -= 1;
        Some((tree.key, tree.value))
    }

    pub fn delete_maximum(&mut self) -> Result<(Vec<u8>, T), HeapError> {
        match self.mode {
            HeapMode::Max => self.extract_top().ok_or(HeapError::Empty),
            HeapMode::Min => {
                let key = self.bottom_key().ok_or(HeapError::Empty)?;
                let value = self.delete(&key)?;
                Ok((key, value))
            }
        }
    }

    pub fn delete_minimum(&mut self) -> Result<(Vec<u8>, T), HeapError> {
        match self.mode {
            HeapMode::Min => self.extract_top().ok_or(HeapError::Empty),
            HeapMode::Max => {
                let key = self.bottom_key().ok_or(HeapError::Empty)?;
                let value = self.delete(&key)?;
                Ok((key, value))
            }
        }
    }

    /// Remove one entry with the given key.
    pub fn delete(&mut self, key: &[u8]) -> Result<T, HeapError> {
        let (root_index, path) = self
            .find_path(key)
            .ok_or(HeapError::NotFound)?;

        // Bubble the target payload up to its root, then extract the root
        // and fold the children back in.
        Self::bubble_to_top(&mut self.roots[root_index], &path);
        let tree = self.roots.remove(root_index);
        self.merge_roots(tree.children);
        self.count -= 1;
        Ok(tree.value)
    }

    /// Locate `key`: root index plus the child-index path below it.
    fn find_path(&self, key: &[u8]) -> Option<(usize, Vec<usize>)> {
        fn search<T>(tree: &Tree<T>, key: &[u8], cmp: CmpFn, path: &mut Vec<usize>) -> bool {
            if cmp(&tree.key, key) == Ordering::Equal {
                return true;
            }
            for (i, child) in tree.children.iter().enumerate() {
                path.push(i);
                if search(child, key, cmp, path) {
                    return true;
                }
                path.pop();
            }
            false
        }

        for (i, tree) in self.roots.iter().enumerate() {
            let mut path = Vec::new();
            if search(tree, key, self.ops.cmp, &mut path) {
                return Some((i, path));
            }
        }
        None
    }

    /// Swap payloads upward along `path` so the addressed node's payload
    /// surfaces at the root.
    fn bubble_to_top(tree: &mut Tree<T>, path: &[usize]) {
        let Some((&index, rest)) = path.split_first() else {
            return;
        };
        Self::bubble_to_top(&mut tree.children[index], rest);
        let child = &mut tree.children[index];
        std::mem::swap(&mut tree.key, &mut child.key);
        std::mem::swap(&mut tree.value, &mut child.value);
    }

    /// Replace the key of one entry, restoring heap shape by remove and
    /// re-insert.
    fn rekey(&mut self, key: &[u8], new_key: Vec<u8>) -> Result<(), HeapError> {
        let value = self.delete(key)?;
        self.insert(&new_key, value);
        Ok(())
    }

    pub fn increase_key(&mut self, key: &[u8], amount: u64) -> Result<(), HeapError> {
        let new_key = (self.ops.incr)(key, amount);
        self.rekey(key, new_key)
    }

    pub fn decrease_key(&mut self, key: &[u8], amount: u64) -> Result<(), HeapError> {
        let new_key = (self.ops.decr)(key, amount);
        self.rekey(key, new_key)
    }

    pub fn increase_maximum(&mut self, amount: u64) -> Result<(), HeapError> {
        let (key, _) = self.maximum().ok_or(HeapError::Empty)?;
        self.increase_key(&key.clone(), amount)
    }

    pub fn decrease_maximum(&mut self, amount: u64) -> Result<(), HeapError> {
        let (key, _) = self.maximum().ok_or(HeapError::Empty)?;
        self.decrease_key(&key.clone(), amount)
    }

    pub fn increase_minimum(&mut self, amount: u64) -> Result<(), HeapError> {
        let (key, _) = self.minimum().ok_or(HeapError::Empty)?;
        self.increase_key(&key.clone(), amount)
    }

    pub fn decrease_minimum(&mut self, amount: u64) -> Result<(), HeapError> {
        let (key, _) = self.minimum().ok_or(HeapError::Empty)?;
        self.decrease_key(&key.clone(), amount)
    }

    /// Visit every entry in tree order. Delete verdicts are applied after
    /// the walk. Returns the number of visits.
    pub fn walk(&mut self, mut cb: impl FnMut(&[u8], &T) -> WalkAction) -> usize {
        fn visit<T>(
            tree: &Tree<T>,
            cb: &mut impl FnMut(&[u8], &T) -> WalkAction,
            visited: &mut usize,
            doomed: &mut Vec<Vec<u8>>,
        ) -> bool {
            *visited += 1;
            match cb(&tree.key, &tree.value) {
                WalkAction::Continue => {}
                WalkAction::Stop => return false,
                WalkAction::DeleteContinue => doomed.push(tree.key.clone()),
                WalkAction::DeleteStop => {
                    doomed.push(tree.key.clone());
                    return false;
                }
            }
            tree.children.iter().all(|c| visit(c, cb, visited, doomed))
        }

        let mut visited = 0;
        let mut doomed: Vec<Vec<u8>> = Vec::new();
        for tree in &self.roots {
            if !visit(tree, &mut cb, &mut visited, &mut doomed) {
                break;
            }
        }
        for key in doomed {
            let _ = self.delete(&key);
        }
        visited
    }
}
