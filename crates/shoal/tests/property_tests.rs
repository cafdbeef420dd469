//! Property-based tests for the container invariants.
//!
//! Each property pits a container against a trivially correct model (a
//! `VecDeque`, a `BTreeMap`, a sorted vector) over arbitrary operation
//! sequences.

use proptest::prelude::*;
use shoal::{
    cmp_bytes, cmp_u16, heap_key_ops_u32, AvlTree, BinomialHeap, FlatBuffer, HeapMode, RbTree,
    RingMode, RingQueue, SkipList, Trie, WalkAction,
};
use std::collections::{BTreeMap, VecDeque};

// =============================================================================
// Ring queue: bounded count, FIFO conservation (single-threaded)
// =============================================================================

proptest! {
    // Refused writes burn their full retry budget (real sleeps), so keep
    // the case count low for the ring properties.
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Writes beyond the capacity are refused in blocking mode; reads
    /// drain exactly the accepted values.
    #[test]
    fn prop_ring_bounded_count(writes in 0usize..16) {
        let capacity = 8;
        let q = RingQueue::new(capacity, RingMode::Blocking);

        let mut accepted = 0;
        for i in 0..writes {
            if q.write(Box::new(i)).is_ok() {
                accepted += 1;
            }
        }
        prop_assert_eq!(accepted, writes.min(capacity));
        prop_assert_eq!(q.write_count() as usize, accepted);

        let mut drained = 0;
        while q.read().is_some() {
            drained += 1;
        }
        prop_assert_eq!(drained, accepted);
        prop_assert!(q.is_empty());
    }

    /// Interleaved writes and reads behave exactly like a bounded FIFO.
    #[test]
    fn prop_ring_matches_fifo_model(ops in prop::collection::vec(prop::bool::ANY, 1..60)) {
        let capacity = 4;
        let q = RingQueue::new(capacity, RingMode::Blocking);
        let mut model: VecDeque<usize> = VecDeque::new();
        let mut next = 0usize;

        for write_op in ops {
            if write_op {
                let accepted = q.write(Box::new(next)).is_ok();
                if model.len() < capacity {
                    prop_assert!(accepted, "write refused below capacity");
                    model.push_back(next);
                } else {
                    prop_assert!(!accepted, "write accepted past capacity");
                }
                next += 1;
            } else {
                let got = q.read().map(|b| *b);
                prop_assert_eq!(got, model.pop_front());
            }
        }

        // Conservation at quiescence.
        prop_assert_eq!(
            q.write_count(),
            q.read_count() + model.len() as u64
        );
    }
}

// =============================================================================
// Flat buffer: round trips
// =============================================================================

proptest! {
    #[test]
    fn prop_fbuf_set_data_roundtrip(content in prop::collection::vec(any::<u8>(), 0..512)) {
        let mut buf = FlatBuffer::new(0);
        buf.set(&content).unwrap();
        prop_assert_eq!(buf.data(), &content[..]);
        prop_assert_eq!(buf.used(), content.len());
    }

    #[test]
    fn prop_fbuf_concat_associates(
        a in prop::collection::vec(any::<u8>(), 0..128),
        b in prop::collection::vec(any::<u8>(), 0..128),
    ) {
        let mut left = FlatBuffer::new(0);
        left.set(&a).unwrap();
        let mut right = FlatBuffer::new(0);
        right.set(&b).unwrap();

        let mut copied = FlatBuffer::new(0);
        left.copy_to(&mut copied).unwrap();
        copied.concat(&right).unwrap();

        left.concat(&right).unwrap();
        prop_assert_eq!(copied.data(), left.data());
    }
}

// =============================================================================
// Ordered containers vs. BTreeMap
// =============================================================================

#[derive(Debug, Clone)]
enum MapOp {
    Insert(u16, u32),
    Remove(u16),
}

fn map_ops() -> impl Strategy<Value = Vec<MapOp>> {
    prop::collection::vec(
        prop_oneof![
            (any::<u16>(), any::<u32>()).prop_map(|(k, v)| MapOp::Insert(k, v)),
            any::<u16>().prop_map(MapOp::Remove),
        ],
        1..200,
    )
}

proptest! {
    #[test]
    fn prop_avl_matches_model(ops in map_ops()) {
        let mut tree = AvlTree::new(cmp_u16);
        let mut model: BTreeMap<u16, u32> = BTreeMap::new();

        for op in ops {
            match op {
                MapOp::Insert(k, v) => {
                    prop_assert_eq!(tree.add(&k.to_ne_bytes(), v), model.insert(k, v));
                }
                MapOp::Remove(k) => {
                    prop_assert_eq!(tree.remove(&k.to_ne_bytes()), model.remove(&k));
                }
            }
        }

        prop_assert_eq!(tree.len(), model.len());
        for (k, v) in &model {
            prop_assert_eq!(tree.find(&k.to_ne_bytes()), Some(v));
        }

        // walk_sorted yields keys in non-decreasing order.
        let mut walked = Vec::new();
        tree.walk_sorted(|_, v| {
            walked.push(*v);
            WalkAction::Continue
        });
        let expected: Vec<u32> = model.values().copied().collect();
        prop_assert_eq!(walked, expected);
    }

    #[test]
    fn prop_rbtree_matches_model(ops in map_ops()) {
        let mut tree = RbTree::new(cmp_u16);
        let mut model: BTreeMap<u16, u32> = BTreeMap::new();

        for op in ops {
            match op {
                MapOp::Insert(k, v) => {
                    prop_assert_eq!(tree.add(&k.to_ne_bytes(), v), model.insert(k, v));
                }
                MapOp::Remove(k) => {
                    prop_assert_eq!(tree.remove(&k.to_ne_bytes()), model.remove(&k));
                }
            }
        }

        prop_assert_eq!(tree.len(), model.len());
        let mut walked = Vec::new();
        tree.walk_sorted(|_, v| {
            walked.push(*v);
            WalkAction::Continue
        });
        let expected: Vec<u32> = model.values().copied().collect();
        prop_assert_eq!(walked, expected);
    }

    #[test]
    fn prop_skiplist_matches_model(ops in map_ops()) {
        let mut list = SkipList::new(16, 0.5, cmp_u16);
        let mut model: BTreeMap<u16, u32> = BTreeMap::new();

        for op in ops {
            match op {
                MapOp::Insert(k, v) => {
                    prop_assert_eq!(list.insert(&k.to_ne_bytes(), v), model.insert(k, v));
                }
                MapOp::Remove(k) => {
                    prop_assert_eq!(list.remove(&k.to_ne_bytes()), model.remove(&k));
                }
            }
        }

        prop_assert_eq!(list.len(), model.len());
        for (k, v) in &model {
            prop_assert_eq!(list.search(&k.to_ne_bytes()), Some(v));
        }
    }
}

// =============================================================================
// Binomial heap: multiset drain order
// =============================================================================

proptest! {
    #[test]
    fn prop_heap_drains_sorted(values in prop::collection::vec(any::<u32>(), 0..100)) {
        let mut heap = BinomialHeap::new(heap_key_ops_u32(), HeapMode::Min);
        for &v in &values {
            heap.insert(&v.to_ne_bytes(), v);
        }
        prop_assert_eq!(heap.len(), values.len());

        let mut drained = Vec::new();
        while let Ok((_, v)) = heap.delete_minimum() {
            drained.push(v);
        }

        let mut expected = values;
        expected.sort_unstable();
        prop_assert_eq!(drained, expected);
    }

    #[test]
    fn prop_heap_merge_preserves_multiset(
        a in prop::collection::vec(any::<u32>(), 0..60),
        b in prop::collection::vec(any::<u32>(), 0..60),
    ) {
        let mut ha = BinomialHeap::new(heap_key_ops_u32(), HeapMode::Max);
        let mut hb = BinomialHeap::new(heap_key_ops_u32(), HeapMode::Max);
        for &v in &a {
            ha.insert(&v.to_ne_bytes(), v);
        }
        for &v in &b {
            hb.insert(&v.to_ne_bytes(), v);
        }

        let mut merged = BinomialHeap::merge(ha, hb).unwrap();
        prop_assert_eq!(merged.len(), a.len() + b.len());

        let mut drained = Vec::new();
        while let Ok((_, v)) = merged.delete_maximum() {
            drained.push(v);
        }

        let mut expected: Vec<u32> = a.into_iter().chain(b).collect();
        expected.sort_unstable_by(|x, y| y.cmp(x));
        prop_assert_eq!(drained, expected);
    }
}

// =============================================================================
// Trie: round trips and idempotent removal
// =============================================================================

proptest! {
    #[test]
    fn prop_trie_roundtrip(keys in prop::collection::hash_set("[a-z]{1,12}", 0..50)) {
        let mut trie = Trie::new();
        for (i, key) in keys.iter().enumerate() {
            prop_assert_eq!(trie.insert(key.as_bytes(), i), None);
        }
        prop_assert_eq!(trie.len(), keys.len());

        for (i, key) in keys.iter().enumerate() {
            prop_assert_eq!(trie.find(key.as_bytes()), Some(&i));
        }

        for key in &keys {
            prop_assert!(trie.remove(key.as_bytes()).is_some());
            // Idempotent with respect to subsequent find and remove.
            prop_assert_eq!(trie.find(key.as_bytes()), None);
            prop_assert_eq!(trie.remove(key.as_bytes()), None);
        }
        prop_assert!(trie.is_empty());
        prop_assert_eq!(trie.node_count(), 1);
    }
}

// =============================================================================
// Default byte comparator sanity
// =============================================================================

proptest! {
    #[test]
    fn prop_cmp_bytes_total_order(
        a in prop::collection::vec(any::<u8>(), 0..32),
        b in prop::collection::vec(any::<u8>(), 0..32),
    ) {
        use std::cmp::Ordering;
        let ab = cmp_bytes(&a, &b);
        let ba = cmp_bytes(&b, &a);
        prop_assert_eq!(ab, ba.reverse());
        if ab == Ordering::Equal {
            prop_assert_eq!(&a, &b);
        }
    }
}
