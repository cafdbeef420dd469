//! shoal - Concurrency-Oriented In-Memory Containers
//!
//! A curated set of containers and coordination primitives for systems
//! software:
//!
//! - [`RingQueue`]: fixed-capacity lock-free MPMC queue with blocking and
//!   overwrite modes, CAS-based ring mutation with tag bits embedded in
//!   pointers, and detailed contention telemetry
//! - [`Deque`]: lock-free unbounded deque built on reference-counted
//!   nodes with deferred reclamation ([`RefCountRegistry`])
//! - [`HashTable`]: chaining hash map with per-bucket spin locks, a global
//!   status word and online doubling
//! - Ordered companions: [`AvlTree`], [`RbTree`], [`SkipList`], [`Trie`],
//!   [`BinomialHeap`], [`PriorityQueue`]
//! - [`FlatBuffer`]: growable, bounded byte buffer
//!
//! The three concurrent structures are lock-free (ring queue, deque) or
//! fine-grained locked (hash table); the ordered companions are plain
//! single-threaded containers with no concurrency contract.
//!
//! # Example
//!
//! ```
//! use shoal::{RingMode, RingQueue};
//!
//! let queue = RingQueue::new(128, RingMode::Blocking);
//! queue.write(Box::new(42u64)).unwrap();
//! assert_eq!(queue.read().as_deref(), Some(&42));
//! assert!(queue.read().is_none());
//! ```

#![allow(dangerous_implicit_autorefs)]

mod avltree;
mod backoff;
mod binheap;
mod comparators;
mod deque;
mod expression;
mod fbuf;
mod graph;
mod hashtable;
mod invariants;
mod pqueue;
mod rbtree;
mod refcount;
mod rqueue;
mod skiplist;
mod spinlock;
mod tagged;
mod trie;
mod walk;

pub use avltree::AvlTree;
pub use backoff::{RetryStrategy, SpinWait};
pub use binheap::{
    heap_key_ops_f32, heap_key_ops_f64, heap_key_ops_i16, heap_key_ops_i32, heap_key_ops_i64,
    heap_key_ops_u16, heap_key_ops_u32, heap_key_ops_u64, BinomialHeap, HeapError, HeapKeyOps,
    HeapMode,
};
pub use comparators::{
    cmp_bytes, cmp_f32, cmp_f64, cmp_i16, cmp_i32, cmp_i64, cmp_u16, cmp_u32, cmp_u64, CmpFn,
};
pub use deque::Deque;
pub use expression::{ExprOp, Expression, Operand, OperandFn};
pub use fbuf::{FbufError, FlatBuffer, FBUF_MAXLEN_NONE, FBUF_MIN_LEN};
pub use graph::{ChooserFn, Graph, GraphError, GraphNode};
pub use hashtable::{HashTable, HashTableError, HT_SIZE_MIN};
pub use pqueue::{PqueueMode, PriorityQueue};
pub use rbtree::RbTree;
pub use refcount::{FreePayloadFn, RcNode, RefCountRegistry, TerminateFn};
pub use rqueue::{RingMode, RingQueue, RingQueueError, RingQueueStats};
pub use skiplist::SkipList;
pub use spinlock::{SpinLock, SpinLockGuard};
pub use tagged::{AtomicMarkedPtr, AtomicTaggedPtr, MarkedPtr, TaggedPtr, TAG_HEAD, TAG_UPDATE};
pub use trie::Trie;
pub use walk::{IterAction, WalkAction};
