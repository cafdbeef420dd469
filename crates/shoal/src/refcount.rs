//! Lock-free reference counting with deferred reclamation.
//!
//! Nodes wrap a payload pointer and carry an atomic retain count plus an
//! `updating` flag. A release that drives the count to zero wins the
//! `updating` CAS, fires the terminate hook exactly once and parks the
//! node on a free-list ring; physical reclamation is deferred to a bounded
//! garbage-collection pass that recycles node descriptors through an
//! internal pool. Deferred reclamation is what keeps concurrent
//! `deref_link` callers safe: a node queued for free stays allocated until
//! no stale link can reach it.

use crate::rqueue::{RingMode, RingQueue};
use crate::tagged::{AtomicMarkedPtr, MarkedPtr};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, Ordering};

const FREE_LIST_MIN_SIZE: usize = 1 << 8;
const NODE_POOL_SIZE: usize = 1 << 16;

/// A reference-counted node descriptor.
///
/// The payload is opaque to the registry; typed wrappers (the deque) cast
/// it back to their entry type.
pub struct RcNode {
    payload: AtomicPtr<()>,
    private: AtomicPtr<()>,
    count: AtomicU32,
    updating: AtomicBool,
}

impl RcNode {
    fn empty() -> Self {
        Self {
            payload: AtomicPtr::new(ptr::null_mut()),
            private: AtomicPtr::new(ptr::null_mut()),
            count: AtomicU32::new(0),
            updating: AtomicBool::new(false),
        }
    }
}

/// Hook invoked exactly once when a node's retain count first drops to
/// zero. It must make sure none of the node's outgoing links keep a claim
/// on any other node.
pub type TerminateFn = unsafe fn(&RefCountRegistry, *mut RcNode);

/// Hook invoked when a deferred-free node is reclaimed; the payload can no
/// longer be referenced by anyone.
pub type FreePayloadFn = unsafe fn(*mut ());

/// Registry owning the free-list ring, the node pool and the reclamation
/// hooks.
pub struct RefCountRegistry {
    free_list: RingQueue<RcNode>,
    node_pool: RingQueue<RcNode>,
    gc_threshold: u32,
    terminate_cb: Option<TerminateFn>,
    free_payload_cb: Option<FreePayloadFn>,
}

impl RefCountRegistry {
    /// `gc_threshold` bounds how many unreferenced nodes may accumulate
    /// before a collection pass starts releasing the older ones.
    pub fn new(
        gc_threshold: u32,
        terminate_cb: Option<TerminateFn>,
        free_payload_cb: Option<FreePayloadFn>,
    ) -> Self {
        let free_list_size =
            ((gc_threshold + gc_threshold / 2) as usize).max(FREE_LIST_MIN_SIZE);
        Self {
            free_list: RingQueue::new(free_list_size, RingMode::Blocking),
            node_pool: RingQueue::new(NODE_POOL_SIZE, RingMode::Blocking),
            gc_threshold,
            terminate_cb,
            free_payload_cb,
        }
    }

    /// Wrap `payload` in a node with a retain count of 1. Descriptors are
    /// drawn from the pool before touching the heap.
    pub fn new_node(&self, payload: *mut (), private: *mut ()) -> *mut RcNode {
        let mut node = self.node_pool.read_raw();
        if node.is_null() {
            node = Box::into_raw(Box::new(RcNode::empty()));
        }
        // SAFETY: the node came off the pool (exclusively ours) or is a
        // fresh allocation; no other thread can see it yet.
        unsafe {
            (*node).payload.store(payload, Ordering::Relaxed);
            (*node).private.store(private, Ordering::Relaxed);
            (*node).count.store(1, Ordering::Relaxed);
            (*node).updating.store(false, Ordering::Release);
        }
        node
    }

    /// Retain `node`, returning it with its count increased, or null when
    /// the node is already condemned (`updating` set with a zero count):
    /// resurrecting a node queued for free is forbidden.
    ///
    /// # Safety
    ///
    /// `node` must be null or point to a node managed by this registry.
    pub unsafe fn retain(&self, node: *mut RcNode) -> *mut RcNode {
        if node.is_null() {
            return ptr::null_mut();
        }
        loop {
            let count = (*node).count.load(Ordering::Acquire);
            if count == 0 && (*node).updating.load(Ordering::Acquire) {
                return ptr::null_mut();
            }
            if (*node)
                .count
                .compare_exchange_weak(count, count + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return node;
            }
        }
    }

    /// Drop one claim on `node`. The release that first observes a zero
    /// count wins the `updating` transition, fires the terminate hook and
    /// queues the node for deferred free; a release losing that CAS is a
    /// no-op on termination. Returns null when the node was terminated.
    ///
    /// # Safety
    ///
    /// `node` must be null or a node of this registry on which the caller
    /// holds a claim.
    pub unsafe fn release(&self, node: *mut RcNode) -> *mut RcNode {
        if node.is_null() {
            return ptr::null_mut();
        }

        let _ = (*node)
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1));

        let mut terminated = false;
        if (*node)
            .updating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            if (*node).count.load(Ordering::Acquire) == 0 {
                if let Some(cb) = self.terminate_cb {
                    cb(self, node);
                }
                if self.free_list.write_raw(node).is_err() {
                    // Free list exhausted: reclaim in place.
                    if let Some(free) = self.free_payload_cb {
                        free((*node).payload.load(Ordering::Acquire));
                    }
                    drop(Box::from_raw(node));
                }
                terminated = true;
            } else {
                let _ = (*node).updating.compare_exchange(
                    true,
                    false,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
            }
        }

        if self.pending() > u64::from(self.gc_threshold) {
            self.gc(false);
        }

        if terminated {
            ptr::null_mut()
        } else {
            node
        }
    }

    /// Atomically load a link and retain its target. A marked link yields
    /// null when `skip_marked` is set; otherwise the mark is stripped and
    /// the target retained anyway. Null is also returned for a condemned
    /// target.
    ///
    /// # Safety
    ///
    /// `link` must only ever hold nodes of this registry.
    pub unsafe fn deref_link(
        &self,
        link: &AtomicMarkedPtr<RcNode>,
        skip_marked: bool,
    ) -> *mut RcNode {
        let current = link.load(Ordering::Acquire);
        if current.is_marked() && skip_marked {
            return ptr::null_mut();
        }
        self.retain(current.ptr())
    }

    /// [`deref_link`](Self::deref_link) that ignores deletion marks.
    ///
    /// # Safety
    ///
    /// Same contract as `deref_link`.
    pub unsafe fn deref_link_d(&self, link: &AtomicMarkedPtr<RcNode>) -> *mut RcNode {
        self.deref_link(link, false)
    }

    /// Counted compare-and-swap on a link: on success the new target gains
    /// a claim and the old target loses one.
    ///
    /// # Safety
    ///
    /// `link` must only ever hold nodes of this registry; the caller must
    /// hold a claim on `new`'s target while the call runs.
    pub unsafe fn cas_link(
        &self,
        link: &AtomicMarkedPtr<RcNode>,
        old: MarkedPtr<RcNode>,
        new: MarkedPtr<RcNode>,
    ) -> bool {
        if link
            .compare_exchange(old, new, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        if !new.ptr().is_null() {
            (*new.ptr()).count.fetch_add(1, Ordering::AcqRel);
        }
        if !old.ptr().is_null() {
            let _ = (*old.ptr())
                .count
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1));
        }
        true
    }

    /// Unconditionally swap a link to `node` (load-CAS loop), retaining the
    /// new target and releasing the old one with its mark stripped.
    ///
    /// # Safety
    ///
    /// `link` must only ever hold nodes of this registry; the caller must
    /// hold a claim on `node` while the call runs.
    pub unsafe fn store_link(&self, link: &AtomicMarkedPtr<RcNode>, node: *mut RcNode) {
        let old = loop {
            let current = link.load(Ordering::Acquire);
            if link
                .compare_exchange(
                    current,
                    MarkedPtr::new(node, false),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                break current;
            }
        };

        if !node.is_null() {
            let _ = self.retain(node);
        }
        if !old.ptr().is_null() {
            let _ = self.release(old.ptr());
        }
    }

    /// Drain the free list down to `gc_threshold / 2` (or fully when
    /// forced), handing payloads to the free hook and returning descriptors
    /// to the pool.
    pub fn gc(&self, force: bool) {
        let limit = if force {
            0
        } else {
            u64::from(self.gc_threshold / 2)
        };

        let mut reclaimed = 0u64;
        while self.pending() > limit {
            let node = self.free_list.read_raw();
            if node.is_null() {
                break;
            }
            // SAFETY: the node came off the free list, so its count is zero
            // and no live link reaches it any more.
            unsafe {
                if let Some(free) = self.free_payload_cb {
                    free((*node).payload.load(Ordering::Acquire));
                }
                (*node).payload.store(ptr::null_mut(), Ordering::Relaxed);
                if self.node_pool.write_raw(node).is_err() {
                    drop(Box::from_raw(node));
                }
            }
            reclaimed += 1;
        }

        if reclaimed > 0 {
            log::trace!("refcount gc reclaimed {reclaimed} nodes (forced: {force})");
        }
    }

    /// Nodes parked on the free list and not yet reclaimed.
    fn pending(&self) -> u64 {
        self.free_list.write_count() - self.free_list.read_count()
    }

    /// The payload wrapped by `node`.
    ///
    /// # Safety
    ///
    /// `node` must be null or a live node of this registry.
    pub unsafe fn node_payload(node: *mut RcNode) -> *mut () {
        if node.is_null() {
            ptr::null_mut()
        } else {
            (*node).payload.load(Ordering::Acquire)
        }
    }

    /// The private pointer supplied to [`new_node`](Self::new_node).
    ///
    /// # Safety
    ///
    /// `node` must be a live node of this registry.
    pub unsafe fn node_private(node: *mut RcNode) -> *mut () {
        (*node).private.load(Ordering::Acquire)
    }

    /// Instantaneous retain count. Debugging only: under concurrency the
    /// value is stale the moment it is read.
    ///
    /// # Safety
    ///
    /// `node` must be a live node of this registry.
    pub unsafe fn node_refcount(node: *mut RcNode) -> u32 {
        (*node).count.load(Ordering::Acquire)
    }
}

impl Drop for RefCountRegistry {
    fn drop(&mut self) {
        // Forced collection; whatever sits in the pool afterwards is freed
        // by the rings' own teardown.
        self.gc(true);
    }
}
