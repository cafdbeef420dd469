//! Lock-free double-ended queue over reference-counted entries.
//!
//! Entries are linked through marked pointers: a set mark on a prev- or
//! next-link means the entry is logically deleted, and any thread that
//! observes a marked entry must help drive its physical unlink to
//! completion before making progress of its own. Reclamation is deferred
//! through the [`RefCountRegistry`], so a link loaded by one thread stays
//! dereferenceable even while another thread unlinks the target.
//!
//! Claim accounting: an entry is born with one claim (the creation claim)
//! and gains one per incoming link. Pops drop the incoming links through
//! counted link CASes, then the creation claim; the final release fires
//! the terminate hook, which clears the entry's own outgoing links.

use crate::refcount::{RcNode, RefCountRegistry};
use crate::tagged::{AtomicMarkedPtr, MarkedPtr};
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

const DEQUE_GC_THRESHOLD: u32 = 1 << 12;

struct Entry<T> {
    node: *mut RcNode,
    prev: AtomicMarkedPtr<RcNode>,
    next: AtomicMarkedPtr<RcNode>,
    value: AtomicPtr<T>,
}

/// Unbounded lock-free deque of boxed values.
pub struct Deque<T> {
    head: *mut Entry<T>,
    tail: *mut Entry<T>,
    length: AtomicUsize,
    rc: RefCountRegistry,
}

// Safety: entries are reached only through the counted-link protocol; the
// sentinels are owned by the deque itself.
unsafe impl<T: Send> Send for Deque<T> {}
unsafe impl<T: Send> Sync for Deque<T> {}

/// Terminate hook: drop the entry's claims on its neighbours.
unsafe fn terminate_entry<T>(rc: &RefCountRegistry, node: *mut RcNode) {
    let entry = RefCountRegistry::node_payload(node).cast::<Entry<T>>();
    rc.store_link(&(*entry).next, ptr::null_mut());
    rc.store_link(&(*entry).prev, ptr::null_mut());
}

/// Free hook: release the entry allocation once no link can reach it.
unsafe fn free_entry<T>(payload: *mut ()) {
    if !payload.is_null() {
        drop(Box::from_raw(payload.cast::<Entry<T>>()));
    }
}

impl<T> Deque<T> {
    pub fn new() -> Self {
        let rc = RefCountRegistry::new(
            DEQUE_GC_THRESHOLD,
            Some(terminate_entry::<T>),
            Some(free_entry::<T>),
        );
        let head = Self::alloc_entry(&rc, ptr::null_mut());
        let tail = Self::alloc_entry(&rc, ptr::null_mut());

        // SAFETY: both sentinels are freshly allocated and unshared.
        unsafe {
            rc.store_link(&(*head).next, (*tail).node);
            rc.store_link(&(*tail).prev, (*head).node);
        }

        Self {
            head,
            tail,
            length: AtomicUsize::new(0),
            rc,
        }
    }

    /// Only sentinels carry a null value.
    fn alloc_entry(rc: &RefCountRegistry, value: *mut T) -> *mut Entry<T> {
        let entry = Box::into_raw(Box::new(Entry {
            node: ptr::null_mut(),
            prev: AtomicMarkedPtr::null(),
            next: AtomicMarkedPtr::null(),
            value: AtomicPtr::new(value),
        }));
        let node = rc.new_node(entry.cast(), ptr::null_mut());
        // SAFETY: entry is unshared until its node is published in a link.
        unsafe { (*entry).node = node };
        entry
    }

    #[inline]
    unsafe fn entry_of(node: *mut RcNode) -> *mut Entry<T> {
        RefCountRegistry::node_payload(node).cast::<Entry<T>>()
    }

    /// Number of entries. Non-decreasing on push, non-increasing on pop;
    /// exact at quiescence.
    #[inline]
    pub fn len(&self) -> usize {
        self.length.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The underlying reference-count registry; exposed for diagnostics.
    pub fn registry(&self) -> &RefCountRegistry {
        &self.rc
    }

    // ---------------------------------------------------------------------
    // PUSH
    // ---------------------------------------------------------------------

    /// Insert at the left end. Linearizes at the successful CAS on the left
    /// sentinel's next-link.
    pub fn push_left(&self, value: Box<T>) {
        let entry = Self::alloc_entry(&self.rc, Box::into_raw(value));
        // SAFETY: sentinel pointers are valid for the deque's lifetime;
        // entry is ours until published.
        unsafe {
            let entry_node = (*entry).node;
            let prev = self.head;
            let prev_node = (*prev).node;
            let _ = self.rc.retain(prev_node);

            loop {
                let next_node = self.rc.deref_link(&(*prev).next, true);
                if next_node.is_null() {
                    continue;
                }
                let next = Self::entry_of(next_node);

                self.rc.store_link(&(*entry).prev, prev_node);
                self.rc.store_link(&(*entry).next, next_node);

                if self.rc.cas_link(
                    &(*prev).next,
                    MarkedPtr::new(next_node, false),
                    MarkedPtr::new(entry_node, false),
                ) {
                    self.fix_prev_of(next, next_node, entry, entry_node);
                    self.rc.release(next_node);
                    break;
                }
                self.rc.release(next_node);
            }

            self.rc.release(prev_node);
        }
        self.length.fetch_add(1, Ordering::Relaxed);
    }

    /// Insert at the right end. Linearizes at the successful CAS on the
    /// right sentinel's prev-link.
    pub fn push_right(&self, value: Box<T>) {
        let entry = Self::alloc_entry(&self.rc, Box::into_raw(value));
        // SAFETY: as in push_left.
        unsafe {
            let entry_node = (*entry).node;
            let next = self.tail;
            let next_node = (*next).node;
            let _ = self.rc.retain(next_node);

            loop {
                let prev_node = self.rc.deref_link(&(*next).prev, true);
                if prev_node.is_null() {
                    continue;
                }
                let prev = Self::entry_of(prev_node);

                self.rc.store_link(&(*entry).prev, prev_node);
                self.rc.store_link(&(*entry).next, next_node);

                if self.rc.cas_link(
                    &(*next).prev,
                    MarkedPtr::new(prev_node, false),
                    MarkedPtr::new(entry_node, false),
                ) {
                    self.fix_next_of(prev, entry, entry_node);
                    self.rc.release(prev_node);
                    break;
                }
                self.rc.release(prev_node);
            }

            self.rc.release(next_node);
        }
        self.length.fetch_add(1, Ordering::Relaxed);
    }

    /// After linking a new left-entry, swing the old first entry's
    /// prev-link over to it.
    unsafe fn fix_prev_of(
        &self,
        next: *mut Entry<T>,
        next_node: *mut RcNode,
        entry: *mut Entry<T>,
        entry_node: *mut RcNode,
    ) {
        loop {
            let link = (*next).prev.load(Ordering::Acquire);
            if link.is_marked() {
                // next is being deleted; its helpers take over.
                break;
            }
            if link.ptr() == entry_node {
                break;
            }
            if (*entry).next.load(Ordering::Acquire).ptr() != next_node
                || (*entry).next.load(Ordering::Acquire).is_marked()
            {
                // entry itself moved on (deleted or displaced).
                break;
            }
            if self
                .rc
                .cas_link(&(*next).prev, link, MarkedPtr::new(entry_node, false))
            {
                break;
            }
        }
    }

    /// After linking a new right-entry, swing the old last entry's
    /// next-link over to it.
    unsafe fn fix_next_of(&self, prev: *mut Entry<T>, entry: *mut Entry<T>, entry_node: *mut RcNode) {
        loop {
            let link = (*prev).next.load(Ordering::Acquire);
            if link.is_marked() {
                break;
            }
            if link.ptr() == entry_node {
                break;
            }
            if (*entry).prev.load(Ordering::Acquire).is_marked() {
                break;
            }
            if self
                .rc
                .cas_link(&(*prev).next, link, MarkedPtr::new(entry_node, false))
            {
                break;
            }
        }
    }

    // ---------------------------------------------------------------------
    // POP
    // ---------------------------------------------------------------------

    /// Remove from the left end. Returns `None` when the deque was observed
    /// empty. Linearizes at the mark-CAS on the victim's next-link.
    pub fn pop_left(&self) -> Option<Box<T>> {
        // SAFETY: sentinel pointers are valid for the deque's lifetime; all
        // entry accesses happen under a retained claim.
        unsafe {
            let prev = self.head;
            let head_node = (*prev).node;
            let tail_node = (*self.tail).node;
            let _ = self.rc.retain(head_node);

            let popped = loop {
                let entry_node = self.rc.deref_link(&(*prev).next, true);
                if entry_node.is_null() {
                    continue;
                }
                if entry_node == tail_node {
                    self.rc.release(entry_node);
                    break None;
                }
                let entry = Self::entry_of(entry_node);

                if (*entry).prev.load(Ordering::Acquire).ptr() != head_node {
                    // A racing push has not finished the back-link yet.
                    self.rc.release(entry_node);
                    continue;
                }

                let link1 = (*entry).next.load(Ordering::Acquire);
                if link1.is_marked() {
                    // Another popper owns it; help only once both links
                    // are marked, then look again.
                    if (*entry).prev.load(Ordering::Acquire).is_marked() {
                        let helper_prev = self.help_delete(entry);
                        self.rc.release(helper_prev);
                    }
                    self.rc.release(entry_node);
                    continue;
                }

                if (*entry)
                    .next
                    .compare_exchange(link1, link1.marked(), Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    // The next-link mark is the ownership claim: a
                    // provisional right-side popper that marked prev will
                    // observe it and stand down. Mark the near link (the
                    // right popper may already have) and unlink.
                    (*entry).prev.fetch_mark(Ordering::AcqRel);
                    let prev2 = self.help_delete(entry);
                    let next_entry = Self::entry_of(link1.ptr());
                    let prev2 = self.help_insert(prev2, next_entry);
                    self.rc.release(prev2);

                    let value = (*entry).value.swap(ptr::null_mut(), Ordering::AcqRel);
                    debug_assert!(!value.is_null(), "user entries carry non-null values");

                    self.rc.release(entry_node); // traversal claim
                    self.rc.release(entry_node); // creation claim
                    break Some(Box::from_raw(value));
                }

                self.rc.release(entry_node);
            };

            self.rc.release(head_node);
            if popped.is_some() {
                self.length.fetch_sub(1, Ordering::Relaxed);
            }
            popped
        }
    }

    /// Remove from the right end. Claims the victim with a mark-CAS on its
    /// prev-link; the claim is confirmed on the next-link, which settles
    /// ties against a simultaneous left-side pop of the same entry.
    pub fn pop_right(&self) -> Option<Box<T>> {
        // SAFETY: as in pop_left.
        unsafe {
            let next = self.tail;
            let tail_node = (*next).node;
            let head_node = (*self.head).node;
            let _ = self.rc.retain(tail_node);

            let popped = loop {
                let entry_node = self.rc.deref_link(&(*next).prev, true);
                if entry_node.is_null() {
                    continue;
                }
                if entry_node == head_node {
                    self.rc.release(entry_node);
                    break None;
                }
                let entry = Self::entry_of(entry_node);

                if (*entry).next.load(Ordering::Acquire).ptr() != tail_node {
                    self.rc.release(entry_node);
                    continue;
                }

                let link1 = (*entry).prev.load(Ordering::Acquire);
                if link1.is_marked() {
                    if (*entry).next.load(Ordering::Acquire).is_marked() {
                        let helper_prev = self.help_delete(entry);
                        self.rc.release(helper_prev);
                    }
                    self.rc.release(entry_node);
                    continue;
                }

                if (*entry)
                    .prev
                    .compare_exchange(link1, link1.marked(), Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    // The prev mark is provisional: ownership is settled on
                    // the next-link. A left-side popper that already marked
                    // it wins, and our prev mark simply serves as its
                    // near-link mark.
                    let claimed = loop {
                        let near = (*entry).next.load(Ordering::Acquire);
                        if near.is_marked() {
                            break false;
                        }
                        if (*entry)
                            .next
                            .compare_exchange(
                                near,
                                near.marked(),
                                Ordering::AcqRel,
                                Ordering::Acquire,
                            )
                            .is_ok()
                        {
                            break true;
                        }
                    };
                    if !claimed {
                        self.rc.release(entry_node);
                        continue;
                    }

                    let prev2 = self.help_delete(entry);
                    let next_target = (*entry).next.load(Ordering::Acquire).ptr();
                    let prev2 = self.help_insert(prev2, Self::entry_of(next_target));
                    self.rc.release(prev2);

                    let value = (*entry).value.swap(ptr::null_mut(), Ordering::AcqRel);
                    debug_assert!(!value.is_null(), "user entries carry non-null values");

                    self.rc.release(entry_node);
                    self.rc.release(entry_node);
                    break Some(Box::from_raw(value));
                }

                self.rc.release(entry_node);
            };

            self.rc.release(tail_node);
            if popped.is_some() {
                self.length.fetch_sub(1, Ordering::Relaxed);
            }
            popped
        }
    }

    // ---------------------------------------------------------------------
    // COOPERATIVE HELPERS
    // ---------------------------------------------------------------------

    /// Physically unlink `entry` (both of its links are marked). Walks left
    /// past other deleted entries, then swings the predecessor's next-link
    /// over `entry`. Returns the predecessor node, retained.
    unsafe fn help_delete(&self, entry: *mut Entry<T>) -> *mut RcNode {
        let entry_node = (*entry).node;
        let tail_node = (*self.tail).node;
        let next_target = (*entry).next.load(Ordering::Acquire).ptr();

        let mut prev_node = self.rc.deref_link_d(&(*entry).prev);
        if prev_node.is_null() {
            prev_node = self.rc.retain((*self.head).node);
        }

        loop {
            if prev_node.is_null() || prev_node == next_target {
                break;
            }
            let prev = Self::entry_of(prev_node);
            let prev_next = (*prev).next.load(Ordering::Acquire);

            if prev_next.is_marked() {
                // The predecessor is deleted as well: step further left.
                let left = self.rc.deref_link_d(&(*prev).prev);
                self.rc.release(prev_node);
                prev_node = if left.is_null() {
                    self.rc.retain((*self.head).node)
                } else {
                    left
                };
                continue;
            }

            if prev_next.ptr() == entry_node {
                if self.rc.cas_link(
                    &(*prev).next,
                    MarkedPtr::new(entry_node, false),
                    MarkedPtr::new(next_target, false),
                ) {
                    break;
                }
                continue;
            }

            if prev_next.ptr() == next_target || prev_node == tail_node {
                // Someone else finished the unlink.
                break;
            }

            // entry lies further right; walk toward it.
            let fwd = self.rc.deref_link(&(*prev).next, true);
            if fwd.is_null() {
                continue;
            }
            self.rc.release(prev_node);
            prev_node = fwd;
        }

        prev_node
    }

    /// Restore `entry.prev` so it names a live predecessor, starting the
    /// search at `prev_node` (retained by the caller). Returns the claim to
    /// release, possibly moved to another node.
    unsafe fn help_insert(&self, mut prev_node: *mut RcNode, entry: *mut Entry<T>) -> *mut RcNode {
        let entry_node = (*entry).node;
        let tail_node = (*self.tail).node;

        loop {
            if prev_node.is_null() {
                break;
            }
            let link = (*entry).prev.load(Ordering::Acquire);
            if link.is_marked() {
                // entry is deleted itself; nothing to restore.
                break;
            }

            let prev = Self::entry_of(prev_node);
            let prev_next = (*prev).next.load(Ordering::Acquire);

            if prev_next.is_marked() {
                let left = self.rc.deref_link_d(&(*prev).prev);
                self.rc.release(prev_node);
                prev_node = left;
                continue;
            }

            if prev_next.ptr() != entry_node {
                if prev_node == tail_node {
                    break;
                }
                let fwd = self.rc.deref_link(&(*prev).next, true);
                if fwd.is_null() {
                    break;
                }
                self.rc.release(prev_node);
                prev_node = fwd;
                continue;
            }

            if link.ptr() == prev_node {
                break;
            }
            if self
                .rc
                .cas_link(&(*entry).prev, link, MarkedPtr::new(prev_node, false))
            {
                break;
            }
        }

        prev_node
    }

    /// Drain the deque, dropping every value.
    pub fn clear(&self) {
        while self.pop_left().is_some() {}
    }
}

impl<T> Default for Deque<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Deque<T> {
    fn drop(&mut self) {
        self.clear();
        // SAFETY: exclusive access; unlink the sentinels from each other,
        // then drop their creation claims. The registry teardown reclaims
        // the queued descriptors.
        unsafe {
            let head_node = (*self.head).node;
            let tail_node = (*self.tail).node;
            self.rc.store_link(&(*self.head).next, ptr::null_mut());
            self.rc.store_link(&(*self.tail).prev, ptr::null_mut());
            self.rc.release(head_node);
            self.rc.release(tail_node);
        }
    }
}
