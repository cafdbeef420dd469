use crate::backoff::RetryStrategy;
use crate::invariants::{
    debug_assert_min_capacity, debug_assert_reads_behind_writes, debug_assert_ring_link,
};
use crate::tagged::{AtomicTaggedPtr, TaggedPtr, TAG_HEAD, TAG_UPDATE};
use crossbeam_utils::CachePadded;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, AtomicU8, AtomicU32, Ordering};
use thiserror::Error;

// =============================================================================
// MEMORY LIFECYCLE & SYNCHRONIZATION STRATEGY
// =============================================================================
//
// The ring is a cycle of `capacity + 1` pages plus one page that lives
// outside the cycle between reads (the reader page). All pages are
// allocated once at construction and stay at stable addresses until the
// queue is dropped. Stable addresses are the ABA defence: a pointer that
// compares equal always names the same page.
//
// ## Tag bits
//
// Exactly one next-link in the cycle carries the HEAD tag at any quiescent
// moment: the link that bridges back into the head page. While a writer in
// overwrite mode replaces the head value, the link additionally carries
// UPDATE, which makes any concurrent reader CAS (expecting exactly HEAD)
// fail and retry.
//
// ## Synchronization words
//
// - `read_sync`: exactly one reader at a time runs the reader-swap critical
//   section. Always released in bounded time, so overwrite-mode writers
//   cannot be blocked indefinitely.
// - `write_sync`: writers serialize the tail reservation. Payload handoff
//   after the reservation is lock-free.
//
// ## Reader-page splice
//
// A read exchanges the off-ring reader page for the current head page: the
// reader page is linked where the head was, the head page leaves the ring
// and becomes the new reader page, and its value is taken. Every page
// eventually rotates through the reader role.
//
// =============================================================================

const MIN_SIZE: usize = 2;

// Operation-specific retry budgets, scaled to operation complexity.
const READER_MAX_RETRIES: u32 = 1500;
const WRITER_CAS_MAX_RETRIES: u32 = 100;
const BLOCKING_MAX_RETRIES: u32 = 2000;
const OVERWRITE_MAX_RETRIES: u32 = 50;

/// Operating mode of a [`RingQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RingMode {
    /// `write` reports [`RingQueueError::QueueFull`] when no page is free.
    Blocking = 0,
    /// `write` replaces the oldest unread value when no page is free.
    Overwrite = 1,
}

impl RingMode {
    fn from_u8(v: u8) -> Self {
        if v == RingMode::Overwrite as u8 {
            RingMode::Overwrite
        } else {
            RingMode::Blocking
        }
    }
}

/// Error types for ring-queue writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RingQueueError {
    /// The queue stayed full for the whole retry budget (blocking mode).
    #[error("queue persistently full")]
    QueueFull,
    /// An internal invariant was observed violated under contention.
    #[error("ring topology corrupted")]
    Corrupted,
}

/// A fixed-address ring cell. The low bits of `next` carry the HEAD/UPDATE
/// tags; `prev` is untagged.
struct Page<T> {
    value: AtomicPtr<T>,
    next: AtomicTaggedPtr<Page<T>>,
    prev: AtomicPtr<Page<T>>,
}

impl<T> Page<T> {
    fn new() -> Self {
        Self {
            value: AtomicPtr::new(ptr::null_mut()),
            next: AtomicTaggedPtr::new(TaggedPtr::null()),
            prev: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

/// Contention telemetry, updated with relaxed atomics on the hot paths.
#[derive(Default)]
struct Counters {
    writes: AtomicU64,
    reads: AtomicU64,
    head_swap_failed: AtomicU64,
    reader_next_swap_failed: AtomicU64,
    queue_full: AtomicU64,
    overwrite: AtomicU64,
    topology_change_detected: AtomicU64,
    concurrent_head_movement: AtomicU64,
    commit_advancement_detected: AtomicU64,
    concurrent_writer_detected: AtomicU64,
    overwrite_state_changed: AtomicU64,
    head_next_changed: AtomicU64,
    fast_retries_succeeded: AtomicU64,
    patient_retries_succeeded: AtomicU64,
    complex_retries_succeeded: AtomicU64,
    critical_retries_succeeded: AtomicU64,
    total_retry_failures: AtomicU64,
    total_retry_attempts: AtomicU64,
    total_backoff_time_us: AtomicU64,
}

/// Best-effort coherent snapshot of the queue telemetry.
///
/// Individual fields are read with relaxed ordering; the snapshot is not a
/// transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingQueueStats {
    pub writes: u64,
    pub reads: u64,
    pub head_swap_failed: u64,
    pub reader_next_swap_failed: u64,
    pub queue_full: u64,
    pub overwrite: u64,
    pub topology_change_detected: u64,
    pub concurrent_head_movement: u64,
    pub commit_advancement_detected: u64,
    pub concurrent_writer_detected: u64,
    pub overwrite_state_changed: u64,
    pub head_next_changed: u64,
    pub fast_retries_succeeded: u64,
    pub patient_retries_succeeded: u64,
    pub complex_retries_succeeded: u64,
    pub critical_retries_succeeded: u64,
    pub total_retry_failures: u64,
    pub total_retry_attempts: u64,
    pub total_backoff_time_us: u64,
}

type EvictCallback<T> = Box<dyn Fn(Box<T>) + Send + Sync>;

/// Bounded multi-producer/multi-consumer queue of boxed values.
///
/// Capacity is fixed at construction (floored to 2). Pages are never
/// reallocated during operation; see the module header for the memory
/// lifecycle and ABA reasoning.
pub struct RingQueue<T> {
    /// Page storage. Heap allocation, stable for the queue's lifetime.
    /// Index `capacity + 1` starts as the off-ring reader page.
    pages: Box<[Page<T>]>,
    head: CachePadded<AtomicPtr<Page<T>>>,
    tail: CachePadded<AtomicPtr<Page<T>>>,
    commit: AtomicPtr<Page<T>>,
    reader: AtomicPtr<Page<T>>,
    read_sync: CachePadded<AtomicBool>,
    write_sync: CachePadded<AtomicBool>,
    num_writers: AtomicU32,
    is_empty: AtomicBool,
    mode: AtomicU8,
    size: usize,
    free_value_cb: Option<EvictCallback<T>>,
    stats: Counters,
}

// Safety: the queue hands out owned boxes only; internal raw pointers are
// confined to the page cycle, which is synchronized through the atomic
// protocol above.
unsafe impl<T: Send> Send for RingQueue<T> {}
unsafe impl<T: Send> Sync for RingQueue<T> {}

impl<T> RingQueue<T> {
    /// Creates a queue holding at most `size` pending values (floored to 2).
    pub fn new(size: usize, mode: RingMode) -> Self {
        let size = size.max(MIN_SIZE);
        debug_assert_min_capacity!(size);

        // size + 1 ring pages, one page more than the requested capacity,
        // plus the off-ring reader page.
        let pages: Box<[Page<T>]> = (0..size + 2).map(|_| Page::new()).collect();

        // Close the cycle over pages [0, size]. The link bridging back to
        // page 0 carries the HEAD tag.
        for i in 0..=size {
            let next = if i == size { 0 } else { i + 1 };
            let tags = if i == size { TAG_HEAD } else { 0 };
            pages[i]
                .next
                .store(TaggedPtr::new(ptr_of(&pages[next]), tags), Ordering::Relaxed);
            let prev = if i == 0 { size } else { i - 1 };
            pages[i].prev.store(ptr_of(&pages[prev]), Ordering::Relaxed);
        }

        // The reader page sits outside the cycle, wired as a shadow of the
        // head page.
        let reader = &pages[size + 1];
        reader.prev.store(ptr_of(&pages[size]), Ordering::Relaxed);
        reader
            .next
            .store(TaggedPtr::new(ptr_of(&pages[0]), 0), Ordering::Relaxed);

        let first = ptr_of(&pages[0]);
        Self {
            head: CachePadded::new(AtomicPtr::new(first)),
            tail: CachePadded::new(AtomicPtr::new(first)),
            commit: AtomicPtr::new(first),
            reader: AtomicPtr::new(ptr_of(&pages[size + 1])),
            read_sync: CachePadded::new(AtomicBool::new(false)),
            write_sync: CachePadded::new(AtomicBool::new(false)),
            num_writers: AtomicU32::new(0),
            is_empty: AtomicBool::new(true),
            mode: AtomicU8::new(mode as u8),
            size,
            free_value_cb: None,
            stats: Counters::default(),
            pages,
        }
    }

    /// Number of values the queue can hold.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.is_empty.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn mode(&self) -> RingMode {
        RingMode::from_u8(self.mode.load(Ordering::Relaxed))
    }

    /// Switch between blocking and overwrite behaviour at runtime.
    #[inline]
    pub fn set_mode(&self, mode: RingMode) {
        self.mode.store(mode as u8, Ordering::Relaxed);
    }

    /// Install a hook receiving values evicted by overwrite-mode writes and
    /// values still pending when the queue is dropped. Without a hook such
    /// values are simply dropped.
    pub fn set_free_value_callback(&mut self, cb: impl Fn(Box<T>) + Send + Sync + 'static) {
        self.free_value_cb = Some(Box::new(cb));
    }

    /// Monotonic count of completed writes.
    #[inline]
    pub fn write_count(&self) -> u64 {
        self.stats.writes.load(Ordering::Relaxed)
    }

    /// Monotonic count of completed reads.
    #[inline]
    pub fn read_count(&self) -> u64 {
        self.stats.reads.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> RingQueueStats {
        let c = &self.stats;
        RingQueueStats {
            writes: c.writes.load(Ordering::Relaxed),
            reads: c.reads.load(Ordering::Relaxed),
            head_swap_failed: c.head_swap_failed.load(Ordering::Relaxed),
            reader_next_swap_failed: c.reader_next_swap_failed.load(Ordering::Relaxed),
            queue_full: c.queue_full.load(Ordering::Relaxed),
            overwrite: c.overwrite.load(Ordering::Relaxed),
            topology_change_detected: c.topology_change_detected.load(Ordering::Relaxed),
            concurrent_head_movement: c.concurrent_head_movement.load(Ordering::Relaxed),
            commit_advancement_detected: c.commit_advancement_detected.load(Ordering::Relaxed),
            concurrent_writer_detected: c.concurrent_writer_detected.load(Ordering::Relaxed),
            overwrite_state_changed: c.overwrite_state_changed.load(Ordering::Relaxed),
            head_next_changed: c.head_next_changed.load(Ordering::Relaxed),
            fast_retries_succeeded: c.fast_retries_succeeded.load(Ordering::Relaxed),
            patient_retries_succeeded: c.patient_retries_succeeded.load(Ordering::Relaxed),
            complex_retries_succeeded: c.complex_retries_succeeded.load(Ordering::Relaxed),
            critical_retries_succeeded: c.critical_retries_succeeded.load(Ordering::Relaxed),
            total_retry_failures: c.total_retry_failures.load(Ordering::Relaxed),
            total_retry_attempts: c.total_retry_attempts.load(Ordering::Relaxed),
            total_backoff_time_us: c.total_backoff_time_us.load(Ordering::Relaxed),
        }
    }

    // ---------------------------------------------------------------------
    // WRITER PATH
    // ---------------------------------------------------------------------

    /// Enqueue a value.
    ///
    /// In blocking mode a persistently full queue yields
    /// [`RingQueueError::QueueFull`] after the internal retry budget. In
    /// overwrite mode a full queue causes the oldest unread value to be
    /// replaced: it is handed to the eviction callback (or dropped) and the
    /// new value becomes the first one a reader will observe.
    pub fn write(&self, value: Box<T>) -> Result<(), RingQueueError> {
        let raw = Box::into_raw(value);
        // SAFETY: `raw` came out of `Box::into_raw` above; on failure we
        // re-own it so the value is not leaked.
        match unsafe { self.write_raw(raw) } {
            Ok(()) => Ok(()),
            Err(e) => {
                unsafe { drop(Box::from_raw(raw)) };
                Err(e)
            }
        }
    }

    /// Core writer. On `Ok` the queue owns `value`; on `Err` the caller
    /// keeps ownership.
    ///
    /// # Safety
    ///
    /// `value` must be non-null and point to a live `T` the caller owns.
    pub(crate) unsafe fn write_raw(&self, value: *mut T) -> Result<(), RingQueueError> {
        let mut retries: u32 = 0;
        let mut used_patient = false;
        let mut used_critical = false;
        let mut overwrite_attempts: u32 = 0;

        self.acquire_write_sync();
        self.num_writers.fetch_add(1, Ordering::AcqRel);

        let reserved = loop {
            let temp_page = self.tail.load(Ordering::Acquire);
            let commit = self.commit.load(Ordering::Acquire);
            let next_link = (*temp_page).next.load(Ordering::Acquire);
            let next_page = next_link.ptr();
            if next_page.is_null() {
                self.writer_exit();
                return Err(RingQueueError::Corrupted);
            }
            debug_assert_ring_link!(next_page);
            let head = self.head.load(Ordering::Acquire);

            // VALIDATION: readers may have advanced commit since the
            // snapshot; restart with fresh reads if so.
            if self.commit.load(Ordering::Acquire) != commit {
                self.bump(&self.stats.commit_advancement_detected);
                continue;
            }

            // VALIDATION: a competing writer may have advanced the tail.
            if self.tail.load(Ordering::Acquire) != temp_page {
                self.bump(&self.stats.concurrent_writer_detected);
                continue;
            }

            if self.mode() == RingMode::Blocking
                && commit == temp_page
                && temp_page != head
                && next_page != head
            {
                // Ring full in blocking mode: park with the patient
                // strategy and retry, giving readers a chance to drain.
                if retries < BLOCKING_MAX_RETRIES {
                    retries += 1;
                    used_patient = true;
                    self.bump(&self.stats.total_retry_attempts);
                    let _ = self.tail.compare_exchange(
                        temp_page,
                        next_page,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    );
                    self.writer_pause(RetryStrategy::Patient, retries);
                    continue;
                }
                self.writer_exit();
                self.bump(&self.stats.queue_full);
                self.bump(&self.stats.total_retry_failures);
                log::warn!(
                    "ring queue full after {} blocking retries (capacity {})",
                    retries,
                    self.size
                );
                return Err(RingQueueError::QueueFull);
            }

            let about_to_lap = next_link.has_tag(TAG_HEAD)
                || (next_page == head && !self.is_empty.load(Ordering::Relaxed));

            if about_to_lap {
                if self.mode() == RingMode::Overwrite
                    && (*commit).next.load(Ordering::Acquire).ptr() == temp_page
                {
                    // Synchronize with readers before touching the head:
                    // the reader algorithm assumes head stability for the
                    // duration of its splice.
                    if self
                        .read_sync
                        .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                        .is_ok()
                    {
                        match self.overwrite_head_value(head, commit, value) {
                            Ok(()) => {
                                self.release_read_sync();
                                if used_critical {
                                    self.bump(&self.stats.critical_retries_succeeded);
                                }
                                self.writer_exit();
                                return Ok(());
                            }
                            Err(()) => {
                                self.release_read_sync();
                                continue;
                            }
                        }
                    }
                    // A reader is mid-splice. It releases read_sync in
                    // bounded time, so fail fast and retry.
                    overwrite_attempts += 1;
                    used_critical = true;
                    if overwrite_attempts >= OVERWRITE_MAX_RETRIES {
                        self.writer_exit();
                        self.bump(&self.stats.queue_full);
                        self.bump(&self.stats.total_retry_failures);
                        return Err(RingQueueError::QueueFull);
                    }
                    self.bump(&self.stats.total_retry_attempts);
                    self.writer_pause(RetryStrategy::Critical, overwrite_attempts);
                    continue;
                }

                // Blocking mode lapping the head, or an overwrite writer
                // whose commit snapshot went stale: fast retries.
                if retries < WRITER_CAS_MAX_RETRIES {
                    retries += 1;
                    self.bump(&self.stats.total_retry_attempts);
                    self.writer_pause(RetryStrategy::Fast, retries);
                    continue;
                }
                self.writer_exit();
                self.bump(&self.stats.queue_full);
                self.bump(&self.stats.total_retry_failures);
                return Err(RingQueueError::QueueFull);
            }

            // Reserve the page. Stable page addresses plus write_sync make
            // this CAS immune to ABA.
            if self
                .tail
                .compare_exchange(temp_page, next_page, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break temp_page;
            }
            retries += 1;
            if retries >= WRITER_CAS_MAX_RETRIES {
                self.writer_exit();
                return Err(RingQueueError::Corrupted);
            }
        };

        // Payload handoff: lock-free after the reservation.
        let old = (*reserved).value.swap(value, Ordering::AcqRel);
        if !old.is_null() {
            self.evict(old);
        }

        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        self.is_empty.store(false, Ordering::Release);

        // Sole-writer optimization: publish the page to readers now rather
        // than waiting for a quiescent point.
        if self.num_writers.load(Ordering::Relaxed) == 1 {
            let c = self.commit.load(Ordering::Acquire);
            let _ = self
                .commit
                .compare_exchange(c, reserved, Ordering::AcqRel, Ordering::Acquire);
        }

        if retries > 0 {
            if used_patient {
                self.bump(&self.stats.patient_retries_succeeded);
            } else {
                self.bump(&self.stats.fast_retries_succeeded);
            }
        }

        self.writer_exit();
        Ok(())
    }

    /// Overwrite-mode full path: replace the value at the head page, which
    /// is the oldest value a reader would observe. The HEAD link is masked
    /// with UPDATE for the duration of the swap so that a concurrent reader
    /// CAS cannot trust it; the mask is removed by a restoring CAS.
    ///
    /// Caller holds both write_sync and read_sync.
    unsafe fn overwrite_head_value(
        &self,
        head: *mut Page<T>,
        commit: *mut Page<T>,
        value: *mut T,
    ) -> Result<(), ()> {
        self.bump(&self.stats.overwrite);

        // The snapshot may have gone stale while acquiring read_sync.
        if self.head.load(Ordering::Acquire) != head
            || self.commit.load(Ordering::Acquire) != commit
        {
            self.bump(&self.stats.overwrite_state_changed);
            return Err(());
        }

        let head_prev = (*head).prev.load(Ordering::Acquire);
        debug_assert_ring_link!(head_prev);

        // Mask the HEAD link. Failure means the topology moved under us.
        if (*head_prev)
            .next
            .compare_exchange(
                TaggedPtr::new(head, TAG_HEAD),
                TaggedPtr::new(head, TAG_HEAD | TAG_UPDATE),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            self.bump(&self.stats.head_next_changed);
            return Err(());
        }

        let old = (*head).value.swap(value, Ordering::AcqRel);
        if !old.is_null() {
            self.evict(old);
        }

        // Restore the HEAD link. We hold read_sync, so nobody can have
        // touched the masked link in between.
        let restored = (*head_prev)
            .next
            .compare_exchange(
                TaggedPtr::new(head, TAG_HEAD | TAG_UPDATE),
                TaggedPtr::new(head, TAG_HEAD),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        debug_assert!(restored, "masked HEAD link changed while held");

        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        self.is_empty.store(false, Ordering::Release);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // READER PATH
    // ---------------------------------------------------------------------

    /// Dequeue the oldest readable value, or `None` if the queue was
    /// observed empty within the bounded retry window.
    pub fn read(&self) -> Option<Box<T>> {
        let raw = self.read_raw();
        if raw.is_null() {
            None
        } else {
            // SAFETY: the pointer was produced by write()/write_raw() and
            // atomically taken out of its page; we are the only owner.
            Some(unsafe { Box::from_raw(raw) })
        }
    }

    /// Core reader; returns null when nothing was readable.
    pub(crate) fn read_raw(&self) -> *mut T {
        let mut value: *mut T = ptr::null_mut();
        let mut backoff_us: u64 = 0;

        for attempt in 0..READER_MAX_RETRIES {
            self.bump(&self.stats.total_retry_attempts);

            if self
                .read_sync
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_err()
            {
                // Another reader is mid-splice.
                backoff_us += RetryStrategy::Complex.backoff(attempt).as_micros() as u64;
                continue;
            }

            // SAFETY: all page pointers below reference the stable page
            // slab owned by `self.pages`; holding read_sync keeps the
            // reader page and the splice targets exclusive to this thread.
            unsafe {
                let head = self.head.load(Ordering::Acquire);
                let commit = self.commit.load(Ordering::Acquire);
                let next_link = (*head).next.load(Ordering::Acquire);
                let next = next_link.ptr();
                let reader = self.reader.load(Ordering::Acquire);
                let old_next = (*reader).next.load(Ordering::Acquire);

                if reader == commit || self.is_empty.load(Ordering::Relaxed) {
                    // Nothing to read.
                    self.release_read_sync();
                    continue;
                }

                // VALIDATION: the snapshot must still describe the ring
                // before any splice CAS is attempted.
                if self.head.load(Ordering::Acquire) != head
                    || self.commit.load(Ordering::Acquire) != commit
                    || (*head).next.load(Ordering::Acquire) != next_link
                {
                    self.bump(&self.stats.topology_change_detected);
                    self.release_read_sync();
                    backoff_us += RetryStrategy::Complex.backoff(attempt).as_micros() as u64;
                    continue;
                }

                debug_assert_ring_link!(next);

                // Step 1: point the reader page at the head's successor,
                // claiming the HEAD tag for its link.
                if (*reader)
                    .next
                    .compare_exchange(
                        old_next,
                        TaggedPtr::new(next, TAG_HEAD),
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_err()
                {
                    self.bump(&self.stats.reader_next_swap_failed);
                    self.release_read_sync();
                    backoff_us += RetryStrategy::Complex.backoff(attempt).as_micros() as u64;
                    continue;
                }

                (*reader).prev.store((*head).prev.load(Ordering::Acquire), Ordering::Release);

                // VALIDATION: overwrite-mode writers advance the head; if
                // it moved, roll the reader page back and retry.
                if self.head.load(Ordering::Acquire) != head {
                    self.bump(&self.stats.concurrent_head_movement);
                    (*reader).next.store(old_next, Ordering::Relaxed);
                    self.release_read_sync();
                    backoff_us += RetryStrategy::Complex.backoff(attempt).as_micros() as u64;
                    continue;
                }

                // Step 2: swing the link entering the head over to the
                // reader page. This CAS expects exactly (head, HEAD): a
                // masked (UPDATE) or moved link makes it fail, validating
                // the whole splice.
                let head_prev = (*head).prev.load(Ordering::Acquire);
                debug_assert_ring_link!(head_prev);
                if (*head_prev)
                    .next
                    .compare_exchange(
                        TaggedPtr::new(head, TAG_HEAD),
                        TaggedPtr::new(reader, 0),
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    // The head page is out of the ring now.
                    let _ = self
                        .head
                        .compare_exchange(head, next, Ordering::AcqRel, Ordering::Acquire);
                    (*next).prev.store(reader, Ordering::Release);
                    self.reader.store(head, Ordering::Release);

                    let v = (*head).value.load(Ordering::Acquire);
                    if v.is_null() {
                        // Page never carried a value; consumed as a skip.
                        self.release_read_sync();
                        continue;
                    }
                    let _ = (*head).value.compare_exchange(
                        v,
                        ptr::null_mut(),
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    );
                    self.stats.reads.fetch_add(1, Ordering::Relaxed);
                    debug_assert_reads_behind_writes!(self.read_count(), self.write_count());

                    // Empty-state update, guarded against the window between
                    // the head/tail comparison and the flag CAS.
                    let head_snap = self.head.load(Ordering::Acquire);
                    let tail_snap = self.tail.load(Ordering::Acquire);
                    if head_snap == tail_snap
                        && self.head.load(Ordering::Acquire) == head_snap
                        && self.tail.load(Ordering::Acquire) == tail_snap
                    {
                        let _ = self.is_empty.compare_exchange(
                            false,
                            true,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        );
                    }

                    value = v;
                    self.release_read_sync();
                    break;
                }

                // The ring moved between our reads and the swing CAS;
                // restore the reader page and try again.
                self.bump(&self.stats.head_swap_failed);
                (*reader).next.store(old_next, Ordering::Relaxed);
                self.release_read_sync();
                backoff_us += RetryStrategy::Complex.backoff(attempt).as_micros() as u64;
            }
        }

        self.stats
            .total_backoff_time_us
            .fetch_add(backoff_us, Ordering::Relaxed);
        if value.is_null() {
            self.bump(&self.stats.total_retry_failures);
        } else {
            self.bump(&self.stats.complex_retries_succeeded);
        }
        value
    }

    // ---------------------------------------------------------------------
    // INTERNAL HELPERS
    // ---------------------------------------------------------------------

    #[inline]
    fn bump(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn acquire_write_sync(&self) {
        while self
            .write_sync
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::thread::yield_now();
        }
    }

    #[inline]
    fn release_write_sync(&self) {
        let _ = self
            .write_sync
            .compare_exchange(true, false, Ordering::Release, Ordering::Relaxed);
    }

    #[inline]
    fn release_read_sync(&self) {
        let _ = self
            .read_sync
            .compare_exchange(true, false, Ordering::Release, Ordering::Relaxed);
    }

    /// Leave the writer critical section on an exit path.
    #[inline]
    fn writer_exit(&self) {
        self.num_writers.fetch_sub(1, Ordering::AcqRel);
        self.release_write_sync();
    }

    /// Drop the writer locks, back off, and re-enter. Keeps the active
    /// writer count accurate across the pause.
    fn writer_pause(&self, strategy: RetryStrategy, attempt: u32) {
        self.num_writers.fetch_sub(1, Ordering::AcqRel);
        self.release_write_sync();

        let mut slept = strategy.backoff(attempt).as_micros() as u64;
        while self
            .write_sync
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            slept += strategy.backoff(attempt).as_micros() as u64;
        }
        self.stats
            .total_backoff_time_us
            .fetch_add(slept, Ordering::Relaxed);

        self.num_writers.fetch_add(1, Ordering::AcqRel);
    }

    /// Re-own a replaced value and route it through the eviction hook.
    unsafe fn evict(&self, old: *mut T) {
        let boxed = Box::from_raw(old);
        if let Some(cb) = &self.free_value_cb {
            cb(boxed);
        }
    }
}

impl<T> Drop for RingQueue<T> {
    fn drop(&mut self) {
        // Pages are freed only here; during operation they are reused
        // cyclically but never released.
        for page in self.pages.iter() {
            let v = page.value.swap(ptr::null_mut(), Ordering::Relaxed);
            if !v.is_null() {
                // SAFETY: exclusive access in drop; the pointer is a live
                // Box<T> handed over by a writer.
                unsafe { self.evict(v) };
            }
        }
    }
}

#[inline]
fn ptr_of<T>(page: &Page<T>) -> *mut Page<T> {
    page as *const Page<T> as *mut Page<T>
}
