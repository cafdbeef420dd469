//! Concurrent hash table with chaining, per-bucket spin locks and online
//! doubling.
//!
//! A single status word coordinates the three kinds of table-level access:
//! readers stack up by incrementing the word above `IDLE`, while writers
//! (bucket installation), growers and `clear` each require an exclusive
//! transition away from `IDLE`. In-bucket mutation is serialized by the
//! bucket's own spin lock, which is acquired *before* the reader drops its
//! slice of the status word — that handoff is what keeps a bucket pointer
//! valid outside the status-held section.
//!
//! Values are shared byte snapshots (`Arc<[u8]>`): `get` hands out a
//! reference-counted view without copying the bytes, and the value is
//! released when the last clone drops.

use crate::spinlock::{SpinLock, SpinLockGuard};
use crate::walk::IterAction;
use parking_lot::Mutex;
use rand::Rng;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Smallest bucket-array size a table will be created with.
pub const HT_SIZE_MIN: usize = 128;

const KEY_INLINE_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HashTableError {
    /// Zero-length keys are not admitted.
    #[error("zero-length key")]
    InvalidKey,
    /// `set_if_not_exists` found the key already present.
    #[error("key already present")]
    AlreadyExists,
    /// Conditional update found a value different from the expected bytes.
    #[error("current value does not match the expected bytes")]
    ValueMismatch,
    #[error("key not found")]
    NotFound,
}

// ---------------------------------------------------------------------
// STATUS WORD
// ---------------------------------------------------------------------
// Order matters: anything below IDLE excludes readers.

const STATUS_CLEAR: u32 = 0;
const STATUS_WRITE: u32 = 1;
const STATUS_GROW: u32 = 2;
const STATUS_IDLE: u32 = 3;
// STATUS_IDLE + n encodes READ with n active readers.

struct TableStatus(AtomicU32);

impl TableStatus {
    fn new() -> Self {
        Self(AtomicU32::new(STATUS_IDLE))
    }

    /// Admit a reader: IDLE -> READ(1) or READ(n) -> READ(n + 1), spinning
    /// past writers, growers and clears.
    fn begin_read(&self) {
        loop {
            let status = self.0.load(Ordering::Acquire);
            if status >= STATUS_IDLE {
                if self
                    .0
                    .compare_exchange_weak(
                        status,
                        status + 1,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    return;
                }
            } else {
                std::thread::yield_now();
            }
        }
    }

    /// Retire a reader; the last one restores IDLE.
    fn end_read(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |status| {
                (status > STATUS_IDLE).then(|| status - 1)
            });
    }

    /// Take one of the exclusive states, spinning until the table is idle.
    fn begin_exclusive(&self, target: u32) {
        while self
            .0
            .compare_exchange(STATUS_IDLE, target, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            std::thread::yield_now();
        }
    }

    /// Single CAS attempt at an exclusive state.
    fn try_begin_exclusive(&self, target: u32) -> bool {
        self.0
            .compare_exchange(STATUS_IDLE, target, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn end_exclusive(&self, from: u32) {
        let _ = self
            .0
            .compare_exchange(from, STATUS_IDLE, Ordering::AcqRel, Ordering::Acquire);
    }
}

// ---------------------------------------------------------------------
// ITEMS & BUCKETS
// ---------------------------------------------------------------------

/// Key storage with a small-buffer optimization: keys up to 32 bytes live
/// inline in the item, longer ones on the heap.
enum ItemKey {
    Inline { len: u8, buf: [u8; KEY_INLINE_LEN] },
    Heap(Box<[u8]>),
}

impl ItemKey {
    fn new(key: &[u8]) -> Self {
        if key.len() <= KEY_INLINE_LEN {
            let mut buf = [0u8; KEY_INLINE_LEN];
            buf[..key.len()].copy_from_slice(key);
            Self::Inline {
                len: key.len() as u8,
                buf,
            }
        } else {
            Self::Heap(key.into())
        }
    }

    fn as_slice(&self) -> &[u8] {
        match self {
            Self::Inline { len, buf } => &buf[..usize::from(*len)],
            Self::Heap(k) => k,
        }
    }
}

struct Item {
    hash: u32,
    key: ItemKey,
    /// `None` after `unset`: the item stays, the mapping is gone.
    data: Option<Arc<[u8]>>,
}

impl Item {
    #[inline]
    fn matches(&self, hash: u32, key: &[u8]) -> bool {
        self.hash == hash && self.key.as_slice() == key
    }
}

struct Bucket {
    index: usize,
    items: SpinLock<Vec<Item>>,
}

type BucketArray = Vec<AtomicPtr<Bucket>>;

/// Concurrent map from byte keys to shared byte values.
pub struct HashTable {
    size: AtomicUsize,
    max_size: usize,
    count: AtomicUsize,
    seed: u32,
    status: TableStatus,
    buckets: AtomicPtr<BucketArray>,
    /// Registry of live buckets, in creation order; iteration and resizing
    /// walk the table through it. The bucket-array pointer is only swapped
    /// while this mutex is held.
    iterators: Mutex<Vec<*mut Bucket>>,
}

// Safety: all interior raw pointers are governed by the status word, the
// iterator mutex and the per-bucket spin locks as described above.
unsafe impl Send for HashTable {}
unsafe impl Sync for HashTable {}

impl HashTable {
    /// `initial_size` is floored to [`HT_SIZE_MIN`]; `max_size == 0` means
    /// the table may double without bound.
    pub fn new(initial_size: usize, max_size: usize) -> Self {
        let size = initial_size.max(HT_SIZE_MIN);
        let array: BucketArray = (0..size).map(|_| AtomicPtr::new(ptr::null_mut())).collect();
        Self {
            size: AtomicUsize::new(size),
            max_size,
            count: AtomicUsize::new(0),
            seed: rand::thread_rng().gen(),
            status: TableStatus::new(),
            buckets: AtomicPtr::new(Box::into_raw(Box::new(array))),
            iterators: Mutex::new(Vec::new()),
        }
    }

    /// One-at-a-time hash over the key bytes, mixed with the per-table
    /// seed. Hash equality is necessary but not sufficient for key
    /// equality.
    fn hash_key(&self, key: &[u8]) -> u32 {
        let mut hash = self.seed.wrapping_add(key.len() as u32);
        for &byte in key {
            hash = hash.wrapping_add(u32::from(byte));
            hash = hash.wrapping_add(hash << 10);
            hash ^= hash >> 6;
        }
        hash = hash.wrapping_add(hash << 3);
        hash ^= hash >> 11;
        hash.wrapping_add(hash << 15)
    }

    /// Current bucket-array size.
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// Approximate live item count (includes unset tombstones until their
    /// items are deleted).
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    // -----------------------------------------------------------------
    // READ / WRITE PROTOCOLS
    // -----------------------------------------------------------------

    /// Look up the bucket for `hash` and return it with its spin lock
    /// held, or `None` when the slot has no bucket yet.
    ///
    /// The lock is taken before the reader lets go of the status word, so
    /// the grower cannot free the bucket while the guard lives.
    fn get_list(&self, hash: u32) -> Option<SpinLockGuard<'_, Vec<Item>>> {
        self.status.begin_read();

        // SAFETY: the array pointer is stable while the status word admits
        // readers; the grower requires an exclusive transition.
        let guard = unsafe {
            let array = &*self.buckets.load(Ordering::Acquire);
            let index = hash as usize % self.size.load(Ordering::Acquire);
            let bucket = array[index].load(Ordering::Acquire);
            if bucket.is_null() {
                None
            } else {
                Some((*bucket).items.lock())
            }
        };

        self.status.end_read();
        guard
    }

    /// Install a bucket for `hash`, returning it locked. If another writer
    /// beat us to the slot, its bucket is returned instead.
    fn set_list(&self, hash: u32) -> SpinLockGuard<'_, Vec<Item>> {
        let bucket = Box::into_raw(Box::new(Bucket {
            index: 0,
            items: SpinLock::new(Vec::new()),
        }));
        // SAFETY: `bucket` is unpublished; we hold its only reference.
        let guard = unsafe { (*bucket).items.lock() };

        self.status.begin_exclusive(STATUS_WRITE);

        // SAFETY: WRITE excludes every other accessor of the array.
        unsafe {
            let array = &*self.buckets.load(Ordering::Acquire);
            let index = hash as usize % self.size.load(Ordering::Acquire);
            let existing = array[index].load(Ordering::Acquire);
            if !existing.is_null() {
                // Lost the race; adopt the winner's bucket. Its lock is
                // taken before the status is released.
                drop(guard);
                drop(Box::from_raw(bucket));
                let guard = (*existing).items.lock();
                self.status.end_exclusive(STATUS_WRITE);
                return guard;
            }

            (*bucket).index = index;
            array[index].store(bucket, Ordering::Release);
            // Register before leaving WRITE so a grower starting right
            // after cannot miss this bucket.
            self.iterators.lock().push(bucket);
        }

        self.status.end_exclusive(STATUS_WRITE);
        guard
    }

    /// Run `f` on the locked bucket of `key`, creating the bucket when
    /// `create` is set. `None` when the bucket does not exist.
    fn with_list<R>(
        &self,
        hash: u32,
        create: bool,
        f: impl FnOnce(&mut Vec<Item>) -> R,
    ) -> Option<R> {
        let mut guard = match self.get_list(hash) {
            Some(guard) => guard,
            None if create => self.set_list(hash),
            None => return None,
        };
        Some(f(&mut guard))
    }

    // -----------------------------------------------------------------
    // RESIZE
    // -----------------------------------------------------------------

    /// Double the bucket array and rehash every item. A failed IDLE->GROW
    /// CAS means someone else is at it (or will be after the next insert).
    fn grow_table(&self) {
        if !self.status.try_begin_exclusive(STATUS_GROW) {
            return;
        }

        let old_size = self.size.load(Ordering::Acquire);
        if self.max_size != 0 && old_size >= self.max_size {
            self.status.end_exclusive(STATUS_GROW);
            return;
        }
        let mut new_size = old_size * 2;
        if self.max_size != 0 && new_size > self.max_size {
            new_size = self.max_size;
        }

        let new_array: BucketArray = (0..new_size)
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect();
        let new_array = Box::into_raw(Box::new(new_array));
        let mut new_registry: Vec<*mut Bucket> = Vec::new();

        let mut registry = self.iterators.lock();

        // SAFETY: GROW excludes readers/writers and the iterator mutex
        // excludes foreach/clear; we own every bucket in the registry.
        unsafe {
            let old_array = self.buckets.swap(new_array, Ordering::AcqRel);
            self.size.store(new_size, Ordering::Release);

            for &old_bucket in registry.iter() {
                let mut items = (*old_bucket).items.lock();
                for item in items.drain(..) {
                    let index = item.hash as usize % new_size;
                    let mut target = (*new_array)[index].load(Ordering::Acquire);
                    if target.is_null() {
                        target = Box::into_raw(Box::new(Bucket {
                            index,
                            items: SpinLock::new(Vec::new()),
                        }));
                        (*new_array)[index].store(target, Ordering::Release);
                        new_registry.push(target);
                    }
                    (*target).items.lock().push(item);
                }
                drop(items);
                drop(Box::from_raw(old_bucket));
            }

            *registry = new_registry;
            drop(registry);

            self.status.end_exclusive(STATUS_GROW);
            drop(Box::from_raw(old_array));
        }

        log::debug!("hash table grown from {old_size} to {new_size} buckets");
    }

    /// Growth trigger, checked after inserts with the bucket lock already
    /// released.
    fn maybe_grow(&self) {
        let size = self.size.load(Ordering::Acquire);
        if self.count() > size + size / 3 && (self.max_size == 0 || size < self.max_size) {
            self.grow_table();
        }
    }

    // -----------------------------------------------------------------
    // SET FAMILY
    // -----------------------------------------------------------------

    fn set_inner(
        &self,
        key: &[u8],
        data: Arc<[u8]>,
        only_if_absent: bool,
        keep_existing: bool,
    ) -> Result<Option<Arc<[u8]>>, HashTableError> {
        if key.is_empty() {
            return Err(HashTableError::InvalidKey);
        }
        let hash = self.hash_key(key);

        let outcome = self
            .with_list(hash, true, |items| {
                if let Some(item) = items.iter_mut().find(|i| i.matches(hash, key)) {
                    if only_if_absent {
                        // An unset mapping counts as absent.
                        if let Some(existing) = item.data.clone() {
                            return Err(existing);
                        }
                        item.data = Some(data);
                        return Ok(None);
                    }
                    return Ok(item.data.replace(data));
                }
                items.push(Item {
                    hash,
                    key: ItemKey::new(key),
                    data: Some(data),
                });
                self.count.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            })
            .expect("set_list always yields a bucket");

        match outcome {
            Ok(prev) => {
                self.maybe_grow();
                Ok(prev)
            }
            Err(existing) => {
                if keep_existing {
                    Ok(Some(existing))
                } else {
                    Err(HashTableError::AlreadyExists)
                }
            }
        }
    }

    /// Insert or overwrite; a replaced value is released when its last
    /// reader drops it.
    pub fn set(&self, key: &[u8], data: impl Into<Arc<[u8]>>) -> Result<(), HashTableError> {
        self.set_inner(key, data.into(), false, false).map(|_| ())
    }

    /// Insert or overwrite, duplicating `data` into table-owned memory.
    pub fn set_copy(&self, key: &[u8], data: &[u8]) -> Result<(), HashTableError> {
        self.set_inner(key, Arc::from(data), false, false).map(|_| ())
    }

    /// Insert only when the key is absent.
    pub fn set_if_not_exists(
        &self,
        key: &[u8],
        data: impl Into<Arc<[u8]>>,
    ) -> Result<(), HashTableError> {
        self.set_inner(key, data.into(), true, false).map(|_| ())
    }

    /// Return the existing value, or insert `data` when the key is absent.
    /// `None` means the insert happened. Atomic with respect to concurrent
    /// callers.
    pub fn get_or_set(
        &self,
        key: &[u8],
        data: impl Into<Arc<[u8]>>,
    ) -> Result<Option<Arc<[u8]>>, HashTableError> {
        self.set_inner(key, data.into(), true, true)
    }

    /// Insert or overwrite, returning the previous value if any.
    pub fn get_and_set(
        &self,
        key: &[u8],
        data: impl Into<Arc<[u8]>>,
    ) -> Result<Option<Arc<[u8]>>, HashTableError> {
        self.set_inner(key, data.into(), false, false)
    }

    /// Update only when the current value equals `expected` byte-for-byte;
    /// inserts when the key is absent. An unequal current value leaves the
    /// table untouched and reports [`HashTableError::ValueMismatch`].
    pub fn set_if_equals(
        &self,
        key: &[u8],
        data: impl Into<Arc<[u8]>>,
        expected: &[u8],
    ) -> Result<(), HashTableError> {
        if key.is_empty() {
            return Err(HashTableError::InvalidKey);
        }
        let hash = self.hash_key(key);
        let data = data.into();

        let result = self
            .with_list(hash, true, |items| {
                if let Some(item) = items.iter_mut().find(|i| i.matches(hash, key)) {
                    match &item.data {
                        Some(current) if current.as_ref() == expected => {
                            item.data = Some(data);
                            Ok(false)
                        }
                        _ => Err(HashTableError::ValueMismatch),
                    }
                } else {
                    items.push(Item {
                        hash,
                        key: ItemKey::new(key),
                        data: Some(data),
                    });
                    self.count.fetch_add(1, Ordering::Relaxed);
                    Ok(true)
                }
            })
            .expect("set_list always yields a bucket");

        match result {
            Ok(inserted) => {
                if inserted {
                    self.maybe_grow();
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    // -----------------------------------------------------------------
    // REMOVAL FAMILY
    // -----------------------------------------------------------------

    /// Clear the mapping but keep the item; the former value goes back to
    /// the caller instead of being released.
    pub fn unset(&self, key: &[u8]) -> Option<Arc<[u8]>> {
        let hash = self.hash_key(key);
        self.with_list(hash, false, |items| {
            items
                .iter_mut()
                .find(|i| i.matches(hash, key))
                .and_then(|item| item.data.take())
        })
        .flatten()
    }

    /// Remove the mapping, releasing the value.
    pub fn delete(&self, key: &[u8]) -> Result<(), HashTableError> {
        self.remove(key).map(|_| ()).ok_or(HashTableError::NotFound)
    }

    /// Remove the mapping and hand the former value to the caller.
    pub fn remove(&self, key: &[u8]) -> Option<Arc<[u8]>> {
        let hash = self.hash_key(key);
        self.with_list(hash, false, |items| {
            let pos = items.iter().position(|i| i.matches(hash, key))?;
            let item = items.remove(pos);
            self.count.fetch_sub(1, Ordering::Relaxed);
            item.data
        })
        .flatten()
    }

    /// Remove only when the current value equals `expected` exactly.
    pub fn delete_if_equals(&self, key: &[u8], expected: &[u8]) -> Result<(), HashTableError> {
        let hash = self.hash_key(key);
        self.with_list(hash, false, |items| {
            let pos = items
                .iter()
                .position(|i| i.matches(hash, key))
                .ok_or(HashTableError::NotFound)?;
            match &items[pos].data {
                Some(current) if current.as_ref() == expected => {
                    items.remove(pos);
                    self.count.fetch_sub(1, Ordering::Relaxed);
                    Ok(())
                }
                _ => Err(HashTableError::ValueMismatch),
            }
        })
        .unwrap_or(Err(HashTableError::NotFound))
    }

    // -----------------------------------------------------------------
    // LOOKUP FAMILY
    // -----------------------------------------------------------------

    /// Shared snapshot of the value; cheap, no byte copy.
    pub fn get(&self, key: &[u8]) -> Option<Arc<[u8]>> {
        let hash = self.hash_key(key);
        self.with_list(hash, false, |items| {
            items
                .iter()
                .find(|i| i.matches(hash, key))
                .and_then(|i| i.data.clone())
        })
        .flatten()
    }

    /// Owned copy of the value bytes.
    pub fn get_copy(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.get(key).map(|data| data.to_vec())
    }

    /// Run `copy` over the value under the bucket lock and return its
    /// product.
    pub fn get_deep_copy<R>(&self, key: &[u8], copy: impl FnOnce(&[u8]) -> R) -> Option<R> {
        let hash = self.hash_key(key);
        self.with_list(hash, false, |items| {
            items
                .iter()
                .find(|i| i.matches(hash, key))
                .and_then(|i| i.data.as_ref())
                .map(|data| copy(data))
        })
        .flatten()
    }

    /// True when an item for `key` exists, even if its mapping was unset.
    pub fn exists(&self, key: &[u8]) -> bool {
        let hash = self.hash_key(key);
        self.with_list(hash, false, |items| {
            items.iter().any(|i| i.matches(hash, key))
        })
        .unwrap_or(false)
    }

    /// Invoke `f` under the bucket lock with mutable access to the value
    /// slot. A `Remove*` verdict deletes the whole item.
    pub fn call(
        &self,
        key: &[u8],
        f: impl FnOnce(&[u8], &mut Option<Arc<[u8]>>) -> IterAction,
    ) -> Result<(), HashTableError> {
        let hash = self.hash_key(key);
        self.with_list(hash, false, |items| {
            let pos = items
                .iter()
                .position(|i| i.matches(hash, key))
                .ok_or(HashTableError::NotFound)?;
            let action = {
                let item = &mut items[pos];
                f(item.key.as_slice(), &mut item.data)
            };
            if matches!(action, IterAction::RemoveContinue | IterAction::RemoveStop) {
                items.remove(pos);
                self.count.fetch_sub(1, Ordering::Relaxed);
            }
            Ok(())
        })
        .unwrap_or(Err(HashTableError::NotFound))
    }

    // -----------------------------------------------------------------
    // ITERATION
    // -----------------------------------------------------------------

    /// Visit every pair under the iterator mutex, bucket by bucket. Unset
    /// items are presented with an empty value slice.
    pub fn foreach_pair(&self, mut f: impl FnMut(&[u8], &[u8]) -> IterAction) {
        let registry = self.iterators.lock();
        // SAFETY: the iterator mutex keeps every registered bucket alive;
        // items are accessed under the bucket lock.
        unsafe {
            'outer: for &bucket in registry.iter() {
                let mut items = (*bucket).items.lock();
                let mut i = 0;
                while i < items.len() {
                    let action = {
                        let item = &items[i];
                        f(
                            item.key.as_slice(),
                            item.data.as_deref().unwrap_or(&[]),
                        )
                    };
                    match action {
                        IterAction::Continue => i += 1,
                        IterAction::Stop => break 'outer,
                        IterAction::RemoveContinue => {
                            items.remove(i);
                            self.count.fetch_sub(1, Ordering::Relaxed);
                        }
                        IterAction::RemoveStop => {
                            items.remove(i);
                            self.count.fetch_sub(1, Ordering::Relaxed);
                            break 'outer;
                        }
                    }
                }
            }
        }
    }

    pub fn foreach_key(&self, mut f: impl FnMut(&[u8]) -> IterAction) {
        self.foreach_pair(|key, _| f(key));
    }

    pub fn foreach_value(&self, mut f: impl FnMut(&[u8]) -> IterAction) {
        self.foreach_pair(|_, value| f(value));
    }

    /// Snapshot of every key.
    pub fn get_all_keys(&self) -> Vec<Box<[u8]>> {
        let mut keys = Vec::new();
        self.foreach_pair(|key, _| {
            keys.push(key.into());
            IterAction::Continue
        });
        keys
    }

    /// Snapshot of every live value.
    pub fn get_all_values(&self) -> Vec<Arc<[u8]>> {
        let registry = self.iterators.lock();
        let mut values = Vec::new();
        // SAFETY: as in foreach_pair.
        unsafe {
            for &bucket in registry.iter() {
                let items = (*bucket).items.lock();
                for item in items.iter() {
                    if let Some(data) = &item.data {
                        values.push(Arc::clone(data));
                    }
                }
            }
        }
        values
    }

    /// Remove every item. Exclusive with all other table access.
    pub fn clear(&self) {
        self.status.begin_exclusive(STATUS_CLEAR);

        let mut registry = self.iterators.lock();
        // SAFETY: CLEAR excludes readers and writers; the iterator mutex
        // excludes iteration; every registered bucket is exclusively ours.
        unsafe {
            let array = &*self.buckets.load(Ordering::Acquire);
            for &bucket in registry.iter() {
                let mut items = (*bucket).items.lock();
                let removed = items.len();
                items.clear();
                self.count.fetch_sub(removed, Ordering::Relaxed);
                drop(items);
                array[(*bucket).index].store(ptr::null_mut(), Ordering::Release);
                drop(Box::from_raw(bucket));
            }
            registry.clear();
        }
        drop(registry);

        self.status.end_exclusive(STATUS_CLEAR);
    }
}

impl Drop for HashTable {
    fn drop(&mut self) {
        self.clear();
        // SAFETY: exclusive access in drop; clear() released every bucket.
        unsafe {
            drop(Box::from_raw(self.buckets.load(Ordering::Acquire)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_set_get_roundtrip() {
        let ht = HashTable::new(8, 0);
        ht.set(b"hello", &b"world"[..]).unwrap();
        assert_eq!(ht.get(b"hello").as_deref(), Some(&b"world"[..]));
        assert_eq!(ht.get(b"nope"), None);
        assert_eq!(ht.count(), 1);
    }

    #[test]
    fn test_zero_length_key_rejected() {
        let ht = HashTable::new(8, 0);
        assert_eq!(ht.set(b"", &b"x"[..]), Err(HashTableError::InvalidKey));
    }

    #[test]
    fn test_long_keys_heap_allocated() {
        let ht = HashTable::new(8, 0);
        let long_key = vec![7u8; 100];
        ht.set(&long_key, &b"big"[..]).unwrap();
        assert_eq!(ht.get(&long_key).as_deref(), Some(&b"big"[..]));

        let inline_key = vec![7u8; 32];
        assert_eq!(ht.get(&inline_key), None);
    }

    #[test]
    fn test_set_if_not_exists() {
        let ht = HashTable::new(8, 0);
        ht.set_if_not_exists(b"k", &b"a"[..]).unwrap();
        assert_eq!(
            ht.set_if_not_exists(b"k", &b"b"[..]),
            Err(HashTableError::AlreadyExists)
        );
        assert_eq!(ht.get(b"k").as_deref(), Some(&b"a"[..]));
    }

    #[test]
    fn test_get_or_set() {
        let ht = HashTable::new(8, 0);
        assert_eq!(ht.get_or_set(b"k", &b"first"[..]).unwrap(), None);
        let existing = ht.get_or_set(b"k", &b"second"[..]).unwrap();
        assert_eq!(existing.as_deref(), Some(&b"first"[..]));
        assert_eq!(ht.get(b"k").as_deref(), Some(&b"first"[..]));
    }

    #[test]
    fn test_get_and_set_returns_previous() {
        let ht = HashTable::new(8, 0);
        assert_eq!(ht.get_and_set(b"k", &b"one"[..]).unwrap(), None);
        let prev = ht.get_and_set(b"k", &b"two"[..]).unwrap();
        assert_eq!(prev.as_deref(), Some(&b"one"[..]));
        assert_eq!(ht.get(b"k").as_deref(), Some(&b"two"[..]));
    }

    #[test]
    fn test_set_if_equals_semantics() {
        let ht = HashTable::new(8, 0);
        ht.set(b"k", &b"a"[..]).unwrap();

        assert_eq!(ht.set_if_equals(b"k", &b"b"[..], b"a"), Ok(()));
        assert_eq!(ht.get(b"k").as_deref(), Some(&b"b"[..]));

        assert_eq!(
            ht.set_if_equals(b"k", &b"c"[..], b"a"),
            Err(HashTableError::ValueMismatch)
        );
        assert_eq!(ht.get(b"k").as_deref(), Some(&b"b"[..]));

        // Absent key: the conditional set inserts.
        assert_eq!(ht.set_if_equals(b"fresh", &b"v"[..], b"whatever"), Ok(()));
        assert_eq!(ht.get(b"fresh").as_deref(), Some(&b"v"[..]));
    }

    #[test]
    fn test_unset_keeps_item() {
        let ht = HashTable::new(8, 0);
        ht.set(b"k", &b"v"[..]).unwrap();
        assert_eq!(ht.unset(b"k").as_deref(), Some(&b"v"[..]));
        assert_eq!(ht.get(b"k"), None);
        assert!(ht.exists(b"k"));
        assert_eq!(ht.count(), 1);

        // Re-setting revives the mapping in place.
        ht.set(b"k", &b"v2"[..]).unwrap();
        assert_eq!(ht.get(b"k").as_deref(), Some(&b"v2"[..]));
        assert_eq!(ht.count(), 1);
    }

    #[test]
    fn test_delete_variants() {
        let ht = HashTable::new(8, 0);
        ht.set(b"k", &b"v"[..]).unwrap();

        assert_eq!(ht.delete(b"missing"), Err(HashTableError::NotFound));
        assert_eq!(
            ht.delete_if_equals(b"k", b"other"),
            Err(HashTableError::ValueMismatch)
        );
        assert_eq!(ht.delete_if_equals(b"k", b"v"), Ok(()));
        assert!(!ht.exists(b"k"));
        assert_eq!(ht.count(), 0);

        ht.set(b"r", &b"w"[..]).unwrap();
        assert_eq!(ht.remove(b"r").as_deref(), Some(&b"w"[..]));
        assert_eq!(ht.count(), 0);
    }

    #[test]
    fn test_call_under_lock() {
        let ht = HashTable::new(8, 0);
        ht.set(b"k", &b"v"[..]).unwrap();

        ht.call(b"k", |key, data| {
            assert_eq!(key, b"k");
            *data = Some(Arc::from(&b"patched"[..]));
            IterAction::Continue
        })
        .unwrap();
        assert_eq!(ht.get(b"k").as_deref(), Some(&b"patched"[..]));

        ht.call(b"k", |_, _| IterAction::RemoveStop).unwrap();
        assert!(!ht.exists(b"k"));
        assert_eq!(ht.count(), 0);
    }

    #[test]
    fn test_foreach_and_snapshots() {
        let ht = HashTable::new(8, 0);
        for i in 0..10u8 {
            ht.set(&[b'k', i], &[i][..]).unwrap();
        }

        let mut visited = 0;
        ht.foreach_pair(|_, _| {
            visited += 1;
            IterAction::Continue
        });
        assert_eq!(visited, 10);

        assert_eq!(ht.get_all_keys().len(), 10);
        assert_eq!(ht.get_all_values().len(), 10);

        // Remove every even value during iteration.
        ht.foreach_value(|value| {
            if value[0] % 2 == 0 {
                IterAction::RemoveContinue
            } else {
                IterAction::Continue
            }
        });
        assert_eq!(ht.count(), 5);
    }

    #[test]
    fn test_grow_preserves_items() {
        let ht = HashTable::new(8, 0);
        let initial = ht.size();
        for i in 0..1000u32 {
            ht.set(i.to_string().as_bytes(), i.to_string().as_bytes())
                .unwrap();
        }
        assert!(ht.size() > initial, "table never grew");
        assert_eq!(ht.count(), 1000);
        for i in (0..1000u32).step_by(97) {
            let key = i.to_string();
            assert_eq!(
                ht.get(key.as_bytes()).as_deref(),
                Some(key.as_bytes()),
                "lost key {key} after growth"
            );
        }
    }

    #[test]
    fn test_max_size_caps_growth() {
        let ht = HashTable::new(8, HT_SIZE_MIN);
        for i in 0..2000u32 {
            ht.set(i.to_string().as_bytes(), &b"x"[..]).unwrap();
        }
        assert_eq!(ht.size(), HT_SIZE_MIN);
        assert_eq!(ht.count(), 2000);
    }

    #[test]
    fn test_clear_empties_table() {
        let ht = HashTable::new(8, 0);
        for i in 0..100u32 {
            ht.set(i.to_string().as_bytes(), &b"x"[..]).unwrap();
        }
        ht.clear();
        assert_eq!(ht.count(), 0);
        assert_eq!(ht.get(b"5"), None);
        // The table remains usable.
        ht.set(b"5", &b"again"[..]).unwrap();
        assert_eq!(ht.get(b"5").as_deref(), Some(&b"again"[..]));
    }

    #[test]
    fn test_concurrent_inserts_across_growth() {
        let ht = Arc::new(HashTable::new(8, 0));
        let mut handles = Vec::new();
        for t in 0..5 {
            let ht = Arc::clone(&ht);
            handles.push(thread::spawn(move || {
                for i in 0..200 {
                    let n = t * 200 + i;
                    ht.set(n.to_string().as_bytes(), n.to_string().as_bytes())
                        .unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(ht.count(), 1000);
        assert_eq!(ht.get(b"500").as_deref(), Some(&b"500"[..]));
    }

    #[test]
    fn test_concurrent_readers_and_writers() {
        let ht = Arc::new(HashTable::new(8, 0));
        for i in 0..100u32 {
            ht.set(i.to_string().as_bytes(), &b"seed"[..]).unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..2 {
            let ht = Arc::clone(&ht);
            handles.push(thread::spawn(move || {
                for i in 0..100u32 {
                    ht.set(i.to_string().as_bytes(), &b"updated"[..]).unwrap();
                }
            }));
        }
        for _ in 0..2 {
            let ht = Arc::clone(&ht);
            handles.push(thread::spawn(move || {
                for i in 0..100u32 {
                    // Value is either the seed or an update, never absent.
                    assert!(ht.get(i.to_string().as_bytes()).is_some());
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(ht.count(), 100);
    }
}
