//! Atomic pointers carrying flag bits in their low-order bits.
//!
//! Every pointer handled here references a heap allocation with alignment
//! of at least 4, which leaves the two lowest address bits free. All
//! mask/unmask arithmetic in the crate lives in this module; call sites
//! deal only in `(pointer, tag)` pairs.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Tag marking the link that bridges back into the head of a ring.
pub const TAG_HEAD: usize = 0b01;
/// Tag masking a HEAD link while it is being moved.
pub const TAG_UPDATE: usize = 0b10;

const TAG_MASK: usize = 0b11;

/// A snapshot of a tagged pointer: the untagged address plus its tag bits.
pub struct TaggedPtr<T> {
    raw: usize,
    _marker: PhantomData<*mut T>,
}

impl<T> TaggedPtr<T> {
    #[inline]
    pub fn new(ptr: *mut T, tags: usize) -> Self {
        debug_assert_eq!(ptr as usize & TAG_MASK, 0, "pointer not 4-byte aligned");
        Self {
            raw: ptr as usize | (tags & TAG_MASK),
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn null() -> Self {
        Self {
            raw: 0,
            _marker: PhantomData,
        }
    }

    /// The address with all tag bits stripped.
    #[inline]
    pub fn ptr(self) -> *mut T {
        (self.raw & !TAG_MASK) as *mut T
    }

    #[inline]
    pub fn tags(self) -> usize {
        self.raw & TAG_MASK
    }

    #[inline]
    pub fn has_tag(self, tag: usize) -> bool {
        self.raw & tag == tag
    }

    /// The same pointer with `tags` as the complete new tag set.
    #[inline]
    pub fn with_tags(self, tags: usize) -> Self {
        Self::new(self.ptr(), tags)
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.ptr().is_null()
    }
}

impl<T> Clone for TaggedPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for TaggedPtr<T> {}

impl<T> PartialEq for TaggedPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}
impl<T> Eq for TaggedPtr<T> {}

impl<T> std::fmt::Debug for TaggedPtr<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TaggedPtr({:p}, {:#04b})", self.ptr(), self.tags())
    }
}

/// Atomic cell holding a pointer plus up to two tag bits.
pub struct AtomicTaggedPtr<T> {
    cell: AtomicUsize,
    _marker: PhantomData<*mut T>,
}

impl<T> AtomicTaggedPtr<T> {
    #[inline]
    pub fn new(value: TaggedPtr<T>) -> Self {
        Self {
            cell: AtomicUsize::new(value.raw),
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn load(&self, order: Ordering) -> TaggedPtr<T> {
        TaggedPtr {
            raw: self.cell.load(order),
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn store(&self, value: TaggedPtr<T>, order: Ordering) {
        self.cell.store(value.raw, order);
    }

    /// Pointer and tags are compared together: a CAS succeeds only when
    /// both match.
    #[inline]
    pub fn compare_exchange(
        &self,
        current: TaggedPtr<T>,
        new: TaggedPtr<T>,
        success: Ordering,
        failure: Ordering,
    ) -> Result<(), TaggedPtr<T>> {
        self.cell
            .compare_exchange(current.raw, new.raw, success, failure)
            .map(|_| ())
            .map_err(|raw| TaggedPtr {
                raw,
                _marker: PhantomData,
            })
    }
}

/// A snapshot of a marked pointer: address plus one logical-deletion bit.
pub struct MarkedPtr<T> {
    raw: usize,
    _marker: PhantomData<*mut T>,
}

const MARK_BIT: usize = 0b01;

impl<T> MarkedPtr<T> {
    #[inline]
    pub fn new(ptr: *mut T, marked: bool) -> Self {
        debug_assert_eq!(ptr as usize & MARK_BIT, 0, "pointer not aligned");
        Self {
            raw: ptr as usize | usize::from(marked),
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn null() -> Self {
        Self {
            raw: 0,
            _marker: PhantomData,
        }
    }

    /// The address with the mark stripped.
    #[inline]
    pub fn ptr(self) -> *mut T {
        (self.raw & !MARK_BIT) as *mut T
    }

    #[inline]
    pub fn is_marked(self) -> bool {
        self.raw & MARK_BIT == MARK_BIT
    }

    #[inline]
    pub fn marked(self) -> Self {
        Self {
            raw: self.raw | MARK_BIT,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn unmarked(self) -> Self {
        Self {
            raw: self.raw & !MARK_BIT,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.ptr().is_null()
    }
}

impl<T> Clone for MarkedPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for MarkedPtr<T> {}

impl<T> PartialEq for MarkedPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}
impl<T> Eq for MarkedPtr<T> {}

impl<T> std::fmt::Debug for MarkedPtr<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MarkedPtr({:p}, marked={})", self.ptr(), self.is_marked())
    }
}

/// Atomic cell holding a pointer plus a logical-deletion mark. The mark is
/// always observed together with the pointer value.
pub struct AtomicMarkedPtr<T> {
    cell: AtomicUsize,
    _marker: PhantomData<*mut T>,
}

impl<T> AtomicMarkedPtr<T> {
    #[inline]
    pub fn new(value: MarkedPtr<T>) -> Self {
        Self {
            cell: AtomicUsize::new(value.raw),
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn null() -> Self {
        Self::new(MarkedPtr::null())
    }

    #[inline]
    pub fn load(&self, order: Ordering) -> MarkedPtr<T> {
        MarkedPtr {
            raw: self.cell.load(order),
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn store(&self, value: MarkedPtr<T>, order: Ordering) {
        self.cell.store(value.raw, order);
    }

    #[inline]
    pub fn compare_exchange(
        &self,
        current: MarkedPtr<T>,
        new: MarkedPtr<T>,
        success: Ordering,
        failure: Ordering,
    ) -> Result<(), MarkedPtr<T>> {
        self.cell
            .compare_exchange(current.raw, new.raw, success, failure)
            .map(|_| ())
            .map_err(|raw| MarkedPtr {
                raw,
                _marker: PhantomData,
            })
    }

    /// Set the deletion mark, preserving the pointer. Idempotent.
    pub fn fetch_mark(&self, order: Ordering) -> MarkedPtr<T> {
        loop {
            let current = self.load(Ordering::Relaxed);
            if current.is_marked() {
                return current;
            }
            if self
                .compare_exchange(current, current.marked(), order, Ordering::Relaxed)
                .is_ok()
            {
                return current.marked();
            }
        }
    }
}
