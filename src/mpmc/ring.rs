//! Fixed-capacity slot storage for the split-lock MPMC queue.
//!
//! [`RingStorage`] holds the element slots and the cursor-advance arithmetic,
//! and nothing else: it has no synchronization of its own. Callers must hold
//! the appropriate cursor lock before touching a slot; see
//! [`crate::mpmc::queue`] for the locking protocol.

use std::cell::UnsafeCell;
use std::collections::TryReserveError;
use std::mem::MaybeUninit;

/// A single element slot.
///
/// Slots are `MaybeUninit`: a slot holds a live value exactly when the
/// queue's cursor/size bookkeeping says so. Moving a value out leaves the
/// stale bytes in place until the slot is next written, so there is no
/// per-pop destruction step.
#[repr(transparent)]
pub(crate) struct Slot<T>(UnsafeCell<MaybeUninit<T>>);

impl<T> Slot<T> {
    fn new() -> Self {
        Self(UnsafeCell::new(MaybeUninit::uninit()))
    }
}

// SAFETY: slot access is serialized by the queue's cursor locks. The
// producer side writes only `storage[tail]` while holding the tail lock, the
// consumer side reads only `storage[head]` while holding the head lock, and
// the cursors never alias a live slot: they coincide only when the queue is
// empty or full, both of which gate the opposite operation.
unsafe impl<T: Send> Sync for Slot<T> {}
unsafe impl<T: Send> Send for Slot<T> {}

/// Fixed-size contiguous slot storage with modular cursor arithmetic.
pub(crate) struct RingStorage<T> {
    slots: Box<[Slot<T>]>,
}

impl<T> RingStorage<T> {
    /// Allocates storage for `capacity` slots.
    ///
    /// # Errors
    ///
    /// Returns the allocator's error if the backing buffer cannot be
    /// reserved.
    pub(crate) fn allocate(capacity: usize) -> Result<Self, TryReserveError> {
        let mut slots = Vec::new();
        slots.try_reserve_exact(capacity)?;
        slots.extend((0..capacity).map(|_| Slot::new()));
        Ok(Self {
            slots: slots.into_boxed_slice(),
        })
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Advances a cursor to the next slot index, wrapping to 0 at capacity.
    ///
    /// Equivalent to `(cursor + 1) % capacity` without the division.
    #[inline]
    pub(crate) fn advance(&self, cursor: usize) -> usize {
        let next = cursor + 1;
        if next == self.slots.len() { 0 } else { next }
    }

    /// Writes `value` into the slot at `index`.
    ///
    /// # Safety
    ///
    /// Caller must hold the producer cursor lock with `index == tail`,
    /// `index` must be in `[0, capacity)`, and the slot must be logically
    /// free: its previous occupant, if any, was already moved out.
    #[inline]
    pub(crate) unsafe fn write(&self, index: usize, value: T) {
        // SAFETY: exclusive access to the slot per the caller contract.
        unsafe {
            (*self.slots[index].0.get()).write(value);
        }
    }

    /// Moves the value out of the slot at `index`.
    ///
    /// # Safety
    ///
    /// Caller must hold the consumer cursor lock with `index == head`, and
    /// the slot must be logically occupied (a nonzero size snapshot was
    /// taken while that lock was held).
    #[inline]
    pub(crate) unsafe fn take(&self, index: usize) -> T {
        // SAFETY: the slot is initialized per the caller contract, and
        // logical ownership of the value transfers to the caller.
        unsafe { (*self.slots[index].0.get()).assume_init_read() }
    }

    /// Returns a shared reference to the live value at `index`.
    ///
    /// # Safety
    ///
    /// Caller must hold *both* cursor locks, so neither side can mutate any
    /// slot, and `index` must lie in the live window of `size` slots
    /// starting at `head`.
    #[inline]
    pub(crate) unsafe fn peek(&self, index: usize) -> &T {
        // SAFETY: initialized and un-aliased per the caller contract.
        unsafe { (*self.slots[index].0.get()).assume_init_ref() }
    }

    /// Drops the live value at `index` in place.
    ///
    /// # Safety
    ///
    /// Caller must have exclusive access to the whole storage and the slot
    /// must be logically occupied. The slot becomes logically free.
    pub(crate) unsafe fn drop_slot(&mut self, index: usize) {
        // SAFETY: initialized per the caller contract.
        unsafe {
            (*self.slots[index].0.get()).assume_init_drop();
        }
    }
}
