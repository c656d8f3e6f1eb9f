//! Split-lock bounded MPMC queue.
//!
//! Two mutexes guard the two cursors independently: producers serialize on
//! the tail lock, consumers on the head lock, and the only state mutated by
//! both lock domains is the atomic size counter. The counter is incremented
//! with a plain atomic add (the tail lock serializes pushes against each
//! other) and decremented with a compare-and-retry loop (the snapshot a pop
//! holds may be stale by the time it decrements).
//!
//! # Lock order
//!
//! Whenever both locks are needed, head is acquired before tail, and no path
//! acquires the tail lock and then waits on the head lock. This is the sole
//! deadlock-freedom rule.
//!
//! # Counter hand-off
//!
//! Acquire loads and AcqRel updates on `size` carry slot ownership between
//! the two lock domains: a pusher that observes a pop's decrement also
//! observes the pop's move-out of the freed slot, and vice versa.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

use thiserror::Error;

use crate::mpmc::ring::RingStorage;
use crate::trace::{debug, trace};

/// Smallest capacity a queue may be constructed with.
pub const MIN_CAPACITY: usize = 2;

/// Error returned when a queue cannot be constructed.
///
/// Construction is the only fallible operation: steady-state push/pop report
/// full/empty through their return values, never through errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConstructError {
    /// The requested capacity is below [`MIN_CAPACITY`].
    #[error("capacity must be at least {MIN_CAPACITY}, got {0}")]
    CapacityTooSmall(usize),

    /// The backing slot buffer could not be allocated.
    #[error("failed to allocate storage for {0} slots")]
    AllocationFailed(usize),
}

/// Acquires a cursor lock, recovering from poisoning.
///
/// The critical sections contain no unwinding operations between a slot
/// access and its cursor/counter update, so a lock poisoned by a panicking
/// peer still guards a consistent ring.
fn lock(cursor: &Mutex<usize>) -> MutexGuard<'_, usize> {
    cursor.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Blocks on `signal`, releasing and reacquiring the cursor lock.
fn park<'a>(signal: &Condvar, guard: MutexGuard<'a, usize>) -> MutexGuard<'a, usize> {
    signal.wait(guard).unwrap_or_else(PoisonError::into_inner)
}

/// Bounded multi-producer/multi-consumer FIFO queue.
///
/// Elements are stored in a fixed ring of `capacity` slots. `head` is the
/// index of the next slot to pop, `tail` the next slot to push into; both
/// wrap modulo the capacity, and exactly `size` slots starting at `head`
/// hold live values.
///
/// The queue is shared by reference (typically inside an `Arc`); it is
/// never cloned. All operations take `&self`.
pub struct BoundedQueue<T> {
    storage: RingStorage<T>,

    /// Number of logically occupied slots, `0..=capacity`.
    size: AtomicUsize,

    /// Consumer cursor: index of the next slot to pop. The head lock also
    /// covers the "has data" decision.
    head: Mutex<usize>,

    /// Producer cursor: index of the next slot to push into. The tail lock
    /// also covers the admission check, and is where `size` reads are
    /// authoritative.
    tail: Mutex<usize>,

    /// Signaled after a successful push; waited on (with the head lock) by
    /// [`BoundedQueue::wait_and_pop`].
    not_empty: Condvar,

    /// Signaled after a successful pop; waited on (with the tail lock) by
    /// [`BoundedQueue::wait_to_push`].
    not_full: Condvar,
}

impl<T> BoundedQueue<T> {
    /// Creates an empty queue holding at most `capacity` elements.
    ///
    /// # Errors
    ///
    /// - [`ConstructError::CapacityTooSmall`] if `capacity < MIN_CAPACITY`
    /// - [`ConstructError::AllocationFailed`] if the slot buffer cannot be
    ///   allocated
    pub fn with_capacity(capacity: usize) -> Result<Self, ConstructError> {
        if capacity < MIN_CAPACITY {
            return Err(ConstructError::CapacityTooSmall(capacity));
        }
        let storage = RingStorage::allocate(capacity)
            .map_err(|_| ConstructError::AllocationFailed(capacity))?;
        debug!(capacity, "bounded queue constructed");

        Ok(Self {
            storage,
            size: AtomicUsize::new(0),
            head: Mutex::new(0),
            tail: Mutex::new(0),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        })
    }

    /// Maximum number of elements the queue can hold.
    pub fn capacity(&self) -> usize {
        self.storage.capacity()
    }

    /// Momentary element count, read under the tail lock.
    ///
    /// This is a snapshot, not linearizable against concurrent pops: a pop
    /// may decrement the counter the instant the lock is released.
    pub fn len(&self) -> usize {
        self.size_snapshot()
    }

    /// Whether the queue was momentarily empty. Same snapshot semantics as
    /// [`BoundedQueue::len`].
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reports whether construction completed.
    ///
    /// Always `true`: a queue that fails to construct is never returned, so
    /// no invalid instance is reachable. Kept so callers ported from
    /// flag-checking APIs have something to assert against.
    pub fn is_valid(&self) -> bool {
        true
    }

    /// Attempts to push without blocking.
    ///
    /// # Errors
    ///
    /// Returns `Err(value)` if the queue is full, handing the value back
    /// for retry. A failed push mutates nothing.
    pub fn try_push(&self, value: T) -> Result<(), T> {
        {
            let mut tail = lock(&self.tail);
            if self.size.load(Ordering::Acquire) == self.capacity() {
                return Err(value);
            }
            // SAFETY: the tail lock grants exclusive access to the slot at
            // `*tail`, and the admission check above proved it free.
            unsafe { self.storage.write(*tail, value) };
            *tail = self.storage.advance(*tail);
            // Plain add: the tail lock serializes pushes against each other.
            self.size.fetch_add(1, Ordering::AcqRel);
        }
        self.signal_not_empty();
        Ok(())
    }

    /// Attempts to pop without blocking.
    ///
    /// Returns `None` if the queue is empty; a failed pop mutates nothing.
    #[must_use]
    pub fn try_pop(&self) -> Option<T> {
        let value = {
            let mut head = lock(&self.head);
            let snapshot = self.size_snapshot();
            if snapshot == 0 {
                return None;
            }
            // SAFETY: the head lock grants exclusive access to the slot at
            // `*head`, and the nonzero snapshot proved it occupied.
            let value = unsafe { self.storage.take(*head) };
            *head = self.storage.advance(*head);
            self.release_slot(snapshot);
            value
        };
        self.signal_not_full();
        Some(value)
    }

    /// Pushes, blocking until capacity is available.
    ///
    /// Blocks indefinitely if no consumer ever frees a slot: there is no
    /// timeout and no cancellation.
    pub fn wait_to_push(&self, value: T) {
        {
            let mut tail = lock(&self.tail);
            while self.size.load(Ordering::Acquire) == self.capacity() {
                tail = park(&self.not_full, tail);
            }
            // SAFETY: as in `try_push`; the admission predicate held when
            // the wait returned, with the tail lock reacquired.
            unsafe { self.storage.write(*tail, value) };
            *tail = self.storage.advance(*tail);
            self.size.fetch_add(1, Ordering::AcqRel);
        }
        self.signal_not_empty();
    }

    /// Pops, blocking until an element is available.
    ///
    /// Blocks indefinitely if no producer ever pushes: there is no timeout
    /// and no cancellation.
    #[must_use]
    pub fn wait_and_pop(&self) -> T {
        let value = {
            let mut head = lock(&self.head);
            let mut snapshot = self.size_snapshot();
            while snapshot == 0 {
                head = park(&self.not_empty, head);
                snapshot = self.size_snapshot();
            }
            // SAFETY: as in `try_pop`; the snapshot is nonzero.
            let value = unsafe { self.storage.take(*head) };
            *head = self.storage.advance(*head);
            self.release_slot(snapshot);
            value
        };
        self.signal_not_full();
        value
    }

    /// Pushes every element of `values`, yielding to the scheduler whenever
    /// the queue is full.
    ///
    /// Defined purely in terms of [`BoundedQueue::try_push`]. Does not
    /// return until every element is in, so it can occupy the calling
    /// thread indefinitely if no consumer drains the queue.
    pub fn push_many<I>(&self, values: I)
    where
        I: IntoIterator<Item = T>,
    {
        let mut yields: u64 = 0;
        for mut value in values {
            loop {
                match self.try_push(value) {
                    Ok(()) => break,
                    Err(returned) => {
                        value = returned;
                        yields += 1;
                        thread::yield_now();
                    }
                }
            }
        }
        trace!(yields, "push_many complete");
    }

    /// Pops exactly `count` elements, yielding to the scheduler whenever
    /// the queue is empty.
    ///
    /// Defined purely in terms of [`BoundedQueue::try_pop`]; the same
    /// caveat as [`BoundedQueue::push_many`] applies.
    #[must_use]
    pub fn pop_many(&self, count: usize) -> Vec<T> {
        let mut out = Vec::with_capacity(count);
        let mut yields: u64 = 0;
        while out.len() < count {
            match self.try_pop() {
                Some(value) => out.push(value),
                None => {
                    yields += 1;
                    thread::yield_now();
                }
            }
        }
        trace!(yields, "pop_many complete");
        out
    }

    /// Consistent `size` snapshot, taken under a brief tail lock
    /// acquisition. Pops call this while holding the head lock; head before
    /// tail is the fixed acquisition order.
    fn size_snapshot(&self) -> usize {
        let _tail = lock(&self.tail);
        self.size.load(Ordering::Acquire)
    }

    /// Decrements `size` by exactly one with a compare-and-retry loop
    /// seeded with `snapshot`.
    ///
    /// A plain subtract of the stale snapshot would corrupt the count if a
    /// push raced in between the snapshot and this point; re-reading the
    /// current value on each failed exchange decrements whatever the
    /// counter holds now. The head lock serializes pops, so no two
    /// decrements race each other.
    fn release_slot(&self, snapshot: usize) {
        let mut current = snapshot;
        loop {
            match self.size.compare_exchange(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Wakes one parked popper.
    ///
    /// `size` grows under the tail lock while poppers check their predicate
    /// under the head lock, so a bare notify could land in the window
    /// between a waiter's predicate check and its block, and be lost.
    /// Touching the head lock first orders this notification after any such
    /// waiter has actually parked. The caller holds no lock here, so the
    /// acquisition order is not in play.
    fn signal_not_empty(&self) {
        drop(lock(&self.head));
        self.not_empty.notify_one();
    }

    /// Wakes one parked pusher; the mirror image of
    /// [`BoundedQueue::signal_not_empty`], with the roles swapped.
    fn signal_not_full(&self) {
        drop(lock(&self.tail));
        self.not_full.notify_one();
    }
}

impl<T: fmt::Debug> fmt::Debug for BoundedQueue<T> {
    /// Renders capacity, size, cursor positions, and the live elements in
    /// logical head-to-tail order.
    ///
    /// Takes both cursor locks (head before tail) for the duration of the
    /// formatting, so this momentarily stalls producers and consumers.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head = lock(&self.head);
        let tail = lock(&self.tail);
        let size = self.size.load(Ordering::Acquire);

        write!(
            f,
            "BoundedQueue {{ capacity: {}, size: {}, head: {}, tail: {}, elements: [",
            self.capacity(),
            size,
            *head,
            *tail,
        )?;
        let mut index = *head;
        for i in 0..size {
            if i > 0 {
                write!(f, ", ")?;
            }
            // SAFETY: both cursor locks are held, and `index` stays inside
            // the live window of exactly `size` slots starting at `*head`.
            let value = unsafe { self.storage.peek(index) };
            write!(f, "{value:?}")?;
            index = self.storage.advance(index);
        }
        write!(f, "] }}")
    }
}

impl<T> Drop for BoundedQueue<T> {
    fn drop(&mut self) {
        // Exclusive access: read the final cursor and counter values
        // directly, then drop the live window in place.
        let live = *self.size.get_mut();
        let mut index = *self.head.get_mut().unwrap_or_else(PoisonError::into_inner);
        for _ in 0..live {
            // SAFETY: exactly `live` slots starting at `index` hold
            // initialized values, and `&mut self` rules out concurrent
            // access.
            unsafe { self.storage.drop_slot(index) };
            index = self.storage.advance(index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_capacity_below_minimum_rejected() {
        assert_eq!(
            BoundedQueue::<u64>::with_capacity(0).unwrap_err(),
            ConstructError::CapacityTooSmall(0)
        );
        assert_eq!(
            BoundedQueue::<u64>::with_capacity(1).unwrap_err(),
            ConstructError::CapacityTooSmall(1)
        );
        assert!(BoundedQueue::<u64>::with_capacity(MIN_CAPACITY).is_ok());
    }

    #[test]
    fn test_basic_push_pop() {
        let queue = BoundedQueue::with_capacity(8).unwrap();

        assert!(queue.try_push(42u64).is_ok());
        assert_eq!(queue.try_pop(), Some(42));
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn test_fifo_order() {
        let queue = BoundedQueue::with_capacity(16).unwrap();

        for i in 0..10u64 {
            assert!(queue.try_push(i).is_ok());
        }
        for i in 0..10u64 {
            assert_eq!(queue.try_pop(), Some(i));
        }
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn test_push_to_full_fails_without_mutation() {
        let queue = BoundedQueue::with_capacity(4).unwrap();

        for i in 0..4u64 {
            assert!(queue.try_push(i).is_ok(), "failed to push item {i}");
        }
        assert_eq!(queue.len(), 4);

        // Rejected value comes back; nothing about the queue changes.
        assert_eq!(queue.try_push(999), Err(999));
        assert_eq!(queue.len(), 4);

        assert_eq!(queue.try_pop(), Some(0));
        assert!(queue.try_push(4).is_ok());
        assert_eq!(queue.try_push(1000), Err(1000));
    }

    #[test]
    fn test_pop_from_empty_fails_without_mutation() {
        let queue = BoundedQueue::<u64>::with_capacity(4).unwrap();

        assert_eq!(queue.try_pop(), None);
        assert_eq!(queue.len(), 0);
        assert!(queue.is_empty());

        queue.try_push(7).unwrap();
        assert_eq!(queue.try_pop(), Some(7));
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn test_wraparound_preserves_fifo() {
        // Capacity 5: fill, drain 3, refill past the storage boundary.
        let queue = BoundedQueue::with_capacity(5).unwrap();

        for i in 0..5u64 {
            assert!(queue.try_push(i).is_ok());
        }
        assert_eq!(queue.pop_many(3), vec![0, 1, 2]);

        for i in 5..8u64 {
            assert!(queue.try_push(i).is_ok());
        }
        assert_eq!(queue.len(), 5);
        assert_eq!(queue.pop_many(5), vec![3, 4, 5, 6, 7]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_repeated_laps_preserve_order() {
        let queue = BoundedQueue::with_capacity(4).unwrap();

        for round in 0..5u64 {
            for i in 0..4 {
                assert!(queue.try_push(round * 10 + i).is_ok());
            }
            for i in 0..4 {
                assert_eq!(queue.try_pop(), Some(round * 10 + i));
            }
            assert_eq!(queue.try_pop(), None);
        }
    }

    #[test]
    fn test_non_copy_type() {
        let queue = BoundedQueue::with_capacity(8).unwrap();

        queue.try_push("hello".to_string()).unwrap();
        queue.try_push("world".to_string()).unwrap();

        assert_eq!(queue.try_pop(), Some("hello".to_string()));
        assert_eq!(queue.try_pop(), Some("world".to_string()));
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn test_push_many_pop_many_roundtrip() {
        let queue = BoundedQueue::with_capacity(8).unwrap();

        queue.push_many(0..8u64);
        assert_eq!(queue.pop_many(8), (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_len_and_queries() {
        let queue = BoundedQueue::<u64>::with_capacity(5).unwrap();

        assert_eq!(queue.capacity(), 5);
        assert!(queue.is_valid());
        assert!(queue.is_empty());

        queue.try_push(1).unwrap();
        queue.try_push(2).unwrap();
        assert_eq!(queue.len(), 2);
        assert!(!queue.is_empty());
    }

    #[test]
    fn test_debug_render() {
        let queue = BoundedQueue::with_capacity(5).unwrap();
        for i in 1..=3u64 {
            queue.try_push(i).unwrap();
        }

        assert_eq!(
            format!("{queue:?}"),
            "BoundedQueue { capacity: 5, size: 3, head: 0, tail: 3, elements: [1, 2, 3] }"
        );
    }

    #[test]
    fn test_debug_render_wrapped_window() {
        let queue = BoundedQueue::with_capacity(3).unwrap();
        queue.push_many([1u64, 2, 3]);
        assert_eq!(queue.try_pop(), Some(1));
        assert_eq!(queue.try_pop(), Some(2));
        queue.push_many([4u64, 5]);

        // head = 2: the live window crosses the storage boundary.
        assert_eq!(
            format!("{queue:?}"),
            "BoundedQueue { capacity: 3, size: 3, head: 2, tail: 2, elements: [3, 4, 5] }"
        );
    }

    /// Bumps a shared counter when dropped.
    struct DropProbe(Arc<AtomicUsize>);

    impl Drop for DropProbe {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_drop_releases_live_elements() {
        let drops = Arc::new(AtomicUsize::new(0));

        {
            let queue = BoundedQueue::with_capacity(4).unwrap();
            for _ in 0..3 {
                assert!(queue.try_push(DropProbe(Arc::clone(&drops))).is_ok());
            }
            drop(queue.try_pop());
            assert_eq!(drops.load(Ordering::Relaxed), 1);
        }

        // The two still-queued probes dropped with the queue.
        assert_eq!(drops.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_drop_handles_wrapped_live_window() {
        let drops = Arc::new(AtomicUsize::new(0));

        {
            let queue = BoundedQueue::with_capacity(3).unwrap();
            for _ in 0..3 {
                assert!(queue.try_push(DropProbe(Arc::clone(&drops))).is_ok());
            }
            drop(queue.try_pop());
            drop(queue.try_pop());
            // Wrap: head = 2 and the refilled window spans the boundary.
            for _ in 0..2 {
                assert!(queue.try_push(DropProbe(Arc::clone(&drops))).is_ok());
            }
            assert_eq!(drops.load(Ordering::Relaxed), 2);
        }

        assert_eq!(drops.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn test_construct_error_display() {
        assert_eq!(
            ConstructError::CapacityTooSmall(1).to_string(),
            "capacity must be at least 2, got 1"
        );
        assert_eq!(
            ConstructError::AllocationFailed(64).to_string(),
            "failed to allocate storage for 64 slots"
        );
    }
}
