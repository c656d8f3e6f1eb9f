//! Bounded MPMC queue with split fine-grained locking.
//!
//! # Overview
//!
//! - [`BoundedQueue`] - fixed-capacity multi-producer/multi-consumer FIFO
//! - Separate mutexes for the producer and consumer cursors, so concurrent
//!   pushes and concurrent pops never contend on a shared critical section
//! - A lock-free size counter is the only state shared by both lock domains
//! - Non-blocking ([`BoundedQueue::try_push`] / [`BoundedQueue::try_pop`]),
//!   blocking ([`BoundedQueue::wait_to_push`] / [`BoundedQueue::wait_and_pop`])
//!   and bulk ([`BoundedQueue::push_many`] / [`BoundedQueue::pop_many`])
//!   operations
//!
//! # Example
//!
//! ```
//! use splitq::BoundedQueue;
//!
//! let queue = BoundedQueue::with_capacity(8)?;
//!
//! queue.try_push(42).expect("queue has room");
//! assert_eq!(queue.try_pop(), Some(42));
//! assert_eq!(queue.try_pop(), None);
//! # Ok::<(), splitq::ConstructError>(())
//! ```
//!
//! Blocking calls park on a condition variable and never time out: a
//! `wait_and_pop` with no producer on the other side blocks forever. Callers
//! are responsible for supplying an opposite-side thread (or for sticking to
//! the `try_` variants in single-threaded contexts).

mod trace;

pub mod mpmc;

pub use mpmc::queue::{BoundedQueue, ConstructError, MIN_CAPACITY};
pub use trace::init_tracing;
