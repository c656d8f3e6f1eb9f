//! Bounded MPMC queue built from split cursor locks.
//!
//! The two submodules mirror the layering of the queue:
//!
//! - [`ring`] - slot storage and cursor-advance arithmetic, no locking
//! - [`queue`] - the locking protocol and the public operation set

pub mod queue;
pub(crate) mod ring;
