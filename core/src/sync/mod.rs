//! In-process coordination primitives

mod keyed_lock;

pub use keyed_lock::{KeyedLock, KeyedLockGuard};
