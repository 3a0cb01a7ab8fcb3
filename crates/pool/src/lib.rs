//! Pooled buffer/lease fabric (C15).
//!
//! Stacks guarded by a single lock; double-release is suppressed by a
//! compare-and-swap on a `disposed` flag carried inside each lease.
//! Clearing on return is required so a rented buffer never carries the
//! previous tenant's bytes.

#![deny(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Anything a pool can hand out must be resettable to a clean state before
/// it goes back on the stack.
pub trait Poolable {
    fn clear(&mut self);
}

impl Poolable for Vec<u8> {
    fn clear(&mut self) {
        Vec::clear(self);
    }
}

struct PoolInner<T: Poolable> {
    free: Mutex<Vec<T>>,
    factory: Box<dyn Fn() -> T + Send + Sync>,
}

/// A stack-backed pool of reusable `T` values.
pub struct Pool<T: Poolable> {
    inner: Arc<PoolInner<T>>,
}

impl<T: Poolable> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Poolable + Send + 'static> Pool<T> {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::new()),
                factory: Box::new(factory),
            }),
        }
    }

    /// Number of values currently parked on the free stack.
    pub fn parked(&self) -> usize {
        self.inner.free.lock().len()
    }

    /// Rent a value: pops from the free stack, or builds a fresh one.
    pub fn rent(&self) -> Lease<T> {
        let value = self
            .inner
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| (self.inner.factory)());
        Lease {
            pool: self.clone(),
            value: Mutex::new(Some(value)),
            disposed: AtomicBool::new(false),
        }
    }

    fn give_back(&self, mut value: T) {
        value.clear();
        self.inner.free.lock().push(value);
    }
}

/// Owns a rented `T` until released. Release is idempotent — a second
/// `dispose()` (or a `Drop` following an explicit one) is a no-op.
pub struct Lease<T: Poolable + Send + 'static> {
    pool: Pool<T>,
    value: Mutex<Option<T>>,
    disposed: AtomicBool,
}

impl<T: Poolable + Send + 'static> Lease<T> {
    /// Runs `f` against the leased value. Panics if already disposed —
    /// accessing a disposed lease is a caller bug, not a recoverable state.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = self.value.lock();
        f(guard.as_ref().expect("Lease used after dispose"))
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.value.lock();
        f(guard.as_mut().expect("Lease used after dispose"))
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Returns the value to the pool. Safe to call more than once.
    pub fn dispose(&self) {
        if self
            .disposed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            if let Some(value) = self.value.lock().take() {
                self.pool.give_back(value);
            }
        }
    }
}

impl<T: Poolable + Send + 'static> Drop for Lease<T> {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn byte_pool() -> Pool<Vec<u8>> {
        Pool::new(|| Vec::with_capacity(64))
    }

    #[test]
    fn rent_without_prior_release_builds_fresh() {
        let pool = byte_pool();
        let lease = pool.rent();
        lease.with(|buf| assert!(buf.is_empty()));
        assert_eq!(pool.parked(), 0);
    }

    #[test]
    fn dispose_returns_value_to_pool() {
        let pool = byte_pool();
        let lease = pool.rent();
        lease.with_mut(|buf| buf.extend_from_slice(b"hello"));
        lease.dispose();
        assert_eq!(pool.parked(), 1);
    }

    #[test]
    fn returned_buffer_is_cleared() {
        let pool = byte_pool();
        let lease = pool.rent();
        lease.with_mut(|buf| buf.extend_from_slice(b"dirty"));
        lease.dispose();
        let next = pool.rent();
        next.with(|buf| assert!(buf.is_empty()));
    }

    #[test]
    fn double_dispose_is_a_no_op() {
        let pool = byte_pool();
        let lease = pool.rent();
        lease.dispose();
        lease.dispose();
        assert_eq!(pool.parked(), 1);
    }

    #[test]
    fn dropping_an_undisposed_lease_still_returns_it() {
        let pool = byte_pool();
        {
            let lease = pool.rent();
            lease.with_mut(|buf| buf.push(1));
        }
        assert_eq!(pool.parked(), 1);
    }

    #[test]
    #[should_panic(expected = "used after dispose")]
    fn access_after_dispose_panics() {
        let pool = byte_pool();
        let lease = pool.rent();
        lease.dispose();
        lease.with(|_| ());
    }
}
