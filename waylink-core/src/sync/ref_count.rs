use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::atomic::{fence, AtomicUsize, Ordering};

struct Inner<T> {
    count: AtomicUsize,
    value: T,
}

/// An explicitly reference-counted heap allocation.
///
/// [`retain`](RefCounted::retain) and [`release`](RefCounted::release) are
/// spelled-out aliases for `Clone` and `Drop`; the value is dropped exactly
/// once, when the count transitions from one to zero. Useful where handles
/// are handed across threads and the drop point must be the last release,
/// not a particular owner.
pub struct RefCounted<T> {
    inner: NonNull<Inner<T>>,
}

unsafe impl<T: Send + Sync> Send for RefCounted<T> {}
unsafe impl<T: Send + Sync> Sync for RefCounted<T> {}

impl<T> RefCounted<T> {
    pub fn new(value: T) -> Self {
        let inner = Box::new(Inner {
            count: AtomicUsize::new(1),
            value,
        });
        Self {
            inner: NonNull::from(Box::leak(inner)),
        }
    }

    fn inner(&self) -> &Inner<T> {
        // SAFETY: the allocation lives until the last handle is released,
        // and this handle holds one reference.
        unsafe { self.inner.as_ref() }
    }

    /// Take an additional reference.
    pub fn retain(&self) -> Self {
        self.clone()
    }

    /// Give up this reference; drops the value if it was the last one.
    pub fn release(self) {
        drop(self);
    }

    /// The current number of live handles.
    pub fn strong_count(&self) -> usize {
        self.inner().count.load(Ordering::Acquire)
    }
}

impl<T> Deref for RefCounted<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner().value
    }
}

impl<T> Clone for RefCounted<T> {
    fn clone(&self) -> Self {
        self.inner().count.fetch_add(1, Ordering::Relaxed);
        Self { inner: self.inner }
    }
}

impl<T> Drop for RefCounted<T> {
    fn drop(&mut self) {
        if self.inner().count.fetch_sub(1, Ordering::Release) != 1 {
            return;
        }
        // Synchronize with every other release before dropping the value.
        fence(Ordering::Acquire);
        // SAFETY: the count reached zero, so this was the last handle and
        // nothing can observe the allocation anymore.
        drop(unsafe { Box::from_raw(self.inner.as_ptr()) });
    }
}
