//! Critical sections shared with interrupt context.

use parking_lot::Mutex;

/// Data guarded by an interrupt-mask style critical section.
///
/// The guarded value is only reachable inside [`with()`](Self::with), so a
/// critical section can never outlive the closure that opened it. Sections
/// are kept short and never call back into code that takes the same lock.
pub struct IrqLock<T> {
    inner: Mutex<T>,
}

impl<T> IrqLock<T> {
    /// Creates a lock around `value`. Usable in `static` items.
    pub const fn new(value: T) -> Self {
        Self {
            inner: parking_lot::const_mutex(value),
        }
    }

    /// Runs `f` with exclusive access to the guarded value.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut guard)
    }

    /// Consumes the lock and returns the value.
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

impl<T: Default> Default for IrqLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> std::fmt::Debug for IrqLock<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IrqLock").finish_non_exhaustive()
    }
}
