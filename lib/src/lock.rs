//! Single-core kernel critical-section lock.
//!
//! Ported from `slopos_lib::spinlock::IrqMutex`, trimmed down: the
//! teacher's ticket lock exists for SMP fairness under real multi-CPU
//! contention and pairs every acquisition with an interrupt-disable.
//! Here the only two callers of the kernel lock are the supervisor-call
//! path and the IRQ layer, and the two never run concurrently with each
//! other on a single core — disabling interrupts around the critical
//! section is the board integration's job (the same external-collaborator
//! boundary as the register-frame context switch), not this lock's. What
//! remains is a plain mutual-exclusion lock, backed by `spin::Mutex`.

pub struct KernelLock<T> {
    inner: spin::Mutex<T>,
}

pub struct KernelLockGuard<'a, T> {
    inner: spin::MutexGuard<'a, T>,
}

impl<T> KernelLock<T> {
    pub const fn new(data: T) -> Self {
        KernelLock { inner: spin::Mutex::new(data) }
    }

    pub fn lock(&self) -> KernelLockGuard<'_, T> {
        KernelLockGuard { inner: self.inner.lock() }
    }

    pub fn try_lock(&self) -> Option<KernelLockGuard<'_, T>> {
        self.inner.try_lock().map(|inner| KernelLockGuard { inner })
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

impl<'a, T> core::ops::Deref for KernelLockGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<'a, T> core::ops::DerefMut for KernelLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_guards_exclusive_mutation() {
        let lock = KernelLock::new(0u32);
        {
            let mut guard = lock.lock();
            *guard += 1;
        }
        assert_eq!(*lock.lock(), 1);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let lock = KernelLock::new(0u32);
        let _guard = lock.lock();
        assert!(lock.try_lock().is_none());
    }
}
