//! Non-blocking lock.
use std::sync::atomic::{AtomicU32, Ordering};

/// A lock that is only ever tried, never waited for.
///
/// Callers that cannot tolerate failing to acquire it treat failure as a fatal error instead of
/// spinning.
#[derive(Default, Debug)]
pub struct SpinLock {
    state: AtomicU32,
}

impl SpinLock {
    /// Creates an unlocked lock.
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(0),
        }
    }

    /// Acquires the lock if it is not held, returning whether it was acquired.
    #[inline]
    pub fn try_lock(&self) -> bool {
        self.state
            .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Releases the lock.
    ///
    /// # Panics
    ///
    /// Panics if the lock is not held.
    #[inline]
    pub fn unlock(&self) {
        let old = self.state.swap(0, Ordering::Release);
        if old != 1 {
            panic!("double unlock");
        }
    }

    /// Returns whether the lock is currently held by anyone.
    pub fn is_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::SpinLock;

    #[test]
    fn try_lock_excludes() {
        let lock = SpinLock::new();
        assert!(lock.try_lock());
        assert!(lock.is_locked());
        assert!(!lock.try_lock());
        lock.unlock();
        assert!(!lock.is_locked());
        assert!(lock.try_lock());
    }

    #[test]
    #[should_panic(expected = "double unlock")]
    fn double_unlock() {
        let lock = SpinLock::new();
        assert!(lock.try_lock());
        lock.unlock();
        lock.unlock();
    }

    #[test]
    fn one_winner_among_threads() {
        let lock = SpinLock::new();
        let winners = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8).map(|_| scope.spawn(|| lock.try_lock())).collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .filter(|&won| won)
                .count()
        });
        assert_eq!(winners, 1);
    }
}
