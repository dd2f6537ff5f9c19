//! The shared limiter state.
use std::{
    cell::UnsafeCell,
    sync::atomic::{AtomicBool, AtomicI64, Ordering},
};

use rtk_util::fmt::Nanos;

use crate::{bucket::Bucket, lock::SpinLock};

/// Tuning parameters of a [`CpuLimiter`].
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct LimiterConfig {
    /// Bucket capacity contributed by each processor, in nanoseconds.
    pub capacity_per_proc: u64,
    /// Fraction of all CPU time the background collector uses while a cycle is running.
    pub background_utilization: f64,
    /// Minimum time between periodic updates, in nanoseconds.
    pub update_period: i64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            capacity_per_proc: 1_000_000_000,
            background_utilization: 0.25,
            update_period: 10_000_000,
        }
    }
}

/// Snapshot of the limiter state, see [`CpuLimiter::stats`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct LimiterStats {
    /// The bucket of collector CPU time.
    pub bucket: Bucket,
    /// Number of processors the capacity is based on.
    pub nprocs: u32,
    /// Whether a collection cycle is running.
    pub gc_enabled: bool,
    /// Whether the limiter currently asks the collector to back off.
    pub limiting: bool,
}

struct Inner {
    bucket: Bucket,
    gc_enabled: bool,
    /// Total assist time reported by the last update of the current cycle.
    last_total_assist_time: i64,
    nprocs: u32,
}

/// Leaky bucket limiter for the CPU time used by a garbage collector.
///
/// All times are nanoseconds of a monotonic clock. Updates carrying timestamps older than the
/// last update, or assist times lower than previously reported within the same cycle, are
/// ignored.
pub struct CpuLimiter {
    lock: SpinLock,
    /// Mirrors whether the bucket is full, readable without the lock.
    enabled: AtomicBool,
    /// Set from the start to the end of a collector phase transition, during which the lock stays
    /// held.
    transitioning: AtomicBool,
    last_update: AtomicI64,
    config: LimiterConfig,
    inner: UnsafeCell<Inner>,
}

// SAFETY: `inner` is only accessed while holding `lock`, everything else is atomic or immutable.
unsafe impl Sync for CpuLimiter {}

impl CpuLimiter {
    /// Creates a limiter with an empty bucket for `nprocs` processors, treating `now` as the time
    /// of the last update.
    ///
    /// # Panics
    ///
    /// Panics if `nprocs` is zero or the background utilization is not within `0.0..=1.0`.
    pub fn new(config: LimiterConfig, nprocs: u32, now: i64) -> Self {
        assert!(nprocs > 0, "limiter needs at least one processor");
        assert!(
            (0.0..=1.0).contains(&config.background_utilization),
            "background utilization must be between 0 and 1"
        );
        Self {
            lock: SpinLock::new(),
            enabled: AtomicBool::new(false),
            transitioning: AtomicBool::new(false),
            last_update: AtomicI64::new(now),
            config,
            inner: UnsafeCell::new(Inner {
                bucket: Bucket::new(config.capacity_per_proc * nprocs as u64),
                gc_enabled: false,
                last_total_assist_time: 0,
                nprocs,
            }),
        }
    }

    /// Returns the configuration of this limiter.
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Returns whether the collector should currently limit its CPU usage.
    #[inline]
    pub fn limiting(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Returns whether a periodic [`update`][Self::update] is due.
    #[inline]
    pub fn need_update(&self, now: i64) -> bool {
        now - self.last_update.load(Ordering::Relaxed) > self.config.update_period
    }

    /// Accounts the time since the last update.
    ///
    /// `total_assist_time` is the CPU time mutators spent assisting the collector during the
    /// current cycle. The update is dropped if another thread holds the limiter.
    ///
    /// # Panics
    ///
    /// Panics when called during a phase transition by the thread performing it.
    pub fn update(&self, total_assist_time: i64, now: i64) {
        if !self.lock.try_lock() {
            log::trace!("dropped contended limiter update at {}", Nanos(now));
            return;
        }
        assert!(
            !self.transitioning.load(Ordering::Relaxed),
            "update during transition"
        );
        // SAFETY: we acquired the lock above
        let inner = unsafe { self.state() };
        self.update_locked(inner, total_assist_time, now);
        self.lock.unlock();
    }

    /// Starts a phase transition of the collector, enabling or disabling a cycle.
    ///
    /// Must be called while all mutators are stopped. The limiter stays locked until
    /// [`finish_gc_transition`][Self::finish_gc_transition].
    ///
    /// # Panics
    ///
    /// Panics if the limiter is held by anyone else, if the collector already is in the requested
    /// state, or if a cycle is enabled with non-zero assist time.
    pub fn start_gc_transition(&self, enable_gc: bool, total_assist_time: i64, now: i64) {
        if !self.lock.try_lock() {
            panic!("failed to acquire lock to start a GC transition");
        }
        // SAFETY: we acquired the lock above and keep it until the transition finishes
        let inner = unsafe { self.state() };
        if inner.gc_enabled == enable_gc {
            panic!("transitioning GC to the same state as before");
        }
        self.update_locked(inner, total_assist_time, now);
        if enable_gc && total_assist_time != 0 {
            panic!("assist time must be zero on entry to a GC cycle");
        }
        inner.gc_enabled = enable_gc;
        self.transitioning.store(true, Ordering::Release);
    }

    /// Finishes a phase transition, accounting the whole pause as collector time on every
    /// processor.
    ///
    /// # Panics
    ///
    /// Panics if no transition was started.
    pub fn finish_gc_transition(&self, now: i64) {
        if self
            .transitioning
            .compare_exchange(true, false, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            panic!("finish_gc_transition called without starting one");
        }
        // SAFETY: the lock is held since `start_gc_transition` and clearing `transitioning` made
        // this the only call finishing that transition
        let inner = unsafe { self.state() };
        let last_update = self.last_update.load(Ordering::Relaxed);
        if now >= last_update {
            let pause = (now - last_update) * inner.nprocs as i64;
            self.accumulate(inner, 0, pause);
        }
        self.last_update.store(now, Ordering::Relaxed);
        inner.last_total_assist_time = 0;
        self.lock.unlock();
    }

    /// Changes the number of processors, recomputing the bucket capacity.
    ///
    /// # Panics
    ///
    /// Panics if the limiter is held by anyone else, if a collection cycle is running or if
    /// `nprocs` is zero.
    pub fn reset_capacity(&self, now: i64, nprocs: u32) {
        assert!(nprocs > 0, "limiter needs at least one processor");
        if !self.lock.try_lock() {
            panic!("failed to acquire lock to reset capacity");
        }
        // SAFETY: we acquired the lock above
        let inner = unsafe { self.state() };
        assert!(
            !inner.gc_enabled,
            "reset_capacity called while a GC cycle is running"
        );
        self.update_locked(inner, 0, now);
        inner.nprocs = nprocs;
        inner
            .bucket
            .set_capacity(self.config.capacity_per_proc * nprocs as u64);

        let full = inner.bucket.is_full();
        if self.enabled.load(Ordering::Relaxed) != full {
            self.set_enabled(full, &inner.bucket);
        }
        log::debug!(
            "limiter capacity {} for {nprocs} processors",
            Nanos(inner.bucket.capacity as i64)
        );
        self.lock.unlock();
    }

    /// Returns a snapshot of the limiter state, or `None` if the limiter is currently held.
    pub fn stats(&self) -> Option<LimiterStats> {
        if !self.lock.try_lock() {
            return None;
        }
        // SAFETY: we acquired the lock above
        let inner = unsafe { self.state() };
        let stats = LimiterStats {
            bucket: inner.bucket,
            nprocs: inner.nprocs,
            gc_enabled: inner.gc_enabled,
            limiting: self.limiting(),
        };
        self.lock.unlock();
        Some(stats)
    }

    /// Returns the state guarded by the lock.
    ///
    /// # Safety
    ///
    /// The caller must hold the lock and must not call this again while the returned reference is
    /// alive.
    #[allow(clippy::mut_from_ref)]
    unsafe fn state(&self) -> &mut Inner {
        // SAFETY: holding the lock grants exclusive access to `inner`, as documented above
        unsafe { &mut *self.inner.get() }
    }

    fn update_locked(&self, inner: &mut Inner, total_assist_time: i64, now: i64) {
        let last_update = self.last_update.load(Ordering::Relaxed);
        if now < last_update || total_assist_time < inner.last_total_assist_time {
            return;
        }
        let window_total_time = (now - last_update) * inner.nprocs as i64;
        self.last_update.store(now, Ordering::Relaxed);

        if !inner.gc_enabled {
            self.accumulate(inner, window_total_time, 0);
            return;
        }

        let window_gc_time = total_assist_time - inner.last_total_assist_time
            + (window_total_time as f64 * self.config.background_utilization) as i64;
        self.accumulate(inner, window_total_time - window_gc_time, window_gc_time);
        inner.last_total_assist_time = total_assist_time;
    }

    fn accumulate(&self, inner: &mut Inner, mutator_time: i64, gc_time: i64) {
        if let Some(enabled) = inner.bucket.accumulate(mutator_time, gc_time) {
            self.set_enabled(enabled, &inner.bucket);
        }
    }

    fn set_enabled(&self, enabled: bool, bucket: &Bucket) {
        self.enabled.store(enabled, Ordering::Relaxed);
        if enabled {
            log::debug!(
                "GC CPU limiter enabled, {} of collector time over capacity so far",
                Nanos(bucket.overflow as i64)
            );
        } else {
            log::debug!(
                "GC CPU limiter disabled, fill {} of {}",
                Nanos(bucket.fill as i64),
                Nanos(bucket.capacity as i64)
            );
        }
    }
}

impl std::fmt::Debug for CpuLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuLimiter")
            .field("limiting", &self.limiting())
            .field("locked", &self.lock.is_locked())
            .field("transitioning", &self.transitioning.load(Ordering::Relaxed))
            .field("last_update", &Nanos(self.last_update.load(Ordering::Relaxed)))
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
