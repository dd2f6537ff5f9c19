//! Simulated collection cycles with concurrent mutators feeding a [`CpuLimiter`].
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use color_eyre::eyre::{ensure, Result};
use gc_limiter::{CpuLimiter, LimiterConfig};
use quanta::Instant;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use rtk_util::fmt::Nanos;

const MS: i64 = 1_000_000;
/// Simulated length of a collection cycle.
const CYCLE_TIME: i64 = 4_000 * MS;
/// Simulated time between collection cycles.
const IDLE_TIME: i64 = 2_000 * MS;
/// Simulated length of a stop-the-world pause.
const PAUSE_TIME: i64 = MS;

pub struct SimOptions {
    pub cycles: usize,
    pub procs: u32,
    pub mutators: usize,
    pub gc_percent: u32,
    pub seed: u64,
}

/// State shared between the simulated collector and the mutator threads.
struct Shared<'a> {
    options: &'a SimOptions,
    limiter: CpuLimiter,
    /// Simulated monotonic clock in nanoseconds.
    clock: AtomicI64,
    /// Assist time of the current cycle, summed over all mutators.
    assist: AtomicI64,
    limited_steps: AtomicUsize,
    steps: AtomicUsize,
}

impl Shared<'_> {
    fn pause(&self, enable_gc: bool) {
        let now = self.clock.load(Ordering::Relaxed);
        let total_assist = if enable_gc {
            0
        } else {
            self.assist.load(Ordering::Relaxed)
        };
        self.limiter.start_gc_transition(enable_gc, total_assist, now);
        self.assist.store(0, Ordering::Relaxed);
        let end = self.clock.fetch_add(PAUSE_TIME, Ordering::Relaxed) + PAUSE_TIME;
        self.limiter.finish_gc_transition(end);
    }

    fn run_mutators(&self, duration: i64, assisting: bool) {
        let until = self.clock.load(Ordering::Relaxed) + duration;
        std::thread::scope(|scope| {
            for mutator in 0..self.options.mutators {
                scope.spawn(move || self.mutator(mutator, until, assisting));
            }
        });
    }

    fn mutator(&self, mutator: usize, until: i64, assisting: bool) {
        let mut rng = SmallRng::seed_from_u64(self.options.seed ^ mutator as u64);
        let mutators = self.options.mutators as i64;
        loop {
            // CPU time of this step on this mutator, wall time advances as all mutators run in
            // parallel.
            let step = rng.gen_range(MS / 10..MS);
            let now = self.clock.fetch_add(step / mutators, Ordering::Relaxed) + step / mutators;
            if now > until {
                break;
            }

            let limiting = self.limiter.limiting();
            self.steps.fetch_add(1, Ordering::Relaxed);
            if limiting {
                self.limited_steps.fetch_add(1, Ordering::Relaxed);
            }

            let assist_step = if assisting && !limiting {
                step * self.options.gc_percent as i64 / 100
            } else {
                0
            };
            let total_assist = self.assist.fetch_add(assist_step, Ordering::Relaxed) + assist_step;

            if self.limiter.need_update(now) {
                self.limiter.update(total_assist, now);
            }
        }
    }
}

pub fn run(options: &SimOptions) -> Result<()> {
    let shared = Shared {
        options,
        limiter: CpuLimiter::new(LimiterConfig::default(), options.procs, 0),
        clock: AtomicI64::new(0),
        assist: AtomicI64::new(0),
        limited_steps: AtomicUsize::new(0),
        steps: AtomicUsize::new(0),
    };
    let start = Instant::now();

    for cycle in 0..options.cycles {
        shared.pause(true);
        shared.run_mutators(CYCLE_TIME, true);
        shared.pause(false);
        shared.run_mutators(IDLE_TIME, false);

        let Some(stats) = shared.limiter.stats() else {
            continue;
        };
        ensure!(
            stats.bucket.fill <= stats.bucket.capacity,
            "bucket fill {} exceeds capacity {}",
            stats.bucket.fill,
            stats.bucket.capacity
        );
        log::info!(
            "cycle {cycle}: bucket {} of {}, {} over capacity, limiting {}",
            Nanos(stats.bucket.fill as i64),
            Nanos(stats.bucket.capacity as i64),
            Nanos(stats.bucket.overflow as i64),
            stats.limiting,
        );
    }

    let steps = shared.steps.load(Ordering::Relaxed);
    let limited = shared.limited_steps.load(Ordering::Relaxed);
    log::info!(
        "simulated {} of {} cycles in {}, {limited} of {steps} mutator steps limited",
        Nanos(shared.clock.load(Ordering::Relaxed)),
        options.cycles,
        Nanos(start.elapsed().as_nanos() as i64),
    );
    Ok(())
}
