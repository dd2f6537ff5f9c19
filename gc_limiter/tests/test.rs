#![allow(missing_docs)] // test only
use std::sync::atomic::{AtomicI64, Ordering};

use gc_limiter::{CpuLimiter, LimiterConfig};
use rand::prelude::*;

const MS: i64 = 1_000_000;

#[test]
fn concurrent_updates_keep_bucket_consistent() {
    let limiter = CpuLimiter::new(LimiterConfig::default(), 8, 0);
    let clock = AtomicI64::new(0);
    let assist = AtomicI64::new(0);

    limiter.start_gc_transition(true, 0, 0);
    limiter.finish_gc_transition(0);

    std::thread::scope(|scope| {
        for thread in 0..8u64 {
            let (limiter, clock, assist) = (&limiter, &clock, &assist);
            scope.spawn(move || {
                let mut rng = rand_pcg::Pcg64::seed_from_u64(thread);
                for _ in 0..2000 {
                    let now = clock.fetch_add(rng.gen_range(0..MS), Ordering::Relaxed);
                    let total_assist = assist.fetch_add(rng.gen_range(0..2 * MS), Ordering::Relaxed);
                    if limiter.need_update(now) || rng.gen_bool(0.1) {
                        limiter.update(total_assist, now);
                    }
                    let _ = limiter.limiting();
                    if let Some(stats) = limiter.stats() {
                        assert!(stats.bucket.fill <= stats.bucket.capacity);
                    }
                }
            });
        }
    });

    let stats = limiter.stats().expect("no other users left");
    assert!(stats.bucket.fill <= stats.bucket.capacity);
    assert_eq!(limiter.limiting(), stats.bucket.fill == stats.bucket.capacity);
}

#[test]
fn transitions_between_concurrent_updates() {
    let limiter = CpuLimiter::new(LimiterConfig::default(), 2, 0);
    let mut now = 0;
    let mut rng = rand_pcg::Pcg64::seed_from_u64(3);
    for cycle in 0..50 {
        limiter.start_gc_transition(true, 0, now);
        now += rng.gen_range(0..MS);
        limiter.finish_gc_transition(now);

        let mut assist = 0;
        std::thread::scope(|scope| {
            for _ in 0..2 {
                scope.spawn(|| {
                    for step in 0..10 {
                        limiter.update(step * MS, now + step * MS);
                    }
                });
            }
        });
        for _ in 0..20 {
            now += 10 * MS;
            assist += rng.gen_range(0..20 * MS);
            limiter.update(assist, now);
        }

        limiter.start_gc_transition(false, assist, now);
        now += rng.gen_range(0..MS);
        limiter.finish_gc_transition(now);

        for _ in 0..rng.gen_range(0..40) {
            now += 10 * MS;
            limiter.update(0, now);
        }
        if cycle % 10 == 9 {
            limiter.reset_capacity(now, rng.gen_range(1..16));
        }

        let stats = limiter.stats().expect("no other users left");
        assert!(!stats.gc_enabled);
        assert!(stats.bucket.fill <= stats.bucket.capacity);
        assert_eq!(stats.limiting, stats.bucket.fill == stats.bucket.capacity);
    }
}

#[test]
fn saturated_collector_is_limited() {
    let config = LimiterConfig {
        capacity_per_proc: 100 * MS as u64,
        ..Default::default()
    };
    let limiter = CpuLimiter::new(config, 4, 0);
    limiter.start_gc_transition(true, 0, 0);
    limiter.finish_gc_transition(0);

    // All processors assisting: every window is pure collector time.
    for step in 1..=100 {
        let now = step * 10 * MS;
        limiter.update(4 * now, now);
    }
    assert!(limiter.limiting());
    let stats = limiter.stats().unwrap();
    assert!(stats.bucket.overflow > 0);
    assert_eq!(stats.bucket.fill, stats.bucket.capacity);
    assert!(!limiter.need_update(1000 * MS));
}
