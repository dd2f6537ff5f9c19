//! The leaky bucket itself, without any synchronization.

/// Bucket of collector CPU time credit, in nanoseconds.
///
/// Invariant: `fill <= capacity`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Bucket {
    /// Current fill level.
    pub fill: u64,
    /// Fill level at which limiting starts.
    pub capacity: u64,
    /// Total collector time that did not fit into the bucket.
    pub overflow: u64,
}

impl Bucket {
    /// Creates an empty bucket.
    pub const fn new(capacity: u64) -> Self {
        Self {
            fill: 0,
            capacity,
            overflow: 0,
        }
    }

    /// Returns whether the bucket is full.
    pub fn is_full(&self) -> bool {
        self.fill == self.capacity
    }

    /// Adds collector time and drains mutator time.
    ///
    /// Returns the new limiting state when it changes: `Some(true)` when the bucket becomes full,
    /// `Some(false)` when a full bucket drains. Collector time in excess of the capacity is added
    /// to [`overflow`][Self::overflow].
    pub fn accumulate(&mut self, mutator_time: i64, gc_time: i64) -> Option<bool> {
        let headroom = self.capacity - self.fill;
        let was_full = headroom == 0;
        let change = gc_time.saturating_sub(mutator_time);

        if change > 0 && headroom <= change as u64 {
            self.overflow = self.overflow.saturating_add(change as u64 - headroom);
            self.fill = self.capacity;
            return (!was_full).then_some(true);
        }

        if change < 0 {
            self.fill = self.fill.saturating_sub(change.unsigned_abs());
        } else {
            self.fill += change as u64;
        }
        (change != 0 && was_full).then_some(false)
    }

    /// Changes the capacity, clamping the fill level.
    pub fn set_capacity(&mut self, capacity: u64) {
        self.capacity = capacity;
        self.fill = self.fill.min(capacity);
    }
}

#[cfg(test)]
mod tests {
    use super::Bucket;
    use rand::prelude::*;

    #[test]
    fn fills_and_drains() {
        let mut bucket = Bucket::new(100);
        assert_eq!(bucket.accumulate(10, 50), None);
        assert_eq!(bucket.fill, 40);
        assert_eq!(bucket.accumulate(0, 60), Some(true));
        assert_eq!(bucket.fill, 100);
        assert_eq!(bucket.overflow, 0);
        assert_eq!(bucket.accumulate(0, 25), None);
        assert_eq!(bucket.overflow, 25);
        assert_eq!(bucket.accumulate(7, 7), None);
        assert!(bucket.is_full());
        assert_eq!(bucket.accumulate(30, 0), Some(false));
        assert_eq!(bucket.fill, 70);
        assert_eq!(bucket.accumulate(500, 0), None);
        assert_eq!(bucket.fill, 0);
    }

    #[test]
    fn set_capacity_clamps() {
        let mut bucket = Bucket::new(100);
        bucket.accumulate(0, 80);
        bucket.set_capacity(50);
        assert_eq!(bucket.fill, 50);
        assert!(bucket.is_full());
        bucket.set_capacity(200);
        assert_eq!(bucket.fill, 50);
    }

    #[test]
    fn stays_within_bounds() {
        let mut rng = rand_pcg::Pcg64::seed_from_u64(11);
        let mut bucket = Bucket::new(1_000_000);
        let mut limiting = false;
        for _ in 0..100_000 {
            let mutator_time = rng.gen_range(0..400_000);
            let gc_time = rng.gen_range(0..500_000);
            let overflow = bucket.overflow;
            if let Some(flag) = bucket.accumulate(mutator_time, gc_time) {
                assert_ne!(flag, limiting);
                limiting = flag;
            }
            assert!(bucket.fill <= bucket.capacity);
            assert_eq!(limiting, bucket.is_full());
            assert!(bucket.overflow >= overflow);
        }
    }

    #[test]
    fn extreme_times_saturate() {
        let mut bucket = Bucket::new(10);
        assert_eq!(bucket.accumulate(i64::MIN, i64::MAX), Some(true));
        assert_eq!(bucket.fill, 10);
        assert_eq!(bucket.accumulate(i64::MAX, i64::MIN), Some(false));
        assert_eq!(bucket.fill, 0);
    }
}
