//! A leaky bucket limiting the share of CPU time spent on garbage collection.
//!
//! The [`CpuLimiter`] accounts collector and mutator CPU time in a bucket of fixed capacity per
//! processor. Collector time fills the bucket, mutator time drains it. While the bucket is full,
//! [`CpuLimiter::limiting`] reports `true` and the collector is expected to reduce its work, for
//! example by refusing to let mutators assist.
//!
//! The limiter is shared between threads. Periodic [`updates`][CpuLimiter::update] are best
//! effort and dropped when another thread is updating at the same time. Phase transitions of the
//! collector happen while all mutators are stopped and must never fail to acquire the limiter.
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::undocumented_unsafe_blocks)]
#![warn(missing_docs)]

mod bucket;
mod limiter;
mod lock;

pub use bucket::Bucket;
pub use limiter::{CpuLimiter, LimiterConfig, LimiterStats};
pub use lock::SpinLock;
