//! Utilities for writing [`std::fmt`] implementations.

use std::fmt::{Debug, Display, Formatter};

/// Formats a nanosecond count with a unit suitable for its magnitude.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Nanos(pub i64);

impl Display for Nanos {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let abs = self.0.unsigned_abs();
        if abs < 1_000 {
            write!(f, "{}ns", self.0)
        } else if abs < 1_000_000 {
            write!(f, "{:.1}us", self.0 as f64 / 1e3)
        } else if abs < 1_000_000_000 {
            write!(f, "{:.1}ms", self.0 as f64 / 1e6)
        } else {
            write!(f, "{:.2}s", self.0 as f64 / 1e9)
        }
    }
}

impl Debug for Nanos {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}
