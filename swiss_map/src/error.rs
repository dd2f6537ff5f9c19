//! Error types.
use std::fmt;

/// Error returned when a map cannot be created with the requested capacity.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CapacityError {
    /// The tables needed for the requested capacity would not fit into the address space.
    Overflow {
        /// The requested capacity.
        capacity: usize,
    },
}

impl fmt::Display for CapacityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapacityError::Overflow { capacity } => {
                write!(f, "capacity overflow: cannot allocate a map for {capacity} entries")
            }
        }
    }
}

impl std::error::Error for CapacityError {}
