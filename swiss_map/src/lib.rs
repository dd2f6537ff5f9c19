//! A hash map combining Swiss table groups with extendible hashing.
//!
//! Entries are stored in open addressing tables made of groups of [`GROUP_SLOTS`] slots. Each
//! group carries a control word with one byte per slot, marking the slot as empty, deleted or full
//! and for full slots holding 7 bits of the entry's hash. Looking for a key compares all control
//! bytes of a group at once and only compares keys for slots whose hash bits match.
//!
//! Instead of a single table that is rehashed as a whole, a [`Map`] keeps a directory indexed by
//! the leading bits of the hash. Each table covers a contiguous range of directory entries and is
//! limited to [`MAX_TABLE_CAPACITY`] slots. Once a table is full it is rebuilt at twice its size or
//! split in two, so the cost of a single insertion stays bounded.
//!
//! Maps with at most [`GROUP_SLOTS`] entries skip the directory and use a single group.
//!
//! Iteration order is randomized. Apart from the borrowing [`Iter`], a [`Cursor`] traverses a map
//! that is modified between its steps, returning every entry present throughout the traversal
//! exactly once.
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod ctrl;
mod error;
mod group;
mod iter;
mod map;
mod probe;
mod table;

pub use ctrl::GROUP_SLOTS;
pub use error::CapacityError;
pub use iter::{Cursor, Iter, Keys, Values};
pub use map::Map;
pub use table::MAX_TABLE_CAPACITY;

#[cfg(test)]
mod test_map;
