//! Control bytes and the per-group control word.
//!
//! Every slot of a group has one control byte. The high bit distinguishes full slots from empty
//! or deleted ones; a full slot stores the low 7 bits of its key's hash (H2) in the remaining bits.
//! The 8 control bytes of a group are packed into one `u64` (slot `i` in byte `i`, little endian
//! order) so that all slots can be matched at once using word-level bit tricks.
use std::fmt;

/// Number of slots in a group.
pub const GROUP_SLOTS: usize = 8;

const BITSET_LSB: u64 = 0x0101_0101_0101_0101;
const BITSET_MSB: u64 = 0x8080_8080_8080_8080;

/// Control byte of a single slot.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Ctrl(u8);

impl Ctrl {
    /// Slot was never used since the last rehash or clear.
    pub const EMPTY: Ctrl = Ctrl(0b1000_0000);
    /// Tombstone left behind by a removal from a group without empty slots.
    pub const DELETED: Ctrl = Ctrl(0b1111_1110);

    /// Control byte of a full slot whose key has the given H2.
    #[inline(always)]
    pub fn full(h2: u8) -> Ctrl {
        debug_assert!(h2 < 0x80);
        Ctrl(h2)
    }

    /// Returns `true` if the slot holds a live entry.
    #[inline(always)]
    pub fn is_full(self) -> bool {
        self.0 & 0x80 == 0
    }
}

/// Set of slot indices within a group.
///
/// Each slot is represented by the high bit of the corresponding byte, which is what the match
/// operations of [`CtrlGroup`] naturally produce.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SlotMask(u64);

impl SlotMask {
    /// Returns `true` if no slot is contained.
    #[inline(always)]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Index of the lowest contained slot.
    ///
    /// Only meaningful when the mask is non-empty.
    #[inline(always)]
    pub fn first(self) -> usize {
        debug_assert!(!self.is_empty());
        (self.0.trailing_zeros() >> 3) as usize
    }

    /// The mask without its lowest contained slot.
    #[inline(always)]
    pub fn remove_first(self) -> SlotMask {
        SlotMask(self.0 & self.0.wrapping_sub(1))
    }
}

impl Iterator for SlotMask {
    type Item = usize;

    #[inline(always)]
    fn next(&mut self) -> Option<usize> {
        if self.is_empty() {
            return None;
        }
        let index = self.first();
        *self = self.remove_first();
        Some(index)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.0.count_ones() as usize;
        (len, Some(len))
    }
}

impl fmt::Debug for SlotMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(*self).finish()
    }
}

/// The packed control bytes of one group.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CtrlGroup(u64);

impl Default for CtrlGroup {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl CtrlGroup {
    /// A group where every slot is empty.
    pub const EMPTY: CtrlGroup = CtrlGroup(BITSET_LSB * Ctrl::EMPTY.0 as u64);

    /// Control byte of slot `i`.
    #[inline(always)]
    pub fn get(self, i: usize) -> Ctrl {
        debug_assert!(i < GROUP_SLOTS);
        Ctrl((self.0 >> (8 * i)) as u8)
    }

    /// Overwrites the control byte of slot `i`.
    #[inline(always)]
    pub fn set(&mut self, i: usize, ctrl: Ctrl) {
        debug_assert!(i < GROUP_SLOTS);
        let shift = 8 * i;
        self.0 = (self.0 & !(0xff << shift)) | ((ctrl.0 as u64) << shift);
    }

    /// Marks every slot as empty.
    #[inline(always)]
    pub fn set_empty(&mut self) {
        *self = Self::EMPTY;
    }

    /// Slots whose control byte equals `Ctrl::full(h2)`.
    ///
    /// This never misses a matching slot, but it can report a false positive in a full slot
    /// directly following a true match, so callers have to compare keys anyway.
    #[inline(always)]
    pub fn match_h2(self, h2: u8) -> SlotMask {
        let v = self.0 ^ (BITSET_LSB * h2 as u64);
        SlotMask(v.wrapping_sub(BITSET_LSB) & !v & BITSET_MSB)
    }

    /// Slots that are empty (not deleted).
    #[inline(always)]
    pub fn match_empty(self) -> SlotMask {
        // EMPTY and DELETED both have the high bit set, bit 1 is only set for DELETED
        let v = self.0;
        SlotMask(v & !(v << 6) & BITSET_MSB)
    }

    /// Slots holding a tombstone.
    #[inline(always)]
    pub fn match_deleted(self) -> SlotMask {
        let v = self.0;
        SlotMask(v & (v << 6) & BITSET_MSB)
    }

    /// Slots that are empty or deleted.
    #[inline(always)]
    pub fn match_empty_or_deleted(self) -> SlotMask {
        SlotMask(self.0 & BITSET_MSB)
    }

    /// Slots holding a live entry.
    #[inline(always)]
    pub fn match_full(self) -> SlotMask {
        SlotMask(!self.0 & BITSET_MSB)
    }
}

impl fmt::Debug for CtrlGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for i in 0..GROUP_SLOTS {
            match self.get(i) {
                Ctrl::EMPTY => list.entry(&format_args!("empty")),
                Ctrl::DELETED => list.entry(&format_args!("deleted")),
                Ctrl(h2) => list.entry(&format_args!("{h2:#04x}")),
            };
        }
        list.finish()
    }
}
