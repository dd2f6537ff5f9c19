//! Fixed size groups of slots.
use std::borrow::Borrow;

use crate::ctrl::{Ctrl, CtrlGroup, SlotMask, GROUP_SLOTS};

/// A group of [`GROUP_SLOTS`] slots together with their control word.
///
/// The control word is authoritative: a slot holds an entry exactly when its control byte is
/// full. Removing an entry moves it out of the slot, so no stale key or value is retained.
pub struct Group<K, V> {
    ctrls: CtrlGroup,
    slots: [Option<(K, V)>; GROUP_SLOTS],
}

impl<K, V> Default for Group<K, V> {
    fn default() -> Self {
        Self {
            ctrls: CtrlGroup::EMPTY,
            slots: std::array::from_fn(|_| None),
        }
    }
}

impl<K, V> Group<K, V> {
    #[inline(always)]
    pub fn ctrls(&self) -> CtrlGroup {
        self.ctrls
    }

    #[inline(always)]
    pub fn set_ctrl(&mut self, i: usize, ctrl: Ctrl) {
        self.ctrls.set(i, ctrl);
    }

    /// Entry stored in slot `i`, if any.
    #[inline(always)]
    pub fn entry(&self, i: usize) -> Option<(&K, &V)> {
        self.slots[i].as_ref().map(|(key, value)| (key, value))
    }

    /// Index of the slot among `candidates` whose key equals `key`.
    #[inline]
    pub fn find_in<Q>(&self, candidates: SlotMask, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        candidates.into_iter().find(|&i| {
            self.slots[i]
                .as_ref()
                .is_some_and(|(slot_key, _)| slot_key.borrow() == key)
        })
    }

    /// Mutable access to the value in slot `i`, with the key alongside.
    #[inline(always)]
    pub fn entry_mut(&mut self, i: usize) -> Option<(&K, &mut V)> {
        self.slots[i].as_mut().map(|(key, value)| (&*key, value))
    }

    /// Stores an entry into slot `i` and marks the slot as full.
    #[inline(always)]
    pub fn put(&mut self, i: usize, h2: u8, key: K, value: V) {
        debug_assert!(!self.ctrls.get(i).is_full());
        self.slots[i] = Some((key, value));
        self.ctrls.set(i, Ctrl::full(h2));
    }

    /// Moves the entry out of slot `i`.
    ///
    /// The control byte is left untouched, the caller decides between empty and deleted.
    #[inline(always)]
    pub fn take(&mut self, i: usize) -> Option<(K, V)> {
        self.slots[i].take()
    }

    /// Drops all entries and marks all slots as empty.
    pub fn clear(&mut self) {
        for slot in self.ctrls.match_full() {
            self.slots[slot] = None;
        }
        self.ctrls.set_empty();
    }

    /// Moves all entries out of this group, leaving every slot empty.
    pub fn drain(&mut self) -> impl Iterator<Item = (K, V)> + '_ {
        let full = self.ctrls.match_full();
        self.ctrls.set_empty();
        full.filter_map(move |i| self.slots[i].take())
    }

    /// Clones the keys of all full slots, by slot index.
    pub fn snapshot_keys(&self, clone_key: fn(&K) -> K, out: &mut Vec<Option<K>>) {
        let ctrls = self.ctrls;
        out.extend((0..GROUP_SLOTS).map(|i| {
            if ctrls.get(i).is_full() {
                self.slots[i].as_ref().map(|(key, _)| clone_key(key))
            } else {
                None
            }
        }));
    }
}

/// Single-group operations used while a map is small enough to not need a table.
///
/// A single group has no probe sequence, so removal marks slots as empty right away and
/// tombstones never appear.
impl<K, V> Group<K, V> {
    pub fn small_find<Q>(&self, h2: u8, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        self.find_in(self.ctrls.match_h2(h2), key)
    }

    pub fn small_insert(&mut self, h2: u8, key: K, value: V) {
        let empty = self.ctrls.match_empty();
        if empty.is_empty() {
            panic!("small map with no empty slot");
        }
        self.put(empty.first(), h2, key, value);
    }

    pub fn small_remove<Q>(&mut self, h2: u8, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        let i = self.small_find(h2, key)?;
        let entry = self.take(i);
        self.ctrls.set(i, Ctrl::EMPTY);
        entry
    }
}
