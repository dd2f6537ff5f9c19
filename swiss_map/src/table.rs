//! A single open addressing hash table made of groups.
use std::{borrow::Borrow, mem};

use crate::{
    ctrl::{Ctrl, GROUP_SLOTS},
    group::Group,
    probe::ProbeSeq,
};

/// Largest number of slots of a single table. Growing beyond this splits the table in two.
pub const MAX_TABLE_CAPACITY: usize = 1024;

/// Out of every group's 8 slots, at most this many may be in use on average.
pub const MAX_AVG_GROUP_LOAD: usize = 7;

/// Unique identifier of a table or small map group, never reused within a map.
pub type TableId = u64;

/// Upper 57 bits of a hash, used to select groups.
#[inline(always)]
pub fn h1(hash: u64) -> u64 {
    hash >> 7
}

/// Lower 7 bits of a hash, stored in the control byte of a full slot.
#[inline(always)]
pub fn h2(hash: u64) -> u8 {
    (hash & 0x7f) as u8
}

/// Number of insertions into empty slots a freshly created table of `capacity` slots accepts.
///
/// At least one slot always stays empty so that every probe sequence terminates.
pub fn growth_budget(capacity: usize) -> usize {
    if capacity <= GROUP_SLOTS {
        capacity - 1
    } else {
        capacity / GROUP_SLOTS * MAX_AVG_GROUP_LOAD
    }
}

/// How a table whose growth budget is used up gets replaced.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Growth {
    /// Rebuild into a table with the given capacity within the same directory span.
    Resize(usize),
    /// Partition into two tables using one more bit of the hash.
    Split,
}

pub struct Table<K, V> {
    id: TableId,
    /// Number of full slots.
    used: usize,
    capacity: usize,
    growth_left: usize,
    /// Number of leading hash bits shared by all keys of this table.
    local_depth: u8,
    /// First directory index referencing this table.
    index: usize,
    groups: Box<[Group<K, V>]>,
}

impl<K, V> Table<K, V> {
    pub fn new(id: TableId, capacity: usize, index: usize, local_depth: u8) -> Self {
        let capacity = capacity.max(GROUP_SLOTS).next_power_of_two();
        assert!(
            capacity <= MAX_TABLE_CAPACITY,
            "initial table capacity too large"
        );
        Self {
            id,
            used: 0,
            capacity,
            growth_left: growth_budget(capacity),
            local_depth,
            index,
            groups: (0..capacity / GROUP_SLOTS)
                .map(|_| Group::default())
                .collect(),
        }
    }

    /// Smallest capacity that holds `entries` without growing, capped at [`MAX_TABLE_CAPACITY`].
    pub fn capacity_for(entries: usize) -> usize {
        let mut capacity = GROUP_SLOTS;
        while capacity < MAX_TABLE_CAPACITY && growth_budget(capacity) < entries {
            capacity *= 2;
        }
        capacity
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn local_depth(&self) -> u8 {
        self.local_depth
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn set_index(&mut self, index: usize) {
        self.index = index;
    }

    #[inline(always)]
    fn probe(&self, hash: u64) -> std::iter::Take<ProbeSeq> {
        let groups = self.groups.len();
        ProbeSeq::new(h1(hash), groups - 1).take(groups)
    }

    /// Group and slot of the entry with the given key.
    fn locate<Q>(&self, hash: u64, key: &Q) -> Option<(usize, usize)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        let h2 = h2(hash);
        for offset in self.probe(hash) {
            let group = &self.groups[offset];
            let ctrls = group.ctrls();
            if let Some(slot) = group.find_in(ctrls.match_h2(h2), key) {
                return Some((offset, slot));
            }
            if !ctrls.match_empty().is_empty() {
                return None;
            }
        }
        panic!("probe sequence exhausted without finding an empty slot");
    }

    pub fn find<Q>(&self, hash: u64, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        let (offset, slot) = self.locate(hash, key)?;
        self.groups[offset].entry(slot)
    }

    pub fn find_mut<Q>(&mut self, hash: u64, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        let (offset, slot) = self.locate(hash, key)?;
        self.groups[offset].entry_mut(slot).map(|(_, value)| value)
    }

    /// Inserts or updates an entry, returning the previous value of an existing entry.
    ///
    /// When the key is new and the growth budget is used up, the entry is handed back and the table
    /// is left unchanged; the caller has to replace the table according to [`Self::growth`] and
    /// retry.
    pub fn insert(&mut self, hash: u64, key: K, value: V) -> Result<Option<V>, (K, V)>
    where
        K: Eq,
    {
        let h2 = h2(hash);
        let mut first_deleted = None;

        for offset in self.probe(hash) {
            let ctrls = self.groups[offset].ctrls();

            if let Some(slot) = self.groups[offset].find_in(ctrls.match_h2(h2), &key) {
                if let Some((_, current)) = self.groups[offset].entry_mut(slot) {
                    return Ok(Some(mem::replace(current, value)));
                }
            }

            let empty = ctrls.match_empty();
            if !empty.is_empty() {
                // End of the probe sequence. Reusing a tombstone does not consume growth budget.
                let (offset, slot) = match first_deleted {
                    Some(position) => position,
                    None if self.growth_left == 0 => return Err((key, value)),
                    None => {
                        self.growth_left -= 1;
                        (offset, empty.first())
                    }
                };
                self.groups[offset].put(slot, h2, key, value);
                self.used += 1;
                return Ok(None);
            }

            if first_deleted.is_none() {
                let deleted = ctrls.match_deleted();
                if !deleted.is_empty() {
                    first_deleted = Some((offset, deleted.first()));
                }
            }
        }
        panic!("probe sequence exhausted without finding an empty slot");
    }

    /// Inserts an entry known to be absent into a table without tombstones.
    pub fn insert_unique(&mut self, hash: u64, key: K, value: V) {
        debug_assert!(self.growth_left > 0);
        for offset in self.probe(hash) {
            let free = self.groups[offset].ctrls().match_empty_or_deleted();
            if !free.is_empty() {
                self.groups[offset].put(free.first(), h2(hash), key, value);
                self.growth_left -= 1;
                self.used += 1;
                return;
            }
        }
        panic!("no free slot left for a unique insertion");
    }

    pub fn remove<Q>(&mut self, hash: u64, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        let (offset, slot) = self.locate(hash, key)?;
        let group = &mut self.groups[offset];
        let entry = group.take(slot);

        // A group with an empty slot ends every probe sequence passing through it, so no later
        // entry can depend on this slot staying occupied.
        if group.ctrls().match_empty().is_empty() {
            group.set_ctrl(slot, Ctrl::DELETED);
        } else {
            group.set_ctrl(slot, Ctrl::EMPTY);
            self.growth_left += 1;
        }
        self.used -= 1;
        entry
    }

    pub fn clear(&mut self) {
        for group in self.groups.iter_mut() {
            group.clear();
        }
        self.used = 0;
        self.growth_left = growth_budget(self.capacity);
    }

    /// Moves all entries out, leaving an empty table behind.
    pub fn drain(&mut self) -> impl Iterator<Item = (K, V)> + '_ {
        self.used = 0;
        self.growth_left = growth_budget(self.capacity);
        self.groups.iter_mut().flat_map(|group| group.drain())
    }

    /// Replacement strategy once the growth budget is exhausted.
    ///
    /// A table that is mostly tombstones is rebuilt at its current size, otherwise it doubles until
    /// reaching [`MAX_TABLE_CAPACITY`] and splits after that.
    pub fn growth(&self) -> Growth {
        if self.used < growth_budget(self.capacity) / 2 {
            Growth::Resize(self.capacity)
        } else if self.capacity * 2 <= MAX_TABLE_CAPACITY {
            Growth::Resize(self.capacity * 2)
        } else {
            Growth::Split
        }
    }

    /// Entry at flat slot position `position` (group-major), if that slot is full.
    pub fn entry_at(&self, position: usize) -> Option<(&K, &V)> {
        let group = &self.groups[position / GROUP_SLOTS];
        let slot = position % GROUP_SLOTS;
        if group.ctrls().get(slot).is_full() {
            group.entry(slot)
        } else {
            None
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        self.groups.iter().flat_map(|group| {
            group
                .ctrls()
                .match_full()
                .filter_map(move |slot| group.entry(slot))
        })
    }

    /// Clones all keys, indexed by flat slot position.
    pub fn snapshot_keys(&self, clone_key: fn(&K) -> K) -> Box<[Option<K>]> {
        let mut keys = Vec::with_capacity(self.capacity);
        for group in self.groups.iter() {
            group.snapshot_keys(clone_key, &mut keys);
        }
        keys.into_boxed_slice()
    }

    pub fn tombstones(&self) -> usize {
        self.groups
            .iter()
            .map(|group| group.ctrls().match_deleted().count())
            .sum()
    }

    /// Panics if the bookkeeping of this table is inconsistent with its contents.
    #[cfg(test)]
    pub fn check(&self, hash_of: impl Fn(&K) -> u64)
    where
        K: Eq,
    {
        let mut full = 0;
        let mut empty = 0;
        for group in self.groups.iter() {
            let ctrls = group.ctrls();
            full += ctrls.match_full().count();
            empty += ctrls.match_empty().count();
            for slot in ctrls.match_full() {
                let (key, _) = group.entry(slot).expect("full slot without entry");
                let hash = hash_of(key);
                assert_eq!(ctrls.get(slot), Ctrl::full(h2(hash)));
                let (found, _) = self.find(hash, key).expect("entry not reachable by probing");
                assert!(std::ptr::eq(found, key));
            }
            for slot in ctrls.match_empty_or_deleted() {
                assert!(group.entry(slot).is_none());
            }
        }
        assert_eq!(full, self.used);
        assert!(empty > 0);
        assert_eq!(
            self.growth_left + full + self.tombstones(),
            growth_budget(self.capacity)
        );
    }
}
