//! Extendible hashing over a directory of tables.
use std::{
    borrow::Borrow,
    fmt,
    hash::{BuildHasher, BuildHasherDefault, Hash},
    mem,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, OnceLock, PoisonError, Weak,
    },
};

use hashbrown::HashMap;
use rtk_util::hash::SeededState;
use zwohash::ZwoHasher;

use crate::{
    ctrl::GROUP_SLOTS,
    error::CapacityError,
    group::Group,
    iter::{Cursor, Iter, Keys, Values},
    table::{h2, Growth, Table, TableId, MAX_AVG_GROUP_LOAD, MAX_TABLE_CAPACITY},
};

/// Keys of a replaced table or small map group, indexed by slot position.
pub(crate) type Snapshot<K> = Box<[Option<K>]>;

/// Published by a cursor that is not positioned on any table.
pub(crate) const NOT_VISITING: TableId = TableId::MAX;

/// The table each live cursor of a map is positioned on.
///
/// Every cursor owns the strong reference to its entry, so entries of dropped or finished cursors
/// become dangling and are pruned.
pub(crate) type CursorPositions = Mutex<Vec<Weak<AtomicU64>>>;

pub(crate) enum Storage<K, V> {
    /// At most [`GROUP_SLOTS`] entries in a single group, no directory.
    Small { id: TableId, group: Box<Group<K, V>> },
    Directory(Directory<K, V>),
}

/// Directory of `1 << global_depth` entries referring to tables.
///
/// Tables live in an arena and directory entries store arena slots. A table of local depth `d`
/// is referenced by the `1 << (global_depth - d)` contiguous entries starting at its index.
pub(crate) struct Directory<K, V> {
    pub(crate) global_depth: u8,
    pub(crate) entries: Vec<usize>,
    pub(crate) tables: Vec<Table<K, V>>,
}

impl<K, V> Directory<K, V> {
    /// Directory index selected by the leading `global_depth` bits of `hash`.
    #[inline(always)]
    pub(crate) fn index(&self, hash: u64) -> usize {
        if self.global_depth == 0 {
            0
        } else {
            (hash >> (64 - self.global_depth as u32)) as usize
        }
    }

    #[inline(always)]
    fn slot(&self, hash: u64) -> usize {
        self.entries[self.index(hash)]
    }

    #[inline(always)]
    fn table(&self, hash: u64) -> &Table<K, V> {
        &self.tables[self.slot(hash)]
    }

    #[inline(always)]
    fn table_mut(&mut self, hash: u64) -> &mut Table<K, V> {
        let slot = self.slot(hash);
        &mut self.tables[slot]
    }

    /// Doubles the directory so that every entry is duplicated in place.
    fn double(&mut self) {
        self.entries = self.entries.iter().flat_map(|&slot| [slot, slot]).collect();
        for table in self.tables.iter_mut() {
            table.set_index(table.index() * 2);
        }
        self.global_depth += 1;
        log::debug!(
            "doubled directory to {} entries (global depth {})",
            self.entries.len(),
            self.global_depth
        );
    }

    /// Replaces the table in `slot` by the two halves of a split.
    ///
    /// The left half takes over the arena slot and the first half of the old directory span, the
    /// right half is appended to the arena and referenced by the second half.
    fn install_split(&mut self, slot: usize, mut left: Table<K, V>, mut right: Table<K, V>) {
        if self.tables[slot].local_depth() == self.global_depth {
            self.double();
        }
        let index = self.tables[slot].index();
        let span = 1usize << (self.global_depth - left.local_depth());

        left.set_index(index);
        right.set_index(index + span);

        let right_slot = self.tables.len();
        self.tables[slot] = left;
        self.tables.push(right);
        self.entries[index + span..index + 2 * span].fill(right_slot);
    }
}

/// A hash map using Swiss table groups with extendible hashing.
///
/// Entries live in tables of at most [`MAX_TABLE_CAPACITY`] slots. A table that runs out of
/// space is rebuilt in isolation, doubling in size or splitting in two once it is at the maximal
/// size, so an insertion never needs to move more than a single table's entries. Maps with up to
/// [`GROUP_SLOTS`] entries use a single group without any directory.
///
/// Besides the borrowing [`iter`][Self::iter], a map hands out [`Cursor`]s, which iterate while
/// the map is being modified.
pub struct Map<K, V, S = SeededState> {
    pub(crate) used: usize,
    hash_builder: S,
    pub(crate) storage: Storage<K, V>,
    /// Incremented by every [`clear`][Self::clear], ends all ongoing iterations.
    pub(crate) clear_seq: u64,
    next_table_id: TableId,
    /// Snapshots of replaced tables that a live cursor is still positioned on.
    pub(crate) retired: HashMap<TableId, Snapshot<K>, BuildHasherDefault<ZwoHasher>>,
    pub(crate) cursors: Arc<CursorPositions>,
    clone_key: OnceLock<fn(&K) -> K>,
}

impl<K, V> Map<K, V> {
    /// Creates an empty map using a randomly seeded hasher.
    pub fn new() -> Self {
        Self::with_hasher(SeededState::new())
    }

    /// Creates an empty map presized for `capacity` entries.
    ///
    /// The capacity is a sizing hint. Entries are spread over tables by their hashes, so an uneven
    /// spread can still make individual tables grow before `capacity` entries are inserted.
    ///
    /// # Panics
    ///
    /// Panics if the required directory size overflows `usize`.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, SeededState::new())
    }
}

impl<K, V, S: Default> Default for Map<K, V, S> {
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K, V, S> Map<K, V, S> {
    /// Creates an empty map using the given hasher.
    pub fn with_hasher(hash_builder: S) -> Self {
        Self {
            used: 0,
            hash_builder,
            storage: Storage::Small {
                id: 0,
                group: Box::default(),
            },
            clear_seq: 0,
            next_table_id: 1,
            retired: Default::default(),
            cursors: Default::default(),
            clone_key: OnceLock::new(),
        }
    }

    /// Creates an empty map presized for `capacity` entries, using the given hasher.
    ///
    /// See [`with_capacity`][Map::with_capacity] for what presizing guarantees.
    ///
    /// # Panics
    ///
    /// Panics if the required directory size overflows `usize`.
    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> Self {
        match Self::try_with_capacity_and_hasher(capacity, hash_builder) {
            Ok(map) => map,
            Err(err) => panic!("{err}"),
        }
    }

    /// Creates an empty map presized for `capacity` entries, reporting sizes that cannot be
    /// allocated.
    ///
    /// Large capacities are spread over a directory of tables of equal size, each of which can
    /// take its even share of `capacity` within its growth budget.
    pub fn try_with_capacity_and_hasher(
        capacity: usize,
        hash_builder: S,
    ) -> Result<Self, CapacityError> {
        let mut map = Self::with_hasher(hash_builder);
        if capacity <= GROUP_SLOTS {
            return Ok(map);
        }

        let overflow = CapacityError::Overflow { capacity };
        let slots = capacity.checked_mul(GROUP_SLOTS).ok_or(overflow)? / MAX_AVG_GROUP_LOAD;
        let directory_len = slots
            .div_ceil(MAX_TABLE_CAPACITY)
            .checked_next_power_of_two()
            .ok_or(overflow)?;
        let global_depth = directory_len.trailing_zeros() as u8;
        let table_capacity = Table::<K, V>::capacity_for(capacity.div_ceil(directory_len));

        let group_bytes = mem::size_of::<Group<K, V>>();
        let total_bytes = directory_len
            .checked_mul(table_capacity / GROUP_SLOTS)
            .and_then(|groups| groups.checked_mul(group_bytes));
        if total_bytes.map_or(true, |bytes| bytes > isize::MAX as usize) {
            return Err(overflow);
        }

        let tables = (0..directory_len)
            .map(|index| Table::new(map.fresh_table_id(), table_capacity, index, global_depth))
            .collect();

        map.storage = Storage::Directory(Directory {
            global_depth,
            entries: (0..directory_len).collect(),
            tables,
        });
        Ok(map)
    }

    fn fresh_table_id(&mut self) -> TableId {
        let id = self.next_table_id;
        self.next_table_id += 1;
        id
    }

    /// Returns the number of entries in the map.
    pub fn len(&self) -> usize {
        self.used
    }

    /// Returns `true` if the map contains no entries.
    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Returns a reference to the map's hasher.
    pub fn hasher(&self) -> &S {
        &self.hash_builder
    }

    /// Returns the number of directory entries, or `0` while the map uses a single group.
    pub fn directory_len(&self) -> usize {
        match &self.storage {
            Storage::Small { .. } => 0,
            Storage::Directory(dir) => dir.entries.len(),
        }
    }

    /// Returns the number of leading hash bits used to index the directory.
    pub fn global_depth(&self) -> u8 {
        match &self.storage {
            Storage::Small { .. } => 0,
            Storage::Directory(dir) => dir.global_depth,
        }
    }

    /// Returns the number of distinct tables, or `0` while the map uses a single group.
    pub fn table_count(&self) -> usize {
        match &self.storage {
            Storage::Small { .. } => 0,
            Storage::Directory(dir) => dir.tables.len(),
        }
    }

    /// Returns the number of times this map was cleared.
    pub fn clear_seq(&self) -> u64 {
        self.clear_seq
    }

    /// Removes all entries.
    ///
    /// Tables keep their capacity. Iterators and cursors observe a cleared map as exhausted.
    pub fn clear(&mut self) {
        match &mut self.storage {
            Storage::Small { group, .. } => group.clear(),
            Storage::Directory(dir) => {
                // Entries referring to the same table are contiguous.
                let mut last = None;
                for &slot in dir.entries.iter() {
                    if last != Some(slot) {
                        dir.tables[slot].clear();
                        last = Some(slot);
                    }
                }
            }
        }
        self.used = 0;
        self.clear_seq += 1;
        self.retired.clear();

        // Cursors end at their next step, none of them looks at a table anymore.
        let cursors = self.cursors.lock().unwrap_or_else(PoisonError::into_inner);
        for position in cursors.iter().filter_map(Weak::upgrade) {
            position.store(NOT_VISITING, Ordering::Relaxed);
        }
    }

    /// Returns the ids of the tables live cursors are positioned on, forgetting finished cursors.
    fn visited_tables(&self) -> Vec<TableId> {
        let mut cursors = self.cursors.lock().unwrap_or_else(PoisonError::into_inner);
        let mut visited = vec![];
        cursors.retain(|position| match position.upgrade() {
            Some(position) => {
                let id = position.load(Ordering::Relaxed);
                if id != NOT_VISITING {
                    visited.push(id);
                }
                true
            }
            None => false,
        });
        visited
    }

    /// Records the keys of the small map group or of the table in arena slot `slot`, which is
    /// about to be replaced, if a cursor is positioned on it.
    ///
    /// Snapshots that no cursor is positioned on anymore are dropped.
    fn retire(&mut self, slot: usize) {
        let visited = self.visited_tables();
        self.retired.retain(|id, _| visited.contains(id));

        let id = match &self.storage {
            Storage::Small { id, .. } => *id,
            Storage::Directory(dir) => dir.tables[slot].id(),
        };
        if !visited.contains(&id) {
            return;
        }
        let Some(&clone_key) = self.clone_key.get() else {
            return;
        };
        let snapshot = match &self.storage {
            Storage::Small { group, .. } => {
                let mut keys = Vec::with_capacity(GROUP_SLOTS);
                group.snapshot_keys(clone_key, &mut keys);
                keys.into_boxed_slice()
            }
            Storage::Directory(dir) => dir.tables[slot].snapshot_keys(clone_key),
        };
        log::trace!("kept key snapshot of table {id} for a cursor");
        self.retired.insert(id, snapshot);
    }

    /// Returns an iterator over all entries in unspecified order.
    ///
    /// Every call starts at a random position.
    pub fn iter(&self) -> Iter<'_, K, V, S> {
        Iter::new(self)
    }

    /// Returns an iterator over all keys in unspecified order.
    pub fn keys(&self) -> Keys<'_, K, V, S> {
        Keys { inner: self.iter() }
    }

    /// Returns an iterator over all values in unspecified order.
    pub fn values(&self) -> Values<'_, K, V, S> {
        Values { inner: self.iter() }
    }

    /// Returns a cursor over the entries of this map that tolerates modification of the map
    /// between steps.
    ///
    /// Entries present for the whole traversal are returned exactly once. Entries inserted or
    /// removed during the traversal may or may not be returned. Clearing the map ends the
    /// traversal.
    pub fn cursor(&self) -> Cursor
    where
        K: Clone,
    {
        self.clone_key.get_or_init(|| K::clone as fn(&K) -> K);
        let cursor = Cursor::new(self, Arc::downgrade(&self.cursors));
        if let Some(position) = cursor.position() {
            let mut cursors = self.cursors.lock().unwrap_or_else(PoisonError::into_inner);
            cursors.push(Arc::downgrade(position));
        }
        cursor
    }
}

impl<K, V, S> Map<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    #[inline(always)]
    fn hash<Q: ?Sized + Hash>(&self, key: &Q) -> u64 {
        self.hash_builder.hash_one(key)
    }

    /// Returns the key-value pair corresponding to the key.
    pub fn get_key_value<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        if self.used == 0 {
            return None;
        }
        let hash = self.hash(key);
        match &self.storage {
            Storage::Small { group, .. } => group
                .small_find(h2(hash), key)
                .and_then(|slot| group.entry(slot)),
            Storage::Directory(dir) => dir.table(hash).find(hash, key),
        }
    }

    /// Returns a reference to the value corresponding to the key.
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.get_key_value(key).map(|(_, value)| value)
    }

    /// Returns a mutable reference to the value corresponding to the key.
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        if self.used == 0 {
            return None;
        }
        let hash = self.hash(key);
        match &mut self.storage {
            Storage::Small { group, .. } => {
                let slot = group.small_find(h2(hash), key)?;
                group.entry_mut(slot).map(|(_, value)| value)
            }
            Storage::Directory(dir) => dir.table_mut(hash).find_mut(hash, key),
        }
    }

    /// Returns `true` if the map contains the key.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.get_key_value(key).is_some()
    }

    /// Inserts a key-value pair, returning the previous value if the key was present.
    ///
    /// An existing key is kept, only its value is replaced.
    pub fn insert(&mut self, mut key: K, mut value: V) -> Option<V> {
        let hash = self.hash(&key);

        if let Storage::Small { group, .. } = &mut self.storage {
            let h2 = h2(hash);
            if let Some(slot) = group.small_find(h2, &key) {
                return group
                    .entry_mut(slot)
                    .map(|(_, current)| mem::replace(current, value));
            }
            if self.used < GROUP_SLOTS {
                group.small_insert(h2, key, value);
                self.used += 1;
                return None;
            }
            self.grow_to_table();
        }

        loop {
            let Storage::Directory(dir) = &mut self.storage else {
                unreachable!("small map storage after growing into a table");
            };
            let slot = dir.slot(hash);
            match dir.tables[slot].insert(hash, key, value) {
                Ok(old) => {
                    if old.is_none() {
                        self.used += 1;
                    }
                    return old;
                }
                Err((k, v)) => {
                    key = k;
                    value = v;
                    self.rehash(slot);
                }
            }
        }
    }

    /// Removes a key, returning its value if it was present.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.remove_entry(key).map(|(_, value)| value)
    }

    /// Removes a key, returning the stored key and value if it was present.
    pub fn remove_entry<Q>(&mut self, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        if self.used == 0 {
            return None;
        }
        let hash = self.hash(key);
        let entry = match &mut self.storage {
            Storage::Small { group, .. } => group.small_remove(h2(hash), key),
            Storage::Directory(dir) => dir.table_mut(hash).remove(hash, key),
        };
        if entry.is_some() {
            self.used -= 1;
        }
        entry
    }

    /// Moves the entries of the full small map group into a table of twice the group's size.
    fn grow_to_table(&mut self) {
        self.retire(0);
        let id = self.fresh_table_id();
        let Map {
            storage,
            hash_builder,
            ..
        } = self;
        let Storage::Small { group, .. } = &mut *storage else {
            return;
        };

        let mut table = Table::new(id, 2 * GROUP_SLOTS, 0, 0);
        for (key, value) in group.drain() {
            table.insert_unique(hash_builder.hash_one(&key), key, value);
        }
        log::trace!("moved small map into table {id}");

        *storage = Storage::Directory(Directory {
            global_depth: 0,
            entries: vec![0],
            tables: vec![table],
        });
    }

    /// Replaces the table in arena slot `slot`, which ran out of growth budget.
    fn rehash(&mut self, slot: usize) {
        self.retire(slot);
        let left_id = self.fresh_table_id();
        let Map {
            storage,
            hash_builder,
            next_table_id,
            ..
        } = self;
        let Storage::Directory(dir) = storage else {
            unreachable!("rehashing a small map");
        };

        let old = &mut dir.tables[slot];
        match old.growth() {
            Growth::Resize(capacity) => {
                let mut table = Table::new(left_id, capacity, old.index(), old.local_depth());
                let (old_capacity, tombstones) = (old.capacity(), old.tombstones());
                for (key, value) in old.drain() {
                    table.insert_unique(hash_builder.hash_one(&key), key, value);
                }
                log::trace!(
                    "rebuilt table {} of {} entries from {} to {} slots, dropping {} tombstones",
                    old.id(),
                    table.used(),
                    old_capacity,
                    capacity,
                    tombstones,
                );
                *old = table;
            }
            Growth::Split => {
                let local_depth = old.local_depth() + 1;
                assert!(
                    local_depth <= 64,
                    "cannot split a table past the 64 bits of the hash"
                );
                let right_id = *next_table_id;
                *next_table_id += 1;

                let mask = 1u64 << (64 - local_depth as u32);
                let mut left = Table::new(left_id, MAX_TABLE_CAPACITY, 0, local_depth);
                let mut right = Table::new(right_id, MAX_TABLE_CAPACITY, 0, local_depth);
                for (key, value) in old.drain() {
                    let hash = hash_builder.hash_one(&key);
                    if hash & mask == 0 {
                        left.insert_unique(hash, key, value);
                    } else {
                        right.insert_unique(hash, key, value);
                    }
                }
                log::debug!(
                    "split table {} at depth {}: {} + {} entries",
                    old.id(),
                    local_depth,
                    left.used(),
                    right.used(),
                );
                dir.install_split(slot, left, right);
            }
        }
    }

    /// Panics if the directory or any table is inconsistent.
    #[cfg(test)]
    pub(crate) fn check(&self) {
        match &self.storage {
            Storage::Small { group, .. } => {
                let ctrls = group.ctrls();
                assert_eq!(ctrls.match_full().count(), self.used);
                assert!(ctrls.match_deleted().is_empty());
                for slot in ctrls.match_full() {
                    let (key, _) = group.entry(slot).expect("full slot without entry");
                    assert_eq!(group.small_find(h2(self.hash(key)), key), Some(slot));
                }
            }
            Storage::Directory(dir) => {
                assert_eq!(dir.entries.len(), 1 << dir.global_depth);
                let mut total = 0;
                for (slot, table) in dir.tables.iter().enumerate() {
                    assert!(table.local_depth() <= dir.global_depth);
                    let span = 1usize << (dir.global_depth - table.local_depth());
                    let range = table.index()..table.index() + span;
                    assert_eq!(table.index() % span, 0);
                    for (index, &entry) in dir.entries.iter().enumerate() {
                        assert_eq!(entry == slot, range.contains(&index));
                    }
                    table.check(|key| self.hash(key));
                    for (key, _) in table.entries() {
                        assert_eq!(dir.slot(self.hash(key)), slot);
                    }
                    total += table.used();
                }
                assert_eq!(total, self.used);
            }
        }
    }
}

impl<K, V, S> fmt::Debug for Map<K, V, S>
where
    K: Hash + Eq + fmt::Debug,
    V: fmt::Debug,
    S: BuildHasher,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V, S> Extend<(K, V)> for Map<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    fn extend<T: IntoIterator<Item = (K, V)>>(&mut self, iter: T) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

impl<K, V, S> FromIterator<(K, V)> for Map<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher + Default,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut map = Self::default();
        map.extend(iter);
        map
    }
}

impl<'a, K, V, S> IntoIterator for &'a Map<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V, S>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
