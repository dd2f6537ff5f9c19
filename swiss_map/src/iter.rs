//! Iteration in randomized order that survives concurrent growth of the map.
use std::{
    hash::{BuildHasher, Hash},
    iter::FusedIterator,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
};

use crate::{
    ctrl::GROUP_SLOTS,
    map::{CursorPositions, Directory, Map, Storage, NOT_VISITING},
    table::TableId,
};

/// The table a traversal is currently visiting, as it was when the traversal reached it.
#[derive(Clone, Copy, Debug)]
struct TableRef {
    id: TableId,
    /// Arena slot the table occupied.
    slot: usize,
    local_depth: u8,
    capacity: usize,
}

#[derive(Clone, Copy, Debug)]
enum Position {
    /// Visiting the single group of a small map.
    Small { id: TableId },
    /// About to look up the table for the current directory index.
    Seek,
    Table(TableRef),
    Done,
}

/// Position of a traversal, advanced against the current state of the map.
///
/// Directory entries and table slots are visited starting from random offsets. Directory indices
/// are kept relative to the global depth seen last, so that doubling the directory only requires
/// rescaling them. A table that has been replaced since the traversal reached it is finished by
/// walking the key snapshot taken when it was replaced and looking each key up in the live map,
/// so moved entries are neither skipped nor returned twice.
#[derive(Clone, Debug)]
pub(crate) struct IterState {
    clear_seq: u64,
    global_depth: u8,
    dir_offset: usize,
    entry_offset: usize,
    dir_idx: usize,
    entry_idx: usize,
    position: Position,
}

impl IterState {
    pub(crate) fn new<K, V, S>(map: &Map<K, V, S>) -> Self {
        let (position, global_depth) = match &map.storage {
            Storage::Small { id, .. } => (Position::Small { id: *id }, 0),
            Storage::Directory(dir) => (Position::Seek, dir.global_depth),
        };
        Self {
            clear_seq: map.clear_seq,
            global_depth,
            dir_offset: rand::random(),
            entry_offset: rand::random(),
            dir_idx: 0,
            entry_idx: 0,
            position,
        }
    }

    /// Id of the table the traversal is positioned on, or `None` once it is done.
    ///
    /// Between two table visits this is [`NOT_VISITING`]. Only a table reported here can be
    /// looked up in the retired snapshots of the map.
    fn visiting(&self) -> Option<TableId> {
        match self.position {
            Position::Small { id } => Some(id),
            Position::Table(table_ref) => Some(table_ref.id),
            Position::Seek => Some(NOT_VISITING),
            Position::Done => None,
        }
    }

    /// Rescales directory indices after the directory was doubled.
    fn sync_depth<K, V>(&mut self, dir: &Directory<K, V>) {
        if self.global_depth != dir.global_depth {
            let orders = dir.global_depth - self.global_depth;
            self.dir_idx <<= orders;
            self.dir_offset <<= orders;
            self.global_depth = dir.global_depth;
        }
    }

    pub(crate) fn advance<'m, K, V, S>(&mut self, map: &'m Map<K, V, S>) -> Option<(&'m K, &'m V)>
    where
        K: Hash + Eq,
        S: BuildHasher,
    {
        if self.clear_seq != map.clear_seq {
            self.position = Position::Done;
        }

        loop {
            match self.position {
                Position::Done => return None,
                Position::Small { id } => {
                    if self.entry_idx == GROUP_SLOTS {
                        self.position = Position::Done;
                        continue;
                    }
                    let slot = self.entry_idx.wrapping_add(self.entry_offset) % GROUP_SLOTS;
                    self.entry_idx += 1;

                    let entry = match &map.storage {
                        Storage::Small { id: live, group } if *live == id => group.entry(slot),
                        _ => relookup(map, id, slot),
                    };
                    if entry.is_some() {
                        return entry;
                    }
                }
                Position::Seek => {
                    let Storage::Directory(dir) = &map.storage else {
                        self.position = Position::Done;
                        continue;
                    };
                    self.sync_depth(dir);
                    if self.dir_idx >= dir.entries.len() {
                        self.position = Position::Done;
                        continue;
                    }

                    let index = self.dir_idx.wrapping_add(self.dir_offset) & (dir.entries.len() - 1);
                    let slot = dir.entries[index];
                    let table = &dir.tables[slot];
                    if table.index() != index {
                        // The random start landed inside the span of a table, move the start
                        // back to the beginning of that span.
                        self.dir_offset = self.dir_offset.wrapping_sub(index - table.index());
                    }
                    self.position = Position::Table(TableRef {
                        id: table.id(),
                        slot,
                        local_depth: table.local_depth(),
                        capacity: table.capacity(),
                    });
                    self.entry_idx = 0;
                }
                Position::Table(table_ref) => {
                    let Storage::Directory(dir) = &map.storage else {
                        self.position = Position::Done;
                        continue;
                    };
                    self.sync_depth(dir);
                    if self.entry_idx == table_ref.capacity {
                        self.dir_idx += 1 << (dir.global_depth - table_ref.local_depth);
                        self.position = Position::Seek;
                        continue;
                    }
                    let position =
                        self.entry_idx.wrapping_add(self.entry_offset) & (table_ref.capacity - 1);
                    self.entry_idx += 1;

                    let entry = match dir.tables.get(table_ref.slot) {
                        Some(table) if table.id() == table_ref.id => table.entry_at(position),
                        _ => relookup(map, table_ref.id, position),
                    };
                    if entry.is_some() {
                        return entry;
                    }
                }
            }
        }
    }
}

/// Looks up the key that was at `position` of the replaced table `id` in the live map.
///
/// Entries removed since are skipped, entries updated since are returned with their current
/// value.
fn relookup<K, V, S>(map: &Map<K, V, S>, id: TableId, position: usize) -> Option<(&K, &V)>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    let Some(snapshot) = map.retired.get(&id) else {
        panic!("table {id} was replaced without keeping a snapshot for its cursors");
    };
    map.get_key_value(snapshot[position].as_ref()?)
}

/// An iterator over the entries of a [`Map`].
///
/// Returned by [`Map::iter`].
pub struct Iter<'a, K, V, S> {
    map: &'a Map<K, V, S>,
    state: IterState,
    remaining: usize,
}

impl<'a, K, V, S> Iter<'a, K, V, S> {
    pub(crate) fn new(map: &'a Map<K, V, S>) -> Self {
        Self {
            map,
            state: IterState::new(map),
            remaining: map.len(),
        }
    }
}

impl<K, V, S> Clone for Iter<'_, K, V, S> {
    fn clone(&self) -> Self {
        Self {
            map: self.map,
            state: self.state.clone(),
            remaining: self.remaining,
        }
    }
}

impl<'a, K, V, S> Iterator for Iter<'a, K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let entry = self.state.advance(self.map);
        if entry.is_some() {
            self.remaining -= 1;
        } else {
            self.remaining = 0;
        }
        entry
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K: Hash + Eq, V, S: BuildHasher> ExactSizeIterator for Iter<'_, K, V, S> {}
impl<K: Hash + Eq, V, S: BuildHasher> FusedIterator for Iter<'_, K, V, S> {}

macro_rules! impl_iterator {
    ($f: expr) => {
        fn next(&mut self) -> Option<Self::Item> {
            self.inner.next().map($f)
        }
        fn size_hint(&self) -> (usize, Option<usize>) {
            self.inner.size_hint()
        }
    };
}

/// An iterator over the keys of a [`Map`].
///
/// Returned by [`Map::keys`].
pub struct Keys<'a, K, V, S> {
    pub(crate) inner: Iter<'a, K, V, S>,
}

impl<'a, K: Hash + Eq, V, S: BuildHasher> Iterator for Keys<'a, K, V, S> {
    type Item = &'a K;

    impl_iterator!(|(key, _)| key);
}

impl<K: Hash + Eq, V, S: BuildHasher> ExactSizeIterator for Keys<'_, K, V, S> {}
impl<K: Hash + Eq, V, S: BuildHasher> FusedIterator for Keys<'_, K, V, S> {}

/// An iterator over the values of a [`Map`].
///
/// Returned by [`Map::values`].
pub struct Values<'a, K, V, S> {
    pub(crate) inner: Iter<'a, K, V, S>,
}

impl<'a, K: Hash + Eq, V, S: BuildHasher> Iterator for Values<'a, K, V, S> {
    type Item = &'a V;

    impl_iterator!(|(_, value)| value);
}

impl<K: Hash + Eq, V, S: BuildHasher> ExactSizeIterator for Values<'_, K, V, S> {}
impl<K: Hash + Eq, V, S: BuildHasher> FusedIterator for Values<'_, K, V, S> {}

/// A traversal of a [`Map`] that allows modifying the map between steps.
///
/// Returned by [`Map::cursor`]. Unlike [`Iter`], a cursor does not borrow the map, every step
/// takes the map as argument instead:
///
/// ```
/// # use swiss_map::Map;
/// let mut map: Map<u32, u32> = (0..100).map(|i| (i, i)).collect();
/// let mut cursor = map.cursor();
/// let mut seen = vec![];
/// while let Some((&key, _)) = cursor.next(&map) {
///     seen.push(key);
///     if key < 100 {
///         map.insert(key + 1000, key);
///     }
/// }
/// seen.retain(|&key| key < 100);
/// seen.sort();
/// assert_eq!(seen, (0..100).collect::<Vec<_>>());
/// ```
///
/// Entries present during the whole traversal are returned exactly once, with their value at the
/// time of the step returning them. Replacing the table a cursor is positioned on stores a copy of
/// that table's keys, which is released once no unfinished cursor is positioned on it anymore.
pub struct Cursor {
    state: IterState,
    map: Weak<CursorPositions>,
    /// The table this cursor is positioned on, as seen by the map. Released when done.
    position: Option<Arc<AtomicU64>>,
}

impl Cursor {
    pub(crate) fn new<K, V, S>(map: &Map<K, V, S>, cursors: Weak<CursorPositions>) -> Self {
        let state = IterState::new(map);
        let position = state.visiting().map(|id| Arc::new(AtomicU64::new(id)));
        Self {
            state,
            map: cursors,
            position,
        }
    }

    pub(crate) fn position(&self) -> Option<&Arc<AtomicU64>> {
        self.position.as_ref()
    }

    /// Returns the next entry of `map`, or `None` once all entries were visited or the map was
    /// cleared.
    ///
    /// # Panics
    ///
    /// Panics if `map` is not the map this cursor was created for.
    #[allow(clippy::should_implement_trait)]
    pub fn next<'m, K, V, S>(&mut self, map: &'m Map<K, V, S>) -> Option<(&'m K, &'m V)>
    where
        K: Hash + Eq,
        S: BuildHasher,
    {
        assert!(
            std::ptr::eq(self.map.as_ptr(), Arc::as_ptr(&map.cursors)),
            "cursor used with a map it was not created for"
        );
        let entry = self.state.advance(map);
        match self.state.visiting() {
            Some(id) => {
                if let Some(position) = &self.position {
                    position.store(id, Ordering::Relaxed);
                }
            }
            None => self.position = None,
        }
        entry
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("state", &self.state)
            .field("done", &self.position.is_none())
            .finish_non_exhaustive()
    }
}
