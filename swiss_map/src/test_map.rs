#![allow(missing_docs)]
use crate::Map;
use rand::prelude::*;
use rtk_util::hash::SeededState;
use std::{
    borrow::Borrow,
    collections::{HashMap, HashSet},
    fmt::Debug,
    hash::Hash,
};

type RefMap<K, V> = HashMap<K, V>;

macro_rules! weighted_choose {
    ($rng:expr, $($name:ident: $weight:expr => $body:expr),+) => {
        {
            enum Branches { $( $name,  )* }
            let weights = [$((Branches::$name, $weight)),+];
            match weights.choose_weighted($rng, |x| x.1).unwrap().0 {
                $(Branches::$name => $body),*
            }
        }
    }
}

struct CheckedMap<K, V> {
    dut: Map<K, V>,
    ref_map: RefMap<K, V>,
}

impl<K: Hash + Eq + Clone + Debug, V: Eq + Clone + Debug> CheckedMap<K, V> {
    fn new(seed: u64) -> Self {
        CheckedMap {
            dut: Map::with_hasher(SeededState::with_seed(seed)),
            ref_map: RefMap::new(),
        }
    }
    fn len(&self) -> usize {
        self.ref_map.len()
    }
    fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        Q: Hash + Eq + ?Sized,
        K: Borrow<Q>,
    {
        let ref_result = self.ref_map.get_key_value(key);
        let dut_result = self.dut.get_key_value(key);
        assert_eq!(ref_result, dut_result);
        ref_result.map(|(_, value)| value)
    }
    fn insert(&mut self, key: K, value: V) -> Option<V> {
        let ref_result = self.ref_map.insert(key.clone(), value.clone());
        let dut_result = self.dut.insert(key, value);
        assert_eq!(ref_result, dut_result);
        ref_result
    }
    fn update(&mut self, key: &K, f: impl Fn(&mut V)) -> bool {
        let ref_result = self.ref_map.get_mut(key).map(&f).is_some();
        let dut_result = self.dut.get_mut(key).map(&f).is_some();
        assert_eq!(ref_result, dut_result);
        ref_result
    }
    fn remove_entry<Q>(&mut self, key: &Q) -> Option<(K, V)>
    where
        Q: Hash + Eq + ?Sized,
        K: Borrow<Q>,
    {
        let ref_result = self.ref_map.remove_entry(key);
        let dut_result = self.dut.remove_entry(key);
        assert_eq!(ref_result, dut_result);
        ref_result
    }
    fn clear(&mut self) {
        self.ref_map.clear();
        self.dut.clear();
        self.check();
    }
    fn check(&mut self) {
        self.dut.check();
        assert_eq!(self.dut.len(), self.ref_map.len());
        let mut seen = HashSet::new();
        for (key, value) in self.dut.iter() {
            assert!(seen.insert(key), "{key:?} returned twice");
            assert_eq!(self.ref_map.get(key), Some(value));
        }
        assert_eq!(seen.len(), self.ref_map.len());
    }
    fn iterator_check(&mut self) {
        let keys: HashSet<_> = self.dut.keys().collect();
        assert_eq!(keys, self.ref_map.keys().collect::<HashSet<_>>());
        let mut values: Vec<_> = self.dut.values().collect();
        let mut ref_values: Vec<_> = self.ref_map.values().collect();
        assert_eq!(values.len(), ref_values.len());
        values.sort_by_key(|value| format!("{value:?}"));
        ref_values.sort_by_key(|value| format!("{value:?}"));
        assert_eq!(values, ref_values);
        assert_eq!(self.dut.iter().len(), self.len());
    }
    /// NB: `random_likelihood` is **not** a probability. `random_likelihood == 2.0` would be 2:1 odds random:present, i.e. 2/3 probability.
    fn present_or_random_key<R: Rng + SeedableRng>(
        &self,
        random_likelihood: f64,
        rng: &mut R,
        mut rand_k: impl FnMut(&mut R) -> K,
    ) -> K {
        debug_assert!(random_likelihood >= 0.0);
        if self.len() == 0 || rng.gen_range(0.0..1.0 + random_likelihood) >= 1.0 {
            rand_k(rng)
        } else {
            self.ref_map.keys().choose(rng).unwrap().clone()
        }
    }
    /// Walks a cursor over the map while mutating it, checking that every entry present for the
    /// whole walk is returned exactly once.
    fn cursor_walk<R: Rng + SeedableRng>(
        &mut self,
        rng: &mut R,
        mut rand_k: impl FnMut(&mut R) -> K,
        mut rand_v: impl FnMut(&mut R) -> V,
    ) -> usize {
        let mut stable: HashSet<K> = self.ref_map.keys().cloned().collect();
        let mut returned: HashMap<K, usize> = HashMap::new();
        let mut cursor = self.dut.cursor();
        let mut steps = 0;
        while let Some((key, value)) = cursor.next(&self.dut) {
            *returned.entry(key.clone()).or_default() += 1;
            assert_eq!(self.ref_map.get(key), Some(value));
            steps += 1;
            weighted_choose! {rng,
                Nothing: 1.0 => {},
                Insert: 2.0 => {
                    let key = rand_k(rng);
                    stable.remove(&key);
                    let value = rand_v(rng);
                    self.insert(key, value);
                },
                Remove: 0.5 => {
                    let key = self.present_or_random_key(0.5, rng, &mut rand_k);
                    stable.remove(&key);
                    self.remove_entry(&key);
                },
                Update: 0.5 => {
                    let key = self.present_or_random_key(0.2, rng, &mut rand_k);
                    let value = rand_v(rng);
                    self.update(&key, |current| *current = value.clone());
                }
            };
        }
        for key in stable {
            assert_eq!(returned.get(&key), Some(&1), "{key:?} not returned exactly once");
        }
        self.check();
        steps
    }
}

fn test_suite<K, V, R>(mut rand_k: impl FnMut(&mut R) -> K, mut rand_v: impl FnMut(&mut R) -> V)
where
    K: Hash + Eq + Clone + Debug,
    V: Eq + Clone + Debug,
    R: Rng + SeedableRng,
{
    let mut map: CheckedMap<K, V> = CheckedMap::new(17);
    let mut rng = R::seed_from_u64(39);
    let mut max_size = 0;
    let verbosity = 0;
    for _ in 0..20000 {
        weighted_choose! {&mut rng,
            Insert: 3.0 => {
                let k = map.present_or_random_key(6.0, &mut rng, &mut rand_k);
                let v = rand_v(&mut rng);
                let result = map.insert(k.clone(), v.clone());
                if verbosity > 0 {
                    println!("inserting {k:?}: {v:?} -> {result:?}");
                }
            },
            Get: 0.5 => {
                let k = map.present_or_random_key(1.0, &mut rng, &mut rand_k);
                let result = map.get(&k).cloned();
                if verbosity > 0 {
                    println!("getting {k:?} -> {result:?}");
                }
            },
            Update: 0.3 => {
                let k = map.present_or_random_key(0.5, &mut rng, &mut rand_k);
                let v = rand_v(&mut rng);
                let result = map.update(&k, |current| *current = v.clone());
                if verbosity > 0 {
                    println!("updating {k:?}: {v:?} -> {result:?}");
                }
            },
            Remove: 1.0 => {
                let k = map.present_or_random_key(1.0, &mut rng, &mut rand_k);
                let result = map.remove_entry(&k);
                if verbosity > 0 {
                    println!("removing {k:?} -> {result:?}");
                }
            },
            Clear: 0.0005 => {
                map.clear();
                if verbosity > 0 {
                    println!("clearing");
                }
            },
            Cursor: 0.002 => {
                let steps = map.cursor_walk(&mut rng, &mut rand_k, &mut rand_v);
                if verbosity > 0 {
                    println!("cursor walk of {steps} steps");
                }
            },
            Check: 0.01 => {
                map.check();
            }
        };
        max_size = std::cmp::max(max_size, map.len());
    }
    map.check();
    map.iterator_check();
    println!("max size {max_size}");
}

#[test]
fn test_suite_u64_u64() {
    test_suite::<u64, u64, rand_pcg::Pcg64>(|rng| rng.gen(), |rng| rng.gen());
}

#[test]
fn test_suite_small_u16_u8() {
    // Few distinct keys keep the map small and exercise tombstone reuse.
    test_suite::<u16, u8, rand_pcg::Pcg64>(|rng| rng.gen_range(0..600), |rng| rng.gen());
}

#[test]
fn test_suite_boxed_usize_boxed_usize() {
    test_suite::<Box<usize>, Box<usize>, rand_pcg::Pcg64>(
        |rng| Box::new(rng.gen::<usize>() >> rng.gen_range(0..usize::BITS)),
        |rng| Box::new(rng.gen()),
    );
}

#[test]
fn test_suite_string_string() {
    test_suite::<String, String, rand_pcg::Pcg64>(
        |rng| {
            let len = rng.gen_range(4..16);
            String::from_iter((0..len).map(|_| rng.gen_range('!'..'~')))
        },
        |rng| {
            let len = rng.gen_range(8..32);
            String::from_iter((0..len).map(|_| rng.gen_range('!'..'~')))
        },
    );
}

#[test]
fn test_basic() {
    let mut map: Map<String, usize> = Default::default();
    map.insert("adam".into(), 10);
    map.insert("eve".into(), 23);
    map.insert("mallory".into(), 40);
    map.insert("jim".into(), 5);
    assert_eq!(map.get("adam").copied(), Some(10));
    assert_eq!(map.insert("jim".into(), 15), Some(5));
    assert_eq!(map.remove("eve"), Some(23));
    assert_eq!(map.remove("eve"), None);
    let mut keys: Vec<_> = map.keys().collect();
    keys.sort();
    assert_eq!(keys, ["adam", "jim", "mallory"]);
    let mut values: Vec<_> = map.values().copied().collect();
    values.sort();
    assert_eq!(values, [10, 15, 40]);
    assert_eq!(map.len(), 3);
    map.check();
}

#[test]
fn cursor_survives_splits_and_doubling() {
    let mut map: Map<u32, u32> = Map::with_hasher(SeededState::with_seed(3));
    map.extend((0..100).map(|i| (i, i)));
    let mut cursor = map.cursor();
    let mut returned = HashSet::new();
    let mut next_key = 1_000_000;
    while let Some((&key, &value)) = cursor.next(&map) {
        assert!(returned.insert(key));
        if key < 100 {
            assert_eq!(value, key);
            // Enough insertions to replace every table several times over.
            for _ in 0..50 {
                map.insert(next_key, next_key);
                next_key += 1;
            }
        }
    }
    assert!(map.global_depth() > 1);
    assert!((0..100).all(|key| returned.contains(&key)));
    map.check();
}

#[test]
fn cursor_returns_current_values() {
    let mut map: Map<u32, u32> = Map::with_hasher(SeededState::with_seed(9));
    map.extend((0..2000).map(|i| (i, 0)));
    let mut cursor = map.cursor();
    let mut steps = 0;
    let mut returned = 0;
    while let Some((&key, &value)) = cursor.next(&map) {
        if key < 2000 {
            assert_eq!(value, steps);
            returned += 1;
            map.insert(3000 + key, 0);
        }
        steps += 1;
        for other in 0..2000 {
            if let Some(value) = map.get_mut(&other) {
                *value += 1;
            }
        }
    }
    assert_eq!(returned, 2000);
}

#[test]
fn cursor_ends_on_clear() {
    let mut map: Map<u32, ()> = (0..500).map(|i| (i, ())).collect();
    let mut cursor = map.cursor();
    assert!(cursor.next(&map).is_some());
    map.clear();
    map.extend((0..500).map(|i| (i, ())));
    assert_eq!(cursor.next(&map), None);
    assert_eq!(cursor.next(&map), None);
    map.check();
}

#[test]
fn cursor_over_small_map() {
    let mut map: Map<u8, u8> = (0..6).map(|i| (i, i)).collect();
    let mut cursor = map.cursor();
    let mut returned = vec![];
    while let Some((&key, _)) = cursor.next(&map) {
        returned.push(key);
        if key < 6 {
            // Forces the small map into a table during the walk.
            map.insert(100 + key, key);
            map.remove(&(key ^ 1));
        }
    }
    let unique: HashSet<_> = returned.iter().collect();
    assert_eq!(unique.len(), returned.len());
    map.check();
}

#[test]
#[should_panic(expected = "cursor used with a map it was not created for")]
fn cursor_rejects_other_map() {
    let a: Map<u8, u8> = (0..3).map(|i| (i, i)).collect();
    let b: Map<u8, u8> = (0..3).map(|i| (i, i)).collect();
    let mut cursor = a.cursor();
    cursor.next(&b);
}

#[test]
fn finished_cursor_keeps_no_snapshots() {
    let mut map: Map<u32, u32> = Map::with_hasher(SeededState::with_seed(2));
    map.extend((0..100).map(|i| (i, i)));
    let mut cursor = map.cursor();
    while cursor.next(&map).is_some() {}
    assert!(cursor.next(&map).is_none());

    map.extend((100..20_000).map(|i| (i, i)));
    assert!(map.global_depth() > 1);
    assert!(map.retired.is_empty());
    assert!(map.cursors.lock().unwrap().is_empty());
    drop(cursor);
}

#[test]
fn running_cursor_keeps_only_its_table() {
    let mut map: Map<u32, u32> = Map::with_hasher(SeededState::with_seed(4));
    map.extend((0..5000).map(|i| (i, i)));
    let mut cursor = map.cursor();
    let mut returned = HashSet::new();
    for _ in 0..10 {
        let (&key, _) = cursor.next(&map).unwrap();
        returned.insert(key);
    }

    map.extend((5000..40_000).map(|i| (i, i)));
    assert!(map.retired.len() <= 1);

    while let Some((&key, _)) = cursor.next(&map) {
        assert!(returned.insert(key));
        assert!(map.retired.len() <= 1);
    }
    assert!((0..5000).all(|key| returned.contains(&key)));

    // The next replacement after the walk releases the last snapshot.
    map.extend((40_000..80_000).map(|i| (i, i)));
    assert!(map.retired.is_empty());
}

#[test]
fn cleared_map_releases_cursor_positions() {
    let mut map: Map<u32, u32> = Map::with_hasher(SeededState::with_seed(6));
    map.extend((0..3000).map(|i| (i, i)));
    let mut cursor = map.cursor();
    assert!(cursor.next(&map).is_some());
    map.clear();
    map.extend((0..20_000).map(|i| (i, i)));
    assert!(map.retired.is_empty());
    assert_eq!(cursor.next(&map), None);
}

#[test]
fn snapshots_dropped_without_cursors() {
    let mut map: Map<u32, u32> = Map::with_hasher(SeededState::with_seed(1));
    let cursor = map.cursor();
    map.extend((0..3000).map(|i| (i, i)));
    assert!(!map.retired.is_empty());
    drop(cursor);
    map.extend((3000..6000).map(|i| (i, i)));
    assert!(map.retired.is_empty());
}
