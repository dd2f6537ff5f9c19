//! Timed insert, lookup and cursor passes over a [`Map`].
use color_eyre::eyre::{ensure, Result};
use quanta::Instant;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use rtk_util::{fmt::Nanos, hash::SeededState};
use swiss_map::Map;

fn elapsed(start: Instant) -> Nanos {
    Nanos(start.elapsed().as_nanos() as i64)
}

pub fn run(round: usize, key_count: usize, seed: u64) -> Result<()> {
    let mut rng = SmallRng::seed_from_u64(seed);
    let keys: Vec<u64> = (0..key_count).map(|_| rng.gen()).collect();
    let mut map: Map<u64, u64> = Map::with_hasher(SeededState::with_seed(seed));

    let start = Instant::now();
    for (value, &key) in keys.iter().enumerate() {
        map.insert(key, value as u64);
    }
    log::info!(
        "round {round}: inserted {} entries in {}, {} tables, directory of {} (global depth {})",
        map.len(),
        elapsed(start),
        map.table_count(),
        map.directory_len(),
        map.global_depth(),
    );

    let start = Instant::now();
    let found = keys.iter().filter(|&&key| map.contains_key(&key)).count();
    ensure!(
        found == keys.len(),
        "round {round}: {} inserted keys not found",
        keys.len() - found
    );
    log::info!("round {round}: looked up {found} keys in {}", elapsed(start));

    // Removes odd values and inserts fresh entries while a cursor walks the map.
    let start = Instant::now();
    let mut cursor = map.cursor();
    let (mut visited, mut removed, mut inserted) = (0usize, 0usize, 0usize);
    while let Some((&key, &value)) = cursor.next(&map) {
        visited += 1;
        if value % 2 == 1 {
            map.remove(&key);
            removed += 1;
        } else if visited % 8 == 0 {
            map.insert(rng.gen(), 0);
            inserted += 1;
        }
    }
    log::info!(
        "round {round}: cursor visited {visited} entries in {}, removed {removed}, inserted {inserted}",
        elapsed(start),
    );
    ensure!(
        map.values().all(|value| value % 2 == 0),
        "round {round}: cursor missed entries with odd values"
    );

    let start = Instant::now();
    map.clear();
    log::debug!("round {round}: cleared in {}", elapsed(start));
    Ok(())
}
