#![cfg(test)]
#![allow(missing_docs)]
//! White-box tests: structural invariants, the resize special cases, and the
//! behavior of the migration window.

use std::hash::BuildHasherDefault;

use hashbrown::HashMap;
use rand::prelude::*;
use zwohash::ZwoHasher;

use crate::space::home_index;
use crate::{Config, RobinMap, MIGRATE_ALL};

type Model = HashMap<u32, i32, BuildHasherDefault<ZwoHasher>>;

/// Collects `count` distinct keys sharing the home slot `home` in a space
/// of `2^5` slots.
fn colliding_keys(home: u32, count: usize) -> Vec<u32> {
    (0u32..)
        .filter(|&key| home_index(key, 27) == home)
        .take(count)
        .collect()
}

#[test]
fn probe_ceiling_forces_grow_before_the_table_fills() {
    // With a grow load of 0.9 the count watermark sits at 28 entries; the
    // probe ceiling of 5 must fire long before that on a colliding chain.
    let mut map = RobinMap::with_config(Config {
        grow_load: 0.9,
        offset_mult: 1,
        ..Config::default()
    });

    for (i, &key) in colliding_keys(0, 7).iter().enumerate() {
        map.put(key, i as i32);
        map.check();
    }

    assert_eq!(map.len(), 7);
    assert!(map.log2_size() > 5, "probe ceiling did not trigger a grow");
    for (i, &key) in colliding_keys(0, 7).iter().enumerate() {
        assert_eq!(map.get(key).unwrap().value(), i as i32);
    }
}

#[test]
fn draining_the_map_releases_both_spaces() {
    let mut map = RobinMap::new();

    map.put(1, 10);
    assert!(map.current_space().buckets.is_some());

    assert!(map.remove(1));
    assert_eq!(map.len(), 0);
    assert!(map.current_space().buckets.is_none());
    assert!(map.retiring_space().is_none());
    map.check();

    // The map stays fully usable after the reset.
    map.put(2, 20);
    assert_eq!(map.get(2).unwrap().value(), 20);
    assert!(map.get(1).is_none());
    map.check();
}

#[test]
fn mid_migration_reads_hit_both_spaces() {
    let mut map = RobinMap::new();
    for key in 0..200 {
        map.put(key, key as i32 + 1);
    }
    // The grow at 179 entries retires a 256-slot space; 21 batched puts
    // cannot have drained it.
    assert!(map.is_migrating());
    map.check();

    let mut from_retiring = 0;
    for key in 0..200u32 {
        let current = map.current_space();
        if current.find(key, current.max_offset).is_some() {
            continue;
        }
        let retiring = map.retiring_space().unwrap();
        assert!(
            retiring.find(key, retiring.max_offset).is_some(),
            "key {key} lost during migration"
        );
        from_retiring += 1;
    }
    assert!(
        from_retiring >= 100,
        "only {from_retiring} of 200 keys left in the retiring space"
    );
}

#[test]
fn put_of_a_key_resident_in_the_retiring_space_is_an_existence_check() {
    let mut map = RobinMap::new();
    for key in 0..200 {
        map.put(key, key as i32 + 1);
    }
    assert!(map.is_migrating());

    // Pick a key that still lives in the retiring space.
    let resident = (0..200u32)
        .find(|&key| {
            let retiring = map.retiring_space().unwrap();
            retiring.find(key, retiring.max_offset).is_some()
        })
        .unwrap();

    let remaining_before = map.retiring_space().map(|space| {
        space.slots().iter().filter(|entry| entry.inuse).count()
    });
    let put = map.put(resident, -1);
    assert!(put.exists);
    assert_eq!(put.entry.value(), resident as i32 + 1);
    assert_eq!(map.len(), 200);

    // The existence check neither advanced the migration nor moved the key.
    let remaining_after = map.retiring_space().map(|space| {
        space.slots().iter().filter(|entry| entry.inuse).count()
    });
    assert_eq!(remaining_before, remaining_after);
    assert_eq!(map.get(resident).unwrap().value(), resident as i32 + 1);
    map.check();
}

#[test]
fn removing_from_the_retiring_space_leaves_its_chains_walkable() {
    let mut map = RobinMap::new();
    let mut live: Vec<u32> = (0..200).collect();
    for &key in &live {
        map.put(key, key as i32 + 1);
    }
    assert!(map.is_migrating());

    // Remove keys out of the retiring space while the migration is still
    // running; every survivor must stay reachable despite the lazy holes.
    let mut removed_from_retiring = 0;
    while map.is_migrating() && removed_from_retiring < 40 {
        let Some(pos) = live.iter().position(|&key| {
            let retiring = map.retiring_space().unwrap();
            retiring.find(key, retiring.max_offset).is_some()
        }) else {
            break;
        };
        let key = live.swap_remove(pos);
        assert!(map.remove(key));
        removed_from_retiring += 1;

        map.check();
        assert!(map.get(key).is_none());
        for &survivor in &live {
            assert_eq!(
                map.get(survivor).map(|entry| entry.value()),
                Some(survivor as i32 + 1),
                "key {survivor} unreachable after lazy remove of {key}"
            );
        }
    }
    assert!(removed_from_retiring > 0);
    assert_eq!(map.len(), live.len());
}

#[test]
fn migration_completes_without_touching_the_count() {
    let mut map = RobinMap::new();
    for key in 0..200 {
        map.put(key, key as i32 + 1);
    }
    assert!(map.is_migrating());
    let len = map.len();

    // Mutating misses still advance the cursor, so the migration drains
    // even without further insertions.
    let mut steps = 0;
    while map.is_migrating() {
        assert!(!map.remove(1_000_000 + steps));
        steps += 1;
        assert!(steps <= 256, "migration failed to drain");
    }

    assert_eq!(map.len(), len);
    assert!(map.retiring_space().is_none());
    let current = map.current_space();
    for key in 0..200u32 {
        assert!(current.find(key, current.max_offset).is_some());
    }
    map.check();
}

#[test]
fn shrinks_never_drop_below_the_configured_minimum() {
    let mut map = RobinMap::with_config(Config {
        min_log2_size: 6,
        ..Config::default()
    });

    for key in 0..500 {
        map.put(key, key as i32);
        assert!(map.log2_size() >= 6);
    }
    for key in 0..500 {
        assert!(map.remove(key));
        assert!(map.log2_size() >= 6);
    }
    assert_eq!(map.len(), 0);
    assert_eq!(map.log2_size(), 6);
    map.check();
}

#[test]
fn migrate_all_resizes_synchronously() {
    let mut map = RobinMap::with_config(Config {
        batch_size: MIGRATE_ALL,
        ..Config::default()
    });

    for key in 0..5000 {
        map.put(key, key as i32);
        assert!(!map.is_migrating());
    }
    map.check();
    assert!(map.log2_size() > 5);

    for key in 0..5000u32 {
        assert!(map.remove(key));
        assert!(!map.is_migrating());
    }
    assert_eq!(map.len(), 0);
    map.check();
}

#[test]
fn randomized_operations_hold_all_invariants() {
    let mut rng = rand_pcg::Pcg64::seed_from_u64(25);
    let mut map = RobinMap::new();
    let mut model = Model::default();

    for step in 0..20_000u32 {
        let key = rng.gen_range(0..1500u32);
        match rng.gen_range(0..10) {
            0..=5 => {
                let value = rng.gen::<i32>();
                let existed = model.contains_key(&key);
                let put = map.put(key, value);
                assert_eq!(put.exists, existed);
                // Puts never replace: the model only learns the value when
                // the key was absent.
                let expected = *model.entry(key).or_insert(value);
                assert_eq!(put.entry.value(), expected);
            }
            6..=8 => {
                assert_eq!(map.remove(key), model.remove(&key).is_some());
            }
            _ => {
                // Exercise in-place value updates through the handle.
                if let Some(entry) = map.get_mut(key) {
                    *entry.value_mut() = entry.value().wrapping_add(1);
                    let value = model.get_mut(&key).unwrap();
                    *value = value.wrapping_add(1);
                } else {
                    assert!(!model.contains_key(&key));
                }
            }
        }
        map.check();
        assert_eq!(map.len(), model.len());

        if step % 1024 == 0 {
            for (&key, &value) in &model {
                assert_eq!(map.get(key).map(|entry| entry.value()), Some(value));
            }
        }
    }

    for (&key, &value) in &model {
        assert_eq!(map.get(key).map(|entry| entry.value()), Some(value));
    }
}
