//! Randomized differential test against the standard library map.
//!
//! Drives a map through arbitrary operation sequences and checks every
//! return value against `HashMap`, then audits record accounting at the
//! end. Uses the real seeded codec hashing, so trie shapes vary from
//! case to case.

use hashtrie_codec::U32Codec;
use hashtrie_core::{CoreResult, HashTrieMap, MapConfig};
use hashtrie_store::{HeapStore, RecordStore};
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Op {
    Put(u32, u32),
    PutIfAbsent(u32, u32),
    Replace(u32, u32),
    ReplaceIfEquals(u32, u32, u32),
    Remove(u32),
    RemoveIfEquals(u32, u32),
    Get(u32),
    Contains(u32),
    Clear,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    // A small key space keeps hit and miss paths equally likely.
    let key = || 0u32..24;
    let value = || 0u32..8;
    prop_oneof![
        8 => (key(), value()).prop_map(|(k, v)| Op::Put(k, v)),
        3 => (key(), value()).prop_map(|(k, v)| Op::PutIfAbsent(k, v)),
        3 => (key(), value()).prop_map(|(k, v)| Op::Replace(k, v)),
        3 => (key(), value(), value()).prop_map(|(k, e, v)| Op::ReplaceIfEquals(k, e, v)),
        5 => key().prop_map(Op::Remove),
        3 => (key(), value()).prop_map(|(k, e)| Op::RemoveIfEquals(k, e)),
        5 => key().prop_map(Op::Get),
        2 => key().prop_map(Op::Contains),
        1 => Just(Op::Clear),
    ]
}

fn apply(map: &HashTrieMap<u32, u32>, model: &mut HashMap<u32, u32>, op: &Op) -> CoreResult<()> {
    match *op {
        Op::Put(k, v) => assert_eq!(map.put(&k, &v)?, model.insert(k, v)),
        Op::PutIfAbsent(k, v) => {
            let existing = model.get(&k).copied();
            assert_eq!(map.put_if_absent(&k, &v)?, existing);
            model.entry(k).or_insert(v);
        }
        Op::Replace(k, v) => {
            let existing = model.get(&k).copied();
            assert_eq!(map.replace(&k, &v)?, existing);
            if existing.is_some() {
                model.insert(k, v);
            }
        }
        Op::ReplaceIfEquals(k, e, v) => {
            let hit = model.get(&k) == Some(&e);
            assert_eq!(map.replace_if_equals(&k, &e, &v)?, hit);
            if hit {
                model.insert(k, v);
            }
        }
        Op::Remove(k) => assert_eq!(map.remove(&k)?, model.remove(&k)),
        Op::RemoveIfEquals(k, e) => {
            let hit = model.get(&k) == Some(&e);
            assert_eq!(map.remove_if_equals(&k, &e)?, hit);
            if hit {
                model.remove(&k);
            }
        }
        Op::Get(k) => assert_eq!(map.get(&k)?, model.get(&k).copied()),
        Op::Contains(k) => assert_eq!(map.contains_key(&k)?, model.contains_key(&k)),
        Op::Clear => {
            map.clear()?;
            model.clear();
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn map_matches_reference_model(
        ops in prop::collection::vec(op_strategy(), 1..150),
        conc_shift in 0u8..=2,
        threshold in 1usize..=4,
    ) {
        let store = Arc::new(HeapStore::new());
        let map: HashTrieMap<u32, u32> = HashTrieMap::assemble(
            vec![Arc::clone(&store) as Arc<dyn RecordStore>],
            Arc::new(U32Codec),
            Arc::new(U32Codec),
            MapConfig::default()
                .conc_shift(conc_shift)
                .leaf_split_threshold(threshold),
            Vec::new(),
            None,
        )
        .unwrap();
        let mut model: HashMap<u32, u32> = HashMap::new();

        for op in &ops {
            apply(&map, &mut model, op).unwrap();
        }

        prop_assert_eq!(map.size().unwrap(), model.len() as u64);
        for (key, value) in &model {
            prop_assert_eq!(map.get(key).unwrap(), Some(*value));
        }
        let mut walked = 0u64;
        map.for_each(|key, value| {
            assert_eq!(model.get(key), Some(value));
            walked += 1;
        })
        .unwrap();
        prop_assert_eq!(walked, model.len() as u64);
        map.verify().unwrap();

        // after clearing, each segment is back to its empty root leaf
        map.clear().unwrap();
        prop_assert_eq!(map.size().unwrap(), 0);
        prop_assert_eq!(store.record_count(), 1usize << conc_shift);
        map.verify().unwrap();
    }
}
