//! Benchmark utilities.

use hashtrie_codec::U32Codec;
use hashtrie_core::{HashTrieMap, MapConfig};
use hashtrie_store::{HeapStore, RecordStore};
use rand::Rng;
use std::sync::Arc;

/// Generate a random payload of the specified size.
pub fn random_payload(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate `count` distinct pseudo-random keys.
pub fn random_keys(count: usize) -> Vec<u32> {
    let mut rng = rand::thread_rng();
    let mut keys: Vec<u32> = (0..count as u32).collect();
    for i in (1..keys.len()).rev() {
        keys.swap(i, rng.gen_range(0..=i));
    }
    keys
}

/// Build a `u32 -> u32` map with one heap store per segment.
pub fn segmented_map(conc_shift: u8) -> HashTrieMap<u32, u32> {
    let stores: Vec<Arc<dyn RecordStore>> = (0..1usize << conc_shift)
        .map(|_| Arc::new(HeapStore::new()) as Arc<dyn RecordStore>)
        .collect();
    HashTrieMap::assemble(
        stores,
        Arc::new(U32Codec),
        Arc::new(U32Codec),
        MapConfig::default().conc_shift(conc_shift),
        Vec::new(),
        None,
    )
    .expect("benchmark map assembly")
}
