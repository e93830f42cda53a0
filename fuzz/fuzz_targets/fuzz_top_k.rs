#![no_main]

use libfuzzer_sys::fuzz_target;
use vectradb::{BoundedTopK, Candidate, TupleId};

// First byte picks k, the rest are read as f64 distances (NaN included).
fuzz_target!(|data: &[u8]| {
    let Some((&k, rest)) = data.split_first() else {
        return;
    };
    let k = usize::from(k) + 1;

    let mut all: Vec<Candidate> = rest
        .chunks_exact(8)
        .enumerate()
        .map(|(i, chunk)| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(chunk);
            Candidate::new(TupleId::new(i as u64), f64::from_le_bytes(bytes))
        })
        .collect();

    let mut top = BoundedTopK::new(k).unwrap();
    top.offer_all(all.iter().copied());
    assert_eq!(top.added(), all.len() as u64);
    assert_eq!(top.len(), k.min(all.len()));

    if !all.is_empty() {
        let smallest = *top.get(0).unwrap();
        assert_eq!(smallest, *all.iter().min().unwrap());
    }

    all.sort();
    all.truncate(k);
    assert_eq!(top.into_sorted_vec(), all);
});
