//! Encoder and superimposed coding properties

use proptest::prelude::*;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use scwindex::{Encoder, IndexConfig, QuerySession, ShardSet, SliceBuilder};
use std::collections::HashSet;

proptest! {
    #[test]
    fn encode_is_deterministic_and_well_formed(
        content in proptest::collection::vec(any::<u8>(), 0..64),
        width in 1usize..512,
        k_seed in 1usize..16,
    ) {
        let k = k_seed.min(width);
        let encoder = Encoder::new(IndexConfig::new(32, width, k).unwrap()).unwrap();
        let a = encoder.encode(&content);
        let b = encoder.encode(&content);
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(a.len(), k);
        let distinct: HashSet<_> = a.iter().copied().collect();
        prop_assert_eq!(distinct.len(), k);
        prop_assert!(a.iter().all(|&p| p < width));
    }

    #[test]
    fn no_false_negatives(
        recs in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 1..12), 1..70),
        pick in any::<proptest::sample::Index>(),
    ) {
        let config = IndexConfig::new(32, 128, 3).unwrap();
        let mut builder = SliceBuilder::new(config).unwrap();
        for r in &recs {
            builder.add_record(r).unwrap();
        }
        let set = ShardSet::from_shards(config, vec![builder.finish()]).unwrap();
        let target = pick.index(recs.len());

        let mut session = QuerySession::new(&set).unwrap();
        session.begin_session(1).unwrap();
        session.encode_query_piece(0, &recs[target], 0).unwrap();
        prop_assert!(session.combine_and().unwrap().contains(target));
    }
}

/// Share of random content pairs whose codes collide completely.
fn collision_rate(width: usize, k: usize, pairs: usize) -> f64 {
    let encoder = Encoder::new(IndexConfig::new(32, width, k).unwrap()).unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(0x5eed);
    let mut collisions = 0usize;
    for _ in 0..pairs {
        let a = rng.next_u64().to_le_bytes();
        let b = rng.next_u64().to_le_bytes();
        if a == b {
            continue;
        }
        let sa: HashSet<_> = encoder.encode(&a).into_iter().collect();
        let sb: HashSet<_> = encoder.encode(&b).into_iter().collect();
        if sa == sb {
            collisions += 1;
        }
    }
    collisions as f64 / pairs as f64
}

#[test]
fn collision_rate_falls_with_width() {
    let narrow = collision_rate(64, 1, 20_000);
    let wide = collision_rate(1024, 1, 20_000);
    // Expected about 1/64 and 1/1024.
    assert!(narrow > 0.005 && narrow < 0.03, "narrow rate {}", narrow);
    assert!(wide < 0.004, "wide rate {}", wide);
    assert!(wide < narrow);
}

#[test]
fn collision_rate_falls_with_more_bits() {
    let one = collision_rate(64, 1, 20_000);
    let three = collision_rate(64, 3, 20_000);
    assert!(three < one, "k=3 rate {} vs k=1 rate {}", three, one);
}
