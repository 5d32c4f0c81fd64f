//! Randomized checks of bitmap set algebra against `BTreeSet`.

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use strata::bitmap::{Bitmap, DocIdWidth};

fn random_ids(rng: &mut StdRng) -> BTreeSet<u64> {
    let mut ids = BTreeSet::new();
    // Dense run inside one block, so some containers switch encoding.
    if rng.random_bool(0.5) {
        let start = rng.random_range(0..100_000u64);
        let len = rng.random_range(0..8_000u64);
        ids.extend(start..start + len);
    }
    // Sparse ids spread over many blocks.
    for _ in 0..rng.random_range(0..2_000) {
        ids.insert(rng.random_range(0..(1u64 << 22)));
    }
    ids
}

fn bitmap(ids: &BTreeSet<u64>) -> Bitmap {
    Bitmap::from_ids(DocIdWidth::U32, ids.iter().copied()).unwrap()
}

fn assert_same(bitmap: &Bitmap, expected: &BTreeSet<u64>) {
    assert_eq!(bitmap.cardinality(), expected.len() as u64);
    assert!(bitmap.iter().eq(expected.iter().copied()));
    assert_eq!(bitmap.min(), expected.first().copied());
    assert_eq!(bitmap.max(), expected.last().copied());
}

#[test]
fn test_set_algebra_matches_btreeset() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for _ in 0..40 {
        let a = random_ids(&mut rng);
        let b = random_ids(&mut rng);
        let (ba, bb) = (bitmap(&a), bitmap(&b));

        assert_same(&ba.union(&bb), &a.union(&b).copied().collect());
        assert_same(&ba.intersect(&bb), &a.intersection(&b).copied().collect());
        assert_same(&ba.difference(&bb), &a.difference(&b).copied().collect());

        // Inputs are untouched.
        assert_same(&ba, &a);
        assert_same(&bb, &b);
    }
}

#[test]
fn test_membership_and_rank() {
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..20 {
        let ids = random_ids(&mut rng);
        let bitmap = bitmap(&ids);
        for _ in 0..200 {
            let lookup = rng.random_range(0..(1u64 << 22));
            assert_eq!(bitmap.contains(lookup), ids.contains(&lookup));
            assert_eq!(bitmap.rank(lookup), ids.range(..lookup).count() as u64);
        }
    }
}

#[test]
fn test_insert_remove_follow_the_model() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut model = BTreeSet::new();
    let mut bitmap = Bitmap::new(DocIdWidth::U32);
    for _ in 0..20_000 {
        let id = rng.random_range(0..70_000u64);
        if rng.random_bool(0.7) {
            assert_eq!(bitmap.insert(id).unwrap(), model.insert(id));
        } else {
            assert_eq!(bitmap.remove(id), model.remove(&id));
        }
    }
    assert_same(&bitmap, &model);
}

#[test]
fn test_bytes_are_canonical() {
    let mut rng = StdRng::seed_from_u64(99);
    for _ in 0..20 {
        let ids = random_ids(&mut rng);
        let sorted = bitmap(&ids);

        // Same set built by inserting in reverse plus removed extras.
        let mut built = Bitmap::new(DocIdWidth::U32);
        for &id in ids.iter().rev() {
            built.insert(id).unwrap();
        }
        let extra = rng.random_range((1u64 << 22)..(1u64 << 23));
        built.insert(extra).unwrap();
        built.remove(extra);

        assert_eq!(built, sorted);
        assert_eq!(built.to_bytes(), sorted.to_bytes());

        let decoded = Bitmap::deserialize_from(&mut sorted.to_bytes().as_slice()).unwrap();
        assert_same(&decoded, &ids);
    }
}

#[test]
fn test_width_limits() {
    let mut narrow = Bitmap::new(DocIdWidth::U32);
    assert!(narrow.insert(u32::MAX as u64).is_ok());
    assert!(narrow.insert(u32::MAX as u64 + 1).is_err());

    let mut wide = Bitmap::new(DocIdWidth::U64);
    assert!(wide.insert(1u64 << 40).unwrap());
    assert!(wide.contains(1u64 << 40));
}
