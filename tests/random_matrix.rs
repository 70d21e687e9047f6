use csnet::linalg::LinearOperator;
use csnet::random::{global_snapshot, set_global_seed, with_global_rng, RandomKind, RandomMatrixFactory};
use rand::Rng;

fn next_draw() -> u64 {
    with_global_rng(|r| r.gen())
}

#[test]
fn gaussian_construction_is_deterministic_and_side_effect_free() {
    set_global_seed(1);
    let mut saved = global_snapshot();

    let a = RandomMatrixFactory::build(42, 16, 32, RandomKind::standard_gaussian(), false).unwrap();
    let b = RandomMatrixFactory::build(42, 16, 32, RandomKind::standard_gaussian(), false).unwrap();
    let (da, db) = (a.to_dense(), b.to_dense());
    assert_eq!(da.shape(), (16, 32));
    let bytes_a: Vec<u8> = da.iter().flat_map(|v| v.to_le_bytes()).collect();
    let bytes_b: Vec<u8> = db.iter().flat_map(|v| v.to_le_bytes()).collect();
    assert_eq!(bytes_a, bytes_b);

    // the process stream continues exactly where it was before both builds
    assert_eq!(saved.gen::<u64>(), next_draw());
}

#[test]
fn different_seeds_differ() {
    let a = RandomMatrixFactory::build(1, 8, 8, RandomKind::standard_gaussian(), false).unwrap();
    let b = RandomMatrixFactory::build(2, 8, 8, RandomKind::standard_gaussian(), false).unwrap();
    assert_ne!(a.to_dense(), b.to_dense());
}

#[test]
fn identity_subsampling_selects_distinct_rows() {
    let a = RandomMatrixFactory::build(5, 12, 20, RandomKind::Identity, false).unwrap();
    let d = a.to_dense();
    let mut cols = Vec::new();
    for i in 0..12 {
        let row = d.row(i);
        assert_eq!(row.iter().filter(|v| **v == 1.0).count(), 1);
        assert_eq!(row.iter().filter(|v| **v == 0.0).count(), 19);
        cols.push(row.iter().position(|v| *v == 1.0).unwrap());
    }
    let mut sorted = cols.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), 12);
    assert_eq!(a.selected_rows().unwrap(), cols.as_slice());

    // a shorter draw from the same seed is a prefix of the longer one
    let b = RandomMatrixFactory::build(5, 6, 20, RandomKind::Identity, false).unwrap();
    assert_eq!(b.selected_rows().unwrap(), &cols[..6]);
}

#[test]
fn normalisation_divides_by_sqrt_m() {
    let raw = RandomMatrixFactory::build(3, 16, 24, RandomKind::Bernoulli, false).unwrap();
    let norm = RandomMatrixFactory::build(3, 16, 24, RandomKind::Bernoulli, true).unwrap();
    assert!(norm.is_normalized());
    let expected = raw.to_dense() / 4.0;
    assert_eq!(norm.to_dense(), expected);
}
