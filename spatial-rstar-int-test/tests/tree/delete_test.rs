//! Deletion and condensation.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use spatial_rstar::{ObjectId, RStarTree};
use spatial_rstar_int_test::test_util::{brute_force_knn, random_points, test_config};
use std::collections::BTreeMap;

#[test]
fn test_random_inserts_and_deletes_match_model() {
    let mut rng = StdRng::seed_from_u64(77);
    let config = test_config(2).leaf_capacity(8).dir_capacity(6).build().unwrap();
    let mut tree = RStarTree::in_memory(config).unwrap();
    let mut model: BTreeMap<ObjectId, Vec<f64>> = BTreeMap::new();
    let mut next_id: ObjectId = 0;

    for round in 0..4_000 {
        if model.is_empty() || rng.gen_bool(0.6) {
            let point = vec![rng.gen_range(0.0..100.0), rng.gen_range(0.0..100.0)];
            tree.insert(next_id, &point).unwrap();
            model.insert(next_id, point);
            next_id += 1;
        } else {
            let victim = *model.keys().nth(rng.gen_range(0..model.len())).unwrap();
            let point = model.remove(&victim).unwrap();
            assert!(tree.delete_at(victim, &point).unwrap());
        }
        assert_eq!(tree.len(), model.len() as u64);

        if round % 400 == 0 {
            let q = [rng.gen_range(0.0..100.0), rng.gen_range(0.0..100.0)];
            let distance = tree.distance().clone();
            let expected = brute_force_knn(
                model.iter().map(|(id, p)| (*id, p)),
                distance.as_ref(),
                &q,
                10,
            );
            assert_eq!(tree.knn_search(&q, 10).unwrap(), expected);
        }
    }
}

#[test]
fn test_delete_absent_ids() {
    let mut tree = RStarTree::in_memory(test_config(2).build().unwrap()).unwrap();
    assert!(!tree.delete(1).unwrap());

    tree.insert(1, &[1.0, 1.0]).unwrap();
    assert!(!tree.delete(2).unwrap());
    assert!(!tree.delete_at(1, &[1.0, 1.5]).unwrap());
    assert_eq!(tree.len(), 1);
}

#[test]
fn test_delete_everything_then_reuse() {
    let points = random_points(1_200, 2, 55);
    let mut tree = RStarTree::in_memory(test_config(2).leaf_capacity(5).dir_capacity(5).build().unwrap())
        .unwrap();
    for (i, p) in points.iter().enumerate() {
        tree.insert(i as ObjectId, p).unwrap();
    }
    assert!(tree.height() >= 3);

    // delete in reverse so whole subtrees dissolve
    for i in (0..points.len()).rev() {
        assert!(tree.delete(i as ObjectId).unwrap());
    }
    assert!(tree.is_empty());
    assert_eq!(tree.height(), 0);
    assert_eq!(tree.root_page(), 0);
    assert!(tree.knn_search(&[1.0, 1.0], 4).unwrap().is_empty());

    for (i, p) in points.iter().enumerate().take(100) {
        tree.insert(i as ObjectId, p).unwrap();
    }
    assert_eq!(tree.len(), 100);
    assert!(tree.check_integrity().unwrap().is_valid);
}

#[test]
fn test_height_shrinks_after_mass_delete() {
    let points = random_points(2_000, 2, 56);
    let mut tree = RStarTree::in_memory(test_config(2).leaf_capacity(4).dir_capacity(4).build().unwrap())
        .unwrap();
    for (i, p) in points.iter().enumerate() {
        tree.insert(i as ObjectId, p).unwrap();
    }
    let tall = tree.height();

    for i in 10..points.len() {
        assert!(tree.delete_at(i as ObjectId, &points[i]).unwrap());
    }
    assert_eq!(tree.len(), 10);
    assert!(tree.height() < tall);
    let report = tree.check_integrity().unwrap();
    assert!(report.is_valid, "{}", report);
}
