//! Bottom-up bulk loading.

use spatial_rstar::{BulkSplit, ObjectId, RStarTree, SpatialError, VectorRelation};
use spatial_rstar_int_test::test_util::{
    brute_force_knn, brute_force_range, clustered_points, enumerated, random_points, relation_of,
    test_config,
};

const STRATEGIES: [BulkSplit; 5] = [
    BulkSplit::SortTileRecursive,
    BulkSplit::OneDimSort,
    BulkSplit::MaxExtension,
    BulkSplit::FileOrder,
    BulkSplit::HilbertSort,
];

#[test]
fn test_every_strategy_answers_like_a_scan() {
    let points = random_points(4_000, 3, 900);
    let relation = relation_of(&points).unwrap();
    let queries = random_points(10, 3, 901);

    for strategy in STRATEGIES {
        let config = test_config(3).bulk_split(strategy).build().unwrap();
        let mut tree = RStarTree::in_memory(config).unwrap();
        tree.bulk_load(&relation).unwrap();

        assert_eq!(tree.len(), points.len() as u64, "{:?}", strategy);
        let report = tree.check_integrity().unwrap();
        assert!(report.is_valid, "{:?}: {}", strategy, report);
        assert_eq!(report.leaf_entries, points.len() as u64);

        let distance = tree.distance().clone();
        for q in &queries {
            assert_eq!(
                tree.knn_search(q, 12).unwrap(),
                brute_force_knn(enumerated(&points), distance.as_ref(), q, 12),
                "{:?}",
                strategy
            );
            assert_eq!(
                tree.range_search(q, 9.0).unwrap(),
                brute_force_range(enumerated(&points), distance.as_ref(), q, 9.0),
                "{:?}",
                strategy
            );
        }
    }
}

#[test]
fn test_bulk_loaded_tree_is_not_taller_than_incremental() {
    let points = clustered_points(3_000, 2, 902);
    let relation = relation_of(&points).unwrap();

    let mut incremental = RStarTree::in_memory(test_config(2).build().unwrap()).unwrap();
    for (id, p) in enumerated(&points) {
        incremental.insert(id, p).unwrap();
    }

    let mut bulk = RStarTree::in_memory(test_config(2).build().unwrap()).unwrap();
    bulk.bulk_load(&relation).unwrap();

    assert!(bulk.height() <= incremental.height());
    for q in random_points(10, 2, 903) {
        assert_eq!(bulk.knn_search(&q, 7).unwrap(), incremental.knn_search(&q, 7).unwrap());
    }
}

#[test]
fn test_bulk_load_keeps_explicit_ids() {
    let mut relation = VectorRelation::new(2);
    for i in 0..500u64 {
        let id: ObjectId = 1_000_000 + i * 7;
        relation.push(id, vec![i as f64, (i % 10) as f64]).unwrap();
    }

    let mut tree = RStarTree::in_memory(test_config(2).build().unwrap()).unwrap();
    tree.bulk_load(&relation).unwrap();

    let nearest = tree.knn_search(&[3.0, 3.0], 1).unwrap();
    assert_eq!(nearest, vec![(1_000_021, 0.0)]);
    assert!(tree.delete(1_000_021).unwrap());
    assert_eq!(tree.len(), 499);
}

#[test]
fn test_empty_relation_leaves_tree_empty() {
    let mut tree = RStarTree::in_memory(test_config(2).build().unwrap()).unwrap();
    tree.bulk_load(&VectorRelation::new(2)).unwrap();

    assert!(tree.is_empty());
    assert_eq!(tree.root_page(), 0);

    // still usable for a later bulk load
    tree.bulk_load(&relation_of(&random_points(50, 2, 904)).unwrap())
        .unwrap();
    assert_eq!(tree.len(), 50);
}

#[test]
fn test_bulk_load_requires_empty_tree() {
    let mut tree = RStarTree::in_memory(test_config(2).build().unwrap()).unwrap();
    tree.insert(1, &[0.0, 0.0]).unwrap();

    let result = tree.bulk_load(&relation_of(&random_points(10, 2, 905)).unwrap());
    assert!(matches!(result, Err(SpatialError::InvalidOperation(_))));
    assert_eq!(tree.len(), 1);
}
