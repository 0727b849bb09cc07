//! Range and k-NN answers compared with linear scans.

use spatial_rstar::{
    ManhattanDistance, MaximumDistance, Metric, ObjectId, RStarTree, SpatialDistance, TreeConfig,
};
use spatial_rstar_int_test::test_util::{
    brute_force_knn, brute_force_range, clustered_points, enumerated, random_points, test_config,
};
use std::sync::Arc;

fn build_tree(points: &[Vec<f64>], config: TreeConfig) -> spatial_rstar::MemoryRStarTree {
    let mut tree = RStarTree::in_memory(config).unwrap();
    for (i, p) in points.iter().enumerate() {
        tree.insert(i as ObjectId, p).unwrap();
    }
    tree
}

#[test]
fn test_knn_matches_linear_scan_in_3d() {
    let points = random_points(10_000, 3, 2024);
    let config = TreeConfig::builder()
        .dimensionality(3)
        .leaf_capacity(20)
        .dir_capacity(20)
        .build()
        .unwrap();
    let tree = build_tree(&points, config);

    // ceil(log_20(10000 / 20)) + 1
    let bound = ((10_000.0f64 / 20.0).ln() / 20f64.ln()).ceil() as usize + 1;
    assert!(tree.height() <= bound, "height {} > {}", tree.height(), bound);

    let distance = tree.distance().clone();
    let query = [50.0, 50.0, 50.0];
    let expected = brute_force_knn(enumerated(&points), distance.as_ref(), &query, 5);
    assert_eq!(tree.knn_search(&query, 5).unwrap(), expected);

    for q in random_points(25, 3, 7) {
        for k in [1, 3, 10, 40] {
            let expected = brute_force_knn(enumerated(&points), distance.as_ref(), &q, k);
            assert_eq!(tree.knn_search(&q, k).unwrap(), expected, "k = {}", k);
        }
    }
}

#[test]
fn test_range_matches_linear_scan() {
    let points = random_points(4_000, 2, 31);
    let tree = build_tree(&points, test_config(2).build().unwrap());
    let distance = tree.distance().clone();

    for q in random_points(20, 2, 32) {
        for radius in [0.0, 0.5, 3.0, 12.5, 40.0] {
            let expected = brute_force_range(enumerated(&points), distance.as_ref(), &q, radius);
            assert_eq!(tree.range_search(&q, radius).unwrap(), expected, "radius {}", radius);
        }
    }
}

#[test]
fn test_clustered_data_with_duplicates() {
    let mut points = clustered_points(3_000, 2, 5);
    // exact duplicates force ties that must resolve by id
    points.extend(points[..200].to_vec());
    let tree = build_tree(&points, test_config(2).build().unwrap());
    assert!(tree.check_integrity().unwrap().is_valid);

    let distance = tree.distance().clone();
    for q in points.iter().step_by(97) {
        let expected = brute_force_knn(enumerated(&points), distance.as_ref(), q, 6);
        assert_eq!(tree.knn_search(q, 6).unwrap(), expected);
    }
}

#[test]
fn test_configured_metric_is_used() {
    let points = random_points(2_000, 4, 8);
    for metric in [Metric::Manhattan, Metric::Maximum, Metric::SquaredEuclidean] {
        let tree = build_tree(&points, test_config(4).metric(metric).build().unwrap());
        let distance = metric.instance();
        for q in random_points(5, 4, 9) {
            assert_eq!(
                tree.knn_search(&q, 8).unwrap(),
                brute_force_knn(enumerated(&points), distance.as_ref(), &q, 8)
            );
            assert_eq!(
                tree.range_search(&q, 20.0).unwrap(),
                brute_force_range(enumerated(&points), distance.as_ref(), &q, 20.0)
            );
        }
    }
}

#[test]
fn test_searchers_with_explicit_distance() {
    let points = random_points(1_500, 2, 10);
    let tree = build_tree(&points, test_config(2).build().unwrap());

    let distances: Vec<Arc<dyn SpatialDistance>> =
        vec![Arc::new(ManhattanDistance), Arc::new(MaximumDistance)];
    for distance in distances {
        let knn = tree.knn_searcher(distance.clone());
        let range = tree.range_searcher(distance.clone());
        for q in random_points(5, 2, 11) {
            assert_eq!(
                knn.search(&q, 4).unwrap(),
                brute_force_knn(enumerated(&points), distance.as_ref(), &q, 4)
            );
            assert_eq!(
                range.search(&q, 6.0).unwrap(),
                brute_force_range(enumerated(&points), distance.as_ref(), &q, 6.0)
            );
        }
    }
}
