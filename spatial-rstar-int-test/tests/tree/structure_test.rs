//! Shape of the tree: splits, root growth, balance and MBR tightness.

use spatial_rstar::{
    Entry, ObjectId, OverflowPolicy, RStarTree, Rectangle, SpatialComparable, SpatialError,
    TreeConfig,
};
use spatial_rstar_int_test::test_util::{random_points, test_config};

#[test]
fn test_three_point_split() {
    let config = TreeConfig::builder()
        .dimensionality(2)
        .leaf_capacity(2)
        .dir_capacity(2)
        .overflow(OverflowPolicy::SplitOnly)
        .extra_integrity_checks(true)
        .build()
        .unwrap();
    let mut tree = RStarTree::in_memory(config).unwrap();
    tree.insert(0, &[0.0, 0.0]).unwrap();
    tree.insert(1, &[10.0, 10.0]).unwrap();
    tree.insert(2, &[5.0, 5.0]).unwrap();
    assert_eq!(tree.height(), 1);

    let root = tree.read_node(tree.root_page()).unwrap();
    assert!(!root.is_leaf());
    assert_eq!(root.len(), 2);

    let root_mbr = root.compute_mbr().unwrap();
    assert_eq!(
        root_mbr,
        Rectangle::new(vec![0.0, 0.0], vec![10.0, 10.0]).unwrap()
    );

    let leaf_mbrs: Vec<Rectangle> = root
        .entries
        .iter()
        .map(|entry| match entry {
            Entry::Directory { mbr, .. } => mbr.clone(),
            Entry::Leaf { .. } => panic!("object entry in a directory"),
        })
        .collect();
    // the split never produces overlapping leaves for three collinear points
    assert_eq!(leaf_mbrs[0].overlap(&leaf_mbrs[1]), 0.0);
    assert!(leaf_mbrs.iter().all(|mbr| mbr.dim() == 2));
}

#[test]
fn test_every_leaf_at_same_depth() {
    let mut tree = RStarTree::in_memory(test_config(2).leaf_capacity(6).dir_capacity(5).build().unwrap())
        .unwrap();
    for (i, p) in random_points(3_000, 2, 1).iter().enumerate() {
        tree.insert(i as ObjectId, p).unwrap();
        if i % 500 == 499 {
            let report = tree.check_integrity().unwrap();
            assert!(report.is_valid, "{}", report);
            assert_eq!(report.max_leaf_depth as usize, tree.height());
            assert_eq!(report.leaf_entries, (i + 1) as u64);
        }
    }
    assert!(tree.height() >= 3);
}

#[test]
fn test_directory_mbrs_are_tight() {
    let mut tree = RStarTree::in_memory(test_config(3).build().unwrap()).unwrap();
    for (i, p) in random_points(2_000, 3, 2).iter().enumerate() {
        tree.insert(i as ObjectId, p).unwrap();
    }

    let mut pending = vec![tree.root_page()];
    let mut directories = 0;
    while let Some(page_id) = pending.pop() {
        let node = tree.read_node(page_id).unwrap();
        for entry in &node.entries {
            if let Entry::Directory { child, mbr } = entry {
                let child_node = tree.read_node(*child).unwrap();
                assert_eq!(&child_node.compute_mbr().unwrap(), mbr);
                pending.push(*child);
                directories += 1;
            }
        }
    }
    assert!(directories > 0);
}

#[test]
fn test_invalid_input_is_rejected() {
    let mut tree = RStarTree::in_memory(test_config(2).build().unwrap()).unwrap();
    assert!(matches!(
        tree.insert(1, &[1.0]),
        Err(SpatialError::DimensionMismatch {
            expected: 2,
            actual: 1
        })
    ));
    assert!(matches!(
        tree.insert(1, &[f64::NAN, 1.0]),
        Err(SpatialError::Config(_))
    ));
    assert!(matches!(
        tree.range_search(&[0.0, 0.0], -0.5),
        Err(SpatialError::Config(_))
    ));
    assert!(tree.is_empty());

    assert!(TreeConfig::builder()
        .dimensionality(2)
        .reinsert_fraction(0.75)
        .build()
        .is_err());
    assert!(TreeConfig::builder().dimensionality(0).build().is_err());
    assert!(TreeConfig::builder()
        .dimensionality(2)
        .leaf_capacity(1)
        .build()
        .is_err());
}

#[test]
fn test_capacity_exhaustion_is_fatal() {
    let config = test_config(2)
        .leaf_capacity(4)
        .dir_capacity(4)
        .max_pages(8)
        .build()
        .unwrap();
    let mut tree = RStarTree::in_memory(config).unwrap();

    let mut inserted = 0;
    let error = loop {
        match tree.insert(inserted, &[inserted as f64, (inserted % 5) as f64]) {
            Ok(()) => inserted += 1,
            Err(e) => break e,
        }
        assert!(inserted < 1_000, "page limit never reached");
    };
    assert!(matches!(error, SpatialError::CapacityExhausted { max_pages: 8 }));
    assert!(tree.is_poisoned());
    assert!(matches!(
        tree.knn_search(&[0.0, 0.0], 1),
        Err(SpatialError::Poisoned)
    ));
    assert!(matches!(
        tree.insert(10_000, &[0.0, 0.0]),
        Err(SpatialError::Poisoned)
    ));
}
