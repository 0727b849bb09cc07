//! Forced reinsertion as seen from the tree.

use spatial_rstar::{
    LimitedReinsertOverflowTreatment, Node, ObjectId, OverflowAction, OverflowTreatment,
    RStarTree, Rectangle, ReinsertPolicy,
};
use spatial_rstar_int_test::test_util::{enumerated, random_points, test_config};
use std::sync::{Arc, Mutex};

/// Levels that reinserted, one list per top-level insertion.
type ReinsertLog = Arc<Mutex<Vec<Vec<usize>>>>;

#[derive(Debug)]
struct RecordingTreatment {
    inner: LimitedReinsertOverflowTreatment,
    log: ReinsertLog,
    roots_reinserted: Arc<Mutex<u32>>,
}

impl OverflowTreatment for RecordingTreatment {
    fn reinitialize(&mut self) {
        self.inner.reinitialize();
        self.log.lock().unwrap().push(Vec::new());
    }

    fn handle_overflow(
        &mut self,
        node: &Node,
        node_mbr: &Rectangle,
        level: usize,
        is_root: bool,
    ) -> OverflowAction {
        let action = self.inner.handle_overflow(node, node_mbr, level, is_root);
        if let OverflowAction::Reinsert(_) = action {
            if is_root {
                *self.roots_reinserted.lock().unwrap() += 1;
            }
            if let Some(current) = self.log.lock().unwrap().last_mut() {
                current.push(level);
            }
        }
        action
    }

    fn reinsertions_performed(&self) -> u64 {
        self.inner.reinsertions_performed()
    }
}

#[test]
fn test_at_most_one_reinsertion_per_level_and_insert() {
    let log: ReinsertLog = Arc::default();
    let roots_reinserted = Arc::new(Mutex::new(0));
    let treatment = RecordingTreatment {
        inner: LimitedReinsertOverflowTreatment::default(),
        log: log.clone(),
        roots_reinserted: roots_reinserted.clone(),
    };

    let config = test_config(2).leaf_capacity(6).dir_capacity(6).build().unwrap();
    let mut tree = RStarTree::in_memory(config)
        .unwrap()
        .with_overflow_treatment(Box::new(treatment));
    let points = random_points(3_000, 2, 1_100);
    for (id, p) in enumerated(&points) {
        tree.insert(id, p).unwrap();
    }

    let log = log.lock().unwrap();
    assert_eq!(log.len(), points.len());
    for levels in log.iter() {
        let mut sorted = levels.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), levels.len(), "level reinserted twice: {:?}", levels);
    }

    // the per-level flags reset between insertions
    let leaf_reinserts = log.iter().filter(|levels| levels.contains(&0)).count();
    assert!(leaf_reinserts > 1);
    assert!(log.iter().any(|levels| levels.iter().any(|&level| level > 0)));

    assert_eq!(*roots_reinserted.lock().unwrap(), 0);
    assert_eq!(
        tree.statistics().reinsertions,
        log.iter().map(|levels| levels.len() as u64).sum::<u64>()
    );
    assert!(tree.check_integrity().unwrap().is_valid);
}

#[test]
fn test_close_and_far_reinsert_agree() {
    let points = random_points(2_500, 2, 1_200);
    let queries = random_points(12, 2, 1_201);

    let mut trees = Vec::new();
    for policy in [ReinsertPolicy::Close, ReinsertPolicy::Far] {
        let config = test_config(2)
            .leaf_capacity(8)
            .dir_capacity(8)
            .reinsert(policy)
            .reinsert_fraction(0.3)
            .build()
            .unwrap();
        let mut tree = RStarTree::in_memory(config).unwrap();
        for (id, p) in enumerated(&points) {
            tree.insert(id, p).unwrap();
        }
        let report = tree.check_integrity().unwrap();
        assert!(report.is_valid, "{:?}: {}", policy, report);
        assert!(tree.statistics().reinsertions > 0);
        trees.push(tree);
    }

    for q in &queries {
        let close: Vec<(ObjectId, f64)> = trees[0].knn_search(q, 10).unwrap();
        assert_eq!(close, trees[1].knn_search(q, 10).unwrap());
        assert_eq!(
            trees[0].range_search(q, 6.0).unwrap(),
            trees[1].range_search(q, 6.0).unwrap()
        );
    }
}
