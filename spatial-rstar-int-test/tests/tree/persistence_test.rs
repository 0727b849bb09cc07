//! Persistent trees: create, close, reopen and keep working.

use spatial_rstar::{ObjectId, RStarTree, SpatialError, TreeConfig};
use spatial_rstar_int_test::test_util::{
    cleanup, create_test_context, random_points, relation_of, run_test, test_config, TestContext,
};

#[test]
fn test_bulk_load_round_trip_matches_memory_tree() {
    run_test(
        || create_test_context(2),
        |ctx| {
            let points = random_points(5_000, 2, 100);
            let relation = relation_of(&points)?;
            let queries = random_points(15, 2, 101);

            let mut memory = RStarTree::in_memory(ctx.config())?;
            memory.bulk_load(&relation)?;

            {
                let mut tree = ctx.create_tree("bulk.rstar")?;
                tree.bulk_load(&relation)?;
                tree.close()?;
            }

            let reopened = ctx.open_tree("bulk.rstar")?;
            assert_eq!(reopened.len(), memory.len());
            assert_eq!(reopened.height(), memory.height());
            for q in &queries {
                assert_eq!(reopened.knn_search(q, 9)?, memory.knn_search(q, 9)?);
                assert_eq!(reopened.range_search(q, 4.0)?, memory.range_search(q, 4.0)?);
            }
            assert!(reopened.check_integrity()?.is_valid);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_reopen_and_continue_inserting() {
    run_test(
        || create_test_context(3),
        |ctx| {
            let points = random_points(3_000, 3, 200);
            {
                let mut tree = ctx.create_tree("grow.rstar")?;
                for (i, p) in points[..1_500].iter().enumerate() {
                    tree.insert(i as ObjectId, p)?;
                }
                tree.close()?;
            }
            {
                let mut tree = ctx.open_tree("grow.rstar")?;
                assert_eq!(tree.len(), 1_500);
                for (i, p) in points.iter().enumerate().skip(1_500) {
                    tree.insert(i as ObjectId, p)?;
                }
                for i in (0..3_000).step_by(3) {
                    assert!(tree.delete(i as ObjectId)?);
                }
                // dropped without close: the drop flush persists everything
            }

            let tree = ctx.open_tree("grow.rstar")?;
            assert_eq!(tree.len(), 2_000);
            let report = tree.check_integrity()?;
            assert!(report.is_valid, "{}", report);

            let mut ids: Vec<ObjectId> = tree
                .range_search(&[50.0, 50.0, 50.0], 1_000.0)?
                .into_iter()
                .map(|(id, _)| id)
                .collect();
            ids.sort_unstable();
            let expected: Vec<ObjectId> = (0..3_000).filter(|i| i % 3 != 0).collect();
            assert_eq!(ids, expected);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_tiny_cache_still_answers_correctly() {
    run_test(
        || {
            TestContext::new(
                test_config(2)
                    .cache_size(3 * 1024)
                    .extra_integrity_checks(false)
                    .build()?,
            )
        },
        |ctx| {
            let points = random_points(2_000, 2, 300);
            let mut tree = ctx.create_tree("tiny.rstar")?;
            let mut memory = RStarTree::in_memory(ctx.config())?;
            for (i, p) in points.iter().enumerate() {
                tree.insert(i as ObjectId, p)?;
                memory.insert(i as ObjectId, p)?;
            }

            for q in random_points(10, 2, 301) {
                assert_eq!(tree.knn_search(&q, 5)?, memory.knn_search(&q, 5)?);
            }
            let stats = tree.statistics().page_file;
            assert!(stats.resident_pages <= 3);
            assert!(stats.cache_misses > 0);
            assert!(stats.writes > 0);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_open_with_wrong_settings() {
    run_test(
        || create_test_context(2),
        |ctx| {
            ctx.create_tree("settings.rstar")?.close()?;

            let other_page_size = test_config(2).page_size(2048).build()?;
            assert!(matches!(
                RStarTree::open(ctx.path("settings.rstar"), other_page_size),
                Err(SpatialError::Config(_))
            ));

            let other_dimensionality = test_config(4).build()?;
            assert!(matches!(
                RStarTree::open(ctx.path("settings.rstar"), other_dimensionality),
                Err(SpatialError::DimensionMismatch { .. })
            ));

            let config = TreeConfig::builder().dimensionality(2).build()?;
            assert!(matches!(
                RStarTree::open(ctx.path("missing.rstar"), config),
                Err(SpatialError::Io(_))
            ));
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_clear_persists_empty_tree() {
    run_test(
        || create_test_context(2),
        |ctx| {
            {
                let mut tree = ctx.create_tree("clear.rstar")?;
                for (i, p) in random_points(500, 2, 400).iter().enumerate() {
                    tree.insert(i as ObjectId, p)?;
                }
                tree.clear()?;
                tree.insert(7, &[1.0, 2.0])?;
                tree.close()?;
            }
            let tree = ctx.open_tree("clear.rstar")?;
            assert_eq!(tree.len(), 1);
            assert_eq!(tree.height(), 0);
            assert_eq!(tree.knn_search(&[0.0, 0.0], 3)?, vec![(7, 5f64.sqrt())]);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}
