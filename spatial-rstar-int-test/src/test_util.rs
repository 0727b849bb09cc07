use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use spatial_rstar::{
    ObjectId, PersistentRStarTree, RStarTree, SpatialDistance, SpatialResult, TreeConfig,
    TreeConfigBuilder, VectorRelation,
};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Runs `test` between `before` and `after`. `after` also runs when the test
/// fails, so temporary files are cleaned up either way.
pub fn run_test<T, B, A>(before: B, test: T, after: A)
where
    B: FnOnce() -> SpatialResult<TestContext>,
    T: FnOnce(TestContext) -> SpatialResult<()>,
    A: FnOnce(TestContext) -> SpatialResult<()>,
{
    let ctx = match before() {
        Ok(ctx) => ctx,
        Err(e) => panic!("Before run failed: {:?}", e),
    };

    let test_ctx = ctx.clone();
    let result = std::panic::catch_unwind(AssertUnwindSafe(move || test(test_ctx)));
    let after_result = after(ctx);

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => panic!("Test failed: {:?}", e),
        Err(panic) => std::panic::resume_unwind(panic),
    }
    if let Err(e) = after_result {
        panic!("After run failed: {:?}", e);
    }
}

/// Scratch directory plus the configuration a test builds its trees with.
#[derive(Clone)]
pub struct TestContext {
    dir: Arc<TempDir>,
    config: TreeConfig,
}

impl TestContext {
    pub fn new(config: TreeConfig) -> SpatialResult<Self> {
        Ok(Self {
            dir: Arc::new(TempDir::new()?),
            config,
        })
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Path of a file inside the scratch directory.
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn config(&self) -> TreeConfig {
        self.config.clone()
    }

    pub fn create_tree(&self, name: &str) -> SpatialResult<PersistentRStarTree> {
        RStarTree::create(self.path(name), self.config())
    }

    pub fn open_tree(&self, name: &str) -> SpatialResult<PersistentRStarTree> {
        RStarTree::open(self.path(name), self.config())
    }
}

/// Builder preset used by most tests: small pages so that even a few
/// thousand points produce a multi-level tree.
pub fn test_config(dimensionality: usize) -> TreeConfigBuilder {
    TreeConfig::builder()
        .dimensionality(dimensionality)
        .page_size(1024)
        .cache_size(32 * 1024)
        .extra_integrity_checks(true)
}

pub fn create_test_context(dimensionality: usize) -> SpatialResult<TestContext> {
    TestContext::new(test_config(dimensionality).build()?)
}

pub fn cleanup(ctx: TestContext) -> SpatialResult<()> {
    // the directory goes away with the last clone of the context
    log::debug!("Cleaning up {}", ctx.dir().display());
    Ok(())
}

/// Uniform points in `[0, 100)^dimensionality`.
pub fn random_points(n: usize, dimensionality: usize, seed: u64) -> Vec<Vec<f64>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            (0..dimensionality)
                .map(|_| rng.gen_range(0.0..100.0))
                .collect()
        })
        .collect()
}

/// Points gathered around a handful of random centers.
pub fn clustered_points(n: usize, dimensionality: usize, seed: u64) -> Vec<Vec<f64>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let centers = random_points(8, dimensionality, seed.wrapping_add(1));
    (0..n)
        .map(|i| {
            centers[i % centers.len()]
                .iter()
                .map(|c| c + rng.gen_range(-1.5..1.5))
                .collect()
        })
        .collect()
}

pub fn relation_of(points: &[Vec<f64>]) -> SpatialResult<VectorRelation> {
    let dimensionality = points.first().map_or(0, Vec::len);
    VectorRelation::from_rows(dimensionality, points.to_vec())
}

fn sorted(mut results: Vec<(ObjectId, f64)>) -> Vec<(ObjectId, f64)> {
    results.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
    results
}

/// Exhaustive range query over `(id, point)` pairs.
pub fn brute_force_range<'a>(
    points: impl IntoIterator<Item = (ObjectId, &'a Vec<f64>)>,
    distance: &dyn SpatialDistance,
    query: &[f64],
    radius: f64,
) -> Vec<(ObjectId, f64)> {
    sorted(
        points
            .into_iter()
            .map(|(id, p)| (id, distance.min_distance(&query, p)))
            .filter(|(_, d)| *d <= radius)
            .collect(),
    )
}

/// Exhaustive k-NN query over `(id, point)` pairs.
pub fn brute_force_knn<'a>(
    points: impl IntoIterator<Item = (ObjectId, &'a Vec<f64>)>,
    distance: &dyn SpatialDistance,
    query: &[f64],
    k: usize,
) -> Vec<(ObjectId, f64)> {
    let mut all = sorted(
        points
            .into_iter()
            .map(|(id, p)| (id, distance.min_distance(&query, p)))
            .collect(),
    );
    all.truncate(k);
    all
}

/// `(id, point)` pairs with positional ids.
pub fn enumerated(points: &[Vec<f64>]) -> impl Iterator<Item = (ObjectId, &Vec<f64>)> + '_ {
    points.iter().enumerate().map(|(i, p)| (i as ObjectId, p))
}
