//! Overflow treatment and reinsertion strategies.
//!
//! When a node exceeds its capacity the tree asks its [`OverflowTreatment`]
//! what to do. The R* policy ([`LimitedReinsertOverflowTreatment`]) evicts
//! and reinserts part of the entries the first time a level overflows during
//! one top-level insertion, and splits on every later overflow of that level.

use std::fmt::Debug;
use std::sync::Arc;

use crate::distance::{SpatialDistance, SquaredEuclideanDistance};
use crate::rectangle::{Rectangle, SpatialComparable};
use crate::rstar_tree::rtree_constants::DEFAULT_REINSERT_FRACTION;
use crate::rstar_tree::rtree_types::{Entry, Node, SpatialError, SpatialResult};

/// Outcome of an overflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverflowAction {
    /// Remove the entries at these positions and reinsert them in this order.
    Reinsert(Vec<usize>),
    /// Split the node.
    Split,
}

/// Decides between reinsertion and split for an overflowing node.
pub trait OverflowTreatment: Send + Sync + Debug {
    /// Resets per-insertion state. Called once per top-level insertion.
    fn reinitialize(&mut self);

    /// `level` counts from the leaves (leaves are level 0).
    fn handle_overflow(
        &mut self,
        node: &Node,
        node_mbr: &Rectangle,
        level: usize,
        is_root: bool,
    ) -> OverflowAction;

    /// Number of reinsertions ordered so far.
    fn reinsertions_performed(&self) -> u64 {
        0
    }
}

/// Always split.
#[derive(Debug, Clone, Copy, Default)]
pub struct SplitOnlyOverflowTreatment;

impl OverflowTreatment for SplitOnlyOverflowTreatment {
    fn reinitialize(&mut self) {}

    fn handle_overflow(&mut self, _: &Node, _: &Rectangle, _: usize, _: bool) -> OverflowAction {
        OverflowAction::Split
    }
}

/// R* forced reinsertion, at most once per level and top-level insertion.
#[derive(Debug)]
pub struct LimitedReinsertOverflowTreatment {
    strategy: Box<dyn ReinsertStrategy>,
    reinserted: Vec<bool>,
    reinsertions: u64,
}

impl LimitedReinsertOverflowTreatment {
    pub fn new(strategy: Box<dyn ReinsertStrategy>) -> Self {
        Self {
            strategy,
            reinserted: Vec::new(),
            reinsertions: 0,
        }
    }

    /// Whether `level` already reinserted during the current insertion.
    pub fn has_reinserted(&self, level: usize) -> bool {
        self.reinserted.get(level).copied().unwrap_or(false)
    }
}

impl Default for LimitedReinsertOverflowTreatment {
    fn default() -> Self {
        Self::new(Box::new(CloseReinsert::default()))
    }
}

impl OverflowTreatment for LimitedReinsertOverflowTreatment {
    fn reinitialize(&mut self) {
        self.reinserted.iter_mut().for_each(|flag| *flag = false);
    }

    fn handle_overflow(
        &mut self,
        node: &Node,
        node_mbr: &Rectangle,
        level: usize,
        is_root: bool,
    ) -> OverflowAction {
        if is_root || self.has_reinserted(level) {
            return OverflowAction::Split;
        }
        if self.reinserted.len() <= level {
            self.reinserted.resize(level + 1, false);
        }
        self.reinserted[level] = true;

        let evicted = self.strategy.compute_reinserts(&node.entries, node_mbr);
        if evicted.is_empty() {
            return OverflowAction::Split;
        }
        self.reinsertions += 1;
        log::debug!(
            "Reinserting {} of {} entries of page {} (level {})",
            evicted.len(),
            node.len(),
            node.page_id,
            level
        );
        OverflowAction::Reinsert(evicted)
    }

    fn reinsertions_performed(&self) -> u64 {
        self.reinsertions
    }
}

/// Chooses which entries of an overflowing node get reinserted.
pub trait ReinsertStrategy: Send + Sync + Debug {
    /// Positions of the entries to evict, in reinsertion order.
    fn compute_reinserts(&self, entries: &[Entry], page: &Rectangle) -> Vec<usize>;
}

fn validate_fraction(fraction: f64) -> SpatialResult<()> {
    if fraction.is_nan() || fraction <= 0.0 || fraction >= 0.5 {
        return Err(SpatialError::Config(format!(
            "reinsert fraction must lie in (0, 0.5), got {}",
            fraction
        )));
    }
    Ok(())
}

/// Positions of the `ceil(fraction * n)` entries farthest from the page
/// center, closest first. Ties go to the lower position.
fn farthest_entries(
    entries: &[Entry],
    page: &Rectangle,
    fraction: f64,
    distance: &dyn SpatialDistance,
) -> Vec<usize> {
    let n = entries.len();
    if n < 2 {
        return Vec::new();
    }
    let count = ((fraction * n as f64).ceil() as usize).clamp(1, n - 1);

    let mut by_distance: Vec<(f64, usize)> = entries
        .iter()
        .enumerate()
        .map(|(i, e)| (distance.center_distance(e as &dyn SpatialComparable, page), i))
        .collect();
    by_distance.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

    by_distance[n - count..].iter().map(|&(_, i)| i).collect()
}

/// Evicts the entries farthest from the page center and reinserts them
/// closest first.
#[derive(Debug, Clone)]
pub struct CloseReinsert {
    fraction: f64,
    distance: Arc<dyn SpatialDistance>,
}

impl CloseReinsert {
    pub fn new(fraction: f64, distance: Arc<dyn SpatialDistance>) -> SpatialResult<Self> {
        validate_fraction(fraction)?;
        Ok(Self { fraction, distance })
    }
}

impl Default for CloseReinsert {
    fn default() -> Self {
        Self {
            fraction: DEFAULT_REINSERT_FRACTION,
            distance: Arc::new(SquaredEuclideanDistance),
        }
    }
}

impl ReinsertStrategy for CloseReinsert {
    fn compute_reinserts(&self, entries: &[Entry], page: &Rectangle) -> Vec<usize> {
        farthest_entries(entries, page, self.fraction, self.distance.as_ref())
    }
}

/// Evicts the entries farthest from the page center and reinserts them
/// farthest first.
#[derive(Debug, Clone)]
pub struct FarReinsert {
    fraction: f64,
    distance: Arc<dyn SpatialDistance>,
}

impl FarReinsert {
    pub fn new(fraction: f64, distance: Arc<dyn SpatialDistance>) -> SpatialResult<Self> {
        validate_fraction(fraction)?;
        Ok(Self { fraction, distance })
    }
}

impl Default for FarReinsert {
    fn default() -> Self {
        Self {
            fraction: DEFAULT_REINSERT_FRACTION,
            distance: Arc::new(SquaredEuclideanDistance),
        }
    }
}

impl ReinsertStrategy for FarReinsert {
    fn compute_reinserts(&self, entries: &[Entry], page: &Rectangle) -> Vec<usize> {
        let mut evicted = farthest_entries(entries, page, self.fraction, self.distance.as_ref());
        evicted.reverse();
        evicted
    }
}
