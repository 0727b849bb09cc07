//! Spatial distance functions consumed by the tree.
//!
//! The tree only ever needs two operations from a metric: the minimum
//! distance between two rectangles (used for pruning and, on degenerate
//! point rectangles, for exact distances) and the distance between the
//! centers of two rectangles (used by the reinsertion heuristics).

use std::fmt::Debug;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::rectangle::SpatialComparable;

/// Distance collaborator used by queries and reinsertion.
///
/// Implementations must be monotone in the per-axis gaps so that the
/// minimum distance to an MBR is a lower bound for the distance to every
/// object inside it.
pub trait SpatialDistance: Send + Sync + Debug {
    /// Distance between the closest points of `a` and `b`; zero if they
    /// overlap.
    fn min_distance(&self, a: &dyn SpatialComparable, b: &dyn SpatialComparable) -> f64;

    /// Distance between the centers of `a` and `b`.
    fn center_distance(&self, a: &dyn SpatialComparable, b: &dyn SpatialComparable) -> f64;
}

#[inline]
fn axis_gap(a: &dyn SpatialComparable, b: &dyn SpatialComparable, d: usize) -> f64 {
    if b.max(d) < a.min(d) {
        a.min(d) - b.max(d)
    } else if a.max(d) < b.min(d) {
        b.min(d) - a.max(d)
    } else {
        0.0
    }
}

#[inline]
fn center_gap(a: &dyn SpatialComparable, b: &dyn SpatialComparable, d: usize) -> f64 {
    (a.center_at(d) - b.center_at(d)).abs()
}

/// Sum of squared per-axis differences. Cheapest; preserves ordering of
/// Euclidean distances.
#[derive(Debug, Clone, Copy, Default)]
pub struct SquaredEuclideanDistance;

impl SpatialDistance for SquaredEuclideanDistance {
    fn min_distance(&self, a: &dyn SpatialComparable, b: &dyn SpatialComparable) -> f64 {
        debug_assert_eq!(a.dim(), b.dim());
        (0..a.dim())
            .map(|d| {
                let g = axis_gap(a, b, d);
                g * g
            })
            .sum()
    }

    fn center_distance(&self, a: &dyn SpatialComparable, b: &dyn SpatialComparable) -> f64 {
        (0..a.dim())
            .map(|d| {
                let g = center_gap(a, b, d);
                g * g
            })
            .sum()
    }
}

/// Euclidean (L2) distance.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanDistance;

impl SpatialDistance for EuclideanDistance {
    fn min_distance(&self, a: &dyn SpatialComparable, b: &dyn SpatialComparable) -> f64 {
        SquaredEuclideanDistance.min_distance(a, b).sqrt()
    }

    fn center_distance(&self, a: &dyn SpatialComparable, b: &dyn SpatialComparable) -> f64 {
        SquaredEuclideanDistance.center_distance(a, b).sqrt()
    }
}

/// Manhattan (L1) distance.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManhattanDistance;

impl SpatialDistance for ManhattanDistance {
    fn min_distance(&self, a: &dyn SpatialComparable, b: &dyn SpatialComparable) -> f64 {
        (0..a.dim()).map(|d| axis_gap(a, b, d)).sum()
    }

    fn center_distance(&self, a: &dyn SpatialComparable, b: &dyn SpatialComparable) -> f64 {
        (0..a.dim()).map(|d| center_gap(a, b, d)).sum()
    }
}

/// Maximum (L-infinity) distance.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaximumDistance;

impl SpatialDistance for MaximumDistance {
    fn min_distance(&self, a: &dyn SpatialComparable, b: &dyn SpatialComparable) -> f64 {
        (0..a.dim()).map(|d| axis_gap(a, b, d)).fold(0.0, f64::max)
    }

    fn center_distance(&self, a: &dyn SpatialComparable, b: &dyn SpatialComparable) -> f64 {
        (0..a.dim()).map(|d| center_gap(a, b, d)).fold(0.0, f64::max)
    }
}

/// Stock metrics selectable from [`TreeConfig`](crate::TreeConfig).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Metric {
    #[default]
    Euclidean,
    SquaredEuclidean,
    Manhattan,
    Maximum,
}

impl Metric {
    /// Shared instance of the metric.
    pub fn instance(&self) -> Arc<dyn SpatialDistance> {
        match self {
            Metric::Euclidean => Arc::new(EuclideanDistance),
            Metric::SquaredEuclidean => Arc::new(SquaredEuclideanDistance),
            Metric::Manhattan => Arc::new(ManhattanDistance),
            Metric::Maximum => Arc::new(MaximumDistance),
        }
    }
}
