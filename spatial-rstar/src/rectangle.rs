//! Axis-aligned minimum bounding rectangles and the MBR algebra used by the tree.
//!
//! Everything here is generic over [`SpatialComparable`] so that leaf points
//! (`[f64]`), directory MBRs ([`Rectangle`]) and tree entries can be mixed
//! without materializing degenerate rectangles for every point.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::rstar_tree::{SpatialError, SpatialResult};

/// Anything with a per-dimension lower and upper bound.
pub trait SpatialComparable {
    /// Number of dimensions.
    fn dim(&self) -> usize;

    /// Lower bound in dimension `d`.
    fn min(&self, d: usize) -> f64;

    /// Upper bound in dimension `d`.
    fn max(&self, d: usize) -> f64;

    /// Midpoint of the extent in dimension `d`.
    fn center_at(&self, d: usize) -> f64 {
        (self.min(d) + self.max(d)) * 0.5
    }
}

impl SpatialComparable for [f64] {
    fn dim(&self) -> usize {
        self.len()
    }

    fn min(&self, d: usize) -> f64 {
        self[d]
    }

    fn max(&self, d: usize) -> f64 {
        self[d]
    }
}

impl SpatialComparable for &[f64] {
    fn dim(&self) -> usize {
        self.len()
    }

    fn min(&self, d: usize) -> f64 {
        self[d]
    }

    fn max(&self, d: usize) -> f64 {
        self[d]
    }
}

impl SpatialComparable for Vec<f64> {
    fn dim(&self) -> usize {
        self.len()
    }

    fn min(&self, d: usize) -> f64 {
        self[d]
    }

    fn max(&self, d: usize) -> f64 {
        self[d]
    }
}

/// A D-dimensional axis-aligned rectangle.
///
/// Invariant: `min[i] <= max[i]` for every dimension. The public
/// constructor rejects inverted bounds and non-finite coordinates; the
/// internal union operations preserve the invariant by construction.
///
/// # Examples
///
/// ```rust
/// use spatial_rstar::Rectangle;
///
/// let a = Rectangle::point(&[0.0, 0.0]);
/// let b = Rectangle::point(&[10.0, 10.0]);
/// let mbr = a.union(&b);
/// assert_eq!(mbr.area(), 100.0);
/// assert_eq!(mbr.margin(), 20.0);
/// ```
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Rectangle {
    min: Vec<f64>,
    max: Vec<f64>,
}

impl SpatialComparable for Rectangle {
    fn dim(&self) -> usize {
        self.min.len()
    }

    fn min(&self, d: usize) -> f64 {
        self.min[d]
    }

    fn max(&self, d: usize) -> f64 {
        self.max[d]
    }
}

impl fmt::Display for Rectangle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rectangle({:?} .. {:?})", self.min, self.max)
    }
}

impl Rectangle {
    /// Creates a rectangle from its lower and upper corners.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::DimensionMismatch`] if the corners differ in
    /// length and [`SpatialError::Config`] for empty, non-finite or
    /// inverted bounds.
    pub fn new(min: Vec<f64>, max: Vec<f64>) -> SpatialResult<Self> {
        if min.len() != max.len() {
            return Err(SpatialError::DimensionMismatch {
                expected: min.len(),
                actual: max.len(),
            });
        }
        if min.is_empty() {
            return Err(SpatialError::Config("rectangle must have at least one dimension".into()));
        }
        for d in 0..min.len() {
            if !min[d].is_finite() || !max[d].is_finite() {
                return Err(SpatialError::Config(format!(
                    "non-finite bound in dimension {}",
                    d
                )));
            }
            if min[d] > max[d] {
                return Err(SpatialError::Config(format!(
                    "inverted bounds in dimension {}: {} > {}",
                    d, min[d], max[d]
                )));
            }
        }
        Ok(Self { min, max })
    }

    /// Degenerate rectangle covering exactly one point.
    pub fn point(coords: &[f64]) -> Self {
        Self {
            min: coords.to_vec(),
            max: coords.to_vec(),
        }
    }

    /// Copies the bounds of any spatial object.
    pub fn from_comparable<T: SpatialComparable + ?Sized>(obj: &T) -> Self {
        let dim = obj.dim();
        Self {
            min: (0..dim).map(|d| obj.min(d)).collect(),
            max: (0..dim).map(|d| obj.max(d)).collect(),
        }
    }

    /// Tight bounding rectangle of a non-empty collection, `None` if empty.
    pub fn union_all<'a, T, I>(items: I) -> Option<Self>
    where
        T: SpatialComparable + ?Sized + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        let mut iter = items.into_iter();
        let mut mbr = Self::from_comparable(iter.next()?);
        for item in iter {
            mbr.extend(item);
        }
        Some(mbr)
    }

    pub fn dimensionality(&self) -> usize {
        self.min.len()
    }

    pub fn min_coords(&self) -> &[f64] {
        &self.min
    }

    pub fn max_coords(&self) -> &[f64] {
        &self.max
    }

    /// Smallest rectangle containing both `self` and `other`.
    pub fn union<T: SpatialComparable + ?Sized>(&self, other: &T) -> Rectangle {
        let mut merged = self.clone();
        merged.extend(other);
        merged
    }

    /// Grows this rectangle in place to also cover `other`.
    pub fn extend<T: SpatialComparable + ?Sized>(&mut self, other: &T) {
        debug_assert_eq!(self.dim(), other.dim());
        for d in 0..self.min.len() {
            self.min[d] = self.min[d].min(other.min(d));
            self.max[d] = self.max[d].max(other.max(d));
        }
    }

    /// Volume (area in 2-D) of the rectangle.
    pub fn area(&self) -> f64 {
        volume(self)
    }

    /// Sum of the side lengths (half the perimeter in 2-D).
    pub fn margin(&self) -> f64 {
        margin(self)
    }

    /// Volume increase needed to also cover `other`.
    pub fn enlargement<T: SpatialComparable + ?Sized>(&self, other: &T) -> f64 {
        volume_union(self, other) - self.area()
    }

    pub fn intersects<T: SpatialComparable + ?Sized>(&self, other: &T) -> bool {
        intersects(self, other)
    }

    pub fn contains<T: SpatialComparable + ?Sized>(&self, other: &T) -> bool {
        contains(self, other)
    }

    pub fn overlap<T: SpatialComparable + ?Sized>(&self, other: &T) -> f64 {
        overlap(self, other)
    }

    /// Center point of the rectangle.
    pub fn centroid(&self) -> Vec<f64> {
        (0..self.dim()).map(|d| self.center_at(d)).collect()
    }
}

/// Volume of a spatial object; zero for points.
pub fn volume<T: SpatialComparable + ?Sized>(obj: &T) -> f64 {
    (0..obj.dim()).map(|d| obj.max(d) - obj.min(d)).product()
}

/// Sum of the extents of a spatial object.
pub fn margin<T: SpatialComparable + ?Sized>(obj: &T) -> f64 {
    (0..obj.dim()).map(|d| obj.max(d) - obj.min(d)).sum()
}

/// Volume of the union rectangle of two objects without allocating it.
pub fn volume_union<A, B>(a: &A, b: &B) -> f64
where
    A: SpatialComparable + ?Sized,
    B: SpatialComparable + ?Sized,
{
    (0..a.dim())
        .map(|d| a.max(d).max(b.max(d)) - a.min(d).min(b.min(d)))
        .product()
}

/// Closed-interval intersection test.
pub fn intersects<A, B>(a: &A, b: &B) -> bool
where
    A: SpatialComparable + ?Sized,
    B: SpatialComparable + ?Sized,
{
    (0..a.dim()).all(|d| a.min(d) <= b.max(d) && b.min(d) <= a.max(d))
}

/// True if `outer` covers `inner` in every dimension.
pub fn contains<A, B>(outer: &A, inner: &B) -> bool
where
    A: SpatialComparable + ?Sized,
    B: SpatialComparable + ?Sized,
{
    (0..outer.dim()).all(|d| outer.min(d) <= inner.min(d) && inner.max(d) <= outer.max(d))
}

/// Volume of the intersection of two objects, zero if disjoint.
pub fn overlap<A, B>(a: &A, b: &B) -> f64
where
    A: SpatialComparable + ?Sized,
    B: SpatialComparable + ?Sized,
{
    let mut vol = 1.0;
    for d in 0..a.dim() {
        let lo = a.min(d).max(b.min(d));
        let hi = a.max(d).min(b.max(d));
        if hi < lo {
            return 0.0;
        }
        vol *= hi - lo;
    }
    vol
}

/// Exact equality of bounds, used by the integrity checks.
pub fn same_bounds<A, B>(a: &A, b: &B) -> bool
where
    A: SpatialComparable + ?Sized,
    B: SpatialComparable + ?Sized,
{
    a.dim() == b.dim() && (0..a.dim()).all(|d| a.min(d) == b.min(d) && a.max(d) == b.max(d))
}
