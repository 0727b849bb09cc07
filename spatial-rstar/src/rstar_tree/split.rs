//! R* topological split.
//!
//! The split axis is the one whose candidate distributions have the smallest
//! total margin, summed over both the lower-bound and the upper-bound
//! sorting. On that axis the distribution with the least overlap wins, then
//! the one with the least total area, then the first one encountered.

use std::cmp::Ordering;

use crate::rectangle::{Rectangle, SpatialComparable};

/// Index sets of the two groups produced by a split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPartition {
    pub first: Vec<usize>,
    pub second: Vec<usize>,
}

/// Splits `items` into two groups of at least `min_fill` members each.
///
/// `min_fill` is clamped to `1..=n/2`, so a split of two or more items always
/// succeeds.
pub fn topological_split<T: SpatialComparable>(items: &[T], min_fill: usize) -> SplitPartition {
    let n = items.len();
    debug_assert!(n >= 2, "cannot split {} entries", n);
    let min_fill = min_fill.clamp(1, (n / 2).max(1));
    let dim = items[0].dim();

    let mut best_axis = 0;
    let mut best_margin = f64::INFINITY;
    for axis in 0..dim {
        let margin: f64 = [lower_sorting(items, axis), upper_sorting(items, axis)]
            .iter()
            .map(|sorting| {
                let bounds = PrefixBounds::new(items, sorting);
                (min_fill..=n - min_fill)
                    .map(|k| bounds.prefix(k).margin() + bounds.suffix(k).margin())
                    .sum::<f64>()
            })
            .sum();
        if margin < best_margin {
            best_margin = margin;
            best_axis = axis;
        }
    }

    let mut best: Option<(Vec<usize>, usize)> = None;
    let mut best_overlap = f64::INFINITY;
    let mut best_area = f64::INFINITY;
    for sorting in [lower_sorting(items, best_axis), upper_sorting(items, best_axis)] {
        let bounds = PrefixBounds::new(items, &sorting);
        for k in min_fill..=n - min_fill {
            let (left, right) = (bounds.prefix(k), bounds.suffix(k));
            let overlap = left.overlap(right);
            let area = left.area() + right.area();
            if overlap < best_overlap || (overlap == best_overlap && area < best_area) {
                best_overlap = overlap;
                best_area = area;
                best = Some((sorting.clone(), k));
            }
        }
    }

    // every candidate has finite overlap and area, so `best` is set
    let (sorting, k) = best.unwrap_or_else(|| ((0..n).collect(), n / 2));
    log::trace!(
        "Split {} entries on axis {} at {} (overlap {}, area {})",
        n,
        best_axis,
        k,
        best_overlap,
        best_area
    );
    SplitPartition {
        first: sorting[..k].to_vec(),
        second: sorting[k..].to_vec(),
    }
}

fn lower_sorting<T: SpatialComparable>(items: &[T], axis: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..items.len()).collect();
    order.sort_by(|&a, &b| {
        compare(items[a].min(axis), items[b].min(axis))
            .then_with(|| compare(items[a].max(axis), items[b].max(axis)))
    });
    order
}

fn upper_sorting<T: SpatialComparable>(items: &[T], axis: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..items.len()).collect();
    order.sort_by(|&a, &b| {
        compare(items[a].max(axis), items[b].max(axis))
            .then_with(|| compare(items[a].min(axis), items[b].min(axis)))
    });
    order
}

#[inline]
fn compare(a: f64, b: f64) -> Ordering {
    a.total_cmp(&b)
}

/// MBRs of every prefix and suffix of one sorting.
struct PrefixBounds {
    /// `prefix[k - 1]` covers the first `k` items
    prefix: Vec<Rectangle>,
    /// `suffix[k]` covers the items from position `k` on
    suffix: Vec<Rectangle>,
}

impl PrefixBounds {
    fn new<T: SpatialComparable>(items: &[T], sorting: &[usize]) -> Self {
        let n = sorting.len();
        let mut prefix = Vec::with_capacity(n);
        let mut acc = Rectangle::from_comparable(&items[sorting[0]]);
        prefix.push(acc.clone());
        for &i in &sorting[1..] {
            acc.extend(&items[i]);
            prefix.push(acc.clone());
        }

        let mut suffix = vec![Rectangle::from_comparable(&items[sorting[n - 1]]); n];
        for pos in (0..n - 1).rev() {
            suffix[pos] = suffix[pos + 1].union(&items[sorting[pos]]);
        }
        Self { prefix, suffix }
    }

    fn prefix(&self, k: usize) -> &Rectangle {
        &self.prefix[k - 1]
    }

    fn suffix(&self, k: usize) -> &Rectangle {
        &self.suffix[k]
    }
}
