//! Bulk-load partitioning.
//!
//! A [`BulkSplit`] cuts a list of spatial objects into groups of at most
//! `max_entries` members; each group becomes one node. The tree applies it
//! once for the leaves and then once per directory level.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::rectangle::{Rectangle, SpatialComparable};

/// Partitioning strategy for bulk loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BulkSplit {
    /// Sort-Tile-Recursive: slice the data along each axis in turn.
    #[default]
    SortTileRecursive,
    /// Sort by the center on the first axis, then cut into even chunks.
    OneDimSort,
    /// Repeatedly sort along the axis of largest extension and peel off a
    /// node's worth of entries.
    MaxExtension,
    /// Keep the input order and cut into even chunks.
    FileOrder,
    /// Sort the centers along a Hilbert curve laid over the data MBR, then
    /// cut into even chunks.
    HilbertSort,
}

impl BulkSplit {
    /// Cuts `items` into groups of at most `max_entries` members.
    ///
    /// Groups are non-empty and every input item ends up in exactly one group.
    pub fn partition<T: SpatialComparable>(
        &self,
        items: Vec<T>,
        min_entries: usize,
        max_entries: usize,
    ) -> Vec<Vec<T>> {
        let max_entries = max_entries.max(1);
        if items.is_empty() {
            return Vec::new();
        }
        match self {
            BulkSplit::FileOrder => trivial_partition(items, max_entries),
            BulkSplit::OneDimSort => {
                let mut items = items;
                sort_by_center(&mut items, 0);
                trivial_partition(items, max_entries)
            }
            BulkSplit::MaxExtension => max_extension_partition(items, min_entries, max_entries),
            BulkSplit::HilbertSort => trivial_partition(hilbert_sort(items), max_entries),
            BulkSplit::SortTileRecursive => {
                let dim = items[0].dim();
                let mut groups = Vec::new();
                str_partition(items, 0, dim, max_entries, &mut groups);
                groups
            }
        }
    }
}

fn sort_by_center<T: SpatialComparable>(items: &mut [T], axis: usize) {
    items.sort_by(|a, b| a.center_at(axis).total_cmp(&b.center_at(axis)));
}

fn sort_by_min<T: SpatialComparable>(items: &mut [T], axis: usize) {
    items.sort_by(|a, b| match a.min(axis).total_cmp(&b.min(axis)) {
        Ordering::Equal => a.max(axis).total_cmp(&b.max(axis)),
        other => other,
    });
}

/// Bits per axis of the Hilbert grid.
const HILBERT_ORDER: u32 = 16;

/// Orders `items` by the Hilbert index of their centers, normalized to the
/// MBR of all items. Items in the same grid cell keep their input order.
fn hilbert_sort<T: SpatialComparable>(items: Vec<T>) -> Vec<T> {
    let Some(bounds) = Rectangle::union_all(items.iter()) else {
        return items;
    };
    let cells = ((1u64 << HILBERT_ORDER) - 1) as f64;

    let mut keyed: Vec<(Vec<u64>, T)> = items
        .into_iter()
        .map(|item| {
            let grid = (0..bounds.dim())
                .map(|d| {
                    let extent = bounds.max(d) - bounds.min(d);
                    if extent > 0.0 {
                        let t = ((item.center_at(d) - bounds.min(d)) / extent).clamp(0.0, 1.0);
                        (t * cells).round() as u32
                    } else {
                        0
                    }
                })
                .collect();
            (hilbert_key(grid, HILBERT_ORDER), item)
        })
        .collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    keyed.into_iter().map(|(_, item)| item).collect()
}

/// Hilbert index of a grid cell with `bits` bits per axis, packed most
/// significant bit first so that keys compare lexicographically.
///
/// Works in any number of dimensions: the coordinates are first brought
/// into the "transposed" Hilbert form (Skilling, 2004), whose bits are then
/// interleaved axis by axis.
fn hilbert_key(mut x: Vec<u32>, bits: u32) -> Vec<u64> {
    let n = x.len();
    if n == 0 || bits == 0 {
        return Vec::new();
    }
    let top = 1u32 << (bits - 1);

    // inverse undo
    let mut q = top;
    while q > 1 {
        let p = q - 1;
        for i in 0..n {
            if x[i] & q != 0 {
                x[0] ^= p;
            } else {
                let t = (x[0] ^ x[i]) & p;
                x[0] ^= t;
                x[i] ^= t;
            }
        }
        q >>= 1;
    }

    // gray encode
    for i in 1..n {
        x[i] ^= x[i - 1];
    }
    let mut t = 0;
    q = top;
    while q > 1 {
        if x[n - 1] & q != 0 {
            t ^= q - 1;
        }
        q >>= 1;
    }
    for v in &mut x {
        *v ^= t;
    }

    let mut key = vec![0u64; (n * bits as usize).div_ceil(64)];
    let mut pos = 0usize;
    for b in (0..bits).rev() {
        for v in &x {
            if (v >> b) & 1 == 1 {
                key[pos / 64] |= 1u64 << (63 - pos % 64);
            }
            pos += 1;
        }
    }
    key
}

/// `ceil(n / max_entries)` chunks whose sizes differ by at most one.
fn trivial_partition<T>(items: Vec<T>, max_entries: usize) -> Vec<Vec<T>> {
    let n = items.len();
    let groups = n.div_ceil(max_entries);
    let mut result = Vec::with_capacity(groups);
    let mut iter = items.into_iter();
    for g in 0..groups {
        let size = (g + 1) * n / groups - g * n / groups;
        result.push(iter.by_ref().take(size).collect());
    }
    result
}

fn str_partition<T: SpatialComparable>(
    mut items: Vec<T>,
    axis: usize,
    dim: usize,
    max_entries: usize,
    out: &mut Vec<Vec<T>>,
) {
    let n = items.len();
    if n <= max_entries {
        out.push(items);
        return;
    }
    sort_by_center(&mut items, axis);
    if axis + 1 >= dim {
        out.extend(trivial_partition(items, max_entries));
        return;
    }

    let pages = n.div_ceil(max_entries);
    let remaining_axes = (dim - axis) as f64;
    let slices = ((pages as f64).powf(1.0 / remaining_axes).ceil() as usize).max(1);
    let slice_len = max_entries * pages.div_ceil(slices);

    let mut rest = items;
    while !rest.is_empty() {
        let tail = rest.split_off(slice_len.min(rest.len()));
        let slice = std::mem::replace(&mut rest, tail);
        str_partition(slice, axis + 1, dim, max_entries, out);
    }
}

/// Number of entries for the next node out of `n` remaining.
fn bulk_split_point(n: usize, min_entries: usize, max_entries: usize) -> usize {
    if n <= max_entries {
        n
    } else if n < max_entries + min_entries {
        n - min_entries
    } else {
        max_entries
    }
}

fn max_extension_axis<T: SpatialComparable>(items: &[T]) -> usize {
    Rectangle::union_all(items.iter())
        .map(|mbr| {
            (0..mbr.dim())
                .map(|d| (d, mbr.max(d) - mbr.min(d)))
                .fold((0, f64::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best })
                .0
        })
        .unwrap_or(0)
}

fn max_extension_partition<T: SpatialComparable>(
    items: Vec<T>,
    min_entries: usize,
    max_entries: usize,
) -> Vec<Vec<T>> {
    let min_entries = min_entries.min(max_entries / 2).max(1);
    let mut result = Vec::new();
    let mut rest = items;
    while !rest.is_empty() {
        let axis = max_extension_axis(&rest);
        sort_by_min(&mut rest, axis);
        let split_point = bulk_split_point(rest.len(), min_entries, max_entries);
        let tail = rest.split_off(split_point);
        result.push(std::mem::replace(&mut rest, tail));
    }
    result
}
