//! Range and k-nearest-neighbor searchers.
//!
//! Both searchers borrow a tree and carry the distance function they rank
//! by. Results are `(id, distance)` pairs sorted by distance, with ties
//! broken by the smaller id.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::distance::SpatialDistance;
use crate::relation::Relation;

use super::rtree_impl::RStarTree;
use super::rtree_storage::PageFile;
use super::rtree_types::{Entry, ObjectId, PageId, SpatialError, SpatialResult};

fn sort_results(results: &mut [(ObjectId, f64)]) {
    results.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
}

// ============================================================================
// Range Search
// ============================================================================

/// Finds every object within a radius of a query point.
pub struct RangeSearcher<'a, P: PageFile> {
    tree: &'a RStarTree<P>,
    distance: Arc<dyn SpatialDistance>,
}

impl<'a, P: PageFile> RangeSearcher<'a, P> {
    pub fn new(tree: &'a RStarTree<P>, distance: Arc<dyn SpatialDistance>) -> Self {
        Self { tree, distance }
    }

    /// Objects whose distance to `query` is at most `radius`.
    ///
    /// # Errors
    ///
    /// A negative or NaN radius is rejected with [`SpatialError::Config`].
    pub fn search(&self, query: &[f64], radius: f64) -> SpatialResult<Vec<(ObjectId, f64)>> {
        self.tree.check_usable()?;
        self.tree.validate_point(query)?;
        if radius.is_nan() || radius < 0.0 {
            return Err(SpatialError::Config(format!(
                "range radius must be non-negative, got {}",
                radius
            )));
        }
        self.tree.record_range_query();

        let mut results = Vec::new();
        let root = self.tree.root_page();
        if root == 0 {
            return Ok(results);
        }

        let mut computations = 0u64;
        let mut pending: Vec<PageId> = vec![root];
        while let Some(page_id) = pending.pop() {
            let node = self.tree.read_node(page_id)?;
            for entry in &node.entries {
                computations += 1;
                match entry {
                    Entry::Leaf { id, point } => {
                        let d = self.distance.min_distance(&query, point);
                        if d <= radius {
                            results.push((*id, d));
                        }
                    }
                    Entry::Directory { child, mbr } => {
                        if self.distance.min_distance(&query, mbr) <= radius {
                            pending.push(*child);
                        }
                    }
                }
            }
        }
        self.tree.record_distance_computations(computations);

        sort_results(&mut results);
        log::trace!("Range query with radius {} found {} objects", radius, results.len());
        Ok(results)
    }

    /// Like [`search`](Self::search), centered on the object `id` of
    /// `relation`. An id missing from the relation yields no results.
    pub fn search_by_id(
        &self,
        relation: &dyn Relation,
        id: ObjectId,
        radius: f64,
    ) -> SpatialResult<Vec<(ObjectId, f64)>> {
        match relation.get(id) {
            Some(point) => self.search(point, radius),
            None => Ok(Vec::new()),
        }
    }
}

// ============================================================================
// k-NN Search
// ============================================================================

/// A page waiting in the best-first queue. Ordered so that the smallest
/// distance is popped first from a max-heap.
#[derive(Debug)]
struct Candidate {
    distance: f64,
    page_id: PageId,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .distance
            .total_cmp(&self.distance)
            .then(other.page_id.cmp(&self.page_id))
    }
}

/// A result candidate; the heap keeps the worst one on top.
#[derive(Debug, Clone, Copy)]
struct Neighbor {
    distance: f64,
    id: ObjectId,
}

impl PartialEq for Neighbor {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Neighbor {}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.id.cmp(&other.id))
    }
}

/// Best-first k-nearest-neighbor search.
///
/// Pages are visited in order of their minimum distance to the query; the
/// search stops once the closest unvisited page is farther away than the
/// current k-th neighbor.
pub struct KnnSearcher<'a, P: PageFile> {
    tree: &'a RStarTree<P>,
    distance: Arc<dyn SpatialDistance>,
}

impl<'a, P: PageFile> KnnSearcher<'a, P> {
    pub fn new(tree: &'a RStarTree<P>, distance: Arc<dyn SpatialDistance>) -> Self {
        Self { tree, distance }
    }

    /// The `k` objects nearest to `query`. Fewer are returned when the tree
    /// holds fewer objects; `k == 0` yields nothing.
    pub fn search(&self, query: &[f64], k: usize) -> SpatialResult<Vec<(ObjectId, f64)>> {
        self.tree.check_usable()?;
        self.tree.validate_point(query)?;
        self.tree.record_knn_query();

        let root = self.tree.root_page();
        if k == 0 || root == 0 {
            return Ok(Vec::new());
        }

        let mut computations = 0u64;
        let mut queue = BinaryHeap::new();
        queue.push(Candidate {
            distance: 0.0,
            page_id: root,
        });
        let mut neighbors: BinaryHeap<Neighbor> = BinaryHeap::with_capacity(k + 1);

        while let Some(candidate) = queue.pop() {
            let kth = kth_distance(&neighbors, k);
            if candidate.distance > kth {
                break;
            }

            let node = self.tree.read_node(candidate.page_id)?;
            for entry in &node.entries {
                computations += 1;
                match entry {
                    Entry::Leaf { id, point } => {
                        let neighbor = Neighbor {
                            distance: self.distance.min_distance(&query, point),
                            id: *id,
                        };
                        if neighbors.len() < k {
                            neighbors.push(neighbor);
                        } else if neighbors.peek().is_some_and(|worst| neighbor < *worst) {
                            neighbors.pop();
                            neighbors.push(neighbor);
                        }
                    }
                    Entry::Directory { child, mbr } => {
                        let distance = self.distance.min_distance(&query, mbr);
                        if distance <= kth_distance(&neighbors, k) {
                            queue.push(Candidate {
                                distance,
                                page_id: *child,
                            });
                        }
                    }
                }
            }
        }
        self.tree.record_distance_computations(computations);

        Ok(neighbors
            .into_sorted_vec()
            .into_iter()
            .map(|n| (n.id, n.distance))
            .collect())
    }

    /// Like [`search`](Self::search), using the object `id` of `relation`
    /// as query. The object itself is part of the result if it is indexed.
    pub fn search_by_id(
        &self,
        relation: &dyn Relation,
        id: ObjectId,
        k: usize,
    ) -> SpatialResult<Vec<(ObjectId, f64)>> {
        match relation.get(id) {
            Some(point) => self.search(point, k),
            None => Ok(Vec::new()),
        }
    }
}

/// Distance of the current k-th neighbor, infinite while fewer are known.
fn kth_distance(neighbors: &BinaryHeap<Neighbor>, k: usize) -> f64 {
    if neighbors.len() < k {
        f64::INFINITY
    } else {
        neighbors.peek().map_or(f64::INFINITY, |n| n.distance)
    }
}
