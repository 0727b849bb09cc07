//! Tree configuration.
//!
//! [`TreeConfig`] is built through [`TreeConfig::builder`]; `build()`
//! validates every setting and derives the node capacities from the page
//! size, so an invalid configuration fails before any page is touched.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::distance::{Metric, SquaredEuclideanDistance};
use crate::rectangle::Rectangle;
use crate::rstar_tree::bulk::BulkSplit;
use crate::rstar_tree::overflow::{
    CloseReinsert, FarReinsert, LimitedReinsertOverflowTreatment, OverflowTreatment,
    ReinsertStrategy, SplitOnlyOverflowTreatment,
};
use crate::rstar_tree::rtree_constants::{
    DEFAULT_CACHE_SIZE, DEFAULT_MIN_FILL, DEFAULT_PAGE_SIZE, DEFAULT_REINSERT_FRACTION,
    MIN_CAPACITY, SMALL_CAPACITY_WARNING,
};
use crate::rstar_tree::rtree_types::{
    encode, Entry, Node, PageId, PageWithChecksum, SpatialError, SpatialResult,
};

/// What to do with a node that exceeds its capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OverflowPolicy {
    /// Always split.
    SplitOnly,
    /// R* forced reinsertion once per level and insertion, split otherwise.
    #[default]
    LimitedReinsert,
}

/// Order in which evicted entries are reinserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReinsertPolicy {
    /// Closest to the page center first.
    #[default]
    Close,
    /// Farthest from the page center first.
    Far,
}

/// Capacities and minimum fills derived from a [`TreeConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeCapacities {
    pub leaf_capacity: usize,
    pub dir_capacity: usize,
    pub leaf_min_fill: usize,
    pub dir_min_fill: usize,
}

/// Configuration of an [`RStarTree`](crate::RStarTree).
///
/// ## Example
///
/// ```rust
/// use spatial_rstar::{Metric, OverflowPolicy, TreeConfig};
///
/// let config = TreeConfig::builder()
///     .dimensionality(3)
///     .page_size(1024)
///     .overflow(OverflowPolicy::SplitOnly)
///     .metric(Metric::Manhattan)
///     .build()
///     .unwrap();
/// assert!(config.capacities().leaf_capacity >= 2);
/// ```
#[derive(Debug, Clone)]
pub struct TreeConfig {
    dimensionality: usize,
    page_size: usize,
    cache_size: usize,
    min_fill: f64,
    overflow: OverflowPolicy,
    reinsert: ReinsertPolicy,
    reinsert_fraction: f64,
    metric: Metric,
    bulk_split: BulkSplit,
    max_pages: Option<u64>,
    extra_integrity_checks: bool,
    capacities: NodeCapacities,
}

impl TreeConfig {
    /// Creates a new builder with default settings.
    #[inline]
    pub fn builder() -> TreeConfigBuilder {
        TreeConfigBuilder::new()
    }

    pub fn dimensionality(&self) -> usize {
        self.dimensionality
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Cache budget in bytes.
    pub fn cache_size(&self) -> usize {
        self.cache_size
    }

    pub fn min_fill(&self) -> f64 {
        self.min_fill
    }

    pub fn overflow(&self) -> OverflowPolicy {
        self.overflow
    }

    pub fn reinsert(&self) -> ReinsertPolicy {
        self.reinsert
    }

    pub fn reinsert_fraction(&self) -> f64 {
        self.reinsert_fraction
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn bulk_split(&self) -> BulkSplit {
        self.bulk_split
    }

    pub fn max_pages(&self) -> Option<u64> {
        self.max_pages
    }

    pub fn extra_integrity_checks(&self) -> bool {
        self.extra_integrity_checks
    }

    /// Node capacities resolved at build time.
    pub fn capacities(&self) -> NodeCapacities {
        self.capacities
    }

    /// Fresh overflow treatment for a tree using this configuration.
    pub fn overflow_treatment(&self) -> SpatialResult<Box<dyn OverflowTreatment>> {
        Ok(match self.overflow {
            OverflowPolicy::SplitOnly => Box::new(SplitOnlyOverflowTreatment),
            OverflowPolicy::LimitedReinsert => {
                Box::new(LimitedReinsertOverflowTreatment::new(self.reinsert_strategy()?))
            }
        })
    }

    fn reinsert_strategy(&self) -> SpatialResult<Box<dyn ReinsertStrategy>> {
        let distance = Arc::new(SquaredEuclideanDistance);
        Ok(match self.reinsert {
            ReinsertPolicy::Close => Box::new(CloseReinsert::new(self.reinsert_fraction, distance)?),
            ReinsertPolicy::Far => Box::new(FarReinsert::new(self.reinsert_fraction, distance)?),
        })
    }
}

/// Serialized size of an empty node page and of one entry of each kind.
struct PageLayout {
    empty_page: usize,
    leaf_entry: usize,
    dir_entry: usize,
}

impl PageLayout {
    fn measure(dimensionality: usize) -> SpatialResult<Self> {
        let empty = PageWithChecksum {
            checksum: 0,
            node: Node::new_leaf(PageId::MAX),
        };
        let origin = vec![0.0; dimensionality];
        Ok(Self {
            empty_page: encode(&empty)?.len(),
            leaf_entry: encode(&Entry::leaf(u64::MAX, origin.clone()))?.len(),
            dir_entry: encode(&Entry::directory(PageId::MAX, Rectangle::point(&origin)))?.len(),
        })
    }

    fn capacity(&self, page_size: usize, entry_size: usize) -> usize {
        page_size.saturating_sub(self.empty_page) / entry_size
    }

    fn fits(&self, page_size: usize, entry_size: usize, capacity: usize) -> bool {
        self.empty_page + capacity * entry_size <= page_size
    }
}

fn resolve_capacity(
    kind: &str,
    explicit: Option<usize>,
    layout: &PageLayout,
    page_size: usize,
    entry_size: usize,
) -> SpatialResult<usize> {
    let capacity = explicit.unwrap_or_else(|| layout.capacity(page_size, entry_size));
    if capacity < MIN_CAPACITY {
        return Err(SpatialError::Config(format!(
            "{} capacity {} is below {}; increase the page size (currently {})",
            kind, capacity, MIN_CAPACITY, page_size
        )));
    }
    if !layout.fits(page_size, entry_size, capacity) {
        return Err(SpatialError::Config(format!(
            "{} nodes with {} entries do not fit a page of {} bytes",
            kind, capacity, page_size
        )));
    }
    if capacity < SMALL_CAPACITY_WARNING {
        log::warn!(
            "{} capacity is only {}; consider a larger page size",
            kind,
            capacity
        );
    }
    Ok(capacity)
}

fn min_fill_of(capacity: usize, min_fill: f64) -> usize {
    ((capacity as f64 * min_fill).floor() as usize).max(1)
}

/// Builder for configuring a [`TreeConfig`].
pub struct TreeConfigBuilder {
    dimensionality: usize,
    page_size: usize,
    cache_size: usize,
    leaf_capacity: Option<usize>,
    dir_capacity: Option<usize>,
    min_fill: f64,
    overflow: OverflowPolicy,
    reinsert: ReinsertPolicy,
    reinsert_fraction: f64,
    metric: Metric,
    bulk_split: BulkSplit,
    max_pages: Option<u64>,
    extra_integrity_checks: bool,
}

impl TreeConfigBuilder {
    /// Creates a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            dimensionality: 0,
            page_size: DEFAULT_PAGE_SIZE,
            cache_size: DEFAULT_CACHE_SIZE,
            leaf_capacity: None,
            dir_capacity: None,
            min_fill: DEFAULT_MIN_FILL,
            overflow: OverflowPolicy::default(),
            reinsert: ReinsertPolicy::default(),
            reinsert_fraction: DEFAULT_REINSERT_FRACTION,
            metric: Metric::default(),
            bulk_split: BulkSplit::default(),
            max_pages: None,
            extra_integrity_checks: false,
        }
    }

    /// Sets the dimensionality of the indexed points. Required.
    pub fn dimensionality(mut self, dimensionality: usize) -> Self {
        self.dimensionality = dimensionality;
        self
    }

    /// Sets the page size in bytes.
    ///
    /// Default: 4 KB
    pub fn page_size(mut self, bytes: usize) -> Self {
        self.page_size = bytes;
        self
    }

    /// Sets the page cache budget in bytes.
    ///
    /// Default: 16 MB
    pub fn cache_size(mut self, bytes: usize) -> Self {
        self.cache_size = bytes;
        self
    }

    /// Overrides the leaf capacity derived from the page size.
    pub fn leaf_capacity(mut self, capacity: usize) -> Self {
        self.leaf_capacity = Some(capacity);
        self
    }

    /// Overrides the directory capacity derived from the page size.
    pub fn dir_capacity(mut self, capacity: usize) -> Self {
        self.dir_capacity = Some(capacity);
        self
    }

    /// Sets the relative minimum fill of a node.
    ///
    /// Default: 0.4
    pub fn min_fill(mut self, fraction: f64) -> Self {
        self.min_fill = fraction;
        self
    }

    pub fn overflow(mut self, policy: OverflowPolicy) -> Self {
        self.overflow = policy;
        self
    }

    pub fn reinsert(mut self, policy: ReinsertPolicy) -> Self {
        self.reinsert = policy;
        self
    }

    /// Sets the share of entries reinserted on overflow.
    ///
    /// Default: 0.3
    pub fn reinsert_fraction(mut self, fraction: f64) -> Self {
        self.reinsert_fraction = fraction;
        self
    }

    /// Sets the metric used by the tree's own queries.
    ///
    /// Default: Euclidean
    pub fn metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }

    pub fn bulk_split(mut self, strategy: BulkSplit) -> Self {
        self.bulk_split = strategy;
        self
    }

    /// Limits the number of node pages of the page file.
    pub fn max_pages(mut self, max_pages: u64) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    /// Runs a full integrity check after every mutation and panics on the
    /// first violation.
    pub fn extra_integrity_checks(mut self, enabled: bool) -> Self {
        self.extra_integrity_checks = enabled;
        self
    }

    /// Validates the settings and builds the configuration.
    pub fn build(self) -> SpatialResult<TreeConfig> {
        if self.dimensionality == 0 {
            return Err(SpatialError::Config("dimensionality must be at least 1".into()));
        }
        if self.page_size == 0 {
            return Err(SpatialError::Config("page size must be positive".into()));
        }
        if !(self.min_fill > 0.0 && self.min_fill <= 0.5) {
            return Err(SpatialError::Config(format!(
                "min fill must lie in (0, 0.5], got {}",
                self.min_fill
            )));
        }
        if !(self.reinsert_fraction > 0.0 && self.reinsert_fraction < 0.5) {
            return Err(SpatialError::Config(format!(
                "reinsert fraction must lie in (0, 0.5), got {}",
                self.reinsert_fraction
            )));
        }
        if self.max_pages == Some(0) {
            return Err(SpatialError::Config("max pages must be positive".into()));
        }

        let layout = PageLayout::measure(self.dimensionality)?;
        let leaf_capacity = resolve_capacity(
            "leaf",
            self.leaf_capacity,
            &layout,
            self.page_size,
            layout.leaf_entry,
        )?;
        let dir_capacity = resolve_capacity(
            "directory",
            self.dir_capacity,
            &layout,
            self.page_size,
            layout.dir_entry,
        )?;
        let capacities = NodeCapacities {
            leaf_capacity,
            dir_capacity,
            leaf_min_fill: min_fill_of(leaf_capacity, self.min_fill),
            dir_min_fill: min_fill_of(dir_capacity, self.min_fill),
        };
        log::debug!(
            "Tree config: {} dimensions, page size {}, capacities {:?}",
            self.dimensionality,
            self.page_size,
            capacities
        );

        Ok(TreeConfig {
            dimensionality: self.dimensionality,
            page_size: self.page_size,
            cache_size: self.cache_size,
            min_fill: self.min_fill,
            overflow: self.overflow,
            reinsert: self.reinsert,
            reinsert_fraction: self.reinsert_fraction,
            metric: self.metric,
            bulk_split: self.bulk_split,
            max_pages: self.max_pages,
            extra_integrity_checks: self.extra_integrity_checks,
            capacities,
        })
    }
}

impl Default for TreeConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
