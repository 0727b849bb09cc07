//! # Spatial R*-tree
//!
//! A paged R*-tree index over multi-dimensional points with range and
//! k-nearest-neighbor search.
//!
//! ## Features
//!
//! - **Paged Storage**: Nodes are stored in fixed-size pages, in memory or on disk
//! - **LRU Cache**: Frequently accessed pages stay in memory, cold pages are read on demand
//! - **R\* Insertion**: Forced reinsertion and the topological split keep pages compact
//! - **Bulk Loading**: Sort-Tile-Recursive and other bottom-up partitioning strategies
//! - **Pluggable Metrics**: Euclidean, Manhattan, maximum or custom [`SpatialDistance`]s
//! - **Integrity Checks**: Full structural verification of a tree on demand
//!
//! ## Quick Start
//!
//! ```rust
//! use spatial_rstar::{RStarTree, TreeConfig, VectorRelation};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TreeConfig::builder()
//!     .dimensionality(2)
//!     .page_size(1024)
//!     .build()?;
//!
//! let relation = VectorRelation::from_rows(
//!     2,
//!     vec![vec![0.0, 0.0], vec![1.0, 1.0], vec![5.0, 5.0]],
//! )?;
//! let mut tree = RStarTree::in_memory(config)?;
//! tree.bulk_load(&relation)?;
//!
//! let within = tree.range_search(&[0.0, 0.0], 2.0)?;
//! assert_eq!(within.len(), 2);
//!
//! let nearest = tree.knn_search(&[4.0, 4.0], 1)?;
//! assert_eq!(nearest[0].0, 2);
//! # Ok(())
//! # }
//! ```
//!
//! ## Persistent Trees
//!
//! ```rust,no_run
//! use spatial_rstar::{RStarTree, TreeConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TreeConfig::builder().dimensionality(3).build()?;
//! let mut tree = RStarTree::create("points.rstar", config.clone())?;
//! tree.insert(1, &[0.5, 1.5, 2.5])?;
//! tree.close()?;
//!
//! let tree = RStarTree::open("points.rstar", config)?;
//! assert_eq!(tree.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod distance;
pub mod rectangle;
pub mod relation;
pub mod rstar_tree;

pub use config::{NodeCapacities, OverflowPolicy, ReinsertPolicy, TreeConfig, TreeConfigBuilder};
pub use distance::{
    EuclideanDistance, ManhattanDistance, MaximumDistance, Metric, SpatialDistance,
    SquaredEuclideanDistance,
};
pub use rectangle::{Rectangle, SpatialComparable};
pub use relation::{Relation, VectorRelation};

// Re-export tree types
pub use rstar_tree::{
    BulkSplit, Entry, IntegrityReport, KnnSearcher, LruPageFile, MemoryPageFile, MemoryRStarTree,
    Node, ObjectId, PageFile, PageFileStats, PageId, PersistentPageFile, PersistentRStarTree,
    RStarTree, RTreeStats, RangeSearcher, SpatialError, SpatialResult,
};

// Re-export overflow handling
pub use rstar_tree::{
    CloseReinsert, FarReinsert, LimitedReinsertOverflowTreatment, OverflowAction,
    OverflowTreatment, ReinsertStrategy, SplitOnlyOverflowTreatment,
};
