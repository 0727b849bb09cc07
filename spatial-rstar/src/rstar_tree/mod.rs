//! Paged R*-tree.
//!
//! Nodes live in fixed-size pages behind a [`PageFile`]. A tree either keeps
//! its pages in memory ([`MemoryPageFile`]) or in a file
//! ([`PersistentPageFile`]) fronted by an LRU cache ([`LruPageFile`]); nodes
//! are read on demand, so a persistent tree never loads the whole file.
//!
//! Insertion follows the R* heuristics: least-enlargement subtree choice,
//! forced reinsertion once per level ([`overflow`]) and the topological
//! split ([`split`]). Trees can also be built bottom-up with [`BulkSplit`].

pub mod bulk;
pub mod overflow;
pub mod persistence;
pub mod query;
pub mod rtree_cache;
pub mod rtree_constants;
pub mod rtree_storage;
pub mod rtree_types;
pub mod split;
mod rtree_impl;

pub use bulk::BulkSplit;
pub use overflow::{
    CloseReinsert, FarReinsert, LimitedReinsertOverflowTreatment, OverflowAction,
    OverflowTreatment, ReinsertStrategy, SplitOnlyOverflowTreatment,
};
pub use persistence::IntegrityReport;
pub use query::{KnnSearcher, RangeSearcher};
pub use rtree_cache::LruPageFile;
pub use rtree_constants::{DEFAULT_CACHE_SIZE, DEFAULT_PAGE_SIZE};
pub use rtree_impl::{MemoryRStarTree, PersistentRStarTree, RStarTree};
pub use rtree_storage::{MemoryPageFile, PageFile, PersistentPageFile};
pub use rtree_types::{
    Entry, Node, ObjectId, PageFileStats, PageId, RTreeStats, SpatialError, SpatialResult,
    TreeHeader,
};
pub use split::{topological_split, SplitPartition};
