//! Core types and data structures for the R*-tree.
//!
//! This module defines the fundamental types used throughout the tree:
//! - Error types and result types
//! - Entries (leaf and directory) and nodes
//! - Tree metadata and the on-disk file header
//! - Statistics structures

use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::rtree_constants::{FORMAT_VERSION, MAGIC};
use crate::rectangle::{Rectangle, SpatialComparable};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur in spatial indexing operations
#[derive(Debug, Error)]
pub enum SpatialError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dimensionality mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Page file capacity exhausted ({max_pages} pages)")]
    CapacityExhausted { max_pages: u64 },

    #[error("Node on page {page_id} needs {size} bytes, page size is {page_size}")]
    PageOverflow {
        page_id: PageId,
        size: usize,
        page_size: usize,
    },

    #[error("Page {0} not found")]
    PageNotFound(PageId),

    #[error("Corrupted page file: {0}")]
    Corrupted(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Tree is closed")]
    Closed,

    #[error("Tree is unusable after an aborted write")]
    Poisoned,
}

/// Result type for spatial operations
pub type SpatialResult<T> = Result<T, SpatialError>;

/// Stable identifier of an indexed object.
pub type ObjectId = u64;

/// Page ID - unique identifier for a node/page. Page 0 holds the header.
pub type PageId = u64;

pub(crate) fn encode<T: Serialize>(value: &T) -> SpatialResult<Vec<u8>> {
    bincode::serde::encode_to_vec(value, bincode::config::legacy())
        .map_err(|e| SpatialError::Serialization(e.to_string()))
}

pub(crate) fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> SpatialResult<T> {
    bincode::serde::decode_from_slice(bytes, bincode::config::legacy())
        .map(|(value, _)| value)
        .map_err(|e| SpatialError::Serialization(e.to_string()))
}

// ============================================================================
// Entries and Nodes
// ============================================================================

/// An entry of a node.
///
/// Leaf entries carry an object and its coordinates; directory entries point
/// to a child page and store the tight MBR of that child's entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Entry {
    Leaf { id: ObjectId, point: Vec<f64> },
    Directory { child: PageId, mbr: Rectangle },
}

impl Entry {
    pub fn leaf(id: ObjectId, point: Vec<f64>) -> Self {
        Entry::Leaf { id, point }
    }

    pub fn directory(child: PageId, mbr: Rectangle) -> Self {
        Entry::Directory { child, mbr }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Entry::Leaf { .. })
    }

    pub fn object_id(&self) -> Option<ObjectId> {
        match self {
            Entry::Leaf { id, .. } => Some(*id),
            Entry::Directory { .. } => None,
        }
    }

    pub fn child(&self) -> Option<PageId> {
        match self {
            Entry::Leaf { .. } => None,
            Entry::Directory { child, .. } => Some(*child),
        }
    }

    /// Bounding rectangle of the entry (degenerate for leaf entries).
    pub fn to_rectangle(&self) -> Rectangle {
        match self {
            Entry::Leaf { point, .. } => Rectangle::point(point),
            Entry::Directory { mbr, .. } => mbr.clone(),
        }
    }
}

impl SpatialComparable for Entry {
    fn dim(&self) -> usize {
        match self {
            Entry::Leaf { point, .. } => point.len(),
            Entry::Directory { mbr, .. } => mbr.dim(),
        }
    }

    fn min(&self, d: usize) -> f64 {
        match self {
            Entry::Leaf { point, .. } => point[d],
            Entry::Directory { mbr, .. } => mbr.min(d),
        }
    }

    fn max(&self, d: usize) -> f64 {
        match self {
            Entry::Leaf { point, .. } => point[d],
            Entry::Directory { mbr, .. } => mbr.max(d),
        }
    }
}

/// A page-resident node.
///
/// Leaf nodes hold only leaf entries and directory nodes only directory
/// entries. Nodes are plain values: whoever reads one from a page file owns
/// a copy and has to write it back after mutating it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub page_id: PageId,
    pub leaf: bool,
    pub entries: Vec<Entry>,
}

impl Node {
    pub fn new_leaf(page_id: PageId) -> Self {
        Self {
            page_id,
            leaf: true,
            entries: Vec::new(),
        }
    }

    pub fn new_directory(page_id: PageId) -> Self {
        Self {
            page_id,
            leaf: false,
            entries: Vec::new(),
        }
    }

    /// Get the bounding box enclosing all entries, `None` for an empty node
    pub fn compute_mbr(&self) -> Option<Rectangle> {
        Rectangle::union_all(self.entries.iter())
    }

    pub fn is_leaf(&self) -> bool {
        self.leaf
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Directory entry describing this node, `None` while the node is empty.
    pub fn to_directory_entry(&self) -> Option<Entry> {
        self.compute_mbr()
            .map(|mbr| Entry::directory(self.page_id, mbr))
    }
}

// ============================================================================
// Tree Metadata
// ============================================================================

/// Tree metadata persisted alongside the pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeHeader {
    pub dimensionality: u32,
    pub root_page: PageId,
    /// Edges from the root to every leaf; a lone leaf root has height 0.
    pub height: u32,
    pub leaf_capacity: u32,
    pub dir_capacity: u32,
    pub leaf_min_fill: u32,
    pub dir_min_fill: u32,
    pub entry_count: u64,
}

// ============================================================================
// Free List Page
// ============================================================================

/// A free page in the free list chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreePage {
    /// Next free page in the chain (0 = end of chain)
    pub next_free: PageId,
}

// ============================================================================
// Page with Checksum
// ============================================================================

/// A page wrapped with CRC32 checksum for corruption detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageWithChecksum {
    /// CRC32 checksum of the node data
    pub checksum: u32,
    /// The actual node data
    pub node: Node,
}

impl PageWithChecksum {
    pub fn new(node: Node) -> SpatialResult<Self> {
        let checksum = Self::calculate_checksum(&node)?;
        Ok(Self { checksum, node })
    }

    pub fn calculate_checksum(node: &Node) -> SpatialResult<u32> {
        Ok(crc32fast::hash(&encode(node)?))
    }

    /// Verify checksum and consume self to return node
    pub fn into_node(self) -> SpatialResult<Node> {
        let expected = Self::calculate_checksum(&self.node)?;
        if self.checksum != expected {
            return Err(SpatialError::Corrupted(format!(
                "page {} checksum mismatch (expected: {:x}, got: {:x})",
                self.node.page_id, expected, self.checksum
            )));
        }
        Ok(self.node)
    }
}

// ============================================================================
// File Header
// ============================================================================

/// Header stored in page 0 of a persistent page file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileHeader {
    pub magic: u32,
    pub version: u32,
    pub page_size: u32,
    pub next_page_id: PageId,
    pub free_list_head: PageId,
    pub free_page_count: u64,
    pub tree: Option<TreeHeader>,
}

impl FileHeader {
    pub fn new(page_size: usize) -> Self {
        Self {
            magic: MAGIC,
            version: FORMAT_VERSION,
            page_size: page_size as u32,
            next_page_id: 1,
            free_list_head: 0,
            free_page_count: 0,
            tree: None,
        }
    }

    pub fn validate(&self, page_size: usize) -> SpatialResult<()> {
        if self.magic != MAGIC {
            return Err(SpatialError::Corrupted("invalid file format (bad magic)".into()));
        }
        if self.version != FORMAT_VERSION {
            return Err(SpatialError::Corrupted(format!(
                "unsupported file format version {}",
                self.version
            )));
        }
        if self.page_size as usize != page_size {
            return Err(SpatialError::Config(format!(
                "file was written with page size {}, configured {}",
                self.page_size, page_size
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Counters of a page file (and its cache, if any).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageFileStats {
    pub reads: u64,
    pub writes: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub resident_pages: u64,
}

/// Statistics about tree shape and query work
#[derive(Debug, Clone, Default)]
pub struct RTreeStats {
    pub total_entries: u64,
    pub tree_height: u32,
    pub leaf_capacity: usize,
    pub dir_capacity: usize,
    pub distance_computations: u64,
    pub knn_queries: u64,
    pub range_queries: u64,
    pub reinsertions: u64,
    pub page_file: PageFileStats,
}
