//! Constants for the paged R*-tree.

/// Default page size (4KB)
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Default cache budget in bytes (16MB)
pub const DEFAULT_CACHE_SIZE: usize = 16 * 1024 * 1024;

/// Default relative minimum fill of a node
pub const DEFAULT_MIN_FILL: f64 = 0.4;

/// Default share of an overflowing node's entries that gets reinserted
pub const DEFAULT_REINSERT_FRACTION: f64 = 0.3;

/// Smallest capacity a node may have
pub const MIN_CAPACITY: usize = 2;

/// Capacities below this value work but are logged as suspicious
pub const SMALL_CAPACITY_WARNING: usize = 10;

/// Magic number for file format identification
pub const MAGIC: u32 = 0x5253_5452; // "RSTR"

/// File format version
pub const FORMAT_VERSION: u32 = 1;

/// Page holding the file header
pub const HEADER_PAGE: u64 = 0;
