//! Persistence and reliability features for R*-tree storage.
//!
//! This module provides:
//! - Integrity reports for structural tree checks
//! - Free list management for page reuse

use std::fmt;

use super::rtree_storage::Storage;
use super::rtree_types::{FileHeader, FreePage, PageId, SpatialError, SpatialResult};

// ============================================================================
// Integrity Checking
// ============================================================================

/// Result of a structural integrity check
#[derive(Debug, Clone)]
pub struct IntegrityReport {
    /// Nodes visited from the root
    pub nodes_checked: u64,
    /// Leaf entries found in the leaves
    pub leaf_entries: u64,
    /// Depth of the deepest leaf (edges from the root)
    pub max_leaf_depth: u32,
    /// Summary of findings
    pub is_valid: bool,
    /// Detailed error messages
    pub errors: Vec<String>,
}

impl IntegrityReport {
    pub fn new() -> Self {
        Self {
            nodes_checked: 0,
            leaf_entries: 0,
            max_leaf_depth: 0,
            is_valid: true,
            errors: Vec::new(),
        }
    }

    /// Records a violation and marks the report invalid.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.is_valid = false;
        self.errors.push(message.into());
    }
}

impl Default for IntegrityReport {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IntegrityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} nodes, {} entries: {}",
            self.nodes_checked,
            self.leaf_entries,
            if self.is_valid { "valid" } else { "INVALID" }
        )?;
        for error in &self.errors {
            write!(f, "\n  {}", error)?;
        }
        Ok(())
    }
}

// ============================================================================
// Free List Management
// ============================================================================

/// Manages the free page list for page reuse.
///
/// Freed pages form a LIFO chain: the header points at the most recently
/// freed page, whose first bytes hold the id of the next one.
pub struct FreeListManager;

impl FreeListManager {
    /// Allocate a page from the free list or create new page
    pub fn allocate_page(storage: &mut Storage, header: &mut FileHeader) -> SpatialResult<PageId> {
        if header.free_list_head != 0 {
            let free_page_id = header.free_list_head;
            let free_page = storage.read_free_page(free_page_id)?;

            header.free_list_head = free_page.next_free;
            header.free_page_count = header.free_page_count.saturating_sub(1);

            Ok(free_page_id)
        } else {
            let page_id = header.next_page_id;
            header.next_page_id = header.next_page_id.saturating_add(1);
            Ok(page_id)
        }
    }

    /// Free a page by adding it to the free list
    pub fn free_page(
        storage: &mut Storage,
        header: &mut FileHeader,
        page_id: PageId,
    ) -> SpatialResult<()> {
        let free_page = FreePage {
            next_free: header.free_list_head,
        };

        storage.write_free_page(page_id, &free_page)?;
        header.free_list_head = page_id;
        header.free_page_count = header.free_page_count.saturating_add(1);

        Ok(())
    }

    /// Page ids on the free list, head first.
    ///
    /// A chain that points outside the file or loops is reported as
    /// [`SpatialError::Corrupted`].
    pub fn free_pages(storage: &mut Storage, header: &FileHeader) -> SpatialResult<Vec<PageId>> {
        let mut pages = Vec::with_capacity(header.free_page_count as usize);
        let mut current = header.free_list_head;
        while current != 0 {
            if current >= header.next_page_id || pages.len() as u64 >= header.next_page_id {
                return Err(SpatialError::Corrupted(format!(
                    "free list runs into page {} after {} pages",
                    current,
                    pages.len()
                )));
            }
            pages.push(current);
            current = storage.read_free_page(current)?.next_free;
        }
        Ok(pages)
    }
}

// ============================================================================
// Tests
// ============================================================================
