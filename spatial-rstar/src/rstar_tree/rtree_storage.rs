//! Page files: the storage layer underneath the tree.
//!
//! [`PageFile`] maps page ids to nodes. Two backings are provided:
//! [`MemoryPageFile`] keeps nodes in a hash map and [`PersistentPageFile`]
//! keeps a fixed-size page array in a file. Either can be wrapped in the LRU
//! decorator from [`rtree_cache`](super::rtree_cache).
//!
//! Persistent reads are never batched: each `read_page` call results in
//! exactly one seek and one read.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::persistence::FreeListManager;
use super::rtree_constants::HEADER_PAGE;
use super::rtree_types::{
    decode, encode, FileHeader, FreePage, Node, PageFileStats, PageId, PageWithChecksum,
    SpatialError, SpatialResult, TreeHeader,
};

/// Storage contract between the tree and its pages.
///
/// Nodes handed out by [`read_page`](PageFile::read_page) are copies; a
/// mutated node only becomes visible after [`write_page`](PageFile::write_page).
pub trait PageFile: Send {
    /// Size of one page in bytes.
    fn page_size(&self) -> usize;

    fn read_page(&mut self, page_id: PageId) -> SpatialResult<Node>;

    /// Stores `node` under `node.page_id`.
    fn write_page(&mut self, node: &Node) -> SpatialResult<()>;

    /// Reserves a page id, reusing freed ids first.
    ///
    /// # Errors
    ///
    /// [`SpatialError::CapacityExhausted`] once the backing store is full.
    fn allocate(&mut self) -> SpatialResult<PageId>;

    /// Releases a page id for reuse; its contents are discarded.
    fn free(&mut self, page_id: PageId) -> SpatialResult<()>;

    /// Tree metadata stored with the pages, `None` for a fresh file.
    fn load_header(&mut self) -> SpatialResult<Option<TreeHeader>>;

    fn store_header(&mut self, header: &TreeHeader) -> SpatialResult<()>;

    /// Makes every write durable in the backing store.
    fn flush(&mut self) -> SpatialResult<()>;

    /// Drops all pages and metadata.
    fn clear(&mut self) -> SpatialResult<()>;

    fn statistics(&self) -> PageFileStats;

    /// Checks the page file's own bookkeeping, such as its free list, and
    /// describes every inconsistency found.
    fn verify(&mut self) -> SpatialResult<Vec<String>> {
        Ok(Vec::new())
    }
}

// ============================================================================
// In-memory page file
// ============================================================================

/// Page file keeping every node in memory.
#[derive(Debug, Default)]
pub struct MemoryPageFile {
    page_size: usize,
    pages: HashMap<PageId, Node>,
    next_page_id: PageId,
    free_pages: Vec<PageId>,
    max_pages: Option<u64>,
    header: Option<TreeHeader>,
    stats: PageFileStats,
}

impl MemoryPageFile {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            next_page_id: 1,
            ..Default::default()
        }
    }

    /// Limits the number of simultaneously allocated pages.
    pub fn with_max_pages(mut self, max_pages: Option<u64>) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// Number of pages currently holding a node.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn allocated(&self) -> u64 {
        (self.next_page_id - 1) - self.free_pages.len() as u64
    }
}

impl PageFile for MemoryPageFile {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn read_page(&mut self, page_id: PageId) -> SpatialResult<Node> {
        self.stats.reads += 1;
        self.pages
            .get(&page_id)
            .cloned()
            .ok_or(SpatialError::PageNotFound(page_id))
    }

    fn write_page(&mut self, node: &Node) -> SpatialResult<()> {
        if node.page_id == HEADER_PAGE {
            return Err(SpatialError::InvalidOperation(
                "cannot write to page 0 (reserved for header)".into(),
            ));
        }
        self.stats.writes += 1;
        self.pages.insert(node.page_id, node.clone());
        Ok(())
    }

    fn allocate(&mut self) -> SpatialResult<PageId> {
        if let Some(max_pages) = self.max_pages {
            if self.allocated() >= max_pages {
                return Err(SpatialError::CapacityExhausted { max_pages });
            }
        }
        if let Some(page_id) = self.free_pages.pop() {
            return Ok(page_id);
        }
        let page_id = self.next_page_id;
        self.next_page_id += 1;
        Ok(page_id)
    }

    fn free(&mut self, page_id: PageId) -> SpatialResult<()> {
        self.pages.remove(&page_id);
        self.free_pages.push(page_id);
        Ok(())
    }

    fn load_header(&mut self) -> SpatialResult<Option<TreeHeader>> {
        Ok(self.header.clone())
    }

    fn store_header(&mut self, header: &TreeHeader) -> SpatialResult<()> {
        self.header = Some(header.clone());
        Ok(())
    }

    fn flush(&mut self) -> SpatialResult<()> {
        Ok(())
    }

    fn clear(&mut self) -> SpatialResult<()> {
        self.pages.clear();
        self.free_pages.clear();
        self.next_page_id = 1;
        self.header = None;
        Ok(())
    }

    fn verify(&mut self) -> SpatialResult<Vec<String>> {
        Ok(self
            .free_pages
            .iter()
            .filter(|&page_id| self.pages.contains_key(page_id))
            .map(|page_id| format!("free page {} still holds a node", page_id))
            .collect())
    }

    fn statistics(&self) -> PageFileStats {
        PageFileStats {
            resident_pages: self.pages.len() as u64,
            ..self.stats
        }
    }
}

// ============================================================================
// Raw file storage
// ============================================================================

/// Reads and writes individual fixed-size pages of a file.
pub struct Storage {
    file: File,
    path: PathBuf,
    page_size: usize,
}

impl Storage {
    /// Create a new storage file, truncating any existing one
    pub fn create(path: &Path, page_size: usize) -> SpatialResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            page_size,
        })
    }

    /// Open an existing storage file
    pub fn open(path: &Path, page_size: usize) -> SpatialResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            page_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_raw(&mut self, page_id: PageId) -> SpatialResult<Vec<u8>> {
        let offset = page_id * self.page_size as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; self.page_size];
        self.file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn write_raw(&mut self, page_id: PageId, mut bytes: Vec<u8>) -> SpatialResult<()> {
        bytes.resize(self.page_size, 0);
        let offset = page_id * self.page_size as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&bytes)?;
        Ok(())
    }

    fn reject_header_page(page_id: PageId) -> SpatialResult<()> {
        if page_id == HEADER_PAGE {
            return Err(SpatialError::InvalidOperation(
                "page 0 is reserved for the header".into(),
            ));
        }
        Ok(())
    }

    /// Read header from disk (single read operation)
    pub fn read_header(&mut self) -> SpatialResult<FileHeader> {
        let buffer = self.read_raw(HEADER_PAGE)?;
        decode(&buffer)
    }

    /// Write header to disk
    pub fn write_header(&mut self, header: &FileHeader) -> SpatialResult<()> {
        let bytes = encode(header)?;
        if bytes.len() > self.page_size {
            return Err(SpatialError::PageOverflow {
                page_id: HEADER_PAGE,
                size: bytes.len(),
                page_size: self.page_size,
            });
        }
        self.write_raw(HEADER_PAGE, bytes)
    }

    /// Read a single node and verify its checksum.
    pub fn read_page(&mut self, page_id: PageId) -> SpatialResult<Node> {
        Self::reject_header_page(page_id)?;
        let buffer = self.read_raw(page_id)?;
        let page: PageWithChecksum = decode(&buffer)?;
        let node = page.into_node()?;
        if node.page_id != page_id {
            return Err(SpatialError::Corrupted(format!(
                "page {} holds node {}",
                page_id, node.page_id
            )));
        }
        Ok(node)
    }

    /// Write a single node with checksum
    pub fn write_page(&mut self, node: &Node) -> SpatialResult<()> {
        Self::reject_header_page(node.page_id)?;
        let bytes = encode(&PageWithChecksum::new(node.clone())?)?;
        if bytes.len() > self.page_size {
            return Err(SpatialError::PageOverflow {
                page_id: node.page_id,
                size: bytes.len(),
                page_size: self.page_size,
            });
        }
        self.write_raw(node.page_id, bytes)
    }

    /// Read a free-list link page
    pub fn read_free_page(&mut self, page_id: PageId) -> SpatialResult<FreePage> {
        Self::reject_header_page(page_id)?;
        let buffer = self.read_raw(page_id)?;
        decode(&buffer)
    }

    /// Write a free-list link page
    pub fn write_free_page(&mut self, page_id: PageId, free_page: &FreePage) -> SpatialResult<()> {
        Self::reject_header_page(page_id)?;
        let bytes = encode(free_page)?;
        self.write_raw(page_id, bytes)
    }

    /// Sync file to disk
    pub fn sync(&mut self) -> SpatialResult<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Cut the file down to the header page
    pub fn truncate(&mut self) -> SpatialResult<()> {
        self.file.set_len(self.page_size as u64)?;
        Ok(())
    }
}

// ============================================================================
// Persistent page file
// ============================================================================

/// Page file backed by a fixed-size page array on disk.
///
/// Page 0 holds the [`FileHeader`]; freed pages are chained into a free
/// list through their first bytes. The header is written on
/// [`flush`](PageFile::flush).
pub struct PersistentPageFile {
    storage: Storage,
    header: FileHeader,
    header_dirty: bool,
    max_pages: Option<u64>,
    stats: PageFileStats,
}

impl PersistentPageFile {
    /// Creates a new, empty page file at `path`.
    pub fn create(path: impl AsRef<Path>, page_size: usize) -> SpatialResult<Self> {
        let mut storage = Storage::create(path.as_ref(), page_size)?;
        let header = FileHeader::new(page_size);
        storage.write_header(&header)?;
        storage.sync()?;
        log::debug!("Created page file {:?} with page size {}", path.as_ref(), page_size);

        Ok(Self {
            storage,
            header,
            header_dirty: false,
            max_pages: None,
            stats: PageFileStats::default(),
        })
    }

    /// Opens an existing page file. Only the header page is read.
    pub fn open(path: impl AsRef<Path>, page_size: usize) -> SpatialResult<Self> {
        let mut storage = Storage::open(path.as_ref(), page_size)?;
        let header = storage.read_header()?;
        header.validate(page_size)?;
        log::debug!(
            "Opened page file {:?} ({} pages, {} free)",
            path.as_ref(),
            header.next_page_id - 1,
            header.free_page_count
        );

        Ok(Self {
            storage,
            header,
            header_dirty: false,
            max_pages: None,
            stats: PageFileStats::default(),
        })
    }

    /// Limits the number of node pages the file may grow to.
    pub fn with_max_pages(mut self, max_pages: Option<u64>) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn path(&self) -> &Path {
        self.storage.path()
    }

    pub fn file_header(&self) -> &FileHeader {
        &self.header
    }
}

impl PageFile for PersistentPageFile {
    fn page_size(&self) -> usize {
        self.header.page_size as usize
    }

    fn read_page(&mut self, page_id: PageId) -> SpatialResult<Node> {
        if page_id >= self.header.next_page_id {
            return Err(SpatialError::PageNotFound(page_id));
        }
        self.stats.reads += 1;
        self.storage.read_page(page_id)
    }

    fn write_page(&mut self, node: &Node) -> SpatialResult<()> {
        self.stats.writes += 1;
        self.storage.write_page(node)
    }

    fn allocate(&mut self) -> SpatialResult<PageId> {
        if self.header.free_list_head == 0 {
            if let Some(max_pages) = self.max_pages {
                if self.header.next_page_id > max_pages {
                    return Err(SpatialError::CapacityExhausted { max_pages });
                }
            }
        }
        self.header_dirty = true;
        FreeListManager::allocate_page(&mut self.storage, &mut self.header)
    }

    fn free(&mut self, page_id: PageId) -> SpatialResult<()> {
        self.header_dirty = true;
        FreeListManager::free_page(&mut self.storage, &mut self.header, page_id)
    }

    fn load_header(&mut self) -> SpatialResult<Option<TreeHeader>> {
        Ok(self.header.tree.clone())
    }

    fn store_header(&mut self, header: &TreeHeader) -> SpatialResult<()> {
        if self.header.tree.as_ref() != Some(header) {
            self.header.tree = Some(header.clone());
            self.header_dirty = true;
        }
        Ok(())
    }

    fn flush(&mut self) -> SpatialResult<()> {
        if self.header_dirty {
            self.storage.write_header(&self.header)?;
            self.header_dirty = false;
        }
        self.storage.sync()
    }

    fn clear(&mut self) -> SpatialResult<()> {
        self.header = FileHeader::new(self.page_size());
        self.storage.truncate()?;
        self.storage.write_header(&self.header)?;
        self.header_dirty = false;
        self.storage.sync()
    }

    fn verify(&mut self) -> SpatialResult<Vec<String>> {
        match FreeListManager::free_pages(&mut self.storage, &self.header) {
            Ok(pages) if pages.len() as u64 != self.header.free_page_count => Ok(vec![format!(
                "free list holds {} pages, header counts {}",
                pages.len(),
                self.header.free_page_count
            )]),
            Ok(_) => Ok(Vec::new()),
            Err(SpatialError::Corrupted(message)) => Ok(vec![message]),
            Err(e) => Err(e),
        }
    }

    fn statistics(&self) -> PageFileStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rstar_tree::rtree_types::Entry;
    use tempfile::tempdir;

    fn leaf_with(page_id: PageId, ids: &[u64]) -> Node {
        let mut node = Node::new_leaf(page_id);
        for &id in ids {
            node.entries.push(Entry::leaf(id, vec![id as f64, 0.0]));
        }
        node
    }

    #[test]
    fn test_memory_write_read() {
        let mut file = MemoryPageFile::new(4096);
        let page_id = file.allocate().unwrap();
        assert_eq!(page_id, 1);

        let node = leaf_with(page_id, &[1, 2, 3]);
        file.write_page(&node).unwrap();
        assert_eq!(file.read_page(page_id).unwrap(), node);
        assert_eq!(file.statistics().writes, 1);
        assert_eq!(file.statistics().reads, 1);
    }

    #[test]
    fn test_memory_read_missing_page() {
        let mut file = MemoryPageFile::new(4096);
        assert!(matches!(file.read_page(9), Err(SpatialError::PageNotFound(9))));
    }

    #[test]
    fn test_memory_free_reuses_page_ids() {
        let mut file = MemoryPageFile::new(4096);
        let a = file.allocate().unwrap();
        let b = file.allocate().unwrap();
        file.write_page(&leaf_with(a, &[1])).unwrap();
        file.free(a).unwrap();
        assert!(file.read_page(a).is_err());
        assert_eq!(file.allocate().unwrap(), a);
        assert_eq!(file.allocate().unwrap(), b + 1);
    }

    #[test]
    fn test_memory_capacity_exhausted() {
        let mut file = MemoryPageFile::new(4096).with_max_pages(Some(2));
        file.allocate().unwrap();
        let second = file.allocate().unwrap();
        assert!(matches!(
            file.allocate(),
            Err(SpatialError::CapacityExhausted { max_pages: 2 })
        ));
        file.free(second).unwrap();
        assert!(file.allocate().is_ok());
    }

    #[test]
    fn test_memory_rejects_header_page() {
        let mut file = MemoryPageFile::new(4096);
        assert!(file.write_page(&Node::new_leaf(0)).is_err());
    }

    #[test]
    fn test_storage_header_read_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.rstar");
        let mut storage = Storage::create(&path, 1024).unwrap();

        let mut header = FileHeader::new(1024);
        header.next_page_id = 5;
        header.tree = Some(TreeHeader {
            dimensionality: 2,
            root_page: 1,
            height: 3,
            leaf_capacity: 10,
            dir_capacity: 12,
            leaf_min_fill: 4,
            dir_min_fill: 4,
            entry_count: 100,
        });
        storage.write_header(&header).unwrap();

        let read_header = storage.read_header().unwrap();
        assert_eq!(read_header.next_page_id, 5);
        assert_eq!(read_header.tree, header.tree);
    }

    #[test]
    fn test_storage_page_zero_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.rstar");
        let mut storage = Storage::create(&path, 1024).unwrap();
        assert!(storage.write_page(&Node::new_leaf(0)).is_err());
        assert!(storage.read_page(0).is_err());
    }

    #[test]
    fn test_storage_page_overflow() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.rstar");
        let mut storage = Storage::create(&path, 128).unwrap();
        let ids: Vec<u64> = (0..32).collect();
        let result = storage.write_page(&leaf_with(1, &ids));
        assert!(matches!(result, Err(SpatialError::PageOverflow { page_id: 1, .. })));
    }

    #[test]
    fn test_persistent_roundtrip_after_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.rstar");
        let node = leaf_with(1, &[4, 5]);
        let tree_header = TreeHeader {
            dimensionality: 2,
            root_page: 1,
            height: 0,
            leaf_capacity: 10,
            dir_capacity: 10,
            leaf_min_fill: 4,
            dir_min_fill: 4,
            entry_count: 2,
        };

        {
            let mut file = PersistentPageFile::create(&path, 1024).unwrap();
            let page_id = file.allocate().unwrap();
            assert_eq!(page_id, 1);
            file.write_page(&node).unwrap();
            file.store_header(&tree_header).unwrap();
            file.flush().unwrap();
        }

        let mut file = PersistentPageFile::open(&path, 1024).unwrap();
        assert_eq!(file.load_header().unwrap(), Some(tree_header));
        assert_eq!(file.read_page(1).unwrap(), node);
        assert_eq!(file.allocate().unwrap(), 2);
    }

    #[test]
    fn test_persistent_open_rejects_other_page_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.rstar");
        PersistentPageFile::create(&path, 1024).unwrap();
        assert!(matches!(
            PersistentPageFile::open(&path, 2048),
            Err(SpatialError::Config(_))
        ));
    }

    #[test]
    fn test_persistent_free_list_reuse() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.rstar");
        let mut file = PersistentPageFile::create(&path, 1024).unwrap();

        let ids: Vec<PageId> = (0..4).map(|_| file.allocate().unwrap()).collect();
        for &id in &ids {
            file.write_page(&leaf_with(id, &[id])).unwrap();
        }
        file.free(ids[1]).unwrap();
        file.free(ids[3]).unwrap();
        assert_eq!(file.file_header().free_page_count, 2);

        // LIFO chain
        assert_eq!(file.allocate().unwrap(), ids[3]);
        assert_eq!(file.allocate().unwrap(), ids[1]);
        assert_eq!(file.allocate().unwrap(), 5);
        assert_eq!(file.file_header().free_page_count, 0);
    }

    #[test]
    fn test_persistent_verify_free_list_count() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.rstar");
        let mut file = PersistentPageFile::create(&path, 1024).unwrap();
        let ids: Vec<PageId> = (0..4).map(|_| file.allocate().unwrap()).collect();
        file.free(ids[0]).unwrap();
        file.free(ids[2]).unwrap();
        assert!(file.verify().unwrap().is_empty());

        file.header.free_page_count += 1;
        let problems = file.verify().unwrap();
        assert_eq!(problems, vec!["free list holds 2 pages, header counts 3".to_string()]);
    }

    #[test]
    fn test_memory_verify_flags_live_free_page() {
        let mut file = MemoryPageFile::new(1024);
        let id = file.allocate().unwrap();
        file.write_page(&leaf_with(id, &[1])).unwrap();
        assert!(file.verify().unwrap().is_empty());

        file.free_pages.push(id);
        assert_eq!(file.verify().unwrap().len(), 1);
    }

    #[test]
    fn test_persistent_capacity_exhausted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.rstar");
        let mut file = PersistentPageFile::create(&path, 1024)
            .unwrap()
            .with_max_pages(Some(2));
        file.allocate().unwrap();
        file.allocate().unwrap();
        assert!(matches!(
            file.allocate(),
            Err(SpatialError::CapacityExhausted { max_pages: 2 })
        ));
    }

    #[test]
    fn test_persistent_clear() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.rstar");
        let mut file = PersistentPageFile::create(&path, 1024).unwrap();
        let id = file.allocate().unwrap();
        file.write_page(&leaf_with(id, &[1])).unwrap();
        file.clear().unwrap();

        assert!(file.load_header().unwrap().is_none());
        assert!(matches!(file.read_page(id), Err(SpatialError::PageNotFound(_))));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 1024);
    }
}
