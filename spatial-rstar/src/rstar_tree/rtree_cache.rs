//! LRU page cache for R*-tree pages.
//!
//! [`LruPageFile`] decorates another [`PageFile`] with a write-back cache.
//! Pages are only loaded from the inner file when first accessed; dirty pages
//! reach the inner file when they are evicted or on [`PageFile::flush`].

use lru::LruCache;

use super::rtree_storage::PageFile;
use super::rtree_types::{Node, PageFileStats, PageId, SpatialResult, TreeHeader};

/// A cached page with its data and dirty flag
struct CachedPage {
    node: Node,
    dirty: bool,
}

/// Write-back LRU cache in front of a page file.
///
/// The budget is given in bytes and converted to whole pages. A budget
/// smaller than one page turns the cache into a write-through pass.
pub struct LruPageFile<P: PageFile> {
    inner: P,
    pages: LruCache<PageId, CachedPage>,
    /// Maximum number of pages to cache
    max_pages: usize,
    hits: u64,
    misses: u64,
}

impl<P: PageFile> LruPageFile<P> {
    pub fn new(inner: P, cache_size: usize) -> Self {
        let max_pages = cache_size / inner.page_size().max(1);
        log::debug!(
            "Page cache of {} bytes holds {} pages of {} bytes",
            cache_size,
            max_pages,
            inner.page_size()
        );
        Self {
            inner,
            pages: LruCache::unbounded(),
            max_pages,
            hits: 0,
            misses: 0,
        }
    }

    /// Number of pages the cache may hold.
    pub fn max_pages(&self) -> usize {
        self.max_pages
    }

    /// Pages currently cached.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn into_inner(mut self) -> SpatialResult<P> {
        self.write_back_dirty()?;
        Ok(self.inner)
    }

    /// Insert a page, evicting least recently used pages beyond the budget.
    fn insert(&mut self, node: Node, dirty: bool) -> SpatialResult<()> {
        self.pages.put(node.page_id, CachedPage { node, dirty });
        while self.pages.len() > self.max_pages {
            match self.pages.pop_lru() {
                Some((_, evicted)) if evicted.dirty => self.inner.write_page(&evicted.node)?,
                Some(_) => {}
                None => break,
            }
        }
        Ok(())
    }

    fn write_back_dirty(&mut self) -> SpatialResult<()> {
        for (_, cached) in self.pages.iter_mut() {
            if cached.dirty {
                self.inner.write_page(&cached.node)?;
                cached.dirty = false;
            }
        }
        Ok(())
    }
}

impl<P: PageFile> PageFile for LruPageFile<P> {
    fn page_size(&self) -> usize {
        self.inner.page_size()
    }

    fn read_page(&mut self, page_id: PageId) -> SpatialResult<Node> {
        if let Some(cached) = self.pages.get(&page_id) {
            self.hits += 1;
            return Ok(cached.node.clone());
        }
        self.misses += 1;
        let node = self.inner.read_page(page_id)?;
        if self.max_pages > 0 {
            self.insert(node.clone(), false)?;
        }
        Ok(node)
    }

    fn write_page(&mut self, node: &Node) -> SpatialResult<()> {
        if self.max_pages == 0 {
            return self.inner.write_page(node);
        }
        self.insert(node.clone(), true)
    }

    fn allocate(&mut self) -> SpatialResult<PageId> {
        self.inner.allocate()
    }

    fn free(&mut self, page_id: PageId) -> SpatialResult<()> {
        self.pages.pop(&page_id);
        self.inner.free(page_id)
    }

    fn load_header(&mut self) -> SpatialResult<Option<TreeHeader>> {
        self.inner.load_header()
    }

    fn store_header(&mut self, header: &TreeHeader) -> SpatialResult<()> {
        self.inner.store_header(header)
    }

    fn flush(&mut self) -> SpatialResult<()> {
        self.write_back_dirty()?;
        self.inner.flush()
    }

    fn clear(&mut self) -> SpatialResult<()> {
        self.pages.clear();
        self.inner.clear()
    }

    fn verify(&mut self) -> SpatialResult<Vec<String>> {
        self.inner.verify()
    }

    fn statistics(&self) -> PageFileStats {
        let inner = self.inner.statistics();
        PageFileStats {
            reads: inner.reads,
            writes: inner.writes,
            cache_hits: self.hits,
            cache_misses: self.misses,
            resident_pages: self.pages.len() as u64,
        }
    }
}
