//! RStarTree implementation.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{NodeCapacities, TreeConfig};
use crate::distance::SpatialDistance;
use crate::rectangle::{same_bounds, volume, volume_union, Rectangle};
use crate::relation::Relation;

use super::overflow::{OverflowAction, OverflowTreatment};
use super::persistence::IntegrityReport;
use super::query::{KnnSearcher, RangeSearcher};
use super::rtree_cache::LruPageFile;
use super::rtree_storage::{MemoryPageFile, PageFile, PersistentPageFile};
use super::rtree_types::{
    Entry, Node, ObjectId, PageId, RTreeStats, SpatialError, SpatialResult, TreeHeader,
};
use super::split::topological_split;

/// Tree kept entirely in memory.
pub type MemoryRStarTree = RStarTree<MemoryPageFile>;

/// Tree stored in a page file behind an LRU cache.
pub type PersistentRStarTree = RStarTree<LruPageFile<PersistentPageFile>>;

/// Directories visited on the way down: (page, position of the child taken).
type TreePath = Vec<(PageId, usize)>;

/// A paged R*-tree over points of a fixed dimensionality.
///
/// Mutations take `&mut self`. Queries take `&self` and only serialise on
/// page access, so several queries may share a tree across scoped threads.
///
/// ## Example
///
/// ```rust
/// use spatial_rstar::{RStarTree, TreeConfig};
///
/// let config = TreeConfig::builder().dimensionality(2).build().unwrap();
/// let mut tree = RStarTree::in_memory(config).unwrap();
/// tree.insert(1, &[0.0, 0.0]).unwrap();
/// tree.insert(2, &[3.0, 4.0]).unwrap();
///
/// let nearest = tree.knn_search(&[1.0, 1.0], 1).unwrap();
/// assert_eq!(nearest[0].0, 1);
/// ```
pub struct RStarTree<P: PageFile> {
    page_file: Mutex<P>,
    config: TreeConfig,
    header: TreeHeader,
    capacities: NodeCapacities,
    distance: Arc<dyn SpatialDistance>,
    overflow: Box<dyn OverflowTreatment>,
    stats: QueryStatistics,
    closed: bool,
    poisoned: bool,
}

/// Internal statistics tracking
#[derive(Default)]
struct QueryStatistics {
    distance_computations: AtomicU64,
    knn_queries: AtomicU64,
    range_queries: AtomicU64,
}

impl RStarTree<MemoryPageFile> {
    /// Creates an empty tree without backing file.
    pub fn in_memory(config: TreeConfig) -> SpatialResult<Self> {
        let page_file = MemoryPageFile::new(config.page_size()).with_max_pages(config.max_pages());
        Self::with_page_file(page_file, config)
    }
}

impl RStarTree<LruPageFile<PersistentPageFile>> {
    /// Creates a new, empty tree at `path`, truncating any existing file.
    pub fn create(path: impl AsRef<Path>, config: TreeConfig) -> SpatialResult<Self> {
        let file = PersistentPageFile::create(path, config.page_size())?
            .with_max_pages(config.max_pages());
        let tree = Self::with_page_file(LruPageFile::new(file, config.cache_size()), config)?;
        tree.flush()?;
        Ok(tree)
    }

    /// Opens a tree written by [`RStarTree::create`].
    ///
    /// Only the header page is read; nodes are loaded on demand.
    pub fn open(path: impl AsRef<Path>, config: TreeConfig) -> SpatialResult<Self> {
        let mut file = PersistentPageFile::open(path, config.page_size())?
            .with_max_pages(config.max_pages());
        if file.load_header()?.is_none() {
            return Err(SpatialError::Corrupted("page file holds no tree".into()));
        }
        Self::with_page_file(LruPageFile::new(file, config.cache_size()), config)
    }
}

impl<P: PageFile> RStarTree<P> {
    /// Builds a tree on top of any page file.
    ///
    /// If the page file already stores tree metadata the tree continues from
    /// it, and the capacities stored there win over the configured ones.
    pub fn with_page_file(mut page_file: P, config: TreeConfig) -> SpatialResult<Self> {
        let header = match page_file.load_header()? {
            Some(header) => {
                if header.dimensionality as usize != config.dimensionality() {
                    return Err(SpatialError::DimensionMismatch {
                        expected: header.dimensionality as usize,
                        actual: config.dimensionality(),
                    });
                }
                log::debug!(
                    "Loaded tree with {} entries, height {}, root page {}",
                    header.entry_count,
                    header.height,
                    header.root_page
                );
                header
            }
            None => {
                let caps = config.capacities();
                let header = TreeHeader {
                    dimensionality: config.dimensionality() as u32,
                    root_page: 0,
                    height: 0,
                    leaf_capacity: caps.leaf_capacity as u32,
                    dir_capacity: caps.dir_capacity as u32,
                    leaf_min_fill: caps.leaf_min_fill as u32,
                    dir_min_fill: caps.dir_min_fill as u32,
                    entry_count: 0,
                };
                page_file.store_header(&header)?;
                header
            }
        };

        let capacities = NodeCapacities {
            leaf_capacity: header.leaf_capacity as usize,
            dir_capacity: header.dir_capacity as usize,
            leaf_min_fill: header.leaf_min_fill as usize,
            dir_min_fill: header.dir_min_fill as usize,
        };
        if capacities.leaf_capacity < 2 || capacities.dir_capacity < 2 {
            return Err(SpatialError::Corrupted(format!(
                "stored capacities {:?} are below 2",
                capacities
            )));
        }

        Ok(Self {
            page_file: Mutex::new(page_file),
            distance: config.metric().instance(),
            overflow: config.overflow_treatment()?,
            config,
            header,
            capacities,
            stats: QueryStatistics::default(),
            closed: false,
            poisoned: false,
        })
    }

    /// Replaces the overflow treatment built from the configuration.
    pub fn with_overflow_treatment(mut self, overflow: Box<dyn OverflowTreatment>) -> Self {
        self.overflow = overflow;
        self
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    pub fn capacities(&self) -> NodeCapacities {
        self.capacities
    }

    pub fn dimensionality(&self) -> usize {
        self.header.dimensionality as usize
    }

    /// The metric of [`range_search`](Self::range_search) and
    /// [`knn_search`](Self::knn_search).
    pub fn distance(&self) -> &Arc<dyn SpatialDistance> {
        &self.distance
    }

    /// Number of indexed objects.
    pub fn len(&self) -> u64 {
        self.header.entry_count
    }

    pub fn is_empty(&self) -> bool {
        self.header.entry_count == 0
    }

    /// Edges from the root to the leaves; 0 while the root is a leaf.
    pub fn height(&self) -> usize {
        self.header.height as usize
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Get comprehensive statistics
    pub fn statistics(&self) -> RTreeStats {
        RTreeStats {
            total_entries: self.header.entry_count,
            tree_height: self.header.height,
            leaf_capacity: self.capacities.leaf_capacity,
            dir_capacity: self.capacities.dir_capacity,
            distance_computations: self.stats.distance_computations.load(Ordering::Relaxed),
            knn_queries: self.stats.knn_queries.load(Ordering::Relaxed),
            range_queries: self.stats.range_queries.load(Ordering::Relaxed),
            reinsertions: self.overflow.reinsertions_performed(),
            page_file: self.page_file.lock().statistics(),
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Range searcher over this tree using `distance`.
    pub fn range_searcher(&self, distance: Arc<dyn SpatialDistance>) -> RangeSearcher<'_, P> {
        RangeSearcher::new(self, distance)
    }

    /// k-NN searcher over this tree using `distance`.
    pub fn knn_searcher(&self, distance: Arc<dyn SpatialDistance>) -> KnnSearcher<'_, P> {
        KnnSearcher::new(self, distance)
    }

    /// All objects within `radius` of `query`, sorted by (distance, id).
    pub fn range_search(&self, query: &[f64], radius: f64) -> SpatialResult<Vec<(ObjectId, f64)>> {
        self.range_searcher(self.distance.clone()).search(query, radius)
    }

    /// The `k` objects nearest to `query`, sorted by (distance, id).
    pub fn knn_search(&self, query: &[f64], k: usize) -> SpatialResult<Vec<(ObjectId, f64)>> {
        self.knn_searcher(self.distance.clone()).search(query, k)
    }

    // ------------------------------------------------------------------
    // Insertion
    // ------------------------------------------------------------------

    /// Inserts `point` under `id`.
    ///
    /// Ids are expected to be unique; the tree does not check for duplicates.
    pub fn insert(&mut self, id: ObjectId, point: &[f64]) -> SpatialResult<()> {
        self.check_usable()?;
        self.validate_point(point)?;
        self.overflow.reinitialize();
        self.guarded(|tree| {
            tree.insert_entry(Entry::leaf(id, point.to_vec()), 0)?;
            tree.header.entry_count += 1;
            tree.store_header()
        })?;
        self.verify_after("insert");
        Ok(())
    }

    /// Places `entry` into a node at leaf-relative `level`.
    fn insert_entry(&mut self, entry: Entry, level: usize) -> SpatialResult<()> {
        if self.header.root_page == 0 {
            if !entry.is_leaf() {
                return Err(SpatialError::InvalidOperation(
                    "cannot insert a directory entry into an empty tree".into(),
                ));
            }
            let page_id = self.allocate_page()?;
            let mut root = Node::new_leaf(page_id);
            root.entries.push(entry);
            self.write_node(&root)?;
            self.header.root_page = page_id;
            self.header.height = 0;
            return Ok(());
        }

        let (path, target) = self.choose_path(&entry, level)?;
        let mut node = self.read_node(target)?;
        node.entries.push(entry);
        self.adjust_tree(node, path, level)
    }

    /// Descends from the root to the node at `level` best suited for `entry`.
    fn choose_path(&self, entry: &Entry, level: usize) -> SpatialResult<(TreePath, PageId)> {
        let mut path = Vec::with_capacity(self.header.height as usize);
        let mut page_id = self.header.root_page;
        let mut node_level = self.header.height as usize;
        while node_level > level {
            let node = self.read_node(page_id)?;
            let position = choose_subtree(&node, entry)?;
            log::trace!("Descending from page {} into child #{}", page_id, position);
            path.push((page_id, position));
            page_id = node.entries[position]
                .child()
                .ok_or_else(|| corrupted_entry(page_id))?;
            node_level -= 1;
        }
        Ok((path, page_id))
    }

    /// Writes `node` and resolves overflows bottom-up along `path`.
    fn adjust_tree(
        &mut self,
        mut node: Node,
        mut path: TreePath,
        mut level: usize,
    ) -> SpatialResult<()> {
        loop {
            if node.len() <= self.capacity_of(&node) {
                self.write_node(&node)?;
                return self.propagate_mbr(&path, &node);
            }

            let is_root = path.is_empty();
            let mbr = self.stored_mbr(&path, &node)?;

            match self.overflow.handle_overflow(&node, &mbr, level, is_root) {
                OverflowAction::Reinsert(positions) => {
                    let evicted = take_entries(&mut node, &positions);
                    self.write_node(&node)?;
                    self.propagate_mbr(&path, &node)?;
                    for entry in evicted {
                        self.insert_entry(entry, level)?;
                    }
                    return Ok(());
                }
                OverflowAction::Split => {
                    let sibling = self.split_node(&mut node)?;
                    match path.pop() {
                        None => return self.grow_root(&node, &sibling),
                        Some((parent_id, position)) => {
                            let mut parent = self.read_node(parent_id)?;
                            parent.entries[position] = directory_entry(&node)?;
                            parent.entries.push(directory_entry(&sibling)?);
                            node = parent;
                            level += 1;
                        }
                    }
                }
            }
        }
    }

    /// MBR of `node` as its parent last recorded it, i.e. before the entry
    /// that made it overflow. The root has no parent entry and uses its
    /// current MBR.
    fn stored_mbr(&self, path: &[(PageId, usize)], node: &Node) -> SpatialResult<Rectangle> {
        let Some(&(parent_id, position)) = path.last() else {
            return node
                .compute_mbr()
                .ok_or_else(|| SpatialError::Corrupted(format!("page {} is empty", node.page_id)));
        };
        let parent = self.read_node(parent_id)?;
        match parent.entries.get(position) {
            Some(Entry::Directory { child, mbr }) if *child == node.page_id => Ok(mbr.clone()),
            _ => Err(corrupted_entry(parent_id)),
        }
    }

    /// Moves part of `node`'s entries into a new sibling page and writes both.
    fn split_node(&mut self, node: &mut Node) -> SpatialResult<Node> {
        let min_fill = self.min_fill_of(node);
        let partition = topological_split(&node.entries, min_fill);
        let page_id = self.allocate_page()?;

        let mut slots: Vec<Option<Entry>> = std::mem::take(&mut node.entries)
            .into_iter()
            .map(Some)
            .collect();
        node.entries = partition
            .first
            .iter()
            .filter_map(|&i| slots[i].take())
            .collect();

        let mut sibling = if node.is_leaf() {
            Node::new_leaf(page_id)
        } else {
            Node::new_directory(page_id)
        };
        sibling.entries = partition
            .second
            .iter()
            .filter_map(|&i| slots[i].take())
            .collect();

        log::debug!(
            "Split page {} into {} + {} entries (new page {})",
            node.page_id,
            node.len(),
            sibling.len(),
            page_id
        );
        self.write_node(node)?;
        self.write_node(&sibling)?;
        Ok(sibling)
    }

    fn grow_root(&mut self, old_root: &Node, sibling: &Node) -> SpatialResult<()> {
        let page_id = self.allocate_page()?;
        let mut root = Node::new_directory(page_id);
        root.entries.push(directory_entry(old_root)?);
        root.entries.push(directory_entry(sibling)?);
        self.write_node(&root)?;

        self.header.root_page = page_id;
        self.header.height += 1;
        log::debug!("Root split: new root page {} at height {}", page_id, self.header.height);
        Ok(())
    }

    /// Refreshes the directory entries above `child` until one is unchanged.
    fn propagate_mbr(&self, path: &[(PageId, usize)], child: &Node) -> SpatialResult<()> {
        let mut entry = directory_entry(child)?;
        for &(parent_id, position) in path.iter().rev() {
            let mut parent = self.read_node(parent_id)?;
            if parent.entries[position] == entry {
                break;
            }
            parent.entries[position] = entry;
            self.write_node(&parent)?;
            entry = directory_entry(&parent)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Deletion
    // ------------------------------------------------------------------

    /// Removes the object `id`, searching every leaf. Returns `false` if the
    /// tree does not contain it.
    pub fn delete(&mut self, id: ObjectId) -> SpatialResult<bool> {
        self.delete_matching(id, None)
    }

    /// Removes the object `id` stored at `point`, only descending into
    /// subtrees whose MBR contains the point.
    pub fn delete_at(&mut self, id: ObjectId, point: &[f64]) -> SpatialResult<bool> {
        self.validate_point(point)?;
        self.delete_matching(id, Some(point))
    }

    fn delete_matching(&mut self, id: ObjectId, point: Option<&[f64]>) -> SpatialResult<bool> {
        self.check_usable()?;
        if self.header.root_page == 0 {
            return Ok(false);
        }

        let mut path = Vec::new();
        let Some((leaf_id, position)) =
            self.find_leaf(self.header.root_page, id, point, &mut path)?
        else {
            return Ok(false);
        };

        self.guarded(|tree| {
            let mut leaf = tree.read_node(leaf_id)?;
            leaf.entries.remove(position);
            tree.condense_tree(leaf, path)?;
            tree.header.entry_count = tree.header.entry_count.saturating_sub(1);
            tree.store_header()
        })?;
        self.verify_after("delete");
        Ok(true)
    }

    fn find_leaf(
        &self,
        page_id: PageId,
        id: ObjectId,
        point: Option<&[f64]>,
        path: &mut TreePath,
    ) -> SpatialResult<Option<(PageId, usize)>> {
        let node = self.read_node(page_id)?;
        if node.is_leaf() {
            let position = node.entries.iter().position(|entry| match entry {
                Entry::Leaf { id: entry_id, point: coords } => {
                    *entry_id == id && point.map_or(true, |p| p == coords.as_slice())
                }
                Entry::Directory { .. } => false,
            });
            return Ok(position.map(|position| (page_id, position)));
        }

        for (position, entry) in node.entries.iter().enumerate() {
            if let Entry::Directory { child, mbr } = entry {
                if point.is_some_and(|p| !mbr.contains(p)) {
                    continue;
                }
                path.push((page_id, position));
                if let Some(found) = self.find_leaf(*child, id, point, path)? {
                    return Ok(Some(found));
                }
                path.pop();
            }
        }
        Ok(None)
    }

    /// Dissolves underflowing nodes along `path`, shrinks the root and
    /// reinserts the objects of dissolved nodes.
    fn condense_tree(&mut self, mut node: Node, mut path: TreePath) -> SpatialResult<()> {
        let mut orphans = Vec::new();
        while let Some((parent_id, position)) = path.pop() {
            let mut parent = self.read_node(parent_id)?;
            if node.len() < self.min_fill_of(&node) {
                log::debug!(
                    "Page {} underflows with {} entries, dissolving it",
                    node.page_id,
                    node.len()
                );
                parent.entries.remove(position);
                self.free_page(node.page_id)?;
                orphans.push(node);
            } else {
                self.write_node(&node)?;
                parent.entries[position] = directory_entry(&node)?;
            }
            node = parent;
        }
        self.shrink_root(node)?;

        for orphan in orphans {
            self.reinsert_subtree(orphan)?;
        }
        Ok(())
    }

    /// Writes the root, collapsing directory roots with a single child and
    /// dropping an empty root.
    fn shrink_root(&mut self, mut root: Node) -> SpatialResult<()> {
        loop {
            if root.is_empty() {
                self.free_page(root.page_id)?;
                self.header.root_page = 0;
                self.header.height = 0;
                log::debug!("Tree is empty, root page {} released", root.page_id);
                return Ok(());
            }
            if root.is_leaf() || root.len() > 1 {
                return self.write_node(&root);
            }

            let child = root.entries[0]
                .child()
                .ok_or_else(|| corrupted_entry(root.page_id))?;
            self.free_page(root.page_id)?;
            self.header.root_page = child;
            self.header.height = self.header.height.saturating_sub(1);
            log::debug!("Root collapsed into page {}, height {}", child, self.header.height);
            root = self.read_node(child)?;
        }
    }

    /// Frees every page below an already freed node and reinserts its
    /// objects one by one.
    fn reinsert_subtree(&mut self, orphan: Node) -> SpatialResult<()> {
        let mut objects = Vec::new();
        let mut pending = vec![orphan];
        while let Some(node) = pending.pop() {
            if node.is_leaf() {
                objects.extend(node.entries);
                continue;
            }
            for entry in node.entries {
                let child = entry.child().ok_or_else(|| corrupted_entry(node.page_id))?;
                pending.push(self.read_node(child)?);
                self.free_page(child)?;
            }
        }

        log::debug!("Reinserting {} objects of dissolved pages", objects.len());
        for entry in objects {
            self.overflow.reinitialize();
            self.insert_entry(entry, 0)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Bulk load
    // ------------------------------------------------------------------

    /// Builds the tree bottom-up from every object of `relation`.
    ///
    /// # Errors
    ///
    /// The tree must be empty; otherwise this fails with
    /// [`SpatialError::InvalidOperation`].
    pub fn bulk_load(&mut self, relation: &dyn Relation) -> SpatialResult<()> {
        self.check_usable()?;
        if self.header.root_page != 0 {
            return Err(SpatialError::InvalidOperation(
                "bulk load requires an empty tree".into(),
            ));
        }
        if relation.dimensionality() != self.dimensionality() {
            return Err(SpatialError::DimensionMismatch {
                expected: self.dimensionality(),
                actual: relation.dimensionality(),
            });
        }

        let mut objects = Vec::with_capacity(relation.len());
        for id in relation.ids() {
            let point = relation.get(id).ok_or_else(|| {
                SpatialError::InvalidOperation(format!("relation lists id {} without data", id))
            })?;
            self.validate_point(point)?;
            objects.push(Entry::leaf(id, point.to_vec()));
        }
        if objects.is_empty() {
            return Ok(());
        }

        let count = objects.len() as u64;
        self.guarded(|tree| {
            tree.build_bottom_up(objects)?;
            tree.header.entry_count = count;
            tree.store_header()
        })?;
        log::debug!(
            "Bulk loaded {} objects with {:?}, height {}",
            count,
            self.config.bulk_split(),
            self.header.height
        );
        self.verify_after("bulk load");
        Ok(())
    }

    fn build_bottom_up(&mut self, objects: Vec<Entry>) -> SpatialResult<()> {
        let strategy = self.config.bulk_split();
        let mut entries = objects;
        let mut leaf = true;
        let mut height = 0u32;
        loop {
            let (min_fill, capacity) = if leaf {
                (self.capacities.leaf_min_fill, self.capacities.leaf_capacity)
            } else {
                (self.capacities.dir_min_fill, self.capacities.dir_capacity)
            };
            let groups = strategy.partition(entries, min_fill, capacity);

            let mut parents = Vec::with_capacity(groups.len());
            for group in groups {
                let page_id = self.allocate_page()?;
                let node = Node {
                    page_id,
                    leaf,
                    entries: group,
                };
                self.write_node(&node)?;
                parents.push(directory_entry(&node)?);
            }
            log::debug!("Bulk load level {}: {} pages", height, parents.len());

            if parents.len() == 1 {
                self.header.root_page = parents[0]
                    .child()
                    .ok_or_else(|| SpatialError::Corrupted("bulk load lost its root".into()))?;
                self.header.height = height;
                return Ok(());
            }
            entries = parents;
            leaf = false;
            height += 1;
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Removes every object and releases all pages. Also recovers a
    /// poisoned tree.
    pub fn clear(&mut self) -> SpatialResult<()> {
        self.check_open()?;
        self.page_file.get_mut().clear()?;
        self.header.root_page = 0;
        self.header.height = 0;
        self.header.entry_count = 0;
        self.store_header()?;
        self.poisoned = false;
        self.flush()
    }

    /// Writes all dirty pages and the tree metadata to the backing store.
    pub fn flush(&self) -> SpatialResult<()> {
        self.check_open()?;
        let mut page_file = self.page_file.lock();
        page_file.store_header(&self.header)?;
        page_file.flush()
    }

    /// Flushes and closes the tree; later calls return
    /// [`SpatialError::Closed`].
    pub fn close(&mut self) -> SpatialResult<()> {
        if self.closed {
            return Ok(());
        }
        if !self.poisoned {
            self.flush()?;
        }
        self.closed = true;
        Ok(())
    }

    /// Walks the whole tree and reports structural violations.
    ///
    /// Checked: every directory entry stores the tight MBR of its child,
    /// all leaves sit at depth `height`, nodes hold only entries of their
    /// kind and never exceed their capacity, and the leaves hold exactly
    /// `len()` objects.
    pub fn check_integrity(&self) -> SpatialResult<IntegrityReport> {
        self.check_open()?;
        let mut report = IntegrityReport::new();
        for problem in self.page_file.lock().verify()? {
            report.fail(problem);
        }
        if self.header.root_page == 0 {
            if self.header.entry_count != 0 {
                report.fail(format!(
                    "empty tree claims {} entries",
                    self.header.entry_count
                ));
            }
            return Ok(report);
        }

        self.check_subtree(self.header.root_page, 0, None, &mut report);
        if report.leaf_entries != self.header.entry_count {
            report.fail(format!(
                "leaves hold {} objects, header counts {}",
                report.leaf_entries, self.header.entry_count
            ));
        }
        Ok(report)
    }

    fn check_subtree(
        &self,
        page_id: PageId,
        depth: u32,
        expected: Option<&Rectangle>,
        report: &mut IntegrityReport,
    ) {
        let node = match self.read_node(page_id) {
            Ok(node) => node,
            Err(e) => {
                report.fail(format!("page {}: {}", page_id, e));
                return;
            }
        };
        report.nodes_checked += 1;

        if node.page_id != page_id {
            report.fail(format!("page {} holds node {}", page_id, node.page_id));
        }
        if node.is_empty() {
            report.fail(format!("page {} is empty", page_id));
            return;
        }
        if node.len() > self.capacity_of(&node) {
            report.fail(format!(
                "page {} holds {} entries, capacity {}",
                page_id,
                node.len(),
                self.capacity_of(&node)
            ));
        }
        if let (Some(expected), Some(actual)) = (expected, node.compute_mbr()) {
            if !same_bounds(&actual, expected) {
                report.fail(format!(
                    "directory entry for page {} stores {}, actual MBR {}",
                    page_id, expected, actual
                ));
            }
        }

        if node.is_leaf() {
            if depth != self.header.height {
                report.fail(format!(
                    "leaf page {} at depth {}, height is {}",
                    page_id, depth, self.header.height
                ));
            }
            report.max_leaf_depth = report.max_leaf_depth.max(depth);
            for entry in &node.entries {
                match entry {
                    Entry::Leaf { point, .. } if point.len() == self.dimensionality() => {
                        report.leaf_entries += 1;
                    }
                    Entry::Leaf { id, point } => report.fail(format!(
                        "object {} on page {} has {} dimensions",
                        id,
                        page_id,
                        point.len()
                    )),
                    Entry::Directory { .. } => {
                        report.fail(format!("leaf page {} holds a directory entry", page_id))
                    }
                }
            }
            return;
        }

        if depth >= self.header.height {
            report.fail(format!(
                "directory page {} at depth {}, height is {}",
                page_id, depth, self.header.height
            ));
            return;
        }
        for entry in &node.entries {
            match entry {
                Entry::Directory { child, mbr } => {
                    self.check_subtree(*child, depth + 1, Some(mbr), report)
                }
                Entry::Leaf { id, .. } => {
                    report.fail(format!("directory page {} holds object {}", page_id, id))
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn check_open(&self) -> SpatialResult<()> {
        if self.closed {
            Err(SpatialError::Closed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn check_usable(&self) -> SpatialResult<()> {
        self.check_open()?;
        if self.poisoned {
            return Err(SpatialError::Poisoned);
        }
        Ok(())
    }

    pub(crate) fn validate_point(&self, point: &[f64]) -> SpatialResult<()> {
        if point.len() != self.dimensionality() {
            return Err(SpatialError::DimensionMismatch {
                expected: self.dimensionality(),
                actual: point.len(),
            });
        }
        if let Some(d) = point.iter().position(|c| !c.is_finite()) {
            return Err(SpatialError::Config(format!(
                "coordinate {} is not finite: {}",
                d, point[d]
            )));
        }
        Ok(())
    }

    /// Runs `op`; running out of pages poisons the tree.
    fn guarded<T>(&mut self, op: impl FnOnce(&mut Self) -> SpatialResult<T>) -> SpatialResult<T> {
        let result = op(self);
        if let Err(SpatialError::CapacityExhausted { max_pages }) = &result {
            log::error!(
                "Page file exhausted after {} pages, tree is unusable until cleared",
                max_pages
            );
            self.poisoned = true;
        }
        result
    }

    fn verify_after(&self, operation: &str) {
        if !self.config.extra_integrity_checks() {
            return;
        }
        match self.check_integrity() {
            Ok(report) if report.is_valid => {}
            Ok(report) => panic!("tree integrity violated after {}: {}", operation, report),
            Err(e) => panic!("integrity check failed after {}: {}", operation, e),
        }
    }

    /// Page of the root node, 0 while the tree is empty.
    pub fn root_page(&self) -> PageId {
        self.header.root_page
    }

    /// Reads a copy of the node stored on `page_id`.
    pub fn read_node(&self, page_id: PageId) -> SpatialResult<Node> {
        self.page_file.lock().read_page(page_id)
    }

    fn write_node(&self, node: &Node) -> SpatialResult<()> {
        self.page_file.lock().write_page(node)
    }

    fn allocate_page(&self) -> SpatialResult<PageId> {
        self.page_file.lock().allocate()
    }

    fn free_page(&self, page_id: PageId) -> SpatialResult<()> {
        self.page_file.lock().free(page_id)
    }

    fn store_header(&self) -> SpatialResult<()> {
        self.page_file.lock().store_header(&self.header)
    }

    fn capacity_of(&self, node: &Node) -> usize {
        if node.is_leaf() {
            self.capacities.leaf_capacity
        } else {
            self.capacities.dir_capacity
        }
    }

    fn min_fill_of(&self, node: &Node) -> usize {
        if node.is_leaf() {
            self.capacities.leaf_min_fill
        } else {
            self.capacities.dir_min_fill
        }
    }

    pub(crate) fn record_distance_computations(&self, count: u64) {
        self.stats
            .distance_computations
            .fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_knn_query(&self) {
        self.stats.knn_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_range_query(&self) {
        self.stats.range_queries.fetch_add(1, Ordering::Relaxed);
    }
}

/// Child with the least volume enlargement; ties go to the smaller volume,
/// then to the lower position.
fn choose_subtree(node: &Node, entry: &Entry) -> SpatialResult<usize> {
    let mut best: Option<(usize, f64, f64)> = None;
    for (position, child) in node.entries.iter().enumerate() {
        let area = volume(child);
        let enlargement = volume_union(child, entry) - area;
        let better = match best {
            None => true,
            Some((_, best_enlargement, best_area)) => {
                enlargement < best_enlargement
                    || (enlargement == best_enlargement && area < best_area)
            }
        };
        if better {
            best = Some((position, enlargement, area));
        }
    }
    best.map(|(position, _, _)| position)
        .ok_or_else(|| SpatialError::Corrupted(format!("directory page {} is empty", node.page_id)))
}

/// Removes the entries at `positions` from `node`, returning them in the
/// order of `positions`.
fn take_entries(node: &mut Node, positions: &[usize]) -> Vec<Entry> {
    let mut slots: Vec<Option<Entry>> = std::mem::take(&mut node.entries)
        .into_iter()
        .map(Some)
        .collect();
    let taken = positions.iter().filter_map(|&i| slots[i].take()).collect();
    node.entries = slots.into_iter().flatten().collect();
    taken
}

fn directory_entry(node: &Node) -> SpatialResult<Entry> {
    node.to_directory_entry()
        .ok_or_else(|| SpatialError::Corrupted(format!("page {} is empty", node.page_id)))
}

fn corrupted_entry(page_id: PageId) -> SpatialError {
    SpatialError::Corrupted(format!("directory page {} holds an object entry", page_id))
}

impl<P: PageFile> Drop for RStarTree<P> {
    fn drop(&mut self) {
        // Best effort flush on drop
        if !self.closed && !self.poisoned {
            let _ = self.flush();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
