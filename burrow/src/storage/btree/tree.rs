//! B-tree operations.
//!
//! A [`BTree`] is a short-lived view over one database: it borrows the page
//! store, the database's directory descriptor and its comparator for the
//! duration of one public operation. Descents record the path of internal
//! nodes they pass so that splits and merges can be propagated upward
//! without parent pointers.

use std::cmp::Ordering;

use crate::comparator::Comparator;
use crate::error::{Error, Result};
use crate::params::{DbFlags, FindFlags};
use crate::storage::btree::duplicates::{
    DuplicateTable, free_record, load_record, store_record,
};
use crate::storage::btree::node::{Entry, EntryValue, Node, NodeKey, NodeLimits, RecordRef};
use crate::storage::header::DbDescriptor;
use crate::storage::overflow::{free_blob, read_blob, write_blob};
use crate::storage::page::PageId;
use crate::storage::store::PageStore;

/// Deepest tree accepted before the structure is considered corrupt.
const MAX_DEPTH: usize = 64;

/// Outcome of a binary search within one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchResult {
    Found(usize),
    /// The key belongs at this index.
    NotFound(usize),
}

/// A key's position in a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub leaf: PageId,
    pub index: usize,
}

/// Result of [`BTree::locate_near`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Neighborhood {
    Found(Slot),
    /// The key is absent; the nearest slots before and after it.
    Between(Option<Slot>, Option<Slot>),
}

/// Where a new duplicate goes among the existing ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicatePosition {
    First,
    Last,
    Before(usize),
    After(usize),
}

/// How an insert treats an existing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertMode {
    /// Fail with `DuplicateKey`.
    Unique,
    /// Replace the record at this duplicate index.
    Overwrite(usize),
    /// Add another record to the key.
    Duplicate(DuplicatePosition),
}

/// Result of an insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Duplicate index of the record written.
    pub duplicate: usize,
    /// True if an existing record was replaced.
    pub replaced: bool,
}

/// Shape of a tree, as found by [`BTree::check_integrity`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub depth: usize,
    pub internal_nodes: usize,
    pub leaves: usize,
    pub keys: u64,
    pub records: u64,
}

struct PathStep {
    page: PageId,
    node: Node,
    child: usize,
}

enum Rebalance {
    Merged,
    Borrowed,
    Unchanged,
}

/// A B-tree of one database.
pub struct BTree<'a> {
    store: &'a mut PageStore,
    descriptor: &'a mut DbDescriptor,
    comparator: &'a Comparator,
    limits: NodeLimits,
    restructured: Vec<PageId>,
}

impl<'a> BTree<'a> {
    pub fn new(
        store: &'a mut PageStore,
        descriptor: &'a mut DbDescriptor,
        comparator: &'a Comparator,
    ) -> Self {
        let limits = NodeLimits::new(store.page_size(), descriptor.key_size);
        Self {
            store,
            descriptor,
            comparator,
            limits,
            restructured: Vec::new(),
        }
    }

    #[must_use]
    pub const fn limits(&self) -> &NodeLimits {
        &self.limits
    }

    /// Leaves split, merged, rebalanced or freed since the last call.
    pub fn take_restructured(&mut self) -> Vec<PageId> {
        std::mem::take(&mut self.restructured)
    }

    /// Allocate an empty root leaf for a new database.
    pub fn init(&mut self) -> Result<PageId> {
        let root = self.store.allocate()?;
        self.write_node(root, &mut Node::leaf())?;
        self.descriptor.root = root;
        Ok(root)
    }

    /// Binary search for `key` in a node.
    ///
    /// The last key is tried first, so ascending inserts cost a single
    /// comparison per node.
    pub fn search(&self, node: &Node, key: &[u8]) -> Result<SearchResult> {
        let len = node.entries.len();
        let Some(last) = node.entries.last() else {
            return Ok(SearchResult::NotFound(0));
        };
        match self.comparator.compare(key, &last.key.bytes)? {
            Ordering::Greater => return Ok(SearchResult::NotFound(len)),
            Ordering::Equal => return Ok(SearchResult::Found(len - 1)),
            Ordering::Less => {}
        }

        let (mut low, mut high) = (0, len - 1);
        while low < high {
            let mid = low + (high - low) / 2;
            match self.comparator.compare(key, &node.entries[mid].key.bytes)? {
                Ordering::Less => high = mid,
                Ordering::Greater => low = mid + 1,
                Ordering::Equal => return Ok(SearchResult::Found(mid)),
            }
        }
        Ok(SearchResult::NotFound(low))
    }

    /// Look up a key.
    pub fn find(&mut self, key: &[u8]) -> Result<Option<(Slot, Entry)>> {
        let (_, leaf_id, mut leaf) = self.descend(key)?;
        match self.search(&leaf, key)? {
            SearchResult::Found(index) => Ok(Some((
                Slot {
                    leaf: leaf_id,
                    index,
                },
                leaf.entries.swap_remove(index),
            ))),
            SearchResult::NotFound(_) => Ok(None),
        }
    }

    /// Find the key nearest to `key` allowed by `flags`.
    ///
    /// Empty flags mean an exact match. When both directions are allowed
    /// the smaller neighbor wins.
    pub fn find_approx(
        &mut self,
        key: &[u8],
        flags: FindFlags,
    ) -> Result<Option<(Slot, Ordering)>> {
        let exact = flags.is_empty() || flags.contains(FindFlags::EXACT);
        let (_, leaf_id, leaf) = self.descend(key)?;

        let (before, after) = match self.search(&leaf, key)? {
            SearchResult::Found(index) if exact => {
                return Ok(Some((
                    Slot {
                        leaf: leaf_id,
                        index,
                    },
                    Ordering::Equal,
                )));
            }
            SearchResult::Found(index) => (index, index + 1),
            SearchResult::NotFound(index) => (index, index),
        };

        if flags.contains(FindFlags::LESS_THAN)
            && let Some(slot) = self.predecessor(leaf_id, &leaf, before)?
        {
            return Ok(Some((slot, Ordering::Less)));
        }
        if flags.contains(FindFlags::GREATER_THAN)
            && let Some(slot) = self.successor(leaf_id, &leaf, after)?
        {
            return Ok(Some((slot, Ordering::Greater)));
        }
        Ok(None)
    }

    /// Number of records stored under `key` (0 if absent).
    pub fn count_key(&mut self, key: &[u8]) -> Result<usize> {
        Ok(self
            .find(key)?
            .map_or(0, |(_, entry)| entry.value.record_count()))
    }

    /// Insert a record.
    pub fn insert(&mut self, key: &[u8], record: &[u8], mode: InsertMode) -> Result<InsertOutcome> {
        let (path, leaf_id, mut leaf) = self.descend(key)?;

        let outcome = match self.search(&leaf, key)? {
            SearchResult::Found(index) => self.update_entry(&mut leaf.entries[index], record, mode)?,
            SearchResult::NotFound(index) => {
                let record = store_record(self.store, record, &self.limits)?;
                leaf.entries.insert(
                    index,
                    Entry {
                        key: NodeKey::new(key.to_vec()),
                        value: EntryValue::Record(record),
                    },
                );
                self.descriptor.key_count += 1;
                self.descriptor.record_count += 1;
                InsertOutcome {
                    duplicate: 0,
                    replaced: false,
                }
            }
        };

        self.write_or_split(path, leaf_id, leaf)?;
        Ok(outcome)
    }

    fn update_entry(
        &mut self,
        entry: &mut Entry,
        record: &[u8],
        mode: InsertMode,
    ) -> Result<InsertOutcome> {
        if mode == InsertMode::Unique {
            return Err(Error::DuplicateKey);
        }
        let mut table = DuplicateTable::load(self.store, &entry.value)?;
        let new_record = store_record(self.store, record, &self.limits)?;
        let (duplicate, replaced) = match mode {
            InsertMode::Unique => return Err(Error::DuplicateKey),
            // a sorted set keeps its order, so the new record may move
            InsertMode::Overwrite(position)
                if self.descriptor.flags.contains(DbFlags::SORT_DUPLICATES) =>
            {
                let old = table.remove_at(position)?;
                free_record(self.store, &old)?;
                (table.insert_sorted(self.store, new_record, record)?, true)
            }
            InsertMode::Overwrite(position) => {
                let old = table.replace_at(position, new_record)?;
                free_record(self.store, &old)?;
                (position, true)
            }
            InsertMode::Duplicate(_) if self.descriptor.flags.contains(DbFlags::SORT_DUPLICATES) => {
                (table.insert_sorted(self.store, new_record, record)?, false)
            }
            InsertMode::Duplicate(DuplicatePosition::First) => (table.insert_at(0, new_record)?, false),
            InsertMode::Duplicate(DuplicatePosition::Last) => (table.append(new_record), false),
            InsertMode::Duplicate(DuplicatePosition::Before(position)) => {
                (table.insert_at(position, new_record)?, false)
            }
            InsertMode::Duplicate(DuplicatePosition::After(position)) => {
                (table.insert_at(position + 1, new_record)?, false)
            }
        };

        entry.value = table
            .store(self.store, &entry.value, &self.limits)?
            .ok_or_else(|| Error::corrupted("duplicate set emptied by an insert"))?;
        if !replaced {
            self.descriptor.record_count += 1;
        }
        Ok(InsertOutcome {
            duplicate,
            replaced,
        })
    }

    /// Remove a key with all of its records.
    ///
    /// Returns the number of records removed.
    pub fn erase(&mut self, key: &[u8]) -> Result<usize> {
        let (path, leaf_id, mut leaf) = self.descend(key)?;
        let SearchResult::Found(index) = self.search(&leaf, key)? else {
            return Err(Error::KeyNotFound);
        };

        let entry = leaf.entries.remove(index);
        let removed = entry.value.record_count();
        self.free_entry(&entry)?;
        self.descriptor.record_count -= removed as u64;
        self.descriptor.key_count -= 1;

        self.rebalance(path, leaf_id, leaf)?;
        Ok(removed)
    }

    /// Remove one duplicate of a key.
    ///
    /// Returns true if it was the last record and the key is gone.
    pub fn erase_duplicate(&mut self, key: &[u8], position: usize) -> Result<bool> {
        let (path, leaf_id, mut leaf) = self.descend(key)?;
        let SearchResult::Found(index) = self.search(&leaf, key)? else {
            return Err(Error::KeyNotFound);
        };

        let entry = &mut leaf.entries[index];
        let mut table = DuplicateTable::load(self.store, &entry.value)?;
        let record = table.remove_at(position)?;
        free_record(self.store, &record)?;
        self.descriptor.record_count -= 1;

        let key_removed = match table.store(self.store, &entry.value, &self.limits)? {
            Some(value) => {
                entry.value = value;
                false
            }
            None => {
                let entry = leaf.entries.remove(index);
                self.free_key(&entry.key)?;
                self.descriptor.key_count -= 1;
                true
            }
        };

        self.rebalance(path, leaf_id, leaf)?;
        Ok(key_removed)
    }

    /// The records of a leaf entry.
    pub fn records(&mut self, entry: &Entry) -> Result<DuplicateTable> {
        DuplicateTable::load(self.store, &entry.value)
    }

    /// The bytes of one record.
    pub fn read_record(&mut self, record: &RecordRef) -> Result<Vec<u8>> {
        load_record(self.store, record)
    }

    /// The entry at a slot.
    pub fn entry(&mut self, slot: Slot) -> Result<Entry> {
        let mut leaf = self.load_leaf(slot.leaf)?;
        if slot.index >= leaf.entries.len() {
            return Err(Error::corrupted(format!(
                "slot {} past the end of leaf {}",
                slot.index, slot.leaf
            )));
        }
        Ok(leaf.entries.swap_remove(slot.index))
    }

    /// Position of an existing key.
    pub fn locate(&mut self, key: &[u8]) -> Result<Option<Slot>> {
        Ok(self.find(key)?.map(|(slot, _)| slot))
    }

    /// Where `key` is, or the slots on either side of where it would be.
    pub fn locate_near(&mut self, key: &[u8]) -> Result<Neighborhood> {
        let (_, leaf_id, leaf) = self.descend(key)?;
        match self.search(&leaf, key)? {
            SearchResult::Found(index) => Ok(Neighborhood::Found(Slot {
                leaf: leaf_id,
                index,
            })),
            SearchResult::NotFound(index) => Ok(Neighborhood::Between(
                self.predecessor(leaf_id, &leaf, index)?,
                self.successor(leaf_id, &leaf, index)?,
            )),
        }
    }

    /// The smallest key.
    pub fn first(&mut self) -> Result<Option<Slot>> {
        let mut page_id = self.root()?;
        for _ in 0..MAX_DEPTH {
            let node = self.load_node(page_id)?;
            if node.is_leaf() {
                return self.successor(page_id, &node, 0);
            }
            page_id = node.left_child;
        }
        Err(Error::corrupted("tree deeper than the depth limit"))
    }

    /// The largest key.
    pub fn last(&mut self) -> Result<Option<Slot>> {
        let mut page_id = self.root()?;
        for _ in 0..MAX_DEPTH {
            let node = self.load_node(page_id)?;
            if node.is_leaf() {
                let len = node.entries.len();
                return self.predecessor(page_id, &node, len);
            }
            page_id = node.child_at(node.entries.len())?;
        }
        Err(Error::corrupted("tree deeper than the depth limit"))
    }

    /// The key after `slot`.
    pub fn next(&mut self, slot: Slot) -> Result<Option<Slot>> {
        let leaf = self.load_leaf(slot.leaf)?;
        self.successor(slot.leaf, &leaf, slot.index + 1)
    }

    /// The key before `slot`.
    pub fn previous(&mut self, slot: Slot) -> Result<Option<Slot>> {
        let leaf = self.load_leaf(slot.leaf)?;
        self.predecessor(slot.leaf, &leaf, slot.index)
    }

    /// First slot at or after `index`, following right siblings.
    fn successor(&mut self, leaf_id: PageId, leaf: &Node, index: usize) -> Result<Option<Slot>> {
        if index < leaf.entries.len() {
            return Ok(Some(Slot {
                leaf: leaf_id,
                index,
            }));
        }
        let mut next = leaf.right_sibling;
        while next != 0 {
            let node = self.load_leaf(next)?;
            if !node.entries.is_empty() {
                return Ok(Some(Slot {
                    leaf: next,
                    index: 0,
                }));
            }
            next = node.right_sibling;
        }
        Ok(None)
    }

    /// Last slot before `index`, following left siblings.
    fn predecessor(&mut self, leaf_id: PageId, leaf: &Node, index: usize) -> Result<Option<Slot>> {
        if index > 0 {
            return Ok(Some(Slot {
                leaf: leaf_id,
                index: index.min(leaf.entries.len()) - 1,
            }));
        }
        let mut previous = leaf.left_sibling;
        while previous != 0 {
            let node = self.load_leaf(previous)?;
            if let Some(index) = node.entries.len().checked_sub(1) {
                return Ok(Some(Slot {
                    leaf: previous,
                    index,
                }));
            }
            previous = node.left_sibling;
        }
        Ok(None)
    }

    /// Free every page of the tree, including overflow chains.
    pub fn free_all(&mut self) -> Result<()> {
        let mut stack = vec![self.root()?];
        while let Some(page_id) = stack.pop() {
            let node = self.load_node(page_id)?;
            if node.is_leaf() {
                self.restructured.push(page_id);
            } else {
                stack.push(node.left_child);
            }
            for entry in &node.entries {
                if let EntryValue::Child(child) = entry.value {
                    stack.push(child);
                }
                self.free_entry(entry)?;
            }
            self.store.free(page_id)?;
        }
        self.descriptor.root = 0;
        self.descriptor.record_count = 0;
        self.descriptor.key_count = 0;
        Ok(())
    }

    /// Walk the whole tree and verify its invariants.
    ///
    /// Checks key order within and across nodes, uniform leaf depth, the
    /// leaf sibling chain, node sizes and the descriptor's counters.
    pub fn check_integrity(&mut self) -> Result<TreeStats> {
        let mut stats = TreeStats::default();
        let mut leaves = Vec::new();
        let root = self.root()?;
        self.check_node(root, None, None, 1, &mut stats, &mut leaves)?;

        for (i, (page_id, left, right)) in leaves.iter().enumerate() {
            let expected_left = if i == 0 { 0 } else { leaves[i - 1].0 };
            let expected_right = leaves.get(i + 1).map_or(0, |leaf| leaf.0);
            if *left != expected_left || *right != expected_right {
                return Err(Error::corrupted(format!(
                    "leaf {page_id} links ({left}, {right}), expected ({expected_left}, {expected_right})"
                )));
            }
        }

        if stats.keys != self.descriptor.key_count || stats.records != self.descriptor.record_count {
            return Err(Error::corrupted(format!(
                "tree holds {} keys and {} records, directory says {} and {}",
                stats.keys, stats.records, self.descriptor.key_count, self.descriptor.record_count
            )));
        }
        Ok(stats)
    }

    fn check_node(
        &mut self,
        page_id: PageId,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        depth: usize,
        stats: &mut TreeStats,
        leaves: &mut Vec<(PageId, PageId, PageId)>,
    ) -> Result<()> {
        if depth > MAX_DEPTH {
            return Err(Error::corrupted("tree deeper than the depth limit"));
        }
        let node = self.load_node(page_id)?;
        if !node.fits(&self.limits) {
            return Err(Error::corrupted(format!("node {page_id} overflows its page")));
        }

        for pair in node.entries.windows(2) {
            if self.comparator.compare(&pair[0].key.bytes, &pair[1].key.bytes)? != Ordering::Less {
                return Err(Error::corrupted(format!("keys out of order in node {page_id}")));
            }
        }
        if let (Some(lower), Some(first)) = (lower, node.entries.first())
            && self.comparator.compare(&first.key.bytes, lower)? == Ordering::Less
        {
            return Err(Error::corrupted(format!("node {page_id} has a key below its range")));
        }
        if let (Some(upper), Some(last)) = (upper, node.entries.last())
            && self.comparator.compare(&last.key.bytes, upper)? != Ordering::Less
        {
            return Err(Error::corrupted(format!("node {page_id} has a key above its range")));
        }

        if node.is_leaf() {
            if stats.depth == 0 {
                stats.depth = depth;
            } else if stats.depth != depth {
                return Err(Error::corrupted(format!("leaf {page_id} at depth {depth}")));
            }
            stats.leaves += 1;
            stats.keys += node.entries.len() as u64;
            stats.records += node.record_count() as u64;
            leaves.push((page_id, node.left_sibling, node.right_sibling));
            return Ok(());
        }

        stats.internal_nodes += 1;
        for child in 0..node.child_count() {
            let child_lower = if child == 0 {
                lower
            } else {
                Some(node.entries[child - 1].key.bytes.as_slice())
            };
            let child_upper = node
                .entries
                .get(child)
                .map_or(upper, |entry| Some(entry.key.bytes.as_slice()));
            let child_page = node.child_at(child)?;
            self.check_node(child_page, child_lower, child_upper, depth + 1, stats, leaves)?;
        }
        Ok(())
    }

    fn root(&self) -> Result<PageId> {
        match self.descriptor.root {
            0 => Err(Error::corrupted(format!(
                "database {} has no root page",
                self.descriptor.name
            ))),
            root => Ok(root),
        }
    }

    fn descend(&mut self, key: &[u8]) -> Result<(Vec<PathStep>, PageId, Node)> {
        let mut path = Vec::new();
        let mut page_id = self.root()?;
        loop {
            let node = self.load_node(page_id)?;
            if node.is_leaf() {
                return Ok((path, page_id, node));
            }
            if path.len() >= MAX_DEPTH {
                return Err(Error::corrupted("tree deeper than the depth limit"));
            }

            let child = match self.search(&node, key)? {
                SearchResult::Found(index) => index + 1,
                SearchResult::NotFound(index) => index,
            };
            let next = node.child_at(child)?;
            path.push(PathStep {
                page: page_id,
                node,
                child,
            });
            page_id = next;
        }
    }

    /// Write a node, splitting it and its ancestors as long as they overflow.
    fn write_or_split(&mut self, mut path: Vec<PathStep>, page_id: PageId, node: Node) -> Result<()> {
        let (mut page_id, mut node) = (page_id, node);
        loop {
            if node.fits(&self.limits) {
                return self.write_node(page_id, &mut node);
            }

            let (separator, right_id) = self.split(page_id, node)?;
            if let Some(PathStep {
                page: parent_id,
                node: mut parent,
                child,
            }) = path.pop()
            {
                parent.entries.insert(
                    child,
                    Entry {
                        key: separator,
                        value: EntryValue::Child(right_id),
                    },
                );
                page_id = parent_id;
                node = parent;
            } else {
                let root_id = self.store.allocate()?;
                let mut root = Node::internal(page_id);
                root.entries.push(Entry {
                    key: separator,
                    value: EntryValue::Child(right_id),
                });
                self.write_node(root_id, &mut root)?;
                self.descriptor.root = root_id;
                tracing::trace!(database = self.descriptor.name, root = root_id, "tree grew a level");
                return Ok(());
            }
        }
    }

    /// Split an overflowing node in two, writing both halves.
    ///
    /// Returns the separator for the parent and the new right page.
    fn split(&mut self, page_id: PageId, mut node: Node) -> Result<(NodeKey, PageId)> {
        let at = node.split_point(&self.limits);
        let right_id = self.store.allocate()?;
        let mut moved = node.entries.split_off(at);

        let (separator, mut right) = if node.is_leaf() {
            let separator = moved[0].key.detached();
            let mut right = Node::leaf();
            right.entries = moved;
            right.left_sibling = page_id;
            right.right_sibling = node.right_sibling;
            if node.right_sibling != 0 {
                let mut next = self.load_leaf(node.right_sibling)?;
                next.left_sibling = right_id;
                self.write_node(node.right_sibling, &mut next)?;
            }
            node.right_sibling = right_id;
            self.restructured.push(page_id);
            (separator, right)
        } else {
            let first = moved.remove(0);
            let mut right = Node::internal(first.child()?);
            right.entries = moved;
            (first.key, right)
        };

        self.write_node(page_id, &mut node)?;
        self.write_node(right_id, &mut right)?;
        Ok((separator, right_id))
    }

    /// Write a node after a removal, merging or refilling it when underfull.
    fn rebalance(&mut self, mut path: Vec<PathStep>, page_id: PageId, node: Node) -> Result<()> {
        let (mut page_id, mut node) = (page_id, node);
        loop {
            let Some(step) = path.pop() else {
                if !node.is_leaf() && node.entries.is_empty() {
                    self.descriptor.root = node.left_child;
                    self.store.free(page_id)?;
                    tracing::trace!(
                        database = self.descriptor.name,
                        root = node.left_child,
                        "tree lost a level"
                    );
                    return Ok(());
                }
                return self.write_node(page_id, &mut node);
            };

            if !node.is_underfull(&self.limits) || step.node.entries.is_empty() {
                return self.write_node(page_id, &mut node);
            }

            let PathStep {
                page: parent_id,
                node: mut parent,
                child,
            } = step;
            match self.fix_underflow(&mut parent, child, page_id, node)? {
                Rebalance::Unchanged => return Ok(()),
                Rebalance::Merged | Rebalance::Borrowed if !parent.fits(&self.limits) => {
                    return self.write_or_split(path, parent_id, parent);
                }
                Rebalance::Merged | Rebalance::Borrowed => {
                    page_id = parent_id;
                    node = parent;
                }
            }
        }
    }

    /// Merge an underfull child with a sibling, or move one entry over.
    fn fix_underflow(
        &mut self,
        parent: &mut Node,
        child: usize,
        page_id: PageId,
        node: Node,
    ) -> Result<Rebalance> {
        let node_is_left = child == 0;
        let separator = if node_is_left { 0 } else { child - 1 };
        let (left_id, mut left, right_id, mut right) = if node_is_left {
            let sibling = parent.child_at(1)?;
            (page_id, node, sibling, self.load_node(sibling)?)
        } else {
            let sibling = parent.child_at(child - 1)?;
            (sibling, self.load_node(sibling)?, page_id, node)
        };
        if left.kind != right.kind {
            return Err(Error::corrupted(format!(
                "siblings {left_id} and {right_id} differ in kind"
            )));
        }

        let mut merged_size = left.used_space(&self.limits) + right.used_space(&self.limits);
        let mut merged_count = left.entries.len() + right.entries.len();
        if !left.is_leaf() {
            let pulled_down = Entry {
                key: parent.entries[separator].key.clone(),
                value: EntryValue::Child(right.left_child),
            };
            merged_size += pulled_down.encoded_size(&self.limits);
            merged_count += 1;
        }

        if merged_count <= self.limits.max_keys && merged_size <= self.limits.usable {
            let removed = parent.entries.remove(separator);
            if left.is_leaf() {
                self.free_key(&removed.key)?;
                left.right_sibling = right.right_sibling;
                if right.right_sibling != 0 {
                    let mut next = self.load_leaf(right.right_sibling)?;
                    next.left_sibling = left_id;
                    self.write_node(right.right_sibling, &mut next)?;
                }
                self.restructured.extend([left_id, right_id]);
            } else {
                left.entries.push(Entry {
                    key: removed.key,
                    value: EntryValue::Child(right.left_child),
                });
            }
            left.entries.append(&mut right.entries);
            self.store.free(right_id)?;
            self.write_node(left_id, &mut left)?;
            return Ok(Rebalance::Merged);
        }

        let donor = if node_is_left { &right } else { &left };
        let donated = if node_is_left {
            donor.entries.first()
        } else {
            donor.entries.last()
        };
        let can_lend = donated.is_some_and(|entry| {
            let size = donor.used_space(&self.limits) - entry.encoded_size(&self.limits);
            let count = donor.entries.len() - 1;
            count > 0 && !(size * 4 < self.limits.usable && count * 4 < self.limits.max_keys)
        });
        if !can_lend {
            let (id, node) = if node_is_left {
                (left_id, &mut left)
            } else {
                (right_id, &mut right)
            };
            self.write_node(id, node)?;
            return Ok(Rebalance::Unchanged);
        }

        if node_is_left {
            let moved = right.entries.remove(0);
            if left.is_leaf() {
                left.entries.push(moved);
                let new_separator = right.entries[0].key.detached();
                let old = std::mem::replace(&mut parent.entries[separator].key, new_separator);
                self.free_key(&old)?;
            } else {
                let moved_child = moved.child()?;
                let old = std::mem::replace(&mut parent.entries[separator].key, moved.key);
                left.entries.push(Entry {
                    key: old,
                    value: EntryValue::Child(right.left_child),
                });
                right.left_child = moved_child;
            }
        } else {
            let moved = left
                .entries
                .pop()
                .ok_or_else(|| Error::corrupted("lending from an empty node"))?;
            if right.is_leaf() {
                right.entries.insert(0, moved);
                let new_separator = right.entries[0].key.detached();
                let old = std::mem::replace(&mut parent.entries[separator].key, new_separator);
                self.free_key(&old)?;
            } else {
                let moved_child = moved.child()?;
                let old = std::mem::replace(&mut parent.entries[separator].key, moved.key);
                right.entries.insert(
                    0,
                    Entry {
                        key: old,
                        value: EntryValue::Child(right.left_child),
                    },
                );
                right.left_child = moved_child;
            }
        }
        if left.is_leaf() {
            self.restructured.extend([left_id, right_id]);
        }

        self.write_node(left_id, &mut left)?;
        self.write_node(right_id, &mut right)?;
        Ok(Rebalance::Borrowed)
    }

    fn load_node(&mut self, page_id: PageId) -> Result<Node> {
        let page = self.store.read(page_id)?;
        let mut node = Node::from_page(&page)?;
        for entry in &mut node.entries {
            if let Some(blob) = entry.key.blob {
                entry.key.bytes = read_blob(self.store, blob)?;
            }
        }
        Ok(node)
    }

    fn load_leaf(&mut self, page_id: PageId) -> Result<Node> {
        let node = self.load_node(page_id)?;
        if !node.is_leaf() {
            return Err(Error::corrupted(format!("page {page_id} is not a leaf")));
        }
        Ok(node)
    }

    fn write_node(&mut self, page_id: PageId, node: &mut Node) -> Result<()> {
        for entry in &mut node.entries {
            if self.limits.is_extended(entry.key.bytes.len()) && entry.key.blob.is_none() {
                entry.key.blob = Some(write_blob(self.store, &entry.key.bytes)?);
            }
        }
        let page = node.to_page(self.store.page_size(), &self.limits)?;
        self.store.write(page_id, page)
    }

    fn free_key(&mut self, key: &NodeKey) -> Result<()> {
        if let Some(blob) = key.blob {
            free_blob(self.store, blob)?;
        }
        Ok(())
    }

    fn free_entry(&mut self, entry: &Entry) -> Result<()> {
        self.free_key(&entry.key)?;
        match &entry.value {
            EntryValue::Child(_) => Ok(()),
            EntryValue::Record(record) => free_record(self.store, record),
            value @ EntryValue::Duplicates(_) => DuplicateTable::free_all(self.store, value),
        }
    }
}
