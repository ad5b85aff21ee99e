//! B-tree index of a database.
//!
//! Every database is one B+-tree: keys live in the leaves together with
//! their records, internal nodes only route lookups.
//!
//! # Structure
//!
//! The B-tree consists of:
//! - Internal nodes: separator keys and child page pointers
//! - Leaf nodes: keys with records or duplicate sets, doubly linked for scans
//! - Overflow chains: extended keys, large records and duplicate tables
//!
//! Nodes split when they exceed a page or MAX_KEYS_PER_PAGE entries and are
//! merged with (or refilled from) a sibling when they fall below a quarter
//! of either limit.
//!
//! # Usage
//!
//! ```ignore
//! let mut tree = BTree::new(&mut store, &mut descriptor, &comparator);
//! tree.insert(b"key", b"record", InsertMode::Unique)?;
//!
//! let (slot, entry) = tree.find(b"key")?.ok_or(Error::KeyNotFound)?;
//! let records = tree.records(&entry)?;
//! assert_eq!(records.size(), 1);
//! ```

mod duplicates;
mod node;
mod tree;

pub use duplicates::DuplicateTable;
pub use node::{
    DuplicateSet, Entry, EntryValue, MAX_INLINE_DUPLICATES, Node, NodeKey, NodeKind, NodeLimits,
    RecordRef, max_keys_per_page,
};
pub use tree::{
    BTree, DuplicatePosition, InsertMode, InsertOutcome, Neighborhood, SearchResult, Slot,
    TreeStats,
};
