//! B-tree node types and serialization.
//!
//! Leaves and internal nodes share one layout. Internal nodes hold a
//! leftmost child pointer plus (separator key, child) entries; the child of
//! entry `i` holds the keys `>= entries[i].key`. Leaves hold (key, value)
//! entries and are doubly linked through their sibling pointers.
//!
//! # Node Layout
//!
//! ```text
//! +-------------+-------+----------+-------+--------------+---------------+------------+
//! | Page Header | flags | reserved | count | left sibling | right sibling | left child |
//! | (16 bytes)  | (1)   | (1)      | (2)   | (8)          | (8)           | (8)        |
//! +-------------+-------+----------+-------+--------------+---------------+------------+
//! | entries...                                                                         |
//! +------------------------------------------------------------------------------------+
//! ```
//!
//! # Entry Format
//!
//! ```text
//! key:   len (2) | flags (1) | bytes (len), or a blob ref (12) if EXTENDED
//! value: tag (1) | payload
//!        0 child:          page id (8)
//!        1 inline record:  len (2) | bytes
//!        2 blob record:    blob ref (12)
//!        3 inline dups:    count (1) | count x record (tag 1 or 2 + payload)
//!        4 duplicate table: blob ref (12) | count (4)
//! ```

// Node sizes are bounded by the page size; record lengths are checked before encoding.
#![allow(clippy::cast_possible_truncation)]

use crate::error::{Error, Result};
use crate::params::{ENTRY_OVERHEAD, KEY_SIZE_UNLIMITED, UNLIMITED_KEY_ESTIMATE};
use crate::storage::overflow::{BLOB_REF_SIZE, BlobRef};
use crate::storage::page::{Page, PageHeader, PageId, PageType};

/// Node header size (after the page header).
pub const NODE_HEADER_SIZE: usize = 28;

/// Offset where entries start.
pub const ENTRIES_OFFSET: usize = PageHeader::SIZE + NODE_HEADER_SIZE;

/// Most duplicates kept inline in a leaf entry.
pub const MAX_INLINE_DUPLICATES: usize = 8;

const KEY_FLAG_EXTENDED: u8 = 0x01;

const TAG_CHILD: u8 = 0;
const TAG_INLINE: u8 = 1;
const TAG_BLOB: u8 = 2;
const TAG_INLINE_DUPS: u8 = 3;
const TAG_DUP_TABLE: u8 = 4;

mod offsets {
    use super::PageHeader;

    pub const FLAGS: usize = PageHeader::SIZE;
    pub const COUNT: usize = PageHeader::SIZE + 2;
    pub const LEFT_SIBLING: usize = PageHeader::SIZE + 4;
    pub const RIGHT_SIBLING: usize = PageHeader::SIZE + 12;
    pub const LEFT_CHILD: usize = PageHeader::SIZE + 20;
}

/// MAX_KEYS_PER_PAGE for a page size and key size.
#[must_use]
pub const fn max_keys_per_page(page_size: usize, key_size: u16) -> usize {
    let key_bytes = if key_size == KEY_SIZE_UNLIMITED {
        UNLIMITED_KEY_ESTIMATE
    } else {
        key_size as usize
    };
    (page_size - ENTRIES_OFFSET) / (key_bytes + ENTRY_OVERHEAD)
}

/// Size limits of the nodes of one database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeLimits {
    /// Bytes available for entries.
    pub usable: usize,
    /// Most entries a node may hold.
    pub max_keys: usize,
    /// Longest key stored in the node itself.
    pub max_inline_key: usize,
    /// Longest record stored in the node itself.
    pub max_inline_record: usize,
}

impl NodeLimits {
    #[must_use]
    pub const fn new(page_size: usize, key_size: u16) -> Self {
        let usable = page_size - ENTRIES_OFFSET;
        Self {
            usable,
            max_keys: max_keys_per_page(page_size, key_size),
            max_inline_key: usable / 8,
            max_inline_record: usable / 16,
        }
    }

    /// Returns true if a key of this length is stored in an overflow chain.
    #[must_use]
    pub const fn is_extended(&self, key_len: usize) -> bool {
        key_len > self.max_inline_key
    }
}

/// Leaf or internal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Leaf,
    Internal,
}

impl NodeKind {
    const fn page_type(self) -> PageType {
        match self {
            Self::Leaf => PageType::BTreeLeaf,
            Self::Internal => PageType::BTreeInternal,
        }
    }
}

/// A key as held in a node.
///
/// `bytes` always holds the full key once the node has been resolved;
/// `blob` is set when the key is stored in an overflow chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeKey {
    pub bytes: Vec<u8>,
    pub blob: Option<BlobRef>,
}

impl NodeKey {
    /// A key that has not been written to an overflow chain (yet).
    #[must_use]
    pub const fn new(bytes: Vec<u8>) -> Self {
        Self { bytes, blob: None }
    }

    /// A copy of the key bytes that owns no overflow chain.
    #[must_use]
    pub fn detached(&self) -> Self {
        Self::new(self.bytes.clone())
    }
}

/// Where a record lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordRef {
    Inline(Vec<u8>),
    Blob(BlobRef),
}

impl RecordRef {
    /// Length of the record in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        match self {
            Self::Inline(bytes) => bytes.len(),
            Self::Blob(blob) => blob.len as usize,
        }
    }

    /// Returns true if the record is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encoded size including the tag.
    #[must_use]
    pub const fn encoded_size(&self) -> usize {
        match self {
            Self::Inline(bytes) => 3 + bytes.len(),
            Self::Blob(_) => 1 + BLOB_REF_SIZE,
        }
    }

    /// Append the tagged encoding to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Self::Inline(bytes) => {
                out.push(TAG_INLINE);
                out.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
                out.extend_from_slice(bytes);
            }
            Self::Blob(blob) => {
                out.push(TAG_BLOB);
                out.extend_from_slice(&blob.to_bytes());
            }
        }
    }

    /// Decode a tagged record.
    pub fn decode(reader: &mut ByteReader<'_>) -> Result<Self> {
        match reader.u8()? {
            TAG_INLINE => {
                let len = reader.u16()? as usize;
                Ok(Self::Inline(reader.bytes(len)?.to_vec()))
            }
            TAG_BLOB => Ok(Self::Blob(reader.blob_ref()?)),
            tag => Err(Error::corrupted(format!("invalid record tag {tag}"))),
        }
    }
}

/// The records of a key with duplicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateSet {
    /// Packed into the leaf entry.
    Inline(Vec<RecordRef>),
    /// Stored in an overflow chain.
    Table { blob: BlobRef, count: u32 },
}

impl DuplicateSet {
    /// Number of records.
    #[must_use]
    pub const fn count(&self) -> usize {
        match self {
            Self::Inline(records) => records.len(),
            Self::Table { count, .. } => *count as usize,
        }
    }
}

/// The value half of an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryValue {
    /// Child page (internal nodes).
    Child(PageId),
    /// A single record (leaves).
    Record(RecordRef),
    /// Several records under one key (leaves).
    Duplicates(DuplicateSet),
}

impl EntryValue {
    /// Number of records this value holds (0 for a child pointer).
    #[must_use]
    pub const fn record_count(&self) -> usize {
        match self {
            Self::Child(_) => 0,
            Self::Record(_) => 1,
            Self::Duplicates(set) => set.count(),
        }
    }

    fn encoded_size(&self) -> usize {
        match self {
            Self::Child(_) => 9,
            Self::Record(record) => record.encoded_size(),
            Self::Duplicates(DuplicateSet::Inline(records)) => {
                2 + records.iter().map(RecordRef::encoded_size).sum::<usize>()
            }
            Self::Duplicates(DuplicateSet::Table { .. }) => 1 + BLOB_REF_SIZE + 4,
        }
    }
}

/// One (key, value) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: NodeKey,
    pub value: EntryValue,
}

impl Entry {
    /// Encoded size of this entry under `limits`.
    #[must_use]
    pub fn encoded_size(&self, limits: &NodeLimits) -> usize {
        let key = if limits.is_extended(self.key.bytes.len()) {
            BLOB_REF_SIZE
        } else {
            self.key.bytes.len()
        };
        3 + key + self.value.encoded_size()
    }

    /// The child pointer of an internal entry.
    pub fn child(&self) -> Result<PageId> {
        match self.value {
            EntryValue::Child(page) => Ok(page),
            _ => Err(Error::corrupted("internal entry without a child pointer")),
        }
    }
}

/// A decoded B-tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub kind: NodeKind,
    pub left_sibling: PageId,
    pub right_sibling: PageId,
    /// Leftmost child (internal nodes only).
    pub left_child: PageId,
    pub entries: Vec<Entry>,
}

impl Node {
    /// An empty leaf.
    #[must_use]
    pub const fn leaf() -> Self {
        Self {
            kind: NodeKind::Leaf,
            left_sibling: 0,
            right_sibling: 0,
            left_child: 0,
            entries: Vec::new(),
        }
    }

    /// An internal node with a single child.
    #[must_use]
    pub const fn internal(left_child: PageId) -> Self {
        Self {
            kind: NodeKind::Internal,
            left_sibling: 0,
            right_sibling: 0,
            left_child,
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.kind == NodeKind::Leaf
    }

    /// Number of children of an internal node.
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.entries.len() + 1
    }

    /// The child at `index` (0 is the leftmost child).
    pub fn child_at(&self, index: usize) -> Result<PageId> {
        if index == 0 {
            return Ok(self.left_child);
        }
        self.entries
            .get(index - 1)
            .ok_or_else(|| Error::corrupted(format!("child index {index} out of range")))?
            .child()
    }

    /// Total encoded size of the entries.
    #[must_use]
    pub fn used_space(&self, limits: &NodeLimits) -> usize {
        self.entries.iter().map(|e| e.encoded_size(limits)).sum()
    }

    /// Returns true if the node fits in a page.
    #[must_use]
    pub fn fits(&self, limits: &NodeLimits) -> bool {
        self.entries.len() <= limits.max_keys && self.used_space(limits) <= limits.usable
    }

    /// Returns true if the node should be merged or refilled after a removal.
    #[must_use]
    pub fn is_underfull(&self, limits: &NodeLimits) -> bool {
        self.used_space(limits) * 4 < limits.usable && self.entries.len() * 4 < limits.max_keys
    }

    /// Number of records held by a leaf.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.entries.iter().map(|e| e.value.record_count()).sum()
    }

    /// Index to split an overflowing node at, balancing bytes.
    ///
    /// The result is in `1..len` for leaves and `1..len - 1` for internal
    /// nodes (whose split entry moves up).
    #[must_use]
    pub fn split_point(&self, limits: &NodeLimits) -> usize {
        let len = self.entries.len();
        let total = self.used_space(limits);
        let mut left = 0;
        let mut index = 0;
        for (i, entry) in self.entries.iter().enumerate() {
            if left * 2 >= total {
                break;
            }
            left += entry.encoded_size(limits);
            index = i + 1;
        }
        let upper = if self.is_leaf() { len - 1 } else { len - 2 };
        index.clamp(1, upper.max(1))
    }

    /// Serialize into a page.
    ///
    /// Extended keys must already carry their blob reference.
    pub fn to_page(&self, page_size: usize, limits: &NodeLimits) -> Result<Page> {
        let mut buf = Vec::with_capacity(limits.usable);
        for entry in &self.entries {
            let key = &entry.key;
            buf.extend_from_slice(&(key.bytes.len() as u16).to_le_bytes());
            if limits.is_extended(key.bytes.len()) {
                let blob = key
                    .blob
                    .ok_or_else(|| Error::corrupted("extended key written without its blob"))?;
                buf.push(KEY_FLAG_EXTENDED);
                buf.extend_from_slice(&blob.to_bytes());
            } else {
                buf.push(0);
                buf.extend_from_slice(&key.bytes);
            }

            match &entry.value {
                EntryValue::Child(page) => {
                    buf.push(TAG_CHILD);
                    buf.extend_from_slice(&page.to_le_bytes());
                }
                EntryValue::Record(record) => record.encode(&mut buf),
                EntryValue::Duplicates(DuplicateSet::Inline(records)) => {
                    buf.push(TAG_INLINE_DUPS);
                    buf.push(records.len() as u8);
                    for record in records {
                        record.encode(&mut buf);
                    }
                }
                EntryValue::Duplicates(DuplicateSet::Table { blob, count }) => {
                    buf.push(TAG_DUP_TABLE);
                    buf.extend_from_slice(&blob.to_bytes());
                    buf.extend_from_slice(&count.to_le_bytes());
                }
            }
        }

        if buf.len() > page_size - ENTRIES_OFFSET || self.entries.len() > usize::from(u16::MAX) {
            return Err(Error::corrupted(format!(
                "node of {} entries and {} bytes does not fit a page",
                self.entries.len(),
                buf.len()
            )));
        }

        let mut page = Page::formatted(page_size, self.kind.page_type());
        page.write_u8(offsets::FLAGS, 0);
        page.write_u16(offsets::COUNT, self.entries.len() as u16);
        page.write_u64(offsets::LEFT_SIBLING, self.left_sibling);
        page.write_u64(offsets::RIGHT_SIBLING, self.right_sibling);
        page.write_u64(offsets::LEFT_CHILD, self.left_child);
        page.write_bytes(ENTRIES_OFFSET, &buf);
        Ok(page)
    }

    /// Deserialize from a page.
    ///
    /// Extended keys come back with empty `bytes`; the caller resolves them
    /// from their blobs.
    pub fn from_page(page: &Page) -> Result<Self> {
        let kind = match page.page_type() {
            Some(PageType::BTreeLeaf) => NodeKind::Leaf,
            Some(PageType::BTreeInternal) => NodeKind::Internal,
            other => {
                return Err(Error::corrupted(format!(
                    "expected a B-tree node, found {other:?}"
                )));
            }
        };

        let count = page.read_u16(offsets::COUNT) as usize;
        let mut reader = ByteReader::new(&page.as_bytes()[ENTRIES_OFFSET..]);
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let len = reader.u16()? as usize;
            let key = if reader.u8()? & KEY_FLAG_EXTENDED == 0 {
                NodeKey::new(reader.bytes(len)?.to_vec())
            } else {
                let blob = reader.blob_ref()?;
                if blob.len as usize != len {
                    return Err(Error::corrupted("extended key length mismatch"));
                }
                NodeKey {
                    bytes: Vec::new(),
                    blob: Some(blob),
                }
            };

            let value = match reader.peek()? {
                TAG_CHILD => {
                    reader.u8()?;
                    EntryValue::Child(reader.u64()?)
                }
                TAG_INLINE | TAG_BLOB => EntryValue::Record(RecordRef::decode(&mut reader)?),
                TAG_INLINE_DUPS => {
                    reader.u8()?;
                    let n = reader.u8()? as usize;
                    let mut records = Vec::with_capacity(n);
                    for _ in 0..n {
                        records.push(RecordRef::decode(&mut reader)?);
                    }
                    EntryValue::Duplicates(DuplicateSet::Inline(records))
                }
                TAG_DUP_TABLE => {
                    reader.u8()?;
                    let blob = reader.blob_ref()?;
                    let count = reader.u32()?;
                    EntryValue::Duplicates(DuplicateSet::Table { blob, count })
                }
                tag => return Err(Error::corrupted(format!("invalid value tag {tag}"))),
            };

            let child_entry = matches!(value, EntryValue::Child(_));
            if child_entry != (kind == NodeKind::Internal) {
                return Err(Error::corrupted("entry value does not match node kind"));
            }
            entries.push(Entry { key, value });
        }

        Ok(Self {
            kind,
            left_sibling: page.read_u64(offsets::LEFT_SIBLING),
            right_sibling: page.read_u64(offsets::RIGHT_SIBLING),
            left_child: page.read_u64(offsets::LEFT_CHILD),
            entries,
        })
    }
}

/// Bounds-checked little-endian reader over a byte slice.
#[derive(Debug)]
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    #[must_use]
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    /// Returns true if every byte was consumed.
    #[must_use]
    pub const fn is_at_end(&self) -> bool {
        self.offset >= self.bytes.len()
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.offset + len;
        if end > self.bytes.len() {
            return Err(Error::corrupted(format!(
                "read of {len} bytes at offset {} runs past {}",
                self.offset,
                self.bytes.len()
            )));
        }
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn peek(&self) -> Result<u8> {
        self.bytes
            .get(self.offset)
            .copied()
            .ok_or_else(|| Error::corrupted("unexpected end of node"))
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.bytes(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    pub fn blob_ref(&mut self) -> Result<BlobRef> {
        BlobRef::from_bytes(self.bytes(BLOB_REF_SIZE)?)
            .ok_or_else(|| Error::corrupted("truncated blob reference"))
    }
}
