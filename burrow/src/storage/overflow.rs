//! Overflow page chains for values that do not fit in a node.
//!
//! Extended keys, large records and duplicate tables are stored as blobs:
//! a chain of overflow pages, each holding a slice of the value. Nodes
//! store a [`BlobRef`] in place of the bytes.
//!
//! # Overflow Page Format
//!
//! ```text
//! +----------------+----------------+----------------+------------------+
//! | Page Header    | Next Page ID   | Data Length    | Data...          |
//! | (16 bytes)     | (8 bytes)      | (4 bytes)      | (variable)       |
//! +----------------+----------------+----------------+------------------+
//! ```

// Blob lengths are bounded by u32 on disk.
#![allow(clippy::cast_possible_truncation)]

use crate::error::{Error, Result};
use crate::storage::page::{Page, PageHeader, PageId, PageType};
use crate::storage::store::PageStore;

/// Size of overflow page header (after page header).
/// - Next page ID: 8 bytes
/// - Data length in this page: 4 bytes
const OVERFLOW_HEADER_SIZE: usize = 12;

/// Offset where overflow data starts.
const OVERFLOW_DATA_OFFSET: usize = PageHeader::SIZE + OVERFLOW_HEADER_SIZE;

/// Size of a serialized [`BlobRef`].
pub const BLOB_REF_SIZE: usize = 12;

/// Largest value that can be stored as a blob.
pub const MAX_BLOB_SIZE: usize = u32::MAX as usize;

/// Maximum data per overflow page.
#[must_use]
pub const fn data_per_page(page_size: usize) -> usize {
    page_size - OVERFLOW_DATA_OFFSET
}

/// Reference to a blob stored in an overflow chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobRef {
    /// First page of the overflow chain (0 for an empty blob).
    pub page: PageId,
    /// Total length of the value.
    pub len: u32,
}

impl BlobRef {
    /// Serialize the reference to bytes.
    #[must_use]
    pub fn to_bytes(self) -> [u8; BLOB_REF_SIZE] {
        let mut buf = [0u8; BLOB_REF_SIZE];
        buf[0..8].copy_from_slice(&self.page.to_le_bytes());
        buf[8..12].copy_from_slice(&self.len.to_le_bytes());
        buf
    }

    /// Deserialize a reference from bytes.
    ///
    /// Returns `None` if fewer than `BLOB_REF_SIZE` bytes are given.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < BLOB_REF_SIZE {
            return None;
        }
        let mut page = [0u8; 8];
        page.copy_from_slice(&bytes[0..8]);
        Some(Self {
            page: u64::from_le_bytes(page),
            len: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        })
    }
}

/// Write a value to a new overflow chain.
pub fn write_blob(store: &mut PageStore, value: &[u8]) -> Result<BlobRef> {
    if value.len() > MAX_BLOB_SIZE {
        return Err(Error::invalid_parameter(format!(
            "value of {} bytes is too large",
            value.len()
        )));
    }
    if value.is_empty() {
        return Ok(BlobRef { page: 0, len: 0 });
    }

    let page_size = store.page_size();
    let chunks: Vec<&[u8]> = value.chunks(data_per_page(page_size)).collect();
    let mut ids = Vec::with_capacity(chunks.len());
    for _ in 0..chunks.len() {
        ids.push(store.allocate()?);
    }

    for (i, chunk) in chunks.iter().enumerate() {
        let mut page = Page::formatted(page_size, PageType::Overflow);
        page.write_u64(PageHeader::SIZE, ids.get(i + 1).copied().unwrap_or(0));
        page.write_u32(PageHeader::SIZE + 8, chunk.len() as u32);
        page.write_bytes(OVERFLOW_DATA_OFFSET, chunk);
        store.write(ids[i], page)?;
    }

    Ok(BlobRef {
        page: ids[0],
        len: value.len() as u32,
    })
}

/// Extend a blob with `extra` bytes.
///
/// The spare room of the last page is filled first and only the remainder
/// goes to new pages, so earlier pages of the chain are left untouched.
pub fn append_blob(store: &mut PageStore, blob: BlobRef, extra: &[u8]) -> Result<BlobRef> {
    if blob.page == 0 {
        return write_blob(store, extra);
    }
    let total = blob.len as usize + extra.len();
    if total > MAX_BLOB_SIZE {
        return Err(Error::invalid_parameter(format!(
            "value of {total} bytes is too large"
        )));
    }

    let mut last_id = blob.page;
    let mut last = overflow_page(store, last_id)?;
    loop {
        let next = last.read_u64(PageHeader::SIZE);
        if next == 0 {
            break;
        }
        last = overflow_page(store, next)?;
        last_id = next;
    }

    let capacity = data_per_page(last.size());
    let used = last.read_u32(PageHeader::SIZE + 8) as usize;
    if used > capacity {
        return Err(Error::corrupted(format!(
            "overflow page {last_id} claims {used} bytes"
        )));
    }
    let (head, rest) = extra.split_at((capacity - used).min(extra.len()));
    let tail = write_blob(store, rest)?;

    last.write_bytes(OVERFLOW_DATA_OFFSET + used, head);
    last.write_u32(PageHeader::SIZE + 8, (used + head.len()) as u32);
    last.write_u64(PageHeader::SIZE, tail.page);
    store.write(last_id, last)?;

    Ok(BlobRef {
        page: blob.page,
        len: total as u32,
    })
}

/// Read a value from its overflow chain.
pub fn read_blob(store: &mut PageStore, blob: BlobRef) -> Result<Vec<u8>> {
    let total = blob.len as usize;
    let mut result = Vec::new();
    result.try_reserve_exact(total)?;

    let mut current = blob.page;
    while current != 0 && result.len() < total {
        let page = overflow_page(store, current)?;
        let data_length = page.read_u32(PageHeader::SIZE + 8) as usize;
        if data_length > data_per_page(page.size()) || result.len() + data_length > total {
            return Err(Error::corrupted(format!(
                "overflow page {current} claims {data_length} bytes"
            )));
        }
        result.extend_from_slice(page.read_bytes(OVERFLOW_DATA_OFFSET, data_length));
        current = page.read_u64(PageHeader::SIZE);
    }

    if result.len() != total {
        return Err(Error::corrupted(format!(
            "overflow chain at page {} holds {} of {total} bytes",
            blob.page,
            result.len()
        )));
    }
    Ok(result)
}

/// Free every page of an overflow chain.
///
/// Returns the number of pages freed.
pub fn free_blob(store: &mut PageStore, blob: BlobRef) -> Result<usize> {
    let mut freed = 0;
    let mut current = blob.page;
    while current != 0 {
        let page = overflow_page(store, current)?;
        let next = page.read_u64(PageHeader::SIZE);
        store.free(current)?;
        freed += 1;
        current = next;
    }
    Ok(freed)
}

fn overflow_page(store: &mut PageStore, page_id: PageId) -> Result<Page> {
    let page = store.read(page_id)?;
    if page.page_type() != Some(PageType::Overflow) {
        return Err(Error::corrupted(format!(
            "page {page_id} is not an overflow page"
        )));
    }
    Ok(page)
}
