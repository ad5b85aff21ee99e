//! Page allocator using a bitmap to track free/used pages.
//!
//! Each bit represents one page: 0 = free, 1 = used. The bitmap is persisted
//! as a chain of `AllocationBitmap` pages whose head is recorded in the
//! environment header. The chain pages are allocated from the bitmap they
//! describe, so they are marked used like every other page.
//!
//! Bitmap page layout:
//! - page header: 16 bytes
//! - `next`: 8 bytes (next bitmap page, 0 = end of chain)
//! - bits: remainder of the page

// Page IDs are u64 but bitmap indices are usize. On 64-bit systems these are the same size.
#![allow(clippy::cast_possible_truncation)]

use crate::error::{Error, Result};
use crate::storage::page::{Page, PageHeader, PageId, PageType};

/// Number of bits per byte.
const BITS_PER_BYTE: usize = 8;

const NEXT_OFFSET: usize = PageHeader::SIZE;
const BITS_OFFSET: usize = NEXT_OFFSET + 8;

/// Number of pages tracked by a single bitmap page.
#[must_use]
pub const fn pages_per_bitmap_page(page_size: usize) -> usize {
    (page_size - BITS_OFFSET) * BITS_PER_BYTE
}

/// Calculate how many bitmap pages are needed for a given number of total pages.
#[must_use]
pub const fn bitmap_pages_needed(total_pages: u64, page_size: usize) -> usize {
    (total_pages as usize).div_ceil(pages_per_bitmap_page(page_size))
}

/// A page allocation bitmap.
#[derive(Debug, Clone)]
pub struct PageAllocator {
    page_size: usize,
    /// The bitmap data (in-memory representation).
    bitmap: Vec<u8>,
    /// Total number of pages in the file.
    total_pages: u64,
    /// Number of free pages.
    free_count: u64,
    /// Lowest page that might be free.
    next_search_hint: u64,
    /// Pages holding the persisted bitmap, in chain order.
    chain: Vec<PageId>,
}

impl PageAllocator {
    /// Create an allocator for a fresh environment.
    ///
    /// Only page 0 (the header) exists and it is marked used. The bitmap chain
    /// is created by the first call to [`PageAllocator::to_pages`].
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        let mut bitmap = vec![0u8; 1];
        mark(&mut bitmap, 0, true);
        Self {
            page_size,
            bitmap,
            total_pages: 1,
            free_count: 0,
            next_search_hint: 1,
            chain: Vec::new(),
        }
    }

    /// Load an allocator from the pages of a bitmap chain.
    ///
    /// `pages` must be given in chain order, starting with the head named in
    /// the environment header.
    pub fn from_pages(pages: &[(PageId, Page)], total_pages: u64, page_size: usize) -> Result<Self> {
        let bitmap_bytes = (total_pages as usize).div_ceil(BITS_PER_BYTE);
        let mut bitmap = Vec::new();
        bitmap.try_reserve_exact(bitmap_bytes)?;
        bitmap.resize(bitmap_bytes, 0);

        let per_page = page_size - BITS_OFFSET;
        let mut offset = 0;
        for (id, page) in pages {
            if page.page_type() != Some(PageType::AllocationBitmap) {
                return Err(Error::corrupted(format!(
                    "page {id} in the allocation chain is not a bitmap page"
                )));
            }
            if offset >= bitmap_bytes {
                break;
            }
            let copy_len = (bitmap_bytes - offset).min(per_page);
            bitmap[offset..offset + copy_len]
                .copy_from_slice(page.read_bytes(BITS_OFFSET, copy_len));
            offset += copy_len;
        }
        if offset < bitmap_bytes {
            return Err(Error::corrupted(format!(
                "allocation chain covers {} of {total_pages} pages",
                offset * BITS_PER_BYTE
            )));
        }

        let used_count: u64 = (0..total_pages)
            .filter(|&p| is_used(&bitmap, p as usize))
            .count() as u64;
        let next_search_hint = (0..total_pages)
            .find(|&p| !is_used(&bitmap, p as usize))
            .unwrap_or(total_pages);

        Ok(Self {
            page_size,
            bitmap,
            total_pages,
            free_count: total_pages - used_count,
            next_search_hint,
            chain: pages.iter().map(|(id, _)| *id).collect(),
        })
    }

    /// Read the `next` pointer of a bitmap page.
    #[must_use]
    pub fn next_in_chain(page: &Page) -> PageId {
        page.read_u64(NEXT_OFFSET)
    }

    /// Serialize the bitmap to its chain of pages.
    ///
    /// Grows the chain first if the bitmap no longer fits; the new chain
    /// pages are allocated from the bitmap itself.
    pub fn to_pages(&mut self) -> Vec<(PageId, Page)> {
        while self.chain.len() < bitmap_pages_needed(self.total_pages, self.page_size) {
            let id = self.allocate();
            self.chain.push(id);
        }

        let per_page = self.page_size - BITS_OFFSET;
        let mut pages = Vec::with_capacity(self.chain.len());
        for (i, &id) in self.chain.iter().enumerate() {
            let mut page = Page::formatted(self.page_size, PageType::AllocationBitmap);
            page.write_u64(NEXT_OFFSET, self.chain.get(i + 1).copied().unwrap_or(0));

            let start = (i * per_page).min(self.bitmap.len());
            let end = (start + per_page).min(self.bitmap.len());
            page.write_bytes(BITS_OFFSET, &self.bitmap[start..end]);
            pages.push((id, page));
        }
        pages
    }

    /// First page of the persisted chain, or 0 if nothing was written yet.
    #[must_use]
    pub fn chain_head(&self) -> PageId {
        self.chain.first().copied().unwrap_or(0)
    }

    /// Allocate the lowest free page, growing the file if none is free.
    pub fn allocate(&mut self) -> PageId {
        if self.free_count > 0 {
            for page_id in self.next_search_hint..self.total_pages {
                if !is_used(&self.bitmap, page_id as usize) {
                    mark(&mut self.bitmap, page_id as usize, true);
                    self.free_count -= 1;
                    self.next_search_hint = page_id + 1;
                    return page_id;
                }
            }
        }

        let page_id = self.total_pages;
        self.total_pages += 1;
        let needed = (self.total_pages as usize).div_ceil(BITS_PER_BYTE);
        if self.bitmap.len() < needed {
            self.bitmap.resize(needed, 0);
        }
        mark(&mut self.bitmap, page_id as usize, true);
        self.next_search_hint = self.total_pages;
        page_id
    }

    /// Returns false if the page was not allocated.
    pub fn free(&mut self, page_id: PageId) -> bool {
        if page_id == 0 || page_id >= self.total_pages || !is_used(&self.bitmap, page_id as usize)
        {
            return false;
        }

        mark(&mut self.bitmap, page_id as usize, false);
        self.free_count += 1;
        if page_id < self.next_search_hint {
            self.next_search_hint = page_id;
        }
        true
    }

    #[must_use]
    pub fn is_allocated(&self, page_id: PageId) -> bool {
        page_id < self.total_pages && is_used(&self.bitmap, page_id as usize)
    }

    /// Pages inside the file that are free.
    #[must_use]
    pub const fn free_count(&self) -> u64 {
        self.free_count
    }

    #[must_use]
    pub const fn total_pages(&self) -> u64 {
        self.total_pages
    }
}

fn locate_bit(index: usize) -> (usize, u8) {
    (index / BITS_PER_BYTE, 1 << (index % BITS_PER_BYTE))
}

/// Whether page `index` is marked used. Bits past the end read as free.
fn is_used(bitmap: &[u8], index: usize) -> bool {
    let (byte, mask) = locate_bit(index);
    bitmap.get(byte).is_some_and(|b| b & mask != 0)
}

fn mark(bitmap: &mut [u8], index: usize, used: bool) {
    let (byte, mask) = locate_bit(index);
    if let Some(b) = bitmap.get_mut(byte) {
        if used {
            *b |= mask;
        } else {
            *b &= !mask;
        }
    }
}
