//! Bounded cache of committed pages.
//!
//! Holds clean page images between operations so repeated descents through
//! the upper levels of a B-tree do not go back to storage. Only committed
//! pages enter the cache; dirty pages live in the page store's changeset
//! until commit, so evicting never requires a write.
//!
//! # Design
//!
//! - Capacity is derived from the configured cache size in bytes
//! - Eviction is first-in first-out
//! - Not thread-safe on its own: the owning environment serializes access
//!
//! # Invariants
//!
//! - `pages.len() == order.len() <= capacity`
//! - Every id in `order` is a key of `pages`

use std::collections::{HashMap, VecDeque};

use crate::storage::page::{Page, PageId};

/// Default cache size in bytes (2MB).
pub const DEFAULT_CACHE_SIZE: usize = 2 * 1024 * 1024;

/// Fewest pages a cache will hold regardless of the configured size.
const MIN_CAPACITY: usize = 16;

/// A FIFO page cache.
#[derive(Debug)]
pub struct PageCache {
    pages: HashMap<PageId, Page>,
    order: VecDeque<PageId>,
    capacity: usize,
}

impl PageCache {
    /// Create a cache holding about `cache_size` bytes of `page_size` pages.
    ///
    /// # Post-conditions
    /// - Capacity is at least `MIN_CAPACITY` pages
    #[must_use]
    pub fn new(cache_size: usize, page_size: usize) -> Self {
        let capacity = (cache_size / page_size).max(MIN_CAPACITY);
        Self {
            pages: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    /// Capacity in pages.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of cached pages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Look up a page.
    #[must_use]
    pub fn get(&self, page_id: PageId) -> Option<&Page> {
        self.pages.get(&page_id)
    }

    /// Insert or replace a page, evicting the oldest entries if full.
    pub fn insert(&mut self, page_id: PageId, page: Page) {
        if self.pages.insert(page_id, page).is_some() {
            return;
        }
        self.order.push_back(page_id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.pages.remove(&oldest);
            }
        }
    }

    /// Drop a page from the cache.
    pub fn remove(&mut self, page_id: PageId) {
        if self.pages.remove(&page_id).is_some() {
            self.order.retain(|&id| id != page_id);
        }
    }

    /// Drop every page.
    pub fn clear(&mut self) {
        self.pages.clear();
        self.order.clear();
    }
}
