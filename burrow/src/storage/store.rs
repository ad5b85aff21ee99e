//! The page store: paged storage with atomic commit.
//!
//! All structural changes made by one public operation are collected in an
//! in-memory changeset. `commit` makes the changeset durable as a unit:
//!
//! 1. The header and allocation bitmap are serialized into the changeset
//! 2. Every page is sealed with the new commit LSN and its checksum
//! 3. The page images are appended to the journal and the journal is synced
//! 4. The pages are written in place and the file is synced
//! 5. The journal is truncated
//!
//! `abort` discards the changeset and restores the header and allocator to
//! the last commit, so a failed operation leaves no trace. A transaction
//! spans several operations in one changeset; a [`Savepoint`] taken before
//! each of them lets a failed one be undone alone. If a commit fails
//! part way the store refuses further work with `NeedRecovery`; reopening
//! the environment replays the journal.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};
use crate::storage::allocator::PageAllocator;
use crate::storage::cache::PageCache;
use crate::storage::header::{EnvHeader, PROBE_SIZE};
use crate::storage::io::Storage;
use crate::storage::journal::Journal;
use crate::storage::page::{Page, PageId, PageType};
use crate::storage::recovery::{self, RecoveryResult};

/// Settings for creating or opening a page store.
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    /// Page size for a new store (ignored on open).
    pub page_size: usize,
    /// Page cache size in bytes.
    pub cache_size: usize,
    /// Environment flags persisted in the header of a new store.
    pub env_flags: u32,
    /// Refuse every write.
    pub read_only: bool,
}

/// Uncommitted state captured by [`PageStore::savepoint`].
pub struct Savepoint {
    header: EnvHeader,
    allocator: PageAllocator,
    changeset: BTreeMap<PageId, Page>,
    freed: BTreeSet<PageId>,
}

/// Paged storage with a changeset and an optional redo journal.
pub struct PageStore {
    storage: Box<dyn Storage>,
    journal: Option<Journal>,
    header: EnvHeader,
    committed_header: EnvHeader,
    allocator: PageAllocator,
    committed_allocator: PageAllocator,
    cache: PageCache,
    changeset: BTreeMap<PageId, Page>,
    freed: BTreeSet<PageId>,
    read_only: bool,
    failed: bool,
}

impl std::fmt::Debug for PageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageStore")
            .field("page_size", &self.header.page_size)
            .field("page_count", &self.header.page_count)
            .field("dirty_pages", &self.dirty_page_count())
            .field("journal", &self.journal.is_some())
            .field("failed", &self.failed)
            .finish_non_exhaustive()
    }
}

impl PageStore {
    /// Initialize a new store on an empty storage.
    ///
    /// The header and the first bitmap page are committed before returning.
    pub fn create(
        storage: Box<dyn Storage>,
        journal: Option<Journal>,
        options: StoreOptions,
    ) -> Result<Self> {
        let header = EnvHeader::new(options.page_size, options.env_flags);
        let allocator = PageAllocator::new(options.page_size);

        let mut store = Self {
            storage,
            journal,
            committed_header: header.clone(),
            header,
            committed_allocator: allocator.clone(),
            allocator,
            cache: PageCache::new(options.cache_size, options.page_size),
            changeset: BTreeMap::new(),
            freed: BTreeSet::new(),
            read_only: false,
            failed: false,
        };
        if let Some(journal) = store.journal.as_mut() {
            journal.clear()?;
        }
        store.storage.set_len(0)?;
        store.force_commit()?;
        Ok(store)
    }

    /// Open an existing store, replaying the journal first if needed.
    pub fn open(
        mut storage: Box<dyn Storage>,
        mut journal: Option<Journal>,
        options: StoreOptions,
    ) -> Result<(Self, RecoveryResult)> {
        if storage.size()? < PROBE_SIZE as u64 {
            return Err(Error::InvalidFileHeader);
        }
        let mut probe = [0u8; PROBE_SIZE];
        storage.read_at(0, &mut probe)?;
        let page_size = EnvHeader::probe(&probe)?;

        let recovery = match journal.as_mut() {
            Some(journal) => {
                recovery::recover(storage.as_mut(), journal, page_size, options.read_only)?
            }
            None => RecoveryResult::default(),
        };

        let header_page = read_verified(storage.as_mut(), 0, page_size)?;
        let header = EnvHeader::from_page(&header_page)?;

        let mut chain = Vec::new();
        let mut next = header.bitmap_head;
        while next != 0 {
            if next >= header.page_count || chain.iter().any(|(id, _)| *id == next) {
                return Err(Error::corrupted(format!(
                    "allocation chain points at page {next}"
                )));
            }
            let page = read_verified(storage.as_mut(), next, page_size)?;
            let following = PageAllocator::next_in_chain(&page);
            chain.push((next, page));
            next = following;
        }
        let allocator = PageAllocator::from_pages(&chain, header.page_count, page_size)?;

        let store = Self {
            storage,
            journal,
            committed_header: header.clone(),
            header,
            committed_allocator: allocator.clone(),
            allocator,
            cache: PageCache::new(options.cache_size, page_size),
            changeset: BTreeMap::new(),
            freed: BTreeSet::new(),
            read_only: options.read_only,
            failed: false,
        };
        Ok((store, recovery))
    }

    /// Page size in bytes.
    #[must_use]
    pub const fn page_size(&self) -> usize {
        self.header.page_size()
    }

    /// The working header (including uncommitted changes).
    #[must_use]
    pub const fn header(&self) -> &EnvHeader {
        &self.header
    }

    /// Mutable access to the working header.
    pub fn header_mut(&mut self) -> Result<&mut EnvHeader> {
        self.check_writable()?;
        Ok(&mut self.header)
    }

    /// Returns true if the store refuses writes.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Returns true if a commit failed and the store must be reopened.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        self.failed
    }

    /// Pages written since the last commit.
    #[must_use]
    pub fn dirty_page_count(&self) -> usize {
        self.changeset.len()
    }

    /// Number of pages in the file.
    #[must_use]
    pub const fn page_count(&self) -> u64 {
        self.allocator.total_pages()
    }

    /// Number of pages that are free for reuse.
    #[must_use]
    pub const fn free_page_count(&self) -> u64 {
        self.allocator.free_count()
    }

    /// Check if a page is allocated.
    #[must_use]
    pub fn is_allocated(&self, page_id: PageId) -> bool {
        self.allocator.is_allocated(page_id)
    }

    fn check_writable(&self) -> Result<()> {
        if self.failed {
            return Err(Error::NeedRecovery);
        }
        if self.read_only {
            return Err(Error::WriteProtected);
        }
        Ok(())
    }

    /// Allocate a page. The caller must write it before the next commit.
    pub fn allocate(&mut self) -> Result<PageId> {
        self.check_writable()?;
        let page_id = self.allocator.allocate();
        self.header.page_count = self.allocator.total_pages();
        self.freed.remove(&page_id);
        Ok(page_id)
    }

    /// Return a page to the allocator.
    pub fn free(&mut self, page_id: PageId) -> Result<()> {
        self.check_writable()?;
        if !self.allocator.free(page_id) {
            return Err(Error::corrupted(format!(
                "page {page_id} freed but not allocated"
            )));
        }
        self.changeset.remove(&page_id);
        self.freed.insert(page_id);
        Ok(())
    }

    /// Read a page, seeing uncommitted writes.
    pub fn read(&mut self, page_id: PageId) -> Result<Page> {
        if self.failed {
            return Err(Error::NeedRecovery);
        }
        if let Some(page) = self.changeset.get(&page_id) {
            return Ok(page.clone());
        }
        if page_id == 0 || !self.allocator.is_allocated(page_id) {
            return Err(Error::corrupted(format!(
                "read of unallocated page {page_id}"
            )));
        }
        if let Some(page) = self.cache.get(page_id) {
            return Ok(page.clone());
        }

        let page_size = self.page_size();
        let page = read_verified(self.storage.as_mut(), page_id, page_size)?;
        self.cache.insert(page_id, page.clone());
        Ok(page)
    }

    /// Stage a page write in the changeset.
    pub fn write(&mut self, page_id: PageId, page: Page) -> Result<()> {
        self.check_writable()?;
        if page.size() != self.page_size() {
            return Err(Error::corrupted(format!(
                "page {page_id} written with {} bytes",
                page.size()
            )));
        }
        self.changeset.insert(page_id, page);
        Ok(())
    }

    /// Returns true if there is anything to commit.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.changeset.is_empty() || !self.freed.is_empty() || self.header != self.committed_header
    }

    /// Make the changeset durable.
    pub fn commit(&mut self) -> Result<()> {
        if self.failed {
            return Err(Error::NeedRecovery);
        }
        if !self.is_dirty() {
            return Ok(());
        }
        self.check_writable()?;
        self.force_commit()
    }

    fn force_commit(&mut self) -> Result<()> {
        let lsn = self.committed_header.commit_lsn + 1;

        for (page_id, page) in self.allocator.to_pages() {
            self.changeset.insert(page_id, page);
        }
        self.header.page_count = self.allocator.total_pages();
        self.header.bitmap_head = self.allocator.chain_head();
        self.header.commit_lsn = lsn;
        self.changeset.insert(0, self.header.to_page());

        for page in self.changeset.values_mut() {
            page.seal(lsn);
        }

        if let Err(e) = self.write_changeset(lsn) {
            self.failed = true;
            tracing::error!(lsn, error = %e, "commit failed");
            return Err(e);
        }

        self.committed_header = self.header.clone();
        self.committed_allocator = self.allocator.clone();
        for page_id in std::mem::take(&mut self.freed) {
            self.cache.remove(page_id);
        }
        for (page_id, page) in std::mem::take(&mut self.changeset) {
            if page_id != 0 && page.page_type() != Some(PageType::AllocationBitmap) {
                self.cache.insert(page_id, page);
            }
        }
        tracing::trace!(lsn, "committed changeset");
        Ok(())
    }

    fn write_changeset(&mut self, lsn: u64) -> Result<()> {
        let page_size = self.page_size() as u64;

        if let Some(journal) = self.journal.as_mut() {
            journal.write_changeset(lsn, self.changeset.iter().map(|(id, page)| (*id, page)))?;
        }

        for (page_id, page) in &self.changeset {
            self.storage.write_at(page_id * page_size, page.as_bytes())?;
        }
        let len = self.header.page_count * page_size;
        if self.storage.size()? < len {
            self.storage.set_len(len)?;
        }
        self.storage.sync()?;

        if let Some(journal) = self.journal.as_mut() {
            journal.clear()?;
        }
        Ok(())
    }

    /// Discard the changeset.
    pub fn abort(&mut self) {
        self.changeset.clear();
        self.freed.clear();
        self.header = self.committed_header.clone();
        self.allocator = self.committed_allocator.clone();
    }

    /// Capture the uncommitted state.
    #[must_use]
    pub fn savepoint(&self) -> Savepoint {
        Savepoint {
            header: self.header.clone(),
            allocator: self.allocator.clone(),
            changeset: self.changeset.clone(),
            freed: self.freed.clone(),
        }
    }

    /// Discard the changes made after `savepoint` was taken, keeping the
    /// uncommitted ones from before.
    pub fn rollback_to(&mut self, savepoint: Savepoint) {
        self.header = savepoint.header;
        self.allocator = savepoint.allocator;
        self.changeset = savepoint.changeset;
        self.freed = savepoint.freed;
    }

    /// Commit anything pending and sync the file.
    pub fn flush(&mut self) -> Result<()> {
        self.commit()?;
        if !self.read_only {
            self.storage.sync()?;
        }
        Ok(())
    }
}

/// Read a page straight from storage and verify its checksum.
fn read_verified(storage: &mut dyn Storage, page_id: PageId, page_size: usize) -> Result<Page> {
    let mut page = Page::new(page_size);
    storage
        .read_at(page_id * page_size as u64, page.as_bytes_mut())
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::corrupted(format!("page {page_id} lies past the end of the file"))
            } else {
                Error::from(e)
            }
        })?;
    page.verify()
        .map_err(|e| Error::corrupted(format!("page {page_id}: {e}")))?;
    Ok(page)
}
