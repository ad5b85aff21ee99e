//! Paged storage engine.
//!
//! # File Format
//!
//! An environment is a single file of fixed-size pages (the size is chosen
//! at creation, 16KB by default) plus a redo journal next to it:
//!
//! - Page 0: environment header and database directory
//! - Allocation bitmap pages, chained from the header
//! - Remaining pages: B-tree nodes and overflow chains
//! - `<file>.jrn`: journal of the commit in flight, empty when idle
//!
//! # Usage
//!
//! ```ignore
//! let mut store = PageStore::create(storage, Some(journal), options)?;
//!
//! let page_id = store.allocate()?;
//! store.write(page_id, Page::formatted(store.page_size(), PageType::BTreeLeaf))?;
//!
//! // Everything since the last commit becomes durable at once
//! store.commit()?;
//! ```

pub mod allocator;
pub mod btree;
pub mod cache;
pub mod header;
pub mod io;
pub mod journal;
pub mod overflow;
pub mod page;
pub mod recovery;
pub mod store;

pub use header::{DbDescriptor, EnvHeader};
pub use io::{FileStorage, MemoryStorage, Storage};
pub use journal::Journal;
pub use overflow::BlobRef;
pub use page::{DEFAULT_PAGE_SIZE, Page, PageError, PageId, PageType};
pub use recovery::RecoveryResult;
pub use store::{PageStore, StoreOptions};
