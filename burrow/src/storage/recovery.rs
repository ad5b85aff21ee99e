//! Crash recovery for the page store.
//!
//! Recovery replays the journal into the environment file before the header
//! is read, so the rest of the open path only ever sees the state of the
//! last completed commit.
//!
//! # Recovery Process
//!
//! 1. Scan the journal for complete changesets (`Begin` .. `Commit`)
//! 2. Write every page image of every complete changeset in place, in order
//! 3. Sync the environment file
//! 4. Truncate the journal, discarding any torn tail
//!
//! Page images are full pages, so replaying a changeset that already reached
//! the file is harmless.

use crate::error::{Error, Result};
use crate::storage::io::Storage;
use crate::storage::journal::{Journal, Lsn};

/// Result of a recovery operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Number of complete changesets written back.
    pub changesets_replayed: usize,

    /// Number of page images written back.
    pub pages_restored: usize,

    /// Bytes of incomplete journal tail that were discarded.
    pub torn_bytes: u64,

    /// LSN of the last replayed changeset (0 if none).
    pub recovered_lsn: Lsn,
}

impl RecoveryResult {
    /// Returns true if recovery changed anything on disk.
    #[must_use]
    pub const fn did_work(&self) -> bool {
        self.changesets_replayed > 0 || self.torn_bytes > 0
    }
}

/// Replay the journal into `storage`.
///
/// A read-only environment cannot be repaired in place: if the journal holds
/// a complete changeset, opening it fails with `NeedRecovery`. A torn tail
/// alone is ignored.
pub fn recover(
    storage: &mut dyn Storage,
    journal: &mut Journal,
    page_size: usize,
    read_only: bool,
) -> Result<RecoveryResult> {
    if journal.is_empty() {
        return Ok(RecoveryResult::default());
    }

    let scan = journal.scan()?;
    let mut result = RecoveryResult {
        torn_bytes: scan.torn_bytes,
        ..RecoveryResult::default()
    };

    if read_only {
        if !scan.changesets.is_empty() {
            return Err(Error::NeedRecovery);
        }
        return Ok(result);
    }

    for changeset in &scan.changesets {
        for (page_id, page) in &changeset.pages {
            if page.size() != page_size {
                return Err(Error::corrupted(format!(
                    "journal image of page {page_id} has {} bytes, expected {page_size}",
                    page.size()
                )));
            }
            storage.write_at(page_id * page_size as u64, page.as_bytes())?;
            result.pages_restored += 1;
        }
        result.changesets_replayed += 1;
        result.recovered_lsn = changeset.lsn;
        tracing::debug!(
            lsn = changeset.lsn,
            pages = changeset.pages.len(),
            "replayed journal changeset"
        );
    }

    storage.sync()?;
    journal.clear()?;

    if result.did_work() {
        tracing::info!(
            changesets = result.changesets_replayed,
            pages = result.pages_restored,
            torn_bytes = result.torn_bytes,
            "journal recovery complete"
        );
    }
    Ok(result)
}
