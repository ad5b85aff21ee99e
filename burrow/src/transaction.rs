//! Transactions: several operations committed as one.
//!
//! A transaction is begun on an environment opened with
//! `EnvFlags::ENABLE_TRANSACTIONS`. Operations run inside it through the
//! `*_in` methods of [`Database`](crate::Database) and through cursors
//! opened with [`Database::cursor_in`](crate::Database::cursor_in). Their
//! pages collect in one changeset that reaches the journal only on
//! [`Transaction::commit`], so a crash before the commit leaves no trace.
//!
//! An operation that fails inside a transaction is undone on its own; the
//! changes made before it are kept. Dropping a transaction that was not
//! committed aborts it.
//!
//! ```no_run
//! use burrow::{DbFlags, EnvFlags, Environment, EnvironmentConfig, InsertFlags, TxnFlags};
//!
//! let config = EnvironmentConfig::default().with_flags(EnvFlags::ENABLE_TRANSACTIONS);
//! let env = Environment::create(Some("data.db".as_ref()), config)?;
//! let db = env.create_database(1, DbFlags::empty(), &[])?;
//!
//! let txn = env.begin(TxnFlags::empty())?;
//! db.insert_in(&txn, b"a", b"1", InsertFlags::empty())?;
//! db.insert_in(&txn, b"b", b"2", InsertFlags::empty())?;
//! txn.commit()?;
//! # Ok::<(), burrow::Error>(())
//! ```

use std::sync::Arc;

use crate::environment::Shared;
use crate::error::Result;

/// A running transaction.
pub struct Transaction {
    shared: Arc<Shared>,
    id: u64,
    finished: bool,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl Transaction {
    pub(crate) const fn new(shared: Arc<Shared>, id: u64) -> Self {
        Self {
            shared,
            id,
            finished: false,
        }
    }

    /// Identifier of the transaction, unique within its environment.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Returns true if the transaction was begun on the environment behind `shared`.
    pub(crate) fn belongs_to(&self, shared: &Arc<Shared>) -> bool {
        Arc::ptr_eq(&self.shared, shared)
    }

    /// Make every change of the transaction durable at once.
    ///
    /// Fails with `CursorStillOpen` while a cursor opened inside it is
    /// open. A transaction whose commit fails is aborted.
    pub fn commit(mut self) -> Result<()> {
        let id = self.id;
        self.shared.run("txn_commit", |state| state.commit_txn(id))?;
        self.finished = true;
        Ok(())
    }

    /// Discard every change of the transaction.
    ///
    /// Cursors opened inside it fail with `NotReady` afterwards; cursors of
    /// the changed databases opened outside it become stale.
    pub fn abort(mut self) -> Result<()> {
        let id = self.id;
        self.finished = true;
        self.shared.run("txn_abort", |state| state.abort_txn(id))
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        // an error means the transaction already ended with its environment
        if !self.finished && self.shared.lock().abort_txn(self.id).is_ok() {
            tracing::debug!(txn = self.id, "aborted transaction on drop");
        }
    }
}
