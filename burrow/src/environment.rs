//! Environments: one backing file and the databases inside it.
//!
//! An [`Environment`] owns the page store and the registry of open database
//! handles and cursors. Every handle shares one mutex-protected state, so a
//! public operation (including every page it touches and the commit that
//! ends it) runs as a unit, even when handles are used from several threads.
//!
//! # Lifecycle
//!
//! ```text
//! create/open ──► Open ──► close ──► Closed
//! ```
//!
//! Closing the environment closes its databases. Handles that outlive it
//! fail with `NotReady`.
//!
//! # Transactions
//!
//! With `EnvFlags::ENABLE_TRANSACTIONS` one [`Transaction`] at a time may
//! group operations into a single commit. While it is active, operations
//! that do not run inside it fail with `TxnConflict`.
//!
//! # Usage
//!
//! ```no_run
//! use burrow::{DbFlags, Environment, EnvironmentConfig, InsertFlags};
//!
//! let env = Environment::create(Some("data.db".as_ref()), EnvironmentConfig::default())?;
//! let db = env.create_database(1, DbFlags::empty(), &[])?;
//! db.insert(b"key", b"record", InsertFlags::empty())?;
//! assert_eq!(db.find(b"key")?, b"record");
//! env.close(burrow::CloseFlags::AUTO_CLEANUP)?;
//! # Ok::<(), burrow::Error>(())
//! ```

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::comparator::{Comparator, ComparatorRegistry};
use crate::config::EnvironmentConfig;
use crate::database::Database;
use crate::diagnostics::{ErrorChannel, Severity};
use crate::error::{Error, Result};
use crate::params::{
    CloseFlags, DbFlags, EnvFlags, EnvironmentParameters, KEY_SIZE_UNLIMITED, KeyType, ParamName,
    Parameter, RECORD_SIZE_UNLIMITED, RESERVED_DATABASE_NAMES, TxnFlags,
};
use crate::storage::btree::{BTree, NodeLimits};
use crate::storage::header::{DbDescriptor, max_databases};
use crate::storage::io::{FileStorage, MemoryStorage, Storage};
use crate::storage::journal::Journal;
use crate::storage::page::{PageId, is_valid_page_size};
use crate::storage::recovery::RecoveryResult;
use crate::storage::store::{PageStore, StoreOptions};
use crate::transaction::Transaction;

/// Extension of the journal file next to an environment file.
pub const JOURNAL_EXTENSION: &str = "jrn";

/// Path of the journal belonging to an environment file.
#[must_use]
pub fn journal_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(JOURNAL_EXTENSION);
    PathBuf::from(name)
}

/// Book-keeping for one open database handle.
#[derive(Debug, Default)]
pub(crate) struct DbRuntime {
    /// Id of the `Database` handle that has it open.
    handle: u64,
    /// Ids of its open cursors.
    cursors: HashSet<u64>,
    /// Bumped by every successful change.
    epoch: u64,
    /// Epoch at which each leaf was last split, merged or freed.
    restructured: HashMap<PageId, u64>,
    /// Cursors that landed before this epoch are stale everywhere.
    reset_epoch: u64,
}

/// The environment's running transaction.
#[derive(Debug)]
struct ActiveTxn {
    id: u64,
    flags: TxnFlags,
    /// Databases it changed.
    databases: HashSet<u16>,
    /// Cursors opened inside it, as (database, cursor).
    cursors: HashSet<(u16, u64)>,
}

/// State shared by every handle of one environment.
pub(crate) struct EnvState {
    store: Option<PageStore>,
    path: Option<PathBuf>,
    flags: EnvFlags,
    cache_size: usize,
    comparators: ComparatorRegistry,
    databases: HashMap<u16, DbRuntime>,
    next_id: u64,
    txn: Option<ActiveTxn>,
    /// Transaction the running operation belongs to.
    scope: Option<u64>,
}

pub(crate) struct Shared {
    state: Mutex<EnvState>,
    diagnostics: ErrorChannel,
}

impl Shared {
    /// Lock the state, discarding a half-done change left by a panic.
    pub(crate) fn lock(&self) -> MutexGuard<'_, EnvState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                let mut guard = poisoned.into_inner();
                guard.scope = None;
                if let Some(txn) = guard.txn.take() {
                    guard.reset_cursors(&txn.databases);
                }
                if let Some(store) = guard.store.as_mut() {
                    store.abort();
                }
                self.state.clear_poison();
                tracing::warn!("recovered environment state after a panic");
                guard
            }
        }
    }

    /// Run a public operation, reporting its failure to the diagnostics channel.
    pub(crate) fn run<T>(
        &self,
        operation: &str,
        f: impl FnOnce(&mut EnvState) -> Result<T>,
    ) -> Result<T> {
        self.run_in(operation, None, f)
    }

    /// Run a public operation on behalf of transaction `scope`.
    pub(crate) fn run_in<T>(
        &self,
        operation: &str,
        scope: Option<u64>,
        f: impl FnOnce(&mut EnvState) -> Result<T>,
    ) -> Result<T> {
        let result = {
            let mut state = self.lock();
            state.scope = scope;
            let result = f(&mut state);
            state.scope = None;
            result
        };
        if let Err(e) = &result {
            self.report_error(operation, e);
        }
        result
    }

    pub(crate) fn report_error(&self, operation: &str, error: &Error) {
        self.diagnostics.report_error(operation, error);
    }
}

impl EnvState {
    pub(crate) fn store(&mut self) -> Result<&mut PageStore> {
        self.store.as_mut().ok_or(Error::NotReady("environment"))
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// The runtime of an open database, checking the handle.
    pub(crate) fn runtime(&mut self, name: u16, handle: u64) -> Result<&mut DbRuntime> {
        if self.store.is_none() {
            return Err(Error::NotReady("environment"));
        }
        self.databases
            .get_mut(&name)
            .filter(|runtime| runtime.handle == handle)
            .ok_or(Error::NotReady("database"))
    }

    /// The directory entry of a database.
    pub(crate) fn descriptor(&mut self, name: u16) -> Result<DbDescriptor> {
        self.store()?
            .header()
            .descriptor(name)
            .copied()
            .ok_or(Error::DatabaseNotFound(name))
    }

    pub(crate) const fn cache_size(&self) -> usize {
        self.cache_size
    }

    pub(crate) fn comparators(&mut self) -> &mut ComparatorRegistry {
        &mut self.comparators
    }

    /// Whether the running operation belongs to the active transaction.
    ///
    /// Fails if it belongs to a transaction that has ended, or if it runs
    /// outside the transaction while one is active.
    pub(crate) fn in_txn(&self) -> Result<bool> {
        match (&self.txn, self.scope) {
            (None, None) => Ok(false),
            (Some(txn), Some(scope)) if txn.id == scope => Ok(true),
            (_, Some(_)) => Err(Error::NotReady("transaction")),
            (Some(_), None) => Err(Error::TxnConflict),
        }
    }

    fn check_no_txn(&self) -> Result<()> {
        if self.txn.is_some() {
            return Err(Error::TxnConflict);
        }
        Ok(())
    }

    /// Make every cursor of `databases` stale.
    fn reset_cursors(&mut self, databases: &HashSet<u16>) {
        for name in databases {
            if let Some(runtime) = self.databases.get_mut(name) {
                runtime.epoch += 1;
                runtime.reset_epoch = runtime.epoch;
            }
        }
    }

    fn begin_txn(&mut self, flags: TxnFlags) -> Result<u64> {
        self.store()?;
        let flags = TxnFlags::from_bits(flags.bits())
            .ok_or_else(|| Error::invalid_parameter(format!("unknown transaction flags {flags:?}")))?;
        if !self.flags.contains(EnvFlags::ENABLE_TRANSACTIONS) {
            return Err(Error::invalid_parameter(
                "transactions need EnvFlags::ENABLE_TRANSACTIONS",
            ));
        }
        if self.txn.is_some() {
            return Err(Error::TxnConflict);
        }
        let id = self.next_id();
        self.txn = Some(ActiveTxn {
            id,
            flags,
            databases: HashSet::new(),
            cursors: HashSet::new(),
        });
        tracing::debug!(txn = id, ?flags, "began transaction");
        Ok(id)
    }

    fn active_txn(&self, id: u64) -> Result<&ActiveTxn> {
        self.txn
            .as_ref()
            .filter(|txn| txn.id == id)
            .ok_or(Error::NotReady("transaction"))
    }

    /// Commit every change of transaction `id` at once.
    pub(crate) fn commit_txn(&mut self, id: u64) -> Result<()> {
        if !self.active_txn(id)?.cursors.is_empty() {
            return Err(Error::CursorStillOpen);
        }
        let store = self.store()?;
        if let Err(e) = store.commit() {
            store.abort();
            if let Some(txn) = self.txn.take() {
                self.reset_cursors(&txn.databases);
            }
            return Err(e);
        }
        self.txn = None;
        tracing::debug!(txn = id, "committed transaction");
        Ok(())
    }

    /// Discard every change of transaction `id`.
    ///
    /// Cursors opened inside it stay registered but can no longer be used.
    pub(crate) fn abort_txn(&mut self, id: u64) -> Result<()> {
        self.active_txn(id)?;
        let Some(txn) = self.txn.take() else {
            return Err(Error::NotReady("transaction"));
        };
        if let Some(store) = self.store.as_mut() {
            store.abort();
        }
        self.reset_cursors(&txn.databases);
        tracing::debug!(txn = id, "aborted transaction");
        Ok(())
    }

    /// Run a read-only tree operation.
    pub(crate) fn read<T>(
        &mut self,
        name: u16,
        handle: u64,
        f: impl FnOnce(&mut BTree<'_>) -> Result<T>,
    ) -> Result<T> {
        self.in_txn()?;
        self.runtime(name, handle)?;
        let comparator = self.comparators.resolve(name)?;
        let mut descriptor = self.descriptor(name)?;
        let store = self.store()?;
        let mut tree = BTree::new(store, &mut descriptor, &comparator);
        f(&mut tree)
    }

    /// Run a tree operation that changes the database, then commit.
    ///
    /// Inside a transaction the commit is left to the transaction. On
    /// failure every page the operation touched is discarded.
    pub(crate) fn write<T>(
        &mut self,
        name: u16,
        handle: u64,
        f: impl FnOnce(&mut BTree<'_>) -> Result<T>,
    ) -> Result<T> {
        let in_txn = self.in_txn()?;
        if let Some(txn) = self.txn.as_mut().filter(|_| in_txn) {
            if txn.flags.contains(TxnFlags::READ_ONLY) {
                return Err(Error::WriteProtected);
            }
            txn.databases.insert(name);
        }
        self.runtime(name, handle)?;
        let comparator = self.comparators.resolve(name)?;
        let mut descriptor = self.descriptor(name)?;
        let store = self.store()?;
        if store.is_read_only() {
            return Err(Error::WriteProtected);
        }

        let savepoint = in_txn.then(|| store.savepoint());
        let (value, restructured) = match apply(store, &mut descriptor, &comparator, f, !in_txn) {
            Ok(done) => done,
            Err(e) => {
                match savepoint {
                    Some(savepoint) => store.rollback_to(savepoint),
                    None => store.abort(),
                }
                return Err(e);
            }
        };

        let runtime = self.runtime(name, handle)?;
        runtime.epoch += 1;
        if !runtime.cursors.is_empty() {
            for page in restructured {
                runtime.restructured.insert(page, runtime.epoch);
            }
        }
        Ok(value)
    }

    /// Current change epoch of a database.
    pub(crate) fn epoch(&mut self, name: u16, handle: u64) -> Result<u64> {
        Ok(self.runtime(name, handle)?.epoch)
    }

    /// Fail with `CursorStale` if `leaf` was restructured after `epoch`.
    pub(crate) fn check_fresh(
        &mut self,
        name: u16,
        handle: u64,
        leaf: PageId,
        epoch: u64,
    ) -> Result<()> {
        let runtime = self.runtime(name, handle)?;
        if epoch < runtime.reset_epoch {
            return Err(Error::CursorStale);
        }
        match runtime.restructured.get(&leaf) {
            Some(changed) if *changed > epoch => Err(Error::CursorStale),
            _ => Ok(()),
        }
    }

    pub(crate) fn register_cursor(&mut self, name: u16, handle: u64) -> Result<u64> {
        let in_txn = self.in_txn()?;
        self.runtime(name, handle)?;
        let id = self.next_id();
        self.runtime(name, handle)?.cursors.insert(id);
        if let Some(txn) = self.txn.as_mut().filter(|_| in_txn) {
            txn.cursors.insert((name, id));
        }
        Ok(id)
    }

    /// Check that a cursor is still registered and may run now.
    pub(crate) fn cursor_alive(&mut self, name: u16, handle: u64, cursor: u64) -> Result<()> {
        self.in_txn()?;
        if self.runtime(name, handle)?.cursors.contains(&cursor) {
            Ok(())
        } else {
            Err(Error::NotReady("cursor"))
        }
    }

    pub(crate) fn unregister_cursor(&mut self, name: u16, handle: u64, cursor: u64) {
        if let Some(txn) = self.txn.as_mut() {
            txn.cursors.remove(&(name, cursor));
        }
        if let Ok(runtime) = self.runtime(name, handle) {
            runtime.cursors.remove(&cursor);
            if runtime.cursors.is_empty() {
                runtime.restructured.clear();
            }
        }
    }

    /// Close a database handle.
    pub(crate) fn close_database(&mut self, name: u16, handle: u64, flags: CloseFlags) -> Result<()> {
        let Ok(runtime) = self.runtime(name, handle) else {
            return Ok(());
        };
        if !runtime.cursors.is_empty() && !flags.contains(CloseFlags::AUTO_CLEANUP) {
            return Err(Error::CursorStillOpen);
        }
        if let Some(txn) = self.txn.as_mut() {
            txn.cursors.retain(|(db, _)| *db != name);
        }
        self.databases.remove(&name);
        self.comparators.detach(name);
        tracing::debug!(database = name, "closed database");
        Ok(())
    }

    fn open_handle(&mut self, name: u16, key_type: KeyType) -> u64 {
        let handle = self.next_id();
        self.databases.insert(
            name,
            DbRuntime {
                handle,
                ..DbRuntime::default()
            },
        );
        self.comparators.attach(name, key_type);
        handle
    }

    /// Stage a directory change and commit it.
    fn commit_header(&mut self, change: impl FnOnce(&mut PageStore) -> Result<()>) -> Result<()> {
        self.check_no_txn()?;
        let store = self.store()?;
        if store.is_read_only() {
            return Err(Error::WriteProtected);
        }
        let result = change(store).and_then(|()| store.commit());
        if result.is_err() {
            store.abort();
        }
        result
    }
}

fn apply<T>(
    store: &mut PageStore,
    descriptor: &mut DbDescriptor,
    comparator: &Comparator,
    f: impl FnOnce(&mut BTree<'_>) -> Result<T>,
    commit: bool,
) -> Result<(T, Vec<PageId>)> {
    let (value, restructured) = {
        let mut tree = BTree::new(store, descriptor, comparator);
        let value = f(&mut tree)?;
        (value, tree.take_restructured())
    };
    store.header_mut()?.put_descriptor(*descriptor);
    if commit {
        store.commit()?;
    }
    Ok((value, restructured))
}

/// A handle to an open environment.
pub struct Environment {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("Environment")
            .field("path", &state.path)
            .field("flags", &state.flags)
            .field("open", &state.store.is_some())
            .field("databases", &state.databases.len())
            .finish()
    }
}

impl Environment {
    /// Create a new environment, truncating any existing file at `path`.
    ///
    /// `path` may only be `None` for an in-memory environment.
    pub fn create(path: Option<&Path>, config: EnvironmentConfig) -> Result<Self> {
        let diagnostics = config.diagnostics.clone();
        let result = Self::create_inner(path, &config);
        if let Err(e) = &result {
            diagnostics.report_error("create", e);
        }
        result
    }

    fn create_inner(path: Option<&Path>, config: &EnvironmentConfig) -> Result<Self> {
        let flags = validate_flags(config.flags)?;
        if flags.contains(EnvFlags::READ_ONLY) {
            return Err(Error::invalid_parameter(
                "cannot create a read-only environment",
            ));
        }
        if !is_valid_page_size(config.page_size) {
            return Err(Error::InvalidPageSize(config.page_size));
        }

        let fsync = flags.contains(EnvFlags::ENABLE_FSYNC);
        let (storage, journal, path): (Box<dyn Storage>, Option<Journal>, Option<PathBuf>) =
            if flags.contains(EnvFlags::IN_MEMORY) {
                (Box::new(MemoryStorage::new()), None, None)
            } else {
                let path = path.ok_or_else(|| {
                    Error::invalid_parameter("a path is required unless IN_MEMORY is set")
                })?;
                let storage = FileStorage::create(path, fsync)?;
                let journal = if flags.contains(EnvFlags::DISABLE_JOURNAL) {
                    None
                } else {
                    let storage = FileStorage::create(&journal_path(path), fsync)?;
                    Some(Journal::new(Box::new(storage))?)
                };
                (Box::new(storage), journal, Some(path.to_path_buf()))
            };

        let persisted = flags & (EnvFlags::IN_MEMORY | EnvFlags::DISABLE_JOURNAL);
        let store = PageStore::create(
            storage,
            journal,
            StoreOptions {
                page_size: config.page_size,
                cache_size: config.cache_size,
                env_flags: persisted.bits(),
                read_only: false,
            },
        )?;

        tracing::info!(
            path = ?path,
            page_size = config.page_size,
            flags = ?flags,
            "created environment"
        );
        Ok(Self::from_parts(store, path, flags, config))
    }

    /// Open an existing environment, replaying its journal if needed.
    pub fn open(path: Option<&Path>, config: EnvironmentConfig) -> Result<Self> {
        let diagnostics = config.diagnostics.clone();
        let result = Self::open_inner(path, &config);
        if let Err(e) = &result {
            diagnostics.report_error("open", e);
        }
        result
    }

    fn open_inner(path: Option<&Path>, config: &EnvironmentConfig) -> Result<Self> {
        let flags = validate_flags(config.flags)?;
        if flags.contains(EnvFlags::IN_MEMORY) {
            return Err(Error::invalid_parameter(
                "an in-memory environment cannot be opened",
            ));
        }
        let path = path.ok_or_else(|| Error::invalid_parameter("a path is required"))?;
        let read_only = flags.contains(EnvFlags::READ_ONLY);
        let fsync = flags.contains(EnvFlags::ENABLE_FSYNC);

        let storage = FileStorage::open(path, read_only, fsync).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::FileNotFound(path.to_path_buf())
            } else {
                Error::from(e)
            }
        })?;

        let journal_file = journal_path(path);
        let journal = if flags.contains(EnvFlags::DISABLE_JOURNAL) {
            None
        } else if read_only {
            match FileStorage::open(&journal_file, true, false) {
                Ok(storage) => Some(Journal::new(Box::new(storage))?),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => return Err(e.into()),
            }
        } else {
            let storage = FileStorage::open_or_create(&journal_file, fsync)?;
            Some(Journal::new(Box::new(storage))?)
        };

        let (store, recovery) = PageStore::open(
            Box::new(storage),
            journal,
            StoreOptions {
                page_size: config.page_size,
                cache_size: config.cache_size,
                env_flags: 0,
                read_only,
            },
        )?;
        report_recovery(&config.diagnostics, path, &recovery);

        tracing::info!(
            path = %path.display(),
            page_size = store.page_size(),
            databases = store.header().directory.len(),
            "opened environment"
        );
        Ok(Self::from_parts(store, Some(path.to_path_buf()), flags, config))
    }

    /// Create or open an environment over caller-supplied storage.
    #[cfg(test)]
    pub(crate) fn with_storage(
        storage: Box<dyn Storage>,
        journal: Option<Box<dyn Storage>>,
        config: &EnvironmentConfig,
        create: bool,
    ) -> Result<Self> {
        let journal = journal.map(Journal::new).transpose()?;
        let options = StoreOptions {
            page_size: config.page_size,
            cache_size: config.cache_size,
            env_flags: 0,
            read_only: config.flags.contains(EnvFlags::READ_ONLY),
        };
        let store = if create {
            PageStore::create(storage, journal, options)?
        } else {
            let (store, recovery) = PageStore::open(storage, journal, options)?;
            report_recovery(&config.diagnostics, Path::new("<simulated>"), &recovery);
            store
        };
        Ok(Self::from_parts(store, None, config.flags, config))
    }

    fn from_parts(
        store: PageStore,
        path: Option<PathBuf>,
        flags: EnvFlags,
        config: &EnvironmentConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(EnvState {
                    store: Some(store),
                    path,
                    flags,
                    cache_size: config.cache_size,
                    comparators: ComparatorRegistry::new(),
                    databases: HashMap::new(),
                    next_id: 0,
                    txn: None,
                    scope: None,
                }),
                diagnostics: config.diagnostics.clone(),
            }),
        }
    }

    /// The channel this environment reports to.
    #[must_use]
    pub fn diagnostics(&self) -> &ErrorChannel {
        &self.shared.diagnostics
    }

    /// Returns true until the environment is closed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.shared.lock().store.is_some()
    }

    /// Create a database.
    ///
    /// Accepted parameters are `KeySize`, `KeyType` and `RecordSize`.
    pub fn create_database(
        &self,
        name: u16,
        flags: DbFlags,
        params: &[Parameter],
    ) -> Result<Database> {
        let handle = self.shared.run("create_database", |state| {
            validate_name(name)?;
            let flags = DbFlags::from_bits(flags.bits())
                .ok_or_else(|| Error::invalid_parameter(format!("unknown database flags {flags:?}")))?;
            if flags.contains(DbFlags::SORT_DUPLICATES)
                && !flags.contains(DbFlags::ENABLE_DUPLICATE_KEYS)
            {
                return Err(Error::invalid_parameter(
                    "SORT_DUPLICATES requires ENABLE_DUPLICATE_KEYS",
                ));
            }
            if flags.contains(DbFlags::RECORD_NUMBER32 | DbFlags::RECORD_NUMBER64) {
                return Err(Error::invalid_parameter(
                    "RECORD_NUMBER32 and RECORD_NUMBER64 exclude each other",
                ));
            }

            let store = state.store()?;
            if store.is_read_only() {
                return Err(Error::WriteProtected);
            }
            let mut descriptor = negotiate(name, flags, params, store.page_size())?;
            let header = store.header();
            if header.descriptor(name).is_some() {
                return Err(Error::invalid_parameter(format!(
                    "database {name} already exists"
                )));
            }
            if header.directory.len() >= max_databases(store.page_size()) {
                return Err(Error::LimitsReached(format!(
                    "the directory holds at most {} databases",
                    max_databases(store.page_size())
                )));
            }

            state.commit_header(|store| {
                BTree::new(store, &mut descriptor, &Comparator::default()).init()?;
                store.header_mut()?.put_descriptor(descriptor);
                Ok(())
            })?;
            tracing::info!(
                database = name,
                key_type = ?descriptor.key_type,
                key_size = descriptor.key_size,
                "created database"
            );
            Ok(state.open_handle(name, descriptor.key_type))
        })?;
        Ok(Database::new(Arc::clone(&self.shared), name, handle))
    }

    /// Open an existing database.
    pub fn open_database(&self, name: u16) -> Result<Database> {
        let handle = self.shared.run("open_database", |state| {
            let descriptor = state.descriptor(name)?;
            if state.databases.contains_key(&name) {
                return Err(Error::DatabaseAlreadyOpen(name));
            }
            tracing::debug!(database = name, "opened database");
            Ok(state.open_handle(name, descriptor.key_type))
        })?;
        Ok(Database::new(Arc::clone(&self.shared), name, handle))
    }

    /// Give a closed database a new name.
    pub fn rename_database(&self, old: u16, new: u16) -> Result<()> {
        self.shared.run("rename_database", |state| {
            validate_name(new)?;
            let mut descriptor = state.descriptor(old)?;
            if old == new {
                return Ok(());
            }
            if state.databases.contains_key(&old) {
                return Err(Error::DatabaseAlreadyOpen(old));
            }
            if state.store()?.header().descriptor(new).is_some() {
                return Err(Error::DatabaseAlreadyExists(new));
            }

            state.commit_header(|store| {
                let header = store.header_mut()?;
                header.remove_descriptor(old);
                descriptor.name = new;
                header.put_descriptor(descriptor);
                Ok(())
            })?;
            tracing::info!(from = old, to = new, "renamed database");
            Ok(())
        })
    }

    /// Delete a closed database and free all of its pages.
    pub fn erase_database(&self, name: u16) -> Result<()> {
        self.shared.run("erase_database", |state| {
            let mut descriptor = state.descriptor(name)?;
            if state.databases.contains_key(&name) {
                return Err(Error::DatabaseAlreadyOpen(name));
            }

            state.commit_header(|store| {
                BTree::new(store, &mut descriptor, &Comparator::default()).free_all()?;
                store.header_mut()?.remove_descriptor(name);
                Ok(())
            })?;
            tracing::info!(database = name, "erased database");
            Ok(())
        })
    }

    /// Names of every database, in creation order.
    pub fn database_names(&self) -> Result<Vec<u16>> {
        self.shared.run("database_names", |state| {
            Ok(state
                .store()?
                .header()
                .directory
                .iter()
                .map(|d| d.name)
                .collect())
        })
    }

    /// Begin a transaction.
    ///
    /// Needs `EnvFlags::ENABLE_TRANSACTIONS`; fails with `TxnConflict`
    /// while another transaction is active.
    pub fn begin(&self, flags: TxnFlags) -> Result<Transaction> {
        let id = self
            .shared
            .run("txn_begin", |state| state.begin_txn(flags))?;
        Ok(Transaction::new(Arc::clone(&self.shared), id))
    }

    /// Write everything through to the backing file.
    pub fn flush(&self) -> Result<()> {
        self.shared.run("flush", |state| {
            state.check_no_txn()?;
            state.store()?.flush()
        })
    }

    /// The configuration of the environment.
    pub fn parameters(&self) -> Result<EnvironmentParameters> {
        self.shared.run("get_parameters", |state| {
            let cache_size = state.cache_size();
            let flags = state.flags;
            let page_size = state.store()?.page_size();
            Ok(EnvironmentParameters {
                page_size,
                cache_size,
                max_databases: max_databases(page_size),
                flags,
            })
        })
    }

    /// Fill in the values of the requested parameters.
    ///
    /// Accepted names are `PageSize`, `CacheSize`, `MaxDatabases` and `Flags`.
    pub fn get_parameters(&self, params: &mut [Parameter]) -> Result<()> {
        let current = self.parameters()?;
        self.shared.run("get_parameters", |_| {
            for param in params.iter_mut() {
                param.value = match param.name {
                    ParamName::PageSize => current.page_size as u64,
                    ParamName::CacheSize => current.cache_size as u64,
                    ParamName::MaxDatabases => current.max_databases as u64,
                    ParamName::Flags => u64::from(current.flags.bits()),
                    other => {
                        return Err(Error::invalid_parameter(format!(
                            "{other:?} is not an environment parameter"
                        )));
                    }
                };
            }
            Ok(())
        })
    }

    /// Close the environment and every database in it.
    ///
    /// Fails with `TxnStillOpen` if a transaction is active, or with
    /// `CursorStillOpen` if a cursor is open, unless
    /// `CloseFlags::AUTO_CLEANUP` is given; an active transaction is then
    /// aborted. Closing twice is a no-op.
    pub fn close(&self, flags: CloseFlags) -> Result<()> {
        self.shared.run("close", |state| {
            if state.store.is_none() {
                return Ok(());
            }
            let cleanup = flags.contains(CloseFlags::AUTO_CLEANUP);
            if state.txn.is_some() && !cleanup {
                return Err(Error::TxnStillOpen);
            }
            let cursors: usize = state.databases.values().map(|db| db.cursors.len()).sum();
            if cursors > 0 && !cleanup {
                return Err(Error::CursorStillOpen);
            }
            if let Some(id) = state.txn.as_ref().map(|txn| txn.id) {
                state.abort_txn(id)?;
            }

            let flushed = match state.store.as_mut() {
                Some(store) if !store.is_read_only() && !store.is_failed() => store.flush(),
                _ => Ok(()),
            };
            for name in state.databases.keys().copied().collect::<Vec<_>>() {
                state.comparators.detach(name);
            }
            state.databases.clear();
            state.store = None;
            tracing::info!(path = ?state.path, "closed environment");
            flushed
        })
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        if let Err(e) = self.close(CloseFlags::AUTO_CLEANUP) {
            tracing::warn!(error = %e, "failed to close environment on drop");
        }
    }
}

fn validate_flags(flags: EnvFlags) -> Result<EnvFlags> {
    EnvFlags::from_bits(flags.bits())
        .ok_or_else(|| Error::invalid_parameter(format!("unknown environment flags {flags:?}")))
}

fn validate_name(name: u16) -> Result<()> {
    if name == 0 || name >= RESERVED_DATABASE_NAMES {
        return Err(Error::invalid_parameter(format!(
            "database name {name} is reserved"
        )));
    }
    Ok(())
}

/// Turn creation parameters into a directory entry.
fn negotiate(name: u16, flags: DbFlags, params: &[Parameter], page_size: usize) -> Result<DbDescriptor> {
    let mut key_type = KeyType::Binary;
    let mut key_size = None;
    let mut record_size = RECORD_SIZE_UNLIMITED;

    for param in params {
        match param.name {
            ParamName::KeyType => {
                key_type = u8::try_from(param.value)
                    .ok()
                    .and_then(|v| KeyType::try_from(v).ok())
                    .ok_or_else(|| {
                        Error::invalid_parameter(format!("unknown key type {}", param.value))
                    })?;
            }
            ParamName::KeySize => {
                let size = u16::try_from(param.value)
                    .ok()
                    .filter(|size| *size > 0)
                    .ok_or_else(|| {
                        Error::invalid_parameter(format!("key size {} out of range", param.value))
                    })?;
                key_size = Some(size);
            }
            ParamName::RecordSize => {
                record_size = u32::try_from(param.value).map_err(|_| {
                    Error::invalid_parameter(format!("record size {} out of range", param.value))
                })?;
            }
            other => {
                return Err(Error::invalid_parameter(format!(
                    "{other:?} cannot be set when creating a database"
                )));
            }
        }
    }

    if let Some(number_type) = flags.record_number_type() {
        if params.iter().any(|param| param.name == ParamName::KeyType) && key_type != number_type {
            return Err(Error::invalid_parameter(format!(
                "record number databases use {number_type:?} keys"
            )));
        }
        key_type = number_type;
    }

    let key_size = match (key_type.fixed_size(), key_size) {
        (Some(width), None) => width,
        (Some(width), Some(size)) if size == width => width,
        (Some(width), Some(size)) => {
            return Err(Error::invalid_parameter(format!(
                "key size {size} does not match {key_type:?} ({width} bytes)"
            )));
        }
        (None, size) => size.unwrap_or(KEY_SIZE_UNLIMITED),
    };

    let limits = NodeLimits::new(page_size, key_size);
    if key_size != KEY_SIZE_UNLIMITED && usize::from(key_size) > limits.max_inline_key {
        return Err(Error::InvalidKeySize {
            expected: None,
            actual: usize::from(key_size),
        });
    }

    Ok(DbDescriptor {
        name,
        key_type,
        flags,
        key_size,
        record_size,
        root: 0,
        record_count: 0,
        key_count: 0,
    })
}

fn report_recovery(diagnostics: &ErrorChannel, path: &Path, recovery: &RecoveryResult) {
    if recovery.changesets_replayed > 0 {
        diagnostics.report(
            Severity::Warning,
            &format!(
                "{}: replayed {} journal changeset(s), {} page(s) restored",
                path.display(),
                recovery.changesets_replayed,
                recovery.pages_restored
            ),
        );
    }
    if recovery.torn_bytes > 0 {
        diagnostics.report(
            Severity::Warning,
            &format!(
                "{}: discarded {} byte(s) of incomplete journal",
                path.display(),
                recovery.torn_bytes
            ),
        );
    }
}
