//! Database handles.
//!
//! A [`Database`] is one named B-tree inside an environment. Handles are
//! cheap: they share the environment's state and only carry the database
//! name and the id under which it was opened.
//!
//! Every operation has an `*_in` twin that runs it inside a
//! [`Transaction`]. Databases created with `RECORD_NUMBER32` or
//! `RECORD_NUMBER64` number their records themselves through
//! [`Database::append`].

use std::sync::Arc;

use crate::comparator::Comparator;
use crate::cursor::{Cursor, Iter};
use crate::environment::{EnvState, Shared};
use crate::error::{Error, Result};
use crate::params::{
    CloseFlags, DatabaseParameters, DbFlags, FindFlags, InsertFlags, KEY_SIZE_UNLIMITED, ParamName,
    Parameter, RECORD_SIZE_UNLIMITED,
};
use crate::storage::btree::{BTree, DuplicatePosition, Entry, InsertMode, NodeLimits, TreeStats};
use crate::storage::header::{DbDescriptor, max_databases};
use crate::transaction::Transaction;

/// Insert flags that only make sense for databases with duplicates.
const DUPLICATE_FLAGS: InsertFlags = InsertFlags::DUPLICATE
    .union(InsertFlags::DUPLICATE_INSERT_BEFORE)
    .union(InsertFlags::DUPLICATE_INSERT_AFTER)
    .union(InsertFlags::DUPLICATE_INSERT_FIRST)
    .union(InsertFlags::DUPLICATE_INSERT_LAST);

const POSITION_FLAGS: InsertFlags = InsertFlags::DUPLICATE_INSERT_BEFORE
    .union(InsertFlags::DUPLICATE_INSERT_AFTER)
    .union(InsertFlags::DUPLICATE_INSERT_FIRST)
    .union(InsertFlags::DUPLICATE_INSERT_LAST);

/// What a positional insert is relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Anchor {
    /// Not a cursor insert.
    None,
    /// A cursor on some other key, or on no key.
    Elsewhere,
    /// A cursor on this duplicate of the key being inserted.
    Duplicate(usize),
}

/// Check a key against the database's key size.
pub(crate) fn check_key(descriptor: &DbDescriptor, key: &[u8]) -> Result<()> {
    if descriptor.key_size == KEY_SIZE_UNLIMITED {
        if key.len() > usize::from(u16::MAX) {
            return Err(Error::InvalidKeySize {
                expected: None,
                actual: key.len(),
            });
        }
    } else if key.len() != usize::from(descriptor.key_size) {
        return Err(Error::InvalidKeySize {
            expected: Some(usize::from(descriptor.key_size)),
            actual: key.len(),
        });
    }
    Ok(())
}

/// Check a record against the database's record size.
pub(crate) fn check_record(descriptor: &DbDescriptor, record: &[u8]) -> Result<()> {
    if descriptor.record_size != RECORD_SIZE_UNLIMITED
        && record.len() != descriptor.record_size as usize
    {
        return Err(Error::InvalidRecordSize {
            expected: descriptor.record_size as usize,
            actual: record.len(),
        });
    }
    Ok(())
}

/// Validate insert flags and turn them into a tree insert mode.
pub(crate) fn insert_mode(
    descriptor: &DbDescriptor,
    flags: InsertFlags,
    anchor: Anchor,
) -> Result<InsertMode> {
    let flags = InsertFlags::from_bits(flags.bits())
        .ok_or_else(|| Error::invalid_parameter(format!("unknown insert flags {flags:?}")))?;
    let duplicates = descriptor.flags.contains(DbFlags::ENABLE_DUPLICATE_KEYS);

    if flags.intersects(DUPLICATE_FLAGS) && !duplicates {
        return Err(Error::invalid_parameter(
            "duplicate insert flags on a database without duplicates",
        ));
    }
    if flags.contains(InsertFlags::OVERWRITE) && flags.intersects(DUPLICATE_FLAGS) {
        return Err(Error::invalid_parameter(
            "OVERWRITE cannot be combined with duplicate flags",
        ));
    }
    if (flags & POSITION_FLAGS).bits().count_ones() > 1 {
        return Err(Error::invalid_parameter(
            "at most one duplicate position may be given",
        ));
    }
    let relative = flags
        .intersects(InsertFlags::DUPLICATE_INSERT_BEFORE | InsertFlags::DUPLICATE_INSERT_AFTER);
    if relative && anchor == Anchor::None {
        return Err(Error::invalid_parameter(
            "DUPLICATE_INSERT_BEFORE/AFTER require a cursor",
        ));
    }

    if descriptor.flags.record_number_type().is_some()
        && !flags.intersects(InsertFlags::OVERWRITE | DUPLICATE_FLAGS)
    {
        return Err(Error::invalid_parameter(
            "record number databases assign keys on append",
        ));
    }

    if flags.contains(InsertFlags::OVERWRITE) {
        let position = match anchor {
            Anchor::Duplicate(position) => position,
            Anchor::None | Anchor::Elsewhere => 0,
        };
        return Ok(InsertMode::Overwrite(position));
    }
    if !duplicates {
        return Ok(InsertMode::Unique);
    }

    let position = match anchor {
        Anchor::Duplicate(position) if flags.contains(InsertFlags::DUPLICATE_INSERT_BEFORE) => {
            DuplicatePosition::Before(position)
        }
        Anchor::Duplicate(position) if flags.contains(InsertFlags::DUPLICATE_INSERT_AFTER) => {
            DuplicatePosition::After(position)
        }
        _ if flags.intersects(
            InsertFlags::DUPLICATE_INSERT_FIRST | InsertFlags::DUPLICATE_INSERT_BEFORE,
        ) =>
        {
            DuplicatePosition::First
        }
        _ => DuplicatePosition::Last,
    };
    Ok(InsertMode::Duplicate(position))
}

/// Bytes of one duplicate of an entry.
pub(crate) fn read_duplicate(tree: &mut BTree<'_>, entry: &Entry, position: usize) -> Result<Vec<u8>> {
    let table = tree.records(entry)?;
    let record = table.get(position).ok_or(Error::KeyNotFound)?;
    tree.read_record(record)
}

/// The record number after the largest key, 1 for an empty database.
fn next_record_number(tree: &mut BTree<'_>, width: usize) -> Result<u64> {
    let last = match tree.last()? {
        Some(slot) => {
            let bytes = tree.entry(slot)?.key.bytes;
            let mut number = [0u8; 8];
            number
                .get_mut(..width)
                .filter(|_| bytes.len() == width)
                .ok_or_else(|| Error::corrupted(format!("record number key of {} bytes", bytes.len())))?
                .copy_from_slice(&bytes);
            u64::from_le_bytes(number)
        }
        None => 0,
    };
    let limit = if width == 4 { u64::from(u32::MAX) } else { u64::MAX };
    last.checked_add(1)
        .filter(|next| *next <= limit)
        .ok_or_else(|| Error::LimitsReached("record numbers are exhausted".to_string()))
}

fn record_number_key(number: u64, width: usize) -> Vec<u8> {
    number.to_le_bytes()[..width].to_vec()
}

/// One step of [`Database::bulk_operations`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Insert `record` under `key`.
    Insert {
        key: Vec<u8>,
        record: Vec<u8>,
        flags: InsertFlags,
    },
    /// Look up `key`; non-empty flags accept the nearest key they allow.
    Find { key: Vec<u8>, flags: FindFlags },
    /// Remove `key` with all of its records.
    Erase { key: Vec<u8> },
}

/// What a successful bulk step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The record was stored under this key.
    Inserted(Vec<u8>),
    /// The matched key and its first record.
    Found { key: Vec<u8>, record: Vec<u8> },
    Erased,
}

/// A handle to an open database.
pub struct Database {
    shared: Arc<Shared>,
    name: u16,
    handle: u64,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl Database {
    pub(crate) const fn new(shared: Arc<Shared>, name: u16, handle: u64) -> Self {
        Self {
            shared,
            name,
            handle,
        }
    }

    /// The database name.
    #[must_use]
    pub const fn name(&self) -> u16 {
        self.name
    }

    /// Returns true until the database or its environment is closed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.shared.lock().runtime(self.name, self.handle).is_ok()
    }

    /// Run an operation, inside `txn` if one is given.
    fn run<T>(
        &self,
        operation: &str,
        txn: Option<&Transaction>,
        f: impl FnOnce(&mut EnvState) -> Result<T>,
    ) -> Result<T> {
        self.shared.run_in(operation, txn.map(Transaction::id), |state| {
            if txn.is_some_and(|txn| !txn.belongs_to(&self.shared)) {
                return Err(Error::invalid_parameter(
                    "the transaction belongs to another environment",
                ));
            }
            f(state)
        })
    }

    fn descriptor(&self, state: &mut EnvState) -> Result<DbDescriptor> {
        state.in_txn()?;
        state.runtime(self.name, self.handle)?;
        state.descriptor(self.name)
    }

    /// Insert a record.
    ///
    /// Without `OVERWRITE` an existing key fails with `DuplicateKey`,
    /// unless the database allows duplicates, in which case the record is
    /// added after the existing ones (before them with
    /// `DUPLICATE_INSERT_FIRST`). Record number databases only accept
    /// `OVERWRITE` here; new records go through [`Database::append`].
    pub fn insert(&self, key: &[u8], record: &[u8], flags: InsertFlags) -> Result<()> {
        self.run("insert", None, |state| self.insert_locked(state, key, record, flags))
    }

    /// [`Database::insert`] inside a transaction.
    pub fn insert_in(
        &self,
        txn: &Transaction,
        key: &[u8],
        record: &[u8],
        flags: InsertFlags,
    ) -> Result<()> {
        self.run("insert", Some(txn), |state| {
            self.insert_locked(state, key, record, flags)
        })
    }

    fn insert_locked(
        &self,
        state: &mut EnvState,
        key: &[u8],
        record: &[u8],
        flags: InsertFlags,
    ) -> Result<()> {
        let descriptor = self.descriptor(state)?;
        check_key(&descriptor, key)?;
        check_record(&descriptor, record)?;
        let mode = insert_mode(&descriptor, flags, Anchor::None)?;
        state.write(self.name, self.handle, |tree| tree.insert(key, record, mode))?;
        Ok(())
    }

    /// Store a record under the next record number and return the number.
    ///
    /// Numbers start at 1 and continue after the largest key in the
    /// database. Only valid for databases created with
    /// `RECORD_NUMBER32` or `RECORD_NUMBER64`; keys are the number in
    /// little-endian byte order.
    pub fn append(&self, record: &[u8]) -> Result<u64> {
        self.run("insert", None, |state| self.append_locked(state, record))
    }

    /// [`Database::append`] inside a transaction.
    pub fn append_in(&self, txn: &Transaction, record: &[u8]) -> Result<u64> {
        self.run("insert", Some(txn), |state| self.append_locked(state, record))
    }

    fn append_locked(&self, state: &mut EnvState, record: &[u8]) -> Result<u64> {
        let descriptor = self.descriptor(state)?;
        if descriptor.flags.record_number_type().is_none() {
            return Err(Error::invalid_parameter(
                "append needs a record number database",
            ));
        }
        check_record(&descriptor, record)?;
        let width = usize::from(descriptor.key_size);
        state.write(self.name, self.handle, |tree| {
            let number = next_record_number(tree, width)?;
            tree.insert(&record_number_key(number, width), record, InsertMode::Unique)?;
            Ok(number)
        })
    }

    /// The first record of `key`.
    pub fn find(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.find_duplicate(key, 0)
    }

    /// [`Database::find`] inside a transaction.
    pub fn find_in(&self, txn: &Transaction, key: &[u8]) -> Result<Vec<u8>> {
        self.run("find", Some(txn), |state| self.find_locked(state, key, 0))
    }

    /// The record at one duplicate position of `key`.
    pub fn find_duplicate(&self, key: &[u8], position: usize) -> Result<Vec<u8>> {
        self.run("find", None, |state| self.find_locked(state, key, position))
    }

    fn find_locked(&self, state: &mut EnvState, key: &[u8], position: usize) -> Result<Vec<u8>> {
        check_key(&self.descriptor(state)?, key)?;
        state.read(self.name, self.handle, |tree| {
            let (_, entry) = tree.find(key)?.ok_or(Error::KeyNotFound)?;
            read_duplicate(tree, &entry, position)
        })
    }

    /// Find the nearest key allowed by `flags`.
    ///
    /// Returns the matched key with its first record. `LESS_THAN` is
    /// preferred when both directions are allowed.
    pub fn find_approx(&self, key: &[u8], flags: FindFlags) -> Result<(Vec<u8>, Vec<u8>)> {
        self.run("find", None, |state| self.find_approx_locked(state, key, flags))
    }

    fn find_approx_locked(
        &self,
        state: &mut EnvState,
        key: &[u8],
        flags: FindFlags,
    ) -> Result<(Vec<u8>, Vec<u8>)> {
        let flags = FindFlags::from_bits(flags.bits())
            .ok_or_else(|| Error::invalid_parameter(format!("unknown find flags {flags:?}")))?;
        check_key(&self.descriptor(state)?, key)?;
        state.read(self.name, self.handle, |tree| {
            let (slot, _) = tree.find_approx(key, flags)?.ok_or(Error::KeyNotFound)?;
            let entry = tree.entry(slot)?;
            let record = read_duplicate(tree, &entry, 0)?;
            Ok((entry.key.bytes, record))
        })
    }

    /// Remove a key with all of its records.
    pub fn erase(&self, key: &[u8]) -> Result<()> {
        self.run("erase", None, |state| self.erase_locked(state, key))
    }

    /// [`Database::erase`] inside a transaction.
    pub fn erase_in(&self, txn: &Transaction, key: &[u8]) -> Result<()> {
        self.run("erase", Some(txn), |state| self.erase_locked(state, key))
    }

    fn erase_locked(&self, state: &mut EnvState, key: &[u8]) -> Result<()> {
        check_key(&self.descriptor(state)?, key)?;
        state.write(self.name, self.handle, |tree| tree.erase(key))?;
        Ok(())
    }

    /// Remove one duplicate of a key.
    pub fn erase_duplicate(&self, key: &[u8], position: usize) -> Result<()> {
        self.run("erase", None, |state| {
            check_key(&self.descriptor(state)?, key)?;
            state.write(self.name, self.handle, |tree| {
                tree.erase_duplicate(key, position)
            })?;
            Ok(())
        })
    }

    /// Run a batch of operations under one lock, in order.
    ///
    /// Each step commits on its own and has its own outcome; a failing step
    /// does not stop the ones after it. The call itself only fails when
    /// the handle cannot be used. An `Insert` with an empty key on a record
    /// number database appends.
    pub fn bulk_operations(&self, operations: &[Operation]) -> Result<Vec<Result<Outcome>>> {
        self.bulk_operations_with(None, operations)
    }

    /// [`Database::bulk_operations`] inside a transaction; the steps are
    /// committed with it.
    pub fn bulk_operations_in(
        &self,
        txn: &Transaction,
        operations: &[Operation],
    ) -> Result<Vec<Result<Outcome>>> {
        self.bulk_operations_with(Some(txn), operations)
    }

    fn bulk_operations_with(
        &self,
        txn: Option<&Transaction>,
        operations: &[Operation],
    ) -> Result<Vec<Result<Outcome>>> {
        let outcomes = self.run("bulk_operations", txn, |state| {
            self.descriptor(state)?;
            Ok(operations
                .iter()
                .map(|operation| self.apply_locked(state, operation))
                .collect::<Vec<_>>())
        })?;
        for outcome in &outcomes {
            if let Err(e) = outcome {
                self.shared.report_error("bulk_operations", e);
            }
        }
        Ok(outcomes)
    }

    fn apply_locked(&self, state: &mut EnvState, operation: &Operation) -> Result<Outcome> {
        match operation {
            Operation::Insert { key, record, flags } => {
                let numbered = self.descriptor(state)?.flags.record_number_type().is_some();
                if numbered && key.is_empty() && !flags.contains(InsertFlags::OVERWRITE) {
                    let number = self.append_locked(state, record)?;
                    let width = usize::from(self.descriptor(state)?.key_size);
                    return Ok(Outcome::Inserted(record_number_key(number, width)));
                }
                self.insert_locked(state, key, record, *flags)?;
                Ok(Outcome::Inserted(key.clone()))
            }
            Operation::Find { key, flags } if flags.is_empty() => {
                let record = self.find_locked(state, key, 0)?;
                Ok(Outcome::Found {
                    key: key.clone(),
                    record,
                })
            }
            Operation::Find { key, flags } => {
                let (key, record) = self.find_approx_locked(state, key, *flags)?;
                Ok(Outcome::Found { key, record })
            }
            Operation::Erase { key } => {
                self.erase_locked(state, key)?;
                Ok(Outcome::Erased)
            }
        }
    }

    /// Number of records, counting every duplicate.
    pub fn count(&self) -> Result<u64> {
        self.run("count", None, |state| Ok(self.descriptor(state)?.record_count))
    }

    /// [`Database::count`] inside a transaction, seeing its changes.
    pub fn count_in(&self, txn: &Transaction) -> Result<u64> {
        self.run("count", Some(txn), |state| {
            Ok(self.descriptor(state)?.record_count)
        })
    }

    /// Number of distinct keys.
    pub fn key_count(&self) -> Result<u64> {
        self.run("count", None, |state| Ok(self.descriptor(state)?.key_count))
    }

    /// Number of records stored under `key`, 0 if it is absent.
    pub fn count_key(&self, key: &[u8]) -> Result<usize> {
        self.run("count", None, |state| {
            check_key(&self.descriptor(state)?, key)?;
            state.read(self.name, self.handle, |tree| tree.count_key(key))
        })
    }

    /// The configuration and counters of the database.
    pub fn parameters(&self) -> Result<DatabaseParameters> {
        self.run("get_parameters", None, |state| {
            let descriptor = self.descriptor(state)?;
            let page_size = state.store()?.page_size();
            Ok(DatabaseParameters {
                name: descriptor.name,
                flags: descriptor.flags,
                key_type: descriptor.key_type,
                key_size: descriptor.key_size,
                record_size: descriptor.record_size,
                max_keys_per_page: NodeLimits::new(page_size, descriptor.key_size).max_keys,
                record_count: descriptor.record_count,
            })
        })
    }

    /// Fill in the values of the requested parameters.
    ///
    /// Environment-wide names (`PageSize`, `CacheSize`, `MaxDatabases`)
    /// are answered too.
    pub fn get_parameters(&self, params: &mut [Parameter]) -> Result<()> {
        let current = self.parameters()?;
        self.run("get_parameters", None, |state| {
            let page_size = state.store()?.page_size();
            for param in params.iter_mut() {
                param.value = match param.name {
                    ParamName::KeySize => u64::from(current.key_size),
                    ParamName::KeyType => current.key_type as u64,
                    ParamName::RecordSize => u64::from(current.record_size),
                    ParamName::DatabaseName => u64::from(current.name),
                    ParamName::Flags => u64::from(current.flags.bits()),
                    ParamName::MaxKeysPerPage => current.max_keys_per_page as u64,
                    ParamName::RecordCount => current.record_count,
                    ParamName::PageSize => page_size as u64,
                    ParamName::CacheSize => state.cache_size() as u64,
                    ParamName::MaxDatabases => max_databases(page_size) as u64,
                };
            }
            Ok(())
        })
    }

    /// Install a custom comparator, or restore the key type's default
    /// with `None`.
    ///
    /// Keys already stored are not reordered; set it before inserting.
    pub fn set_comparator(&self, comparator: Option<Comparator>) -> Result<()> {
        self.run("set_comparator", None, |state| {
            state.runtime(self.name, self.handle)?;
            match comparator {
                Some(comparator) => state.comparators().register(self.name, comparator),
                None => {
                    state.comparators().unregister(self.name);
                    Ok(())
                }
            }
        })
    }

    /// Walk the whole tree, verifying ordering, links and counters.
    pub fn check_integrity(&self) -> Result<TreeStats> {
        self.run("check_integrity", None, |state| {
            state.read(self.name, self.handle, |tree| tree.check_integrity())
        })
    }

    /// Open a cursor, positioned on no key.
    pub fn cursor(&self) -> Result<Cursor> {
        self.cursor_with(None)
    }

    /// Open a cursor whose operations run inside `txn`.
    ///
    /// It must be closed before the transaction commits.
    pub fn cursor_in(&self, txn: &Transaction) -> Result<Cursor> {
        self.cursor_with(Some(txn))
    }

    fn cursor_with(&self, txn: Option<&Transaction>) -> Result<Cursor> {
        let id = self.run("cursor", txn, |state| {
            state.register_cursor(self.name, self.handle)
        })?;
        Ok(Cursor::new(
            Arc::clone(&self.shared),
            self.name,
            self.handle,
            id,
            txn.map(Transaction::id),
        ))
    }

    /// Iterate over every record in key order, duplicates included.
    pub fn iter(&self) -> Result<Iter> {
        Ok(Iter::new(self.cursor()?))
    }

    /// [`Database::iter`] inside a transaction.
    pub fn iter_in(&self, txn: &Transaction) -> Result<Iter> {
        Ok(Iter::new(self.cursor_in(txn)?))
    }

    /// Close the handle. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        self.close_with(CloseFlags::empty())
    }

    /// Close the handle, closing open cursors with `AUTO_CLEANUP`.
    pub fn close_with(&self, flags: CloseFlags) -> Result<()> {
        self.run("close", None, |state| {
            state.close_database(self.name, self.handle, flags)
        })
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.close_with(CloseFlags::AUTO_CLEANUP) {
            tracing::warn!(database = self.name, error = %e, "failed to close database on drop");
        }
    }
}
