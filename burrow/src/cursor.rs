//! Cursors over one database.
//!
//! A cursor remembers the key it sits on and the duplicate index within
//! that key. Every operation relocates the key in the tree first, so
//! inserts and erases made through other handles in the meantime are
//! absorbed. If the cursor's leaf was split, merged or freed through
//! another handle, the cursor becomes nil and the operation fails with
//! `CursorStale`.
//!
//! Moving past either end fails with `KeyNotFound` and leaves the cursor
//! where it was.
//!
//! A cursor opened inside a transaction runs every operation in it and
//! fails with `NotReady` once the transaction has ended.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::database::{Anchor, check_key, check_record, insert_mode};
use crate::environment::{EnvState, Shared};
use crate::error::{Error, Result};
use crate::params::{FindFlags, InsertFlags};
use crate::storage::btree::{BTree, InsertMode, Neighborhood, Slot};
use crate::storage::page::PageId;

/// Where to move a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorMove {
    /// First duplicate of the smallest key.
    First,
    /// Last duplicate of the largest key.
    Last,
    /// Next duplicate, or the first duplicate of the next key.
    Next,
    /// Previous duplicate, or the last duplicate of the previous key.
    Previous,
    /// First duplicate of the next key.
    NextKey,
    /// First duplicate of the previous key.
    PreviousKey,
}

#[derive(Debug, Clone)]
struct Position {
    leaf: PageId,
    key: Vec<u8>,
    duplicate: usize,
    /// Database epoch when the cursor last landed.
    epoch: u64,
}

#[derive(Debug, Clone, Copy)]
enum Landing {
    First,
    Last,
    At(usize),
}

struct Landed {
    slot: Slot,
    key: Vec<u8>,
    duplicate: usize,
    record: Vec<u8>,
}

/// Read the key at `slot` and the duplicate picked by `landing`.
fn land(tree: &mut BTree<'_>, slot: Slot, landing: Landing) -> Result<Landed> {
    let entry = tree.entry(slot)?;
    let table = tree.records(&entry)?;
    let count = table.size();
    if count == 0 {
        return Err(Error::corrupted("key without records"));
    }
    let duplicate = match landing {
        Landing::First => 0,
        Landing::Last => count - 1,
        Landing::At(position) => position.min(count - 1),
    };
    let record = table.get(duplicate).ok_or(Error::KeyNotFound)?;
    let record = tree.read_record(record)?;
    Ok(Landed {
        slot,
        key: entry.key.bytes,
        duplicate,
        record,
    })
}

fn land_at(tree: &mut BTree<'_>, slot: Option<Slot>, landing: Landing) -> Result<Option<Landed>> {
    slot.map(|slot| land(tree, slot, landing)).transpose()
}

fn duplicate_count(tree: &mut BTree<'_>, slot: Slot) -> Result<usize> {
    let entry = tree.entry(slot)?;
    Ok(tree.records(&entry)?.size())
}

/// Where a move ends, or `None` past the end.
fn step(tree: &mut BTree<'_>, current: Option<&Position>, mv: CursorMove) -> Result<Option<Landed>> {
    let Some(current) = current else {
        return match mv {
            CursorMove::First | CursorMove::Next | CursorMove::NextKey => {
                let slot = tree.first()?;
                land_at(tree, slot, Landing::First)
            }
            CursorMove::Last | CursorMove::Previous => {
                let slot = tree.last()?;
                land_at(tree, slot, Landing::Last)
            }
            CursorMove::PreviousKey => {
                let slot = tree.last()?;
                land_at(tree, slot, Landing::First)
            }
        };
    };

    let near = tree.locate_near(&current.key)?;
    match (mv, near) {
        (CursorMove::First, _) => {
            let slot = tree.first()?;
            land_at(tree, slot, Landing::First)
        }
        (CursorMove::Last, _) => {
            let slot = tree.last()?;
            land_at(tree, slot, Landing::Last)
        }
        (CursorMove::Next, Neighborhood::Found(slot)) => {
            if current.duplicate + 1 < duplicate_count(tree, slot)? {
                land(tree, slot, Landing::At(current.duplicate + 1)).map(Some)
            } else {
                let next = tree.next(slot)?;
                land_at(tree, next, Landing::First)
            }
        }
        (CursorMove::NextKey, Neighborhood::Found(slot)) => {
            let next = tree.next(slot)?;
            land_at(tree, next, Landing::First)
        }
        (CursorMove::Previous, Neighborhood::Found(slot)) => {
            if current.duplicate > 0 {
                land(tree, slot, Landing::At(current.duplicate - 1)).map(Some)
            } else {
                let previous = tree.previous(slot)?;
                land_at(tree, previous, Landing::Last)
            }
        }
        (CursorMove::PreviousKey, Neighborhood::Found(slot)) => {
            let previous = tree.previous(slot)?;
            land_at(tree, previous, Landing::First)
        }
        // The cursor's key was erased through another handle.
        (CursorMove::Next | CursorMove::NextKey, Neighborhood::Between(_, after)) => {
            land_at(tree, after, Landing::First)
        }
        (CursorMove::Previous, Neighborhood::Between(before, _)) => {
            land_at(tree, before, Landing::Last)
        }
        (CursorMove::PreviousKey, Neighborhood::Between(before, _)) => {
            land_at(tree, before, Landing::First)
        }
    }
}

/// A cursor over one database.
pub struct Cursor {
    shared: Arc<Shared>,
    db: u16,
    handle: u64,
    id: u64,
    /// Transaction its operations run in.
    txn: Option<u64>,
    position: Option<Position>,
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("database", &self.db)
            .field("id", &self.id)
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

impl Cursor {
    pub(crate) const fn new(
        shared: Arc<Shared>,
        db: u16,
        handle: u64,
        id: u64,
        txn: Option<u64>,
    ) -> Self {
        Self {
            shared,
            db,
            handle,
            id,
            txn,
            position: None,
        }
    }

    /// Returns true if the cursor is not positioned on a key.
    #[must_use]
    pub const fn is_nil(&self) -> bool {
        self.position.is_none()
    }

    /// Move the cursor and return the key and record it lands on.
    pub fn move_to(&mut self, mv: CursorMove) -> Result<(Vec<u8>, Vec<u8>)> {
        let (db, handle, id) = (self.db, self.handle, self.id);
        let position = &mut self.position;
        self.shared.run_in("cursor_move", self.txn, |state| {
            state.cursor_alive(db, handle, id)?;
            let current = fresh(state, db, handle, position)?;
            let epoch = state.epoch(db, handle)?;
            let landed = state
                .read(db, handle, |tree| step(tree, current.as_ref(), mv))?
                .ok_or(Error::KeyNotFound)?;
            Ok(settle(position, landed, epoch))
        })
    }

    /// The key and record under the cursor.
    ///
    /// If the key or the cursor's duplicate was erased through another
    /// handle the cursor becomes nil.
    pub fn current(&mut self) -> Result<(Vec<u8>, Vec<u8>)> {
        let (db, handle, id) = (self.db, self.handle, self.id);
        let position = &mut self.position;
        self.shared.run_in("cursor_current", self.txn, |state| {
            state.cursor_alive(db, handle, id)?;
            let current = fresh(state, db, handle, position)?.ok_or(Error::CursorIsNil)?;
            let epoch = state.epoch(db, handle)?;
            let landed = state.read(db, handle, |tree| match tree.locate(&current.key)? {
                Some(slot) if current.duplicate < duplicate_count(tree, slot)? => {
                    land(tree, slot, Landing::At(current.duplicate)).map(Some)
                }
                _ => Ok(None),
            })?;
            match landed {
                Some(landed) => Ok(settle(position, landed, epoch)),
                None => {
                    *position = None;
                    Err(Error::CursorIsNil)
                }
            }
        })
    }

    /// Position the cursor on the first duplicate of `key` and return its record.
    ///
    /// On `KeyNotFound` the cursor keeps its position.
    pub fn find(&mut self, key: &[u8]) -> Result<Vec<u8>> {
        let (db, handle, id) = (self.db, self.handle, self.id);
        let position = &mut self.position;
        self.shared.run_in("cursor_find", self.txn, |state| {
            state.cursor_alive(db, handle, id)?;
            check_key(&state.descriptor(db)?, key)?;
            let epoch = state.epoch(db, handle)?;
            let landed = state
                .read(db, handle, |tree| {
                    let slot = tree.locate(key)?;
                    land_at(tree, slot, Landing::First)
                })?
                .ok_or(Error::KeyNotFound)?;
            Ok(settle(position, landed, epoch).1)
        })
    }

    /// Position the cursor on the nearest key allowed by `flags`.
    pub fn find_approx(&mut self, key: &[u8], flags: FindFlags) -> Result<(Vec<u8>, Vec<u8>)> {
        let (db, handle, id) = (self.db, self.handle, self.id);
        let position = &mut self.position;
        self.shared.run_in("cursor_find", self.txn, |state| {
            state.cursor_alive(db, handle, id)?;
            let flags = FindFlags::from_bits(flags.bits()).ok_or_else(|| {
                Error::invalid_parameter(format!("unknown find flags {flags:?}"))
            })?;
            check_key(&state.descriptor(db)?, key)?;
            let epoch = state.epoch(db, handle)?;
            let landed = state
                .read(db, handle, |tree| {
                    let slot = tree.find_approx(key, flags)?.map(|(slot, _)| slot);
                    land_at(tree, slot, Landing::First)
                })?
                .ok_or(Error::KeyNotFound)?;
            Ok(settle(position, landed, epoch))
        })
    }

    /// Insert a record and position the cursor on it.
    ///
    /// `DUPLICATE_INSERT_BEFORE` and `DUPLICATE_INSERT_AFTER` are relative
    /// to the cursor's duplicate when it sits on `key`; otherwise they act
    /// like `DUPLICATE_INSERT_FIRST` and `DUPLICATE_INSERT_LAST`.
    pub fn insert(&mut self, key: &[u8], record: &[u8], flags: InsertFlags) -> Result<()> {
        let (db, handle, id) = (self.db, self.handle, self.id);
        let position = &mut self.position;
        self.shared.run_in("cursor_insert", self.txn, |state| {
            state.cursor_alive(db, handle, id)?;
            let descriptor = state.descriptor(db)?;
            check_key(&descriptor, key)?;
            check_record(&descriptor, record)?;

            let current = match fresh(state, db, handle, position) {
                Ok(current) => current,
                Err(Error::CursorStale) => None,
                Err(e) => return Err(e),
            };
            let anchor = match current {
                Some(current) if state.comparators().compare(db, &current.key, key)? == Ordering::Equal => {
                    Anchor::Duplicate(current.duplicate)
                }
                _ => Anchor::Elsewhere,
            };
            let mode = insert_mode(&descriptor, flags, anchor)?;
            let outcome = state.write(db, handle, |tree| tree.insert(key, record, mode))?;
            reland(state, db, handle, position, key, outcome.duplicate)?;
            Ok(())
        })
    }

    /// Replace the record under the cursor.
    pub fn overwrite(&mut self, record: &[u8]) -> Result<()> {
        let (db, handle, id) = (self.db, self.handle, self.id);
        let position = &mut self.position;
        self.shared.run_in("cursor_overwrite", self.txn, |state| {
            state.cursor_alive(db, handle, id)?;
            let current = fresh(state, db, handle, position)?.ok_or(Error::CursorIsNil)?;
            check_record(&state.descriptor(db)?, record)?;
            if state.read(db, handle, |tree| tree.locate(&current.key))?.is_none() {
                return Err(Error::KeyNotFound);
            }
            let mode = InsertMode::Overwrite(current.duplicate);
            let outcome = state.write(db, handle, |tree| tree.insert(&current.key, record, mode))?;
            reland(state, db, handle, position, &current.key, outcome.duplicate)?;
            Ok(())
        })
    }

    /// Erase the record under the cursor. The cursor becomes nil.
    pub fn erase(&mut self) -> Result<()> {
        let (db, handle, id) = (self.db, self.handle, self.id);
        let position = &mut self.position;
        self.shared.run_in("cursor_erase", self.txn, |state| {
            state.cursor_alive(db, handle, id)?;
            let current = fresh(state, db, handle, position)?.ok_or(Error::CursorIsNil)?;
            state.write(db, handle, |tree| {
                tree.erase_duplicate(&current.key, current.duplicate)
            })?;
            *position = None;
            Ok(())
        })
    }

    /// Number of duplicates of the key under the cursor.
    pub fn duplicate_count(&mut self) -> Result<usize> {
        let (db, handle, id) = (self.db, self.handle, self.id);
        let position = &mut self.position;
        self.shared.run_in("cursor_duplicate_count", self.txn, |state| {
            state.cursor_alive(db, handle, id)?;
            let current = fresh(state, db, handle, position)?.ok_or(Error::CursorIsNil)?;
            state.read(db, handle, |tree| tree.count_key(&current.key))
        })
    }

    /// Index of the duplicate under the cursor.
    pub fn duplicate_position(&self) -> Result<usize> {
        self.position
            .as_ref()
            .map(|position| position.duplicate)
            .ok_or(Error::CursorIsNil)
    }

    /// A second cursor at the same position.
    pub fn try_clone(&self) -> Result<Self> {
        let id = self.shared.run_in("cursor_clone", self.txn, |state| {
            state.cursor_alive(self.db, self.handle, self.id)?;
            state.register_cursor(self.db, self.handle)
        })?;
        Ok(Self {
            shared: Arc::clone(&self.shared),
            db: self.db,
            handle: self.handle,
            id,
            txn: self.txn,
            position: self.position.clone(),
        })
    }

    /// Close the cursor. Later operations fail with `NotReady`.
    pub fn close(&mut self) {
        self.position = None;
        self.shared
            .lock()
            .unregister_cursor(self.db, self.handle, self.id);
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        self.close();
    }
}

/// The cursor's position, unless its leaf was restructured since it landed.
fn fresh(
    state: &mut EnvState,
    db: u16,
    handle: u64,
    position: &mut Option<Position>,
) -> Result<Option<Position>> {
    let Some(current) = position.as_ref() else {
        return Ok(None);
    };
    if let Err(e) = state.check_fresh(db, handle, current.leaf, current.epoch) {
        *position = None;
        return Err(e);
    }
    Ok(position.clone())
}

fn settle(position: &mut Option<Position>, landed: Landed, epoch: u64) -> (Vec<u8>, Vec<u8>) {
    *position = Some(Position {
        leaf: landed.slot.leaf,
        key: landed.key.clone(),
        duplicate: landed.duplicate,
        epoch,
    });
    (landed.key, landed.record)
}

/// Position the cursor on a key just written.
fn reland(
    state: &mut EnvState,
    db: u16,
    handle: u64,
    position: &mut Option<Position>,
    key: &[u8],
    duplicate: usize,
) -> Result<()> {
    let epoch = state.epoch(db, handle)?;
    let slot = state
        .read(db, handle, |tree| tree.locate(key))?
        .ok_or_else(|| Error::corrupted("inserted key not found"))?;
    *position = Some(Position {
        leaf: slot.leaf,
        key: key.to_vec(),
        duplicate,
        epoch,
    });
    Ok(())
}

/// Iterator over every record of a database, in key order.
///
/// Duplicates are yielded in their stored order. Items are read lazily;
/// [`Iter::restart`] rewinds to the first key.
#[derive(Debug)]
pub struct Iter {
    cursor: Cursor,
    started: bool,
    done: bool,
}

impl Iter {
    pub(crate) const fn new(cursor: Cursor) -> Self {
        Self {
            cursor,
            started: false,
            done: false,
        }
    }

    /// Start again from the smallest key.
    pub const fn restart(&mut self) {
        self.started = false;
        self.done = false;
    }
}

impl Iterator for Iter {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mv = if self.started {
            CursorMove::Next
        } else {
            CursorMove::First
        };
        self.started = true;
        match self.cursor.move_to(mv) {
            Ok(item) => Some(Ok(item)),
            Err(Error::KeyNotFound) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
