//! Duplicate records of a single key.
//!
//! A key with one record stores it directly in its leaf entry. Once a second
//! record arrives the entry holds a [`DuplicateSet`]: small sets are packed
//! into the entry, larger ones move to a duplicate table in an overflow
//! chain. Appends extend the chain in place; any other change rewrites the
//! table, which falls back to the inline form (or a plain record) as soon
//! as it shrinks enough.

use crate::error::{Error, Result};
use crate::storage::btree::node::{
    ByteReader, DuplicateSet, EntryValue, MAX_INLINE_DUPLICATES, NodeLimits, RecordRef,
};
use crate::storage::overflow::{BlobRef, append_blob, free_blob, read_blob, write_blob};
use crate::storage::store::PageStore;

/// The ordered records of one key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DuplicateTable {
    records: Vec<RecordRef>,
    /// Leading records that are still stored, unchanged, in the loaded table.
    stored: usize,
}

impl DuplicateTable {
    /// Load the records held by a leaf entry value.
    pub fn load(store: &mut PageStore, value: &EntryValue) -> Result<Self> {
        let mut stored = 0;
        let records = match value {
            EntryValue::Record(record) => vec![record.clone()],
            EntryValue::Duplicates(DuplicateSet::Inline(records)) => records.clone(),
            EntryValue::Duplicates(DuplicateSet::Table { blob, count }) => {
                let bytes = read_blob(store, *blob)?;
                let mut reader = ByteReader::new(&bytes);
                let mut records = Vec::with_capacity(*count as usize);
                while !reader.is_at_end() {
                    records.push(RecordRef::decode(&mut reader)?);
                }
                if records.len() != *count as usize {
                    return Err(Error::corrupted(format!(
                        "duplicate table holds {} records, entry says {count}",
                        records.len()
                    )));
                }
                stored = records.len();
                records
            }
            EntryValue::Child(_) => {
                return Err(Error::corrupted("child pointer in a leaf entry"));
            }
        };
        Ok(Self { records, stored })
    }

    /// Number of records.
    #[must_use]
    pub fn size(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn get(&self, position: usize) -> Option<&RecordRef> {
        self.records.get(position)
    }

    pub fn append(&mut self, record: RecordRef) -> usize {
        self.records.push(record);
        self.records.len() - 1
    }

    /// Insert at `position`, shifting later records back.
    pub fn insert_at(&mut self, position: usize, record: RecordRef) -> Result<usize> {
        if position > self.records.len() {
            return Err(Error::KeyNotFound);
        }
        self.records.insert(position, record);
        self.stored = self.stored.min(position);
        Ok(position)
    }

    /// Insert after every record whose bytes are `<=` `bytes`.
    pub fn insert_sorted(
        &mut self,
        store: &mut PageStore,
        record: RecordRef,
        bytes: &[u8],
    ) -> Result<usize> {
        let (mut low, mut high) = (0, self.records.len());
        while low < high {
            let mid = low + (high - low) / 2;
            if load_record(store, &self.records[mid])?.as_slice() <= bytes {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        self.records.insert(low, record);
        self.stored = self.stored.min(low);
        Ok(low)
    }

    /// Remove the record at `position`.
    pub fn remove_at(&mut self, position: usize) -> Result<RecordRef> {
        if position >= self.records.len() {
            return Err(Error::KeyNotFound);
        }
        self.stored = self.stored.min(position);
        Ok(self.records.remove(position))
    }

    /// Replace the record at `position`, returning the old one.
    pub fn replace_at(&mut self, position: usize, record: RecordRef) -> Result<RecordRef> {
        let slot = self.records.get_mut(position).ok_or(Error::KeyNotFound)?;
        self.stored = self.stored.min(position);
        Ok(std::mem::replace(slot, record))
    }

    /// Write the records back, releasing the table that held them before.
    ///
    /// Returns `None` when no record is left.
    pub fn store(
        self,
        store: &mut PageStore,
        previous: &EntryValue,
        limits: &NodeLimits,
    ) -> Result<Option<EntryValue>> {
        if let EntryValue::Duplicates(DuplicateSet::Table { blob, count }) = previous {
            if self.stored == *count as usize && self.records.len() > self.stored {
                return self.append_to(store, *blob).map(Some);
            }
            free_blob(store, *blob)?;
        }

        let mut records = self.records;
        match records.len() {
            0 => Ok(None),
            1 => Ok(records.pop().map(EntryValue::Record)),
            count => {
                let encoded: usize = records.iter().map(RecordRef::encoded_size).sum();
                if count <= MAX_INLINE_DUPLICATES && encoded <= limits.max_inline_record {
                    return Ok(Some(EntryValue::Duplicates(DuplicateSet::Inline(records))));
                }

                let mut bytes = Vec::with_capacity(encoded);
                for record in &records {
                    record.encode(&mut bytes);
                }
                let blob = write_blob(store, &bytes)?;
                let count = u32::try_from(count)
                    .map_err(|_| Error::LimitsReached("too many duplicates".to_string()))?;
                Ok(Some(EntryValue::Duplicates(DuplicateSet::Table {
                    blob,
                    count,
                })))
            }
        }
    }

    /// Encode the records added after the stored ones onto the end of `blob`.
    fn append_to(self, store: &mut PageStore, blob: BlobRef) -> Result<EntryValue> {
        let mut bytes = Vec::new();
        for record in &self.records[self.stored..] {
            record.encode(&mut bytes);
        }
        let blob = append_blob(store, blob, &bytes)?;
        let count = u32::try_from(self.records.len())
            .map_err(|_| Error::LimitsReached("too many duplicates".to_string()))?;
        Ok(EntryValue::Duplicates(DuplicateSet::Table { blob, count }))
    }

    /// Free every record blob and the table itself.
    pub fn free_all(store: &mut PageStore, value: &EntryValue) -> Result<()> {
        let table = Self::load(store, value)?;
        for record in &table.records {
            free_record(store, record)?;
        }
        if let EntryValue::Duplicates(DuplicateSet::Table { blob, .. }) = value {
            free_blob(store, *blob)?;
        }
        Ok(())
    }
}

/// Store a record inline or in an overflow chain, depending on its size.
pub fn store_record(
    store: &mut PageStore,
    record: &[u8],
    limits: &NodeLimits,
) -> Result<RecordRef> {
    if record.len() <= limits.max_inline_record {
        Ok(RecordRef::Inline(record.to_vec()))
    } else {
        Ok(RecordRef::Blob(write_blob(store, record)?))
    }
}

/// Read the bytes of a record.
pub fn load_record(store: &mut PageStore, record: &RecordRef) -> Result<Vec<u8>> {
    match record {
        RecordRef::Inline(bytes) => Ok(bytes.clone()),
        RecordRef::Blob(blob) => read_blob(store, *blob),
    }
}

/// Release the overflow chain of a record, if it has one.
pub fn free_record(store: &mut PageStore, record: &RecordRef) -> Result<()> {
    if let RecordRef::Blob(blob) = record {
        free_blob(store, *blob)?;
    }
    Ok(())
}
