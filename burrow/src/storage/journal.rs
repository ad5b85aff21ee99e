//! Redo journal for atomic commits.
//!
//! Before a changeset is written into the environment file, every page image
//! it contains is appended to the journal and the journal is synced. Once
//! the pages are in place the journal is truncated. On open, a journal that
//! still holds a complete changeset means the previous process stopped
//! between those two points, and the images are replayed.
//!
//! # Record Format
//!
//! ```text
//! +----------+--------------------------------------------------+
//! | 0-3      | record_length (4 bytes, includes header+payload) |
//! | 4        | record_type (1 byte)                             |
//! | 5-12     | lsn (8 bytes) - commit the record belongs to     |
//! | 13-N     | payload (variable, depends on type)              |
//! | N-N+3    | CRC32 checksum (4 bytes)                         |
//! +----------+--------------------------------------------------+
//! ```
//!
//! A changeset is `Begin`, one `PageImage` per page, then `Commit` carrying
//! the number of images. Anything after the last `Commit` is a torn tail.

// record_length fits in u32
#![allow(clippy::cast_possible_truncation)]

use crate::storage::io::{Storage, offset_to_index};
use crate::storage::page::{Page, PageId};

/// Log record header size (before payload).
/// `record_length` (4) + `record_type` (1) + lsn (8) = 13 bytes
const RECORD_HEADER_SIZE: usize = 13;

/// CRC32 checksum size at end of record.
const CHECKSUM_SIZE: usize = 4;

/// Log Sequence Number, one per committed changeset.
pub type Lsn = u64;

/// Journal record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Changeset begin marker.
    Begin = 0x01,
    /// Full image of one page.
    PageImage = 0x02,
    /// Changeset commit marker.
    Commit = 0x03,
}

impl TryFrom<u8> for RecordType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Begin),
            0x02 => Ok(Self::PageImage),
            0x03 => Ok(Self::Commit),
            _ => Err(value),
        }
    }
}

/// A decoded journal record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalRecord {
    Begin { lsn: Lsn },
    PageImage { lsn: Lsn, page_id: PageId, page: Page },
    Commit { lsn: Lsn, page_count: u32 },
}

impl JournalRecord {
    const fn record_type(&self) -> RecordType {
        match self {
            Self::Begin { .. } => RecordType::Begin,
            Self::PageImage { .. } => RecordType::PageImage,
            Self::Commit { .. } => RecordType::Commit,
        }
    }

    const fn lsn(&self) -> Lsn {
        match self {
            Self::Begin { lsn } | Self::PageImage { lsn, .. } | Self::Commit { lsn, .. } => *lsn,
        }
    }

    /// Serialize this record to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let payload_len = match self {
            Self::Begin { .. } => 0,
            Self::PageImage { page, .. } => 8 + page.size(),
            Self::Commit { .. } => 4,
        };
        let total_len = RECORD_HEADER_SIZE + payload_len + CHECKSUM_SIZE;

        let mut bytes = Vec::with_capacity(total_len);
        bytes.extend_from_slice(&(total_len as u32).to_le_bytes());
        bytes.push(self.record_type() as u8);
        bytes.extend_from_slice(&self.lsn().to_le_bytes());

        match self {
            Self::Begin { .. } => {}
            Self::PageImage { page_id, page, .. } => {
                bytes.extend_from_slice(&page_id.to_le_bytes());
                bytes.extend_from_slice(page.as_bytes());
            }
            Self::Commit { page_count, .. } => {
                bytes.extend_from_slice(&page_count.to_le_bytes());
            }
        }

        // CRC32 checksum, computed over everything before it
        let checksum = crc32fast::hash(&bytes);
        bytes.extend_from_slice(&checksum.to_le_bytes());
        bytes
    }

    /// Deserialize a record from bytes.
    ///
    /// Returns the record and the number of bytes consumed.
    pub fn from_bytes(bytes: &[u8]) -> Result<(Self, usize), JournalError> {
        if bytes.len() < RECORD_HEADER_SIZE + CHECKSUM_SIZE {
            return Err(JournalError::CorruptRecord);
        }

        let record_len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        if record_len < RECORD_HEADER_SIZE + CHECKSUM_SIZE || record_len > bytes.len() {
            return Err(JournalError::CorruptRecord);
        }

        let stored_checksum = u32::from_le_bytes([
            bytes[record_len - 4],
            bytes[record_len - 3],
            bytes[record_len - 2],
            bytes[record_len - 1],
        ]);
        let computed_checksum = crc32fast::hash(&bytes[..record_len - CHECKSUM_SIZE]);
        if stored_checksum != computed_checksum {
            return Err(JournalError::ChecksumMismatch {
                expected: stored_checksum,
                actual: computed_checksum,
            });
        }

        let record_type =
            RecordType::try_from(bytes[4]).map_err(JournalError::InvalidRecordType)?;
        let mut lsn = [0u8; 8];
        lsn.copy_from_slice(&bytes[5..13]);
        let lsn = u64::from_le_bytes(lsn);

        let payload = &bytes[RECORD_HEADER_SIZE..record_len - CHECKSUM_SIZE];
        let record = match record_type {
            RecordType::Begin => Self::Begin { lsn },
            RecordType::PageImage => {
                if payload.len() < 8 {
                    return Err(JournalError::CorruptRecord);
                }
                let mut page_id = [0u8; 8];
                page_id.copy_from_slice(&payload[..8]);
                Self::PageImage {
                    lsn,
                    page_id: u64::from_le_bytes(page_id),
                    page: Page::from_vec(payload[8..].to_vec()),
                }
            }
            RecordType::Commit => {
                if payload.len() != 4 {
                    return Err(JournalError::CorruptRecord);
                }
                Self::Commit {
                    lsn,
                    page_count: u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]),
                }
            }
        };

        Ok((record, record_len))
    }
}

/// A changeset read back from the journal.
#[derive(Debug)]
pub struct Changeset {
    pub lsn: Lsn,
    pub pages: Vec<(PageId, Page)>,
}

/// Result of scanning the journal.
#[derive(Debug, Default)]
pub struct JournalScan {
    /// Complete changesets in the order they were written.
    pub changesets: Vec<Changeset>,
    /// Bytes after the last complete changeset that were ignored.
    pub torn_bytes: u64,
}

/// The redo journal.
pub struct Journal {
    storage: Box<dyn Storage>,
    /// Current append position.
    head: u64,
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("head", &self.head)
            .finish_non_exhaustive()
    }
}

impl Journal {
    /// Wrap a storage. Appends start at the current end of the storage.
    pub fn new(mut storage: Box<dyn Storage>) -> Result<Self, JournalError> {
        let head = storage.size()?;
        Ok(Self { storage, head })
    }

    /// Returns true if nothing has been appended since the last clear.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.head == 0
    }

    /// Append one record.
    pub fn append(&mut self, record: &JournalRecord) -> Result<(), JournalError> {
        let bytes = record.to_bytes();
        self.storage.write_at(self.head, &bytes)?;
        self.head += bytes.len() as u64;
        Ok(())
    }

    /// Append a complete changeset and make it durable.
    pub fn write_changeset<'a>(
        &mut self,
        lsn: Lsn,
        pages: impl ExactSizeIterator<Item = (PageId, &'a Page)>,
    ) -> Result<(), JournalError> {
        let page_count = pages.len() as u32;
        self.append(&JournalRecord::Begin { lsn })?;
        for (page_id, page) in pages {
            self.append(&JournalRecord::PageImage {
                lsn,
                page_id,
                page: page.clone(),
            })?;
        }
        self.append(&JournalRecord::Commit { lsn, page_count })?;
        self.sync()
    }

    /// Sync the journal to its backing storage.
    pub fn sync(&mut self) -> Result<(), JournalError> {
        self.storage.sync()?;
        Ok(())
    }

    /// Drop every record.
    pub fn clear(&mut self) -> Result<(), JournalError> {
        self.storage.set_len(0)?;
        self.storage.sync()?;
        self.head = 0;
        Ok(())
    }

    /// Read every complete changeset.
    ///
    /// Reading stops at the first record that is truncated, fails its
    /// checksum, or breaks the `Begin`/`PageImage`/`Commit` sequence.
    pub fn scan(&mut self) -> Result<JournalScan, JournalError> {
        let len = offset_to_index(self.storage.size()?)?;
        let mut buf = Vec::new();
        buf.try_reserve_exact(len)
            .map_err(|_| std::io::Error::from(std::io::ErrorKind::OutOfMemory))?;
        buf.resize(len, 0);
        self.storage.read_at(0, &mut buf)?;

        let mut scan = JournalScan::default();
        let mut offset = 0usize;
        let mut committed_end = 0usize;
        let mut pending: Option<Changeset> = None;

        while offset < buf.len() {
            let Ok((record, consumed)) = JournalRecord::from_bytes(&buf[offset..]) else {
                break;
            };
            offset += consumed;

            match record {
                JournalRecord::Begin { lsn } if pending.is_none() => {
                    pending = Some(Changeset {
                        lsn,
                        pages: Vec::new(),
                    });
                }
                JournalRecord::PageImage { lsn, page_id, page } => match pending.as_mut() {
                    Some(open) if open.lsn == lsn => open.pages.push((page_id, page)),
                    _ => break,
                },
                JournalRecord::Commit { lsn, page_count } => match pending.take() {
                    Some(open) if open.lsn == lsn && page_count as usize == open.pages.len() => {
                        scan.changesets.push(open);
                        committed_end = offset;
                    }
                    _ => break,
                },
                JournalRecord::Begin { .. } => break,
            }
        }

        scan.torn_bytes = (buf.len() - committed_end) as u64;
        Ok(scan)
    }
}

/// Errors that can occur during journal operations.
#[derive(Debug)]
pub enum JournalError {
    /// I/O error.
    Io(std::io::Error),
    /// Corrupt journal record.
    CorruptRecord,
    /// Invalid record type byte.
    InvalidRecordType(u8),
    /// Checksum mismatch.
    ChecksumMismatch { expected: u32, actual: u32 },
}

impl std::fmt::Display for JournalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "journal I/O error: {e}"),
            Self::CorruptRecord => write!(f, "corrupt journal record"),
            Self::InvalidRecordType(t) => write!(f, "invalid journal record type: 0x{t:02x}"),
            Self::ChecksumMismatch { expected, actual } => {
                write!(
                    f,
                    "journal checksum mismatch: expected 0x{expected:08x}, got 0x{actual:08x}"
                )
            }
        }
    }
}

impl std::error::Error for JournalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for JournalError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
