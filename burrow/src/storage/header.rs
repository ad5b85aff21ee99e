//! Environment header page.
//!
//! Page 0 holds everything needed to interpret the rest of the file: the
//! page size, how many pages exist, where the allocation bitmap starts, the
//! LSN of the last commit, and the directory of databases with their root
//! pages and counters.

// Page sizes and directory slots are bounded far below u32/u16 limits.
#![allow(clippy::cast_possible_truncation)]

use crate::error::{Error, Result};
use crate::params::{DbFlags, KeyType};
use crate::storage::page::{Page, PageHeader, PageId, PageType, is_valid_page_size};

/// Magic number identifying a burrow environment file: "BURROWDB"
pub const MAGIC: [u8; 8] = *b"BURROWDB";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Size of one directory slot.
pub const DESCRIPTOR_SIZE: usize = 48;

/// Header field offsets (after the page header).
mod offsets {
    pub const MAGIC: usize = 16;
    pub const FORMAT_VERSION: usize = 24;
    pub const ENGINE_VERSION: usize = 28;
    pub const PAGE_SIZE: usize = 32;
    pub const ENV_FLAGS: usize = 36;
    pub const PAGE_COUNT: usize = 40;
    pub const BITMAP_HEAD: usize = 48;
    pub const COMMIT_LSN: usize = 56;
    pub const DATABASE_COUNT: usize = 64;
    // 66-79: reserved
    pub const DIRECTORY: usize = 80;
}

/// Descriptor slot field offsets (relative to the slot start).
mod slot {
    pub const NAME: usize = 0;
    pub const KEY_TYPE: usize = 2;
    pub const FLAGS: usize = 4;
    pub const KEY_SIZE: usize = 8;
    pub const RECORD_SIZE: usize = 12;
    pub const ROOT: usize = 16;
    pub const RECORD_COUNT: usize = 24;
    pub const KEY_COUNT: usize = 32;
}

/// Number of bytes that must be read to learn the page size of a file.
pub const PROBE_SIZE: usize = offsets::PAGE_SIZE + 4;

/// How many databases fit in the directory of a header page.
#[must_use]
pub const fn max_databases(page_size: usize) -> usize {
    (page_size - offsets::DIRECTORY) / DESCRIPTOR_SIZE
}

/// Persistent description of one database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbDescriptor {
    /// Database name (1..0xF000).
    pub name: u16,
    /// Logical key type, selects the default comparator.
    pub key_type: KeyType,
    /// Database flags fixed at creation.
    pub flags: DbFlags,
    /// Fixed key size, or `KEY_SIZE_UNLIMITED`.
    pub key_size: u16,
    /// Fixed record size, or `RECORD_SIZE_UNLIMITED`.
    pub record_size: u32,
    /// Root page of the database's B-tree.
    pub root: PageId,
    /// Number of records, counting every duplicate.
    pub record_count: u64,
    /// Number of distinct keys.
    pub key_count: u64,
}

impl DbDescriptor {
    fn write_to(&self, page: &mut Page, at: usize) {
        page.write_u16(at + slot::NAME, self.name);
        page.write_u8(at + slot::KEY_TYPE, self.key_type as u8);
        page.write_u32(at + slot::FLAGS, self.flags.bits());
        page.write_u16(at + slot::KEY_SIZE, self.key_size);
        page.write_u32(at + slot::RECORD_SIZE, self.record_size);
        page.write_u64(at + slot::ROOT, self.root);
        page.write_u64(at + slot::RECORD_COUNT, self.record_count);
        page.write_u64(at + slot::KEY_COUNT, self.key_count);
    }

    fn read_from(page: &Page, at: usize) -> Result<Self> {
        let name = page.read_u16(at + slot::NAME);
        let key_type = KeyType::try_from(page.read_u8(at + slot::KEY_TYPE))
            .map_err(|v| Error::corrupted(format!("database {name}: unknown key type {v}")))?;
        let flags = DbFlags::from_bits(page.read_u32(at + slot::FLAGS))
            .ok_or_else(|| Error::corrupted(format!("database {name}: unknown flags")))?;

        Ok(Self {
            name,
            key_type,
            flags,
            key_size: page.read_u16(at + slot::KEY_SIZE),
            record_size: page.read_u32(at + slot::RECORD_SIZE),
            root: page.read_u64(at + slot::ROOT),
            record_count: page.read_u64(at + slot::RECORD_COUNT),
            key_count: page.read_u64(at + slot::KEY_COUNT),
        })
    }
}

/// The decoded header page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvHeader {
    /// Page size in bytes.
    pub page_size: u32,
    /// Environment flags persisted at creation.
    pub env_flags: u32,
    /// Total number of pages in the file.
    pub page_count: u64,
    /// First page of the allocation bitmap chain (0 if not written yet).
    pub bitmap_head: PageId,
    /// LSN of the last committed changeset.
    pub commit_lsn: u64,
    /// Database directory in creation order.
    pub directory: Vec<DbDescriptor>,
}

impl EnvHeader {
    /// Create a header for a fresh environment containing only page 0.
    #[must_use]
    pub const fn new(page_size: usize, env_flags: u32) -> Self {
        Self {
            page_size: page_size as u32,
            env_flags,
            page_count: 1,
            bitmap_head: 0,
            commit_lsn: 0,
            directory: Vec::new(),
        }
    }

    /// Page size as `usize`.
    #[must_use]
    pub const fn page_size(&self) -> usize {
        self.page_size as usize
    }

    /// Find the descriptor of a database.
    #[must_use]
    pub fn descriptor(&self, name: u16) -> Option<&DbDescriptor> {
        self.directory.iter().find(|d| d.name == name)
    }

    /// Insert or replace the descriptor of a database.
    pub fn put_descriptor(&mut self, descriptor: DbDescriptor) {
        if let Some(existing) = self.directory.iter_mut().find(|d| d.name == descriptor.name) {
            *existing = descriptor;
        } else {
            self.directory.push(descriptor);
        }
    }

    /// Remove the descriptor of a database.
    pub fn remove_descriptor(&mut self, name: u16) -> Option<DbDescriptor> {
        let index = self.directory.iter().position(|d| d.name == name)?;
        Some(self.directory.remove(index))
    }

    /// Serialize the header into a page.
    #[must_use]
    pub fn to_page(&self) -> Page {
        let mut page = Page::formatted(self.page_size(), PageType::Header);

        page.write_bytes(offsets::MAGIC, &MAGIC);
        page.write_u32(offsets::FORMAT_VERSION, FORMAT_VERSION);
        let version = crate::version();
        page.write_bytes(
            offsets::ENGINE_VERSION,
            &[version.major, version.minor, version.revision],
        );
        page.write_u32(offsets::PAGE_SIZE, self.page_size);
        page.write_u32(offsets::ENV_FLAGS, self.env_flags);
        page.write_u64(offsets::PAGE_COUNT, self.page_count);
        page.write_u64(offsets::BITMAP_HEAD, self.bitmap_head);
        page.write_u64(offsets::COMMIT_LSN, self.commit_lsn);
        page.write_u16(offsets::DATABASE_COUNT, self.directory.len() as u16);

        for (i, descriptor) in self.directory.iter().enumerate() {
            descriptor.write_to(&mut page, offsets::DIRECTORY + i * DESCRIPTOR_SIZE);
        }

        page
    }

    /// Deserialize a header from page 0.
    ///
    /// The caller is expected to have verified the page checksum.
    pub fn from_page(page: &Page) -> Result<Self> {
        Self::probe(page.as_bytes())?;

        let page_size = page.read_u32(offsets::PAGE_SIZE);
        if page_size as usize != page.size() {
            return Err(Error::corrupted(format!(
                "header page size {page_size} does not match page length {}",
                page.size()
            )));
        }

        let count = page.read_u16(offsets::DATABASE_COUNT) as usize;
        if count > max_databases(page.size()) {
            return Err(Error::corrupted(format!(
                "directory claims {count} databases"
            )));
        }

        let mut directory = Vec::with_capacity(count);
        for i in 0..count {
            directory.push(DbDescriptor::read_from(
                page,
                offsets::DIRECTORY + i * DESCRIPTOR_SIZE,
            )?);
        }

        Ok(Self {
            page_size,
            env_flags: page.read_u32(offsets::ENV_FLAGS),
            page_count: page.read_u64(offsets::PAGE_COUNT),
            bitmap_head: page.read_u64(offsets::BITMAP_HEAD),
            commit_lsn: page.read_u64(offsets::COMMIT_LSN),
            directory,
        })
    }

    /// Validate the leading bytes of a file and return its page size.
    ///
    /// `bytes` must hold at least `PROBE_SIZE` bytes.
    pub fn probe(bytes: &[u8]) -> Result<usize> {
        if bytes.len() < PROBE_SIZE {
            return Err(Error::InvalidFileHeader);
        }
        let header = PageHeader::from_bytes(bytes).map_err(|_| Error::InvalidFileHeader)?;
        if header.page_type != PageType::Header || bytes[offsets::MAGIC..offsets::MAGIC + 8] != MAGIC
        {
            return Err(Error::InvalidFileHeader);
        }

        let version = u32::from_le_bytes([
            bytes[offsets::FORMAT_VERSION],
            bytes[offsets::FORMAT_VERSION + 1],
            bytes[offsets::FORMAT_VERSION + 2],
            bytes[offsets::FORMAT_VERSION + 3],
        ]);
        if version != FORMAT_VERSION {
            return Err(Error::InvalidFileVersion { found: version });
        }

        let page_size = u32::from_le_bytes([
            bytes[offsets::PAGE_SIZE],
            bytes[offsets::PAGE_SIZE + 1],
            bytes[offsets::PAGE_SIZE + 2],
            bytes[offsets::PAGE_SIZE + 3],
        ]) as usize;
        if !is_valid_page_size(page_size) {
            return Err(Error::corrupted(format!("invalid page size {page_size}")));
        }
        Ok(page_size)
    }
}
