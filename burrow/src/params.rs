//! Flags, key types and the parameter model.

use bitflags::bitflags;

/// Key size sentinel: keys may have any length.
pub const KEY_SIZE_UNLIMITED: u16 = 0xFFFF;

/// Record size sentinel: records may have any length.
pub const RECORD_SIZE_UNLIMITED: u32 = u32::MAX;

/// Bytes assumed per key when computing MAX_KEYS_PER_PAGE for unlimited keys.
pub const UNLIMITED_KEY_ESTIMATE: usize = 24;

/// Per-entry overhead assumed when computing MAX_KEYS_PER_PAGE.
pub const ENTRY_OVERHEAD: usize = 13;

/// Lowest database name reserved for internal use.
pub const RESERVED_DATABASE_NAMES: u16 = 0xF000;

// Environment flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EnvFlags: u32 {
        /// Keep the environment in memory; nothing touches the disk.
        const IN_MEMORY = 0x0000_0080;
        /// Refuse every write.
        const READ_ONLY = 0x0000_0004;
        /// Turn syncs into real `fsync` calls.
        const ENABLE_FSYNC = 0x0000_0001;
        /// Write pages in place without the redo journal.
        const DISABLE_JOURNAL = 0x0000_4000;
        /// Allow [`Environment::begin`](crate::Environment::begin).
        const ENABLE_TRANSACTIONS = 0x0002_0000;
    }
}

// Database flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DbFlags: u32 {
        /// Allow several records per key.
        const ENABLE_DUPLICATE_KEYS = 0x0000_4000;
        /// Keep duplicates ordered by record bytes instead of insertion order.
        const SORT_DUPLICATES = 0x0010_0000;
        /// Keys are 32-bit record numbers assigned on append.
        const RECORD_NUMBER32 = 0x0000_1000;
        /// Keys are 64-bit record numbers assigned on append.
        const RECORD_NUMBER64 = 0x0000_2000;
    }
}

impl DbFlags {
    /// Key type of a record number database.
    #[must_use]
    pub const fn record_number_type(self) -> Option<KeyType> {
        if self.contains(Self::RECORD_NUMBER64) {
            Some(KeyType::UInt64)
        } else if self.contains(Self::RECORD_NUMBER32) {
            Some(KeyType::UInt32)
        } else {
            None
        }
    }
}

// Insert flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InsertFlags: u32 {
        /// Replace the record of an existing key.
        const OVERWRITE = 0x0001;
        /// Add a duplicate to an existing key.
        const DUPLICATE = 0x0002;
        /// Insert the duplicate before the cursor's duplicate.
        const DUPLICATE_INSERT_BEFORE = 0x0004;
        /// Insert the duplicate after the cursor's duplicate.
        const DUPLICATE_INSERT_AFTER = 0x0008;
        /// Insert the duplicate first.
        const DUPLICATE_INSERT_FIRST = 0x0010;
        /// Insert the duplicate last (the default).
        const DUPLICATE_INSERT_LAST = 0x0020;
    }
}

// Approximate find flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FindFlags: u32 {
        /// Accept an exact match.
        const EXACT = 0x0001;
        /// Accept the nearest smaller key.
        const LESS_THAN = 0x0002;
        /// Accept the nearest greater key.
        const GREATER_THAN = 0x0004;
    }
}

// Transaction flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TxnFlags: u32 {
        /// Writes inside the transaction fail with `WriteProtected`.
        const READ_ONLY = 0x0001;
    }
}

// Close flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CloseFlags: u32 {
        /// Close open cursors instead of refusing to close.
        const AUTO_CLEANUP = 0x0001;
    }
}

/// Logical key type of a database.
///
/// Numeric types are stored little-endian and compared by value. `Custom`
/// requires a comparator to be installed before the first operation that
/// compares keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum KeyType {
    #[default]
    Binary = 0,
    Custom = 1,
    UInt8 = 3,
    UInt16 = 5,
    UInt32 = 7,
    UInt64 = 9,
    Real32 = 11,
    Real64 = 12,
}

impl KeyType {
    /// The fixed width of numeric key types.
    #[must_use]
    pub const fn fixed_size(self) -> Option<u16> {
        match self {
            Self::Binary | Self::Custom => None,
            Self::UInt8 => Some(1),
            Self::UInt16 => Some(2),
            Self::UInt32 | Self::Real32 => Some(4),
            Self::UInt64 | Self::Real64 => Some(8),
        }
    }
}

impl TryFrom<u8> for KeyType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Binary),
            1 => Ok(Self::Custom),
            3 => Ok(Self::UInt8),
            5 => Ok(Self::UInt16),
            7 => Ok(Self::UInt32),
            9 => Ok(Self::UInt64),
            11 => Ok(Self::Real32),
            12 => Ok(Self::Real64),
            _ => Err(value),
        }
    }
}

/// Parameter identifiers accepted at creation and reported by queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamName {
    /// Fixed key size, or `KEY_SIZE_UNLIMITED`.
    KeySize,
    /// A [`KeyType`] discriminant.
    KeyType,
    /// Fixed record size, or `RECORD_SIZE_UNLIMITED`.
    RecordSize,
    /// The database name.
    DatabaseName,
    /// Database or environment flag bits.
    Flags,
    /// Derived from the page size and key size (read-only).
    MaxKeysPerPage,
    /// Number of records (read-only).
    RecordCount,
    /// Environment page size (read-only).
    PageSize,
    /// Environment cache size (read-only).
    CacheSize,
    /// Capacity of the database directory (read-only).
    MaxDatabases,
}

/// A (name, value) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parameter {
    pub name: ParamName,
    pub value: u64,
}

impl Parameter {
    /// A parameter carrying a value.
    #[must_use]
    pub const fn new(name: ParamName, value: u64) -> Self {
        Self { name, value }
    }

    /// A parameter to be filled in by a query.
    #[must_use]
    pub const fn query(name: ParamName) -> Self {
        Self { name, value: 0 }
    }
}

/// The negotiated configuration of a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseParameters {
    pub name: u16,
    pub flags: DbFlags,
    pub key_type: KeyType,
    pub key_size: u16,
    pub record_size: u32,
    pub max_keys_per_page: usize,
    pub record_count: u64,
}

/// The configuration of an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvironmentParameters {
    pub page_size: usize,
    pub cache_size: usize,
    pub max_databases: usize,
    pub flags: EnvFlags,
}
