//! Error taxonomy and stable error codes.
//!
//! Every fallible public operation returns [`Error`]. Each variant maps to an
//! [`ErrorCode`] whose numeric value is part of the public contract, so a
//! binding layer can translate failures without matching on Rust types.

use std::path::PathBuf;

use crate::config::ConfigError;
use crate::storage::PageError;
use crate::storage::journal::JournalError;

/// Convenience alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Stable numeric error codes.
///
/// The values never change between releases. `0` is reserved for success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    InvalidRecordSize = -2,
    InvalidKeySize = -3,
    InvalidPageSize = -4,
    OutOfMemory = -6,
    InvalidParameter = -8,
    InvalidFileHeader = -9,
    InvalidFileVersion = -10,
    KeyNotFound = -11,
    DuplicateKey = -12,
    DatabaseCorrupted = -13,
    WriteProtected = -15,
    IoError = -18,
    FileNotFound = -21,
    NotReady = -23,
    LimitsReached = -24,
    OutOfDisk = -25,
    NeedRecovery = -28,
    CursorStillOpen = -29,
    TxnConflict = -31,
    TxnStillOpen = -33,
    CursorIsNil = -100,
    CursorStale = -101,
    ComparatorError = -102,
    DatabaseNotFound = -200,
    DatabaseAlreadyExists = -201,
    DatabaseAlreadyOpen = -202,
}

impl ErrorCode {
    const ALL: [Self; 26] = [
        Self::InvalidRecordSize,
        Self::InvalidKeySize,
        Self::InvalidPageSize,
        Self::OutOfMemory,
        Self::InvalidParameter,
        Self::InvalidFileHeader,
        Self::InvalidFileVersion,
        Self::KeyNotFound,
        Self::DuplicateKey,
        Self::DatabaseCorrupted,
        Self::WriteProtected,
        Self::IoError,
        Self::FileNotFound,
        Self::NotReady,
        Self::LimitsReached,
        Self::OutOfDisk,
        Self::NeedRecovery,
        Self::CursorStillOpen,
        Self::TxnConflict,
        Self::TxnStillOpen,
        Self::CursorIsNil,
        Self::CursorStale,
        Self::ComparatorError,
        Self::DatabaseNotFound,
        Self::DatabaseAlreadyExists,
        Self::DatabaseAlreadyOpen,
    ];

    /// The numeric value of this code.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Look up a code by its numeric value.
    #[must_use]
    pub fn from_i32(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_i32() == code)
    }

    /// Human-readable description of the code.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::InvalidRecordSize => "Invalid record size",
            Self::InvalidKeySize => "Invalid key size",
            Self::InvalidPageSize => "Invalid page size",
            Self::OutOfMemory => "Out of memory",
            Self::InvalidParameter => "Invalid parameter",
            Self::InvalidFileHeader => "Invalid database file header",
            Self::InvalidFileVersion => "Invalid database file version",
            Self::KeyNotFound => "Key not found",
            Self::DuplicateKey => "Duplicate key",
            Self::DatabaseCorrupted => "Internal integrity violated",
            Self::WriteProtected => "Database opened in read-only mode",
            Self::IoError => "System I/O error",
            Self::FileNotFound => "File not found",
            Self::NotReady => "Object was not initialized correctly",
            Self::LimitsReached => "Database limits reached",
            Self::OutOfDisk => "No space left on device",
            Self::NeedRecovery => "Database needs recovery",
            Self::CursorStillOpen => "Cannot close Database/Environment because a Cursor is still open",
            Self::TxnConflict => "Operation conflicts with another Transaction",
            Self::TxnStillOpen => "Cannot close an Environment while a Transaction is active",
            Self::CursorIsNil => "Cursor points to NIL",
            Self::CursorStale => "Cursor position was invalidated by a structural change",
            Self::ComparatorError => "Key comparator failed",
            Self::DatabaseNotFound => "Database not found",
            Self::DatabaseAlreadyExists => "Database name already exists",
            Self::DatabaseAlreadyOpen => "Database already open",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.description(), self.as_i32())
    }
}

/// Describe a numeric error code.
///
/// Returns `"Success"` for `0` and `"Unknown error"` for values that are not
/// a known [`ErrorCode`].
#[must_use]
pub fn strerror(code: i32) -> &'static str {
    if code == 0 {
        return "Success";
    }
    ErrorCode::from_i32(code).map_or("Unknown error", ErrorCode::description)
}

/// Errors returned by the engine.
#[derive(Debug)]
pub enum Error {
    /// A bad or missing argument or configuration value.
    InvalidParameter(String),
    /// A key does not match the database's fixed key size, or is too long.
    InvalidKeySize { expected: Option<usize>, actual: usize },
    /// A record does not match the database's fixed record size.
    InvalidRecordSize { expected: usize, actual: usize },
    /// A page size that is not a power of two in the supported range.
    InvalidPageSize(usize),
    /// A unique key was inserted twice without the overwrite flag.
    DuplicateKey,
    /// The key (or duplicate position) does not exist.
    KeyNotFound,
    /// I/O error from the backing storage.
    Io(std::io::Error),
    /// The backing device is full.
    OutOfDisk(std::io::Error),
    /// An allocation for a stored value failed.
    OutOfMemory,
    /// A page failed verification or a structure is inconsistent.
    DatabaseCorrupted(String),
    /// The file does not start with an environment header.
    InvalidFileHeader,
    /// The file was written by an unsupported format version.
    InvalidFileVersion { found: u32 },
    /// The environment was opened read-only.
    WriteProtected,
    /// The file to open does not exist.
    FileNotFound(PathBuf),
    /// The handle was closed, or its environment was.
    NotReady(&'static str),
    /// A fixed-size structure (such as the database directory) is full.
    LimitsReached(String),
    /// A previous commit failed; the environment must be reopened.
    NeedRecovery,
    /// A close was refused because cursors are still open.
    CursorStillOpen,
    /// Another transaction is active, or the operation is not allowed
    /// inside one.
    TxnConflict,
    /// A close was refused because a transaction is still active.
    TxnStillOpen,
    /// The cursor is not positioned on a key.
    CursorIsNil,
    /// The cursor's leaf was split, merged or freed through another handle.
    CursorStale,
    /// A user-supplied comparator failed.
    Comparator(String),
    /// No database with this name exists in the environment.
    DatabaseNotFound(u16),
    /// A database with this name already exists.
    DatabaseAlreadyExists(u16),
    /// The database is already open through another handle.
    DatabaseAlreadyOpen(u16),
}

impl Error {
    /// The stable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidParameter(_) => ErrorCode::InvalidParameter,
            Self::InvalidKeySize { .. } => ErrorCode::InvalidKeySize,
            Self::InvalidRecordSize { .. } => ErrorCode::InvalidRecordSize,
            Self::InvalidPageSize(_) => ErrorCode::InvalidPageSize,
            Self::DuplicateKey => ErrorCode::DuplicateKey,
            Self::KeyNotFound => ErrorCode::KeyNotFound,
            Self::Io(_) => ErrorCode::IoError,
            Self::OutOfDisk(_) => ErrorCode::OutOfDisk,
            Self::OutOfMemory => ErrorCode::OutOfMemory,
            Self::DatabaseCorrupted(_) => ErrorCode::DatabaseCorrupted,
            Self::InvalidFileHeader => ErrorCode::InvalidFileHeader,
            Self::InvalidFileVersion { .. } => ErrorCode::InvalidFileVersion,
            Self::WriteProtected => ErrorCode::WriteProtected,
            Self::FileNotFound(_) => ErrorCode::FileNotFound,
            Self::NotReady(_) => ErrorCode::NotReady,
            Self::LimitsReached(_) => ErrorCode::LimitsReached,
            Self::NeedRecovery => ErrorCode::NeedRecovery,
            Self::CursorStillOpen => ErrorCode::CursorStillOpen,
            Self::TxnConflict => ErrorCode::TxnConflict,
            Self::TxnStillOpen => ErrorCode::TxnStillOpen,
            Self::CursorIsNil => ErrorCode::CursorIsNil,
            Self::CursorStale => ErrorCode::CursorStale,
            Self::Comparator(_) => ErrorCode::ComparatorError,
            Self::DatabaseNotFound(_) => ErrorCode::DatabaseNotFound,
            Self::DatabaseAlreadyExists(_) => ErrorCode::DatabaseAlreadyExists,
            Self::DatabaseAlreadyOpen(_) => ErrorCode::DatabaseAlreadyOpen,
        }
    }

    /// Status outcomes are ordinary results of a lookup or insert, not faults.
    #[must_use]
    pub const fn is_status(&self) -> bool {
        matches!(self, Self::KeyNotFound | Self::DuplicateKey)
    }

    pub(crate) fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter(message.into())
    }

    pub(crate) fn corrupted(message: impl Into<String>) -> Self {
        Self::DatabaseCorrupted(message.into())
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidParameter(msg) => write!(f, "invalid parameter: {msg}"),
            Self::InvalidKeySize {
                expected: Some(expected),
                actual,
            } => write!(f, "invalid key size: expected {expected}, got {actual}"),
            Self::InvalidKeySize {
                expected: None,
                actual,
            } => write!(f, "invalid key size: {actual} bytes is too large"),
            Self::InvalidRecordSize { expected, actual } => {
                write!(f, "invalid record size: expected {expected}, got {actual}")
            }
            Self::InvalidPageSize(size) => write!(f, "invalid page size: {size}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::OutOfDisk(e) => write!(f, "out of disk space: {e}"),
            Self::DatabaseCorrupted(msg) => write!(f, "database corrupted: {msg}"),
            Self::InvalidFileVersion { found } => {
                write!(f, "unsupported file format version {found}")
            }
            Self::FileNotFound(path) => write!(f, "file not found: {}", path.display()),
            Self::NotReady(what) => write!(f, "{what} is closed"),
            Self::LimitsReached(msg) => write!(f, "limits reached: {msg}"),
            Self::Comparator(msg) => write!(f, "comparator failed: {msg}"),
            Self::DatabaseNotFound(name) => write!(f, "database {name} not found"),
            Self::DatabaseAlreadyExists(name) => write!(f, "database {name} already exists"),
            Self::DatabaseAlreadyOpen(name) => write!(f, "database {name} is already open"),
            Self::DuplicateKey
            | Self::KeyNotFound
            | Self::OutOfMemory
            | Self::InvalidFileHeader
            | Self::WriteProtected
            | Self::NeedRecovery
            | Self::CursorStillOpen
            | Self::TxnConflict
            | Self::TxnStillOpen
            | Self::CursorIsNil
            | Self::CursorStale => f.write_str(self.code().description()),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) | Self::OutOfDisk(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::StorageFull => Self::OutOfDisk(e),
            std::io::ErrorKind::OutOfMemory => Self::OutOfMemory,
            _ => Self::Io(e),
        }
    }
}

impl From<PageError> for Error {
    fn from(e: PageError) -> Self {
        Self::DatabaseCorrupted(e.to_string())
    }
}

impl From<JournalError> for Error {
    fn from(e: JournalError) -> Self {
        match e {
            JournalError::Io(io) => Self::from(io),
            other => Self::DatabaseCorrupted(other.to_string()),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::InvalidParameter(e.to_string())
    }
}

impl From<std::collections::TryReserveError> for Error {
    fn from(_: std::collections::TryReserveError) -> Self {
        Self::OutOfMemory
    }
}
