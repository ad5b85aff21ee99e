// Shape of a call:
// 1. A handle (Environment, Database, Cursor) locks the shared state
// 2. Arguments are checked against the database's directory entry
// 3. A B-tree view is opened over the page store for the one operation
// 4. Pages it dirties collect in a changeset
// 5. Success commits the changeset through the journal, failure drops it
// 6. Errors are returned and also reported to the diagnostics channel
//
// System components:
//  - Page store (allocator, cache, journal, recovery)
//  - B-tree index with duplicate tables and overflow chains
//  - Comparator registry
//  - Environment / database / cursor / transaction handles

pub mod comparator;
pub mod config;
pub mod cursor;
pub mod database;
pub mod diagnostics;
pub mod environment;
pub mod error;
pub mod params;
pub mod storage;
pub mod transaction;

#[cfg(test)]
mod e2e_tests;
#[cfg(test)]
mod testing;

pub use comparator::{CompareError, Comparator};
pub use config::{ConfigError, EnvironmentConfig};
pub use cursor::{Cursor, CursorMove, Iter};
pub use database::{Database, Operation, Outcome};
pub use diagnostics::{ErrorChannel, Severity};
pub use environment::Environment;
pub use error::{Error, ErrorCode, Result, strerror};
pub use params::{
    CloseFlags, DatabaseParameters, DbFlags, EnvFlags, EnvironmentParameters, FindFlags,
    InsertFlags, KEY_SIZE_UNLIMITED, KeyType, ParamName, Parameter, RECORD_SIZE_UNLIMITED, TxnFlags,
};
pub use storage::btree::TreeStats;
pub use transaction::Transaction;

/// Engine version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub revision: u8,
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.revision)
    }
}

/// The engine version, also stamped into every environment header.
#[must_use]
pub const fn version() -> Version {
    Version {
        major: 2,
        minor: 1,
        revision: 0,
    }
}

/// Install a handler on the process-wide diagnostics channel, or remove it
/// with `None`.
pub fn set_error_handler(handler: Option<std::sync::Arc<diagnostics::Handler>>) {
    ErrorChannel::process().set_handler(handler);
}
