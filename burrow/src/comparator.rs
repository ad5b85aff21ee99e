//! Key ordering.
//!
//! Every database orders its keys with one [`Comparator`]. The default is
//! chosen by the database's key type: byte-lexicographic for binary keys,
//! by value for the numeric types. A custom comparator replaces the
//! ordering of a database for as long as its handle is open.
//!
//! A custom comparator must be a strict total order. Nothing checks this;
//! a comparator that is not leaves the tree in an unspecified order.
//! Changing the comparator of a database that already holds keys does not
//! re-sort them.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::params::KeyType;

/// Signature of a fallible user comparator.
pub type CompareFn = dyn Fn(&[u8], &[u8]) -> std::result::Result<Ordering, CompareError> + Send + Sync;

/// Failure reported by a user comparator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompareError(String);

impl CompareError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl std::fmt::Display for CompareError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for CompareError {}

/// An ordering over keys.
#[derive(Clone, Default)]
pub enum Comparator {
    /// Byte-lexicographic, shorter prefix first.
    #[default]
    Lexicographic,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Real32,
    Real64,
    /// A user-supplied ordering.
    Custom(Arc<CompareFn>),
}

impl std::fmt::Debug for Comparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lexicographic => f.write_str("Lexicographic"),
            Self::UInt8 => f.write_str("UInt8"),
            Self::UInt16 => f.write_str("UInt16"),
            Self::UInt32 => f.write_str("UInt32"),
            Self::UInt64 => f.write_str("UInt64"),
            Self::Real32 => f.write_str("Real32"),
            Self::Real64 => f.write_str("Real64"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl Comparator {
    /// Wrap an infallible ordering function.
    pub fn custom<F>(compare: F) -> Self
    where
        F: Fn(&[u8], &[u8]) -> Ordering + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(move |a: &[u8], b: &[u8]| {
            Ok::<_, CompareError>(compare(a, b))
        }))
    }

    /// Wrap an ordering function that can fail.
    ///
    /// A failure aborts the operation that triggered the comparison; the
    /// tree is left as it was before that operation.
    pub fn fallible<F>(compare: F) -> Self
    where
        F: Fn(&[u8], &[u8]) -> std::result::Result<Ordering, CompareError> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(compare))
    }

    /// The built-in comparator for a key type, `None` for `KeyType::Custom`.
    #[must_use]
    pub const fn for_key_type(key_type: KeyType) -> Option<Self> {
        match key_type {
            KeyType::Binary => Some(Self::Lexicographic),
            KeyType::Custom => None,
            KeyType::UInt8 => Some(Self::UInt8),
            KeyType::UInt16 => Some(Self::UInt16),
            KeyType::UInt32 => Some(Self::UInt32),
            KeyType::UInt64 => Some(Self::UInt64),
            KeyType::Real32 => Some(Self::Real32),
            KeyType::Real64 => Some(Self::Real64),
        }
    }

    /// Compare two keys.
    ///
    /// A user comparator that fails or panics yields `Error::Comparator`.
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Result<Ordering> {
        match self {
            Self::Lexicographic => Ok(a.cmp(b)),
            Self::UInt8 => numeric::<1, u8>(a, b, u8::from_le_bytes, |x, y| x.cmp(y)),
            Self::UInt16 => numeric::<2, u16>(a, b, u16::from_le_bytes, |x, y| x.cmp(y)),
            Self::UInt32 => numeric::<4, u32>(a, b, u32::from_le_bytes, |x, y| x.cmp(y)),
            Self::UInt64 => numeric::<8, u64>(a, b, u64::from_le_bytes, |x, y| x.cmp(y)),
            Self::Real32 => numeric::<4, f32>(a, b, f32::from_le_bytes, f32::total_cmp),
            Self::Real64 => numeric::<8, f64>(a, b, f64::from_le_bytes, f64::total_cmp),
            Self::Custom(compare) => match catch_unwind(AssertUnwindSafe(|| compare(a, b))) {
                Ok(Ok(ordering)) => Ok(ordering),
                Ok(Err(e)) => Err(Error::Comparator(e.to_string())),
                Err(panic) => Err(Error::Comparator(panic_message(panic.as_ref()))),
            },
        }
    }
}

fn numeric<const N: usize, T>(
    a: &[u8],
    b: &[u8],
    decode: fn([u8; N]) -> T,
    order: impl Fn(&T, &T) -> Ordering,
) -> Result<Ordering> {
    let read = |key: &[u8]| -> Result<T> {
        let bytes: [u8; N] = key.try_into().map_err(|_| Error::InvalidKeySize {
            expected: Some(N),
            actual: key.len(),
        })?;
        Ok(decode(bytes))
    };
    Ok(order(&read(a)?, &read(b)?))
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("comparator panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("comparator panicked: {message}")
    } else {
        "comparator panicked".to_string()
    }
}

#[derive(Debug, Clone)]
struct Registration {
    key_type: KeyType,
    custom: Option<Comparator>,
}

/// Comparators of the open databases of one environment.
#[derive(Debug, Clone, Default)]
pub struct ComparatorRegistry {
    databases: HashMap<u16, Registration>,
}

impl ComparatorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a database known with its key type.
    pub fn attach(&mut self, database: u16, key_type: KeyType) {
        self.databases.insert(
            database,
            Registration {
                key_type,
                custom: None,
            },
        );
    }

    /// Forget a database and any comparator registered for it.
    pub fn detach(&mut self, database: u16) {
        self.databases.remove(&database);
    }

    /// Install a custom comparator for a database.
    pub fn register(&mut self, database: u16, comparator: Comparator) -> Result<()> {
        let registration = self
            .databases
            .get_mut(&database)
            .ok_or(Error::DatabaseNotFound(database))?;
        registration.custom = Some(comparator);
        Ok(())
    }

    /// Remove the custom comparator of a database, restoring the default.
    pub fn unregister(&mut self, database: u16) {
        if let Some(registration) = self.databases.get_mut(&database) {
            registration.custom = None;
        }
    }

    /// The comparator currently in force for a database.
    ///
    /// Fails with `InvalidParameter` for a custom key type without a
    /// registered comparator.
    pub fn resolve(&self, database: u16) -> Result<Comparator> {
        let registration = self
            .databases
            .get(&database)
            .ok_or(Error::DatabaseNotFound(database))?;
        if let Some(custom) = &registration.custom {
            return Ok(custom.clone());
        }
        Comparator::for_key_type(registration.key_type).ok_or_else(|| {
            Error::invalid_parameter(format!(
                "database {database} has a custom key type but no comparator"
            ))
        })
    }

    /// Compare two keys with the comparator of a database.
    pub fn compare(&self, database: u16, a: &[u8], b: &[u8]) -> Result<Ordering> {
        self.resolve(database)?.compare(a, b)
    }
}
