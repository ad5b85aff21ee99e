//! Environment configuration.
//!
//! An [`EnvironmentConfig`] carries everything chosen when an environment
//! is created or opened. Values can be set in code with the `with_*`
//! builders or loaded from environment variables.
//!
//! # Environment Variables
//!
//! - `BURROW_PAGE_SIZE`: page size in bytes for new environments (default: `16384`)
//! - `BURROW_CACHE_SIZE`: page cache size in bytes (default: `2097152`)
//! - `BURROW_ENABLE_FSYNC`: `1`/`true` to sync with `fsync` (default: off)
//!
//! # Invariants
//!
//! - `page_size` is only checked when an environment is created; opening an
//!   existing file always uses the page size stored in its header
//! - `cache_size` of 0 still keeps a small minimum of pages cached

use crate::diagnostics::ErrorChannel;
use crate::params::EnvFlags;
use crate::storage::DEFAULT_PAGE_SIZE;
use crate::storage::cache::DEFAULT_CACHE_SIZE;

/// Settings for creating or opening an environment.
#[derive(Debug, Clone)]
pub struct EnvironmentConfig {
    /// Page size of a new environment. Must be a power of two in 1024..=65536.
    pub page_size: usize,
    /// Bytes of clean pages kept in memory.
    pub cache_size: usize,
    /// Environment flags.
    pub flags: EnvFlags,
    /// Where warnings and errors are reported.
    pub diagnostics: ErrorChannel,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            cache_size: DEFAULT_CACHE_SIZE,
            flags: EnvFlags::empty(),
            diagnostics: ErrorChannel::process().clone(),
        }
    }
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable is missing.
    MissingEnvVar(String),
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingEnvVar(name) => {
                write!(f, "missing required environment variable: {name}")
            }
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl EnvironmentConfig {
    pub const PAGE_SIZE_VAR: &'static str = "BURROW_PAGE_SIZE";
    pub const CACHE_SIZE_VAR: &'static str = "BURROW_CACHE_SIZE";
    pub const ENABLE_FSYNC_VAR: &'static str = "BURROW_ENABLE_FSYNC";

    /// Load configuration from environment variables.
    ///
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through a variable lookup function.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(value) = lookup(Self::PAGE_SIZE_VAR) {
            config.page_size = parse_size(Self::PAGE_SIZE_VAR, &value)?;
        }
        if let Some(value) = lookup(Self::CACHE_SIZE_VAR) {
            config.cache_size = parse_size(Self::CACHE_SIZE_VAR, &value)?;
        }
        if let Some(value) = lookup(Self::ENABLE_FSYNC_VAR)
            && parse_bool(Self::ENABLE_FSYNC_VAR, &value)?
        {
            config.flags |= EnvFlags::ENABLE_FSYNC;
        }
        Ok(config)
    }

    #[must_use]
    pub const fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub const fn with_cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size;
        self
    }

    #[must_use]
    pub const fn with_flags(mut self, flags: EnvFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Report to `channel` instead of the process-wide channel.
    #[must_use]
    pub fn with_diagnostics(mut self, channel: ErrorChannel) -> Self {
        self.diagnostics = channel;
        self
    }
}

fn parse_size(name: &str, value: &str) -> Result<usize, ConfigError> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("'{value}' is not a byte count"),
        })
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("'{value}' is not a boolean"),
        }),
    }
}
