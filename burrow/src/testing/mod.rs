//! Helpers shared by unit and scenario tests.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use crate::config::EnvironmentConfig;
use crate::diagnostics::{ErrorChannel, Severity};
use crate::environment::Environment;
use crate::error::Result;
use crate::params::EnvFlags;

/// Events delivered to a recording diagnostics handler.
pub type Events = Arc<Mutex<Vec<(Severity, String)>>>;

/// A fresh channel whose handler records every event.
pub fn recording_channel() -> (ErrorChannel, Events) {
    let channel = ErrorChannel::new();
    let events: Events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    channel.install(move |severity, message| {
        if let Ok(mut events) = sink.lock() {
            events.push((severity, message.to_string()));
        }
    });
    (channel, events)
}

/// Configuration with an isolated diagnostics channel.
pub fn test_config() -> EnvironmentConfig {
    EnvironmentConfig::default().with_diagnostics(ErrorChannel::new())
}

/// Create an in-memory environment.
pub fn memory_environment(config: EnvironmentConfig) -> Result<Environment> {
    let flags = config.flags | EnvFlags::IN_MEMORY;
    Environment::create(None, config.with_flags(flags))
}

/// A file path inside a temporary directory that lives as long as the value.
pub struct TempPath {
    _dir: TempDir,
    pub path: PathBuf,
}

impl TempPath {
    /// A path to a file that does not exist yet.
    pub fn new(name: &str) -> std::io::Result<Self> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(name);
        Ok(Self { _dir: dir, path })
    }

    /// Path of the journal belonging to this file.
    pub fn journal(&self) -> PathBuf {
        crate::environment::journal_path(&self.path)
    }
}
