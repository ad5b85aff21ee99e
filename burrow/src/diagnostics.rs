//! Diagnostics channel.
//!
//! An [`ErrorChannel`] forwards the engine's warnings and errors to a
//! caller-installed handler, in addition to the `Result` returned by the
//! failing call. The handler runs synchronously on the thread that raised
//! the event, once per event, before that call returns.
//!
//! Environments report to the channel named in their configuration. The
//! shared [`ErrorChannel::process`] instance is the default; tests and
//! embedders that want isolation create their own with [`ErrorChannel::new`].
//!
//! Every event is also emitted as a `tracing` event, whether or not a
//! handler is installed.

use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use crate::error::Error;

/// How serious a reported event is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Fatal => "fatal",
        })
    }
}

/// Signature of a diagnostics handler.
pub type Handler = dyn Fn(Severity, &str) + Send + Sync;

/// A cloneable handle to one diagnostics channel.
///
/// Clones share the installed handler.
#[derive(Clone, Default)]
pub struct ErrorChannel {
    handler: Arc<RwLock<Option<Arc<Handler>>>>,
}

impl std::fmt::Debug for ErrorChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorChannel")
            .field("installed", &self.is_installed())
            .finish()
    }
}

impl ErrorChannel {
    /// A channel of its own, with no handler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide channel.
    pub fn process() -> &'static Self {
        static PROCESS: OnceLock<ErrorChannel> = OnceLock::new();
        PROCESS.get_or_init(Self::new)
    }

    /// Install a handler, or remove it with `None`.
    ///
    /// Takes effect for every event raised afterwards.
    pub fn set_handler(&self, handler: Option<Arc<Handler>>) {
        *self
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = handler;
    }

    /// Install a handler.
    pub fn install<F>(&self, handler: F)
    where
        F: Fn(Severity, &str) + Send + Sync + 'static,
    {
        self.set_handler(Some(Arc::new(handler)));
    }

    /// Remove the handler.
    pub fn uninstall(&self) {
        self.set_handler(None);
    }

    /// Returns true if a handler is installed.
    #[must_use]
    pub fn is_installed(&self) -> bool {
        self.handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Report an event.
    pub fn report(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Debug => tracing::debug!(target: "burrow::diagnostics", "{message}"),
            Severity::Info => tracing::info!(target: "burrow::diagnostics", "{message}"),
            Severity::Warning => tracing::warn!(target: "burrow::diagnostics", "{message}"),
            Severity::Error | Severity::Fatal => {
                tracing::error!(target: "burrow::diagnostics", %severity, "{message}");
            }
        }

        // The handler may itself touch the channel, so it runs unlocked.
        let handler = self
            .handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(handler) = handler {
            handler(severity, message);
        }
    }

    /// Report an error returned by a public operation.
    ///
    /// Status outcomes (`KeyNotFound`, `DuplicateKey`) are not faults and are
    /// not reported.
    pub fn report_error(&self, operation: &str, error: &Error) {
        if error.is_status() {
            return;
        }
        let severity = match error {
            Error::DatabaseCorrupted(_) | Error::NeedRecovery => Severity::Fatal,
            _ => Severity::Error,
        };
        self.report(
            severity,
            &format!("{operation}: {error} ({})", error.code().as_i32()),
        );
    }
}
