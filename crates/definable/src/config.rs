#![forbid(unsafe_code)]

//! Per-type behavior switches.
//!
//! Development builds seal instances and watch asynchronous setters for
//! missing completions; release builds skip both. Either can be forced with
//! the presets or the `with_*` methods.

use std::time::Duration;

/// Default time an asynchronous setter may stay pending before a warning.
pub const DEFAULT_ASYNC_SETTER_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration applied when a type is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefineConfig {
    /// Reject undeclared properties once construction finished.
    pub seal_instances: bool,
    /// Warn about asynchronous setters that never complete.
    pub warn_async_setters: bool,
    /// How long an asynchronous setter may stay pending.
    pub async_setter_timeout: Duration,
}

impl Default for DefineConfig {
    fn default() -> Self {
        Self {
            seal_instances: cfg!(debug_assertions),
            warn_async_setters: cfg!(debug_assertions),
            async_setter_timeout: DEFAULT_ASYNC_SETTER_TIMEOUT,
        }
    }
}

impl DefineConfig {
    /// Sealing and the async-setter watchdog on.
    #[must_use]
    pub fn development() -> Self {
        Self {
            seal_instances: true,
            warn_async_setters: true,
            ..Default::default()
        }
    }

    /// No sealing, no watchdog.
    #[must_use]
    pub fn production() -> Self {
        Self {
            seal_instances: false,
            warn_async_setters: false,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_seal_instances(mut self, seal: bool) -> Self {
        self.seal_instances = seal;
        self
    }

    #[must_use]
    pub fn with_warn_async_setters(mut self, warn: bool) -> Self {
        self.warn_async_setters = warn;
        self
    }

    /// Set the pending-setter timeout.
    #[must_use]
    pub fn with_async_setter_timeout(mut self, timeout: Duration) -> Self {
        self.async_setter_timeout = timeout;
        self
    }
}
