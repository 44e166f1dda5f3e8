//! Configuration types for cadence
//!
//! Defines:
//! - `Settings` - Top-level settings (`config.toml`)
//! - `ConnectionSettings` - Target URL, handshake timeout, reconnect backoff
//! - `InvokeSettings` - Per-call defaults

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use cadence_core::prelude::*;

/// Smallest allowed first reconnect delay.
pub const MIN_INITIAL_BACKOFF_MS: u64 = 50;

/// Largest allowed jitter fraction.
pub const MAX_BACKOFF_JITTER: f64 = 0.5;

/// Application settings (`config.toml`)
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub connection: ConnectionSettings,

    #[serde(default)]
    pub invoke: InvokeSettings,
}

/// Connection lifecycle settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ConnectionSettings {
    /// WebSocket URL of the backend (`ws://` or `wss://`)
    #[serde(default)]
    pub url: Option<String>,

    /// How long an open link may wait for the handshake before it is dropped
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// First reconnect delay
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Cap on the reconnect delay
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Share of each delay that may be shaved off at random, in `[0, 0.5]`
    #[serde(default = "default_backoff_jitter")]
    pub backoff_jitter: f64,

    /// Give up after this many consecutive failed attempts (absent = never)
    #[serde(default)]
    pub max_reconnect_attempts: Option<u32>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            url: None,
            handshake_timeout_ms: default_handshake_timeout_ms(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_jitter: default_backoff_jitter(),
            max_reconnect_attempts: None,
        }
    }
}

impl ConnectionSettings {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// Invoke defaults
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct InvokeSettings {
    /// Default deadline for a call
    #[serde(default = "default_invoke_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for InvokeSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_invoke_timeout_ms(),
        }
    }
}

impl InvokeSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_backoff_jitter() -> f64 {
    0.2
}

fn default_invoke_timeout_ms() -> u64 {
    30_000
}

impl Settings {
    /// Check bounds that serde defaults cannot express.
    ///
    /// # Errors
    ///
    /// [`Error::ConfigInvalid`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let conn = &self.connection;

        if let Some(url) = &conn.url {
            let parsed = Url::parse(url).map_err(|e| {
                Error::config_invalid(format!("connection.url '{url}' is not a valid URL: {e}"))
            })?;
            if !matches!(parsed.scheme(), "ws" | "wss") {
                return Err(Error::config_invalid(format!(
                    "connection.url must use ws:// or wss://, got '{}'",
                    parsed.scheme()
                )));
            }
        }

        if conn.handshake_timeout_ms == 0 {
            return Err(Error::config_invalid(
                "connection.handshake_timeout_ms must be greater than 0",
            ));
        }
        if conn.initial_backoff_ms < MIN_INITIAL_BACKOFF_MS {
            return Err(Error::config_invalid(format!(
                "connection.initial_backoff_ms must be at least {MIN_INITIAL_BACKOFF_MS}"
            )));
        }
        if conn.max_backoff_ms < conn.initial_backoff_ms {
            return Err(Error::config_invalid(
                "connection.max_backoff_ms must not be below initial_backoff_ms",
            ));
        }
        if !(0.0..=MAX_BACKOFF_JITTER).contains(&conn.backoff_jitter) {
            return Err(Error::config_invalid(format!(
                "connection.backoff_jitter must be within [0, {MAX_BACKOFF_JITTER}]"
            )));
        }
        if self.invoke.timeout_ms == 0 {
            return Err(Error::config_invalid("invoke.timeout_ms must be greater than 0"));
        }

        Ok(())
    }
}
