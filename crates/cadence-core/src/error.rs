//! Application error types with rich context

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Application error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Invocation Errors
    // ─────────────────────────────────────────────────────────────
    /// A call was attempted while the connection was not `Ready`.
    #[error("Connection not ready (state: {state})")]
    NotReady { state: String },

    /// No response arrived before the call's deadline.
    #[error("Call to '{method}' timed out after {}ms", .after.as_millis())]
    Timeout { method: String, after: Duration },

    /// The transport closed while the call was outstanding.
    #[error("Connection lost before a response arrived")]
    ConnectionLost,

    /// The server answered with an error payload. Surfaced verbatim.
    #[error("Remote error: {0}")]
    Remote(Value),

    #[error("Invalid method path '{path}': expected 'service.method'")]
    InvalidMethod { path: String },

    // ─────────────────────────────────────────────────────────────
    // Transport/Connection Errors
    // ─────────────────────────────────────────────────────────────
    /// Attempted to send with no open transport.
    #[error("Transport is not connected")]
    NotConnected,

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Connection is already started")]
    AlreadyConnected,

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid configuration: {message}")]
    ConfigInvalid { message: String },

    // ─────────────────────────────────────────────────────────────
    // Channel/Communication Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Channel closed unexpectedly")]
    ChannelClosed,
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn not_ready(state: impl ToString) -> Self {
        Self::NotReady {
            state: state.to_string(),
        }
    }

    pub fn timeout(method: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            method: method.into(),
            after,
        }
    }

    pub fn invalid_method(path: impl Into<String>) -> Self {
        Self::InvalidMethod { path: path.into() }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            message: message.into(),
        }
    }

    /// Check if this is a recoverable error
    ///
    /// Recoverable errors leave the connection usable; the caller may retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::NotReady { .. }
                | Error::Timeout { .. }
                | Error::ConnectionLost
                | Error::Remote(_)
                | Error::Transport { .. }
        )
    }

    /// Check if this error should trigger application exit
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config { .. } | Error::ConfigInvalid { .. }
        )
    }

    /// The server's error payload, if this is a [`Error::Remote`].
    pub fn remote_payload(&self) -> Option<&Value> {
        match self {
            Error::Remote(payload) => Some(payload),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}
