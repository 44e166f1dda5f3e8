//! # cadence-core - Wire Protocol and Shared Types
//!
//! Foundation crate for cadence. Provides the wire protocol spoken between
//! a client and its backend, the error taxonomy, and logging setup.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde, thiserror, tracing).
//!
//! ## Public API
//!
//! ### Wire Protocol (`protocol`)
//! - [`Request`] - Client → server call `{ invoked, args, id }`
//! - [`Response`] - Server → client answer with `result` or `error`
//! - [`Handshake`] - Token + settings snapshot sent once per connection
//! - [`PushEvent`] - Unsolicited `[channel, payload]` notification
//! - [`classify()`], [`parse_frame()`] - Inbound frame classification
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Error enum with `fatal` vs `recoverable` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use cadence_core::prelude::*;
//! ```

pub mod error;
pub mod logging;
pub mod prelude;
pub mod protocol;

pub use error::{Error, Result, ResultExt};
pub use protocol::{
    classify, encode_request, parse_frame, CorrelationId, Handshake, InboundMessage, MethodPath,
    PushEvent, Request, Response, SettingsSnapshot,
};
