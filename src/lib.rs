//! cadence command-line client
//!
//! Thin front end over `cadence-client`: call a backend method, follow push
//! channels, or print the handshake of a live connection.

pub mod commands;
pub mod output;

pub use commands::{resolve_settings, Overrides};
pub use output::CliEvent;
