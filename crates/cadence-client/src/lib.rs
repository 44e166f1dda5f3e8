//! # cadence-client - Connection, Calls and Push Channels
//!
//! The logical side of cadence: one [`Connection`] per backend, a
//! correlation table multiplexing many calls over its current link, and a
//! reference-counted registry of push-channel listeners.
//!
//! Depends on [`cadence_core`] for the protocol and [`cadence_transport`]
//! for the physical links.
//!
//! ## Public API
//!
//! ### Connection Manager (`connection`)
//! - [`Connection`] - Connect, handshake, reconnect with backoff, disconnect
//! - [`ConnectionState`] - `Disconnected | Connecting | AwaitingHandshake | Ready | Reconnecting`
//! - [`Session`] - Token and settings from the server's handshake
//!
//! ### Calls (`invoke`, `correlation`)
//! - [`InvokeClient`] - `invoke`, `invoke_with_timeout`, `invoke_as`
//! - [`CorrelationTable`] - Outstanding calls keyed by id
//!
//! ### Push Channels (`channels`)
//! - [`EventChannels`] - One shared feed per channel
//! - [`Subscription`] - Listener handle; unsubscribes on drop
//! - [`ChannelStream`] - Channel payloads as an async queue
//!
//! ### Configuration (`config`)
//! - [`Settings`] - `config.toml` contents
//! - [`config::load_settings()`] - Load with fallback to defaults
//!
//! ## Example
//!
//! ```no_run
//! use cadence_client::{Connection, Settings};
//! use cadence_transport::WebSocketConnector;
//! use serde_json::json;
//!
//! # async fn run() -> cadence_core::Result<()> {
//! let connection = Connection::new(&Settings::default());
//! connection.connect(WebSocketConnector::new("ws://127.0.0.1:7780/ws")?)?;
//! connection.wait_ready().await?;
//!
//! let _progress = connection.channels().subscribe("progress", |payload| {
//!     println!("progress: {payload}");
//! });
//! let count = connection.invoker().invoke("albums.count", vec![json!({})]).await?;
//! # let _ = count;
//! # Ok(())
//! # }
//! ```

pub mod channels;
pub mod config;
pub mod connection;
pub mod correlation;
pub mod invoke;

pub use channels::{ChannelStream, EventChannels, Listener, Subscription};
pub use config::Settings;
pub use connection::{
    apply_jitter, compute_backoff, Connection, ConnectionState, Session, MIN_RECONNECT_DELAY,
};
pub use correlation::CorrelationTable;
pub use invoke::{Invocation, InvokeClient};
