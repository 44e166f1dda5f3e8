//! # cadence-transport - Physical Channels
//!
//! Opens connections to a backend and turns raw traffic into classified
//! [`cadence_core::InboundMessage`]s. Knows nothing about correlation,
//! handshakes or reconnects; that lives in `cadence-client`.
//!
//! Depends on [`cadence_core`] for the wire protocol and error handling.
//!
//! ## Public API
//!
//! ### Transport Contract
//! - [`Connector`] - Opens one physical connection, returning a [`Link`]
//! - [`LinkHandle`] - Clonable sender of [`Outbound`] traffic
//! - [`TransportEvent`] - Inbound message or the final [`CloseReason`]
//!
//! ### WebSocket
//! - [`WebSocketConnector`] - JSON text frames over `ws://` / `wss://`
//!
//! ### In-Process Host
//! - [`InProcessConnector`] - Structured frames over an in-process channel
//! - [`HostAcceptor`] - Endpoint that hands new ports to a backend task
//! - [`HostFrame`] - `(service, method, ...args)` calls and named emissions

pub mod host;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;
pub mod transport;
pub mod websocket;

// Public API re-exports
pub use host::{HostAcceptor, HostEndpoint, HostFrame, HostPort, InProcessConnector};
pub use transport::{
    CloseReason, Connector, Link, LinkHandle, LocalConnector, Outbound, TransportEvent,
};
pub use websocket::WebSocketConnector;
