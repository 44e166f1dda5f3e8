//! The transport contract shared by every physical channel.
//!
//! A [`Connector`] opens one physical connection at a time and hands back a
//! [`Link`]: a clonable [`LinkHandle`] for outbound traffic plus a receiver of
//! [`TransportEvent`]s. Each implementation runs a pump task that owns the
//! physical channel and guarantees that [`TransportEvent::Closed`] is emitted
//! exactly once, as the last event of the link.

use std::fmt;

use tokio::sync::mpsc;

use cadence_core::prelude::*;
use cadence_core::{InboundMessage, Request};

/// Opens physical connections to a backend.
///
/// `connect` resolving `Ok` is the transport-level "open" signal: nothing
/// can be sent on a link before it exists.
#[trait_variant::make(Connector: Send)]
pub trait LocalConnector {
    /// Open one physical connection.
    async fn connect(&self) -> Result<Link>;

    /// Human-readable description of the target, for logs.
    fn target(&self) -> String;
}

/// Outbound traffic accepted by a link.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// A call to forward to the backend.
    Request(Request),
    /// Start delivering push events for a channel.
    ///
    /// Only meaningful for transports that register listeners per channel;
    /// broadcast transports ignore it.
    Listen(String),
    /// Stop delivering push events for a channel.
    Unlisten(String),
    /// Close the physical channel.
    Close,
}

/// Why a link closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Closed from our side (explicit close or forced disconnect).
    Local,
    /// The peer closed the connection.
    Remote(Option<String>),
    /// A read or write failed.
    Error(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Local => write!(f, "closed locally"),
            CloseReason::Remote(Some(reason)) if !reason.is_empty() => {
                write!(f, "closed by peer: {reason}")
            }
            CloseReason::Remote(_) => write!(f, "closed by peer"),
            CloseReason::Error(err) => write!(f, "transport error: {err}"),
        }
    }
}

/// Events emitted by a link, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// An inbound frame, already classified.
    Message(InboundMessage),
    /// The link is gone. Always the final event.
    Closed(CloseReason),
}

/// Sending half of a link.
///
/// Cheap to clone. Sends never block; they queue for the link's pump task.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl LinkHandle {
    /// Create a handle and the receiver a pump task drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue `message` for the link.
    ///
    /// # Errors
    ///
    /// [`Error::NotConnected`] if the link's pump has already exited.
    pub fn send(&self, message: Outbound) -> Result<()> {
        self.tx.send(message).map_err(|_| Error::NotConnected)
    }

    /// Ask the pump to close the physical channel. No-op if already closed.
    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }

    /// `true` while the pump task is still draining this handle.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// One open physical connection.
#[derive(Debug)]
pub struct Link {
    pub handle: LinkHandle,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl Link {
    pub fn new(handle: LinkHandle, events: mpsc::UnboundedReceiver<TransportEvent>) -> Self {
        Self { handle, events }
    }
}
