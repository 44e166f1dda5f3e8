//! In-process host channel transport.
//!
//! Used when the backend runs in the same process as the client (the
//! desktop build). Frames travel as structured values, not text:
//!
//! - a call is framed as `(service, method, ...args)` plus its id;
//! - a push event arrives as a named emission whose second positional
//!   argument is the payload (the first is the emitter's own context);
//! - channel listeners are registered explicitly with `Listen`/`Unlisten`.

use serde_json::Value;
use tokio::sync::mpsc;

use cadence_core::prelude::*;
use cadence_core::{CorrelationId, Handshake, InboundMessage, PushEvent, Response};

use crate::transport::{CloseReason, Connector, Link, LinkHandle, Outbound, TransportEvent};

/// A structured frame on the host channel.
#[derive(Debug, Clone, PartialEq)]
pub enum HostFrame {
    // client → host
    Invoke {
        id: CorrelationId,
        service: String,
        method: String,
        args: Vec<Value>,
    },
    Listen {
        event: String,
    },
    Unlisten {
        event: String,
    },

    // host → client
    Reply {
        id: CorrelationId,
        outcome: std::result::Result<Value, Value>,
    },
    Handshake(Handshake),
    Emit {
        event: String,
        args: Vec<Value>,
    },
}

/// One end of an in-process channel.
#[derive(Debug)]
pub struct HostPort {
    pub tx: mpsc::UnboundedSender<HostFrame>,
    pub rx: mpsc::UnboundedReceiver<HostFrame>,
}

impl HostPort {
    /// Create two connected ports: `(client side, host side)`.
    pub fn pair() -> (HostPort, HostPort) {
        let (client_tx, host_rx) = mpsc::unbounded_channel();
        let (host_tx, client_rx) = mpsc::unbounded_channel();
        (
            HostPort {
                tx: client_tx,
                rx: client_rx,
            },
            HostPort {
                tx: host_tx,
                rx: host_rx,
            },
        )
    }
}

/// Something that can hand out a fresh port per connection attempt.
pub trait HostEndpoint: Send + Sync + 'static {
    fn open_port(&self) -> Result<HostPort>;
}

/// Endpoint that passes the host side of every new port to a backend task.
#[derive(Debug, Clone)]
pub struct HostAcceptor {
    ports: mpsc::UnboundedSender<HostPort>,
}

impl HostAcceptor {
    /// Returns the endpoint and the receiver the backend accepts ports from.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<HostPort>) {
        let (ports, accepted) = mpsc::unbounded_channel();
        (Self { ports }, accepted)
    }
}

impl HostEndpoint for HostAcceptor {
    fn open_port(&self) -> Result<HostPort> {
        let (client, host) = HostPort::pair();
        self.ports
            .send(host)
            .map_err(|_| Error::transport("in-process host is not accepting connections"))?;
        Ok(client)
    }
}

/// Connector for an in-process host.
#[derive(Debug, Clone)]
pub struct InProcessConnector<H> {
    host: H,
}

impl<H: HostEndpoint> InProcessConnector<H> {
    pub fn new(host: H) -> Self {
        Self { host }
    }
}

impl<H: HostEndpoint> Connector for InProcessConnector<H> {
    async fn connect(&self) -> Result<Link> {
        let port = self.host.open_port()?;
        Ok(spawn_pump(port))
    }

    fn target(&self) -> String {
        "in-process host".to_string()
    }
}

/// Start a pump task for an open client-side port.
pub fn spawn_pump(port: HostPort) -> Link {
    let (handle, outbound_rx) = LinkHandle::channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    tokio::spawn(run_pump(port, outbound_rx, events_tx));
    Link::new(handle, events_rx)
}

async fn run_pump(
    port: HostPort,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
) {
    let HostPort { tx, mut rx } = port;

    let reason = loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(frame) => {
                    if events_tx.send(TransportEvent::Message(inbound_from_frame(frame))).is_err() {
                        break CloseReason::Local;
                    }
                }
                None => break CloseReason::Remote(Some("host dropped the channel".to_string())),
            },

            outbound = outbound_rx.recv() => {
                let frame = match outbound {
                    Some(Outbound::Request(request)) => HostFrame::Invoke {
                        id: request.id,
                        service: request.invoked.service().to_string(),
                        method: request.invoked.method().to_string(),
                        args: request.args,
                    },
                    Some(Outbound::Listen(event)) => HostFrame::Listen { event },
                    Some(Outbound::Unlisten(event)) => HostFrame::Unlisten { event },
                    Some(Outbound::Close) | None => break CloseReason::Local,
                };
                if tx.send(frame).is_err() {
                    break CloseReason::Remote(Some("host dropped the channel".to_string()));
                }
            }
        }
    };

    debug!("Host channel: link {}", reason);
    drop(outbound_rx);
    let _ = events_tx.send(TransportEvent::Closed(reason));
}

/// Map a host frame onto the transport-agnostic inbound message.
fn inbound_from_frame(frame: HostFrame) -> InboundMessage {
    match frame {
        HostFrame::Reply { id, outcome } => InboundMessage::Response(Response { id, outcome }),
        HostFrame::Handshake(handshake) => InboundMessage::Handshake(handshake),
        HostFrame::Emit { event, args } => {
            let payload = args.into_iter().nth(1).unwrap_or_else(|| {
                debug!("Host channel: emission '{}' carried no payload", event);
                Value::Null
            });
            InboundMessage::Push(PushEvent::new(event, payload))
        }
        other => InboundMessage::Unknown(format!("client-bound frame from host: {other:?}")),
    }
}
