//! Test utilities for transport consumers
//!
//! [`MockConnector`] stands in for a real backend. Every successful
//! `connect()` hands the test a [`MockPeer`] through [`MockPeers`], from
//! which the test reads what the client sent and scripts what the server
//! says back.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;

use cadence_core::prelude::*;
use cadence_core::{CorrelationId, Handshake, InboundMessage, PushEvent, Request, Response};

use crate::transport::{CloseReason, Connector, Link, LinkHandle, Outbound, TransportEvent};

/// How long the `expect_*` helpers wait before giving up.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Default)]
struct Counters {
    attempts: AtomicUsize,
    failures_left: AtomicUsize,
}

/// Connector whose links are driven by the test.
#[derive(Debug, Clone)]
pub struct MockConnector {
    peers: mpsc::UnboundedSender<MockPeer>,
    counters: Arc<Counters>,
}

/// Test side of a [`MockConnector`]: yields one [`MockPeer`] per connection.
#[derive(Debug)]
pub struct MockPeers {
    peers: mpsc::UnboundedReceiver<MockPeer>,
    counters: Arc<Counters>,
}

/// Creates a connected `(MockConnector, MockPeers)` pair.
pub fn mock_connector() -> (MockConnector, MockPeers) {
    let (tx, rx) = mpsc::unbounded_channel();
    let counters = Arc::new(Counters::default());
    (
        MockConnector {
            peers: tx,
            counters: Arc::clone(&counters),
        },
        MockPeers {
            peers: rx,
            counters,
        },
    )
}

impl Connector for MockConnector {
    async fn connect(&self) -> Result<Link> {
        self.counters.attempts.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .counters
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::transport("mock connection refused"));
        }

        let (handle, outbound) = LinkHandle::channel();
        let (inbound, events) = mpsc::unbounded_channel();
        self.peers
            .send(MockPeer { outbound, inbound })
            .map_err(|_| Error::transport("mock peer receiver dropped"))?;
        Ok(Link::new(handle, events))
    }

    fn target(&self) -> String {
        "mock".to_string()
    }
}

impl MockPeers {
    /// Wait for the client to open the next connection.
    pub async fn next(&mut self) -> Option<MockPeer> {
        tokio::time::timeout(DEFAULT_TIMEOUT, self.peers.recv())
            .await
            .ok()
            .flatten()
    }

    /// Make the next `n` connection attempts fail.
    pub fn fail_next(&self, n: usize) {
        self.counters.failures_left.store(n, Ordering::SeqCst);
    }

    /// Total connection attempts so far, successful or not.
    pub fn attempts(&self) -> usize {
        self.counters.attempts.load(Ordering::SeqCst)
    }
}

/// Server side of one mock link.
#[derive(Debug)]
pub struct MockPeer {
    outbound: mpsc::UnboundedReceiver<Outbound>,
    inbound: mpsc::UnboundedSender<TransportEvent>,
}

impl MockPeer {
    fn deliver(&self, message: InboundMessage) {
        let _ = self.inbound.send(TransportEvent::Message(message));
    }

    pub fn handshake(&self, token: &str, settings: Value) {
        let settings = match settings {
            Value::Object(map) => map,
            _ => Default::default(),
        };
        self.deliver(InboundMessage::Handshake(Handshake {
            token: token.to_string(),
            settings,
        }));
    }

    pub fn reply(&self, id: CorrelationId, result: Value) {
        self.deliver(InboundMessage::Response(Response::success(id, result)));
    }

    pub fn reply_error(&self, id: CorrelationId, error: Value) {
        self.deliver(InboundMessage::Response(Response::failure(id, error)));
    }

    pub fn push(&self, channel: &str, payload: Value) {
        self.deliver(InboundMessage::Push(PushEvent::new(channel, payload)));
    }

    pub fn send_raw(&self, message: InboundMessage) {
        self.deliver(message);
    }

    /// Simulate the server closing the connection.
    pub fn close(&self) {
        let _ = self
            .inbound
            .send(TransportEvent::Closed(CloseReason::Remote(None)));
    }

    /// Next outbound frame, or `None` after [`DEFAULT_TIMEOUT`].
    pub async fn next_outbound(&mut self) -> Option<Outbound> {
        tokio::time::timeout(DEFAULT_TIMEOUT, self.outbound.recv())
            .await
            .ok()
            .flatten()
    }

    /// Next request, skipping channel registration traffic.
    pub async fn expect_request(&mut self) -> Request {
        loop {
            match self.next_outbound().await {
                Some(Outbound::Request(request)) => return request,
                Some(_) => continue,
                None => panic!("expected a request, got nothing"),
            }
        }
    }

    /// Everything the client has queued so far, without waiting.
    pub fn drain_outbound(&mut self) -> Vec<Outbound> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.outbound.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Channels named in `Listen` frames among `frames`.
    pub fn listens(frames: &[Outbound]) -> Vec<String> {
        frames
            .iter()
            .filter_map(|f| match f {
                Outbound::Listen(channel) => Some(channel.clone()),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_connector_hands_out_peers() {
        let (connector, mut peers) = mock_connector();
        let mut link = connector.connect().await.unwrap();
        let mut peer = peers.next().await.unwrap();

        peer.push("progress", json!(1));
        assert!(matches!(
            link.events.recv().await,
            Some(TransportEvent::Message(InboundMessage::Push(_)))
        ));

        link.handle.send(Outbound::Listen("progress".into())).unwrap();
        assert_eq!(
            peer.next_outbound().await,
            Some(Outbound::Listen("progress".into()))
        );
        assert_eq!(peers.attempts(), 1);
    }

    #[tokio::test]
    async fn test_fail_next_refuses_connections() {
        let (connector, peers) = mock_connector();
        peers.fail_next(2);

        assert!(connector.connect().await.is_err());
        assert!(connector.connect().await.is_err());
        assert!(connector.connect().await.is_ok());
        assert_eq!(peers.attempts(), 3);
    }

    #[test]
    fn test_listens_filters_registration_frames() {
        let frames = vec![
            Outbound::Listen("a".into()),
            Outbound::Unlisten("a".into()),
            Outbound::Listen("b".into()),
            Outbound::Close,
        ];
        assert_eq!(MockPeer::listens(&frames), vec!["a", "b"]);
    }
}
