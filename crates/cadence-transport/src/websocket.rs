//! WebSocket transport.
//!
//! Requests are written as JSON text frames; inbound text (or UTF-8 binary)
//! frames are classified with [`cadence_core::parse_frame`]. The server
//! broadcasts every push channel, so `Listen`/`Unlisten` are not forwarded.
//!
//! ```text
//!   LinkHandle ──Outbound──▶ ┌──────────────┐ ──text──▶ server
//!                            │  pump task   │
//!   events ◀─TransportEvent─ └──────────────┘ ◀─text─── server
//! ```

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use url::Url;

use cadence_core::prelude::*;
use cadence_core::{encode_request, parse_frame};

use crate::transport::{CloseReason, Connector, Link, LinkHandle, Outbound, TransportEvent};

/// Connects to a backend over WebSocket (`ws://` or `wss://`).
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: Url,
}

impl WebSocketConnector {
    /// Validate `url` and build a connector for it.
    ///
    /// # Errors
    ///
    /// [`Error::Transport`] if the URL does not parse or its scheme is not
    /// `ws`/`wss`.
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| Error::transport(format!("invalid URL '{url}': {e}")))?;
        match url.scheme() {
            "ws" | "wss" => Ok(Self { url }),
            other => Err(Error::transport(format!(
                "unsupported scheme '{other}' (expected ws or wss)"
            ))),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Link> {
        let (ws_stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|err| Error::transport(format!("failed to connect to {}: {err}", self.url)))?;
        debug!("WebSocket: connected to {}", self.url);
        Ok(spawn_pump(ws_stream))
    }

    fn target(&self) -> String {
        self.url.to_string()
    }
}

/// Start a pump task for an already-open WebSocket stream.
pub fn spawn_pump<S>(ws_stream: WebSocketStream<S>) -> Link
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (handle, outbound_rx) = LinkHandle::channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    tokio::spawn(run_pump(ws_stream, outbound_rx, events_tx));
    Link::new(handle, events_rx)
}

async fn run_pump<S>(
    ws_stream: WebSocketStream<S>,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut ws_sink, mut ws_stream) = ws_stream.split();

    let reason = loop {
        tokio::select! {
            // ── Incoming WebSocket frame ────────────────────────────────
            frame = ws_stream.next() => {
                let text = match frame {
                    Some(Ok(WsMessage::Text(text))) => text.to_string(),
                    Some(Ok(WsMessage::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => text,
                        Err(_) => {
                            debug!("WebSocket: ignoring non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(WsMessage::Close(frame))) => {
                        break CloseReason::Remote(frame.map(|f| f.reason.to_string()));
                    }
                    Some(Ok(_)) => continue, // Ping/Pong/raw frames
                    Some(Err(err)) => break CloseReason::Error(err.to_string()),
                    None => break CloseReason::Remote(None),
                };
                if events_tx.send(TransportEvent::Message(parse_frame(&text))).is_err() {
                    // Nobody is listening any more; close our side.
                    send_close(&mut ws_sink).await;
                    break CloseReason::Local;
                }
            }

            // ── Outgoing traffic ────────────────────────────────────────
            outbound = outbound_rx.recv() => match outbound {
                Some(Outbound::Request(request)) => {
                    let json = match encode_request(&request) {
                        Ok(json) => json,
                        Err(err) => {
                            warn!("WebSocket: failed to encode request {}: {}", request.id, err);
                            continue;
                        }
                    };
                    if let Err(err) = ws_sink.send(WsMessage::Text(json.into())).await {
                        break CloseReason::Error(err.to_string());
                    }
                }
                Some(Outbound::Listen(channel)) | Some(Outbound::Unlisten(channel)) => {
                    trace!("WebSocket: channel '{}' is broadcast, no registration sent", channel);
                }
                Some(Outbound::Close) | None => {
                    send_close(&mut ws_sink).await;
                    break CloseReason::Local;
                }
            }
        }
    };

    debug!("WebSocket: link {}", reason);
    drop(outbound_rx);
    let _ = events_tx.send(TransportEvent::Closed(reason));
}

/// Send a WebSocket Close frame, ignoring any write errors.
async fn send_close<S>(ws_sink: &mut SplitSink<WebSocketStream<S>, WsMessage>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let _ = ws_sink.send(WsMessage::Close(None)).await;
    let _ = ws_sink.close().await;
}
