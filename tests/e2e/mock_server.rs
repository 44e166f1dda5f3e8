//! Mock WebSocket backend for end-to-end tests
//!
//! A real `tokio-tungstenite` server on an ephemeral localhost port. Every
//! accepted connection gets the handshake first, then requests are answered
//! from a small fixed method table:
//!
//! | method        | reply                                  |
//! |---------------|----------------------------------------|
//! | `echo.args`   | `result`: the args array               |
//! | `math.add`    | `result`: sum of integer args          |
//! | `fail.always` | `error`: `{"message": "boom"}`         |
//! | `slow.never`  | no reply                               |
//! | anything else | `error`: `{"message": "unknown ..."}`  |
//!
//! Pushes and forced disconnects are broadcast to every live connection.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

pub const TOKEN: &str = "e2e-token";

#[derive(Debug, Clone)]
enum ServerCommand {
    Send(String),
    DropConnections,
}

pub struct MockServer {
    addr: SocketAddr,
    commands: broadcast::Sender<ServerCommand>,
    accepted: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl MockServer {
    /// Start a server that handshakes on every connection.
    pub async fn start() -> Self {
        Self::start_with(true).await
    }

    /// Start a server that accepts connections but never handshakes.
    pub async fn start_silent() -> Self {
        Self::start_with(false).await
    }

    async fn start_with(handshake: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (commands, _) = broadcast::channel(64);
        let accepted = Arc::new(AtomicUsize::new(0));

        let task = tokio::spawn(serve(
            listener,
            commands.clone(),
            accepted.clone(),
            handshake,
        ));

        Self {
            addr,
            commands,
            accepted,
            task,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Push `[channel, payload]` to every connected client.
    pub fn push(&self, channel: &str, payload: Value) {
        let _ = self
            .commands
            .send(ServerCommand::Send(json!([channel, payload]).to_string()));
    }

    /// Close every live connection with a close frame.
    pub fn drop_connections(&self) {
        let _ = self.commands.send(ServerCommand::DropConnections);
    }

    /// Number of WebSocket connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    listener: TcpListener,
    commands: broadcast::Sender<ServerCommand>,
    accepted: Arc<AtomicUsize>,
    handshake: bool,
) {
    while let Ok((tcp, _)) = listener.accept().await {
        // Subscribe before the handshake goes out, so a client that has
        // seen it never misses a later push.
        let rx = commands.subscribe();
        accepted.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(handle_connection(tcp, rx, handshake));
    }
}

async fn handle_connection(
    tcp: TcpStream,
    mut commands: broadcast::Receiver<ServerCommand>,
    handshake: bool,
) {
    let Ok(ws) = tokio_tungstenite::accept_async(tcp).await else {
        return;
    };
    let (mut sink, mut stream) = ws.split();

    if handshake {
        let hello = json!({ "token": TOKEN, "settings": { "theme": "dark", "volume": 7 } });
        if sink.send(Message::text(hello.to_string())).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = respond(text.as_str()) {
                        if sink.send(Message::text(reply)).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            command = commands.recv() => match command {
                Ok(ServerCommand::Send(frame)) => {
                    if sink.send(Message::text(frame)).await.is_err() {
                        break;
                    }
                }
                Ok(ServerCommand::DropConnections) => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

/// Answer one `{invoked, args, id}` request, or `None` to stay silent.
fn respond(text: &str) -> Option<String> {
    let request: Value = serde_json::from_str(text).ok()?;
    let id = request.get("id")?.clone();
    let args = request["args"].as_array().cloned().unwrap_or_default();

    let reply = match request["invoked"].as_str()? {
        "echo.args" => json!({ "id": id, "result": args }),
        "math.add" => json!({ "id": id, "result": args.iter().filter_map(Value::as_i64).sum::<i64>() }),
        "fail.always" => json!({ "id": id, "error": { "message": "boom" } }),
        "slow.never" => return None,
        other => json!({ "id": id, "error": { "message": format!("unknown method {other}") } }),
    };
    Some(reply.to_string())
}
