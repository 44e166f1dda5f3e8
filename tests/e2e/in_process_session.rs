//! Connection tests over the in-process host channel.
//!
//! The backend here is a task that accepts [`HostPort`]s from a
//! [`HostAcceptor`], handshakes, and answers structured frames directly.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::sync::mpsc;

use cadence_client::{Connection, ConnectionState};
use cadence_core::{Error, Handshake};
use cadence_transport::{HostAcceptor, HostFrame, HostPort, InProcessConnector};

use crate::{fast_settings, within};

/// Listen/Unlisten frames seen by the host, in order.
type ListenLog = Arc<Mutex<Vec<HostFrame>>>;

fn spawn_host() -> (InProcessConnector<HostAcceptor>, ListenLog) {
    let (acceptor, ports) = HostAcceptor::channel();
    let log = ListenLog::default();
    tokio::spawn(accept_ports(ports, log.clone()));
    (InProcessConnector::new(acceptor), log)
}

async fn accept_ports(mut ports: mpsc::UnboundedReceiver<HostPort>, log: ListenLog) {
    while let Some(port) = ports.recv().await {
        tokio::spawn(serve_port(port, log.clone()));
    }
}

async fn serve_port(port: HostPort, log: ListenLog) {
    let HostPort { tx, mut rx } = port;
    let mut settings = Map::new();
    settings.insert("host".to_string(), json!("desktop"));
    let _ = tx.send(HostFrame::Handshake(Handshake {
        token: "in-process".to_string(),
        settings,
    }));

    while let Some(frame) = rx.recv().await {
        match frame {
            HostFrame::Invoke {
                id,
                service,
                method,
                args,
            } => {
                let outcome = match (service.as_str(), method.as_str()) {
                    ("math", "add") => Ok(json!(args.iter().filter_map(Value::as_i64).sum::<i64>())),
                    ("host", "quit") => return,
                    _ => Err(json!({ "message": format!("no handler for {service}.{method}") })),
                };
                let _ = tx.send(HostFrame::Reply { id, outcome });
            }
            HostFrame::Listen { event } => {
                log.lock().unwrap().push(HostFrame::Listen {
                    event: event.clone(),
                });
                // Emissions carry the emitter context first, then the payload.
                let _ = tx.send(HostFrame::Emit {
                    args: vec![json!({ "source": "host" }), json!({ "listening": event })],
                    event,
                });
            }
            unlisten @ HostFrame::Unlisten { .. } => log.lock().unwrap().push(unlisten),
            _ => {}
        }
    }
}

async fn ready_connection() -> (Connection, ListenLog) {
    let (connector, log) = spawn_host();
    let connection = Connection::new(&fast_settings(None));
    connection.connect(connector).unwrap();
    within(connection.wait_ready()).await.unwrap();
    (connection, log)
}

#[tokio::test]
async fn test_invoke_splits_service_and_method() {
    let (connection, _log) = ready_connection().await;
    let invoker = connection.invoker();

    let sum = invoker.invoke("math.add", vec![json!(20), json!(22)]).await.unwrap();
    assert_eq!(sum, json!(42));

    let err = invoker.invoke("math.divide", vec![]).await.unwrap_err();
    match err {
        Error::Remote(payload) => {
            assert_eq!(payload["message"], json!("no handler for math.divide"))
        }
        other => panic!("Expected Remote error, got {:?}", other),
    }

    assert_eq!(connection.session().unwrap().token, "in-process");
    assert_eq!(connection.settings()["host"], json!("desktop"));
    connection.disconnect().await;
}

#[tokio::test]
async fn test_listen_registers_once_and_delivers_payload() {
    let (connection, log) = ready_connection().await;

    let mut first = connection.channels().stream("progress");
    let mut second = connection.channels().stream("progress");

    // The host emits once per Listen; both local listeners see it.
    let expected = Some(json!({ "listening": "progress" }));
    assert_eq!(within(first.recv()).await, expected);
    assert_eq!(within(second.recv()).await, expected);

    drop(first);
    drop(second);

    within(async {
        while log.lock().unwrap().len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            HostFrame::Listen {
                event: "progress".to_string()
            },
            HostFrame::Unlisten {
                event: "progress".to_string()
            },
        ]
    );
    connection.disconnect().await;
}

#[tokio::test]
async fn test_host_dropping_port_loses_call_and_reconnects() {
    let (connection, log) = ready_connection().await;
    let mut progress = connection.channels().stream("progress");
    assert!(within(progress.recv()).await.is_some());

    let err = connection
        .invoker()
        .invoke("host.quit", vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ConnectionLost), "got {:?}", err);

    within(connection.wait_ready()).await.unwrap();
    assert_eq!(connection.state(), ConnectionState::Ready);

    // The live subscription was registered again on the new port.
    assert_eq!(
        within(progress.recv()).await,
        Some(json!({ "listening": "progress" }))
    );
    let listens = log
        .lock()
        .unwrap()
        .iter()
        .filter(|frame| matches!(frame, HostFrame::Listen { .. }))
        .count();
    assert_eq!(listens, 2);

    connection.disconnect().await;
}
