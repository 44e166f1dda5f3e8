//! Connection tests against a real WebSocket server on localhost.

use std::time::Duration;

use futures_util::future::join_all;
use serde_json::json;
use tokio::net::TcpListener;

use cadence_client::{Connection, ConnectionState};
use cadence_core::Error;
use cadence_transport::WebSocketConnector;

use super::mock_server::{MockServer, TOKEN};
use crate::{fast_settings, wait_for_state, within};

async fn connect(server: &MockServer) -> Connection {
    let settings = fast_settings(Some(server.url()));
    let connection = Connection::new(&settings);
    let connector = tokio_test::assert_ok!(WebSocketConnector::new(&server.url()));
    tokio_test::assert_ok!(connection.connect(connector));
    within(connection.wait_ready()).await.unwrap();
    connection
}

#[tokio::test]
async fn test_invoke_round_trip() {
    let server = MockServer::start().await;
    let connection = connect(&server).await;
    let invoker = connection.invoker();

    let sum = invoker.invoke("math.add", vec![json!(2), json!(3)]).await.unwrap();
    assert_eq!(sum, json!(5));

    let echoed = invoker
        .invoke("echo.args", vec![json!("a"), json!({ "b": [1, 2] })])
        .await
        .unwrap();
    assert_eq!(echoed, json!(["a", { "b": [1, 2] }]));

    let total: i64 = invoker
        .invoke_as("math.add", vec![json!(40), json!(2)])
        .await
        .unwrap();
    assert_eq!(total, 42);

    connection.disconnect().await;
}

#[tokio::test]
async fn test_handshake_populates_session_and_settings() {
    let server = MockServer::start().await;
    let connection = connect(&server).await;

    let session = connection.session().expect("session after handshake");
    assert_eq!(session.token, TOKEN);
    assert_eq!(connection.settings()["theme"], json!("dark"));
    assert_eq!(connection.settings()["volume"], json!(7));

    connection.disconnect().await;
    assert!(connection.session().is_none());
}

#[tokio::test]
async fn test_remote_error_is_surfaced_verbatim() {
    let server = MockServer::start().await;
    let connection = connect(&server).await;

    let err = connection
        .invoker()
        .invoke("fail.always", vec![])
        .await
        .unwrap_err();
    match err {
        Error::Remote(payload) => assert_eq!(payload, json!({ "message": "boom" })),
        other => panic!("Expected Remote error, got {:?}", other),
    }

    // The connection is unaffected.
    assert_eq!(connection.state(), ConnectionState::Ready);
    connection.disconnect().await;
}

#[tokio::test]
async fn test_concurrent_calls_each_get_their_own_result() {
    let server = MockServer::start().await;
    let connection = connect(&server).await;
    let invoker = connection.invoker();

    let calls = (0..20).map(|n| {
        let invoker = invoker.clone();
        async move { (n, invoker.invoke("math.add", vec![json!(n), json!(1000)]).await) }
    });

    for (n, result) in join_all(calls).await {
        assert_eq!(result.unwrap(), json!(n + 1000));
    }
    assert_eq!(connection.pending_calls(), 0);

    connection.disconnect().await;
}

#[tokio::test]
async fn test_push_reaches_channel_stream() {
    let server = MockServer::start().await;
    let connection = connect(&server).await;

    let mut progress = connection.channels().stream("progress");
    let mut other = connection.channels().stream("other");

    server.push("progress", json!({ "done": 4 }));
    assert_eq!(within(progress.recv()).await, Some(json!({ "done": 4 })));

    server.push("unrelated", json!(1));
    server.push("other", json!("hi"));
    assert_eq!(within(other.recv()).await, Some(json!("hi")));

    connection.disconnect().await;
}

#[tokio::test]
async fn test_silent_method_times_out() {
    let server = MockServer::start().await;
    let connection = connect(&server).await;

    let err = connection
        .invoker()
        .invoke_with_timeout("slow.never", vec![], Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }), "got {:?}", err);
    assert_eq!(connection.pending_calls(), 0);

    connection.disconnect().await;
}

#[tokio::test]
async fn test_server_drop_rejects_calls_then_resumes() {
    let server = MockServer::start().await;
    let connection = connect(&server).await;
    let mut progress = connection.channels().stream("progress");

    let invoker = connection.invoker();
    let pending = tokio::spawn(async move { invoker.invoke("slow.never", vec![]).await });
    within(async {
        while connection.pending_calls() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    server.drop_connections();

    let err = within(pending).await.unwrap().unwrap_err();
    assert!(matches!(err, Error::ConnectionLost), "got {:?}", err);
    assert_ne!(connection.state(), ConnectionState::Ready);

    within(connection.wait_ready()).await.unwrap();
    assert_eq!(server.accepted(), 2);

    // Both the subscription and the call surface work on the new link.
    server.push("progress", json!(99));
    assert_eq!(within(progress.recv()).await, Some(json!(99)));
    let sum = connection
        .invoker()
        .invoke("math.add", vec![json!(1), json!(1)])
        .await
        .unwrap();
    assert_eq!(sum, json!(2));

    connection.disconnect().await;
}

#[tokio::test]
async fn test_calls_rejected_until_handshake() {
    let server = MockServer::start_silent().await;
    let settings = fast_settings(Some(server.url()));
    let connection = Connection::new(&settings);
    connection
        .connect(WebSocketConnector::new(&server.url()).unwrap())
        .unwrap();

    wait_for_state(&connection, |s| *s == ConnectionState::AwaitingHandshake).await;
    let err = connection
        .invoker()
        .invoke("math.add", vec![json!(1)])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotReady { .. }), "got {:?}", err);

    // The handshake deadline forces a fresh connection attempt.
    wait_for_state(&connection, |s| matches!(s, ConnectionState::Reconnecting { .. })).await;

    connection.disconnect().await;
    assert_eq!(connection.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_unreachable_server_gives_up_after_max_attempts() {
    // Reserve a port, then free it so nothing is listening there.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    drop(listener);

    let mut settings = fast_settings(Some(url.clone()));
    settings.connection.max_reconnect_attempts = Some(2);
    let connection = Connection::new(&settings);
    connection
        .connect(WebSocketConnector::new(&url).unwrap())
        .unwrap();

    wait_for_state(&connection, |s| *s == ConnectionState::Disconnected).await;

    let err = connection.wait_ready().await.unwrap_err();
    assert!(matches!(err, Error::NotReady { .. }), "got {:?}", err);
}
