//! End-to-end tests for cadence
//!
//! Run with: cargo test --test e2e

// Test submodules
mod e2e {
    mod in_process_session;
    pub mod mock_server;
    mod websocket_session;
}

use std::future::Future;
use std::time::Duration;

use cadence_client::{Connection, ConnectionState, Settings};

// ─────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────

/// Settings with short backoff and timeouts so reconnect paths run fast.
pub fn fast_settings(url: Option<String>) -> Settings {
    let mut settings = Settings::default();
    settings.connection.url = url;
    settings.connection.initial_backoff_ms = 50;
    settings.connection.max_backoff_ms = 200;
    settings.connection.backoff_jitter = 0.0;
    settings.connection.handshake_timeout_ms = 1_000;
    settings.invoke.timeout_ms = 2_000;
    settings
}

/// Fail the test instead of hanging when `future` does not finish.
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out waiting for the connection")
}

/// Wait until the connection reports a state matching `predicate`.
pub async fn wait_for_state(
    connection: &Connection,
    predicate: impl FnMut(&ConnectionState) -> bool,
) -> ConnectionState {
    let mut states = connection.state_changes();
    let state = within(states.wait_for(predicate))
        .await
        .expect("connection task dropped its state channel");
    state.clone()
}
