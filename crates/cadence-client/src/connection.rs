//! Connection manager.
//!
//! A [`Connection`] owns one logical connection to a backend. A background
//! task drives the physical links and this state machine:
//!
//! ```text
//!  Disconnected ──connect()──▶ Connecting ──link open──▶ AwaitingHandshake
//!       ▲                         ▲                            │ handshake
//!       │ disconnect()            │ backoff                    ▼
//!       └──────── (any) ◀───── Reconnecting ◀──link lost──── Ready
//! ```
//!
//! Every transition into `Reconnecting` rejects all outstanding calls with
//! [`Error::ConnectionLost`]. Push-channel listeners are kept and
//! re-registered once the next link is ready.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Local};
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use cadence_core::prelude::*;
use cadence_core::{InboundMessage, SettingsSnapshot};
use cadence_transport::{Connector, Link, LinkHandle, TransportEvent};

use crate::channels::EventChannels;
use crate::config::{ConnectionSettings, Settings};
use crate::correlation::CorrelationTable;
use crate::invoke::{InvokeClient, Invocation};

/// How often the lifecycle task rejects calls whose deadline has passed.
const STALE_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Reconnect delays never go below this, whatever the jitter.
pub const MIN_RECONNECT_DELAY: Duration = Duration::from_millis(25);

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Current state of a [`Connection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected and not trying to.
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// The link is open; waiting for the server's handshake.
    AwaitingHandshake,
    /// Handshake received; calls are accepted.
    Ready,
    /// The link was lost; waiting out the backoff before the next attempt.
    Reconnecting {
        /// Consecutive attempt number (1-indexed).
        attempt: u32,
    },
}

impl ConnectionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionState::Ready)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::AwaitingHandshake => write!(f, "awaiting handshake"),
            ConnectionState::Ready => write!(f, "ready"),
            ConnectionState::Reconnecting { attempt } => {
                write!(f, "reconnecting (attempt {attempt})")
            }
        }
    }
}

/// What the server told us in its handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub token: String,
    pub settings: SettingsSnapshot,
    pub established_at: DateTime<Local>,
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// State shared between the lifecycle task and the public handles.
///
/// Each structure has its own lock, held for one dispatch step only.
pub(crate) struct Shared {
    pub(crate) settings: Settings,
    state: watch::Sender<ConnectionState>,
    session: watch::Sender<Option<Session>>,
    remote_settings: watch::Sender<SettingsSnapshot>,
    table: Mutex<CorrelationTable>,
    link: Mutex<Option<LinkHandle>>,
    pub(crate) channels: EventChannels,
    last_invocation: Mutex<Option<Invocation>>,
}

impl Shared {
    fn new(settings: Settings) -> Self {
        Self {
            settings,
            state: watch::Sender::new(ConnectionState::Disconnected),
            session: watch::Sender::new(None),
            remote_settings: watch::Sender::new(SettingsSnapshot::new()),
            table: Mutex::new(CorrelationTable::new()),
            link: Mutex::new(None),
            channels: EventChannels::new(),
            last_invocation: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    fn set_state(&self, next: ConnectionState) {
        let prev = self.state.send_replace(next.clone());
        if prev != next {
            info!("Connection: {} -> {}", prev, next);
        }
    }

    pub(crate) fn table(&self) -> MutexGuard<'_, CorrelationTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn link(&self) -> Option<LinkHandle> {
        self.link.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_link(&self, link: Option<LinkHandle>) {
        *self.link.lock().unwrap_or_else(|e| e.into_inner()) = link;
    }

    pub(crate) fn record_invocation(&self, invocation: Invocation) {
        *self.last_invocation.lock().unwrap_or_else(|e| e.into_inner()) = Some(invocation);
    }

    pub(crate) fn last_invocation(&self) -> Option<Invocation> {
        self.last_invocation
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Handshake received on the current link.
    fn on_handshake(&self, token: String, settings: SettingsSnapshot, link: &LinkHandle) {
        self.table().open();
        self.channels.attach_link(link.clone());
        self.remote_settings.send_replace(settings.clone());
        self.session.send_replace(Some(Session {
            token,
            settings,
            established_at: Local::now(),
        }));
        self.set_state(ConnectionState::Ready);
    }

    /// The current link is gone: reject in-flight calls, keep listeners.
    fn on_link_lost(&self) {
        self.set_link(None);
        self.channels.detach_link();
        let rejected = self.table().close();
        if rejected > 0 {
            warn!(
                "Connection lost: rejected {} in-flight call(s) with ConnectionLost",
                rejected
            );
        }
        self.session.send_replace(None);
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// Messages from the public API to the lifecycle task.
#[derive(Debug)]
enum ClientCommand {
    /// Drop the current link and go through the reconnect path.
    Reconnect,
    /// Close the link and stop.
    Disconnect,
}

struct TaskHandle {
    cmd_tx: mpsc::UnboundedSender<ClientCommand>,
    join: JoinHandle<()>,
}

/// One logical connection to a backend.
///
/// Create it with [`Connection::new`], start it with
/// [`Connection::connect`], then hand [`Connection::invoker`] and
/// [`Connection::channels`] to whoever needs them. Dropping the
/// `Connection` stops the lifecycle task.
pub struct Connection {
    shared: Arc<Shared>,
    task: Mutex<Option<TaskHandle>>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("pending_calls", &self.shared.table().pending_count())
            .field("channels", &self.shared.channels.channels())
            .finish()
    }
}

impl Connection {
    pub fn new(settings: &Settings) -> Self {
        Self {
            shared: Arc::new(Shared::new(settings.clone())),
            task: Mutex::new(None),
        }
    }

    fn task(&self) -> MutexGuard<'_, Option<TaskHandle>> {
        self.task.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start connecting through `connector`.
    ///
    /// Returns as soon as the lifecycle task is running; use
    /// [`wait_ready`](Self::wait_ready) or [`state_changes`](Self::state_changes)
    /// to follow progress. Failed attempts are retried with backoff.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyConnected`] if a lifecycle task is already running.
    pub fn connect<C>(&self, connector: C) -> Result<()>
    where
        C: Connector + Send + Sync + 'static,
    {
        let mut task = self.task();
        if task.as_ref().is_some_and(|t| !t.join.is_finished()) {
            return Err(Error::AlreadyConnected);
        }

        info!("Connecting to {}", connector.target());
        self.shared.set_state(ConnectionState::Connecting);

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let join = tokio::spawn(run_connection_task(
            Arc::clone(&self.shared),
            connector,
            cmd_rx,
        ));
        *task = Some(TaskHandle { cmd_tx, join });
        Ok(())
    }

    /// Close the connection and stop reconnecting.
    ///
    /// Outstanding calls are rejected with [`Error::ConnectionLost`].
    /// Resolves once the lifecycle task has exited.
    pub async fn disconnect(&self) {
        let task = self.task().take();
        match task {
            Some(TaskHandle { cmd_tx, join }) => {
                let _ = cmd_tx.send(ClientCommand::Disconnect);
                if let Err(e) = join.await {
                    warn!("Connection task ended abnormally: {}", e);
                }
            }
            None => self.shared.set_state(ConnectionState::Disconnected),
        }
    }

    /// Drop the current link as if the peer had closed it.
    ///
    /// Outstanding calls are rejected and the usual backoff/reconnect path
    /// runs. Listeners are kept.
    ///
    /// # Errors
    ///
    /// [`Error::NotConnected`] if no lifecycle task is running.
    pub fn reconnect(&self) -> Result<()> {
        match self.task().as_ref() {
            Some(task) => task
                .cmd_tx
                .send(ClientCommand::Reconnect)
                .map_err(|_| Error::NotConnected),
            None => Err(Error::NotConnected),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Watch every state transition.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Resolve once the connection is `Ready`.
    ///
    /// # Errors
    ///
    /// [`Error::NotReady`] if the connection is (or becomes) `Disconnected`
    /// first, e.g. after giving up on reconnecting.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut rx = self.shared.state.subscribe();
        let state = rx
            .wait_for(|s| matches!(s, ConnectionState::Ready | ConnectionState::Disconnected))
            .await
            .map_err(|_| Error::ChannelClosed)?
            .clone();

        match state {
            ConnectionState::Ready => Ok(()),
            other => Err(Error::not_ready(other)),
        }
    }

    /// The handshake of the current link, if it is ready.
    pub fn session(&self) -> Option<Session> {
        self.shared.session.borrow().clone()
    }

    /// Latest settings snapshot published by the server.
    ///
    /// Kept across reconnects until the next handshake replaces it.
    pub fn settings(&self) -> SettingsSnapshot {
        self.shared.remote_settings.borrow().clone()
    }

    /// Watch settings snapshots as each handshake publishes them.
    pub fn settings_changes(&self) -> watch::Receiver<SettingsSnapshot> {
        self.shared.remote_settings.subscribe()
    }

    /// Local configuration this connection was built with.
    pub fn config(&self) -> &Settings {
        &self.shared.settings
    }

    /// A call surface bound to this connection.
    pub fn invoker(&self) -> InvokeClient {
        InvokeClient::new(Arc::clone(&self.shared))
    }

    /// The push-channel registry of this connection.
    pub fn channels(&self) -> EventChannels {
        self.shared.channels.clone()
    }

    pub fn pending_calls(&self) -> usize {
        self.shared.table().pending_count()
    }
}

// ---------------------------------------------------------------------------
// Lifecycle task
// ---------------------------------------------------------------------------

/// How one link ended.
#[derive(Debug, PartialEq, Eq)]
enum LinkEnd {
    /// Explicit disconnect, or the `Connection` was dropped.
    Shutdown,
    /// The link closed (or never opened); reconnect.
    Lost { was_ready: bool },
}

async fn run_connection_task<C>(
    shared: Arc<Shared>,
    connector: C,
    mut cmd_rx: mpsc::UnboundedReceiver<ClientCommand>,
) where
    C: Connector + Send + Sync,
{
    let target = connector.target();
    let conn = shared.settings.connection.clone();
    let mut attempt: u32 = 0;

    loop {
        shared.set_state(ConnectionState::Connecting);

        let connected = tokio::select! {
            result = connector.connect() => Some(result),
            cmd = cmd_rx.recv() => match cmd {
                Some(ClientCommand::Reconnect) => {
                    debug!("Reconnect requested while connecting; continuing");
                    None
                }
                Some(ClientCommand::Disconnect) | None => break,
            },
        };

        let end = match connected {
            Some(Ok(link)) => run_link(&shared, &conn, link, &mut cmd_rx).await,
            Some(Err(e)) => {
                warn!("Connection to {} failed: {}", target, e);
                LinkEnd::Lost { was_ready: false }
            }
            None => LinkEnd::Lost { was_ready: false },
        };

        match end {
            LinkEnd::Shutdown => break,
            LinkEnd::Lost { was_ready } => {
                if was_ready {
                    attempt = 0;
                }
                attempt += 1;
            }
        }

        if let Some(max) = conn.max_reconnect_attempts {
            if attempt > max {
                error!(
                    "Connection to {}: giving up after {} reconnect attempt(s)",
                    target, max
                );
                break;
            }
        }

        // Leave Ready before rejecting, so woken callers cannot race back in.
        shared.set_state(ConnectionState::Reconnecting { attempt });
        shared.on_link_lost();

        let delay = apply_jitter(
            compute_backoff(attempt, conn.initial_backoff(), conn.max_backoff()),
            conn.backoff_jitter,
            &mut rand::thread_rng(),
        );
        warn!(
            "Connection to {} lost, retrying in {:?} (attempt {})",
            target, delay, attempt
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            cmd = cmd_rx.recv() => match cmd {
                Some(ClientCommand::Reconnect) => debug!("Reconnect requested; skipping backoff"),
                Some(ClientCommand::Disconnect) | None => break,
            },
        }
    }

    shared.set_state(ConnectionState::Disconnected);
    shared.on_link_lost();
    debug!("Connection task for {} exiting", target);
}

/// Drive one open link until it closes or the task is told to stop.
async fn run_link(
    shared: &Shared,
    conn: &ConnectionSettings,
    link: Link,
    cmd_rx: &mut mpsc::UnboundedReceiver<ClientCommand>,
) -> LinkEnd {
    let Link { handle, mut events } = link;
    shared.set_link(Some(handle.clone()));
    shared.set_state(ConnectionState::AwaitingHandshake);

    let handshake_deadline = tokio::time::sleep(conn.handshake_timeout());
    tokio::pin!(handshake_deadline);

    let mut sweep = tokio::time::interval(STALE_SWEEP_INTERVAL);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    sweep.tick().await; // consume the immediate first tick

    let mut ready = false;

    loop {
        tokio::select! {
            // ── Inbound traffic ─────────────────────────────────────────
            event = events.recv() => match event {
                Some(TransportEvent::Message(message)) => {
                    dispatch(shared, message, &mut ready, &handle);
                }
                Some(TransportEvent::Closed(reason)) => {
                    info!("Connection: link {}", reason);
                    return LinkEnd::Lost { was_ready: ready };
                }
                None => return LinkEnd::Lost { was_ready: ready },
            },

            // ── Handshake deadline ──────────────────────────────────────
            _ = &mut handshake_deadline, if !ready => {
                warn!(
                    "Connection: no handshake within {:?}, dropping link",
                    conn.handshake_timeout()
                );
                handle.close();
                return LinkEnd::Lost { was_ready: false };
            }

            // ── Stale-call sweep ────────────────────────────────────────
            _ = sweep.tick() => {
                let expired = shared.table().expire_overdue(Instant::now());
                if !expired.is_empty() {
                    debug!("Connection: expired {} overdue call(s): {:?}", expired.len(), expired);
                }
            }

            // ── Commands from the public API ────────────────────────────
            cmd = cmd_rx.recv() => match cmd {
                Some(ClientCommand::Reconnect) => {
                    info!("Connection: forced reconnect");
                    handle.close();
                    return LinkEnd::Lost { was_ready: ready };
                }
                Some(ClientCommand::Disconnect) | None => {
                    handle.close();
                    return LinkEnd::Shutdown;
                }
            },
        }
    }
}

/// Route one inbound message: responses to the correlation table, pushes
/// to the channel registry, the handshake to the state machine.
fn dispatch(shared: &Shared, message: InboundMessage, ready: &mut bool, link: &LinkHandle) {
    match message {
        InboundMessage::Handshake(handshake) => {
            if *ready {
                warn!("Connection: ignoring repeated handshake on a ready link");
            } else {
                shared.on_handshake(handshake.token, handshake.settings, link);
                *ready = true;
            }
        }
        InboundMessage::Response(response) => {
            if !shared.table().resolve(response.id, response.outcome) {
                debug!(
                    "Connection: dropping response for unknown or settled id {}",
                    response.id
                );
            }
        }
        InboundMessage::Push(event) => {
            if *ready {
                shared.channels.deliver(&event);
            } else {
                debug!(
                    "Connection: dropping push on '{}' received before handshake",
                    event.channel
                );
            }
        }
        InboundMessage::Unknown(description) => {
            debug!("Connection: ignoring unrecognized frame: {}", description);
        }
    }
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Exponential backoff for reconnect attempt `attempt` (1-indexed).
///
/// The formula is `initial * 2^(attempt-1)`, capped at `max`.
pub fn compute_backoff(attempt: u32, initial: Duration, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let multiplier: u64 = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
    let millis = (initial.as_millis() as u64).saturating_mul(multiplier);
    Duration::from_millis(millis.min(max.as_millis() as u64))
}

/// Shave a random share of at most `jitter` off `delay`, never going below
/// [`MIN_RECONNECT_DELAY`].
pub fn apply_jitter<R: Rng>(delay: Duration, jitter: f64, rng: &mut R) -> Duration {
    let jittered = if jitter > 0.0 {
        let share = rng.gen_range(0.0..=jitter.min(1.0));
        delay.mul_f64(1.0 - share)
    } else {
        delay
    };
    jittered.max(MIN_RECONNECT_DELAY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    // -- ConnectionState -----------------------------------------------------

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
        assert_eq!(
            ConnectionState::AwaitingHandshake.to_string(),
            "awaiting handshake"
        );
        assert_eq!(
            ConnectionState::Reconnecting { attempt: 3 }.to_string(),
            "reconnecting (attempt 3)"
        );
    }

    #[test]
    fn test_only_ready_is_ready() {
        assert!(ConnectionState::Ready.is_ready());
        assert!(!ConnectionState::AwaitingHandshake.is_ready());
        assert!(!ConnectionState::Reconnecting { attempt: 1 }.is_ready());
    }

    // -- compute_backoff -----------------------------------------------------

    const INITIAL: Duration = Duration::from_millis(500);
    const MAX: Duration = Duration::from_secs(30);

    #[test]
    fn test_backoff_doubles_per_attempt() {
        assert_eq!(compute_backoff(1, INITIAL, MAX), Duration::from_millis(500));
        assert_eq!(compute_backoff(2, INITIAL, MAX), Duration::from_secs(1));
        assert_eq!(compute_backoff(3, INITIAL, MAX), Duration::from_secs(2));
        assert_eq!(compute_backoff(4, INITIAL, MAX), Duration::from_secs(4));
    }

    #[test]
    fn test_backoff_capped_at_max() {
        assert_eq!(compute_backoff(7, INITIAL, MAX), MAX);
        assert_eq!(compute_backoff(200, INITIAL, MAX), MAX);
    }

    #[test]
    fn test_backoff_attempt_zero_is_initial() {
        assert_eq!(compute_backoff(0, INITIAL, MAX), INITIAL);
    }

    // -- apply_jitter --------------------------------------------------------

    #[test]
    fn test_jitter_stays_within_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let delay = Duration::from_secs(4);
        for _ in 0..1000 {
            let jittered = apply_jitter(delay, 0.2, &mut rng);
            assert!(jittered <= delay);
            assert!(jittered >= delay.mul_f64(0.8));
        }
    }

    #[test]
    fn test_zero_jitter_is_identity() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(
            apply_jitter(Duration::from_millis(750), 0.0, &mut rng),
            Duration::from_millis(750)
        );
    }

    #[test]
    fn test_jitter_never_below_floor() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            assert!(apply_jitter(Duration::from_millis(30), 0.5, &mut rng) >= MIN_RECONNECT_DELAY);
        }
    }

    // -- Connection ----------------------------------------------------------

    #[tokio::test]
    async fn test_new_connection_is_disconnected() {
        let connection = Connection::new(&Settings::default());
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert!(connection.session().is_none());
        assert!(connection.settings().is_empty());
        assert!(matches!(connection.reconnect(), Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_wait_ready_on_idle_connection_fails() {
        let connection = Connection::new(&Settings::default());
        let err = connection.wait_ready().await.unwrap_err();
        assert!(matches!(err, Error::NotReady { .. }));
    }

    #[tokio::test]
    async fn test_disconnect_without_task_is_noop() {
        let connection = Connection::new(&Settings::default());
        connection.disconnect().await;
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }
}
