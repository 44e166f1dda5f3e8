//! Invoke client: the public call surface.
//!
//! A call is only accepted while the connection is `Ready`; there is no
//! implicit queueing. Each call settles exactly once with the server's
//! result, the server's error ([`Error::Remote`]), [`Error::Timeout`], or
//! [`Error::ConnectionLost`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::de::DeserializeOwned;
use serde_json::Value;

use cadence_core::prelude::*;
use cadence_core::{MethodPath, Request};
use cadence_transport::Outbound;

use crate::connection::{ConnectionState, Shared};

/// Record of the most recent successful call.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub invoked: MethodPath,
    pub args: Vec<Value>,
    pub at: DateTime<Local>,
}

/// Issues calls over a [`Connection`](crate::Connection).
///
/// Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct InvokeClient {
    shared: Arc<Shared>,
}

impl fmt::Debug for InvokeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvokeClient")
            .field("state", &self.shared.state())
            .finish()
    }
}

impl InvokeClient {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_ready(&self) -> bool {
        self.shared.state().is_ready()
    }

    /// Call `method` (`"service.method"`) with the configured default
    /// timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidMethod`] if `method` is not `service.method`
    /// - [`Error::NotReady`] if the connection is not `Ready`
    /// - [`Error::Remote`] with the server's payload on an error response
    /// - [`Error::Timeout`] if no response arrives in time
    /// - [`Error::ConnectionLost`] if the link drops first
    pub async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        let timeout = self.shared.settings.invoke.timeout();
        self.invoke_with_timeout(method, args, timeout).await
    }

    /// Like [`invoke`](Self::invoke) with a per-call deadline.
    pub async fn invoke_with_timeout(
        &self,
        method: &str,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let invoked = MethodPath::parse(method)?;

        let state = self.shared.state();
        if !state.is_ready() {
            return Err(Error::not_ready(state));
        }

        let (id, mut rx) = self
            .shared
            .table()
            .register(invoked.as_str(), timeout)
            .ok_or_else(|| Error::not_ready(self.shared.state()))?;

        let request = Request::new(id, invoked.clone(), args.clone());
        let sent = match self.shared.link() {
            Some(link) => link.send(Outbound::Request(request)),
            None => Err(Error::NotConnected),
        };
        if let Err(e) = sent {
            self.shared.table().remove(id);
            return Err(e);
        }
        trace!("Invoke: sent {} as id {}", invoked, id);

        let outcome = match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            // The entry was dropped without being settled.
            Ok(Err(_)) => Err(Error::ConnectionLost),
            Err(_elapsed) => {
                // A response may have won the race; whichever settled the
                // entry first decides the outcome.
                self.shared.table().expire(id);
                rx.try_recv()
                    .unwrap_or_else(|_| Err(Error::timeout(invoked.as_str(), timeout)))
            }
        };

        match &outcome {
            Ok(_) => {
                debug!("Invoke: {} (id {}) succeeded", invoked, id);
                self.shared.record_invocation(Invocation {
                    invoked,
                    args,
                    at: Local::now(),
                });
            }
            Err(e) => debug!("Invoke: {} (id {}) failed: {}", invoked, id, e),
        }
        outcome
    }

    /// Call `method` and deserialize its result into `T`.
    ///
    /// # Errors
    ///
    /// Everything [`invoke`](Self::invoke) returns, plus [`Error::Json`] if
    /// the result does not deserialize.
    pub async fn invoke_as<T: DeserializeOwned>(&self, method: &str, args: Vec<Value>) -> Result<T> {
        let value = self.invoke(method, args).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// The most recent successful call on this connection.
    pub fn last_invocation(&self) -> Option<Invocation> {
        self.shared.last_invocation()
    }
}
