//! Event channel registry.
//!
//! One shared feed per push channel, reference-counted by listener. The
//! first listener on a channel creates the feed (and registers it with the
//! transport, if one is attached); the last one to leave tears it down.
//! Feeds survive reconnects: [`EventChannels::attach_link`] re-registers
//! every live feed with the new link.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;
use tokio::sync::mpsc;

use cadence_core::prelude::*;
use cadence_core::PushEvent;
use cadence_transport::{LinkHandle, Outbound};

/// Callback invoked with each payload pushed on a channel.
pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Default)]
struct Feed {
    // Keyed by subscription order so delivery order is stable.
    listeners: BTreeMap<u64, Listener>,
}

#[derive(Default)]
struct Registry {
    feeds: HashMap<String, Feed>,
    link: Option<LinkHandle>,
    next_listener_id: u64,
}

impl Registry {
    fn register_with_link(&self, message: Outbound) {
        if let Some(link) = &self.link {
            if let Err(e) = link.send(message) {
                debug!("Channel registration not sent: {}", e);
            }
        }
    }
}

/// Registry of push-channel listeners for one connection.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone, Default)]
pub struct EventChannels {
    inner: Arc<Mutex<Registry>>,
}

impl fmt::Debug for EventChannels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventChannels")
            .field("channels", &self.channels())
            .finish()
    }
}

impl EventChannels {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add `listener` to `channel`.
    ///
    /// Listeners may be added in any connection state; they receive nothing
    /// until the connection is ready. Dropping the returned [`Subscription`]
    /// removes the listener.
    pub fn subscribe<F>(&self, channel: &str, listener: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let mut registry = self.lock();
        let id = registry.next_listener_id;
        registry.next_listener_id += 1;

        let created = !registry.feeds.contains_key(channel);
        registry
            .feeds
            .entry(channel.to_string())
            .or_default()
            .listeners
            .insert(id, Arc::new(listener));

        if created {
            debug!("Channel '{}': feed created", channel);
            registry.register_with_link(Outbound::Listen(channel.to_string()));
        }

        Subscription {
            registry: Arc::downgrade(&self.inner),
            channel: channel.to_string(),
            id,
            active: AtomicBool::new(true),
        }
    }

    /// Subscribe and receive payloads through a channel instead of a callback.
    pub fn stream(&self, channel: &str) -> ChannelStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(channel, move |payload| {
            let _ = tx.send(payload.clone());
        });
        ChannelStream { subscription, rx }
    }

    /// Deliver a push event to every listener of its channel, in
    /// subscription order. Returns how many listeners were called.
    pub fn deliver(&self, event: &PushEvent) -> usize {
        // Listeners run outside the lock so they may (un)subscribe.
        let listeners: Vec<Listener> = match self.lock().feeds.get(&event.channel) {
            Some(feed) => feed.listeners.values().cloned().collect(),
            None => {
                trace!("Channel '{}': no listeners, event dropped", event.channel);
                return 0;
            }
        };

        for listener in &listeners {
            listener(&event.payload);
        }
        listeners.len()
    }

    /// Attach a freshly ready link and register every live feed with it.
    pub fn attach_link(&self, link: LinkHandle) {
        let mut registry = self.lock();
        registry.link = Some(link);

        let channels: Vec<String> = registry.feeds.keys().cloned().collect();
        for channel in channels {
            registry.register_with_link(Outbound::Listen(channel));
        }
    }

    /// Forget the current link. Feeds and listeners are kept.
    pub fn detach_link(&self) {
        self.lock().link = None;
    }

    pub fn listener_count(&self, channel: &str) -> usize {
        self.lock()
            .feeds
            .get(channel)
            .map_or(0, |feed| feed.listeners.len())
    }

    /// Number of live feeds.
    pub fn channel_count(&self) -> usize {
        self.lock().feeds.len()
    }

    /// Names of live feeds, sorted.
    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().feeds.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Handle for one listener. Unsubscribes on drop.
#[must_use = "dropping a Subscription unsubscribes its listener"]
pub struct Subscription {
    registry: Weak<Mutex<Registry>>,
    channel: String,
    id: u64,
    active: AtomicBool,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Remove this listener. Calling it again has no effect.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        let Some(inner) = self.registry.upgrade() else {
            return;
        };
        let mut registry = inner.lock().unwrap_or_else(|e| e.into_inner());

        let now_empty = match registry.feeds.get_mut(&self.channel) {
            Some(feed) => {
                feed.listeners.remove(&self.id);
                feed.listeners.is_empty()
            }
            None => false,
        };

        if now_empty {
            registry.feeds.remove(&self.channel);
            debug!("Channel '{}': last listener left, feed torn down", self.channel);
            registry.register_with_link(Outbound::Unlisten(self.channel.clone()));
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Payloads of one channel, received through an mpsc queue.
#[derive(Debug)]
pub struct ChannelStream {
    subscription: Subscription,
    rx: mpsc::UnboundedReceiver<Value>,
}

impl ChannelStream {
    /// Next payload pushed on this channel.
    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }

    pub fn channel(&self) -> &str {
        self.subscription.channel()
    }
}
