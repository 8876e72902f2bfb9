#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

//! Configuration change-notification bus for the Portway gateway.
//!
//! Registries publish endpoint and environment changes here; dependent
//! caches (SQL metadata, proxy response cache, documentation) subscribe and
//! invalidate lazily. Each subscriber owns a bounded queue: publishing fans
//! the envelope out to every live feed, a closed feed is pruned on the next
//! publish, and a feed that has fallen behind loses the new envelope rather
//! than stalling the publisher. Invalidation consumers tolerate a missed
//! event because the caches they guard reload lazily anyway.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

/// Identifier assigned to each change event emitted by the gateway.
pub type EventId = u64;

/// Default bound on a single subscriber's queue.
const DEFAULT_QUEUE_DEPTH: usize = 256;

/// Endpoint category inferred from the top-level directory an endpoint
/// definition was discovered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    /// Relational table, view, or table-valued function endpoint.
    Sql,
    /// HTTP upstream proxy endpoint.
    Proxy,
    /// Multi-step orchestration endpoint.
    Composite,
    /// File storage endpoint.
    File,
    /// Inbound webhook persistence endpoint.
    Webhook,
    /// Fixed-content endpoint.
    Static,
}

impl EndpointKind {
    /// Machine-friendly discriminator used in logs and cache keys.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sql => "sql",
            Self::Proxy => "proxy",
            Self::Composite => "composite",
            Self::File => "file",
            Self::Webhook => "webhook",
            Self::Static => "static",
        }
    }
}

/// What happened to a watched definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// The definition appeared for the first time.
    Created,
    /// The definition was re-parsed after a file change.
    Updated,
    /// The definition's file was deleted or failed validation.
    Removed,
}

/// Typed change events surfaced across the gateway.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// An endpoint definition changed on disk.
    EndpointChanged {
        /// Category of the affected endpoint.
        kind: EndpointKind,
        /// Endpoint name, including any namespace prefix.
        name: String,
        /// Nature of the change.
        change: ChangeKind,
    },
    /// An environment settings file changed on disk.
    EnvironmentChanged {
        /// Environment name.
        name: String,
        /// Nature of the change.
        change: ChangeKind,
    },
}

impl Event {
    /// Machine-friendly discriminator for log consumers.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::EndpointChanged { .. } => "endpoint_changed",
            Self::EnvironmentChanged { .. } => "environment_changed",
        }
    }
}

/// Metadata wrapper around events. Each envelope tracks the event id and
/// emission timestamp.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct EventEnvelope {
    /// Monotonic identifier assigned to the wrapped event.
    pub id: EventId,
    /// Timestamp recording when the envelope was produced.
    pub timestamp: DateTime<Utc>,
    /// Wrapped event payload.
    pub event: Event,
}

/// Shared change bus fanning envelopes out to per-subscriber queues.
#[derive(Clone)]
pub struct EventBus {
    shared: Arc<BusShared>,
}

struct BusShared {
    queue_depth: usize,
    sequence: AtomicU64,
    feeds: Mutex<Vec<mpsc::Sender<EventEnvelope>>>,
}

impl EventBus {
    /// Bus whose subscribers buffer up to `queue_depth` undelivered events.
    ///
    /// # Panics
    ///
    /// Panics if `queue_depth` is zero.
    #[must_use]
    pub fn with_queue_depth(queue_depth: usize) -> Self {
        assert!(queue_depth > 0, "subscriber queue depth must be positive");
        Self {
            shared: Arc::new(BusShared {
                queue_depth,
                sequence: AtomicU64::new(0),
                feeds: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Bus with the default subscriber queue depth.
    #[must_use]
    pub fn new() -> Self {
        Self::with_queue_depth(DEFAULT_QUEUE_DEPTH)
    }

    /// Publish a change to every live feed.
    ///
    /// Closed feeds are pruned here; a full feed keeps its place but loses
    /// this envelope, which its consumer absorbs by reloading lazily.
    pub fn publish(&self, event: Event) {
        let id = self.shared.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        };

        let mut feeds = self.lock_feeds();
        feeds.retain(|feed| match feed.try_send(envelope.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(dropped)) => {
                warn!(
                    event = dropped.event.kind(),
                    id = dropped.id,
                    "change feed is full; event not delivered to this subscriber"
                );
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    /// Register a new feed receiving every event published from now on.
    #[must_use]
    pub fn subscribe(&self) -> ChangeFeed {
        let (sender, receiver) = mpsc::channel(self.shared.queue_depth);
        self.lock_feeds().push(sender);
        ChangeFeed { receiver }
    }

    /// Number of registered feeds, counting any not yet pruned.
    #[must_use]
    pub fn feed_count(&self) -> usize {
        self.lock_feeds().len()
    }

    fn lock_feeds(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::Sender<EventEnvelope>>> {
        self.shared.feeds.lock().unwrap_or_else(|err| {
            panic!("failed to lock change feed registry: {err}");
        })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One subscriber's view of the bus.
pub struct ChangeFeed {
    receiver: mpsc::Receiver<EventEnvelope>,
}

impl ChangeFeed {
    /// Await the next change, `None` once every bus handle is gone.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        self.receiver.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint_event(name: &str, change: ChangeKind) -> Event {
        Event::EndpointChanged {
            kind: EndpointKind::Sql,
            name: name.to_string(),
            change,
        }
    }

    #[tokio::test]
    async fn published_events_reach_every_feed_in_order() {
        let bus = EventBus::with_queue_depth(8);
        let mut first_feed = bus.subscribe();
        let mut second_feed = bus.subscribe();

        bus.publish(endpoint_event("Products", ChangeKind::Created));
        bus.publish(endpoint_event("Products", ChangeKind::Updated));

        for feed in [&mut first_feed, &mut second_feed] {
            let created = feed.next().await.expect("created event");
            let updated = feed.next().await.expect("updated event");
            assert!(matches!(
                created.event,
                Event::EndpointChanged {
                    change: ChangeKind::Created,
                    ..
                }
            ));
            assert!(updated.id > created.id);
        }
    }

    #[tokio::test]
    async fn closed_feeds_are_pruned_on_publish() {
        let bus = EventBus::with_queue_depth(8);
        let retained = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.feed_count(), 2);

        bus.publish(Event::EnvironmentChanged {
            name: "prod".to_string(),
            change: ChangeKind::Updated,
        });
        assert_eq!(bus.feed_count(), 1);
        drop(retained);
    }

    #[tokio::test]
    async fn lagging_feed_loses_events_but_keeps_its_place() {
        let bus = EventBus::with_queue_depth(1);
        let mut feed = bus.subscribe();

        bus.publish(endpoint_event("A", ChangeKind::Created));
        // The queue holds one envelope; this one is dropped for the feed.
        bus.publish(endpoint_event("B", ChangeKind::Created));
        assert_eq!(bus.feed_count(), 1);

        let delivered = feed.next().await.expect("first event");
        assert!(matches!(
            delivered.event,
            Event::EndpointChanged { ref name, .. } if name == "A"
        ));

        // The feed still receives whatever comes next.
        bus.publish(endpoint_event("C", ChangeKind::Removed));
        let next = feed.next().await.expect("later event");
        assert!(matches!(
            next.event,
            Event::EndpointChanged { ref name, .. } if name == "C"
        ));
    }

    #[tokio::test]
    async fn feed_ends_when_every_bus_handle_is_dropped() {
        let bus = EventBus::new();
        let mut feed = bus.subscribe();
        bus.publish(endpoint_event("Only", ChangeKind::Created));
        drop(bus);

        assert!(feed.next().await.is_some());
        assert!(feed.next().await.is_none());
    }
}
