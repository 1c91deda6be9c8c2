//! Subscription-based update notifications.
//!
//! Consumers observe registry and timeline changes through an explicit
//! subscription registry keyed by stable identifiers. There is no global
//! callback slot: `subscribe` hands back a `SubscriptionId`, and after
//! `unsubscribe(id)` returns, no further updates are delivered to that
//! handler.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use super::message::TimelineMessage;
use super::model::ActiveSession;

/// Stable handle for a registered subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// A change notification published to subscribers.
///
/// Updates that carry a session snapshot are self-contained; subscribers
/// never need to read back through the registry to interpret them.
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    /// A registry entry was created or patched.
    SessionChanged { session: ActiveSession },
    /// A registry entry was removed.
    SessionClosed { process_id: String },
    /// A resumed process announced its session id; consumers tracking a
    /// current-session pointer for this process should move it.
    SessionAssigned {
        process_id: String,
        session_id: String,
    },
    /// A message was appended to a timeline.
    MessageAppended {
        process_id: String,
        timeline_key: String,
        message: TimelineMessage,
    },
    /// A stream error was surfaced for a process.
    StreamError { process_id: String, error: String },
}

impl SessionUpdate {
    /// The process this update concerns, used for subscription filtering.
    pub fn process_id(&self) -> &str {
        match self {
            Self::SessionChanged { session } => &session.process_id,
            Self::SessionClosed { process_id } => process_id,
            Self::SessionAssigned { process_id, .. } => process_id,
            Self::MessageAppended { process_id, .. } => process_id,
            Self::StreamError { process_id, .. } => process_id,
        }
    }
}

type UpdateHandler = Box<dyn Fn(&SessionUpdate) + Send + Sync>;

struct Subscriber {
    process_id: Option<String>,
    handler: UpdateHandler,
}

/// Fan-out point for session update notifications.
///
/// Handlers run synchronously on the publisher's task while the subscriber
/// table is locked; keep them short and forward into a channel for anything
/// heavier. Because `unsubscribe` takes the same lock, a subscriber that has
/// unsubscribed is guaranteed to receive nothing afterwards. Handlers must
/// not call back into the bus.
pub struct UpdateBus {
    subscribers: Mutex<HashMap<u64, Subscriber>>,
    next_id: AtomicU64,
}

impl UpdateBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Registers a handler and returns its subscription id.
    ///
    /// # Arguments
    ///
    /// * `process_id` - When set, only updates for that process are
    ///   delivered; `None` subscribes to everything.
    /// * `handler` - Invoked on the publisher's task for each update.
    pub fn subscribe<F>(&self, process_id: Option<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&SessionUpdate) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock_subscribers().insert(
            id,
            Subscriber {
                process_id,
                handler: Box::new(handler),
            },
        );
        SubscriptionId(id)
    }

    /// Removes a subscriber.
    ///
    /// Returns false if the id was already gone. Once this returns, the
    /// handler will not be invoked again.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.lock_subscribers().remove(&id.0).is_some()
    }

    /// Delivers an update to every matching subscriber.
    pub fn publish(&self, update: &SessionUpdate) {
        let subscribers = self.lock_subscribers();
        for subscriber in subscribers.values() {
            let matches = subscriber
                .process_id
                .as_deref()
                .is_none_or(|filter| filter == update.process_id());
            if matches {
                (subscriber.handler)(update);
            }
        }
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.lock_subscribers().len()
    }

    fn lock_subscribers(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for UpdateBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    fn closed(process_id: &str) -> SessionUpdate {
        SessionUpdate::SessionClosed {
            process_id: process_id.to_string(),
        }
    }

    #[test]
    fn test_publish_reaches_subscriber() {
        let bus = UpdateBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        bus.subscribe(None, move |_| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(&closed("p1"));
        bus.publish(&closed("p2"));

        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_process_filter() {
        let bus = UpdateBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        bus.subscribe(Some("p1".to_string()), move |update| {
            assert_eq!(update.process_id(), "p1");
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(&closed("p1"));
        bus.publish(&closed("p2"));

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_nothing_delivered_after_unsubscribe() {
        let bus = UpdateBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        let id = bus.subscribe(None, move |_| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(&closed("p1"));
        assert!(bus.unsubscribe(id));
        bus.publish(&closed("p1"));

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.subscriber_count(), 0);
    }
}
