//! Append-only conversation timelines.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use super::bus::{SessionUpdate, UpdateBus};
use super::message::TimelineMessage;

#[derive(Default)]
struct Timeline {
    messages: Vec<TimelineMessage>,
    seen: HashSet<String>,
}

/// Per-session message timelines.
///
/// Timelines are keyed by session id once one is known; before that,
/// messages for a fresh process are kept under the process id and adopted
/// into the session timeline when the id arrives. Messages are append-only
/// and deduplicated by `message_id`: a second append with a known id is
/// dropped, never merged.
pub struct TimelineStore {
    timelines: RwLock<HashMap<String, Timeline>>,
    bus: Arc<UpdateBus>,
}

impl TimelineStore {
    /// Creates a store publishing appends to the given bus.
    pub fn new(bus: Arc<UpdateBus>) -> Self {
        Self {
            timelines: RwLock::new(HashMap::new()),
            bus,
        }
    }

    /// Appends a message to the timeline under `key`.
    ///
    /// Returns false when a message with the same id was already appended;
    /// the duplicate is dropped.
    ///
    /// # Arguments
    ///
    /// * `process_id` - The process the message came through, for
    ///   subscription filtering
    /// * `key` - Timeline key (session id, or process id before one exists)
    pub async fn append(&self, process_id: &str, key: &str, message: TimelineMessage) -> bool {
        {
            let mut timelines = self.timelines.write().await;
            let timeline = timelines.entry(key.to_string()).or_default();
            if !timeline.seen.insert(message.message_id.clone()) {
                tracing::debug!(
                    "[Timeline] Dropping duplicate message '{}' for '{}'",
                    message.message_id,
                    key
                );
                return false;
            }
            timeline.messages.push(message.clone());
        }
        self.bus.publish(&SessionUpdate::MessageAppended {
            process_id: process_id.to_string(),
            timeline_key: key.to_string(),
            message,
        });
        true
    }

    /// Moves every message recorded under `provisional` to `target`.
    ///
    /// Used when a process learns its session id after producing messages.
    /// Order is preserved and the dedup sets are merged; adopting into the
    /// same key or from an absent key is a no-op.
    pub async fn adopt(&self, provisional: &str, target: &str) {
        if provisional == target {
            return;
        }
        let mut timelines = self.timelines.write().await;
        let Some(orphan) = timelines.remove(provisional) else {
            return;
        };
        let timeline = timelines.entry(target.to_string()).or_default();
        for message in orphan.messages {
            if timeline.seen.insert(message.message_id.clone()) {
                timeline.messages.push(message);
            }
        }
    }

    /// Snapshot of the messages under `key`, in append order.
    pub async fn snapshot(&self, key: &str) -> Vec<TimelineMessage> {
        let timelines = self.timelines.read().await;
        timelines
            .get(key)
            .map(|timeline| timeline.messages.clone())
            .unwrap_or_default()
    }

    /// Number of messages under `key`.
    pub async fn message_count(&self, key: &str) -> usize {
        let timelines = self.timelines.read().await;
        timelines
            .get(key)
            .map(|timeline| timeline.messages.len())
            .unwrap_or(0)
    }

    /// Whether a message id was already appended under `key`.
    pub async fn contains(&self, key: &str, message_id: &str) -> bool {
        let timelines = self.timelines.read().await;
        timelines
            .get(key)
            .is_some_and(|timeline| timeline.seen.contains(message_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::message::MessageRole;

    fn store() -> TimelineStore {
        TimelineStore::new(Arc::new(UpdateBus::new()))
    }

    #[tokio::test]
    async fn test_append_preserves_order() {
        let store = store();
        for text in ["first", "second", "third"] {
            let appended = store
                .append("p1", "s1", TimelineMessage::new(MessageRole::Assistant, text))
                .await;
            assert!(appended);
        }

        let contents: Vec<String> = store
            .snapshot("s1")
            .await
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_duplicate_ids_are_dropped() {
        let store = store();
        let first = TimelineMessage::with_id("uuid-1", MessageRole::Assistant, "hello");
        let duplicate = TimelineMessage::with_id("uuid-1", MessageRole::Assistant, "hello again");

        assert!(store.append("p1", "s1", first).await);
        assert!(!store.append("p1", "s1", duplicate).await);

        let snapshot = store.snapshot("s1").await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].content, "hello");
        assert!(store.contains("s1", "uuid-1").await);
    }

    #[tokio::test]
    async fn test_adopt_moves_provisional_messages() {
        let store = store();
        store
            .append("p1", "p1", TimelineMessage::new(MessageRole::User, "question"))
            .await;
        store
            .append("p1", "s1", TimelineMessage::new(MessageRole::Assistant, "answer"))
            .await;

        store.adopt("p1", "s1").await;

        let contents: Vec<String> = store
            .snapshot("s1")
            .await
            .into_iter()
            .map(|m| m.content)
            .collect();
        // The target keeps its own order; orphans are appended after it.
        assert_eq!(contents, vec!["answer", "question"]);
        assert_eq!(store.message_count("p1").await, 0);
    }

    #[tokio::test]
    async fn test_adopt_missing_or_same_key_is_noop() {
        let store = store();
        store
            .append("p1", "s1", TimelineMessage::new(MessageRole::User, "hi"))
            .await;

        store.adopt("ghost", "s1").await;
        store.adopt("s1", "s1").await;

        assert_eq!(store.message_count("s1").await, 1);
    }
}
