//! Concurrent registry of actively running assistant processes.

use std::collections::HashMap;

use tokio::sync::RwLock;

use super::bus::{SessionUpdate, UpdateBus};
use super::model::{ActiveSession, SessionPatch};
use std::sync::Arc;

/// The authoritative table of `process_id → ActiveSession`.
///
/// `ActiveSessionRegistry` is responsible for:
/// - Tracking every externally running assistant process
/// - Applying atomic per-key merge patches
/// - Answering ownership queries (which processes serve a session)
/// - Publishing change notifications through the update bus
///
/// All mutations run under the write lock, so a patch is applied as a unit
/// and reads always reflect the most recently applied write for a key.
pub struct ActiveSessionRegistry {
    /// In-memory session table
    sessions: RwLock<HashMap<String, ActiveSession>>,
    /// Notification fan-out for registry changes
    bus: Arc<UpdateBus>,
}

impl ActiveSessionRegistry {
    /// Creates a registry publishing changes to the given bus.
    pub fn new(bus: Arc<UpdateBus>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            bus,
        }
    }

    /// Inserts or replaces an entry wholesale.
    pub async fn upsert(&self, entry: ActiveSession) {
        let snapshot = entry.clone();
        {
            let mut sessions = self.sessions.write().await;
            sessions.insert(entry.process_id.clone(), entry);
        }
        self.bus.publish(&SessionUpdate::SessionChanged { session: snapshot });
    }

    /// Applies a merge patch to an existing entry.
    ///
    /// Returns false without side effects if the key is absent. A patch can
    /// therefore never resurrect an entry that was removed by a stop, which
    /// is what makes late coalesced flushes safe to discard.
    ///
    /// # Arguments
    ///
    /// * `process_id` - The entry to patch
    /// * `patch` - Fields to merge; `None` fields are untouched
    pub async fn update(&self, process_id: &str, patch: SessionPatch) -> bool {
        let snapshot = {
            let mut sessions = self.sessions.write().await;
            match sessions.get_mut(process_id) {
                Some(entry) => {
                    entry.apply_patch(patch);
                    entry.clone()
                }
                None => {
                    tracing::debug!(
                        "[Registry] Dropping patch for unknown process: {}",
                        process_id
                    );
                    return false;
                }
            }
        };
        self.bus.publish(&SessionUpdate::SessionChanged { session: snapshot });
        true
    }

    /// Removes an entry, returning it if it existed.
    ///
    /// The removal is visible to all readers before this returns; the
    /// session-closed notification follows.
    pub async fn remove(&self, process_id: &str) -> Option<ActiveSession> {
        let removed = {
            let mut sessions = self.sessions.write().await;
            sessions.remove(process_id)
        };
        if removed.is_some() {
            self.bus.publish(&SessionUpdate::SessionClosed {
                process_id: process_id.to_string(),
            });
        }
        removed
    }

    /// Returns a clone of the entry for a process, if present.
    pub async fn get(&self, process_id: &str) -> Option<ActiveSession> {
        let sessions = self.sessions.read().await;
        sessions.get(process_id).cloned()
    }

    /// Snapshot of all entries.
    pub async fn list(&self) -> Vec<ActiveSession> {
        let sessions = self.sessions.read().await;
        sessions.values().cloned().collect()
    }

    /// Snapshot of all entries serving the given session.
    ///
    /// More than one entry can reference a session while an ownership
    /// transfer is in progress; at most one of them is streaming.
    pub async fn list_by_session_id(&self, session_id: &str) -> Vec<ActiveSession> {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .filter(|entry| entry.session_id.as_deref() == Some(session_id))
            .cloned()
            .collect()
    }

    /// Number of tracked processes.
    pub async fn len(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.len()
    }

    /// Whether no processes are tracked.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
