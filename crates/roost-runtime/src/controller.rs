//! Session lifecycle control.
//!
//! The controller is the only component that creates and destroys session
//! ownership: it spawns processes, installs their ingestion pipelines, and
//! tears both down again. While a process runs, its reducer owns the
//! event-driven signal fields; the controller only touches entries at the
//! start, resume, send, and stop edges.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use roost_core::session::{
    ActiveSession, ActiveSessionRegistry, MessageRole, SessionPatch, TimelineMessage,
    TimelineStore, UpdateBus,
};
use roost_core::{Result, RoostError};
use roost_stream::{Coalescer, StreamReducer, TransportAdapter};

use crate::backend::{AssistantBackend, SpawnSpec, SpawnedProcess};
use crate::config::RuntimeConfig;

/// Everything held for one running process.
struct Worker {
    input: Box<dyn crate::backend::ProcessInput>,
    control: Box<dyn crate::backend::ProcessControl>,
    ingest: JoinHandle<()>,
    /// Cancelling this discards any pending live-text flush.
    flush_cancel: CancellationToken,
}

/// Starts, resumes, feeds, and stops assistant sessions.
pub struct SessionController {
    backend: Arc<dyn AssistantBackend>,
    registry: Arc<ActiveSessionRegistry>,
    timeline: Arc<TimelineStore>,
    bus: Arc<UpdateBus>,
    config: RuntimeConfig,
    workers: Mutex<HashMap<String, Worker>>,
    /// Session ids with a resume spawn in flight, mapped to the claiming
    /// process id. A second resume for a claimed id is a conflict.
    resuming: Mutex<HashMap<String, String>>,
}

impl SessionController {
    pub fn new(backend: Arc<dyn AssistantBackend>, config: RuntimeConfig) -> Self {
        let bus = Arc::new(UpdateBus::new());
        let registry = Arc::new(ActiveSessionRegistry::new(bus.clone()));
        let timeline = Arc::new(TimelineStore::new(bus.clone()));
        Self {
            backend,
            registry,
            timeline,
            bus,
            config,
            workers: Mutex::new(HashMap::new()),
            resuming: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> Arc<ActiveSessionRegistry> {
        self.registry.clone()
    }

    pub fn timeline(&self) -> Arc<TimelineStore> {
        self.timeline.clone()
    }

    pub fn bus(&self) -> Arc<UpdateBus> {
        self.bus.clone()
    }

    /// Verifies the backend can launch processes.
    pub async fn check_backend(&self) -> Result<()> {
        self.backend.check_availability().await
    }

    /// Starts a fresh session in the given project.
    ///
    /// The registry entry exists before the spawn and is rolled back if the
    /// spawn fails. When `first_message` is set it is dispatched as the
    /// opening turn.
    ///
    /// # Errors
    ///
    /// Returns a spawn error when the process cannot be launched.
    pub async fn start_new_session(
        &self,
        project_path: impl Into<String>,
        project_name: impl Into<String>,
        first_message: Option<&str>,
    ) -> Result<ActiveSession> {
        let project_path = project_path.into();
        let project_name = project_name.into();
        self.require_project_dir(&project_path)?;
        let process_id = format!("proc-{}", Uuid::new_v4());
        tracing::info!(
            "[Controller] Starting new session in '{}' as '{}'",
            project_path,
            process_id
        );

        let entry = ActiveSession::new(&process_id, &project_path, &project_name);
        self.registry.upsert(entry.clone()).await;

        let spec = SpawnSpec {
            process_id: process_id.clone(),
            project_path,
            project_name,
            resume_session_id: None,
            permission_mode: self.config.permission_mode.clone(),
            model: self.config.model.clone(),
        };
        let process = match self.spawn_with_timeout(spec).await {
            Ok(process) => process,
            Err(e) => {
                // Roll the half-created entry back out.
                self.registry.remove(&process_id).await;
                return Err(e);
            }
        };

        self.install_worker(&process_id, None, process).await;

        if let Some(text) = first_message {
            self.dispatch_turn(&process_id, text).await?;
        }

        Ok(self.registry.get(&process_id).await.unwrap_or(entry))
    }

    /// Resumes an existing session by id, spawning a fresh process for it.
    ///
    /// The new process becomes the authoritative owner: an earlier owner
    /// that is still alive is demoted to non-streaming, and entries left
    /// behind by dead owners are removed. At most one entry is ever
    /// streaming for a session id.
    ///
    /// `permission_mode` is an open string set passed through to the process
    /// unchanged; `None` falls back to the configured mode.
    ///
    /// # Errors
    ///
    /// Returns a conflict error when another resume for the same session id
    /// is still in flight, or a spawn error when the process cannot be
    /// launched.
    pub async fn resume_session(
        &self,
        session_id: impl Into<String>,
        project_path: impl Into<String>,
        project_name: impl Into<String>,
        permission_mode: Option<&str>,
    ) -> Result<ActiveSession> {
        let session_id = session_id.into();
        let project_path = project_path.into();
        let project_name = project_name.into();
        self.require_project_dir(&project_path)?;

        let process_id = format!("proc-{}", Uuid::new_v4());
        {
            let mut resuming = self.resuming.lock().await;
            if resuming.contains_key(&session_id) {
                tracing::warn!(
                    "[Controller] Resume already in flight for session '{}'",
                    session_id
                );
                return Err(RoostError::conflict(&session_id));
            }
            resuming.insert(session_id.clone(), process_id.clone());
        }

        let result = self
            .resume_claimed(
                &process_id,
                &session_id,
                project_path,
                project_name,
                permission_mode,
            )
            .await;
        self.resuming.lock().await.remove(&session_id);
        result
    }

    async fn resume_claimed(
        &self,
        process_id: &str,
        session_id: &str,
        project_path: String,
        project_name: String,
        permission_mode: Option<&str>,
    ) -> Result<ActiveSession> {
        tracing::info!(
            "[Controller] Resuming session '{}' as '{}'",
            session_id,
            process_id
        );
        self.release_owners(session_id).await;

        let mut entry = ActiveSession::new(process_id, &project_path, &project_name);
        entry.session_id = Some(session_id.to_string());
        self.registry.upsert(entry.clone()).await;

        let spec = SpawnSpec {
            process_id: process_id.to_string(),
            project_path,
            project_name,
            resume_session_id: Some(session_id.to_string()),
            permission_mode: permission_mode
                .map(str::to_string)
                .or_else(|| self.config.permission_mode.clone()),
            model: self.config.model.clone(),
        };
        let process = match self.spawn_with_timeout(spec).await {
            Ok(process) => process,
            Err(e) => {
                self.registry.remove(process_id).await;
                return Err(e);
            }
        };

        self.install_worker(process_id, Some(session_id.to_string()), process)
            .await;

        Ok(self.registry.get(process_id).await.unwrap_or(entry))
    }

    /// Dispatches one user turn to a session's process.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown process id, and a not-ready
    /// error while a turn is still streaming or after the process exited.
    pub async fn send_message(&self, process_id: &str, text: &str) -> Result<()> {
        let workers = self.workers.lock().await;
        let Some(worker) = workers.get(process_id) else {
            return match self.registry.get(process_id).await {
                Some(_) => Err(RoostError::not_ready(
                    process_id,
                    "no running process for this session",
                )),
                None => Err(RoostError::not_found("session", process_id)),
            };
        };

        let entry = self
            .registry
            .get(process_id)
            .await
            .ok_or_else(|| RoostError::not_found("session", process_id))?;
        if entry.signals.phase.is_terminal() {
            return Err(RoostError::not_ready(process_id, "the process has exited"));
        }
        if entry.is_streaming {
            return Err(RoostError::not_ready(
                process_id,
                "a turn is already streaming",
            ));
        }

        self.record_and_send(worker, process_id, entry.session_id.as_deref(), text)
            .await
    }

    /// Stops a session's process and removes its registry entry.
    ///
    /// Pending live-text flushes are discarded, ingestion is aborted so
    /// buffered events can no longer patch state, and the process kill runs
    /// in the background rather than blocking the caller on an exiting
    /// child.
    ///
    /// # Errors
    ///
    /// Returns a not-found error when nothing is tracked under the id.
    pub async fn stop_session(&self, process_id: &str) -> Result<()> {
        let worker = self.workers.lock().await.remove(process_id);
        let Some(worker) = worker else {
            return if self.registry.remove(process_id).await.is_some() {
                Ok(())
            } else {
                Err(RoostError::not_found("session", process_id))
            };
        };
        tracing::info!("[Controller] Stopping '{}'", process_id);

        worker.flush_cancel.cancel();
        worker.ingest.abort();
        self.registry.remove(process_id).await;

        let kill_id = process_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = worker.control.kill().await {
                tracing::warn!("[Controller] Failed to kill '{}': {}", kill_id, e);
            }
        });
        Ok(())
    }

    /// All tracked sessions.
    pub async fn sessions(&self) -> Vec<ActiveSession> {
        self.registry.list().await
    }

    /// One tracked session, if present.
    pub async fn session(&self, process_id: &str) -> Option<ActiveSession> {
        self.registry.get(process_id).await
    }

    /// Stops every running session.
    pub async fn shutdown(&self) {
        let process_ids: Vec<String> = self.workers.lock().await.keys().cloned().collect();
        for process_id in process_ids {
            if let Err(e) = self.stop_session(&process_id).await {
                tracing::warn!("[Controller] Failed to stop '{}': {}", process_id, e);
            }
        }
    }

    /// Records the user turn, marks the entry busy, and writes to the
    /// process. Callers must hold the workers lock so concurrent sends
    /// serialize against each other.
    async fn record_and_send(
        &self,
        worker: &Worker,
        process_id: &str,
        session_id: Option<&str>,
        text: &str,
    ) -> Result<()> {
        let key = session_id.unwrap_or(process_id);
        self.timeline
            .append(process_id, key, TimelineMessage::new(MessageRole::User, text))
            .await;
        self.registry
            .update(
                process_id,
                SessionPatch {
                    is_streaming: Some(true),
                    ..Default::default()
                },
            )
            .await;
        worker.input.send_turn(text).await
    }

    /// Sends a turn without the idle gate. Used for the opening message,
    /// which races the session announcement events.
    async fn dispatch_turn(&self, process_id: &str, text: &str) -> Result<()> {
        let workers = self.workers.lock().await;
        let Some(worker) = workers.get(process_id) else {
            return Err(RoostError::not_found("session", process_id));
        };
        let session_id = self
            .registry
            .get(process_id)
            .await
            .and_then(|entry| entry.session_id);
        self.record_and_send(worker, process_id, session_id.as_deref(), text)
            .await
    }

    async fn spawn_with_timeout(&self, spec: SpawnSpec) -> Result<SpawnedProcess> {
        match self.config.spawn_timeout() {
            Some(limit) => match tokio::time::timeout(limit, self.backend.spawn(spec)).await {
                Ok(result) => result,
                Err(_) => Err(RoostError::spawn(format!(
                    "spawn timed out after {}s",
                    limit.as_secs()
                ))),
            },
            None => self.backend.spawn(spec).await,
        }
    }

    /// Wires a spawned process into the reducer pipeline and tracks it.
    async fn install_worker(
        &self,
        process_id: &str,
        session_id: Option<String>,
        process: SpawnedProcess,
    ) {
        let flush_cancel = CancellationToken::new();
        let coalescer = Coalescer::with_cancel(self.config.flush_interval(), flush_cancel.clone());
        let mut reducer = StreamReducer::new(
            process_id,
            session_id,
            self.registry.clone(),
            self.timeline.clone(),
            self.bus.clone(),
            coalescer,
        );
        let mut adapter = TransportAdapter::new(process_id);
        let mut events = process.events;
        let ingest_id = process_id.to_string();
        let ingest = tokio::spawn(async move {
            while let Some(envelope) = events.recv().await {
                if let Some(kind) = adapter.accept(&envelope) {
                    reducer.apply(kind).await;
                }
            }
            let stats = adapter.stats();
            tracing::debug!(
                "[Controller] Ingest for '{}' finished ({} accepted, {} rejected, {} mismatched)",
                ingest_id,
                stats.accepted,
                stats.rejected,
                stats.mismatched
            );
        });

        self.workers.lock().await.insert(
            process_id.to_string(),
            Worker {
                input: process.input,
                control: process.control,
                ingest,
                flush_cancel,
            },
        );
    }

    /// Yields ownership of a session id to a new process.
    ///
    /// Entries whose process is gone are removed; an owner that is still
    /// alive keeps its entry but is demoted to non-streaming, so the entry
    /// installed next is the only streaming one.
    async fn release_owners(&self, session_id: &str) {
        let entries = self.registry.list_by_session_id(session_id).await;
        for entry in entries {
            let alive = {
                let workers = self.workers.lock().await;
                workers
                    .get(&entry.process_id)
                    .is_some_and(|worker| !worker.ingest.is_finished())
            };
            if alive {
                tracing::debug!(
                    "[Controller] Demoting live owner '{}' of session '{}'",
                    entry.process_id,
                    session_id
                );
                self.registry
                    .update(
                        &entry.process_id,
                        SessionPatch {
                            is_streaming: Some(false),
                            ..Default::default()
                        },
                    )
                    .await;
            } else {
                tracing::debug!(
                    "[Controller] Removing stale entry '{}' for session '{}'",
                    entry.process_id,
                    session_id
                );
                self.workers.lock().await.remove(&entry.process_id);
                self.registry.remove(&entry.process_id).await;
            }
        }
    }

    fn require_project_dir(&self, project_path: &str) -> Result<()> {
        if Path::new(project_path).is_dir() {
            Ok(())
        } else {
            Err(RoostError::spawn(format!(
                "project path '{project_path}' is not a directory"
            )))
        }
    }
}

#[cfg(test)]
#[path = "controller_test.rs"]
mod tests;
