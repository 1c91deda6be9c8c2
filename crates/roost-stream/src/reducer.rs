//! Per-process stream reduction.
//!
//! One `StreamReducer` instance exists per running assistant process. It is
//! driven from that process's ingestion task, so events apply strictly in
//! arrival order, and it folds them into registry patches and finalized
//! timeline messages. Partial output accumulates in a private buffer whose
//! publication is rate-limited by the coalescer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use roost_core::session::{
    ActiveSessionRegistry, AssistantMessage, CompletionStatus, MessageRole, SessionPatch,
    SessionUpdate, StreamEventKind, StreamPhase, TimelineMessage, TimelineStore, UpdateBus,
    flatten_content,
};

use crate::coalescer::Coalescer;

/// Folds one process's typed events into conversation state.
///
/// The reducer is the sole writer of the streaming/thinking/cost signal
/// fields on its registry entry while events flow; the lifecycle controller
/// only touches ownership at start/resume/send/stop edges. Both go through
/// the registry's atomic patch API, so neither can corrupt the other.
pub struct StreamReducer {
    process_id: String,
    session_id: Option<String>,
    registry: Arc<ActiveSessionRegistry>,
    timeline: Arc<TimelineStore>,
    bus: Arc<UpdateBus>,
    coalescer: Coalescer,
    /// Partial output gathered since the last finalization. Shared with
    /// flush tasks, which copy it into the live-text slot.
    accumulation: Arc<Mutex<String>>,
    /// Bumped whenever the buffer is cleared or taken. A flush that raced a
    /// finalization detects the bump and repaints the live slot empty.
    cycle: Arc<AtomicU64>,
    /// Local mirrors of the fields this reducer writes, used to skip
    /// patches that would not change anything.
    thinking: bool,
    phase: StreamPhase,
    /// Whether a result event closed the current request cycle.
    result_seen: bool,
}

impl StreamReducer {
    /// Creates a reducer for one process.
    ///
    /// # Arguments
    ///
    /// * `session_id` - The session this process serves, when already known
    ///   (resumed processes); fresh processes pass `None` and learn it from
    ///   the stream.
    /// * `coalescer` - Flush scheduler for partial text; the caller keeps
    ///   the cancellation side if it needs to discard pending flushes.
    pub fn new(
        process_id: impl Into<String>,
        session_id: Option<String>,
        registry: Arc<ActiveSessionRegistry>,
        timeline: Arc<TimelineStore>,
        bus: Arc<UpdateBus>,
        coalescer: Coalescer,
    ) -> Self {
        Self {
            process_id: process_id.into(),
            session_id,
            registry,
            timeline,
            bus,
            coalescer,
            accumulation: Arc::new(Mutex::new(String::new())),
            cycle: Arc::new(AtomicU64::new(0)),
            thinking: false,
            phase: StreamPhase::Idle,
            result_seen: false,
        }
    }

    /// Applies one event to the session state.
    pub async fn apply(&mut self, event: StreamEventKind) {
        match event {
            StreamEventKind::SessionCreated { session_id, .. } => {
                self.on_session_created(session_id).await;
            }
            StreamEventKind::SessionReady { session_id } => {
                self.on_session_ready(session_id).await;
            }
            StreamEventKind::System { subtype } => self.on_system(subtype).await,
            StreamEventKind::Chunk { content } => self.on_chunk(content).await,
            StreamEventKind::Assistant { message, uuid } => self.on_assistant(message, uuid).await,
            // User turns are recorded at send time; the echo carries nothing new.
            StreamEventKind::User => {}
            StreamEventKind::Result {
                subtype,
                total_cost_usd,
                is_error,
                errors,
            } => {
                self.on_result(subtype, total_cost_usd, is_error, errors)
                    .await;
            }
            StreamEventKind::Complete { code } => self.on_complete(code).await,
            StreamEventKind::Error { content, errors } => self.on_error(content, errors).await,
            StreamEventKind::Unknown => {
                tracing::trace!(
                    "[Reducer] Ignoring unknown event type for '{}'",
                    self.process_id
                );
            }
        }
    }

    /// Discards any pending partial-text flush.
    pub fn shutdown(&self) {
        self.coalescer.cancel();
    }

    async fn on_session_created(&mut self, session_id: Option<String>) {
        let Some(session_id) = session_id.filter(|id| !id.is_empty()) else {
            tracing::warn!(
                "[Reducer] session_created without a session id for '{}'",
                self.process_id
            );
            return;
        };
        tracing::debug!(
            "[Reducer] Session '{}' created for process '{}'",
            session_id,
            self.process_id
        );

        // Messages finalized before the id arrived move to the session key.
        self.timeline.adopt(&self.process_id, &session_id).await;
        self.session_id = Some(session_id.clone());
        self.phase = StreamPhase::Init;

        let updated = self
            .registry
            .update(
                &self.process_id,
                SessionPatch {
                    session_id: Some(session_id),
                    is_streaming: Some(true),
                    phase: Some(StreamPhase::Init),
                    ..Default::default()
                },
            )
            .await;
        if !updated {
            // The entry was stopped while this event sat in the buffer; a
            // fresh upsert would resurrect it, so the event is dropped.
            tracing::debug!(
                "[Reducer] Dropping session_created for stopped process '{}'",
                self.process_id
            );
        }
    }

    async fn on_session_ready(&mut self, session_id: Option<String>) {
        let Some(session_id) = session_id.filter(|id| !id.is_empty()) else {
            return;
        };
        self.timeline.adopt(&self.process_id, &session_id).await;
        if self.session_id.is_none() {
            self.session_id = Some(session_id.clone());
        }

        // The registry field is only ever set once.
        if let Some(entry) = self.registry.get(&self.process_id).await
            && entry.session_id.is_none()
        {
            self.registry
                .update(
                    &self.process_id,
                    SessionPatch {
                        session_id: Some(session_id.clone()),
                        ..Default::default()
                    },
                )
                .await;
        }

        self.bus.publish(&SessionUpdate::SessionAssigned {
            process_id: self.process_id.clone(),
            session_id,
        });
    }

    async fn on_system(&mut self, subtype: Option<String>) {
        if subtype.as_deref() != Some("init") {
            tracing::trace!(
                "[Reducer] Ignoring system subtype {:?} for '{}'",
                subtype,
                self.process_id
            );
            return;
        }

        // A new request cycle begins: reset everything request-scoped.
        self.clear_accumulation();
        self.result_seen = false;
        self.thinking = true;
        self.phase = StreamPhase::Thinking;

        self.registry
            .update(
                &self.process_id,
                SessionPatch {
                    is_streaming: Some(true),
                    is_thinking: Some(true),
                    thinking_since: Some(Some(chrono::Utc::now().to_rfc3339())),
                    completion: Some(CompletionStatus::Idle),
                    last_error: Some(None),
                    live_text: Some(None),
                    phase: Some(StreamPhase::Thinking),
                    ..Default::default()
                },
            )
            .await;
    }

    async fn on_chunk(&mut self, content: Option<String>) {
        let Some(content) = content.filter(|content| !content.is_empty()) else {
            return;
        };

        self.lock_accumulation().push_str(&content);

        let was_thinking = std::mem::replace(&mut self.thinking, false);
        if was_thinking || self.phase != StreamPhase::Streaming {
            self.phase = StreamPhase::Streaming;
            self.registry
                .update(
                    &self.process_id,
                    SessionPatch {
                        is_streaming: Some(true),
                        is_thinking: Some(false),
                        thinking_since: Some(None),
                        phase: Some(StreamPhase::Streaming),
                        ..Default::default()
                    },
                )
                .await;
        }

        let accumulation = self.accumulation.clone();
        let registry = self.registry.clone();
        let process_id = self.process_id.clone();
        let cycle = self.cycle.clone();
        self.coalescer.notify(move || async move {
            let started = cycle.load(Ordering::SeqCst);
            let text = accumulation
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            let live_text = if text.is_empty() { None } else { Some(text) };
            registry
                .update(
                    &process_id,
                    SessionPatch {
                        live_text: Some(live_text),
                        ..Default::default()
                    },
                )
                .await;
            // A finalization that raced this flush owns the slot now; its
            // cleared state must win, not the partial text read above.
            if cycle.load(Ordering::SeqCst) != started {
                registry
                    .update(
                        &process_id,
                        SessionPatch {
                            live_text: Some(None),
                            ..Default::default()
                        },
                    )
                    .await;
            }
        });
    }

    async fn on_assistant(&mut self, message: Option<AssistantMessage>, uuid: Option<String>) {
        let flattened = message
            .as_ref()
            .map(|message| flatten_content(&message.content))
            .unwrap_or_default();

        // The finalized message supersedes the partial view. The buffer and
        // the live display are dropped even when the message is empty, so
        // partial text is never shown next to its final form.
        self.clear_accumulation();
        self.thinking = false;
        self.phase = StreamPhase::ResultPending;
        self.registry
            .update(
                &self.process_id,
                SessionPatch {
                    is_thinking: Some(false),
                    thinking_since: Some(None),
                    live_text: Some(None),
                    phase: Some(StreamPhase::ResultPending),
                    ..Default::default()
                },
            )
            .await;

        if flattened.is_empty() {
            return;
        }
        let message = match uuid {
            Some(uuid) => TimelineMessage::with_id(uuid, MessageRole::Assistant, flattened),
            None => TimelineMessage::new(MessageRole::Assistant, flattened),
        };
        self.append_message(message).await;
    }

    async fn on_result(
        &mut self,
        subtype: Option<String>,
        total_cost_usd: Option<f64>,
        is_error: Option<bool>,
        errors: Option<Vec<String>>,
    ) {
        self.result_seen = true;
        self.thinking = false;
        self.phase = StreamPhase::Idle;

        // Anything still buffered is the final output of this cycle.
        let leftover = self.take_accumulation();
        if !leftover.is_empty() {
            self.append_message(TimelineMessage::new(MessageRole::Assistant, leftover))
                .await;
        }

        let mut patch = SessionPatch {
            is_streaming: Some(false),
            is_thinking: Some(false),
            thinking_since: Some(None),
            live_text: Some(None),
            last_cost_usd: total_cost_usd,
            phase: Some(StreamPhase::Idle),
            ..Default::default()
        };

        let error_list = errors.unwrap_or_default();
        if is_error.unwrap_or(false) && !error_list.is_empty() {
            let joined = error_list.join("\n");
            patch.completion = Some(CompletionStatus::Error);
            patch.last_error = Some(Some(joined.clone()));
            self.append_message(TimelineMessage::system_error(joined.clone()))
                .await;
            self.bus.publish(&SessionUpdate::StreamError {
                process_id: self.process_id.clone(),
                error: joined,
            });
        } else if subtype.as_deref() == Some("success") {
            patch.completion = Some(CompletionStatus::Success);
            patch.last_error = Some(None);
        }

        self.registry.update(&self.process_id, patch).await;
    }

    async fn on_complete(&mut self, code: Option<i32>) {
        let code = code.unwrap_or(0);
        tracing::debug!(
            "[Reducer] Process '{}' exited with code {}",
            self.process_id,
            code
        );
        self.thinking = false;
        self.phase = StreamPhase::Complete;

        let leftover = self.take_accumulation();
        if !leftover.is_empty() {
            self.append_message(TimelineMessage::new(MessageRole::Assistant, leftover))
                .await;
        }

        let mut patch = SessionPatch {
            is_streaming: Some(false),
            is_thinking: Some(false),
            thinking_since: Some(None),
            live_text: Some(None),
            phase: Some(StreamPhase::Complete),
            ..Default::default()
        };
        // An exit without a result is a partial completion, never an error.
        if !self.result_seen && code != 0 {
            patch.completion = Some(CompletionStatus::Partial);
        }

        self.registry.update(&self.process_id, patch).await;
    }

    async fn on_error(&mut self, content: Option<String>, errors: Option<Vec<String>>) {
        let text = content
            .filter(|content| !content.is_empty())
            .or_else(|| {
                errors
                    .filter(|errors| !errors.is_empty())
                    .map(|errors| errors.join("\n"))
            })
            .unwrap_or_else(|| "unknown stream error".to_string());
        tracing::warn!("[Reducer] Stream error on '{}': {}", self.process_id, text);

        self.thinking = false;
        self.phase = StreamPhase::Error;

        self.append_message(TimelineMessage::system_error(text.clone()))
            .await;
        self.registry
            .update(
                &self.process_id,
                SessionPatch {
                    is_streaming: Some(false),
                    is_thinking: Some(false),
                    thinking_since: Some(None),
                    completion: Some(CompletionStatus::Error),
                    last_error: Some(Some(text.clone())),
                    phase: Some(StreamPhase::Error),
                    ..Default::default()
                },
            )
            .await;
        self.bus.publish(&SessionUpdate::StreamError {
            process_id: self.process_id.clone(),
            error: text,
        });
    }

    async fn append_message(&self, message: TimelineMessage) -> bool {
        let key = self.timeline_key();
        self.timeline
            .append(&self.process_id, &key, message)
            .await
    }

    /// Timeline key for finalized messages: the session id once known,
    /// the process id before that.
    fn timeline_key(&self) -> String {
        self.session_id
            .clone()
            .unwrap_or_else(|| self.process_id.clone())
    }

    /// The cycle bump happens before the caller's registry patch, so a
    /// racing flush always observes it in time to yield the live slot.
    fn clear_accumulation(&self) {
        self.lock_accumulation().clear();
        self.cycle.fetch_add(1, Ordering::SeqCst);
    }

    fn take_accumulation(&self) -> String {
        let text = std::mem::take(&mut *self.lock_accumulation());
        self.cycle.fetch_add(1, Ordering::SeqCst);
        text
    }

    fn lock_accumulation(&self) -> MutexGuard<'_, String> {
        self.accumulation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "reducer_test.rs"]
mod tests;
