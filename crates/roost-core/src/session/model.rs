//! Active session domain model.
//!
//! This module contains the `ActiveSession` entry kept by the registry for
//! every externally running assistant process, together with the derived
//! per-session signals that stream reduction keeps current.

use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// Terminal outcome of the most recent request cycle on a session.
///
/// `Partial` is distinct from `Error`: it marks a process that ended with a
/// nonzero exit code before reporting a result, and carries no further
/// semantics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CompletionStatus {
    /// No request cycle has completed yet (or a new one is in flight).
    #[default]
    Idle,
    /// The last request cycle completed normally.
    Success,
    /// The last request cycle reported errors.
    Error,
    /// The process exited without a normal result.
    Partial,
}

/// Coarse position of a process in its streaming lifecycle.
///
/// `Complete`, `Error` and `Stopped` are terminal: the process no longer
/// accepts messages. A successful request cycle returns the phase to `Idle`
/// so the next message can be dispatched to the same process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StreamPhase {
    /// Ready for a message (fresh, or between request cycles).
    #[default]
    Idle,
    /// The process announced itself but no request is in flight.
    Init,
    /// A request was acknowledged and no output has streamed yet.
    Thinking,
    /// Partial output is streaming.
    Streaming,
    /// The final message arrived; accounting has not.
    ResultPending,
    /// The process exited.
    Complete,
    /// The stream reported a fatal error.
    Error,
    /// The process was stopped by the caller.
    Stopped,
}

impl StreamPhase {
    /// Whether the process has permanently stopped accepting messages.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Stopped)
    }
}

/// Derived per-session signals kept alongside the registry entry.
///
/// These are written by stream reduction as events arrive, so a single
/// registry read answers every consumer question about a session: whether
/// it is thinking, what partial text is visible, the last reported cost,
/// and how the last request cycle ended.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSignals {
    /// True between request acknowledgement and the first streamed output.
    pub is_thinking: bool,
    /// Timestamp when thinking started (ISO 8601 format).
    pub thinking_since: Option<String>,
    /// Outcome of the most recent request cycle.
    #[serde(default)]
    pub completion: CompletionStatus,
    /// Last cost reported by the assistant for this session, in USD.
    pub last_cost_usd: Option<f64>,
    /// Coalesced partial output currently visible to consumers.
    pub live_text: Option<String>,
    /// Last stream error surfaced for this session.
    pub last_error: Option<String>,
    /// Position in the streaming lifecycle.
    #[serde(default)]
    pub phase: StreamPhase,
}

/// One entry per externally running assistant process.
///
/// The `process_id` is the primary key; the `session_id` is assigned by the
/// assistant after initialization, so a freshly spawned process may run
/// briefly without one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSession {
    /// Unique process identifier (UUID format, assigned at spawn).
    pub process_id: String,
    /// Conversation identifier assigned by the assistant, if known yet.
    pub session_id: Option<String>,
    /// Absolute path of the project the process runs in.
    pub project_path: String,
    /// Display name of the project (usually the directory name).
    pub project_name: String,
    /// Timestamp when the process was started (ISO 8601 format).
    pub created_at: String,
    /// True while a request cycle is in flight on this process.
    pub is_streaming: bool,
    /// Derived signals written by stream reduction.
    #[serde(default)]
    pub signals: SessionSignals,
}

impl ActiveSession {
    /// Creates a fresh entry for a just-spawned process.
    pub fn new(
        process_id: impl Into<String>,
        project_path: impl Into<String>,
        project_name: impl Into<String>,
    ) -> Self {
        Self {
            process_id: process_id.into(),
            session_id: None,
            project_path: project_path.into(),
            project_name: project_name.into(),
            created_at: chrono::Utc::now().to_rfc3339(),
            is_streaming: false,
            signals: SessionSignals::default(),
        }
    }

    /// Applies a merge patch to this entry.
    ///
    /// Fields left as `None` in the patch are untouched. Double-`Option`
    /// fields distinguish "leave alone" (`None`) from "clear" (`Some(None)`).
    pub fn apply_patch(&mut self, patch: SessionPatch) {
        if let Some(session_id) = patch.session_id {
            self.session_id = Some(session_id);
        }
        if let Some(is_streaming) = patch.is_streaming {
            self.is_streaming = is_streaming;
        }
        if let Some(is_thinking) = patch.is_thinking {
            self.signals.is_thinking = is_thinking;
        }
        if let Some(thinking_since) = patch.thinking_since {
            self.signals.thinking_since = thinking_since;
        }
        if let Some(completion) = patch.completion {
            self.signals.completion = completion;
        }
        if let Some(last_cost_usd) = patch.last_cost_usd {
            self.signals.last_cost_usd = Some(last_cost_usd);
        }
        if let Some(live_text) = patch.live_text {
            self.signals.live_text = live_text;
        }
        if let Some(last_error) = patch.last_error {
            self.signals.last_error = last_error;
        }
        if let Some(phase) = patch.phase {
            self.signals.phase = phase;
        }
    }
}

/// Atomic merge patch for a registry entry.
///
/// Callers build patches with struct update syntax, e.g.
/// `SessionPatch { is_streaming: Some(false), ..Default::default() }`.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    /// Set the session identifier. Never cleared once assigned.
    pub session_id: Option<String>,
    pub is_streaming: Option<bool>,
    pub is_thinking: Option<bool>,
    /// `Some(None)` clears the thinking-start timestamp.
    pub thinking_since: Option<Option<String>>,
    pub completion: Option<CompletionStatus>,
    /// Last-known cost. Never cleared once reported.
    pub last_cost_usd: Option<f64>,
    /// `Some(None)` clears the live partial text.
    pub live_text: Option<Option<String>>,
    /// `Some(None)` clears the surfaced error.
    pub last_error: Option<Option<String>>,
    pub phase: Option<StreamPhase>,
}
