//! Session streaming domain module.
//!
//! This module contains the domain models and shared state stores for
//! actively running assistant sessions.
//!
//! # Module Structure
//!
//! - `model`: Active session entry and derived signals (`ActiveSession`)
//! - `message`: Timeline message types (`TimelineMessage`, `MessageRole`)
//! - `event`: Typed stream events and content blocks (`StreamEventKind`)
//! - `registry`: Concurrent process-to-session table (`ActiveSessionRegistry`)
//! - `timeline`: Append-only conversation timelines (`TimelineStore`)
//! - `bus`: Subscription-based update notifications (`UpdateBus`)

mod bus;
mod event;
mod message;
mod model;
mod registry;
mod timeline;

// Re-export public API
pub use bus::{SessionUpdate, SubscriptionId, UpdateBus};
pub use event::{AssistantMessage, ContentBlock, MessageContent, StreamEventKind, flatten_content};
pub use message::{MessageRole, MessageStatus, TimelineMessage, synthesize_message_id};
pub use model::{ActiveSession, CompletionStatus, SessionPatch, SessionSignals, StreamPhase};
pub use registry::ActiveSessionRegistry;
pub use timeline::TimelineStore;
