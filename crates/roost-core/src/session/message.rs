//! Timeline message types.
//!
//! This module contains types for representing finalized messages in a
//! session timeline, including roles, delivery status and identifier
//! synthesis for transport events that carry no uuid.

use rand::Rng;
use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// Represents the role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MessageRole {
    /// Message from the user.
    User,
    /// Message from the AI assistant.
    Assistant,
    /// System-generated message (errors, notices).
    System,
}

/// Delivery status of a finalized message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// The message arrived or was finalized normally.
    Complete,
    /// The message carries error content.
    Error,
}

/// A single finalized message in a session timeline.
///
/// Timelines are append-only: once inserted a message is never mutated,
/// and a second message with the same `message_id` is dropped on append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineMessage {
    /// Stable identifier: the transport uuid when one was provided,
    /// otherwise a synthesized timestamp-plus-suffix id.
    pub message_id: String,
    /// The role of the message sender.
    pub role: MessageRole,
    /// The flattened message content.
    pub content: String,
    /// Timestamp when the message was finalized (ISO 8601 format).
    pub timestamp: String,
    /// Delivery status.
    pub status: MessageStatus,
}

impl TimelineMessage {
    /// Creates a message with a synthesized identifier.
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self::with_id(synthesize_message_id(), role, content)
    }

    /// Creates a message with an explicit identifier.
    pub fn with_id(
        message_id: impl Into<String>,
        role: MessageRole,
        content: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            role,
            content: content.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            status: MessageStatus::Complete,
        }
    }

    /// Creates a system message carrying error content.
    pub fn system_error(content: impl Into<String>) -> Self {
        Self {
            status: MessageStatus::Error,
            ..Self::new(MessageRole::System, content)
        }
    }
}

/// Synthesizes a message identifier for events that carry no uuid.
///
/// The format is the unix timestamp in milliseconds followed by a random
/// hex suffix, matching the ids minted for locally inserted user turns.
pub fn synthesize_message_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix: u32 = rand::thread_rng().gen_range(0..0x100_0000);
    format!("{millis}-{suffix:06x}")
}
