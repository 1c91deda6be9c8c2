//! Typed stream events and content blocks.
//!
//! Events arrive on the transport as `{event, data}` envelopes; the `data`
//! object carries a `type` discriminator plus type-specific fields. This
//! module defines the decoded sum type that stream reduction matches on
//! exhaustively, and the content-block flattening rules for assistant
//! messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A decoded stream event, tagged by the wire `type` field.
///
/// Type-specific fields are optional wherever the wire allows absence;
/// reduction checks them as it branches. Unrecognized types decode to
/// `Unknown` and are ignored, which keeps the protocol forward compatible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum StreamEventKind {
    /// A new conversation was established for this process.
    SessionCreated {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        project_path: Option<String>,
        #[serde(default)]
        project_name: Option<String>,
        #[serde(default)]
        created_at: Option<String>,
    },
    /// A resumed process re-announced its conversation.
    SessionReady {
        #[serde(default)]
        session_id: Option<String>,
    },
    /// Assistant-side system notification; only `subtype: "init"` is acted
    /// on (it marks the start of a request cycle).
    System {
        #[serde(default)]
        subtype: Option<String>,
    },
    /// A fragment of partial assistant output.
    Chunk {
        #[serde(default)]
        content: Option<String>,
    },
    /// The finalized assistant message for the current request cycle.
    Assistant {
        #[serde(default)]
        message: Option<AssistantMessage>,
        #[serde(default)]
        uuid: Option<String>,
    },
    /// Echo of a user turn; timelines record user turns at send time, so
    /// this carries no action.
    User,
    /// Accounting record closing a request cycle.
    Result {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        total_cost_usd: Option<f64>,
        #[serde(default)]
        is_error: Option<bool>,
        #[serde(default)]
        errors: Option<Vec<String>>,
    },
    /// The process exited with the given code.
    Complete {
        #[serde(default)]
        code: Option<i32>,
    },
    /// A fatal stream error outside the result protocol.
    Error {
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        errors: Option<Vec<String>>,
    },
    /// Any type this build does not recognize.
    #[serde(other)]
    Unknown,
}

/// The message body of an `assistant` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: MessageContent,
}

/// Assistant message content: either a plain string or content blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Blocks(Vec::new())
    }
}

/// One block of structured assistant output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text, flattened verbatim.
    Text {
        #[serde(default)]
        text: String,
    },
    /// A tool invocation, flattened to a fenced block with the tool name
    /// and the pretty-printed input.
    ToolUse {
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: Value,
    },
    /// A tool result, flattened to a fenced block with the raw content.
    ToolResult {
        #[serde(default)]
        content: Value,
    },
    /// Any block type this build does not recognize; skipped.
    #[serde(other)]
    Unknown,
}

/// Flattens assistant message content into a single display string.
///
/// Text blocks pass through verbatim. Tool blocks become fenced code blocks
/// tagged `tool_use` or `tool_result`. Unknown blocks are skipped. Blocks
/// are joined with newlines.
pub fn flatten_content(content: &MessageContent) -> String {
    match content {
        MessageContent::Text(text) => text.clone(),
        MessageContent::Blocks(blocks) => {
            let mut parts = Vec::new();
            for block in blocks {
                match block {
                    ContentBlock::Text { text } => parts.push(text.clone()),
                    ContentBlock::ToolUse { name, input } => {
                        let pretty = serde_json::to_string_pretty(input)
                            .unwrap_or_else(|_| input.to_string());
                        parts.push(format!("```tool_use\n{name}\n{pretty}\n```"));
                    }
                    ContentBlock::ToolResult { content } => {
                        let raw = match content {
                            Value::String(text) => text.clone(),
                            other => serde_json::to_string_pretty(other)
                                .unwrap_or_else(|_| other.to_string()),
                        };
                        parts.push(format!("```tool_result\n{raw}\n```"));
                    }
                    ContentBlock::Unknown => {}
                }
            }
            parts.join("\n")
        }
    }
}
