//! Transport envelope validation.
//!
//! Every payload off the transport is checked for envelope shape before
//! anything downstream sees it: malformed payloads are logged, counted and
//! dropped here, so the reducer only ever observes well-formed typed events.

use roost_core::session::StreamEventKind;
use serde_json::Value;
use thiserror::Error;

/// The `event` name stamped on envelopes produced by the process bridge.
pub const STREAM_EVENT: &str = "claude:stream";

/// Why a payload was rejected at the transport boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("payload is not an object")]
    PayloadNotObject,
    #[error("'event' is missing or not a string")]
    EventNotString,
    #[error("'data' is missing or not an object")]
    DataNotObject,
    #[error("'data.processId' is missing or not a string")]
    ProcessIdNotString,
    #[error("'data.type' is missing or not a string")]
    TypeNotString,
    #[error("event data failed to decode: {0}")]
    Decode(String),
}

/// A validated, typed event with the process it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedEvent {
    pub process_id: String,
    pub kind: StreamEventKind,
}

/// Validates an envelope and decodes its data into a typed event.
///
/// Checks, in order: the payload is an object carrying `event: string` and
/// `data: object`; `data.processId` is a string; `data.type` is a string.
/// Each failure maps to a distinct [`RejectReason`]. Unrecognized type
/// strings still decode (to [`StreamEventKind::Unknown`]); only envelopes
/// with a recognized type but malformed fields are rejected as `Decode`.
pub fn decode_envelope(payload: &Value) -> Result<ValidatedEvent, RejectReason> {
    let envelope = payload.as_object().ok_or(RejectReason::PayloadNotObject)?;
    envelope
        .get("event")
        .and_then(Value::as_str)
        .ok_or(RejectReason::EventNotString)?;
    let data = envelope
        .get("data")
        .and_then(Value::as_object)
        .ok_or(RejectReason::DataNotObject)?;
    let process_id = data
        .get("processId")
        .and_then(Value::as_str)
        .ok_or(RejectReason::ProcessIdNotString)?
        .to_string();
    data.get("type")
        .and_then(Value::as_str)
        .ok_or(RejectReason::TypeNotString)?;

    let kind: StreamEventKind = serde_json::from_value(Value::Object(data.clone()))
        .map_err(|err| RejectReason::Decode(err.to_string()))?;

    Ok(ValidatedEvent { process_id, kind })
}

/// Counters for one process's ingestion stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Events passed through to the reducer.
    pub accepted: u64,
    /// Payloads dropped for a shape or decode failure.
    pub rejected: u64,
    /// Well-formed events carrying a different process id.
    pub mismatched: u64,
}

/// Per-process transport adapter.
///
/// Wraps [`decode_envelope`] with the process-id filter and the
/// log-count-drop policy for one ingestion stream.
pub struct TransportAdapter {
    process_id: String,
    stats: TransportStats,
}

impl TransportAdapter {
    /// Creates an adapter accepting events for the given process only.
    pub fn new(process_id: impl Into<String>) -> Self {
        Self {
            process_id: process_id.into(),
            stats: TransportStats::default(),
        }
    }

    /// Validates one payload, returning the typed event if it belongs to
    /// this process. Rejections and mismatches are logged and counted.
    pub fn accept(&mut self, payload: &Value) -> Option<StreamEventKind> {
        match decode_envelope(payload) {
            Ok(event) if event.process_id == self.process_id => {
                self.stats.accepted += 1;
                Some(event.kind)
            }
            Ok(event) => {
                self.stats.mismatched += 1;
                tracing::debug!(
                    "[Transport] Dropping event for '{}' on stream '{}'",
                    event.process_id,
                    self.process_id
                );
                None
            }
            Err(reason) => {
                self.stats.rejected += 1;
                tracing::warn!(
                    "[Transport] Rejected payload on stream '{}': {}",
                    self.process_id,
                    reason
                );
                None
            }
        }
    }

    /// Counters accumulated so far.
    pub fn stats(&self) -> TransportStats {
        self.stats
    }
}
