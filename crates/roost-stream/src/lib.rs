//! Stream processing layer for Roost.
//!
//! This crate turns raw transport envelopes into conversation state: the
//! transport adapter validates and types incoming payloads, the reducer
//! folds them into registry patches and timeline messages, and the
//! coalescer rate-limits partial-text publication.

pub mod coalescer;
pub mod reducer;
pub mod transport;

pub use coalescer::Coalescer;
pub use reducer::StreamReducer;
pub use transport::{RejectReason, TransportAdapter, TransportStats, ValidatedEvent, decode_envelope};
