//! Error types for the Roost workspace.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A shared error type for the entire Roost workspace.
///
/// This provides typed, structured error variants with automatic conversion
/// from common error types via the `From` trait.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum RoostError {
    /// Entity not found error with type information
    #[error("Entity not found: {entity_type} '{id}'")]
    NotFound {
        entity_type: &'static str,
        id: String,
    },

    /// IO error (file system and pipe operations)
    #[error("IO error: {message}")]
    Io { message: String },

    /// Serialization/deserialization error
    #[error("Serialization error: {format} - {message}")]
    Serialization {
        format: String, // "TOML", "JSON", etc.
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// An assistant process could not be launched
    #[error("Spawn error: {0}")]
    Spawn(String),

    /// Session ownership transfer raced against another resume and lost
    #[error("Session conflict: '{session_id}' was claimed by a newer resume")]
    SessionConflict { session_id: String },

    /// A message was dispatched to a process that cannot accept it
    #[error("Process not ready: '{process_id}' ({reason})")]
    NotReady {
        process_id: String,
        reason: String,
    },

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RoostError {
    // ============================================================================
    // Constructor helpers
    // ============================================================================

    /// Creates a NotFound error
    pub fn not_found(entity_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type,
            id: id.into(),
        }
    }

    /// Creates an IO error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Creates a Config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates a Spawn error
    pub fn spawn(message: impl Into<String>) -> Self {
        Self::Spawn(message.into())
    }

    /// Creates a SessionConflict error
    pub fn conflict(session_id: impl Into<String>) -> Self {
        Self::SessionConflict {
            session_id: session_id.into(),
        }
    }

    /// Creates a NotReady error
    pub fn not_ready(process_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NotReady {
            process_id: process_id.into(),
            reason: reason.into(),
        }
    }

    /// Creates an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    // ============================================================================
    // Type checking methods
    // ============================================================================

    /// Check if this is a NotFound error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is a Spawn error
    pub fn is_spawn(&self) -> bool {
        matches!(self, Self::Spawn(_))
    }

    /// Check if this is a SessionConflict error
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::SessionConflict { .. })
    }

    /// Check if this is a NotReady error
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::NotReady { .. })
    }

    /// Check if this error indicates a missing binary or entity.
    ///
    /// Returns true for:
    /// - `NotFound` errors
    /// - `Io` errors with "not found" in the message
    ///
    /// This helper centralizes the logic for detecting "not found" conditions
    /// across different error types.
    pub fn is_not_found_or_missing(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Io { message } => message.to_lowercase().contains("not found"),
            _ => false,
        }
    }
}

// ============================================================================
// From implementations for automatic conversion
// ============================================================================

impl From<std::io::Error> for RoostError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: format!("{} (kind: {:?})", err, err.kind()),
        }
    }
}

impl From<serde_json::Error> for RoostError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            format: "JSON".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for RoostError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::ser::Error> for RoostError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

/// Conversion from String (for error messages)
impl From<String> for RoostError {
    fn from(err: String) -> Self {
        Self::Internal(err)
    }
}

/// A type alias for `Result<T, RoostError>`.
pub type Result<T> = std::result::Result<T, RoostError>;
