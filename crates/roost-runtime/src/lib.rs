//! Process runtime for Roost sessions.
//!
//! This crate owns everything that touches a real assistant process: the
//! backend abstraction, the Claude Code CLI implementation of it, the
//! runtime configuration, and the lifecycle controller that ties spawned
//! processes to the registry, timeline, and reducer.

pub mod backend;
pub mod claude;
pub mod config;
pub mod controller;

pub use backend::{AssistantBackend, ProcessControl, ProcessInput, SpawnSpec, SpawnedProcess};
pub use claude::ClaudeBackend;
pub use config::RuntimeConfig;
pub use controller::SessionController;
