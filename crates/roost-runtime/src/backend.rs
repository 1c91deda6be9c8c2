//! Backend abstraction for assistant processes.
//!
//! A backend knows how to launch one assistant process per session and
//! hand back three things: the stream of envelope events the process
//! produces, a writer for user turns, and a kill switch. The controller
//! works entirely against this trait, so tests can swap in a scripted
//! backend and the Claude CLI backend stays a detail.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use roost_core::Result;

/// Parameters for launching one assistant process.
#[derive(Debug, Clone, Default)]
pub struct SpawnSpec {
    /// Runtime handle the process is tracked under.
    pub process_id: String,
    /// Working directory for the process.
    pub project_path: String,
    /// Display name of the project.
    pub project_name: String,
    /// Resume this session instead of creating a new one, when set.
    pub resume_session_id: Option<String>,
    /// Permission mode passed through to the process, when set.
    pub permission_mode: Option<String>,
    /// Model override passed through to the process, when set.
    pub model: Option<String>,
}

/// Write side of a running process: user turns go in here.
#[async_trait]
pub trait ProcessInput: Send + Sync {
    /// Delivers one user turn to the process.
    async fn send_turn(&self, text: &str) -> Result<()>;
}

/// Control side of a running process.
#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Requests termination. The event stream still delivers a final
    /// `complete` envelope once the process is gone.
    async fn kill(&self) -> Result<()>;
}

/// A successfully launched process.
pub struct SpawnedProcess {
    /// Envelope events, in arrival order, ending with `complete`.
    pub events: mpsc::Receiver<Value>,
    pub input: Box<dyn ProcessInput>,
    pub control: Box<dyn ProcessControl>,
}

/// Launches assistant processes.
#[async_trait]
pub trait AssistantBackend: Send + Sync {
    /// Verifies the backend can actually launch processes on this machine.
    async fn check_availability(&self) -> Result<()>;

    /// Launches one process according to the spec.
    async fn spawn(&self, spec: SpawnSpec) -> Result<SpawnedProcess>;
}
