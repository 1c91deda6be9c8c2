//! ClaudeBackend - an [`AssistantBackend`] that wraps the Claude Code CLI.
//!
//! One CLI process serves one session, launched in stream-json mode so
//! stdout is a sequence of JSON lines. A bridge task translates each line
//! into a `claude:stream` envelope and pushes it into the process's event
//! channel; user turns are written to stdin as JSON lines. When the
//! process exits, for any reason, the bridge emits a final `complete`
//! envelope and closes the channel.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use roost_core::{Result, RoostError};
use roost_stream::transport::STREAM_EVENT;

use crate::backend::{AssistantBackend, ProcessControl, ProcessInput, SpawnSpec, SpawnedProcess};
use crate::config::{DEFAULT_CHANNEL_CAPACITY, RuntimeConfig};

/// Shown when the `claude` binary cannot be found.
pub const INSTALL_HINT: &str =
    "Claude Code CLI not found. Install Claude Code and ensure `claude` is on your PATH.";

/// Launches Claude Code CLI processes.
pub struct ClaudeBackend {
    /// Path to the `claude` executable. If None, searches in PATH.
    binary: Option<PathBuf>,
    /// Model passed through with `--model`, when set.
    model: Option<String>,
    /// Permission mode passed through with `--permission-mode`, when set.
    permission_mode: Option<String>,
    /// Capacity of the envelope channel handed to the caller.
    channel_capacity: usize,
}

impl ClaudeBackend {
    /// Creates a backend that searches for `claude` in the system PATH.
    pub fn new() -> Self {
        Self {
            binary: None,
            model: None,
            permission_mode: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Creates a backend from the runtime configuration.
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            binary: config.claude_binary.as_ref().map(PathBuf::from),
            model: config.model.clone(),
            permission_mode: config.permission_mode.clone(),
            channel_capacity: config.channel_capacity,
        }
    }

    /// Sets a custom path to the claude executable.
    pub fn with_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.binary = Some(path.into());
        self
    }

    /// Sets the model to use.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    fn binary_name(&self) -> String {
        self.binary
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|| "claude".to_string())
    }
}

impl Default for ClaudeBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AssistantBackend for ClaudeBackend {
    async fn check_availability(&self) -> Result<()> {
        #[cfg(unix)]
        let check_cmd = "which";
        #[cfg(windows)]
        let check_cmd = "where";

        let binary = self.binary_name();
        let output = Command::new(check_cmd)
            .arg(&binary)
            .output()
            .await
            .map_err(|e| {
                RoostError::spawn(format!("Failed to check claude availability: {}", e))
            })?;

        if output.status.success() {
            log::debug!("Claude Code binary '{}' is available", binary);
            Ok(())
        } else {
            Err(RoostError::spawn(INSTALL_HINT))
        }
    }

    async fn spawn(&self, spec: SpawnSpec) -> Result<SpawnedProcess> {
        let binary = self.binary_name();
        let args = build_args(&spec, self.model.as_deref(), self.permission_mode.as_deref());
        log::info!(
            "🤖 Spawning Claude Code for process '{}' in {}",
            spec.process_id,
            spec.project_path
        );
        log::debug!("Command: {} {}", binary, args.join(" "));

        let mut cmd = Command::new(&binary);
        cmd.args(&args)
            .current_dir(&spec.project_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Desktop launches don't inherit the shell PATH, so common install
        // locations are appended before the binary is resolved.
        if let (Ok(current), Some(home)) = (std::env::var("PATH"), dirs::home_dir()) {
            cmd.env("PATH", enhanced_path(&current, &home.to_string_lossy()));
        }

        let mut child = cmd.spawn().map_err(|e| {
            log::error!("Failed to spawn '{}': {}", binary, e);
            if e.kind() == std::io::ErrorKind::NotFound {
                RoostError::spawn(INSTALL_HINT)
            } else {
                RoostError::spawn(format!("Failed to spawn '{}': {}", binary, e))
            }
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RoostError::spawn("child stdin was not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RoostError::spawn("child stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RoostError::spawn("child stderr was not captured"))?;

        let stderr_id = spec.process_id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if !line.trim().is_empty() {
                    log::debug!("stderr({}): {}", stderr_id, line);
                }
            }
        });

        let (turn_tx, turn_rx) = mpsc::channel::<String>(8);
        tokio::spawn(write_turns(stdin, turn_rx, spec.process_id.clone()));

        let (event_tx, event_rx) = mpsc::channel(self.channel_capacity);
        let kill = CancellationToken::new();
        let bridge = Bridge {
            process_id: spec.process_id.clone(),
            project_path: spec.project_path.clone(),
            project_name: spec.project_name.clone(),
            resumed: spec.resume_session_id.is_some(),
            announced: false,
        };
        tokio::spawn(run_bridge(child, stdout, bridge, event_tx, kill.clone()));

        Ok(SpawnedProcess {
            events: event_rx,
            input: Box::new(ClaudeInput {
                process_id: spec.process_id,
                turns: turn_tx,
            }),
            control: Box::new(ClaudeControl { kill }),
        })
    }
}

/// Builds the CLI argument list for one spawn.
fn build_args(spec: &SpawnSpec, model: Option<&str>, permission_mode: Option<&str>) -> Vec<String> {
    let mut args = vec![
        "-p".to_string(),
        "--output-format".to_string(),
        "stream-json".to_string(),
        "--input-format".to_string(),
        "stream-json".to_string(),
        "--verbose".to_string(),
        "--include-partial-messages".to_string(),
    ];
    if let Some(model) = model.filter(|m| !m.trim().is_empty()) {
        args.push("--model".to_string());
        args.push(model.to_string());
    }
    if let Some(mode) = permission_mode.filter(|m| !m.trim().is_empty()) {
        args.push("--permission-mode".to_string());
        args.push(mode.to_string());
    }
    if let Some(session_id) = &spec.resume_session_id {
        args.push("--resume".to_string());
        args.push(session_id.clone());
    }
    args
}

/// Appends common binary install locations to a PATH value, skipping
/// entries that are already present.
fn enhanced_path(current: &str, home: &str) -> String {
    let candidates = [
        "/usr/local/bin".to_string(),
        "/opt/homebrew/bin".to_string(),
        format!("{}/.local/bin", home),
        format!("{}/bin", home),
        format!("{}/.cargo/bin", home),
        format!("{}/.bun/bin", home),
        format!("{}/.local/share/mise/shims", home),
    ];

    let mut path = current.to_string();
    for candidate in &candidates {
        if !path.split(':').any(|entry| entry == candidate) {
            path.push(':');
            path.push_str(candidate);
        }
    }
    path
}

struct ClaudeInput {
    process_id: String,
    turns: mpsc::Sender<String>,
}

#[async_trait]
impl ProcessInput for ClaudeInput {
    async fn send_turn(&self, text: &str) -> Result<()> {
        self.turns
            .send(text.to_string())
            .await
            .map_err(|_| RoostError::not_ready(&self.process_id, "process stdin is closed"))
    }
}

struct ClaudeControl {
    kill: CancellationToken,
}

#[async_trait]
impl ProcessControl for ClaudeControl {
    async fn kill(&self) -> Result<()> {
        self.kill.cancel();
        Ok(())
    }
}

/// Serializes user turns onto the process stdin as stream-json lines.
async fn write_turns(mut stdin: ChildStdin, mut turns: mpsc::Receiver<String>, process_id: String) {
    while let Some(text) = turns.recv().await {
        let line = json!({
            "type": "user",
            "message": {
                "role": "user",
                "content": [{ "type": "text", "text": text }],
            },
        });
        let mut payload = line.to_string();
        payload.push('\n');
        if let Err(e) = stdin.write_all(payload.as_bytes()).await {
            log::warn!("stdin write failed for '{}': {}", process_id, e);
            break;
        }
        if let Err(e) = stdin.flush().await {
            log::warn!("stdin flush failed for '{}': {}", process_id, e);
            break;
        }
    }
}

/// Per-process translation state for the stdout bridge.
struct Bridge {
    process_id: String,
    project_path: String,
    project_name: String,
    resumed: bool,
    /// Whether the session id has been announced downstream.
    announced: bool,
}

impl Bridge {
    /// Translates one stdout line into zero or more envelopes.
    fn translate(&mut self, line: &str) -> Vec<Value> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }
        let value: Value = match serde_json::from_str(trimmed) {
            Ok(value) => value,
            Err(e) => {
                log::debug!("Skipping unparseable line from '{}': {}", self.process_id, e);
                return Vec::new();
            }
        };
        // Subagent traffic belongs to nested tool runs, not this session.
        if value
            .get("parent_tool_use_id")
            .and_then(Value::as_str)
            .is_some()
        {
            return Vec::new();
        }

        let event_type = value.get("type").and_then(Value::as_str).unwrap_or("");
        let mut out = Vec::new();
        match event_type {
            "system" => {
                let subtype = value.get("subtype").and_then(Value::as_str).unwrap_or("");
                if subtype == "init" && !self.announced {
                    self.announced = true;
                    // An empty id is as good as none; downstream treats the
                    // session as unassigned rather than keyed by "".
                    let session_id = value
                        .get("session_id")
                        .and_then(Value::as_str)
                        .filter(|id| !id.is_empty());
                    if self.resumed {
                        out.push(envelope(
                            &self.process_id,
                            json!({ "type": "session_ready", "sessionId": session_id }),
                        ));
                    } else {
                        out.push(envelope(
                            &self.process_id,
                            json!({
                                "type": "session_created",
                                "sessionId": session_id,
                                "projectPath": self.project_path,
                                "projectName": self.project_name,
                                "createdAt": chrono::Utc::now().to_rfc3339(),
                            }),
                        ));
                    }
                }
                out.push(envelope(
                    &self.process_id,
                    json!({ "type": "system", "subtype": subtype }),
                ));
            }
            "stream_event" => {
                if let Some(text) = extract_delta_text(&value) {
                    out.push(envelope(
                        &self.process_id,
                        json!({ "type": "chunk", "content": text }),
                    ));
                }
            }
            "assistant" => {
                let message = value.get("message").cloned().unwrap_or(Value::Null);
                let uuid = value.get("uuid").and_then(Value::as_str);
                out.push(envelope(
                    &self.process_id,
                    json!({ "type": "assistant", "message": message, "uuid": uuid }),
                ));
            }
            "user" => {
                out.push(envelope(&self.process_id, json!({ "type": "user" })));
            }
            "result" => {
                let subtype = value.get("subtype").and_then(Value::as_str);
                let cost = value.get("total_cost_usd").and_then(Value::as_f64);
                let is_error = value
                    .get("is_error")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let mut data = json!({
                    "type": "result",
                    "subtype": subtype,
                    "totalCostUsd": cost,
                    "isError": is_error,
                });
                if is_error {
                    let text = value
                        .get("result")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string();
                    let errors: Vec<String> = if text.is_empty() { Vec::new() } else { vec![text] };
                    data["errors"] = json!(errors);
                }
                out.push(envelope(&self.process_id, data));
            }
            other => {
                log::trace!("Forwarding unhandled event type '{}' as-is", other);
                out.push(envelope(&self.process_id, json!({ "type": other })));
            }
        }
        out
    }
}

/// Wraps typed data in a `claude:stream` envelope for one process.
fn envelope(process_id: &str, mut data: Value) -> Value {
    if let Some(object) = data.as_object_mut() {
        object.insert("processId".to_string(), json!(process_id));
    }
    json!({ "event": STREAM_EVENT, "data": data })
}

/// Pulls the text out of a `content_block_delta` stream event, if any.
fn extract_delta_text(value: &Value) -> Option<&str> {
    let event = value.get("event")?;
    if event.get("type").and_then(Value::as_str) != Some("content_block_delta") {
        return None;
    }
    let delta = event.get("delta")?;
    if delta.get("type").and_then(Value::as_str) != Some("text_delta") {
        return None;
    }
    delta
        .get("text")
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
}

/// Owns the child process: reads stdout until exit or kill, then emits the
/// final `complete` envelope and closes the channel.
async fn run_bridge(
    mut child: Child,
    stdout: ChildStdout,
    mut bridge: Bridge,
    events: mpsc::Sender<Value>,
    kill: CancellationToken,
) {
    let mut lines = BufReader::new(stdout).lines();
    let code = loop {
        tokio::select! {
            _ = kill.cancelled() => {
                if let Err(e) = child.start_kill() {
                    log::warn!("Kill failed for '{}': {}", bridge.process_id, e);
                }
                break wait_for_exit(&mut child, &bridge.process_id).await;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    for env in bridge.translate(&line) {
                        if events.send(env).await.is_err() {
                            // Nobody is listening anymore.
                            let _ = child.start_kill();
                            let _ = child.wait().await;
                            return;
                        }
                    }
                }
                Ok(None) => {
                    break wait_for_exit(&mut child, &bridge.process_id).await;
                }
                Err(e) => {
                    log::warn!("stdout read failed for '{}': {}", bridge.process_id, e);
                    let _ = child.start_kill();
                    break wait_for_exit(&mut child, &bridge.process_id).await;
                }
            }
        }
    };

    log::info!(
        "✅ Claude Code process '{}' exited with code {:?}",
        bridge.process_id,
        code
    );
    let _ = events
        .send(envelope(
            &bridge.process_id,
            json!({ "type": "complete", "code": code }),
        ))
        .await;
}

async fn wait_for_exit(child: &mut Child, process_id: &str) -> Option<i32> {
    match child.wait().await {
        Ok(status) => status.code(),
        Err(e) => {
            log::warn!("Wait failed for '{}': {}", process_id, e);
            None
        }
    }
}
