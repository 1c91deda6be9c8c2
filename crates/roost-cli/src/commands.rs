//! Subcommand implementations for the roost binary.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, BufReader};

use roost_core::session::SessionUpdate;
use roost_runtime::{AssistantBackend, ClaudeBackend, RuntimeConfig, SessionController};

/// Checks that the Claude Code CLI is installed and reachable.
pub async fn doctor() -> Result<()> {
    let config = RuntimeConfig::load().context("failed to load configuration")?;
    let backend = ClaudeBackend::from_config(&config);
    backend
        .check_availability()
        .await
        .context("Claude Code CLI check failed")?;
    println!("ok: Claude Code CLI is available");
    Ok(())
}

/// Runs an interactive session in `project`, printing the live stream.
///
/// Each stdin line is dispatched as one user turn; `exit`, `quit`, EOF or
/// Ctrl-C stop the session.
pub async fn run(
    project: String,
    resume: Option<String>,
    message: Option<&str>,
    permission_mode: Option<&str>,
) -> Result<()> {
    let project_path = Path::new(&project)
        .canonicalize()
        .with_context(|| format!("project directory '{project}' not found"))?;
    if !project_path.is_dir() {
        bail!("'{}' is not a directory", project_path.display());
    }
    let project_name = project_path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| project_path.display().to_string());
    let project_path = project_path.to_string_lossy().to_string();

    let mut config = RuntimeConfig::load().context("failed to load configuration")?;
    if let Some(mode) = permission_mode {
        config.permission_mode = Some(mode.to_string());
    }
    let backend = Arc::new(ClaudeBackend::from_config(&config));
    let controller = Arc::new(SessionController::new(backend, config));

    let subscription = controller.bus().subscribe(None, |update| match update {
        SessionUpdate::SessionAssigned { session_id, .. } => {
            println!("session: {session_id}");
        }
        SessionUpdate::SessionChanged { session } => {
            if let Some(text) = &session.signals.live_text {
                print!("\r{text}");
                let _ = std::io::stdout().flush();
            }
        }
        SessionUpdate::MessageAppended { message, .. } => {
            println!("\r[{}] {}", message.role, message.content);
        }
        SessionUpdate::StreamError { error, .. } => {
            eprintln!("stream error: {error}");
        }
        SessionUpdate::SessionClosed { .. } => {}
    });

    let entry = match &resume {
        Some(session_id) => {
            let entry = controller
                .resume_session(session_id, &project_path, &project_name, permission_mode)
                .await?;
            println!("resumed session {session_id} in {project_path}");
            if let Some(text) = message
                && let Err(e) = controller.send_message(&entry.process_id, text).await
            {
                eprintln!("{e}");
            }
            entry
        }
        None => {
            let entry = controller
                .start_new_session(&project_path, &project_name, message)
                .await?;
            println!("started new session in {project_path}");
            entry
        }
    };
    let process_id = entry.process_id.clone();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line? {
                Some(line) => {
                    let text = line.trim();
                    if text.is_empty() {
                        continue;
                    }
                    if text == "exit" || text == "quit" {
                        break;
                    }
                    if let Err(e) = controller.send_message(&process_id, text).await {
                        eprintln!("{e}");
                    }
                }
                None => break,
            }
        }
    }

    controller.bus().unsubscribe(subscription);
    controller.shutdown().await;
    Ok(())
}
