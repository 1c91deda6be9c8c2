use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "roost")]
#[command(about = "Roost - session streaming for Claude Code projects", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the Claude Code CLI is installed and reachable
    Doctor,
    /// Run an interactive session in a project directory
    Run {
        /// Project directory to work in
        #[arg(long, default_value = ".")]
        project: String,
        /// Resume an existing session id instead of starting fresh
        #[arg(long)]
        resume: Option<String>,
        /// Opening message to send once the session is up
        #[arg(long)]
        message: Option<String>,
        /// Permission mode to pass through to the assistant process
        #[arg(long)]
        permission_mode: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Doctor => commands::doctor().await,
        Commands::Run {
            project,
            resume,
            message,
            permission_mode,
        } => commands::run(project, resume, message.as_deref(), permission_mode.as_deref()).await,
    }
}
