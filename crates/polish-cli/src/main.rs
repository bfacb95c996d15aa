//! Polish CLI
//!
//! Front-end for the polish engine: run a session against a repository,
//! serve the stop-hook protocol over stdio, or reset loop state.
//!
//! Exit codes for `run`: 0 = target reached, 1 = plateau or iteration
//! exhaustion below target, 2 = fatal error.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use polish_engine::agent::process::ProcessAgentDriver;
use polish_engine::agent::{ProviderConfig, ProviderKind};
use polish_engine::session::events::PolishEvent;
use polish_engine::{
    CreateSessionRequest, Session, SessionStatus, StopReason, Supervisor, SupervisorConfig,
};

#[derive(Parser, Debug)]
#[command(name = "polish", version, about = "Iterative code-quality polish loop", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a polish session against a repository
    Run {
        /// Repository to polish
        #[arg(long, default_value = ".")]
        path: PathBuf,

        /// Optional mission executed before the loop starts
        #[arg(long)]
        mission: Option<String>,

        /// Run an interactive planning phase first (requires a mission)
        #[arg(long, default_value_t = false)]
        plan: bool,

        /// Override the preset's target total score
        #[arg(long)]
        target: Option<f64>,

        /// Override the preset's maximum iterations
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Fail on missing or empty metric configuration
        #[arg(long, default_value_t = false)]
        strict: bool,

        /// Launcher command for the external agent (overrides POLISH_AGENT_CMD)
        #[arg(long)]
        agent_cmd: Option<String>,

        /// Model identifier passed through to the agent
        #[arg(long)]
        model: Option<String>,

        /// Wall-clock budget in seconds for the whole session
        #[arg(long, default_value_t = 300)]
        budget_secs: u64,
    },
    /// Answer one stop-hook request on stdin with a decision on stdout
    StopHook,
    /// Delete the loop state file
    Reset {
        #[arg(long, default_value = ".")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "fatal");
            2
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Run {
            path,
            mission,
            plan,
            target,
            max_iterations,
            strict,
            agent_cmd,
            model,
            budget_secs,
        } => {
            let path = path.canonicalize()?;
            let mut preset = polish_engine::preset::load_preset(&path, strict)?;
            if let Some(target) = target {
                preset.target = target;
            }
            if let Some(max) = max_iterations {
                preset.max_iterations = max;
            }

            let provider = ProviderConfig {
                kind: ProviderKind::Custom,
                model,
                launcher: agent_cmd
                    .map(|cmd| cmd.split_whitespace().map(str::to_string).collect())
                    .unwrap_or_default(),
                ..ProviderConfig::default()
            };

            let sessions_root = path.join(".polish").join("sessions");
            let supervisor = Supervisor::new(
                SupervisorConfig::new(sessions_root),
                Arc::new(ProcessAgentDriver::new()),
            )?;

            let target_total = preset.target;
            let session_id = supervisor
                .create_session(CreateSessionRequest {
                    project_path: path,
                    mission,
                    enable_planning: plan,
                    preset: Some(preset),
                    provider,
                    strict,
                    wall_clock_budget: Some(Duration::from_secs(budget_secs)),
                })
                .await?;
            tracing::info!(session_id = %session_id, "session started");

            let mut subscription = supervisor.subscribe(&session_id).await?;
            let printer = tokio::spawn(async move {
                for record in subscription.backlog.drain(..) {
                    print_event(&record.event);
                }
                while let Some(record) = subscription.next_live().await {
                    print_event(&record.event);
                }
            });

            let session = supervisor.wait(&session_id).await?;
            let _ = printer.await;
            Ok(exit_code(&session, target_total))
        }
        Commands::StopHook => {
            polish_engine::hook::run_stop_hook(tokio::io::stdin(), tokio::io::stdout()).await?;
            Ok(0)
        }
        Commands::Reset { path } => {
            polish_engine::state_file::reset(&path)?;
            tracing::info!(path = %path.display(), "state file removed");
            Ok(0)
        }
    }
}

fn print_event(event: &PolishEvent) {
    match event {
        PolishEvent::Init { score } => tracing::info!(total = score.total, "initial score"),
        PolishEvent::Iteration { iteration } => tracing::info!(iteration, "iteration"),
        PolishEvent::Improving { metric } => tracing::info!(metric = %metric, "improving"),
        PolishEvent::Score { score } => tracing::info!(total = score.total, "score accepted"),
        PolishEvent::Commit { hash, message } => {
            tracing::info!(hash = %hash, message = %message, "commit")
        }
        PolishEvent::Rollback => tracing::info!("rollback"),
        PolishEvent::Result {
            success,
            reason,
            final_score,
            commits,
        } => tracing::info!(success, %reason, final_score, commits, "result"),
        PolishEvent::Error { message } => tracing::error!(message = %message, "error"),
        PolishEvent::Text { text } => tracing::debug!(text = %text, "agent"),
        other => tracing::debug!(event = other.event_type(), "event"),
    }
}

fn exit_code(session: &Session, target: f64) -> i32 {
    match (session.status, session.stop_reason) {
        (_, Some(StopReason::TargetReached)) => 0,
        (SessionStatus::Completed | SessionStatus::Failed, Some(_))
            if session.final_score.unwrap_or(0.0) >= target =>
        {
            0
        }
        (SessionStatus::Completed, Some(StopReason::Plateau | StopReason::MaxIterations | StopReason::MaxDuration)) => 1,
        (SessionStatus::Failed, Some(StopReason::MaxIterations)) => 1,
        (SessionStatus::Cancelled, _) => 1,
        _ => 2,
    }
}
