//! Subprocess-backed agent driver
//!
//! Spawns the configured agent binary, writes the prompt to its stdin, and
//! decodes JSON-line events from its stdout. Lines that are not valid event
//! JSON are relayed as plain `text` events so nothing is lost.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentDriver, AgentEvent, AgentRequest, AgentTurnOutcome};
use crate::error::{EngineError, EngineResult};

/// Drives an external agent process over stdio.
#[derive(Debug, Default, Clone)]
pub struct ProcessAgentDriver;

impl ProcessAgentDriver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AgentDriver for ProcessAgentDriver {
    async fn run_agent(
        &self,
        request: AgentRequest,
        events: mpsc::Sender<AgentEvent>,
        cancel: CancellationToken,
    ) -> EngineResult<AgentTurnOutcome> {
        let launcher = request.provider.resolve_launcher();
        let program = launcher.first().ok_or_else(|| {
            EngineError::config("no agent launcher configured (set provider.launcher or POLISH_AGENT_CMD)")
        })?;

        let mut cmd = Command::new(program);
        cmd.args(&launcher[1..])
            .current_dir(&request.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        // Credentials live only in the child's environment for this one
        // invocation; the engine's own environment is never touched.
        cmd.envs(request.provider.env_vars());
        if !request.capabilities.tools.is_empty() {
            cmd.env("POLISH_AGENT_TOOLS", request.capabilities.tools.join(","));
        }
        if !request.capabilities.mcp_servers.is_empty() {
            cmd.env(
                "POLISH_AGENT_MCP_SERVERS",
                request.capabilities.mcp_servers.join(","),
            );
        }
        if let Some(budget) = request.capabilities.max_thinking_tokens {
            cmd.env("POLISH_AGENT_MAX_THINKING_TOKENS", budget.to_string());
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let message = format!("failed to spawn agent '{program}': {e}");
                let _ = events.send(AgentEvent::Error { message: message.clone() }).await;
                return Ok(AgentTurnOutcome::Failed { message });
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(request.prompt.as_bytes()).await {
                tracing::warn!(error = %e, "failed to write prompt to agent stdin");
            }
            // Close stdin so the agent sees EOF after the prompt.
            drop(stdin);
        }

        let stdout = child.stdout.take().expect("stdout piped");
        let mut lines = BufReader::new(stdout).lines();

        let deadline = request.timeout.map(|t| tokio::time::Instant::now() + t);
        let mut failure: Option<String> = None;
        let mut saw_done = false;

        loop {
            let next_line = async {
                match deadline {
                    Some(deadline) => tokio::time::timeout_at(deadline, lines.next_line())
                        .await
                        .unwrap_or_else(|_| Err(std::io::Error::new(
                            std::io::ErrorKind::TimedOut,
                            "agent turn exceeded its budget",
                        ))),
                    None => lines.next_line().await,
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    kill_process_group(&mut child).await;
                    let _ = events.send(AgentEvent::Cancelled).await;
                    return Ok(AgentTurnOutcome::Cancelled);
                }
                line = next_line => match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let event = serde_json::from_str::<AgentEvent>(&line)
                            .unwrap_or(AgentEvent::Text { text: line });
                        match &event {
                            AgentEvent::Done => saw_done = true,
                            AgentEvent::Error { message } => failure = Some(message.clone()),
                            _ => {}
                        }
                        if events.send(event).await.is_err() {
                            // Consumer went away; stop relaying.
                            kill_process_group(&mut child).await;
                            return Ok(AgentTurnOutcome::Cancelled);
                        }
                    }
                    Ok(None) => break,
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                        kill_process_group(&mut child).await;
                        let message = "agent turn exceeded its budget".to_string();
                        let _ = events.send(AgentEvent::Error { message: message.clone() }).await;
                        return Ok(AgentTurnOutcome::Failed { message });
                    }
                    Err(e) => {
                        failure = Some(format!("agent stream read failed: {e}"));
                        break;
                    }
                },
            }
        }

        let status = child.wait().await;
        let exited_cleanly = matches!(&status, Ok(s) if s.success());

        if let Some(message) = failure {
            return Ok(AgentTurnOutcome::Failed { message });
        }
        if !exited_cleanly {
            let code = status.ok().and_then(|s| s.code()).unwrap_or(-1);
            let message = format!("agent exited with code {code}");
            let _ = events.send(AgentEvent::Error { message: message.clone() }).await;
            return Ok(AgentTurnOutcome::Failed { message });
        }
        if !saw_done {
            let _ = events.send(AgentEvent::Done).await;
        }
        Ok(AgentTurnOutcome::Completed)
    }
}

async fn kill_process_group(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: kill() is async-signal-safe; negative PID targets the group.
        unsafe {
            libc::kill(-(pid as i32), libc::SIGTERM);
        }
    }
    let _ = child.kill().await;
}
