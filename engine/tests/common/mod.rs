//! Shared fixtures for the integration suite: throwaway git repositories
//! and a scripted agent driver that replays programmed turns.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::process::Command;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use polish_engine::agent::{
    AgentDriver, AgentEvent, AgentRequest, AgentTurnOutcome, ProviderConfig,
};
use polish_engine::error::EngineResult;
use polish_engine::preset::Preset;
use polish_engine::score::Metric;
use polish_engine::session::supervisor::{
    CreateSessionRequest, Supervisor, SupervisorConfig,
};

/// Initialise a git repo with one committed file.
pub fn init_git_repo(path: &Path, files: &[(&str, &str)]) {
    for args in [
        vec!["init", "-b", "main"],
        vec!["config", "user.email", "test@test.com"],
        vec!["config", "user.name", "Test"],
    ] {
        Command::new("git")
            .args(&args)
            .current_dir(path)
            .output()
            .expect("git setup failed");
    }
    for (name, content) in files {
        std::fs::write(path.join(name), content).unwrap();
    }
    Command::new("git")
        .args(["add", "."])
        .current_dir(path)
        .output()
        .unwrap();
    Command::new("git")
        .args(["commit", "-m", "initial"])
        .current_dir(path)
        .output()
        .unwrap();
}

/// A preset with one `tests` metric that reads its score from a file.
pub fn results_preset(target: f64, max_iterations: u32) -> Preset {
    Preset {
        metrics: vec![Metric::new("tests", "cat results.txt").with_weight(100.0)],
        target,
        max_iterations,
        ..Preset::default()
    }
}

/// Build a supervisor whose sessions and worktrees live under `root`.
pub fn supervisor(root: &Path, driver: Arc<dyn AgentDriver>) -> Supervisor {
    let config = SupervisorConfig {
        sessions_root: root.join("sessions"),
        scratch_root: root.join("scratch"),
        backlog_limit: 200,
    };
    Supervisor::new(config, driver).unwrap()
}

pub fn create_request(project: &Path) -> CreateSessionRequest {
    CreateSessionRequest {
        project_path: project.to_path_buf(),
        mission: None,
        enable_planning: false,
        preset: None,
        provider: ProviderConfig::default(),
        strict: false,
        wall_clock_budget: None,
    }
}

/// One step of a scripted agent turn.
pub enum TurnOp {
    /// Write a file in the agent's working directory.
    Write(&'static str, &'static str),
    /// Emit an event into the stream.
    Emit(AgentEvent),
    /// Block until cancelled, then end the turn as cancelled.
    Hang,
    /// End the turn as failed.
    Fail(&'static str),
}

/// Replays programmed turns in order; turns beyond the script are no-ops.
/// Records every prompt it receives.
pub struct ScriptedAgentDriver {
    turns: Mutex<VecDeque<Vec<TurnOp>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedAgentDriver {
    pub fn new(turns: Vec<Vec<TurnOp>>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentDriver for ScriptedAgentDriver {
    async fn run_agent(
        &self,
        request: AgentRequest,
        events: mpsc::Sender<AgentEvent>,
        cancel: CancellationToken,
    ) -> EngineResult<AgentTurnOutcome> {
        self.prompts.lock().unwrap().push(request.prompt.clone());
        let ops = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();

        for op in ops {
            match op {
                TurnOp::Write(path, content) => {
                    std::fs::write(request.cwd.join(path), content).unwrap();
                }
                TurnOp::Emit(event) => {
                    let _ = events.send(event).await;
                }
                TurnOp::Hang => {
                    cancel.cancelled().await;
                    let _ = events.send(AgentEvent::Cancelled).await;
                    return Ok(AgentTurnOutcome::Cancelled);
                }
                TurnOp::Fail(message) => {
                    let _ = events
                        .send(AgentEvent::Error {
                            message: message.to_string(),
                        })
                        .await;
                    return Ok(AgentTurnOutcome::Failed {
                        message: message.to_string(),
                    });
                }
            }
        }
        let _ = events.send(AgentEvent::Done).await;
        Ok(AgentTurnOutcome::Completed)
    }
}
