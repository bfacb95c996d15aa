//! The polish loop
//!
//! Control algorithm for one run: measure, pick the worst metric, ask the
//! agent to fix it, re-measure, commit or roll back, repeat. A snapshot is
//! taken before every agent turn; after the turn either exactly one commit
//! lands or the snapshot is fully restored, so every commit improves the
//! total by at least the minimum-improvement threshold.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentDriver, AgentRequest, AgentTurnOutcome};
use crate::error::{EngineError, EngineResult};
use crate::plan::ApprovedPlan;
use crate::preset::Preset;
use crate::score::{Score, Scorer};
use crate::session::events::PolishEvent;
use crate::state_file::{self, StateFile};
use crate::strategy;
use crate::vcs::GitWorkspace;

/// Minimum total-score delta a commit must achieve.
pub const DEFAULT_MIN_IMPROVEMENT: f64 = 0.5;

/// Consecutive stalls before the loop declares a plateau.
pub const DEFAULT_MAX_STALLED: u32 = 5;

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    TargetReached,
    Plateau,
    MaxIterations,
    MaxDuration,
    Error,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::TargetReached => "target_reached",
            Self::Plateau => "plateau",
            Self::MaxIterations => "max_iterations",
            Self::MaxDuration => "max_duration",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Volatile per-run state.
#[derive(Debug, Clone)]
pub struct LoopState {
    /// 1-based once the first iteration starts.
    pub iteration: u32,
    /// Accepted totals; `scores[0]` is the initial total and consecutive
    /// entries differ by at least the minimum improvement.
    pub scores: Vec<f64>,
    pub stalled_count: u32,
    pub last_improvement_iter: u32,
    pub worktree_path: PathBuf,
}

/// How one run of the loop ended.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub success: bool,
    pub reason: StopReason,
    pub initial_total: f64,
    pub final_total: f64,
    pub commits: u32,
}

/// Inputs for one run of the loop.
#[derive(Clone)]
pub struct LoopConfig {
    pub session_id: String,
    pub preset: Preset,
    pub mission: String,
    pub approved_plan: Option<ApprovedPlan>,
    pub worktree_path: PathBuf,
    pub provider: crate::agent::ProviderConfig,
    pub wall_clock_budget: Option<Duration>,
}

pub struct PolishLoop {
    config: LoopConfig,
    driver: Arc<dyn AgentDriver>,
    events: mpsc::Sender<PolishEvent>,
    cancel: CancellationToken,
    started_at: DateTime<Utc>,
}

impl PolishLoop {
    pub fn new(
        config: LoopConfig,
        driver: Arc<dyn AgentDriver>,
        events: mpsc::Sender<PolishEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            driver,
            events,
            cancel,
            started_at: Utc::now(),
        }
    }

    /// Run the loop to completion.
    ///
    /// Returns `Err(Cancelled)` only for an abort; every other ending,
    /// including fatal worktree failures, is reported through the returned
    /// [`LoopOutcome`] after the matching `result` event.
    pub async fn run(self) -> EngineResult<LoopOutcome> {
        let vcs = GitWorkspace::new(&self.config.worktree_path);
        let scorer = Scorer::new(&self.config.worktree_path);
        let preset = &self.config.preset;
        let deadline = self.config.wall_clock_budget.map(|b| Instant::now() + b);

        let initial = scorer.calculate(&preset.metrics).await;
        let mut state = LoopState {
            iteration: 0,
            scores: vec![initial.total],
            stalled_count: 0,
            last_improvement_iter: 0,
            worktree_path: self.config.worktree_path.clone(),
        };
        self.write_state(&state);
        self.emit(PolishEvent::Init {
            score: initial.clone(),
        })
        .await;

        let mut current = initial.clone();
        let mut commits = 0u32;

        if current.total >= preset.target {
            return Ok(self
                .finish(true, StopReason::TargetReached, &initial, &current, commits)
                .await);
        }

        if !self.config.mission.is_empty() {
            self.emit(PolishEvent::Phase {
                phase: "implementation".into(),
            })
            .await;
            let prompt =
                strategy::mission_prompt(&self.config.mission, self.config.approved_plan.as_ref());
            match self.run_agent_turn(prompt, deadline).await? {
                AgentTurnOutcome::Completed => {}
                AgentTurnOutcome::Cancelled => return Err(EngineError::Cancelled),
                AgentTurnOutcome::Failed { message } => {
                    tracing::warn!(session_id = %self.config.session_id, %message, "mission turn failed");
                }
            }
            self.emit(PolishEvent::Phase {
                phase: "polishing".into(),
            })
            .await;
        }

        loop {
            if self.cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            if state.iteration >= preset.max_iterations {
                let success = current.total >= preset.target;
                return Ok(self
                    .finish(success, StopReason::MaxIterations, &initial, &current, commits)
                    .await);
            }

            state.iteration += 1;
            self.emit(PolishEvent::Iteration {
                iteration: state.iteration,
            })
            .await;

            let Some(worst) = current.find_worst().cloned() else {
                // No metrics: nothing can ever improve.
                return Ok(self
                    .finish(false, StopReason::Plateau, &initial, &current, commits)
                    .await);
            };
            self.emit(PolishEvent::Improving {
                metric: worst.name.clone(),
            })
            .await;

            let snapshot = match vcs.snapshot().await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    return Ok(self
                        .fatal(format!("snapshot failed: {e}"), &initial, &current, commits)
                        .await);
                }
            };

            let prompt = strategy::build_fix_prompt(&preset.strategies, &worst);
            match self.run_agent_turn(prompt, deadline).await? {
                AgentTurnOutcome::Completed => {
                    let changed = match vcs.has_changes().await {
                        Ok(changed) => changed,
                        Err(e) => {
                            tracing::warn!(error = %e, "status check failed after agent turn");
                            match vcs.rollback(snapshot.as_ref()).await {
                                Ok(()) => {
                                    self.emit(PolishEvent::Rollback).await;
                                    state.stalled_count += 1;
                                    self.write_state(&state);
                                    if let Some(outcome) = self
                                        .check_stop(&state, deadline, &initial, &current, commits)
                                        .await
                                    {
                                        return Ok(outcome);
                                    }
                                    continue;
                                }
                                Err(e) => {
                                    return Ok(self
                                        .fatal(e.to_string(), &initial, &current, commits)
                                        .await);
                                }
                            }
                        }
                    };

                    if !changed {
                        state.stalled_count += 1;
                        self.write_state(&state);
                    } else {
                        let new = scorer.calculate(&preset.metrics).await;
                        if new.total - current.total >= preset.min_improvement {
                            let message = format!(
                                "polish({}): {} -> {}",
                                worst.name,
                                format_total(current.total),
                                format_total(new.total)
                            );
                            match vcs.commit(&message).await {
                                Ok(hash) => {
                                    commits += 1;
                                    self.emit(PolishEvent::Commit {
                                        hash,
                                        message,
                                    })
                                    .await;
                                    self.emit(PolishEvent::Score { score: new.clone() }).await;
                                    current = new;
                                    state.scores.push(current.total);
                                    state.stalled_count = 0;
                                    state.last_improvement_iter = state.iteration;
                                }
                                Err(e) => {
                                    tracing::warn!(error = %e, "commit failed, rolling back");
                                    match vcs.rollback(snapshot.as_ref()).await {
                                        Ok(()) => {
                                            self.emit(PolishEvent::Rollback).await;
                                            state.stalled_count += 1;
                                        }
                                        Err(e) => {
                                            return Ok(self
                                                .fatal(e.to_string(), &initial, &current, commits)
                                                .await);
                                        }
                                    }
                                }
                            }
                        } else {
                            match vcs.rollback(snapshot.as_ref()).await {
                                Ok(()) => {
                                    self.emit(PolishEvent::Rollback).await;
                                    state.stalled_count += 1;
                                }
                                Err(e) => {
                                    return Ok(self
                                        .fatal(e.to_string(), &initial, &current, commits)
                                        .await);
                                }
                            }
                        }
                        self.write_state(&state);
                    }
                }
                AgentTurnOutcome::Cancelled => {
                    match vcs.rollback(snapshot.as_ref()).await {
                        Ok(()) => self.emit(PolishEvent::Rollback).await,
                        Err(e) => tracing::error!(error = %e, "rollback after abort failed"),
                    }
                    return Err(EngineError::Cancelled);
                }
                AgentTurnOutcome::Failed { message } => {
                    tracing::warn!(session_id = %self.config.session_id, %message, "agent turn failed");
                    match vcs.rollback(snapshot.as_ref()).await {
                        Ok(()) => {
                            self.emit(PolishEvent::Rollback).await;
                            state.stalled_count += 1;
                            self.write_state(&state);
                        }
                        Err(e) => {
                            return Ok(self
                                .fatal(e.to_string(), &initial, &current, commits)
                                .await);
                        }
                    }
                }
            }

            if let Some(outcome) = self
                .check_stop(&state, deadline, &initial, &current, commits)
                .await
            {
                return Ok(outcome);
            }
        }
    }

    /// Post-iteration termination checks: target, plateau, wall clock.
    async fn check_stop(
        &self,
        state: &LoopState,
        deadline: Option<Instant>,
        initial: &Score,
        current: &Score,
        commits: u32,
    ) -> Option<LoopOutcome> {
        if current.total >= self.config.preset.target {
            return Some(
                self.finish(true, StopReason::TargetReached, initial, current, commits)
                    .await,
            );
        }
        if state.stalled_count >= self.config.preset.max_stalled {
            return Some(
                self.finish(true, StopReason::Plateau, initial, current, commits)
                    .await,
            );
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return Some(
                    self.finish(true, StopReason::MaxDuration, initial, current, commits)
                        .await,
                );
            }
        }
        None
    }

    async fn finish(
        &self,
        success: bool,
        reason: StopReason,
        initial: &Score,
        current: &Score,
        commits: u32,
    ) -> LoopOutcome {
        self.emit(PolishEvent::Result {
            success,
            reason,
            final_score: current.total,
            commits,
        })
        .await;
        tracing::info!(
            session_id = %self.config.session_id,
            %reason,
            initial = initial.total,
            final_total = current.total,
            commits,
            "loop finished"
        );
        LoopOutcome {
            success,
            reason,
            initial_total: initial.total,
            final_total: current.total,
            commits,
        }
    }

    async fn fatal(
        &self,
        message: String,
        initial: &Score,
        current: &Score,
        commits: u32,
    ) -> LoopOutcome {
        tracing::error!(session_id = %self.config.session_id, %message, "fatal loop failure");
        self.emit(PolishEvent::Error { message }).await;
        self.finish(false, StopReason::Error, initial, current, commits)
            .await
    }

    /// Run one agent turn, relaying its events into the session sink.
    async fn run_agent_turn(
        &self,
        prompt: String,
        deadline: Option<Instant>,
    ) -> EngineResult<AgentTurnOutcome> {
        let timeout = deadline.map(|d| d.saturating_duration_since(Instant::now()));
        let request = AgentRequest {
            prompt,
            capabilities: self.config.preset.capabilities.implementation.clone(),
            provider: self.config.provider.clone(),
            cwd: self.config.worktree_path.clone(),
            timeout,
        };

        let (tx, mut rx) = mpsc::channel(64);
        let driver = Arc::clone(&self.driver);
        let cancel = self.cancel.clone();
        let run = tokio::spawn(async move { driver.run_agent(request, tx, cancel).await });

        while let Some(event) = rx.recv().await {
            self.emit(PolishEvent::from_agent(event)).await;
        }

        run.await
            .map_err(|e| EngineError::agent(format!("agent task panicked: {e}")))?
    }

    async fn emit(&self, event: PolishEvent) {
        let _ = self.events.send(event).await;
    }

    fn write_state(&self, state: &LoopState) {
        let file = StateFile {
            iteration: state.iteration,
            scores: state.scores.clone(),
            last_improvement: state.last_improvement_iter,
            stalled_count: state.stalled_count,
            worktree_path: Some(state.worktree_path.clone()),
            started_at: self.started_at,
            last_updated: Utc::now(),
        };
        if let Err(e) = state_file::save(&self.config.worktree_path, &file) {
            tracing::warn!(error = %e, "failed to write state file");
        }
    }
}

/// One decimal, no trailing zero for whole numbers (`80`, `85.5`).
fn format_total(total: f64) -> String {
    if total.fract() == 0.0 {
        format!("{}", total as i64)
    } else {
        format!("{total:.1}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_reason_wire_names() {
        assert_eq!(
            serde_json::to_string(&StopReason::TargetReached).unwrap(),
            "\"target_reached\""
        );
        assert_eq!(StopReason::MaxDuration.to_string(), "max_duration");
        assert_eq!(StopReason::Plateau.to_string(), "plateau");
    }

    #[test]
    fn commit_message_formatting() {
        assert_eq!(format_total(80.0), "80");
        assert_eq!(format_total(85.5), "85.5");
        let message = format!("polish({}): {} -> {}", "tests", format_total(80.0), format_total(100.0));
        assert_eq!(message, "polish(tests): 80 -> 100");
    }
}
