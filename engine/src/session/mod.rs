//! Session model
//!
//! A session is one end-to-end improvement run. Its status moves through a
//! fixed state machine; every mutation goes through [`Session::transition`]
//! so illegal moves are rejected instead of silently applied.

pub mod events;
pub mod store;
pub mod supervisor;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::plan::ApprovedPlan;
use crate::polish_loop::StopReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Planning,
    AwaitingApproval,
    Running,
    Reviewing,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn is_live(self) -> bool {
        !self.is_terminal()
    }

    /// Whether moving to `to` is legal from this state.
    ///
    /// `cancelled` is reachable from any live state (abort); `completed` and
    /// `failed` only from `running`; retry re-enters `running` from either
    /// terminal outcome.
    pub fn can_transition(self, to: SessionStatus) -> bool {
        use SessionStatus::*;
        if self.is_live() && to == Cancelled {
            return true;
        }
        matches!(
            (self, to),
            (Pending, Planning)
                | (Pending, Running)
                | (Planning, AwaitingApproval)
                | (Planning, Planning)
                | (AwaitingApproval, Running)
                | (AwaitingApproval, Planning)
                | (Running, Reviewing)
                | (Reviewing, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Planning, Failed)
                | (AwaitingApproval, Failed)
                | (Reviewing, Failed)
                | (Completed, Running)
                | (Failed, Running)
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Planning => "planning",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Running => "running",
            Self::Reviewing => "reviewing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// One end-to-end run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub project_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mission: Option<String>,
    /// Assigned when the worktree is created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    pub status: SessionStatus,
    pub target: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_score: Option<f64>,
    pub commits: u32,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_plan: Option<ApprovedPlan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    /// Capability ids selected for this run (planning + implementation).
    #[serde(default)]
    pub capability_ids: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(project_path: PathBuf, mission: Option<String>, target: f64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            project_path,
            mission,
            branch_name: None,
            status: SessionStatus::Pending,
            target,
            initial_score: None,
            final_score: None,
            commits: 0,
            retry_count: 0,
            approved_plan: None,
            stop_reason: None,
            capability_ids: Vec::new(),
            started_at: now,
            updated_at: now,
        }
    }

    pub fn short_id(&self) -> &str {
        &self.id[..8.min(self.id.len())]
    }

    /// Apply a status transition, rejecting illegal moves.
    pub fn transition(&mut self, to: SessionStatus) -> EngineResult<()> {
        if !self.status.can_transition(to) {
            return Err(EngineError::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        tracing::debug!(session_id = %self.short_id(), from = %self.status, to = %to, "session transition");
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }
}
