//! Session event union
//!
//! One flat tagged union covering every event subscribers can observe:
//! scoring events, worktree lifecycle, plan flow, review flow, relayed
//! agent-stream events, and terminal outcomes. Events are append-only and
//! totally ordered within a session by their monotonic id.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::AgentEvent;
use crate::plan::Plan;
use crate::polish_loop::StopReason;
use crate::score::Score;
use crate::session::SessionStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolishEvent {
    /// Session status changed.
    Status { status: SessionStatus },
    /// A new phase began (planning, implementation, polishing).
    Phase { phase: String },
    /// Initial score computed.
    Init { score: Score },
    Iteration { iteration: u32 },
    /// The loop picked the metric it will improve this iteration.
    Improving { metric: String },
    /// A scoring pass was accepted as the new current score.
    Score { score: Score },
    Commit { hash: String, message: String },
    Rollback,
    WorktreeCreated { path: PathBuf, base_branch: String },
    WorktreeCleanup {
        path: PathBuf,
        kept: bool,
        branch: Option<String>,
    },
    Result {
        success: bool,
        reason: StopReason,
        final_score: f64,
        commits: u32,
    },
    Error { message: String },
    Aborted,
    Plan { plan: Plan },
    PlanMessage { text: String },
    PlanApproved { approach_id: String },
    PlanRejected { reason: Option<String> },
    ReviewStart,
    ReviewComplete { approved: bool },
    ReviewRedirect { feedback: String },

    // Relayed agent-stream events.
    Text { text: String },
    Thinking { text: String },
    ToolStart {
        id: String,
        name: String,
        display: String,
    },
    ToolDone {
        id: String,
        success: bool,
        output: Option<String>,
        error: Option<String>,
        duration_ms: u64,
    },
    SubAgentStart { id: String, name: String },
    SubAgentDone { id: String, success: bool },
    #[serde(rename = "done")]
    AgentDone,
    #[serde(rename = "cancelled")]
    AgentCancelled,
}

impl PolishEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::Phase { .. } => "phase",
            Self::Init { .. } => "init",
            Self::Iteration { .. } => "iteration",
            Self::Improving { .. } => "improving",
            Self::Score { .. } => "score",
            Self::Commit { .. } => "commit",
            Self::Rollback => "rollback",
            Self::WorktreeCreated { .. } => "worktree_created",
            Self::WorktreeCleanup { .. } => "worktree_cleanup",
            Self::Result { .. } => "result",
            Self::Error { .. } => "error",
            Self::Aborted => "aborted",
            Self::Plan { .. } => "plan",
            Self::PlanMessage { .. } => "plan_message",
            Self::PlanApproved { .. } => "plan_approved",
            Self::PlanRejected { .. } => "plan_rejected",
            Self::ReviewStart => "review_start",
            Self::ReviewComplete { .. } => "review_complete",
            Self::ReviewRedirect { .. } => "review_redirect",
            Self::Text { .. } => "text",
            Self::Thinking { .. } => "thinking",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolDone { .. } => "tool_done",
            Self::SubAgentStart { .. } => "sub_agent_start",
            Self::SubAgentDone { .. } => "sub_agent_done",
            Self::AgentDone => "done",
            Self::AgentCancelled => "cancelled",
        }
    }

    /// Re-type an agent-stream event into the session union.
    pub fn from_agent(event: AgentEvent) -> Self {
        match event {
            AgentEvent::Text { text } => Self::Text { text },
            AgentEvent::Thinking { text } => Self::Thinking { text },
            AgentEvent::ToolStart { id, name, display } => Self::ToolStart { id, name, display },
            AgentEvent::ToolDone {
                id,
                success,
                output,
                error,
                duration_ms,
            } => Self::ToolDone {
                id,
                success,
                output,
                error,
                duration_ms,
            },
            AgentEvent::Plan { plan } => Self::Plan { plan },
            AgentEvent::PlanMessage { text } => Self::PlanMessage { text },
            AgentEvent::SubAgentStart { id, name } => Self::SubAgentStart { id, name },
            AgentEvent::SubAgentDone { id, success } => Self::SubAgentDone { id, success },
            AgentEvent::Done => Self::AgentDone,
            AgentEvent::Cancelled => Self::AgentCancelled,
            AgentEvent::Error { message } => Self::Error { message },
        }
    }
}

/// An event as recorded on a session's append-only log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Monotonic within the session; subscribers observe insertion order.
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: PolishEvent,
}

impl EventRecord {
    pub fn new(id: u64, event: PolishEvent) -> Self {
        Self {
            id,
            timestamp: Utc::now(),
            event,
        }
    }

    /// Encode as one server-sent-events frame.
    pub fn to_sse_frame(&self) -> String {
        let data = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("event: {}\ndata: {}\n\n", self.event.event_type(), data)
    }
}
