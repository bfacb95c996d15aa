//! Agent driver seam
//!
//! The engine never talks to an LLM directly; it hands a prompt plus a
//! resolved capability set to an [`AgentDriver`] and consumes the ordered
//! event stream the driver pushes back. Events are lossless: callers may
//! buffer, fan out, and replay them.

pub mod process;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::EngineResult;
use crate::plan::Plan;

/// Events yielded by one agent turn, in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Incremental agent text.
    Text { text: String },
    /// Extended-reasoning text, when the provider exposes it.
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
    /// A structured plan proposal (planning phase only).
    Plan { plan: Plan },
    PlanMessage { text: String },
    SubAgentStart { id: String, name: String },
    SubAgentDone { id: String, success: bool },
    /// Terminal: the turn finished normally.
    Done,
    /// Terminal: the turn was cancelled.
    Cancelled,
    /// Terminal: the turn failed.
    Error { message: String },
}

impl AgentEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Thinking { .. } => "thinking",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolDone { .. } => "tool_done",
            Self::Plan { .. } => "plan",
            Self::PlanMessage { .. } => "plan_message",
            Self::SubAgentStart { .. } => "sub_agent_start",
            Self::SubAgentDone { .. } => "sub_agent_done",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Cancelled | Self::Error { .. })
    }
}

/// Tools, MCP servers, and thinking budget exposed for one phase.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitySet {
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub mcp_servers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_thinking_tokens: Option<u32>,
}

/// Which credential/env convention the launched agent expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    Openai,
    #[default]
    Custom,
}

/// Provider identity for one agent invocation.
///
/// Credentials are supplied per invocation and applied only to the spawned
/// child's environment; nothing is retained across invocations and nothing
/// touches the engine's own process environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Launcher argv for the external agent binary; the prompt arrives on
    /// its stdin, events leave as JSON lines on its stdout.
    #[serde(default)]
    pub launcher: Vec<String>,
}

impl ProviderConfig {
    /// Environment applied to the spawned agent, keyed by provider kind.
    pub fn env_vars(&self) -> HashMap<String, String> {
        let (key_var, url_var) = match self.kind {
            ProviderKind::Anthropic => ("ANTHROPIC_API_KEY", "ANTHROPIC_BASE_URL"),
            ProviderKind::Openai => ("OPENAI_API_KEY", "OPENAI_BASE_URL"),
            ProviderKind::Custom => ("POLISH_AGENT_API_KEY", "POLISH_AGENT_BASE_URL"),
        };

        let mut env = HashMap::new();
        if let Some(key) = &self.api_key {
            env.insert(key_var.to_string(), key.clone());
        }
        if let Some(url) = &self.base_url {
            env.insert(url_var.to_string(), url.clone());
        }
        if let Some(model) = &self.model {
            env.insert("POLISH_AGENT_MODEL".to_string(), model.clone());
        }
        env
    }

    /// Resolve the launcher from `POLISH_AGENT_CMD` when none is configured.
    pub fn resolve_launcher(&self) -> Vec<String> {
        if !self.launcher.is_empty() {
            return self.launcher.clone();
        }
        std::env::var("POLISH_AGENT_CMD")
            .map(|cmd| cmd.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }
}

/// One agent invocation: prompt plus the exact capabilities to expose.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub prompt: String,
    pub capabilities: CapabilitySet,
    pub provider: ProviderConfig,
    pub cwd: PathBuf,
    pub timeout: Option<Duration>,
}

/// How an agent turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentTurnOutcome {
    Completed,
    Cancelled,
    Failed { message: String },
}

/// Seam between the loop and the external LLM agent.
///
/// Implementations push ordered [`AgentEvent`]s into `events` and emit a
/// terminal event exactly once. Cancellation must terminate the remote turn,
/// emit `Cancelled`, and close the stream.
#[async_trait]
pub trait AgentDriver: Send + Sync {
    async fn run_agent(
        &self,
        request: AgentRequest,
        events: mpsc::Sender<AgentEvent>,
        cancel: CancellationToken,
    ) -> EngineResult<AgentTurnOutcome>;
}
