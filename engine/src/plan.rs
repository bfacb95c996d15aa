//! Implementation planning
//!
//! Before the loop, a session with a mission may run a planning dialogue:
//! a specialised agent turn whose output carries one or more structured
//! plan proposals. The user approves one approach, rejects with feedback
//! (the dialogue continues), or rejects outright (the session is cancelled).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentDriver, AgentEvent, AgentRequest, AgentTurnOutcome, CapabilitySet, ProviderConfig};
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

/// One step of a proposed implementation plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub files: Vec<String>,
    pub complexity: Complexity,
}

/// One candidate approach; a plan proposal may offer several.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanApproach {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub steps: Vec<PlanStep>,
}

/// A structured plan proposal plus its human markdown summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub approaches: Vec<PlanApproach>,
    #[serde(default)]
    pub summary: String,
}

/// The approach the user selected out of a proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovedPlan {
    pub approach_id: String,
    pub plan: Plan,
}

impl ApprovedPlan {
    pub fn approach(&self) -> Option<&PlanApproach> {
        self.plan
            .approaches
            .iter()
            .find(|a| a.id == self.approach_id)
    }

    /// Render the selected approach as markdown for inclusion in a prompt.
    pub fn render(&self) -> String {
        let Some(approach) = self.approach() else {
            return String::new();
        };
        let mut out = format!("## Approved plan: {}\n", approach.title);
        for step in &approach.steps {
            out.push_str(&format!("- [{}] {}: {}", step.id, step.title, step.description));
            if !step.files.is_empty() {
                out.push_str(&format!(" (files: {})", step.files.join(", ")));
            }
            out.push('\n');
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanRole {
    User,
    Agent,
}

#[derive(Debug, Clone)]
pub struct PlanTurn {
    pub role: PlanRole,
    pub text: String,
}

/// Accumulated planning conversation for one session.
#[derive(Debug, Clone)]
pub struct PlanningDialogue {
    pub mission: String,
    pub turns: Vec<PlanTurn>,
}

impl PlanningDialogue {
    pub fn new(mission: impl Into<String>) -> Self {
        Self {
            mission: mission.into(),
            turns: Vec::new(),
        }
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.turns.push(PlanTurn {
            role: PlanRole::User,
            text: text.into(),
        });
    }

    pub fn push_agent(&mut self, text: impl Into<String>) {
        self.turns.push(PlanTurn {
            role: PlanRole::Agent,
            text: text.into(),
        });
    }

    /// Record a rejection so the next turn revises the proposal.
    pub fn push_rejection(&mut self, reason: &str) {
        self.push_user(format!(
            "The proposed plan was rejected. Revise it taking this feedback into account: {reason}"
        ));
    }

    /// Build the planning prompt: mission first, then the dialogue so far.
    pub fn render_prompt(&self) -> String {
        let mut prompt = format!(
            "You are planning an implementation. Produce one or more candidate \
             approaches as structured plan events, each with ordered steps \
             (id, title, description, touched files, complexity), plus a short \
             markdown summary.\n\nMission: {}\n",
            self.mission
        );
        for turn in &self.turns {
            let role = match turn.role {
                PlanRole::User => "User",
                PlanRole::Agent => "Planner",
            };
            prompt.push_str(&format!("\n{role}: {}\n", turn.text));
        }
        prompt
    }
}

/// Drives planning turns through the agent driver.
pub struct Planner {
    driver: Arc<dyn AgentDriver>,
    provider: ProviderConfig,
    capabilities: CapabilitySet,
    cwd: PathBuf,
    timeout: Option<Duration>,
}

impl Planner {
    pub fn new(
        driver: Arc<dyn AgentDriver>,
        provider: ProviderConfig,
        capabilities: CapabilitySet,
        cwd: PathBuf,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            driver,
            provider,
            capabilities,
            cwd,
            timeout,
        }
    }

    /// Run one planning turn, forwarding every agent event into `sink` and
    /// returning the plans the turn produced.
    pub async fn run_turn(
        &self,
        dialogue: &mut PlanningDialogue,
        sink: &mpsc::Sender<AgentEvent>,
        cancel: &CancellationToken,
    ) -> EngineResult<Vec<Plan>> {
        let request = AgentRequest {
            prompt: dialogue.render_prompt(),
            capabilities: self.capabilities.clone(),
            provider: self.provider.clone(),
            cwd: self.cwd.clone(),
            timeout: self.timeout,
        };

        let (tx, mut rx) = mpsc::channel(64);
        let driver = Arc::clone(&self.driver);
        let turn_cancel = cancel.clone();
        let run = tokio::spawn(async move { driver.run_agent(request, tx, turn_cancel).await });

        let mut plans = Vec::new();
        let mut agent_text = String::new();
        while let Some(event) = rx.recv().await {
            match &event {
                AgentEvent::Plan { plan } => plans.push(plan.clone()),
                AgentEvent::Text { text } => agent_text.push_str(text),
                _ => {}
            }
            let _ = sink.send(event).await;
        }

        if !agent_text.is_empty() {
            dialogue.push_agent(agent_text);
        }

        let outcome = run
            .await
            .map_err(|e| EngineError::agent(format!("planner task panicked: {e}")))??;
        match outcome {
            AgentTurnOutcome::Completed => {
                tracing::info!(plans = plans.len(), "planning turn completed");
                Ok(plans)
            }
            AgentTurnOutcome::Cancelled => Err(EngineError::Cancelled),
            AgentTurnOutcome::Failed { message } => Err(EngineError::agent(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_plan() -> Plan {
        Plan {
            approaches: vec![
                PlanApproach {
                    id: "a1".into(),
                    title: "Incremental refactor".into(),
                    steps: vec![PlanStep {
                        id: "s1".into(),
                        title: "Extract service".into(),
                        description: "Move auth logic into a service".into(),
                        files: vec!["src/auth.ts".into()],
                        complexity: Complexity::Medium,
                    }],
                },
                PlanApproach {
                    id: "a2".into(),
                    title: "Rewrite".into(),
                    steps: vec![],
                },
            ],
            summary: "Two options".into(),
        }
    }

    #[test]
    fn approved_plan_resolves_approach() {
        let approved = ApprovedPlan {
            approach_id: "a1".into(),
            plan: sample_plan(),
        };
        assert_eq!(approved.approach().unwrap().title, "Incremental refactor");

        let rendered = approved.render();
        assert!(rendered.contains("Incremental refactor"));
        assert!(rendered.contains("src/auth.ts"));
    }

    #[test]
    fn plan_serde_round_trip() {
        let plan = sample_plan();
        let json = serde_json::to_string(&plan).unwrap();
        assert!(json.contains("\"complexity\":\"medium\""));
        let back: Plan = serde_json::from_str(&json).unwrap();
        assert_eq!(back.approaches.len(), 2);
    }

    #[test]
    fn dialogue_prompt_carries_mission_and_feedback() {
        let mut dialogue = PlanningDialogue::new("add rate limiting");
        dialogue.push_rejection("use dependency injection");

        let prompt = dialogue.render_prompt();
        assert!(prompt.contains("add rate limiting"));
        assert!(prompt.contains("use dependency injection"));
    }
}
