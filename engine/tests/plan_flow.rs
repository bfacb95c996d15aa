//! Planning dialogue: propose, reject with feedback, re-propose, approve,
//! then implement with the approved plan attached to the first prompt.

mod common;

use std::time::Duration;

use common::{create_request, init_git_repo, results_preset, supervisor, ScriptedAgentDriver, TurnOp};
use polish_engine::agent::AgentEvent;
use polish_engine::plan::{Complexity, Plan, PlanApproach, PlanStep};
use polish_engine::session::events::PolishEvent;
use polish_engine::session::SessionStatus;
use polish_engine::session::supervisor::Supervisor;
use polish_engine::StopReason;
use tempfile::tempdir;

fn two_approach_plan() -> Plan {
    Plan {
        approaches: vec![
            PlanApproach {
                id: "a1".into(),
                title: "Dependency-injected service".into(),
                steps: vec![PlanStep {
                    id: "s1".into(),
                    title: "Extract flaky setup".into(),
                    description: "Move shared setup behind an injected fixture".into(),
                    files: vec!["src/setup.ts".into()],
                    complexity: Complexity::Medium,
                }],
            },
            PlanApproach {
                id: "a2".into(),
                title: "Inline retries".into(),
                steps: vec![],
            },
        ],
        summary: "Two ways to stabilise the suite".into(),
    }
}

async fn wait_for_status(sup: &Supervisor, id: &str, status: SessionStatus) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if sup.session(id).await.unwrap().status == status {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {status}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Wait for the approval gate of the `n`-th planning turn (1-based), so a
/// decision sent right after a rejection cannot race the re-planning turn.
async fn wait_for_approval_gate(
    sup: &Supervisor,
    driver: &ScriptedAgentDriver,
    id: &str,
    turn: usize,
) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if driver.prompts().len() >= turn
            && sup.session(id).await.unwrap().status == SessionStatus::AwaitingApproval
        {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for approval gate {turn}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn reject_with_feedback_then_approve() {
    let root = tempdir().unwrap();
    let project = root.path().join("project");
    std::fs::create_dir_all(&project).unwrap();
    init_git_repo(&project, &[("results.txt", "4 pass, 1 fail")]);

    let driver = ScriptedAgentDriver::new(vec![
        // First planning turn.
        vec![TurnOp::Emit(AgentEvent::Plan {
            plan: two_approach_plan(),
        })],
        // Re-planning turn after the rejection.
        vec![TurnOp::Emit(AgentEvent::Plan {
            plan: two_approach_plan(),
        })],
        // Mission (implementation) turn.
        vec![TurnOp::Write("results.txt", "10 pass, 0 fail")],
    ]);
    let sup = supervisor(root.path(), driver.clone());

    let mut request = create_request(&project);
    request.preset = Some(results_preset(95.0, 10));
    request.mission = Some("stabilise the flaky test suite".into());
    request.enable_planning = true;
    let id = sup.create_session(request).await.unwrap();

    wait_for_approval_gate(&sup, &driver, &id, 1).await;
    sup.reject_plan(&id, Some("use dependency injection".into()))
        .await
        .unwrap();

    wait_for_approval_gate(&sup, &driver, &id, 2).await;
    sup.approve_plan(&id, "a1").await.unwrap();

    let session = sup.wait(&id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.stop_reason, Some(StopReason::TargetReached));
    assert_eq!(
        session.approved_plan.as_ref().map(|p| p.approach_id.as_str()),
        Some("a1")
    );

    let prompts = driver.prompts();
    assert!(prompts.len() >= 3, "expected planning + implementation turns");
    // The re-planning turn carries the rejection feedback.
    assert!(prompts[1].contains("use dependency injection"));
    // The implementation prompt carries the mission and the approved plan.
    assert!(prompts[2].contains("stabilise the flaky test suite"));
    assert!(prompts[2].contains("Dependency-injected service"));

    let sub = sup.subscribe(&id).await.unwrap();
    let plan_events: Vec<&str> = sub
        .backlog
        .iter()
        .map(|r| r.event.event_type())
        .filter(|t| t.starts_with("plan"))
        .collect();
    assert_eq!(
        plan_events,
        vec!["plan", "plan_rejected", "plan", "plan_approved"]
    );

    // Status walked the planning path.
    let statuses: Vec<SessionStatus> = sub
        .backlog
        .iter()
        .filter_map(|r| match &r.event {
            PolishEvent::Status { status } => Some(*status),
            _ => None,
        })
        .collect();
    assert_eq!(
        statuses,
        vec![
            SessionStatus::Planning,
            SessionStatus::AwaitingApproval,
            SessionStatus::Planning,
            SessionStatus::AwaitingApproval,
            SessionStatus::Running,
            SessionStatus::Completed,
        ]
    );
}

#[tokio::test]
async fn reject_without_reason_cancels_the_session() {
    let root = tempdir().unwrap();
    let project = root.path().join("project");
    std::fs::create_dir_all(&project).unwrap();
    init_git_repo(&project, &[("results.txt", "4 pass, 1 fail")]);

    let driver = ScriptedAgentDriver::new(vec![vec![TurnOp::Emit(AgentEvent::Plan {
        plan: two_approach_plan(),
    })]]);
    let sup = supervisor(root.path(), driver.clone());

    let mut request = create_request(&project);
    request.preset = Some(results_preset(95.0, 10));
    request.mission = Some("stabilise the flaky test suite".into());
    request.enable_planning = true;
    let id = sup.create_session(request).await.unwrap();

    wait_for_status(&sup, &id, SessionStatus::AwaitingApproval).await;
    sup.reject_plan(&id, None).await.unwrap();

    let session = sup.wait(&id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Cancelled);

    let sub = sup.subscribe(&id).await.unwrap();
    let types: Vec<&str> = sub.backlog.iter().map(|r| r.event.event_type()).collect();
    assert!(types.contains(&"plan_rejected"));
    // Never got as far as a worktree.
    assert!(!types.contains(&"worktree_created"));
}

#[tokio::test]
async fn user_message_during_planning_triggers_continuation() {
    let root = tempdir().unwrap();
    let project = root.path().join("project");
    std::fs::create_dir_all(&project).unwrap();
    init_git_repo(&project, &[("results.txt", "10 pass")]);

    let driver = ScriptedAgentDriver::new(vec![
        vec![TurnOp::Emit(AgentEvent::Plan {
            plan: two_approach_plan(),
        })],
        vec![TurnOp::Emit(AgentEvent::Plan {
            plan: two_approach_plan(),
        })],
    ]);
    let sup = supervisor(root.path(), driver.clone());

    let mut request = create_request(&project);
    request.preset = Some(results_preset(95.0, 10));
    request.mission = Some("document the module".into());
    request.enable_planning = true;
    let id = sup.create_session(request).await.unwrap();

    wait_for_approval_gate(&sup, &driver, &id, 1).await;
    sup.send_plan_message(&id, "keep the public API unchanged")
        .await
        .unwrap();

    wait_for_approval_gate(&sup, &driver, &id, 2).await;
    sup.approve_plan(&id, "a2").await.unwrap();

    let session = sup.wait(&id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);

    let prompts = driver.prompts();
    assert!(prompts[1].contains("keep the public API unchanged"));
}
