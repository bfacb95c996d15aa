//! End-to-end loop scenarios: target short-circuit, single-turn
//! improvement, plateau, regression rollback, and abort.

mod common;

use std::time::Duration;

use common::{
    create_request, init_git_repo, results_preset, supervisor, ScriptedAgentDriver, TurnOp,
};
use polish_engine::session::events::{EventRecord, PolishEvent};
use polish_engine::session::SessionStatus;
use polish_engine::StopReason;
use tempfile::tempdir;

fn event_types(records: &[EventRecord]) -> Vec<&'static str> {
    records.iter().map(|r| r.event.event_type()).collect()
}

fn filtered(records: &[EventRecord], keep: &[&str]) -> Vec<&'static str> {
    event_types(records)
        .into_iter()
        .filter(|t| keep.contains(t))
        .collect()
}

#[tokio::test]
async fn target_already_reached_stops_before_any_iteration() {
    let root = tempdir().unwrap();
    let project = root.path().join("project");
    std::fs::create_dir_all(&project).unwrap();
    init_git_repo(&project, &[("results.txt", "10 pass")]);

    let driver = ScriptedAgentDriver::new(vec![]);
    let sup = supervisor(root.path(), driver.clone());

    let mut request = create_request(&project);
    request.preset = Some(results_preset(95.0, 10));
    let id = sup.create_session(request).await.unwrap();
    let session = sup.wait(&id).await.unwrap();

    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.stop_reason, Some(StopReason::TargetReached));
    assert_eq!(session.commits, 0);
    assert_eq!(session.initial_score, Some(100.0));
    // The agent was never invoked.
    assert!(driver.prompts().is_empty());

    let sub = sup.subscribe(&id).await.unwrap();
    let core = filtered(&sub.backlog, &["init", "iteration", "commit", "result"]);
    assert_eq!(core, vec!["init", "result"]);
}

#[tokio::test]
async fn one_turn_improvement_commits_and_reaches_target() {
    let root = tempdir().unwrap();
    let project = root.path().join("project");
    std::fs::create_dir_all(&project).unwrap();
    init_git_repo(&project, &[("results.txt", "4 pass, 1 fail")]);

    let driver = ScriptedAgentDriver::new(vec![vec![TurnOp::Write(
        "results.txt",
        "5 pass, 0 fail",
    )]]);
    let sup = supervisor(root.path(), driver.clone());

    let mut request = create_request(&project);
    request.preset = Some(results_preset(95.0, 10));
    let id = sup.create_session(request).await.unwrap();
    let session = sup.wait(&id).await.unwrap();

    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.stop_reason, Some(StopReason::TargetReached));
    assert_eq!(session.commits, 1);
    assert_eq!(session.initial_score, Some(80.0));
    assert_eq!(session.final_score, Some(100.0));

    let sub = sup.subscribe(&id).await.unwrap();
    let core = filtered(
        &sub.backlog,
        &["init", "iteration", "improving", "commit", "score", "result"],
    );
    assert_eq!(
        core,
        vec!["init", "iteration", "improving", "commit", "score", "result"]
    );

    // Commit message records the metric and the score movement.
    let commit_message = sub
        .backlog
        .iter()
        .find_map(|r| match &r.event {
            PolishEvent::Commit { message, .. } => Some(message.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(commit_message, "polish(tests): 80 -> 100");

    // The worktree yielded a commit, so it is retained under a polish branch.
    let cleanup = sub
        .backlog
        .iter()
        .find_map(|r| match &r.event {
            PolishEvent::WorktreeCleanup { kept, branch, .. } => {
                Some((*kept, branch.clone()))
            }
            _ => None,
        })
        .unwrap();
    assert!(cleanup.0);
    let branch = cleanup.1.unwrap();
    assert!(branch.starts_with("polish/"));
    assert_eq!(session.branch_name, Some(branch));
}

#[tokio::test]
async fn plateau_after_max_stalled_iterations() {
    let root = tempdir().unwrap();
    let project = root.path().join("project");
    std::fs::create_dir_all(&project).unwrap();
    init_git_repo(&project, &[("results.txt", "4 pass, 1 fail")]);

    // No scripted turns: the agent completes every turn without changes.
    let driver = ScriptedAgentDriver::new(vec![]);
    let sup = supervisor(root.path(), driver.clone());

    let mut request = create_request(&project);
    request.preset = Some(results_preset(95.0, 10));
    let id = sup.create_session(request).await.unwrap();
    let session = sup.wait(&id).await.unwrap();

    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.stop_reason, Some(StopReason::Plateau));
    assert_eq!(session.commits, 0);
    // One agent turn per stalled iteration.
    assert_eq!(driver.prompts().len(), 5);

    let sub = sup.subscribe(&id).await.unwrap();
    let iterations = filtered(&sub.backlog, &["iteration"]);
    assert_eq!(iterations.len(), 5);

    let cleanup = sub
        .backlog
        .iter()
        .find_map(|r| match &r.event {
            PolishEvent::WorktreeCleanup { kept, .. } => Some(*kept),
            _ => None,
        })
        .unwrap();
    assert!(!cleanup, "a worktree without commits is removed");
}

#[tokio::test]
async fn regression_rolls_back_and_exhausts_iterations() {
    let root = tempdir().unwrap();
    let project = root.path().join("project");
    std::fs::create_dir_all(&project).unwrap();
    init_git_repo(&project, &[("results.txt", "8 pass, 2 fail")]);

    let driver = ScriptedAgentDriver::new(vec![vec![TurnOp::Write(
        "results.txt",
        "7 pass, 3 fail",
    )]]);
    let sup = supervisor(root.path(), driver.clone());

    let mut request = create_request(&project);
    request.preset = Some(results_preset(95.0, 1));
    let id = sup.create_session(request).await.unwrap();
    let session = sup.wait(&id).await.unwrap();

    // One iteration, regression rejected, no score movement.
    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(session.stop_reason, Some(StopReason::MaxIterations));
    assert_eq!(session.commits, 0);
    assert_eq!(session.final_score, Some(80.0));

    let sub = sup.subscribe(&id).await.unwrap();
    let core = filtered(&sub.backlog, &["rollback", "commit"]);
    assert_eq!(core, vec!["rollback"]);
}

#[tokio::test]
async fn rollback_restores_tree_before_next_turn() {
    let root = tempdir().unwrap();
    let project = root.path().join("project");
    std::fs::create_dir_all(&project).unwrap();
    init_git_repo(
        &project,
        &[("results.txt", "8 pass, 2 fail"), ("untouched.txt", "keep me\n")],
    );

    // Turn 1 regresses and clobbers an unrelated file; turn 2 improves.
    let driver = ScriptedAgentDriver::new(vec![
        vec![
            TurnOp::Write("results.txt", "7 pass, 3 fail"),
            TurnOp::Write("untouched.txt", "clobbered\n"),
        ],
        vec![TurnOp::Write("results.txt", "10 pass, 0 fail")],
    ]);
    let sup = supervisor(root.path(), driver.clone());

    let mut request = create_request(&project);
    request.preset = Some(results_preset(95.0, 5));
    let id = sup.create_session(request).await.unwrap();
    let session = sup.wait(&id).await.unwrap();

    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.commits, 1);

    let sub = sup.subscribe(&id).await.unwrap();
    let core = filtered(&sub.backlog, &["rollback", "commit"]);
    assert_eq!(core, vec!["rollback", "commit"]);

    // The retained worktree shows the rollback restored the clobbered file
    // before the improving turn ran.
    let worktree = sub
        .backlog
        .iter()
        .find_map(|r| match &r.event {
            PolishEvent::WorktreeCleanup { path, kept: true, .. } => Some(path.clone()),
            _ => None,
        })
        .unwrap();
    let untouched = std::fs::read_to_string(worktree.join("untouched.txt")).unwrap();
    assert_eq!(untouched, "keep me\n");
    let results = std::fs::read_to_string(worktree.join("results.txt")).unwrap();
    assert_eq!(results, "10 pass, 0 fail");
}

#[tokio::test]
async fn abort_mid_turn_cancels_and_is_idempotent() {
    let root = tempdir().unwrap();
    let project = root.path().join("project");
    std::fs::create_dir_all(&project).unwrap();
    init_git_repo(&project, &[("results.txt", "4 pass, 1 fail")]);

    let driver = ScriptedAgentDriver::new(vec![vec![TurnOp::Hang]]);
    let sup = supervisor(root.path(), driver.clone());

    let mut request = create_request(&project);
    request.preset = Some(results_preset(95.0, 10));
    let id = sup.create_session(request).await.unwrap();

    // Give the loop time to reach the hanging agent turn.
    tokio::time::sleep(Duration::from_millis(300)).await;
    sup.abort(&id).await.unwrap();

    let session = sup.wait(&id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Cancelled);
    assert_eq!(session.commits, 0);

    let sub = sup.subscribe(&id).await.unwrap();
    let types = event_types(&sub.backlog);
    assert!(types.contains(&"aborted"));
    let events_before = sub.backlog.len();

    // A second abort is a no-op: no error, no new events.
    sup.abort(&id).await.unwrap();
    let sub = sup.subscribe(&id).await.unwrap();
    assert_eq!(sub.backlog.len(), events_before);
    assert_eq!(
        sup.session(&id).await.unwrap().status,
        SessionStatus::Cancelled
    );
}

#[tokio::test]
async fn commit_events_match_session_commit_count() {
    let root = tempdir().unwrap();
    let project = root.path().join("project");
    std::fs::create_dir_all(&project).unwrap();
    init_git_repo(&project, &[("results.txt", "2 pass, 8 fail")]);

    // Three improving turns, each a committable step.
    let driver = ScriptedAgentDriver::new(vec![
        vec![TurnOp::Write("results.txt", "5 pass, 5 fail")],
        vec![TurnOp::Write("results.txt", "8 pass, 2 fail")],
        vec![TurnOp::Write("results.txt", "10 pass, 0 fail")],
    ]);
    let sup = supervisor(root.path(), driver.clone());

    let mut request = create_request(&project);
    request.preset = Some(results_preset(95.0, 10));
    let id = sup.create_session(request).await.unwrap();
    let session = sup.wait(&id).await.unwrap();

    assert_eq!(session.status, SessionStatus::Completed);
    let sub = sup.subscribe(&id).await.unwrap();
    let commit_events = filtered(&sub.backlog, &["commit"]).len();
    assert_eq!(commit_events as u32, session.commits);
    assert_eq!(session.commits, 3);

    // Accepted totals are strictly improving.
    let mut totals = vec![session.initial_score.unwrap()];
    for record in &sub.backlog {
        if let PolishEvent::Score { score } = &record.event {
            totals.push(score.total);
        }
    }
    for pair in totals.windows(2) {
        assert!(pair[1] - pair[0] >= 0.5, "non-improving commit: {pair:?}");
    }
}
