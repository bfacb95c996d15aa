//! Session supervisor
//!
//! Owns every live session: spawns the per-session task, serialises state
//! mutations, appends events to the durable store, and fans them out to
//! subscribers over a broadcast channel. A slow subscriber lags out of the
//! broadcast window and is dropped rather than allowed to stall producers;
//! it can resubscribe and replay the backlog from the store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentDriver, ProviderConfig};
use crate::error::{EngineError, EngineResult};
use crate::plan::{ApprovedPlan, Plan, Planner, PlanningDialogue};
use crate::polish_loop::{LoopConfig, PolishLoop};
use crate::preset::{self, Preset};
use crate::session::events::{EventRecord, PolishEvent};
use crate::session::store::SessionStore;
use crate::session::{Session, SessionStatus};
use crate::strategy;
use crate::vcs::GitWorkspace;

/// Events replayed to a late subscriber before live delivery.
pub const DEFAULT_BACKLOG_LIMIT: usize = 200;

const BROADCAST_CAPACITY: usize = 256;
const CONTROL_CAPACITY: usize = 16;
const LOOP_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Durable store root (one directory per session).
    pub sessions_root: PathBuf,
    /// Where per-session worktrees are materialised.
    pub scratch_root: PathBuf,
    pub backlog_limit: usize,
}

impl SupervisorConfig {
    pub fn new(sessions_root: impl Into<PathBuf>) -> Self {
        Self {
            sessions_root: sessions_root.into(),
            scratch_root: std::env::temp_dir().join("polish-worktrees"),
            backlog_limit: DEFAULT_BACKLOG_LIMIT,
        }
    }
}

/// Inputs for creating one session.
#[derive(Clone)]
pub struct CreateSessionRequest {
    pub project_path: PathBuf,
    pub mission: Option<String>,
    pub enable_planning: bool,
    /// Explicit preset; when `None` the project's config is loaded.
    pub preset: Option<Preset>,
    pub provider: ProviderConfig,
    pub strict: bool,
    pub wall_clock_budget: Option<Duration>,
}

enum ControlMsg {
    ApprovePlan { approach_id: String },
    RejectPlan { reason: Option<String> },
    PlanMessage { text: String },
}

/// Per-session immutable run parameters.
struct SessionParams {
    provider: ProviderConfig,
    preset: Preset,
    enable_planning: bool,
    wall_clock_budget: Option<Duration>,
}

struct SessionRuntime {
    session: Mutex<Session>,
    params: SessionParams,
    broadcast: broadcast::Sender<EventRecord>,
    next_event_id: AtomicU64,
    cancel: CancellationToken,
    control_tx: mpsc::Sender<ControlMsg>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

struct Inner {
    store: SessionStore,
    driver: Arc<dyn AgentDriver>,
    config: SupervisorConfig,
    sessions: Mutex<HashMap<String, Arc<SessionRuntime>>>,
}

impl Inner {
    /// Append one event: assign the next id, persist, then broadcast.
    ///
    /// Session bookkeeping derived from events lives here so the invariants
    /// hold by construction: `commits` equals the number of commit events,
    /// `initial_score`/`final_score` track `init`/`score`/`result`.
    async fn emit(&self, runtime: &SessionRuntime, event: PolishEvent) {
        let mut session = runtime.session.lock().await;
        self.emit_locked(runtime, &mut session, event);
    }

    /// Append one event while already holding the session lock, so ids,
    /// store order, broadcast order, and any status change made under the
    /// same lock always agree.
    fn emit_locked(&self, runtime: &SessionRuntime, session: &mut Session, event: PolishEvent) {
        let id = runtime.next_event_id.fetch_add(1, Ordering::SeqCst) + 1;
        let record = EventRecord::new(id, event);

        match &record.event {
            PolishEvent::Init { score } => session.initial_score = Some(score.total),
            PolishEvent::Score { score } => session.final_score = Some(score.total),
            PolishEvent::Commit { .. } => session.commits += 1,
            PolishEvent::Result {
                final_score,
                reason,
                ..
            } => {
                session.final_score = Some(*final_score);
                session.stop_reason = Some(*reason);
            }
            _ => {}
        }
        if let Err(e) = self.store.save_session(session) {
            tracing::warn!(error = %e, "failed to persist session snapshot");
        }
        if let Err(e) = self.store.append_event(&session.id, &record) {
            tracing::warn!(session_id = %session.id, error = %e, "failed to persist event");
        }
        // No receivers is fine; the event is already durable.
        let _ = runtime.broadcast.send(record);
    }
}

/// A late subscriber's view: bounded backlog, current snapshot, then live
/// events. `live` is `None` when the session is already terminal.
pub struct Subscription {
    pub backlog: Vec<EventRecord>,
    pub snapshot: Session,
    live: Option<broadcast::Receiver<EventRecord>>,
    cursor: u64,
}

impl Subscription {
    /// Next live event, skipping anything already covered by the backlog.
    ///
    /// Returns `None` once the session closes or this subscriber lags out
    /// of the broadcast window.
    pub async fn next_live(&mut self) -> Option<EventRecord> {
        let rx = self.live.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(record) if record.id <= self.cursor => {
                    // Already replayed via the backlog. If it was the
                    // terminal status there is nothing more to wait for.
                    if let PolishEvent::Status { status } = &record.event {
                        if status.is_terminal() {
                            self.live = None;
                            return None;
                        }
                    }
                    continue;
                }
                Ok(record) => {
                    self.cursor = record.id;
                    // A terminal status is always the session's last event;
                    // close the stream after delivering it.
                    if let PolishEvent::Status { status } = &record.event {
                        if status.is_terminal() {
                            self.live = None;
                        }
                    }
                    return Some(record);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "subscriber lagged; dropping it");
                    self.live = None;
                    return None;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.live = None;
                    return None;
                }
            }
        }
    }
}

pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, driver: Arc<dyn AgentDriver>) -> EngineResult<Self> {
        let store = SessionStore::new(&config.sessions_root)?;
        Ok(Self {
            inner: Arc::new(Inner {
                store,
                driver,
                config,
                sessions: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Create a session and start its task.
    ///
    /// Preset problems surface here, synchronously; no session is created
    /// for a bad configuration.
    pub async fn create_session(&self, request: CreateSessionRequest) -> EngineResult<String> {
        let preset = match request.preset {
            Some(preset) => {
                preset.validate(request.strict)?;
                preset
            }
            None => preset::load_preset(&request.project_path, request.strict)?,
        };

        if !GitWorkspace::new(&request.project_path).is_repo().await {
            return Err(EngineError::NotARepository {
                path: request.project_path.clone(),
            });
        }

        let mut session = Session::new(
            request.project_path.clone(),
            request.mission.clone(),
            preset.target,
        );
        session.capability_ids = preset
            .capabilities
            .planning
            .tools
            .iter()
            .chain(preset.capabilities.implementation.tools.iter())
            .cloned()
            .collect();
        let session_id = session.id.clone();
        self.inner.store.save_session(&session)?;

        let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let runtime = Arc::new(SessionRuntime {
            session: Mutex::new(session),
            params: SessionParams {
                provider: request.provider,
                preset,
                enable_planning: request.enable_planning,
                wall_clock_budget: request.wall_clock_budget,
            },
            broadcast: broadcast_tx,
            next_event_id: AtomicU64::new(0),
            cancel: CancellationToken::new(),
            control_tx,
            task: Mutex::new(None),
        });
        self.inner
            .sessions
            .lock()
            .await
            .insert(session_id.clone(), Arc::clone(&runtime));

        let task = SessionTask {
            inner: Arc::clone(&self.inner),
            runtime: Arc::clone(&runtime),
        };
        let handle = tokio::spawn(task.run(control_rx));
        *runtime.task.lock().await = Some(handle);

        tracing::info!(session_id = %session_id, "session created");
        Ok(session_id)
    }

    async fn runtime(&self, session_id: &str) -> EngineResult<Arc<SessionRuntime>> {
        self.inner
            .sessions
            .lock()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| EngineError::SessionNotFound {
                id: session_id.to_string(),
            })
    }

    pub async fn session(&self, session_id: &str) -> EngineResult<Session> {
        if let Ok(runtime) = self.runtime(session_id).await {
            return Ok(runtime.session.lock().await.clone());
        }
        self.inner
            .store
            .load_session(session_id)?
            .ok_or_else(|| EngineError::SessionNotFound {
                id: session_id.to_string(),
            })
    }

    /// Attach a subscriber: bounded backlog from the durable store, the
    /// current snapshot, then live events. Subscribing before the backlog
    /// read (plus id-based dedup in [`Subscription::next_live`]) guarantees
    /// no gaps and no duplicates.
    pub async fn subscribe(&self, session_id: &str) -> EngineResult<Subscription> {
        if let Ok(runtime) = self.runtime(session_id).await {
            let live_rx = runtime.broadcast.subscribe();
            let snapshot = runtime.session.lock().await.clone();
            let backlog = self
                .inner
                .store
                .last_events(session_id, self.inner.config.backlog_limit)?;
            let cursor = backlog.last().map(|r| r.id).unwrap_or(0);
            let live = if snapshot.status.is_terminal() {
                None
            } else {
                Some(live_rx)
            };
            return Ok(Subscription {
                backlog,
                snapshot,
                live,
                cursor,
            });
        }

        // Historic session: snapshot plus backlog, no live stream.
        let snapshot = self
            .inner
            .store
            .load_session(session_id)?
            .ok_or_else(|| EngineError::SessionNotFound {
                id: session_id.to_string(),
            })?;
        let backlog = self
            .inner
            .store
            .last_events(session_id, self.inner.config.backlog_limit)?;
        Ok(Subscription {
            cursor: backlog.last().map(|r| r.id).unwrap_or(0),
            backlog,
            snapshot,
            live: None,
        })
    }

    /// Abort a session. Idempotent: aborting a terminal session is a no-op.
    pub async fn abort(&self, session_id: &str) -> EngineResult<()> {
        let runtime = self.runtime(session_id).await?;
        if runtime.session.lock().await.status.is_terminal() {
            return Ok(());
        }
        tracing::info!(session_id, "abort requested");
        runtime.cancel.cancel();
        Ok(())
    }

    pub async fn approve_plan(&self, session_id: &str, approach_id: &str) -> EngineResult<()> {
        let runtime = self.runtime(session_id).await?;
        self.expect_status(&runtime, &[SessionStatus::AwaitingApproval], "approve")
            .await?;
        runtime
            .control_tx
            .send(ControlMsg::ApprovePlan {
                approach_id: approach_id.to_string(),
            })
            .await
            .map_err(|_| EngineError::agent("session task is gone"))
    }

    /// Reject the proposed plan. With a reason, planning restarts with the
    /// feedback appended; without one, the session is cancelled.
    pub async fn reject_plan(&self, session_id: &str, reason: Option<String>) -> EngineResult<()> {
        let runtime = self.runtime(session_id).await?;
        self.expect_status(&runtime, &[SessionStatus::AwaitingApproval], "reject")
            .await?;
        runtime
            .control_tx
            .send(ControlMsg::RejectPlan { reason })
            .await
            .map_err(|_| EngineError::agent("session task is gone"))
    }

    /// Append a user message to a planning dialogue and trigger a
    /// continuation turn.
    pub async fn send_plan_message(&self, session_id: &str, text: &str) -> EngineResult<()> {
        let runtime = self.runtime(session_id).await?;
        self.expect_status(
            &runtime,
            &[SessionStatus::Planning, SessionStatus::AwaitingApproval],
            "plan message",
        )
        .await?;
        runtime
            .control_tx
            .send(ControlMsg::PlanMessage {
                text: text.to_string(),
            })
            .await
            .map_err(|_| EngineError::agent("session task is gone"))
    }

    pub async fn request_review(&self, session_id: &str) -> EngineResult<()> {
        let runtime = self.runtime(session_id).await?;
        let mut session = runtime.session.lock().await;
        session.transition(SessionStatus::Reviewing)?;
        self.inner.emit_locked(
            &runtime,
            &mut session,
            PolishEvent::Status {
                status: SessionStatus::Reviewing,
            },
        );
        self.inner
            .emit_locked(&runtime, &mut session, PolishEvent::ReviewStart);
        Ok(())
    }

    pub async fn complete_review(&self, session_id: &str, approved: bool) -> EngineResult<()> {
        let runtime = self.runtime(session_id).await?;
        let mut session = runtime.session.lock().await;
        session.transition(SessionStatus::Running)?;
        self.inner
            .emit_locked(&runtime, &mut session, PolishEvent::ReviewComplete { approved });
        self.inner.emit_locked(
            &runtime,
            &mut session,
            PolishEvent::Status {
                status: SessionStatus::Running,
            },
        );
        Ok(())
    }

    pub async fn redirect_review(&self, session_id: &str, feedback: &str) -> EngineResult<()> {
        let runtime = self.runtime(session_id).await?;
        let mut session = runtime.session.lock().await;
        session.transition(SessionStatus::Running)?;
        self.inner.emit_locked(
            &runtime,
            &mut session,
            PolishEvent::ReviewRedirect {
                feedback: feedback.to_string(),
            },
        );
        self.inner.emit_locked(
            &runtime,
            &mut session,
            PolishEvent::Status {
                status: SessionStatus::Running,
            },
        );
        Ok(())
    }

    /// Re-run a completed or failed session with reviewer feedback, reusing
    /// its polish branch when one is still present.
    pub async fn retry(&self, session_id: &str, feedback: &str) -> EngineResult<()> {
        let runtime = self.runtime(session_id).await?;

        let (project_path, mission, branch_name, approved_plan, sid) = {
            let mut session = runtime.session.lock().await;
            if !matches!(
                session.status,
                SessionStatus::Completed | SessionStatus::Failed
            ) {
                return Err(EngineError::InvalidTransition {
                    from: session.status.to_string(),
                    to: "running".to_string(),
                });
            }
            session.transition(SessionStatus::Running)?;
            session.retry_count += 1;
            session.stop_reason = None;
            self.inner.emit_locked(
                &runtime,
                &mut session,
                PolishEvent::Status {
                    status: SessionStatus::Running,
                },
            );
            (
                session.project_path.clone(),
                session.mission.clone().unwrap_or_default(),
                session.branch_name.clone(),
                session.approved_plan.clone(),
                session.id.clone(),
            )
        };

        let base_ref = match &branch_name {
            Some(branch) => {
                let main_ws = GitWorkspace::new(&project_path);
                if main_ws.branch_exists(branch).await.unwrap_or(false) {
                    Some(branch.clone())
                } else {
                    None
                }
            }
            None => None,
        };
        let retry_mission = strategy::retry_mission(&mission, feedback);

        let task = SessionTask {
            inner: Arc::clone(&self.inner),
            runtime: Arc::clone(&runtime),
        };
        let handle = tokio::spawn(async move {
            let result = task
                .run_polish(&sid, &project_path, retry_mission, approved_plan, base_ref)
                .await;
            task.finalize(result).await;
        });
        *runtime.task.lock().await = Some(handle);
        Ok(())
    }

    /// Wait for the session task to finish and return the final snapshot.
    pub async fn wait(&self, session_id: &str) -> EngineResult<Session> {
        let runtime = self.runtime(session_id).await?;
        let handle = runtime.task.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        let session = runtime.session.lock().await.clone();
        Ok(session)
    }

    async fn expect_status(
        &self,
        runtime: &SessionRuntime,
        allowed: &[SessionStatus],
        action: &str,
    ) -> EngineResult<()> {
        let status = runtime.session.lock().await.status;
        if allowed.contains(&status) {
            Ok(())
        } else {
            Err(EngineError::InvalidTransition {
                from: status.to_string(),
                to: action.to_string(),
            })
        }
    }
}

enum PlanningResult {
    Approved(ApprovedPlan),
    CancelledByRejection,
}

/// The per-session task: planning phase, approval gate, then the loop.
struct SessionTask {
    inner: Arc<Inner>,
    runtime: Arc<SessionRuntime>,
}

impl SessionTask {
    async fn run(self, mut control_rx: mpsc::Receiver<ControlMsg>) {
        let result = self.drive(&mut control_rx).await;
        self.finalize(result).await;
    }

    async fn finalize(&self, result: EngineResult<()>) {
        match result {
            Ok(()) => {}
            Err(EngineError::Cancelled) => {
                self.emit(PolishEvent::Aborted).await;
                self.force_status(SessionStatus::Cancelled).await;
            }
            Err(e) => {
                self.emit(PolishEvent::Error {
                    message: e.to_string(),
                })
                .await;
                self.force_status(SessionStatus::Failed).await;
            }
        }
    }

    async fn drive(&self, control_rx: &mut mpsc::Receiver<ControlMsg>) -> EngineResult<()> {
        let (session_id, project_path, mission) = {
            let session = self.runtime.session.lock().await;
            (
                session.id.clone(),
                session.project_path.clone(),
                session.mission.clone().unwrap_or_default(),
            )
        };

        let mut approved_plan: Option<ApprovedPlan> = None;
        if self.runtime.params.enable_planning && !mission.is_empty() {
            self.set_status(SessionStatus::Planning).await?;
            self.emit(PolishEvent::Phase {
                phase: "planning".into(),
            })
            .await;

            match self
                .run_planning(&mission, &project_path, control_rx)
                .await?
            {
                PlanningResult::Approved(plan) => {
                    {
                        let mut session = self.runtime.session.lock().await;
                        session.approved_plan = Some(plan.clone());
                        let _ = self.inner.store.save_session(&session);
                    }
                    approved_plan = Some(plan);
                }
                PlanningResult::CancelledByRejection => {
                    self.force_status(SessionStatus::Cancelled).await;
                    return Ok(());
                }
            }
        }

        self.set_status(SessionStatus::Running).await?;
        self.run_polish(&session_id, &project_path, mission, approved_plan, None)
            .await
    }

    /// Planning dialogue: plan turns alternate with the approval gate until
    /// the user approves, rejects outright, or aborts.
    async fn run_planning(
        &self,
        mission: &str,
        project_path: &Path,
        control_rx: &mut mpsc::Receiver<ControlMsg>,
    ) -> EngineResult<PlanningResult> {
        let planner = Planner::new(
            Arc::clone(&self.inner.driver),
            self.runtime.params.provider.clone(),
            self.runtime.params.preset.capabilities.planning.clone(),
            project_path.to_path_buf(),
            self.runtime.params.wall_clock_budget,
        );
        let mut dialogue = PlanningDialogue::new(mission);

        loop {
            let plans = self.run_plan_turn(&planner, &mut dialogue).await?;
            let Some(plan) = plans.into_iter().last() else {
                return Err(EngineError::agent("planner produced no plan"));
            };
            self.set_status(SessionStatus::AwaitingApproval).await?;

            loop {
                tokio::select! {
                    _ = self.runtime.cancel.cancelled() => return Err(EngineError::Cancelled),
                    msg = control_rx.recv() => match msg {
                        None => return Err(EngineError::Cancelled),
                        Some(ControlMsg::ApprovePlan { approach_id }) => {
                            self.emit(PolishEvent::PlanApproved {
                                approach_id: approach_id.clone(),
                            })
                            .await;
                            return Ok(PlanningResult::Approved(ApprovedPlan {
                                approach_id,
                                plan,
                            }));
                        }
                        Some(ControlMsg::RejectPlan { reason: Some(reason) }) => {
                            self.emit(PolishEvent::PlanRejected {
                                reason: Some(reason.clone()),
                            })
                            .await;
                            self.set_status(SessionStatus::Planning).await?;
                            dialogue.push_rejection(&reason);
                            break;
                        }
                        Some(ControlMsg::RejectPlan { reason: None }) => {
                            self.emit(PolishEvent::PlanRejected { reason: None }).await;
                            return Ok(PlanningResult::CancelledByRejection);
                        }
                        Some(ControlMsg::PlanMessage { text }) => {
                            self.emit(PolishEvent::PlanMessage { text: text.clone() }).await;
                            self.set_status(SessionStatus::Planning).await?;
                            dialogue.push_user(text);
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Run one planning turn while draining its event stream into the log.
    async fn run_plan_turn(
        &self,
        planner: &Planner,
        dialogue: &mut PlanningDialogue,
    ) -> EngineResult<Vec<Plan>> {
        let (tx, mut rx) = mpsc::channel(LOOP_EVENT_CAPACITY);
        let result = {
            let turn = planner.run_turn(dialogue, &tx, &self.runtime.cancel);
            tokio::pin!(turn);

            loop {
                tokio::select! {
                    result = &mut turn => break result,
                    maybe = rx.recv() => {
                        if let Some(event) = maybe {
                            self.emit(PolishEvent::from_agent(event)).await;
                        }
                    }
                }
            }
        };
        drop(tx);
        while let Some(event) = rx.recv().await {
            self.emit(PolishEvent::from_agent(event)).await;
        }
        result
    }

    /// Worktree lifecycle around one run of the loop.
    async fn run_polish(
        &self,
        session_id: &str,
        project_path: &Path,
        mission: String,
        approved_plan: Option<ApprovedPlan>,
        base_ref: Option<String>,
    ) -> EngineResult<()> {
        let main_ws = GitWorkspace::new(project_path);
        let worktree = main_ws
            .create_worktree_from(
                &self.inner.config.scratch_root,
                session_id,
                base_ref.as_deref().unwrap_or("HEAD"),
            )
            .await?;

        let branch_name = {
            let existing = self.runtime.session.lock().await.branch_name.clone();
            match existing {
                Some(name) => name,
                None => {
                    let name = main_ws.generate_polish_branch_name().await?;
                    let mut session = self.runtime.session.lock().await;
                    session.branch_name = Some(name.clone());
                    let _ = self.inner.store.save_session(&session);
                    name
                }
            }
        };
        self.emit(PolishEvent::WorktreeCreated {
            path: worktree.path.clone(),
            base_branch: worktree.base_branch.clone(),
        })
        .await;

        let (tx, mut rx) = mpsc::channel(LOOP_EVENT_CAPACITY);
        let polish = PolishLoop::new(
            LoopConfig {
                session_id: session_id.to_string(),
                preset: self.runtime.params.preset.clone(),
                mission,
                approved_plan,
                worktree_path: worktree.path.clone(),
                provider: self.runtime.params.provider.clone(),
                wall_clock_budget: self.runtime.params.wall_clock_budget,
            },
            Arc::clone(&self.inner.driver),
            tx,
            self.runtime.cancel.clone(),
        );
        let run = tokio::spawn(polish.run());

        while let Some(event) = rx.recv().await {
            self.emit(event).await;
        }
        let outcome = run
            .await
            .map_err(|e| EngineError::agent(format!("loop task panicked: {e}")))?;

        self.cleanup_worktree(&main_ws, &worktree.path, &branch_name)
            .await;

        match outcome {
            Ok(outcome) => {
                let status = if outcome.success {
                    SessionStatus::Completed
                } else {
                    SessionStatus::Failed
                };
                self.set_status(status).await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Every worktree gets exactly one cleanup outcome: removed, or
    /// retained under the session's polish branch when commits landed.
    async fn cleanup_worktree(&self, main_ws: &GitWorkspace, path: &Path, branch_name: &str) {
        let commits = self.runtime.session.lock().await.commits;
        let kept = commits > 0;
        let mut branch = None;

        if kept {
            let worktree_ws = GitWorkspace::new(path);
            match worktree_ws.branch_from_head(branch_name).await {
                Ok(commit) => {
                    tracing::info!(branch = %branch_name, %commit, "polish branch updated");
                    branch = Some(branch_name.to_string());
                }
                Err(e) => tracing::error!(error = %e, "failed to name polish branch"),
            }
        } else if let Err(e) = main_ws.remove_worktree(path).await {
            tracing::warn!(error = %e, "failed to remove worktree");
        }

        self.emit(PolishEvent::WorktreeCleanup {
            path: path.to_path_buf(),
            kept,
            branch,
        })
        .await;
    }

    /// Transition and announce the new status atomically: a subscriber can
    /// never observe a terminal snapshot whose status event is missing from
    /// the log.
    async fn set_status(&self, to: SessionStatus) -> EngineResult<()> {
        let mut session = self.runtime.session.lock().await;
        if session.status == to {
            return Ok(());
        }
        session.transition(to)?;
        self.inner
            .emit_locked(&self.runtime, &mut session, PolishEvent::Status { status: to });
        Ok(())
    }

    /// Best-effort transition for finalisation paths.
    async fn force_status(&self, to: SessionStatus) {
        let mut session = self.runtime.session.lock().await;
        if session.transition(to).is_ok() {
            self.inner
                .emit_locked(&self.runtime, &mut session, PolishEvent::Status { status: to });
        }
    }

    async fn emit(&self, event: PolishEvent) {
        self.inner.emit(&self.runtime, event).await;
    }
}
