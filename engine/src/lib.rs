//! Polish engine
//!
//! Closed-loop code-quality improvement: measure a weighted quality score,
//! ask an external LLM agent to fix the worst-scoring metric, accept the
//! change only when the score improves enough, and repeat until a target is
//! reached, progress plateaus, or a budget runs out. Every run is isolated
//! in a detached-head git worktree; every accepted change is one commit,
//! every rejected one a byte-for-byte rollback.
//!
//! Component map:
//! - [`exec`]: shell command execution with timeout and capped capture
//! - [`vcs`]: git adapter for snapshots, commits, worktrees, branch naming
//! - [`score`]: metric execution and output parsing into 0-100 scores
//! - [`agent`]: driver seam to the external LLM agent process
//! - [`plan`]: optional planning dialogue before the loop
//! - [`strategy`]: prompt selection per worst metric
//! - [`polish_loop`]: the accept/reject control loop
//! - [`session`]: per-run supervisor, state machine, event log, fan-out
//! - [`preset`]: metric/strategy/threshold configuration
//! - [`state_file`]: `.polish/state.json` written after every scoring pass
//! - [`hook`]: one-shot stop-hook protocol over stdio

pub mod agent;
pub mod error;
pub mod exec;
pub mod hook;
pub mod plan;
pub mod polish_loop;
pub mod preset;
pub mod score;
pub mod session;
pub mod state_file;
pub mod strategy;
pub mod vcs;

pub use error::{EngineError, EngineResult};
pub use polish_loop::{LoopOutcome, StopReason};
pub use preset::Preset;
pub use session::supervisor::{CreateSessionRequest, Supervisor, SupervisorConfig};
pub use session::{Session, SessionStatus};
