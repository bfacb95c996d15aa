//! Session-state file
//!
//! `.polish/state.json` inside the directory being polished, written after
//! every scoring pass. The stop-hook reads it back to detect plateaus
//! across repeated stop attempts.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;

pub const STATE_DIR: &str = ".polish";
pub const STATE_FILE: &str = "state.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateFile {
    pub iteration: u32,
    pub scores: Vec<f64>,
    pub last_improvement: u32,
    pub stalled_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl StateFile {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            iteration: 0,
            scores: Vec::new(),
            last_improvement: 0,
            stalled_count: 0,
            worktree_path: None,
            started_at: now,
            last_updated: now,
        }
    }

    pub fn last_score(&self) -> Option<f64> {
        self.scores.last().copied()
    }
}

impl Default for StateFile {
    fn default() -> Self {
        Self::new()
    }
}

pub fn state_path(root: &Path) -> PathBuf {
    root.join(STATE_DIR).join(STATE_FILE)
}

/// Write the state file, creating `.polish/` if needed.
pub fn save(root: &Path, state: &StateFile) -> EngineResult<()> {
    let path = state_path(root);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(state)?;
    std::fs::write(&path, json)?;
    Ok(())
}

pub fn load(root: &Path) -> EngineResult<Option<StateFile>> {
    let path = state_path(root);
    if !path.exists() {
        return Ok(None);
    }
    let json = std::fs::read_to_string(&path)?;
    Ok(Some(serde_json::from_str(&json)?))
}

/// Delete the state file. Missing file is fine.
pub fn reset(root: &Path) -> EngineResult<()> {
    let path = state_path(root);
    if path.exists() {
        std::fs::remove_file(&path)?;
    }
    Ok(())
}
