//! Version-control adapter
//!
//! Wraps the `git` CLI for the operations the loop needs: repo probes,
//! working-tree snapshots and rollback, commits, and isolated worktrees.
//! Snapshots are dangling commits from `git stash create`, so they preserve
//! tracked working-tree state without moving any branch pointer.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::process::Command;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

/// A disposable ref preserving working-tree state at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRef {
    pub commit: String,
}

/// An isolated checkout created for one session.
#[derive(Debug, Clone)]
pub struct Worktree {
    pub path: PathBuf,
    pub base_branch: String,
    pub base_commit: String,
}

/// Files changed on a branch relative to its base.
#[derive(Debug, Clone)]
pub struct BranchChanges {
    pub files: Vec<String>,
    pub base_branch: String,
}

/// Git operations rooted at one checkout (main repo or worktree).
#[derive(Debug, Clone)]
pub struct GitWorkspace {
    root: PathBuf,
}

impl GitWorkspace {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run a git command in this workspace and return trimmed stdout.
    async fn run_git(&self, args: &[&str]) -> EngineResult<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()
            .await
            .map_err(|e| EngineError::git("execute", e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::git(args.join(" "), stderr.trim().to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    pub async fn is_repo(&self) -> bool {
        self.run_git(&["rev-parse", "--is-inside-work-tree"])
            .await
            .map(|out| out == "true")
            .unwrap_or(false)
    }

    pub async fn current_branch(&self) -> EngineResult<String> {
        self.run_git(&["rev-parse", "--abbrev-ref", "HEAD"]).await
    }

    pub async fn head_commit(&self) -> EngineResult<String> {
        self.run_git(&["rev-parse", "--short", "HEAD"]).await
    }

    /// Whether the working tree has uncommitted changes (tracked or untracked).
    pub async fn has_changes(&self) -> EngineResult<bool> {
        let status = self.run_git(&["status", "--porcelain"]).await?;
        Ok(!status.is_empty())
    }

    /// Record the current tracked working-tree state as a dangling commit.
    ///
    /// Returns `None` when the tree is clean. The working tree itself is not
    /// modified.
    pub async fn snapshot(&self) -> EngineResult<Option<SnapshotRef>> {
        let commit = self.run_git(&["stash", "create"]).await?;
        if commit.is_empty() {
            return Ok(None);
        }
        tracing::debug!(commit = %commit, "snapshot created");
        Ok(Some(SnapshotRef { commit }))
    }

    /// Discard all working-tree changes and reapply `snapshot` if present.
    ///
    /// Failure here invalidates accept/reject atomicity and is fatal to the
    /// loop, so it maps to [`EngineError::RollbackFailed`].
    pub async fn rollback(&self, snapshot: Option<&SnapshotRef>) -> EngineResult<()> {
        self.run_git(&["checkout", "--", "."])
            .await
            .map_err(|e| EngineError::RollbackFailed {
                message: e.to_string(),
            })?;
        self.run_git(&["clean", "-fd"])
            .await
            .map_err(|e| EngineError::RollbackFailed {
                message: e.to_string(),
            })?;

        if let Some(snap) = snapshot {
            self.run_git(&["stash", "apply", &snap.commit])
                .await
                .map_err(|e| EngineError::RollbackFailed {
                    message: e.to_string(),
                })?;
        }
        Ok(())
    }

    /// Stage everything and record one commit. Returns the short hash.
    ///
    /// Precondition: the working tree has changes.
    pub async fn commit(&self, message: &str) -> EngineResult<String> {
        self.run_git(&["add", "-A"]).await?;
        if !self.has_changes().await? {
            return Err(EngineError::git("commit", "nothing to commit"));
        }
        self.run_git(&["commit", "-m", message]).await?;
        self.head_commit().await
    }

    /// Materialise an isolated detached-HEAD checkout for `session_id`.
    ///
    /// The canonical location is `<scratch_root>/polish-<session_id>`. A
    /// stale worktree left there by a crashed run is force-removed first, so
    /// the operation is idempotent under crash recovery.
    pub async fn create_worktree(
        &self,
        scratch_root: &Path,
        session_id: &str,
    ) -> EngineResult<Worktree> {
        self.create_worktree_from(scratch_root, session_id, "HEAD")
            .await
    }

    /// Like [`create_worktree`](Self::create_worktree) but detached at an
    /// arbitrary ref (a retry reuses the session's previous polish branch).
    pub async fn create_worktree_from(
        &self,
        scratch_root: &Path,
        session_id: &str,
        base_ref: &str,
    ) -> EngineResult<Worktree> {
        if !self.is_repo().await {
            return Err(EngineError::NotARepository {
                path: self.root.clone(),
            });
        }

        let path = scratch_root.join(format!("polish-{session_id}"));
        if path.exists() {
            tracing::warn!(path = %path.display(), "removing stale worktree");
            let _ = self
                .run_git(&["worktree", "remove", "--force", &path.to_string_lossy()])
                .await;
            let _ = self.run_git(&["worktree", "prune"]).await;
            let _ = std::fs::remove_dir_all(&path);
        }
        std::fs::create_dir_all(scratch_root)?;

        let base_branch = self.current_branch().await?;
        let base_commit = self.head_commit().await?;

        self.run_git(&["worktree", "add", "--detach", &path.to_string_lossy(), base_ref])
            .await
            .map_err(|e| EngineError::worktree("add", e.to_string()))?;

        tracing::info!(path = %path.display(), base = %base_branch, "worktree created");
        Ok(Worktree {
            path,
            base_branch,
            base_commit,
        })
    }

    /// Name this workspace's current tip. Returns the short commit hash.
    ///
    /// Forced so a retry can move the session's existing polish branch to
    /// the new tip.
    pub async fn branch_from_head(&self, name: &str) -> EngineResult<String> {
        self.run_git(&["branch", "-f", name])
            .await
            .map_err(|e| EngineError::worktree("branch", e.to_string()))?;
        self.head_commit().await
    }

    pub async fn branch_exists(&self, name: &str) -> EngineResult<bool> {
        let listed = self.run_git(&["branch", "--list", name]).await?;
        Ok(!listed.is_empty())
    }

    /// Release a worktree previously created by [`create_worktree`].
    pub async fn remove_worktree(&self, path: &Path) -> EngineResult<()> {
        self.run_git(&["worktree", "remove", "--force", &path.to_string_lossy()])
            .await
            .map_err(|e| EngineError::worktree("remove", e.to_string()))?;
        let _ = self.run_git(&["worktree", "prune"]).await;
        Ok(())
    }

    /// Generate a `polish/YYYY-MM-DD-<6hex>` branch name not already taken.
    pub async fn generate_polish_branch_name(&self) -> EngineResult<String> {
        let date = Utc::now().format("%Y-%m-%d");
        loop {
            let entropy = Uuid::new_v4().simple().to_string();
            let name = format!("polish/{date}-{}", &entropy[..6]);
            let existing = self.run_git(&["branch", "--list", &name]).await?;
            if existing.is_empty() {
                return Ok(name);
            }
            tracing::debug!(name = %name, "branch name collision, re-randomising");
        }
    }

    /// Files changed on `branch` relative to `base`, optionally including
    /// uncommitted working-tree changes.
    pub async fn branch_changed_files(
        &self,
        branch: &str,
        base: &str,
        include_uncommitted: bool,
    ) -> EngineResult<BranchChanges> {
        let range = format!("{base}...{branch}");
        let diff = self.run_git(&["diff", "--name-only", &range]).await?;
        let mut files: Vec<String> = diff.lines().map(str::to_string).collect();

        if include_uncommitted {
            let status = self.run_git(&["status", "--porcelain"]).await?;
            for line in status.lines() {
                // Porcelain format: two status chars, a space, then the path.
                if line.len() > 3 {
                    let path = line[3..].trim().to_string();
                    if !files.contains(&path) {
                        files.push(path);
                    }
                }
            }
        }

        Ok(BranchChanges {
            files,
            base_branch: base.to_string(),
        })
    }

    /// Textual diff for one path, against `base` when given, else the
    /// uncommitted working-tree diff.
    pub async fn file_diff(&self, base: Option<&str>, path: &str) -> EngineResult<String> {
        match base {
            Some(base) => self.run_git(&["diff", base, "--", path]).await,
            None => self.run_git(&["diff", "--", path]).await,
        }
    }
}
