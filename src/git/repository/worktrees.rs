//! Worktree management operations for Repository.

use std::path::{Path, PathBuf};

use dunce::canonicalize;
use normalize_path::NormalizePath;

use super::{GitError, Repository, ResolvedWorktree, Worktree};

impl Repository {
    /// List all worktrees for this repository.
    ///
    /// Returns a list of worktrees with bare entries filtered out.
    ///
    /// **Ordering:** git lists the main worktree first. For normal repos, `[0]` is
    /// the main worktree. For bare repos, the bare entry is filtered out, so `[0]`
    /// is the first linked worktree (no semantic "main" exists).
    pub fn list_worktrees(&self) -> anyhow::Result<Vec<Worktree>> {
        let stdout = self.run_command(&["worktree", "list", "--porcelain"])?;
        let raw_worktrees = Worktree::parse_porcelain_list(&stdout)?;
        Ok(raw_worktrees.into_iter().filter(|wt| !wt.bare).collect())
    }

    /// Get the worktree entry for the current worktree, if we're inside one.
    pub fn current_worktree_info(&self) -> anyhow::Result<Option<Worktree>> {
        let current_path = match self.current_worktree().root() {
            Ok(p) => p,
            Err(_) => return Ok(None),
        };
        let worktrees = self.list_worktrees()?;
        Ok(worktrees.into_iter().find(|wt| {
            canonicalize(&wt.path)
                .map(|p| p == current_path)
                .unwrap_or(false)
        }))
    }

    /// Find the worktree path for a given branch, if one exists.
    pub fn worktree_for_branch(&self, branch: &str) -> anyhow::Result<Option<PathBuf>> {
        let worktrees = self.list_worktrees()?;

        Ok(worktrees
            .iter()
            .find(|wt| wt.branch.as_deref() == Some(branch))
            .map(|wt| wt.path.clone()))
    }

    /// The main worktree: the repo root for normal repos, the default branch's
    /// worktree for bare repos.
    pub fn primary_worktree(&self) -> anyhow::Result<Option<PathBuf>> {
        if self.is_bare() {
            self.worktree_for_branch(self.default_branch())
        } else {
            Ok(Some(self.repo_path().to_path_buf()))
        }
    }

    /// Find the worktree at a given path, returning its branch if known.
    pub fn worktree_at_path(
        &self,
        path: &Path,
    ) -> anyhow::Result<Option<(PathBuf, Option<String>)>> {
        let worktrees = self.list_worktrees()?;
        let normalized_path = path.normalize();

        Ok(worktrees
            .iter()
            .find(|wt| wt.path.normalize() == normalized_path)
            .map(|wt| (wt.path.clone(), wt.branch.clone())))
    }

    /// Prune worktree entries whose directories no longer exist on disk.
    pub fn prune_worktrees(&self) -> anyhow::Result<()> {
        self.run_command(&["worktree", "prune"])?;
        Ok(())
    }

    /// Remove a worktree at the specified path.
    ///
    /// `force` passes `--force` to `git worktree remove`, allowing removal even
    /// when the worktree contains untracked files left behind by a task's turn.
    pub fn remove_worktree(&self, path: &Path, force: bool) -> anyhow::Result<()> {
        let path_str = path
            .to_str()
            .ok_or_else(|| GitError::message(format!("worktree path is not valid UTF-8: {path:?}")))?;
        let mut args = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        args.push(path_str);
        self.run_command(&args)?;
        Ok(())
    }

    /// Resolve a worktree by path, distinguishing a registered worktree from a
    /// branch that exists but has no checked-out worktree.
    pub fn resolve_worktree(&self, branch: &str) -> anyhow::Result<ResolvedWorktree> {
        match self.worktree_for_branch(branch)? {
            Some(path) => Ok(ResolvedWorktree::Worktree {
                path,
                branch: Some(branch.to_string()),
            }),
            None => Ok(ResolvedWorktree::BranchOnly {
                branch: branch.to_string(),
            }),
        }
    }

    /// The path to return to after a task's worktree is torn down: the primary
    /// worktree if one exists, otherwise the repo root.
    pub fn home_path(&self) -> anyhow::Result<PathBuf> {
        Ok(self
            .primary_worktree()?
            .unwrap_or_else(|| self.repo_path().to_path_buf()))
    }
}
