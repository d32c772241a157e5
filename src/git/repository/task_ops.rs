//! Worktree create/rebase/fast-forward-merge operations for tasks.
//!
//! These are the git plumbing calls driving a task through its lifecycle:
//! create a worktree for a new task, rebase it onto the default branch before
//! committing, fast-forward merge it back in, and tear it down afterward.

use std::path::Path;

use anyhow::Context;

use super::{GitError, Repository};

fn looks_like_conflict(output: &str) -> bool {
    output.contains("CONFLICT") || output.contains("<<<<<<<")
}

impl Repository {
    /// Whether `path` is inside a git working tree.
    pub fn is_repo(path: &Path) -> bool {
        crate::shell_exec::Cmd::new("git")
            .args(["rev-parse", "--is-inside-work-tree"])
            .current_dir(path)
            .run()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// The SHA of `HEAD` in the discovery worktree.
    pub fn head_hash(&self) -> anyhow::Result<String> {
        Ok(self.run_command(&["rev-parse", "HEAD"])?.trim().to_string())
    }

    /// Count of commits in `defaultBranch` not yet in `worktree_path`'s `HEAD`.
    pub fn commits_behind_default(&self, worktree_path: &Path) -> anyhow::Result<usize> {
        let default_branch = self.default_branch().to_string();
        let wt = self.worktree_at(worktree_path.to_path_buf());
        let range = format!("HEAD..{default_branch}");
        wt.run_command(&["rev-list", "--count", &range])?
            .trim()
            .parse()
            .context("failed to parse commits-behind count")
    }

    /// Whether `worktree_path`'s `HEAD` has any commits not reachable from `base`.
    pub fn has_commits_ahead(&self, worktree_path: &Path, base: &str) -> anyhow::Result<bool> {
        let wt = self.worktree_at(worktree_path.to_path_buf());
        let range = format!("{base}..HEAD");
        let count: usize = wt
            .run_command(&["rev-list", "--count", &range])?
            .trim()
            .parse()
            .context("failed to parse commits-ahead count")?;
        Ok(count > 0)
    }

    /// Create a worktree at `path` on a new branch `branch`, based on `HEAD`.
    ///
    /// Retries once if git reports the branch already exists (force-deletes
    /// the stale branch first) or the worktree is already registered (force
    /// checks out the existing branch instead of creating a new one).
    pub fn create_worktree(&self, path: &Path, branch: &str) -> anyhow::Result<()> {
        let path_str = path
            .to_str()
            .ok_or_else(|| GitError::message(format!("worktree path is not valid UTF-8: {path:?}")))?;

        let first = self.run_command_output(&["worktree", "add", "-b", branch, path_str, "HEAD"])?;
        if first.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&first.stderr).into_owned();

        if stderr.contains("already exists") {
            self.run_command_output(&["branch", "-D", branch]).ok();
            let retry = self
                .run_command_output(&["worktree", "add", "-b", branch, path_str, "HEAD"])
                .context("failed to retry worktree add after deleting stale branch")?;
            if retry.status.success() {
                return Ok(());
            }
            let error = String::from_utf8_lossy(&retry.stderr).into_owned();
            return Err(GitError::WorktreeCreationFailed {
                branch: branch.to_string(),
                base_branch: None,
                error,
            }
            .into());
        }

        if stderr.contains("already registered worktree") {
            let retry = self
                .run_command_output(&["worktree", "add", "--force", path_str, branch])
                .context("failed to retry worktree add with --force")?;
            if retry.status.success() {
                return Ok(());
            }
            let error = String::from_utf8_lossy(&retry.stderr).into_owned();
            return Err(GitError::WorktreeCreationFailed {
                branch: branch.to_string(),
                base_branch: None,
                error,
            }
            .into());
        }

        Err(GitError::WorktreeCreationFailed {
            branch: branch.to_string(),
            base_branch: None,
            error: stderr,
        }
        .into())
    }

    /// Remove a task's worktree and delete its branch.
    ///
    /// Tolerates the worktree directory already being gone from disk (runs
    /// `worktree prune` in that case rather than failing).
    pub fn remove_task_worktree(&self, path: &Path, branch: &str) -> anyhow::Result<()> {
        let path_str = path
            .to_str()
            .ok_or_else(|| GitError::message(format!("worktree path is not valid UTF-8: {path:?}")))?;

        let output = self.run_command_output(&["worktree", "remove", "--force", path_str])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !path.exists() {
                self.prune_worktrees().ok();
            } else {
                return Err(GitError::WorktreeRemovalFailed {
                    branch: branch.to_string(),
                    path: path.to_path_buf(),
                    error: stderr.into_owned(),
                }
                .into());
            }
        }

        let branch_out = self.run_command_output(&["branch", "-D", branch])?;
        if !branch_out.status.success() {
            let error = String::from_utf8_lossy(&branch_out.stderr).into_owned();
            return Err(GitError::BranchDeletionFailed {
                branch: branch.to_string(),
                error,
            }
            .into());
        }

        Ok(())
    }

    /// Rebase the worktree at `worktree_path` onto the default branch.
    ///
    /// On any failure the rebase is always aborted before returning, so the
    /// worktree is never left mid-rebase.
    pub fn rebase_onto_default(&self, worktree_path: &Path) -> anyhow::Result<()> {
        let default_branch = self.default_branch().to_string();
        let wt = self.worktree_at(worktree_path.to_path_buf());

        match wt.run_command(&["rebase", &default_branch]) {
            Ok(_) => Ok(()),
            Err(e) => {
                let output = e.to_string();
                wt.run_command(&["rebase", "--abort"]).ok();

                if looks_like_conflict(&output) {
                    Err(GitError::RebaseConflict {
                        target_branch: default_branch,
                        git_output: output,
                    }
                    .into())
                } else {
                    Err(GitError::CommandFailed(format!(
                        "rebase onto {default_branch} failed: {output}"
                    ))
                    .into())
                }
            }
        }
    }

    /// Fast-forward merge `branch` into the default branch. Never produces a
    /// merge commit: fails rather than falling back to a real merge.
    pub fn ff_merge(&self, branch: &str) -> anyhow::Result<()> {
        let default_branch = self.default_branch().to_string();
        let primary = self
            .primary_worktree()?
            .ok_or_else(|| GitError::message("no primary worktree to merge into"))?;
        let wt = self.worktree_at(primary);

        wt.run_command(&["checkout", &default_branch])
            .with_context(|| format!("failed to check out {default_branch}"))?;

        match wt.run_command(&["merge", "--ff-only", branch]) {
            Ok(_) => Ok(()),
            Err(e) => Err(GitError::FastForwardFailed {
                target_branch: default_branch,
                git_output: e.to_string(),
            }
            .into()),
        }
    }
}
