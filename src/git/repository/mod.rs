//! Repository - git repository operations.
//!
//! This module provides the [`Repository`] type for interacting with git
//! repositories and [`WorkingTree`] for worktree-specific operations.
//!
//! # Module organization
//!
//! - `mod.rs` - Core types and construction
//! - `working_tree.rs` - WorkingTree struct and worktree-specific operations
//! - `worktrees.rs` - Worktree management (list, resolve, remove)
//! - `diff.rs` - Diff, history, and commit operations
//! - `task_ops.rs` - Worktree create/rebase/fast-forward-merge operations for tasks

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, OnceLock};

use crate::shell_exec::Cmd;

use dashmap::DashMap;
use once_cell::sync::OnceCell;

use anyhow::{Context, bail};

use dunce::canonicalize;

use super::{DefaultBranchName, GitError, LineDiff, Worktree};

mod diff;
mod task_ops;
mod working_tree;
mod worktrees;

pub use working_tree::WorkingTree;
pub(super) use working_tree::path_to_logging_context;

// ============================================================================
// Repository Cache
// ============================================================================

/// Cached data for a single repository.
///
/// Wrapped in `Arc` so cloning a [`Repository`] shares the cache rather than
/// re-running the same git plumbing commands.
#[derive(Debug, Default)]
pub(super) struct RepoCache {
    pub(super) is_bare: OnceCell<bool>,
    pub(super) repo_path: OnceCell<PathBuf>,
    pub(super) default_branch: OnceCell<Option<String>>,
    /// Merge-base cache: (commit1, commit2) -> merge_base_sha (None = no common ancestor)
    pub(super) merge_base: DashMap<(String, String), Option<String>>,
    /// Worktree root paths: worktree_path -> canonicalized root
    pub(super) worktree_roots: DashMap<PathBuf, PathBuf>,
    /// Current branch per worktree: worktree_path -> branch name (None = detached HEAD)
    pub(super) current_branches: DashMap<PathBuf, Option<String>>,
    /// Batch ahead/behind cache: (base, branch) -> (ahead, behind)
    pub(super) ahead_behind: DashMap<(String, String), (usize, usize)>,
}

/// The result of resolving a branch name to a worktree.
#[derive(Debug, Clone)]
pub enum ResolvedWorktree {
    /// The branch has a worktree registered at `path`.
    Worktree { path: PathBuf, branch: Option<String> },
    /// The branch exists but has no worktree checked out.
    BranchOnly { branch: String },
}

/// Global base path for repository discovery, set once at startup.
static BASE_PATH: OnceLock<PathBuf> = OnceLock::new();

/// Default base path when no explicit base path is configured.
static DEFAULT_BASE_PATH: LazyLock<PathBuf> = LazyLock::new(|| PathBuf::from("."));

/// Set the global base path used by [`Repository::current`].
pub fn set_base_path(path: PathBuf) {
    BASE_PATH.set(path).ok();
}

fn base_path() -> &'static PathBuf {
    BASE_PATH.get().unwrap_or(&DEFAULT_BASE_PATH)
}

/// Repository state for git operations against a single `.git` directory.
///
/// For worktree-specific operations, use [`WorkingTree`] obtained via
/// [`current_worktree()`](Self::current_worktree) or [`worktree_at()`](Self::worktree_at).
#[derive(Debug, Clone)]
pub struct Repository {
    /// Path used to discover the repository and run git commands.
    discovery_path: PathBuf,
    /// The shared `.git` directory, resolved at construction time.
    git_common_dir: PathBuf,
    /// Cached data for this repository, shared across clones via `Arc`.
    pub(super) cache: Arc<RepoCache>,
}

impl Repository {
    /// Discover the repository from the configured base path (see [`set_base_path`]).
    pub fn current() -> anyhow::Result<Self> {
        Self::at(base_path().clone())
    }

    /// Discover the repository rooted at `path`.
    ///
    /// Creates a new `Repository` with its own cache. Clone an existing
    /// `Repository` instead of calling `at()` repeatedly when the cache
    /// should be shared across operations on the same repo.
    pub fn at(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let discovery_path = path.into();
        let git_common_dir = Self::resolve_git_common_dir(&discovery_path)?;

        Ok(Self {
            discovery_path,
            git_common_dir,
            cache: Arc::new(RepoCache::default()),
        })
    }

    /// Whether this repository shares its cache with `other` (same `Arc`).
    #[doc(hidden)]
    pub fn shares_cache_with(&self, other: &Repository) -> bool {
        Arc::ptr_eq(&self.cache, &other.cache)
    }

    /// Resolve the git common directory for `discovery_path`, canonicalized.
    fn resolve_git_common_dir(discovery_path: &Path) -> anyhow::Result<PathBuf> {
        let output = Cmd::new("git")
            .args(["rev-parse", "--git-common-dir"])
            .current_dir(discovery_path)
            .context(path_to_logging_context(discovery_path))
            .run()
            .context("failed to execute: git rev-parse --git-common-dir")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("{}", stderr.trim());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let path = PathBuf::from(stdout.trim());
        let absolute_path = if path.is_relative() {
            discovery_path.join(&path)
        } else {
            path
        };
        canonicalize(&absolute_path).context("failed to resolve git common directory")
    }

    /// The path this repository was discovered from.
    pub fn discovery_path(&self) -> &Path {
        &self.discovery_path
    }

    /// A worktree view at the discovery path.
    pub fn current_worktree(&self) -> WorkingTree<'_> {
        self.worktree_at(self.discovery_path.clone())
    }

    /// A worktree view at a specific path.
    pub fn worktree_at(&self, path: impl Into<PathBuf>) -> WorkingTree<'_> {
        WorkingTree {
            repo: self,
            path: path.into(),
        }
    }

    /// The current branch name of the discovery worktree, or an error if detached.
    pub fn require_current_branch(&self) -> anyhow::Result<String> {
        self.current_worktree()
            .branch()?
            .ok_or_else(|| GitError::DetachedHead.into())
    }

    // =========================================================================
    // Core repository properties
    // =========================================================================

    /// The shared `.git` directory. For linked worktrees this is always the
    /// main worktree's `.git`, never the per-worktree `.git/worktrees/<name>`.
    pub fn git_common_dir(&self) -> &Path {
        &self.git_common_dir
    }

    /// The repository root path: the main worktree directory for normal
    /// repos, or the bare directory itself for bare repos.
    pub fn repo_path(&self) -> &Path {
        self.cache.repo_path.get_or_init(|| {
            if self.is_bare() {
                return self.git_common_dir.clone();
            }

            if let Ok(out) = Cmd::new("git")
                .args(["rev-parse", "--show-toplevel"])
                .current_dir(&self.git_common_dir)
                .context(path_to_logging_context(&self.git_common_dir))
                .run()
                && out.status.success()
            {
                return PathBuf::from(String::from_utf8_lossy(&out.stdout).trim());
            }

            self.git_common_dir
                .parent()
                .expect("git directory has no parent")
                .to_path_buf()
        })
    }

    /// Whether this is a bare repository (no working tree of its own).
    pub fn is_bare(&self) -> bool {
        *self.cache.is_bare.get_or_init(|| {
            let output = Cmd::new("git")
                .args(["rev-parse", "--is-bare-repository"])
                .current_dir(&self.git_common_dir)
                .context(path_to_logging_context(&self.git_common_dir))
                .run()
                .expect("git rev-parse failed on valid repo");
            output.status.success() && String::from_utf8_lossy(&output.stdout).trim() == "true"
        })
    }

    /// Resolve the default branch: `origin/HEAD` symref, else the current
    /// branch of the discovery worktree, else the literal `"main"`.
    pub fn default_branch(&self) -> &str {
        self.cache
            .default_branch
            .get_or_init(|| {
                if let Ok(output) =
                    self.run_command(&["symbolic-ref", "--short", "refs/remotes/origin/HEAD"])
                    && let Ok(name) = DefaultBranchName::from_remote(&output)
                {
                    return Some(name.into_string());
                }

                if let Ok(Some(branch)) = self.current_worktree().branch() {
                    return Some(branch);
                }

                Some("main".to_string())
            })
            .as_deref()
            .unwrap_or("main")
    }

    // =========================================================================
    // Command execution
    // =========================================================================

    fn logging_context(&self) -> String {
        path_to_logging_context(&self.discovery_path)
    }

    /// Run a git command in this repository's context, returning stdout.
    pub fn run_command(&self, args: &[&str]) -> anyhow::Result<String> {
        let output = Cmd::new("git")
            .args(args.iter().copied())
            .current_dir(&self.discovery_path)
            .context(self.logging_context())
            .run()
            .with_context(|| format!("failed to execute: git {}", args.join(" ")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).replace('\r', "\n");
            let stdout = String::from_utf8_lossy(&output.stdout);
            let error_msg = [stderr.trim(), stdout.trim()]
                .into_iter()
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("\n");
            bail!("{}", error_msg);
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run a git command and report whether it exited zero.
    ///
    /// Useful for commands that use exit codes as the result, like
    /// `git merge-base --is-ancestor` or `git diff --quiet`.
    pub fn run_command_check(&self, args: &[&str]) -> anyhow::Result<bool> {
        Ok(self.run_command_output(args)?.status.success())
    }

    /// Run a git command and return the raw `Output` for inspecting exit codes.
    pub(super) fn run_command_output(&self, args: &[&str]) -> anyhow::Result<std::process::Output> {
        Cmd::new("git")
            .args(args.iter().copied())
            .current_dir(&self.discovery_path)
            .context(self.logging_context())
            .run()
            .with_context(|| format!("failed to execute: git {}", args.join(" ")))
    }
}

#[cfg(test)]
mod tests;
