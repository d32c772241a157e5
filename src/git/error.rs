//! Git error types and formatting.

use std::path::PathBuf;

#[derive(Debug)]
pub enum GitError {
    /// Generic error with a message, already formatted for display.
    CommandFailed(String),
    /// A parsing failure against git's plumbing output.
    ParseError(String),
    /// Repository is in detached HEAD state.
    DetachedHead,
    /// Working tree has uncommitted changes where a clean tree was required.
    UncommittedChanges,
    /// Branch already exists (when trying to create it).
    BranchAlreadyExists { branch: String },
    /// Worktree directory is missing from disk despite being registered.
    WorktreeMissing { branch: String },
    /// No worktree is registered for a branch.
    NoWorktreeFound { branch: String },
    /// Child process exited with a non-zero code (preserves the code for signals).
    ChildProcessExited { code: i32, message: String },
    /// Rebase onto the default branch produced a conflict; the rebase has
    /// already been aborted by the caller before this error is returned.
    RebaseConflict {
        target_branch: String,
        git_output: String,
    },
    /// Fast-forward merge failed after a successful, conflict-free rebase.
    FastForwardFailed {
        target_branch: String,
        git_output: String,
    },
    /// Worktree path already exists on the filesystem.
    WorktreePathExists { path: PathBuf },
    /// Creating a worktree failed.
    WorktreeCreationFailed {
        branch: String,
        base_branch: Option<String>,
        error: String,
    },
    /// Removing a worktree directory failed.
    WorktreeRemovalFailed {
        branch: String,
        path: PathBuf,
        error: String,
    },
    /// Deleting a branch failed.
    BranchDeletionFailed { branch: String, error: String },
}

impl GitError {
    /// Build a formatted application error (as opposed to a raw git failure).
    pub fn message(msg: impl Into<String>) -> Self {
        use crate::styling::{ERROR, ERROR_EMOJI};
        let msg = msg.into();
        GitError::CommandFailed(format!("{ERROR_EMOJI} {ERROR}{msg}{ERROR:#}"))
    }
}

impl std::fmt::Display for GitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use crate::styling::{ERROR, ERROR_BOLD, ERROR_EMOJI, HINT, HINT_EMOJI};

        match self {
            GitError::CommandFailed(msg) => write!(f, "{}", msg),

            GitError::ParseError(msg) => {
                write!(f, "{ERROR_EMOJI} {ERROR}{msg}{ERROR:#}")
            }

            GitError::DetachedHead => write!(
                f,
                "{ERROR_EMOJI} {ERROR}Not on a branch (detached HEAD){ERROR:#}\n\n{HINT_EMOJI} {HINT}Check out a branch before running this command{HINT:#}"
            ),

            GitError::UncommittedChanges => write!(
                f,
                "{ERROR_EMOJI} {ERROR}Working tree has uncommitted changes{ERROR:#}\n\n{HINT_EMOJI} {HINT}Commit or stash them first{HINT:#}"
            ),

            GitError::BranchAlreadyExists { branch } => write!(
                f,
                "{ERROR_EMOJI} {ERROR}Branch {ERROR_BOLD}{branch}{ERROR_BOLD:#}{ERROR} already exists{ERROR:#}"
            ),

            GitError::WorktreeMissing { branch } => write!(
                f,
                "{ERROR_EMOJI} {ERROR}Worktree directory missing for {ERROR_BOLD}{branch}{ERROR_BOLD:#}{ERROR:#}\n\n{HINT_EMOJI} {HINT}Run 'git worktree prune' to clean up{HINT:#}"
            ),

            GitError::NoWorktreeFound { branch } => write!(
                f,
                "{ERROR_EMOJI} {ERROR}No worktree found for branch {ERROR_BOLD}{branch}{ERROR_BOLD:#}{ERROR:#}"
            ),

            GitError::ChildProcessExited { code: _, message } => {
                write!(f, "{ERROR_EMOJI} {ERROR}{message}{ERROR:#}")
            }

            GitError::RebaseConflict {
                target_branch,
                git_output,
            } => {
                use crate::styling::format_with_gutter;

                write!(
                    f,
                    "{ERROR_EMOJI} {ERROR}Rebase onto {ERROR_BOLD}{target_branch}{ERROR_BOLD:#}{ERROR} produced a conflict; rebase aborted{ERROR:#}"
                )?;

                if !git_output.is_empty() {
                    writeln!(f)?;
                    write!(f, "{}", format_with_gutter(git_output, "", None))?;
                }

                Ok(())
            }

            GitError::FastForwardFailed {
                target_branch,
                git_output,
            } => {
                use crate::styling::format_with_gutter;

                write!(
                    f,
                    "{ERROR_EMOJI} {ERROR}Fast-forward merge onto {ERROR_BOLD}{target_branch}{ERROR_BOLD:#}{ERROR} failed after a clean rebase{ERROR:#}"
                )?;

                if !git_output.is_empty() {
                    writeln!(f)?;
                    write!(f, "{}", format_with_gutter(git_output, "", None))?;
                }

                Ok(())
            }

            GitError::WorktreePathExists { path } => write!(
                f,
                "{ERROR_EMOJI} {ERROR}Directory already exists: {ERROR_BOLD}{}{ERROR_BOLD:#}{ERROR:#}",
                path.display()
            ),

            GitError::WorktreeCreationFailed {
                branch,
                base_branch,
                error,
            } => {
                let base_suffix = base_branch
                    .as_ref()
                    .map(|base| format!("{ERROR} from base {ERROR_BOLD}{base}{ERROR_BOLD:#}"))
                    .unwrap_or_default();

                let header = format!(
                    "{ERROR_EMOJI} {ERROR}Failed to create worktree for {ERROR_BOLD}{branch}{ERROR_BOLD:#}{base_suffix}{ERROR:#}"
                );
                write!(f, "{}", format_error_block(header, error))
            }

            GitError::WorktreeRemovalFailed {
                branch,
                path,
                error,
            } => {
                let header = format!(
                    "{ERROR_EMOJI} {ERROR}Failed to remove worktree for {ERROR_BOLD}{branch}{ERROR_BOLD:#}{ERROR} at {ERROR_BOLD}{}{ERROR_BOLD:#}{ERROR:#}",
                    path.display()
                );
                write!(f, "{}", format_error_block(header, error))
            }

            GitError::BranchDeletionFailed { branch, error } => {
                let header = format!(
                    "{ERROR_EMOJI} {ERROR}Failed to delete branch {ERROR_BOLD}{branch}{ERROR_BOLD:#}{ERROR:#}"
                );
                write!(f, "{}", format_error_block(header, error))
            }
        }
    }
}

fn format_error_block(header: String, error: &str) -> String {
    use crate::styling::format_with_gutter;
    let trimmed = error.trim();
    if trimmed.is_empty() {
        header
    } else {
        format!("{header}\n{}", format_with_gutter(trimmed, "", None))
    }
}

impl std::error::Error for GitError {}

/// `execute_streaming`-style helpers embed exit codes in `io::Error` messages as
/// `CHILD_EXIT_CODE:{code} {message}` since `io::Error` has no field for one;
/// this unpacks that protocol back into a proper [`GitError::ChildProcessExited`].
impl From<std::io::Error> for GitError {
    fn from(e: std::io::Error) -> Self {
        let msg = e.to_string();
        if let Some(rest) = msg.strip_prefix("CHILD_EXIT_CODE:")
            && let Some(space_idx) = rest.find(' ')
            && let Ok(code) = rest[..space_idx].parse::<i32>()
        {
            let message = rest[space_idx + 1..].to_string();
            return GitError::ChildProcessExited { code, message };
        }
        GitError::CommandFailed(msg)
    }
}
