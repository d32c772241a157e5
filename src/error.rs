//! Crate-level error types for the task store/controller (C1/C6) and the
//! turn runner/commit pipeline (C4/C5).
//!
//! Hand-rolled `Display`/`Error` impls, matched at call sites the way
//! [`crate::git::GitError`] is: narrow typed errors at the leaves, `anyhow`
//! for composition and context at the boundaries.

use std::fmt;

/// Failures from the persistent store and task controller.
#[derive(Debug)]
pub enum TaskError {
    /// The requested transition is not legal from the task's current status.
    IllegalTransition {
        task_id: String,
        from: String,
        to: String,
    },
    /// No task exists with this id.
    UnknownTask { task_id: String },
    /// Feedback/update submitted to a task that isn't `waiting`.
    NotWaiting { task_id: String, status: String },
    /// Reading or writing task state on disk failed.
    StoreIo { path: String, error: String },
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::IllegalTransition { task_id, from, to } => write!(
                f,
                "task {task_id}: illegal transition from {from} to {to}"
            ),
            TaskError::UnknownTask { task_id } => write!(f, "no such task: {task_id}"),
            TaskError::NotWaiting { task_id, status } => write!(
                f,
                "task {task_id} is {status}, not waiting; cannot accept feedback"
            ),
            TaskError::StoreIo { path, error } => {
                write!(f, "store I/O failed for {path}: {error}")
            }
        }
    }
}

impl std::error::Error for TaskError {}

/// Failures from the turn runner and commit pipeline.
#[derive(Debug)]
pub enum PipelineError {
    /// The sandbox container failed to spawn at all.
    ContainerSpawnFailed { task_id: String, error: String },
    /// The container exited without producing a parseable `result` event.
    NoResultEvent { task_id: String, stderr: String },
    /// Rebase-with-retry was exhausted (3 attempts) without a clean rebase.
    RebaseRetriesExhausted { task_id: String, branch: String },
    /// Commit-message generation failed; only ever logged, since Phase 1
    /// always falls back to a deterministic message.
    CommitMessageGenerationFailed { task_id: String, error: String },
    /// A subprocess did not finish within its allotted timeout.
    Timeout { task_id: String, seconds: u64 },
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::ContainerSpawnFailed { task_id, error } => {
                write!(f, "task {task_id}: failed to spawn sandbox container: {error}")
            }
            PipelineError::NoResultEvent { task_id, stderr } => write!(
                f,
                "task {task_id}: container produced no result event (stderr: {stderr})"
            ),
            PipelineError::RebaseRetriesExhausted { task_id, branch } => write!(
                f,
                "task {task_id}: rebase of {branch} onto default failed after 3 attempts"
            ),
            PipelineError::CommitMessageGenerationFailed { task_id, error } => write!(
                f,
                "task {task_id}: commit message generation failed: {error}"
            ),
            PipelineError::Timeout { task_id, seconds } => {
                write!(f, "task {task_id}: subprocess timed out after {seconds}s")
            }
        }
    }
}

impl std::error::Error for PipelineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn illegal_transition_message_names_task_and_states() {
        let err = TaskError::IllegalTransition {
            task_id: "t1".into(),
            from: "done".into(),
            to: "in_progress".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("t1"));
        assert!(msg.contains("done"));
        assert!(msg.contains("in_progress"));
    }

    #[test]
    fn rebase_retries_exhausted_message_names_branch() {
        let err = PipelineError::RebaseRetriesExhausted {
            task_id: "t2".into(),
            branch: "task/abc12345".into(),
        };
        assert!(err.to_string().contains("task/abc12345"));
    }
}
