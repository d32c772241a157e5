//! The `Task` data model and its lifecycle state machine.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TaskError;

/// Lower bound for `timeout_minutes` (§ clamp rules).
pub const MIN_TIMEOUT_MINUTES: u32 = 5;
/// Upper bound for `timeout_minutes`.
pub const MAX_TIMEOUT_MINUTES: u32 = 1440;
/// Default per-turn timeout when none is supplied.
pub const DEFAULT_TIMEOUT_MINUTES: u32 = 15;

/// Clamp a requested timeout into `[MIN_TIMEOUT_MINUTES, MAX_TIMEOUT_MINUTES]`.
pub fn clamp_timeout(minutes: u32) -> u32 {
    minutes.clamp(MIN_TIMEOUT_MINUTES, MAX_TIMEOUT_MINUTES)
}

/// A task's position in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Status {
    Backlog,
    InProgress,
    Waiting,
    Committing,
    Done,
    Failed,
    Cancelled,
}

impl Status {
    /// Whether `self -> to` is one of the arrows in the state machine.
    pub fn can_transition_to(self, to: Status) -> bool {
        use Status::*;
        if to == Cancelled {
            return !matches!(self, Done | Cancelled);
        }
        matches!(
            (self, to),
            (Backlog, InProgress)
                | (InProgress, Waiting)
                | (InProgress, Failed)
                | (Waiting, InProgress)
                | (Waiting, Committing)
                | (Committing, Done)
                | (Committing, Failed)
                | (Failed, Backlog)
                | (Failed, InProgress)
                | (Done, Backlog)
                | (Cancelled, Backlog)
                | (Waiting, Backlog)
        )
    }
}

/// Accumulated token/cost usage across all turns of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cost_usd: f64,
}

impl Usage {
    /// Fold a turn's usage delta into the running total.
    pub fn add(&mut self, delta: &Usage) {
        self.input_tokens += delta.input_tokens;
        self.output_tokens += delta.output_tokens;
        self.cache_read_tokens += delta.cache_read_tokens;
        self.cache_creation_tokens += delta.cache_creation_tokens;
        self.cost_usd += delta.cost_usd;
    }
}

/// The terminal signal the agent CLI emits per turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    IsError,
    /// Empty/unknown: the agent has returned control to the user.
    Waiting,
}

impl StopReason {
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            "end_turn" => StopReason::EndTurn,
            "max_tokens" => StopReason::MaxTokens,
            "is_error" => StopReason::IsError,
            _ => StopReason::Waiting,
        }
    }
}

/// One user-authored unit of work driven through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub prompt: String,
    #[serde(default)]
    pub prompt_history: Vec<String>,
    pub title: Option<String>,
    pub status: Status,
    #[serde(default)]
    pub archived: bool,
    pub timeout_minutes: u32,
    pub session_id: Option<String>,
    #[serde(default)]
    pub fresh_start: bool,
    #[serde(default = "default_mount_worktrees")]
    pub mount_worktrees: bool,
    #[serde(default)]
    pub worktree_paths: HashMap<String, PathBuf>,
    #[serde(default)]
    pub base_commit_hashes: HashMap<String, String>,
    pub branch_name: String,
    #[serde(default)]
    pub results: Vec<String>,
    pub stop_reason: Option<StopReason>,
    #[serde(default)]
    pub usage: Usage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_mount_worktrees() -> bool {
    true
}

impl Task {
    /// Construct a brand new task in `Status::Backlog`.
    pub fn new(prompt: String, timeout_minutes: Option<u32>) -> Self {
        let id = Uuid::new_v4().to_string();
        let now = crate::utils::now_utc();
        Self {
            branch_name: branch_name_for(&id),
            id,
            prompt,
            prompt_history: Vec::new(),
            title: None,
            status: Status::Backlog,
            archived: false,
            timeout_minutes: clamp_timeout(timeout_minutes.unwrap_or(DEFAULT_TIMEOUT_MINUTES)),
            session_id: None,
            fresh_start: false,
            mount_worktrees: true,
            worktree_paths: HashMap::new(),
            base_commit_hashes: HashMap::new(),
            results: Vec::new(),
            stop_reason: None,
            usage: Usage::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Validate and apply a status transition, bumping `updated_at`.
    pub fn transition_to(&mut self, to: Status) -> Result<(), TaskError> {
        if !self.status.can_transition_to(to) {
            return Err(TaskError::IllegalTransition {
                task_id: self.id.clone(),
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        self.updated_at = crate::utils::now_utc();
        Ok(())
    }

    /// Reset the fields the controller clears when a finished task is
    /// returned to `backlog` for a retry.
    pub fn reset_for_retry(&mut self, preserve_session: bool) {
        self.results.clear();
        self.worktree_paths.clear();
        self.base_commit_hashes.clear();
        self.stop_reason = None;
        if !preserve_session {
            self.session_id = None;
        }
        self.updated_at = crate::utils::now_utc();
    }
}

/// `task/<first-8-chars-of-id>`.
pub fn branch_name_for(task_id: &str) -> String {
    let prefix: String = task_id.chars().filter(|c| *c != '-').take(8).collect();
    format!("task/{prefix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Status::Backlog, Status::InProgress, true)]
    #[case(Status::InProgress, Status::Waiting, true)]
    #[case(Status::InProgress, Status::Failed, true)]
    #[case(Status::Waiting, Status::InProgress, true)]
    #[case(Status::Waiting, Status::Committing, true)]
    #[case(Status::Committing, Status::Done, true)]
    #[case(Status::Committing, Status::Failed, true)]
    #[case(Status::Failed, Status::Backlog, true)]
    #[case(Status::Failed, Status::InProgress, true)]
    #[case(Status::Done, Status::Backlog, true)]
    #[case(Status::Cancelled, Status::Backlog, true)]
    #[case(Status::Waiting, Status::Backlog, true)]
    #[case(Status::Backlog, Status::Cancelled, true)]
    #[case(Status::InProgress, Status::Cancelled, true)]
    #[case(Status::Waiting, Status::Cancelled, true)]
    #[case(Status::Failed, Status::Cancelled, true)]
    #[case(Status::Committing, Status::Cancelled, true)]
    #[case(Status::Done, Status::Cancelled, false)]
    #[case(Status::Cancelled, Status::Cancelled, false)]
    #[case(Status::Backlog, Status::Done, false)]
    #[case(Status::Backlog, Status::Waiting, false)]
    #[case(Status::Waiting, Status::Done, false)]
    #[case(Status::Done, Status::InProgress, false)]
    fn transition_legality(#[case] from: Status, #[case] to: Status, #[case] legal: bool) {
        assert_eq!(from.can_transition_to(to), legal, "{from} -> {to}");
    }

    #[test]
    fn new_task_starts_in_backlog_with_derived_branch_name() {
        let task = Task::new("do the thing".to_string(), None);
        assert_eq!(task.status, Status::Backlog);
        assert!(task.branch_name.starts_with("task/"));
        assert_eq!(task.branch_name.len(), "task/".len() + 8);
    }

    #[test]
    fn timeout_is_clamped_on_construction() {
        assert_eq!(Task::new("x".into(), Some(1)).timeout_minutes, MIN_TIMEOUT_MINUTES);
        assert_eq!(Task::new("x".into(), Some(99999)).timeout_minutes, MAX_TIMEOUT_MINUTES);
        assert_eq!(Task::new("x".into(), Some(60)).timeout_minutes, 60);
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let mut task = Task::new("x".into(), None);
        let err = task.transition_to(Status::Done).unwrap_err();
        assert!(matches!(err, TaskError::IllegalTransition { .. }));
        assert_eq!(task.status, Status::Backlog);
    }

    #[test]
    fn reset_for_retry_clears_run_state() {
        let mut task = Task::new("x".into(), None);
        task.results.push("turn 1 output".into());
        task.worktree_paths.insert("/repo".into(), "/wt/repo".into());
        task.session_id = Some("sess-1".into());
        task.reset_for_retry(true);
        assert!(task.results.is_empty());
        assert!(task.worktree_paths.is_empty());
        assert_eq!(task.session_id, Some("sess-1".into()));

        task.session_id = Some("sess-2".into());
        task.reset_for_retry(false);
        assert_eq!(task.session_id, None);
    }

    #[test]
    fn usage_accumulates_additively() {
        let mut total = Usage::default();
        total.add(&Usage { input_tokens: 10, output_tokens: 5, cache_read_tokens: 0, cache_creation_tokens: 0, cost_usd: 0.01 });
        total.add(&Usage { input_tokens: 3, output_tokens: 2, cache_read_tokens: 1, cache_creation_tokens: 0, cost_usd: 0.02 });
        assert_eq!(total.input_tokens, 13);
        assert_eq!(total.output_tokens, 7);
        assert!((total.cost_usd - 0.03).abs() < 1e-9);
    }

    #[test]
    fn stop_reason_from_raw_unknown_means_waiting() {
        assert_eq!(StopReason::from_raw("end_turn"), StopReason::EndTurn);
        assert_eq!(StopReason::from_raw(""), StopReason::Waiting);
        assert_eq!(StopReason::from_raw("something_else"), StopReason::Waiting);
    }
}
