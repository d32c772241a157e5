//! Task Controller (C6): the public façade exposing the state-transition
//! API and dispatching background work (Runner, Commit Pipeline, title
//! generation) on detached threads.

use std::sync::Arc;

use crate::config::{CommitGenerationConfig, RuntimeConfig};
use crate::error::TaskError;
use crate::event::EventType;
use crate::llm;
use crate::sandbox::{self, TurnOutcome, TurnRequest};
use crate::store::Store;
use crate::task::{Status, Task};
use crate::worktree_manager::{self, Workspace};

/// Everything background workers need a clone of to operate independently
/// of the controller that launched them.
#[derive(Clone)]
pub struct Controller {
    store: Arc<Store>,
    runtime_config: Arc<RuntimeConfig>,
    commit_config: Arc<CommitGenerationConfig>,
    workspaces: Arc<Vec<Workspace>>,
}

impl Controller {
    pub fn new(
        store: Arc<Store>,
        runtime_config: RuntimeConfig,
        commit_config: CommitGenerationConfig,
        workspaces: Vec<Workspace>,
    ) -> Self {
        Self {
            store,
            runtime_config: Arc::new(runtime_config),
            commit_config: Arc::new(commit_config),
            workspaces: Arc::new(workspaces),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// CreateTask: starts in `backlog`, fires async title generation.
    pub fn create_task(&self, prompt: String, timeout_minutes: Option<u32>) -> anyhow::Result<Task> {
        let task = Task::new(prompt, timeout_minutes);
        let created = self.store.create(task)?;
        self.store.append_event(
            &created.id,
            EventType::StateChange,
            serde_json::json!({"to": "backlog"}),
        )?;
        self.spawn_title_generation(created.id.clone());
        Ok(created)
    }

    /// UpdateTask: prompt/timeout edits plus the legal status transitions
    /// reachable from a plain PATCH (retry to backlog, start from backlog).
    pub fn update_task(
        &self,
        task_id: &str,
        prompt: Option<String>,
        timeout_minutes: Option<u32>,
        status: Option<Status>,
        fresh_start: Option<bool>,
    ) -> anyhow::Result<Task> {
        let previous_status = self.store.get(task_id)?.status;

        let updated = self.store.with_task_mut(task_id, |task| {
            if let Some(prompt) = prompt {
                task.prompt = prompt;
            }
            if let Some(timeout) = timeout_minutes {
                task.timeout_minutes = crate::task::clamp_timeout(timeout);
            }
            if let Some(fresh_start) = fresh_start {
                task.fresh_start = fresh_start;
            }
            if let Some(status) = status {
                if status == Status::Backlog
                    && matches!(task.status, Status::Done | Status::Cancelled | Status::Waiting | Status::Failed)
                {
                    // Preserve session_id unless the caller explicitly asked for fresh_start.
                    task.reset_for_retry(!fresh_start.unwrap_or(false));
                }
                task.transition_to(status)?;
            }
            Ok(())
        })?;

        if status == Some(Status::InProgress) && previous_status == Status::Backlog {
            self.spawn_runner(updated.id.clone(), updated.prompt.clone());
        }

        Ok(updated)
    }

    /// SubmitFeedback: `waiting` -> `in_progress`, launches a Runner with
    /// the feedback message as the next user turn.
    pub fn submit_feedback(&self, task_id: &str, message: String) -> anyhow::Result<Task> {
        let current = self.store.get(task_id)?;
        if current.status != Status::Waiting {
            anyhow::bail!(TaskError::NotWaiting {
                task_id: task_id.to_string(),
                status: current.status.to_string(),
            });
        }

        self.store.append_event(
            task_id,
            EventType::Feedback,
            serde_json::json!({"message": message}),
        )?;

        let updated = self.store.with_task_mut(task_id, |task| {
            task.prompt_history.push(task.prompt.clone());
            task.prompt = message.clone();
            task.transition_to(Status::InProgress)?;
            Ok(())
        })?;

        self.spawn_runner(updated.id.clone(), message);
        Ok(updated)
    }

    /// CompleteTask: `waiting` -> `committing`, launches the Commit Pipeline.
    pub fn complete_task(&self, task_id: &str) -> anyhow::Result<Task> {
        let updated = self.store.with_task_mut(task_id, |task| {
            task.transition_to(Status::Committing)?;
            Ok(())
        })?;
        self.spawn_commit_pipeline(updated.id.clone());
        Ok(updated)
    }

    /// CancelTask: kills any live container, cleans up worktrees, -> cancelled.
    pub fn cancel_task(&self, task_id: &str) -> anyhow::Result<Task> {
        sandbox::cancel(&self.runtime_config, task_id).ok();

        let updated = self.store.with_task_mut(task_id, |task| {
            task.transition_to(Status::Cancelled)?;
            Ok(())
        })?;

        worktree_manager::cleanup(&updated.worktree_paths, &updated.branch_name);
        self.store.with_task_mut(task_id, |task| {
            task.worktree_paths.clear();
            Ok(())
        })
    }

    /// ResumeTask: `failed` -> `in_progress`, same session, optional timeout.
    pub fn resume_task(&self, task_id: &str, timeout_minutes: Option<u32>) -> anyhow::Result<Task> {
        let updated = self.store.with_task_mut(task_id, |task| {
            if let Some(timeout) = timeout_minutes {
                task.timeout_minutes = crate::task::clamp_timeout(timeout);
            }
            task.transition_to(Status::InProgress)?;
            Ok(())
        })?;
        let prompt = updated.prompt.clone();
        self.spawn_runner(updated.id.clone(), prompt);
        Ok(updated)
    }

    /// DeleteTask: cancel (best-effort) + remove the task's data directory.
    pub fn delete_task(&self, task_id: &str) -> anyhow::Result<()> {
        sandbox::cancel(&self.runtime_config, task_id).ok();
        if let Ok(task) = self.store.get(task_id) {
            worktree_manager::cleanup(&task.worktree_paths, &task.branch_name);
        }
        self.store.delete(task_id)
    }

    /// Archive/Unarchive: legal only when status ∈ {done, cancelled}.
    pub fn set_archived(&self, task_id: &str, archived: bool) -> anyhow::Result<Task> {
        self.store.with_task_mut(task_id, |task| {
            if !matches!(task.status, Status::Done | Status::Cancelled) {
                anyhow::bail!(
                    "task {} is {}, archiving is only legal for done/cancelled tasks",
                    task.id,
                    task.status
                );
            }
            task.archived = archived;
            Ok(())
        })
    }

    /// Remove orphaned worktree directories and demote crashed tasks;
    /// called once at startup after the Store has loaded from disk.
    pub fn prune_orphans(&self) -> anyhow::Result<()> {
        let live_ids: Vec<String> = self.store.list().into_iter().map(|t| t.id).collect();
        worktree_manager::prune_orphans(&self.runtime_config.worktrees_dir, &live_ids, &self.workspaces)
    }

    fn spawn_title_generation(&self, task_id: String) {
        let controller = self.clone();
        std::thread::spawn(move || {
            let task = match controller.store.get(&task_id) {
                Ok(task) => task,
                Err(_) => return,
            };
            // Early-return guard: don't race a second generator queued concurrently.
            if task.title.is_some() {
                return;
            }
            match llm::generate_title(&controller.commit_config, &task.prompt) {
                Ok(title) => {
                    let _ = controller.store.with_task_mut(&task_id, |task| {
                        if task.title.is_none() {
                            task.title = Some(title.clone());
                        }
                        Ok(())
                    });
                }
                Err(e) => log::warn!("title generation failed for task {task_id}: {e}"),
            }
        });
    }

    fn spawn_runner(&self, task_id: String, prompt: String) {
        let controller = self.clone();
        std::thread::spawn(move || {
            controller.run_turns(&task_id, prompt);
        });
    }

    fn run_turns(&self, task_id: &str, mut prompt: String) {
        loop {
            let task = match self.store.get(task_id) {
                Ok(task) => task,
                Err(_) => return,
            };
            if task.status == Status::Cancelled {
                return;
            }

            if let Err(e) = self.ensure_worktrees(task_id) {
                log::error!("worktree setup failed for task {task_id}: {e}");
                self.fail_task(task_id, &e.to_string());
                return;
            }

            let task = match self.store.get(task_id) {
                Ok(task) => task,
                Err(_) => return,
            };

            let request = TurnRequest {
                task_id,
                prompt: &prompt,
                session_id: task.session_id.as_deref(),
                fresh_start: task.fresh_start,
                model: None,
                worktree_paths: &task.worktree_paths,
                instructions_file: None,
                timeout_minutes: task.timeout_minutes,
            };

            let outcome = match sandbox::run_turn(&self.runtime_config, &request) {
                Ok(outcome) => outcome,
                Err(e) => {
                    log::error!("turn failed for task {task_id}: {e}");
                    self.fail_task(task_id, &e.to_string());
                    return;
                }
            };

            let turn_number = task.results.len() as u32;
            let _ = self.store.save_turn_output(
                task_id,
                turn_number,
                &outcome.raw_stdout,
                &outcome.raw_stderr,
            );

            if !self.apply_turn_outcome(task_id, &outcome) {
                return; // lost the race to a concurrent cancel
            }

            match outcome.stop_reason {
                crate::task::StopReason::EndTurn => {
                    let advanced = self.store.with_task_mut(task_id, |task| {
                        task.transition_to(Status::Committing)?;
                        Ok(())
                    });
                    if advanced.is_ok() {
                        self.run_commit_pipeline(task_id);
                    }
                    return;
                }
                crate::task::StopReason::MaxTokens => {
                    prompt = "continue".to_string();
                    continue;
                }
                crate::task::StopReason::IsError => {
                    self.fail_task(task_id, "agent reported is_error");
                    return;
                }
                crate::task::StopReason::Waiting => {
                    let _ = self.store.with_task_mut(task_id, |task| {
                        task.transition_to(Status::Waiting)?;
                        Ok(())
                    });
                    return;
                }
            }
        }
    }

    fn ensure_worktrees(&self, task_id: &str) -> anyhow::Result<()> {
        let task = self.store.get(task_id)?;
        let needs_setup = task.worktree_paths.is_empty()
            || task.worktree_paths.values().any(|p| !p.exists());
        if !needs_setup {
            return Ok(());
        }

        let result = worktree_manager::setup(&self.runtime_config.worktrees_dir, task_id, &self.workspaces)?;
        self.store.with_task_mut(task_id, |task| {
            task.worktree_paths = result.paths.clone();
            Ok(())
        })?;
        Ok(())
    }

    /// Apply a turn's result to the task, guarding against the race with a
    /// concurrent cancel. Returns `false` if the task was already cancelled.
    fn apply_turn_outcome(&self, task_id: &str, outcome: &TurnOutcome) -> bool {
        let result = self.store.with_task_mut(task_id, |task| {
            if task.status == Status::Cancelled {
                anyhow::bail!("task cancelled mid-turn");
            }
            task.results.push(outcome.result_text.clone());
            task.usage.add(&outcome.usage_delta);
            task.stop_reason = Some(outcome.stop_reason.clone());
            if let Some(session_id) = &outcome.session_id {
                task.session_id = Some(session_id.clone());
            }
            task.fresh_start = false;
            Ok(())
        });

        if result.is_ok() {
            let _ = self.store.append_event(
                task_id,
                EventType::Output,
                serde_json::json!({"result": outcome.result_text}),
            );
        }
        result.is_ok()
    }

    fn fail_task(&self, task_id: &str, message: &str) {
        let _ = self.store.with_task_mut(task_id, |task| {
            if task.status != Status::Cancelled {
                task.transition_to(Status::Failed)?;
            }
            Ok(())
        });
        let _ = self.store.append_event(
            task_id,
            EventType::Error,
            serde_json::json!({"message": message}),
        );
    }

    fn spawn_commit_pipeline(&self, task_id: String) {
        let controller = self.clone();
        std::thread::spawn(move || controller.run_commit_pipeline(&task_id));
    }

    fn run_commit_pipeline(&self, task_id: &str) {
        let mut task = match self.store.get(task_id) {
            Ok(task) => task,
            Err(_) => return,
        };

        match crate::commit_pipeline::run(&self.runtime_config, &self.commit_config, &self.workspaces, &mut task) {
            Ok(()) => {
                let worktree_paths = task.worktree_paths.clone();
                let base_commit_hashes = task.base_commit_hashes.clone();
                let _ = self.store.with_task_mut(task_id, |t| {
                    t.worktree_paths = worktree_paths.clone();
                    t.base_commit_hashes = base_commit_hashes.clone();
                    t.transition_to(Status::Done)?;
                    Ok(())
                });
            }
            Err(e) => {
                log::error!("commit pipeline failed for task {task_id}: {e}");
                self.fail_task(task_id, &e.to_string());
            }
        }
    }
}
