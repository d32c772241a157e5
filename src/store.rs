//! In-memory task index with atomic-rename JSON persistence and coalesced
//! change notifications.
//!
//! Every task lives at `<dataDir>/<fingerprint>/<task-id>/task.json`, guarded
//! by one reader-writer lock shared by the whole store. Writes always go
//! through `serialize -> write tmp -> rename` so a crash mid-write never
//! leaves a partially-written `task.json` behind.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use indexmap::IndexMap;

use crate::error::TaskError;
use crate::event::{self, Event, EventType};
use crate::task::{Status, Task};

/// Write `bytes` to `path` atomically: `path.tmp` then rename over `path`.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("tmp")
    ));
    fs::write(&tmp_path, bytes)?;
    fs::rename(&tmp_path, path)?;
    if let Some(parent) = path.parent()
        && let Ok(dir) = fs::File::open(parent)
    {
        let _ = dir.sync_all();
    }
    Ok(())
}

fn task_dir(fingerprint_dir: &Path, task_id: &str) -> PathBuf {
    fingerprint_dir.join(task_id)
}

fn task_json_path(fingerprint_dir: &Path, task_id: &str) -> PathBuf {
    task_dir(fingerprint_dir, task_id).join("task.json")
}

/// The persistent task store for one workspace-fingerprint scope.
pub struct Store {
    fingerprint_dir: PathBuf,
    tasks: RwLock<IndexMap<String, Task>>,
    subscribers: RwLock<Vec<Sender<()>>>,
}

impl Store {
    /// Open (or create) the store rooted at `<data_dir>/<fingerprint>`,
    /// loading every persisted task and running crash recovery.
    pub fn open(data_dir: &Path, fingerprint: &str) -> anyhow::Result<Self> {
        let fingerprint_dir = data_dir.join(fingerprint);
        fs::create_dir_all(&fingerprint_dir)?;

        let mut tasks = IndexMap::new();
        if fingerprint_dir.exists() {
            for entry in fs::read_dir(&fingerprint_dir)? {
                let entry = entry?;
                let task_json = entry.path().join("task.json");
                if !task_json.is_file() {
                    continue;
                }
                let text = fs::read_to_string(&task_json)?;
                match serde_json::from_str::<Task>(&text) {
                    Ok(task) => {
                        tasks.insert(task.id.clone(), task);
                    }
                    Err(e) => {
                        log::warn!("skipping unparseable task.json at {task_json:?}: {e}");
                    }
                }
            }
        }

        let store = Self {
            fingerprint_dir,
            tasks: RwLock::new(tasks),
            subscribers: RwLock::new(Vec::new()),
        };
        store.recover_crashed_tasks()?;
        Ok(store)
    }

    /// Demote any `in_progress`/`committing` task to `failed` on startup.
    fn recover_crashed_tasks(&self) -> anyhow::Result<()> {
        let ids: Vec<String> = {
            let tasks = self.tasks.read().unwrap();
            tasks
                .values()
                .filter(|t| matches!(t.status, Status::InProgress | Status::Committing))
                .map(|t| t.id.clone())
                .collect()
        };

        for id in ids {
            log::warn!("recovering crashed task {id}: forcing to failed");
            self.with_task_mut(&id, |task| {
                task.status = Status::Failed;
                Ok(())
            })?;
            self.append_event(
                &id,
                EventType::System,
                serde_json::json!({"message": "recovered from crash, forced to failed"}),
            )?;
        }
        Ok(())
    }

    /// Insert a brand-new task and persist it.
    pub fn create(&self, task: Task) -> anyhow::Result<Task> {
        let mut tasks = self.tasks.write().unwrap();
        self.persist_task(&task)?;
        tasks.insert(task.id.clone(), task.clone());
        drop(tasks);
        self.notify();
        Ok(task)
    }

    /// Fetch a snapshot of one task.
    pub fn get(&self, task_id: &str) -> Result<Task, TaskError> {
        self.tasks
            .read()
            .unwrap()
            .get(task_id)
            .cloned()
            .ok_or_else(|| TaskError::UnknownTask {
                task_id: task_id.to_string(),
            })
    }

    /// Snapshot of every task, insertion order preserved.
    pub fn list(&self) -> Vec<Task> {
        self.tasks.read().unwrap().values().cloned().collect()
    }

    /// Mutate one task under the write lock, persist it, and notify
    /// subscribers. `f` returning `Err` aborts the mutation: nothing is
    /// written to disk and the in-memory copy is unchanged.
    pub fn with_task_mut(
        &self,
        task_id: &str,
        f: impl FnOnce(&mut Task) -> anyhow::Result<()>,
    ) -> anyhow::Result<Task> {
        let mut tasks = self.tasks.write().unwrap();
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| TaskError::UnknownTask {
                task_id: task_id.to_string(),
            })?;
        let mut candidate = task.clone();
        f(&mut candidate)?;
        self.persist_task(&candidate)?;
        *task = candidate.clone();
        drop(tasks);
        self.notify();
        Ok(candidate)
    }

    /// Remove a task's in-memory entry and its on-disk directory.
    pub fn delete(&self, task_id: &str) -> anyhow::Result<()> {
        let mut tasks = self.tasks.write().unwrap();
        tasks
            .shift_remove(task_id)
            .ok_or_else(|| TaskError::UnknownTask {
                task_id: task_id.to_string(),
            })?;
        let dir = task_dir(&self.fingerprint_dir, task_id);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        drop(tasks);
        self.notify();
        Ok(())
    }

    fn persist_task(&self, task: &Task) -> anyhow::Result<()> {
        let path = task_json_path(&self.fingerprint_dir, &task.id);
        let bytes = serde_json::to_vec_pretty(task)?;
        atomic_write(&path, &bytes)
    }

    /// Append an event to a task's trace, computing the next sequence
    /// number under the store's write lock so concurrent appends never
    /// collide.
    pub fn append_event(
        &self,
        task_id: &str,
        event_type: EventType,
        data: serde_json::Value,
    ) -> anyhow::Result<Event> {
        let _guard = self.tasks.write().unwrap();
        let traces_dir = task_dir(&self.fingerprint_dir, task_id).join("traces");
        let seq = event::next_seq(&traces_dir)?;
        let ev = Event {
            task_id: task_id.to_string(),
            seq,
            created_at: crate::utils::now_utc(),
            event_type,
            data,
        };
        event::append(&traces_dir, &ev)?;
        Ok(ev)
    }

    /// Full ordered event trace for a task.
    pub fn events(&self, task_id: &str) -> anyhow::Result<Vec<Event>> {
        let traces_dir = task_dir(&self.fingerprint_dir, task_id).join("traces");
        event::load_all(&traces_dir)
    }

    /// Persist one turn's raw stdout (and stderr, if non-empty). Never
    /// overwrites an existing turn file.
    pub fn save_turn_output(
        &self,
        task_id: &str,
        turn_number: u32,
        stdout: &[u8],
        stderr: &[u8],
    ) -> anyhow::Result<()> {
        let outputs_dir = task_dir(&self.fingerprint_dir, task_id).join("outputs");
        fs::create_dir_all(&outputs_dir)?;

        let stdout_path = outputs_dir.join(format!("turn-{turn_number:04}.json"));
        if !stdout_path.exists() {
            atomic_write(&stdout_path, stdout)?;
        }

        if !stderr.is_empty() {
            let stderr_path = outputs_dir.join(format!("turn-{turn_number:04}.err.log"));
            if !stderr_path.exists() {
                atomic_write(&stderr_path, stderr)?;
            }
        }
        Ok(())
    }

    /// Register a new subscriber. The returned receiver holds at most one
    /// pending notification; drain it and re-read full state on wake.
    pub fn subscribe(&self) -> Receiver<()> {
        let (tx, rx) = bounded(1);
        self.subscribers.write().unwrap().push(tx);
        rx
    }

    /// Drop subscribers whose receiver has been dropped, detected on the
    /// next notification attempt.
    fn notify(&self) {
        let mut subscribers = self.subscribers.write().unwrap();
        subscribers.retain(|tx| !matches!(tx.try_send(()), Err(TrySendError::Disconnected(()))));
    }

}

impl From<io::Error> for TaskError {
    fn from(e: io::Error) -> Self {
        TaskError::StoreIo {
            path: String::new(),
            error: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), "fp1").unwrap();
        let task = Task::new("do a thing".into(), None);
        let id = task.id.clone();
        store.create(task.clone()).unwrap();

        let fetched = store.get(&id).unwrap();
        assert_eq!(fetched.id, task.id);
        assert_eq!(fetched.prompt, task.prompt);
    }

    #[test]
    fn reopening_store_loads_persisted_tasks() {
        let dir = tempdir().unwrap();
        let id = {
            let store = Store::open(dir.path(), "fp1").unwrap();
            let task = Task::new("persist me".into(), None);
            let id = task.id.clone();
            store.create(task).unwrap();
            id
        };

        let store2 = Store::open(dir.path(), "fp1").unwrap();
        let fetched = store2.get(&id).unwrap();
        assert_eq!(fetched.prompt, "persist me");
    }

    #[test]
    fn crash_recovery_demotes_in_progress_to_failed() {
        let dir = tempdir().unwrap();
        {
            let store = Store::open(dir.path(), "fp1").unwrap();
            let mut task = Task::new("x".into(), None);
            task.status = Status::InProgress;
            store.create(task).unwrap();
        }

        let store2 = Store::open(dir.path(), "fp1").unwrap();
        let tasks = store2.list();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status, Status::Failed);
    }

    #[test]
    fn with_task_mut_persists_mutation() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), "fp1").unwrap();
        let task = Task::new("x".into(), None);
        let id = task.id.clone();
        store.create(task).unwrap();

        store
            .with_task_mut(&id, |t| {
                t.transition_to(Status::InProgress)?;
                Ok(())
            })
            .unwrap();

        let fetched = store.get(&id).unwrap();
        assert_eq!(fetched.status, Status::InProgress);
    }

    #[test]
    fn failed_mutation_leaves_task_unchanged() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), "fp1").unwrap();
        let task = Task::new("x".into(), None);
        let id = task.id.clone();
        store.create(task).unwrap();

        let result = store.with_task_mut(&id, |t| {
            t.transition_to(Status::Done)?;
            Ok(())
        });
        assert!(result.is_err());
        assert_eq!(store.get(&id).unwrap().status, Status::Backlog);
    }

    #[test]
    fn delete_removes_task_and_directory() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), "fp1").unwrap();
        let task = Task::new("x".into(), None);
        let id = task.id.clone();
        store.create(task).unwrap();
        store.delete(&id).unwrap();
        assert!(store.get(&id).is_err());
    }

    #[test]
    fn subscriber_receives_coalesced_notification() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), "fp1").unwrap();
        let rx = store.subscribe();

        let task1 = Task::new("a".into(), None);
        let task2 = Task::new("b".into(), None);
        store.create(task1).unwrap();
        store.create(task2).unwrap();

        // Two writes, but the single-slot channel coalesces to one pending wake.
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn save_turn_output_never_overwrites() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), "fp1").unwrap();
        let task = Task::new("x".into(), None);
        let id = task.id.clone();
        store.create(task).unwrap();

        store.save_turn_output(&id, 0, b"first", b"").unwrap();
        store.save_turn_output(&id, 0, b"second", b"").unwrap();

        let path = dir.path().join("fp1").join(&id).join("outputs/turn-0000.json");
        assert_eq!(fs::read(path).unwrap(), b"first");
    }

    #[test]
    fn event_append_computes_seq_under_lock() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), "fp1").unwrap();
        let task = Task::new("x".into(), None);
        let id = task.id.clone();
        store.create(task).unwrap();

        store.append_event(&id, EventType::StateChange, serde_json::json!({})).unwrap();
        store.append_event(&id, EventType::Output, serde_json::json!({})).unwrap();

        let events = store.events(&id).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].seq, 0);
        assert_eq!(events[1].seq, 1);
    }
}
