//! Commit Pipeline (C5): host-side stage & commit, rebase-with-retry,
//! fast-forward merge, progress log, cleanup.
//!
//! Entered only when a task's status is `committing`. Every git mutation
//! happens on the host against the worktree directories the Turn Runner
//! already populated; only conflict-resolution turns touch a container, and
//! even then only to edit files already on disk in a mounted worktree.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use anyhow::Context;

use crate::config::{CommitGenerationConfig, RuntimeConfig};
use crate::error::PipelineError;
use crate::git::Repository;
use crate::llm;
use crate::sandbox;
use crate::task::Task;
use crate::worktree_manager::{self, Workspace};

const MAX_REBASE_ATTEMPTS: u32 = 3;

/// Registry of one mutex per workspace path, so Phase 2+3 of concurrent
/// pipelines against the same repository are serialized but pipelines
/// against different repositories are not.
static WORKSPACE_LOCKS: OnceLock<Mutex<HashMap<String, &'static Mutex<()>>>> = OnceLock::new();

fn workspace_lock(workspace_path: &Path) -> &'static Mutex<()> {
    let registry = WORKSPACE_LOCKS.get_or_init(|| Mutex::new(HashMap::new()));
    let key = workspace_path.display().to_string();
    let mut registry = registry.lock().unwrap();
    registry
        .entry(key)
        .or_insert_with(|| Box::leak(Box::new(Mutex::new(()))))
}

/// Run the full pipeline for `task` across every configured workspace,
/// mutating it in place. Returns `Ok(())` on success (task ends `done`) or
/// an error describing why the task should end `failed`.
pub fn run(
    runtime_config: &RuntimeConfig,
    commit_config: &CommitGenerationConfig,
    workspaces: &[Workspace],
    task: &mut Task,
) -> anyhow::Result<()> {
    for workspace in workspaces {
        let Some(worktree_path) = task.worktree_paths.get(&workspace.path.to_string_lossy().into_owned()).cloned() else {
            continue;
        };

        if !Repository::is_repo(&workspace.path) {
            extract_non_git_snapshot(&workspace.path, &worktree_path)
                .with_context(|| format!("extracting non-git snapshot for {}", workspace.name))?;
            continue;
        }

        let repo = Repository::at(&workspace.path)
            .with_context(|| format!("opening repository at {}", workspace.path.display()))?;

        stage_and_commit(&repo, &worktree_path, commit_config, task)?;

        let _guard = workspace_lock(&workspace.path).lock().unwrap();
        rebase_with_retry(runtime_config, commit_config, &repo, &worktree_path, task)?;
        merge_if_ahead(&repo, &worktree_path, &task.branch_name, &workspace.path, task)?;
        write_progress_log(&repo, &workspace.path, task)?;
    }

    worktree_manager::cleanup(&task.worktree_paths, &task.branch_name);
    task.worktree_paths.clear();
    Ok(())
}

/// Phase 1: stage everything and commit with a generated message. Skips a
/// worktree with nothing staged (porcelain clean).
fn stage_and_commit(
    repo: &Repository,
    worktree_path: &Path,
    commit_config: &CommitGenerationConfig,
    task: &Task,
) -> anyhow::Result<()> {
    let wt = repo.worktree_at(worktree_path.to_path_buf());
    wt.run_command(&["add", "-A"]).context("git add -A failed")?;

    if !wt.has_staged_changes()? {
        return Ok(());
    }

    let diff_stat = wt.run_command(&["diff", "--cached", "--stat"]).unwrap_or_default();
    let recent_log: Vec<String> = wt
        .run_command(&["log", "--oneline", "-3"])
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect();
    let branch = task.branch_name.clone();
    let repo_name = worktree_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let message = llm::generate_commit_message(commit_config, &task.id, &diff_stat, &recent_log, &branch, &repo_name);
    wt.run_command(&["commit", "-m", &message])
        .context("git commit failed")?;
    Ok(())
}

/// Phase 2a: rebase onto the default branch, resolving conflicts via a
/// resumed agent turn up to `MAX_REBASE_ATTEMPTS` times.
fn rebase_with_retry(
    runtime_config: &RuntimeConfig,
    commit_config: &CommitGenerationConfig,
    repo: &Repository,
    worktree_path: &Path,
    task: &Task,
) -> anyhow::Result<()> {
    let mut attempt = 0;
    loop {
        match repo.rebase_onto_default(worktree_path) {
            Ok(()) => return Ok(()),
            Err(e) => {
                let Some(conflict) = e.downcast_ref::<crate::git::GitError>() else {
                    return Err(e);
                };
                let crate::git::GitError::RebaseConflict { git_output, .. } = conflict else {
                    return Err(e);
                };

                attempt += 1;
                if attempt > MAX_REBASE_ATTEMPTS {
                    return Err(PipelineError::RebaseRetriesExhausted {
                        task_id: task.id.clone(),
                        branch: task.branch_name.clone(),
                    }
                    .into());
                }

                let Some(session_id) = &task.session_id else {
                    return Err(PipelineError::RebaseRetriesExhausted {
                        task_id: task.id.clone(),
                        branch: task.branch_name.clone(),
                    }
                    .into());
                };

                let prompt = llm::build_conflict_prompt(commit_config, git_output, &task.branch_name)?;
                sandbox::run_conflict_resolution_turn(
                    runtime_config,
                    &task.id,
                    worktree_path,
                    session_id,
                    &prompt,
                )
                .context("conflict-resolution turn failed")?;

                let wt = repo.worktree_at(worktree_path.to_path_buf());
                wt.run_command(&["add", "-A"]).ok();
                wt.run_command(&["rebase", "--continue"])
                    .context("rebase --continue failed after conflict resolution")?;
            }
        }
    }
}

/// Phase 2b: fast-forward merge if the worktree has commits the default
/// branch doesn't, capturing the pre-merge HEAD into `base_commit_hashes`.
fn merge_if_ahead(
    repo: &Repository,
    worktree_path: &Path,
    branch: &str,
    workspace_path: &Path,
    task: &mut Task,
) -> anyhow::Result<()> {
    if !repo.has_commits_ahead(worktree_path, repo.default_branch())? {
        return Ok(());
    }

    let pre_merge_head = repo.head_hash()?;
    repo.ff_merge(branch)?;
    task.base_commit_hashes
        .insert(workspace_path.to_string_lossy().into_owned(), pre_merge_head);
    Ok(())
}

/// Phase 3: append a record to `PROGRESS.md` on the workspace root and
/// commit it directly on the default branch.
fn write_progress_log(repo: &Repository, workspace_path: &Path, task: &Task) -> anyhow::Result<()> {
    let progress_path = workspace_path.join("PROGRESS.md");
    let commit_hash = repo.head_hash().unwrap_or_default();
    let last_result = task.results.last().cloned().unwrap_or_default();

    let entry = format!(
        "\n## {}\n- task: {}\n- branch: {}\n- commit: {}\n- prompt: {}\n- result: {}\n",
        crate::utils::now_utc().to_rfc3339(),
        task.id,
        task.branch_name,
        commit_hash,
        task.prompt,
        last_result,
    );

    let mut contents = fs::read_to_string(&progress_path).unwrap_or_default();
    contents.push_str(&entry);
    fs::write(&progress_path, contents)?;

    let primary = repo.worktree_at(workspace_path.to_path_buf());
    primary.run_command(&["add", "PROGRESS.md"])?;
    if primary.has_staged_changes()? {
        primary
            .run_command(&["commit", "-m", &format!("progress: {}", task.id)])
            .context("failed to commit PROGRESS.md")?;
    }
    Ok(())
}

/// Phase 3': copy additions/modifications from a non-git snapshot directory
/// back into the original workspace; deletions propagate; `.git/` is
/// skipped.
fn extract_non_git_snapshot(workspace_path: &Path, snapshot_path: &Path) -> anyhow::Result<()> {
    sync_dir(snapshot_path, workspace_path)
}

fn sync_dir(snapshot: &Path, dest: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(dest)?;

    let mut snapshot_entries: HashMap<std::ffi::OsString, PathBuf> = HashMap::new();
    for entry in fs::read_dir(snapshot)? {
        let entry = entry?;
        let name = entry.file_name();
        if name == ".git" {
            continue;
        }
        snapshot_entries.insert(name, entry.path());
    }

    for (name, snapshot_path) in &snapshot_entries {
        let dest_path = dest.join(name);
        if snapshot_path.is_dir() {
            sync_dir(snapshot_path, &dest_path)?;
        } else {
            let needs_copy = match fs::read(&dest_path) {
                Ok(existing) => existing != fs::read(snapshot_path)?,
                Err(_) => true,
            };
            if needs_copy {
                if dest_path.exists() {
                    fs::remove_file(&dest_path)?;
                }
                match reflink_copy::reflink_or_copy(snapshot_path, &dest_path) {
                    Ok(_) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }

    if dest.exists() {
        for entry in fs::read_dir(dest)? {
            let entry = entry?;
            let name = entry.file_name();
            if name == ".git" || snapshot_entries.contains_key(&name) {
                continue;
            }
            if entry.file_type()?.is_dir() {
                fs::remove_dir_all(entry.path())?;
            } else {
                fs::remove_file(entry.path())?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sync_dir_copies_additions_and_propagates_deletions() {
        let root = tempdir().unwrap();
        let snapshot = root.path().join("snapshot");
        let dest = root.path().join("dest");
        fs::create_dir_all(&snapshot).unwrap();
        fs::create_dir_all(&dest).unwrap();

        fs::write(snapshot.join("new.txt"), "added\n").unwrap();
        fs::write(dest.join("stale.txt"), "should be removed\n").unwrap();

        sync_dir(&snapshot, &dest).unwrap();

        assert_eq!(fs::read_to_string(dest.join("new.txt")).unwrap(), "added\n");
        assert!(!dest.join("stale.txt").exists());
    }

    #[test]
    fn sync_dir_never_touches_git_directory() {
        let root = tempdir().unwrap();
        let snapshot = root.path().join("snapshot");
        let dest = root.path().join("dest");
        fs::create_dir_all(snapshot.join(".git")).unwrap();
        fs::create_dir_all(&dest).unwrap();
        fs::write(snapshot.join(".git/HEAD"), "ref: refs/heads/main\n").unwrap();

        sync_dir(&snapshot, &dest).unwrap();

        assert!(!dest.join(".git").exists());
    }
}
