//! Per-task, per-workspace worktree lifecycle: setup, cleanup, and orphan
//! pruning, plus the non-git snapshot fallback for workspaces with no repo.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::git::Repository;
use crate::path::format_path_for_display;
use crate::task::branch_name_for;

/// One configured collaborator directory: may or may not be a git repo.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub name: String,
    pub path: PathBuf,
}

/// The result of `setup` for a single task: worktree directories keyed by
/// workspace path, plus the branch name shared by all of them.
pub struct SetupResult {
    pub paths: HashMap<String, PathBuf>,
    pub branch_name: String,
}

fn worktree_dir(worktrees_dir: &Path, task_id: &str, workspace: &Workspace) -> PathBuf {
    let basename = workspace
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| workspace.name.clone());
    worktrees_dir.join(task_id).join(basename)
}

/// Allocate (or reuse) a worktree directory for every configured workspace.
pub fn setup(
    worktrees_dir: &Path,
    task_id: &str,
    workspaces: &[Workspace],
) -> anyhow::Result<SetupResult> {
    let branch_name = branch_name_for(task_id);
    let mut paths = HashMap::new();

    for workspace in workspaces {
        let dir = worktree_dir(worktrees_dir, task_id, workspace);

        if Repository::is_repo(&workspace.path) {
            let repo = Repository::at(&workspace.path)
                .with_context(|| format!("opening repository at {}", workspace.path.display()))?;

            if !(dir.exists() && repo.worktree_at_path(&dir)?.is_some()) {
                repo.create_worktree(&dir, &branch_name)
                    .with_context(|| format!("creating worktree for {}", workspace.name))?;
            }
        } else if !dir.exists() {
            setup_non_git_snapshot(&workspace.path, &dir)
                .with_context(|| format!("snapshotting non-git workspace {}", workspace.name))?;
        }

        paths.insert(workspace.path.to_string_lossy().into_owned(), dir);
    }

    Ok(SetupResult { paths, branch_name })
}

/// Recursively copy a non-git workspace into `dir`, then `git init` it with
/// a local identity and an initial commit of the snapshot.
fn setup_non_git_snapshot(source: &Path, dir: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(dir)?;
    copy_dir_recursive(source, dir)?;

    let repo = Repository::at(dir).context("initializing snapshot repo")?;
    repo.run_command(&["init"])?;
    repo.run_command(&["config", "user.email", "wallfacer@localhost"])?;
    repo.run_command(&["config", "user.name", "wallfacer"])?;
    repo.run_command(&["add", "-A"])?;
    // An empty snapshot produces nothing to commit; that's fine, the first
    // real commit lands during the commit pipeline.
    let _ = repo.run_command(&["commit", "-m", "snapshot of workspace", "--allow-empty"]);
    Ok(())
}

fn copy_dir_recursive(source: &Path, dest: &Path) -> anyhow::Result<()> {
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let name = entry.file_name();
        if name == ".git" {
            continue;
        }
        let src_path = entry.path();
        let dst_path = dest.join(&name);
        if entry.file_type()?.is_dir() {
            fs::create_dir_all(&dst_path)?;
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            match reflink_copy::reflink_or_copy(&src_path, &dst_path) {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(())
}

/// Remove every worktree in `paths`; safe to call repeatedly, errors are
/// logged but never fatal.
pub fn cleanup(paths: &HashMap<String, PathBuf>, branch_name: &str) {
    for (workspace_path, dir) in paths {
        let Ok(workspace_path) = Path::new(workspace_path).canonicalize().or_else(|_| {
            Ok::<_, std::io::Error>(PathBuf::from(workspace_path))
        }) else {
            continue;
        };
        if !Repository::is_repo(&workspace_path) {
            if let Err(e) = fs::remove_dir_all(dir) {
                log::warn!("failed to remove non-git worktree dir {}: {e}", format_path_for_display(dir));
            }
            continue;
        }
        match Repository::at(&workspace_path) {
            Ok(repo) => {
                if let Err(e) = repo.remove_task_worktree(dir, branch_name) {
                    log::warn!("failed to clean up worktree {}: {e}", format_path_for_display(dir));
                }
            }
            Err(e) => log::warn!(
                "failed to open repository at {} during cleanup: {e}",
                format_path_for_display(&workspace_path)
            ),
        }
    }
}

/// At startup: remove task-id directories under `worktrees_dir` that have
/// no matching live task, then prune each workspace's worktree registry.
pub fn prune_orphans(
    worktrees_dir: &Path,
    live_task_ids: &[String],
    workspaces: &[Workspace],
) -> anyhow::Result<()> {
    if worktrees_dir.exists() {
        for entry in fs::read_dir(worktrees_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !live_task_ids.iter().any(|id| id == &name) {
                log::info!("pruning orphaned worktree directory {name}");
                if let Err(e) = fs::remove_dir_all(entry.path()) {
                    log::warn!("failed to remove orphaned worktree dir {name}: {e}");
                }
            }
        }
    }

    for workspace in workspaces {
        if !Repository::is_repo(&workspace.path) {
            continue;
        }
        match Repository::at(&workspace.path) {
            Ok(repo) => {
                if let Err(e) = repo.prune_worktrees() {
                    log::warn!("worktree prune failed for {}: {e}", workspace.name);
                }
            }
            Err(e) => log::warn!(
                "failed to open repository at {}: {e}",
                format_path_for_display(&workspace.path)
            ),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn init_repo(path: &Path) {
        std::fs::create_dir_all(path).unwrap();
        let repo = Repository::at(path).unwrap();
        repo.run_command(&["init"]).unwrap();
        repo.run_command(&["config", "user.email", "a@b.c"]).unwrap();
        repo.run_command(&["config", "user.name", "tester"]).unwrap();
        std::fs::write(path.join("README.md"), "hi\n").unwrap();
        repo.run_command(&["add", "-A"]).unwrap();
        repo.run_command(&["commit", "-m", "init"]).unwrap();
    }

    #[test]
    fn setup_creates_a_worktree_per_workspace() {
        let root = tempdir().unwrap();
        let repo_path = root.path().join("repo");
        init_repo(&repo_path);

        let worktrees_dir = root.path().join("worktrees");
        let workspaces = vec![Workspace { name: "repo".into(), path: repo_path.clone() }];

        let result = setup(&worktrees_dir, "task123", &workspaces).unwrap();
        let dir = result.paths.get(&repo_path.to_string_lossy().into_owned()).unwrap();
        assert!(dir.exists());
        assert_eq!(result.branch_name, "task/task123");
    }

    #[test]
    fn setup_is_idempotent() {
        let root = tempdir().unwrap();
        let repo_path = root.path().join("repo");
        init_repo(&repo_path);

        let worktrees_dir = root.path().join("worktrees");
        let workspaces = vec![Workspace { name: "repo".into(), path: repo_path.clone() }];

        let first = setup(&worktrees_dir, "task123", &workspaces).unwrap();
        let second = setup(&worktrees_dir, "task123", &workspaces).unwrap();
        assert_eq!(first.paths, second.paths);
    }

    #[test]
    fn non_git_workspace_gets_a_snapshot_repo() {
        let root = tempdir().unwrap();
        let workspace_path = root.path().join("plain_dir");
        std::fs::create_dir_all(&workspace_path).unwrap();
        std::fs::write(workspace_path.join("note.md"), "hello\n").unwrap();

        let worktrees_dir = root.path().join("worktrees");
        let workspaces = vec![Workspace { name: "plain".into(), path: workspace_path.clone() }];

        let result = setup(&worktrees_dir, "task456", &workspaces).unwrap();
        let dir = result.paths.get(&workspace_path.to_string_lossy().into_owned()).unwrap();
        assert!(dir.join("note.md").exists());
        assert!(dir.join(".git").exists());
    }

    #[test]
    fn cleanup_removes_worktree_directory() {
        let root = tempdir().unwrap();
        let repo_path = root.path().join("repo");
        init_repo(&repo_path);

        let worktrees_dir = root.path().join("worktrees");
        let workspaces = vec![Workspace { name: "repo".into(), path: repo_path.clone() }];
        let result = setup(&worktrees_dir, "task789", &workspaces).unwrap();

        cleanup(&result.paths, &result.branch_name);

        let dir = result.paths.values().next().unwrap();
        assert!(!dir.exists());
    }
}
