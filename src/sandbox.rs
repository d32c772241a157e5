//! Turn Runner: spawns one ephemeral container per agent turn, parses its
//! streamed NDJSON output, and reports the turn's outcome.
//!
//! Git commands never run inside the container: a worktree's `.git` file is
//! a pointer into the parent repository's `.git/worktrees/` directory on the
//! host, which the container's mount namespace cannot see. Only the agent
//! CLI itself runs inside; everything git-shaped happens in [`crate::git`]
//! and [`crate::commit_pipeline`] on the host.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::Context;
use serde_json::Value;

use crate::config::RuntimeConfig;
use crate::error::PipelineError;
use crate::task::{StopReason, Usage};

/// The container name a running turn is registered under; also the
/// cancellation target (`<runtime> kill wallfacer-<task_id>`).
pub fn container_name(task_id: &str) -> String {
    format!("wallfacer-{task_id}")
}

/// Everything the container invocation needs besides runtime configuration.
pub struct TurnRequest<'a> {
    pub task_id: &'a str,
    pub prompt: &'a str,
    pub session_id: Option<&'a str>,
    pub fresh_start: bool,
    pub model: Option<&'a str>,
    pub worktree_paths: &'a HashMap<String, PathBuf>,
    pub instructions_file: Option<&'a Path>,
    pub timeout_minutes: u32,
}

/// Parsed outcome of a single turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub session_id: Option<String>,
    pub stop_reason: StopReason,
    pub result_text: String,
    pub usage_delta: Usage,
    pub raw_stdout: Vec<u8>,
    pub raw_stderr: Vec<u8>,
}

/// Build the container invocation's argv, in the fixed, reproducible order
/// the runtime expects.
pub fn build_container_args(config: &RuntimeConfig, request: &TurnRequest<'_>) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "--rm".to_string(),
        "--network=host".to_string(),
        "--name".to_string(),
        container_name(request.task_id),
    ];

    if let Some(env_file) = &config.env_file {
        args.push("--env-file".to_string());
        args.push(env_file.display().to_string());
    }

    let mut mounts: Vec<&PathBuf> = request.worktree_paths.values().collect();
    mounts.sort();
    for path in mounts {
        args.push("-v".to_string());
        args.push(format!("{}:{}", path.display(), path.display()));
    }

    if let Some(instructions) = request.instructions_file {
        args.push("-v".to_string());
        args.push(format!("{}:/workspace/CLAUDE.md:ro", instructions.display()));
    }

    args.push("-v".to_string());
    args.push(format!("wallfacer-agent-session-{}:/root/.agent", request.task_id));

    args.push(config.sandbox_image.clone());

    args.push("-p".to_string());
    args.push(request.prompt.to_string());
    args.push("--verbose".to_string());
    args.push("--output-format".to_string());
    args.push("stream-json".to_string());

    if let Some(session_id) = request.session_id
        && !session_id.is_empty()
        && !request.fresh_start
    {
        args.push("--resume".to_string());
        args.push(session_id.to_string());
    }

    if let Some(model) = request.model {
        args.push("--model".to_string());
        args.push(model.to_string());
    }

    args
}

/// Spawn the container, wait (bounded by `timeout_minutes`), and parse the
/// result. A non-zero exit with no parseable `result` event is a hard
/// execution error; callers translate that into task status `failed`.
pub fn run_turn(config: &RuntimeConfig, request: &TurnRequest<'_>) -> anyhow::Result<TurnOutcome> {
    let args = build_container_args(config, request);
    let label = format!("agent.turn[{}]", request.task_id);

    let mut cmd = Command::new(&config.container_cmd);
    cmd.args(&args);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    log::info!("starting turn for task {}", request.task_id);
    log::debug!("$ {} {} [{}]", config.container_cmd, args.join(" "), label);

    let t0 = Instant::now();
    let mut child = cmd.spawn().map_err(|e| PipelineError::ContainerSpawnFailed {
        task_id: request.task_id.to_string(),
        error: e.to_string(),
    })?;

    let timeout = Duration::from_secs(u64::from(request.timeout_minutes) * 60);
    let status = wait_timeout::ChildExt::wait_timeout(&mut child, timeout)
        .context("error waiting for sandbox container")?;

    let status = match status {
        Some(status) => status,
        None => {
            child.kill().ok();
            child.wait().ok();
            return Err(PipelineError::Timeout {
                task_id: request.task_id.to_string(),
                seconds: u64::from(request.timeout_minutes) * 60,
            }
            .into());
        }
    };

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    if let Some(mut out) = child.stdout.take() {
        std::io::Read::read_to_end(&mut out, &mut stdout).ok();
    }
    if let Some(mut err) = child.stderr.take() {
        std::io::Read::read_to_end(&mut err, &mut stderr).ok();
    }

    let duration = t0.elapsed();
    crate::command_log::log_command(
        &label,
        &format!("{} {}", config.container_cmd, args.join(" ")),
        status.code(),
        Some(duration),
    );

    let stdout_text = String::from_utf8_lossy(&stdout);
    let result_event = last_result_event(&stdout_text);

    let Some(result_event) = result_event else {
        let stderr_text = String::from_utf8_lossy(&stderr).into_owned();
        return Err(PipelineError::NoResultEvent {
            task_id: request.task_id.to_string(),
            stderr: stderr_text.trim().to_string(),
        }
        .into());
    };

    Ok(TurnOutcome {
        session_id: result_event
            .get("session_id")
            .and_then(Value::as_str)
            .map(str::to_string),
        stop_reason: StopReason::from_raw(
            result_event.get("stop_reason").and_then(Value::as_str).unwrap_or(""),
        ),
        result_text: result_event
            .get("result")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        usage_delta: parse_usage(result_event.get("usage")),
        raw_stdout: stdout,
        raw_stderr: stderr,
    })
}

/// Scan `stdout` backward through parseable JSON lines, preferring the last
/// one with `type == "result"`. Tolerates a trailing malformed/partial line.
fn last_result_event(stdout: &str) -> Option<Value> {
    stdout
        .lines()
        .rev()
        .filter_map(|line| serde_json::from_str::<Value>(line.trim()).ok())
        .find(|value| value.get("type").and_then(Value::as_str) == Some("result"))
}

fn parse_usage(usage: Option<&Value>) -> Usage {
    let Some(usage) = usage else {
        return Usage::default();
    };
    let as_u64 = |key: &str| usage.get(key).and_then(Value::as_u64).unwrap_or(0);
    Usage {
        input_tokens: as_u64("input_tokens"),
        output_tokens: as_u64("output_tokens"),
        cache_read_tokens: as_u64("cache_read_input_tokens"),
        cache_creation_tokens: as_u64("cache_creation_input_tokens"),
        cost_usd: usage.get("total_cost_usd").and_then(Value::as_f64).unwrap_or(0.0),
    }
}

/// Kill the turn's container by name, the cooperative-cancellation primitive.
pub fn cancel(config: &RuntimeConfig, task_id: &str) -> anyhow::Result<()> {
    let name = container_name(task_id);
    let output = Command::new(&config.container_cmd)
        .args(["kill", &name])
        .output()
        .context("failed to invoke container kill")?;
    crate::command_log::log_command(
        &format!("agent.cancel[{task_id}]"),
        &format!("{} kill {}", config.container_cmd, name),
        output.status.code(),
        None,
    );
    Ok(())
}

/// Resume the task's agent session with workspace access so it can fix the
/// conflict markers left by a failed rebase. Unlike title/commit-message
/// generation this mounts the worktree, because the agent must edit files
/// on disk, not just produce text.
pub fn run_conflict_resolution_turn(
    config: &RuntimeConfig,
    task_id: &str,
    worktree_path: &Path,
    session_id: &str,
    prompt: &str,
) -> anyhow::Result<TurnOutcome> {
    let mut mounts = HashMap::new();
    mounts.insert(worktree_path.display().to_string(), worktree_path.to_path_buf());
    let request = TurnRequest {
        task_id,
        prompt,
        session_id: Some(session_id),
        fresh_start: false,
        model: None,
        worktree_paths: &mounts,
        instructions_file: None,
        timeout_minutes: 5,
    };
    run_turn(config, &request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_result_event_picks_the_final_result_type() {
        let stdout = concat!(
            "{\"type\":\"system\",\"subtype\":\"init\"}\n",
            "{\"type\":\"assistant\",\"text\":\"working...\"}\n",
            "{\"type\":\"result\",\"session_id\":\"s1\",\"stop_reason\":\"end_turn\",\"result\":\"done\"}\n",
        );
        let event = last_result_event(stdout).unwrap();
        assert_eq!(event["session_id"], "s1");
    }

    #[test]
    fn last_result_event_tolerates_trailing_malformed_line() {
        let stdout = concat!(
            "{\"type\":\"result\",\"session_id\":\"s1\",\"stop_reason\":\"end_turn\",\"result\":\"done\"}\n",
            "not json at all\n",
        );
        let event = last_result_event(stdout).unwrap();
        assert_eq!(event["session_id"], "s1");
    }

    #[test]
    fn last_result_event_returns_none_when_absent() {
        let stdout = "{\"type\":\"assistant\",\"text\":\"hi\"}\n";
        assert!(last_result_event(stdout).is_none());
    }

    #[test]
    fn build_container_args_includes_resume_only_when_session_present() {
        let config = RuntimeConfig::default();
        let mounts = HashMap::new();
        let request = TurnRequest {
            task_id: "abc12345",
            prompt: "do it",
            session_id: Some("sess-1"),
            fresh_start: false,
            model: None,
            worktree_paths: &mounts,
            instructions_file: None,
            timeout_minutes: 15,
        };
        let args = build_container_args(&config, &request);
        assert!(args.contains(&"--resume".to_string()));
        assert!(args.contains(&"sess-1".to_string()));
        assert!(args.contains(&"wallfacer-abc12345".to_string()));
    }

    #[test]
    fn build_container_args_omits_resume_on_fresh_start() {
        let config = RuntimeConfig::default();
        let mounts = HashMap::new();
        let request = TurnRequest {
            task_id: "abc12345",
            prompt: "do it",
            session_id: Some("sess-1"),
            fresh_start: true,
            model: None,
            worktree_paths: &mounts,
            instructions_file: None,
            timeout_minutes: 15,
        };
        let args = build_container_args(&config, &request);
        assert!(!args.contains(&"--resume".to_string()));
    }

    #[test]
    fn parse_usage_defaults_to_zero_when_absent() {
        let usage = parse_usage(None);
        assert_eq!(usage.input_tokens, 0);
        assert_eq!(usage.cost_usd, 0.0);
    }
}
