//! The single chokepoint for running external processes.
//!
//! Every git invocation, container-runtime call, and agent-CLI spawn goes
//! through [`Cmd`] so that logging, timing, and the command audit log stay
//! consistent no matter which subsystem is shelling out.

use std::ffi::OsStr;
use std::path::Path;
use std::process::{Command, Output};
use std::time::Instant;

use anyhow::{Context, Result};

/// A process invocation builder that logs and times itself when run.
///
/// `Cmd` never goes through a shell: arguments are passed directly to
/// `exec`/`CreateProcess`, so there is no quoting to get wrong and no
/// dependency on which shell happens to be installed.
pub struct Cmd {
    inner: Command,
    context: Option<String>,
}

impl Cmd {
    /// Start building an invocation of `program`.
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            inner: Command::new(program),
            context: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.inner.arg(arg);
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.inner.args(args);
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.inner.current_dir(dir);
        self
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.inner.env(key, value);
        self
    }

    /// Attach a short label (e.g. a task id or worktree name) that is
    /// carried through to the debug trace line for this invocation.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Run the command to completion and collect its output.
    pub fn run(mut self) -> Result<Output> {
        let cmd_str = format_command(&self.inner);
        run(&mut self.inner, self.context.as_deref())
            .with_context(|| format!("failed to spawn `{cmd_str}`"))
    }

    /// Run the command and turn a non-zero exit into an error carrying stderr.
    pub fn run_checked(self) -> Result<Output> {
        let context = self.context.clone();
        let cmd_str = format_command(&self.inner);
        let output = self.run()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "`{cmd_str}`{} exited with {}: {}",
                context.map(|c| format!(" [{c}]")).unwrap_or_default(),
                output.status,
                stderr.trim()
            );
        }
        Ok(output)
    }
}

fn format_command(cmd: &Command) -> String {
    let program = cmd.get_program().to_string_lossy().into_owned();
    let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy()).collect();
    if args.is_empty() {
        program
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

/// Execute a command with timing and debug logging.
///
/// This is the lowest-level primitive; prefer building a [`Cmd`] and calling
/// `run()`/`run_checked()` on it. All command execution should flow through
/// one of these two entry points so logging stays consistent.
///
/// ```text
/// $ git status [task-a1b2c3d4]
/// [cmd-trace] context=task-a1b2c3d4 cmd="git status" dur=12.3ms ok=true
/// ```
pub fn run(cmd: &mut Command, context: Option<&str>) -> std::io::Result<Output> {
    let cmd_str = format_command(cmd);

    match context {
        Some(ctx) => log::debug!("$ {} [{}]", cmd_str, ctx),
        None => log::debug!("$ {}", cmd_str),
    }

    let t0 = Instant::now();
    let result = cmd.output();
    let duration = t0.elapsed();
    let duration_ms = duration.as_secs_f64() * 1000.0;

    match (&result, context) {
        (Ok(output), Some(ctx)) => log::debug!(
            "[cmd-trace] context={} cmd=\"{}\" dur={:.1}ms ok={}",
            ctx,
            cmd_str,
            duration_ms,
            output.status.success()
        ),
        (Ok(output), None) => log::debug!(
            "[cmd-trace] cmd=\"{}\" dur={:.1}ms ok={}",
            cmd_str,
            duration_ms,
            output.status.success()
        ),
        (Err(e), Some(ctx)) => log::debug!(
            "[cmd-trace] context={} cmd=\"{}\" dur={:.1}ms err=\"{}\"",
            ctx,
            cmd_str,
            duration_ms,
            e
        ),
        (Err(e), None) => log::debug!(
            "[cmd-trace] cmd=\"{}\" dur={:.1}ms err=\"{}\"",
            cmd_str,
            duration_ms,
            e
        ),
    }

    let label = context.unwrap_or("unlabeled");
    let exit_code = result.as_ref().ok().and_then(|o| o.status.code());
    crate::command_log::log_command(label, &cmd_str, exit_code, Some(duration));

    result
}
