//! Subordinate generation calls: task titles, commit messages, and
//! conflict-resolution prompt text.
//!
//! These are best-effort, no-workspace-mount calls distinct from the main
//! agent turn loop: a short prompt goes in over stdin, a short response
//! comes back over stdout. The external command is configured via
//! [`CommitGenerationConfig`]; when unconfigured (or it fails), callers fall
//! back to a deterministic message so a commit is never blocked on an LLM
//! being available.

use std::io::Write;
use std::process::{self, Stdio};
use std::time::Instant;

use anyhow::Context;
use minijinja::Environment;

use crate::config::CommitGenerationConfig;

/// Template variables shared by commit-message and conflict-prompt templates.
struct TemplateContext<'a> {
    git_diff: &'a str,
    branch: &'a str,
    recent_commits: Option<&'a [String]>,
    repo_name: &'a str,
}

/// Default template for commit message generation.
const DEFAULT_COMMIT_TEMPLATE: &str = r#"Format
- First line: <50 chars, present tense, describes WHAT and WHY (not HOW).
- Blank line after first line.
- Optional details with proper line breaks explaining context. Commits with more substantial changes should have more details.
- Return ONLY the formatted message without quotes, code blocks, or preamble.

Style
- Do not give normative statements or otherwise speculate on why the change was made.
- Broadly match the style of the previous commit messages.

The context contains:
- <git-diff> with the staged changes. This is the ONLY content you should base your message on.
- <git-info> with branch name and recent commit message titles for style reference ONLY.

---
<git-diff>
```
{{ git_diff }}
```
</git-diff>

<git-info>
  <current-branch>{{ branch }}</current-branch>
{% if recent_commits %}
  <previous-commit-message-titles>
{% for commit in recent_commits %}
    <previous-commit-message-title>{{ commit }}</previous-commit-message-title>
{% endfor %}
  </previous-commit-message-titles>
{% endif %}
</git-info>
"#;

/// Default template for the conflict-resolution prompt handed to the
/// resumed agent session after a rebase conflict.
const DEFAULT_CONFLICT_TEMPLATE: &str = r#"The rebase of {{ branch }} onto the default branch produced a conflict. Resolve the conflict markers in the working tree, stage the result, and do not run `git rebase --continue` yourself — that is handled by the caller.

<conflict-output>
```
{{ git_diff }}
```
</conflict-output>
"#;

const DEFAULT_TITLE_PROMPT: &str =
    "Summarize the following task in 2-5 words, suitable as a short title. \
     Return only the title, no punctuation, no quotes.\n\n{{ prompt }}";

fn execute_subordinate_command(
    label: &str,
    command: &str,
    args: &[String],
    prompt: &str,
) -> anyhow::Result<String> {
    let mut cmd = process::Command::new(command);
    cmd.args(args);
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    log::debug!("$ {} {} [{}]", command, args.join(" "), label);

    let t0 = Instant::now();
    let mut child = cmd.spawn().context("failed to spawn subordinate command")?;

    if let Some(mut stdin) = child.stdin.take()
        && let Err(e) = stdin.write_all(prompt.as_bytes())
        && e.kind() != std::io::ErrorKind::BrokenPipe
    {
        return Err(e).context("failed to write prompt to subordinate command stdin");
    }

    let output = child
        .wait_with_output()
        .context("failed to wait for subordinate command output")?;
    let duration = t0.elapsed();

    crate::command_log::log_command(
        label,
        &format!("{command} {}", args.join(" ")),
        output.status.code(),
        Some(duration),
    );

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("{}", stderr.trim());
    }

    let message = String::from_utf8_lossy(&output.stdout).trim().to_owned();
    if message.is_empty() {
        anyhow::bail!("subordinate command returned an empty response");
    }
    Ok(message)
}

fn resolve_template(
    inline: &Option<String>,
    file: &Option<String>,
    default: &str,
) -> anyhow::Result<String> {
    match (inline, file) {
        (Some(text), None) => Ok(text.clone()),
        (None, Some(path)) => {
            let expanded = shellexpand_tilde(path);
            std::fs::read_to_string(&expanded)
                .with_context(|| format!("failed to read template file '{expanded}'"))
        }
        (None, None) => Ok(default.to_string()),
        (Some(_), Some(_)) => {
            anyhow::bail!("configure only one of template and template_file, not both")
        }
    }
}

fn shellexpand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest).to_string_lossy().into_owned();
    }
    path.to_string()
}

fn render_commit_template(template: &str, context: &TemplateContext<'_>) -> anyhow::Result<String> {
    let env = Environment::new();
    let tmpl = env.template_from_str(template)?;
    let recent: &[String] = context.recent_commits.unwrap_or(&[]);
    Ok(tmpl.render(minijinja::context! {
        git_diff => context.git_diff,
        branch => context.branch,
        recent_commits => recent,
        repo => context.repo_name,
    })?)
}

/// Generate a commit message for staged changes.
///
/// `recent_log_lines` is typically the last three `git log --oneline`
/// subjects, included for style reference only. Falls back to a fixed
/// prefix plus a truncated prompt summary on any failure; never empty.
pub fn generate_commit_message(
    config: &CommitGenerationConfig,
    task_id: &str,
    diff_stat: &str,
    recent_log_lines: &[String],
    branch: &str,
    repo_name: &str,
) -> String {
    if let Some(command) = &config.command {
        let context = TemplateContext {
            git_diff: diff_stat,
            branch,
            recent_commits: Some(recent_log_lines),
            repo_name,
        };
        let attempt = resolve_template(&config.template, &config.template_file, DEFAULT_COMMIT_TEMPLATE)
            .and_then(|template| render_commit_template(&template, &context))
            .and_then(|prompt| {
                execute_subordinate_command("commit.generation", command, &config.args, &prompt)
            });

        match attempt {
            Ok(message) => return message,
            Err(e) => {
                let error = crate::error::PipelineError::CommitMessageGenerationFailed {
                    task_id: task_id.to_string(),
                    error: e.to_string(),
                };
                log::warn!("{error}, using fallback");
            }
        }
    }

    fallback_commit_message(diff_stat)
}

/// Deterministic fallback: a fixed prefix plus a truncated summary of the
/// diff stat, capped at 72 characters. Never empty.
fn fallback_commit_message(diff_stat: &str) -> String {
    const MAX_LEN: usize = 72;
    const PREFIX: &str = "Update: ";

    let summary: String = diff_stat
        .lines()
        .next()
        .unwrap_or("changes")
        .chars()
        .take(MAX_LEN - PREFIX.len())
        .collect();

    if summary.trim().is_empty() {
        "Update: changes".to_string()
    } else {
        format!("{PREFIX}{summary}")
    }
}

/// Generate a short 2-5 word title for a task prompt. Best-effort: callers
/// should treat failure as "no title yet", not as a task failure.
pub fn generate_title(config: &CommitGenerationConfig, prompt: &str) -> anyhow::Result<String> {
    let command = config
        .command
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("commit-generation command not configured"))?;

    let env = Environment::new();
    let tmpl = env.template_from_str(DEFAULT_TITLE_PROMPT)?;
    let rendered = tmpl.render(minijinja::context! { prompt => prompt })?;

    execute_subordinate_command("title.generation", command, &config.args, &rendered)
}

/// Build the conflict-resolution prompt text handed to the resumed agent
/// session after `RebaseOntoDefault` reports a conflict. This only builds
/// the prompt string; invoking the agent CLI with it is the caller's job
/// (it needs workspace access, unlike commit/title generation).
pub fn build_conflict_prompt(
    config: &CommitGenerationConfig,
    conflict_output: &str,
    branch: &str,
) -> anyhow::Result<String> {
    let template = resolve_template(
        &config.conflict_template,
        &config.conflict_template_file,
        DEFAULT_CONFLICT_TEMPLATE,
    )?;
    let env = Environment::new();
    let tmpl = env.template_from_str(&template)?;
    Ok(tmpl.render(minijinja::context! {
        git_diff => conflict_output,
        branch => branch,
    })?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_commit_message_is_never_empty() {
        assert!(!fallback_commit_message("").is_empty());
        assert!(!fallback_commit_message("   \n   ").is_empty());
    }

    #[test]
    fn fallback_commit_message_truncates_to_72_chars() {
        let long_line = "x".repeat(200);
        let message = fallback_commit_message(&long_line);
        assert!(message.chars().count() <= 72);
    }

    #[test]
    fn generate_commit_message_falls_back_when_unconfigured() {
        let config = CommitGenerationConfig::default();
        let message = generate_commit_message(&config, "task-1", "3 files changed", &[], "main", "repo");
        assert!(message.starts_with("Update: "));
    }

    #[test]
    fn generate_commit_message_falls_back_on_command_failure() {
        let config = CommitGenerationConfig {
            command: Some("false".to_string()),
            ..Default::default()
        };
        let message = generate_commit_message(&config, "task-1", "3 files changed", &[], "main", "repo");
        assert!(message.starts_with("Update: "));
    }

    #[test]
    fn build_conflict_prompt_renders_branch_and_diff() {
        let config = CommitGenerationConfig::default();
        let prompt = build_conflict_prompt(&config, "<<<<<<< HEAD", "task/deadbeef").unwrap();
        assert!(prompt.contains("task/deadbeef"));
        assert!(prompt.contains("<<<<<<< HEAD"));
    }

    #[test]
    fn build_conflict_prompt_rejects_both_template_fields() {
        let config = CommitGenerationConfig {
            conflict_template: Some("a".to_string()),
            conflict_template_file: Some("b".to_string()),
            ..Default::default()
        };
        let result = build_conflict_prompt(&config, "diff", "branch");
        assert!(result.is_err());
    }

    #[test]
    fn generate_title_requires_configured_command() {
        let config = CommitGenerationConfig::default();
        let result = generate_title(&config, "fix the login bug");
        assert!(result.is_err());
    }
}
