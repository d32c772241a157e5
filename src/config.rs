//! Layered configuration: TOML file, environment variables, CLI flags.
//!
//! Precedence for every runtime field is CLI flag > environment variable >
//! config file > built-in default. Two independent layers exist: the
//! [`RuntimeConfig`] (workspaces, data/worktree directories, sandbox
//! settings) and [`CommitGenerationConfig`] (the optional external command
//! used to draft commit messages and conflict-resolution prompts).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

fn env_override(field: &str) -> Option<String> {
    std::env::var(format!("WALLFACER_{field}")).ok()
}

/// A single user-configured workspace: a directory the pipeline can create
/// worktrees in and merge finished tasks back into.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct WorkspaceConfig {
    pub name: String,
    pub path: PathBuf,
}

/// Runtime configuration: where data lives, how the sandbox is invoked, and
/// which workspaces are available.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub addr: String,
    pub data_dir: PathBuf,
    pub worktrees_dir: PathBuf,
    pub container_cmd: String,
    pub sandbox_image: String,
    pub env_file: Option<PathBuf>,
    pub workspaces: Vec<WorkspaceConfig>,
    pub no_browser: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("wallfacer");
        Self {
            addr: "127.0.0.1:4173".to_string(),
            worktrees_dir: data_dir.join("worktrees"),
            data_dir,
            container_cmd: "docker".to_string(),
            sandbox_image: "wallfacer/agent-sandbox:latest".to_string(),
            env_file: None,
            workspaces: Vec::new(),
            no_browser: false,
        }
    }
}

impl RuntimeConfig {
    /// Load from `project_config_path` (if it exists) layered under the
    /// user config directory's `wallfacer/config.toml`, then apply
    /// `WALLFACER_<FIELD>` environment overrides.
    pub fn load(project_config_path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(user_config) = dirs::config_dir().map(|d| d.join("wallfacer/config.toml"))
            && user_config.exists()
        {
            config.merge_toml_file(&user_config)?;
        }

        if let Some(path) = project_config_path
            && path.exists()
        {
            config.merge_toml_file(path)?;
        }

        config.apply_env_overrides();
        Ok(config)
    }

    fn merge_toml_file(&mut self, path: &Path) -> anyhow::Result<()> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;
        let parsed: PartialRuntimeConfig = toml::from_str(&text)
            .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))?;
        parsed.apply_to(self);
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_override("ADDR") {
            self.addr = v;
        }
        if let Some(v) = env_override("DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = env_override("WORKTREES_DIR") {
            self.worktrees_dir = PathBuf::from(v);
        }
        if let Some(v) = env_override("CONTAINER_CMD") {
            self.container_cmd = v;
        }
        if let Some(v) = env_override("SANDBOX_IMAGE") {
            self.sandbox_image = v;
        }
        if let Some(v) = env_override("ENV_FILE") {
            self.env_file = Some(PathBuf::from(v));
        }
        if let Some(v) = env_override("NO_BROWSER") {
            self.no_browser = v == "1" || v.eq_ignore_ascii_case("true");
        }
    }
}

/// Mirrors [`RuntimeConfig`] with every field optional, for partial TOML merges.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PartialRuntimeConfig {
    addr: Option<String>,
    data_dir: Option<PathBuf>,
    worktrees_dir: Option<PathBuf>,
    container_cmd: Option<String>,
    sandbox_image: Option<String>,
    env_file: Option<PathBuf>,
    workspaces: Option<Vec<WorkspaceConfig>>,
    no_browser: Option<bool>,
}

impl PartialRuntimeConfig {
    fn apply_to(self, config: &mut RuntimeConfig) {
        if let Some(v) = self.addr {
            config.addr = v;
        }
        if let Some(v) = self.data_dir {
            config.data_dir = v;
        }
        if let Some(v) = self.worktrees_dir {
            config.worktrees_dir = v;
        }
        if let Some(v) = self.container_cmd {
            config.container_cmd = v;
        }
        if let Some(v) = self.sandbox_image {
            config.sandbox_image = v;
        }
        if let Some(v) = self.env_file {
            config.env_file = Some(v);
        }
        if let Some(v) = self.workspaces {
            config.workspaces = v;
        }
        if let Some(v) = self.no_browser {
            config.no_browser = v;
        }
    }
}

/// Configuration for subordinate best-effort generation calls: commit
/// messages and conflict-resolution prompts during the commit pipeline.
///
/// Resolution order: project config → user config → absent (deterministic
/// fallback, never empty).
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct CommitGenerationConfig {
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    pub template: Option<String>,
    pub template_file: Option<String>,
    pub conflict_template: Option<String>,
    pub conflict_template_file: Option<String>,
}

impl CommitGenerationConfig {
    /// Whether an external command has been configured.
    pub fn is_configured(&self) -> bool {
        self.command.is_some()
    }

    pub fn load(project_config_path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(user_config) = dirs::config_dir().map(|d| d.join("wallfacer/config.toml"))
            && user_config.exists()
        {
            config.merge_from_table(&user_config)?;
        }
        if let Some(path) = project_config_path
            && path.exists()
        {
            config.merge_from_table(path)?;
        }
        Ok(config)
    }

    fn merge_from_table(&mut self, path: &Path) -> anyhow::Result<()> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;
        let raw: HashMap<String, toml::Value> = toml::from_str(&text)
            .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))?;
        if let Some(section) = raw.get("commit-generation") {
            let parsed: CommitGenerationConfig = section.clone().try_into()?;
            *self = parsed;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_runtime_config_has_nonempty_addr() {
        let config = RuntimeConfig::default();
        assert!(!config.addr.is_empty());
        assert!(config.worktrees_dir.starts_with(&config.data_dir));
    }

    #[test]
    fn commit_generation_config_unconfigured_by_default() {
        let config = CommitGenerationConfig::default();
        assert!(!config.is_configured());
    }

    #[test]
    fn partial_toml_merge_overrides_only_present_fields() {
        let mut config = RuntimeConfig::default();
        let partial = PartialRuntimeConfig {
            addr: Some("0.0.0.0:9000".to_string()),
            ..Default::default()
        };
        let original_data_dir = config.data_dir.clone();
        partial.apply_to(&mut config);
        assert_eq!(config.addr, "0.0.0.0:9000");
        assert_eq!(config.data_dir, original_data_dir);
    }
}
