use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::agent::{AgentConfig, CLAUDE, ModelProvider};
use crate::terminal::TerminalConfig;

/// Isolation backend used to launch the agent
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SandboxMethod {
    /// Run the agent directly on the host
    #[default]
    None,
    /// Overlay the home directory with bubblewrap namespaces
    Bwrap,
    /// Docker/Podman container
    Docker,
    /// `docker compose run` against a project stack
    Compose,
    /// Nix-built package set entered with bubblewrap
    Nix,
}

impl SandboxMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SandboxMethod::None => "none",
            SandboxMethod::Bwrap => "bwrap",
            SandboxMethod::Docker => "docker",
            SandboxMethod::Compose => "compose",
            SandboxMethod::Nix => "nix",
        }
    }
}

/// Container runtime for the docker and compose backends
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SandboxRuntime {
    /// Docker (default)
    #[default]
    Docker,
    /// Podman
    Podman,
}

impl SandboxRuntime {
    pub fn binary(&self) -> &'static str {
        match self {
            SandboxRuntime::Docker => "docker",
            SandboxRuntime::Podman => "podman",
        }
    }
}

pub const DEFAULT_DOCKER_IMAGE: &str = "node:trixie-slim";
pub const DEFAULT_COMPOSE_SERVICE: &str = "ai-agent";

/// Persistent defaults read from `~/.config/agent-sandbox/config.yaml`.
///
/// Every field is optional; command-line values take precedence and list
/// values are appended after the file's.
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub method: Option<SandboxMethod>,

    /// Sandbox home overlaid onto the real home. Default: ~/.sandboxed-agent-home
    #[serde(default)]
    pub home_dir: Option<PathBuf>,

    #[serde(default)]
    pub network: Option<bool>,

    #[serde(default)]
    pub bind_paths: Option<Vec<PathBuf>>,

    #[serde(default)]
    pub ro_bind_paths: Option<Vec<PathBuf>>,

    /// Model provider name, e.g. `glm`
    #[serde(default)]
    pub provider: Option<String>,

    /// Container image, or a `nix:` package spec for the nix backend
    #[serde(default)]
    pub image: Option<String>,

    #[serde(default)]
    pub runtime: Option<SandboxRuntime>,

    /// Extra `KEY=VALUE` entries for the sandbox environment
    #[serde(default)]
    pub env: Option<Vec<String>>,
}

impl FileConfig {
    /// Default location, `~/.config/agent-sandbox/config.yaml`.
    pub fn default_path(home_dir: &Path) -> PathBuf {
        home_dir.join(".config/agent-sandbox/config.yaml")
    }

    /// Load the config file. A missing file yields an empty config.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "config:missing");
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        debug!(path = %path.display(), "config:loaded");
        Ok(config)
    }

    /// Parse YAML, falling back to the older `key=value` line format.
    pub fn parse(contents: &str) -> Result<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        match serde_yaml::from_str::<Self>(contents) {
            Ok(config) => Ok(config),
            Err(yaml_err) if looks_like_key_value(contents) => {
                debug!(error = %yaml_err, "config:yaml rejected, trying key=value");
                Ok(Self::parse_key_value(contents))
            }
            Err(yaml_err) => Err(yaml_err.into()),
        }
    }

    fn parse_key_value(contents: &str) -> Self {
        let mut config = Self::default();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "method" => {
                    config.method = SandboxMethod::from_str(value, true).ok();
                }
                "homeDir" | "home_dir" | "SANDBOXHOMEDIR" => {
                    config.home_dir = Some(PathBuf::from(value));
                }
                "network" | "ENABLE_NETWORK" => config.network = Some(value == "true"),
                "provider" => config.provider = Some(value.to_string()),
                "image" => config.image = Some(value.to_string()),
                _ => {}
            }
        }
        config
    }

    pub fn bind_paths(&self) -> &[PathBuf] {
        self.bind_paths.as_deref().unwrap_or_default()
    }

    pub fn ro_bind_paths(&self) -> &[PathBuf] {
        self.ro_bind_paths.as_deref().unwrap_or_default()
    }

    pub fn env(&self) -> &[String] {
        self.env.as_deref().unwrap_or_default()
    }
}

fn looks_like_key_value(contents: &str) -> bool {
    contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .all(|l| l.contains('=') && !l.contains(": "))
}

/// A fully-resolved request to launch one agent.
///
/// Built once by the CLI layer and only borrowed afterwards.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub agent_id: String,
    pub method: SandboxMethod,
    pub agent: &'static AgentConfig,
    pub provider: Option<&'static ModelProvider>,
    /// Sandbox home override; the bwrap and docker backends default it
    pub home_dir: Option<PathBuf>,
    pub image: Option<String>,
    pub runtime: SandboxRuntime,
    pub compose_file: Option<PathBuf>,
    pub service: Option<String>,
    pub work_dir: PathBuf,
    /// Main repository when `work_dir` is a worktree
    pub repo_dir: Option<PathBuf>,
    pub network: bool,
    pub bind_paths: Vec<PathBuf>,
    pub ro_bind_paths: Vec<PathBuf>,
    pub custom_env: Vec<String>,
    pub agent_args: Vec<String>,
    /// Commands run inside the sandbox before the agent starts
    pub init_commands: Vec<String>,
    pub verbose: bool,
    pub debug: bool,
    pub dry_run: bool,
    pub terminal: Option<TerminalConfig>,
}

impl SandboxConfig {
    pub fn new(agent_id: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            agent_id: agent_id.into(),
            method: SandboxMethod::None,
            agent: &CLAUDE,
            provider: None,
            home_dir: None,
            image: None,
            runtime: SandboxRuntime::Docker,
            compose_file: None,
            service: None,
            work_dir: work_dir.into(),
            repo_dir: None,
            network: true,
            bind_paths: Vec::new(),
            ro_bind_paths: Vec::new(),
            custom_env: Vec::new(),
            agent_args: Vec::new(),
            init_commands: Vec::new(),
            verbose: false,
            debug: false,
            dry_run: false,
            terminal: None,
        }
    }

    /// The sandbox home: the configured override or `~/.sandboxed-agent-home`.
    pub fn sandbox_home(&self, real_home: &Path) -> PathBuf {
        self.home_dir
            .clone()
            .unwrap_or_else(|| real_home.join(".sandboxed-agent-home"))
    }

    pub fn resolved_image(&self) -> &str {
        self.image.as_deref().unwrap_or(DEFAULT_DOCKER_IMAGE)
    }

    pub fn resolved_service(&self) -> &str {
        self.service.as_deref().unwrap_or(DEFAULT_COMPOSE_SERVICE)
    }

    pub fn provider_cli_args(&self) -> &'static [&'static str] {
        self.provider.map(|p| p.cli_args).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_yaml() {
        let config = FileConfig::parse(
            "method: bwrap\nnetwork: false\nbind_paths:\n  - /data\nprovider: glm\nruntime: podman\n",
        )
        .unwrap();
        assert_eq!(config.method, Some(SandboxMethod::Bwrap));
        assert_eq!(config.network, Some(false));
        assert_eq!(config.bind_paths(), &[PathBuf::from("/data")]);
        assert_eq!(config.provider.as_deref(), Some("glm"));
        assert_eq!(config.runtime, Some(SandboxRuntime::Podman));
        assert!(config.ro_bind_paths().is_empty());
    }

    #[test]
    fn test_parse_key_value_fallback() {
        let config = FileConfig::parse(
            "# legacy\nmethod=docker\nSANDBOXHOMEDIR=/tmp/box\nENABLE_NETWORK=true\n",
        )
        .unwrap();
        assert_eq!(config.method, Some(SandboxMethod::Docker));
        assert_eq!(config.home_dir, Some(PathBuf::from("/tmp/box")));
        assert_eq!(config.network, Some(true));
    }

    #[test]
    fn test_parse_rejects_invalid_yaml() {
        assert!(FileConfig::parse("method: [unclosed\n").is_err());
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let config = FileConfig::load(&dir.path().join("nope.yaml")).unwrap();
        assert_eq!(config, FileConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "method: nix\nimage: \"nix:sets=go\"\n").unwrap();
        let config = FileConfig::load(&path).unwrap();
        assert_eq!(config.method, Some(SandboxMethod::Nix));
        assert_eq!(config.image.as_deref(), Some("nix:sets=go"));
    }

    #[test]
    fn test_sandbox_home_default() {
        let config = SandboxConfig::new("abc1234", "/work");
        assert_eq!(
            config.sandbox_home(Path::new("/home/u")),
            PathBuf::from("/home/u/.sandboxed-agent-home")
        );
        assert_eq!(config.resolved_image(), "node:trixie-slim");
        assert_eq!(config.resolved_service(), "ai-agent");
    }
}
