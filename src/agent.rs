//! Agent and model-provider descriptors.

use anyhow::{Result, anyhow};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::sandbox::env::EnvMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Claude,
    Opencode,
}

/// A launchable coding agent.
#[derive(Debug, PartialEq, Eq)]
pub struct AgentConfig {
    pub kind: AgentKind,
    pub display_name: &'static str,
    pub binary: &'static str,
    /// Attribute in nixpkgs providing the binary
    pub nix_package: Option<&'static str>,
}

pub static CLAUDE: AgentConfig = AgentConfig {
    kind: AgentKind::Claude,
    display_name: "Claude Code",
    binary: "claude",
    nix_package: Some("claude-code"),
};

pub static OPENCODE: AgentConfig = AgentConfig {
    kind: AgentKind::Opencode,
    display_name: "OpenCode",
    binary: "opencode",
    nix_package: Some("opencode"),
};

pub fn agent(kind: AgentKind) -> &'static AgentConfig {
    match kind {
        AgentKind::Claude => &CLAUDE,
        AgentKind::Opencode => &OPENCODE,
    }
}

impl AgentConfig {
    /// Arguments passed to the agent binary.
    ///
    /// Claude takes provider configuration through the environment and skips
    /// its permission prompts inside a sandbox. OpenCode selects the model via
    /// CLI flags placed before the user's own arguments.
    pub fn build_args(
        &self,
        base_args: &[String],
        sandbox: bool,
        provider_cli_args: &[&str],
    ) -> Vec<String> {
        let mut args = Vec::new();
        match self.kind {
            AgentKind::Claude => {
                if sandbox {
                    args.push("--permission-mode".to_string());
                    args.push("bypassPermissions".to_string());
                }
            }
            AgentKind::Opencode => {
                args.extend(provider_cli_args.iter().map(|a| a.to_string()));
            }
        }
        args.extend(base_args.iter().cloned());
        args
    }

    /// Filter the provider environment down to what this agent consumes.
    pub fn build_env(&self, provider_env: EnvMap) -> EnvMap {
        match self.kind {
            AgentKind::Claude => provider_env,
            AgentKind::Opencode => EnvMap::new(),
        }
    }
}

/// An alternative model backend for an agent.
#[derive(Debug, PartialEq, Eq)]
pub struct ModelProvider {
    pub name: &'static str,
    pub display_name: &'static str,
    pub agent: AgentKind,
    /// Ambient variable holding the API token, if the provider needs one
    pub auth_token_env: Option<&'static str>,
    pub environment: &'static [(&'static str, &'static str)],
    pub cli_args: &'static [&'static str],
}

const CLI_PROXY_URL: &str = "http://127.0.0.1:8317";

pub static PROVIDERS: &[ModelProvider] = &[
    ModelProvider {
        name: "gemini",
        display_name: "Google Gemini 3.x",
        agent: AgentKind::Claude,
        auth_token_env: Some("CLI_PROXY_API_KEY"),
        environment: &[
            ("ANTHROPIC_BASE_URL", CLI_PROXY_URL),
            ("API_TIMEOUT_MS", "3000000"),
            ("CLAUDE_CODE_DISABLE_NONESSENTIAL_TRAFFIC", "1"),
            ("ANTHROPIC_DEFAULT_OPUS_MODEL", "gemini-3-pro-preview"),
            ("ANTHROPIC_DEFAULT_SONNET_MODEL", "gemini-3-flash-preview"),
            ("ANTHROPIC_DEFAULT_HAIKU_MODEL", "gemini-2.5-flash-lite"),
            ("CLAUDE_CODE_SUBAGENT_MODEL", "gemini-3-flash-preview"),
        ],
        cli_args: &[],
    },
    ModelProvider {
        name: "gemini-claude",
        display_name: "Gemini-Claude Thinking",
        agent: AgentKind::Claude,
        auth_token_env: Some("CLI_PROXY_API_KEY"),
        environment: &[
            ("ANTHROPIC_BASE_URL", CLI_PROXY_URL),
            ("API_TIMEOUT_MS", "3000000"),
            ("CLAUDE_CODE_DISABLE_NONESSENTIAL_TRAFFIC", "1"),
            ("ANTHROPIC_DEFAULT_OPUS_MODEL", "gemini-claude-opus-4-5-thinking"),
            ("ANTHROPIC_DEFAULT_SONNET_MODEL", "gemini-claude-sonnet-4-5-thinking"),
            ("ANTHROPIC_DEFAULT_HAIKU_MODEL", "gemini-2.5-flash-lite"),
            ("CLAUDE_CODE_SUBAGENT_MODEL", "gemini-claude-sonnet-4-5"),
        ],
        cli_args: &[],
    },
    ModelProvider {
        name: "glm",
        display_name: "Zhipu AI GLM",
        agent: AgentKind::Claude,
        auth_token_env: Some("ZAI_AUTH_TOKEN"),
        environment: &[
            ("ANTHROPIC_BASE_URL", "https://api.z.ai/api/anthropic"),
            ("API_TIMEOUT_MS", "3000000"),
            ("CLAUDE_CODE_DISABLE_NONESSENTIAL_TRAFFIC", "1"),
            ("ANTHROPIC_DEFAULT_OPUS_MODEL", "GLM-5"),
            ("ANTHROPIC_DEFAULT_SONNET_MODEL", "GLM-4.7"),
            ("ANTHROPIC_DEFAULT_HAIKU_MODEL", "GLM-4.5-Air"),
        ],
        cli_args: &[],
    },
    ModelProvider {
        name: "gpt5-codex",
        display_name: "OpenAI GPT-5.2 Codex",
        agent: AgentKind::Claude,
        auth_token_env: Some("CLI_PROXY_API_KEY"),
        environment: &[
            ("ANTHROPIC_BASE_URL", CLI_PROXY_URL),
            ("API_TIMEOUT_MS", "3000000"),
            ("CLAUDE_CODE_DISABLE_NONESSENTIAL_TRAFFIC", "1"),
            ("ANTHROPIC_DEFAULT_OPUS_MODEL", "gpt-5.2-codex(high)"),
            ("ANTHROPIC_DEFAULT_SONNET_MODEL", "gpt-5.2-codex(medium)"),
            ("ANTHROPIC_DEFAULT_HAIKU_MODEL", "gpt-5.2-codex(low)"),
            ("CLAUDE_CODE_SUBAGENT_MODEL", "gpt-5.2-codex(medium)"),
        ],
        cli_args: &[],
    },
    ModelProvider {
        name: "gemini",
        display_name: "Google Gemini",
        agent: AgentKind::Opencode,
        auth_token_env: None,
        environment: &[],
        cli_args: &["--model", "google/gemini-2.5-pro"],
    },
];

/// Look up a provider by name, scoped to an agent when one is given.
pub fn find_provider(name: &str, agent: Option<AgentKind>) -> Option<&'static ModelProvider> {
    PROVIDERS
        .iter()
        .find(|p| p.name == name && agent.is_none_or(|kind| p.agent == kind))
}

pub fn provider_names_for(agent: AgentKind) -> Vec<&'static str> {
    PROVIDERS
        .iter()
        .filter(|p| p.agent == agent)
        .map(|p| p.name)
        .collect()
}

/// Generate a short agent id: 7 lowercase hex characters, like an abbreviated commit hash.
pub fn generate_agent_id() -> Result<String> {
    let mut bytes = [0u8; 4];
    getrandom::fill(&mut bytes).map_err(|e| anyhow!("Failed to generate agent id: {}", e))?;
    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    Ok(hex[..7].to_string())
}
