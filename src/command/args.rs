use std::path::PathBuf;

use crate::agent::AgentKind;
use crate::config::{SandboxMethod, SandboxRuntime};
use crate::terminal::TerminalKind;

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Sandbox method (defaults to the config file's, then none)
    #[arg(short = 's', long = "sandbox", value_enum)]
    pub sandbox: Option<SandboxMethod>,

    /// Agent to launch
    #[arg(short = 'a', long, value_enum, default_value_t = AgentKind::Claude)]
    pub agent: AgentKind,

    /// Model provider, e.g. glm or gemini
    #[arg(short = 'p', long)]
    pub provider: Option<String>,

    /// Sandbox home overlaid onto the real home (default ~/.sandboxed-agent-home)
    #[arg(short = 'H', long = "home-dir", value_hint = clap::ValueHint::DirPath)]
    pub home_dir: Option<PathBuf>,

    /// Container image, or a `nix:` package spec for the nix method
    #[arg(short = 'I', long)]
    pub image: Option<String>,

    /// Container runtime for the docker and compose methods
    #[arg(long, value_enum)]
    pub runtime: Option<SandboxRuntime>,

    /// Compose file, relative to the repo dir (default: stacks/ai-agent.yaml, searched upwards)
    #[arg(short = 'F', long = "compose-file", value_hint = clap::ValueHint::FilePath)]
    pub compose_file: Option<PathBuf>,

    /// Compose service to run (default ai-agent)
    #[arg(short = 'S', long)]
    pub service: Option<String>,

    /// Nix preset (only `claude` is defined)
    #[arg(long = "nix-preset", conflicts_with_all = ["nix_sets", "nix_packages"])]
    pub nix_preset: Option<String>,

    /// Comma-separated Nix package sets added to the defaults
    #[arg(long = "nix-sets")]
    pub nix_sets: Option<String>,

    /// Comma-separated extra Nix packages
    #[arg(long = "nix-packages")]
    pub nix_packages: Option<String>,

    /// Directory the agent works in (default: current directory)
    #[arg(short = 'w', long = "work-dir", value_hint = clap::ValueHint::DirPath)]
    pub work_dir: Option<PathBuf>,

    /// Main repository when the work dir is a worktree; bound read-write
    #[arg(long = "repo-dir", value_hint = clap::ValueHint::DirPath)]
    pub repo_dir: Option<PathBuf>,

    /// Host command to run in the work dir before launching (repeatable)
    #[arg(long = "init-command", value_name = "COMMAND")]
    pub init_command: Vec<String>,

    /// Command to run inside the sandbox before the agent (repeatable)
    #[arg(long = "sandbox-init-command", value_name = "COMMAND")]
    pub sandbox_init_command: Vec<String>,

    /// Config file (default ~/.config/agent-sandbox/config.yaml)
    #[arg(short = 'c', long, value_hint = clap::ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Disable network access
    #[arg(short = 'N', long = "no-network", overrides_with = "network")]
    pub no_network: bool,

    /// Enable network access (default)
    #[arg(long, overrides_with = "no_network")]
    pub network: bool,

    /// Extra read-write bind mount (repeatable)
    #[arg(long, value_name = "PATH")]
    pub bind: Vec<PathBuf>,

    /// Extra read-only bind mount (repeatable)
    #[arg(long = "ro-bind", value_name = "PATH")]
    pub ro_bind: Vec<PathBuf>,

    /// Environment variable for the sandbox (repeatable)
    #[arg(long, value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Launch inside a terminal multiplexer
    #[arg(short = 't', long, value_enum)]
    pub terminal: Option<TerminalKind>,

    /// Multiplexer session name
    #[arg(long = "terminal-session", requires = "terminal")]
    pub terminal_session: Option<String>,

    /// Multiplexer window name (defaults to the work dir name)
    #[arg(long = "terminal-window", requires = "terminal")]
    pub terminal_window: Option<String>,

    /// Start the session in the background
    #[arg(long = "terminal-detach", requires = "terminal")]
    pub terminal_detach: bool,

    /// Agent identifier (generated when omitted)
    #[arg(long = "agent-id")]
    pub agent_id: Option<String>,

    /// Print progress information
    #[arg(short, long)]
    pub verbose: bool,

    /// Print synthesized commands and cache paths
    #[arg(short, long)]
    pub debug: bool,

    /// Print the command instead of running it
    #[arg(short = 'n', long = "dry-run")]
    pub dry_run: bool,

    /// Arguments passed to the agent
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "AGENT_ARGS")]
    pub agent_args: Vec<String>,
}

impl RunArgs {
    /// The last of `--network` / `--no-network`, if either was given.
    pub fn network_override(&self) -> Option<bool> {
        if self.no_network {
            Some(false)
        } else if self.network {
            Some(true)
        } else {
            None
        }
    }
}

#[derive(clap::Args, Debug)]
pub struct EnvSpecArgs {
    /// Nixpkgs pin (nixos-24.11, nixos-unstable, nixpkgs-unstable)
    #[arg(long)]
    pub pin: Option<String>,

    /// Packages to include
    #[arg(required = true, value_name = "PACKAGE")]
    pub packages: Vec<String>,
}
