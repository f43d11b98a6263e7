//! `agent-sandbox run`: merge config sources and launch the agent.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, info};

use super::args::RunArgs;
use crate::agent::{self, AgentConfig, ModelProvider};
use crate::cmd;
use crate::config::{FileConfig, SandboxConfig, SandboxMethod};
use crate::output;
use crate::sandbox::{self, HostContext};
use crate::terminal::TerminalConfig;

pub fn run(args: RunArgs) -> Result<i32> {
    let host = HostContext::capture()?;
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| FileConfig::default_path(&host.real_home));
    let file = FileConfig::load(&config_path)?;

    let config = build_config(&args, &file, &cwd)?;
    info!(
        agent_id = %config.agent_id,
        method = config.method.as_str(),
        work_dir = %config.work_dir.display(),
        "run:config"
    );
    if config.verbose {
        output::info(&format!("Agent ID: {}", config.agent_id));
    }

    for command in &args.init_command {
        if config.dry_run {
            output::info(&format!("Would run on host: {}", command));
            continue;
        }
        debug!(command = %command, "run:init command");
        cmd::shell_command(command, &config.work_dir, config.verbose)
            .with_context(|| format!("Init command failed: {}", command))?;
    }

    sandbox::execute_sandboxed(&config, &host)
}

/// Combine command-line arguments with the config file.
///
/// Scalars from the command line win; list values are the file's followed
/// by the command line's.
pub fn build_config(args: &RunArgs, file: &FileConfig, cwd: &Path) -> Result<SandboxConfig> {
    let agent_id = match &args.agent_id {
        Some(id) => id.clone(),
        None => agent::generate_agent_id()?,
    };
    let agent = agent::agent(args.agent);
    let provider = resolve_provider(
        args.provider.as_deref().or(file.provider.as_deref()),
        agent,
    )?;

    let work_dir = absolute(cwd, args.work_dir.as_deref().unwrap_or(cwd));
    if !work_dir.is_dir() {
        bail!("Work directory does not exist: {}", work_dir.display());
    }
    let repo_dir = args.repo_dir.as_deref().map(|p| absolute(cwd, p));

    let method = args.sandbox.or(file.method).unwrap_or_default();
    let image = args
        .image
        .clone()
        .or_else(|| file.image.clone())
        .or_else(|| (method == SandboxMethod::Nix).then(|| nix_image(args)).flatten());

    let mut bind_paths = file.bind_paths().to_vec();
    bind_paths.extend(args.bind.iter().map(|p| absolute(cwd, p)));
    // A worktree's git metadata lives in the main repository
    bind_paths.extend(repo_dir.clone());

    let mut ro_bind_paths = file.ro_bind_paths().to_vec();
    ro_bind_paths.extend(args.ro_bind.iter().map(|p| absolute(cwd, p)));

    let mut custom_env = file.env().to_vec();
    custom_env.extend(args.env.iter().cloned());

    let terminal = args.terminal.map(|kind| TerminalConfig {
        kind,
        session_name: args.terminal_session.clone(),
        window_name: args.terminal_window.clone(),
        detach: args.terminal_detach,
        attach_existing: true,
    });

    let mut config = SandboxConfig::new(agent_id, work_dir);
    config.method = method;
    config.agent = agent;
    config.provider = provider;
    config.home_dir = args.home_dir.clone().or_else(|| file.home_dir.clone());
    config.image = image;
    config.runtime = args.runtime.or(file.runtime).unwrap_or_default();
    config.compose_file = args.compose_file.clone();
    config.service = args.service.clone();
    config.repo_dir = repo_dir;
    config.network = args.network_override().or(file.network).unwrap_or(true);
    config.bind_paths = bind_paths;
    config.ro_bind_paths = ro_bind_paths;
    config.custom_env = custom_env;
    config.agent_args = args.agent_args.clone();
    config.init_commands = args.sandbox_init_command.clone();
    config.verbose = args.verbose;
    config.debug = args.debug;
    config.dry_run = args.dry_run;
    config.terminal = terminal;
    Ok(config)
}

fn resolve_provider(
    name: Option<&str>,
    agent: &AgentConfig,
) -> Result<Option<&'static ModelProvider>> {
    let Some(name) = name else {
        return Ok(None);
    };
    if let Some(provider) = agent::find_provider(name, Some(agent.kind)) {
        return Ok(Some(provider));
    }
    let available = agent::provider_names_for(agent.kind);
    let hint = if available.is_empty() {
        format!("No providers are available for {}", agent.display_name)
    } else {
        format!(
            "Available providers for {}: {}",
            agent.display_name,
            available.join(", ")
        )
    };
    Err(anyhow!(
        "Unknown provider: {} for agent {}\n{}",
        name,
        agent.display_name,
        hint
    ))
}

/// `nix:` image spec from the `--nix-*` flags, if any were given.
fn nix_image(args: &RunArgs) -> Option<String> {
    if let Some(preset) = &args.nix_preset {
        return Some(format!("nix:preset={}", preset));
    }
    if args.nix_sets.is_none() && args.nix_packages.is_none() {
        return None;
    }
    let mut spec = serde_json::Map::new();
    if let Some(sets) = &args.nix_sets {
        spec.insert("sets".into(), sets.clone().into());
    }
    if let Some(packages) = &args.nix_packages {
        spec.insert("packages".into(), packages.clone().into());
    }
    Some(format!("nix:{}", serde_json::Value::Object(spec)))
}

fn absolute(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentKind;
    use crate::config::SandboxRuntime;
    use crate::terminal::TerminalKind;
    use clap::Parser;
    use tempfile::TempDir;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        run: RunArgs,
    }

    fn parse(argv: &[&str]) -> RunArgs {
        TestCli::try_parse_from(std::iter::once("run").chain(argv.iter().copied()))
            .unwrap()
            .run
    }

    #[test]
    fn test_defaults() {
        let cwd = TempDir::new().unwrap();
        let config = build_config(&parse(&[]), &FileConfig::default(), cwd.path()).unwrap();
        assert_eq!(config.method, SandboxMethod::None);
        assert_eq!(config.agent.kind, AgentKind::Claude);
        assert!(config.network);
        assert_eq!(config.work_dir, cwd.path());
        assert_eq!(config.agent_id.len(), 7);
        assert!(config.terminal.is_none());
    }

    #[test]
    fn test_cli_overrides_file_and_lists_concatenate() {
        let cwd = TempDir::new().unwrap();
        let file = FileConfig::parse(
            "method: docker\nnetwork: true\nbind_paths:\n  - /data\nenv:\n  - A=1\nruntime: podman\n",
        )
        .unwrap();
        let args = parse(&[
            "-s", "bwrap", "-N", "--bind", "extra", "--env", "B=2", "--agent-id", "abc1234",
        ]);
        let config = build_config(&args, &file, cwd.path()).unwrap();
        assert_eq!(config.method, SandboxMethod::Bwrap);
        assert!(!config.network);
        assert_eq!(
            config.bind_paths,
            vec![PathBuf::from("/data"), cwd.path().join("extra")]
        );
        assert_eq!(config.custom_env, vec!["A=1", "B=2"]);
        assert_eq!(config.runtime, SandboxRuntime::Podman);
        assert_eq!(config.agent_id, "abc1234");
    }

    #[test]
    fn test_last_network_flag_wins() {
        assert_eq!(parse(&["-N", "--network"]).network_override(), Some(true));
        assert_eq!(parse(&["--network", "-N"]).network_override(), Some(false));
        assert_eq!(parse(&[]).network_override(), None);
    }

    #[test]
    fn test_repo_dir_is_bound() {
        let cwd = TempDir::new().unwrap();
        let repo = TempDir::new().unwrap();
        let args = parse(&["--repo-dir", repo.path().to_str().unwrap()]);
        let config = build_config(&args, &FileConfig::default(), cwd.path()).unwrap();
        assert_eq!(config.repo_dir.as_deref(), Some(repo.path()));
        assert_eq!(config.bind_paths, vec![repo.path().to_path_buf()]);
    }

    #[test]
    fn test_unknown_provider_lists_available() {
        let cwd = TempDir::new().unwrap();
        let err = build_config(
            &parse(&["-a", "opencode", "-p", "glm"]),
            &FileConfig::default(),
            cwd.path(),
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Unknown provider: glm for agent OpenCode"));
        assert!(message.contains("Available providers for OpenCode: gemini"));
    }

    #[test]
    fn test_provider_from_file() {
        let cwd = TempDir::new().unwrap();
        let file = FileConfig::parse("provider: glm\n").unwrap();
        let config = build_config(&parse(&[]), &file, cwd.path()).unwrap();
        assert_eq!(config.provider.map(|p| p.name), Some("glm"));
    }

    #[test]
    fn test_missing_work_dir_is_error() {
        let cwd = TempDir::new().unwrap();
        let err = build_config(&parse(&["-w", "nope"]), &FileConfig::default(), cwd.path())
            .unwrap_err();
        assert!(err.to_string().starts_with("Work directory does not exist"));
    }

    #[test]
    fn test_nix_flags_build_image_spec() {
        let cwd = TempDir::new().unwrap();
        let file = FileConfig::default();

        let config =
            build_config(&parse(&["-s", "nix", "--nix-preset", "claude"]), &file, cwd.path())
                .unwrap();
        assert_eq!(config.image.as_deref(), Some("nix:preset=claude"));

        let config = build_config(
            &parse(&["-s", "nix", "--nix-sets", "go,rust", "--nix-packages", "jq"]),
            &file,
            cwd.path(),
        )
        .unwrap();
        let image = config.image.unwrap();
        let json: serde_json::Value =
            serde_json::from_str(image.strip_prefix("nix:").unwrap()).unwrap();
        assert_eq!(json, serde_json::json!({"sets": "go,rust", "packages": "jq"}));

        // Ignored outside the nix method
        let config =
            build_config(&parse(&["--nix-sets", "go"]), &file, cwd.path()).unwrap();
        assert_eq!(config.image, None);
    }

    #[test]
    fn test_terminal_and_agent_args() {
        let cwd = TempDir::new().unwrap();
        let args = parse(&[
            "-t",
            "tmux",
            "--terminal-window",
            "review",
            "--terminal-detach",
            "--",
            "-p",
            "fix the tests",
        ]);
        let config = build_config(&args, &FileConfig::default(), cwd.path()).unwrap();
        let terminal = config.terminal.unwrap();
        assert_eq!(terminal.kind, TerminalKind::Tmux);
        assert_eq!(terminal.window_name.as_deref(), Some("review"));
        assert!(terminal.detach);
        assert_eq!(config.agent_args, vec!["-p", "fix the tests"]);
    }

    #[test]
    fn test_sandbox_init_commands_kept_in_order() {
        let cwd = TempDir::new().unwrap();
        let args = parse(&[
            "--sandbox-init-command",
            "npm ci",
            "--sandbox-init-command",
            "make",
        ]);
        let config = build_config(&args, &FileConfig::default(), cwd.path()).unwrap();
        assert_eq!(config.init_commands, vec!["npm ci", "make"]);
    }
}
