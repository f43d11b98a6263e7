//! Sandbox backends for running agents in isolated environments.
//!
//! Each backend turns a [`SandboxConfig`] into a [`SandboxCommand`]: the
//! program, argv and process environment to hand to the executor. Backends
//! that need host-side state (sandbox home, mount points, a Nix build) do
//! that work in [`SandboxBackend::prepare`], which dry runs skip.

mod bwrap;
mod command;
mod compose;
mod container;
pub mod env;
pub mod mounts;
mod nix_env;
mod none;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::config::{SandboxConfig, SandboxMethod};
use crate::envcache::EnvCache;
use crate::shell::{shell_join, shell_quote};
use crate::{executor, output};
use env::{AmbientEnv, EnvMap};

/// Facts about the invoking host, captured once per run.
#[derive(Debug, Clone)]
pub struct HostContext {
    pub real_home: PathBuf,
    pub uid: u32,
    pub gid: u32,
    pub ambient: AmbientEnv,
    pub env_cache: EnvCache,
}

impl HostContext {
    pub fn capture() -> Result<Self> {
        let real_home = home::home_dir().context("Could not determine home directory")?;
        let ambient = AmbientEnv::capture();
        let env_cache = EnvCache::from_env(&real_home, &ambient);
        Ok(Self {
            real_home,
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
            ambient,
            env_cache,
        })
    }
}

/// A fully synthesized invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Complete environment of the spawned process
    pub env: EnvMap,
    pub cwd: PathBuf,
    /// Assignments shown before the command line in dry-run output
    pub env_prefix: Vec<(String, String)>,
}

impl SandboxCommand {
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }

    /// Shell-quoted command line, with any env prefix in front.
    pub fn display(&self) -> String {
        let mut parts: Vec<String> = self
            .env_prefix
            .iter()
            .map(|(k, v)| format!("{}={}", k, shell_quote(v)))
            .collect();
        parts.push(shell_join(&self.argv()));
        parts.join(" ")
    }
}

/// Host-side results of [`SandboxBackend::prepare`].
#[derive(Debug, Clone, Default)]
pub struct Prepared {
    /// Realized Nix environment (nix backend only)
    pub env_out: Option<PathBuf>,
}

pub trait SandboxBackend: Sync {
    fn method(&self) -> SandboxMethod;

    fn is_available(&self, config: &SandboxConfig) -> bool;

    /// Create whatever must exist on the host before the command can run.
    fn prepare(&self, _config: &SandboxConfig, _host: &HostContext) -> Result<Prepared> {
        Ok(Prepared::default())
    }

    fn command(
        &self,
        config: &SandboxConfig,
        host: &HostContext,
        prepared: &Prepared,
    ) -> Result<SandboxCommand>;

    /// Extra lines describing what a real run would do first.
    fn dry_run_notes(&self, _config: &SandboxConfig, _host: &HostContext) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

pub fn backend_for(method: SandboxMethod) -> &'static dyn SandboxBackend {
    match method {
        SandboxMethod::None => &none::NoneBackend,
        SandboxMethod::Bwrap => &bwrap::BwrapBackend,
        SandboxMethod::Docker => &container::ContainerBackend,
        SandboxMethod::Compose => &compose::ComposeBackend,
        SandboxMethod::Nix => &nix_env::NixBackend,
    }
}

/// Pick the backend, falling back to direct execution when the requested
/// one is missing on this host.
pub fn select_backend(config: &SandboxConfig) -> &'static dyn SandboxBackend {
    let backend = backend_for(config.method);
    if config.method == SandboxMethod::None || backend.is_available(config) {
        return backend;
    }
    warn!(method = config.method.as_str(), "sandbox:unavailable, running unsandboxed");
    output::warning(&format!(
        "Sandbox method '{}' is not available on this host, running without a sandbox",
        config.method.as_str()
    ));
    backend_for(SandboxMethod::None)
}

/// Plan, prepare and run the agent. Returns the agent's exit code.
pub fn execute_sandboxed(config: &SandboxConfig, host: &HostContext) -> Result<i32> {
    let backend = select_backend(config);
    info!(
        method = backend.method().as_str(),
        agent = config.agent.binary,
        agent_id = %config.agent_id,
        "sandbox:start"
    );

    if config.dry_run {
        for note in backend.dry_run_notes(config, host)? {
            output::info(&note);
        }
        let command = backend.command(config, host, &Prepared::default())?;
        output::info("Dry run - would execute:");
        println!("{}", command.display());
        return Ok(0);
    }

    let prepared = backend.prepare(config, host)?;
    let command = backend.command(config, host, &prepared)?;
    debug!(program = %command.program, args = ?command.args, "sandbox:command");
    if config.debug {
        output::debug(&command.display());
    }
    if config.verbose {
        output::info(&format!(
            "Starting {} ({})",
            config.agent.display_name,
            backend.method().as_str()
        ));
    }

    Ok(executor::run(
        &command,
        config.terminal.as_ref(),
        &host.ambient,
        config.verbose,
    ))
}

/// Identity and provider variables, in that precedence order.
fn agent_env(config: &SandboxConfig, ambient: &AmbientEnv) -> Result<EnvMap> {
    let mut injected = env::agent_identity_env(&config.agent_id, ambient);
    if let Some(provider) = config.provider {
        let provider_env = env::provider_environment(provider, ambient)?;
        injected.extend(config.agent.build_env(provider_env));
    }
    Ok(injected)
}

/// Ambient environment with the agent layers applied on top.
fn process_env(ambient: &AmbientEnv, injected: EnvMap) -> EnvMap {
    let mut env = ambient.vars().clone();
    env.extend(injected);
    env
}

/// Create mount points inside `sandbox_home` for the work dir and every
/// custom path that lives under the real home.
fn prepare_mount_points(
    sandbox_home: &Path,
    real_home: &Path,
    config: &SandboxConfig,
) -> Result<()> {
    fs::create_dir_all(sandbox_home)
        .with_context(|| format!("Failed to create sandbox home {}", sandbox_home.display()))?;
    let custom = config
        .bind_paths
        .iter()
        .chain(&config.ro_bind_paths)
        .filter(|p| p.exists());
    for target in std::iter::once(&config.work_dir).chain(custom) {
        mounts::ensure_mount_point(sandbox_home, real_home, target)?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn host(real_home: &Path, ambient: &[(&str, &str)]) -> HostContext {
        HostContext {
            real_home: real_home.to_path_buf(),
            uid: 1000,
            gid: 1000,
            ambient: AmbientEnv::from_pairs(ambient.iter().copied()),
            env_cache: EnvCache::with_root(real_home.join(".local/share/agent-nix")),
        }
    }

    /// Index of the first occurrence of `needle` in `haystack`.
    pub fn position(haystack: &[String], needle: &str) -> usize {
        haystack
            .iter()
            .position(|a| a == needle)
            .unwrap_or_else(|| panic!("{needle:?} not in {haystack:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::host;
    use super::*;
    use crate::agent::{AgentKind, find_provider};
    use tempfile::TempDir;

    #[test]
    fn test_dispatch_table_covers_every_method() {
        for method in [
            SandboxMethod::None,
            SandboxMethod::Bwrap,
            SandboxMethod::Docker,
            SandboxMethod::Compose,
            SandboxMethod::Nix,
        ] {
            assert_eq!(backend_for(method).method(), method);
        }
    }

    #[test]
    fn test_display_quotes_and_prefixes() {
        let command = SandboxCommand {
            program: "docker".into(),
            args: vec!["run".into(), "hello world".into()],
            env: EnvMap::new(),
            cwd: PathBuf::from("/"),
            env_prefix: vec![("AGENT_WORK_DIR".into(), "/w".into())],
        };
        assert_eq!(command.display(), "AGENT_WORK_DIR=/w docker run 'hello world'");
    }

    #[test]
    fn test_agent_env_layers_identity_and_provider() {
        let home = TempDir::new().unwrap();
        let host = host(
            home.path(),
            &[("ZAI_AUTH_TOKEN", "tok"), (env::AGENT_ID_ENV, "parent1")],
        );
        let mut config = SandboxConfig::new("child01", home.path());
        config.provider = find_provider("glm", Some(AgentKind::Claude));

        let injected = agent_env(&config, &host.ambient).unwrap();
        assert_eq!(injected[env::AGENT_ID_ENV], "child01");
        assert_eq!(injected[env::PARENT_AGENT_ID_ENV], "parent1");
        assert_eq!(injected["ANTHROPIC_AUTH_TOKEN"], "tok");
    }

    #[test]
    fn test_agent_env_missing_token_is_typed_error() {
        let home = TempDir::new().unwrap();
        let host = host(home.path(), &[]);
        let mut config = SandboxConfig::new("abc1234", home.path());
        config.provider = find_provider("glm", Some(AgentKind::Claude));

        let err = agent_env(&config, &host.ambient).unwrap_err();
        assert!(err.downcast_ref::<env::MissingAuthToken>().is_some());
    }

    #[test]
    fn test_prepare_mount_points_for_work_dir_under_home() {
        let home = TempDir::new().unwrap();
        let work = home.path().join("src/project");
        fs::create_dir_all(&work).unwrap();
        let sandbox_home = home.path().join(".sandboxed-agent-home");
        let config = SandboxConfig::new("abc1234", &work);

        prepare_mount_points(&sandbox_home, home.path(), &config).unwrap();
        assert!(sandbox_home.join("src/project").is_dir());
    }
}
