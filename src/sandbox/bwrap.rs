//! Bubblewrap overlay sandbox.
//!
//! The host root is visible read-only and a private sandbox home is laid
//! over the real home, so the agent keeps its toolchain while writes land
//! only in the work dir, the allow-listed config entries and the sandbox home.

use anyhow::Result;

use super::env::{merge_custom_env, sandbox_environment, to_setenv_args, without_overridden};
use super::mounts::{base_mounts, plan_application_mounts, to_bwrap_args};
use super::{
    HostContext, Prepared, SandboxBackend, SandboxCommand, agent_env, command, prepare_mount_points,
    process_env,
};
use crate::config::{SandboxConfig, SandboxMethod};

/// Namespaces every bwrap-based backend unshares.
pub(super) const UNSHARE_FLAGS: &[&str] = &[
    "--unshare-uts",
    "--unshare-ipc",
    "--unshare-pid",
    "--unshare-cgroup",
];

pub(super) struct BwrapBackend;

impl SandboxBackend for BwrapBackend {
    fn method(&self) -> SandboxMethod {
        SandboxMethod::Bwrap
    }

    fn is_available(&self, _config: &SandboxConfig) -> bool {
        which::which("bwrap").is_ok()
    }

    fn prepare(&self, config: &SandboxConfig, host: &HostContext) -> Result<Prepared> {
        prepare_mount_points(&config.sandbox_home(&host.real_home), &host.real_home, config)?;
        Ok(Prepared::default())
    }

    fn command(
        &self,
        config: &SandboxConfig,
        host: &HostContext,
        _prepared: &Prepared,
    ) -> Result<SandboxCommand> {
        let injected = agent_env(config, &host.ambient)?;
        let args = build_bwrap_args(config, host, &injected);
        Ok(SandboxCommand {
            program: "bwrap".to_string(),
            args,
            env: process_env(&host.ambient, injected),
            cwd: config.work_dir.clone(),
            env_prefix: Vec::new(),
        })
    }
}

/// Identity and provider variables reach the agent through bwrap's own
/// environment; `--setenv` carries the rest and must not shadow them.
fn build_bwrap_args(
    config: &SandboxConfig,
    host: &HostContext,
    injected: &super::env::EnvMap,
) -> Vec<String> {
    let real_home = &host.real_home;
    let sandbox_home = config.sandbox_home(real_home);

    let mut args: Vec<String> = UNSHARE_FLAGS.iter().map(|f| f.to_string()).collect();
    if config.network {
        args.push("--share-net".to_string());
    }

    let base_env = sandbox_environment(real_home, &[], true, None, &host.ambient);
    let sandbox_env = merge_custom_env(base_env, &config.custom_env);
    args.extend(to_setenv_args(&without_overridden(sandbox_env, injected)));

    args.extend(to_bwrap_args(&base_mounts(&sandbox_home, real_home)));
    args.extend(to_bwrap_args(&plan_application_mounts(
        &config.work_dir,
        real_home,
        real_home,
        &config.bind_paths,
        &config.ro_bind_paths,
    )));

    args.push("--chdir".to_string());
    args.push(config.work_dir.to_string_lossy().into_owned());
    args.push("--die-with-parent".to_string());
    args.push("--".to_string());
    args.extend(command::agent_command(config, None));
    args
}
