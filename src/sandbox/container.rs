//! Docker/Podman container backend.
//!
//! The sandbox home is mounted over the real home path inside the container
//! and the process runs with the host UID:GID, so files written to the work
//! dir keep host ownership.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::env::{self, merge_custom_env, sandbox_environment};
use super::mounts::{self, BindMount, plan_application_mounts};
use super::{HostContext, Prepared, SandboxBackend, SandboxCommand, agent_env, command};
use crate::cmd::Cmd;
use crate::config::{SandboxConfig, SandboxMethod};

pub(super) struct ContainerBackend;

impl SandboxBackend for ContainerBackend {
    fn method(&self) -> SandboxMethod {
        SandboxMethod::Docker
    }

    fn is_available(&self, config: &SandboxConfig) -> bool {
        Cmd::new(config.runtime.binary()).arg("info").run_as_check()
    }

    fn prepare(&self, config: &SandboxConfig, host: &HostContext) -> Result<Prepared> {
        let sandbox_home = config.sandbox_home(&host.real_home);
        fs::create_dir_all(&sandbox_home)
            .with_context(|| format!("Failed to create sandbox home {}", sandbox_home.display()))?;
        Ok(Prepared::default())
    }

    fn command(
        &self,
        config: &SandboxConfig,
        host: &HostContext,
        _prepared: &Prepared,
    ) -> Result<SandboxCommand> {
        let real_home = &host.real_home;
        let mut args: Vec<String> = ["run", "--rm", "-it"].map(String::from).to_vec();
        if !config.network {
            args.push("--network".to_string());
            args.push("none".to_string());
        }
        args.push("-w".to_string());
        args.push(config.work_dir.to_string_lossy().into_owned());
        args.push("-u".to_string());
        args.push(format!("{}:{}", host.uid, host.gid));

        // Host PATH points at host binaries, meaningless inside the image
        let base_env = sandbox_environment(real_home, &[], false, None, &host.ambient);
        let mut container_env = merge_custom_env(base_env, &config.custom_env);
        container_env.extend(agent_env(config, &host.ambient)?);
        args.extend(env::to_docker_args(&container_env));

        let mut volumes = vec![BindMount::rw(config.sandbox_home(real_home), real_home)];
        volumes.extend(plan_application_mounts(
            &config.work_dir,
            real_home,
            real_home,
            &config.bind_paths,
            &config.ro_bind_paths,
        ));
        // Worktrees only carry a `.git` file; git inside needs the main repo's `.git` too
        if let Some(main_git) = worktree_main_git(&config.work_dir) {
            volumes.push(BindMount::rw(&main_git, &main_git));
        }
        args.extend(mounts::to_docker_args(&volumes));

        args.push(config.resolved_image().to_string());
        args.extend(command::agent_command(config, None));

        Ok(SandboxCommand {
            program: config.runtime.binary().to_string(),
            args,
            env: host.ambient.vars().clone(),
            cwd: config.work_dir.clone(),
            env_prefix: Vec::new(),
        })
    }
}

/// The main repository's `.git` directory when `work_dir` is a linked worktree.
///
/// A worktree's `.git` file reads `gitdir: <main>/.git/worktrees/<name>`.
fn worktree_main_git(work_dir: &Path) -> Option<PathBuf> {
    let git_path = work_dir.join(".git");
    if !git_path.is_file() {
        return None;
    }
    let content = fs::read_to_string(&git_path).ok()?;
    let gitdir = content.strip_prefix("gitdir: ")?.trim();
    Path::new(gitdir).ancestors().nth(2).map(Path::to_path_buf)
}
