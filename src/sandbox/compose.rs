//! `docker compose run` against a project's agent stack.
//!
//! The compose file owns the image, volumes and service environment; this
//! backend layers the work dir, user config mounts and sandbox variables on
//! top and exports `AGENT_*` variables the stack can interpolate.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::debug;

use super::env::{self, filter_reserved, merge_custom_env, sandbox_environment};
use super::mounts::{self, plan_application_mounts};
use super::{HostContext, Prepared, SandboxBackend, SandboxCommand, agent_env, command};
use crate::cmd::Cmd;
use crate::config::{SandboxConfig, SandboxMethod};
use crate::output;

/// Stack definition looked up from the search dir upwards.
pub const COMPOSE_FILE: &str = "stacks/ai-agent.yaml";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Docker Compose file not found: {0}")]
pub struct ComposeFileNotFound(pub String);

/// Where [`COMPOSE_FILE`] is looked for: `search_dir` and each ancestor
/// short of the filesystem root.
fn compose_candidates(search_dir: &Path) -> impl Iterator<Item = PathBuf> + '_ {
    search_dir
        .ancestors()
        .take_while(|dir| dir.parent().is_some())
        .map(|dir| dir.join(COMPOSE_FILE))
}

/// Locate the compose file.
///
/// An explicit path is resolved against `search_dir` and must exist. Without
/// one, the candidates from [`compose_candidates`] are probed in order.
pub fn find_compose_file(
    search_dir: &Path,
    explicit: Option<&Path>,
) -> Result<PathBuf, ComposeFileNotFound> {
    if let Some(file) = explicit {
        let path = search_dir.join(file);
        return if path.exists() {
            Ok(path)
        } else {
            Err(ComposeFileNotFound(file.display().to_string()))
        };
    }

    compose_candidates(search_dir)
        .find(|candidate| candidate.exists())
        .ok_or_else(|| ComposeFileNotFound(COMPOSE_FILE.to_string()))
}

pub(super) struct ComposeBackend;

impl ComposeBackend {
    fn compose_file(config: &SandboxConfig) -> Result<PathBuf> {
        let search_dir = config.repo_dir.as_deref().unwrap_or(&config.work_dir);
        let file = find_compose_file(search_dir, config.compose_file.as_deref())?;
        debug!(file = %file.display(), "compose:file");
        Ok(file)
    }
}

impl SandboxBackend for ComposeBackend {
    fn method(&self) -> SandboxMethod {
        SandboxMethod::Compose
    }

    fn is_available(&self, config: &SandboxConfig) -> bool {
        Cmd::new(config.runtime.binary())
            .args(&["compose", "version"])
            .run_as_check()
    }

    fn prepare(&self, config: &SandboxConfig, _host: &HostContext) -> Result<Prepared> {
        if config.provider.is_some() && config.resolved_service().contains("-glm") {
            output::warning(
                "Provider override may conflict with pre-configured service environment",
            );
        }
        if config.verbose {
            output::info(&format!(
                "Starting {} via Docker Compose service: {}",
                config.agent.display_name,
                config.resolved_service()
            ));
        }
        Ok(Prepared::default())
    }

    fn command(
        &self,
        config: &SandboxConfig,
        host: &HostContext,
        _prepared: &Prepared,
    ) -> Result<SandboxCommand> {
        let compose_file = Self::compose_file(config)?;
        let real_home = &host.real_home;

        let mut args = vec![
            "compose".to_string(),
            "-f".to_string(),
            compose_file.to_string_lossy().into_owned(),
            "run".to_string(),
            "--rm".to_string(),
        ];

        let base_env = sandbox_environment(real_home, &[], false, None, &host.ambient);
        args.extend(env::to_docker_args(&merge_custom_env(
            base_env,
            &config.custom_env,
        )));
        args.extend(mounts::to_docker_args(&plan_application_mounts(
            &config.work_dir,
            real_home,
            real_home,
            &config.bind_paths,
            &config.ro_bind_paths,
        )));
        args.push(config.resolved_service().to_string());
        args.extend(command::agent_command(config, None));

        let work_dir = config.work_dir.to_string_lossy().into_owned();
        let repo_dir = config
            .repo_dir
            .as_deref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| work_dir.clone());

        // The stack interpolates these; provider variables pass through `${VAR:-}`
        let mut process_env = filter_reserved(host.ambient.vars().clone());
        process_env.insert("AGENT_WORK_DIR".into(), work_dir.clone());
        process_env.insert("AGENT_REPO_DIR".into(), repo_dir.clone());
        process_env.insert("AGENT_UID".into(), host.uid.to_string());
        process_env.insert("AGENT_GID".into(), host.gid.to_string());
        process_env.extend(agent_env(config, &host.ambient)?);

        Ok(SandboxCommand {
            program: config.runtime.binary().to_string(),
            args,
            env: process_env,
            cwd: config.work_dir.clone(),
            env_prefix: vec![
                ("AGENT_WORK_DIR".into(), work_dir),
                ("AGENT_REPO_DIR".into(), repo_dir),
            ],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentKind, find_provider};
    use crate::sandbox::env::AGENT_ID_ENV;
    use crate::sandbox::test_support::{host, position};
    use std::fs;
    use tempfile::TempDir;

    fn project_with_stack() -> TempDir {
        let project = TempDir::new().unwrap();
        fs::create_dir_all(project.path().join("stacks")).unwrap();
        fs::write(project.path().join(COMPOSE_FILE), "services: {}\n").unwrap();
        fs::create_dir_all(project.path().join("apps/web")).unwrap();
        project
    }

    #[test]
    fn test_find_compose_file_walks_up() {
        let project = project_with_stack();
        let found = find_compose_file(&project.path().join("apps/web"), None).unwrap();
        assert_eq!(found, project.path().join(COMPOSE_FILE));
    }

    #[test]
    fn test_search_stops_before_filesystem_root() {
        let candidates: Vec<_> = compose_candidates(Path::new("/srv/app/web")).collect();
        assert_eq!(
            candidates,
            vec![
                PathBuf::from("/srv/app/web").join(COMPOSE_FILE),
                PathBuf::from("/srv/app").join(COMPOSE_FILE),
                PathBuf::from("/srv").join(COMPOSE_FILE),
            ]
        );
        assert_eq!(compose_candidates(Path::new("/")).count(), 0);
    }

    #[test]
    fn test_find_compose_file_explicit_relative() {
        let project = project_with_stack();
        fs::write(project.path().join("custom.yaml"), "services: {}\n").unwrap();
        let found = find_compose_file(project.path(), Some(Path::new("custom.yaml"))).unwrap();
        assert_eq!(found, project.path().join("custom.yaml"));
    }

    #[test]
    fn test_find_compose_file_missing() {
        let dir = TempDir::new().unwrap();
        assert_eq!(
            find_compose_file(dir.path(), None),
            Err(ComposeFileNotFound(COMPOSE_FILE.to_string()))
        );
        let err = find_compose_file(dir.path(), Some(Path::new("nope.yaml"))).unwrap_err();
        assert_eq!(err.to_string(), "Docker Compose file not found: nope.yaml");
    }

    #[test]
    fn test_command_shape() {
        let home = TempDir::new().unwrap();
        let project = project_with_stack();
        let work = project.path().join("apps/web");
        let host = host(home.path(), &[("UID", "1000"), ("KEEP", "1")]);
        let mut config = SandboxConfig::new("abc1234", &work);
        config.method = SandboxMethod::Compose;

        let cmd = ComposeBackend
            .command(&config, &host, &Prepared::default())
            .unwrap();
        assert_eq!(cmd.program, "docker");
        assert_eq!(cmd.args[0], "compose");
        assert_eq!(
            cmd.args[2],
            project.path().join(COMPOSE_FILE).to_string_lossy()
        );
        assert_eq!(&cmd.args[3..5], &["run", "--rm"]);

        let service = position(&cmd.args, "ai-agent");
        assert_eq!(
            &cmd.args[service + 1..],
            &["claude", "--permission-mode", "bypassPermissions"]
        );

        let work_str = work.to_string_lossy().to_string();
        assert_eq!(cmd.env["AGENT_WORK_DIR"], work_str);
        assert_eq!(cmd.env["AGENT_REPO_DIR"], work_str);
        assert_eq!(cmd.env["AGENT_UID"], "1000");
        assert_eq!(cmd.env["KEEP"], "1");
        assert_eq!(cmd.env[AGENT_ID_ENV], "abc1234");
        assert!(!cmd.env.contains_key("UID"));
        assert!(cmd.display().starts_with(&format!(
            "AGENT_WORK_DIR={} AGENT_REPO_DIR={} docker compose",
            work_str, work_str
        )));
    }

    #[test]
    fn test_repo_dir_used_for_search() {
        let home = TempDir::new().unwrap();
        let repo = project_with_stack();
        let worktree = TempDir::new().unwrap();
        let host = host(home.path(), &[]);
        let mut config = SandboxConfig::new("abc1234", worktree.path());
        config.repo_dir = Some(repo.path().to_path_buf());
        config.service = Some("ai-agent-glm".into());

        let cmd = ComposeBackend
            .command(&config, &host, &Prepared::default())
            .unwrap();
        assert_eq!(cmd.env["AGENT_REPO_DIR"], repo.path().to_string_lossy());
        assert!(cmd.args.contains(&"ai-agent-glm".to_string()));
    }

    #[test]
    fn test_missing_file_is_typed_error() {
        let home = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let host = host(home.path(), &[]);
        let config = SandboxConfig::new("abc1234", work.path());

        let err = ComposeBackend
            .command(&config, &host, &Prepared::default())
            .unwrap_err();
        assert!(err.downcast_ref::<ComposeFileNotFound>().is_some());
    }

    #[test]
    fn test_provider_env_goes_to_process() {
        let home = TempDir::new().unwrap();
        let project = project_with_stack();
        let host = host(home.path(), &[("ZAI_AUTH_TOKEN", "zai-secret-value")]);
        let mut config = SandboxConfig::new("abc1234", project.path());
        config.provider = find_provider("glm", Some(AgentKind::Claude));

        let cmd = ComposeBackend
            .command(&config, &host, &Prepared::default())
            .unwrap();
        assert_eq!(cmd.env["ANTHROPIC_AUTH_TOKEN"], "zai-secret-value");
        assert!(!cmd.args.iter().any(|a| a.contains("zai-secret-value")));
    }
}
