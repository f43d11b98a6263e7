//! Direct execution on the host, also the fallback when a sandbox is unavailable.

use anyhow::Result;

use super::env::merge_custom_env;
use super::{HostContext, Prepared, SandboxBackend, SandboxCommand, agent_env};
use crate::config::{SandboxConfig, SandboxMethod};

pub(super) struct NoneBackend;

impl SandboxBackend for NoneBackend {
    fn method(&self) -> SandboxMethod {
        SandboxMethod::None
    }

    fn is_available(&self, _config: &SandboxConfig) -> bool {
        true
    }

    fn command(
        &self,
        config: &SandboxConfig,
        host: &HostContext,
        _prepared: &Prepared,
    ) -> Result<SandboxCommand> {
        let mut env = merge_custom_env(host.ambient.vars().clone(), &config.custom_env);
        env.extend(agent_env(config, &host.ambient)?);

        let args = config
            .agent
            .build_args(&config.agent_args, false, config.provider_cli_args());

        Ok(SandboxCommand {
            program: config.agent.binary.to_string(),
            args,
            env,
            cwd: config.work_dir.clone(),
            env_prefix: Vec::new(),
        })
    }
}
