use crate::config::SandboxConfig;
use crate::shell::shell_join;

/// Agent argv for a sandboxed run. `binary_prefix` is the directory the
/// agent binary is resolved from inside the sandbox, if not `PATH`.
pub(super) fn agent_command(config: &SandboxConfig, binary_prefix: Option<&str>) -> Vec<String> {
    let binary = match binary_prefix {
        Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), config.agent.binary),
        None => config.agent.binary.to_string(),
    };
    let mut argv = vec![binary];
    argv.extend(
        config
            .agent
            .build_args(&config.agent_args, true, config.provider_cli_args()),
    );
    wrap_with_init_commands(argv, &config.init_commands)
}

/// Run `init` commands in the sandbox before exec'ing `command`.
///
/// Produces `sh -c "<c1> && <c2> && exec <command>"`. Init commands are
/// shell snippets and stay verbatim; the command's tokens are quoted.
/// Without init commands `command` is returned as is.
pub(super) fn wrap_with_init_commands(command: Vec<String>, init: &[String]) -> Vec<String> {
    if init.is_empty() {
        return command;
    }
    let mut script = init.join(" && ");
    script.push_str(" && exec ");
    script.push_str(&shell_join(&command));
    vec!["sh".to_string(), "-c".to_string(), script]
}
