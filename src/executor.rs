//! Runs a synthesized command and reports its exit code.

use std::process::Command;

use tracing::{debug, error};

use crate::output;
use crate::sandbox::SandboxCommand;
use crate::sandbox::env::AmbientEnv;
use crate::terminal::{self, TerminalConfig};

/// Hand `command` to the terminal delegate, or spawn it with the terminal
/// attached and wait.
///
/// Spawn failures and signal deaths are reported as exit code 1.
pub fn run(
    command: &SandboxCommand,
    terminal: Option<&TerminalConfig>,
    ambient: &AmbientEnv,
    verbose: bool,
) -> i32 {
    if let Some(code) = terminal::execute_in_terminal(terminal, command, ambient, verbose) {
        debug!(code, "executor:terminal delegate finished");
        return code;
    }
    spawn_and_wait(command)
}

fn spawn_and_wait(command: &SandboxCommand) -> i32 {
    debug!(program = %command.program, cwd = %command.cwd.display(), "executor:spawn");
    let status = Command::new(&command.program)
        .args(&command.args)
        .env_clear()
        .envs(&command.env)
        .current_dir(&command.cwd)
        .status();

    match status {
        Ok(status) => {
            let code = status.code().unwrap_or(1);
            debug!(code, "executor:exit");
            code
        }
        Err(e) => {
            error!(program = %command.program, error = %e, "executor:spawn failed");
            output::error(&format!("Failed to execute {}: {}", command.program, e));
            1
        }
    }
}
