use std::path::Path;
use std::process::Command;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use super::{TerminalConfig, TerminalDelegate};
use crate::cmd::Cmd;
use crate::output;
use crate::sandbox::SandboxCommand;
use crate::sandbox::env::{AmbientEnv, EnvMap, is_reserved};
use crate::shell::{shell_join, shell_quote};

static UNSAFE_NAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_-]").unwrap());

pub(super) struct Tmux;

fn sanitize(name: &str) -> String {
    UNSAFE_NAME_CHARS.replace_all(name, "_").into_owned()
}

fn dir_name(work_dir: &Path) -> String {
    work_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn session_name(work_dir: &Path) -> String {
    format!("agent-{}", sanitize(&dir_name(work_dir)))
}

fn window_name(work_dir: &Path) -> String {
    sanitize(&dir_name(work_dir))
}

/// Shell line for the new pane: exports followed by the command.
///
/// The pane's shell starts from the tmux server environment, so every
/// variable the command needs is exported explicitly.
fn pane_command(command: &SandboxCommand) -> String {
    let exports = export_line(&command.env);
    let argv = shell_join(&command.argv());
    if exports.is_empty() {
        argv
    } else {
        format!("{}; {}", exports, argv)
    }
}

fn export_line(env: &EnvMap) -> String {
    env.iter()
        .filter(|(k, _)| !is_reserved(k))
        .map(|(k, v)| format!("export {}={}", k, shell_quote(v)))
        .collect::<Vec<_>>()
        .join("; ")
}

fn session_exists(session: &str) -> bool {
    Cmd::new("tmux")
        .args(&["has-session", "-t", session])
        .run_as_check()
}

/// Run an interactive tmux client with the terminal attached.
fn run_interactive(args: &[&str]) -> i32 {
    debug!(args = ?args, "tmux:run");
    match Command::new("tmux").args(args).status() {
        Ok(status) => status.code().unwrap_or(1),
        Err(e) => {
            output::error(&format!("Failed to run tmux: {}", e));
            1
        }
    }
}

impl TerminalDelegate for Tmux {
    fn is_available(&self) -> bool {
        which::which("tmux").is_ok()
    }

    fn is_inside(&self, ambient: &AmbientEnv) -> bool {
        ambient.non_empty("TMUX").is_some()
    }

    fn execute(&self, config: &TerminalConfig, command: &SandboxCommand, verbose: bool) -> i32 {
        let session = config
            .session_name
            .clone()
            .unwrap_or_else(|| session_name(&command.cwd));
        let window = config
            .window_name
            .clone()
            .unwrap_or_else(|| window_name(&command.cwd));
        let work_dir = command.cwd.to_string_lossy().into_owned();
        let pane = pane_command(command);

        if verbose {
            output::info(&format!("Tmux session: {}", session));
            output::info(&format!("Tmux window: {}", window));
        }

        if session_exists(&session) {
            let created = Cmd::new("tmux")
                .args(&[
                    "new-window",
                    "-t",
                    session.as_str(),
                    "-n",
                    window.as_str(),
                    "-c",
                    work_dir.as_str(),
                    pane.as_str(),
                ])
                .run();
            if let Err(e) = created {
                warn!(session = %session, error = %e, "tmux:new-window failed");
                output::error(&format!("Failed to create tmux window: {}", e));
                return 1;
            }
            if config.detach || !config.attach_existing {
                output::info(&format!(
                    "Tmux window '{}' created in session '{}'",
                    window, session
                ));
                output::info(&format!("Attach with: tmux attach-session -t {}", session));
                return 0;
            }
            return run_interactive(&["attach-session", "-t", session.as_str()]);
        }

        let mut args = vec!["new-session"];
        if config.detach {
            args.push("-d");
        }
        args.extend([
            "-s",
            session.as_str(),
            "-n",
            window.as_str(),
            "-c",
            work_dir.as_str(),
            pane.as_str(),
        ]);
        let code = run_interactive(&args);
        if config.detach && code == 0 {
            output::info(&format!("Tmux session '{}' started in background", session));
            output::info(&format!("Attach with: tmux attach-session -t {}", session));
        }
        code
    }
}
