//! Terminal multiplexer delegates.
//!
//! A delegate may take over launching a synthesized command, e.g. in a new
//! tmux window. It can decline, in which case the caller spawns the command
//! itself.

mod tmux;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::sandbox::SandboxCommand;
use crate::sandbox::env::AmbientEnv;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TerminalKind {
    #[default]
    Tmux,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TerminalConfig {
    pub kind: TerminalKind,
    /// Derived from the work dir when unset
    pub session_name: Option<String>,
    /// Derived from the work dir when unset
    pub window_name: Option<String>,
    /// Leave the session running in the background
    pub detach: bool,
    /// Attach to the session after adding a window to it
    pub attach_existing: bool,
}

pub trait TerminalDelegate: Sync {
    fn is_available(&self) -> bool;

    /// Whether the current process already runs inside this multiplexer.
    fn is_inside(&self, ambient: &AmbientEnv) -> bool;

    /// Launch `command` and return the exit code to report.
    fn execute(&self, config: &TerminalConfig, command: &SandboxCommand, verbose: bool) -> i32;
}

fn delegate_for(kind: TerminalKind) -> &'static dyn TerminalDelegate {
    match kind {
        TerminalKind::Tmux => &tmux::Tmux,
    }
}

/// Inside the multiplexer a delegate only acts when asked for a detached
/// session or a named window; otherwise the command runs in place.
fn wants_delegate(config: &TerminalConfig, inside: bool) -> bool {
    !inside || config.detach || config.window_name.is_some()
}

/// Run `command` through the configured terminal delegate.
///
/// `None` means no delegate took the command and the caller should spawn it.
pub fn execute_in_terminal(
    config: Option<&TerminalConfig>,
    command: &SandboxCommand,
    ambient: &AmbientEnv,
    verbose: bool,
) -> Option<i32> {
    let config = config?;
    let delegate = delegate_for(config.kind);
    if !wants_delegate(config, delegate.is_inside(ambient)) {
        debug!("terminal:inside multiplexer, running in place");
        return None;
    }
    if !delegate.is_available() {
        debug!(kind = ?config.kind, "terminal:unavailable");
        return None;
    }
    Some(delegate.execute(config, command, verbose))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outside_multiplexer_always_delegates() {
        assert!(wants_delegate(&TerminalConfig::default(), false));
    }

    #[test]
    fn test_inside_multiplexer_declines_unless_asked() {
        let mut config = TerminalConfig::default();
        assert!(!wants_delegate(&config, true));

        config.detach = true;
        assert!(wants_delegate(&config, true));

        config.detach = false;
        config.window_name = Some("review".into());
        assert!(wants_delegate(&config, true));
    }

    #[test]
    fn test_no_config_declines() {
        let command = SandboxCommand {
            program: "true".into(),
            args: Vec::new(),
            env: Default::default(),
            cwd: "/".into(),
            env_prefix: Vec::new(),
        };
        assert_eq!(
            execute_in_terminal(None, &command, &AmbientEnv::default(), false),
            None
        );
    }

    #[test]
    fn test_inside_tmux_declines_before_probing() {
        let command = SandboxCommand {
            program: "true".into(),
            args: Vec::new(),
            env: Default::default(),
            cwd: "/".into(),
            env_prefix: Vec::new(),
        };
        let ambient = AmbientEnv::from_pairs([("TMUX", "/tmp/tmux-1000/default,1,0")]);
        let config = TerminalConfig::default();
        assert_eq!(
            execute_in_terminal(Some(&config), &command, &ambient, false),
            None
        );
    }
}
