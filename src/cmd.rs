use anyhow::{Context, Result, anyhow};
use std::path::Path;
use std::process::{Command, Output, Stdio};
use tracing::{debug, trace};

/// A builder for short-lived helper commands (probes, tmux control calls)
pub struct Cmd<'a> {
    command: &'a str,
    args: Vec<&'a str>,
}

impl<'a> Cmd<'a> {
    pub fn new(command: &'a str) -> Self {
        Self {
            command,
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: &'a str) -> Self {
        self.args.push(arg);
        self
    }

    pub fn args(mut self, args: &[&'a str]) -> Self {
        self.args.extend_from_slice(args);
        self
    }

    fn build(&self) -> Command {
        let mut cmd = Command::new(self.command);
        cmd.args(&self.args);
        cmd
    }

    /// Execute the command and return the output.
    /// Returns an error if the command fails (non-zero exit code).
    pub fn run(self) -> Result<Output> {
        trace!(command = self.command, args = ?self.args, "cmd:run start");

        let output = self.build().output().with_context(|| {
            format!(
                "Failed to execute command: {} {}",
                self.command,
                self.args.join(" ")
            )
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!(
                command = self.command,
                args = ?self.args,
                status = ?output.status.code(),
                stderr = %stderr.trim(),
                "cmd:run failure"
            );
            return Err(anyhow!(
                "Command failed: {} {}\n{}",
                self.command,
                self.args.join(" "),
                stderr.trim()
            ));
        }
        trace!(command = self.command, "cmd:run success");
        Ok(output)
    }

    /// Run as an availability probe: true only if the program could be
    /// spawned and exited successfully. Output is discarded.
    pub fn run_as_check(self) -> bool {
        trace!(command = self.command, args = ?self.args, "cmd:check start");
        let success = self
            .build()
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false);
        trace!(command = self.command, success, "cmd:check result");
        success
    }
}

/// Run a host-side shell command through `/bin/sh` in `workdir`.
///
/// Output is only shown when `verbose` is set; a failing command is an error.
pub fn shell_command(command: &str, workdir: &Path, verbose: bool) -> Result<()> {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(command).current_dir(workdir);
    if !verbose {
        cmd.stdout(Stdio::null()).stderr(Stdio::piped());
    }

    let output = cmd
        .output()
        .with_context(|| format!("Failed to execute shell command: {}", command))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!(
            "Shell command failed with exit code {}: {}\n{}",
            output.status.code().unwrap_or(-1),
            command,
            stderr.trim()
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_run_as_check_reports_exit_status() {
        assert!(Cmd::new("sh").args(&["-c", "exit 0"]).run_as_check());
        assert!(!Cmd::new("sh").args(&["-c", "exit 3"]).run_as_check());
    }

    #[test]
    fn test_run_as_check_missing_program_is_false() {
        assert!(!Cmd::new("definitely-not-a-real-binary-xyz").run_as_check());
    }

    #[test]
    fn test_run_failure_includes_stderr() {
        let err = Cmd::new("sh")
            .args(&["-c", "echo boom >&2; exit 1"])
            .run()
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_shell_command_runs_in_workdir() {
        let dir = TempDir::new().unwrap();
        shell_command("touch marker", dir.path(), false).unwrap();
        assert!(dir.path().join("marker").exists());
    }

    #[test]
    fn test_shell_command_failure_is_error() {
        let dir = TempDir::new().unwrap();
        let err = shell_command("exit 7", dir.path(), false).unwrap_err();
        assert!(err.to_string().contains("exit code 7"));
    }
}
