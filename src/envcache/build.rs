use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use nix::fcntl::{Flock, FlockArg};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

use super::{EnvCache, EnvSpec, ResolvedEnv, render_nix_expression};
use crate::output;

pub const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Stream builder output instead of capturing it
    pub verbose: bool,
    pub debug: bool,
    pub timeout: Duration,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            verbose: false,
            debug: false,
            timeout: DEFAULT_BUILD_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResult {
    pub success: bool,
    pub store_path: Option<PathBuf>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl BuildResult {
    fn ok(store_path: PathBuf, duration_ms: u64) -> Self {
        Self {
            success: true,
            store_path: Some(store_path),
            error: None,
            duration_ms,
        }
    }

    fn failed(error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            store_path: None,
            error: Some(error.into()),
            duration_ms,
        }
    }
}

impl EnvCache {
    /// Make sure the environment for `spec` is realized.
    ///
    /// Validation errors and cache I/O failures are `Err`. A failed or timed
    /// out build is reported through [`BuildResult`] and leaves no output link.
    pub fn build(
        &self,
        spec: &EnvSpec,
        options: &BuildOptions,
    ) -> Result<(ResolvedEnv, BuildResult)> {
        let resolved = self.resolve(spec)?;
        if let Some(hit) = self.cache_hit(&resolved) {
            return Ok((resolved, hit));
        }

        self.ensure_directories()?;
        let _lock = self.lock_env(&resolved.env_id)?;

        // Another process may have finished the build while we waited.
        let resolved = self.resolve(spec)?;
        if let Some(hit) = self.cache_hit(&resolved) {
            return Ok((resolved, hit));
        }

        if !resolved.spec_path.exists() {
            let expression = render_nix_expression(&spec.normalized(), &resolved.env_id)?;
            write_atomic(&resolved.spec_path, &expression)?;
            debug!(spec_path = %resolved.spec_path.display(), "envcache:spec written");
        }

        if options.debug {
            output::debug(&format!("Nix spec: {}", resolved.spec_path.display()));
            output::debug(&format!("Output link: {}", resolved.out_link.display()));
        }

        info!(env_id = %resolved.env_id, "envcache:build start");
        let result = self.run_builder(&resolved.spec_path, &resolved.out_link, options);
        match &result.error {
            None => info!(
                env_id = %resolved.env_id,
                duration_ms = result.duration_ms,
                "envcache:build success"
            ),
            Some(error) => warn!(env_id = %resolved.env_id, error = %error, "envcache:build failure"),
        }

        let ready = result.success && self.is_realized(&resolved.out_link);
        Ok((ResolvedEnv { ready, ..resolved }, result))
    }

    fn cache_hit(&self, resolved: &ResolvedEnv) -> Option<BuildResult> {
        if !resolved.ready {
            return None;
        }
        let store_path = fs::canonicalize(&resolved.out_link).ok()?;
        debug!(env_id = %resolved.env_id, "envcache:hit");
        Some(BuildResult::ok(store_path, 0))
    }

    /// Exclusive advisory lock serializing builds of one env id.
    fn lock_env(&self, env_id: &str) -> Result<Flock<File>> {
        let path = self.locks_dir().join(format!("{}.lock", env_id));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .with_context(|| format!("Failed to open lock file {}", path.display()))?;
        Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| anyhow!("Failed to lock {}: {}", path.display(), errno))
    }

    fn run_builder(&self, spec_path: &Path, out_link: &Path, options: &BuildOptions) -> BuildResult {
        let started = Instant::now();
        let elapsed_ms = || started.elapsed().as_millis() as u64;

        let mut cmd = Command::new(&self.builder);
        cmd.arg(spec_path)
            .arg("-o")
            .arg(out_link)
            .env("NIXPKGS_ALLOW_UNFREE", "1")
            .stdin(Stdio::null());
        if options.verbose {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            cmd.stdout(Stdio::null()).stderr(Stdio::piped());
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return BuildResult::failed(
                    format!("Failed to spawn {}: {}", self.builder, e),
                    elapsed_ms(),
                );
            }
        };

        // Drain stderr concurrently so a chatty build cannot block on a full pipe.
        let stderr_reader = child.stderr.take().map(|mut stderr| {
            thread::spawn(move || {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf);
                buf
            })
        });

        let status = match child.wait_timeout(options.timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                return BuildResult::failed(
                    format!("Build timed out after {}s", options.timeout.as_secs()),
                    elapsed_ms(),
                );
            }
            Err(e) => {
                let _ = child.kill();
                return BuildResult::failed(
                    format!("Failed to wait for {}: {}", self.builder, e),
                    elapsed_ms(),
                );
            }
        };

        let stderr = stderr_reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if !status.success() {
            let error = if stderr.trim().is_empty() {
                format!(
                    "{} exited with code {}",
                    self.builder,
                    status.code().unwrap_or(-1)
                )
            } else {
                stderr.trim().to_string()
            };
            return BuildResult::failed(error, elapsed_ms());
        }

        match fs::canonicalize(out_link) {
            Ok(store_path) => BuildResult::ok(store_path, elapsed_ms()),
            Err(e) => BuildResult::failed(
                format!("Build succeeded but {} is unusable: {}", out_link.display(), e),
                elapsed_ms(),
            ),
        }
    }
}

/// Write via a temp file in the destination directory, then rename over the target.
fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| anyhow!("No parent directory for {}", path.display()))?;
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    tmp.write_all(contents.as_bytes())
        .context("Failed to write Nix expression")?;
    tmp.persist(path)
        .with_context(|| format!("Failed to move Nix expression to {}", path.display()))?;
    Ok(())
}
