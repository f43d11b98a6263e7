//! Bind-mount planning shared by the namespace and container backends.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

/// Entries under the real home the agent needs read-write access to
/// (credentials, git identity, package manager and toolchain state).
pub const USER_CONFIG_PATHS: &[&str] = &[
    ".claude",
    ".claude.json",
    ".gitconfig",
    ".gitignore_global",
    ".ssh",
    ".config",
    ".npmrc",
    ".npm",
    ".npm-global",
    ".cargo",
    ".rustup",
    ".local",
    ".cache",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountKind {
    Bind,
    RoBind,
    DevBind,
    Proc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub source: PathBuf,
    pub target: PathBuf,
    pub kind: MountKind,
}

impl BindMount {
    pub fn rw(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            kind: MountKind::Bind,
        }
    }

    pub fn ro(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            kind: MountKind::RoBind,
        }
    }

    fn same(path: impl Into<PathBuf>, kind: MountKind) -> Self {
        let path = path.into();
        Self {
            source: path.clone(),
            target: path,
            kind,
        }
    }

    pub fn read_only(&self) -> bool {
        self.kind == MountKind::RoBind
    }

    fn bwrap_args(&self) -> Vec<String> {
        let target = self.target.to_string_lossy().into_owned();
        match self.kind {
            MountKind::Proc => vec!["--proc".into(), target],
            kind => {
                let flag = match kind {
                    MountKind::RoBind => "--ro-bind",
                    MountKind::DevBind => "--dev-bind",
                    _ => "--bind",
                };
                vec![
                    flag.into(),
                    self.source.to_string_lossy().into_owned(),
                    target,
                ]
            }
        }
    }
}

/// Mounts every overlay sandbox starts from: a read-only view of the host
/// root with live `/dev`, a fresh `/proc` and a shared `/tmp`.
pub fn system_mounts() -> Vec<BindMount> {
    vec![
        BindMount::same("/", MountKind::RoBind),
        BindMount::same("/dev", MountKind::DevBind),
        BindMount::same("/proc", MountKind::Proc),
        BindMount::same("/tmp", MountKind::Bind),
    ]
}

/// System mounts followed by the sandbox home laid over the real home.
pub fn base_mounts(sandbox_home: &Path, real_home: &Path) -> Vec<BindMount> {
    let mut mounts = system_mounts();
    mounts.push(BindMount::rw(sandbox_home, real_home));
    mounts
}

/// Work dir, user config entries and custom paths, in that order.
///
/// Sources that do not exist on the host are left out.
pub fn plan_application_mounts(
    work_dir: &Path,
    real_home: &Path,
    target_home: &Path,
    custom_rw: &[PathBuf],
    custom_ro: &[PathBuf],
) -> Vec<BindMount> {
    let mut mounts = vec![BindMount::rw(work_dir, work_dir)];

    for entry in USER_CONFIG_PATHS {
        let source = real_home.join(entry);
        if source.exists() {
            mounts.push(BindMount::rw(source, target_home.join(entry)));
        }
    }

    for path in custom_rw {
        if path.exists() {
            mounts.push(BindMount::rw(path, path));
        } else {
            debug!(path = %path.display(), "mounts:skip missing bind path");
        }
    }
    for path in custom_ro {
        if path.exists() {
            mounts.push(BindMount::ro(path, path));
        } else {
            debug!(path = %path.display(), "mounts:skip missing ro-bind path");
        }
    }

    mounts
}

/// Create the mount point for `target` inside the sandbox home.
///
/// With the sandbox home laid over the real home, bwrap needs every bind
/// target below the real home to exist in the sandbox home first. Targets
/// outside the real home (or the home itself) need nothing. For a file
/// target only its parent directory is created.
pub fn ensure_mount_point(sandbox_home: &Path, real_home: &Path, target: &Path) -> Result<()> {
    let Ok(relative) = target.strip_prefix(real_home) else {
        return Ok(());
    };
    if relative.as_os_str().is_empty() {
        return Ok(());
    }

    let mount_point = sandbox_home.join(relative);
    let dir = if target.is_file() {
        match mount_point.parent() {
            Some(parent) => parent.to_path_buf(),
            None => return Ok(()),
        }
    } else {
        mount_point
    };
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create mount point {}", dir.display()))?;
    debug!(mount_point = %dir.display(), "mounts:prepared");
    Ok(())
}

pub fn to_bwrap_args(mounts: &[BindMount]) -> Vec<String> {
    mounts.iter().flat_map(BindMount::bwrap_args).collect()
}

/// `-v src:dst:ro|rw` pairs for docker. `/proc` and device mounts have no
/// container equivalent and are skipped.
pub fn to_docker_args(mounts: &[BindMount]) -> Vec<String> {
    mounts
        .iter()
        .filter(|m| matches!(m.kind, MountKind::Bind | MountKind::RoBind))
        .flat_map(|m| {
            let mode = if m.read_only() { "ro" } else { "rw" };
            [
                "-v".to_string(),
                format!("{}:{}:{}", m.source.display(), m.target.display(), mode),
            ]
        })
        .collect()
}
