//! Content-addressed cache of Nix-built package environments.
//!
//! An [`EnvSpec`] (nixpkgs pin plus package list) is normalized and hashed
//! into a short env id. The id names a generated Nix expression under
//! `specs/` and an output link under `envs/` that points into the Nix store
//! once `nix-build` has realized it.
//!
//! ```text
//! ~/.local/share/agent-nix/
//! ├── specs/<id>.nix
//! ├── envs/<id>        -> /nix/store/...-agent-env-<id>
//! ├── locks/<id>.lock
//! └── agents/<agent-id>/{work,tmp,home}
//! ```

mod build;
mod render;
mod resolve;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::sandbox::env::AmbientEnv;

pub use build::BuildOptions;
use render::render_nix_expression;

/// Environment variable overriding the cache root.
pub const CACHE_DIR_ENV: &str = "AGENT_NIX_DIR";

const NIX_STORE: &str = "/nix/store";
const DEFAULT_BUILDER: &str = "nix-build";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NixpkgsPin {
    pub name: &'static str,
    pub git_ref: &'static str,
}

impl NixpkgsPin {
    pub fn tarball_url(&self) -> String {
        format!(
            "https://github.com/NixOS/nixpkgs/archive/{}.tar.gz",
            self.git_ref
        )
    }
}

pub const NIXPKGS_PINS: &[NixpkgsPin] = &[
    NixpkgsPin {
        name: "nixos-24.11",
        git_ref: "nixos-24.11",
    },
    NixpkgsPin {
        name: "nixos-unstable",
        git_ref: "nixos-unstable",
    },
    NixpkgsPin {
        name: "nixpkgs-unstable",
        git_ref: "nixpkgs-unstable",
    },
];

pub const DEFAULT_NIXPKGS_PIN: &str = "nixos-unstable";

pub fn find_pin(name: &str) -> Option<&'static NixpkgsPin> {
    NIXPKGS_PINS.iter().find(|p| p.name == name)
}

/// Packages every agent environment starts from.
pub const DEFAULT_BASE_PACKAGES: &[&str] = &[
    "nodejs_24",
    "git",
    "ripgrep",
    "fd",
    "fzf",
    "jq",
    "curl",
    "coreutils",
    "bash",
];

/// What to build: a nixpkgs pin and a package list.
///
/// Two specs are the same environment iff their normalized forms are equal.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EnvSpec {
    #[serde(default)]
    pub pin: Option<String>,
    pub packages: Vec<String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EnvSpecError {
    #[error("Package list must not be empty")]
    EmptyPackages,
    #[error("Invalid package name \"{0}\": only letters, digits and _ + - . are allowed")]
    InvalidPackageName(String),
    #[error("Unknown nixpkgs pin \"{pin}\" (expected one of: {allowed})")]
    UnknownPin { pin: String, allowed: String },
}

/// Where a spec lives in the cache and whether it is already built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEnv {
    pub env_id: String,
    pub spec_path: PathBuf,
    pub out_link: PathBuf,
    pub ready: bool,
}

/// Per-agent writable directories bound into a nix sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentDirs {
    pub work: PathBuf,
    pub tmp: PathBuf,
    pub home: PathBuf,
}

#[derive(Debug, Clone)]
pub struct EnvCache {
    root: PathBuf,
    store_root: PathBuf,
    builder: String,
}

impl EnvCache {
    /// Cache under `$AGENT_NIX_DIR`, or `~/.local/share/agent-nix`.
    pub fn from_env(real_home: &Path, ambient: &AmbientEnv) -> Self {
        let root = ambient
            .non_empty(CACHE_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| real_home.join(".local/share/agent-nix"));
        Self::with_root(root)
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            store_root: PathBuf::from(NIX_STORE),
            builder: DEFAULT_BUILDER.to_string(),
        }
    }

    /// Accept output links into a different store directory.
    #[cfg(test)]
    pub fn with_store_root(mut self, store_root: impl Into<PathBuf>) -> Self {
        self.store_root = store_root.into();
        self
    }

    /// Use another program in place of `nix-build`. It is invoked with the
    /// same `<spec> -o <out-link>` arguments.
    #[cfg(test)]
    pub fn with_builder(mut self, builder: impl Into<String>) -> Self {
        self.builder = builder.into();
        self
    }

    #[cfg(test)]
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store_root(&self) -> &Path {
        &self.store_root
    }

    pub fn specs_dir(&self) -> PathBuf {
        self.root.join("specs")
    }

    pub fn envs_dir(&self) -> PathBuf {
        self.root.join("envs")
    }

    pub fn agents_dir(&self) -> PathBuf {
        self.root.join("agents")
    }

    fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            self.specs_dir(),
            self.envs_dir(),
            self.agents_dir(),
            self.locks_dir(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create cache directory {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn agent_dirs(&self, agent_id: &str) -> AgentDirs {
        let base = self.agents_dir().join(agent_id);
        AgentDirs {
            work: base.join("work"),
            tmp: base.join("tmp"),
            home: base.join("home"),
        }
    }

    pub fn ensure_agent_dirs(&self, agent_id: &str) -> Result<AgentDirs> {
        let dirs = self.agent_dirs(agent_id);
        for dir in [&dirs.work, &dirs.tmp, &dirs.home] {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create agent directory {}", dir.display()))?;
        }
        Ok(dirs)
    }
}
