use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{DEFAULT_NIXPKGS_PIN, EnvCache, EnvSpec, EnvSpecError, NIXPKGS_PINS, ResolvedEnv, find_pin};

static PACKAGE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_+\-.]+$").unwrap());

const ENV_ID_LEN: usize = 16;

/// Nix attribute names we accept. Anything else could escape the generated
/// expression.
pub fn is_valid_package_name(name: &str) -> bool {
    PACKAGE_NAME.is_match(name)
}

impl EnvSpec {
    pub fn new<S: Into<String>>(pin: Option<&str>, packages: impl IntoIterator<Item = S>) -> Self {
        Self {
            pin: pin.map(str::to_string),
            packages: packages.into_iter().map(Into::into).collect(),
        }
    }

    pub fn validate(&self) -> Result<(), EnvSpecError> {
        if self.packages.is_empty() {
            return Err(EnvSpecError::EmptyPackages);
        }
        if let Some(pin) = self.pin.as_deref().filter(|p| !p.is_empty())
            && find_pin(pin).is_none()
        {
            return Err(EnvSpecError::UnknownPin {
                pin: pin.to_string(),
                allowed: NIXPKGS_PINS
                    .iter()
                    .map(|p| p.name)
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }
        if let Some(bad) = self.packages.iter().find(|p| !is_valid_package_name(p)) {
            return Err(EnvSpecError::InvalidPackageName(bad.clone()));
        }
        Ok(())
    }

    /// Fill in the default pin, then sort and dedupe the package list.
    pub fn normalized(&self) -> Self {
        let pin = self
            .pin
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_NIXPKGS_PIN);
        let mut packages = self.packages.clone();
        packages.sort();
        packages.dedup();
        Self {
            pin: Some(pin.to_string()),
            packages,
        }
    }

    /// Pin name; only meaningful on a normalized spec.
    pub fn pin_name(&self) -> &str {
        self.pin.as_deref().unwrap_or(DEFAULT_NIXPKGS_PIN)
    }
}

/// Stable id for a normalized spec: the first 16 hex digits of
/// SHA-256 over the pin and packages, newline separated.
pub fn compute_env_id(normalized: &EnvSpec) -> String {
    let mut content = normalized.pin_name().to_string();
    for pkg in &normalized.packages {
        content.push('\n');
        content.push_str(pkg);
    }
    let digest = format!("{:x}", Sha256::digest(content.as_bytes()));
    digest[..ENV_ID_LEN].to_string()
}

impl EnvCache {
    /// Locate `spec` in the cache without touching the filesystem beyond
    /// existence checks.
    pub fn resolve(&self, spec: &EnvSpec) -> Result<ResolvedEnv, EnvSpecError> {
        spec.validate()?;
        let normalized = spec.normalized();
        let env_id = compute_env_id(&normalized);
        let spec_path = self.specs_dir().join(format!("{}.nix", env_id));
        let out_link = self.envs_dir().join(&env_id);
        let ready = self.is_realized(&out_link);
        debug!(env_id = %env_id, ready, "envcache:resolve");
        Ok(ResolvedEnv {
            env_id,
            spec_path,
            out_link,
            ready,
        })
    }

    /// True iff `out_link` is a symlink whose target exists inside the store
    /// (the store root itself does not count).
    pub(super) fn is_realized(&self, out_link: &Path) -> bool {
        let is_link = fs::symlink_metadata(out_link)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        if !is_link {
            return false;
        }
        let Ok(target) = fs::canonicalize(out_link) else {
            return false;
        };
        let store = fs::canonicalize(self.store_root())
            .unwrap_or_else(|_| self.store_root().to_path_buf());
        target != store && target.starts_with(&store)
    }
}
