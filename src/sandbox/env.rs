//! Environment composition for sandboxed processes.
//!
//! Layers are merged in a fixed order, later layers winning:
//! base sandbox variables, custom `KEY=VALUE` overrides, agent identity,
//! provider-injected variables.

use std::collections::BTreeMap;
use std::path::Path;

use crate::agent::ModelProvider;

pub type EnvMap = BTreeMap<String, String>;

pub const AGENT_ID_ENV: &str = "XONOVEX_AGENT_ID";
pub const PARENT_AGENT_ID_ENV: &str = "XONOVEX_PARENT_AGENT_ID";

/// Variables bash treats as read-only; exporting them aborts the shell.
pub const BASH_RESERVED_ENV_VARS: &[&str] = &["UID", "EUID", "GID", "GROUPS"];

pub const DEFAULT_SHELL: &str = "/bin/bash";

const AUTH_TOKEN_TARGET: &str = "ANTHROPIC_AUTH_TOKEN";
const ANTHROPIC_BASE_URL: &str = "ANTHROPIC_BASE_URL";

/// Snapshot of the invoking process environment.
///
/// Captured once at startup and passed down explicitly, so nothing below the
/// CLI layer reads process-global state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmbientEnv {
    vars: EnvMap,
}

impl AmbientEnv {
    pub fn capture() -> Self {
        Self {
            vars: std::env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
                .collect(),
        }
    }

    #[cfg(test)]
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Value of `key` if set to a non-empty string.
    pub fn non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    pub fn vars(&self) -> &EnvMap {
        &self.vars
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Missing authentication token: {0} environment variable is not set")]
pub struct MissingAuthToken(pub String);

/// Base environment for a sandbox whose home is `home`.
///
/// `PATH` is the extra prefixes, then `<home>/.local/bin` and the standard
/// system directories, then the host `PATH` when `inherit_host_path` is set.
pub fn sandbox_environment(
    home: &Path,
    extra_path_prefixes: &[&str],
    inherit_host_path: bool,
    shell: Option<&str>,
    ambient: &AmbientEnv,
) -> EnvMap {
    let local_bin = home.join(".local/bin");
    let mut path_parts: Vec<String> = extra_path_prefixes.iter().map(|p| p.to_string()).collect();
    path_parts.push(local_bin.to_string_lossy().into_owned());
    path_parts.extend(["/usr/local/bin", "/usr/bin", "/bin"].map(String::from));
    if inherit_host_path
        && let Some(host_path) = ambient.non_empty("PATH")
    {
        path_parts.push(host_path.to_string());
    }

    let mut env = EnvMap::new();
    env.insert("HOME".into(), home.to_string_lossy().into_owned());
    env.insert("TMPDIR".into(), "/tmp".into());
    env.insert("SHELL".into(), shell.unwrap_or(DEFAULT_SHELL).to_string());
    env.insert("PATH".into(), path_parts.join(":"));
    env
}

/// Parse `KEY=VALUE` entries, splitting at the first `=`.
///
/// Entries without `=` or with an empty key are skipped; empty values are kept.
pub fn parse_custom_env<S: AsRef<str>>(entries: &[S]) -> EnvMap {
    entries
        .iter()
        .filter_map(|entry| {
            let (key, value) = entry.as_ref().split_once('=')?;
            (!key.is_empty()).then(|| (key.to_string(), value.to_string()))
        })
        .collect()
}

/// Apply custom overrides on top of `base`. A `PATH` override replaces the
/// base `PATH` entirely.
pub fn merge_custom_env<S: AsRef<str>>(mut base: EnvMap, entries: &[S]) -> EnvMap {
    base.extend(parse_custom_env(entries));
    base
}

/// Identity variables for a new agent, chaining to any agent that launched us.
pub fn agent_identity_env(agent_id: &str, ambient: &AmbientEnv) -> EnvMap {
    let mut env = EnvMap::new();
    env.insert(AGENT_ID_ENV.into(), agent_id.to_string());
    if let Some(parent) = ambient.non_empty(AGENT_ID_ENV) {
        env.insert(PARENT_AGENT_ID_ENV.into(), parent.to_string());
    }
    env
}

/// Static provider variables plus the auth token, when the provider needs one.
pub fn provider_environment(
    provider: &ModelProvider,
    ambient: &AmbientEnv,
) -> Result<EnvMap, MissingAuthToken> {
    let mut env: EnvMap = provider
        .environment
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    if let Some(token_var) = provider.auth_token_env {
        let token = ambient
            .non_empty(token_var)
            .ok_or_else(|| MissingAuthToken(token_var.to_string()))?;
        if env.contains_key(ANTHROPIC_BASE_URL) {
            env.insert(AUTH_TOKEN_TARGET.into(), token.to_string());
        }
    }
    Ok(env)
}

/// Drop keys that a later layer in `overrides` will supply.
pub fn without_overridden(mut env: EnvMap, overrides: &EnvMap) -> EnvMap {
    env.retain(|k, _| !overrides.contains_key(k));
    env
}

pub fn is_reserved(key: &str) -> bool {
    BASH_RESERVED_ENV_VARS.contains(&key)
}

/// Drop variables bash refuses to (re)assign.
pub fn filter_reserved(env: EnvMap) -> EnvMap {
    env.into_iter().filter(|(k, _)| !is_reserved(k)).collect()
}

/// `--setenv K V` triples for bubblewrap, in key order.
pub fn to_setenv_args(env: &EnvMap) -> Vec<String> {
    env.iter()
        .flat_map(|(k, v)| ["--setenv".to_string(), k.clone(), v.clone()])
        .collect()
}

/// `-e K=V` pairs for docker, in key order.
pub fn to_docker_args(env: &EnvMap) -> Vec<String> {
    env.iter()
        .flat_map(|(k, v)| ["-e".to_string(), format!("{}={}", k, v)])
        .collect()
}
