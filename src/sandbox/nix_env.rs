//! Nix package-set sandbox: a cached `buildEnv` mounted at `/env` and
//! entered with bubblewrap.
//!
//! Unlike the overlay backend the host root is not visible; the sandbox sees
//! the Nix store, the built environment, per-agent scratch directories and
//! the application mounts.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::{debug, warn};

use super::bwrap::UNSHARE_FLAGS;
use super::env::{merge_custom_env, sandbox_environment, to_setenv_args, without_overridden};
use super::mounts::{plan_application_mounts, to_bwrap_args};
use super::{
    HostContext, Prepared, SandboxBackend, SandboxCommand, agent_env, command, prepare_mount_points,
    process_env,
};
use crate::agent::AgentConfig;
use crate::config::{SandboxConfig, SandboxMethod};
use crate::envcache::{BuildOptions, DEFAULT_BASE_PACKAGES, DEFAULT_NIXPKGS_PIN, EnvSpec};
use crate::{output, spinner};

const IMAGE_PREFIX: &str = "nix:";
const ENV_MOUNT: &str = "/env";
const ENV_BIN: &str = "/env/bin";
const ENV_OUT_PLACEHOLDER: &str = "$ENV_OUT";
const SSL_CERT_FILE: &str = "/etc/ssl/certs/ca-certificates.crt";
const HOST_FILES: &[&str] = &["/etc/ssl/certs", "/etc/resolv.conf"];

/// Named package collections selectable with `nix:sets=...`.
pub const PACKAGE_SETS: &[(&str, &[&str])] = &[
    (
        "nodejs",
        &[
            "nodejs_24",
            "python312",
            "gnumake",
            "gcc",
            "gnused",
            "gawk",
            "binutils",
        ],
    ),
    ("python", &["python312", "python312Packages.pip"]),
    ("go", &["go"]),
    ("rust", &["rustc", "cargo"]),
    ("kubernetes", &["kubectl", "kubernetes-helm", "k9s"]),
    ("terraform", &["terraform", "terragrunt"]),
    ("docker", &["docker-client"]),
    ("aws", &["awscli2"]),
    ("gcp", &["google-cloud-sdk"]),
];

/// Package selection parsed from a `nix:` image spec.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NixSandboxConfig {
    /// Added to the defaults, or used alone when `no_defaults` is set
    pub packages: Option<Vec<String>>,
    pub pin: Option<String>,
    pub no_defaults: bool,
    /// Set and preset names that matched nothing
    pub unknown: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct NixJsonSpec {
    #[serde(default)]
    sets: Option<String>,
    #[serde(default)]
    packages: Option<PackageList>,
    #[serde(default)]
    nixpkgs_pin: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PackageList {
    Joined(String),
    List(Vec<String>),
}

fn split_list(list: &str) -> impl Iterator<Item = String> + '_ {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Expand set names into packages. Unknown names are collected, not fatal.
fn expand_package_sets(names: &str, unknown: &mut Vec<String>) -> Vec<String> {
    let mut packages = Vec::new();
    for name in split_list(names) {
        match PACKAGE_SETS.iter().find(|(set, _)| *set == name) {
            Some((_, members)) => packages.extend(members.iter().map(|p| p.to_string())),
            None => {
                warn!(set = %name, "nix:unknown package set");
                unknown.push(name);
            }
        }
    }
    packages
}

/// Parse a `nix:` image spec.
///
/// Accepted forms:
/// - `nix:preset=claude` defaults only
/// - `nix:sets=nodejs,python` sets added to the defaults
/// - `nix:packages=nodejs_24,git` exactly these packages
/// - `nix:{"sets":"go","packages":["jq"],"nixpkgs_pin":"nixos-24.11"}`
///
/// Anything else, including a missing image, means the defaults.
pub fn parse_nix_image(image: Option<&str>) -> NixSandboxConfig {
    let mut config = NixSandboxConfig::default();
    let Some(spec) = image.and_then(|i| i.strip_prefix(IMAGE_PREFIX)) else {
        return config;
    };

    if spec.starts_with('{') {
        match serde_json::from_str::<NixJsonSpec>(spec) {
            Ok(json) => {
                let mut packages = Vec::new();
                if let Some(sets) = &json.sets {
                    packages.extend(expand_package_sets(sets, &mut config.unknown));
                }
                match json.packages {
                    Some(PackageList::Joined(list)) => packages.extend(split_list(&list)),
                    Some(PackageList::List(list)) => packages.extend(list),
                    None => {}
                }
                if !packages.is_empty() {
                    config.packages = Some(packages);
                }
                config.pin = json.nixpkgs_pin;
            }
            Err(e) => warn!(error = %e, "nix:invalid json image spec, using defaults"),
        }
        return config;
    }

    if let Some(preset) = spec.strip_prefix("preset=") {
        if preset != "claude" {
            config.unknown.push(preset.to_string());
        }
    } else if let Some(sets) = spec.strip_prefix("sets=") {
        config.packages = Some(expand_package_sets(sets, &mut config.unknown));
    } else if let Some(packages) = spec.strip_prefix("packages=") {
        config.packages = Some(split_list(packages).collect());
        config.no_defaults = true;
    }
    config
}

/// The environment to build for `agent`.
///
/// With `no_defaults` the listed packages are used alone, which also leaves
/// out the agent's own package.
pub fn build_env_spec(nix: &NixSandboxConfig, agent: &AgentConfig) -> EnvSpec {
    let packages = match (&nix.packages, nix.no_defaults) {
        (Some(packages), true) => {
            debug!(agent = agent.binary, "nix:no-defaults, agent package not added");
            packages.clone()
        }
        (extra, _) => {
            let mut packages: Vec<String> =
                DEFAULT_BASE_PACKAGES.iter().map(|p| p.to_string()).collect();
            packages.extend(agent.nix_package.map(String::from));
            packages.extend(extra.iter().flatten().cloned());
            packages
        }
    };
    EnvSpec {
        pin: Some(
            nix.pin
                .clone()
                .unwrap_or_else(|| DEFAULT_NIXPKGS_PIN.to_string()),
        ),
        packages,
    }
}

fn network_flag(enabled: bool) -> &'static str {
    if enabled { "--share-net" } else { "--unshare-net" }
}

fn nix_spec_for(config: &SandboxConfig) -> (NixSandboxConfig, EnvSpec) {
    let nix = parse_nix_image(config.image.as_deref());
    let spec = build_env_spec(&nix, config.agent);
    (nix, spec)
}

fn warn_unknown(nix: &NixSandboxConfig) {
    for name in &nix.unknown {
        output::warning(&format!(
            "Unknown package set or preset \"{}\", skipping",
            name
        ));
    }
}

pub(super) struct NixBackend;

impl SandboxBackend for NixBackend {
    fn method(&self) -> SandboxMethod {
        SandboxMethod::Nix
    }

    fn is_available(&self, _config: &SandboxConfig) -> bool {
        let checks = [
            (which::which("nix-build").is_ok(), "nix-build is not available"),
            (which::which("bwrap").is_ok(), "bubblewrap (bwrap) is not available"),
            (Path::new("/nix/store").is_dir(), "/nix/store does not exist"),
        ];
        for (_, message) in checks.iter().filter(|(ok, _)| !ok) {
            debug!(reason = message, "nix:unavailable");
            output::warning(message);
        }
        checks.iter().all(|(ok, _)| *ok)
    }

    fn prepare(&self, config: &SandboxConfig, host: &HostContext) -> Result<Prepared> {
        let (nix, spec) = nix_spec_for(config);
        warn_unknown(&nix);
        if config.verbose {
            output::info(&format!("Packages: {}", spec.packages.join(", ")));
            output::info(&format!("Nixpkgs pin: {}", spec.pin_name()));
        }

        let options = BuildOptions {
            verbose: config.verbose,
            debug: config.debug,
            ..BuildOptions::default()
        };
        let build = || -> Result<PathBuf> {
            let (resolved, result) = host.env_cache.build(&spec, &options)?;
            if !result.success {
                bail!(
                    "Failed to build Nix environment: {}",
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
            fs::canonicalize(&resolved.out_link).with_context(|| {
                format!("Failed to resolve {}", resolved.out_link.display())
            })
        };
        // Verbose builds stream nix-build output, which a spinner would garble
        let env_out = if config.verbose {
            build()?
        } else {
            spinner::with_spinner("Building Nix environment", build)?
        };
        if config.verbose {
            output::info(&format!("Environment ready: {}", env_out.display()));
        }

        let dirs = host.env_cache.ensure_agent_dirs(&config.agent_id)?;
        prepare_mount_points(&dirs.home, &host.real_home, config)?;
        if config.debug {
            output::debug(&format!("Agent dirs: {:?}", dirs));
        }
        Ok(Prepared {
            env_out: Some(env_out),
        })
    }

    fn command(
        &self,
        config: &SandboxConfig,
        host: &HostContext,
        prepared: &Prepared,
    ) -> Result<SandboxCommand> {
        let env_out = match &prepared.env_out {
            Some(path) => path.to_string_lossy().into_owned(),
            None => ready_env_out(config, host)?
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_else(|| ENV_OUT_PLACEHOLDER.to_string()),
        };
        let injected = agent_env(config, &host.ambient)?;
        let args = build_nix_bwrap_args(config, host, &env_out, &injected);
        Ok(SandboxCommand {
            program: "bwrap".to_string(),
            args,
            env: process_env(&host.ambient, injected),
            cwd: config.work_dir.clone(),
            env_prefix: Vec::new(),
        })
    }

    fn dry_run_notes(&self, config: &SandboxConfig, host: &HostContext) -> Result<Vec<String>> {
        let (nix, spec) = nix_spec_for(config);
        warn_unknown(&nix);
        let resolved = host.env_cache.resolve(&spec)?;

        let mut notes = vec![
            format!("Packages: {}", spec.packages.join(", ")),
            format!("Nixpkgs pin: {}", spec.pin_name()),
            format!("Env id: {}", resolved.env_id),
        ];
        if resolved.ready {
            notes.push(format!("Environment ready: {}", resolved.out_link.display()));
        } else {
            notes.push(format!(
                "Would build: nix-build {} -o {}",
                resolved.spec_path.display(),
                resolved.out_link.display()
            ));
            notes.push(format!(
                "{} is the store path {} points to after the build",
                ENV_OUT_PLACEHOLDER,
                resolved.out_link.display()
            ));
        }
        Ok(notes)
    }
}

/// Store path of the environment when it is already built.
fn ready_env_out(config: &SandboxConfig, host: &HostContext) -> Result<Option<PathBuf>> {
    let (_, spec) = nix_spec_for(config);
    let resolved = host.env_cache.resolve(&spec)?;
    if !resolved.ready {
        return Ok(None);
    }
    Ok(fs::canonicalize(&resolved.out_link).ok())
}

fn build_nix_bwrap_args(
    config: &SandboxConfig,
    host: &HostContext,
    env_out: &str,
    injected: &super::env::EnvMap,
) -> Vec<String> {
    let real_home = &host.real_home;
    let dirs = host.env_cache.agent_dirs(&config.agent_id);
    let store = host.env_cache.store_root().to_string_lossy().into_owned();
    let path_str = |p: &Path| p.to_string_lossy().into_owned();

    let mut args: Vec<String> = vec![
        "--ro-bind".into(),
        store.clone(),
        store,
        "--ro-bind".into(),
        env_out.to_string(),
        ENV_MOUNT.into(),
        "--bind".into(),
        path_str(&dirs.work),
        "/work".into(),
        "--bind".into(),
        path_str(&dirs.tmp),
        "/tmp".into(),
        "--bind".into(),
        path_str(&dirs.home),
        path_str(real_home),
    ];
    args.extend(to_bwrap_args(&plan_application_mounts(
        &config.work_dir,
        real_home,
        real_home,
        &config.bind_paths,
        &config.ro_bind_paths,
    )));
    args.extend(["--proc", "/proc", "--dev", "/dev"].map(String::from));
    args.extend(UNSHARE_FLAGS.iter().map(|f| f.to_string()));
    args.push(network_flag(config.network).to_string());

    // Host PATH is meaningless here: only the store and /env are visible
    let mut base_env = sandbox_environment(
        real_home,
        &[ENV_BIN],
        false,
        Some("/env/bin/bash"),
        &host.ambient,
    );
    base_env.insert("NIX_SSL_CERT_FILE".into(), SSL_CERT_FILE.into());
    let sandbox_env = merge_custom_env(base_env, &config.custom_env);
    args.extend(to_setenv_args(&without_overridden(sandbox_env, injected)));

    args.extend(["--symlink", "/env/bin/env", "/usr/bin/env"].map(String::from));
    for file in HOST_FILES.iter().filter(|f| Path::new(f).exists()) {
        args.extend(["--ro-bind", file, file].map(String::from));
    }

    args.push("--chdir".into());
    args.push(path_str(&config.work_dir));
    args.push("--die-with-parent".into());
    args.push("--".into());
    args.extend(command::agent_command(config, Some(ENV_BIN)));
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{CLAUDE, OPENCODE};
    use crate::envcache::EnvCache;
    use crate::sandbox::test_support::{host, position};
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_missing_or_foreign_image_is_default() {
        assert_eq!(parse_nix_image(None), NixSandboxConfig::default());
        assert_eq!(
            parse_nix_image(Some("node:trixie-slim")),
            NixSandboxConfig::default()
        );
    }

    #[test]
    fn test_parse_preset() {
        assert_eq!(
            parse_nix_image(Some("nix:preset=claude")),
            NixSandboxConfig::default()
        );
        assert_eq!(
            parse_nix_image(Some("nix:preset=emacs")).unknown,
            strings(&["emacs"])
        );
    }

    #[test]
    fn test_parse_sets_expands_and_collects_unknown() {
        let nix = parse_nix_image(Some("nix:sets=go, rust,bogus"));
        assert_eq!(nix.packages, Some(strings(&["go", "rustc", "cargo"])));
        assert!(!nix.no_defaults);
        assert_eq!(nix.unknown, strings(&["bogus"]));
    }

    #[test]
    fn test_parse_packages_means_no_defaults() {
        let nix = parse_nix_image(Some("nix:packages=nodejs_24,git"));
        assert_eq!(nix.packages, Some(strings(&["nodejs_24", "git"])));
        assert!(nix.no_defaults);
    }

    #[test]
    fn test_parse_json_forms() {
        let nix = parse_nix_image(Some(
            r#"nix:{"sets":"go","packages":"jq,yq","nixpkgs_pin":"nixos-24.11"}"#,
        ));
        assert_eq!(nix.packages, Some(strings(&["go", "jq", "yq"])));
        assert_eq!(nix.pin.as_deref(), Some("nixos-24.11"));
        assert!(!nix.no_defaults);

        let nix = parse_nix_image(Some(r#"nix:{"packages":["nodejs_24"]}"#));
        assert_eq!(nix.packages, Some(strings(&["nodejs_24"])));
        assert_eq!(nix.pin, None);
    }

    #[test]
    fn test_parse_invalid_json_falls_back_to_defaults() {
        assert_eq!(
            parse_nix_image(Some("nix:{not json")),
            NixSandboxConfig::default()
        );
    }

    #[test]
    fn test_build_env_spec_defaults_include_agent() {
        let spec = build_env_spec(&NixSandboxConfig::default(), &CLAUDE);
        assert_eq!(spec.pin.as_deref(), Some(DEFAULT_NIXPKGS_PIN));
        assert!(spec.packages.starts_with(&strings(DEFAULT_BASE_PACKAGES)));
        assert_eq!(spec.packages.last().map(String::as_str), Some("claude-code"));
    }

    #[test]
    fn test_build_env_spec_sets_added_after_agent() {
        let nix = parse_nix_image(Some("nix:sets=go"));
        let spec = build_env_spec(&nix, &OPENCODE);
        let tail: Vec<&str> = spec.packages.iter().rev().take(2).map(String::as_str).collect();
        assert_eq!(tail, vec!["go", "opencode"]);
    }

    #[test]
    fn test_build_env_spec_no_defaults_drops_agent_package() {
        let nix = parse_nix_image(Some("nix:packages=bash,git"));
        let spec = build_env_spec(&nix, &CLAUDE);
        assert_eq!(spec.packages, strings(&["bash", "git"]));
    }

    fn nix_config(work: &Path) -> SandboxConfig {
        let mut config = SandboxConfig::new("abc1234", work);
        config.method = SandboxMethod::Nix;
        config
    }

    #[test]
    fn test_command_with_built_env() {
        let home = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let host = host(home.path(), &[("PATH", "/host/bin")]);
        let mut config = nix_config(work.path());
        config.network = false;
        let prepared = Prepared {
            env_out: Some(PathBuf::from("/nix/store/abc-agent-env")),
        };

        let cmd = NixBackend.command(&config, &host, &prepared).unwrap();
        let args = &cmd.args;
        assert_eq!(cmd.program, "bwrap");
        assert_eq!(
            &args[..6],
            &strings(&[
                "--ro-bind",
                "/nix/store",
                "/nix/store",
                "--ro-bind",
                "/nix/store/abc-agent-env",
                "/env",
            ])
        );

        let dirs = host.env_cache.agent_dirs("abc1234");
        assert_eq!(args[7], dirs.work.to_string_lossy());
        assert_eq!(args[8], "/work");
        assert_eq!(args[13], dirs.home.to_string_lossy());
        assert_eq!(args[14], home.path().to_string_lossy());

        assert!(args.contains(&"--unshare-net".to_string()));
        assert!(position(args, "--proc") < position(args, "--unshare-uts"));

        let path = args
            .windows(3)
            .find(|w| w[0] == "--setenv" && w[1] == "PATH")
            .map(|w| w[2].clone())
            .unwrap();
        assert!(path.starts_with("/env/bin:"));
        assert!(!path.contains("/host/bin"));
        assert!(
            args.windows(3)
                .any(|w| w[0] == "--setenv" && w[1] == "SHELL" && w[2] == "/env/bin/bash")
        );
        assert!(args.windows(3).any(|w| w[0] == "--symlink" && w[2] == "/usr/bin/env"));

        let sep = position(args, "--");
        assert_eq!(args[sep - 1], "--die-with-parent");
        assert_eq!(
            &args[sep + 1..],
            &strings(&["/env/bin/claude", "--permission-mode", "bypassPermissions"])
        );
    }

    #[test]
    fn test_dry_run_uses_placeholder_when_not_built() {
        let home = TempDir::new().unwrap();
        let host = host(home.path(), &[]);
        let config = nix_config(home.path());

        let cmd = NixBackend
            .command(&config, &host, &Prepared::default())
            .unwrap();
        assert_eq!(cmd.args[4], ENV_OUT_PLACEHOLDER);
        assert!(cmd.display().contains("'$ENV_OUT'"));
        assert!(!host.env_cache.root().exists());

        let notes = NixBackend.dry_run_notes(&config, &host).unwrap();
        assert!(notes.iter().any(|n| n.starts_with("Env id: ")));
        assert!(notes.iter().any(|n| n.starts_with("Would build: nix-build ")));
    }

    #[test]
    fn test_dry_run_uses_ready_env() {
        let home = TempDir::new().unwrap();
        let store = TempDir::new().unwrap();
        let built = store.path().join("abc-agent-env");
        fs::create_dir(&built).unwrap();

        let mut host = host(home.path(), &[]);
        host.env_cache = EnvCache::with_root(home.path().join("cache")).with_store_root(store.path());
        let config = nix_config(home.path());

        let (_, spec) = nix_spec_for(&config);
        let resolved = host.env_cache.resolve(&spec).unwrap();
        fs::create_dir_all(resolved.out_link.parent().unwrap()).unwrap();
        symlink(&built, &resolved.out_link).unwrap();

        let cmd = NixBackend
            .command(&config, &host, &Prepared::default())
            .unwrap();
        assert_eq!(
            PathBuf::from(&cmd.args[4]),
            fs::canonicalize(&built).unwrap()
        );
        let notes = NixBackend.dry_run_notes(&config, &host).unwrap();
        assert!(notes.iter().any(|n| n.starts_with("Environment ready: ")));
    }

    #[test]
    fn test_invalid_package_is_an_error() {
        let home = TempDir::new().unwrap();
        let host = host(home.path(), &[]);
        let mut config = nix_config(home.path());
        config.image = Some("nix:packages=git;rm".into());

        assert!(NixBackend.dry_run_notes(&config, &host).is_err());
        assert!(
            NixBackend
                .command(&config, &host, &Prepared::default())
                .is_err()
        );
    }
}
