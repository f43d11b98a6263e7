//! `agent-sandbox env`: inspect and warm the Nix environment cache.

use std::time::Duration;

use anyhow::Result;

use super::args::EnvSpecArgs;
use crate::envcache::{BuildOptions, EnvCache, EnvSpec, ResolvedEnv};
use crate::output;
use crate::sandbox::HostContext;

fn cache_and_spec(args: &EnvSpecArgs) -> Result<(EnvCache, EnvSpec)> {
    let host = HostContext::capture()?;
    let spec = EnvSpec::new(args.pin.as_deref(), args.packages.iter().cloned());
    Ok((host.env_cache, spec))
}

fn print_resolved(resolved: &ResolvedEnv) {
    println!("env_id: {}", resolved.env_id);
    println!("spec: {}", resolved.spec_path.display());
    println!("out_link: {}", resolved.out_link.display());
    println!("ready: {}", resolved.ready);
}

pub fn resolve(args: &EnvSpecArgs) -> Result<i32> {
    let (cache, spec) = cache_and_spec(args)?;
    print_resolved(&cache.resolve(&spec)?);
    Ok(0)
}

pub fn build(args: &EnvSpecArgs, timeout_secs: Option<u64>, verbose: bool) -> Result<i32> {
    let (cache, spec) = cache_and_spec(args)?;
    let mut options = BuildOptions {
        verbose,
        ..BuildOptions::default()
    };
    if let Some(secs) = timeout_secs {
        options.timeout = Duration::from_secs(secs);
    }

    let (resolved, result) = cache.build(&spec, &options)?;
    print_resolved(&resolved);
    match (result.success, &result.store_path) {
        (true, Some(store_path)) => {
            println!("store_path: {}", store_path.display());
            if result.duration_ms > 0 {
                output::success(&format!("Built in {:.1}s", result.duration_ms as f64 / 1000.0));
            }
            Ok(0)
        }
        _ => {
            output::error(&format!(
                "Failed to build Nix environment: {}",
                result.error.as_deref().unwrap_or("unknown error")
            ));
            Ok(1)
        }
    }
}
