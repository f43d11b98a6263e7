use anyhow::{Context, Result, anyhow};
use minijinja::{AutoEscape, Environment, context};

use super::{EnvSpec, find_pin};

const NIX_EXPRESSION_TEMPLATE: &str = r#"# Auto-generated agent environment - do not edit
# EnvID: {{ env_id }}
# Pin: {{ pin }}

{ pkgs ? import (fetchTarball "{{ tarball_url }}") {
    config.allowUnfree = true;
  }
}:

pkgs.buildEnv {
  name = "agent-env-{{ env_id }}";
  paths = with pkgs; [
{% for pkg in packages %}    {{ pkg }}
{% endfor %}  ];
}
"#;

fn template_env() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_auto_escape_callback(|_| AutoEscape::None);
    env.set_keep_trailing_newline(true);
    env
}

/// Render the `buildEnv` expression for a normalized, validated spec.
pub fn render_nix_expression(normalized: &EnvSpec, env_id: &str) -> Result<String> {
    let pin = find_pin(normalized.pin_name())
        .ok_or_else(|| anyhow!("Unknown nixpkgs pin: {}", normalized.pin_name()))?;

    template_env()
        .render_str(
            NIX_EXPRESSION_TEMPLATE,
            context! {
                env_id => env_id,
                pin => pin.name,
                tarball_url => pin.tarball_url(),
                packages => &normalized.packages,
            },
        )
        .context("Failed to render Nix expression")
}
