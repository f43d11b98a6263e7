use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::command::{self, args::EnvSpecArgs, args::RunArgs};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "agent-sandbox")]
#[command(about = "Run AI coding agents inside a sandbox")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch an agent in the selected sandbox
    Run(RunArgs),

    /// Inspect or build cached Nix environments
    Env {
        #[command(subcommand)]
        command: EnvCommands,
    },

    /// Print a fresh agent identifier
    Id,
}

#[derive(Subcommand)]
enum EnvCommands {
    /// Show the cache entry a package set maps to
    Resolve(EnvSpecArgs),

    /// Build (or reuse) the environment for a package set
    Build {
        #[command(flatten)]
        spec: EnvSpecArgs,

        /// Give up on the build after this many seconds
        #[arg(long, value_name = "SECONDS")]
        timeout: Option<u64>,

        /// Stream nix-build output
        #[arg(short, long)]
        verbose: bool,
    },
}

impl Cli {
    /// Whether the invocation asked for debug logging.
    pub fn debug(&self) -> bool {
        matches!(&self.command, Commands::Run(args) if args.debug)
    }
}

/// Dispatch a parsed command line. Returns the process exit code.
pub fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Run(args) => command::run::run(args),
        Commands::Env { command: sub } => match sub {
            EnvCommands::Resolve(spec) => command::env::resolve(&spec),
            EnvCommands::Build {
                spec,
                timeout,
                verbose,
            } => command::env::build(&spec, timeout, verbose),
        },
        Commands::Id => command::id::run().map(|()| 0),
    }
}
