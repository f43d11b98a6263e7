mod agent;
mod cli;
mod cmd;
mod command;
mod config;
mod envcache;
mod executor;
mod logger;
mod output;
mod sandbox;
mod shell;
mod spinner;
mod terminal;

use clap::Parser;
use tracing::{error, info};

use crate::sandbox::env::MissingAuthToken;

fn main() {
    let cli = cli::Cli::parse();
    if let Err(err) = logger::init(cli.debug()) {
        eprintln!("Warning: logging disabled: {:#}", err);
    }
    info!(args = ?std::env::args().collect::<Vec<_>>(), "agent-sandbox start");

    let code = match cli::run(cli) {
        Ok(code) => {
            info!(code, "agent-sandbox finished");
            code
        }
        Err(err) => {
            error!(error = ?err, "agent-sandbox failed");
            output::error(&format!("{:#}", err));
            if let Some(missing) = err.downcast_ref::<MissingAuthToken>() {
                output::info(&format!("Export {} before using this provider", missing.0));
            }
            1
        }
    };
    std::process::exit(code);
}
