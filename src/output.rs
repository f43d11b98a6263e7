//! User-facing status lines on stderr.
//!
//! The agent owns stdout, so everything we print goes to stderr.

use console::style;

pub fn info(msg: &str) {
    eprintln!("{} {}", style("[info]").cyan(), msg);
}

pub fn success(msg: &str) {
    eprintln!("{} {}", style("✔").green(), msg);
}

pub fn warning(msg: &str) {
    eprintln!("{} {}", style("[warn]").yellow().bold(), msg);
}

pub fn error(msg: &str) {
    eprintln!("{} {}", style("[error]").red().bold(), msg);
}

/// Dimmed diagnostic line, printed only under `--debug`.
pub fn debug(msg: &str) {
    eprintln!("{} {}", style("[debug]").dim(), style(msg).dim());
}
