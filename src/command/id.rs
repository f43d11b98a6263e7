use anyhow::Result;

use crate::agent;

pub fn run() -> Result<()> {
    println!("{}", agent::generate_agent_id()?);
    Ok(())
}
