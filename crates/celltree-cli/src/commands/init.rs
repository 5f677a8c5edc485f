use std::path::Path;

use anyhow::Result;
use clap::Args as ClapArgs;

use crate::state::Workspace;

#[derive(ClapArgs, Clone)]
pub struct Args {}

pub async fn execute(state_dir: &Path, _args: &Args, quiet: bool) -> Result<()> {
    Workspace::init(state_dir).await?;
    if !quiet {
        println!("Initialized celltree state at: {}", state_dir.display());
    }
    Ok(())
}
