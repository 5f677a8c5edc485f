use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use tracing::instrument;

use celltree_core::auth::AccessContext;

use super::{open, parse_path};
use crate::state::Workspace;

#[derive(ClapArgs)]
pub struct Args {
    /// Source path
    pub source: String,

    /// Destination path (same box)
    pub dest: String,

    /// Replace an existing destination
    #[arg(short, long)]
    pub overwrite: bool,

    /// Only move if the source ETag matches
    #[arg(long)]
    pub if_match: Option<String>,
}

#[instrument(level = "info", name = "cmd::mv", skip_all, fields(source = %args.source, dest = %args.dest))]
pub async fn execute(workspace: &Workspace, args: &Args) -> Result<()> {
    let dest = parse_path(&args.dest)?;
    let mut source = open(workspace, &args.source).await?;
    let outcome = source
        .move_to(&dest, args.overwrite, args.if_match.as_deref(), &AccessContext::Owner)
        .await
        .with_context(|| format!("Failed to move {} to {}", args.source, args.dest))?;
    println!("{} {}", outcome.status().as_u16(), outcome.location);
    Ok(())
}
