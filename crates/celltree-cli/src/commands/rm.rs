use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use tracing::instrument;

use celltree_core::DavError;

use super::open;
use crate::state::Workspace;

#[derive(ClapArgs)]
pub struct Args {
    /// Path to remove
    pub path: String,

    /// Only delete if the current ETag matches
    #[arg(long)]
    pub if_match: Option<String>,

    /// Ignore nonexistent resources
    #[arg(short, long)]
    pub force: bool,
}

#[instrument(level = "info", name = "cmd::rm", skip_all, fields(path = %args.path))]
pub async fn execute(workspace: &Workspace, args: &Args) -> Result<()> {
    let mut resource = open(workspace, &args.path).await?;
    match resource.delete(args.if_match.as_deref()).await {
        Ok(()) => Ok(()),
        Err(DavError::NotFound { .. }) if args.force => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to delete {}", args.path)),
    }
}
