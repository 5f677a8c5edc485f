use anyhow::{Context, Result};
use clap::{Args as ClapArgs, ValueEnum};
use tracing::instrument;

use celltree_core::node::CollectionKind;

use super::open;
use crate::state::Workspace;

#[derive(ClapArgs)]
pub struct Args {
    /// Path of the new collection (/cell/box/path)
    pub path: String,

    /// Kind of collection to create
    #[arg(long, value_enum, default_value_t = Kind::Webdav)]
    pub kind: Kind,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Kind {
    Webdav,
    Odata,
    Service,
}

impl From<Kind> for CollectionKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Webdav => CollectionKind::WebDav,
            Kind::Odata => CollectionKind::OData,
            Kind::Service => CollectionKind::Service,
        }
    }
}

#[instrument(level = "info", name = "cmd::mkcol", skip_all, fields(path = %args.path))]
pub async fn execute(workspace: &Workspace, args: &Args) -> Result<()> {
    let mut collection = open(workspace, &args.path).await?;
    collection
        .mkcol(args.kind.into())
        .await
        .with_context(|| format!("Failed to create collection {}", args.path))?;
    Ok(())
}
