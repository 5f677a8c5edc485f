pub mod acl;
pub mod boxes;
pub mod cell;
pub mod get;
pub mod init;
pub mod ls;
pub mod mkcol;
pub mod mv;
pub mod proppatch;
pub mod put;
pub mod rm;
pub mod role;

use anyhow::{Context, Result};

use celltree_core::{ResourceComponent, ResourcePath};

use crate::state::Workspace;

/// Parse a `/cell/box/path` argument; the leading slash is optional.
pub fn parse_path(raw: &str) -> Result<ResourcePath> {
    let normalized = if raw.starts_with('/') {
        raw.to_string()
    } else {
        format!("/{raw}")
    };
    ResourcePath::parse(&normalized).with_context(|| format!("Invalid resource path: {raw}"))
}

/// Open the component for a path argument.
pub async fn open(workspace: &Workspace, raw: &str) -> Result<ResourceComponent> {
    let path = parse_path(raw)?;
    workspace
        .engine()
        .open(&path)
        .await
        .with_context(|| format!("Failed to open {path}"))
}
