//! ACL command - show or replace the ACL of a resource.
//!
//! A path naming only a Cell (`/alice`) addresses the Cell-level ACL, whose
//! role hrefs are relative to the Cell's default box.
//!
//! ACLs are exchanged as JSON:
//!
//! ```json
//! {
//!   "require_schema_authz": "public",
//!   "aces": [
//!     { "principal": { "href": "editor" }, "privileges": ["write"] },
//!     { "principal": "all", "privileges": ["read"] }
//!   ]
//! }
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Subcommand};
use tokio::io::AsyncReadExt;
use tracing::instrument;

use celltree_core::acl::Acl;

use super::open;
use crate::state::Workspace;

#[derive(ClapArgs)]
pub struct Args {
    #[command(subcommand)]
    pub command: AclCommand,
}

#[derive(Subcommand)]
pub enum AclCommand {
    /// Print the ACL as JSON
    Get {
        /// Resource path (/cell/box/path), or /cell for the Cell ACL
        path: String,
    },

    /// Replace the ACL from a JSON document
    Set {
        /// Resource path (/cell/box/path), or /cell for the Cell ACL
        path: String,

        /// JSON file (default: stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
}

/// The Cell name when `raw` names a Cell and nothing below it.
fn cell_only(raw: &str) -> Option<&str> {
    let name = raw.trim_matches('/');
    (!name.is_empty() && !name.contains('/')).then_some(name)
}

impl Args {
    pub fn modifies_state(&self) -> bool {
        matches!(self.command, AclCommand::Set { .. })
    }
}

#[instrument(level = "info", name = "cmd::acl", skip_all)]
pub async fn execute(workspace: &Workspace, args: &Args) -> Result<()> {
    match args.command {
        AclCommand::Get { ref path } => {
            let acl = match cell_only(path) {
                Some(cell) => workspace
                    .engine()
                    .cell_acl(cell)
                    .await
                    .with_context(|| format!("Failed to read ACL of Cell {cell}"))?,
                None => open(workspace, path)
                    .await?
                    .acl()
                    .await
                    .with_context(|| format!("Failed to read ACL of {path}"))?,
            };
            println!("{}", serde_json::to_string_pretty(&acl)?);
        }
        AclCommand::Set { ref path, ref input } => {
            let raw = match input {
                Some(input) => tokio::fs::read_to_string(input)
                    .await
                    .with_context(|| format!("Failed to read {}", input.display()))?,
                None => {
                    let mut buf = String::new();
                    tokio::io::stdin()
                        .read_to_string(&mut buf)
                        .await
                        .context("Failed to read stdin")?;
                    buf
                }
            };
            let acl: Acl = serde_json::from_str(&raw).context("ACL is not valid JSON")?;
            if let Some(cell) = cell_only(path) {
                return workspace
                    .engine()
                    .set_cell_acl(cell, &acl)
                    .await
                    .with_context(|| format!("Failed to set ACL of Cell {cell}"));
            }
            let mut resource = open(workspace, path).await?;
            resource
                .set_acl(&acl)
                .await
                .with_context(|| format!("Failed to set ACL of {path}"))?;
        }
    }
    Ok(())
}
