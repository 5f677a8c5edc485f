use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use tracing::instrument;

use celltree_core::DavError;

use super::open;
use crate::state::Workspace;

#[derive(ClapArgs)]
pub struct Args {
    /// File path (/cell/box/path)
    pub path: String,

    /// Byte range, e.g. `bytes=0-99`
    #[arg(long)]
    pub range: Option<String>,

    /// Skip the body when the ETag still matches
    #[arg(long)]
    pub if_none_match: Option<String>,

    /// Write to a local file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Print status and headers to stderr
    #[arg(short = 'i', long)]
    pub include_headers: bool,
}

#[instrument(level = "info", name = "cmd::get", skip_all, fields(path = %args.path))]
pub async fn execute(workspace: &Workspace, args: &Args) -> Result<()> {
    let mut file = open(workspace, &args.path).await?;
    let response = match file.get(args.range.as_deref(), args.if_none_match.as_deref()).await {
        Ok(response) => response,
        Err(DavError::NotModified { .. }) => {
            if args.include_headers {
                eprintln!("304 Not Modified");
            }
            return Ok(());
        }
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", args.path)),
    };

    if args.include_headers {
        eprintln!(
            "{} {}",
            response.status.as_u16(),
            response.status.canonical_reason().unwrap_or_default()
        );
        eprintln!("ETag: {}", response.etag);
        eprintln!("Content-Type: {}", response.content_type);
        eprintln!("Content-Length: {}", response.body.len());
        if let Some(ref range) = response.content_range {
            eprintln!("Content-Range: {range}");
        }
    }

    match args.output {
        Some(ref output) => tokio::fs::write(output, &response.body)
            .await
            .with_context(|| format!("Failed to write {}", output.display()))?,
        None => io::stdout().write_all(&response.body)?,
    }
    Ok(())
}
