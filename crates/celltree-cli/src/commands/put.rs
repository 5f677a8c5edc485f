use std::path::PathBuf;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Args as ClapArgs;
use tokio::io::AsyncReadExt;
use tracing::instrument;

use super::open;
use crate::state::Workspace;

#[derive(ClapArgs)]
pub struct Args {
    /// Destination file path (/cell/box/path)
    pub path: String,

    /// Local file to upload (default: stdin)
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Content type stored with the file
    #[arg(long, default_value = "application/octet-stream")]
    pub content_type: String,

    /// Only write if the current ETag matches (`*` for any existing file)
    #[arg(long)]
    pub if_match: Option<String>,
}

#[instrument(level = "info", name = "cmd::put", skip_all, fields(path = %args.path))]
pub async fn execute(workspace: &Workspace, args: &Args) -> Result<()> {
    let body = match args.input {
        Some(ref input) => tokio::fs::read(input)
            .await
            .with_context(|| format!("Failed to read {}", input.display()))?,
        None => {
            let mut buf = Vec::new();
            tokio::io::stdin()
                .read_to_end(&mut buf)
                .await
                .context("Failed to read stdin")?;
            buf
        }
    };

    let mut file = open(workspace, &args.path).await?;
    let outcome = file
        .put(&args.content_type, Bytes::from(body), args.if_match.as_deref())
        .await
        .with_context(|| format!("Failed to write {}", args.path))?;

    let status = outcome.status();
    println!(
        "{} {} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or_default(),
        outcome.etag
    );
    Ok(())
}
