//! List command - list the children of a collection.
//!
//! # Examples
//!
//! ```bash
//! # Names only
//! celltree ls /alice/box1
//!
//! # Type, size and ETag
//! celltree ls -l /alice/box1/docs
//!
//! # Output as JSON for scripting
//! celltree ls --json /alice/box1 | jq '.entries[].name'
//! ```

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use serde::Serialize;
use tracing::instrument;

use celltree_core::component::ChildEntry;

use super::open;
use crate::output::{create_table, format_kind, format_size};
use crate::state::Workspace;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Collection path (/cell/box/path)
    pub path: String,

    /// Show detailed information
    #[arg(short, long)]
    pub long: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// JSON output format for ls command
#[derive(Serialize)]
struct LsOutput<'a> {
    path: &'a str,
    entries: Vec<EntryInfo<'a>>,
}

#[derive(Serialize)]
struct EntryInfo<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    etag: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
}

#[instrument(level = "info", name = "cmd::ls", skip_all, fields(path = %args.path))]
pub async fn execute(workspace: &Workspace, args: &Args) -> Result<()> {
    let mut collection = open(workspace, &args.path).await?;
    let mut children = collection
        .list_children()
        .await
        .with_context(|| format!("Failed to list {}", args.path))?;
    children.sort_by(|a, b| a.name.cmp(&b.name));

    if args.json {
        print_json(&args.path, &children)?;
    } else if args.long {
        print_long_format(&children);
    } else {
        for child in &children {
            println!("{}", display_name(child));
        }
    }
    Ok(())
}

fn display_name(child: &ChildEntry) -> String {
    if child.kind.is_collection() {
        format!("{}/", child.name)
    } else {
        child.name.clone()
    }
}

fn print_json(path: &str, children: &[ChildEntry]) -> Result<()> {
    let output = LsOutput {
        path,
        entries: children
            .iter()
            .map(|c| EntryInfo {
                name: &c.name,
                kind: c.kind.as_str(),
                etag: &c.etag,
                size: c.content_length,
            })
            .collect(),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn print_long_format(children: &[ChildEntry]) {
    let mut table = create_table();
    table.set_header(vec!["Type", "Size", "ETag", "Name"]);
    for child in children {
        table.add_row(vec![
            format_kind(child.kind).to_string(),
            child.content_length.map_or_else(|| "-".to_string(), format_size),
            child.etag.clone(),
            display_name(child),
        ]);
    }
    println!("{table}");
}
