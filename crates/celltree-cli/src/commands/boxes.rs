use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Subcommand};
use tracing::instrument;

use super::cell::format_published;
use crate::output::create_table;
use crate::state::Workspace;

#[derive(ClapArgs)]
pub struct Args {
    #[command(subcommand)]
    pub command: BoxCommand,
}

#[derive(Subcommand)]
pub enum BoxCommand {
    /// Create a box in a cell
    Create {
        cell: String,
        name: String,

        /// Schema (application cell) URL the box is bound to
        #[arg(long)]
        schema: Option<String>,
    },

    /// Delete an empty box
    Delete {
        cell: String,
        name: String,
    },

    /// List the boxes of a cell
    List {
        cell: String,
    },
}

impl Args {
    pub fn modifies_state(&self) -> bool {
        !matches!(self.command, BoxCommand::List { .. })
    }
}

#[instrument(level = "info", name = "cmd::box", skip_all)]
pub async fn execute(workspace: &Workspace, args: &Args) -> Result<()> {
    let engine = workspace.engine();
    match args.command {
        BoxCommand::Create {
            ref cell,
            ref name,
            ref schema,
        } => {
            engine
                .create_box(cell, name, schema.as_deref())
                .await
                .with_context(|| format!("Failed to create box {cell}/{name}"))?;
        }
        BoxCommand::Delete { ref cell, ref name } => {
            engine
                .delete_box(cell, name)
                .await
                .with_context(|| format!("Failed to delete box {cell}/{name}"))?;
        }
        BoxCommand::List { ref cell } => {
            let cell = engine.cell(cell).await?;
            let boxes = engine.control().list_boxes(&cell.id).await?;
            let mut table = create_table();
            table.set_header(vec!["Name", "Schema", "Created"]);
            for b in boxes {
                table.add_row(vec![
                    b.name,
                    b.schema.unwrap_or_else(|| "-".to_string()),
                    format_published(b.published),
                ]);
            }
            println!("{table}");
        }
    }
    Ok(())
}
