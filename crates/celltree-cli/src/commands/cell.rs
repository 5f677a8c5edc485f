use anyhow::{Context, Result};
use chrono::DateTime;
use clap::{Args as ClapArgs, Subcommand};
use tracing::instrument;

use crate::output::create_table;
use crate::state::Workspace;

#[derive(ClapArgs)]
pub struct Args {
    #[command(subcommand)]
    pub command: CellCommand,
}

#[derive(Subcommand)]
pub enum CellCommand {
    /// Create a cell
    Create {
        name: String,
    },

    /// Delete a cell; its content is purged in the background
    Delete {
        name: String,
    },

    /// List cells
    List,
}

impl Args {
    pub fn modifies_state(&self) -> bool {
        !matches!(self.command, CellCommand::List)
    }
}

/// Render a millisecond timestamp for listings.
pub fn format_published(millis: i64) -> String {
    DateTime::from_timestamp_millis(millis)
        .map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string())
}

#[instrument(level = "info", name = "cmd::cell", skip_all)]
pub async fn execute(workspace: &Workspace, args: &Args) -> Result<()> {
    let engine = workspace.engine();
    match args.command {
        CellCommand::Create { ref name } => {
            let cell = engine
                .create_cell(name)
                .await
                .with_context(|| format!("Failed to create cell {name}"))?;
            println!("{}", cell.url);
        }
        CellCommand::Delete { ref name } => {
            engine
                .delete_cell(name)
                .await
                .with_context(|| format!("Failed to delete cell {name}"))?;
        }
        CellCommand::List => {
            let cells = engine.control().list_cells().await?;
            let mut table = create_table();
            table.set_header(vec!["Name", "URL", "Created"]);
            for cell in cells {
                table.add_row(vec![cell.name, cell.url, format_published(cell.published)]);
            }
            println!("{table}");
        }
    }
    Ok(())
}
