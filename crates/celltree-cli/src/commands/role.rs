use std::collections::HashMap;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Subcommand};
use tracing::instrument;

use celltree_core::acl::RoleUrl;
use celltree_core::control::CellDoc;
use celltree_core::error::DavContext;
use celltree_core::{DavError, Engine};

use crate::output::create_table;
use crate::state::Workspace;

#[derive(ClapArgs)]
pub struct Args {
    #[command(subcommand)]
    pub command: RoleCommand,
}

#[derive(Subcommand)]
pub enum RoleCommand {
    /// Create a role, cell-wide or scoped to a box
    Create {
        cell: String,
        name: String,

        /// Box the role belongs to
        #[arg(long = "box", value_name = "BOX")]
        box_name: Option<String>,
    },

    /// Delete a role and its links
    Delete {
        cell: String,
        name: String,

        /// Box the role belongs to
        #[arg(long = "box", value_name = "BOX")]
        box_name: Option<String>,
    },

    /// List the roles of a cell with their URLs
    List {
        cell: String,
    },
}

impl Args {
    pub fn modifies_state(&self) -> bool {
        !matches!(self.command, RoleCommand::List { .. })
    }
}

async fn resolve_box_id(engine: &Engine, cell: &CellDoc, box_name: Option<&str>) -> Result<Option<String>> {
    match box_name {
        Some(name) => Ok(Some(engine.box_of(cell, name).await?.id)),
        None => Ok(None),
    }
}

#[instrument(level = "info", name = "cmd::role", skip_all)]
pub async fn execute(workspace: &Workspace, args: &Args) -> Result<()> {
    let engine = workspace.engine();
    let control = engine.control();
    match args.command {
        RoleCommand::Create {
            ref cell,
            ref name,
            ref box_name,
        } => {
            let cell_doc = engine.cell(cell).await?;
            let box_id = resolve_box_id(engine, &cell_doc, box_name.as_deref()).await?;
            control
                .create_role(&cell_doc.id, box_id.as_deref(), name)
                .await
                .with_context(|| format!("Failed to create role {name}"))?;
            println!("{}", RoleUrl::new(&cell_doc.url, box_name.as_deref(), name).to_url());
        }
        RoleCommand::Delete {
            ref cell,
            ref name,
            ref box_name,
        } => {
            let cell_doc = engine.cell(cell).await?;
            let box_id = resolve_box_id(engine, &cell_doc, box_name.as_deref()).await?;
            let role = control
                .find_role(&cell_doc.id, box_id.as_deref(), name)
                .await?
                .ok_or_else(|| DavError::not_found(DavContext::new().with_cell(cell.clone())))
                .with_context(|| format!("No role {name}"))?;
            control.delete_role(&role).await?;
        }
        RoleCommand::List { ref cell } => {
            let cell_doc = engine.cell(cell).await?;
            let box_names: HashMap<String, String> = control
                .list_boxes(&cell_doc.id)
                .await?
                .into_iter()
                .map(|b| (b.id, b.name))
                .collect();

            let mut table = create_table();
            table.set_header(vec!["Name", "Box", "URL"]);
            for role in control.list_roles(&cell_doc.id).await? {
                let box_name = role.box_id.as_ref().and_then(|id| box_names.get(id)).map(String::as_str);
                table.add_row(vec![
                    role.name.clone(),
                    box_name.unwrap_or("-").to_string(),
                    RoleUrl::new(&cell_doc.url, box_name, &role.name).to_url(),
                ]);
            }
            println!("{table}");
        }
    }
    Ok(())
}
