use anyhow::{bail, Context, Result};
use clap::Args as ClapArgs;
use tracing::instrument;

use celltree_core::component::PropOp;

use super::open;
use crate::output::create_table;
use crate::state::Workspace;

#[derive(ClapArgs)]
pub struct Args {
    /// Resource path (/cell/box/path)
    pub path: String,

    /// Set a property, `NAME=VALUE` (repeatable)
    #[arg(long = "set", value_name = "NAME=VALUE")]
    pub set: Vec<String>,

    /// Remove a property (repeatable)
    #[arg(long = "remove", value_name = "NAME")]
    pub remove: Vec<String>,

    /// Namespace of the named properties
    #[arg(long, default_value = "urn:x-celltree:props")]
    pub namespace: String,
}

fn build_ops(args: &Args) -> Result<Vec<PropOp>> {
    let mut ops = Vec::with_capacity(args.set.len() + args.remove.len());
    for raw in &args.set {
        let Some((name, value)) = raw.split_once('=') else {
            bail!("Expected NAME=VALUE, got '{raw}'");
        };
        ops.push(PropOp::Set {
            name: name.to_string(),
            namespace: args.namespace.clone(),
            value: value.to_string(),
        });
    }
    for name in &args.remove {
        ops.push(PropOp::Remove {
            name: name.clone(),
            namespace: args.namespace.clone(),
        });
    }
    if ops.is_empty() {
        bail!("Nothing to do: pass --set or --remove");
    }
    Ok(ops)
}

#[instrument(level = "info", name = "cmd::proppatch", skip_all, fields(path = %args.path))]
pub async fn execute(workspace: &Workspace, args: &Args) -> Result<()> {
    let ops = build_ops(args)?;
    let mut resource = open(workspace, &args.path).await?;
    let stats = resource
        .proppatch(&ops)
        .await
        .with_context(|| format!("Failed to patch properties of {}", args.path))?;

    let mut table = create_table();
    table.set_header(vec!["Property", "Status"]);
    for stat in stats {
        table.add_row(vec![stat.key, stat.status.as_u16().to_string()]);
    }
    println!("{table}");
    Ok(())
}
