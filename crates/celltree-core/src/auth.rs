//! Trans-cell trust resolution and ACL evaluation.
//!
//! A trans-cell token is issued by another Cell and asserts roles there. The
//! receiving Cell maps it onto its own roles by walking its link graph:
//!
//! 1. ExtCell → Role, only when the issuer is the subject's own Cell
//! 2. ExtCell → Relation → Role
//! 3. ExtCell → Relation → ExtRole → Role, where the ExtRole URL must be one
//!    of the roles asserted by the token
//!
//! Every walk is capped at the configured top-num. Links to deleted roles or
//! boxes are skipped.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, instrument, trace};

use crate::acl::{Privilege, RoleUrl};
use crate::control::{CellDoc, ControlStore, RoleDoc};
use crate::error::DavResult;
use crate::node::ResourceNode;
use crate::store::DocType;

const LOCALUNIT: &str = "localunit:";

/// Claims of a token issued by another Cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransCellToken {
    /// Cell URL that issued the token.
    pub issuer: String,
    /// `<cellUrl>#<account>` of the authenticated subject.
    pub subject: String,
    /// Cell URL the token was issued for use from.
    pub ext_cell_url: String,
    /// Role URLs asserted by the issuer.
    pub roles: Vec<String>,
}

impl TransCellToken {
    /// Cell part of the subject.
    pub fn subject_cell(&self) -> &str {
        self.subject.split_once('#').map_or(self.subject.as_str(), |(cell, _)| cell)
    }

    /// True when the subject authenticated directly at the issuer.
    pub fn is_direct(&self) -> bool {
        self.issuer == self.subject_cell()
    }
}

fn swap_scheme(url: &str) -> Option<String> {
    if let Some(rest) = url.strip_prefix("https://") {
        Some(format!("http://{rest}"))
    } else {
        url.strip_prefix("http://").map(|rest| format!("https://{rest}"))
    }
}

/// `(cell name, path after the cell)` for URLs pointing into this unit.
fn local_parts(url: &str, unit_url: &str) -> Option<(String, String)> {
    let split = |path: &str| match path.split_once('/') {
        Some((cell, rest)) => (cell.to_string(), rest.to_string()),
        None => (path.to_string(), String::new()),
    };
    if let Some(path) = url.strip_prefix(LOCALUNIT) {
        if let Some(path) = path.strip_prefix('/') {
            return Some(split(path));
        }
        let (cell, rest) = path.split_once(":/")?;
        return Some((cell.to_string(), rest.to_string()));
    }
    let unit = unit_url.trim_end_matches('/');
    let alternate = swap_scheme(unit);
    [Some(unit), alternate.as_deref()]
        .into_iter()
        .flatten()
        .find_map(|prefix| url.strip_prefix(prefix)?.strip_prefix('/'))
        .filter(|path| !path.is_empty())
        .map(split)
}

/// All spellings of a cell URL: both HTTP schemes and both localunit forms.
pub fn url_variants(url: &str, unit_url: &str) -> Vec<String> {
    let mut variants = vec![url.to_string()];
    let mut push = |v: String| {
        if !variants.contains(&v) {
            variants.push(v);
        }
    };
    if let Some((cell, rest)) = local_parts(url, unit_url) {
        let http = format!("{}/{cell}/{rest}", unit_url.trim_end_matches('/'));
        if let Some(other) = swap_scheme(&http) {
            push(other);
        }
        push(http);
        push(format!("{LOCALUNIT}/{cell}/{rest}"));
        push(format!("{LOCALUNIT}{cell}:/{rest}"));
    } else if let Some(other) = swap_scheme(url) {
        push(other);
    }
    variants
}

/// A role of the receiving Cell granted to a token.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ResolvedRole {
    pub id: String,
    pub name: String,
    pub box_name: Option<String>,
    pub box_schema: Option<String>,
}

impl ResolvedRole {
    pub fn url(&self, cell_url: &str) -> String {
        RoleUrl::new(cell_url, self.box_name.as_deref(), &self.name).to_url()
    }
}

/// Maps trans-cell tokens onto local roles.
#[derive(Debug, Clone)]
pub struct TrustResolver {
    control: ControlStore,
    unit_url: String,
}

impl TrustResolver {
    pub fn new(control: ControlStore, unit_url: impl Into<String>) -> Self {
        Self {
            control,
            unit_url: unit_url.into(),
        }
    }

    /// Roles of `cell` granted to `token`, sorted by id.
    #[instrument(level = "debug", skip_all, fields(cell = %cell.name, issuer = %token.issuer))]
    pub async fn resolve(&self, cell: &CellDoc, token: &TransCellToken) -> DavResult<Vec<ResolvedRole>> {
        let mut found: BTreeMap<String, ResolvedRole> = BTreeMap::new();

        if token.is_direct() {
            let issuers = url_variants(&token.issuer, &self.unit_url);
            for ext in self.control.find_ext_cells(&cell.id, &issuers).await? {
                let ids = self
                    .control
                    .linked_ids(&cell.id, (DocType::ExtCell, &ext.id), DocType::Role)
                    .await?;
                self.add_roles(&mut found, ids).await?;
            }
        } else {
            debug!(subject = %token.subject, "Issuer differs from subject cell; skipping direct role links");
        }

        let ext_cells = url_variants(&token.ext_cell_url, &self.unit_url);
        for ext in self.control.find_ext_cells(&cell.id, &ext_cells).await? {
            let relations = self
                .control
                .linked_ids(&cell.id, (DocType::ExtCell, &ext.id), DocType::Relation)
                .await?;
            for relation_id in relations {
                let ids = self
                    .control
                    .linked_ids(&cell.id, (DocType::Relation, &relation_id), DocType::Role)
                    .await?;
                self.add_roles(&mut found, ids).await?;

                for ext_role in self.control.ext_roles_of_relation(&cell.id, &relation_id).await? {
                    if !self.asserted(token, &ext_role.url) {
                        continue;
                    }
                    let ids = self
                        .control
                        .linked_ids(&cell.id, (DocType::ExtRole, &ext_role.id), DocType::Role)
                        .await?;
                    self.add_roles(&mut found, ids).await?;
                }
            }
        }

        debug!(roles = found.len(), "Trans-cell roles resolved");
        Ok(found.into_values().collect())
    }

    fn asserted(&self, token: &TransCellToken, ext_role_url: &str) -> bool {
        let variants = url_variants(ext_role_url, &self.unit_url);
        token.roles.iter().any(|r| variants.contains(r))
    }

    async fn add_roles(&self, found: &mut BTreeMap<String, ResolvedRole>, ids: Vec<String>) -> DavResult<()> {
        for id in ids {
            if found.contains_key(&id) {
                continue;
            }
            let Some(role) = self.control.get_role(&id).await? else {
                trace!(role = %id, "Linked role no longer exists");
                continue;
            };
            if let Some(resolved) = self.describe(role).await? {
                found.insert(id, resolved);
            }
        }
        Ok(())
    }

    async fn describe(&self, role: RoleDoc) -> DavResult<Option<ResolvedRole>> {
        let (box_name, box_schema) = match role.box_id {
            Some(ref box_id) => match self.control.get_box(box_id).await? {
                Some(b) => (Some(b.name), b.schema),
                None => {
                    trace!(role = %role.id, box_id = %box_id, "Role belongs to a deleted box");
                    return Ok(None);
                }
            },
            None => (None, None),
        };
        Ok(Some(ResolvedRole {
            id: role.id,
            name: role.name,
            box_name,
            box_schema,
        }))
    }
}

/// Who is performing a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessContext {
    /// Cell owner: every privilege.
    Owner,
    Anonymous,
    /// Local account or trans-cell subject holding roles of this Cell.
    Roles {
        role_ids: BTreeSet<String>,
        /// Token relayed through a Cell other than the subject's own.
        delegated: bool,
    },
}

impl AccessContext {
    pub fn with_roles<I: IntoIterator<Item = String>>(role_ids: I) -> Self {
        AccessContext::Roles {
            role_ids: role_ids.into_iter().collect(),
            delegated: false,
        }
    }

    pub fn from_token(token: &TransCellToken, roles: &[ResolvedRole]) -> Self {
        AccessContext::Roles {
            role_ids: roles.iter().map(|r| r.id.clone()).collect(),
            delegated: !token.is_direct(),
        }
    }

    /// Evaluate `privilege` against the ACLs of `chain`, ordered from the
    /// target node up to the Box root. A grant anywhere in the chain applies.
    pub fn has_privilege(&self, chain: &[ResourceNode], privilege: Privilege) -> bool {
        let empty = BTreeSet::new();
        let role_ids = match self {
            AccessContext::Owner => return true,
            AccessContext::Anonymous | AccessContext::Roles { delegated: true, .. } => &empty,
            AccessContext::Roles { role_ids, .. } => role_ids,
        };
        chain
            .iter()
            .filter_map(|node| node.acl.as_ref())
            .any(|acl| acl.grants(role_ids, privilege))
    }
}
