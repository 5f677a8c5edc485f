//! Access-control lists.
//!
//! Two representations exist:
//!
//! - [`Acl`] is the wire form exchanged with the protocol layer. Principals
//!   are role URLs, usually relative to an `xml:base`.
//! - [`StoredAcl`] is what a node persists. Principals are durable role ids;
//!   URLs and display names are never stored.
//!
//! Translation between the two needs the role store. It is used by
//! [`ResourceComponent`](crate::component::ResourceComponent) for Box
//! resources and by [`Engine::set_cell_acl`](crate::engine::Engine::set_cell_acl)
//! for the Cell itself. This module holds the pure parts: privilege rules,
//! validation and role URL handling.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{BadRequestReason, DavContext, DavError, DavResult};

/// Box name used in role URLs for roles that belong to no Box.
pub const DEFAULT_BOX_NAME: &str = "__";

const ROLE_SEGMENT: &str = "__role";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Privilege {
    // Box and collection level
    All,
    Read,
    Write,
    ReadProperties,
    WriteProperties,
    ReadContent,
    WriteContent,
    ReadAcl,
    WriteAcl,
    Bind,
    Unbind,
    Exec,
    AlterSchema,
    // Cell level
    Root,
    Auth,
    AuthRead,
    Message,
    MessageRead,
    Event,
    EventRead,
    Social,
    SocialRead,
    #[serde(rename = "box")]
    BoxAdmin,
    BoxRead,
    Acl,
    AclRead,
    Propfind,
    Log,
    LogRead,
}

impl Privilege {
    const ALL: [Privilege; 29] = [
        Privilege::All,
        Privilege::Read,
        Privilege::Write,
        Privilege::ReadProperties,
        Privilege::WriteProperties,
        Privilege::ReadContent,
        Privilege::WriteContent,
        Privilege::ReadAcl,
        Privilege::WriteAcl,
        Privilege::Bind,
        Privilege::Unbind,
        Privilege::Exec,
        Privilege::AlterSchema,
        Privilege::Root,
        Privilege::Auth,
        Privilege::AuthRead,
        Privilege::Message,
        Privilege::MessageRead,
        Privilege::Event,
        Privilege::EventRead,
        Privilege::Social,
        Privilege::SocialRead,
        Privilege::BoxAdmin,
        Privilege::BoxRead,
        Privilege::Acl,
        Privilege::AclRead,
        Privilege::Propfind,
        Privilege::Log,
        Privilege::LogRead,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Privilege::All => "all",
            Privilege::Read => "read",
            Privilege::Write => "write",
            Privilege::ReadProperties => "read-properties",
            Privilege::WriteProperties => "write-properties",
            Privilege::ReadContent => "read-content",
            Privilege::WriteContent => "write-content",
            Privilege::ReadAcl => "read-acl",
            Privilege::WriteAcl => "write-acl",
            Privilege::Bind => "bind",
            Privilege::Unbind => "unbind",
            Privilege::Exec => "exec",
            Privilege::AlterSchema => "alter-schema",
            Privilege::Root => "root",
            Privilege::Auth => "auth",
            Privilege::AuthRead => "auth-read",
            Privilege::Message => "message",
            Privilege::MessageRead => "message-read",
            Privilege::Event => "event",
            Privilege::EventRead => "event-read",
            Privilege::Social => "social",
            Privilege::SocialRead => "social-read",
            Privilege::BoxAdmin => "box",
            Privilege::BoxRead => "box-read",
            Privilege::Acl => "acl",
            Privilege::AclRead => "acl-read",
            Privilege::Propfind => "propfind",
            Privilege::Log => "log",
            Privilege::LogRead => "log-read",
        }
    }

    pub fn is_cell_level(self) -> bool {
        matches!(
            self,
            Privilege::Root
                | Privilege::Auth
                | Privilege::AuthRead
                | Privilege::Message
                | Privilege::MessageRead
                | Privilege::Event
                | Privilege::EventRead
                | Privilege::Social
                | Privilege::SocialRead
                | Privilege::BoxAdmin
                | Privilege::BoxRead
                | Privilege::Acl
                | Privilege::AclRead
                | Privilege::Propfind
                | Privilege::Log
                | Privilege::LogRead
        )
    }

    pub fn is_box_level(self) -> bool {
        !self.is_cell_level()
    }

    /// True when holding `self` grants `other`.
    pub fn implies(self, other: Privilege) -> bool {
        if self == other {
            return true;
        }
        match self {
            Privilege::All => other.is_box_level(),
            Privilege::Root => other.is_cell_level(),
            Privilege::Write => matches!(
                other,
                Privilege::WriteProperties
                    | Privilege::WriteContent
                    | Privilege::WriteAcl
                    | Privilege::Bind
                    | Privilege::Unbind
            ),
            Privilege::Read => matches!(
                other,
                Privilege::ReadProperties | Privilege::ReadContent | Privilege::ReadAcl
            ),
            Privilege::Auth => other == Privilege::AuthRead,
            Privilege::Message => other == Privilege::MessageRead,
            Privilege::Event => other == Privilege::EventRead,
            Privilege::Social => other == Privilege::SocialRead,
            Privilege::BoxAdmin => other == Privilege::BoxRead,
            Privilege::Acl => other == Privilege::AclRead,
            Privilege::Log => other == Privilege::LogRead,
            _ => false,
        }
    }
}

impl FromStr for Privilege {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Privilege::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("[{s}] that can not be set in privilege"))
    }
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `requireSchemaAuthz` setting of a Box-level ACL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaAuthz {
    None,
    Public,
    Confidential,
}

impl SchemaAuthz {
    pub fn as_str(self) -> &'static str {
        match self {
            SchemaAuthz::None => "none",
            SchemaAuthz::Public => "public",
            SchemaAuthz::Confidential => "confidential",
        }
    }
}

impl FromStr for SchemaAuthz {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "none" => Ok(SchemaAuthz::None),
            "public" => Ok(SchemaAuthz::Public),
            "confidential" => Ok(SchemaAuthz::Confidential),
            other => Err(format!("requireSchemaAuthz value '{other}' is not supported")),
        }
    }
}

// ============================================================================
// Wire form
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Principal {
    All,
    Href(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ace {
    pub principal: Principal,
    pub privileges: Vec<String>,
}

/// ACL as exchanged with the protocol layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acl {
    /// `xml:base` that relative principal hrefs resolve against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_schema_authz: Option<String>,
    #[serde(default)]
    pub aces: Vec<Ace>,
}

fn invalid_acl(message: impl Into<String>) -> DavError {
    DavError::bad_request(BadRequestReason::InvalidAcl(message.into()), DavContext::new())
}

impl Acl {
    /// Structural validation. Cell-level ACLs accept only cell privileges,
    /// all others only box privileges.
    pub fn validate(&self, cell_level: bool) -> DavResult<()> {
        if let Some(ref authz) = self.require_schema_authz {
            authz.parse::<SchemaAuthz>().map_err(invalid_acl)?;
        }
        for ace in &self.aces {
            if let Principal::Href(ref href) = ace.principal
                && href.trim().is_empty()
            {
                return Err(invalid_acl("Principal href is empty"));
            }
            self.parse_privileges(ace, cell_level)?;
        }
        Ok(())
    }

    pub fn parse_privileges(&self, ace: &Ace, cell_level: bool) -> DavResult<Vec<Privilege>> {
        if ace.privileges.is_empty() {
            return Err(invalid_acl("Privilege is empty"));
        }
        let mut out = Vec::with_capacity(ace.privileges.len());
        for raw in &ace.privileges {
            let privilege: Privilege = raw.parse().map_err(invalid_acl)?;
            if privilege.is_cell_level() != cell_level {
                return Err(invalid_acl(format!("[{raw}] that can not be set in privilege")));
            }
            out.push(privilege);
        }
        Ok(out)
    }

    pub fn schema_authz(&self) -> DavResult<Option<SchemaAuthz>> {
        self.require_schema_authz
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(invalid_acl)
    }
}

// ============================================================================
// Stored form
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum StoredPrincipal {
    All,
    Role(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAce {
    pub principal: StoredPrincipal,
    pub privileges: Vec<Privilege>,
}

/// ACL as persisted on a node: role ids only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAcl {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_schema_authz: Option<SchemaAuthz>,
    #[serde(default)]
    pub aces: Vec<StoredAce>,
}

impl StoredAcl {
    /// True when an entry for `All` or one of `role_ids` grants `privilege`.
    pub fn grants(&self, role_ids: &BTreeSet<String>, privilege: Privilege) -> bool {
        self.aces.iter().any(|ace| {
            let applies = match ace.principal {
                StoredPrincipal::All => true,
                StoredPrincipal::Role(ref id) => role_ids.contains(id),
            };
            applies && ace.privileges.iter().any(|p| p.implies(privilege))
        })
    }

    /// Role ids referenced by this ACL.
    pub fn role_ids(&self) -> impl Iterator<Item = &str> {
        self.aces.iter().filter_map(|ace| match ace.principal {
            StoredPrincipal::Role(ref id) => Some(id.as_str()),
            StoredPrincipal::All => None,
        })
    }
}

// ============================================================================
// Role URLs
// ============================================================================

/// Role resource URL: `<cellUrl>__role/<box>/<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoleUrl {
    /// Cell URL, always with a trailing slash.
    pub cell_url: String,
    /// `None` for the default box.
    pub box_name: Option<String>,
    pub name: String,
}

/// Ensure a trailing slash.
pub fn normalize_cell_url(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{url}/")
    }
}

impl RoleUrl {
    pub fn new(cell_url: &str, box_name: Option<&str>, name: &str) -> Self {
        Self {
            cell_url: normalize_cell_url(cell_url),
            box_name: box_name.filter(|b| *b != DEFAULT_BOX_NAME).map(str::to_string),
            name: name.to_string(),
        }
    }

    pub fn parse(url: &str) -> Option<Self> {
        let marker = format!("/{ROLE_SEGMENT}/");
        let idx = url.rfind(&marker)?;
        let cell_url = &url[..=idx];
        let rest = &url[idx + marker.len()..];
        let (box_name, name) = rest.split_once('/')?;
        if box_name.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self::new(cell_url, Some(box_name), name))
    }

    pub fn to_url(&self) -> String {
        format!(
            "{}{ROLE_SEGMENT}/{}/{}",
            self.cell_url,
            self.box_name.as_deref().unwrap_or(DEFAULT_BOX_NAME),
            self.name
        )
    }
}

/// `xml:base` for role hrefs of a Box (or the default box when `None`).
pub fn role_base_url(cell_url: &str, box_name: Option<&str>) -> String {
    format!(
        "{}{ROLE_SEGMENT}/{}/",
        normalize_cell_url(cell_url),
        box_name.unwrap_or(DEFAULT_BOX_NAME)
    )
}

/// Resolve a possibly relative href against `base`.
pub fn resolve_href(base: &str, href: &str) -> Option<String> {
    if let Ok(absolute) = Url::parse(href) {
        return Some(absolute.to_string());
    }
    Url::parse(base).ok()?.join(href).ok().map(|u| u.to_string())
}

/// Href for a role as served relative to the base of `base_box`.
pub fn relative_role_href(base_box: Option<&str>, role_box: Option<&str>, name: &str) -> String {
    if base_box == role_box {
        name.to_string()
    } else {
        format!("../{}/{name}", role_box.unwrap_or(DEFAULT_BOX_NAME))
    }
}
