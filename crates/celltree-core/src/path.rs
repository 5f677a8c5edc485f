//! Resource paths: `/<cell>/<box>/<segment>/...`.

use std::fmt;

use crate::error::{BadRequestReason, DavContext, DavError, DavResult};

/// Parsed path of a resource inside a Box.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourcePath {
    pub cell: String,
    pub box_name: String,
    pub segments: Vec<String>,
}

fn invalid(path: &str, why: &str) -> DavError {
    DavError::bad_request(
        BadRequestReason::InvalidPath(format!("'{path}': {why}")),
        DavContext::new(),
    )
}

fn check_segment(path: &str, segment: &str) -> DavResult<()> {
    if segment == "." || segment == ".." {
        return Err(invalid(path, "relative segments are not allowed"));
    }
    if segment.chars().any(char::is_control) {
        return Err(invalid(path, "control characters are not allowed"));
    }
    Ok(())
}

impl ResourcePath {
    pub fn new(cell: impl Into<String>, box_name: impl Into<String>, segments: Vec<String>) -> Self {
        Self {
            cell: cell.into(),
            box_name: box_name.into(),
            segments,
        }
    }

    /// Parse `/cell/box/a/b`. Empty segments (double or trailing slashes) are ignored.
    pub fn parse(path: &str) -> DavResult<Self> {
        let mut parts = path.split('/').filter(|s| !s.is_empty());
        let cell = parts.next().ok_or_else(|| invalid(path, "missing cell"))?;
        let box_name = parts.next().ok_or_else(|| invalid(path, "missing box"))?;
        let mut segments = Vec::new();
        for segment in parts {
            check_segment(path, segment)?;
            segments.push(segment.to_string());
        }
        check_segment(path, cell)?;
        check_segment(path, box_name)?;
        Ok(Self::new(cell, box_name, segments))
    }

    /// Parse a `Destination` header: an absolute URL under `unit_url` or a path.
    pub fn from_destination(header: &str, unit_url: &str) -> DavResult<Self> {
        let header = header.trim();
        if let Some(rest) = header.strip_prefix(unit_url.trim_end_matches('/'))
            && (rest.is_empty() || rest.starts_with('/'))
        {
            return Self::parse(rest);
        }
        if header.starts_with('/') {
            return Self::parse(header);
        }
        Err(invalid(header, "destination is outside this unit"))
    }

    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Path of the parent resource; `None` at the Box root.
    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        let mut segments = self.segments.clone();
        segments.pop();
        Some(Self::new(self.cell.clone(), self.box_name.clone(), segments))
    }

    /// Child path.
    #[must_use]
    pub fn join(&self, name: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Self::new(self.cell.clone(), self.box_name.clone(), segments)
    }

    /// True when both paths are in the same Box.
    pub fn same_box(&self, other: &Self) -> bool {
        self.cell == other.cell && self.box_name == other.box_name
    }

    /// Path below the Box, slash separated.
    pub fn under_box(&self) -> String {
        self.segments.join("/")
    }

    pub fn context(&self) -> DavContext {
        DavContext::new()
            .with_cell(self.cell.clone())
            .with_box(self.box_name.clone())
            .with_path(self.under_box())
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.cell, self.box_name)?;
        for s in &self.segments {
            write!(f, "/{s}")?;
        }
        Ok(())
    }
}
