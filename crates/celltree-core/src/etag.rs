//! ETag formatting and HTTP precondition matching.
//!
//! An ETag is `"<version>-<updatedMillis>"` including the quotes. `If-Match`
//! uses strong comparison, so a weak (`W/`) candidate never matches it.
//! `If-None-Match` uses weak comparison.

use crate::store::Version;

pub fn format_etag(version: Version, updated: i64) -> String {
    format!("\"{version}-{updated}\"")
}

fn list_matches(header: &str, current: &str, weak: bool) -> bool {
    header.split(',').map(str::trim).any(|candidate| {
        let candidate = match candidate.strip_prefix("W/") {
            Some(opaque) if weak => opaque,
            _ => candidate,
        };
        candidate == "*" || candidate == current
    })
}

/// `If-Match`: absent, `*` or the current ETag passes.
pub fn if_match(header: Option<&str>, current: &str) -> bool {
    header.is_none_or(|h| list_matches(h, current, false))
}

/// `If-None-Match`: true when the header names the current ETag (or `*`).
pub fn if_none_match_hits(header: Option<&str>, current: &str) -> bool {
    header.is_some_and(|h| list_matches(h, current, true))
}
