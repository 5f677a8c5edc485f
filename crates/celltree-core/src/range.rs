//! `Range` header handling for file reads.
//!
//! Only single `bytes=` ranges are served. A header that does not parse is
//! ignored and the whole object is returned.

/// Inclusive byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes covered (never zero).
    pub fn byte_count(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` header value.
    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{size}", self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRequest {
    /// No usable header: serve everything.
    Full,
    Partial(ByteRange),
    /// More than one range; not supported.
    Multiple(usize),
    Unsatisfiable,
}

enum Bounds {
    From(u64, Option<u64>),
    Suffix(u64),
}

fn parse_bounds(part: &str) -> Option<Bounds> {
    let (first, last) = part.trim().split_once('-')?;
    let (first, last) = (first.trim(), last.trim());
    if first.is_empty() {
        return last.parse().ok().map(Bounds::Suffix);
    }
    let start = first.parse().ok()?;
    let end = if last.is_empty() {
        None
    } else {
        let end: u64 = last.parse().ok()?;
        if end < start {
            return None;
        }
        Some(end)
    };
    Some(Bounds::From(start, end))
}

/// Interpret a `Range` header against an object of `size` bytes.
pub fn parse(header: Option<&str>, size: u64) -> RangeRequest {
    let Some(header) = header else {
        return RangeRequest::Full;
    };
    let Some(set) = header.trim().strip_prefix("bytes=") else {
        return RangeRequest::Full;
    };
    let parts: Option<Vec<Bounds>> = set.split(',').map(parse_bounds).collect();
    let Some(parts) = parts else {
        return RangeRequest::Full;
    };
    if parts.len() > 1 {
        return RangeRequest::Multiple(parts.len());
    }
    let Some(part) = parts.into_iter().next() else {
        return RangeRequest::Full;
    };

    match part {
        Bounds::From(start, _) if start >= size => RangeRequest::Unsatisfiable,
        Bounds::From(start, end) => RangeRequest::Partial(ByteRange {
            start,
            end: end.map_or(size - 1, |e| e.min(size - 1)),
        }),
        Bounds::Suffix(0) => RangeRequest::Unsatisfiable,
        Bounds::Suffix(_) if size == 0 => RangeRequest::Unsatisfiable,
        Bounds::Suffix(n) => RangeRequest::Partial(ByteRange {
            start: size.saturating_sub(n),
            end: size - 1,
        }),
    }
}
