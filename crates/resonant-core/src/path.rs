#![forbid(unsafe_code)]

//! Dot-path helpers.
//!
//! Paths are relative to a root variable: `""` is the root itself, `"0.name"`
//! is the `name` property of the first item of a root array. Fully-qualified
//! paths (dependency tokens, view bindings) put the root name in front:
//! `"people.0.name"`.

/// Join a parent path and one segment.
#[must_use]
pub fn join(parent: &str, segment: &str) -> String {
    if parent.is_empty() {
        segment.to_owned()
    } else {
        let mut out = String::with_capacity(parent.len() + 1 + segment.len());
        out.push_str(parent);
        out.push('.');
        out.push_str(segment);
        out
    }
}

/// Join a parent path and an array index.
#[must_use]
pub fn join_index(parent: &str, index: usize) -> String {
    join(parent, &index.to_string())
}

/// Fully-qualified token for `path` under `root`.
#[must_use]
pub fn qualify(root: &str, path: &str) -> String {
    if path.is_empty() {
        root.to_owned()
    } else {
        join(root, path)
    }
}

/// Split a path into non-empty segments.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('.').filter(|s| !s.is_empty())
}

/// Split a fully-qualified path into `(root, relative path)`.
#[must_use]
pub fn split_root(qualified: &str) -> (&str, &str) {
    match qualified.split_once('.') {
        Some((root, rest)) => (root, rest),
        None => (qualified, ""),
    }
}

/// Leading array index of a relative path (`"3.name"` gives `Some(3)`).
#[must_use]
pub fn leading_index(path: &str) -> Option<usize> {
    segments(path).next().and_then(parse_index)
}

/// Parse a canonical decimal index segment (`"01"` is not an index).
#[must_use]
pub fn parse_index(segment: &str) -> Option<usize> {
    if segment.is_empty() || (segment.len() > 1 && segment.starts_with('0')) {
        return None;
    }
    if !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok()
}

/// Whether `path` is `ancestor` or lies below it.
#[must_use]
pub fn is_within(path: &str, ancestor: &str) -> bool {
    if ancestor.is_empty() {
        return true;
    }
    path == ancestor
        || (path.len() > ancestor.len()
            && path.starts_with(ancestor)
            && path.as_bytes()[ancestor.len()] == b'.')
}
