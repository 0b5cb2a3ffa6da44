//! Session identifiers.
//!
//! The sanitized identifier is the lookup key, the value of the process
//! marker used by orphan cleanup, and the fallback title.

/// Namespace every identifier starts with unless configured otherwise.
pub const DEFAULT_PREFIX: &str = "claudesquad_";

/// Sanitize `name` under the default namespace.
pub fn sanitize_name(name: &str) -> String {
    sanitize_with_prefix(DEFAULT_PREFIX, name)
}

/// `prefix` followed by `name` with spaces, hyphens and periods replaced by
/// underscores. Deterministic and total.
pub fn sanitize_with_prefix(prefix: &str, name: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + name.len());
    out.push_str(prefix);
    out.extend(name.chars().map(|ch| match ch {
        ' ' | '-' | '.' => '_',
        other => other,
    }));
    out
}
