//! Key-path overlap rules.
//!
//! Keys are dotted paths into the state tree. Two paths overlap when they are
//! equal or one is an ancestor of the other at a `.` boundary:
//!
//! ```text
//! "user"      vs "user.name"  → overlap
//! "user.name" vs "user.email" → disjoint
//! "user"      vs "username"   → disjoint
//! ```
//!
//! A `None` scope is global and overlaps everything.

/// True if two dotted key paths touch the same part of the state.
pub fn paths_overlap(a: &str, b: &str) -> bool {
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    long.starts_with(short) && (long.len() == short.len() || long.as_bytes()[short.len()] == b'.')
}

/// True if two key scopes intersect (`None` = global).
pub fn scopes_overlap(a: Option<&[String]>, b: Option<&[String]>) -> bool {
    match (a, b) {
        (None, _) | (_, None) => true,
        (Some(a), Some(b)) => a.iter().any(|x| b.iter().any(|y| paths_overlap(x, y))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(k: &[&str]) -> Vec<String> {
        k.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn prefix_at_dot_boundary_overlaps() {
        assert!(paths_overlap("user", "user.name"));
        assert!(paths_overlap("user.name", "user"));
        assert!(paths_overlap("counter", "counter"));
        assert!(!paths_overlap("user", "username"));
        assert!(!paths_overlap("user.name", "user.email"));
    }

    #[test]
    fn global_scope_overlaps_everything() {
        let theme = keys(&["theme"]);
        assert!(scopes_overlap(None, Some(&theme)));
        assert!(scopes_overlap(Some(&theme), None));
        assert!(scopes_overlap(None, None));
    }

    #[test]
    fn empty_scope_overlaps_nothing() {
        let empty: Vec<String> = Vec::new();
        let theme = keys(&["theme"]);
        assert!(!scopes_overlap(Some(&empty), Some(&theme)));
    }
}
