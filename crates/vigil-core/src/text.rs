//! Small text helpers shared across the workspace.

/// Truncate a string to at most `max_chars` characters, appending an
/// ellipsis when anything was cut. Safe on multi-byte input.
#[must_use]
pub fn truncate_str(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_owned();
    }
    let truncated: String = s.chars().take(max_chars).collect();
    format!("{truncated}…")
}

/// Collapse runs of whitespace into single spaces and trim the ends.
///
/// Used to normalize rule text before hashing and comparison so that
/// formatting-only edits do not change rule identity.
#[must_use]
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_short_string_unchanged() {
        assert_eq!(truncate_str("hello", 10), "hello");
    }

    #[test]
    fn truncate_long_string() {
        assert_eq!(truncate_str("hello world", 5), "hello…");
    }

    #[test]
    fn truncate_exact_length_unchanged() {
        assert_eq!(truncate_str("hello", 5), "hello");
    }

    #[test]
    fn truncate_multibyte_safe() {
        let s = "héllo wörld";
        let out = truncate_str(s, 4);
        assert_eq!(out, "héll…");
    }

    #[test]
    fn collapse_inner_runs() {
        assert_eq!(collapse_whitespace("a   b\t\tc"), "a b c");
    }

    #[test]
    fn collapse_trims_ends() {
        assert_eq!(collapse_whitespace("  padded  "), "padded");
    }

    #[test]
    fn collapse_empty() {
        assert_eq!(collapse_whitespace(""), "");
        assert_eq!(collapse_whitespace("   "), "");
    }
}
