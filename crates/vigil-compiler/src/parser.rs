//! Rules document parsing.
//!
//! A rules document is UTF-8 text with `#`…`####` section headings. Under a
//! heading, a line of the canonical form
//!
//! ```text
//! [ID] text @tag #domain scope:glob priority:N (riskClass)
//! ```
//!
//! declares an explicit rule (tags, domains, scope, priority, and risk are
//! all optional and may appear in any order after the text). Any other
//! non-blank line is prose and contributes to the section's implicit rule,
//! whose ID is derived from the heading.
//!
//! A heading is constitutional when it contains one of the constitution
//! marker words (`safety`, `security`, `invariant`, …); every rule under it
//! receives the constitution priority boost.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

use vigil_core::rules::{GuidanceRule, RiskClass, RuleSource, TaskIntent, ToolClass};
use vigil_core::text::collapse_whitespace;

/// Result of parsing one document.
#[derive(Clone, Debug, Default)]
pub struct ParsedDocument {
    /// All rules in document order.
    pub rules: Vec<GuidanceRule>,
    /// Non-fatal diagnostics (malformed tokens, unknown tags).
    pub warnings: Vec<String>,
}

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(#{1,4})\s+(.+?)\s*$").unwrap())
}

fn rule_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\[([A-Za-z][A-Za-z0-9_-]*)\]\s+(.+)$").unwrap())
}

fn constitution_heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(safety|security|invariant|constitution|critical|non-negotiable|always|must|never|required|mandatory)\b",
        )
        .unwrap()
    })
}

/// Whether a section heading marks its rules as constitutional.
#[must_use]
pub fn is_constitution_heading(heading: &str) -> bool {
    constitution_heading_re().is_match(heading)
}

/// Parse a rules document into rules and warnings.
///
/// `source` tags every produced rule as root or local overlay.
pub fn parse_document(text: &str, source: RuleSource) -> ParsedDocument {
    let mut doc = ParsedDocument::default();
    let mut section = Section::preamble();
    let mut used_implicit_ids: BTreeSet<String> = BTreeSet::new();

    for (line_no, raw) in text.lines().enumerate() {
        let line = raw.trim_end();
        if line.trim().is_empty() {
            continue;
        }

        if let Some(caps) = heading_re().captures(line) {
            section.flush_implicit(&mut doc, source);
            let heading = caps[2].to_owned();
            let constitutional = is_constitution_heading(&heading);
            section = Section::new(heading, constitutional, &mut used_implicit_ids);
            continue;
        }

        if let Some(caps) = rule_line_re().captures(line) {
            let id = caps[1].to_owned();
            let rest = &caps[2];
            let rule = build_rule(&id, rest, source, section.constitutional, &mut doc.warnings);
            doc.rules.push(rule);
            continue;
        }

        // Prose: contributes to the section's implicit rule.
        section.push_prose(line.trim(), line_no);
    }

    section.flush_implicit(&mut doc, source);
    doc
}

// ─────────────────────────────────────────────────────────────────────────────
// Sections and implicit rules
// ─────────────────────────────────────────────────────────────────────────────

struct Section {
    constitutional: bool,
    implicit_id: String,
    prose: Vec<String>,
}

impl Section {
    fn preamble() -> Self {
        Self {
            constitutional: false,
            implicit_id: "preamble".to_owned(),
            prose: Vec::new(),
        }
    }

    fn new(heading: String, constitutional: bool, used: &mut BTreeSet<String>) -> Self {
        let base = slugify(&heading);
        let mut id = base.clone();
        let mut n = 2;
        while !used.insert(id.clone()) {
            id = format!("{base}-{n}");
            n += 1;
        }
        Self {
            constitutional,
            implicit_id: id,
            prose: Vec::new(),
        }
    }

    fn push_prose(&mut self, line: &str, _line_no: usize) {
        self.prose.push(line.to_owned());
    }

    fn flush_implicit(&mut self, doc: &mut ParsedDocument, source: RuleSource) {
        if self.prose.is_empty() {
            return;
        }
        let text = collapse_whitespace(&self.prose.join(" "));
        let mut rule = GuidanceRule::new(self.implicit_id.as_str(), text);
        rule.source = source;
        if self.constitutional {
            rule.boost_to_constitution();
        }
        doc.rules.push(rule);
        self.prose.clear();
    }
}

fn slugify(heading: &str) -> String {
    let mut slug = String::new();
    let mut last_dash = true;
    for ch in heading.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let slug = slug.trim_matches('-').to_owned();
    if slug.is_empty() {
        "section".to_owned()
    } else {
        slug
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Explicit rule lines
// ─────────────────────────────────────────────────────────────────────────────

fn build_rule(
    id: &str,
    rest: &str,
    source: RuleSource,
    constitutional: bool,
    warnings: &mut Vec<String>,
) -> GuidanceRule {
    let mut text_tokens: Vec<&str> = Vec::new();
    let mut intent_tags = BTreeSet::new();
    let mut tool_classes = BTreeSet::new();
    let mut domains = BTreeSet::new();
    let mut repo_scopes: Vec<String> = Vec::new();
    let mut priority: Option<i32> = None;
    let mut risk: Option<RiskClass> = None;
    let mut verifiers: Vec<String> = Vec::new();

    for token in rest.split_whitespace() {
        if let Some(tag) = token.strip_prefix('@') {
            if let Some(intent) = TaskIntent::parse(tag) {
                let _ = intent_tags.insert(intent);
            } else if let Some(tool) = ToolClass::parse(tag) {
                let _ = tool_classes.insert(tool);
            } else {
                warn!(rule_id = id, tag, "unknown @tag on rule line");
                warnings.push(format!("rule {id}: unknown tag @{tag}"));
            }
        } else if let Some(domain) = token.strip_prefix('#') {
            if !domain.is_empty() {
                let _ = domains.insert(domain.to_lowercase());
            }
        } else if let Some(glob) = token.strip_prefix("scope:") {
            match globset::Glob::new(glob) {
                Ok(_) => repo_scopes.push(glob.to_owned()),
                Err(e) => {
                    warn!(rule_id = id, glob, error = %e, "invalid scope glob");
                    warnings.push(format!("rule {id}: invalid scope glob `{glob}`"));
                }
            }
        } else if let Some(value) = token.strip_prefix("priority:") {
            match value.parse::<i32>() {
                Ok(p) => priority = Some(p),
                Err(_) => {
                    warnings.push(format!("rule {id}: malformed priority `{value}`"));
                }
            }
        } else if let Some(value) = token.strip_prefix("verify:") {
            verifiers.push(value.to_owned());
        } else if let Some(inner) = token
            .strip_prefix('(')
            .and_then(|t| t.strip_suffix(')'))
        {
            if let Some(rc) = RiskClass::parse(inner) {
                risk = Some(rc);
            } else {
                // Plain parenthesized prose stays in the text.
                text_tokens.push(token);
            }
        } else {
            text_tokens.push(token);
        }
    }

    let mut rule = GuidanceRule::new(id, text_tokens.join(" "));
    rule.source = source;
    rule.intent_tags = intent_tags;
    rule.tool_classes = tool_classes;
    rule.domains = domains;
    rule.verifiers = verifiers;
    if !repo_scopes.is_empty() {
        rule.repo_scopes = repo_scopes;
    }
    if let Some(p) = priority {
        rule.base_priority = p;
        rule.priority = p;
    }
    if let Some(rc) = risk {
        rule.risk_class = rc;
    }
    if constitutional {
        rule.boost_to_constitution();
    }
    rule
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> ParsedDocument {
        parse_document(text, RuleSource::Root)
    }

    #[test]
    fn empty_document_yields_nothing() {
        let doc = parse("");
        assert!(doc.rules.is_empty());
        assert!(doc.warnings.is_empty());
    }

    #[test]
    fn explicit_rule_with_all_fields() {
        let doc = parse(
            "# Code Review\n[R042] never commit secrets @security #auth scope:src/** priority:80 (critical)\n",
        );
        assert_eq!(doc.rules.len(), 1);
        let rule = &doc.rules[0];
        assert_eq!(rule.id.as_str(), "R042");
        assert_eq!(rule.text, "never commit secrets");
        assert!(rule.intent_tags.contains(&TaskIntent::Security));
        assert!(rule.domains.contains("auth"));
        assert_eq!(rule.repo_scopes, vec!["src/**"]);
        assert_eq!(rule.base_priority, 80);
        assert_eq!(rule.risk_class, RiskClass::Critical);
        assert!(doc.warnings.is_empty());
    }

    #[test]
    fn prose_lines_form_an_implicit_rule() {
        let doc = parse("# Code Style\nPrefer small functions.\nKeep modules under 500 lines.\n");
        assert_eq!(doc.rules.len(), 1);
        let rule = &doc.rules[0];
        assert_eq!(rule.id.as_str(), "code-style");
        assert_eq!(
            rule.text,
            "Prefer small functions. Keep modules under 500 lines."
        );
        assert!(!rule.is_constitution);
    }

    #[test]
    fn constitution_heading_boosts_all_rules() {
        let doc = parse("## Safety Invariants\n[S001] never run rm -rf priority:90\nAsk before destructive changes.\n");
        assert_eq!(doc.rules.len(), 2);
        for rule in &doc.rules {
            assert!(rule.is_constitution, "rule {} should be boosted", rule.id);
            assert!(rule.constitution_invariant_holds());
        }
        assert_eq!(doc.rules[0].priority, 190);
    }

    #[test]
    fn constitution_markers_are_case_insensitive() {
        assert!(is_constitution_heading("NON-NEGOTIABLE rules"));
        assert!(is_constitution_heading("Security"));
        assert!(is_constitution_heading("What you must always do"));
        assert!(!is_constitution_heading("Code style"));
        assert!(!is_constitution_heading("Performance tips"));
    }

    #[test]
    fn marker_must_be_a_whole_word() {
        // "mustard" contains "must" but is not a marker
        assert!(!is_constitution_heading("Mustard recipes"));
        assert!(!is_constitution_heading("Securityish"));
    }

    #[test]
    fn unknown_tag_becomes_warning() {
        let doc = parse("# Rules\n[R001] do the thing @nonsense\n");
        assert_eq!(doc.rules.len(), 1);
        assert_eq!(doc.warnings.len(), 1);
        assert!(doc.warnings[0].contains("@nonsense"));
    }

    #[test]
    fn tool_class_tags_are_recognized() {
        let doc = parse("# Rules\n[R001] confirm before running @bash @mcp\n");
        let rule = &doc.rules[0];
        assert!(rule.tool_classes.contains(&ToolClass::Bash));
        assert!(rule.tool_classes.contains(&ToolClass::Mcp));
    }

    #[test]
    fn malformed_priority_becomes_warning() {
        let doc = parse("# Rules\n[R001] some rule priority:high\n");
        assert_eq!(doc.rules[0].base_priority, vigil_core::rules::DEFAULT_PRIORITY);
        assert_eq!(doc.warnings.len(), 1);
        assert!(doc.warnings[0].contains("malformed priority"));
    }

    #[test]
    fn invalid_scope_glob_becomes_warning() {
        let doc = parse("# Rules\n[R001] scoped rule scope:src/[bad\n");
        assert_eq!(doc.rules[0].repo_scopes, vec!["*"]);
        assert_eq!(doc.warnings.len(), 1);
        assert!(doc.warnings[0].contains("invalid scope glob"));
    }

    #[test]
    fn unknown_parenthesized_word_stays_in_text() {
        let doc = parse("# Rules\n[R001] avoid global state (mostly)\n");
        assert_eq!(doc.rules[0].text, "avoid global state (mostly)");
        assert_eq!(doc.rules[0].risk_class, RiskClass::Low);
    }

    #[test]
    fn verifier_token_is_collected() {
        let doc = parse("# Rules\n[R001] run the linter verify:lint-clean\n");
        assert_eq!(doc.rules[0].verifiers, vec!["lint-clean"]);
    }

    #[test]
    fn prose_before_any_heading_goes_to_preamble() {
        let doc = parse("General advice first.\n# Rules\n[R001] a rule\n");
        assert_eq!(doc.rules.len(), 2);
        assert_eq!(doc.rules[0].id.as_str(), "preamble");
    }

    #[test]
    fn duplicate_headings_get_unique_implicit_ids() {
        let doc = parse("# Style\nfirst\n# Style\nsecond\n");
        let ids: Vec<_> = doc.rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["style", "style-2"]);
    }

    #[test]
    fn deep_headings_are_recognized() {
        let doc = parse("#### Required checks\nAll tests green.\n");
        assert_eq!(doc.rules.len(), 1);
        assert!(doc.rules[0].is_constitution);
    }

    #[test]
    fn five_hashes_is_not_a_heading() {
        let doc = parse("# Rules\n##### not a heading\n");
        // The bogus heading line is treated as prose under "Rules".
        assert_eq!(doc.rules.len(), 1);
        assert!(doc.rules[0].text.contains("not a heading"));
    }

    #[test]
    fn source_is_propagated() {
        let doc = parse_document("# Rules\n[R001] x\n", RuleSource::Local);
        assert_eq!(doc.rules[0].source, RuleSource::Local);
    }

    #[test]
    fn single_rule_document() {
        let doc = parse("[R001] standalone rule\n");
        assert_eq!(doc.rules.len(), 1);
        assert_eq!(doc.rules[0].id.as_str(), "R001");
    }

    #[test]
    fn slugify_strips_punctuation() {
        assert_eq!(slugify("Code Review & Style!"), "code-review-style");
        assert_eq!(slugify("  ---  "), "section");
    }
}
