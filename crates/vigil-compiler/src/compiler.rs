//! Bundle compilation: merge, constitution rendering, manifest.
//!
//! ## Conflict handling
//!
//! Duplicate rule IDs across the primary document and local overlay resolve
//! to the higher-priority rule; at equal priority the local overlay wins.
//! A duplicate with equal priority *and* equal source is a fatal compile
//! error: the document is ambiguous.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, warn};

use vigil_core::errors::{GuidanceError, Result};
use vigil_core::hash::sha256_16;
use vigil_core::rules::{
    BundleManifest, Constitution, GuidanceRule, PolicyBundle, RuleShard, RuleSource,
};

use crate::parser::parse_document;

/// Manifest record format version.
pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

/// Compiler options.
#[derive(Clone, Debug)]
pub struct CompilerOptions {
    /// Cap on rendered constitution lines.
    pub max_constitution_lines: usize,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            max_constitution_lines: 60,
        }
    }
}

/// Compile a rules document (and optional local overlay) into a bundle.
pub fn compile(
    primary: &str,
    overlay: Option<&str>,
    options: &CompilerOptions,
) -> Result<PolicyBundle> {
    let mut warnings = Vec::new();

    let primary_doc = parse_document(primary, RuleSource::Root);
    warnings.extend(primary_doc.warnings);

    let overlay_doc = overlay.map(|text| parse_document(text, RuleSource::Local));
    let overlay_rules = match overlay_doc {
        Some(doc) => {
            warnings.extend(doc.warnings);
            doc.rules
        }
        None => Vec::new(),
    };

    let rules = merge_rules(primary_doc.rules, overlay_rules, &mut warnings)?;

    let mut rule_counts: BTreeMap<_, usize> = BTreeMap::new();
    for rule in &rules {
        *rule_counts.entry(rule.risk_class).or_default() += 1;
    }

    let (constitution_rules, shard_rules): (Vec<_>, Vec<_>) =
        rules.into_iter().partition(|r| r.is_constitution);

    let constitution = Constitution::render(constitution_rules, options.max_constitution_lines);
    let shards: Vec<RuleShard> = shard_rules.into_iter().map(RuleShard::from_rule).collect();

    let manifest = BundleManifest {
        schema_version: MANIFEST_SCHEMA_VERSION,
        primary_hash: sha256_16(primary),
        overlay_hash: overlay.map(sha256_16),
        rule_counts,
        constitution_rules: constitution.rules.len(),
        shard_count: shards.len(),
        compiled_at: chrono::Utc::now().to_rfc3339(),
    };

    debug!(
        constitution_rules = manifest.constitution_rules,
        shards = manifest.shard_count,
        warnings = warnings.len(),
        "bundle compiled"
    );

    Ok(PolicyBundle {
        constitution,
        shards,
        manifest,
        warnings,
        source_text: primary.to_owned(),
    })
}

/// Compile from files. A missing primary document is a hard error; a
/// missing overlay path is skipped with a warning in the log.
pub fn compile_file(
    primary_path: &Path,
    overlay_path: Option<&Path>,
    options: &CompilerOptions,
) -> Result<PolicyBundle> {
    let primary = std::fs::read_to_string(primary_path).map_err(|e| {
        GuidanceError::config(format!(
            "primary rules document {} unreadable: {e}",
            primary_path.display()
        ))
    })?;

    let overlay = match overlay_path {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "local overlay unreadable, skipping");
                None
            }
        },
        None => None,
    };

    compile(&primary, overlay.as_deref(), options)
}

// ─────────────────────────────────────────────────────────────────────────────
// Merge
// ─────────────────────────────────────────────────────────────────────────────

fn merge_rules(
    root: Vec<GuidanceRule>,
    local: Vec<GuidanceRule>,
    warnings: &mut Vec<String>,
) -> Result<Vec<GuidanceRule>> {
    let mut merged: Vec<GuidanceRule> = Vec::new();
    let mut index: BTreeMap<String, usize> = BTreeMap::new();

    for rule in root.into_iter().chain(local) {
        let key = rule.id.as_str().to_owned();
        let Some(&existing_idx) = index.get(&key) else {
            let _ = index.insert(key, merged.len());
            merged.push(rule);
            continue;
        };

        let existing = &merged[existing_idx];
        if existing.priority == rule.priority && existing.source == rule.source {
            return Err(GuidanceError::config(format!(
                "duplicate rule id `{key}` with equal priority {} and source {}",
                rule.priority, rule.source
            )));
        }

        let incoming_wins = rule.priority > existing.priority
            || (rule.priority == existing.priority && rule.source == RuleSource::Local);

        warnings.push(format!(
            "duplicate rule id `{key}`: keeping {} definition",
            if incoming_wins { "overriding" } else { "original" }
        ));

        if incoming_wins {
            merged[existing_idx] = rule;
        }
    }

    Ok(merged)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::ids::RuleId;
    use vigil_core::rules::CONSTITUTION_PRIORITY_BOOST;

    const DOC: &str = "\
# Safety
[S001] never force push to main priority:90 (critical)
[S002] never commit secrets priority:95 (critical)

# Code Style
[R001] prefer small focused diffs @refactor #style
Keep functions under 50 lines.
";

    fn compile_doc(doc: &str) -> PolicyBundle {
        compile(doc, None, &CompilerOptions::default()).unwrap()
    }

    #[test]
    fn compiles_constitution_and_shards() {
        let bundle = compile_doc(DOC);
        assert_eq!(bundle.constitution.rules.len(), 2);
        // explicit R001 + implicit "code-style" prose rule
        assert_eq!(bundle.shards.len(), 2);
        assert!(bundle.warnings.is_empty());
    }

    #[test]
    fn constitution_rules_carry_the_boost() {
        let bundle = compile_doc(DOC);
        for rule in &bundle.constitution.rules {
            assert!(rule.is_constitution);
            assert!(rule.priority >= rule.base_priority + CONSTITUTION_PRIORITY_BOOST);
        }
    }

    #[test]
    fn constitution_orders_by_priority_then_id() {
        let bundle = compile_doc(DOC);
        let ids: Vec<_> = bundle
            .constitution
            .rules
            .iter()
            .map(|r| r.id.as_str())
            .collect();
        // S002 has priority 195, S001 has 190
        assert_eq!(ids, vec!["S002", "S001"]);
        assert!(bundle.constitution.text.starts_with("[S002]"));
    }

    #[test]
    fn constitution_hash_is_sixteen_hex_chars() {
        let bundle = compile_doc(DOC);
        assert_eq!(bundle.constitution.hash.len(), 16);
        assert!(bundle.constitution.hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hash_is_stable_across_compiles() {
        let a = compile_doc(DOC);
        let b = compile_doc(DOC);
        assert_eq!(a.constitution.hash, b.constitution.hash);
        assert_eq!(a.constitution.text, b.constitution.text);
    }

    #[test]
    fn nfc_normalization_unifies_equivalent_text() {
        // "é" composed vs decomposed
        let composed = "# Safety\n[S001] caf\u{e9} rule\n";
        let decomposed = "# Safety\n[S001] cafe\u{301} rule\n";
        assert_eq!(sha256_16(composed), sha256_16(decomposed));
    }

    #[test]
    fn empty_document_compiles_to_empty_bundle() {
        let bundle = compile_doc("");
        assert!(bundle.constitution.rules.is_empty());
        assert!(bundle.constitution.text.is_empty());
        assert!(bundle.shards.is_empty());
        assert_eq!(bundle.manifest.constitution_rules, 0);
    }

    #[test]
    fn single_rule_document() {
        let bundle = compile_doc("[R001] lone rule\n");
        assert_eq!(bundle.shards.len(), 1);
        assert_eq!(bundle.shards[0].compact_text, "[R001] lone rule");
    }

    #[test]
    fn constitution_at_exactly_max_lines_is_not_truncated() {
        let mut doc = String::from("# Safety\n");
        for i in 0..5 {
            doc.push_str(&format!("[S{i:03}] rule number {i}\n"));
        }
        let options = CompilerOptions {
            max_constitution_lines: 5,
        };
        let bundle = compile(&doc, None, &options).unwrap();
        assert_eq!(bundle.constitution.text.lines().count(), 5);
        assert!(!bundle.constitution.text.contains("truncated"));
    }

    #[test]
    fn constitution_over_max_lines_is_truncated_with_marker() {
        let mut doc = String::from("# Safety\n");
        for i in 0..8 {
            doc.push_str(&format!("[S{i:03}] rule number {i}\n"));
        }
        let options = CompilerOptions {
            max_constitution_lines: 5,
        };
        let bundle = compile(&doc, None, &options).unwrap();
        assert_eq!(bundle.constitution.text.lines().count(), 6);
        assert!(bundle.constitution.text.ends_with("… 3 constitution rule(s) truncated"));
        // All 8 rules are still present in the structured form.
        assert_eq!(bundle.constitution.rules.len(), 8);
    }

    #[test]
    fn overlay_rules_are_merged() {
        let overlay = "# Extra\n[L001] local convention\n";
        let bundle = compile(DOC, Some(overlay), &CompilerOptions::default()).unwrap();
        let rule = bundle.find_rule(&RuleId::from("L001")).unwrap();
        assert_eq!(rule.source, RuleSource::Local);
        assert!(bundle.manifest.overlay_hash.is_some());
    }

    #[test]
    fn duplicate_id_higher_priority_wins() {
        let overlay = "# Extra\n[R001] local override priority:40\n";
        let bundle = compile(DOC, Some(overlay), &CompilerOptions::default()).unwrap();
        let rule = bundle.find_rule(&RuleId::from("R001")).unwrap();
        // Root R001 has default priority 50 > 40, so root wins.
        assert_eq!(rule.source, RuleSource::Root);
        assert!(bundle.warnings.iter().any(|w| w.contains("duplicate rule id")));
    }

    #[test]
    fn duplicate_id_equal_priority_local_wins() {
        let overlay = "# Extra\n[R001] local override\n";
        let bundle = compile(DOC, Some(overlay), &CompilerOptions::default()).unwrap();
        let rule = bundle.find_rule(&RuleId::from("R001")).unwrap();
        assert_eq!(rule.source, RuleSource::Local);
        assert_eq!(rule.text, "local override");
    }

    #[test]
    fn duplicate_id_equal_priority_same_source_is_fatal() {
        let doc = "# Rules\n[R001] first\n[R001] second\n";
        let err = compile(doc, None, &CompilerOptions::default()).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn missing_primary_file_is_hard_error() {
        let err = compile_file(
            Path::new("/nonexistent/rules.md"),
            None,
            &CompilerOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn missing_overlay_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let primary = dir.path().join("rules.md");
        std::fs::write(&primary, DOC).unwrap();
        let bundle = compile_file(
            &primary,
            Some(Path::new("/nonexistent/overlay.md")),
            &CompilerOptions::default(),
        )
        .unwrap();
        assert!(bundle.manifest.overlay_hash.is_none());
    }

    #[test]
    fn manifest_counts_rules_per_risk_class() {
        let bundle = compile_doc(DOC);
        use vigil_core::rules::RiskClass;
        assert_eq!(bundle.manifest.rule_counts[&RiskClass::Critical], 2);
        // R001 + implicit code-style rule
        assert_eq!(bundle.manifest.rule_counts[&RiskClass::Low], 2);
    }

    #[test]
    fn idempotent_compile_of_source_text() {
        let first = compile_doc(DOC);
        let second = compile_doc(&first.source_text);

        assert_eq!(first.constitution.text, second.constitution.text);
        assert_eq!(first.constitution.hash, second.constitution.hash);
        let first_compact: Vec<_> = first.shards.iter().map(|s| &s.compact_text).collect();
        let second_compact: Vec<_> = second.shards.iter().map(|s| &s.compact_text).collect();
        assert_eq!(first_compact, second_compact);
        assert_eq!(first.manifest.primary_hash, second.manifest.primary_hash);
    }

    #[test]
    fn warnings_are_attached_to_the_bundle() {
        let bundle = compile_doc("# Rules\n[R001] rule @bogus priority:abc\n");
        assert_eq!(bundle.warnings.len(), 2);
    }
}
