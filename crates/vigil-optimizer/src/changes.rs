//! Rule change proposals, A/B results, and decision records.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use vigil_core::ids::RuleId;

/// Current ADR record version.
pub const ADR_SCHEMA_VERSION: u32 = 1;

/// What a proposed change does.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleChangeKind {
    /// Add a new local rule.
    Add,
    /// Sharpen or re-prioritize an existing rule.
    Modify,
    /// Move a local rule into the constitution.
    Promote,
    /// Move a constitution rule back to the shard pool.
    Demote,
    /// Remove a rule entirely.
    Remove,
}

impl std::fmt::Display for RuleChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Add => write!(f, "add"),
            Self::Modify => write!(f, "modify"),
            Self::Promote => write!(f, "promote"),
            Self::Demote => write!(f, "demote"),
            Self::Remove => write!(f, "remove"),
        }
    }
}

/// A proposed change to the rule set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleChange {
    /// What to do.
    pub kind: RuleChangeKind,
    /// Rule the change targets; for `add`, the ID the new rule will take.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_rule_id: Option<RuleId>,
    /// Replacement or initial rule text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposed_text: Option<String>,
    /// Why the change is proposed.
    pub rationale: String,
}

/// Metrics from one arm of an A/B evaluation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbMetrics {
    /// Violations per 10 tasks.
    pub violation_rate: f64,
    /// Mean rework ratio.
    pub rework_ratio: f64,
    /// Aggregate risk score (0 = safe).
    pub risk_score: f64,
}

/// Result of A/B-evaluating one change.
///
/// Deltas are relative: `(candidate - baseline) / baseline`, negative is
/// an improvement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbTestResult {
    /// Baseline arm metrics.
    pub baseline_metrics: AbMetrics,
    /// Candidate arm metrics.
    pub candidate_metrics: AbMetrics,
    /// Relative rework change.
    pub rework_delta: f64,
    /// Relative violation-rate change.
    pub violation_delta: f64,
    /// Absolute risk change.
    pub risk_delta: f64,
    /// Whether promotion criteria were met (set by the optimizer).
    pub should_promote: bool,
}

/// What the optimizer decided about a change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdrDecision {
    /// The change won enough times and was applied.
    Promoted,
    /// The change won this cycle but needs more wins.
    Deferred,
    /// The change lost this cycle.
    Rejected,
    /// A losing `promote` proposal was demoted.
    Demoted,
    /// The cycle aborted before a decision.
    Aborted,
}

impl std::fmt::Display for AdrDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Promoted => write!(f, "promoted"),
            Self::Deferred => write!(f, "deferred"),
            Self::Rejected => write!(f, "rejected"),
            Self::Demoted => write!(f, "demoted"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Architecture decision record appended for every optimizer decision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleAdr {
    /// Record format version.
    pub schema_version: u32,
    /// Sequential ADR number.
    pub number: u64,
    /// Short title.
    pub title: String,
    /// The decision.
    pub decision: AdrDecision,
    /// Why.
    pub rationale: String,
    /// The evaluated change.
    pub change: RuleChange,
    /// The A/B result, absent for aborts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_result: Option<AbTestResult>,
    /// Decision date (ISO 8601).
    pub date: String,
    /// Unknown fields from newer writers, preserved on round-trip.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl RuleAdr {
    /// Render a compact markdown block for human consumption.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = format!(
            "## ADR-{:04}: {}\n\n- Decision: {}\n- Change: {}",
            self.number, self.title, self.decision, self.change.kind
        );
        if let Some(target) = &self.change.target_rule_id {
            out.push_str(&format!(" {target}"));
        }
        out.push_str(&format!("\n- Rationale: {}", self.rationale));
        if let Some(result) = &self.test_result {
            out.push_str(&format!(
                "\n- Deltas: rework {:+.2}, violations {:+.2}, risk {:+.2}",
                result.rework_delta, result.violation_delta, result.risk_delta
            ));
        }
        out.push_str(&format!("\n- Date: {}\n", self.date));
        out
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_adr() -> RuleAdr {
        RuleAdr {
            schema_version: ADR_SCHEMA_VERSION,
            number: 7,
            title: "Promote R042 to constitution".into(),
            decision: AdrDecision::Promoted,
            rationale: "Two consecutive A/B wins".into(),
            change: RuleChange {
                kind: RuleChangeKind::Promote,
                target_rule_id: Some(RuleId::from("R042")),
                proposed_text: None,
                rationale: "frequent violations".into(),
            },
            test_result: Some(AbTestResult {
                rework_delta: -0.4,
                violation_delta: -0.4,
                risk_delta: 0.0,
                should_promote: true,
                ..AbTestResult::default()
            }),
            date: "2025-06-08T00:00:00Z".into(),
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn change_kind_serde_lowercase() {
        assert_eq!(
            serde_json::to_string(&RuleChangeKind::Promote).unwrap(),
            "\"promote\""
        );
    }

    #[test]
    fn adr_serde_roundtrip() {
        let adr = sample_adr();
        let json = serde_json::to_value(&adr).unwrap();
        assert_eq!(json["schemaVersion"], 1);
        assert_eq!(json["decision"], "promoted");
        assert_eq!(json["change"]["kind"], "promote");
        let back: RuleAdr = serde_json::from_value(json).unwrap();
        assert_eq!(back, adr);
    }

    #[test]
    fn adr_preserves_unknown_fields() {
        let mut json = serde_json::to_value(sample_adr()).unwrap();
        json["reviewedBy"] = serde_json::json!("alice");
        let adr: RuleAdr = serde_json::from_value(json).unwrap();
        let rewritten = serde_json::to_value(&adr).unwrap();
        assert_eq!(rewritten["reviewedBy"], "alice");
    }

    #[test]
    fn render_includes_number_decision_and_deltas() {
        let rendered = sample_adr().render();
        assert!(rendered.contains("ADR-0007"));
        assert!(rendered.contains("Decision: promoted"));
        assert!(rendered.contains("promote R042"));
        assert!(rendered.contains("rework -0.40"));
    }

    #[test]
    fn render_without_test_result() {
        let mut adr = sample_adr();
        adr.test_result = None;
        adr.decision = AdrDecision::Aborted;
        let rendered = adr.render();
        assert!(rendered.contains("Decision: aborted"));
        assert!(!rendered.contains("Deltas:"));
    }
}
