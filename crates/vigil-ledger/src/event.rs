//! Run event wire types.
//!
//! Every persisted record carries `schemaVersion` and preserves unknown
//! fields on round-trip through the flattened `extra` map, so newer
//! writers do not lose data read by older readers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use vigil_core::ids::{RuleId, RunId};
use vigil_core::rules::TaskIntent;
use vigil_gates::GateDecision;

/// Current run-event record version.
pub const EVENT_SCHEMA_VERSION: u32 = 1;

/// How a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    /// The task completed.
    Success,
    /// The task failed.
    Failure,
    /// The run was cancelled before completion.
    Aborted,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Accumulated diff statistics for a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSummary {
    /// Lines added across all edits.
    pub lines_added: u64,
    /// Lines removed across all edits.
    pub lines_removed: u64,
    /// Distinct files changed.
    pub files_changed: u64,
    /// Lines rewritten within the same run (rework).
    pub rework_lines: u64,
}

impl DiffSummary {
    /// `reworkLines / (linesAdded + linesRemoved)`, or 0.0 on an empty
    /// diff.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn rework_ratio(&self) -> f64 {
        let total = self.lines_added + self.lines_removed;
        if total == 0 {
            return 0.0;
        }
        self.rework_lines as f64 / total as f64
    }
}

/// A recorded rule violation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    /// The violated rule.
    pub rule_id: RuleId,
    /// The gate that caught it.
    pub gate_name: String,
    /// Human-readable detail.
    pub detail: String,
    /// Decision severity of the triggering gate result.
    pub severity: GateDecision,
    /// When it occurred (ISO 8601).
    pub occurred_at: String,
    /// Rework lines attributed to this violation.
    pub cost: u64,
}

/// One recorded run. Mutable until finalization, immutable after.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEvent {
    /// Record format version.
    pub schema_version: u32,
    /// Run identifier.
    pub id: RunId,
    /// Classified (or overridden) task intent.
    pub task_intent: TaskIntent,
    /// Digest of the task prompt.
    pub prompt_digest: String,
    /// Hash of the constitution in force.
    pub guidance_hash: String,
    /// Shards retrieved for the run.
    pub retrieved_rule_ids: Vec<RuleId>,
    /// Tools invoked during the run.
    pub tools_used: Vec<String>,
    /// Shell commands run (for the forbidden-command evaluator).
    pub commands: Vec<String>,
    /// Files modified.
    pub files_modified: Vec<String>,
    /// Accumulated diff statistics.
    pub diff_summary: DiffSummary,
    /// Whether the test suite passed, if it ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tests_passed: Option<bool>,
    /// Violations in recording order.
    pub violations: Vec<Violation>,
    /// Run start (ISO 8601).
    pub started_at: String,
    /// Finalization time; `None` while in progress.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<String>,
    /// Outcome; `None` while in progress.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RunOutcome>,
    /// Unknown fields from newer writers, preserved on round-trip.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl RunEvent {
    /// Whether the event has been finalized.
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.outcome.is_some()
    }

    /// Total rework lines attributed through violations.
    #[must_use]
    pub fn violation_cost(&self) -> u64 {
        self.violations.iter().map(|v| v.cost).sum()
    }
}

/// Derived ranking entry for a rule's violations. Not persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationRanking {
    /// The violated rule.
    pub rule_id: RuleId,
    /// Number of recorded violations.
    pub frequency: u64,
    /// Total attributed rework lines.
    pub cost: u64,
    /// `frequency × cost`.
    pub score: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> RunEvent {
        RunEvent {
            schema_version: EVENT_SCHEMA_VERSION,
            id: RunId::from("run-1"),
            task_intent: TaskIntent::BugFix,
            prompt_digest: "abc123".into(),
            guidance_hash: "deadbeefcafe0123".into(),
            retrieved_rule_ids: vec![RuleId::from("R001")],
            tools_used: vec!["bash".into()],
            commands: vec!["cargo test".into()],
            files_modified: vec!["src/lib.rs".into()],
            diff_summary: DiffSummary {
                lines_added: 80,
                lines_removed: 20,
                files_changed: 2,
                rework_lines: 10,
            },
            tests_passed: Some(true),
            violations: Vec::new(),
            started_at: "2025-06-01T10:00:00Z".into(),
            finalized_at: None,
            outcome: None,
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn rework_ratio() {
        let diff = DiffSummary {
            lines_added: 80,
            lines_removed: 20,
            files_changed: 1,
            rework_lines: 25,
        };
        assert!((diff.rework_ratio() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn rework_ratio_zero_denominator_is_zero() {
        let diff = DiffSummary {
            rework_lines: 10,
            ..DiffSummary::default()
        };
        assert_eq!(diff.rework_ratio(), 0.0);
    }

    #[test]
    fn event_is_finalized_when_outcome_set() {
        let mut event = sample_event();
        assert!(!event.is_finalized());
        event.outcome = Some(RunOutcome::Success);
        assert!(event.is_finalized());
    }

    #[test]
    fn violation_cost_sums() {
        let mut event = sample_event();
        event.violations.push(Violation {
            rule_id: RuleId::from("R001"),
            gate_name: "secrets".into(),
            detail: "x".into(),
            severity: GateDecision::Block,
            occurred_at: "2025-06-01T10:01:00Z".into(),
            cost: 30,
        });
        event.violations.push(Violation {
            rule_id: RuleId::from("R002"),
            gate_name: "diff-size".into(),
            detail: "y".into(),
            severity: GateDecision::Warn,
            occurred_at: "2025-06-01T10:02:00Z".into(),
            cost: 12,
        });
        assert_eq!(event.violation_cost(), 42);
    }

    #[test]
    fn serde_roundtrip_camel_case() {
        let event = sample_event();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["schemaVersion"], 1);
        assert_eq!(json["taskIntent"], "bug-fix");
        assert_eq!(json["diffSummary"]["linesAdded"], 80);
        let back: RunEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn unknown_fields_are_preserved() {
        let mut json = serde_json::to_value(sample_event()).unwrap();
        json["futureField"] = serde_json::json!({"nested": true});
        let event: RunEvent = serde_json::from_value(json).unwrap();
        assert_eq!(event.extra["futureField"]["nested"], true);

        let rewritten = serde_json::to_value(&event).unwrap();
        assert_eq!(rewritten["futureField"]["nested"], true);
    }

    #[test]
    fn outcome_serde_lowercase() {
        assert_eq!(
            serde_json::to_string(&RunOutcome::Aborted).unwrap(),
            "\"aborted\""
        );
    }
}
