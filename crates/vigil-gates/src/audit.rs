//! Advisory audit trail of gate evaluations.
//!
//! Process-local, bounded, and entirely outside the decision path: gates
//! stay pure, and the orchestrator feeds results here after evaluation.
//! Timestamps are recorded for operators but never influence decisions.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::types::{GateDecision, GateResult};

/// Default cap on retained entries.
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

/// One audited evaluation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// Entry point (`command`, `tool-use`, `edit`).
    pub entry_point: String,
    /// A short description of the input (tool name, path, or truncated
    /// command).
    pub subject: String,
    /// The gate results, in evaluation order.
    pub results: Vec<GateResult>,
    /// Evaluation timestamp (ISO 8601).
    pub timestamp: String,
}

/// Aggregate statistics over the retained entries.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditStats {
    /// Total retained evaluations.
    pub total: usize,
    /// Evaluations containing at least one block.
    pub blocked: usize,
    /// Evaluations containing at least one warn or confirmation.
    pub flagged: usize,
    /// Counts by gate name, for triggered gates only.
    pub by_gate: HashMap<String, usize>,
}

/// Bounded in-memory audit log.
#[derive(Debug)]
pub struct AuditTrail {
    entries: VecDeque<AuditEntry>,
    max_entries: usize,
}

impl AuditTrail {
    /// Create a trail retaining at most `max_entries` evaluations.
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_entries: max_entries.max(1),
        }
    }

    /// Record an evaluation, evicting the oldest entry when full.
    pub fn log(&mut self, entry_point: &str, subject: &str, results: &[GateResult]) {
        if self.entries.len() == self.max_entries {
            let _ = self.entries.pop_front();
        }
        self.entries.push_back(AuditEntry {
            entry_point: entry_point.to_owned(),
            subject: vigil_core::text::truncate_str(subject, 200),
            results: results.to_vec(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        });
    }

    /// All retained entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> impl Iterator<Item = &AuditEntry> {
        self.entries.iter()
    }

    /// Number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the trail is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Compute statistics over the retained entries.
    #[must_use]
    pub fn stats(&self) -> AuditStats {
        let mut stats = AuditStats {
            total: self.entries.len(),
            ..AuditStats::default()
        };

        for entry in &self.entries {
            let mut blocked = false;
            let mut flagged = false;
            for result in &entry.results {
                match result.decision {
                    GateDecision::Block => blocked = true,
                    GateDecision::Warn | GateDecision::RequireConfirmation => flagged = true,
                    GateDecision::Allow => continue,
                }
                *stats
                    .by_gate
                    .entry(result.gate_name.to_string())
                    .or_default() += 1;
            }
            if blocked {
                stats.blocked += 1;
            }
            if flagged {
                stats.flagged += 1;
            }
        }

        stats
    }
}

impl Default for AuditTrail {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GateName, GateResult};

    fn allow() -> Vec<GateResult> {
        vec![GateResult::allow(GateName::Secrets)]
    }

    fn block() -> Vec<GateResult> {
        vec![GateResult::triggered(
            GateName::Secrets,
            GateDecision::Block,
            "secret found",
        )]
    }

    fn warn() -> Vec<GateResult> {
        vec![GateResult::triggered(
            GateName::DiffSize,
            GateDecision::Warn,
            "large diff",
        )]
    }

    #[test]
    fn new_trail_is_empty() {
        let trail = AuditTrail::default();
        assert!(trail.is_empty());
        assert_eq!(trail.stats(), AuditStats::default());
    }

    #[test]
    fn log_retains_entries() {
        let mut trail = AuditTrail::default();
        trail.log("command", "cargo build", &allow());
        assert_eq!(trail.len(), 1);
        let entry = trail.entries().next().unwrap();
        assert_eq!(entry.entry_point, "command");
        assert_eq!(entry.subject, "cargo build");
    }

    #[test]
    fn capacity_evicts_oldest() {
        let mut trail = AuditTrail::new(2);
        trail.log("command", "first", &allow());
        trail.log("command", "second", &allow());
        trail.log("command", "third", &allow());
        assert_eq!(trail.len(), 2);
        let subjects: Vec<_> = trail.entries().map(|e| e.subject.as_str()).collect();
        assert_eq!(subjects, vec!["second", "third"]);
    }

    #[test]
    fn stats_count_blocked_and_flagged() {
        let mut trail = AuditTrail::default();
        trail.log("command", "a", &allow());
        trail.log("edit", "b", &warn());
        trail.log("tool-use", "c", &block());

        let stats = trail.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.blocked, 1);
        assert_eq!(stats.flagged, 1);
        assert_eq!(stats.by_gate["secrets"], 1);
        assert_eq!(stats.by_gate["diff-size"], 1);
    }

    #[test]
    fn long_subject_is_truncated() {
        let mut trail = AuditTrail::default();
        let long = "x".repeat(500);
        trail.log("command", &long, &allow());
        assert!(trail.entries().next().unwrap().subject.chars().count() <= 201);
    }
}
