//! Gate decision and result types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What a gate decided, ordered by severity: allow < warn <
/// require-confirmation < block.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "kebab-case")]
pub enum GateDecision {
    /// Nothing triggered.
    #[default]
    Allow,
    /// Advisory; the host may proceed.
    Warn,
    /// The host must ask the user before proceeding.
    RequireConfirmation,
    /// The tool call must not proceed.
    Block,
}

impl GateDecision {
    /// Numeric severity (allow 0 … block 3).
    #[must_use]
    pub fn severity(&self) -> u8 {
        match self {
            Self::Allow => 0,
            Self::Warn => 1,
            Self::RequireConfirmation => 2,
            Self::Block => 3,
        }
    }
}

impl fmt::Display for GateDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => write!(f, "allow"),
            Self::Warn => write!(f, "warn"),
            Self::RequireConfirmation => write!(f, "require-confirmation"),
            Self::Block => write!(f, "block"),
        }
    }
}

/// Which gate produced a result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GateName {
    /// Destructive shell/SQL command patterns.
    DestructiveOps,
    /// Tool allowlist membership.
    ToolAllowlist,
    /// Edit size threshold.
    DiffSize,
    /// Secret material in content or parameters.
    Secrets,
}

impl fmt::Display for GateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DestructiveOps => write!(f, "destructive-ops"),
            Self::ToolAllowlist => write!(f, "tool-allowlist"),
            Self::DiffSize => write!(f, "diff-size"),
            Self::Secrets => write!(f, "secrets"),
        }
    }
}

/// Outcome of one gate evaluation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateResult {
    /// The gate that produced this result.
    pub gate_name: GateName,
    /// The decision.
    pub decision: GateDecision,
    /// Human-readable reason.
    pub reason: String,
    /// IDs of the rules/patterns that triggered.
    pub triggered_rules: Vec<String>,
    /// How to proceed, for blocking and confirmation decisions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
    /// Structured detail (matched pattern, redacted values).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl GateResult {
    /// An allow result for the given gate.
    #[must_use]
    pub fn allow(gate_name: GateName) -> Self {
        Self {
            gate_name,
            decision: GateDecision::Allow,
            reason: String::new(),
            triggered_rules: Vec::new(),
            remediation: None,
            metadata: None,
        }
    }

    /// A triggered result.
    #[must_use]
    pub fn triggered(
        gate_name: GateName,
        decision: GateDecision,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            gate_name,
            decision,
            reason: reason.into(),
            triggered_rules: Vec::new(),
            remediation: None,
            metadata: None,
        }
    }

    /// Attach triggering rule/pattern identifiers.
    #[must_use]
    pub fn with_triggered_rules(mut self, rules: Vec<String>) -> Self {
        self.triggered_rules = rules;
        self
    }

    /// Attach a remediation string.
    #[must_use]
    pub fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = Some(remediation.into());
        self
    }

    /// Attach structured metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Aggregate gate results to the single most severe one.
///
/// Pure: returns a clone of the max-severity result; ties break to the
/// first result in input order. `None` only for an empty slice.
#[must_use]
pub fn aggregate(results: &[GateResult]) -> Option<GateResult> {
    results
        .iter()
        .max_by(|a, b| {
            // max_by keeps the *last* max; invert equal ordering so the
            // first of a tie wins.
            match a.decision.severity().cmp(&b.decision.severity()) {
                std::cmp::Ordering::Equal => std::cmp::Ordering::Greater,
                other => other,
            }
        })
        .cloned()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
