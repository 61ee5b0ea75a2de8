//! A/B execution capability.
//!
//! [`AbExecutor`] runs a compliance suite against baseline and candidate
//! rule sets and returns comparative metrics. A real executor (headless
//! test runs) is preferred; [`EstimatedExecutor`] is a conservative
//! fallback with fixed reduction constants, used only when nothing is
//! wired in.

use vigil_core::errors::Result;

use crate::changes::{AbMetrics, AbTestResult, RuleChange, RuleChangeKind};

/// Capability: evaluate one change against the baseline.
///
/// Implementations may block for up to `timeout_ms`; exceeding it must
/// surface a timeout error, which aborts the optimizer cycle.
pub trait AbExecutor: Send + Sync {
    /// Evaluate `change` and return comparative metrics with relative
    /// deltas. `should_promote` is decided by the optimizer, not here.
    fn evaluate(
        &self,
        change: &RuleChange,
        baseline: &AbMetrics,
        timeout_ms: u64,
    ) -> Result<AbTestResult>;
}

/// Fallback executor using fixed violation-reduction estimates:
/// modify 40%, add 60%, promote 80%, remove −20% (a regression).
#[derive(Clone, Copy, Debug, Default)]
pub struct EstimatedExecutor;

impl EstimatedExecutor {
    /// Assumed relative violation reduction for a change kind.
    #[must_use]
    pub fn estimated_reduction(kind: RuleChangeKind) -> f64 {
        match kind {
            RuleChangeKind::Modify => 0.40,
            RuleChangeKind::Add => 0.60,
            RuleChangeKind::Promote => 0.80,
            RuleChangeKind::Remove => -0.20,
            RuleChangeKind::Demote => 0.0,
        }
    }
}

impl AbExecutor for EstimatedExecutor {
    fn evaluate(
        &self,
        change: &RuleChange,
        baseline: &AbMetrics,
        _timeout_ms: u64,
    ) -> Result<AbTestResult> {
        let reduction = Self::estimated_reduction(change.kind);
        let candidate = AbMetrics {
            violation_rate: baseline.violation_rate * (1.0 - reduction),
            rework_ratio: baseline.rework_ratio * (1.0 - reduction),
            risk_score: baseline.risk_score,
        };

        Ok(AbTestResult {
            baseline_metrics: *baseline,
            candidate_metrics: candidate,
            rework_delta: -reduction,
            violation_delta: -reduction,
            risk_delta: 0.0,
            should_promote: false,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn change(kind: RuleChangeKind) -> RuleChange {
        RuleChange {
            kind,
            target_rule_id: None,
            proposed_text: None,
            rationale: "test".into(),
        }
    }

    const BASELINE: AbMetrics = AbMetrics {
        violation_rate: 5.0,
        rework_ratio: 0.4,
        risk_score: 0.2,
    };

    #[test]
    fn modify_estimates_forty_percent() {
        let result = EstimatedExecutor
            .evaluate(&change(RuleChangeKind::Modify), &BASELINE, 1000)
            .unwrap();
        assert!((result.violation_delta + 0.40).abs() < 1e-9);
        assert!((result.candidate_metrics.violation_rate - 3.0).abs() < 1e-9);
        assert!((result.candidate_metrics.rework_ratio - 0.24).abs() < 1e-9);
    }

    #[test]
    fn promote_estimates_eighty_percent() {
        let result = EstimatedExecutor
            .evaluate(&change(RuleChangeKind::Promote), &BASELINE, 1000)
            .unwrap();
        assert!((result.rework_delta + 0.80).abs() < 1e-9);
    }

    #[test]
    fn remove_estimates_a_regression() {
        let result = EstimatedExecutor
            .evaluate(&change(RuleChangeKind::Remove), &BASELINE, 1000)
            .unwrap();
        assert!(result.rework_delta > 0.0);
        assert!(result.candidate_metrics.violation_rate > BASELINE.violation_rate);
    }

    #[test]
    fn risk_is_unchanged_by_estimates() {
        let result = EstimatedExecutor
            .evaluate(&change(RuleChangeKind::Add), &BASELINE, 1000)
            .unwrap();
        assert_eq!(result.risk_delta, 0.0);
        assert_eq!(result.candidate_metrics.risk_score, BASELINE.risk_score);
    }

    #[test]
    fn should_promote_is_left_to_the_optimizer() {
        let result = EstimatedExecutor
            .evaluate(&change(RuleChangeKind::Promote), &BASELINE, 1000)
            .unwrap();
        assert!(!result.should_promote);
    }
}
