//! Pluggable run evaluators.
//!
//! An [`Evaluator`] scores one finalized [`RunEvent`]; the ledger runs all
//! registered evaluators in registration order at finalization. Five
//! built-ins ship with the crate:
//!
//! 1. [`TestsPass`] — passes iff the run's test suite passed
//! 2. [`ForbiddenCommandScan`] — fails on any recorded command matching a
//!    configured pattern
//! 3. [`ForbiddenDependencyScan`] — fails when modified files introduce a
//!    disallowed dependency token
//! 4. [`ViolationRate`] — fails when the rolling-window violation rate
//!    exceeds a threshold
//! 5. [`DiffQuality`] — fails when the rework ratio exceeds a maximum

use regex::Regex;
use serde::{Deserialize, Serialize};

use vigil_core::errors::{GuidanceError, Result};

use crate::event::RunEvent;

/// Default rework-ratio ceiling for [`DiffQuality`].
pub const DEFAULT_MAX_REWORK_RATIO: f64 = 0.30;

/// Outcome of one evaluator over one event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluatorResult {
    /// Evaluator name.
    pub name: String,
    /// Whether the event passed this evaluator.
    pub passed: bool,
    /// Evaluator-specific score (rate, ratio, count).
    pub score: f64,
    /// Human-readable detail.
    pub detail: String,
}

/// A metric computed over a finalized run event.
///
/// `history` holds the previously finalized events, oldest first, for
/// evaluators that need a rolling window.
pub trait Evaluator: Send + Sync {
    /// Stable evaluator name.
    fn name(&self) -> &str;

    /// Evaluate one finalized event.
    fn evaluate(&self, event: &RunEvent, history: &[RunEvent]) -> EvaluatorResult;
}

// ─────────────────────────────────────────────────────────────────────────────
// tests-pass
// ─────────────────────────────────────────────────────────────────────────────

/// Passes iff `event.tests_passed == Some(true)`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TestsPass;

impl Evaluator for TestsPass {
    fn name(&self) -> &str {
        "tests-pass"
    }

    fn evaluate(&self, event: &RunEvent, _history: &[RunEvent]) -> EvaluatorResult {
        let passed = event.tests_passed == Some(true);
        EvaluatorResult {
            name: self.name().to_owned(),
            passed,
            score: if passed { 1.0 } else { 0.0 },
            detail: match event.tests_passed {
                Some(true) => "test suite passed".to_owned(),
                Some(false) => "test suite failed".to_owned(),
                None => "no test result recorded".to_owned(),
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// forbidden-command-scan
// ─────────────────────────────────────────────────────────────────────────────

/// Fails when any recorded command matches a configured pattern.
#[derive(Debug)]
pub struct ForbiddenCommandScan {
    patterns: Vec<Regex>,
}

impl ForbiddenCommandScan {
    /// Compile the forbidden patterns. Invalid regexes are pattern errors.
    pub fn new(patterns: &[String]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|source| GuidanceError::Pattern {
                    pattern: p.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }
}

impl Evaluator for ForbiddenCommandScan {
    fn name(&self) -> &str {
        "forbidden-command-scan"
    }

    #[allow(clippy::cast_precision_loss)]
    fn evaluate(&self, event: &RunEvent, _history: &[RunEvent]) -> EvaluatorResult {
        let offending: Vec<&String> = event
            .commands
            .iter()
            .filter(|cmd| self.patterns.iter().any(|p| p.is_match(cmd)))
            .collect();

        EvaluatorResult {
            name: self.name().to_owned(),
            passed: offending.is_empty(),
            score: offending.len() as f64,
            detail: if offending.is_empty() {
                "no forbidden commands".to_owned()
            } else {
                format!("{} forbidden command(s) recorded", offending.len())
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// forbidden-dependency-scan
// ─────────────────────────────────────────────────────────────────────────────

/// Fails when modified files mention a disallowed dependency token.
///
/// Commands are out of scope here; they belong to
/// [`ForbiddenCommandScan`].
#[derive(Clone, Debug)]
pub struct ForbiddenDependencyScan {
    tokens: Vec<String>,
}

impl ForbiddenDependencyScan {
    /// Scan for the given dependency tokens (matched as substrings).
    #[must_use]
    pub fn new(tokens: Vec<String>) -> Self {
        Self { tokens }
    }
}

impl Evaluator for ForbiddenDependencyScan {
    fn name(&self) -> &str {
        "forbidden-dependency-scan"
    }

    #[allow(clippy::cast_precision_loss)]
    fn evaluate(&self, event: &RunEvent, _history: &[RunEvent]) -> EvaluatorResult {
        let hits: Vec<&String> = self
            .tokens
            .iter()
            .filter(|token| event.files_modified.iter().any(|f| f.contains(*token)))
            .collect();

        EvaluatorResult {
            name: self.name().to_owned(),
            passed: hits.is_empty(),
            score: hits.len() as f64,
            detail: if hits.is_empty() {
                "no disallowed dependencies".to_owned()
            } else {
                format!("disallowed dependency token(s): {hits:?}")
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// violation-rate
// ─────────────────────────────────────────────────────────────────────────────

/// Fails when violations per 10 tasks over the rolling window exceed the
/// threshold. The window covers the current event plus the most recent
/// `window - 1` finalized events.
#[derive(Clone, Copy, Debug)]
pub struct ViolationRate {
    /// Window size in events.
    pub window: usize,
    /// Maximum allowed violations per 10 tasks.
    pub threshold: f64,
}

impl Default for ViolationRate {
    fn default() -> Self {
        Self {
            window: 10,
            threshold: 5.0,
        }
    }
}

impl Evaluator for ViolationRate {
    fn name(&self) -> &str {
        "violation-rate"
    }

    #[allow(clippy::cast_precision_loss)]
    fn evaluate(&self, event: &RunEvent, history: &[RunEvent]) -> EvaluatorResult {
        let window = self.window.max(1);
        let prior = history.len().min(window - 1);
        let recent = &history[history.len() - prior..];

        let events = prior + 1;
        let violations: usize = recent
            .iter()
            .map(|e| e.violations.len())
            .sum::<usize>()
            + event.violations.len();

        let rate = violations as f64 / events as f64 * 10.0;
        EvaluatorResult {
            name: self.name().to_owned(),
            passed: rate <= self.threshold,
            score: rate,
            detail: format!(
                "{violations} violation(s) over {events} event(s): {rate:.2} per 10 tasks"
            ),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// diff-quality
// ─────────────────────────────────────────────────────────────────────────────

/// Fails when `reworkLines / (linesAdded + linesRemoved)` exceeds the
/// maximum. An empty diff passes.
#[derive(Clone, Copy, Debug)]
pub struct DiffQuality {
    /// Maximum allowed rework ratio.
    pub max_rework_ratio: f64,
}

impl Default for DiffQuality {
    fn default() -> Self {
        Self {
            max_rework_ratio: DEFAULT_MAX_REWORK_RATIO,
        }
    }
}

impl Evaluator for DiffQuality {
    fn name(&self) -> &str {
        "diff-quality"
    }

    fn evaluate(&self, event: &RunEvent, _history: &[RunEvent]) -> EvaluatorResult {
        let ratio = event.diff_summary.rework_ratio();
        EvaluatorResult {
            name: self.name().to_owned(),
            passed: ratio <= self.max_rework_ratio,
            score: ratio,
            detail: format!(
                "rework ratio {ratio:.2} (max {:.2})",
                self.max_rework_ratio
            ),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
