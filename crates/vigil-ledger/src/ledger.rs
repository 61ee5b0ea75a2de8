//! The run ledger: event lifecycle, rankings, and metrics.
//!
//! Events are mutable while open and frozen at finalization; every
//! mutation after finalization fails with an invalid-state error. The
//! finalized sequence is append-only, so callers only ever observe a
//! prefix of later snapshots.
//!
//! Concurrency contract: the ledger itself is single-writer per event ID;
//! callers serialize `record_*` and `finalize_event` for the same ID.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use vigil_core::errors::{GuidanceError, Result};
use vigil_core::ids::{RuleId, RunId};
use vigil_core::rules::TaskIntent;

use crate::evaluators::{Evaluator, EvaluatorResult};
use crate::event::{
    DiffSummary, RunEvent, RunOutcome, Violation, ViolationRanking, EVENT_SCHEMA_VERSION,
};
use crate::store::JsonlStore;

/// Context captured when a run starts.
#[derive(Clone, Debug, Default)]
pub struct TaskContext {
    /// Classified task intent.
    pub intent: Option<TaskIntent>,
    /// Digest of the task prompt.
    pub prompt_digest: String,
    /// Constitution hash in force for the run.
    pub guidance_hash: String,
    /// Shards retrieved for the run.
    pub retrieved_rule_ids: Vec<RuleId>,
}

/// Windowed ledger metrics.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerMetrics {
    /// Events in the window.
    pub total_events: usize,
    /// Violations in the window.
    pub total_violations: usize,
    /// Violations per 10 tasks.
    pub violation_rate_per_10_tasks: f64,
    /// Mean rework ratio across windowed events.
    pub avg_rework_ratio: f64,
    /// Fraction of windowed events with a success outcome.
    pub pass_rate: f64,
    /// Violation counts by gate name.
    pub by_gate: BTreeMap<String, u64>,
}

/// Append-only run ledger with registered evaluators.
#[derive(Default)]
pub struct Ledger {
    open: BTreeMap<RunId, RunEvent>,
    finalized: Vec<RunEvent>,
    evaluators: Vec<Box<dyn Evaluator>>,
    store: Option<JsonlStore<RunEvent>>,
}

impl Ledger {
    /// An in-memory ledger with no persistence.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A ledger persisting finalized events to `events.log`, preloading
    /// any events already on disk.
    pub fn with_store(store: JsonlStore<RunEvent>) -> Result<Self> {
        let finalized = store.load()?;
        debug!(preloaded = finalized.len(), "ledger loaded from store");
        Ok(Self {
            open: BTreeMap::new(),
            finalized,
            evaluators: Vec::new(),
            store: Some(store),
        })
    }

    /// Register an evaluator. Evaluators run in registration order at
    /// finalization.
    pub fn register_evaluator(&mut self, evaluator: Box<dyn Evaluator>) {
        debug!(name = evaluator.name(), "evaluator registered");
        self.evaluators.push(evaluator);
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Create a new in-progress event and return its ID.
    pub fn create_event(&mut self, task: &TaskContext) -> RunId {
        let id = RunId::generate();
        let event = RunEvent {
            schema_version: EVENT_SCHEMA_VERSION,
            id: id.clone(),
            task_intent: task.intent.unwrap_or(TaskIntent::General),
            prompt_digest: task.prompt_digest.clone(),
            guidance_hash: task.guidance_hash.clone(),
            retrieved_rule_ids: task.retrieved_rule_ids.clone(),
            tools_used: Vec::new(),
            commands: Vec::new(),
            files_modified: Vec::new(),
            diff_summary: DiffSummary::default(),
            tests_passed: None,
            violations: Vec::new(),
            started_at: chrono::Utc::now().to_rfc3339(),
            finalized_at: None,
            outcome: None,
            extra: BTreeMap::new(),
        };
        let _ = self.open.insert(id.clone(), event);
        debug!(run_id = %id, "run event created");
        id
    }

    fn open_event_mut(&mut self, id: &RunId) -> Result<&mut RunEvent> {
        self.open.get_mut(id).ok_or_else(|| {
            GuidanceError::invalid_state(format!("event {id} is unknown or already finalized"))
        })
    }

    /// Record a violation on an open event. Violations keep recording
    /// order within the run.
    pub fn record_violation(&mut self, id: &RunId, violation: Violation) -> Result<()> {
        let event = self.open_event_mut(id)?;
        event.violations.push(violation);
        Ok(())
    }

    /// Accumulate diff statistics on an open event.
    pub fn accumulate_diff(
        &mut self,
        id: &RunId,
        added: u64,
        removed: u64,
        files: u64,
        rework_lines: u64,
    ) -> Result<()> {
        let diff = &mut self.open_event_mut(id)?.diff_summary;
        diff.lines_added += added;
        diff.lines_removed += removed;
        diff.files_changed += files;
        diff.rework_lines += rework_lines;
        Ok(())
    }

    /// Record a tool invocation.
    pub fn record_tool_use(&mut self, id: &RunId, tool: &str) -> Result<()> {
        self.open_event_mut(id)?.tools_used.push(tool.to_owned());
        Ok(())
    }

    /// Record a shell command.
    pub fn record_command(&mut self, id: &RunId, command: &str) -> Result<()> {
        self.open_event_mut(id)?.commands.push(command.to_owned());
        Ok(())
    }

    /// Record a modified file.
    pub fn record_file_modified(&mut self, id: &RunId, path: &str) -> Result<()> {
        self.open_event_mut(id)?
            .files_modified
            .push(path.to_owned());
        Ok(())
    }

    /// Record the test suite outcome.
    pub fn set_tests_passed(&mut self, id: &RunId, passed: bool) -> Result<()> {
        self.open_event_mut(id)?.tests_passed = Some(passed);
        Ok(())
    }

    /// Finalize an event: freeze it, run all evaluators in registration
    /// order, append it to the finalized sequence, and persist it.
    ///
    /// A persistence failure is surfaced after the in-memory append, so
    /// the ledger stays consistent.
    pub fn finalize_event(
        &mut self,
        id: &RunId,
        outcome: RunOutcome,
    ) -> Result<Vec<EvaluatorResult>> {
        let mut event = self.open.remove(id).ok_or_else(|| {
            GuidanceError::invalid_state(format!("event {id} is unknown or already finalized"))
        })?;
        event.finalized_at = Some(chrono::Utc::now().to_rfc3339());
        event.outcome = Some(outcome);

        let results: Vec<EvaluatorResult> = self
            .evaluators
            .iter()
            .map(|evaluator| evaluator.evaluate(&event, &self.finalized))
            .collect();

        for result in &results {
            if !result.passed {
                warn!(
                    run_id = %id,
                    evaluator = result.name,
                    detail = %result.detail,
                    "evaluator failed"
                );
            }
        }

        debug!(run_id = %id, outcome = %outcome, evaluators = results.len(), "run finalized");

        let persist = self.store.as_ref().map(|store| store.append(&event));
        self.finalized.push(event);
        if let Some(Err(e)) = persist {
            return Err(e);
        }

        Ok(results)
    }

    // ── Queries ──────────────────────────────────────────────────────────

    /// Finalized events, oldest first.
    #[must_use]
    pub fn events(&self) -> &[RunEvent] {
        &self.finalized
    }

    /// Number of currently open events.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Rank rules by violation impact: `frequency × cost` descending,
    /// ties by rule ID ascending.
    #[must_use]
    pub fn rank_violations(&self) -> Vec<ViolationRanking> {
        let mut by_rule: BTreeMap<&RuleId, (u64, u64)> = BTreeMap::new();
        for event in &self.finalized {
            for violation in &event.violations {
                let entry = by_rule.entry(&violation.rule_id).or_default();
                entry.0 += 1;
                entry.1 += violation.cost;
            }
        }

        let mut rankings: Vec<ViolationRanking> = by_rule
            .into_iter()
            .map(|(rule_id, (frequency, cost))| ViolationRanking {
                rule_id: rule_id.clone(),
                frequency,
                cost,
                score: frequency * cost,
            })
            .collect();

        rankings.sort_by(|a, b| b.score.cmp(&a.score).then(a.rule_id.cmp(&b.rule_id)));
        rankings
    }

    /// Compute metrics over the most recent `window` finalized events
    /// (0 = all).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn compute_metrics(&self, window: usize) -> LedgerMetrics {
        let events: &[RunEvent] = if window == 0 || window >= self.finalized.len() {
            &self.finalized
        } else {
            &self.finalized[self.finalized.len() - window..]
        };

        let total_events = events.len();
        let total_violations: usize = events.iter().map(|e| e.violations.len()).sum();
        let successes = events
            .iter()
            .filter(|e| e.outcome == Some(RunOutcome::Success))
            .count();

        let mut by_gate: BTreeMap<String, u64> = BTreeMap::new();
        for event in events {
            for violation in &event.violations {
                *by_gate.entry(violation.gate_name.clone()).or_default() += 1;
            }
        }

        let (violation_rate, avg_rework, pass_rate) = if total_events == 0 {
            (0.0, 0.0, 0.0)
        } else {
            (
                total_violations as f64 / total_events as f64 * 10.0,
                events.iter().map(|e| e.diff_summary.rework_ratio()).sum::<f64>()
                    / total_events as f64,
                successes as f64 / total_events as f64,
            )
        };

        LedgerMetrics {
            total_events,
            total_violations,
            violation_rate_per_10_tasks: violation_rate,
            avg_rework_ratio: avg_rework,
            pass_rate,
            by_gate,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
