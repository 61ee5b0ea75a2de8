//! The control-plane orchestrator.
//!
//! Owns the live policy bundle (through the retriever), the frozen gate
//! config, the ledger, and the optimizer. Snapshots rather than shared
//! pointers cross component boundaries: retrievals read an `Arc`
//! snapshot of the bundle, and gate results are plain values.
//!
//! Locking discipline:
//! - `ledger`: one mutex; callers of run-scoped operations already hold
//!   the single-writer contract per run ID.
//! - `optimizer`: non-reentrant; a second `optimize()` while a cycle is
//!   in flight fails with an invalid-state error instead of waiting.
//! - `audit`: advisory log outside the decision path.

use parking_lot::Mutex;
use tracing::debug;

use vigil_compiler::{compile, CompilerOptions};
use vigil_core::errors::{GuidanceError, Result};
use vigil_core::hash::sha256_16;
use vigil_core::ids::RunId;
use vigil_core::rules::BundleManifest;
use vigil_gates::{
    aggregate, AuditStats, AuditTrail, GateConfig, GateConfigOptions, GateDecision, GateName,
    GateResult, Gates,
};
use vigil_ledger::evaluators::{
    DiffQuality, EvaluatorResult, ForbiddenCommandScan, ForbiddenDependencyScan, TestsPass,
    ViolationRate,
};
use vigil_ledger::{JsonlStore, Ledger, LedgerMetrics, RunOutcome, TaskContext, Violation, ViolationRanking};
use vigil_optimizer::{
    AbExecutor, CycleOutcome, EstimatedExecutor, Optimizer, OptimizerOptions, PromotionTracker,
};
use vigil_retrieval::{
    IntentClassification, RetrievalRequest, RetrievalResult, Retriever, RetrieverOptions,
};

use crate::config::GuidanceConfig;

/// Gate results plus their aggregate for one evaluation.
#[derive(Clone, Debug)]
pub struct GateEvaluation {
    /// Per-gate results in evaluation order.
    pub results: Vec<GateResult>,
    /// The max-severity result.
    pub aggregate: GateResult,
}

impl GateEvaluation {
    fn from_results(results: Vec<GateResult>) -> Self {
        let aggregate =
            aggregate(&results).unwrap_or_else(|| GateResult::allow(GateName::Secrets));
        Self { results, aggregate }
    }

    /// Whether the host may proceed without user involvement.
    #[must_use]
    pub fn proceeds(&self) -> bool {
        self.aggregate.decision <= GateDecision::Warn
    }
}

/// A started run: its ledger event ID and the retrieval that seeded it.
#[derive(Clone, Debug)]
pub struct RunHandle {
    /// Ledger event ID for the run.
    pub run_id: RunId,
    /// Policy retrieved for the task.
    pub retrieval: RetrievalResult,
}

/// The deterministic policy engine governing an agent's tool calls.
pub struct ControlPlane {
    config: GuidanceConfig,
    retriever: Retriever,
    gates: Gates,
    ledger: Mutex<Ledger>,
    optimizer: Mutex<Optimizer>,
    audit: Mutex<AuditTrail>,
}

impl ControlPlane {
    /// Build a control plane with the estimator A/B executor.
    pub fn new(config: GuidanceConfig) -> Result<Self> {
        Self::with_executor(config, Box::new(EstimatedExecutor))
    }

    /// Build a control plane with an injected A/B executor.
    pub fn with_executor(config: GuidanceConfig, executor: Box<dyn AbExecutor>) -> Result<Self> {
        let gate_config = GateConfig::new(GateConfigOptions {
            destructive_patterns: config.destructive_patterns.clone(),
            extra_destructive_patterns: config.extra_destructive_patterns.clone(),
            secret_patterns: config.secret_patterns.clone(),
            extra_secret_patterns: config.extra_secret_patterns.clone(),
            allowed_tools: config.allowed_tools.clone(),
            diff_size_threshold: config.diff_size_threshold,
        })?;

        let retriever = Retriever::new(RetrieverOptions {
            top_k: config.top_k,
            intent_boost: config.intent_boost,
            risk_boost_critical: config.risk_boost_critical,
            risk_boost_high: config.risk_boost_high,
            risk_boost_medium: config.risk_boost_medium,
            max_constitution_lines: config.max_constitution_lines,
        });

        let mut ledger = match config.state_file("events.log") {
            Some(path) => Ledger::with_store(JsonlStore::new(path))?,
            None => Ledger::new(),
        };
        ledger.register_evaluator(Box::new(TestsPass));
        if !config.forbidden_command_patterns.is_empty() {
            ledger.register_evaluator(Box::new(ForbiddenCommandScan::new(
                &config.forbidden_command_patterns,
            )?));
        }
        if !config.forbidden_dependency_tokens.is_empty() {
            ledger.register_evaluator(Box::new(ForbiddenDependencyScan::new(
                config.forbidden_dependency_tokens.clone(),
            )));
        }
        ledger.register_evaluator(Box::new(ViolationRate::default()));
        ledger.register_evaluator(Box::new(DiffQuality {
            max_rework_ratio: config.max_rework_ratio,
        }));

        let mut optimizer = Optimizer::new(
            OptimizerOptions {
                top_violations_per_cycle: config.top_violations_per_cycle,
                promotion_wins: config.promotion_wins,
                improvement_threshold: config.improvement_threshold,
                max_risk_increase: config.max_risk_increase,
                min_events_for_optimization: config.min_events_for_optimization,
                ..OptimizerOptions::default()
            },
            executor,
        );
        if let Some(path) = config.state_file("tracker.json") {
            optimizer = optimizer.with_tracker(PromotionTracker::with_path(path));
        }
        if let Some(path) = config.state_file("adrs.log") {
            optimizer = optimizer.with_adr_store(JsonlStore::new(path))?;
        }

        Ok(Self {
            config,
            retriever,
            gates: Gates::new(gate_config),
            ledger: Mutex::new(ledger),
            optimizer: Mutex::new(optimizer),
            audit: Mutex::new(AuditTrail::default()),
        })
    }

    /// Initialize the tracing subscriber at the configured level.
    pub fn init_logging(&self) {
        vigil_core::logging::init_subscriber(&self.config.log_level);
    }

    /// The configuration in force.
    #[must_use]
    pub fn config(&self) -> &GuidanceConfig {
        &self.config
    }

    // ── Policy lifecycle ─────────────────────────────────────────────────

    /// Compile a rules document (plus optional overlay), index it, and
    /// persist the manifest. Returns the compile warnings.
    pub fn load_rules(&self, primary: &str, overlay: Option<&str>) -> Result<Vec<String>> {
        let bundle = compile(
            primary,
            overlay,
            &CompilerOptions {
                max_constitution_lines: self.config.max_constitution_lines,
            },
        )?;
        let warnings = bundle.warnings.clone();

        if let Some(path) = self.config.state_file("manifest.json") {
            let json = serde_json::to_string_pretty(&bundle.manifest)
                .map_err(|e| GuidanceError::config(format!("unserializable manifest: {e}")))?;
            std::fs::write(&path, json)
                .map_err(|e| GuidanceError::persistence(path.display().to_string(), e))?;
        }

        self.retriever.index(bundle)?;
        debug!(warnings = warnings.len(), "rules loaded");
        Ok(warnings)
    }

    /// Manifest of the currently indexed bundle.
    #[must_use]
    pub fn manifest(&self) -> Option<BundleManifest> {
        self.retriever.snapshot().map(|b| b.manifest.clone())
    }

    /// Classify a task description without retrieving.
    #[must_use]
    pub fn classify_intent(&self, description: &str) -> IntentClassification {
        self.retriever.classify_intent(description)
    }

    /// Retrieve policy for a task.
    pub fn retrieve(&self, request: &RetrievalRequest) -> Result<RetrievalResult> {
        self.retriever.retrieve(request)
    }

    /// The retriever (for the optimizer and tests).
    #[must_use]
    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    // ── Gate entry points ────────────────────────────────────────────────

    /// Evaluate a shell command (destructive-ops + secrets).
    #[must_use]
    pub fn evaluate_command(&self, command: &str) -> GateEvaluation {
        let results = self.gates.evaluate_command(command);
        self.audit.lock().log("command", command, &results);
        GateEvaluation::from_results(results)
    }

    /// Evaluate a tool invocation (allowlist + secrets over params).
    #[must_use]
    pub fn evaluate_tool_use(
        &self,
        tool_name: &str,
        params: &serde_json::Value,
    ) -> GateEvaluation {
        let results = self.gates.evaluate_tool_use(tool_name, params);
        self.audit.lock().log("tool-use", tool_name, &results);
        GateEvaluation::from_results(results)
    }

    /// Evaluate a file edit (diff-size + secrets over content).
    #[must_use]
    pub fn evaluate_edit(&self, path: &str, content: &str, diff_lines: usize) -> GateEvaluation {
        let results = self.gates.evaluate_edit(path, content, diff_lines);
        self.audit.lock().log("edit", path, &results);
        GateEvaluation::from_results(results)
    }

    /// Audit statistics over recent gate evaluations.
    #[must_use]
    pub fn audit_stats(&self) -> AuditStats {
        self.audit.lock().stats()
    }

    // ── Run lifecycle ────────────────────────────────────────────────────

    /// Start a run: retrieve policy for the task and open a ledger event.
    pub fn start_run(&self, request: &RetrievalRequest) -> Result<RunHandle> {
        let retrieval = self.retriever.retrieve(request)?;
        let guidance_hash = self
            .retriever
            .snapshot()
            .map(|b| b.constitution.hash.clone())
            .unwrap_or_default();

        let task = TaskContext {
            intent: Some(retrieval.detected_intent),
            prompt_digest: sha256_16(&request.task_description),
            guidance_hash,
            retrieved_rule_ids: retrieval
                .selected_shards
                .iter()
                .map(|s| s.rule_id.clone())
                .collect(),
        };
        let run_id = self.ledger.lock().create_event(&task);
        Ok(RunHandle { run_id, retrieval })
    }

    /// Gate a command within a run: evaluate, record the command, and
    /// record a violation for every triggered gate. Commands carry no
    /// diff, so no rework cost is attributed.
    pub fn command_for_run(&self, run_id: &RunId, command: &str) -> Result<GateEvaluation> {
        let evaluation = self.evaluate_command(command);
        let mut ledger = self.ledger.lock();
        ledger.record_command(run_id, command)?;
        ledger.record_tool_use(run_id, "bash")?;
        record_triggered(&mut ledger, run_id, &evaluation.results, 0)?;
        Ok(evaluation)
    }

    /// Gate a tool invocation within a run.
    pub fn tool_use_for_run(
        &self,
        run_id: &RunId,
        tool_name: &str,
        params: &serde_json::Value,
    ) -> Result<GateEvaluation> {
        let evaluation = self.evaluate_tool_use(tool_name, params);
        let mut ledger = self.ledger.lock();
        ledger.record_tool_use(run_id, tool_name)?;
        record_triggered(&mut ledger, run_id, &evaluation.results, 0)?;
        Ok(evaluation)
    }

    /// Gate an edit within a run.
    ///
    /// A triggered gate attributes the edit's line count as the
    /// violation's rework cost, so rankings weigh edit violations by how
    /// much work they put at risk.
    pub fn edit_for_run(
        &self,
        run_id: &RunId,
        path: &str,
        content: &str,
        diff_lines: usize,
    ) -> Result<GateEvaluation> {
        let evaluation = self.evaluate_edit(path, content, diff_lines);
        let mut ledger = self.ledger.lock();
        ledger.record_file_modified(run_id, path)?;
        record_triggered(&mut ledger, run_id, &evaluation.results, diff_lines as u64)?;
        Ok(evaluation)
    }

    /// Record a violation attributed to a rule.
    pub fn record_violation(&self, run_id: &RunId, violation: Violation) -> Result<()> {
        self.ledger.lock().record_violation(run_id, violation)
    }

    /// Accumulate diff statistics for a run.
    pub fn accumulate_diff(
        &self,
        run_id: &RunId,
        added: u64,
        removed: u64,
        files: u64,
        rework_lines: u64,
    ) -> Result<()> {
        self.ledger
            .lock()
            .accumulate_diff(run_id, added, removed, files, rework_lines)
    }

    /// Record the test suite outcome for a run.
    pub fn set_tests_passed(&self, run_id: &RunId, passed: bool) -> Result<()> {
        self.ledger.lock().set_tests_passed(run_id, passed)
    }

    /// Finalize a run. Must also be called with
    /// [`RunOutcome::Aborted`] when a run is cancelled, to release the
    /// event.
    pub fn finalize_run(
        &self,
        run_id: &RunId,
        outcome: RunOutcome,
    ) -> Result<Vec<EvaluatorResult>> {
        self.ledger.lock().finalize_event(run_id, outcome)
    }

    // ── Ledger queries ───────────────────────────────────────────────────

    /// Windowed ledger metrics (0 = all events).
    #[must_use]
    pub fn metrics(&self, window: usize) -> LedgerMetrics {
        self.ledger.lock().compute_metrics(window)
    }

    /// Current violation rankings.
    #[must_use]
    pub fn rank_violations(&self) -> Vec<ViolationRanking> {
        self.ledger.lock().rank_violations()
    }

    /// Number of finalized events.
    #[must_use]
    pub fn finalized_events(&self) -> usize {
        self.ledger.lock().events().len()
    }

    // ── Optimization ─────────────────────────────────────────────────────

    /// Run one optimization cycle.
    ///
    /// Non-reentrant: a concurrent call while a cycle is in flight fails
    /// with an invalid-state error rather than queueing.
    pub fn optimize(&self) -> Result<CycleOutcome> {
        let mut optimizer = self.optimizer.try_lock().ok_or_else(|| {
            GuidanceError::invalid_state("an optimization cycle is already in flight")
        })?;
        let ledger = self.ledger.lock();
        optimizer.run_cycle(&ledger, &self.retriever)
    }
}

/// Record one violation per triggered gate result, attributing `cost`
/// rework lines to each (the edit's line count for edit gates, zero for
/// inputs without a diff).
fn record_triggered(
    ledger: &mut Ledger,
    run_id: &RunId,
    results: &[GateResult],
    cost: u64,
) -> Result<()> {
    for result in results {
        if result.decision == GateDecision::Allow {
            continue;
        }
        let rule_id = result
            .triggered_rules
            .first()
            .cloned()
            .unwrap_or_else(|| result.gate_name.to_string());
        ledger.record_violation(
            run_id,
            Violation {
                rule_id: rule_id.into(),
                gate_name: result.gate_name.to_string(),
                detail: result.reason.clone(),
                severity: result.decision,
                occurred_at: chrono::Utc::now().to_rfc3339(),
                cost,
            },
        )?;
    }
    Ok(())
}
