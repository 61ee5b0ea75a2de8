//! The optimization cycle.
//!
//! `run_cycle` is a single synchronous operation invoked by an external
//! scheduler (at most once per optimization window). It is two-phase:
//! every proposal is evaluated before anything is applied, so an executor
//! failure aborts with the tracker and shard pool untouched.
//!
//! Reentrancy is the caller's responsibility (the runtime wraps the
//! optimizer in a non-reentrant lock); only one cycle may be in flight.

use tracing::{debug, info, warn};

use vigil_core::errors::{GuidanceError, Result};
use vigil_core::ids::RuleId;
use vigil_core::rules::{GuidanceRule, PolicyBundle};
use vigil_ledger::event::ViolationRanking;
use vigil_ledger::ledger::Ledger;
use vigil_ledger::store::JsonlStore;
use vigil_retrieval::Retriever;

use crate::changes::{
    AbMetrics, AbTestResult, AdrDecision, RuleAdr, RuleChange, RuleChangeKind, ADR_SCHEMA_VERSION,
};
use crate::executor::AbExecutor;
use crate::tracker::PromotionTracker;

/// Optimizer tuning options.
#[derive(Clone, Debug)]
pub struct OptimizerOptions {
    /// How many top violations to address per cycle.
    pub top_violations_per_cycle: usize,
    /// Consecutive A/B wins required before applying a change.
    pub promotion_wins: u32,
    /// Minimum relative rework reduction for a win.
    pub improvement_threshold: f64,
    /// Maximum tolerated risk increase for a win.
    pub max_risk_increase: f64,
    /// Minimum new events since the last cycle; below this the cycle is
    /// a no-op.
    pub min_events_for_optimization: usize,
    /// Violation frequency above which an existing rule is sharpened.
    pub modify_frequency_threshold: u64,
    /// Rework cost above which an existing rule is escalated.
    pub modify_cost_threshold: u64,
    /// Deadline for each A/B execution.
    pub ab_timeout_ms: u64,
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        Self {
            top_violations_per_cycle: 3,
            promotion_wins: 2,
            improvement_threshold: 0.10,
            max_risk_increase: 0.05,
            min_events_for_optimization: 10,
            modify_frequency_threshold: 5,
            modify_cost_threshold: 50,
            ab_timeout_ms: 300_000,
        }
    }
}

/// One decided change from a cycle.
#[derive(Clone, Debug)]
pub struct CycleDecision {
    /// The evaluated change.
    pub change: RuleChange,
    /// The A/B result with `should_promote` decided.
    pub result: AbTestResult,
    /// What happened.
    pub decision: AdrDecision,
    /// The ADR number recording it.
    pub adr_number: u64,
}

/// Result of one `run_cycle` invocation.
#[derive(Clone, Debug, Default)]
pub struct CycleOutcome {
    /// Decisions in ranking order; empty when skipped.
    pub decisions: Vec<CycleDecision>,
    /// True when the cycle was a no-op (too few new events).
    pub skipped: bool,
}

/// The weekly A/B optimization loop.
pub struct Optimizer {
    options: OptimizerOptions,
    executor: Box<dyn AbExecutor>,
    tracker: PromotionTracker,
    adr_store: Option<JsonlStore<RuleAdr>>,
    adr_counter: u64,
    events_at_last_cycle: usize,
}

impl Optimizer {
    /// Create an optimizer with an in-memory tracker and no ADR
    /// persistence.
    #[must_use]
    pub fn new(options: OptimizerOptions, executor: Box<dyn AbExecutor>) -> Self {
        Self {
            options,
            executor,
            tracker: PromotionTracker::new(),
            adr_store: None,
            adr_counter: 0,
            events_at_last_cycle: 0,
        }
    }

    /// Use a persistent promotion tracker.
    #[must_use]
    pub fn with_tracker(mut self, tracker: PromotionTracker) -> Self {
        self.tracker = tracker;
        self
    }

    /// Persist ADRs to `adrs.log`, continuing the existing numbering.
    pub fn with_adr_store(mut self, store: JsonlStore<RuleAdr>) -> Result<Self> {
        self.adr_counter = store.load()?.last().map_or(0, |adr| adr.number);
        self.adr_store = Some(store);
        Ok(self)
    }

    /// The promotion tracker (for inspection).
    #[must_use]
    pub fn tracker(&self) -> &PromotionTracker {
        &self.tracker
    }

    /// Run one optimization cycle.
    ///
    /// No-op when fewer than `min_events_for_optimization` events were
    /// finalized since the previous cycle. Any executor error aborts the
    /// cycle before mutations, records an abort ADR, and leaves the
    /// tracker and shard pool unchanged.
    pub fn run_cycle(&mut self, ledger: &Ledger, retriever: &Retriever) -> Result<CycleOutcome> {
        let total_events = ledger.events().len();
        let new_events = total_events.saturating_sub(self.events_at_last_cycle);
        if new_events < self.options.min_events_for_optimization {
            debug!(
                new_events,
                required = self.options.min_events_for_optimization,
                "optimization cycle skipped"
            );
            return Ok(CycleOutcome {
                decisions: Vec::new(),
                skipped: true,
            });
        }

        let bundle = retriever
            .snapshot()
            .ok_or_else(|| GuidanceError::invalid_state("no policy bundle indexed"))?;

        let metrics = ledger.compute_metrics(0);
        let baseline = AbMetrics {
            violation_rate: metrics.violation_rate_per_10_tasks,
            rework_ratio: metrics.avg_rework_ratio,
            risk_score: 1.0 - metrics.pass_rate,
        };

        let rankings: Vec<ViolationRanking> = ledger
            .rank_violations()
            .into_iter()
            .take(self.options.top_violations_per_cycle)
            .collect();

        // Phase 1: propose and evaluate everything before touching state.
        let mut evaluated: Vec<(RuleChange, AbTestResult)> = Vec::new();
        for ranking in &rankings {
            let change = self.propose_change(ranking, &bundle);
            let mut result = match self.executor.evaluate(
                &change,
                &baseline,
                self.options.ab_timeout_ms,
            ) {
                Ok(result) => result,
                Err(e) => {
                    warn!(error = %e, rule_id = %ranking.rule_id, "A/B evaluation failed, aborting cycle");
                    self.append_abort_adr(&change, &e);
                    return Err(e);
                }
            };
            result.should_promote = result.risk_delta <= self.options.max_risk_increase
                && result.rework_delta <= -self.options.improvement_threshold;
            evaluated.push((change, result));
        }

        // Phase 2: apply tracker transitions and winning changes.
        let mut decisions = Vec::new();
        for (change, result) in evaluated {
            let decision = self.apply_decision(&change, &result, retriever)?;
            let adr_number = self.append_adr(&change, &result, decision);
            info!(
                kind = %change.kind,
                target = change.target_rule_id.as_ref().map_or("-", |id| id.as_str()),
                decision = %decision,
                adr = adr_number,
                "optimizer decision"
            );
            decisions.push(CycleDecision {
                change,
                result,
                decision,
                adr_number,
            });
        }

        self.events_at_last_cycle = total_events;
        if let Err(e) = self.tracker.save() {
            warn!(error = %e, "failed to persist promotion tracker");
        }

        Ok(CycleOutcome {
            decisions,
            skipped: false,
        })
    }

    // ── Proposal ─────────────────────────────────────────────────────────

    fn propose_change(&self, ranking: &ViolationRanking, bundle: &PolicyBundle) -> RuleChange {
        let Some(rule) = bundle.find_rule(&ranking.rule_id) else {
            return RuleChange {
                kind: RuleChangeKind::Add,
                target_rule_id: Some(ranking.rule_id.clone()),
                proposed_text: Some(format!(
                    "avoid the behavior behind {}: {} violation(s) costing {} rework lines",
                    ranking.rule_id, ranking.frequency, ranking.cost
                )),
                rationale: format!("no rule matches violated id {}", ranking.rule_id),
            };
        };

        if ranking.frequency > self.options.modify_frequency_threshold {
            return RuleChange {
                kind: RuleChangeKind::Modify,
                target_rule_id: Some(rule.id.clone()),
                proposed_text: Some(format!(
                    "{} (enforced: violated {} times in the last window)",
                    rule.text, ranking.frequency
                )),
                rationale: format!(
                    "frequency {} exceeds {}",
                    ranking.frequency, self.options.modify_frequency_threshold
                ),
            };
        }

        if ranking.cost > self.options.modify_cost_threshold {
            return RuleChange {
                kind: RuleChangeKind::Modify,
                target_rule_id: Some(rule.id.clone()),
                proposed_text: Some(format!(
                    "{} (warning: violations cost {} rework lines)",
                    rule.text, ranking.cost
                )),
                rationale: format!(
                    "cost {} exceeds {} rework lines; priority should be elevated",
                    ranking.cost, self.options.modify_cost_threshold
                ),
            };
        }

        if !rule.is_constitution
            && self.tracker.wins(rule.id.as_str()) >= self.options.promotion_wins.saturating_sub(1)
        {
            return RuleChange {
                kind: RuleChangeKind::Promote,
                target_rule_id: Some(rule.id.clone()),
                proposed_text: None,
                rationale: format!(
                    "local rule with {} accumulated win(s)",
                    self.tracker.wins(rule.id.as_str())
                ),
            };
        }

        RuleChange {
            kind: RuleChangeKind::Modify,
            target_rule_id: Some(rule.id.clone()),
            proposed_text: None,
            rationale: format!("high violation impact (score {})", ranking.score),
        }
    }

    // ── Application ──────────────────────────────────────────────────────

    fn apply_decision(
        &mut self,
        change: &RuleChange,
        result: &AbTestResult,
        retriever: &Retriever,
    ) -> Result<AdrDecision> {
        let Some(target) = &change.target_rule_id else {
            return Ok(AdrDecision::Rejected);
        };
        let key = target.as_str();

        if result.should_promote {
            let count = self.tracker.record_win(key);
            if count >= self.options.promotion_wins {
                self.apply_change(change, target, retriever)?;
                self.tracker.reset(key);
                return Ok(AdrDecision::Promoted);
            }
            return Ok(AdrDecision::Deferred);
        }

        self.tracker.reset(key);
        if change.kind == RuleChangeKind::Promote {
            retriever.apply_demotion(target)?;
            return Ok(AdrDecision::Demoted);
        }
        Ok(AdrDecision::Rejected)
    }

    fn apply_change(
        &self,
        change: &RuleChange,
        target: &RuleId,
        retriever: &Retriever,
    ) -> Result<()> {
        match change.kind {
            RuleChangeKind::Add => {
                let mut rule = GuidanceRule::new(
                    target.clone(),
                    change
                        .proposed_text
                        .clone()
                        .unwrap_or_else(|| format!("avoid violations of {target}")),
                );
                rule.source = vigil_core::rules::RuleSource::Local;
                retriever.add_local_rule(rule)
            }
            RuleChangeKind::Modify | RuleChangeKind::Promote => {
                retriever.apply_promotion(target, change.proposed_text.as_deref())
            }
            RuleChangeKind::Demote | RuleChangeKind::Remove => retriever.apply_demotion(target),
        }
    }

    // ── ADRs ─────────────────────────────────────────────────────────────

    fn append_adr(
        &mut self,
        change: &RuleChange,
        result: &AbTestResult,
        decision: AdrDecision,
    ) -> u64 {
        self.adr_counter += 1;
        let adr = RuleAdr {
            schema_version: ADR_SCHEMA_VERSION,
            number: self.adr_counter,
            title: adr_title(change),
            decision,
            rationale: change.rationale.clone(),
            change: change.clone(),
            test_result: Some(*result),
            date: chrono::Utc::now().to_rfc3339(),
            extra: Default::default(),
        };
        self.persist_adr(&adr);
        self.adr_counter
    }

    fn append_abort_adr(&mut self, change: &RuleChange, error: &GuidanceError) {
        self.adr_counter += 1;
        let adr = RuleAdr {
            schema_version: ADR_SCHEMA_VERSION,
            number: self.adr_counter,
            title: adr_title(change),
            decision: AdrDecision::Aborted,
            rationale: format!("cycle aborted: {error}"),
            change: change.clone(),
            test_result: None,
            date: chrono::Utc::now().to_rfc3339(),
            extra: Default::default(),
        };
        self.persist_adr(&adr);
    }

    fn persist_adr(&self, adr: &RuleAdr) {
        if let Some(store) = &self.adr_store {
            if let Err(e) = store.append(adr) {
                warn!(error = %e, number = adr.number, "failed to persist ADR");
            }
        }
    }
}

fn adr_title(change: &RuleChange) -> String {
    match &change.target_rule_id {
        Some(target) => format!("{} {target}", change.kind),
        None => change.kind.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
