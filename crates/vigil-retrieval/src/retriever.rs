//! Shard retrieval with hybrid scoring and contradiction resolution.
//!
//! The retriever owns the indexed [`PolicyBundle`]. Readers take an `Arc`
//! snapshot for the duration of a retrieval; the optimizer's promotions and
//! demotions build a new bundle and swap the `Arc`, so a reader never
//! observes a partial mutation.
//!
//! ## Scoring
//!
//! ```text
//! score = cosine(taskEmbedding, shard.embedding)
//!       + intentBoost · intentMatch(shard, detectedIntent)
//!       + riskBoost(shard.riskClass)
//! ```
//!
//! Shards are sorted by score descending (ties by rule ID ascending) and
//! admitted unless an already-admitted shard or a constitution rule
//! contradicts them. Contradiction is lexical: two rules sharing a domain
//! tag where one matches a positive polarity pattern and the other its
//! paired negative. The higher-priority side wins.

use std::sync::Arc;
use std::sync::OnceLock;

use parking_lot::RwLock;
use regex::Regex;
use tracing::{debug, warn};

use vigil_core::errors::{GuidanceError, Result};
use vigil_core::ids::RuleId;
use vigil_core::rules::{
    Constitution, GuidanceRule, PolicyBundle, RiskClass, RuleShard, TaskIntent,
};

use crate::embedding::{EmbeddingProvider, HashEmbeddingProvider};
use crate::intent::IntentClassifier;
use crate::vector::cosine_similarity;

// ─────────────────────────────────────────────────────────────────────────────
// Options and request/result types
// ─────────────────────────────────────────────────────────────────────────────

/// Retriever tuning options.
#[derive(Clone, Debug)]
pub struct RetrieverOptions {
    /// Number of shards to select.
    pub top_k: usize,
    /// Additive score when the detected intent is among a shard's tags.
    pub intent_boost: f32,
    /// Additive score for critical-risk shards.
    pub risk_boost_critical: f32,
    /// Additive score for high-risk shards.
    pub risk_boost_high: f32,
    /// Additive score for medium-risk shards.
    pub risk_boost_medium: f32,
    /// Line cap used when re-rendering the constitution after a promotion.
    pub max_constitution_lines: usize,
}

impl Default for RetrieverOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            intent_boost: 0.15,
            risk_boost_critical: 0.10,
            risk_boost_high: 0.07,
            risk_boost_medium: 0.05,
            max_constitution_lines: 60,
        }
    }
}

impl RetrieverOptions {
    fn risk_boost(&self, risk: RiskClass) -> f32 {
        match risk {
            RiskClass::Critical => self.risk_boost_critical,
            RiskClass::High => self.risk_boost_high,
            RiskClass::Medium => self.risk_boost_medium,
            RiskClass::Low => 0.0,
        }
    }
}

/// A retrieval request for one task.
#[derive(Clone, Debug, Default)]
pub struct RetrievalRequest {
    /// Natural-language task description.
    pub task_description: String,
    /// Explicit intent override; skips classification when set.
    pub intent: Option<TaskIntent>,
    /// Repository path the task touches, matched against shard scopes.
    pub repo_path: Option<String>,
    /// Exclude shards below this risk class.
    pub min_risk_class: Option<RiskClass>,
    /// Per-request override of the configured top-K.
    pub top_k: Option<usize>,
}

impl RetrievalRequest {
    /// Request for a plain task description.
    #[must_use]
    pub fn for_task(description: impl Into<String>) -> Self {
        Self {
            task_description: description.into(),
            ..Self::default()
        }
    }
}

/// Score components for one scored shard.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardScore {
    /// The scored rule.
    pub rule_id: RuleId,
    /// Cosine similarity with the task embedding.
    pub similarity: f32,
    /// Applied intent boost (0 or the configured boost).
    pub intent_boost: f32,
    /// Applied risk boost.
    pub risk_boost: f32,
    /// Final score.
    pub total: f32,
}

/// A shard admitted into the policy text.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedShard {
    /// The selected rule.
    pub rule_id: RuleId,
    /// Compact text injected into the policy.
    pub compact_text: String,
    /// Effective rule priority.
    pub priority: i32,
}

/// The product of one retrieval. Ephemeral.
#[derive(Clone, Debug)]
pub struct RetrievalResult {
    /// Constitution text plus selected shard texts.
    pub policy_text: String,
    /// Admitted shards in admission order.
    pub selected_shards: Vec<SelectedShard>,
    /// Detected (or overridden) intent.
    pub detected_intent: TaskIntent,
    /// Classification confidence; 1.0 on explicit override.
    pub confidence: f32,
    /// Score components for every shard that survived the filters.
    pub score_breakdown: Vec<ShardScore>,
    /// Non-fatal anomalies (embedding fallback, unmatched scopes).
    pub warnings: Vec<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Contradiction patterns
// ─────────────────────────────────────────────────────────────────────────────

struct PolarityPair {
    positive: Regex,
    negative: Regex,
}

fn polarity_pairs() -> &'static [PolarityPair] {
    static PAIRS: OnceLock<Vec<PolarityPair>> = OnceLock::new();
    PAIRS.get_or_init(|| {
        let make = |pos: &str, neg: &str| PolarityPair {
            positive: Regex::new(pos).unwrap(),
            negative: Regex::new(neg).unwrap(),
        };
        vec![
            make(r"(?i)\bmust\b", r"(?i)\bnever\b|\bdo not\b|\bavoid\b"),
            make(r"(?i)\balways\b", r"(?i)\bnever\b|\bdon'?t\b"),
            make(r"(?i)\brequires?\b", r"(?i)\bforbid(s|den)?\b|\bprohibit(s|ed)?\b"),
        ]
    })
}

/// Whether two rules are lexically contradictory.
///
/// Requires a shared domain tag; then any polarity pair matching positively
/// on one side and negatively on the other.
fn contradicts(a: &GuidanceRule, b: &GuidanceRule) -> bool {
    if a.domains.is_disjoint(&b.domains) {
        return false;
    }
    polarity_pairs().iter().any(|pair| {
        (pair.positive.is_match(&a.text) && pair.negative.is_match(&b.text))
            || (pair.positive.is_match(&b.text) && pair.negative.is_match(&a.text))
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Retriever
// ─────────────────────────────────────────────────────────────────────────────

/// Owns the indexed shard pool and answers retrieval requests.
pub struct Retriever {
    provider: Arc<dyn EmbeddingProvider>,
    fallback: HashEmbeddingProvider,
    classifier: IntentClassifier,
    options: RetrieverOptions,
    pool: RwLock<Option<Arc<PolicyBundle>>>,
}

impl Retriever {
    /// Create a retriever with the default hash embedding provider.
    #[must_use]
    pub fn new(options: RetrieverOptions) -> Self {
        Self::with_provider(Arc::new(HashEmbeddingProvider::default()), options)
    }

    /// Create a retriever with a custom embedding provider.
    ///
    /// The fallback hash provider is sized to the custom provider's
    /// dimension so a capability failure degrades without a dimension
    /// mismatch.
    #[must_use]
    pub fn with_provider(provider: Arc<dyn EmbeddingProvider>, options: RetrieverOptions) -> Self {
        let fallback = HashEmbeddingProvider::new(provider.dimension());
        Self {
            provider,
            fallback,
            classifier: IntentClassifier::new(),
            options,
            pool: RwLock::new(None),
        }
    }

    /// Index a compiled bundle, computing any missing shard embeddings.
    ///
    /// Takes ownership of the bundle; subsequent retrievals read from it.
    /// A provider-supplied embedding of the wrong dimension is rejected
    /// with a capability error.
    pub fn index(&self, mut bundle: PolicyBundle) -> Result<()> {
        let dimension = self.provider.dimension();

        for shard in &mut bundle.shards {
            if let Some(existing) = &shard.embedding {
                if existing.len() != dimension {
                    return Err(GuidanceError::capability(
                        "embedding",
                        format!(
                            "shard {} has embedding of dimension {}, expected {dimension}",
                            shard.rule.id,
                            existing.len()
                        ),
                    ));
                }
                continue;
            }
            shard.embedding = Some(self.embed_or_fallback(&shard.compact_text, &mut Vec::new()));
        }

        debug!(
            shards = bundle.shards.len(),
            constitution_rules = bundle.constitution.rules.len(),
            "bundle indexed"
        );
        *self.pool.write() = Some(Arc::new(bundle));
        Ok(())
    }

    /// Consistent snapshot of the current bundle.
    pub fn snapshot(&self) -> Option<Arc<PolicyBundle>> {
        self.pool.read().clone()
    }

    /// Classify a task description without retrieving.
    #[must_use]
    pub fn classify_intent(&self, description: &str) -> crate::intent::IntentClassification {
        self.classifier.classify(description)
    }

    /// Retrieve the constitution plus the top-K relevant shards.
    pub fn retrieve(&self, request: &RetrievalRequest) -> Result<RetrievalResult> {
        let bundle = self
            .snapshot()
            .ok_or_else(|| GuidanceError::invalid_state("no policy bundle indexed"))?;

        let mut warnings = Vec::new();

        let (detected_intent, confidence) = match request.intent {
            Some(intent) => (intent, 1.0),
            None => {
                let c = self.classifier.classify(&request.task_description);
                (c.intent, c.confidence)
            }
        };

        let task_embedding = self.embed_or_fallback(&request.task_description, &mut warnings);

        // Filter, then score.
        let mut scored: Vec<(&RuleShard, ShardScore)> = Vec::new();
        for shard in &bundle.shards {
            if !scope_matches(&shard.rule, request.repo_path.as_deref()) {
                continue;
            }
            if let Some(min) = request.min_risk_class {
                if shard.rule.risk_class < min {
                    continue;
                }
            }

            let similarity = shard
                .embedding
                .as_ref()
                .map_or(0.0, |e| cosine_similarity(&task_embedding, e));
            let intent_boost = if shard.rule.matches_intent(detected_intent) {
                self.options.intent_boost
            } else {
                0.0
            };
            let risk_boost = self.options.risk_boost(shard.rule.risk_class);
            let score = ShardScore {
                rule_id: shard.rule.id.clone(),
                similarity,
                intent_boost,
                risk_boost,
                total: similarity + intent_boost + risk_boost,
            };
            scored.push((shard, score));
        }

        scored.sort_by(|(_, a), (_, b)| {
            b.total
                .partial_cmp(&a.total)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.rule_id.cmp(&b.rule_id))
        });

        let top_k = request.top_k.unwrap_or(self.options.top_k);
        let admitted = select_with_contradictions(&bundle.constitution, &scored, top_k);

        let selected_shards: Vec<SelectedShard> = admitted
            .iter()
            .map(|shard| SelectedShard {
                rule_id: shard.rule.id.clone(),
                compact_text: shard.compact_text.clone(),
                priority: shard.rule.priority,
            })
            .collect();

        let mut segments: Vec<&str> = Vec::new();
        if !bundle.constitution.text.is_empty() {
            segments.push(&bundle.constitution.text);
        }
        let shard_text = selected_shards
            .iter()
            .map(|s| s.compact_text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        if !shard_text.is_empty() {
            segments.push(&shard_text);
        }
        let policy_text = segments.join("\n\n");

        debug!(
            intent = %detected_intent,
            selected = selected_shards.len(),
            scored = scored.len(),
            "retrieval complete"
        );

        Ok(RetrievalResult {
            policy_text,
            selected_shards,
            detected_intent,
            confidence,
            score_breakdown: scored.into_iter().map(|(_, s)| s).collect(),
            warnings,
        })
    }

    fn embed_or_fallback(&self, text: &str, warnings: &mut Vec<String>) -> Vec<f32> {
        match self.provider.embed(text) {
            Ok(v) if v.len() == self.provider.dimension() => v,
            Ok(v) => {
                warn!(
                    got = v.len(),
                    expected = self.provider.dimension(),
                    "provider returned wrong embedding dimension, using fallback"
                );
                warnings.push("embedding provider returned wrong dimension".to_owned());
                self.fallback.embed(text).unwrap_or_default()
            }
            Err(e) => {
                warn!(error = %e, "embedding provider failed, using hash fallback");
                warnings.push(format!("embedding provider failed: {e}"));
                self.fallback.embed(text).unwrap_or_default()
            }
        }
    }

    // ── Optimizer mutations ──────────────────────────────────────────────

    /// Promote a shard's rule into the constitution.
    ///
    /// Builds a new bundle (rule moved, constitution re-rendered) and swaps
    /// it in atomically. In-flight retrievals keep their snapshot.
    pub fn apply_promotion(&self, rule_id: &RuleId, proposed_text: Option<&str>) -> Result<()> {
        let mut pool = self.pool.write();
        let bundle = pool
            .as_ref()
            .ok_or_else(|| GuidanceError::invalid_state("no policy bundle indexed"))?;

        let mut next = PolicyBundle::clone(bundle);
        let idx = next
            .shards
            .iter()
            .position(|s| &s.rule.id == rule_id)
            .ok_or_else(|| {
                GuidanceError::invalid_state(format!("rule {rule_id} is not in the shard pool"))
            })?;

        let mut rule = next.shards.remove(idx).rule;
        rule.promote(proposed_text);

        let mut rules = std::mem::take(&mut next.constitution.rules);
        rules.push(rule);
        next.constitution = Constitution::render(rules, self.options.max_constitution_lines);
        next.manifest.constitution_rules = next.constitution.rules.len();
        next.manifest.shard_count = next.shards.len();

        debug!(rule_id = %rule_id, "rule promoted to constitution");
        *pool = Some(Arc::new(next));
        Ok(())
    }

    /// Add a new local rule to the shard pool.
    ///
    /// Used by the optimizer when a violation ranking has no matching
    /// rule. Fails if the ID already exists in the bundle.
    pub fn add_local_rule(&self, rule: GuidanceRule) -> Result<()> {
        let mut pool = self.pool.write();
        let bundle = pool
            .as_ref()
            .ok_or_else(|| GuidanceError::invalid_state("no policy bundle indexed"))?;

        if bundle.find_rule(&rule.id).is_some() {
            return Err(GuidanceError::invalid_state(format!(
                "rule {} already exists in the bundle",
                rule.id
            )));
        }

        let mut next = PolicyBundle::clone(bundle);
        let mut shard = RuleShard::from_rule(rule);
        shard.embedding = Some(self.embed_or_fallback(&shard.compact_text, &mut Vec::new()));
        debug!(rule_id = %shard.rule.id, "local rule added to shard pool");
        next.shards.push(shard);
        next.manifest.shard_count = next.shards.len();

        *pool = Some(Arc::new(next));
        Ok(())
    }

    /// Demote a constitution rule back to the shard pool.
    ///
    /// Inverse of [`apply_promotion`](Self::apply_promotion). A rule that is
    /// already a plain shard is left untouched.
    pub fn apply_demotion(&self, rule_id: &RuleId) -> Result<()> {
        let mut pool = self.pool.write();
        let bundle = pool
            .as_ref()
            .ok_or_else(|| GuidanceError::invalid_state("no policy bundle indexed"))?;

        let Some(idx) = bundle
            .constitution
            .rules
            .iter()
            .position(|r| &r.id == rule_id)
        else {
            debug!(rule_id = %rule_id, "demotion target not in constitution, skipping");
            return Ok(());
        };

        let mut next = PolicyBundle::clone(bundle);
        let mut rule = next.constitution.rules.remove(idx);
        rule.demote();

        let mut shard = RuleShard::from_rule(rule);
        shard.embedding = Some(self.embed_or_fallback(&shard.compact_text, &mut Vec::new()));
        next.shards.push(shard);

        let rules = std::mem::take(&mut next.constitution.rules);
        next.constitution = Constitution::render(rules, self.options.max_constitution_lines);
        next.manifest.constitution_rules = next.constitution.rules.len();
        next.manifest.shard_count = next.shards.len();

        debug!(rule_id = %rule_id, "rule demoted from constitution");
        *pool = Some(Arc::new(next));
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Selection
// ─────────────────────────────────────────────────────────────────────────────

/// Walk the score-ordered shards, admitting up to `top_k` that are not
/// contradicted by the constitution or a higher-priority admitted shard.
///
/// When a candidate contradicts an admitted shard of strictly lower
/// priority, it evicts that shard instead of being skipped; at equal
/// priority the earlier (higher-scoring) shard stays.
fn select_with_contradictions<'a>(
    constitution: &Constitution,
    scored: &[(&'a RuleShard, ShardScore)],
    top_k: usize,
) -> Vec<&'a RuleShard> {
    let mut admitted: Vec<&'a RuleShard> = Vec::new();

    'candidates: for (shard, _) in scored {
        // Constitution rules always dominate.
        if constitution
            .rules
            .iter()
            .any(|rule| contradicts(rule, &shard.rule))
        {
            debug!(rule_id = %shard.rule.id, "shard contradicted by constitution, skipped");
            continue;
        }

        for i in 0..admitted.len() {
            if contradicts(&admitted[i].rule, &shard.rule) {
                if shard.rule.priority > admitted[i].rule.priority {
                    debug!(
                        winner = %shard.rule.id,
                        evicted = %admitted[i].rule.id,
                        "contradiction resolved by priority"
                    );
                    admitted[i] = shard;
                } else {
                    debug!(
                        winner = %admitted[i].rule.id,
                        skipped = %shard.rule.id,
                        "contradiction resolved by priority"
                    );
                }
                continue 'candidates;
            }
        }

        if admitted.len() < top_k {
            admitted.push(shard);
        }
    }

    admitted
}

fn scope_matches(rule: &GuidanceRule, repo_path: Option<&str>) -> bool {
    let Some(path) = repo_path else {
        return true;
    };
    rule.repo_scopes.iter().any(|scope| {
        if scope == "*" {
            return true;
        }
        match globset::GlobBuilder::new(scope)
            .literal_separator(false)
            .build()
        {
            Ok(glob) => glob.compile_matcher().is_match(path),
            Err(e) => {
                warn!(scope, error = %e, "invalid repo scope glob, treating as no match");
                false
            }
        }
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
