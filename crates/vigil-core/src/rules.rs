//! Rule and policy-bundle data model.
//!
//! A [`GuidanceRule`] is a single normalized rule from the rules document.
//! Compilation splits rules into a [`Constitution`] (always loaded) and a
//! pool of [`RuleShard`]s (retrieved per task), packaged as a
//! [`PolicyBundle`] together with a [`BundleManifest`].
//!
//! ## Invariants
//!
//! - Rule IDs are unique within a bundle.
//! - A constitution rule satisfies `priority >= base_priority + 100` and
//!   `is_constitution == true`.
//! - After promotion, a constitution rule always has `source == Root`.
//! - Timestamps are monotonic within a process; recompilation preserves
//!   creation order without reading the wall clock on the hot path.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::ids::RuleId;

/// Priority added to a rule when it enters the constitution.
pub const CONSTITUTION_PRIORITY_BOOST: i32 = 100;

/// Base priority assigned to rules that do not declare one.
pub const DEFAULT_PRIORITY: i32 = 50;

static TIMESTAMP_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Next monotonic timestamp (process-local, starts at 1).
#[must_use]
pub fn next_timestamp() -> u64 {
    TIMESTAMP_COUNTER.fetch_add(1, Ordering::Relaxed)
}

// ─────────────────────────────────────────────────────────────────────────────
// Enums
// ─────────────────────────────────────────────────────────────────────────────

/// Severity tier attached to each rule.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskClass {
    /// Informational rules.
    #[default]
    Low,
    /// Rules whose violation causes rework.
    Medium,
    /// Rules whose violation risks data or correctness.
    High,
    /// Rules whose violation is never acceptable.
    Critical,
}

impl RiskClass {
    /// All risk classes, lowest first.
    pub const ALL: &'static [Self] = &[Self::Low, Self::Medium, Self::High, Self::Critical];

    /// Parse a lowercase risk-class name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for RiskClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Class of tool a rule governs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolClass {
    /// Shell command execution.
    Bash,
    /// In-place file edits.
    Edit,
    /// Whole-file writes.
    Write,
    /// MCP tool invocations.
    Mcp,
    /// Applies to every tool.
    #[serde(rename = "*")]
    Any,
}

impl ToolClass {
    /// Parse a tool-class token from the rules document.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bash" => Some(Self::Bash),
            "edit" => Some(Self::Edit),
            "write" => Some(Self::Write),
            "mcp" => Some(Self::Mcp),
            "*" => Some(Self::Any),
            _ => None,
        }
    }
}

impl fmt::Display for ToolClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bash => write!(f, "bash"),
            Self::Edit => write!(f, "edit"),
            Self::Write => write!(f, "write"),
            Self::Mcp => write!(f, "mcp"),
            Self::Any => write!(f, "*"),
        }
    }
}

/// Task intent categories used to boost shard relevance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskIntent {
    /// Fixing a defect.
    BugFix,
    /// Building new functionality.
    Feature,
    /// Restructuring without behavior change.
    Refactor,
    /// Security-sensitive work.
    Security,
    /// Performance work.
    Performance,
    /// Writing or repairing tests.
    Testing,
    /// Documentation work.
    Docs,
    /// Release and deployment work.
    Deployment,
    /// Architectural design work.
    Architecture,
    /// Investigating behavior.
    Debug,
    /// Anything unclassified.
    General,
}

impl TaskIntent {
    /// All intents in declaration order (classification tie-break order).
    pub const ALL: &'static [Self] = &[
        Self::BugFix,
        Self::Feature,
        Self::Refactor,
        Self::Security,
        Self::Performance,
        Self::Testing,
        Self::Docs,
        Self::Deployment,
        Self::Architecture,
        Self::Debug,
        Self::General,
    ];

    /// Parse a kebab-case intent tag.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bug-fix" => Some(Self::BugFix),
            "feature" => Some(Self::Feature),
            "refactor" => Some(Self::Refactor),
            "security" => Some(Self::Security),
            "performance" => Some(Self::Performance),
            "testing" => Some(Self::Testing),
            "docs" => Some(Self::Docs),
            "deployment" => Some(Self::Deployment),
            "architecture" => Some(Self::Architecture),
            "debug" => Some(Self::Debug),
            "general" => Some(Self::General),
            _ => None,
        }
    }

    /// The kebab-case tag used in compact shard text.
    #[must_use]
    pub fn as_tag(&self) -> &'static str {
        match self {
            Self::BugFix => "bug-fix",
            Self::Feature => "feature",
            Self::Refactor => "refactor",
            Self::Security => "security",
            Self::Performance => "performance",
            Self::Testing => "testing",
            Self::Docs => "docs",
            Self::Deployment => "deployment",
            Self::Architecture => "architecture",
            Self::Debug => "debug",
            Self::General => "general",
        }
    }
}

impl fmt::Display for TaskIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// Where a rule came from.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum RuleSource {
    /// The primary (root) rules document, or promoted there.
    Root,
    /// A local overlay document.
    #[default]
    Local,
}

impl fmt::Display for RuleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => write!(f, "root"),
            Self::Local => write!(f, "local"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// GuidanceRule
// ─────────────────────────────────────────────────────────────────────────────

/// A single normalized guidance rule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuidanceRule {
    /// Unique rule ID within a bundle.
    pub id: RuleId,
    /// Normalized rule text.
    pub text: String,
    /// Effective priority; higher wins conflicts.
    pub priority: i32,
    /// Priority before any constitution boost.
    pub base_priority: i32,
    /// Severity tier.
    pub risk_class: RiskClass,
    /// Tool classes this rule governs.
    pub tool_classes: BTreeSet<ToolClass>,
    /// Task intents this rule is relevant to.
    pub intent_tags: BTreeSet<TaskIntent>,
    /// Repository path globs; `*` means global.
    pub repo_scopes: Vec<String>,
    /// Free-form domain tags (used by contradiction resolution).
    pub domains: BTreeSet<String>,
    /// Optional check identifiers that can verify compliance.
    pub verifiers: Vec<String>,
    /// Document of origin.
    pub source: RuleSource,
    /// Whether this rule is part of the constitution.
    pub is_constitution: bool,
    /// Monotonic creation timestamp.
    pub created_at: u64,
    /// Monotonic last-update timestamp.
    pub updated_at: u64,
}

impl GuidanceRule {
    /// Create a rule with defaults for everything but id and text.
    #[must_use]
    pub fn new(id: impl Into<RuleId>, text: impl Into<String>) -> Self {
        let now = next_timestamp();
        Self {
            id: id.into(),
            text: text.into(),
            priority: DEFAULT_PRIORITY,
            base_priority: DEFAULT_PRIORITY,
            risk_class: RiskClass::Low,
            tool_classes: BTreeSet::new(),
            intent_tags: BTreeSet::new(),
            repo_scopes: vec!["*".to_owned()],
            domains: BTreeSet::new(),
            verifiers: Vec::new(),
            source: RuleSource::Local,
            is_constitution: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Mark this rule constitutional, applying the priority boost.
    ///
    /// Idempotent: a rule already in the constitution is unchanged.
    pub fn boost_to_constitution(&mut self) {
        if self.is_constitution {
            return;
        }
        self.is_constitution = true;
        self.priority = self.base_priority + CONSTITUTION_PRIORITY_BOOST;
    }

    /// Promote a local rule into the constitution.
    ///
    /// Sets `source = Root`, applies the boost, optionally replaces the
    /// text, and ticks `updated_at`.
    pub fn promote(&mut self, proposed_text: Option<&str>) {
        self.boost_to_constitution();
        self.source = RuleSource::Root;
        if let Some(text) = proposed_text {
            self.text = text.to_owned();
        }
        self.updated_at = next_timestamp();
    }

    /// Demote a previously promoted rule back to a local shard.
    ///
    /// Inverse of [`promote`](Self::promote); a no-op on rules that are not
    /// constitutional.
    pub fn demote(&mut self) {
        if !self.is_constitution {
            return;
        }
        self.is_constitution = false;
        self.priority = self.base_priority;
        self.source = RuleSource::Local;
        self.updated_at = next_timestamp();
    }

    /// Whether this rule governs the given tool class.
    #[must_use]
    pub fn applies_to_tool(&self, tool: ToolClass) -> bool {
        self.tool_classes.is_empty()
            || self.tool_classes.contains(&ToolClass::Any)
            || self.tool_classes.contains(&tool)
    }

    /// Whether this rule is tagged with the given intent.
    #[must_use]
    pub fn matches_intent(&self, intent: TaskIntent) -> bool {
        self.intent_tags.contains(&intent)
    }

    /// Check the constitution priority invariant.
    #[must_use]
    pub fn constitution_invariant_holds(&self) -> bool {
        !self.is_constitution
            || self.priority >= self.base_priority + CONSTITUTION_PRIORITY_BOOST
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bundle types
// ─────────────────────────────────────────────────────────────────────────────

/// The always-loaded subset of rules.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constitution {
    /// Constitution rules in rendering order (priority desc, id asc).
    pub rules: Vec<GuidanceRule>,
    /// Compact rendered text, capped at the configured line count.
    pub text: String,
    /// First 16 hex chars of SHA-256 of the canonicalized text.
    pub hash: String,
}

impl Constitution {
    /// An empty constitution.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            rules: Vec::new(),
            text: String::new(),
            hash: String::new(),
        }
    }

    /// Render a constitution from its rules.
    ///
    /// Rules are ordered by priority descending, ID ascending; each
    /// contributes one `[id] text` line. Output is capped at `max_lines`
    /// with a truncation marker line, and hashed with
    /// [`sha256_16`](crate::hash::sha256_16).
    #[must_use]
    pub fn render(mut rules: Vec<GuidanceRule>, max_lines: usize) -> Self {
        if rules.is_empty() {
            return Self::empty();
        }

        rules.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));

        let all_lines: Vec<String> = rules
            .iter()
            .map(|r| format!("[{}] {}", r.id, r.text))
            .collect();

        let mut text_lines: Vec<String>;
        if all_lines.len() > max_lines {
            let hidden = all_lines.len() - max_lines;
            text_lines = all_lines[..max_lines].to_vec();
            text_lines.push(format!("… {hidden} constitution rule(s) truncated"));
        } else {
            text_lines = all_lines;
        }

        let text = text_lines.join("\n");
        let hash = crate::hash::sha256_16(&text);

        Self { rules, text, hash }
    }
}

/// A retrievable rule plus its compact representation and embedding.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleShard {
    /// The wrapped rule.
    pub rule: GuidanceRule,
    /// `[id] text @tag1 @tag2` rendering injected into policy text.
    pub compact_text: String,
    /// Fixed-dimension embedding, computed lazily at index time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl RuleShard {
    /// Build a shard from a rule, rendering its compact text.
    #[must_use]
    pub fn from_rule(rule: GuidanceRule) -> Self {
        let compact_text = render_compact_text(&rule);
        Self {
            rule,
            compact_text,
            embedding: None,
        }
    }
}

/// Render the `[id] text @tag1 @tag2` form for a rule.
#[must_use]
pub fn render_compact_text(rule: &GuidanceRule) -> String {
    let mut out = format!("[{}] {}", rule.id, rule.text);
    for tag in &rule.intent_tags {
        out.push_str(" @");
        out.push_str(tag.as_tag());
    }
    out
}

/// Compile metadata recorded alongside a bundle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleManifest {
    /// Record format version.
    pub schema_version: u32,
    /// SHA-256-16 of the primary rules document.
    pub primary_hash: String,
    /// SHA-256-16 of the local overlay, if one was supplied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlay_hash: Option<String>,
    /// Rule counts per risk class (all rules, constitution included).
    pub rule_counts: std::collections::BTreeMap<RiskClass, usize>,
    /// Number of constitution rules.
    pub constitution_rules: usize,
    /// Number of retrievable shards.
    pub shard_count: usize,
    /// Compile timestamp (RFC 3339).
    pub compiled_at: String,
}

/// Compiled policy: constitution, shard pool, and manifest.
///
/// Immutable within a session; replaced wholesale on recompilation.
/// Ownership transfers to the retriever at index time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyBundle {
    /// The always-loaded constitution.
    pub constitution: Constitution,
    /// Retrievable shards.
    pub shards: Vec<RuleShard>,
    /// Compile metadata.
    pub manifest: BundleManifest,
    /// Non-fatal compile diagnostics.
    pub warnings: Vec<String>,
    /// Canonical source text the bundle was compiled from.
    pub source_text: String,
}

impl PolicyBundle {
    /// Find any rule (constitution or shard) by ID.
    #[must_use]
    pub fn find_rule(&self, id: &RuleId) -> Option<&GuidanceRule> {
        self.constitution
            .rules
            .iter()
            .find(|r| &r.id == id)
            .or_else(|| self.shards.iter().map(|s| &s.rule).find(|r| &r.id == id))
    }

    /// Total number of rules in the bundle.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.constitution.rules.len() + self.shards.len()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
