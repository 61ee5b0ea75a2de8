//! Task intent classification.
//!
//! Each intent (except `general`) carries a list of weighted keyword
//! patterns. A task description's score for an intent is the sum of the
//! weights of matching patterns; the highest score wins, ties break to the
//! earliest declared intent. An empty score falls back to `general` with
//! confidence 0.1.
//!
//! Purely lexical by design: classification must be replay-identical.

use regex::Regex;
use tracing::debug;

use vigil_core::rules::TaskIntent;

/// Result of classifying a task description.
#[derive(Clone, Debug, PartialEq)]
pub struct IntentClassification {
    /// The winning intent.
    pub intent: TaskIntent,
    /// Raw pattern score of the winner.
    pub score: f32,
    /// `min(score / 3.0, 1.0)`, or 0.1 for the general fallback.
    pub confidence: f32,
}

/// Weighted pattern table per intent, in declaration (tie-break) order.
const INTENT_PATTERNS: &[(TaskIntent, &[(&str, f32)])] = &[
    (
        TaskIntent::BugFix,
        &[
            (r"(?i)\bfix(es|ed|ing)?\b", 1.0),
            (r"(?i)\bbugs?\b", 1.0),
            (r"(?i)\bcrash(es|ed|ing)?\b", 1.0),
            (r"(?i)\bbroken\b", 0.8),
            (r"(?i)\bregression\b", 0.8),
            (r"(?i)\bdefect\b", 0.8),
            (r"(?i)\berrors?\b", 0.6),
        ],
    ),
    (
        TaskIntent::Feature,
        &[
            (r"(?i)\bimplement(s|ed|ing)?\b", 1.0),
            (r"(?i)\bfeatures?\b", 1.0),
            (r"(?i)\bsupport for\b", 0.8),
            (r"(?i)\badd(s|ed|ing)?\b", 0.6),
            (r"(?i)\bbuild(s|ing)?\b", 0.6),
            (r"(?i)\bnew\b", 0.4),
        ],
    ),
    (
        TaskIntent::Refactor,
        &[
            (r"(?i)\brefactor(s|ed|ing)?\b", 1.2),
            (r"(?i)\brestructur(e|ed|ing)\b", 1.0),
            (r"(?i)\bclean\s*up\b", 0.8),
            (r"(?i)\bextract(s|ed|ing)?\b", 0.6),
            (r"(?i)\bsimplif(y|ies|ied)\b", 0.6),
            (r"(?i)\brenam(e|es|ed|ing)\b", 0.6),
        ],
    ),
    (
        TaskIntent::Security,
        &[
            (r"(?i)\bvulnerabilit(y|ies)\b", 1.2),
            (r"(?i)\bsecurity\b", 1.0),
            (r"(?i)\bexploit(s|ed)?\b", 1.0),
            (r"(?i)\binjection\b", 1.0),
            (r"(?i)\b(xss|csrf)\b", 1.0),
            (r"(?i)\bauth(entication|orization)?\b", 0.8),
            (r"(?i)\b(secrets?|credentials?)\b", 0.8),
            (r"(?i)\bencrypt(s|ed|ion)?\b", 0.6),
            (r"(?i)\bsanitiz(e|ed|ation)\b", 0.6),
        ],
    ),
    (
        TaskIntent::Performance,
        &[
            (r"(?i)\bperformance\b", 1.2),
            (r"(?i)\boptimiz(e|es|ed|ation)\b", 1.0),
            (r"(?i)\blatency\b", 1.0),
            (r"(?i)\bspeed\s*up\b", 1.0),
            (r"(?i)\bslow(er|ness)?\b", 0.8),
            (r"(?i)\bprofil(e|ed|ing)\b", 0.8),
            (r"(?i)\bmemory usage\b", 0.8),
        ],
    ),
    (
        TaskIntent::Testing,
        &[
            (r"(?i)\btests?\b", 1.0),
            (r"(?i)\btest coverage\b", 1.0),
            (r"(?i)\bcoverage\b", 0.8),
            (r"(?i)\bflaky\b", 0.8),
            (r"(?i)\bassert(ion)?s?\b", 0.6),
            (r"(?i)\bmocks?\b", 0.6),
        ],
    ),
    (
        TaskIntent::Docs,
        &[
            (r"(?i)\bdocs\b", 1.2),
            (r"(?i)\bdocument(ation|ed|ing)?\b", 1.0),
            (r"(?i)\breadme\b", 1.0),
            (r"(?i)\bchangelog\b", 0.8),
            (r"(?i)\bcomments?\b", 0.6),
        ],
    ),
    (
        TaskIntent::Deployment,
        &[
            (r"(?i)\bdeploy(s|ed|ment|ing)?\b", 1.2),
            (r"(?i)\brelease(s|d)?\b", 0.8),
            (r"(?i)\bpipeline\b", 0.8),
            (r"(?i)\brollout\b", 0.8),
            (r"(?i)\bci\b", 0.6),
            (r"(?i)\bdocker\b", 0.6),
            (r"(?i)\bkubernetes\b", 0.6),
            (r"(?i)\bship(ped|ping)?\b", 0.6),
        ],
    ),
    (
        TaskIntent::Architecture,
        &[
            (r"(?i)\barchitecture\b", 1.2),
            (r"(?i)\bdesign\b", 0.8),
            (r"(?i)\badr\b", 0.8),
            (r"(?i)\bboundar(y|ies)\b", 0.6),
            (r"(?i)\binterfaces?\b", 0.6),
            (r"(?i)\bstructure\b", 0.6),
        ],
    ),
    (
        TaskIntent::Debug,
        &[
            (r"(?i)\bdebug(s|ged|ging)?\b", 1.2),
            (r"(?i)\binvestigat(e|ed|ing|ion)\b", 1.0),
            (r"(?i)\bdiagnos(e|ed|is|ing)\b", 1.0),
            (r"(?i)\breproduc(e|ed|ing)\b", 0.8),
            (r"(?i)\btrac(e|ed|ing)\b", 0.6),
        ],
    ),
];

/// Classifier with precompiled pattern tables.
pub struct IntentClassifier {
    tables: Vec<(TaskIntent, Vec<(Regex, f32)>)>,
}

impl IntentClassifier {
    /// Compile the built-in pattern tables.
    ///
    /// The tables are static and known-valid, so construction cannot fail.
    #[must_use]
    pub fn new() -> Self {
        let tables = INTENT_PATTERNS
            .iter()
            .map(|(intent, patterns)| {
                let compiled = patterns
                    .iter()
                    .map(|(pattern, weight)| (Regex::new(pattern).unwrap(), *weight))
                    .collect();
                (*intent, compiled)
            })
            .collect();
        Self { tables }
    }

    /// Score a description against every intent.
    ///
    /// Returns `(intent, score)` pairs in declaration order, including
    /// zero scores.
    #[must_use]
    pub fn scores(&self, description: &str) -> Vec<(TaskIntent, f32)> {
        self.tables
            .iter()
            .map(|(intent, patterns)| {
                let score = patterns
                    .iter()
                    .filter(|(re, _)| re.is_match(description))
                    .map(|(_, weight)| *weight)
                    .sum();
                (*intent, score)
            })
            .collect()
    }

    /// Classify a task description.
    #[must_use]
    pub fn classify(&self, description: &str) -> IntentClassification {
        let mut best: Option<(TaskIntent, f32)> = None;
        for (intent, score) in self.scores(description) {
            if score > 0.0 && best.map_or(true, |(_, s)| score > s) {
                best = Some((intent, score));
            }
        }

        let classification = match best {
            Some((intent, score)) => IntentClassification {
                intent,
                score,
                confidence: (score / 3.0).min(1.0),
            },
            None => IntentClassification {
                intent: TaskIntent::General,
                score: 0.0,
                confidence: 0.1,
            },
        };

        debug!(
            intent = %classification.intent,
            score = classification.score,
            confidence = classification.confidence,
            "intent classified"
        );
        classification
    }
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
