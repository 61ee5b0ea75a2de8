//! Win-twice promotion tracker.
//!
//! Maps rule IDs to consecutive A/B win counts. A win increments; a loss
//! resets to zero. State is process-lifetime, optionally persisted to
//! `tracker.json` so restarts do not forget accumulated wins.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use vigil_core::errors::{GuidanceError, Result};

/// Current tracker file version.
pub const TRACKER_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrackerFile {
    schema_version: u32,
    wins: BTreeMap<String, u32>,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_json::Value>,
}

/// Consecutive-win counts per rule ID.
#[derive(Debug, Default)]
pub struct PromotionTracker {
    wins: BTreeMap<String, u32>,
    extra: BTreeMap<String, serde_json::Value>,
    path: Option<PathBuf>,
}

impl PromotionTracker {
    /// An in-memory tracker with no persistence.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A tracker backed by `tracker.json`, loading existing counts.
    ///
    /// A missing file starts empty; a corrupt file starts empty with a
    /// warning, so a torn write cannot wedge the optimizer.
    #[must_use]
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (wins, extra) = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<TrackerFile>(&content) {
                Ok(file) => (file.wins, file.extra),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "corrupt tracker file, starting empty");
                    (BTreeMap::new(), BTreeMap::new())
                }
            },
            Err(_) => (BTreeMap::new(), BTreeMap::new()),
        };
        Self {
            wins,
            extra,
            path: Some(path),
        }
    }

    /// Current win count for a rule.
    #[must_use]
    pub fn wins(&self, rule_id: &str) -> u32 {
        self.wins.get(rule_id).copied().unwrap_or(0)
    }

    /// Record a win; returns the new count.
    pub fn record_win(&mut self, rule_id: &str) -> u32 {
        let count = self.wins.entry(rule_id.to_owned()).or_insert(0);
        *count += 1;
        debug!(rule_id, count = *count, "promotion win recorded");
        *count
    }

    /// Reset a rule's count to zero.
    pub fn reset(&mut self, rule_id: &str) {
        let _ = self.wins.remove(rule_id);
    }

    /// Persist the counts when a path is configured.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let file = TrackerFile {
            schema_version: TRACKER_SCHEMA_VERSION,
            wins: self.wins.clone(),
            extra: self.extra.clone(),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| GuidanceError::config(format!("unserializable tracker: {e}")))?;
        std::fs::write(path, json)
            .map_err(|e| GuidanceError::persistence(path.display().to_string(), e))?;
        Ok(())
    }

    /// The backing path, if persisted.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_start_at_zero() {
        let tracker = PromotionTracker::new();
        assert_eq!(tracker.wins("R001"), 0);
    }

    #[test]
    fn record_win_increments() {
        let mut tracker = PromotionTracker::new();
        assert_eq!(tracker.record_win("R001"), 1);
        assert_eq!(tracker.record_win("R001"), 2);
        assert_eq!(tracker.wins("R001"), 2);
        assert_eq!(tracker.wins("R002"), 0);
    }

    #[test]
    fn reset_clears_count() {
        let mut tracker = PromotionTracker::new();
        let _ = tracker.record_win("R001");
        tracker.reset("R001");
        assert_eq!(tracker.wins("R001"), 0);
    }

    #[test]
    fn save_and_reload_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.json");

        let mut tracker = PromotionTracker::with_path(&path);
        let _ = tracker.record_win("R001");
        let _ = tracker.record_win("R001");
        let _ = tracker.record_win("R007");
        tracker.save().unwrap();

        let reloaded = PromotionTracker::with_path(&path);
        assert_eq!(reloaded.wins("R001"), 2);
        assert_eq!(reloaded.wins("R007"), 1);
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.json");
        std::fs::write(&path, "{ not json").unwrap();

        let tracker = PromotionTracker::with_path(&path);
        assert_eq!(tracker.wins("R001"), 0);
    }

    #[test]
    fn unknown_fields_survive_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.json");
        std::fs::write(
            &path,
            r#"{"schemaVersion":1,"wins":{"R001":1},"operatorNote":"keep"}"#,
        )
        .unwrap();

        let tracker = PromotionTracker::with_path(&path);
        tracker.save().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("operatorNote"));
        assert!(content.contains("R001"));
    }

    #[test]
    fn in_memory_save_is_noop() {
        let mut tracker = PromotionTracker::new();
        let _ = tracker.record_win("R001");
        tracker.save().unwrap();
    }
}
