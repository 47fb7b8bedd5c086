//! Alert rule definitions and the hot-reloadable rule store.
//!
//! Rules are loaded as immutable snapshots. A reload swaps the whole set
//! atomically; readers clone the current `Arc` and never observe a
//! half-updated table.

use crate::event::SecurityEvent;
use crate::incident::{IncidentCategory, Severity};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// How a rule matches incoming events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleMatch {
    /// Direct predicate: the event category must equal `category`, and
    /// every entry in `details` must be present and equal in the event's
    /// detail map. A missing key is a non-match, not an error.
    Direct {
        category: String,
        #[serde(default)]
        details: HashMap<String, serde_json::Value>,
    },
    /// Threshold over a rolling window keyed by (rule, source identity):
    /// fires when `count` matching events arrive within `window_secs`.
    Threshold {
        category: String,
        count: usize,
        window_secs: u64,
    },
}

impl RuleMatch {
    /// Event category this rule listens for.
    pub fn event_category(&self) -> &str {
        match self {
            RuleMatch::Direct { category, .. } => category,
            RuleMatch::Threshold { category, .. } => category,
        }
    }
}

/// An alert rule definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    /// Unique rule identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Severity assigned to alerts this rule produces.
    pub severity: Severity,
    /// Incident category assigned to alerts this rule produces.
    pub category: IncidentCategory,
    /// Match specification.
    #[serde(rename = "match")]
    pub matcher: RuleMatch,
    /// Response action identifiers requested on first trigger only.
    #[serde(default)]
    pub actions: Vec<String>,
    /// Disabled rules are skipped entirely.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl AlertRule {
    /// Evaluates a direct predicate against the event. Threshold rules
    /// always return false here; window accounting lives in the detector.
    pub fn matches_direct(&self, event: &SecurityEvent) -> bool {
        match &self.matcher {
            RuleMatch::Direct { category, details } => {
                event.category == *category
                    && details
                        .iter()
                        .all(|(k, v)| event.details.get(k) == Some(v))
            }
            RuleMatch::Threshold { .. } => false,
        }
    }
}

/// An immutable snapshot of the active rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSet {
    pub rules: Vec<AlertRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<AlertRule>) -> Self {
        Self { rules }
    }

    /// Iterates enabled rules only.
    pub fn iter_enabled(&self) -> impl Iterator<Item = &AlertRule> {
        self.rules.iter().filter(|r| r.enabled)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Holds the current rule snapshot and swaps it atomically on reload.
pub struct RuleStore {
    current: RwLock<Arc<RuleSet>>,
}

impl RuleStore {
    /// Creates a store with the given initial rule set.
    pub fn new(rules: RuleSet) -> Self {
        Self {
            current: RwLock::new(Arc::new(rules)),
        }
    }

    /// Returns the current snapshot. Callers hold the `Arc` for the whole
    /// evaluation so a concurrent reload never changes rules mid-event.
    pub async fn snapshot(&self) -> Arc<RuleSet> {
        self.current.read().await.clone()
    }

    /// Replaces the entire rule set.
    pub async fn reload(&self, rules: RuleSet) {
        let count = rules.len();
        *self.current.write().await = Arc::new(rules);
        info!("Rule set reloaded: {} rules", count);
    }
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new(RuleSet::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn direct_rule(id: &str, category: &str) -> AlertRule {
        AlertRule {
            id: id.to_string(),
            name: format!("rule {}", id),
            severity: Severity::High,
            category: IncidentCategory::Anomaly,
            matcher: RuleMatch::Direct {
                category: category.to_string(),
                details: HashMap::new(),
            },
            actions: vec![],
            enabled: true,
        }
    }

    #[test]
    fn test_direct_match_on_category() {
        let rule = direct_rule("r1", "security.injection_attempt");
        let event = SecurityEvent::new(Utc::now(), "security.injection_attempt", "evt-1");
        assert!(rule.matches_direct(&event));

        let other = SecurityEvent::new(Utc::now(), "auth.failure", "evt-2");
        assert!(!rule.matches_direct(&other));
    }

    #[test]
    fn test_direct_match_with_details() {
        let mut rule = direct_rule("r1", "config.change");
        if let RuleMatch::Direct { details, .. } = &mut rule.matcher {
            details.insert("unauthorized".to_string(), serde_json::json!(true));
        }

        let matching = SecurityEvent::new(Utc::now(), "config.change", "evt-1")
            .with_detail("unauthorized", serde_json::json!(true));
        assert!(rule.matches_direct(&matching));

        // Missing key is a non-match, not an error.
        let missing = SecurityEvent::new(Utc::now(), "config.change", "evt-2");
        assert!(!rule.matches_direct(&missing));

        let wrong_value = SecurityEvent::new(Utc::now(), "config.change", "evt-3")
            .with_detail("unauthorized", serde_json::json!(false));
        assert!(!rule.matches_direct(&wrong_value));
    }

    #[tokio::test]
    async fn test_reload_swaps_whole_snapshot() {
        let store = RuleStore::new(RuleSet::new(vec![direct_rule("r1", "a")]));
        let before = store.snapshot().await;
        assert_eq!(before.len(), 1);

        store
            .reload(RuleSet::new(vec![
                direct_rule("r2", "b"),
                direct_rule("r3", "c"),
            ]))
            .await;

        // The old snapshot is unchanged; new readers see the new set.
        assert_eq!(before.len(), 1);
        assert_eq!(store.snapshot().await.len(), 2);
    }

    #[test]
    fn test_disabled_rules_excluded() {
        let mut rule = direct_rule("r1", "a");
        rule.enabled = false;
        let set = RuleSet::new(vec![rule, direct_rule("r2", "b")]);
        assert_eq!(set.iter_enabled().count(), 1);
    }
}
