//! Rule evaluation against incoming security events.
//!
//! The detector evaluates every enabled rule against each event. Direct
//! rules emit an alert on a predicate match. Threshold rules accumulate
//! event timestamps in a rolling window per (rule, source identity) and
//! fire exactly once when the window first reaches the configured count,
//! then clear the window so the next cycle re-accumulates from zero.
//!
//! Window keys are attacker-controlled (source IPs), so shards shed
//! expired windows as a side effect of normal traffic; a window that
//! never fires does not pin memory past its expiry.

use crate::event::{SecurityEvent, ValidationError};
use crate::incident::Alert;
use crate::rules::{RuleMatch, RuleStore};
use chrono::{DateTime, Duration, Utc};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Number of lock shards for threshold window state. Unrelated
/// (rule, source) keys land on different shards and never contend.
const WINDOW_SHARDS: usize = 16;

/// Minimum spacing between expiry sweeps of one shard.
const PRUNE_INTERVAL_SECS: i64 = 60;

/// Key for one rolling threshold window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WindowKey {
    rule_id: String,
    source: String,
}

/// One pending accumulation cycle.
struct WindowState {
    /// Last instant at which a future event could still count an entry.
    expires_at: DateTime<Utc>,
    /// Timestamps plus the correlation ids of the contributing events.
    entries: VecDeque<(DateTime<Utc>, String)>,
}

#[derive(Default)]
struct Shard {
    windows: HashMap<WindowKey, WindowState>,
    last_pruned: Option<DateTime<Utc>>,
}

impl Shard {
    /// Drops windows no future event can extend. Time-gated so a busy
    /// shard is not rescanned on every event.
    fn prune(&mut self, now: DateTime<Utc>) {
        let due = match self.last_pruned {
            Some(last) => now - last >= Duration::seconds(PRUNE_INTERVAL_SECS),
            None => true,
        };
        if due {
            self.windows.retain(|_, w| w.expires_at >= now);
            self.last_pruned = Some(now);
        }
    }
}

/// Evaluates events against the active rule set.
pub struct Detector {
    rules: Arc<RuleStore>,
    shards: Vec<Mutex<Shard>>,
}

impl Detector {
    /// Creates a detector over the given rule store.
    pub fn new(rules: Arc<RuleStore>) -> Self {
        let shards = (0..WINDOW_SHARDS)
            .map(|_| Mutex::new(Shard::default()))
            .collect();
        Self { rules, shards }
    }

    fn shard_for(&self, key: &WindowKey) -> &Mutex<Shard> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % WINDOW_SHARDS]
    }

    #[cfg(test)]
    async fn window_count(&self) -> usize {
        let mut total = 0;
        for shard in &self.shards {
            total += shard.lock().await.windows.len();
        }
        total
    }

    /// Evaluates one event against all enabled rules.
    ///
    /// Returns zero or more candidate alerts. An event whose category
    /// matches no rule produces an empty list with no side effect.
    #[instrument(skip(self, event), fields(category = %event.category, correlation_id = %event.correlation_id))]
    pub async fn evaluate(&self, event: &SecurityEvent) -> Result<Vec<Alert>, ValidationError> {
        event.validate()?;

        let snapshot = self.rules.snapshot().await;
        let mut alerts = Vec::new();

        for rule in snapshot.iter_enabled() {
            match &rule.matcher {
                RuleMatch::Direct { .. } => {
                    if rule.matches_direct(event) {
                        debug!(rule_id = %rule.id, "Direct rule matched");
                        alerts.push(self.build_alert(rule, event, vec![event.correlation_id.clone()]));
                    }
                }
                RuleMatch::Threshold {
                    category,
                    count,
                    window_secs,
                } => {
                    if event.category != *category {
                        continue;
                    }
                    // Threshold correlation needs a source identity; events
                    // without one cannot accumulate and are skipped.
                    let Some(source) = event.source_key() else {
                        continue;
                    };
                    let key = WindowKey {
                        rule_id: rule.id.clone(),
                        source: source.to_string(),
                    };
                    let window_duration = Duration::seconds(*window_secs as i64);

                    let mut shard = self.shard_for(&key).lock().await;
                    shard.prune(event.timestamp);
                    let window = shard.windows.entry(key.clone()).or_insert_with(|| {
                        WindowState {
                            expires_at: event.timestamp + window_duration,
                            entries: VecDeque::new(),
                        }
                    });

                    // Evict entries strictly older than the window; an
                    // entry aged exactly window_duration still counts.
                    let cutoff = event.timestamp - window_duration;
                    while window.entries.front().is_some_and(|(ts, _)| *ts < cutoff) {
                        window.entries.pop_front();
                    }
                    window.entries.push_back((event.timestamp, event.correlation_id.clone()));
                    window.expires_at = event.timestamp + window_duration;

                    if window.entries.len() >= *count {
                        let contributing: Vec<String> =
                            window.entries.drain(..).map(|(_, id)| id).collect();
                        shard.windows.remove(&key);
                        debug!(
                            rule_id = %rule.id,
                            source = %key.source,
                            "Threshold reached, window cleared"
                        );
                        alerts.push(self.build_alert(rule, event, contributing));
                    }
                }
            }
        }

        if alerts.is_empty() {
            debug!("Event matched no rules");
        }
        Ok(alerts)
    }

    fn build_alert(
        &self,
        rule: &crate::rules::AlertRule,
        event: &SecurityEvent,
        triggering_event_ids: Vec<String>,
    ) -> Alert {
        Alert {
            id: Uuid::new_v4(),
            rule_id: rule.id.clone(),
            severity: rule.severity,
            category: rule.category.clone(),
            source_ip: event.source_ip.clone(),
            actor: event.actor.clone(),
            timestamp: event.timestamp,
            triggering_event_ids,
        }
    }
}
