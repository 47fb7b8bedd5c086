//! The correlation engine: event intake and the incident query surface.
//!
//! One `process_event` call is atomic per alert: the incident write and
//! its playbook/escalation side effects are recorded together under the
//! aggregator's per-key lock. Side-effect dispatch is fire-and-forget;
//! a sink failure never rolls an incident back.

use crate::aggregator::{AggregateError, Aggregator, IngestOutcome};
use crate::compliance::{ComplianceStatus, ComplianceTracker};
use crate::detector::Detector;
use crate::event::{SecurityEvent, ValidationError};
use crate::incident::{Incident, IncidentStatus};
use crate::lifecycle::{LifecycleError, LifecycleManager};
use crate::playbook::PlaybookStore;
use crate::rules::RuleStore;
use crate::sinks::{ActionRequest, ActionSink, NotificationRequest, NotificationSink};
use crate::store::{IncidentFilter, IncidentStore, StoreError};
use chrono::{DateTime, Utc};
use metrics::counter;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument, warn};

/// Default timeout applied to individual store calls on the query surface.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors raised by event intake.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

/// Errors raised by the incident query surface.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Incident not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Monotonic engine counters.
#[derive(Default)]
struct Stats {
    events_processed: AtomicU64,
    alerts_emitted: AtomicU64,
    incidents_created: AtomicU64,
    alerts_attached: AtomicU64,
}

/// Point-in-time snapshot of the engine counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub events_processed: u64,
    pub alerts_emitted: u64,
    pub incidents_created: u64,
    pub alerts_attached: u64,
}

/// The assembled correlation engine.
pub struct CorrelationEngine {
    rules: Arc<RuleStore>,
    detector: Detector,
    aggregator: Aggregator,
    store: Arc<dyn IncidentStore>,
    lifecycle: LifecycleManager,
    compliance: ComplianceTracker,
    action_sink: Arc<dyn ActionSink>,
    notification_sink: Arc<dyn NotificationSink>,
    stats: Stats,
    store_timeout: Duration,
}

impl CorrelationEngine {
    pub fn new(
        store: Arc<dyn IncidentStore>,
        rules: Arc<RuleStore>,
        playbooks: Arc<PlaybookStore>,
        action_sink: Arc<dyn ActionSink>,
        notification_sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            detector: Detector::new(rules.clone()),
            aggregator: Aggregator::new(store.clone(), playbooks),
            rules,
            store,
            lifecycle: LifecycleManager::new(),
            compliance: ComplianceTracker::default(),
            action_sink,
            notification_sink,
            stats: Stats::default(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Overrides the compliance tracker configuration.
    pub fn with_compliance(mut self, compliance: ComplianceTracker) -> Self {
        self.compliance = compliance;
        self
    }

    /// Overrides the store timeout on the query surface.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// The rule store, for hot reload.
    pub fn rules(&self) -> &Arc<RuleStore> {
        &self.rules
    }

    /// Processes one event end to end: evaluation, aggregation, playbook
    /// and escalation dispatch. Returns one outcome per emitted alert.
    #[instrument(skip(self, event), fields(category = %event.category))]
    pub async fn process_event(
        &self,
        event: &SecurityEvent,
    ) -> Result<Vec<IngestOutcome>, IngestError> {
        counter!("bw_ingest_events_total").increment(1);
        self.stats.events_processed.fetch_add(1, Ordering::Relaxed);

        let alerts = self.detector.evaluate(event).await?;
        counter!("bw_alerts_emitted_total").increment(alerts.len() as u64);
        self.stats
            .alerts_emitted
            .fetch_add(alerts.len() as u64, Ordering::Relaxed);

        let rule_snapshot = self.rules.snapshot().await;
        let mut outcomes = Vec::with_capacity(alerts.len());
        for alert in alerts {
            let rule_id = alert.rule_id.clone();
            let outcome = self.aggregator.ingest(alert).await?;

            if outcome.created {
                self.stats.incidents_created.fetch_add(1, Ordering::Relaxed);
            } else {
                self.stats.alerts_attached.fetch_add(1, Ordering::Relaxed);
            }

            // Rule-level response actions go out on the rule's first
            // trigger for this incident only.
            if outcome.first_rule_trigger {
                if let Some(rule) = rule_snapshot.rules.iter().find(|r| r.id == rule_id) {
                    for action_id in &rule.actions {
                        self.action_sink
                            .dispatch(ActionRequest {
                                incident_id: outcome.incident.id.clone(),
                                action_id: action_id.clone(),
                                target: event.source_key().map(str::to_string),
                            })
                            .await;
                    }
                }
            }
            for request in &outcome.actions {
                self.action_sink.dispatch(request.clone()).await;
            }
            if let Some(target) = outcome.content_escalation {
                self.notification_sink
                    .notify(NotificationRequest::new(
                        outcome.incident.id.clone(),
                        outcome.incident.severity,
                        target,
                        format!("Content escalation: {}", outcome.incident.title),
                    ))
                    .await;
            }
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Fetches an incident by id.
    pub async fn get_incident(&self, id: &str) -> Result<Incident, EngineError> {
        self.timed(self.store.get(id))
            .await?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }

    /// Applies a lifecycle transition and persists the result.
    ///
    /// A version conflict against a concurrent sweep write is retried once
    /// with a fresh read; the transition is re-validated against the fresh
    /// status.
    #[instrument(skip(self, notes), fields(incident_id = %id, to = %new_status))]
    pub async fn update_incident(
        &self,
        id: &str,
        new_status: IncidentStatus,
        actor: &str,
        notes: Option<String>,
    ) -> Result<Incident, EngineError> {
        let mut incident = self.get_incident(id).await?;
        self.lifecycle
            .transition(&mut incident, new_status, actor, notes.clone())?;

        match self.timed(self.store.put(incident)).await {
            Ok(stored) => {
                info!("Incident updated");
                Ok(stored)
            }
            Err(StoreError::VersionConflict { .. }) => {
                warn!("Version conflict on update, retrying with fresh read");
                let mut fresh = self.get_incident(id).await?;
                self.lifecycle
                    .transition(&mut fresh, new_status, actor, notes)?;
                Ok(self.timed(self.store.put(fresh)).await?)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Lists incidents matching the filter, newest first.
    pub async fn list_incidents(&self, filter: &IncidentFilter) -> Result<Vec<Incident>, EngineError> {
        Ok(self.timed(self.store.list(filter)).await?)
    }

    /// Compliance status and deadline for one incident.
    pub async fn compliance_status(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<(ComplianceStatus, Option<DateTime<Utc>>), EngineError> {
        let incident = self.get_incident(id).await?;
        Ok((
            self.compliance.compliance_status(&incident, now),
            self.compliance.notification_deadline(&incident),
        ))
    }

    /// Current counter values.
    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            events_processed: self.stats.events_processed.load(Ordering::Relaxed),
            alerts_emitted: self.stats.alerts_emitted.load(Ordering::Relaxed),
            incidents_created: self.stats.incidents_created.load(Ordering::Relaxed),
            alerts_attached: self.stats.alerts_attached.load(Ordering::Relaxed),
        }
    }

    /// Bounds a store call; a timeout surfaces as a retryable
    /// [`StoreError::Unavailable`].
    async fn timed<T>(
        &self,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.store_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Unavailable(format!(
                "store call exceeded {:?}",
                self.store_timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::{IncidentCategory, Severity};
    use crate::rules::{AlertRule, RuleMatch, RuleSet};
    use crate::sinks::mocks::RecordingSink;
    use crate::store::MemoryIncidentStore;
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn rules() -> RuleSet {
        RuleSet::new(vec![
            AlertRule {
                id: "injection".to_string(),
                name: "Injection attempt".to_string(),
                severity: Severity::Critical,
                category: IncidentCategory::InjectionAttack,
                matcher: RuleMatch::Direct {
                    category: "security.injection_attempt".to_string(),
                    details: HashMap::new(),
                },
                actions: vec!["block_source_ip".to_string()],
                enabled: true,
            },
            AlertRule {
                id: "auth-burst".to_string(),
                name: "Repeated authentication failures".to_string(),
                severity: Severity::High,
                category: IncidentCategory::AuthenticationAttack,
                matcher: RuleMatch::Threshold {
                    category: "auth.failure".to_string(),
                    count: 5,
                    window_secs: 300,
                },
                actions: vec![],
                enabled: true,
            },
        ])
    }

    fn engine(sink: Arc<RecordingSink>) -> CorrelationEngine {
        CorrelationEngine::new(
            Arc::new(MemoryIncidentStore::new()),
            Arc::new(RuleStore::new(rules())),
            Arc::new(PlaybookStore::default()),
            sink.clone(),
            sink,
        )
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 28, 12, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    #[tokio::test]
    async fn test_injection_event_creates_critical_incident() {
        let sink = RecordingSink::new();
        let engine = engine(sink.clone());

        let event = SecurityEvent::new(at(0), "security.injection_attempt", "evt-1")
            .with_source_ip("203.0.113.5");
        let outcomes = engine.process_event(&event).await.unwrap();

        assert_eq!(outcomes.len(), 1);
        let incident = &outcomes[0].incident;
        assert!(outcomes[0].created);
        assert_eq!(incident.severity, Severity::Critical);
        assert_eq!(incident.category, IncidentCategory::InjectionAttack);

        // Rule action plus the playbook's immediate actions.
        let actions = sink.action_ids().await;
        assert!(actions.contains(&"block_source_ip".to_string()));
        // Critical severity fired content escalation.
        assert_eq!(sink.notification_count().await, 1);
    }

    #[tokio::test]
    async fn test_auth_burst_scenario() {
        let sink = RecordingSink::new();
        let engine = engine(sink.clone());

        for i in 0..4 {
            let event = SecurityEvent::new(at(i * 30), "auth.failure", format!("evt-{}", i))
                .with_source_ip("203.0.113.9");
            assert!(engine.process_event(&event).await.unwrap().is_empty());
        }
        let event = SecurityEvent::new(at(150), "auth.failure", "evt-5")
            .with_source_ip("203.0.113.9");
        let outcomes = engine.process_event(&event).await.unwrap();

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].created);
        assert_eq!(outcomes[0].incident.severity, Severity::High);
        assert_eq!(outcomes[0].incident.alerts[0].triggering_event_ids.len(), 5);
    }

    #[tokio::test]
    async fn test_malformed_event_rejected() {
        let sink = RecordingSink::new();
        let engine = engine(sink);

        let event = SecurityEvent::new(at(0), "", "evt-1");
        let err = engine.process_event(&event).await.unwrap_err();
        assert!(matches!(err, IngestError::Validation(_)));
    }

    #[tokio::test]
    async fn test_update_incident_transition() {
        let sink = RecordingSink::new();
        let engine = engine(sink);

        let event = SecurityEvent::new(at(0), "security.injection_attempt", "evt-1")
            .with_source_ip("203.0.113.5");
        let outcomes = engine.process_event(&event).await.unwrap();
        let id = outcomes[0].incident.id.clone();

        let updated = engine
            .update_incident(&id, IncidentStatus::Acknowledged, "analyst1", None)
            .await
            .unwrap();
        assert_eq!(updated.status, IncidentStatus::Acknowledged);

        let err = engine
            .update_incident(&id, IncidentStatus::Closed, "analyst1", None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Lifecycle(LifecycleError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_incident_not_found() {
        let sink = RecordingSink::new();
        let engine = engine(sink);

        let err = engine.get_incident("INC-20260828-9999").await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_stats_track_processing() {
        let sink = RecordingSink::new();
        let engine = engine(sink);

        let event = SecurityEvent::new(at(0), "security.injection_attempt", "evt-1")
            .with_source_ip("203.0.113.5");
        engine.process_event(&event).await.unwrap();
        let event = SecurityEvent::new(at(60), "security.injection_attempt", "evt-2")
            .with_source_ip("203.0.113.5");
        engine.process_event(&event).await.unwrap();

        let stats = engine.stats();
        assert_eq!(stats.events_processed, 2);
        assert_eq!(stats.alerts_emitted, 2);
        assert_eq!(stats.incidents_created, 1);
        assert_eq!(stats.alerts_attached, 1);
    }

    #[tokio::test]
    async fn test_compliance_status_via_engine() {
        let sink = RecordingSink::new();
        let engine = engine(sink);

        let event = SecurityEvent::new(at(0), "security.injection_attempt", "evt-1")
            .with_source_ip("203.0.113.5");
        let outcomes = engine.process_event(&event).await.unwrap();
        let id = outcomes[0].incident.id.clone();

        // Critical incident: notifiable, pending within the window.
        let (status, deadline) = engine.compliance_status(&id, at(3600)).await.unwrap();
        assert_eq!(status, ComplianceStatus::Pending);
        assert!(deadline.is_some());
    }
}
