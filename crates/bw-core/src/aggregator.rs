//! Alert-to-incident aggregation.
//!
//! Dedup key is (category, source identity). The lookup-then-create
//! sequence is serialized per key with a lazily created async mutex, so
//! concurrent alerts with the same key never race into two incidents while
//! unrelated keys proceed in parallel.

use crate::classifier::{Classifier, Reclassification};
use crate::escalation::EscalationTarget;
use crate::incident::{format_incident_id, incident_id_sequence, Alert, Incident};
use crate::playbook::{PlaybookPhase, PlaybookStore};
use crate::sinks::ActionRequest;
use crate::store::{IncidentFilter, IncidentStore, StoreError};
use chrono::{Duration, NaiveDate};
use metrics::counter;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

/// Default deduplication window.
pub const DEFAULT_DEDUP_WINDOW_SECS: u64 = 3600;

/// Errors raised during aggregation.
#[derive(Error, Debug)]
pub enum AggregateError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The daily sequence produced a taken id twice in a row.
    #[error("Duplicate incident sequence for {0} after regeneration")]
    DuplicateSequence(String),
}

/// The result of ingesting one alert.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    /// The new or updated incident, as stored.
    pub incident: Incident,
    /// Whether this alert created the incident.
    pub created: bool,
    /// Whether this alert's rule had not fired for this incident before.
    pub first_rule_trigger: bool,
    /// Whether classification raised the incident's severity.
    pub severity_escalated: bool,
    /// Playbook action requests selected during this ingest.
    pub actions: Vec<ActionRequest>,
    /// Content-based escalation target fired during this ingest, if any.
    pub content_escalation: Option<EscalationTarget>,
}

/// Merges alerts into incidents and drives classification and playbook
/// selection for each ingest.
pub struct Aggregator {
    store: Arc<dyn IncidentStore>,
    playbooks: Arc<PlaybookStore>,
    classifier: Classifier,
    dedup_window: Duration,
    key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    sequences: Mutex<HashMap<NaiveDate, u32>>,
}

impl Aggregator {
    pub fn new(store: Arc<dyn IncidentStore>, playbooks: Arc<PlaybookStore>) -> Self {
        Self {
            store,
            playbooks,
            classifier: Classifier::new(),
            dedup_window: Duration::seconds(DEFAULT_DEDUP_WINDOW_SECS as i64),
            key_locks: Mutex::new(HashMap::new()),
            sequences: Mutex::new(HashMap::new()),
        }
    }

    /// Overrides the deduplication window.
    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    async fn lock_for_key(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock().await;
        // Keys are attacker-controlled; retire locks no in-flight ingest
        // still holds so the map tracks active keys, not seen keys.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    #[cfg(test)]
    async fn key_lock_count(&self) -> usize {
        self.key_locks.lock().await.len()
    }

    /// Ingests one alert, attaching it to a matching open incident within
    /// the dedup window or creating a new incident.
    #[instrument(skip(self, alert), fields(rule_id = %alert.rule_id, dedup_key = %alert.dedup_key()))]
    pub async fn ingest(&self, alert: Alert) -> Result<IngestOutcome, AggregateError> {
        let key = alert.dedup_key();
        let key_lock = self.lock_for_key(&key).await;
        let _guard = key_lock.lock().await;

        let since = alert.timestamp - self.dedup_window;
        match self.store.find_open_by_dedup_key(&key, since).await? {
            Some(existing) => self.attach(existing, alert).await,
            None => self.create(alert).await,
        }
    }

    async fn attach(
        &self,
        incident: Incident,
        alert: Alert,
    ) -> Result<IngestOutcome, AggregateError> {
        let (candidate, first_rule_trigger, reclass, actions) =
            self.apply_attach(incident, alert.clone()).await;

        // The returned outcome must describe the pass that was actually
        // stored; on conflict the stale pass is discarded wholesale.
        let (stored, first_rule_trigger, reclass, actions) =
            match self.store.put(candidate).await {
                Ok(stored) => (stored, first_rule_trigger, reclass, actions),
                // The sweep may have written between our read and this put.
                // Re-read and replay the attach once.
                Err(StoreError::VersionConflict { id, .. }) => {
                    warn!(incident_id = %id, "Version conflict on attach, retrying");
                    let fresh = self
                        .store
                        .get(&id)
                        .await?
                        .ok_or(StoreError::NotFound(id))?;
                    let (candidate, first_rule_trigger, reclass, actions) =
                        self.apply_attach(fresh, alert).await;
                    (
                        self.store.put(candidate).await?,
                        first_rule_trigger,
                        reclass,
                        actions,
                    )
                }
                Err(err) => return Err(err.into()),
            };

        counter!("bw_alerts_attached_total").increment(1);
        info!(incident_id = %stored.id, "Alert attached to existing incident");
        Ok(IngestOutcome {
            incident: stored,
            created: false,
            first_rule_trigger,
            severity_escalated: reclass.severity_escalated,
            actions,
            content_escalation: reclass.content_escalation,
        })
    }

    /// One attach evaluation pass: appends the alert, reclassifies, and
    /// re-selects the immediate phase when severity rose.
    async fn apply_attach(
        &self,
        mut incident: Incident,
        alert: Alert,
    ) -> (Incident, bool, Reclassification, Vec<ActionRequest>) {
        let first_rule_trigger = !incident.alerts.iter().any(|a| a.rule_id == alert.rule_id);
        incident.attach_alert(alert);
        let reclass = self.classifier.reclassify(&mut incident);

        let mut actions = Vec::new();
        if reclass.severity_escalated {
            // Phase markers were reset by the classifier; re-select the
            // immediate phase at the new severity tier.
            actions.extend(self.select_phase(&mut incident, PlaybookPhase::ImmediateActions).await);
        }
        (incident, first_rule_trigger, reclass, actions)
    }

    async fn create(&self, alert: Alert) -> Result<IngestOutcome, AggregateError> {
        let date = alert.timestamp.date_naive();
        let id = self.next_id(date).await?;
        let (incident, actions, reclass) = self.build_new(id, alert.clone()).await;

        let (stored, actions) = match self.store.create(incident).await {
            Ok(stored) => (stored, actions),
            Err(StoreError::DuplicateId(taken)) => {
                warn!(incident_id = %taken, "Incident id collision, regenerating");
                let retry_id = self.next_id(date).await?;
                let (retry, retry_actions, _) = self.build_new(retry_id, alert).await;
                let stored = self.store.create(retry).await.map_err(|err| match err {
                    StoreError::DuplicateId(id) => AggregateError::DuplicateSequence(id),
                    other => AggregateError::Store(other),
                })?;
                (stored, retry_actions)
            }
            Err(err) => return Err(err.into()),
        };

        counter!("bw_incidents_created_total").increment(1);
        info!(incident_id = %stored.id, severity = %stored.severity, "Incident created");
        Ok(IngestOutcome {
            incident: stored,
            created: true,
            first_rule_trigger: true,
            severity_escalated: false,
            actions,
            content_escalation: reclass.content_escalation,
        })
    }

    async fn build_new(
        &self,
        id: String,
        alert: Alert,
    ) -> (Incident, Vec<ActionRequest>, Reclassification) {
        let mut incident = Incident::from_alert(id, alert);
        let reclass = self.classifier.reclassify(&mut incident);
        let actions = self.select_phase(&mut incident, PlaybookPhase::ImmediateActions).await;
        (incident, actions, reclass)
    }

    /// Selects a phase if it has not been selected for this incident yet.
    async fn select_phase(
        &self,
        incident: &mut Incident,
        phase: PlaybookPhase,
    ) -> Vec<ActionRequest> {
        if !incident.phases_selected.insert(phase) {
            return Vec::new();
        }
        let table = self.playbooks.snapshot().await;
        let requests = table.select(incident, phase);
        if !requests.is_empty() {
            incident.record_at(
                incident.latest_alert_at(),
                "system",
                "playbook_selected",
                format!("Phase {} selected: {} action(s)", phase, requests.len()),
            );
        }
        requests
    }

    /// Allocates the next incident id for `date`. The first allocation for
    /// a date seeds the counter from the store, so a restarted engine over
    /// a durable backend continues the day's sequence instead of reissuing
    /// taken ids.
    async fn next_id(&self, date: NaiveDate) -> Result<String, StoreError> {
        let mut sequences = self.sequences.lock().await;
        if !sequences.contains_key(&date) {
            let existing = self.store.list(&IncidentFilter::default()).await?;
            let highest = existing
                .iter()
                .filter_map(|incident| incident_id_sequence(&incident.id, date))
                .max()
                .unwrap_or(0);
            sequences.insert(date, highest);
        }
        let seq = sequences.entry(date).or_insert(0);
        *seq += 1;
        Ok(format_incident_id(date, *seq))
    }
}
