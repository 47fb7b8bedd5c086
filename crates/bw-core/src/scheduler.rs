//! Background escalation sweeps over open incidents.
//!
//! Runs on a fixed interval independent of event arrival. Each deadline
//! fires at most once per incident; the fired set lives on the incident
//! record, so restarts never re-notify. Notifications are sent only after
//! the marker has been durably written.

use crate::escalation::EscalationPolicySet;
use crate::incident::{EscalationDeadline, Incident, IncidentStatus};
use crate::sinks::{NotificationRequest, NotificationSink};
use crate::store::{IncidentStore, StoreError};
use chrono::{DateTime, Utc};
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

/// Default sweep interval.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Periodically escalates open incidents whose deadlines have passed.
pub struct EscalationScheduler {
    store: Arc<dyn IncidentStore>,
    policies: EscalationPolicySet,
    notifications: Arc<dyn NotificationSink>,
    interval: Duration,
}

impl EscalationScheduler {
    pub fn new(
        store: Arc<dyn IncidentStore>,
        policies: EscalationPolicySet,
        notifications: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            store,
            policies,
            notifications,
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    /// Overrides the sweep interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Runs sweeps until the shutdown signal flips. The in-flight sweep
    /// always completes before the task returns.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        info!(interval_secs = self.interval.as_secs(), "Escalation scheduler started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once(Utc::now()).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Escalation scheduler stopping");
                        break;
                    }
                }
            }
        }
    }

    /// One full pass over all open incidents at the given instant.
    ///
    /// Returns how many escalations fired. Store failures on individual
    /// incidents are logged and skipped; the sweep continues.
    #[instrument(skip(self))]
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> usize {
        let open = match self.store.list_open().await {
            Ok(open) => open,
            Err(err) => {
                error!("Sweep aborted, store unavailable: {}", err);
                return 0;
            }
        };

        let mut fired = 0;
        for incident in open {
            match self.escalate_if_due(incident, now).await {
                Ok(count) => fired += count,
                Err(err) => warn!("Escalation write failed, will retry next sweep: {}", err),
            }
        }
        if fired > 0 {
            info!(fired, "Escalation sweep complete");
        }
        fired
    }

    /// Applies due deadlines to one incident. Writes first, notifies after
    /// the write succeeds; a version conflict is retried once with a fresh
    /// read.
    async fn escalate_if_due(
        &self,
        incident: Incident,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let Some((updated, requests)) = self.apply_due_deadlines(incident, now) else {
            return Ok(0);
        };

        // The notifications must come from the same evaluation pass whose
        // markers were stored, or a fired deadline is never announced.
        let (stored, requests) = match self.store.put(updated).await {
            Ok(stored) => (stored, requests),
            Err(StoreError::VersionConflict { id, .. }) => {
                let fresh = self
                    .store
                    .get(&id)
                    .await?
                    .ok_or(StoreError::NotFound(id))?;
                match self.apply_due_deadlines(fresh, now) {
                    Some((updated, fresh_requests)) => {
                        (self.store.put(updated).await?, fresh_requests)
                    }
                    // The concurrent writer already resolved or escalated it.
                    None => return Ok(0),
                }
            }
            Err(err) => return Err(err),
        };

        for request in &requests {
            self.notifications.notify(request.clone()).await;
        }
        counter!("bw_escalations_fired_total").increment(requests.len() as u64);
        info!(incident_id = %stored.id, count = requests.len(), "Escalated");
        Ok(requests.len())
    }

    /// Pure deadline evaluation: marks due deadlines on a copy and builds
    /// the notifications to send once the copy is stored. `None` when
    /// nothing is due.
    fn apply_due_deadlines(
        &self,
        mut incident: Incident,
        now: DateTime<Utc>,
    ) -> Option<(Incident, Vec<NotificationRequest>)> {
        if !incident.status.is_open() {
            return None;
        }
        let policy = self.policies.for_severity(incident.severity);
        let age = now - incident.created_at;
        let mut requests = Vec::new();

        if incident.status == IncidentStatus::Detected
            && age > policy.ack_deadline()
            && !incident.escalation_state.has_fired(EscalationDeadline::Ack)
        {
            incident.escalation_state.mark_fired(EscalationDeadline::Ack);
            let target = policy.escalation_target;
            incident.record_at(
                now,
                "system",
                "escalated",
                format!("Acknowledgement deadline missed, escalated to {}", target),
            );
            requests.push(NotificationRequest::new(
                incident.id.clone(),
                incident.severity,
                target,
                format!("{} unacknowledged past deadline: {}", incident.id, incident.title),
            ));
        }

        if age > policy.resolution_deadline()
            && !incident
                .escalation_state
                .has_fired(EscalationDeadline::Resolution)
        {
            incident
                .escalation_state
                .mark_fired(EscalationDeadline::Resolution);
            let target = policy.escalation_target.next_tier();
            incident.record_at(
                now,
                "system",
                "escalated",
                format!("Resolution deadline missed, escalated to {}", target),
            );
            requests.push(NotificationRequest::new(
                incident.id.clone(),
                incident.severity,
                target,
                format!("{} unresolved past deadline: {}", incident.id, incident.title),
            ));
        }

        if requests.is_empty() {
            None
        } else {
            Some((incident, requests))
        }
    }
}
