//! Severity and category classification.
//!
//! Runs after every alert attachment. Severity is the maximum across
//! attached alerts; category follows a fixed precedence table because
//! exploitation attempts dominate lower-signal categories.

use crate::escalation::EscalationTarget;
use crate::incident::{EscalationDeadline, Incident, IncidentCategory, Severity};
use tracing::{debug, info};

/// Result of reclassifying an incident.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reclassification {
    pub previous_severity: Severity,
    pub severity: Severity,
    /// Severity strictly increased; the playbook selector re-runs.
    pub severity_escalated: bool,
    /// Content-based escalation fired on this pass; the caller must notify
    /// this target. `None` when not applicable or already fired.
    pub content_escalation: Option<EscalationTarget>,
}

/// Recomputes severity and category from an incident's attached alerts.
#[derive(Debug, Default)]
pub struct Classifier;

impl Classifier {
    pub fn new() -> Self {
        Self
    }

    /// Reclassifies in place and records the changes in the timeline.
    ///
    /// A severity increase appends a `severity_escalated` entry and clears
    /// the selected-phase markers so higher-tier playbook phases can be
    /// selected again. A `data_breach` category or `Critical` severity
    /// triggers content-based escalation to the top of the chain, once.
    pub fn reclassify(&self, incident: &mut Incident) -> Reclassification {
        let previous_severity = incident.severity;

        let severity = incident
            .alerts
            .iter()
            .map(|a| a.severity)
            .max()
            .unwrap_or(previous_severity);

        let category = incident
            .alerts
            .iter()
            .map(|a| &a.category)
            .max_by_key(|c| c.precedence())
            .cloned()
            .unwrap_or_else(|| incident.category.clone());

        if category != incident.category {
            debug!(
                incident_id = %incident.id,
                from = %incident.category,
                to = %category,
                "Category reclassified"
            );
            incident.category = category;
        }

        let severity_escalated = severity > previous_severity;
        incident.severity = severity;
        if severity_escalated {
            info!(
                incident_id = %incident.id,
                from = %previous_severity,
                to = %severity,
                "Severity escalated"
            );
            incident.record_at(
                incident.latest_alert_at(),
                "system",
                "severity_escalated",
                format!("Severity raised from {} to {}", previous_severity, severity),
            );
            incident.phases_selected.clear();
        }

        let content_escalation = self.check_content_escalation(incident);

        Reclassification {
            previous_severity,
            severity,
            severity_escalated,
            content_escalation,
        }
    }

    /// Fires at most once per incident, tracked in its escalation state.
    fn check_content_escalation(&self, incident: &mut Incident) -> Option<EscalationTarget> {
        let triggers = incident.category == IncidentCategory::DataBreach
            || incident.severity == Severity::Critical;
        if !triggers || incident.escalation_state.has_fired(EscalationDeadline::Content) {
            return None;
        }
        incident.escalation_state.mark_fired(EscalationDeadline::Content);
        let target = EscalationTarget::top();
        incident.record_at(
            incident.latest_alert_at(),
            "system",
            "escalated",
            format!("Content-based escalation to {}", target),
        );
        Some(target)
    }
}
