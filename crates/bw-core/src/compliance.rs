//! Mandatory-notification deadline tracking.
//!
//! A read-only derived view: it computes deadlines and status from the
//! incident record and never sends anything itself.

use crate::incident::{Incident, IncidentCategory, Severity};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Default regulatory notification window.
pub const DEFAULT_NOTIFICATION_WINDOW_HOURS: i64 = 72;

/// Compliance standing of one incident.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
    /// The incident does not require external notification.
    NotApplicable,
    /// Notification required, deadline not yet passed, not yet notified.
    Pending,
    /// Notified within the window.
    OnTime,
    /// Deadline passed without notification, or notified after it.
    Late,
}

impl std::fmt::Display for ComplianceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComplianceStatus::NotApplicable => write!(f, "not_applicable"),
            ComplianceStatus::Pending => write!(f, "pending"),
            ComplianceStatus::OnTime => write!(f, "on_time"),
            ComplianceStatus::Late => write!(f, "late"),
        }
    }
}

/// Computes notification deadlines for notifiable incidents.
#[derive(Debug, Clone)]
pub struct ComplianceTracker {
    notifiable_categories: HashSet<IncidentCategory>,
    window: Duration,
}

impl ComplianceTracker {
    pub fn new(notifiable_categories: HashSet<IncidentCategory>, window: Duration) -> Self {
        Self {
            notifiable_categories,
            window,
        }
    }

    /// An incident is notifiable when its category is in the configured
    /// set, or when it is critical regardless of category.
    pub fn is_notifiable(&self, incident: &Incident) -> bool {
        incident.severity == Severity::Critical
            || self.notifiable_categories.contains(&incident.category)
    }

    /// Deadline for external notification, `None` for non-notifiable
    /// incidents.
    pub fn notification_deadline(&self, incident: &Incident) -> Option<DateTime<Utc>> {
        self.is_notifiable(incident)
            .then(|| incident.created_at + self.window)
    }

    /// Compliance status at the given instant, derived from the first
    /// `notified` timeline entry relative to the deadline.
    pub fn compliance_status(&self, incident: &Incident, now: DateTime<Utc>) -> ComplianceStatus {
        let Some(deadline) = self.notification_deadline(incident) else {
            return ComplianceStatus::NotApplicable;
        };
        match incident.first_timeline_entry("notified") {
            Some(entry) if entry.timestamp <= deadline => ComplianceStatus::OnTime,
            Some(_) => ComplianceStatus::Late,
            None if now <= deadline => ComplianceStatus::Pending,
            None => ComplianceStatus::Late,
        }
    }
}

impl Default for ComplianceTracker {
    fn default() -> Self {
        let mut categories = HashSet::new();
        categories.insert(IncidentCategory::DataBreach);
        Self::new(categories, Duration::hours(DEFAULT_NOTIFICATION_WINDOW_HOURS))
    }
}
