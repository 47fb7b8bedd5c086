//! Incident data models for Bridgewatch.
//!
//! This module defines the core data structures used throughout the engine
//! to represent alerts, incidents, timeline entries, and escalation state.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Severity levels for alerts and incidents.
///
/// Variants are declared in ascending order so the derived `Ord` matches
/// the escalation ordering. `Compliance` is a convenience bucket that is
/// handled with medium-equivalent urgency by the default policies.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Regulatory or policy-driven finding.
    Compliance,
    /// Low severity.
    Low,
    /// Medium severity.
    Medium,
    /// High severity - requires attention.
    High,
    /// Critical - immediate response required.
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Compliance => write!(f, "compliance"),
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Incident categories assigned by classification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum IncidentCategory {
    /// SQL/command/path injection attempts against the bridge.
    InjectionAttack,
    /// Confirmed or suspected exposure of protected data.
    DataBreach,
    /// Brute force, credential stuffing, or session attacks.
    AuthenticationAttack,
    /// Violation of an operational security policy.
    PolicyViolation,
    /// Unexplained deviation from baseline behavior.
    Anomaly,
    /// Category outside the built-in set.
    Other(String),
}

impl IncidentCategory {
    /// Classification precedence. When an incident carries alerts with
    /// multiple distinct categories, the highest-precedence category wins
    /// because exploitation attempts dominate lower-signal categories.
    pub fn precedence(&self) -> u8 {
        match self {
            IncidentCategory::InjectionAttack => 5,
            IncidentCategory::DataBreach => 4,
            IncidentCategory::AuthenticationAttack => 3,
            IncidentCategory::PolicyViolation => 2,
            IncidentCategory::Anomaly => 1,
            IncidentCategory::Other(_) => 0,
        }
    }

    /// A stable slug used in dedup keys and log fields.
    pub fn slug(&self) -> &str {
        match self {
            IncidentCategory::InjectionAttack => "injection_attack",
            IncidentCategory::DataBreach => "data_breach",
            IncidentCategory::AuthenticationAttack => "authentication_attack",
            IncidentCategory::PolicyViolation => "policy_violation",
            IncidentCategory::Anomaly => "anomaly",
            IncidentCategory::Other(name) => name,
        }
    }
}

impl std::fmt::Display for IncidentCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.slug())
    }
}

/// A single rule-match instance produced by the detector.
///
/// An alert is owned by exactly one incident after aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Unique identifier for this alert.
    pub id: Uuid,
    /// The rule that produced this alert.
    pub rule_id: String,
    /// Severity assigned by the rule.
    pub severity: Severity,
    /// Category assigned by the rule.
    pub category: IncidentCategory,
    /// Source IP from the triggering event(s), if any.
    pub source_ip: Option<String>,
    /// Actor from the triggering event(s), if any.
    pub actor: Option<String>,
    /// Timestamp of the (last) triggering event.
    pub timestamp: DateTime<Utc>,
    /// Correlation ids of the events that contributed to this alert.
    pub triggering_event_ids: Vec<String>,
}

impl Alert {
    /// The identity half of the dedup key: source IP when present,
    /// otherwise the actor.
    pub fn source_key(&self) -> Option<&str> {
        self.source_ip.as_deref().or(self.actor.as_deref())
    }

    /// Derives the dedup key merging related alerts into one incident.
    pub fn dedup_key(&self) -> String {
        format!(
            "{}:{}",
            self.category.slug(),
            self.source_key().unwrap_or("unknown")
        )
    }
}

/// Status of an incident in its lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    /// Newly created, nobody has acted yet.
    Detected,
    /// A responder has taken ownership.
    Acknowledged,
    /// Root cause analysis in progress.
    Investigating,
    /// Containment/remediation in progress.
    Mitigating,
    /// Resolved; awaiting closure review.
    Resolved,
    /// Closed. Terminal; the record persists for reporting.
    Closed,
}

impl IncidentStatus {
    /// Whether the incident still participates in dedup lookup and
    /// escalation sweeps.
    pub fn is_open(&self) -> bool {
        !matches!(self, IncidentStatus::Resolved | IncidentStatus::Closed)
    }

    /// Whether the status permits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, IncidentStatus::Closed)
    }
}

impl std::fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IncidentStatus::Detected => write!(f, "detected"),
            IncidentStatus::Acknowledged => write!(f, "acknowledged"),
            IncidentStatus::Investigating => write!(f, "investigating"),
            IncidentStatus::Mitigating => write!(f, "mitigating"),
            IncidentStatus::Resolved => write!(f, "resolved"),
            IncidentStatus::Closed => write!(f, "closed"),
        }
    }
}

/// An immutable entry in an incident's timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// Unique identifier for this entry.
    pub id: Uuid,
    /// When the entry was recorded.
    pub timestamp: DateTime<Utc>,
    /// Acting identity, human or `"system"`.
    pub actor: String,
    /// Short action name, e.g. `detected`, `alert_added`, `escalated`.
    pub action: String,
    /// Free-form detail.
    pub detail: String,
}

/// Deadlines that can fire for an incident.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EscalationDeadline {
    /// Acknowledgement deadline missed while still in `Detected`.
    Ack,
    /// Resolution deadline missed in any open state.
    Resolution,
    /// Content-based escalation (e.g. a data breach alert appeared).
    Content,
}

/// Idempotency markers for escalation.
///
/// The set of already-fired deadlines is part of the incident record so
/// that scheduler restarts never duplicate a notification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EscalationState {
    /// Deadlines that have already fired for this incident.
    #[serde(default)]
    pub fired: BTreeSet<EscalationDeadline>,
}

impl EscalationState {
    /// Whether the given deadline has already fired.
    pub fn has_fired(&self, deadline: EscalationDeadline) -> bool {
        self.fired.contains(&deadline)
    }

    /// Marks the deadline as fired. Returns false if it had fired before.
    pub fn mark_fired(&mut self, deadline: EscalationDeadline) -> bool {
        self.fired.insert(deadline)
    }
}

/// The tracked, lifecycled case that alerts are aggregated into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    /// Identifier of the form `INC-<YYYYMMDD>-<seq>`; sequence resets daily.
    pub id: String,
    /// Human-readable title derived from the first alert.
    pub title: String,
    /// Maximum severity across attached alerts.
    pub severity: Severity,
    /// Classified category.
    pub category: IncidentCategory,
    /// Current lifecycle status.
    pub status: IncidentStatus,
    /// When the incident was created.
    pub created_at: DateTime<Utc>,
    /// Stamped once on first entry into `Acknowledged`.
    pub acknowledged_at: Option<DateTime<Utc>>,
    /// Stamped once on first entry into `Resolved`.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Stamped once on entry into `Closed`.
    pub closed_at: Option<DateTime<Utc>>,
    /// Assigned responder, if any.
    pub assigned_to: Option<String>,
    /// Attached alerts, append-only, never empty.
    pub alerts: Vec<Alert>,
    /// Append-only history with strictly increasing timestamps.
    pub timeline: Vec<TimelineEntry>,
    /// Notes recorded at resolution.
    pub resolution_notes: Option<String>,
    /// Key merging related alerts into this incident.
    pub dedup_key: String,
    /// Already-fired escalation deadlines.
    #[serde(default)]
    pub escalation_state: EscalationState,
    /// Playbook phases already selected for this incident.
    #[serde(default)]
    pub phases_selected: BTreeSet<crate::playbook::PlaybookPhase>,
    /// Optimistic-concurrency version, bumped by the store on every put.
    #[serde(default)]
    pub version: u64,
}

impl Incident {
    /// Creates a new incident from its first alert.
    pub fn from_alert(id: String, alert: Alert) -> Self {
        let created_at = alert.timestamp;
        let title = format!("{} from {}", alert.category, alert.source_key().unwrap_or("unknown"));
        let dedup_key = alert.dedup_key();
        let mut incident = Self {
            id,
            title,
            severity: alert.severity,
            category: alert.category.clone(),
            status: IncidentStatus::Detected,
            created_at,
            acknowledged_at: None,
            resolved_at: None,
            closed_at: None,
            assigned_to: None,
            alerts: vec![alert],
            timeline: Vec::new(),
            resolution_notes: None,
            dedup_key,
            escalation_state: EscalationState::default(),
            phases_selected: BTreeSet::new(),
            version: 0,
        };
        incident.record_at(created_at, "system", "detected", "Incident created from alert");
        incident
    }

    /// Timestamp of the most recently attached alert.
    pub fn latest_alert_at(&self) -> DateTime<Utc> {
        self.alerts
            .iter()
            .map(|a| a.timestamp)
            .max()
            .unwrap_or(self.created_at)
    }

    /// Appends an alert and records it in the timeline. Severity and
    /// category are recomputed by the classifier afterwards.
    pub fn attach_alert(&mut self, alert: Alert) {
        let detail = format!("Alert from rule {} attached", alert.rule_id);
        let at = alert.timestamp;
        self.alerts.push(alert);
        self.record_at(at, "system", "alert_added", detail);
    }

    /// Appends a timeline entry stamped now.
    pub fn record(&mut self, actor: &str, action: &str, detail: impl Into<String>) {
        self.record_at(Utc::now(), actor, action, detail);
    }

    /// Appends a timeline entry, nudging the timestamp forward if needed so
    /// timeline timestamps stay strictly increasing.
    pub fn record_at(
        &mut self,
        at: DateTime<Utc>,
        actor: &str,
        action: &str,
        detail: impl Into<String>,
    ) {
        let timestamp = match self.timeline.last() {
            Some(last) if at <= last.timestamp => last.timestamp + Duration::microseconds(1),
            _ => at,
        };
        self.timeline.push(TimelineEntry {
            id: Uuid::new_v4(),
            timestamp,
            actor: actor.to_string(),
            action: action.to_string(),
            detail: detail.into(),
        });
    }

    /// Finds the first timeline entry with the given action name.
    pub fn first_timeline_entry(&self, action: &str) -> Option<&TimelineEntry> {
        self.timeline.iter().find(|e| e.action == action)
    }
}

/// Formats an incident id for the given UTC date and daily sequence number.
pub fn format_incident_id(date: NaiveDate, seq: u32) -> String {
    format!("INC-{}-{:04}", date.format("%Y%m%d"), seq)
}

/// Extracts the daily sequence number from an incident id, if the id
/// belongs to the given date.
pub fn incident_id_sequence(id: &str, date: NaiveDate) -> Option<u32> {
    let suffix = id.strip_prefix(&format!("INC-{}-", date.format("%Y%m%d")))?;
    suffix.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_alert(category: IncidentCategory, severity: Severity) -> Alert {
        Alert {
            id: Uuid::new_v4(),
            rule_id: "rule-1".to_string(),
            severity,
            category,
            source_ip: Some("203.0.113.5".to_string()),
            actor: None,
            timestamp: Utc::now(),
            triggering_event_ids: vec!["evt-1".to_string()],
        }
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert!(Severity::Low > Severity::Compliance);
    }

    #[test]
    fn test_category_precedence() {
        assert!(
            IncidentCategory::InjectionAttack.precedence()
                > IncidentCategory::DataBreach.precedence()
        );
        assert!(
            IncidentCategory::DataBreach.precedence()
                > IncidentCategory::AuthenticationAttack.precedence()
        );
        assert_eq!(IncidentCategory::Other("x".to_string()).precedence(), 0);
    }

    #[test]
    fn test_incident_creation() {
        let alert = test_alert(IncidentCategory::InjectionAttack, Severity::Critical);
        let incident = Incident::from_alert("INC-20260828-0001".to_string(), alert);

        assert_eq!(incident.status, IncidentStatus::Detected);
        assert_eq!(incident.severity, Severity::Critical);
        assert_eq!(incident.alerts.len(), 1);
        assert_eq!(incident.timeline.len(), 1);
        assert_eq!(incident.timeline[0].action, "detected");
        assert_eq!(incident.dedup_key, "injection_attack:203.0.113.5");
    }

    #[test]
    fn test_attach_alert_appends_timeline() {
        let alert = test_alert(IncidentCategory::AuthenticationAttack, Severity::High);
        let mut incident = Incident::from_alert("INC-20260828-0001".to_string(), alert);

        incident.attach_alert(test_alert(
            IncidentCategory::AuthenticationAttack,
            Severity::High,
        ));
        assert_eq!(incident.alerts.len(), 2);
        assert_eq!(incident.timeline.len(), 2);
        assert_eq!(incident.timeline[1].action, "alert_added");
    }

    #[test]
    fn test_timeline_timestamps_strictly_increase() {
        let alert = test_alert(IncidentCategory::Anomaly, Severity::Low);
        let at = alert.timestamp;
        let mut incident = Incident::from_alert("INC-20260828-0001".to_string(), alert);

        // Deliberately record several entries at the same instant.
        for i in 0..5 {
            incident.record_at(at, "system", "note", format!("entry {}", i));
        }

        let mut prev = incident.timeline[0].timestamp;
        for entry in &incident.timeline[1..] {
            assert!(entry.timestamp > prev);
            prev = entry.timestamp;
        }
    }

    #[test]
    fn test_escalation_state_idempotency() {
        let mut state = EscalationState::default();
        assert!(state.mark_fired(EscalationDeadline::Ack));
        assert!(!state.mark_fired(EscalationDeadline::Ack));
        assert!(state.has_fired(EscalationDeadline::Ack));
        assert!(!state.has_fired(EscalationDeadline::Resolution));
    }

    #[test]
    fn test_incident_id_format() {
        let date = Utc.with_ymd_and_hms(2026, 8, 28, 0, 0, 0).unwrap().date_naive();
        assert_eq!(format_incident_id(date, 7), "INC-20260828-0007");
    }

    #[test]
    fn test_incident_id_sequence_roundtrip() {
        let date = Utc.with_ymd_and_hms(2026, 8, 28, 0, 0, 0).unwrap().date_naive();
        assert_eq!(incident_id_sequence("INC-20260828-0007", date), Some(7));
        // Other dates and foreign ids do not parse.
        assert_eq!(incident_id_sequence("INC-20260827-0007", date), None);
        assert_eq!(incident_id_sequence("TICKET-42", date), None);
    }

    #[test]
    fn test_dedup_key_falls_back_to_actor() {
        let mut alert = test_alert(IncidentCategory::PolicyViolation, Severity::Medium);
        alert.source_ip = None;
        alert.actor = Some("operator1".to_string());
        assert_eq!(alert.dedup_key(), "policy_violation:operator1");
    }
}
