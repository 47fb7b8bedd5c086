//! Incident lifecycle state machine.
//!
//! Transitions are forward-only along detected → acknowledged →
//! investigating → mitigating → resolved → closed, with two exceptions:
//! acknowledged may skip straight to mitigating, and any non-terminal
//! state may short-circuit to resolved with mandatory notes. Closed is
//! reachable only from resolved. Rejected transitions leave the incident
//! untouched.

use crate::incident::{Incident, IncidentStatus};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, instrument};

/// Errors raised by lifecycle transitions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: IncidentStatus,
        to: IncidentStatus,
    },

    #[error("Resolution notes are required when resolving from {from}")]
    MissingResolutionNotes { from: IncidentStatus },
}

/// Applies and validates incident status transitions.
#[derive(Debug, Default)]
pub struct LifecycleManager;

impl LifecycleManager {
    pub fn new() -> Self {
        Self
    }

    /// Whether a transition is permitted, ignoring the notes requirement.
    pub fn is_allowed(from: IncidentStatus, to: IncidentStatus) -> bool {
        use IncidentStatus::*;
        matches!(
            (from, to),
            (Detected, Acknowledged)
                | (Acknowledged, Investigating)
                | (Acknowledged, Mitigating)
                | (Investigating, Mitigating)
                | (Mitigating, Resolved)
                | (Detected, Resolved)
                | (Acknowledged, Resolved)
                | (Investigating, Resolved)
                | (Resolved, Closed)
        )
    }

    /// Applies a transition stamped now.
    pub fn transition(
        &self,
        incident: &mut Incident,
        to: IncidentStatus,
        actor: &str,
        notes: Option<String>,
    ) -> Result<(), LifecycleError> {
        self.transition_at(incident, to, actor, notes, Utc::now())
    }

    /// Applies a transition with an explicit timestamp.
    ///
    /// The incident is left unchanged on any error. On success a
    /// `status_changed` timeline entry records the actor, old and new
    /// status, and notes; the first entry into acknowledged, resolved, and
    /// closed stamps the corresponding timestamp field.
    #[instrument(skip(self, incident, notes), fields(incident_id = %incident.id, from = %incident.status, to = %to))]
    pub fn transition_at(
        &self,
        incident: &mut Incident,
        to: IncidentStatus,
        actor: &str,
        notes: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<(), LifecycleError> {
        let from = incident.status;
        if !Self::is_allowed(from, to) {
            return Err(LifecycleError::InvalidTransition { from, to });
        }
        // Short-circuit resolves document why the incident was cut short;
        // the ordinary mitigating -> resolved path may omit notes.
        if to == IncidentStatus::Resolved
            && from != IncidentStatus::Mitigating
            && notes.as_deref().map_or(true, |n| n.trim().is_empty())
        {
            return Err(LifecycleError::MissingResolutionNotes { from });
        }

        incident.status = to;
        match to {
            IncidentStatus::Acknowledged => {
                if incident.acknowledged_at.is_none() {
                    incident.acknowledged_at = Some(at);
                }
                if incident.assigned_to.is_none() {
                    incident.assigned_to = Some(actor.to_string());
                }
            }
            IncidentStatus::Resolved => {
                if incident.resolved_at.is_none() {
                    incident.resolved_at = Some(at);
                }
                if let Some(notes) = &notes {
                    incident.resolution_notes = Some(notes.clone());
                }
            }
            IncidentStatus::Closed => {
                if incident.closed_at.is_none() {
                    incident.closed_at = Some(at);
                }
            }
            _ => {}
        }

        let detail = match &notes {
            Some(notes) => format!("{} -> {}: {}", from, to, notes),
            None => format!("{} -> {}", from, to),
        };
        incident.record_at(at, actor, "status_changed", detail);
        info!("Status changed");
        Ok(())
    }
}
