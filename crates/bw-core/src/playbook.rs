//! Response playbooks and the category-to-playbook table.
//!
//! A playbook is an ordered sequence of phases, each an ordered list of
//! abstract action identifiers. Selection produces action requests only;
//! execution is external.

use crate::incident::{Incident, IncidentCategory};
use crate::sinks::ActionRequest;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Response phases in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PlaybookPhase {
    ImmediateActions,
    Investigation,
    Containment,
    Eradication,
    Recovery,
    PostIncident,
}

impl std::fmt::Display for PlaybookPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybookPhase::ImmediateActions => write!(f, "immediate_actions"),
            PlaybookPhase::Investigation => write!(f, "investigation"),
            PlaybookPhase::Containment => write!(f, "containment"),
            PlaybookPhase::Eradication => write!(f, "eradication"),
            PlaybookPhase::Recovery => write!(f, "recovery"),
            PlaybookPhase::PostIncident => write!(f, "post_incident"),
        }
    }
}

/// One phase of a playbook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookPhaseSpec {
    pub phase: PlaybookPhase,
    /// Ordered abstract action identifiers, e.g. `block_source_ip`.
    pub actions: Vec<String>,
}

/// An ordered, phased response plan for one incident category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playbook {
    pub name: String,
    pub phases: Vec<PlaybookPhaseSpec>,
}

impl Playbook {
    /// Actions for a phase; playbooks may omit phases entirely.
    pub fn actions_for(&self, phase: PlaybookPhase) -> &[String] {
        self.phases
            .iter()
            .find(|p| p.phase == phase)
            .map(|p| p.actions.as_slice())
            .unwrap_or(&[])
    }
}

/// Minimal generic playbook for categories with no dedicated plan.
fn notify_only() -> Playbook {
    Playbook {
        name: "notify_only".to_string(),
        phases: vec![PlaybookPhaseSpec {
            phase: PlaybookPhase::ImmediateActions,
            actions: vec!["notify_security_team".to_string()],
        }],
    }
}

/// The static category-to-playbook mapping.
#[derive(Debug, Clone)]
pub struct PlaybookTable {
    playbooks: HashMap<IncidentCategory, Playbook>,
    fallback: Playbook,
}

impl PlaybookTable {
    pub fn new(playbooks: HashMap<IncidentCategory, Playbook>) -> Self {
        Self {
            playbooks,
            fallback: notify_only(),
        }
    }

    /// The playbook for a category, or the `notify_only` fallback.
    pub fn playbook_for(&self, category: &IncidentCategory) -> &Playbook {
        self.playbooks.get(category).unwrap_or(&self.fallback)
    }

    /// Builds action requests for one phase of an incident's playbook.
    /// Each request carries the incident's source identity as its target.
    pub fn select(&self, incident: &Incident, phase: PlaybookPhase) -> Vec<ActionRequest> {
        let playbook = self.playbook_for(&incident.category);
        let target = incident
            .alerts
            .first()
            .and_then(|a| a.source_key())
            .map(str::to_string);
        playbook
            .actions_for(phase)
            .iter()
            .map(|action_id| ActionRequest {
                incident_id: incident.id.clone(),
                action_id: action_id.clone(),
                target: target.clone(),
            })
            .collect()
    }
}

impl Default for PlaybookTable {
    /// Built-in playbooks for the core categories.
    fn default() -> Self {
        let mut playbooks = HashMap::new();
        playbooks.insert(
            IncidentCategory::InjectionAttack,
            Playbook {
                name: "injection_response".to_string(),
                phases: vec![
                    PlaybookPhaseSpec {
                        phase: PlaybookPhase::ImmediateActions,
                        actions: vec![
                            "block_source_ip".to_string(),
                            "snapshot_request_logs".to_string(),
                        ],
                    },
                    PlaybookPhaseSpec {
                        phase: PlaybookPhase::Investigation,
                        actions: vec!["trace_injection_payload".to_string()],
                    },
                    PlaybookPhaseSpec {
                        phase: PlaybookPhase::Containment,
                        actions: vec!["isolate_bridge_endpoint".to_string()],
                    },
                ],
            },
        );
        playbooks.insert(
            IncidentCategory::AuthenticationAttack,
            Playbook {
                name: "auth_attack_response".to_string(),
                phases: vec![
                    PlaybookPhaseSpec {
                        phase: PlaybookPhase::ImmediateActions,
                        actions: vec![
                            "block_source_ip".to_string(),
                            "lock_account".to_string(),
                            "terminate_sessions".to_string(),
                        ],
                    },
                    PlaybookPhaseSpec {
                        phase: PlaybookPhase::Investigation,
                        actions: vec!["review_auth_logs".to_string()],
                    },
                ],
            },
        );
        playbooks.insert(
            IncidentCategory::DataBreach,
            Playbook {
                name: "data_breach_response".to_string(),
                phases: vec![
                    PlaybookPhaseSpec {
                        phase: PlaybookPhase::ImmediateActions,
                        actions: vec![
                            "terminate_sessions".to_string(),
                            "revoke_access_tokens".to_string(),
                            "notify_security_team".to_string(),
                        ],
                    },
                    PlaybookPhaseSpec {
                        phase: PlaybookPhase::Containment,
                        actions: vec!["restrict_data_exports".to_string()],
                    },
                    PlaybookPhaseSpec {
                        phase: PlaybookPhase::PostIncident,
                        actions: vec!["prepare_disclosure_report".to_string()],
                    },
                ],
            },
        );
        playbooks.insert(
            IncidentCategory::PolicyViolation,
            Playbook {
                name: "policy_violation_response".to_string(),
                phases: vec![PlaybookPhaseSpec {
                    phase: PlaybookPhase::ImmediateActions,
                    actions: vec![
                        "revert_configuration".to_string(),
                        "notify_security_team".to_string(),
                    ],
                }],
            },
        );
        Self::new(playbooks)
    }
}

/// Holds the current playbook table and swaps it atomically on reload.
pub struct PlaybookStore {
    current: RwLock<Arc<PlaybookTable>>,
}

impl PlaybookStore {
    pub fn new(table: PlaybookTable) -> Self {
        Self {
            current: RwLock::new(Arc::new(table)),
        }
    }

    pub async fn snapshot(&self) -> Arc<PlaybookTable> {
        self.current.read().await.clone()
    }

    pub async fn reload(&self, table: PlaybookTable) {
        let count = table.playbooks.len();
        *self.current.write().await = Arc::new(table);
        info!("Playbook table reloaded: {} playbooks", count);
    }
}

impl Default for PlaybookStore {
    fn default() -> Self {
        Self::new(PlaybookTable::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::{Alert, Severity};
    use chrono::Utc;
    use uuid::Uuid;

    fn incident(category: IncidentCategory) -> Incident {
        let alert = Alert {
            id: Uuid::new_v4(),
            rule_id: "rule-1".to_string(),
            severity: Severity::High,
            category,
            source_ip: Some("203.0.113.5".to_string()),
            actor: None,
            timestamp: Utc::now(),
            triggering_event_ids: vec!["evt-1".to_string()],
        };
        Incident::from_alert("INC-20260828-0001".to_string(), alert)
    }

    #[test]
    fn test_select_preserves_action_order() {
        let table = PlaybookTable::default();
        let incident = incident(IncidentCategory::AuthenticationAttack);

        let requests = table.select(&incident, PlaybookPhase::ImmediateActions);
        let ids: Vec<&str> = requests.iter().map(|r| r.action_id.as_str()).collect();
        assert_eq!(ids, vec!["block_source_ip", "lock_account", "terminate_sessions"]);
        assert_eq!(requests[0].target.as_deref(), Some("203.0.113.5"));
    }

    #[test]
    fn test_unknown_category_falls_back_to_notify_only() {
        let table = PlaybookTable::default();
        let incident = incident(IncidentCategory::Other("dns_tunneling".to_string()));

        let requests = table.select(&incident, PlaybookPhase::ImmediateActions);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].action_id, "notify_security_team");
    }

    #[test]
    fn test_missing_phase_yields_no_actions() {
        let table = PlaybookTable::default();
        let incident = incident(IncidentCategory::PolicyViolation);

        assert!(table.select(&incident, PlaybookPhase::Recovery).is_empty());
    }

    #[tokio::test]
    async fn test_reload_swaps_table() {
        let store = PlaybookStore::default();
        let before = store.snapshot().await;
        assert!(!before
            .select(
                &incident(IncidentCategory::InjectionAttack),
                PlaybookPhase::ImmediateActions
            )
            .is_empty());

        store.reload(PlaybookTable::new(HashMap::new())).await;
        let after = store.snapshot().await;
        // Empty table still resolves through the fallback.
        let requests = after.select(
            &incident(IncidentCategory::InjectionAttack),
            PlaybookPhase::ImmediateActions,
        );
        assert_eq!(requests[0].action_id, "notify_security_team");
    }
}
