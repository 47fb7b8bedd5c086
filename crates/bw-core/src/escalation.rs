//! Escalation policies and targets.
//!
//! Policies are static configuration keyed by severity. The scheduler and
//! the classifier look deadlines and targets up here; they never mutate the
//! policy set at runtime.

use crate::incident::Severity;
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Tiers of the escalation chain, lowest first.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EscalationTarget {
    SecurityAnalyst,
    SecurityManager,
    Ciso,
}

impl EscalationTarget {
    /// The next tier up the chain. The top tier escalates to itself.
    pub fn next_tier(&self) -> EscalationTarget {
        match self {
            EscalationTarget::SecurityAnalyst => EscalationTarget::SecurityManager,
            EscalationTarget::SecurityManager => EscalationTarget::Ciso,
            EscalationTarget::Ciso => EscalationTarget::Ciso,
        }
    }

    /// The top of the chain, used for content-based escalation.
    pub fn top() -> EscalationTarget {
        EscalationTarget::Ciso
    }
}

impl std::fmt::Display for EscalationTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EscalationTarget::SecurityAnalyst => write!(f, "security_analyst"),
            EscalationTarget::SecurityManager => write!(f, "security_manager"),
            EscalationTarget::Ciso => write!(f, "ciso"),
        }
    }
}

/// Deadlines and target for one severity level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationPolicy {
    /// How long an incident may sit in `Detected` before escalating.
    pub ack_deadline_secs: u64,
    /// How long an incident may stay open before escalating to the next
    /// tier above `escalation_target`.
    pub resolution_deadline_secs: u64,
    /// Who is notified when the ack deadline is missed.
    pub escalation_target: EscalationTarget,
}

impl EscalationPolicy {
    pub fn ack_deadline(&self) -> Duration {
        Duration::seconds(self.ack_deadline_secs as i64)
    }

    pub fn resolution_deadline(&self) -> Duration {
        Duration::seconds(self.resolution_deadline_secs as i64)
    }
}

/// The full per-severity policy table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationPolicySet {
    pub critical: EscalationPolicy,
    pub high: EscalationPolicy,
    pub medium: EscalationPolicy,
    pub low: EscalationPolicy,
}

impl EscalationPolicySet {
    /// Policy for a severity. `Compliance` carries medium-equivalent
    /// urgency for deadline purposes.
    pub fn for_severity(&self, severity: Severity) -> &EscalationPolicy {
        match severity {
            Severity::Critical => &self.critical,
            Severity::High => &self.high,
            Severity::Medium | Severity::Compliance => &self.medium,
            Severity::Low => &self.low,
        }
    }
}

impl Default for EscalationPolicySet {
    fn default() -> Self {
        Self {
            critical: EscalationPolicy {
                ack_deadline_secs: 15 * 60,
                resolution_deadline_secs: 4 * 3600,
                escalation_target: EscalationTarget::SecurityManager,
            },
            high: EscalationPolicy {
                ack_deadline_secs: 3600,
                resolution_deadline_secs: 24 * 3600,
                escalation_target: EscalationTarget::SecurityManager,
            },
            medium: EscalationPolicy {
                ack_deadline_secs: 4 * 3600,
                resolution_deadline_secs: 72 * 3600,
                escalation_target: EscalationTarget::SecurityAnalyst,
            },
            low: EscalationPolicy {
                ack_deadline_secs: 24 * 3600,
                resolution_deadline_secs: 7 * 24 * 3600,
                escalation_target: EscalationTarget::SecurityAnalyst,
            },
        }
    }
}
