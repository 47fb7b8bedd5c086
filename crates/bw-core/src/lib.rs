//! # bw-core
//!
//! Core correlation engine for Bridgewatch.
//!
//! This crate provides the security-event correlation pipeline: rule
//! evaluation, alert-to-incident aggregation, classification, the incident
//! lifecycle state machine, escalation scheduling, playbook selection, and
//! compliance-deadline tracking.

pub mod aggregator;
pub mod classifier;
pub mod compliance;
pub mod detector;
pub mod escalation;
pub mod event;
pub mod incident;
pub mod lifecycle;
pub mod pipeline;
pub mod playbook;
pub mod rules;
pub mod scheduler;
pub mod sinks;
pub mod store;

pub use aggregator::{AggregateError, Aggregator, IngestOutcome};
pub use classifier::{Classifier, Reclassification};
pub use compliance::{ComplianceStatus, ComplianceTracker};
pub use detector::Detector;
pub use escalation::{EscalationPolicy, EscalationPolicySet, EscalationTarget};
pub use event::{SecurityEvent, ValidationError};
pub use incident::{
    Alert, EscalationDeadline, EscalationState, Incident, IncidentCategory, IncidentStatus,
    Severity, TimelineEntry,
};
pub use lifecycle::{LifecycleError, LifecycleManager};
pub use pipeline::{CorrelationEngine, EngineError, IngestError, StatsSnapshot};
pub use playbook::{Playbook, PlaybookPhase, PlaybookStore, PlaybookTable};
pub use rules::{AlertRule, RuleMatch, RuleSet, RuleStore};
pub use scheduler::EscalationScheduler;
pub use sinks::{
    ActionRequest, ActionSink, ChannelActionSink, ChannelHint, ChannelNotificationSink,
    NotificationRequest, NotificationSink,
};
pub use store::{IncidentFilter, IncidentStore, MemoryIncidentStore, StoreError};
