//! Metric registration for the Bridgewatch engine.
//!
//! The engine emits counters through the `metrics` facade; this module
//! registers their descriptions once at startup. Exporter wiring is left
//! to the embedding application.

use metrics::{describe_counter, Unit};

/// Registers descriptions for every counter the engine emits.
pub fn register_engine_metrics() {
    describe_counter!(
        "bw_ingest_events_total",
        Unit::Count,
        "Security events accepted for rule evaluation"
    );
    describe_counter!(
        "bw_alerts_emitted_total",
        Unit::Count,
        "Alerts emitted by rule evaluation"
    );
    describe_counter!(
        "bw_incidents_created_total",
        Unit::Count,
        "Incidents created by aggregation"
    );
    describe_counter!(
        "bw_alerts_attached_total",
        Unit::Count,
        "Alerts deduplicated into existing incidents"
    );
    describe_counter!(
        "bw_escalations_fired_total",
        Unit::Count,
        "Escalation notifications fired by deadline sweeps"
    );
}
