//! Security event input model for Bridgewatch.
//!
//! Events are produced by external collaborators (authentication system,
//! input validators, protocol bridge) and are never mutated by the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Events stamped before 2000-01-01T00:00:00Z are treated as malformed.
const MIN_EVENT_TIMESTAMP_SECS: i64 = 946_684_800;

/// Errors raised when an incoming event fails basic validation.
///
/// A malformed event is rejected before it reaches the detector; the caller
/// is expected to log and drop it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Event is missing a category")]
    MissingCategory,

    #[error("Event is missing a correlation id")]
    MissingCorrelationId,

    #[error("Event timestamp is out of range: {0}")]
    TimestampOutOfRange(DateTime<Utc>),
}

/// A discrete security event from the data-bridge deployment.
///
/// The `details` map is open-ended; rule conditions interpret it
/// defensively (a missing key is a non-match, never an error).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Dotted event category, e.g. `security.injection_attempt`.
    pub category: String,
    /// User identity associated with the event, if any.
    pub actor: Option<String>,
    /// Source IP address, if any.
    pub source_ip: Option<String>,
    /// Correlation identifier assigned by the producer.
    pub correlation_id: String,
    /// Arbitrary producer-supplied attributes.
    #[serde(default)]
    pub details: HashMap<String, serde_json::Value>,
}

impl SecurityEvent {
    /// Creates an event with the given category and correlation id.
    pub fn new(
        timestamp: DateTime<Utc>,
        category: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            category: category.into(),
            actor: None,
            source_ip: None,
            correlation_id: correlation_id.into(),
            details: HashMap::new(),
        }
    }

    /// Sets the source IP.
    pub fn with_source_ip(mut self, ip: impl Into<String>) -> Self {
        self.source_ip = Some(ip.into());
        self
    }

    /// Sets the actor.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Adds a detail attribute.
    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    /// The identity used for window and dedup keying: source IP when
    /// present, otherwise the actor.
    pub fn source_key(&self) -> Option<&str> {
        self.source_ip.as_deref().or(self.actor.as_deref())
    }

    /// Checks the structural requirements the engine depends on.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.category.trim().is_empty() {
            return Err(ValidationError::MissingCategory);
        }
        if self.correlation_id.trim().is_empty() {
            return Err(ValidationError::MissingCorrelationId);
        }
        // A producer with a broken clock sends epoch-ish timestamps; those
        // would poison window eviction and dedup lookups.
        if self.timestamp.timestamp() < MIN_EVENT_TIMESTAMP_SECS {
            return Err(ValidationError::TimestampOutOfRange(self.timestamp));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_event() {
        let event = SecurityEvent::new(Utc::now(), "auth.failure", "evt-1");
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_missing_category_rejected() {
        let event = SecurityEvent::new(Utc::now(), "  ", "evt-1");
        assert_eq!(event.validate(), Err(ValidationError::MissingCategory));
    }

    #[test]
    fn test_missing_correlation_id_rejected() {
        let event = SecurityEvent::new(Utc::now(), "auth.failure", "");
        assert_eq!(event.validate(), Err(ValidationError::MissingCorrelationId));
    }

    #[test]
    fn test_epoch_timestamp_rejected() {
        let bogus = chrono::DateTime::from_timestamp(0, 0).unwrap();
        let event = SecurityEvent::new(bogus, "auth.failure", "evt-1");
        assert_eq!(
            event.validate(),
            Err(ValidationError::TimestampOutOfRange(bogus))
        );
    }

    #[test]
    fn test_source_key_prefers_ip() {
        let event = SecurityEvent::new(Utc::now(), "auth.failure", "evt-1")
            .with_source_ip("203.0.113.5")
            .with_actor("operator1");
        assert_eq!(event.source_key(), Some("203.0.113.5"));
    }

    #[test]
    fn test_source_key_falls_back_to_actor() {
        let event = SecurityEvent::new(Utc::now(), "auth.failure", "evt-1").with_actor("operator1");
        assert_eq!(event.source_key(), Some("operator1"));
    }
}
