//! Outbound request types and the sinks that carry them.
//!
//! The engine never executes actions or sends notifications itself. It
//! emits fire-and-forget requests through these traits; executors confirm
//! completion back into the incident timeline through the normal query
//! surface.

use crate::escalation::EscalationTarget;
use crate::incident::Severity;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

/// Delivery channel hint attached to notification requests.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChannelHint {
    Pager,
    Chat,
    Email,
}

impl ChannelHint {
    /// Routing by urgency: critical pages, high goes to chat, the rest to
    /// email.
    pub fn for_severity(severity: Severity) -> ChannelHint {
        match severity {
            Severity::Critical => ChannelHint::Pager,
            Severity::High => ChannelHint::Chat,
            Severity::Medium | Severity::Low | Severity::Compliance => ChannelHint::Email,
        }
    }
}

/// A request for an external executor to run one response action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionRequest {
    pub incident_id: String,
    /// Abstract action identifier, e.g. `block_source_ip`.
    pub action_id: String,
    /// Acting target: source IP or actor the action applies to, if any.
    pub target: Option<String>,
}

/// A request for an external notifier to reach a recipient tier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationRequest {
    pub incident_id: String,
    pub severity: Severity,
    pub channel_hint: ChannelHint,
    pub recipient: EscalationTarget,
    pub summary: String,
}

impl NotificationRequest {
    /// Builds a request for the given incident with the severity-derived
    /// channel hint.
    pub fn new(
        incident_id: impl Into<String>,
        severity: Severity,
        recipient: EscalationTarget,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            incident_id: incident_id.into(),
            severity,
            channel_hint: ChannelHint::for_severity(severity),
            recipient,
            summary: summary.into(),
        }
    }
}

/// Receives action requests for external execution.
#[async_trait]
pub trait ActionSink: Send + Sync {
    async fn dispatch(&self, request: ActionRequest);
}

/// Receives notification requests for external delivery.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, request: NotificationRequest);
}

/// Sink backed by a bounded mpsc channel. A full or closed channel drops
/// the request with a warning; delivery is best-effort by contract.
pub struct ChannelActionSink {
    tx: mpsc::Sender<ActionRequest>,
}

impl ChannelActionSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ActionRequest>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ActionSink for ChannelActionSink {
    async fn dispatch(&self, request: ActionRequest) {
        if let Err(err) = self.tx.try_send(request) {
            warn!("Action request dropped: {}", err);
        }
    }
}

/// Notification sink backed by a bounded mpsc channel.
pub struct ChannelNotificationSink {
    tx: mpsc::Sender<NotificationRequest>,
}

impl ChannelNotificationSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<NotificationRequest>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl NotificationSink for ChannelNotificationSink {
    async fn notify(&self, request: NotificationRequest) {
        if let Err(err) = self.tx.try_send(request) {
            warn!("Notification request dropped: {}", err);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_hint_by_severity() {
        assert_eq!(ChannelHint::for_severity(Severity::Critical), ChannelHint::Pager);
        assert_eq!(ChannelHint::for_severity(Severity::High), ChannelHint::Chat);
        assert_eq!(ChannelHint::for_severity(Severity::Medium), ChannelHint::Email);
        assert_eq!(ChannelHint::for_severity(Severity::Compliance), ChannelHint::Email);
    }

    #[tokio::test]
    async fn test_channel_sink_delivers() {
        let (sink, mut rx) = ChannelActionSink::new(4);
        sink.dispatch(ActionRequest {
            incident_id: "INC-20260828-0001".to_string(),
            action_id: "block_source_ip".to_string(),
            target: Some("203.0.113.5".to_string()),
        })
        .await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received.action_id, "block_source_ip");
    }

    #[tokio::test]
    async fn test_full_channel_drops_without_blocking() {
        let (sink, _rx) = ChannelNotificationSink::new(1);
        for _ in 0..3 {
            sink.notify(NotificationRequest::new(
                "INC-20260828-0001",
                Severity::High,
                EscalationTarget::SecurityManager,
                "test",
            ))
            .await;
        }
        // No deadlock, no panic; overflow is dropped.
    }
}
