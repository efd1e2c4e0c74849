//! Diagnostics sink for discard and error events
//!
//! Every event that does not surface to a caller (a malformed message
//! dropped by a poller, an acknowledgment left for redelivery) is still
//! observable through this interface.

use std::sync::Arc;

use tracing::warn;

use crate::models::{CorrelationId, Role};

/// What went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// A message without usable correlation metadata was discarded.
    MalformedMessage,
    /// A reply destination could not be created or looked up.
    DestinationUnavailable,
    /// The transport rejected an outgoing message.
    SendFailed,
    /// A receive call against the transport failed.
    ReceiveFailed,
}

impl DiagnosticKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MalformedMessage => "malformed_message",
            Self::DestinationUnavailable => "destination_unavailable",
            Self::SendFailed => "send_failed",
            Self::ReceiveFailed => "receive_failed",
        }
    }
}

/// One discard/error event. Carries the correlation id when one is known.
#[derive(Debug, Clone)]
pub struct DiagnosticEvent {
    pub correlation_id: Option<CorrelationId>,
    pub role: Role,
    pub kind: DiagnosticKind,
    pub detail: String,
}

impl DiagnosticEvent {
    #[must_use]
    pub fn new(kind: DiagnosticKind, role: &Role, detail: impl Into<String>) -> Self {
        Self {
            correlation_id: None,
            role: role.clone(),
            kind,
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn with_correlation_id(mut self, id: CorrelationId) -> Self {
        self.correlation_id = Some(id);
        self
    }
}

/// Destination for diagnostic events.
pub trait DiagnosticsSink: Send + Sync + 'static {
    fn record(&self, event: DiagnosticEvent);
}

/// Shared sink handle.
pub type SharedDiagnostics = Arc<dyn DiagnosticsSink>;

/// Default sink: every event becomes a structured warning.
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn record(&self, event: DiagnosticEvent) {
        warn!(
            kind = event.kind.as_str(),
            role = %event.role,
            correlation_id = event.correlation_id.map(|id| id.to_string()),
            detail = %event.detail,
            "Diagnostic event"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Sink that keeps events in memory.
    struct CollectingSink {
        events: Mutex<Vec<DiagnosticEvent>>,
    }

    impl CollectingSink {
        fn new() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
            }
        }

        fn events(&self) -> Vec<DiagnosticEvent> {
            self.events.lock().clone()
        }
    }

    impl DiagnosticsSink for CollectingSink {
        fn record(&self, event: DiagnosticEvent) {
            self.events.lock().push(event);
        }
    }

    #[test]
    fn test_event_carries_correlation_id_when_known() {
        let sink = CollectingSink::new();
        let id = CorrelationId::new();
        let role = Role::from("pricing");

        sink.record(DiagnosticEvent::new(DiagnosticKind::SendFailed, &role, "refused").with_correlation_id(id));
        sink.record(DiagnosticEvent::new(DiagnosticKind::MalformedMessage, &role, "no id"));

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].correlation_id, Some(id));
        assert_eq!(events[1].correlation_id, None);
        assert_eq!(events[1].kind, DiagnosticKind::MalformedMessage);
    }
}
