//! Reply poller: drains one reply destination into its registry
//!
//! One long-lived task per active reply destination. Receive failures
//! back off exponentially and reset on success; nothing that arrives on
//! the destination can crash the loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use replyq_core::config::PollerConfig;
use replyq_core::{
    DestinationName, DiagnosticEvent, DiagnosticKind, ReceivedMessage, Role, SharedDiagnostics,
    Transport,
};

use crate::correlation::CorrelationRegistry;

/// Initial backoff delay after a failed receive
pub(crate) const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Maximum backoff delay after repeated failed receives
pub(crate) const MAX_BACKOFF: Duration = Duration::from_secs(30);

pub(crate) struct ReplyPoller {
    pub transport: Arc<dyn Transport>,
    pub destination: DestinationName,
    pub role: Role,
    pub registry: CorrelationRegistry,
    pub diagnostics: SharedDiagnostics,
    pub config: PollerConfig,
    pub cancel: CancellationToken,
}

impl ReplyPoller {
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        info!(
            role = %self.role,
            destination = %self.destination,
            "Reply poller started"
        );
        let mut backoff = INITIAL_BACKOFF;

        loop {
            let batch = tokio::select! {
                () = self.cancel.cancelled() => {
                    info!(destination = %self.destination, "Reply poller stopped");
                    return;
                }
                batch = self.transport.receive(
                    &self.destination,
                    self.config.max_batch,
                    self.config.long_poll_wait(),
                    self.config.visibility_timeout(),
                ) => batch,
            };

            match batch {
                Ok(messages) => {
                    backoff = INITIAL_BACKOFF;
                    if messages.is_empty() {
                        if self.pause(self.config.poll_interval()).await {
                            return;
                        }
                        continue;
                    }
                    for received in messages {
                        self.dispatch(received).await;
                    }
                }
                Err(e) => {
                    self.diagnostics.record(DiagnosticEvent::new(
                        DiagnosticKind::ReceiveFailed,
                        &self.role,
                        e.to_string(),
                    ));
                    warn!(
                        error = %e,
                        destination = %self.destination,
                        backoff_ms = backoff.as_millis() as u64,
                        "Failed to receive from reply destination, backing off"
                    );
                    if self.pause(backoff).await {
                        return;
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    /// Route one received response, then acknowledge it.
    ///
    /// Unmatched and malformed responses are deliberately discarded;
    /// both still get acknowledged so the transport stops redelivering
    /// something nobody will ever claim.
    async fn dispatch(&self, received: ReceivedMessage) {
        let ReceivedMessage { message, receipt } = received;

        match message.correlation_id() {
            Some(correlation_id) => {
                if self.registry.resolve(correlation_id, message) {
                    debug!(correlation_id = %correlation_id, "Response delivered to waiter");
                } else {
                    // Already resolved, expired, or never registered --
                    // expected under at-least-once delivery.
                    debug!(
                        correlation_id = %correlation_id,
                        "No pending request for response, discarding"
                    );
                }
            }
            None => {
                self.diagnostics.record(DiagnosticEvent::new(
                    DiagnosticKind::MalformedMessage,
                    &self.role,
                    "response without correlation id discarded",
                ));
            }
        }

        if let Err(e) = self.transport.acknowledge(&self.destination, &receipt).await {
            // Left for natural redelivery; a duplicate resolve is a no-op.
            warn!(
                error = %e,
                destination = %self.destination,
                "Failed to acknowledge response, leaving for redelivery"
            );
        }
    }

    /// Cancellation-aware sleep. Returns true when cancelled.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => true,
            () = tokio::time::sleep(duration) => false,
        }
    }
}
