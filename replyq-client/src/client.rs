//! Request client: the producer-facing surface
//!
//! `send_request` gives callers a synchronous-looking exchange over the
//! queue transport: register a pending slot, send the tagged request,
//! suspend until the reply poller resolves it or the deadline passes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::debug;

use replyq_core::{
    Config, CorrelationId, DestinationName, DiagnosticEvent, DiagnosticKind, Error, Message,
    Result, Role, SharedDiagnostics, TracingSink, Transport, ATTR_CORRELATION_ID, ATTR_REPLY_TO,
};

use crate::destination::{ReplyDestinationManager, ReplyLease};

/// Producer client. Cheap to clone; clones share reply destinations and
/// pinned roles.
#[derive(Clone)]
pub struct RequestClient {
    transport: Arc<dyn Transport>,
    manager: ReplyDestinationManager,
    diagnostics: SharedDiagnostics,
    config: Arc<Config>,
    /// Roles pinned alive by `start_role`.
    pinned: Arc<Mutex<HashMap<Role, ReplyLease>>>,
}

impl RequestClient {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, config: Config) -> Self {
        Self::with_diagnostics(transport, config, Arc::new(TracingSink))
    }

    #[must_use]
    pub fn with_diagnostics(
        transport: Arc<dyn Transport>,
        config: Config,
        diagnostics: SharedDiagnostics,
    ) -> Self {
        let config = Arc::new(config);
        let manager =
            ReplyDestinationManager::new(transport.clone(), config.clone(), diagnostics.clone());
        Self {
            transport,
            manager,
            diagnostics,
            config,
            pinned: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Access to the destination manager, e.g. for lifecycle tests.
    #[must_use]
    pub const fn manager(&self) -> &ReplyDestinationManager {
        &self.manager
    }

    /// Send a request to `role` and wait for its correlated response.
    pub async fn send_request(
        &self,
        role: &Role,
        payload: impl Into<Bytes> + Send,
        timeout: Duration,
    ) -> Result<Message> {
        let lease = self.manager.acquire(role).await?;
        let result = self.dispatch(role, &lease, payload.into(), timeout).await;
        lease.release().await;
        result
    }

    /// `send_request` with the configured default timeout.
    pub async fn send_request_default(
        &self,
        role: &Role,
        payload: impl Into<Bytes> + Send,
    ) -> Result<Message> {
        self.send_request(role, payload, self.config.client.default_request_timeout())
            .await
    }

    async fn dispatch(
        &self,
        role: &Role,
        lease: &ReplyLease,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Message> {
        let correlation_id = CorrelationId::new();
        let deadline = Instant::now() + timeout;

        // Registration happens-before send: a response can never arrive
        // with nothing to match against.
        let pending = lease.registry().register(correlation_id, deadline)?;

        let request = Message::new(payload)
            .with_attribute(ATTR_CORRELATION_ID, correlation_id.to_string())
            .with_attribute(ATTR_REPLY_TO, lease.destination().name().as_str());
        let target = DestinationName::requests(role);

        if let Err(e) = self.transport.send(&target, request).await {
            self.diagnostics.record(
                DiagnosticEvent::new(DiagnosticKind::SendFailed, role, e.to_string())
                    .with_correlation_id(correlation_id),
            );
            // Cancels the just-registered entry.
            drop(pending);
            return Err(into_send_failed(e, &target));
        }

        debug!(
            role = %role,
            correlation_id = %correlation_id,
            destination = %target,
            "Request sent"
        );
        pending.wait(timeout).await
    }

    /// Fire-and-forget: no correlation id, no reply destination, no
    /// waiting.
    pub async fn send_one_way(&self, role: &Role, payload: impl Into<Bytes> + Send) -> Result<()> {
        let target = DestinationName::requests(role);
        if let Err(e) = self.transport.send(&target, Message::new(payload)).await {
            self.diagnostics.record(DiagnosticEvent::new(
                DiagnosticKind::SendFailed,
                role,
                e.to_string(),
            ));
            return Err(into_send_failed(e, &target));
        }
        debug!(role = %role, destination = %target, "One-way message sent");
        Ok(())
    }

    /// Pin the role's reply destination alive until `stop_role`, so
    /// bursts of requests reuse it without lifecycle churn.
    pub async fn start_role(&self, role: &Role) -> Result<()> {
        let mut pinned = self.pinned.lock().await;
        if pinned.contains_key(role) {
            return Ok(());
        }
        let lease = self.manager.acquire(role).await?;
        pinned.insert(role.clone(), lease);
        Ok(())
    }

    /// Drop the pin taken by `start_role`. The destination drains once
    /// in-flight requests release it.
    pub async fn stop_role(&self, role: &Role) {
        let lease = self.pinned.lock().await.remove(role);
        if let Some(lease) = lease {
            lease.release().await;
        }
    }

    /// Tear down every reply destination immediately.
    pub async fn shutdown(&self) {
        let mut pinned = self.pinned.lock().await;
        for lease in pinned.values_mut() {
            lease.defuse();
        }
        pinned.clear();
        drop(pinned);
        self.manager.shutdown().await;
    }
}

fn into_send_failed(e: Error, target: &DestinationName) -> Error {
    match e {
        Error::SendFailed { .. } => e,
        other => Error::SendFailed {
            destination: target.to_string(),
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replyq_core::InMemoryTransport;

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.reply.teardown_grace_ms = 50;
        config.poller.poll_interval_ms = 10;
        config.poller.long_poll_wait_ms = 50;
        config
    }

    #[tokio::test]
    async fn test_send_request_to_missing_destination_is_send_failed() {
        let transport = InMemoryTransport::new();
        let client = RequestClient::new(Arc::new(transport), fast_config());

        let err = client
            .send_request(&Role::from("nobody"), "hello", Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SendFailed { .. }));
    }

    #[tokio::test]
    async fn test_send_one_way_does_not_create_reply_destination() {
        let transport = InMemoryTransport::new();
        let requests = DestinationName::requests(&Role::from("echo"));
        transport
            .create_destination(&requests, Duration::from_secs(60))
            .await
            .unwrap();

        let client = RequestClient::new(Arc::new(transport.clone()), fast_config());
        client.send_one_way(&Role::from("echo"), "fire and forget").await.unwrap();

        assert_eq!(transport.depth(&requests), 1);
        assert!(transport.list_destinations("replyq-reply-").await.unwrap().is_empty());

        let batch = transport
            .receive(&requests, 10, Duration::from_millis(50), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(batch[0].message.correlation_id(), None);
        assert_eq!(batch[0].message.reply_to(), None);
    }

    #[tokio::test]
    async fn test_start_role_pins_destination_across_grace() {
        let transport = InMemoryTransport::new();
        let client = RequestClient::new(Arc::new(transport.clone()), fast_config());
        let role = Role::from("echo");

        client.start_role(&role).await.unwrap();
        client.start_role(&role).await.unwrap(); // idempotent

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(transport.list_destinations("replyq-reply-").await.unwrap().len(), 1);

        client.stop_role(&role).await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(transport.list_destinations("replyq-reply-").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_tears_down_pinned_roles() {
        let transport = InMemoryTransport::new();
        let client = RequestClient::new(Arc::new(transport.clone()), fast_config());

        client.start_role(&Role::from("alpha")).await.unwrap();
        client.start_role(&Role::from("beta")).await.unwrap();
        client.shutdown().await;

        assert!(transport.list_destinations("replyq-reply-").await.unwrap().is_empty());
        assert_eq!(client.manager().active_roles().await, 0);
    }
}
