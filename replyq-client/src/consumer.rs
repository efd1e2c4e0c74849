//! Consumer serve loop
//!
//! Drives a `RequestHandler` over a role's request destination:
//! receive, handle, reply when the request asks for one, acknowledge.
//! A failed handler leaves the message unacknowledged so the transport
//! redelivers it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use replyq_core::{Config, DestinationName, Message, ReceivedMessage, Result, Role, Transport};

use crate::poller::{INITIAL_BACKOFF, MAX_BACKOFF};
use crate::responder::Responder;

/// Retention for request destinations the worker creates on startup
/// (the queue-service default).
const REQUEST_RETENTION: Duration = Duration::from_secs(4 * 24 * 60 * 60);

/// Application logic for one role.
///
/// Return `Ok(Some(payload))` to answer the request, `Ok(None)` to
/// acknowledge without answering, `Err` to leave the message for
/// redelivery.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, request: &Message) -> Result<Option<Bytes>>;
}

/// Serve loop for one role's request destination.
pub struct RequestWorker {
    transport: Arc<dyn Transport>,
    responder: Responder,
    role: Role,
    config: Arc<Config>,
    cancel: CancellationToken,
}

impl RequestWorker {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, role: Role, config: Arc<Config>) -> Self {
        Self {
            responder: Responder::new(transport.clone()),
            transport,
            role,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Token for external shutdown signaling.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn spawn(self, handler: Arc<dyn RequestHandler>) -> JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run(handler).await })
    }

    /// Run until cancelled. Creates the request destination if it does
    /// not exist yet, so consumers can start before any producer.
    pub async fn run(self, handler: Arc<dyn RequestHandler>) -> Result<()> {
        let destination = DestinationName::requests(&self.role);
        self.transport
            .create_destination(&destination, REQUEST_RETENTION)
            .await?;
        info!(role = %self.role, destination = %destination, "Request worker started");

        let mut backoff = INITIAL_BACKOFF;
        loop {
            let batch = tokio::select! {
                () = self.cancel.cancelled() => {
                    info!(role = %self.role, "Request worker stopped");
                    return Ok(());
                }
                batch = self.transport.receive(
                    &destination,
                    self.config.poller.max_batch,
                    self.config.poller.long_poll_wait(),
                    self.config.poller.visibility_timeout(),
                ) => batch,
            };

            match batch {
                Ok(messages) => {
                    backoff = INITIAL_BACKOFF;
                    if messages.is_empty() {
                        if self.pause(self.config.poller.poll_interval()).await {
                            return Ok(());
                        }
                        continue;
                    }
                    for received in messages {
                        self.process(handler.as_ref(), &destination, received).await;
                    }
                }
                Err(e) => {
                    warn!(
                        role = %self.role,
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "Failed to receive requests, backing off"
                    );
                    if self.pause(backoff).await {
                        return Ok(());
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    async fn process(
        &self,
        handler: &dyn RequestHandler,
        destination: &DestinationName,
        received: ReceivedMessage,
    ) {
        match handler.handle(&received.message).await {
            Ok(Some(payload)) => {
                // One-way requests carry no reply metadata; the handler
                // output is discarded for those.
                let wants_reply = received.message.correlation_id().is_some()
                    && received.message.reply_to().is_some();
                if wants_reply {
                    if let Err(e) = self.responder.reply(&received.message, payload).await {
                        warn!(
                            role = %self.role,
                            error = %e,
                            "Failed to send response, leaving request for redelivery"
                        );
                        return;
                    }
                } else {
                    debug!(role = %self.role, "Request without reply metadata, response discarded");
                }
                self.acknowledge(destination, &received).await;
            }
            Ok(None) => {
                self.acknowledge(destination, &received).await;
            }
            Err(e) => {
                warn!(
                    role = %self.role,
                    error = %e,
                    "Handler failed, leaving request for redelivery"
                );
            }
        }
    }

    async fn acknowledge(&self, destination: &DestinationName, received: &ReceivedMessage) {
        if let Err(e) = self.transport.acknowledge(destination, &received.receipt).await {
            warn!(role = %self.role, error = %e, "Failed to acknowledge request");
        }
    }

    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => true,
            () = tokio::time::sleep(duration) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use replyq_core::{CorrelationId, InMemoryTransport, ATTR_CORRELATION_ID, ATTR_REPLY_TO};

    struct Echo;

    #[async_trait]
    impl RequestHandler for Echo {
        async fn handle(&self, request: &Message) -> Result<Option<Bytes>> {
            Ok(Some(request.body.clone()))
        }
    }

    struct FailFirst(parking_lot::Mutex<bool>);

    #[async_trait]
    impl RequestHandler for FailFirst {
        async fn handle(&self, request: &Message) -> Result<Option<Bytes>> {
            let mut failed = self.0.lock();
            if *failed {
                Ok(Some(request.body.clone()))
            } else {
                *failed = true;
                Err(replyq_core::Error::Transport("flaky".to_string()))
            }
        }
    }

    fn fast_config() -> Arc<Config> {
        let mut config = Config::default();
        config.poller.poll_interval_ms = 10;
        config.poller.long_poll_wait_ms = 50;
        config.poller.visibility_timeout_s = 1;
        Arc::new(config)
    }

    #[tokio::test]
    async fn test_worker_replies_and_acknowledges() {
        let transport = InMemoryTransport::new();
        let role = Role::from("echo");
        let reply_to = DestinationName::from("caller-inbox");
        transport.create_destination(&reply_to, Duration::from_secs(60)).await.unwrap();

        let worker = RequestWorker::new(Arc::new(transport.clone()), role.clone(), fast_config());
        let cancel = worker.cancel_token();
        worker.spawn(Arc::new(Echo));

        // Worker creates the request destination itself.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let requests = DestinationName::requests(&role);
        let id = CorrelationId::new();
        transport
            .send(
                &requests,
                Message::new("ping")
                    .with_attribute(ATTR_CORRELATION_ID, id.to_string())
                    .with_attribute(ATTR_REPLY_TO, reply_to.as_str()),
            )
            .await
            .unwrap();

        let batch = transport
            .receive(&reply_to, 10, Duration::from_millis(500), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].message.correlation_id(), Some(id));
        assert_eq!(batch[0].message.body, Bytes::from("ping"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.depth(&requests), 0);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_one_way_request_is_acknowledged_without_reply() {
        let transport = InMemoryTransport::new();
        let role = Role::from("sink");
        let worker = RequestWorker::new(Arc::new(transport.clone()), role.clone(), fast_config());
        let cancel = worker.cancel_token();
        worker.spawn(Arc::new(Echo));

        tokio::time::sleep(Duration::from_millis(50)).await;
        let requests = DestinationName::requests(&role);
        transport.send(&requests, Message::new("no reply wanted")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.depth(&requests), 0);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_failed_handler_gets_redelivery() {
        let transport = InMemoryTransport::new();
        let role = Role::from("flaky");
        let reply_to = DestinationName::from("caller-inbox");
        transport.create_destination(&reply_to, Duration::from_secs(60)).await.unwrap();

        let worker = RequestWorker::new(Arc::new(transport.clone()), role.clone(), fast_config());
        let cancel = worker.cancel_token();
        worker.spawn(Arc::new(FailFirst(parking_lot::Mutex::new(false))));

        tokio::time::sleep(Duration::from_millis(50)).await;
        let requests = DestinationName::requests(&role);
        let id = CorrelationId::new();
        transport
            .send(
                &requests,
                Message::new("retry me")
                    .with_attribute(ATTR_CORRELATION_ID, id.to_string())
                    .with_attribute(ATTR_REPLY_TO, reply_to.as_str()),
            )
            .await
            .unwrap();

        // First attempt fails; the redelivery after the visibility
        // timeout succeeds.
        let batch = transport
            .receive(&reply_to, 10, Duration::from_secs(3), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].message.correlation_id(), Some(id));
        cancel.cancel();
    }
}
