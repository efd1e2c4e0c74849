//! Transport abstraction over a cloud message queue
//!
//! The queue service guarantees at-least-once delivery of opaque
//! messages with attributes, no ordering, and per-delivery visibility
//! timeouts. Everything above this trait builds request-reply semantics
//! out of those primitives.

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{DestinationInfo, DestinationName, Message, ReceivedMessage, ReceiptHandle};

pub use memory::InMemoryTransport;

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Create a destination, tagging it with an initial heartbeat.
    /// Idempotent: creating an existing destination returns its name.
    async fn create_destination(
        &self,
        name: &DestinationName,
        retention: Duration,
    ) -> Result<DestinationName>;

    /// Delete a destination and everything queued on it.
    async fn delete_destination(&self, name: &DestinationName) -> Result<()>;

    /// Send a message. Fails with `Error::SendFailed` when the
    /// destination rejects it.
    async fn send(&self, destination: &DestinationName, message: Message) -> Result<()>;

    /// Receive up to `max_batch` messages, long-polling for at most
    /// `wait`. Returned messages stay hidden from other receivers for
    /// `visibility` and reappear if not acknowledged in time.
    async fn receive(
        &self,
        destination: &DestinationName,
        max_batch: usize,
        wait: Duration,
        visibility: Duration,
    ) -> Result<Vec<ReceivedMessage>>;

    /// Acknowledge one delivery so the message is not redelivered.
    /// Receipts are per-delivery; a stale receipt fails.
    async fn acknowledge(&self, destination: &DestinationName, receipt: &ReceiptHandle)
        -> Result<()>;

    /// Refresh the destination's heartbeat tag. The idle sweeper treats
    /// destinations with stale heartbeats as orphaned.
    async fn heartbeat(&self, destination: &DestinationName) -> Result<()>;

    /// List destinations whose name starts with `prefix`.
    async fn list_destinations(&self, prefix: &str) -> Result<Vec<DestinationInfo>>;
}
