//! In-process transport for tests and local development
//!
//! Behaves like the real queue service where it matters to the core:
//! unacknowledged messages become visible again after the visibility
//! timeout, receipts rotate per delivery, and deliveries are unordered
//! with respect to acknowledgment.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::models::{DestinationInfo, DestinationName, Message, ReceivedMessage, ReceiptHandle};

use super::Transport;

/// Granularity of the simulated long poll.
const RECEIVE_POLL_INTERVAL: Duration = Duration::from_millis(5);

struct StoredMessage {
    message: Message,
    receipt: ReceiptHandle,
    /// Hidden until this instant; rotated on every delivery.
    visible_at: Instant,
}

struct QueueState {
    messages: Vec<StoredMessage>,
    last_heartbeat: Option<DateTime<Utc>>,
    #[allow(dead_code)]
    retention: Duration,
}

/// In-memory queue transport.
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    destinations: Arc<Mutex<HashMap<DestinationName, QueueState>>>,
}

impl InMemoryTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages currently queued (visible or in flight).
    #[must_use]
    pub fn depth(&self, destination: &DestinationName) -> usize {
        self.destinations
            .lock()
            .get(destination)
            .map_or(0, |q| q.messages.len())
    }

    /// Backdate a destination's heartbeat. Test hook for the idle sweeper.
    pub fn set_heartbeat(&self, destination: &DestinationName, at: DateTime<Utc>) {
        if let Some(queue) = self.destinations.lock().get_mut(destination) {
            queue.last_heartbeat = Some(at);
        }
    }

    fn take_visible(
        &self,
        destination: &DestinationName,
        max_batch: usize,
        visibility: Duration,
    ) -> Result<Vec<ReceivedMessage>> {
        let mut destinations = self.destinations.lock();
        let queue = destinations
            .get_mut(destination)
            .ok_or_else(|| Error::Transport(format!("destination {destination} does not exist")))?;

        let now = Instant::now();
        let mut batch = Vec::new();
        for stored in queue.messages.iter_mut() {
            if batch.len() >= max_batch {
                break;
            }
            if stored.visible_at > now {
                continue;
            }
            stored.receipt = ReceiptHandle::generate();
            stored.visible_at = now + visibility;
            batch.push(ReceivedMessage {
                message: stored.message.clone(),
                receipt: stored.receipt.clone(),
            });
        }
        Ok(batch)
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn create_destination(
        &self,
        name: &DestinationName,
        retention: Duration,
    ) -> Result<DestinationName> {
        let mut destinations = self.destinations.lock();
        destinations.entry(name.clone()).or_insert_with(|| QueueState {
            messages: Vec::new(),
            last_heartbeat: Some(Utc::now()),
            retention,
        });
        Ok(name.clone())
    }

    async fn delete_destination(&self, name: &DestinationName) -> Result<()> {
        let mut destinations = self.destinations.lock();
        destinations
            .remove(name)
            .ok_or_else(|| Error::Transport(format!("destination {name} does not exist")))?;
        Ok(())
    }

    async fn send(&self, destination: &DestinationName, message: Message) -> Result<()> {
        let mut destinations = self.destinations.lock();
        let queue = destinations.get_mut(destination).ok_or_else(|| Error::SendFailed {
            destination: destination.to_string(),
            reason: "destination does not exist".to_string(),
        })?;
        queue.messages.push(StoredMessage {
            message,
            receipt: ReceiptHandle::generate(),
            visible_at: Instant::now(),
        });
        Ok(())
    }

    async fn receive(
        &self,
        destination: &DestinationName,
        max_batch: usize,
        wait: Duration,
        visibility: Duration,
    ) -> Result<Vec<ReceivedMessage>> {
        let deadline = Instant::now() + wait;
        loop {
            let batch = self.take_visible(destination, max_batch, visibility)?;
            if !batch.is_empty() {
                return Ok(batch);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Vec::new());
            }
            tokio::time::sleep(RECEIVE_POLL_INTERVAL.min(remaining)).await;
        }
    }

    async fn acknowledge(
        &self,
        destination: &DestinationName,
        receipt: &ReceiptHandle,
    ) -> Result<()> {
        let mut destinations = self.destinations.lock();
        let queue = destinations
            .get_mut(destination)
            .ok_or_else(|| Error::Transport(format!("destination {destination} does not exist")))?;

        let before = queue.messages.len();
        queue.messages.retain(|stored| &stored.receipt != receipt);
        if queue.messages.len() == before {
            return Err(Error::Transport(format!(
                "receipt {receipt} does not match any in-flight message"
            )));
        }
        Ok(())
    }

    async fn heartbeat(&self, destination: &DestinationName) -> Result<()> {
        let mut destinations = self.destinations.lock();
        let queue = destinations
            .get_mut(destination)
            .ok_or_else(|| Error::Transport(format!("destination {destination} does not exist")))?;
        queue.last_heartbeat = Some(Utc::now());
        Ok(())
    }

    async fn list_destinations(&self, prefix: &str) -> Result<Vec<DestinationInfo>> {
        let destinations = self.destinations.lock();
        Ok(destinations
            .iter()
            .filter(|(name, _)| name.as_str().starts_with(prefix))
            .map(|(name, queue)| DestinationInfo {
                name: name.clone(),
                last_heartbeat: queue.last_heartbeat,
            })
            .collect())
    }
}
