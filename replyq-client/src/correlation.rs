//! Correlation registry: pending-request table for one reply destination
//!
//! Every in-flight request owns exactly one entry here. An entry
//! transitions out of `Pending` exactly once (resolved by the poller or
//! expired by timeout/cancellation); that transition function is the
//! single source of truth for duplicate suppression, so a redelivered
//! response is absorbed without any extra bookkeeping elsewhere.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::trace;

use replyq_core::{CorrelationId, Error, Message, Result};

enum Slot {
    /// Waiter suspended on the channel.
    Pending(oneshot::Sender<Message>),
    /// Response delivered; the waiter removes the entry on wake-up.
    Resolved,
    /// Timed out or cancelled; reclaimed by the next sweep.
    Expired,
}

struct PendingEntry {
    created_at: Instant,
    deadline: Instant,
    slot: Slot,
}

/// Pending-request table, shared by all request-issuing contexts of a
/// reply destination and its single poller.
#[derive(Clone, Default)]
pub struct CorrelationRegistry {
    entries: Arc<DashMap<CorrelationId, PendingEntry>>,
}

impl CorrelationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending request with the given deadline.
    ///
    /// Fails with `DuplicateCorrelationId` if the id is already present;
    /// ids are collision-resistant, so a duplicate is a programming
    /// error, not an operational condition.
    pub fn register(&self, id: CorrelationId, deadline: Instant) -> Result<PendingResponse> {
        self.sweep_expired();

        match self.entries.entry(id) {
            Entry::Occupied(_) => Err(Error::DuplicateCorrelationId(id)),
            Entry::Vacant(vacant) => {
                let (tx, rx) = oneshot::channel();
                vacant.insert(PendingEntry {
                    created_at: Instant::now(),
                    deadline,
                    slot: Slot::Pending(tx),
                });
                Ok(PendingResponse {
                    id,
                    rx,
                    registry: self.clone(),
                    finished: false,
                })
            }
        }
    }

    /// Deliver a response to the waiter for `id`.
    ///
    /// Returns true iff a waiter existed. Resolving an id that is
    /// already resolved, expired, or unknown is a no-op returning false
    /// (expected under at-least-once delivery).
    pub fn resolve(&self, id: CorrelationId, message: Message) -> bool {
        let Some(mut entry) = self.entries.get_mut(&id) else {
            return false;
        };
        match std::mem::replace(&mut entry.slot, Slot::Resolved) {
            Slot::Pending(tx) => {
                if tx.send(message).is_ok() {
                    trace!(
                        correlation_id = %id,
                        pending_ms = entry.created_at.elapsed().as_millis() as u64,
                        "Pending request resolved"
                    );
                    true
                } else {
                    // Waiter vanished between cancellation and its expiry
                    // transition landing; treat as expired.
                    entry.slot = Slot::Expired;
                    false
                }
            }
            other => {
                entry.slot = other;
                false
            }
        }
    }

    /// Cancel a pending entry without removing it; the sweep reclaims it.
    fn expire(&self, id: CorrelationId) {
        if let Some(mut entry) = self.entries.get_mut(&id) {
            if matches!(entry.slot, Slot::Pending(_)) {
                entry.slot = Slot::Expired;
            }
        }
    }

    fn remove(&self, id: CorrelationId) {
        self.entries.remove(&id);
    }

    /// Reclaim expired entries and anything past its deadline.
    ///
    /// Runs opportunistically on every registration so abandoned
    /// requests cannot grow the table without bound.
    pub fn sweep_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| match entry.slot {
            Slot::Expired => false,
            _ => entry.deadline > now,
        });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Handle held by the caller of `register` while its request is in
/// flight. Dropping it without waiting cancels the pending entry, so a
/// late response cannot leak table space.
pub struct PendingResponse {
    id: CorrelationId,
    rx: oneshot::Receiver<Message>,
    registry: CorrelationRegistry,
    finished: bool,
}

impl std::fmt::Debug for PendingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResponse")
            .field("id", &self.id)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl PendingResponse {
    #[must_use]
    pub const fn correlation_id(&self) -> CorrelationId {
        self.id
    }

    /// Suspend until the response arrives or `timeout` elapses.
    ///
    /// On resolution the entry is removed and the response returned; on
    /// timeout the entry is removed and `RequestTimedOut` surfaces.
    pub async fn wait(mut self, timeout: Duration) -> Result<Message> {
        let outcome = tokio::time::timeout(timeout, &mut self.rx).await;
        self.finished = true;
        self.registry.remove(self.id);
        match outcome {
            Ok(Ok(message)) => {
                trace!(correlation_id = %self.id, "Response received");
                Ok(message)
            }
            // Sender dropped: the entry was swept out from under us,
            // which only happens once its deadline has passed.
            Ok(Err(_)) | Err(_) => Err(Error::RequestTimedOut {
                correlation_id: self.id,
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        if !self.finished {
            self.registry.expire(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn deadline_in(ms: u64) -> Instant {
        Instant::now() + Duration::from_millis(ms)
    }

    #[tokio::test]
    async fn test_resolve_unblocks_waiter_with_exact_payload() {
        let registry = CorrelationRegistry::new();
        let id = CorrelationId::new();
        let pending = registry.register(id, deadline_in(1_000)).unwrap();

        assert!(registry.resolve(id, Message::new("the response")));

        let response = pending.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(response.body, Bytes::from("the response"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_rejected() {
        let registry = CorrelationRegistry::new();
        let id = CorrelationId::new();
        let _pending = registry.register(id, deadline_in(1_000)).unwrap();

        let err = registry.register(id, deadline_in(1_000)).unwrap_err();
        assert!(matches!(err, Error::DuplicateCorrelationId(dup) if dup == id));
    }

    #[tokio::test]
    async fn test_second_resolve_is_a_noop() {
        let registry = CorrelationRegistry::new();
        let id = CorrelationId::new();
        let pending = registry.register(id, deadline_in(1_000)).unwrap();

        assert!(registry.resolve(id, Message::new("first")));
        assert!(!registry.resolve(id, Message::new("second")));

        // First resolution's value is intact.
        let response = pending.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(response.body, Bytes::from("first"));

        // And once the waiter consumed it, further duplicates still no-op.
        assert!(!registry.resolve(id, Message::new("third")));
    }

    #[tokio::test]
    async fn test_timeout_surfaces_and_leaves_no_entry() {
        let registry = CorrelationRegistry::new();
        let id = CorrelationId::new();
        let pending = registry.register(id, deadline_in(20)).unwrap();

        let err = pending.wait(Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, Error::RequestTimedOut { correlation_id, .. } if correlation_id == id));
        assert!(registry.is_empty());

        // A response arriving after the timeout is absorbed.
        assert!(!registry.resolve(id, Message::new("late")));
    }

    #[tokio::test]
    async fn test_dropped_handle_is_swept_not_leaked() {
        let registry = CorrelationRegistry::new();
        let id = CorrelationId::new();
        let pending = registry.register(id, deadline_in(60_000)).unwrap();
        drop(pending);

        // Cancelled but not yet reclaimed.
        assert_eq!(registry.len(), 1);
        assert!(!registry.resolve(id, Message::new("late")));

        registry.sweep_expired();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_registration_sweeps_abandoned_entries() {
        let registry = CorrelationRegistry::new();
        let abandoned = CorrelationId::new();
        drop(registry.register(abandoned, deadline_in(60_000)).unwrap());

        let _live = registry.register(CorrelationId::new(), deadline_in(60_000)).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_past_deadline_pending_entries_are_swept() {
        let registry = CorrelationRegistry::new();
        let id = CorrelationId::new();
        let pending = registry.register(id, deadline_in(10)).unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        registry.sweep_expired();
        assert!(registry.is_empty());

        // The waiter observes the sweep as a timeout.
        let err = pending.wait(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, Error::RequestTimedOut { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_waiters_each_get_their_own_response() {
        let registry = CorrelationRegistry::new();
        let mut waiters = Vec::new();
        let mut ids = Vec::new();

        for i in 0..50 {
            let id = CorrelationId::new();
            let pending = registry.register(id, deadline_in(5_000)).unwrap();
            ids.push((id, i));
            waiters.push(tokio::spawn(pending.wait(Duration::from_secs(5))));
        }

        for (id, i) in &ids {
            assert!(registry.resolve(*id, Message::new(format!("payload-{i}"))));
        }

        for (handle, (_, i)) in waiters.into_iter().zip(ids.iter()) {
            let response = handle.await.unwrap().unwrap();
            assert_eq!(response.body, Bytes::from(format!("payload-{i}")));
        }
        assert!(registry.is_empty());
    }
}
