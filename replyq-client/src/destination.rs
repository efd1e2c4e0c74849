//! Reply destination lifecycle
//!
//! One reply destination per role per process, created lazily on first
//! acquisition and reference-counted. A role whose count reaches zero is
//! not torn down immediately: a grace timer runs first, so back-to-back
//! requests do not churn destination create/delete against the
//! transport. Per-role states: absent, active(refcount), draining.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use replyq_core::{
    Config, DestinationName, DiagnosticEvent, DiagnosticKind, Error, Result, Role,
    SharedDiagnostics, Transport,
};

use crate::correlation::CorrelationRegistry;
use crate::poller::ReplyPoller;

/// A live reply destination: its name plus the registry the poller
/// resolves into. Constructed once per role and shared by every lease.
pub struct ReplyDestination {
    role: Role,
    name: DestinationName,
    registry: CorrelationRegistry,
}

impl ReplyDestination {
    #[must_use]
    pub const fn role(&self) -> &Role {
        &self.role
    }

    #[must_use]
    pub const fn name(&self) -> &DestinationName {
        &self.name
    }

    #[must_use]
    pub const fn registry(&self) -> &CorrelationRegistry {
        &self.registry
    }
}

struct RoleEntry {
    destination: Arc<ReplyDestination>,
    cancel: CancellationToken,
    refcount: usize,
    /// Bumped on every acquire; a grace timer only tears down if the
    /// epoch it captured is still current, so a release racing a
    /// re-acquire can never destroy a destination in use.
    epoch: u64,
}

struct ManagerInner {
    transport: Arc<dyn Transport>,
    config: Arc<Config>,
    diagnostics: SharedDiagnostics,
    /// Suffix for this process's reply destination names.
    process_id: Uuid,
    roles: Mutex<HashMap<Role, RoleEntry>>,
}

/// Per-role reply destination manager. Cheap to clone; all clones share
/// the same role table.
#[derive(Clone)]
pub struct ReplyDestinationManager {
    inner: Arc<ManagerInner>,
}

impl ReplyDestinationManager {
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        config: Arc<Config>,
        diagnostics: SharedDiagnostics,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                transport,
                config,
                diagnostics,
                process_id: Uuid::new_v4(),
                roles: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Acquire the role's reply destination, creating it (and starting
    /// its poller and heartbeat) on first use.
    ///
    /// The lock is held across creation, so concurrent first acquirers
    /// wait instead of double-creating.
    pub async fn acquire(&self, role: &Role) -> Result<ReplyLease> {
        let mut roles = self.inner.roles.lock().await;

        if let Some(entry) = roles.get_mut(role) {
            entry.refcount += 1;
            entry.epoch += 1;
            debug!(role = %role, refcount = entry.refcount, "Reply destination reused");
            return Ok(ReplyLease {
                manager: self.clone(),
                destination: entry.destination.clone(),
                released: false,
            });
        }

        let name = DestinationName::replies(
            &self.inner.config.reply.destination_prefix,
            role,
            self.inner.process_id,
        );
        let name = match self
            .inner
            .transport
            .create_destination(&name, self.inner.config.reply.retention())
            .await
        {
            Ok(name) => name,
            Err(e) => {
                self.inner.diagnostics.record(DiagnosticEvent::new(
                    DiagnosticKind::DestinationUnavailable,
                    role,
                    e.to_string(),
                ));
                return Err(Error::DestinationUnavailable {
                    role: role.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        let destination = Arc::new(ReplyDestination {
            role: role.clone(),
            name: name.clone(),
            registry: CorrelationRegistry::new(),
        });
        let cancel = CancellationToken::new();

        ReplyPoller {
            transport: self.inner.transport.clone(),
            destination: name.clone(),
            role: role.clone(),
            registry: destination.registry.clone(),
            diagnostics: self.inner.diagnostics.clone(),
            config: self.inner.config.poller.clone(),
            cancel: cancel.child_token(),
        }
        .spawn();
        spawn_heartbeat(
            self.inner.transport.clone(),
            name.clone(),
            self.inner.config.reply.heartbeat_interval(),
            cancel.child_token(),
        );

        roles.insert(
            role.clone(),
            RoleEntry {
                destination: destination.clone(),
                cancel,
                refcount: 1,
                epoch: 0,
            },
        );
        info!(role = %role, destination = %name, "Reply destination created");

        Ok(ReplyLease {
            manager: self.clone(),
            destination,
            released: false,
        })
    }

    /// Release one acquisition. At zero the role drains: a grace timer
    /// is armed and teardown happens only if nothing re-acquires before
    /// it fires.
    pub async fn release(&self, role: &Role) {
        let mut roles = self.inner.roles.lock().await;
        let Some(entry) = roles.get_mut(role) else {
            return;
        };
        entry.refcount = entry.refcount.saturating_sub(1);
        debug!(role = %role, refcount = entry.refcount, "Reply destination released");
        if entry.refcount > 0 {
            return;
        }

        let epoch = entry.epoch;
        let manager = self.clone();
        let role = role.clone();
        let grace = self.inner.config.reply.teardown_grace();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            manager.teardown_if_draining(&role, epoch).await;
        });
    }

    async fn teardown_if_draining(&self, role: &Role, epoch: u64) {
        let entry = {
            let mut roles = self.inner.roles.lock().await;
            // Re-acquired during the grace period (or already gone) means
            // this timer lost the race and must not tear down.
            let still_draining = roles
                .get(role)
                .is_some_and(|entry| entry.refcount == 0 && entry.epoch == epoch);
            if still_draining {
                roles.remove(role)
            } else {
                None
            }
        };
        if let Some(entry) = entry {
            self.teardown(role, entry).await;
        }
    }

    /// Tear down every role immediately, for process exit.
    pub async fn shutdown(&self) {
        let drained: Vec<(Role, RoleEntry)> = {
            let mut roles = self.inner.roles.lock().await;
            roles.drain().collect()
        };
        for (role, entry) in drained {
            self.teardown(&role, entry).await;
        }
    }

    async fn teardown(&self, role: &Role, entry: RoleEntry) {
        entry.cancel.cancel();
        if let Err(e) = self
            .inner
            .transport
            .delete_destination(&entry.destination.name)
            .await
        {
            // May have been reclaimed by the idle sweeper already.
            warn!(
                role = %role,
                destination = %entry.destination.name,
                error = %e,
                "Failed to delete reply destination"
            );
        } else {
            info!(
                role = %role,
                destination = %entry.destination.name,
                "Reply destination torn down"
            );
        }
    }

    /// Number of roles currently active or draining.
    pub async fn active_roles(&self) -> usize {
        self.inner.roles.lock().await.len()
    }
}

/// RAII handle on an acquired reply destination.
///
/// Prefer the explicit async `release`; a lease dropped without it
/// releases from a spawned task as a backstop.
pub struct ReplyLease {
    manager: ReplyDestinationManager,
    destination: Arc<ReplyDestination>,
    released: bool,
}

impl std::fmt::Debug for ReplyLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyLease")
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl ReplyLease {
    #[must_use]
    pub fn destination(&self) -> &Arc<ReplyDestination> {
        &self.destination
    }

    #[must_use]
    pub fn registry(&self) -> &CorrelationRegistry {
        self.destination.registry()
    }

    pub async fn release(mut self) {
        self.released = true;
        let role = self.destination.role.clone();
        self.manager.release(&role).await;
    }

    /// Disarm the lease without releasing. Used by shutdown paths that
    /// tear the whole table down anyway.
    pub(crate) fn defuse(&mut self) {
        self.released = true;
    }
}

impl Drop for ReplyLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let manager = self.manager.clone();
        let role = self.destination.role.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { manager.release(&role).await });
        }
    }
}

fn spawn_heartbeat(
    transport: Arc<dyn Transport>,
    destination: DestinationName,
    interval: std::time::Duration,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Creation already tagged the destination; skip the immediate tick.
        ticker.tick().await;
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    if let Err(e) = transport.heartbeat(&destination).await {
                        warn!(destination = %destination, error = %e, "Heartbeat failed");
                    }
                }
            }
        }
    });
}
