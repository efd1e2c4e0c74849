//! Idle reply destination sweeper
//!
//! A process that dies without running teardown leaves its reply
//! destination behind. Live destinations are heartbeated periodically;
//! this sweeper deletes any destination under the reply prefix whose
//! heartbeat has gone stale. Only one process per deployment needs to
//! run it.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use replyq_core::{Config, Result, Transport};

pub struct IdleDestinationSweeper {
    transport: Arc<dyn Transport>,
    config: Arc<Config>,
    cancel: CancellationToken,
}

impl IdleDestinationSweeper {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, config: Arc<Config>) -> Self {
        Self {
            transport,
            config,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        info!(
            prefix = %self.config.reply.destination_prefix,
            interval_s = self.config.sweeper.interval_s,
            "Idle destination sweeper started"
        );
        let mut ticker = tokio::time::interval(self.config.sweeper.interval());
        ticker.tick().await;
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    info!("Idle destination sweeper stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        warn!(error = %e, "Sweep failed");
                    }
                }
            }
        }
    }

    /// One sweep pass. Returns how many destinations were deleted.
    pub async fn sweep_once(&self) -> Result<usize> {
        let cutoff =
            Utc::now() - chrono::Duration::seconds(self.config.sweeper.idle_retention_s as i64);
        let listed = self
            .transport
            .list_destinations(&self.config.reply.destination_prefix)
            .await?;

        let mut removed = 0;
        for info in listed {
            // Never tagged counts as stale: the owner died before its
            // first heartbeat.
            let idle = info.last_heartbeat.is_none_or(|hb| hb < cutoff);
            if !idle {
                debug!(destination = %info.name, "Destination heartbeat fresh, keeping");
                continue;
            }
            match self.transport.delete_destination(&info.name).await {
                Ok(()) => {
                    info!(destination = %info.name, "Swept idle reply destination");
                    removed += 1;
                }
                // Another sweeper or the owner itself may have won the race.
                Err(e) => {
                    warn!(destination = %info.name, error = %e, "Failed to sweep destination");
                }
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use replyq_core::{DestinationName, InMemoryTransport};

    #[tokio::test]
    async fn test_sweep_deletes_only_stale_destinations() {
        let transport = InMemoryTransport::new();
        let stale = DestinationName::from("replyq-reply-echo-dead");
        let fresh = DestinationName::from("replyq-reply-echo-alive");
        let unrelated = DestinationName::from("orders-requests");
        for name in [&stale, &fresh, &unrelated] {
            transport.create_destination(name, Duration::from_secs(60)).await.unwrap();
        }
        transport.set_heartbeat(&stale, Utc::now() - chrono::Duration::seconds(3_600));

        let config = Arc::new(Config::default());
        let sweeper = IdleDestinationSweeper::new(Arc::new(transport.clone()), config);

        let removed = sweeper.sweep_once().await.unwrap();
        assert_eq!(removed, 1);

        let remaining = transport.list_destinations("").await.unwrap();
        let names: Vec<_> = remaining.iter().map(|d| d.name.clone()).collect();
        assert!(!names.contains(&stale));
        assert!(names.contains(&fresh));
        assert!(names.contains(&unrelated));
    }

    #[tokio::test]
    async fn test_sweep_with_nothing_stale_is_a_noop() {
        let transport = InMemoryTransport::new();
        let fresh = DestinationName::from("replyq-reply-echo-alive");
        transport.create_destination(&fresh, Duration::from_secs(60)).await.unwrap();

        let sweeper =
            IdleDestinationSweeper::new(Arc::new(transport.clone()), Arc::new(Config::default()));
        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
        assert_eq!(transport.list_destinations("replyq-reply-").await.unwrap().len(), 1);
    }
}
