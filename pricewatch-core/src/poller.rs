use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::broadcaster::Broadcaster;
use crate::error::PollError;
use crate::message::Notification;
use crate::store::PriceStore;

#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub interval: Duration,
    pub initial_delay: Duration,
    pub batch_limit: usize,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            initial_delay: Duration::from_secs(10),
            batch_limit: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nobody is listening; the store was not queried.
    Idle,
    /// Query succeeded but nothing changed since the checkpoint.
    NoChanges,
    Broadcast { rows: usize, checkpoint: DateTime<Utc> },
}

/// Turns store rows changed after the checkpoint into `price_update`
/// broadcasts. Owns the checkpoint; nothing else writes it.
pub struct ChangeDetector {
    store: Arc<dyn PriceStore>,
    broadcaster: Broadcaster,
    checkpoint: DateTime<Utc>,
    batch_limit: usize,
    checkpoint_tx: watch::Sender<DateTime<Utc>>,
}

impl ChangeDetector {
    pub fn new(store: Arc<dyn PriceStore>, broadcaster: Broadcaster, batch_limit: usize) -> Self {
        Self::starting_at(store, broadcaster, batch_limit, Utc::now())
    }

    pub fn starting_at(
        store: Arc<dyn PriceStore>,
        broadcaster: Broadcaster,
        batch_limit: usize,
        checkpoint: DateTime<Utc>,
    ) -> Self {
        let (checkpoint_tx, _) = watch::channel(checkpoint);
        Self {
            store,
            broadcaster,
            checkpoint,
            batch_limit: batch_limit.max(1),
            checkpoint_tx,
        }
    }

    pub fn checkpoint(&self) -> DateTime<Utc> {
        self.checkpoint
    }

    /// Read-only view of the checkpoint for observers outside the poll task.
    pub fn watch_checkpoint(&self) -> watch::Receiver<DateTime<Utc>> {
        self.checkpoint_tx.subscribe()
    }

    /// One poll cycle. On error the checkpoint is left where it was so the
    /// next cycle retries the same window.
    pub async fn poll_once(&mut self) -> Result<PollOutcome, PollError> {
        if self.broadcaster.subscriber_count().await == 0 {
            return Ok(PollOutcome::Idle);
        }

        let mut changes = self
            .store
            .changed_since(self.checkpoint, self.batch_limit)
            .await?;
        if changes.is_empty() {
            return Ok(PollOutcome::NoChanges);
        }
        changes.sort_by_key(|c| c.changed_at);

        info!(rows = changes.len(), since = %self.checkpoint, "price changes found");
        let mut latest = self.checkpoint;
        for change in &changes {
            let notification = Notification::price_update(change);
            if let Err(err) = self.broadcaster.broadcast(&notification).await {
                warn!(entity_id = %change.entity_id, error = %err, "failed to broadcast price update");
            }
            latest = latest.max(change.changed_at);
        }

        self.checkpoint = latest;
        self.checkpoint_tx.send_replace(latest);
        Ok(PollOutcome::Broadcast {
            rows: changes.len(),
            checkpoint: latest,
        })
    }
}

pub struct PollerHandle {
    cancel_tx: broadcast::Sender<()>,
    join: JoinHandle<()>,
    checkpoint: watch::Receiver<DateTime<Utc>>,
}

impl PollerHandle {
    pub fn checkpoint(&self) -> DateTime<Utc> {
        *self.checkpoint.borrow()
    }

    pub async fn stop(self) -> Result<(), PollError> {
        let _ = self.cancel_tx.send(());
        self.join.await.map_err(PollError::from)
    }
}

/// Drives `detector` on a fixed period after `initial_delay`. Cycle errors are
/// logged and never end the loop.
pub fn spawn_poller(mut detector: ChangeDetector, config: PollConfig) -> PollerHandle {
    let (cancel_tx, mut cancel_rx) = broadcast::channel(1);
    let checkpoint = detector.watch_checkpoint();
    let join = tokio::spawn(async move {
        info!(interval = ?config.interval, "price poller started");
        tokio::select! {
            _ = cancel_rx.recv() => {
                info!("poller shutdown requested before first cycle");
                return;
            }
            _ = tokio::time::sleep(config.initial_delay) => {}
        }

        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel_rx.recv() => {
                    info!("poller shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    match detector.poll_once().await {
                        Ok(PollOutcome::Idle) => debug!("no subscribers, skipping poll"),
                        Ok(PollOutcome::NoChanges) => debug!("no price changes"),
                        Ok(PollOutcome::Broadcast { rows, checkpoint }) => {
                            debug!(rows, %checkpoint, "checkpoint advanced");
                        }
                        Err(err) => warn!(error = %err, "poll cycle failed"),
                    }
                }
            }
        }
    });

    PollerHandle {
        cancel_tx,
        join,
        checkpoint,
    }
}
