use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{BroadcastError, SendError};
use crate::message::Notification;
use crate::pool::{DrainReport, WorkerPool};
use crate::subscriber::{Subscriber, SubscriberId};

pub const DEFAULT_SEND_WORKERS: usize = 50;
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(2);

type SubscriberMap = HashMap<SubscriberId, Arc<dyn Subscriber>>;

/// Fans notifications out to every live subscriber. Each send runs as its own
/// job on a bounded pool, so one slow or dead peer never holds up the rest.
#[derive(Clone)]
pub struct Broadcaster {
    subscribers: Arc<RwLock<SubscriberMap>>,
    pool: WorkerPool,
    send_timeout: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliverySummary {
    pub delivered: usize,
    pub failed: usize,
}

/// Returned once every send of a broadcast has been queued.
pub struct Delivery {
    attempted: usize,
    done: oneshot::Receiver<DeliverySummary>,
}

impl Delivery {
    pub fn attempted(&self) -> usize {
        self.attempted
    }

    /// Resolves when every queued send has finished or been cancelled.
    pub async fn wait(self) -> DeliverySummary {
        self.done.await.unwrap_or_default()
    }

    fn empty() -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(DeliverySummary::default());
        Self {
            attempted: 0,
            done: rx,
        }
    }
}

impl Broadcaster {
    pub fn new(workers: usize, send_timeout: Duration) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            pool: WorkerPool::new("broadcast", workers),
            send_timeout,
        }
    }

    pub async fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> SubscriberId {
        let id = SubscriberId::next();
        let kind = subscriber.kind();
        let mut subscribers = self.subscribers.write().await;
        subscribers.insert(id, subscriber);
        info!(%id, kind, total = subscribers.len(), "subscriber connected");
        id
    }

    /// Removes a subscriber; unknown or already-removed ids are ignored.
    pub async fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.write().await;
        let removed = subscribers.remove(&id).is_some();
        if removed {
            info!(%id, remaining = subscribers.len(), "subscriber disconnected");
        }
        removed
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Queues one send per subscriber in the current live set and returns
    /// without waiting for any of them.
    pub async fn broadcast(&self, notification: &Notification) -> Result<Delivery, BroadcastError> {
        if self.pool.is_closed() {
            return Err(BroadcastError::Closed);
        }
        let frame: Arc<str> = Arc::from(notification.encode()?);
        let snapshot: Vec<(SubscriberId, Arc<dyn Subscriber>)> = self
            .subscribers
            .read()
            .await
            .iter()
            .map(|(id, sub)| (*id, Arc::clone(sub)))
            .collect();
        if snapshot.is_empty() {
            return Ok(Delivery::empty());
        }

        let (result_tx, result_rx) = mpsc::channel(snapshot.len());
        let mut attempted = 0;
        for (id, subscriber) in snapshot {
            let frame = Arc::clone(&frame);
            let result_tx = result_tx.clone();
            let subscribers = Arc::clone(&self.subscribers);
            let send_timeout = self.send_timeout;
            let queued = self
                .pool
                .submit(async move {
                    let outcome = deliver(subscriber.as_ref(), &frame, send_timeout).await;
                    if let Err(err) = &outcome {
                        debug!(%id, kind = subscriber.kind(), error = %err, "send failed");
                        evict(&subscribers, id).await;
                    }
                    let _ = result_tx.send(outcome.is_ok()).await;
                })
                .await;
            if queued {
                attempted += 1;
            }
        }
        drop(result_tx);

        let (done_tx, done_rx) = oneshot::channel();
        tokio::spawn(collect(result_rx, done_tx));
        Ok(Delivery {
            attempted,
            done: done_rx,
        })
    }

    /// Stops accepting broadcasts and waits up to `grace` for queued sends.
    pub async fn drain(&self, grace: Duration) -> DrainReport {
        self.pool.shutdown(grace).await
    }

    /// Closes and forgets every subscriber. Returns how many were closed.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<Arc<dyn Subscriber>> = {
            let mut subscribers = self.subscribers.write().await;
            subscribers.drain().map(|(_, sub)| sub).collect()
        };
        for subscriber in &drained {
            subscriber.close();
        }
        info!(closed = drained.len(), "subscriber connections closed");
        drained.len()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_SEND_WORKERS, DEFAULT_SEND_TIMEOUT)
    }
}

async fn deliver(subscriber: &dyn Subscriber, frame: &str, limit: Duration) -> Result<(), SendError> {
    if !subscriber.is_open() {
        return Err(SendError::Closed);
    }
    match tokio::time::timeout(limit, subscriber.send(frame)).await {
        Ok(result) => result,
        Err(_) => Err(SendError::Timeout),
    }
}

async fn evict(subscribers: &RwLock<SubscriberMap>, id: SubscriberId) {
    let removed = subscribers.write().await.remove(&id);
    if let Some(subscriber) = removed {
        subscriber.close();
        warn!(%id, kind = subscriber.kind(), "removed subscriber after failed send");
    }
}

async fn collect(mut results: mpsc::Receiver<bool>, done: oneshot::Sender<DeliverySummary>) {
    let started = Instant::now();
    let mut summary = DeliverySummary::default();
    while let Some(ok) = results.recv().await {
        if ok {
            summary.delivered += 1;
        } else {
            summary.failed += 1;
        }
    }
    debug!(
        delivered = summary.delivered,
        failed = summary.failed,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "broadcast finished"
    );
    let _ = done.send(summary);
}
