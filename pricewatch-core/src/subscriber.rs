use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::error::SendError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        SubscriberId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A live connection to a remote peer that accepts pushed text frames.
///
/// Implementations must not block on a slow peer: `send` either hands the
/// frame to the connection's own writer or fails.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Transport label used in logs ("ws", "sse", ...).
    fn kind(&self) -> &'static str;

    async fn send(&self, frame: &str) -> Result<(), SendError>;

    fn is_open(&self) -> bool;

    /// Asks the connection to wind down. Idempotent.
    fn close(&self);
}
