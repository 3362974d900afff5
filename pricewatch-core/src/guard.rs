use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Granted,
    Denied { retry_in: Duration },
}

impl Acquire {
    pub fn is_granted(&self) -> bool {
        matches!(self, Acquire::Granted)
    }
}

/// Tracks the last refresh *attempt* per entity. The attempt is recorded when
/// it is granted, so a failing refresh still waits out the full cooldown.
#[derive(Debug, Clone, Default)]
pub struct ScrapeGuard {
    attempts: Arc<Mutex<HashMap<String, Instant>>>,
}

impl ScrapeGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomic check-and-set: grants and stamps `now` when there is no attempt
    /// younger than `cooldown` for `entity_id`.
    pub async fn try_acquire(&self, entity_id: &str, cooldown: Duration) -> Acquire {
        let now = Instant::now();
        let mut attempts = self.attempts.lock().await;
        if let Some(last) = attempts.get(entity_id) {
            let age = now.saturating_duration_since(*last);
            if age < cooldown {
                debug!(entity_id, ?age, "refresh attempt throttled");
                return Acquire::Denied {
                    retry_in: cooldown - age,
                };
            }
        }
        attempts.insert(entity_id.to_string(), now);
        Acquire::Granted
    }

    pub async fn last_attempt(&self, entity_id: &str) -> Option<Instant> {
        self.attempts.lock().await.get(entity_id).copied()
    }

    pub async fn tracked(&self) -> usize {
        self.attempts.lock().await.len()
    }
}
