//! Minimum-interval gate for outbound requests.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Single-slot timestamp gate: each `wait` sleeps out whatever remains of
/// `min_interval` since the previous call returned. Holding the lock while
/// sleeping serializes concurrent callers on one instance.
#[derive(Debug)]
pub struct RequestGate {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RequestGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(None),
        }
    }

    pub async fn wait(&self) {
        let mut last = self.last.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}
