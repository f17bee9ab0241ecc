//! Single-permit request gate enforcing EDGAR's inter-request floor.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

/// Serializes outbound requests and spaces them at least `min_interval`
/// apart.
///
/// The permit is the mutex itself: callers hold it across the spacing sleep,
/// so concurrent tasks queue up and leave in single file. The timestamp is
/// process-local; running several worker processes on one host needs a
/// shared-coordination primitive instead.
#[derive(Debug)]
pub struct RequestGate {
    min_interval: Duration,
    last_request_at: Mutex<Option<Instant>>,
}

impl RequestGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request_at: Mutex::new(None),
        }
    }

    /// Wait until the floor since the previous request has elapsed, then
    /// claim the current instant as the new reference point.
    pub async fn wait(&self) {
        let mut last = self.last_request_at.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn sequential_waits_respect_the_floor() {
        let gate = RequestGate::new(Duration::from_millis(20));
        let start = Instant::now();
        for _ in 0..5 {
            gate.wait().await;
        }
        // First pass is free; the remaining four each owe 20 ms.
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn concurrent_tasks_are_spaced_apart() {
        let gate = Arc::new(RequestGate::new(Duration::from_millis(15)));
        let stamps = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let gate = gate.clone();
            let stamps = stamps.clone();
            handles.push(tokio::spawn(async move {
                gate.wait().await;
                stamps.lock().unwrap().push(Instant::now());
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut stamps = stamps.lock().unwrap().clone();
        stamps.sort();
        for pair in stamps.windows(2) {
            assert!(
                pair[1] - pair[0] >= Duration::from_millis(14),
                "inter-arrival gap below the floor: {:?}",
                pair[1] - pair[0]
            );
        }
    }
}
