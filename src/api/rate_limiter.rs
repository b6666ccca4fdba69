use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time;

/// Randomized delay applied before every outbound listing request.
///
/// Listing sites throttle or block clients with a regular request cadence,
/// so each wait is drawn uniformly from `[min_delay, max_delay]`.
#[derive(Debug)]
pub struct RequestPacer {
    min_delay: Duration,
    max_delay: Duration,
    requests_paced: AtomicU64,
    total_wait_ms: AtomicU64,
}

impl RequestPacer {
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        // An inverted window collapses to the lower bound.
        let max_delay = max_delay.max(min_delay);
        Self {
            min_delay,
            max_delay,
            requests_paced: AtomicU64::new(0),
            total_wait_ms: AtomicU64::new(0),
        }
    }

    pub fn next_delay(&self) -> Duration {
        if self.max_delay <= self.min_delay {
            return self.min_delay;
        }
        rand::thread_rng().gen_range(self.min_delay..=self.max_delay)
    }

    /// Sleeps for a freshly drawn delay and returns it.
    pub async fn wait(&self) -> Duration {
        let delay = self.next_delay();
        tracing::trace!("⏳ Pacing listing request for {:?}", delay);
        time::sleep(delay).await;

        self.requests_paced.fetch_add(1, Ordering::Relaxed);
        self.total_wait_ms
            .fetch_add(delay.as_millis() as u64, Ordering::Relaxed);
        delay
    }

    pub fn requests_paced(&self) -> u64 {
        self.requests_paced.load(Ordering::Relaxed)
    }

    pub fn average_wait(&self) -> Duration {
        let count = self.requests_paced();
        if count == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(self.total_wait_ms.load(Ordering::Relaxed) / count)
        }
    }

    pub fn window(&self) -> (Duration, Duration) {
        (self.min_delay, self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_stay_inside_window() {
        let pacer = RequestPacer::new(Duration::from_millis(200), Duration::from_millis(800));
        for _ in 0..200 {
            let delay = pacer.next_delay();
            assert!(delay >= Duration::from_millis(200));
            assert!(delay <= Duration::from_millis(800));
        }
    }

    #[test]
    fn test_inverted_window_collapses_to_min() {
        let pacer = RequestPacer::new(Duration::from_secs(3), Duration::from_secs(1));
        assert_eq!(pacer.window(), (Duration::from_secs(3), Duration::from_secs(3)));
        assert_eq!(pacer.next_delay(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_sleeps_and_counts() {
        let pacer = RequestPacer::new(Duration::from_secs(2), Duration::from_secs(5));

        let start = time::Instant::now();
        let delay = pacer.wait().await;

        assert!(start.elapsed() >= delay);
        assert!(delay >= Duration::from_secs(2));
        assert_eq!(pacer.requests_paced(), 1);
        assert_eq!(pacer.average_wait(), Duration::from_millis(delay.as_millis() as u64));
    }
}
