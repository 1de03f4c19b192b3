use tokio::{sync::Mutex, time};

/// A token bucket limiting the rate of API requests.
///
/// Up to `burst` requests may be issued at once; beyond that, requests are
/// released at `qps` per second.
#[derive(Debug)]
pub struct Throttle {
    qps: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    refilled: time::Instant,
}

impl Throttle {
    /// The slowest rate a limited throttle releases requests at.
    pub const MIN_QPS: f64 = 0.001;

    /// A `qps` of zero or less disables the limit.
    pub fn new(qps: f32, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        let qps = f64::from(qps);
        Self {
            qps: if qps > 0.0 { qps.max(Self::MIN_QPS) } else { 0.0 },
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                refilled: time::Instant::now(),
            }),
        }
    }

    /// Never waits.
    pub fn unlimited() -> Self {
        Self::new(0.0, 1)
    }

    /// Waits until a request may be issued.
    pub async fn acquire(&self) {
        if self.qps <= 0.0 {
            return;
        }

        let mut bucket = self.bucket.lock().await;
        let now = time::Instant::now();
        let elapsed = now.saturating_duration_since(bucket.refilled).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.qps).min(self.burst);
        bucket.refilled = now;

        if bucket.tokens < 1.0 {
            let wait = time::Duration::from_secs_f64((1.0 - bucket.tokens) / self.qps);
            time::sleep(wait).await;
            bucket.tokens = 1.0;
            bucket.refilled = time::Instant::now();
        }
        bucket.tokens -= 1.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn bursts_then_limits() {
        let throttle = Throttle::new(10.0, 3);
        let start = time::Instant::now();
        for _ in 0..3 {
            throttle.acquire().await;
        }
        assert_eq!(start.elapsed(), time::Duration::ZERO);

        throttle.acquire().await;
        let elapsed = start.elapsed();
        assert!(
            elapsed >= time::Duration::from_millis(99) && elapsed <= time::Duration::from_millis(101),
            "{elapsed:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_refill() {
        let throttle = Throttle::new(1.0, 1);
        throttle.acquire().await;

        let mut acquire = tokio_test::task::spawn(throttle.acquire());
        tokio_test::assert_pending!(acquire.poll());

        time::advance(time::Duration::from_millis(500)).await;
        tokio_test::assert_pending!(acquire.poll());

        time::advance(time::Duration::from_millis(500)).await;
        tokio_test::assert_ready!(acquire.poll());
    }

    #[tokio::test(start_paused = true)]
    async fn tiny_rates_are_clamped() {
        let throttle = Throttle::new(f32::MIN_POSITIVE, 1);
        let start = time::Instant::now();
        throttle.acquire().await;
        throttle.acquire().await;
        let elapsed = start.elapsed();
        assert!(
            elapsed >= time::Duration::from_secs(999) && elapsed <= time::Duration::from_secs(1001),
            "{elapsed:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unlimited_never_waits() {
        let throttle = Throttle::unlimited();
        let start = time::Instant::now();
        for _ in 0..1000 {
            throttle.acquire().await;
        }
        assert_eq!(start.elapsed(), time::Duration::ZERO);
    }
}
