//! Request deadlines derived from a rolling latency estimate.
//!
//! Smoothed round-trip time and its variance are tracked the way TCP derives
//! its retransmission timeout: `timeout = srtt + 4 * rttvar`, clamped to the
//! configured bounds.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::domain::{AdaptiveTimeoutConfig, NetworkError};

#[derive(Debug, Default)]
struct RttEstimate {
    srtt_ms: Option<f64>,
    rttvar_ms: f64,
}

/// Rolling latency estimate producing per-operation deadlines.
#[derive(Debug)]
pub struct AdaptiveTimeout {
    config: AdaptiveTimeoutConfig,
    estimate: Mutex<RttEstimate>,
}

impl AdaptiveTimeout {
    pub fn new(config: AdaptiveTimeoutConfig) -> Self {
        Self {
            config,
            estimate: Mutex::new(RttEstimate::default()),
        }
    }

    /// Deadline the next operation would get.
    pub fn current_timeout(&self) -> Duration {
        let estimate = self.estimate.lock();
        let ms = match estimate.srtt_ms {
            None => self.config.initial_timeout_ms as f64,
            Some(srtt) => srtt + 4.0 * estimate.rttvar_ms,
        };
        let clamped = ms.clamp(
            self.config.min_timeout_ms as f64,
            self.config.max_timeout_ms.max(self.config.min_timeout_ms) as f64,
        );
        Duration::from_millis(clamped as u64)
    }

    /// Start a deadline for one operation.
    ///
    /// The returned signal fires when the deadline passes or when `parent`
    /// is cancelled, whichever comes first.
    pub fn signal(&self, parent: &CancellationToken) -> TimeoutSignal {
        TimeoutSignal::new(parent, self.current_timeout())
    }

    /// Feed the elapsed time of a completed operation into the estimate.
    pub fn record_success(&self, signal: &TimeoutSignal) {
        self.sample(signal.elapsed().as_secs_f64() * 1000.0);
    }

    /// Widen the estimate after an operation ran out of time.
    pub fn record_failure(&self, signal: &TimeoutSignal) {
        let penalised = signal.timeout().as_secs_f64() * 1000.0 * self.config.failure_multiplier;
        self.sample(penalised);
    }

    fn sample(&self, rtt_ms: f64) {
        let mut estimate = self.estimate.lock();
        match estimate.srtt_ms {
            None => {
                estimate.srtt_ms = Some(rtt_ms);
                estimate.rttvar_ms = rtt_ms / 2.0;
            }
            Some(srtt) => {
                estimate.rttvar_ms = 0.75 * estimate.rttvar_ms + 0.25 * (srtt - rtt_ms).abs();
                estimate.srtt_ms = Some(0.875 * srtt + 0.125 * rtt_ms);
            }
        }
    }
}

/// Cancellation signal for one operation.
///
/// Cancelled when its deadline passes or its parent token is cancelled.
/// Dropping the signal stops its timer.
#[derive(Debug)]
pub struct TimeoutSignal {
    token: CancellationToken,
    started: Instant,
    deadline: Instant,
    timeout: Duration,
    timer: JoinHandle<()>,
}

impl TimeoutSignal {
    fn new(parent: &CancellationToken, timeout: Duration) -> Self {
        let token = parent.child_token();
        let started = Instant::now();
        let deadline = started + timeout;

        let timer_token = token.clone();
        let timer = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => timer_token.cancel(),
                _ = timer_token.cancelled() => {}
            }
        });

        Self {
            token,
            started,
            deadline,
            timeout,
            timer,
        }
    }

    /// Token cancelled when this signal fires.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Error describing why the signal fired.
    pub fn error(&self) -> NetworkError {
        if self.is_expired() {
            NetworkError::Timeout
        } else {
            NetworkError::Cancelled
        }
    }

    /// Run `fut` until it completes or the signal fires.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, NetworkError> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(self.error()),
            _ = tokio::time::sleep_until(self.deadline) => {
                self.token.cancel();
                Err(NetworkError::Timeout)
            }
            out = fut => Ok(out),
        }
    }
}

impl Drop for TimeoutSignal {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AdaptiveTimeoutConfig {
        AdaptiveTimeoutConfig {
            initial_timeout_ms: 1_000,
            min_timeout_ms: 100,
            max_timeout_ms: 5_000,
            failure_multiplier: 2.0,
        }
    }

    #[test]
    fn test_initial_timeout_before_samples() {
        let timeout = AdaptiveTimeout::new(config());
        assert_eq!(timeout.current_timeout(), Duration::from_millis(1_000));
    }

    #[test]
    fn test_fast_samples_shrink_timeout_to_floor() {
        let timeout = AdaptiveTimeout::new(config());
        for _ in 0..50 {
            timeout.sample(10.0);
        }
        assert_eq!(timeout.current_timeout(), Duration::from_millis(100));
    }

    #[test]
    fn test_slow_samples_clamped_to_ceiling() {
        let timeout = AdaptiveTimeout::new(config());
        timeout.sample(60_000.0);
        assert_eq!(timeout.current_timeout(), Duration::from_millis(5_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_fires_at_deadline() {
        let timeout = AdaptiveTimeout::new(config());
        let parent = CancellationToken::new();
        let signal = timeout.signal(&parent);

        let result = signal.guard(std::future::pending::<()>()).await;

        assert_eq!(result, Err(NetworkError::Timeout));
        assert!(signal.token().is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancellation_reported_as_cancelled() {
        let timeout = AdaptiveTimeout::new(config());
        let parent = CancellationToken::new();
        let signal = timeout.signal(&parent);

        parent.cancel();
        let result = signal.guard(std::future::pending::<()>()).await;

        assert_eq!(result, Err(NetworkError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_widens_timeout() {
        let timeout = AdaptiveTimeout::new(config());
        timeout.sample(200.0);
        let before = timeout.current_timeout();

        let signal = timeout.signal(&CancellationToken::new());
        timeout.record_failure(&signal);

        assert!(timeout.current_timeout() > before);
    }

    #[tokio::test]
    async fn test_guard_passes_through_completed_future() {
        let timeout = AdaptiveTimeout::new(config());
        let signal = timeout.signal(&CancellationToken::new());
        assert_eq!(signal.guard(async { 7 }).await, Ok(7));
        timeout.record_success(&signal);
    }
}
