//! Circuit breaker — fail-fast gate for unreliable downstream dependencies.
//!
//! One breaker instance is shared by the render and dispatch calls, so
//! consecutive failures of either dependency count against the same budget.
//! The breaker protects the dependency, not the job: failures of unrelated
//! jobs accumulate together.
//!
//! State is process-local. In a multi-process deployment each process trips
//! its own breaker independently.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::DeliveryError;

/// Breaker states.
///
/// - `Closed`: calls pass through; consecutive failures are counted.
/// - `Open`: calls fail immediately without invoking the dependency until
///   the reset timeout elapses.
/// - `HalfOpen`: exactly one trial call is in flight; its outcome decides
///   the next state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Process-local circuit breaker wrapping arbitrary async calls.
pub struct CircuitBreaker {
    fail_max: u32,
    reset_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(fail_max: u32, reset_timeout: Duration) -> Self {
        Self {
            fail_max,
            reset_timeout,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Current state, for observability. Does not advance Open → HalfOpen;
    /// only an admitted call does that.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().expect("breaker lock poisoned").state
    }

    /// Run `op` through the breaker.
    ///
    /// Returns `DeliveryError::CircuitOpen` without invoking `op` while the
    /// circuit is open or a half-open trial is already in flight. Otherwise
    /// the call's outcome feeds the state machine.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, DeliveryError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, DeliveryError>>,
    {
        self.try_acquire()?;

        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }

    fn try_acquire(&self) -> Result<(), DeliveryError> {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.reset_timeout {
                    inner.state = CircuitState::HalfOpen;
                    tracing::info!("Circuit half-open, admitting trial call");
                    Ok(())
                } else {
                    Err(DeliveryError::CircuitOpen)
                }
            }
            // Trial call already in flight
            CircuitState::HalfOpen => Err(DeliveryError::CircuitOpen),
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                tracing::info!("Circuit closed");
            }
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            // A call admitted while closed can conclude after the breaker
            // opened; closing here would skip the reset timeout.
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                tracing::warn!("Trial call failed, circuit re-opened");
            }
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.fail_max {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    tracing::warn!(
                        failures = inner.consecutive_failures,
                        "Failure threshold reached, circuit opened"
                    );
                }
            }
            // A call admitted while closed can conclude after the breaker
            // opened; the count is already past the threshold.
            CircuitState::Open => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fail() -> Result<(), DeliveryError> {
        Err(DeliveryError::Transient("downstream unavailable".into()))
    }

    async fn trip(breaker: &CircuitBreaker, failures: u32) {
        for _ in 0..failures {
            let _ = breaker.call(|| async { fail() }).await;
        }
    }

    #[tokio::test]
    async fn test_opens_after_fail_max_consecutive_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        trip(&breaker, 2).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
        trip(&breaker, 1).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        // Open circuit rejects without invoking the operation
        let invoked = AtomicU32::new(0);
        let result = breaker
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<_, DeliveryError>(())
            })
            .await;
        assert!(matches!(result, Err(DeliveryError::CircuitOpen)));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        trip(&breaker, 2).await;
        breaker
            .call(|| async { Ok::<_, DeliveryError>(()) })
            .await
            .unwrap();
        // Two more failures don't reach the threshold again
        trip(&breaker, 2).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_trial_success_closes() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(20));
        trip(&breaker, 1).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        // Before the reset timeout: still rejecting
        assert!(matches!(
            breaker.call(|| async { Ok::<_, DeliveryError>(()) }).await,
            Err(DeliveryError::CircuitOpen)
        ));

        tokio::time::sleep(Duration::from_millis(30)).await;
        breaker
            .call(|| async { Ok::<_, DeliveryError>(()) })
            .await
            .unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_trial_failure_restarts_timeout() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(20));
        trip(&breaker, 1).await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        let _ = breaker.call(|| async { fail() }).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        // Timeout restarted: immediate call still rejected
        assert!(matches!(
            breaker.call(|| async { Ok::<_, DeliveryError>(()) }).await,
            Err(DeliveryError::CircuitOpen)
        ));

        // After another full timeout the next trial may close it
        tokio::time::sleep(Duration::from_millis(30)).await;
        breaker
            .call(|| async { Ok::<_, DeliveryError>(()) })
            .await
            .unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_admits_exactly_one_trial() {
        let breaker = Arc::new(CircuitBreaker::new(1, Duration::from_millis(10)));
        trip(&breaker, 1).await;
        tokio::time::sleep(Duration::from_millis(15)).await;

        let trial_breaker = Arc::clone(&breaker);
        let trial = tokio::spawn(async move {
            trial_breaker
                .call(|| async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, DeliveryError>(())
                })
                .await
        });

        // While the trial is in flight, concurrent callers are rejected
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(matches!(
            breaker.call(|| async { Ok::<_, DeliveryError>(()) }).await,
            Err(DeliveryError::CircuitOpen)
        ));

        trial.await.unwrap().unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_late_success_does_not_close_open_circuit() {
        let breaker = Arc::new(CircuitBreaker::new(1, Duration::from_secs(60)));

        // A slow call admitted while the circuit is still closed
        let slow_breaker = Arc::clone(&breaker);
        let slow = tokio::spawn(async move {
            slow_breaker
                .call(|| async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, DeliveryError>(())
                })
                .await
        });

        // The breaker opens while the slow call is in flight
        tokio::time::sleep(Duration::from_millis(10)).await;
        trip(&breaker, 1).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        // Its late success must not short the reset timeout
        slow.await.unwrap().unwrap();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(matches!(
            breaker.call(|| async { Ok::<_, DeliveryError>(()) }).await,
            Err(DeliveryError::CircuitOpen)
        ));
    }
}
