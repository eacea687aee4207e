//! Circuit breaker pattern for downstream dependency resilience
//!
//! Prevents cascading failures when a downstream service is degraded or
//! unavailable.
//!
//! # States
//! - **Closed**: Normal operation, requests pass through
//! - **Open**: Service is failing, requests are rejected immediately
//! - **HalfOpen**: Testing if service has recovered
//!
//! The open->half-open transition is lazy: it happens on the next state
//! read after the recovery timeout elapses, not on a background timer.
//! One breaker instance exists per downstream dependency for the process
//! lifetime; concurrent handlers share it, but separate processes do not
//! (this is local best-effort protection, not a distributed breaker).

use anyhow::Result;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use crate::metrics;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - requests pass through
    Closed,
    /// Service is failing - requests rejected immediately
    Open,
    /// Testing recovery - requests allowed, one failure reopens
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Raised when a call is rejected because the circuit is open.
#[derive(Debug, Clone)]
pub struct CircuitOpenError {
    pub service: String,
    pub retry_in: Duration,
}

impl fmt::Display for CircuitOpenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "circuit breaker for '{}' is open, retry in {}s",
            self.service,
            self.retry_in.as_secs()
        )
    }
}

impl std::error::Error for CircuitOpenError {}

/// Internal state tracking
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
}

/// Serializable snapshot for health endpoints and diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub service_name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
}

/// Three-state circuit breaker around a downstream call path.
pub struct CircuitBreaker {
    service_name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(
        service_name: impl Into<String>,
        failure_threshold: u32,
        recovery_timeout: Duration,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            failure_threshold,
            recovery_timeout,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_time: None,
            }),
        }
    }

    /// Current state. Reading is lazy: an open circuit whose recovery
    /// timeout has elapsed transitions to half-open before this returns.
    pub fn state(&self) -> CircuitState {
        let mut state = self.state.lock();
        self.resolve_state(&mut state)
    }

    /// Invoke `op` through the breaker.
    ///
    /// Open circuit -> immediate `CircuitOpenError`, `op` never runs.
    /// Success resets the failure count and closes a half-open circuit.
    /// Failure increments the count and re-raises the original error
    /// unchanged; a half-open circuit reopens on any single failure.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.check_allow()?;

        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(e)
            }
        }
    }

    /// Force the circuit closed and clear the failure count.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.state = CircuitState::Closed;
        state.failure_count = 0;
        state.last_failure_time = None;
        tracing::info!(service = %self.service_name, "circuit breaker reset");
    }

    /// Snapshot of the breaker for serialization.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let mut state = self.state.lock();
        let current = self.resolve_state(&mut state);
        BreakerSnapshot {
            service_name: self.service_name.clone(),
            state: current,
            failure_count: state.failure_count,
            failure_threshold: self.failure_threshold,
            recovery_timeout_secs: self.recovery_timeout.as_secs(),
        }
    }

    /// Lazily resolve open->half-open once the recovery timeout elapses.
    fn resolve_state(&self, state: &mut BreakerState) -> CircuitState {
        if state.state == CircuitState::Open {
            let expired = state
                .last_failure_time
                .map(|t| t.elapsed() >= self.recovery_timeout)
                .unwrap_or(true);
            if expired {
                tracing::info!(
                    service = %self.service_name,
                    "circuit breaker half-open after {:?}",
                    self.recovery_timeout
                );
                state.state = CircuitState::HalfOpen;
                self.record_transition(CircuitState::HalfOpen);
            }
        }
        state.state
    }

    fn check_allow(&self) -> Result<(), CircuitOpenError> {
        let mut state = self.state.lock();
        match self.resolve_state(&mut state) {
            CircuitState::Open => {
                let retry_in = state
                    .last_failure_time
                    .map(|t| self.recovery_timeout.saturating_sub(t.elapsed()))
                    .unwrap_or(self.recovery_timeout);
                metrics::BREAKER_REJECTIONS_TOTAL
                    .with_label_values(&[self.service_name.as_str()])
                    .inc();
                Err(CircuitOpenError {
                    service: self.service_name.clone(),
                    retry_in,
                })
            }
            _ => Ok(()),
        }
    }

    fn record_success(&self) {
        let mut state = self.state.lock();
        state.failure_count = 0;
        if state.state != CircuitState::Closed {
            tracing::info!(service = %self.service_name, "circuit breaker closing after success");
            state.state = CircuitState::Closed;
            self.record_transition(CircuitState::Closed);
        }
    }

    fn record_failure(&self) {
        let mut state = self.state.lock();
        state.failure_count += 1;
        state.last_failure_time = Some(Instant::now());

        match state.state {
            CircuitState::HalfOpen => {
                // A single failure while probing reopens, threshold ignored
                tracing::warn!(
                    service = %self.service_name,
                    "circuit breaker reopening after failure in half-open state"
                );
                state.state = CircuitState::Open;
                self.record_transition(CircuitState::Open);
            }
            CircuitState::Closed if state.failure_count >= self.failure_threshold => {
                tracing::warn!(
                    service = %self.service_name,
                    "circuit breaker opening after {} consecutive failures",
                    state.failure_count
                );
                state.state = CircuitState::Open;
                self.record_transition(CircuitState::Open);
            }
            _ => {}
        }
    }

    fn record_transition(&self, new_state: CircuitState) {
        metrics::BREAKER_TRANSITIONS_TOTAL
            .with_label_values(&[self.service_name.as_str(), &new_state.to_string()])
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(threshold: u32, recovery: Duration) -> CircuitBreaker {
        CircuitBreaker::new("test-service", threshold, recovery)
    }

    async fn fail(b: &CircuitBreaker) {
        let result: Result<()> = b.call(|| async { Err(anyhow!("downstream boom")) }).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_starts_closed() {
        let b = breaker(3, Duration::from_secs(60));
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_rejects_without_invoking() {
        let b = breaker(3, Duration::from_secs(60));
        for _ in 0..3 {
            fail(&b).await;
        }
        assert_eq!(b.state(), CircuitState::Open);

        let invoked = AtomicU32::new(0);
        let result: Result<()> = b
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.downcast_ref::<CircuitOpenError>().is_some());
        assert!(err.to_string().contains("test-service"));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_below_threshold_stays_closed() {
        let b = breaker(3, Duration::from_secs(60));
        fail(&b).await;
        fail(&b).await;
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let b = breaker(3, Duration::from_secs(60));
        fail(&b).await;
        fail(&b).await;
        b.call(|| async { Ok(()) }).await.unwrap();
        // The count restarted, so two more failures do not open the circuit
        fail(&b).await;
        fail(&b).await;
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_recovery_timeout_half_opens() {
        let b = breaker(1, Duration::from_millis(20));
        fail(&b).await;
        assert_eq!(b.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(b.state(), CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn test_half_open_success_closes() {
        let b = breaker(1, Duration::from_millis(20));
        fail(&b).await;
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(b.state(), CircuitState::HalfOpen);

        b.call(|| async { Ok(()) }).await.unwrap();
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let b = breaker(5, Duration::from_millis(20));
        for _ in 0..5 {
            fail(&b).await;
        }
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(b.state(), CircuitState::HalfOpen);

        // One failure reopens even though the threshold is 5
        fail(&b).await;
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_error_passes_through_unchanged() {
        let b = breaker(5, Duration::from_secs(60));
        let result: Result<()> = b.call(|| async { Err(anyhow!("downstream boom")) }).await;
        assert_eq!(result.unwrap_err().to_string(), "downstream boom");
    }

    #[tokio::test]
    async fn test_reset_forces_closed() {
        let b = breaker(1, Duration::from_secs(60));
        fail(&b).await;
        assert_eq!(b.state(), CircuitState::Open);

        b.reset();
        assert_eq!(b.state(), CircuitState::Closed);
        b.call(|| async { Ok(()) }).await.unwrap();
    }

    #[tokio::test]
    async fn test_snapshot() {
        let b = breaker(4, Duration::from_secs(30));
        fail(&b).await;
        let snapshot = b.snapshot();
        assert_eq!(snapshot.service_name, "test-service");
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.failure_count, 1);
        assert_eq!(snapshot.failure_threshold, 4);
        assert_eq!(snapshot.recovery_timeout_secs, 30);
    }
}
