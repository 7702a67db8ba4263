//! Circuit breaker guarding the payout dispatcher. Repeated provider
//! failures open the circuit; after the reset timeout one probe request is
//! let through and a success closes it again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct CircuitBreaker {
    failure_count: Arc<AtomicU64>,
    last_failure_time: Arc<RwLock<Option<Instant>>>,
    state: Arc<RwLock<CircuitState>>,
    failure_threshold: u64,
    reset_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u64, reset_timeout_seconds: u64) -> Self {
        Self {
            failure_count: Arc::new(AtomicU64::new(0)),
            last_failure_time: Arc::new(RwLock::new(None)),
            state: Arc::new(RwLock::new(CircuitState::Closed)),
            failure_threshold,
            reset_timeout: Duration::from_secs(reset_timeout_seconds),
        }
    }

    /// True when a request may proceed. An open circuit flips to half-open
    /// once the reset timeout has elapsed, admitting one probe.
    pub async fn allow_request(&self) -> bool {
        {
            let state = self.state.read().await;
            if *state != CircuitState::Open {
                return true;
            }
        }

        let elapsed = {
            let last_failure = self.last_failure_time.read().await;
            last_failure.map(|t| t.elapsed())
        };
        match elapsed {
            Some(elapsed) if elapsed > self.reset_timeout => {
                let mut state = self.state.write().await;
                if *state == CircuitState::Open {
                    *state = CircuitState::HalfOpen;
                    tracing::info!("Circuit breaker transitioning to HalfOpen");
                }
                true
            }
            _ => false,
        }
    }

    pub async fn record_success(&self) {
        self.failure_count.store(0, Ordering::SeqCst);
        let mut state = self.state.write().await;
        if *state != CircuitState::Closed {
            *state = CircuitState::Closed;
            tracing::info!("Circuit breaker closed after successful operation");
        }
    }

    pub async fn record_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut last_failure = self.last_failure_time.write().await;
            *last_failure = Some(Instant::now());
        }

        if failures >= self.failure_threshold {
            let mut state = self.state.write().await;
            if *state != CircuitState::Open {
                *state = CircuitState::Open;
                tracing::warn!("Circuit breaker opened after {} failures", failures);
                metrics::counter!("circuit_breaker_opens_total").increment(1);
            }
        }
    }

    pub async fn is_open(&self) -> bool {
        let state = self.state.read().await;
        *state == CircuitState::Open
    }

    pub async fn state(&self) -> CircuitState {
        *self.state.read().await
    }
}
