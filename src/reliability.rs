//! Reliability primitives: the per-adapter circuit breaker and its
//! transition metrics.

use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Circuit breaker state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Tunable parameters for the circuit breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before the breaker opens.
    pub failure_threshold: u32,
    /// Failures older than this no longer count toward the threshold.
    pub failure_window_ms: u64,
    /// Time to wait in the open state before allowing a probe call.
    pub open_wait_ms: u64,
    /// Factor applied to the open wait each time a probe fails.
    pub backoff_multiplier: f64,
    /// Upper bound for the open wait after repeated reopens.
    pub max_open_wait_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window_ms: 60_000,
            open_wait_ms: 10_000,
            backoff_multiplier: 2.0,
            max_open_wait_ms: 300_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(GatewayError::Config(
                "Circuit breaker failure_threshold must be greater than 0".to_string(),
            ));
        }
        if self.failure_window_ms == 0 || self.open_wait_ms == 0 {
            return Err(GatewayError::Config(
                "Circuit breaker windows must be greater than 0".to_string(),
            ));
        }
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier < 1.0 {
            return Err(GatewayError::Config(
                "Circuit breaker backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        if self.max_open_wait_ms < self.open_wait_ms {
            return Err(GatewayError::Config(
                "Circuit breaker max_open_wait_ms must not be below open_wait_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Open duration after `reopens` consecutive failed probes.
    fn open_wait(&self, reopens: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(reopens.min(32) as i32);
        let ms = (self.open_wait_ms as f64 * factor).min(self.max_open_wait_ms as f64);
        Duration::from_millis(ms as u64)
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    /// Counted failures in the current window (Closed) or since opening.
    pub failure_count: u32,
    /// Successes since the last transition.
    pub success_count: u32,
    pub last_transition_at: Instant,
    /// When an open breaker will admit a probe.
    pub open_until: Option<Instant>,
}

/// Releases the half-open probe slot when the probe call finishes or its
/// future is dropped.
struct ProbeSlot<'a> {
    breaker: &'a CircuitBreaker,
    held: bool,
}

impl ProbeSlot<'_> {
    fn release(&mut self, inner: &mut Inner) {
        if self.held {
            inner.half_open_probe_in_flight = false;
            self.held = false;
        }
    }
}

impl Drop for ProbeSlot<'_> {
    fn drop(&mut self) {
        if self.held {
            tracing::debug!(adapter = %self.breaker.adapter_id, "Half-open probe abandoned");
            self.breaker.lock().half_open_probe_in_flight = false;
        }
    }
}

struct Inner {
    state: CircuitState,
    failures: u32,
    successes: u32,
    window_start: Instant,
    last_transition_at: Instant,
    open_until: Option<Instant>,
    reopens: u32,
    half_open_probe_in_flight: bool,
}

/// Thread-safe circuit breaker for one adapter.
///
/// State transitions: **Closed** -> (threshold consecutive failures within
/// the window) -> **Open** -> (open wait elapsed) -> **HalfOpen** -> (probe
/// succeeds) -> **Closed**, or (probe fails) -> **Open** with a longer wait.
pub struct CircuitBreaker {
    adapter_id: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a closed breaker for `adapter_id`.
    pub fn new(adapter_id: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let now = Instant::now();
        Self {
            adapter_id: adapter_id.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                window_start: now,
                last_transition_at: now,
                open_until: None,
                reopens: 0,
                half_open_probe_in_flight: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        CircuitSnapshot {
            state: inner.state,
            failure_count: inner.failures,
            success_count: inner.successes,
            last_transition_at: inner.last_transition_at,
            open_until: inner.open_until,
        }
    }

    /// Current state, reporting an expired open breaker as half-open.
    pub fn state(&self) -> CircuitState {
        let inner = self.lock();
        match (inner.state, inner.open_until) {
            (CircuitState::Open, Some(until)) if Instant::now() >= until => CircuitState::HalfOpen,
            (state, _) => state,
        }
    }

    /// Whether a call issued now could reach the adapter.
    pub fn allows_traffic(&self) -> bool {
        self.state() != CircuitState::Open
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        inner.last_transition_at = Instant::now();
        inner.successes = 0;

        match to {
            CircuitState::Open => tracing::warn!(
                adapter = %self.adapter_id,
                failures = inner.failures,
                reopens = inner.reopens,
                "Circuit opened"
            ),
            _ => tracing::info!(adapter = %self.adapter_id, from = %from, to = %to, "Circuit transition"),
        }

        metrics::counter!(
            "gateway_circuit.transitions",
            "adapter" => self.adapter_id.clone(),
            "from" => from.to_string(),
            "to" => to.to_string()
        )
        .increment(1);
    }

    fn open(&self, inner: &mut Inner, now: Instant) {
        inner.open_until = Some(now + self.config.open_wait(inner.reopens));
        self.transition(inner, CircuitState::Open);
    }

    /// Execute `f` through the breaker.
    ///
    /// Returns [`GatewayError::CircuitOpen`] immediately while open, without
    /// calling `f`. In the half-open state only a single probe call is
    /// allowed; concurrent callers are rejected until the probe completes or
    /// is dropped.
    /// Only errors for which [`GatewayError::counts_toward_breaker`] holds are
    /// recorded as failures.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let is_probe_call;

        // 1. Check state
        {
            let mut inner = self.lock();
            let now = Instant::now();
            let state = inner.state;
            let open_until = inner.open_until;
            match state {
                CircuitState::Open => match open_until {
                    Some(until) if now < until => {
                        return Err(self.rejection(until - now));
                    }
                    _ => self.transition(&mut inner, CircuitState::HalfOpen),
                },
                CircuitState::HalfOpen => {
                    if inner.half_open_probe_in_flight {
                        return Err(self.rejection(Duration::ZERO));
                    }
                }
                CircuitState::Closed => {}
            }
            is_probe_call = inner.state == CircuitState::HalfOpen;
            if is_probe_call {
                inner.half_open_probe_in_flight = true;
            }
        }

        let mut slot = ProbeSlot {
            breaker: self,
            held: is_probe_call,
        };

        // 2. Execute
        let result = f().await;

        // 3. Update state
        let mut inner = self.lock();
        let now = Instant::now();
        slot.release(&mut inner);
        match &result {
            Ok(_) => {
                if is_probe_call {
                    inner.failures = 0;
                    inner.reopens = 0;
                    inner.open_until = None;
                    inner.window_start = now;
                    self.transition(&mut inner, CircuitState::Closed);
                } else if inner.state == CircuitState::Closed {
                    inner.failures = 0;
                }
                inner.successes = inner.successes.saturating_add(1);
            }
            Err(e) if e.counts_toward_breaker() => {
                if inner.state == CircuitState::Closed
                    && now.duration_since(inner.window_start)
                        >= Duration::from_millis(self.config.failure_window_ms)
                {
                    inner.failures = 0;
                }
                if inner.failures == 0 {
                    inner.window_start = now;
                }
                inner.failures = inner.failures.saturating_add(1);

                if is_probe_call {
                    inner.reopens = inner.reopens.saturating_add(1);
                    self.open(&mut inner, now);
                } else if inner.state == CircuitState::Closed
                    && inner.failures >= self.config.failure_threshold
                {
                    self.open(&mut inner, now);
                }
            }
            // Not the adapter's fault; a half-open breaker stays half-open
            // and admits the next probe.
            Err(_) => {}
        }
        result
    }

    fn rejection(&self, retry_after: Duration) -> GatewayError {
        GatewayError::CircuitOpen {
            adapter_id: self.adapter_id.clone(),
            retry_after,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InvocationError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn backend_failure() -> GatewayError {
        GatewayError::Invocation {
            adapter_id: "a".into(),
            source: InvocationError::Inference("fail".into()),
        }
    }

    fn fast_config(threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            failure_window_ms: 60_000,
            open_wait_ms: 100,
            backoff_multiplier: 2.0,
            max_open_wait_ms: 1_000,
        }
    }

    #[tokio::test]
    async fn test_circuit_breaker_transitions() {
        let cb = CircuitBreaker::new("a", fast_config(2));
        let counter = Arc::new(AtomicU32::new(0));

        // 1. Success calls - state remains Closed
        let res = cb.call(|| async { Ok::<_, GatewayError>(()) }).await;
        assert!(res.is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);

        // 2. Failures - state transitions to Open
        let _ = cb.call(|| async { Err::<(), _>(backend_failure()) }).await;
        assert_eq!(cb.state(), CircuitState::Closed);
        let _ = cb.call(|| async { Err::<(), _>(backend_failure()) }).await;
        assert_eq!(cb.snapshot().state, CircuitState::Open);

        // 3. Open state - calls rejected immediately
        let res = cb
            .call(|| async {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(res, Err(GatewayError::CircuitOpen { .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        // 4. Wait for HalfOpen
        tokio::time::sleep(Duration::from_millis(130)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // 5. HalfOpen probe fails - back to Open with a doubled wait
        let _ = cb.call(|| async { Err::<(), _>(backend_failure()) }).await;
        let snapshot = cb.snapshot();
        assert_eq!(snapshot.state, CircuitState::Open);
        let wait = snapshot.open_until.unwrap() - snapshot.last_transition_at;
        assert!(wait >= Duration::from_millis(190), "wait was {wait:?}");

        let res = cb.call(|| async { Ok(()) }).await;
        assert!(matches!(res, Err(GatewayError::CircuitOpen { .. })));

        // 6. Wait again for HalfOpen
        tokio::time::sleep(Duration::from_millis(230)).await;

        // 7. Success - transition to Closed
        let res = cb.call(|| async { Ok(()) }).await;
        assert!(res.is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().failure_count, 0);
    }

    #[tokio::test]
    async fn test_half_open_allows_single_probe() {
        let cb = Arc::new(CircuitBreaker::new("a", fast_config(1)));

        let _ = cb.call(|| async { Err::<(), _>(backend_failure()) }).await;
        tokio::time::sleep(Duration::from_millis(130)).await;

        let started = Arc::new(AtomicU32::new(0));
        let cb_probe = cb.clone();
        let started_probe = started.clone();
        let probe = tokio::spawn(async move {
            cb_probe
                .call(|| async move {
                    started_probe.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(150)).await;
                    Ok::<_, GatewayError>(())
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = cb.call(|| async { Ok::<_, GatewayError>(()) }).await;
        assert!(matches!(second, Err(GatewayError::CircuitOpen { .. })));

        assert!(probe.await.unwrap().is_ok());
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn dropped_half_open_probe_frees_the_slot() {
        let cb = CircuitBreaker::new("a", fast_config(1));
        let _ = cb.call(|| async { Err::<(), _>(backend_failure()) }).await;
        tokio::time::sleep(Duration::from_millis(130)).await;

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            cb.call(|| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok::<_, GatewayError>(())
            }),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let calls = AtomicU32::new(0);
        let res = cb
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, GatewayError>(())
            })
            .await;
        assert!(res.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn caller_errors_do_not_open_the_breaker() {
        let cb = CircuitBreaker::new("a", fast_config(1));
        let res = cb
            .call(|| async {
                Err::<(), _>(GatewayError::Invocation {
                    adapter_id: "a".into(),
                    source: InvocationError::InvalidRequest("empty prompt".into()),
                })
            })
            .await;
        assert!(res.is_err());
        let _ = cb.call(|| async { Err::<(), _>(GatewayError::Cancelled) }).await;
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().failure_count, 0);
    }

    #[tokio::test]
    async fn success_resets_consecutive_failures() {
        let cb = CircuitBreaker::new("a", fast_config(2));
        let _ = cb.call(|| async { Err::<(), _>(backend_failure()) }).await;
        let _ = cb.call(|| async { Ok::<_, GatewayError>(()) }).await;
        let _ = cb.call(|| async { Err::<(), _>(backend_failure()) }).await;
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn failures_outside_window_are_forgotten() {
        let mut config = fast_config(2);
        config.failure_window_ms = 50;
        let cb = CircuitBreaker::new("a", config);
        let _ = cb.call(|| async { Err::<(), _>(backend_failure()) }).await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        let _ = cb.call(|| async { Err::<(), _>(backend_failure()) }).await;
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().failure_count, 1);
    }

    #[test]
    fn open_wait_backoff_is_capped() {
        let config = fast_config(1);
        assert_eq!(config.open_wait(0), Duration::from_millis(100));
        assert_eq!(config.open_wait(1), Duration::from_millis(200));
        assert_eq!(config.open_wait(10), Duration::from_millis(1_000));
    }

    #[test]
    fn config_validation_rejects_zero_threshold() {
        let config = CircuitBreakerConfig {
            failure_threshold: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(CircuitBreakerConfig::default().validate().is_ok());
    }
}
