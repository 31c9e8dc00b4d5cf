//! Circuit breaker for outbound vendor calls.
//!
//! Protects the platform from cascading failures when a third-party service
//! (telephony, transcription, speech synthesis) degrades: failures are
//! counted per vendor, and once the error rate crosses a threshold the
//! breaker fails fast instead of letting callers pile up on a dead
//! endpoint. Recovery is probed with trial calls after a cooldown.
//!
//! The breaker never retries; its only decisions are "attempt or fail
//! fast" and the state transition. Retry policy belongs to the caller.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - calls proceed.
    #[default]
    Closed,
    /// Circuit tripped - calls rejected immediately.
    Open,
    /// Testing recovery - trial calls allowed.
    HalfOpen,
}

impl CircuitState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Per-call timeout; a call exceeding it counts as a failure.
    pub timeout_ms: u64,
    /// Failure percentage (0-100) at which the circuit opens.
    pub error_threshold_percentage: u8,
    /// Duration the circuit stays open before allowing a trial call.
    pub reset_timeout_ms: u64,
    /// Minimum sampled calls before the breaker is allowed to open.
    pub volume_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            error_threshold_percentage: 50,
            reset_timeout_ms: 30_000,
            volume_threshold: 10,
        }
    }
}

impl CircuitBreakerConfig {
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    #[must_use]
    pub fn with_error_threshold_percentage(mut self, pct: u8) -> Self {
        self.error_threshold_percentage = pct;
        self
    }

    #[must_use]
    pub fn with_reset_timeout_ms(mut self, reset_timeout_ms: u64) -> Self {
        self.reset_timeout_ms = reset_timeout_ms;
        self
    }

    #[must_use]
    pub fn with_volume_threshold(mut self, volume_threshold: u32) -> Self {
        self.volume_threshold = volume_threshold;
        self
    }
}

/// Call counters and state for one breaker.
///
/// Owned exclusively by its breaker; process-local and never persisted, so
/// a restart starts every vendor in `Closed` with zeroed counters.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitMetrics {
    pub state: CircuitState,
    pub success_count: u32,
    pub failure_count: u32,
    pub total_count: u32,
    /// Reset to 0 on any success.
    pub consecutive_failures: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    pub state_changed_at: DateTime<Utc>,
}

impl CircuitMetrics {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            success_count: 0,
            failure_count: 0,
            total_count: 0,
            consecutive_failures: 0,
            last_failure_time: None,
            last_success_time: None,
            state_changed_at: Utc::now(),
        }
    }

    /// Failure percentage over the calls sampled since the last reset.
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        if self.total_count == 0 {
            return 0.0;
        }
        f64::from(self.failure_count) / f64::from(self.total_count) * 100.0
    }

    fn reset_counters(&mut self) {
        self.success_count = 0;
        self.failure_count = 0;
        self.total_count = 0;
        self.consecutive_failures = 0;
    }
}

/// Error surfaced by [`CircuitBreaker::execute`].
///
/// `Inner` re-surfaces the operation's own error verbatim so callers still
/// see provider-specific detail alongside the breaker's verdict.
#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    #[error("{code}: {vendor} unavailable, next attempt allowed in {reset_in_seconds}s")]
    Open {
        vendor: String,
        code: String,
        reset_in_seconds: u64,
    },

    #[error("{vendor} call timed out after {timeout_ms}ms")]
    Timeout { vendor: String, timeout_ms: u64 },

    #[error(transparent)]
    Inner(E),
}

impl<E> CircuitError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Whether the caller may reasonably retry its higher-level operation.
    ///
    /// Fast failures and timeouts are transient by construction; for
    /// `Inner` errors the caller must judge from the provider error itself.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Open { .. } | Self::Timeout { .. })
    }
}

/// Per-vendor circuit breaker wrapping asynchronous calls.
pub struct CircuitBreaker {
    vendor: String,
    config: CircuitBreakerConfig,
    metrics: Mutex<CircuitMetrics>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(vendor: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            vendor: vendor.into(),
            config,
            metrics: Mutex::new(CircuitMetrics::new()),
        }
    }

    /// The vendor this breaker protects.
    #[must_use]
    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    /// Snapshot of the current metrics.
    #[must_use]
    pub fn metrics(&self) -> CircuitMetrics {
        self.metrics.lock().expect("metrics lock poisoned").clone()
    }

    /// Execute an operation through the breaker.
    ///
    /// The operation is raced against `timeout_ms`; a timeout counts as a
    /// failure and the in-flight call is cancelled. Every outcome updates
    /// metrics before being reported. When the circuit is open the
    /// operation is not invoked at all and a fast failure carrying the
    /// vendor's error code and the estimated wait is returned instead.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        if let Some(reset_in_seconds) = self.check_gate() {
            return Err(CircuitError::Open {
                vendor: self.vendor.clone(),
                code: self.open_error_code(),
                reset_in_seconds,
            });
        }

        let timeout = std::time::Duration::from_millis(self.config.timeout_ms);
        match tokio::time::timeout(timeout, operation()).await {
            Ok(Ok(value)) => {
                self.on_success();
                Ok(value)
            }
            Ok(Err(error)) => {
                self.on_failure();
                Err(CircuitError::Inner(error))
            }
            Err(_) => {
                self.on_failure();
                Err(CircuitError::Timeout {
                    vendor: self.vendor.clone(),
                    timeout_ms: self.config.timeout_ms,
                })
            }
        }
    }

    /// Error code for fast failures, e.g. `TWILIO_CIRCUIT_OPEN`.
    fn open_error_code(&self) -> String {
        let vendor: String = self
            .vendor
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{vendor}_CIRCUIT_OPEN")
    }

    /// Decide whether the call may proceed, handling the open-to-half-open
    /// transition on entry.
    ///
    /// Returns `Some(reset_in_seconds)` when the call must fail fast. The
    /// elapsed-time check on entry replaces a background reset timer, so no
    /// timer can dangle across restarts.
    fn check_gate(&self) -> Option<u64> {
        let mut metrics = self.metrics.lock().expect("metrics lock poisoned");

        match metrics.state {
            CircuitState::Closed | CircuitState::HalfOpen => None,
            CircuitState::Open => {
                let elapsed_ms = Utc::now()
                    .signed_duration_since(metrics.state_changed_at)
                    .num_milliseconds()
                    .max(0) as u64;

                if elapsed_ms >= self.config.reset_timeout_ms {
                    metrics.state = CircuitState::HalfOpen;
                    metrics.state_changed_at = Utc::now();
                    tracing::info!(
                        target: "circuit_breaker",
                        vendor = %self.vendor,
                        "Circuit breaker transitioning to half-open for trial call"
                    );
                    None
                } else {
                    let remaining_ms = self.config.reset_timeout_ms - elapsed_ms;
                    Some(remaining_ms.div_ceil(1000))
                }
            }
        }
    }

    fn on_success(&self) {
        let mut metrics = self.metrics.lock().expect("metrics lock poisoned");
        metrics.last_success_time = Some(Utc::now());

        match metrics.state {
            CircuitState::HalfOpen => {
                // Successful trial - close and start a fresh sample window.
                metrics.state = CircuitState::Closed;
                metrics.state_changed_at = Utc::now();
                metrics.reset_counters();
                tracing::info!(
                    target: "circuit_breaker",
                    vendor = %self.vendor,
                    "Circuit breaker closed after successful trial call"
                );
            }
            CircuitState::Closed => {
                metrics.success_count += 1;
                metrics.total_count += 1;
                metrics.consecutive_failures = 0;
            }
            CircuitState::Open => {
                // An in-flight call completed after the circuit opened.
                metrics.success_count += 1;
                metrics.total_count += 1;
                metrics.consecutive_failures = 0;
                tracing::warn!(
                    target: "circuit_breaker",
                    vendor = %self.vendor,
                    "Success recorded while circuit is open"
                );
            }
        }
    }

    fn on_failure(&self) {
        let mut metrics = self.metrics.lock().expect("metrics lock poisoned");
        metrics.failure_count += 1;
        metrics.total_count += 1;
        metrics.consecutive_failures += 1;
        metrics.last_failure_time = Some(Utc::now());

        match metrics.state {
            CircuitState::Closed => {
                let volume_reached = metrics.total_count >= self.config.volume_threshold;
                let threshold_crossed =
                    metrics.error_rate() >= f64::from(self.config.error_threshold_percentage);

                if volume_reached && threshold_crossed {
                    metrics.state = CircuitState::Open;
                    metrics.state_changed_at = Utc::now();
                    tracing::error!(
                        target: "circuit_breaker",
                        vendor = %self.vendor,
                        error_rate = metrics.error_rate(),
                        total_count = metrics.total_count,
                        threshold = self.config.error_threshold_percentage,
                        "Circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                // Failed trial - back to open, cooldown restarts.
                metrics.state = CircuitState::Open;
                metrics.state_changed_at = Utc::now();
                tracing::error!(
                    target: "circuit_breaker",
                    vendor = %self.vendor,
                    "Circuit breaker reopened after failed trial call"
                );
            }
            CircuitState::Open => {
                // In-flight call failing after the circuit opened.
            }
        }
    }
}

/// Health snapshot for one vendor, for dashboards and alerting.
#[derive(Debug, Clone, Serialize)]
pub struct VendorHealth {
    pub healthy: bool,
    pub state: CircuitState,
    pub error_rate: f64,
    pub consecutive_failures: u32,
}

/// Process-wide factory handing out one breaker per vendor.
#[derive(Clone)]
pub struct CircuitBreakerRegistry {
    breakers: Arc<RwLock<HashMap<String, Arc<CircuitBreaker>>>>,
    defaults: CircuitBreakerConfig,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreakerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::with_defaults(CircuitBreakerConfig::default())
    }

    /// Create a registry whose breakers default to the given configuration.
    #[must_use]
    pub fn with_defaults(defaults: CircuitBreakerConfig) -> Self {
        Self {
            breakers: Arc::new(RwLock::new(HashMap::new())),
            defaults,
        }
    }

    /// Get or create the breaker for a vendor.
    ///
    /// Idempotent per vendor name for the lifetime of the process;
    /// `overrides` only apply when the breaker is first constructed.
    pub async fn get_breaker(
        &self,
        vendor: &str,
        overrides: Option<CircuitBreakerConfig>,
    ) -> Arc<CircuitBreaker> {
        {
            let breakers = self.breakers.read().await;
            if let Some(breaker) = breakers.get(vendor) {
                return Arc::clone(breaker);
            }
        }

        let mut breakers = self.breakers.write().await;

        // Double-check after acquiring the write lock.
        if let Some(breaker) = breakers.get(vendor) {
            return Arc::clone(breaker);
        }

        let config = overrides.unwrap_or_else(|| self.defaults.clone());
        let breaker = Arc::new(CircuitBreaker::new(vendor, config));
        breakers.insert(vendor.to_string(), Arc::clone(&breaker));
        breaker
    }

    /// Snapshot of every registered vendor's health.
    pub async fn health_statuses(&self) -> HashMap<String, VendorHealth> {
        let breakers = self.breakers.read().await;

        breakers
            .iter()
            .map(|(vendor, breaker)| {
                let metrics = breaker.metrics();
                (
                    vendor.clone(),
                    VendorHealth {
                        healthy: metrics.state == CircuitState::Closed,
                        state: metrics.state,
                        error_rate: metrics.error_rate(),
                        consecutive_failures: metrics.consecutive_failures,
                    },
                )
            })
            .collect()
    }
}
