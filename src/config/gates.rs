//! Scheduler and gate configuration structures.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable naming the JSON configuration file read by
/// [`GatesConfig::from_env`].
pub const CONFIG_PATH_ENV: &str = "PROMETHEUS_GATES_CONFIG";

fn default_max_concurrency() -> usize {
    num_cpus::get()
}

/// Bounded-concurrency scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of tasks executing at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Admit queued tasks by priority instead of plain submission order.
    #[serde(default)]
    pub priority_enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            priority_enabled: false,
        }
    }
}

impl SchedulerConfig {
    /// Configuration with one slot per CPU and FIFO admission.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the concurrency bound.
    #[must_use]
    pub const fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Enable or disable priority admission.
    #[must_use]
    pub const fn with_priority(mut self, enabled: bool) -> Self {
        self.priority_enabled = enabled;
        self
    }

    /// Validate scheduler configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrency == 0 {
            return Err("max_concurrency must be greater than 0".into());
        }
        Ok(())
    }
}

/// Counting semaphore configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemaphoreConfig {
    /// Number of permits.
    pub capacity: usize,
}

impl SemaphoreConfig {
    /// Validate semaphore configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.capacity == 0 {
            return Err("capacity must be greater than 0".into());
        }
        Ok(())
    }
}

/// Rate limiter policy selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "kebab-case")]
pub enum RateLimiterConfig {
    /// Continuous refill; bursts up to `capacity`.
    TokenBucket {
        /// Tokens added per second.
        rate: f64,
        /// Maximum stored tokens.
        capacity: u32,
    },
    /// Hard cap of `limit` admissions in any trailing window.
    SlidingWindow {
        /// Admissions allowed per window.
        limit: u32,
        /// Window length in milliseconds.
        window_ms: u64,
    },
}

impl RateLimiterConfig {
    /// Validate rate limiter configuration values.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::TokenBucket { rate, capacity } => {
                if !rate.is_finite() || *rate <= 0.0 {
                    return Err("rate must be a positive number".into());
                }
                if *capacity == 0 {
                    return Err("capacity must be greater than 0".into());
                }
            }
            Self::SlidingWindow { limit, window_ms } => {
                if *limit == 0 {
                    return Err("limit must be greater than 0".into());
                }
                if *window_ms == 0 {
                    return Err("window_ms must be greater than 0".into());
                }
            }
        }
        Ok(())
    }
}

/// Retry-with-backoff configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first call.
    pub max_attempts: u32,
    /// Delay before the second attempt, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound for any computed delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier applied per attempt.
    pub factor: f64,
    /// Scale each delay by a random factor in `[0.5, 1.5)`.
    #[serde(default)]
    pub jitter_enabled: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 10_000,
            factor: 2.0,
            jitter_enabled: true,
        }
    }
}

impl RetryConfig {
    /// Default backoff: 3 attempts from 100ms doubling, capped at 10s, with jitter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set total attempts.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the first retry delay.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the delay cap.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the backoff multiplier.
    #[must_use]
    pub const fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub const fn with_jitter(mut self, enabled: bool) -> Self {
        self.jitter_enabled = enabled;
        self
    }

    /// First retry delay.
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Delay cap.
    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Validate retry configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".into());
        }
        if self.base_delay_ms == 0 {
            return Err("base_delay_ms must be greater than 0".into());
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err("max_delay_ms must not be less than base_delay_ms".into());
        }
        if !self.factor.is_finite() || self.factor < 1.0 {
            return Err("factor must be at least 1".into());
        }
        Ok(())
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub threshold: u32,
    /// Time the circuit stays open before a trial call, in milliseconds.
    pub reset_timeout_ms: u64,
    /// Per-call deadline in milliseconds; a call exceeding it counts as a failure.
    #[serde(default)]
    pub call_timeout_ms: Option<u64>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            reset_timeout_ms: 30_000,
            call_timeout_ms: None,
        }
    }
}

impl CircuitBreakerConfig {
    /// Default breaker: opens after 5 failures for 30s, no call timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure threshold.
    #[must_use]
    pub const fn with_threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set how long the circuit stays open.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the per-call deadline.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Open duration.
    #[must_use]
    pub const fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    /// Per-call deadline, if any.
    #[must_use]
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }

    /// Validate breaker configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.threshold == 0 {
            return Err("threshold must be greater than 0".into());
        }
        if self.reset_timeout_ms == 0 {
            return Err("reset_timeout_ms must be greater than 0".into());
        }
        if self.call_timeout_ms == Some(0) {
            return Err("call_timeout_ms must be greater than 0 when set".into());
        }
        Ok(())
    }
}

/// Root configuration: named gates of every kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatesConfig {
    /// Schedulers by name.
    #[serde(default)]
    pub schedulers: HashMap<String, SchedulerConfig>,
    /// Semaphores by name.
    #[serde(default)]
    pub semaphores: HashMap<String, SemaphoreConfig>,
    /// Rate limiters by name.
    #[serde(default)]
    pub rate_limiters: HashMap<String, RateLimiterConfig>,
    /// Retry policies by name.
    #[serde(default)]
    pub retry_policies: HashMap<String, RetryConfig>,
    /// Circuit breakers by name.
    #[serde(default)]
    pub circuit_breakers: HashMap<String, CircuitBreakerConfig>,
}

impl GatesConfig {
    fn is_empty(&self) -> bool {
        self.schedulers.is_empty()
            && self.semaphores.is_empty()
            && self.rate_limiters.is_empty()
            && self.retry_policies.is_empty()
            && self.circuit_breakers.is_empty()
    }

    /// Validate every gate and ensure at least one is defined.
    pub fn validate(&self) -> Result<(), String> {
        if self.is_empty() {
            return Err("at least one gate must be defined".into());
        }
        for (name, cfg) in &self.schedulers {
            cfg.validate()
                .map_err(|e| format!("scheduler `{name}` invalid: {e}"))?;
        }
        for (name, cfg) in &self.semaphores {
            cfg.validate()
                .map_err(|e| format!("semaphore `{name}` invalid: {e}"))?;
        }
        for (name, cfg) in &self.rate_limiters {
            cfg.validate()
                .map_err(|e| format!("rate limiter `{name}` invalid: {e}"))?;
        }
        for (name, cfg) in &self.retry_policies {
            cfg.validate()
                .map_err(|e| format!("retry policy `{name}` invalid: {e}"))?;
        }
        for (name, cfg) in &self.circuit_breakers {
            cfg.validate()
                .map_err(|e| format!("circuit breaker `{name}` invalid: {e}"))?;
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, String> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read `{}`: {e}", path.display()))?;
        Self::from_json_str(&raw)
    }

    /// Load `.env` if present, then read the file named by
    /// [`CONFIG_PATH_ENV`].
    pub fn from_env() -> Result<Self, String> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(format!(".env error: {e}"));
            }
        }
        let path = std::env::var(CONFIG_PATH_ENV)
            .map_err(|_| format!("{CONFIG_PATH_ENV} is not set"))?;
        Self::from_file(path)
    }
}
