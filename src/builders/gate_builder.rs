//! Builders to construct named gates from configuration.

use std::collections::HashMap;

use tracing::info;

use crate::config::GatesConfig;
use crate::core::{GateError, Scheduler};
use crate::resilience::{CircuitBreaker, RateLimiter, RetryPolicy};
use crate::semaphore::Semaphore;

/// Every gate defined in a [`GatesConfig`], keyed by name.
pub struct GateRegistry<S> {
    /// Schedulers by name.
    pub schedulers: HashMap<String, Scheduler<S>>,
    /// Semaphores by name.
    pub semaphores: HashMap<String, Semaphore>,
    /// Rate limiters by name.
    pub rate_limiters: HashMap<String, RateLimiter>,
    /// Retry policies by name.
    pub retry_policies: HashMap<String, RetryPolicy>,
    /// Circuit breakers by name.
    pub circuit_breakers: HashMap<String, CircuitBreaker>,
}

impl<S> GateRegistry<S> {
    /// Scheduler named `name`.
    #[must_use]
    pub fn scheduler(&self, name: &str) -> Option<&Scheduler<S>> {
        self.schedulers.get(name)
    }

    /// Semaphore named `name`.
    #[must_use]
    pub fn semaphore(&self, name: &str) -> Option<&Semaphore> {
        self.semaphores.get(name)
    }

    /// Rate limiter named `name`.
    #[must_use]
    pub fn rate_limiter(&self, name: &str) -> Option<&RateLimiter> {
        self.rate_limiters.get(name)
    }

    /// Retry policy named `name`.
    #[must_use]
    pub fn retry_policy(&self, name: &str) -> Option<&RetryPolicy> {
        self.retry_policies.get(name)
    }

    /// Circuit breaker named `name`.
    #[must_use]
    pub fn circuit_breaker(&self, name: &str) -> Option<&CircuitBreaker> {
        self.circuit_breakers.get(name)
    }

    /// Total number of gates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.schedulers.len()
            + self.semaphores.len()
            + self.rate_limiters.len()
            + self.retry_policies.len()
            + self.circuit_breakers.len()
    }

    /// Whether the registry holds no gates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Build every gate in `cfg`; schedulers share clones of `spawner`.
///
/// # Errors
///
/// Returns [`GateError::Configuration`] naming the first invalid gate.
pub fn build_gates<S>(cfg: &GatesConfig, spawner: S) -> Result<GateRegistry<S>, GateError>
where
    S: Clone,
{
    cfg.validate()
        .map_err(|e| GateError::Configuration(format!("config invalid: {e}")))?;

    let mut schedulers = HashMap::new();
    for (name, sched_cfg) in &cfg.schedulers {
        let scheduler = Scheduler::named(name.clone(), sched_cfg.clone(), spawner.clone())?;
        schedulers.insert(name.clone(), scheduler);
    }

    let semaphores = cfg
        .semaphores
        .iter()
        .map(|(name, c)| Semaphore::from_config(c).map(|g| (name.clone(), g)))
        .collect::<Result<HashMap<_, _>, _>>()?;

    let rate_limiters = cfg
        .rate_limiters
        .iter()
        .map(|(name, c)| RateLimiter::new(c.clone()).map(|g| (name.clone(), g)))
        .collect::<Result<HashMap<_, _>, _>>()?;

    let retry_policies = cfg
        .retry_policies
        .iter()
        .map(|(name, c)| RetryPolicy::new(c.clone()).map(|g| (name.clone(), g)))
        .collect::<Result<HashMap<_, _>, _>>()?;

    let circuit_breakers = cfg
        .circuit_breakers
        .iter()
        .map(|(name, c)| CircuitBreaker::new(c.clone()).map(|g| (name.clone(), g)))
        .collect::<Result<HashMap<_, _>, _>>()?;

    let registry = GateRegistry {
        schedulers,
        semaphores,
        rate_limiters,
        retry_policies,
        circuit_breakers,
    };
    info!(gates = registry.len(), "gates built from configuration");
    Ok(registry)
}
