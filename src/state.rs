//! Shared per-adapter reliability state.

use crate::error::Result;
use crate::health::{HealthConfig, HealthScorer};
use crate::reliability::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot};
use dashmap::DashMap;
use std::sync::Arc;

/// Circuit breakers and health windows for every adapter id.
///
/// Owned by a [`ModelGateway`](crate::runtime::ModelGateway) but can be
/// created up front and handed to the builder, so that several gateways (or
/// a test) share and inspect the same state.
pub struct AdapterRuntimeState {
    breaker_config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    health: HealthScorer,
}

impl AdapterRuntimeState {
    /// Fails with [`GatewayError::Config`](crate::error::GatewayError::Config)
    /// when either config is invalid.
    pub fn new(breaker_config: CircuitBreakerConfig, health_config: HealthConfig) -> Result<Self> {
        breaker_config.validate()?;
        health_config.validate()?;
        Ok(Self::from_parts(breaker_config, health_config))
    }

    fn from_parts(breaker_config: CircuitBreakerConfig, health_config: HealthConfig) -> Self {
        Self {
            breaker_config,
            breakers: DashMap::new(),
            health: HealthScorer::new(health_config),
        }
    }

    pub fn breaker_config(&self) -> &CircuitBreakerConfig {
        &self.breaker_config
    }

    /// The breaker for `adapter_id`, created closed on first use.
    pub fn breaker(&self, adapter_id: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(adapter_id) {
            return breaker.clone();
        }
        self.breakers
            .entry(adapter_id.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(adapter_id, self.breaker_config.clone()))
            })
            .clone()
    }

    /// Snapshot of an existing breaker without creating one.
    pub fn circuit_snapshot(&self, adapter_id: &str) -> Option<CircuitSnapshot> {
        self.breakers.get(adapter_id).map(|b| b.snapshot())
    }

    /// Whether a call to `adapter_id` would pass its breaker right now.
    pub fn allows_traffic(&self, adapter_id: &str) -> bool {
        self.breakers
            .get(adapter_id)
            .map(|b| b.allows_traffic())
            .unwrap_or(true)
    }

    pub fn health(&self) -> &HealthScorer {
        &self.health
    }

    /// Drop all state kept for `adapter_id`.
    pub fn forget(&self, adapter_id: &str) {
        self.breakers.remove(adapter_id);
        self.health.forget(adapter_id);
    }
}

impl Default for AdapterRuntimeState {
    fn default() -> Self {
        Self::from_parts(CircuitBreakerConfig::default(), HealthConfig::default())
    }
}
