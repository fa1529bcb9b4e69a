//! The gateway: adapter registry, request routing, and the per-call
//! reliability pipeline.

use crate::adapter::build_adapter;
use crate::api::{
    AdapterDescriptor, AdapterSpec, Capability, GatewayConfig, InvocationOutcome, InvokeRequest,
    ModelRoute, RouteStrategy, WarmupPolicy,
};
use crate::budget::{BudgetEnforcer, BudgetLedger, estimate_tokens};
use crate::error::{GatewayError, InvocationError, Result};
use crate::fallback::FallbackChain;
use crate::health::HealthConfig;
use crate::reliability::{CircuitBreakerConfig, CircuitSnapshot, CircuitState};
use crate::session::{SessionConfig, StickySessionRouter};
use crate::sharding::{ShardLoad, ShardingLayer};
use crate::state::AdapterRuntimeState;
use crate::traits::{AdapterKind, ModelAdapter, ModelInvocationContext, ModelInvocationResult};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, Semaphore};

/// Health summary of one adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterHealth {
    pub adapter_id: String,
    /// Quality score in `[0, 1]`.
    pub score: f64,
    pub circuit_state: CircuitState,
    /// Samples currently in the health window.
    pub sample_count: usize,
}

#[derive(Clone)]
struct RegisteredAdapter {
    descriptor: AdapterDescriptor,
    adapter: Arc<dyn ModelAdapter>,
    permits: Arc<Semaphore>,
}

impl RegisteredAdapter {
    fn new(descriptor: AdapterDescriptor, adapter: Arc<dyn ModelAdapter>) -> Self {
        let permits = Arc::new(Semaphore::new(
            descriptor.max_concurrent.min(Semaphore::MAX_PERMITS),
        ));
        Self {
            descriptor,
            adapter,
            permits,
        }
    }

    fn load(&self) -> ShardLoad {
        let capacity = self.descriptor.max_concurrent.min(Semaphore::MAX_PERMITS);
        ShardLoad {
            in_flight: capacity.saturating_sub(self.permits.available_permits()),
            capacity,
        }
    }
}

#[derive(Default)]
struct AdapterTable {
    entries: HashMap<String, RegisteredAdapter>,
    /// Registration order.
    order: Vec<String>,
    /// Deregistered ids; never reusable.
    retired: HashSet<String>,
}

impl AdapterTable {
    fn insert(&mut self, descriptor: AdapterDescriptor, adapter: Arc<dyn ModelAdapter>) -> Result<()> {
        descriptor.validate()?;
        let id = descriptor.id.clone();
        if self.entries.contains_key(&id) || self.retired.contains(&id) {
            return Err(GatewayError::DuplicateAdapter(id));
        }
        self.order.push(id.clone());
        self.entries
            .insert(id, RegisteredAdapter::new(descriptor, adapter));
        Ok(())
    }
}

#[derive(Default)]
struct RouteTable {
    routes: HashMap<String, ModelRoute>,
    sharding: ShardingLayer,
}

impl RouteTable {
    fn insert(&mut self, route: ModelRoute) -> Result<()> {
        if self.routes.contains_key(&route.model_id) {
            return Err(GatewayError::Config(format!(
                "Duplicate route for model '{}'",
                route.model_id
            )));
        }
        if route.strategy == RouteStrategy::Sharded {
            self.sharding
                .add_group(route.model_id.clone(), route.adapters.clone());
        }
        self.routes.insert(route.model_id.clone(), route);
        Ok(())
    }

    fn prune(&mut self, adapter_id: &str) {
        for route in self.routes.values_mut() {
            route.adapters.retain(|id| id != adapter_id);
        }
        self.sharding.remove_shard(adapter_id);
    }
}

/// The central gateway that owns registered adapters and routes requests to
/// them.
///
/// Obtain an instance via [`ModelGateway::builder()`]. Every call goes
/// through budget enforcement, candidate ordering (sticky sessions, health
/// ranking, or sharding), and a fallback chain whose attempts are each gated
/// by a circuit breaker, an availability probe, and a concurrency limit.
pub struct ModelGateway {
    adapters: RwLock<AdapterTable>,
    routes: RwLock<RouteTable>,
    budgets: BudgetEnforcer,
    state: Arc<AdapterRuntimeState>,
    sessions: Arc<StickySessionRouter>,
}

impl ModelGateway {
    /// Create a new [`ModelGatewayBuilder`].
    pub fn builder() -> ModelGatewayBuilder {
        ModelGatewayBuilder::default()
    }

    /// Register an adapter at runtime.
    ///
    /// Fails with [`GatewayError::DuplicateAdapter`] if the id is registered
    /// or was registered before.
    pub async fn register_adapter(
        &self,
        descriptor: AdapterDescriptor,
        adapter: Arc<dyn ModelAdapter>,
    ) -> Result<()> {
        let id = descriptor.id.clone();
        let kind = adapter.kind();
        self.adapters.write().await.insert(descriptor, adapter)?;
        tracing::info!(adapter = %id, kind = %kind, "Adapter registered");
        Ok(())
    }

    /// Remove an adapter, drop it from every route, and evict the sessions
    /// pinned to it. The id stays reserved.
    pub async fn deregister_adapter(&self, adapter_id: &str) -> Result<()> {
        {
            let mut table = self.adapters.write().await;
            if table.entries.remove(adapter_id).is_none() {
                return Err(GatewayError::AdapterNotRegistered(adapter_id.to_string()));
            }
            table.order.retain(|id| id != adapter_id);
            table.retired.insert(adapter_id.to_string());
        }
        self.routes.write().await.prune(adapter_id);
        let evicted = self.sessions.evict_adapter(adapter_id);
        self.state.forget(adapter_id);
        tracing::info!(adapter = %adapter_id, evicted_sessions = evicted, "Adapter deregistered");
        Ok(())
    }

    async fn entry(&self, adapter_id: &str) -> Result<RegisteredAdapter> {
        self.adapters
            .read()
            .await
            .entries
            .get(adapter_id)
            .cloned()
            .ok_or_else(|| GatewayError::AdapterNotRegistered(adapter_id.to_string()))
    }

    /// Look up an adapter and probe its availability. Never cached.
    pub async fn resolve(&self, adapter_id: &str) -> Result<Arc<dyn ModelAdapter>> {
        let entry = self.entry(adapter_id).await?;
        if entry.adapter.is_available().await {
            Ok(entry.adapter)
        } else {
            Err(GatewayError::unavailable(adapter_id, "availability probe failed"))
        }
    }

    /// Descriptors of every registered adapter, in registration order.
    pub async fn list_adapters(&self) -> Vec<AdapterDescriptor> {
        let table = self.adapters.read().await;
        table
            .order
            .iter()
            .filter_map(|id| table.entries.get(id).map(|e| e.descriptor.clone()))
            .collect()
    }

    pub async fn route(&self, model_id: &str) -> Option<ModelRoute> {
        self.routes.read().await.routes.get(model_id).cloned()
    }

    pub async fn adapter_health(&self, adapter_id: &str) -> Result<AdapterHealth> {
        if !self.adapters.read().await.entries.contains_key(adapter_id) {
            return Err(GatewayError::AdapterNotRegistered(adapter_id.to_string()));
        }
        let health = self.state.health();
        Ok(AdapterHealth {
            adapter_id: adapter_id.to_string(),
            score: health.score(adapter_id),
            circuit_state: self
                .state
                .circuit_snapshot(adapter_id)
                .map(|s| s.state)
                .unwrap_or(CircuitState::Closed),
            sample_count: health.sample_count(adapter_id),
        })
    }

    pub fn circuit_snapshot(&self, adapter_id: &str) -> Option<CircuitSnapshot> {
        self.state.circuit_snapshot(adapter_id)
    }

    /// Insert or replace the budget for `ledger.model_id`.
    pub fn set_budget(&self, ledger: BudgetLedger) -> Result<()> {
        ledger.validate()?;
        self.budgets.set(ledger);
        Ok(())
    }

    pub fn runtime_state(&self) -> &Arc<AdapterRuntimeState> {
        &self.state
    }

    pub fn sessions(&self) -> &Arc<StickySessionRouter> {
        &self.sessions
    }

    fn check_budget(&self, key: &str, request: &InvokeRequest) -> Result<()> {
        let tokens = request
            .estimated_tokens
            .unwrap_or_else(|| estimate_tokens(&request.prompt));
        self.budgets.check(key, tokens, request.estimated_vram_mb)
    }

    /// Serve a request for a logical model id (a route) or an adapter id.
    #[tracing::instrument(skip(self, request), fields(model = %request.model_id))]
    pub async fn invoke(&self, request: InvokeRequest) -> Result<InvocationOutcome> {
        let route = self.route(&request.model_id).await;
        let (candidates, strategy) = match route {
            Some(route) => (route.adapters, route.strategy),
            None => {
                if !self
                    .adapters
                    .read()
                    .await
                    .entries
                    .contains_key(&request.model_id)
                {
                    return Err(GatewayError::AdapterNotRegistered(request.model_id.clone()));
                }
                (vec![request.model_id.clone()], RouteStrategy::Ordered)
            }
        };

        self.check_budget(&request.model_id, &request)?;

        let candidates = match strategy {
            RouteStrategy::Ordered => candidates,
            RouteStrategy::HealthRanked => self.state.health().rank(&candidates),
            RouteStrategy::Sharded => self.shard_plan(&request, candidates).await,
        };
        let sticky = strategy != RouteStrategy::Sharded;
        self.execute(&request.model_id, candidates, sticky, &request)
            .await
    }

    /// Serve a request with every adapter declaring `capability`, highest
    /// weight first, then best health, then registration order.
    #[tracing::instrument(skip(self, request), fields(capability = %capability))]
    pub async fn invoke_capability(
        &self,
        capability: Capability,
        request: InvokeRequest,
    ) -> Result<InvocationOutcome> {
        let target = capability.to_string();
        let health = self.state.health();
        let mut ranked: Vec<(u32, f64, usize, String)> = {
            let table = self.adapters.read().await;
            table
                .order
                .iter()
                .enumerate()
                .filter_map(|(position, id)| {
                    let entry = table.entries.get(id)?;
                    entry
                        .descriptor
                        .capabilities
                        .contains(&capability)
                        .then(|| (entry.descriptor.weight, health.score(id), position, id.clone()))
                })
                .collect()
        };
        if ranked.is_empty() {
            return Err(GatewayError::NoCandidates(target));
        }

        self.check_budget(&target, &request)?;

        ranked.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal))
                .then_with(|| a.2.cmp(&b.2))
        });
        let candidates = ranked.into_iter().map(|(_, _, _, id)| id).collect();
        self.execute(&target, candidates, true, &request).await
    }

    async fn shard_plan(&self, request: &InvokeRequest, declared: Vec<String>) -> Vec<String> {
        let loads: HashMap<String, ShardLoad> = {
            let table = self.adapters.read().await;
            declared
                .iter()
                .filter_map(|id| table.entries.get(id).map(|e| (id.clone(), e.load())))
                .collect()
        };
        let routes = self.routes.read().await;
        routes
            .sharding
            .plan(request.session_id.as_deref(), &request.model_id, |id| {
                loads.get(id).copied().unwrap_or_default()
            })
            .unwrap_or(declared)
    }

    async fn execute(
        &self,
        target: &str,
        mut candidates: Vec<String>,
        sticky: bool,
        request: &InvokeRequest,
    ) -> Result<InvocationOutcome> {
        let session = if sticky {
            request.session_id.as_deref()
        } else {
            None
        };

        if let Some(session_id) = session {
            let registered: HashSet<String> = {
                let table = self.adapters.read().await;
                candidates
                    .iter()
                    .filter(|id| table.entries.contains_key(*id))
                    .cloned()
                    .collect()
            };
            let pinned = self.sessions.route(
                session_id,
                &candidates,
                self.state.health(),
                |id| registered.contains(id) && self.state.allows_traffic(id),
            );
            if let Some(pinned) = pinned
                && let Some(position) = candidates.iter().position(|id| *id == pinned)
            {
                let first = candidates.remove(position);
                candidates.insert(0, first);
            }
        }

        let ctx = request.context();
        let deadline = request.deadline;
        let chain = FallbackChain::new(candidates);
        let success = chain
            .execute(target, &request.cancellation, |adapter_id| {
                let ctx = &ctx;
                async move { self.attempt(&adapter_id, ctx, deadline).await }
            })
            .await?;

        if let Some(session_id) = session
            && chain.candidates().first() != Some(&success.adapter_id)
        {
            self.sessions.pin(session_id, &success.adapter_id);
        }

        Ok(InvocationOutcome {
            result: success.value,
            adapter_id: success.adapter_id,
            attempts: success.attempts,
        })
    }

    /// Run one call against a single adapter: circuit breaker, availability
    /// probe, concurrency permit, then the adapter call bounded by `deadline`
    /// (and the descriptor's timeout) and raced against `ctx.cancellation`.
    #[tracing::instrument(skip(self, ctx, deadline))]
    pub async fn invoke_adapter(
        &self,
        adapter_id: &str,
        ctx: &ModelInvocationContext,
        deadline: Option<Duration>,
    ) -> Result<ModelInvocationResult> {
        self.attempt(adapter_id, ctx, deadline).await
    }

    async fn attempt(
        &self,
        adapter_id: &str,
        ctx: &ModelInvocationContext,
        deadline: Option<Duration>,
    ) -> Result<ModelInvocationResult> {
        let entry = self.entry(adapter_id).await?;
        let kind = entry.adapter.kind();
        let breaker = self.state.breaker(adapter_id);

        let started = Instant::now();
        let result = breaker
            .call(|| self.call_adapter(&entry, ctx, deadline))
            .await;
        record_invocation(adapter_id, kind, &result, started.elapsed());
        result
    }

    async fn call_adapter(
        &self,
        entry: &RegisteredAdapter,
        ctx: &ModelInvocationContext,
        deadline: Option<Duration>,
    ) -> Result<ModelInvocationResult> {
        let adapter_id = entry.descriptor.id.as_str();
        let health = self.state.health();
        let started = Instant::now();

        if !entry.adapter.is_available().await {
            health.record(adapter_id, started.elapsed(), false);
            return Err(GatewayError::unavailable(adapter_id, "availability probe failed"));
        }

        let _permit = entry.permits.clone().try_acquire_owned().map_err(|_| {
            GatewayError::unavailable(
                adapter_id,
                format!("saturated ({} calls in flight)", entry.descriptor.max_concurrent),
            )
        })?;

        let timeout = effective_timeout(deadline, entry.descriptor.timeout_ms);
        let call = async {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, entry.adapter.invoke(ctx))
                    .await
                    .unwrap_or(Err(InvocationError::Timeout)),
                None => entry.adapter.invoke(ctx).await,
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = ctx.cancellation.cancelled() => {
                tracing::debug!(adapter = %adapter_id, "Call cancelled");
                return Err(GatewayError::Cancelled);
            }
            outcome = call => outcome,
        };

        let elapsed = started.elapsed();
        match &outcome {
            Ok(_) => health.record(adapter_id, elapsed, true),
            Err(InvocationError::InvalidRequest(_)) => {}
            Err(_) => health.record(adapter_id, elapsed, false),
        }

        outcome.map_err(|source| match source {
            InvocationError::NotReady(reason) => GatewayError::unavailable(adapter_id, reason),
            source => GatewayError::Invocation {
                adapter_id: adapter_id.to_string(),
                source,
            },
        })
    }
}

/// The tighter of the request deadline and the adapter's own timeout.
fn effective_timeout(deadline: Option<Duration>, timeout_ms: Option<u64>) -> Option<Duration> {
    let adapter_limit = timeout_ms.map(Duration::from_millis);
    match (deadline, adapter_limit) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn record_invocation(
    adapter_id: &str,
    kind: AdapterKind,
    result: &Result<ModelInvocationResult>,
    elapsed: Duration,
) {
    let status = match result {
        Ok(_) => "success",
        Err(GatewayError::CircuitOpen { .. }) => "circuit_open",
        Err(GatewayError::AdapterUnavailable { .. }) => "unavailable",
        Err(GatewayError::Cancelled) => "cancelled",
        Err(GatewayError::Invocation {
            source: InvocationError::Timeout,
            ..
        }) => "timeout",
        Err(_) => "failure",
    };

    if !matches!(result, Err(GatewayError::CircuitOpen { .. })) {
        metrics::histogram!(
            "gateway_invocation.duration_seconds",
            "adapter" => adapter_id.to_string(),
            "kind" => kind.to_string()
        )
        .record(elapsed.as_secs_f64());
    }
    metrics::counter!(
        "gateway_invocation.total",
        "adapter" => adapter_id.to_string(),
        "kind" => kind.to_string(),
        "status" => status
    )
    .increment(1);

    if let Err(e) = result {
        tracing::debug!(adapter = %adapter_id, status, error = %e, "Adapter call failed");
    }
}

/// Builder for constructing a [`ModelGateway`] with adapters, routes,
/// budgets, and reliability settings.
///
/// ```rust,no_run
/// # use xervo_gateway::runtime::ModelGateway;
/// # use xervo_gateway::api::ModelRoute;
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let gateway = ModelGateway::builder()
///     // .register_adapter(descriptor, adapter)
///     .route(ModelRoute::new("chat/default", "local").with_fallback("cloud"))
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct ModelGatewayBuilder {
    adapters: Vec<(AdapterDescriptor, Arc<dyn ModelAdapter>)>,
    adapter_specs: Vec<AdapterSpec>,
    routes: Vec<ModelRoute>,
    budgets: Vec<BudgetLedger>,
    circuit_breaker: CircuitBreakerConfig,
    health: HealthConfig,
    sessions: SessionConfig,
    warmup_policy: WarmupPolicy,
    state: Option<Arc<AdapterRuntimeState>>,
}

impl ModelGatewayBuilder {
    /// Register an adapter. Duplicate ids are reported by
    /// [`build`](Self::build).
    pub fn register_adapter(
        mut self,
        descriptor: AdapterDescriptor,
        adapter: Arc<dyn ModelAdapter>,
    ) -> Self {
        self.adapters.push((descriptor, adapter));
        self
    }

    pub fn route(mut self, route: ModelRoute) -> Self {
        self.routes.push(route);
        self
    }

    pub fn budget(mut self, ledger: BudgetLedger) -> Self {
        self.budgets.push(ledger);
        self
    }

    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    pub fn health(mut self, config: HealthConfig) -> Self {
        self.health = config;
        self
    }

    pub fn sessions(mut self, config: SessionConfig) -> Self {
        self.sessions = config;
        self
    }

    /// Set the warmup policy applied to adapters during [`build`](Self::build).
    pub fn warmup_policy(mut self, policy: WarmupPolicy) -> Self {
        self.warmup_policy = policy;
        self
    }

    /// Share breaker and health state with the caller. When set, the
    /// builder's circuit breaker and health configs are not used.
    pub fn runtime_state(mut self, state: Arc<AdapterRuntimeState>) -> Self {
        self.state = Some(state);
        self
    }

    /// Apply a whole [`GatewayConfig`]. Adapters it declares are constructed
    /// during [`build`](Self::build).
    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.adapter_specs.extend(config.adapters);
        self.routes.extend(config.routes);
        self.budgets.extend(config.budgets);
        self.circuit_breaker = config.circuit_breaker;
        self.health = config.health;
        self.sessions = config.sessions;
        self.warmup_policy = config.warmup;
        self
    }

    /// Load configuration from a JSON string.
    pub fn config_from_str(self, s: &str) -> Result<Self> {
        Ok(self.config(crate::api::config_from_str(s)?))
    }

    /// Load configuration from a JSON file.
    pub fn config_from_file(self, path: impl AsRef<std::path::Path>) -> Result<Self> {
        Ok(self.config(crate::api::config_from_file(path)?))
    }

    /// Validate everything, construct configured adapters, run the warmup
    /// policy, and return the gateway.
    ///
    /// Fails on duplicate adapter ids, routes naming unknown adapters,
    /// invalid settings, or a failed eager warmup.
    pub async fn build(self) -> Result<Arc<ModelGateway>> {
        self.circuit_breaker.validate()?;
        self.health.validate()?;
        self.sessions.validate()?;

        let mut table = AdapterTable::default();
        for (descriptor, adapter) in self.adapters {
            table.insert(descriptor, adapter)?;
        }
        for spec in &self.adapter_specs {
            spec.descriptor.validate()?;
            let adapter = build_adapter(spec)?;
            table.insert(spec.descriptor.clone(), adapter)?;
        }

        let mut routes = RouteTable::default();
        for route in self.routes {
            route.validate()?;
            if let Some(unknown) = route
                .adapters
                .iter()
                .find(|id| !table.entries.contains_key(*id))
            {
                return Err(GatewayError::Config(format!(
                    "Route '{}' references unknown adapter '{}'",
                    route.model_id, unknown
                )));
            }
            routes.insert(route)?;
        }

        for ledger in &self.budgets {
            ledger.validate()?;
        }

        let state = match self.state {
            Some(state) => state,
            None => Arc::new(AdapterRuntimeState::new(self.circuit_breaker, self.health)?),
        };
        let sessions = Arc::new(StickySessionRouter::from_config(&self.sessions));
        if let Some(secs) = self.sessions.sweep_interval_secs {
            sessions.spawn_sweeper(Duration::from_secs(secs));
        }

        let warmup: Vec<(String, Arc<dyn ModelAdapter>)> = table
            .order
            .iter()
            .filter_map(|id| {
                table
                    .entries
                    .get(id)
                    .map(|e| (id.clone(), e.adapter.clone()))
            })
            .collect();

        let gateway = Arc::new(ModelGateway {
            adapters: RwLock::new(table),
            routes: RwLock::new(routes),
            budgets: BudgetEnforcer::new(self.budgets),
            state,
            sessions,
        });

        match self.warmup_policy {
            WarmupPolicy::Eager => {
                for (id, adapter) in warmup {
                    tracing::info!(adapter = %id, "Eagerly warming up adapter");
                    adapter
                        .warmup()
                        .await
                        .map_err(|source| GatewayError::Invocation {
                            adapter_id: id.clone(),
                            source,
                        })?;
                }
            }
            WarmupPolicy::Background => {
                for (id, adapter) in warmup {
                    tracing::info!(adapter = %id, "Scheduling background adapter warmup");
                    tokio::spawn(async move {
                        if let Err(e) = adapter.warmup().await {
                            tracing::error!(adapter = %id, error = %e, "Background adapter warmup failed");
                        }
                    });
                }
            }
            WarmupPolicy::Lazy => {
                tracing::debug!("Lazy adapter warmup (no-op)");
            }
        }

        Ok(gateway)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockAdapter, mock_entry};
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn build_rejects_duplicate_adapter_ids() {
        let (descriptor, adapter) = mock_entry("a");
        let result = ModelGateway::builder()
            .register_adapter(descriptor.clone(), adapter.clone())
            .register_adapter(descriptor, adapter)
            .build()
            .await;
        assert!(matches!(result, Err(GatewayError::DuplicateAdapter(id)) if id == "a"));
    }

    #[tokio::test]
    async fn build_rejects_route_to_unknown_adapter() {
        let (descriptor, adapter) = mock_entry("a");
        let result = ModelGateway::builder()
            .register_adapter(descriptor, adapter)
            .route(ModelRoute::new("m", "a").with_fallback("ghost"))
            .build()
            .await;
        let err = result.err().unwrap();
        assert!(err.to_string().contains("ghost"));
    }

    #[tokio::test]
    async fn deregistered_id_cannot_be_reused() {
        let (descriptor, adapter) = mock_entry("a");
        let gateway = ModelGateway::builder()
            .register_adapter(descriptor.clone(), adapter.clone())
            .route(ModelRoute::new("m", "a"))
            .build()
            .await
            .unwrap();

        gateway.deregister_adapter("a").await.unwrap();
        assert!(gateway.route("m").await.unwrap().adapters.is_empty());
        assert!(gateway.list_adapters().await.is_empty());

        let err = gateway.register_adapter(descriptor, adapter).await.unwrap_err();
        assert!(matches!(err, GatewayError::DuplicateAdapter(_)));
        assert!(matches!(
            gateway.deregister_adapter("a").await,
            Err(GatewayError::AdapterNotRegistered(_))
        ));
    }

    #[tokio::test]
    async fn unavailable_adapter_is_never_invoked() {
        let adapter = Arc::new(MockAdapter::new("a").unavailable());
        let gateway = ModelGateway::builder()
            .register_adapter(AdapterDescriptor::new("a"), adapter.clone())
            .build()
            .await
            .unwrap();

        let err = gateway.resolve("a").await.err().unwrap();
        assert!(matches!(err, GatewayError::AdapterUnavailable { .. }));

        let err = gateway
            .invoke_adapter("a", &ModelInvocationContext::new("hi"), None)
            .await
            .unwrap_err();
        assert_eq!(err.stage(), "resolve");
        assert_eq!(adapter.call_count(), 0);
        assert_eq!(adapter.probe_count(), 2);
    }

    #[tokio::test]
    async fn saturated_adapter_falls_back() {
        let busy = Arc::new(MockAdapter::new("busy").with_delay(300));
        let (spare_descriptor, spare) = mock_entry("spare");
        let gateway = ModelGateway::builder()
            .register_adapter(AdapterDescriptor::new("busy").with_max_concurrent(1), busy.clone())
            .register_adapter(spare_descriptor, spare.clone())
            .route(ModelRoute::new("m", "busy").with_fallback("spare"))
            .build()
            .await
            .unwrap();

        let first = {
            let gateway = gateway.clone();
            tokio::spawn(async move { gateway.invoke(InvokeRequest::new("m", "one")).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = gateway.invoke(InvokeRequest::new("m", "two")).await.unwrap();
        assert_eq!(second.adapter_id, "spare");
        assert!(matches!(
            second.attempts[0].error,
            GatewayError::AdapterUnavailable { .. }
        ));

        let first = first.await.unwrap().unwrap();
        assert_eq!(first.adapter_id, "busy");
    }

    #[tokio::test]
    async fn direct_adapter_id_is_a_single_candidate_target() {
        let (descriptor, adapter) = mock_entry("a");
        let gateway = ModelGateway::builder()
            .register_adapter(descriptor, adapter.clone())
            .build()
            .await
            .unwrap();

        let outcome = gateway.invoke(InvokeRequest::new("a", "hi")).await.unwrap();
        assert_eq!(outcome.result.output, "a: hi");
        assert!(!outcome.used_fallback());

        let err = gateway
            .invoke(InvokeRequest::new("missing", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::AdapterNotRegistered(_)));
    }

    #[tokio::test]
    async fn eager_warmup_runs_for_every_adapter() {
        let tracker = Arc::new(AtomicU32::new(0));
        let a = Arc::new(MockAdapter::new("a").with_warmup_tracker(tracker.clone()));
        let b = Arc::new(MockAdapter::new("b").with_warmup_tracker(tracker.clone()));
        let _gateway = ModelGateway::builder()
            .register_adapter(AdapterDescriptor::new("a"), a)
            .register_adapter(AdapterDescriptor::new("b"), b)
            .warmup_policy(WarmupPolicy::Eager)
            .build()
            .await
            .unwrap();
        assert_eq!(tracker.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn effective_timeout_takes_the_tighter_bound() {
        let ms = Duration::from_millis;
        assert_eq!(effective_timeout(None, None), None);
        assert_eq!(effective_timeout(Some(ms(50)), None), Some(ms(50)));
        assert_eq!(effective_timeout(None, Some(70)), Some(ms(70)));
        assert_eq!(effective_timeout(Some(ms(50)), Some(20)), Some(ms(20)));
    }
}
