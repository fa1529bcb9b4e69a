//! Public API types for configuring adapters, routes, and requests.

use crate::budget::BudgetLedger;
use crate::error::{AttemptFailure, GatewayError, Result};
use crate::health::HealthConfig;
use crate::reliability::CircuitBreakerConfig;
use crate::session::SessionConfig;
use crate::traits::{GenerationOptions, ModelInvocationContext, ModelInvocationResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default number of concurrent calls an adapter accepts.
const DEFAULT_MAX_CONCURRENT: usize = 16;

/// What an adapter can be asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Single-prompt text completion.
    Generate,
    /// Conversational chat with optional system message.
    Chat,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generate => write!(f, "generate"),
            Self::Chat => write!(f, "chat"),
        }
    }
}

/// Controls when adapters are warmed up during gateway startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WarmupPolicy {
    /// Warm every adapter during [`build`](crate::runtime::ModelGatewayBuilder::build);
    /// a failed warmup aborts startup.
    Eager,
    /// Defer warmup to the adapter's first call. This is the default.
    #[default]
    Lazy,
    /// Spawn warmups in background tasks; failures are logged only.
    Background,
}

impl fmt::Display for WarmupPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eager => write!(f, "eager"),
            Self::Lazy => write!(f, "lazy"),
            Self::Background => write!(f, "background"),
        }
    }
}

fn default_weight() -> u32 {
    1
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}

/// Static description of a registered adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterDescriptor {
    /// Unique id across the gateway's lifetime (e.g. `"local"`, `"gpu-0"`).
    pub id: String,
    /// What this adapter can serve.
    pub capabilities: BTreeSet<Capability>,
    /// Preference when candidates are built from a capability (higher first).
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Maximum number of in-flight calls.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Per-call timeout in milliseconds, combined with the request deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl AdapterDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capabilities: BTreeSet::from([Capability::Generate, Capability::Chat]),
            weight: default_weight(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            timeout_ms: None,
        }
    }

    pub fn with_capabilities(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities = capabilities.into_iter().collect();
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Validate invariants: non-empty id, at least one capability, non-zero
    /// concurrency and timeout.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(GatewayError::Config("Adapter id cannot be empty".to_string()));
        }
        if self.capabilities.is_empty() {
            return Err(GatewayError::Config(format!(
                "Adapter '{}' must declare at least one capability",
                self.id
            )));
        }
        if self.max_concurrent == 0 {
            return Err(GatewayError::Config(format!(
                "Adapter '{}' max_concurrent must be greater than 0",
                self.id
            )));
        }
        if self.timeout_ms == Some(0) {
            return Err(GatewayError::Config(format!(
                "Adapter '{}' timeout must be greater than 0",
                self.id
            )));
        }
        Ok(())
    }
}

/// How the candidates of a [`ModelRoute`] are ordered before the fallback
/// chain runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RouteStrategy {
    /// Primary first, then fallbacks in declaration order. This is the default.
    #[default]
    Ordered,
    /// Candidates sorted by health score (declaration order on ties).
    HealthRanked,
    /// Candidates are identical shards; order comes from the sharding layer.
    Sharded,
}

/// Maps a logical model id onto an ordered list of adapters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRoute {
    /// Logical model id requested by callers.
    pub model_id: String,
    /// Primary adapter first, then fallbacks.
    pub adapters: Vec<String>,
    #[serde(default)]
    pub strategy: RouteStrategy,
}

impl ModelRoute {
    /// An [`Ordered`](RouteStrategy::Ordered) route: `primary` then `fallbacks`.
    pub fn new(model_id: impl Into<String>, primary: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            adapters: vec![primary.into()],
            strategy: RouteStrategy::Ordered,
        }
    }

    /// A [`Sharded`](RouteStrategy::Sharded) route over identical instances.
    pub fn sharded(model_id: impl Into<String>, shards: Vec<String>) -> Self {
        Self {
            model_id: model_id.into(),
            adapters: shards,
            strategy: RouteStrategy::Sharded,
        }
    }

    pub fn with_fallback(mut self, adapter_id: impl Into<String>) -> Self {
        self.adapters.push(adapter_id.into());
        self
    }

    pub fn with_strategy(mut self, strategy: RouteStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.model_id.trim().is_empty() {
            return Err(GatewayError::Config("Route model_id cannot be empty".to_string()));
        }
        if self.adapters.is_empty() {
            return Err(GatewayError::Config(format!(
                "Route '{}' must list at least one adapter",
                self.model_id
            )));
        }
        let mut seen = BTreeSet::new();
        for id in &self.adapters {
            if !seen.insert(id.as_str()) {
                return Err(GatewayError::Config(format!(
                    "Route '{}' lists adapter '{}' more than once",
                    self.model_id, id
                )));
            }
        }
        Ok(())
    }
}

/// A single invocation request.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    /// Logical model id (a route) or an adapter id.
    pub model_id: String,
    pub prompt: String,
    pub variables: HashMap<String, serde_json::Value>,
    pub session_id: Option<String>,
    /// Upper bound applied to every adapter call made for this request.
    pub deadline: Option<Duration>,
    /// Estimated prompt size; derived from the prompt when absent.
    pub estimated_tokens: Option<u64>,
    /// Estimated accelerator memory the request needs.
    pub estimated_vram_mb: Option<u64>,
    pub options: GenerationOptions,
    pub cancellation: CancellationToken,
}

impl InvokeRequest {
    pub fn new(model_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            prompt: prompt.into(),
            variables: HashMap::new(),
            session_id: None,
            deadline: None,
            estimated_tokens: None,
            estimated_vram_mb: None,
            options: GenerationOptions::default(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.variables.insert(key.into(), value);
        self
    }

    pub fn with_estimated_tokens(mut self, tokens: u64) -> Self {
        self.estimated_tokens = Some(tokens);
        self
    }

    pub fn with_estimated_vram_mb(mut self, vram_mb: u64) -> Self {
        self.estimated_vram_mb = Some(vram_mb);
        self
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// The per-call context handed to adapters.
    pub fn context(&self) -> ModelInvocationContext {
        ModelInvocationContext {
            prompt: self.prompt.clone(),
            variables: self.variables.clone(),
            cancellation: self.cancellation.clone(),
            session_id: self.session_id.clone(),
            estimated_tokens: self.estimated_tokens,
            options: self.options.clone(),
        }
    }
}

/// A successful gateway call together with its attempt trace.
#[derive(Debug, Clone)]
pub struct InvocationOutcome {
    pub result: ModelInvocationResult,
    /// The adapter that produced `result`.
    pub adapter_id: String,
    /// Candidates that failed before `adapter_id` answered, in order.
    pub attempts: Vec<AttemptFailure>,
}

impl InvocationOutcome {
    /// Whether a candidate other than the first one answered.
    pub fn used_fallback(&self) -> bool {
        !self.attempts.is_empty()
    }
}

/// Declarative description of an adapter to construct from configuration.
///
/// # Example JSON
///
/// ```json
/// {
///   "id": "local",
///   "kind": "local/daemon",
///   "capabilities": ["chat"],
///   "max_concurrent": 4,
///   "options": { "model": "llama3.2", "base_url": "http://127.0.0.1:11434" }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterSpec {
    #[serde(flatten)]
    pub descriptor: AdapterDescriptor,
    /// Adapter implementation (`"local/daemon"`, `"remote/openai"`,
    /// `"local/mistralrs"`).
    pub kind: String,
    /// Kind-specific options. Defaults to `{}`.
    #[serde(default)]
    pub options: serde_json::Value,
}

/// Whole-gateway configuration as supplied by an external config loader.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub adapters: Vec<AdapterSpec>,
    #[serde(default)]
    pub routes: Vec<ModelRoute>,
    #[serde(default)]
    pub budgets: Vec<BudgetLedger>,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub sessions: SessionConfig,
    #[serde(default)]
    pub warmup: WarmupPolicy,
}

impl GatewayConfig {
    /// Validate every section that can be checked without constructing
    /// adapters.
    pub fn validate(&self) -> Result<()> {
        for spec in &self.adapters {
            spec.descriptor.validate()?;
        }
        for route in &self.routes {
            route.validate()?;
        }
        for ledger in &self.budgets {
            ledger.validate()?;
        }
        self.circuit_breaker.validate()?;
        self.health.validate()?;
        self.sessions.validate()?;
        Ok(())
    }
}

/// Parse and validate a [`GatewayConfig`] from a JSON string.
pub fn config_from_str(s: &str) -> Result<GatewayConfig> {
    let config: GatewayConfig = serde_json::from_str(s)
        .map_err(|e| GatewayError::Config(format!("Invalid gateway config JSON: {}", e)))?;
    config.validate()?;
    Ok(config)
}

/// Read and parse a [`GatewayConfig`] from a JSON file.
pub fn config_from_file(path: impl AsRef<Path>) -> Result<GatewayConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| {
        GatewayError::Config(format!(
            "Failed to read gateway config file '{}': {}",
            path.display(),
            e
        ))
    })?;
    config_from_str(&contents)
}
