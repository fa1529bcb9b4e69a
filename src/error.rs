//! Error types for the gateway.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Failure reported by a single adapter call.
///
/// Adapters map their backend-specific failures (HTTP status codes, engine
/// errors) onto these variants so the gateway can classify them without
/// knowing which backend produced them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvocationError {
    /// An HTTP or transport-level error from a remote or daemon backend.
    #[error("API error: {0}")]
    Api(String),

    /// An error during model inference (tokenization, forward pass, etc.).
    #[error("Inference error: {0}")]
    Inference(String),

    /// The backend returned HTTP 429 (too many requests).
    #[error("Rate limited")]
    RateLimited,

    /// The backend returned HTTP 401/403 (bad or missing credentials).
    #[error("Unauthorized")]
    Unauthorized,

    /// The call exceeded its deadline.
    #[error("Timeout")]
    Timeout,

    /// The backend answered with a 5xx status or refused the connection.
    #[error("Service unavailable")]
    ServiceUnavailable,

    /// The backend rejected the request itself (HTTP 400/422, empty prompt).
    /// Caller-correctable; never counted against the adapter.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The adapter was invoked while it reports itself unavailable.
    #[error("Adapter not ready: {0}")]
    NotReady(String),
}

impl InvocationError {
    /// Returns `true` for transient errors that may succeed on a later call:
    /// [`RateLimited`](Self::RateLimited), [`Timeout`](Self::Timeout), and
    /// [`ServiceUnavailable`](Self::ServiceUnavailable).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Timeout | Self::ServiceUnavailable
        )
    }

    /// Whether this failure is the backend's fault and should feed the
    /// circuit breaker and the health window.
    pub fn counts_toward_breaker(&self) -> bool {
        !matches!(self, Self::InvalidRequest(_) | Self::NotReady(_))
    }
}

/// The resource dimension a [`GatewayError::BudgetExceeded`] rejection refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BudgetDimension {
    /// Estimated prompt tokens.
    Tokens,
    /// Estimated accelerator memory in MiB.
    VramMb,
}

impl fmt::Display for BudgetDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tokens => write!(f, "tokens"),
            Self::VramMb => write!(f, "vram_mb"),
        }
    }
}

/// One failed attempt inside a fallback chain.
#[derive(Debug, Clone)]
pub struct AttemptFailure {
    /// The adapter that was tried.
    pub adapter_id: String,
    /// Why it was rejected.
    pub error: GatewayError,
}

/// Every candidate of a fallback chain failed.
#[derive(Debug, Clone)]
pub struct FallbackExhausted {
    /// The model id, adapter id, or capability the chain was serving.
    pub target: String,
    /// One entry per attempted candidate, in attempt order.
    pub attempts: Vec<AttemptFailure>,
}

impl fmt::Display for FallbackExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "All {} candidate(s) failed for '{}'",
            self.attempts.len(),
            self.target
        )?;
        for (i, attempt) in self.attempts.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{}[{}] {}", sep, attempt.adapter_id, attempt.error)?;
        }
        Ok(())
    }
}

/// Unified error type surfaced by the gateway.
///
/// Every variant identifies the pipeline stage that failed (see
/// [`stage`](Self::stage)); aggregate failures carry the error of every
/// attempted adapter.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Invalid or missing configuration (bad route, unknown option, etc.).
    #[error("Configuration error: {0}")]
    Config(String),

    /// An adapter with this id has already been registered.
    #[error("Duplicate adapter: '{0}' is already registered")]
    DuplicateAdapter(String),

    /// No adapter, route, or capability matches the requested id.
    #[error("Adapter not registered: '{0}'")]
    AdapterNotRegistered(String),

    /// The availability probe reported the adapter as down, or the adapter is
    /// saturated.
    #[error("Adapter unavailable: '{adapter_id}' ({reason})")]
    AdapterUnavailable { adapter_id: String, reason: String },

    /// The adapter's circuit breaker is open; the backend was not contacted.
    #[error("Circuit open for adapter '{adapter_id}' (retry in {retry_after:?})")]
    CircuitOpen {
        adapter_id: String,
        retry_after: Duration,
    },

    /// The request's estimated cost exceeds the model's static budget.
    #[error(
        "Budget exceeded for model '{model_id}': {dimension} requested {requested}, limit {limit}"
    )]
    BudgetExceeded {
        model_id: String,
        dimension: BudgetDimension,
        requested: u64,
        limit: u64,
    },

    /// The adapter was called and failed.
    #[error("Invocation of adapter '{adapter_id}' failed: {source}")]
    Invocation {
        adapter_id: String,
        #[source]
        source: InvocationError,
    },

    /// The caller cancelled the request.
    #[error("Request cancelled")]
    Cancelled,

    /// The target resolved to an empty candidate list.
    #[error("No candidate adapters for '{0}'")]
    NoCandidates(String),

    /// Every candidate of the fallback chain failed.
    #[error("{0}")]
    AggregateFallback(FallbackExhausted),
}

impl GatewayError {
    pub(crate) fn unavailable(adapter_id: &str, reason: impl Into<String>) -> Self {
        Self::AdapterUnavailable {
            adapter_id: adapter_id.to_string(),
            reason: reason.into(),
        }
    }

    /// The pipeline stage this error originates from.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Config(_) | Self::DuplicateAdapter(_) => "config",
            Self::AdapterNotRegistered(_) | Self::AdapterUnavailable { .. } => "resolve",
            Self::NoCandidates(_) => "route",
            Self::CircuitOpen { .. } => "circuit",
            Self::BudgetExceeded { .. } => "budget",
            Self::Invocation { .. } => "invoke",
            Self::Cancelled => "cancel",
            Self::AggregateFallback(_) => "fallback",
        }
    }

    /// Transient errors that advance a fallback chain to its next candidate.
    pub fn triggers_fallback(&self) -> bool {
        matches!(
            self,
            Self::AdapterUnavailable { .. } | Self::CircuitOpen { .. } | Self::Invocation { .. }
        )
    }

    /// Whether the error should be recorded as a failure by the circuit
    /// breaker. Circuit-open rejections, caller-side validation errors, and
    /// cancellations are not.
    pub fn counts_toward_breaker(&self) -> bool {
        match self {
            Self::Invocation { source, .. } => source.counts_toward_breaker(),
            _ => false,
        }
    }

    /// Per-attempt failures of an aggregate error, empty otherwise.
    pub fn attempts(&self) -> &[AttemptFailure] {
        match self {
            Self::AggregateFallback(exhausted) => &exhausted.attempts,
            _ => &[],
        }
    }
}
