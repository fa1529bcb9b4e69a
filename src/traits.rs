//! Core trait that every backend adapter must satisfy, plus the per-call
//! context and result types it exchanges with the gateway.

use crate::error::InvocationError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// The family of backend an adapter wraps.
///
/// Only used for labelling logs and metrics; the gateway never branches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    /// An in-process engine driving a local accelerator (GPU, Metal, CPU).
    LocalAccelerated,
    /// A separate inference daemon on the same host (chat-style HTTP API).
    LocalDaemon,
    /// A hosted API reached over the network.
    RemoteApi,
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalAccelerated => write!(f, "local_accelerated"),
            Self::LocalDaemon => write!(f, "local_daemon"),
            Self::RemoteApi => write!(f, "remote_api"),
        }
    }
}

/// Sampling and length parameters for text generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Maximum number of tokens to generate. Backend default if `None`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
    /// Sampling temperature (0.0 = greedy, higher = more random).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Nucleus sampling threshold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
}

/// Everything an adapter needs to serve one call.
///
/// Built by the gateway from an [`InvokeRequest`](crate::api::InvokeRequest)
/// and handed to each attempted adapter by shared reference.
#[derive(Debug, Clone, Default)]
pub struct ModelInvocationContext {
    /// The user prompt.
    pub prompt: String,
    /// Free-form request variables. Built-in chat adapters read `"system"`
    /// as the system message.
    pub variables: HashMap<String, serde_json::Value>,
    /// Cancelled by the caller to abort the in-flight call.
    pub cancellation: CancellationToken,
    /// Logical session the request belongs to, if any.
    pub session_id: Option<String>,
    /// Caller-supplied estimate of the prompt size in tokens.
    pub estimated_tokens: Option<u64>,
    /// Sampling parameters.
    pub options: GenerationOptions,
}

impl ModelInvocationContext {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// The `"system"` variable, when present and a string.
    pub fn system_prompt(&self) -> Option<&str> {
        self.variables.get("system").and_then(|v| v.as_str())
    }
}

/// The output of one successful adapter call.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInvocationResult {
    /// The generated text.
    pub output: String,
    /// Wall-clock time spent inside the adapter, in milliseconds.
    pub latency_ms: f64,
    /// Backend identifier (e.g. `"ollama/llama3"`, `"openai/gpt-4o-mini"`).
    pub provider: String,
    /// Total tokens consumed, if reported by the backend.
    pub tokens_used: Option<u64>,
    /// Backend-specific extras (finish reason, model revision, ...).
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ModelInvocationResult {
    /// Build a result whose latency is measured from `started` to now.
    pub fn completed(
        output: impl Into<String>,
        provider: impl Into<String>,
        started: Instant,
    ) -> Self {
        Self {
            output: output.into(),
            latency_ms: started.elapsed().as_secs_f64() * 1000.0,
            provider: provider.into(),
            tokens_used: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_tokens_used(mut self, tokens: Option<u64>) -> Self {
        self.tokens_used = tokens;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// A uniform wrapper exposing one model backend.
///
/// Adapters are registered with the gateway together with an
/// [`AdapterDescriptor`](crate::api::AdapterDescriptor) and must be safe to
/// invoke concurrently up to the descriptor's `max_concurrent`.
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    /// Backend family, for labels only.
    fn kind(&self) -> AdapterKind;

    /// Cheap liveness/readiness check. Must not fail: any error collapses to
    /// `false`.
    async fn is_available(&self) -> bool;

    /// Run one generation call.
    ///
    /// Returns [`InvocationError::NotReady`] if called while unavailable.
    async fn invoke(
        &self,
        ctx: &ModelInvocationContext,
    ) -> std::result::Result<ModelInvocationResult, InvocationError>;

    /// Optional one-time warmup hook (load weights, open connections).
    /// The default implementation is a no-op.
    async fn warmup(&self) -> std::result::Result<(), InvocationError> {
        Ok(())
    }
}
