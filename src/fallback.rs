//! Ordered multi-candidate execution with a full attempt trace.

use crate::error::{AttemptFailure, FallbackExhausted, GatewayError, Result};
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Result of a chain that ended in a success.
#[derive(Debug)]
pub struct ChainSuccess<T> {
    pub value: T,
    /// The candidate that produced `value`.
    pub adapter_id: String,
    /// Failed candidates tried before `adapter_id`, in order.
    pub attempts: Vec<AttemptFailure>,
}

/// An ordered list of adapter ids to try one after another.
#[derive(Debug, Clone)]
pub struct FallbackChain {
    candidates: Vec<String>,
}

impl FallbackChain {
    pub fn new(candidates: Vec<String>) -> Self {
        Self { candidates }
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// Run `attempt` for each candidate until one succeeds.
    ///
    /// Errors that [`trigger fallback`](GatewayError::triggers_fallback) are
    /// recorded and the next candidate is tried; any other error ends the
    /// chain and is returned as is. A cancelled token stops the chain before
    /// the next attempt. When every candidate failed the error is
    /// [`GatewayError::AggregateFallback`] carrying one entry per candidate.
    pub async fn execute<T, F, Fut>(
        &self,
        target: &str,
        cancellation: &CancellationToken,
        mut attempt: F,
    ) -> Result<ChainSuccess<T>>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.candidates.is_empty() {
            return Err(GatewayError::NoCandidates(target.to_string()));
        }

        let mut attempts = Vec::new();
        for (index, adapter_id) in self.candidates.iter().enumerate() {
            if cancellation.is_cancelled() {
                return Err(GatewayError::Cancelled);
            }
            if index > 0 {
                metrics::counter!("gateway_fallback.attempts", "target" => target.to_string())
                    .increment(1);
            }

            match attempt(adapter_id.clone()).await {
                Ok(value) => {
                    if !attempts.is_empty() {
                        tracing::info!(
                            target_id = %target,
                            adapter = %adapter_id,
                            failed = attempts.len(),
                            "Fallback candidate answered"
                        );
                    }
                    return Ok(ChainSuccess {
                        value,
                        adapter_id: adapter_id.clone(),
                        attempts,
                    });
                }
                Err(e) if e.triggers_fallback() => {
                    tracing::warn!(
                        target_id = %target,
                        adapter = %adapter_id,
                        attempt = index + 1,
                        stage = e.stage(),
                        error = %e,
                        "Candidate failed, trying next"
                    );
                    attempts.push(AttemptFailure {
                        adapter_id: adapter_id.clone(),
                        error: e,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        Err(GatewayError::AggregateFallback(FallbackExhausted {
            target: target.to_string(),
            attempts,
        }))
    }
}
