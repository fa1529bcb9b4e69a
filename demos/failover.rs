//! Failover example: a flaky "local" adapter in front of a steady "cloud"
//! adapter, showing fallback traces, the circuit breaker opening, and
//! session pinning. Needs no backend.
//!
//! Run with:
//! ```sh
//! cargo run --example failover
//! ```

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use xervo_gateway::api::{AdapterDescriptor, InvokeRequest, ModelRoute};
use xervo_gateway::error::InvocationError;
use xervo_gateway::reliability::CircuitBreakerConfig;
use xervo_gateway::runtime::ModelGateway;
use xervo_gateway::traits::{
    AdapterKind, ModelAdapter, ModelInvocationContext, ModelInvocationResult,
};

/// Fails every call after the first `healthy_calls`.
struct FlakyAdapter {
    name: &'static str,
    kind: AdapterKind,
    latency: Duration,
    healthy_calls: u32,
    calls: AtomicU32,
}

#[async_trait]
impl ModelAdapter for FlakyAdapter {
    fn kind(&self) -> AdapterKind {
        self.kind
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn invoke(
        &self,
        ctx: &ModelInvocationContext,
    ) -> Result<ModelInvocationResult, InvocationError> {
        let started = Instant::now();
        tokio::time::sleep(self.latency).await;
        if self.calls.fetch_add(1, Ordering::SeqCst) >= self.healthy_calls {
            return Err(InvocationError::ServiceUnavailable);
        }
        Ok(ModelInvocationResult::completed(
            format!("[{}] echo: {}", self.name, ctx.prompt),
            self.name,
            started,
        ))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let local = Arc::new(FlakyAdapter {
        name: "local",
        kind: AdapterKind::LocalAccelerated,
        latency: Duration::from_millis(10),
        healthy_calls: 2,
        calls: AtomicU32::new(0),
    });
    let cloud = Arc::new(FlakyAdapter {
        name: "cloud",
        kind: AdapterKind::RemoteApi,
        latency: Duration::from_millis(120),
        healthy_calls: u32::MAX,
        calls: AtomicU32::new(0),
    });

    let gateway = ModelGateway::builder()
        .register_adapter(AdapterDescriptor::new("local"), local)
        .register_adapter(AdapterDescriptor::new("cloud"), cloud)
        .route(ModelRoute::new("chat/default", "local").with_fallback("cloud"))
        .circuit_breaker(CircuitBreakerConfig {
            failure_threshold: 2,
            open_wait_ms: 2_000,
            ..Default::default()
        })
        .build()
        .await?;

    for i in 0..6 {
        let request = InvokeRequest::new("chat/default", format!("message {i}"))
            .with_session("demo-user")
            .with_deadline(Duration::from_secs(1));
        let outcome = gateway.invoke(request).await?;
        println!(
            "{} -> {} ({:.0} ms)",
            i, outcome.result.output, outcome.result.latency_ms
        );
        for attempt in &outcome.attempts {
            println!("    skipped {}: {}", attempt.adapter_id, attempt.error);
        }
    }

    for id in ["local", "cloud"] {
        let health = gateway.adapter_health(id).await?;
        println!(
            "{}: score {:.2}, circuit {}, {} samples",
            id, health.score, health.circuit_state, health.sample_count
        );
    }
    if let Some(pin) = gateway.sessions().get("demo-user") {
        println!("demo-user is pinned to {}", pin.adapter_id);
    }

    Ok(())
}
