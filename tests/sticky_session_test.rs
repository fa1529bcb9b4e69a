//! Session affinity through the gateway.

use std::sync::Arc;
use std::time::Duration;
use xervo_gateway::api::{AdapterDescriptor, InvokeRequest, ModelRoute, RouteStrategy};
use xervo_gateway::error::InvocationError;
use xervo_gateway::reliability::CircuitBreakerConfig;
use xervo_gateway::runtime::ModelGateway;
use xervo_gateway::session::SessionConfig;
mod common;
use common::mock_support::{MockAdapter, mock};

async fn two_adapter_gateway(
    strategy: RouteStrategy,
) -> (Arc<ModelGateway>, Arc<MockAdapter>, Arc<MockAdapter>) {
    let (a_descriptor, a) = mock("a");
    let (b_descriptor, b) = mock("b");
    let gateway = ModelGateway::builder()
        .register_adapter(a_descriptor, a.clone())
        .register_adapter(b_descriptor, b.clone())
        .route(
            ModelRoute::new("chat", "a")
                .with_fallback("b")
                .with_strategy(strategy),
        )
        .build()
        .await
        .unwrap();
    (gateway, a, b)
}

#[tokio::test]
async fn test_session_stays_pinned_when_ranking_changes() {
    let (gateway, _a, _b) = two_adapter_gateway(RouteStrategy::HealthRanked).await;

    let first = gateway
        .invoke(InvokeRequest::new("chat", "one").with_session("s1"))
        .await
        .unwrap();
    assert_eq!(first.adapter_id, "a");

    // Make b clearly the better adapter.
    let health = gateway.runtime_state().health();
    for _ in 0..10 {
        health.record("a", Duration::from_millis(900), true);
        health.record("b", Duration::from_millis(5), true);
    }
    assert!(health.score("b") > health.score("a"));

    let second = gateway
        .invoke(InvokeRequest::new("chat", "two").with_session("s1"))
        .await
        .unwrap();
    assert_eq!(second.adapter_id, "a");

    // A fresh session follows the new ranking.
    let other = gateway
        .invoke(InvokeRequest::new("chat", "three").with_session("s2"))
        .await
        .unwrap();
    assert_eq!(other.adapter_id, "b");
}

#[tokio::test]
async fn test_pin_moves_to_the_adapter_that_answered() {
    let (gateway, a, _b) = two_adapter_gateway(RouteStrategy::Ordered).await;

    gateway
        .invoke(InvokeRequest::new("chat", "one").with_session("s1"))
        .await
        .unwrap();
    assert_eq!(gateway.sessions().get("s1").unwrap().adapter_id, "a");

    a.fail_with(Some(InvocationError::ServiceUnavailable));
    let outcome = gateway
        .invoke(InvokeRequest::new("chat", "two").with_session("s1"))
        .await
        .unwrap();
    assert_eq!(outcome.adapter_id, "b");
    assert_eq!(gateway.sessions().get("s1").unwrap().adapter_id, "b");

    // Recovery of a does not pull the session back.
    a.fail_with(None);
    let outcome = gateway
        .invoke(InvokeRequest::new("chat", "three").with_session("s1"))
        .await
        .unwrap();
    assert_eq!(outcome.adapter_id, "b");
}

#[tokio::test]
async fn test_open_circuit_breaks_the_pin() {
    let (a_descriptor, a) = mock("a");
    let (b_descriptor, b) = mock("b");
    let gateway = ModelGateway::builder()
        .register_adapter(a_descriptor, a.clone())
        .register_adapter(b_descriptor, b.clone())
        .route(ModelRoute::new("chat", "a").with_fallback("b"))
        .circuit_breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        })
        .build()
        .await
        .unwrap();

    gateway.sessions().pin("s1", "a");
    a.fail_with(Some(InvocationError::ServiceUnavailable));
    gateway
        .invoke(InvokeRequest::new("chat", "one"))
        .await
        .unwrap();

    let outcome = gateway
        .invoke(InvokeRequest::new("chat", "two").with_session("s1"))
        .await
        .unwrap();
    assert_eq!(outcome.adapter_id, "b");
    assert!(outcome.attempts.is_empty());
    assert_eq!(a.calls(), 1);
}

#[tokio::test]
async fn test_expired_pin_is_replaced() {
    let (a_descriptor, a) = mock("a");
    let (b_descriptor, b) = mock("b");
    let gateway = ModelGateway::builder()
        .register_adapter(a_descriptor, a)
        .register_adapter(b_descriptor, b)
        .route(ModelRoute::new("chat", "a").with_fallback("b"))
        .sessions(SessionConfig {
            ttl_secs: 1,
            sweep_interval_secs: None,
        })
        .build()
        .await
        .unwrap();

    gateway.sessions().pin("s1", "b");
    let outcome = gateway
        .invoke(InvokeRequest::new("chat", "one").with_session("s1"))
        .await
        .unwrap();
    assert_eq!(outcome.adapter_id, "b");

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(gateway.sessions().get("s1").is_none());

    let health = gateway.runtime_state().health();
    for _ in 0..5 {
        health.record("a", Duration::from_millis(1), true);
    }
    health.record("b", Duration::from_millis(500), false);

    let outcome = gateway
        .invoke(InvokeRequest::new("chat", "two").with_session("s1"))
        .await
        .unwrap();
    assert_eq!(outcome.adapter_id, "a");
}

#[tokio::test]
async fn test_deregistration_evicts_pins() {
    let (gateway, _a, _b) = two_adapter_gateway(RouteStrategy::Ordered).await;
    gateway
        .invoke(InvokeRequest::new("chat", "one").with_session("s1"))
        .await
        .unwrap();
    assert_eq!(gateway.sessions().len(), 1);

    gateway.deregister_adapter("a").await.unwrap();
    assert!(gateway.sessions().is_empty());

    let outcome = gateway
        .invoke(InvokeRequest::new("chat", "two").with_session("s1"))
        .await
        .unwrap();
    assert_eq!(outcome.adapter_id, "b");
}
