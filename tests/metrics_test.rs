use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use std::sync::Arc;
use xervo_gateway::api::{AdapterDescriptor, InvokeRequest, ModelRoute};
use xervo_gateway::budget::BudgetLedger;
use xervo_gateway::error::InvocationError;
use xervo_gateway::reliability::CircuitBreakerConfig;
use xervo_gateway::runtime::ModelGateway;
use xervo_gateway::traits::AdapterKind;
mod common;
use common::mock_support::MockAdapter;

fn has_label(labels: &[(&str, &str)], key: &str, value: &str) -> bool {
    labels.iter().any(|(k, v)| *k == key && *v == value)
}

// The global recorder can only be installed once per process, so every
// metric is checked from this single test.
#[tokio::test]
async fn test_gateway_emits_invocation_fallback_circuit_and_budget_metrics() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let _ = metrics::set_global_recorder(recorder);

    let local = Arc::new(
        MockAdapter::new("local")
            .with_kind(AdapterKind::LocalAccelerated)
            .failing(InvocationError::ServiceUnavailable),
    );
    let cloud = Arc::new(MockAdapter::new("cloud").with_kind(AdapterKind::RemoteApi));
    let gateway = ModelGateway::builder()
        .register_adapter(AdapterDescriptor::new("local"), local)
        .register_adapter(AdapterDescriptor::new("cloud"), cloud)
        .route(ModelRoute::new("chat", "local").with_fallback("cloud"))
        .budget(BudgetLedger::new("chat").with_token_budget(1_000))
        .circuit_breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        })
        .build()
        .await
        .unwrap();

    gateway.invoke(InvokeRequest::new("chat", "hi")).await.unwrap();
    gateway.invoke(InvokeRequest::new("chat", "hi")).await.unwrap();
    let _ = gateway
        .invoke(InvokeRequest::new("chat", "hi").with_estimated_tokens(5_000))
        .await;

    let snapshot = snapshotter.snapshot().into_vec();
    let find = |name: &str, expected: &[(&str, &str)]| {
        snapshot.iter().find_map(|(ckey, _, _, value)| {
            let key = ckey.key();
            if key.name() != name {
                return None;
            }
            let labels: Vec<(&str, &str)> =
                key.labels().map(|l| (l.key(), l.value())).collect();
            expected
                .iter()
                .all(|(k, v)| has_label(&labels, k, v))
                .then(|| value.clone())
        })
    };

    match find(
        "gateway_invocation.total",
        &[("adapter", "cloud"), ("kind", "remote_api"), ("status", "success")],
    ) {
        Some(&DebugValue::Counter(n)) => assert_eq!(n, 2),
        other => panic!("cloud success counter missing: {:?}", other),
    }
    match find(
        "gateway_invocation.total",
        &[("adapter", "local"), ("status", "failure")],
    ) {
        Some(&DebugValue::Counter(n)) => assert_eq!(n, 1),
        other => panic!("local failure counter missing: {:?}", other),
    }
    match find(
        "gateway_invocation.total",
        &[("adapter", "local"), ("status", "circuit_open")],
    ) {
        Some(&DebugValue::Counter(n)) => assert_eq!(n, 1),
        other => panic!("circuit_open counter missing: {:?}", other),
    }
    assert!(matches!(
        find(
            "gateway_invocation.duration_seconds",
            &[("adapter", "cloud"), ("kind", "remote_api")]
        ),
        Some(DebugValue::Histogram(_))
    ));
    match find("gateway_fallback.attempts", &[("target", "chat")]) {
        Some(&DebugValue::Counter(n)) => assert_eq!(n, 2),
        other => panic!("fallback counter missing: {:?}", other),
    }
    assert!(
        find(
            "gateway_circuit.transitions",
            &[("adapter", "local"), ("from", "closed"), ("to", "open")]
        )
        .is_some()
    );
    match find(
        "gateway_budget.rejections",
        &[("model", "chat"), ("dimension", "tokens")],
    ) {
        Some(&DebugValue::Counter(n)) => assert_eq!(n, 1),
        other => panic!("budget rejection counter missing: {:?}", other),
    }
}
