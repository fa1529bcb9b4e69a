#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use xervo_gateway::api::{AdapterDescriptor, Capability};
use xervo_gateway::error::InvocationError;
use xervo_gateway::traits::{
    AdapterKind, ModelAdapter, ModelInvocationContext, ModelInvocationResult,
};

/// Scriptable adapter shared by the integration tests.
///
/// Every call is appended to a shared trace so a test can assert the exact
/// order in which adapters were tried.
pub struct MockAdapter {
    id: String,
    kind: AdapterKind,
    available: AtomicBool,
    failure: Mutex<Option<InvocationError>>,
    delay: Mutex<Duration>,
    calls: AtomicU32,
    probes: AtomicU32,
    trace: Arc<Mutex<Vec<String>>>,
}

impl MockAdapter {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: AdapterKind::LocalDaemon,
            available: AtomicBool::new(true),
            failure: Mutex::new(None),
            delay: Mutex::new(Duration::ZERO),
            calls: AtomicU32::new(0),
            probes: AtomicU32::new(0),
            trace: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_kind(mut self, kind: AdapterKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_trace(mut self, trace: Arc<Mutex<Vec<String>>>) -> Self {
        self.trace = trace;
        self
    }

    pub fn with_delay_ms(self, ms: u64) -> Self {
        *self.delay.lock().unwrap() = Duration::from_millis(ms);
        self
    }

    pub fn failing(self, error: InvocationError) -> Self {
        self.fail_with(Some(error));
        self
    }

    pub fn unavailable(self) -> Self {
        self.set_available(false);
        self
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn fail_with(&self, error: Option<InvocationError>) {
        *self.failure.lock().unwrap() = error;
    }

    pub fn set_delay_ms(&self, ms: u64) {
        *self.delay.lock().unwrap() = Duration::from_millis(ms);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> u32 {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelAdapter for MockAdapter {
    fn kind(&self) -> AdapterKind {
        self.kind
    }

    async fn is_available(&self) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.available.load(Ordering::SeqCst)
    }

    async fn invoke(
        &self,
        ctx: &ModelInvocationContext,
    ) -> Result<ModelInvocationResult, InvocationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.trace.lock().unwrap().push(self.id.clone());
        let started = Instant::now();

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }

        Ok(ModelInvocationResult::completed(
            format!("{} says: {}", self.id, ctx.prompt),
            format!("mock/{}", self.id),
            started,
        ))
    }
}

/// A mock together with the descriptor to register it under.
pub fn mock(id: &str) -> (AdapterDescriptor, Arc<MockAdapter>) {
    (AdapterDescriptor::new(id), Arc::new(MockAdapter::new(id)))
}

/// A chat-only descriptor with the given weight.
pub fn chat_descriptor(id: &str, weight: u32) -> AdapterDescriptor {
    AdapterDescriptor::new(id)
        .with_capabilities([Capability::Chat])
        .with_weight(weight)
}

pub fn new_trace() -> Arc<Mutex<Vec<String>>> {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn trace_of(trace: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
    trace.lock().unwrap().clone()
}
