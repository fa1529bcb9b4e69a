#![allow(dead_code)]

//! Mock adapter for unit tests.
//!
//! Behavior can be flipped at runtime through the atomics so a test can take
//! an adapter down or make it fail mid-scenario.

use crate::api::AdapterDescriptor;
use crate::error::InvocationError;
use crate::traits::{AdapterKind, ModelAdapter, ModelInvocationContext, ModelInvocationResult};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Mock adapter with configurable availability, failures, and latency.
pub struct MockAdapter {
    name: String,
    kind: AdapterKind,
    available: AtomicBool,
    failing: AtomicBool,
    failure: InvocationError,
    delay: Duration,
    call_count: AtomicU32,
    probe_count: AtomicU32,
    warmup_count: Arc<AtomicU32>,
}

impl MockAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: AdapterKind::LocalDaemon,
            available: AtomicBool::new(true),
            failing: AtomicBool::new(false),
            failure: InvocationError::ServiceUnavailable,
            delay: Duration::ZERO,
            call_count: AtomicU32::new(0),
            probe_count: AtomicU32::new(0),
            warmup_count: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn with_kind(mut self, kind: AdapterKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn unavailable(self) -> Self {
        self.available.store(false, Ordering::SeqCst);
        self
    }

    pub fn failing(self) -> Self {
        self.failing.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_failure(mut self, failure: InvocationError) -> Self {
        self.failure = failure;
        self.failing.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay = Duration::from_millis(delay_ms);
        self
    }

    pub fn with_warmup_tracker(mut self, tracker: Arc<AtomicU32>) -> Self {
        self.warmup_count = tracker;
        self
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn probe_count(&self) -> u32 {
        self.probe_count.load(Ordering::SeqCst)
    }

    pub fn warmup_count(&self) -> u32 {
        self.warmup_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelAdapter for MockAdapter {
    fn kind(&self) -> AdapterKind {
        self.kind
    }

    async fn is_available(&self) -> bool {
        self.probe_count.fetch_add(1, Ordering::SeqCst);
        self.available.load(Ordering::SeqCst)
    }

    async fn invoke(
        &self,
        ctx: &ModelInvocationContext,
    ) -> Result<ModelInvocationResult, InvocationError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(self.failure.clone());
        }

        let output = format!("{}: {}", self.name, ctx.prompt);
        Ok(
            ModelInvocationResult::completed(output, format!("mock/{}", self.name), started)
                .with_tokens_used(Some(ctx.prompt.len() as u64)),
        )
    }

    async fn warmup(&self) -> Result<(), InvocationError> {
        self.warmup_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Register-ready pair of descriptor and shared mock.
pub fn mock_entry(id: &str) -> (AdapterDescriptor, Arc<MockAdapter>) {
    (AdapterDescriptor::new(id), Arc::new(MockAdapter::new(id)))
}
