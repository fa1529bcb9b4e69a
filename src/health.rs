//! Rolling latency/success statistics per adapter and the derived quality
//! score used to rank candidates.

use crate::error::{GatewayError, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Scoring parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Samples kept per adapter; older ones are overwritten.
    pub window_size: usize,
    /// Weight of the success rate in the score.
    pub success_weight: f64,
    /// Weight of the latency term in the score. Must not exceed
    /// `success_weight`.
    pub latency_weight: f64,
    /// Latency (ms) at which the latency term scores 0.5.
    pub reference_latency_ms: f64,
    /// Score reported for adapters without samples.
    pub neutral_score: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            window_size: 100,
            success_weight: 0.7,
            latency_weight: 0.3,
            reference_latency_ms: 1_000.0,
            neutral_score: 0.5,
        }
    }
}

impl HealthConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(GatewayError::Config(
                "Health window_size must be greater than 0".to_string(),
            ));
        }
        if !(self.success_weight.is_finite() && self.latency_weight.is_finite())
            || self.success_weight < 0.0
            || self.latency_weight < 0.0
            || self.success_weight + self.latency_weight <= 0.0
        {
            return Err(GatewayError::Config(
                "Health weights must be non-negative and not both zero".to_string(),
            ));
        }
        if self.success_weight < self.latency_weight {
            return Err(GatewayError::Config(
                "Health success_weight must be at least latency_weight".to_string(),
            ));
        }
        if !(self.reference_latency_ms.is_finite() && self.reference_latency_ms > 0.0) {
            return Err(GatewayError::Config(
                "Health reference_latency_ms must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.neutral_score) {
            return Err(GatewayError::Config(
                "Health neutral_score must be within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

/// One observed adapter call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthSample {
    pub latency_ms: f64,
    pub success: bool,
    pub timestamp: Instant,
}

/// Per-adapter ring buffers of [`HealthSample`]s.
///
/// Windows are created on first record and shared by all callers; appends to
/// different adapters never contend.
pub struct HealthScorer {
    config: HealthConfig,
    windows: DashMap<String, Mutex<VecDeque<HealthSample>>>,
}

impl HealthScorer {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Append one observation, evicting the oldest when the window is full.
    pub fn record(&self, adapter_id: &str, latency: Duration, success: bool) {
        let sample = HealthSample {
            latency_ms: latency.as_secs_f64() * 1000.0,
            success,
            timestamp: Instant::now(),
        };
        if let Some(window) = self.windows.get(adapter_id) {
            self.push(&window, sample);
            return;
        }
        let window = self
            .windows
            .entry(adapter_id.to_string())
            .or_insert_with(|| {
                Mutex::new(VecDeque::with_capacity(self.config.window_size.max(1)))
            });
        self.push(&window, sample);
    }

    fn push(&self, window: &Mutex<VecDeque<HealthSample>>, sample: HealthSample) {
        let mut samples = window.lock().unwrap_or_else(PoisonError::into_inner);
        if samples.len() >= self.config.window_size.max(1) {
            samples.pop_front();
        }
        samples.push_back(sample);
    }

    /// Quality score in `[0, 1]`: a weighted average of the success rate and
    /// `reference / (reference + mean_latency)`.
    pub fn score(&self, adapter_id: &str) -> f64 {
        let Some(window) = self.windows.get(adapter_id) else {
            return self.config.neutral_score;
        };
        let samples = window.lock().unwrap_or_else(PoisonError::into_inner);
        if samples.is_empty() {
            return self.config.neutral_score;
        }

        let n = samples.len() as f64;
        let successes = samples.iter().filter(|s| s.success).count() as f64;
        let mean_latency = samples.iter().map(|s| s.latency_ms).sum::<f64>() / n;

        let success_rate = successes / n;
        let reference = self.config.reference_latency_ms;
        let latency_score = reference / (reference + mean_latency.max(0.0));

        let ws = self.config.success_weight;
        let wl = self.config.latency_weight;
        ((ws * success_rate + wl * latency_score) / (ws + wl)).clamp(0.0, 1.0)
    }

    pub fn sample_count(&self, adapter_id: &str) -> usize {
        self.windows
            .get(adapter_id)
            .map(|w| w.lock().unwrap_or_else(PoisonError::into_inner).len())
            .unwrap_or(0)
    }

    /// Sort `candidates` by descending score, keeping declaration order on
    /// ties.
    pub fn rank(&self, candidates: &[String]) -> Vec<String> {
        let mut scored: Vec<(f64, &String)> =
            candidates.iter().map(|id| (self.score(id), id)).collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
        scored.into_iter().map(|(_, id)| id.clone()).collect()
    }

    /// Drop an adapter's window.
    pub fn forget(&self, adapter_id: &str) {
        self.windows.remove(adapter_id);
    }
}

impl Default for HealthScorer {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}
