//! Sticky-session affinity: pins a session to the adapter that first served
//! it for a TTL window.

use crate::error::{GatewayError, Result};
use crate::health::HealthScorer;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Affinity parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long a pin survives without being read.
    pub ttl_secs: u64,
    /// Period of the optional background sweep. `None` disables it and
    /// relies on lazy expiry only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sweep_interval_secs: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 30 * 60,
            sweep_interval_secs: None,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.ttl_secs == 0 {
            return Err(GatewayError::Config(
                "Session ttl_secs must be greater than 0".to_string(),
            ));
        }
        if self.sweep_interval_secs == Some(0) {
            return Err(GatewayError::Config(
                "Session sweep_interval_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// A live session pin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionAffinityEntry {
    pub session_id: String,
    pub adapter_id: String,
    pub expires_at: Instant,
}

impl SessionAffinityEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Maps session ids to adapters.
///
/// Expiry is checked on read; [`spawn_sweeper`](Self::spawn_sweeper) can
/// additionally bound memory held by abandoned sessions.
pub struct StickySessionRouter {
    ttl: Duration,
    entries: DashMap<String, SessionAffinityEntry>,
}

impl StickySessionRouter {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(Duration::from_secs(config.ttl_secs))
    }

    /// Choose the adapter for `session_id` among `candidates`.
    ///
    /// A live pin is honored (and its TTL renewed) when its adapter is still
    /// a candidate and `eligible`. Otherwise the best health-ranked eligible
    /// candidate is pinned; if none is eligible the top-ranked one is used so
    /// the fallback chain can report why. Returns `None` only when
    /// `candidates` is empty.
    pub fn route<F>(
        &self,
        session_id: &str,
        candidates: &[String],
        scorer: &HealthScorer,
        eligible: F,
    ) -> Option<String>
    where
        F: Fn(&str) -> bool,
    {
        let now = Instant::now();
        if let Some(mut entry) = self.entries.get_mut(session_id) {
            if !entry.is_expired(now)
                && candidates.contains(&entry.adapter_id)
                && eligible(&entry.adapter_id)
            {
                entry.expires_at = now + self.ttl;
                return Some(entry.adapter_id.clone());
            }
        }
        self.entries
            .remove_if(session_id, |_, entry| entry.is_expired(now));

        let ranked = scorer.rank(candidates);
        let choice = ranked
            .iter()
            .find(|id| eligible(id))
            .or_else(|| ranked.first())
            .cloned()?;
        self.pin(session_id, &choice);
        Some(choice)
    }

    /// Create or overwrite the pin for `session_id` with a fresh TTL.
    pub fn pin(&self, session_id: &str, adapter_id: &str) {
        tracing::debug!(session = %session_id, adapter = %adapter_id, "Pinning session");
        self.entries.insert(
            session_id.to_string(),
            SessionAffinityEntry {
                session_id: session_id.to_string(),
                adapter_id: adapter_id.to_string(),
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// The live pin for `session_id`, if any.
    pub fn get(&self, session_id: &str) -> Option<SessionAffinityEntry> {
        let now = Instant::now();
        self.entries
            .get(session_id)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.value().clone())
    }

    /// Remove every pin pointing at `adapter_id`. Returns how many were
    /// removed.
    pub fn evict_adapter(&self, adapter_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.adapter_id != adapter_id);
        before.saturating_sub(self.entries.len())
    }

    /// Remove expired pins. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Periodically sweep expired pins until the router is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let router: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(router) = router.upgrade() else {
                    break;
                };
                let removed = router.sweep_expired();
                if removed > 0 {
                    tracing::debug!(removed, "Swept expired session pins");
                }
            }
        })
    }
}
