//! Distributes requests across identical adapter instances (e.g. one per
//! GPU) of a sharded route.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Current occupancy of one shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShardLoad {
    pub in_flight: usize,
    pub capacity: usize,
}

impl ShardLoad {
    pub fn is_saturated(&self) -> bool {
        self.in_flight >= self.capacity
    }

    /// Fraction of capacity in use; a shard without capacity counts as full.
    fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            1.0
        } else {
            self.in_flight as f64 / self.capacity as f64
        }
    }
}

/// Shard groups keyed by logical model id.
#[derive(Default)]
pub struct ShardingLayer {
    groups: HashMap<String, Vec<String>>,
    next: AtomicUsize,
}

impl ShardingLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the shards serving `model_id`, replacing any previous group.
    pub fn add_group(&mut self, model_id: impl Into<String>, shards: Vec<String>) {
        self.groups.insert(model_id.into(), shards);
    }

    /// Drop `adapter_id` from every group. Returns `true` if any changed.
    pub fn remove_shard(&mut self, adapter_id: &str) -> bool {
        let mut changed = false;
        for shards in self.groups.values_mut() {
            let before = shards.len();
            shards.retain(|id| id != adapter_id);
            changed |= shards.len() != before;
        }
        changed
    }

    pub fn shards(&self, model_id: &str) -> Option<&[String]> {
        self.groups.get(model_id).map(Vec::as_slice)
    }

    /// Shard index for a session: the leading 8 bytes of
    /// SHA-256(session_id, 0x00, model_id), modulo the group size. Stable
    /// across processes and toolchain versions.
    fn hashed_index(session_id: &str, model_id: &str, len: usize) -> usize {
        let mut hasher = Sha256::new();
        hasher.update(session_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(model_id.as_bytes());
        let digest = hasher.finalize();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        (u64::from_be_bytes(prefix) % len as u64) as usize
    }

    /// Candidate order for one request to `model_id`.
    ///
    /// The preferred shard is picked by hashing `(session_id, model_id)`, or
    /// round-robin when there is no session. If it is saturated the least
    /// loaded shard goes first instead. The rest follow by ascending load,
    /// declaration order on ties. Returns `None` for an unknown model and an
    /// empty plan for an empty group.
    pub fn plan<F>(&self, session_id: Option<&str>, model_id: &str, load: F) -> Option<Vec<String>>
    where
        F: Fn(&str) -> ShardLoad,
    {
        let shards = self.groups.get(model_id)?;
        if shards.is_empty() {
            return Some(Vec::new());
        }

        let preferred = match session_id {
            Some(session) => Self::hashed_index(session, model_id, shards.len()),
            None => self.next.fetch_add(1, Ordering::Relaxed) % shards.len(),
        };

        let loads: Vec<ShardLoad> = shards.iter().map(|id| load(id)).collect();
        let mut rest: Vec<usize> = (0..shards.len()).collect();
        rest.sort_by(|&a, &b| {
            loads[a]
                .utilization()
                .partial_cmp(&loads[b].utilization())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let first = if loads[preferred].is_saturated() {
            rest[0]
        } else {
            preferred
        };
        rest.retain(|&i| i != first);

        let mut plan = Vec::with_capacity(shards.len());
        plan.push(shards[first].clone());
        plan.extend(rest.into_iter().map(|i| shards[i].clone()));

        tracing::trace!(model = %model_id, first = %plan[0], "Shard plan");
        Some(plan)
    }
}
