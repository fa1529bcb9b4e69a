//! Static per-model token and VRAM ceilings, checked before any adapter is
//! contacted.

use crate::error::{BudgetDimension, GatewayError, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Approximate characters per token used when a request carries no estimate.
const CHARS_PER_TOKEN: usize = 4;

/// Resource ceilings for one model id. `None` leaves a dimension
/// unconstrained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetLedger {
    pub model_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vram_budget_mb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_budget: Option<u64>,
}

impl BudgetLedger {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            vram_budget_mb: None,
            token_budget: None,
        }
    }

    pub fn with_token_budget(mut self, tokens: u64) -> Self {
        self.token_budget = Some(tokens);
        self
    }

    pub fn with_vram_budget_mb(mut self, vram_mb: u64) -> Self {
        self.vram_budget_mb = Some(vram_mb);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.model_id.trim().is_empty() {
            return Err(GatewayError::Config(
                "Budget model_id cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Rough token count for `prompt`: one token per four characters, rounded up.
pub fn estimate_tokens(prompt: &str) -> u64 {
    prompt.chars().count().div_ceil(CHARS_PER_TOKEN) as u64
}

/// Holds the current [`BudgetLedger`] per model id.
///
/// Checks are pure: nothing is reserved or consumed, so the same request
/// always gets the same verdict until a ledger is replaced.
#[derive(Default)]
pub struct BudgetEnforcer {
    ledgers: DashMap<String, BudgetLedger>,
}

impl BudgetEnforcer {
    pub fn new(ledgers: impl IntoIterator<Item = BudgetLedger>) -> Self {
        let enforcer = Self::default();
        for ledger in ledgers {
            enforcer.set(ledger);
        }
        enforcer
    }

    /// Insert or replace the ledger for `ledger.model_id`.
    pub fn set(&self, ledger: BudgetLedger) {
        tracing::debug!(
            model = %ledger.model_id,
            token_budget = ?ledger.token_budget,
            vram_budget_mb = ?ledger.vram_budget_mb,
            "Budget updated"
        );
        self.ledgers.insert(ledger.model_id.clone(), ledger);
    }

    pub fn get(&self, model_id: &str) -> Option<BudgetLedger> {
        self.ledgers.get(model_id).map(|l| l.value().clone())
    }

    /// Reject the request if an estimate exceeds the model's ledger. Tokens
    /// are checked before VRAM. Models without a ledger are unconstrained.
    pub fn check(
        &self,
        model_id: &str,
        estimated_tokens: u64,
        estimated_vram_mb: Option<u64>,
    ) -> Result<()> {
        let Some(ledger) = self.ledgers.get(model_id) else {
            return Ok(());
        };

        if let Some(limit) = ledger.token_budget
            && estimated_tokens > limit
        {
            return Err(Self::reject(model_id, BudgetDimension::Tokens, estimated_tokens, limit));
        }
        if let (Some(limit), Some(requested)) = (ledger.vram_budget_mb, estimated_vram_mb)
            && requested > limit
        {
            return Err(Self::reject(model_id, BudgetDimension::VramMb, requested, limit));
        }
        Ok(())
    }

    fn reject(model_id: &str, dimension: BudgetDimension, requested: u64, limit: u64) -> GatewayError {
        tracing::warn!(
            model = %model_id,
            dimension = %dimension,
            requested,
            limit,
            "Budget exceeded"
        );
        metrics::counter!(
            "gateway_budget.rejections",
            "model" => model_id.to_string(),
            "dimension" => dimension.to_string()
        )
        .increment(1);
        GatewayError::BudgetExceeded {
            model_id: model_id.to_string(),
            dimension,
            requested,
            limit,
        }
    }
}
