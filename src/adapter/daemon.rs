use crate::adapter::http_common::{
    PROBE_TIMEOUT, chat_messages, check_http_status, endpoint, require_prompt, transport_error,
};
use crate::error::{GatewayError, InvocationError, Result};
use crate::traits::{AdapterKind, ModelAdapter, ModelInvocationContext, ModelInvocationResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Instant;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434";

/// Adapter for a local [Ollama](https://github.com/ollama/ollama/blob/main/docs/api.md)
/// daemon, using `POST /api/chat` for generation and `GET /api/tags` as the
/// availability probe.
///
/// The adapter reports itself available only when the daemon answers and the
/// configured model has been pulled.
pub struct LocalDaemonAdapter {
    client: Client,
    base_url: String,
    model: String,
}

#[derive(Deserialize)]
struct DaemonOptions {
    model: String,
    base_url: Option<String>,
}

impl LocalDaemonAdapter {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: model.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Build from validated `local/daemon` options.
    pub fn from_options(options: &serde_json::Value) -> Result<Self> {
        let opts: DaemonOptions = serde_json::from_value(options.clone())
            .map_err(|e| GatewayError::Config(format!("Invalid local/daemon options: {}", e)))?;
        let adapter = Self::new(opts.model);
        Ok(match opts.base_url {
            Some(url) => adapter.with_base_url(url),
            None => adapter,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Ollama lists models as `name:tag`; a bare name matches any tag.
    fn serves(&self, name: &str) -> bool {
        name == self.model
            || name
                .strip_prefix(self.model.as_str())
                .is_some_and(|rest| rest.starts_with(':'))
    }

    async fn probe(&self) -> std::result::Result<bool, InvocationError> {
        let response = self
            .client
            .get(endpoint(&self.base_url, "api/tags"))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(|e| transport_error("Ollama", e))?;
        let body: serde_json::Value = check_http_status("Ollama", response)?
            .json()
            .await
            .map_err(|e| InvocationError::Api(e.to_string()))?;

        let listed = body["models"]
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m["name"].as_str())
                    .any(|name| self.serves(name))
            })
            .unwrap_or(false);
        Ok(listed)
    }
}

#[async_trait]
impl ModelAdapter for LocalDaemonAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::LocalDaemon
    }

    async fn is_available(&self) -> bool {
        match self.probe().await {
            Ok(true) => true,
            Ok(false) => {
                tracing::debug!(model = %self.model, "Daemon is up but model is not pulled");
                false
            }
            Err(e) => {
                tracing::debug!(base_url = %self.base_url, error = %e, "Daemon probe failed");
                false
            }
        }
    }

    async fn invoke(
        &self,
        ctx: &ModelInvocationContext,
    ) -> std::result::Result<ModelInvocationResult, InvocationError> {
        require_prompt(ctx)?;
        let started = Instant::now();

        let mut body = json!({
            "model": self.model,
            "messages": chat_messages(ctx),
            "stream": false,
        });
        let mut sampling = serde_json::Map::new();
        if let Some(max_tokens) = ctx.options.max_tokens {
            sampling.insert("num_predict".to_string(), json!(max_tokens));
        }
        if let Some(temperature) = ctx.options.temperature {
            sampling.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(top_p) = ctx.options.top_p {
            sampling.insert("top_p".to_string(), json!(top_p));
        }
        if !sampling.is_empty() {
            body["options"] = serde_json::Value::Object(sampling);
        }

        let response = self
            .client
            .post(endpoint(&self.base_url, "api/chat"))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("Ollama", e))?;

        let body: serde_json::Value = check_http_status("Ollama", response)?
            .json()
            .await
            .map_err(|e| InvocationError::Api(e.to_string()))?;

        let Some(text) = body["message"]["content"].as_str() else {
            return Err(InvocationError::Api(
                "Ollama response has no message content".to_string(),
            ));
        };

        let tokens = match (
            body["prompt_eval_count"].as_u64(),
            body["eval_count"].as_u64(),
        ) {
            (None, None) => None,
            (prompt, completion) => Some(prompt.unwrap_or(0) + completion.unwrap_or(0)),
        };

        let mut result =
            ModelInvocationResult::completed(text, format!("ollama/{}", self.model), started)
                .with_tokens_used(tokens);
        if let Some(reason) = body.get("done_reason") {
            result = result.with_metadata("finish_reason", reason.clone());
        }
        Ok(result)
    }
}
