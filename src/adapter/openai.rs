use crate::adapter::http_common::{
    PROBE_TIMEOUT, chat_messages, check_http_status, endpoint, require_prompt, resolve_api_key,
    transport_error,
};
use crate::error::{GatewayError, InvocationError, Result};
use crate::traits::{AdapterKind, ModelAdapter, ModelInvocationContext, ModelInvocationResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Instant;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Adapter for the [OpenAI chat completions API](https://platform.openai.com/docs/api-reference/chat)
/// and compatible servers (`{base_url}/chat/completions`).
///
/// The API key is read from `OPENAI_API_KEY` (or the env var named by
/// `api_key_env`) on every probe and call, so a key exported after startup
/// is picked up. Without a key the adapter reports itself unavailable.
pub struct RemoteApiAdapter {
    client: Client,
    model: String,
    base_url: String,
    api_key_env: String,
    probe_url: Option<String>,
}

#[derive(Deserialize)]
struct RemoteOptions {
    model: String,
    api_key_env: Option<String>,
    base_url: Option<String>,
    probe_url: Option<String>,
}

impl RemoteApiAdapter {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            probe_url: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_api_key_env(mut self, env_var: impl Into<String>) -> Self {
        self.api_key_env = env_var.into();
        self
    }

    /// Require a 2xx from `probe_url` (e.g. `{base_url}/models`) for the
    /// adapter to count as available.
    pub fn with_probe_url(mut self, probe_url: impl Into<String>) -> Self {
        self.probe_url = Some(probe_url.into());
        self
    }

    /// Build from validated `remote/openai` options.
    pub fn from_options(options: &serde_json::Value) -> Result<Self> {
        let opts: RemoteOptions = serde_json::from_value(options.clone())
            .map_err(|e| GatewayError::Config(format!("Invalid remote/openai options: {}", e)))?;
        let mut adapter = Self::new(opts.model);
        if let Some(url) = opts.base_url {
            adapter = adapter.with_base_url(url);
        }
        if let Some(env_var) = opts.api_key_env {
            adapter = adapter.with_api_key_env(env_var);
        }
        if let Some(url) = opts.probe_url {
            adapter = adapter.with_probe_url(url);
        }
        Ok(adapter)
    }

    fn api_key(&self) -> std::result::Result<String, InvocationError> {
        resolve_api_key(&self.api_key_env)
            .ok_or_else(|| InvocationError::NotReady(format!("{} env var not set", self.api_key_env)))
    }
}

#[async_trait]
impl ModelAdapter for RemoteApiAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::RemoteApi
    }

    async fn is_available(&self) -> bool {
        let Ok(api_key) = self.api_key() else {
            tracing::debug!(env_var = %self.api_key_env, "API key not set");
            return false;
        };
        let Some(probe_url) = &self.probe_url else {
            return true;
        };

        let response = self
            .client
            .get(probe_url)
            .bearer_auth(api_key)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await;
        match response {
            Ok(r) if r.status().is_success() => true,
            Ok(r) => {
                tracing::debug!(status = %r.status(), "Remote probe rejected");
                false
            }
            Err(e) => {
                tracing::debug!(error = %e, "Remote probe failed");
                false
            }
        }
    }

    async fn invoke(
        &self,
        ctx: &ModelInvocationContext,
    ) -> std::result::Result<ModelInvocationResult, InvocationError> {
        let api_key = self.api_key()?;
        require_prompt(ctx)?;
        let started = Instant::now();

        let mut body = json!({
            "model": self.model,
            "messages": chat_messages(ctx),
        });
        if let Some(max_tokens) = ctx.options.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(temperature) = ctx.options.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(top_p) = ctx.options.top_p {
            body["top_p"] = json!(top_p);
        }

        let response = self
            .client
            .post(endpoint(&self.base_url, "chat/completions"))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("OpenAI", e))?;

        let body: serde_json::Value = check_http_status("OpenAI", response)?
            .json()
            .await
            .map_err(|e| InvocationError::Api(e.to_string()))?;

        let choice = &body["choices"][0];
        let Some(text) = choice["message"]["content"].as_str() else {
            return Err(InvocationError::Api(
                "OpenAI response has no message content".to_string(),
            ));
        };

        let mut result =
            ModelInvocationResult::completed(text, format!("openai/{}", self.model), started)
                .with_tokens_used(body["usage"]["total_tokens"].as_u64());
        if let Some(reason) = choice.get("finish_reason").filter(|r| !r.is_null()) {
            result = result.with_metadata("finish_reason", reason.clone());
        }
        if let Some(model) = body.get("model") {
            result = result.with_metadata("model", model.clone());
        }
        Ok(result)
    }
}
