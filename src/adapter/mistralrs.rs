use super::load_cooldown::LoadCooldown;
use crate::error::{GatewayError, InvocationError, Result};
use crate::traits::{AdapterKind, ModelAdapter, ModelInvocationContext, ModelInvocationResult};
use async_trait::async_trait;
use mistralrs::{
    GgufModelBuilder, IsqType, Model, PagedAttentionMetaBuilder, RequestBuilder, TextMessageRole,
    TextModelBuilder,
};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;

/// In-process adapter driving the mistral.rs engine on the local accelerator
/// (CUDA or Metal when the matching feature is enabled, CPU otherwise).
///
/// Weights are loaded by [`warmup`](ModelAdapter::warmup) or on the first
/// call. After a failed load the adapter reports itself unavailable for
/// `load_retry_secs` (default 30), then the next call retries the load.
pub struct LocalAcceleratedAdapter {
    opts: MistralRsOptions,
    model: OnceCell<Model>,
    load_gate: LoadCooldown,
}

const DEFAULT_LOAD_RETRY_SECS: u64 = 30;

#[derive(Deserialize, Clone)]
#[serde(deny_unknown_fields)]
struct MistralRsOptions {
    /// HuggingFace model id, or the GGUF directory when `gguf_files` is set.
    model: String,
    revision: Option<String>,
    /// ISQ quantization type, e.g. "Q4K", "Q8_0"
    isq: Option<String>,
    #[serde(default)]
    force_cpu: bool,
    #[serde(default)]
    paged_attention: bool,
    max_num_seqs: Option<usize>,
    chat_template: Option<String>,
    tokenizer_json: Option<String>,
    /// List of GGUF filenames (enables GGUF mode)
    gguf_files: Option<Vec<String>>,
    load_retry_secs: Option<u64>,
}

impl LocalAcceleratedAdapter {
    /// Build from validated `local/mistralrs` options.
    pub fn from_options(options: &serde_json::Value) -> Result<Self> {
        let opts: MistralRsOptions = serde_json::from_value(options.clone())
            .map_err(|e| GatewayError::Config(format!("Invalid local/mistralrs options: {}", e)))?;
        if let Some(isq) = &opts.isq {
            parse_isq_type(isq)?;
        }
        let retry = opts.load_retry_secs.unwrap_or(DEFAULT_LOAD_RETRY_SECS);
        Ok(Self {
            opts,
            model: OnceCell::new(),
            load_gate: LoadCooldown::new(Duration::from_secs(retry)),
        })
    }

    async fn model(&self) -> std::result::Result<&Model, InvocationError> {
        let result = self.model.get_or_try_init(|| self.load()).await;
        self.load_gate.record(result.is_ok());
        result
    }

    async fn load(&self) -> std::result::Result<Model, InvocationError> {
        let opts = &self.opts;
        tracing::info!(model_id = %opts.model, "Loading mistralrs model");
        let load_error = |e: String| {
            tracing::error!(model_id = %opts.model, error = %e, "mistralrs load failed");
            InvocationError::NotReady(format!("mistralrs load failed: {}", e))
        };

        let model = if let Some(files) = &opts.gguf_files {
            let mut builder = GgufModelBuilder::new(opts.model.clone(), files.clone());
            if let Some(chat_tmpl) = &opts.chat_template {
                builder = builder.with_chat_template(chat_tmpl.clone());
            }
            if let Some(tok_json) = &opts.tokenizer_json {
                builder = builder.with_tokenizer_json(tok_json.clone());
            }
            if opts.paged_attention {
                builder = builder
                    .with_paged_attn(|| PagedAttentionMetaBuilder::default().build())
                    .map_err(|e| load_error(e.to_string()))?;
            }
            builder.with_logging().build().await.map_err(|e| load_error(e.to_string()))?
        } else {
            let mut builder = TextModelBuilder::new(&opts.model);
            if let Some(isq) = &opts.isq {
                let isq = parse_isq_type(isq).map_err(|e| load_error(e.to_string()))?;
                builder = builder.with_isq(isq);
            }
            if opts.force_cpu {
                builder = builder.with_force_cpu();
            }
            if let Some(rev) = &opts.revision {
                builder = builder.with_hf_revision(rev);
            }
            if opts.paged_attention {
                builder = builder
                    .with_paged_attn(|| PagedAttentionMetaBuilder::default().build())
                    .map_err(|e| load_error(e.to_string()))?;
            }
            if let Some(chat_tmpl) = &opts.chat_template {
                builder = builder.with_chat_template(chat_tmpl);
            }
            if let Some(tok_json) = &opts.tokenizer_json {
                builder = builder.with_tokenizer_json(tok_json);
            }
            if let Some(max_seqs) = opts.max_num_seqs {
                builder = builder.with_max_num_seqs(max_seqs);
            }
            builder.with_logging().build().await.map_err(|e| load_error(e.to_string()))?
        };

        tracing::info!(model_id = %opts.model, "mistralrs model loaded");
        Ok(model)
    }
}

fn parse_isq_type(s: &str) -> Result<IsqType> {
    match s.to_uppercase().as_str() {
        "Q4_0" => Ok(IsqType::Q4_0),
        "Q4_1" => Ok(IsqType::Q4_1),
        "Q5_0" => Ok(IsqType::Q5_0),
        "Q5_1" => Ok(IsqType::Q5_1),
        "Q8_0" => Ok(IsqType::Q8_0),
        "Q8_1" => Ok(IsqType::Q8_1),
        "Q2K" => Ok(IsqType::Q2K),
        "Q3K" => Ok(IsqType::Q3K),
        "Q4K" => Ok(IsqType::Q4K),
        "Q5K" => Ok(IsqType::Q5K),
        "Q6K" => Ok(IsqType::Q6K),
        "Q8K" => Ok(IsqType::Q8K),
        "HQQ4" => Ok(IsqType::HQQ4),
        "HQQ8" => Ok(IsqType::HQQ8),
        "F8E4M3" => Ok(IsqType::F8E4M3),
        "AFQ8" => Ok(IsqType::AFQ8),
        "AFQ6" => Ok(IsqType::AFQ6),
        "AFQ4" => Ok(IsqType::AFQ4),
        "AFQ3" => Ok(IsqType::AFQ3),
        "AFQ2" => Ok(IsqType::AFQ2),
        other => Err(GatewayError::Config(format!(
            "Unknown ISQ type '{}'. Valid types: Q4_0, Q4_1, Q5_0, Q5_1, Q8_0, Q8_1, \
             Q2K, Q3K, Q4K, Q5K, Q6K, Q8K, HQQ4, HQQ8, F8E4M3, AFQ2-AFQ8",
            other
        ))),
    }
}

#[async_trait]
impl ModelAdapter for LocalAcceleratedAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::LocalAccelerated
    }

    async fn is_available(&self) -> bool {
        self.model.initialized() || self.load_gate.ready()
    }

    async fn warmup(&self) -> std::result::Result<(), InvocationError> {
        self.model().await.map(|_| ())
    }

    async fn invoke(
        &self,
        ctx: &ModelInvocationContext,
    ) -> std::result::Result<ModelInvocationResult, InvocationError> {
        if ctx.prompt.trim().is_empty() {
            return Err(InvocationError::InvalidRequest("prompt is empty".to_string()));
        }
        let model = self.model().await?;
        let started = Instant::now();

        let mut request = RequestBuilder::new();
        if let Some(system) = ctx.system_prompt() {
            request = request.add_message(TextMessageRole::System, system);
        }
        request = request.add_message(TextMessageRole::User, &ctx.prompt);

        let options = &ctx.options;
        if options.temperature.is_none() && options.top_p.is_none() && options.max_tokens.is_none() {
            request = request.set_deterministic_sampler();
        } else {
            if let Some(temp) = options.temperature {
                request = request.set_sampler_temperature(temp as f64);
            }
            if let Some(top_p) = options.top_p {
                request = request.set_sampler_topp(top_p as f64);
            }
            if let Some(max_tokens) = options.max_tokens {
                request = request.set_sampler_max_len(max_tokens);
            }
        }

        let response = model
            .send_chat_request(request)
            .await
            .map_err(|e| InvocationError::Inference(format!("Generation inference failed: {}", e)))?;

        let choice = response.choices.first();
        let text = choice
            .and_then(|c| c.message.content.as_deref())
            .unwrap_or("")
            .to_string();

        let mut result = ModelInvocationResult::completed(
            text,
            format!("mistralrs/{}", self.opts.model),
            started,
        )
        .with_tokens_used(Some(response.usage.total_tokens as u64));
        if let Some(choice) = choice {
            result = result.with_metadata(
                "finish_reason",
                serde_json::Value::String(choice.finish_reason.clone()),
            );
        }
        Ok(result)
    }
}
