//! Validation of kind-specific adapter options JSON.
//!
//! Called by [`build_adapter`](crate::adapter::build_adapter) to reject
//! unknown or malformed options before any adapter is constructed.

use crate::error::{GatewayError, Result};
use serde_json::Value;

/// Adapter kinds the built-in factory understands.
pub const KNOWN_KINDS: &[&str] = &["local/daemon", "remote/openai", "local/mistralrs"];

/// Validate `options` for an adapter of the given `kind`.
pub fn validate_adapter_options(kind: &str, options: &Value) -> Result<()> {
    match kind {
        "local/daemon" => validate_string_options(kind, options, &["model", "base_url"]),
        "remote/openai" => validate_string_options(
            kind,
            options,
            &["model", "api_key_env", "base_url", "probe_url"],
        ),
        "local/mistralrs" => validate_mistralrs_options(kind, options),
        other => Err(GatewayError::Config(format!(
            "Unknown adapter kind '{}'. Known kinds: {}",
            other,
            KNOWN_KINDS.join(", ")
        ))),
    }
}

/// Parse `options` as a JSON object map, returning `None` for null and an
/// error for non-object types.
fn as_object<'a>(
    kind: &str,
    options: &'a Value,
) -> Result<Option<&'a serde_json::Map<String, Value>>> {
    match options {
        Value::Null => Ok(None),
        Value::Object(map) => Ok(Some(map)),
        _ => Err(GatewayError::Config(format!(
            "Options for adapter kind '{}' must be a JSON object or null",
            kind
        ))),
    }
}

/// Return an error if `map` contains any key not in `allowed`.
fn reject_unknown_keys(
    kind: &str,
    map: &serde_json::Map<String, Value>,
    allowed: &[&str],
) -> Result<()> {
    for key in map.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(GatewayError::Config(format!(
                "Unknown option '{}' for adapter kind '{}'",
                key, kind
            )));
        }
    }
    Ok(())
}

/// Require that all specified keys, if present, are strings.
fn require_string_keys(
    kind: &str,
    map: &serde_json::Map<String, Value>,
    keys: &[&str],
) -> Result<()> {
    for key in keys {
        if let Some(value) = map.get(*key)
            && !value.is_string()
        {
            return Err(GatewayError::Config(format!(
                "Option '{}' for adapter kind '{}' must be a string",
                key, kind
            )));
        }
    }
    Ok(())
}

/// Every built-in kind needs a non-empty `model`.
fn require_model(kind: &str, map: Option<&serde_json::Map<String, Value>>) -> Result<()> {
    let model = map.and_then(|m| m.get("model")).and_then(Value::as_str);
    match model {
        Some(m) if !m.trim().is_empty() => Ok(()),
        _ => Err(GatewayError::Config(format!(
            "Adapter kind '{}' requires a non-empty 'model' option",
            kind
        ))),
    }
}

/// Require that the named key, if present, is a positive (> 0) integer.
fn require_positive_u64(kind: &str, map: &serde_json::Map<String, Value>, key: &str) -> Result<()> {
    if let Some(value) = map.get(key) {
        let Some(v) = value.as_u64() else {
            return Err(GatewayError::Config(format!(
                "Option '{}' for adapter kind '{}' must be a positive integer",
                key, kind
            )));
        };
        if v == 0 {
            return Err(GatewayError::Config(format!(
                "Option '{}' for adapter kind '{}' must be greater than 0",
                key, kind
            )));
        }
    }
    Ok(())
}

fn validate_string_options(kind: &str, options: &Value, allowed_keys: &[&str]) -> Result<()> {
    let map = as_object(kind, options)?;
    require_model(kind, map)?;
    if let Some(map) = map {
        reject_unknown_keys(kind, map, allowed_keys)?;
        require_string_keys(kind, map, allowed_keys)?;
    }
    Ok(())
}

/// mistral.rs options: ISQ type, boolean flags, GGUF files.
fn validate_mistralrs_options(kind: &str, options: &Value) -> Result<()> {
    let map = as_object(kind, options)?;
    require_model(kind, map)?;
    let Some(map) = map else {
        return Ok(());
    };

    reject_unknown_keys(
        kind,
        map,
        &[
            "model",
            "revision",
            "isq",
            "force_cpu",
            "paged_attention",
            "max_num_seqs",
            "chat_template",
            "tokenizer_json",
            "gguf_files",
            "load_retry_secs",
        ],
    )?;

    require_string_keys(
        kind,
        map,
        &["model", "revision", "isq", "chat_template", "tokenizer_json"],
    )?;

    for key in ["force_cpu", "paged_attention"] {
        if let Some(value) = map.get(key)
            && !value.is_boolean()
        {
            return Err(GatewayError::Config(format!(
                "Option '{}' for adapter kind '{}' must be a boolean",
                key, kind
            )));
        }
    }

    require_positive_u64(kind, map, "max_num_seqs")?;
    if let Some(value) = map.get("load_retry_secs")
        && value.as_u64().is_none()
    {
        return Err(GatewayError::Config(format!(
            "Option 'load_retry_secs' for adapter kind '{}' must be a non-negative integer",
            kind
        )));
    }

    if let Some(value) = map.get("gguf_files") {
        let valid = value
            .as_array()
            .is_some_and(|items| !items.is_empty() && items.iter().all(Value::is_string));
        if !valid {
            return Err(GatewayError::Config(format!(
                "Option 'gguf_files' for adapter kind '{}' must be a non-empty array of strings",
                kind
            )));
        }
    }

    Ok(())
}
