//! Shared utilities for the HTTP adapters: status mapping, transport error
//! classification, API key resolution, and chat payload construction.

use crate::error::InvocationError;
use crate::traits::ModelInvocationContext;
use serde_json::{Value, json};
use std::time::Duration;

/// Upper bound for an availability probe request.
pub(crate) const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Map an HTTP response status to an [`InvocationError`] for non-success
/// codes. Returns `Ok(response)` when the status is 2xx.
pub(crate) fn check_http_status(
    backend: &str,
    response: reqwest::Response,
) -> std::result::Result<reqwest::Response, InvocationError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(match status.as_u16() {
        429 => InvocationError::RateLimited,
        401 | 403 => InvocationError::Unauthorized,
        400 | 422 => InvocationError::InvalidRequest(format!(
            "{} rejected the request: {}",
            backend, status
        )),
        500..=599 => InvocationError::ServiceUnavailable,
        _ => InvocationError::Api(format!("{} API error: {}", backend, status)),
    })
}

/// Classify a transport-level failure.
pub(crate) fn transport_error(backend: &str, error: reqwest::Error) -> InvocationError {
    if error.is_timeout() {
        InvocationError::Timeout
    } else if error.is_connect() {
        InvocationError::ServiceUnavailable
    } else {
        InvocationError::Api(format!("{} request failed: {}", backend, error))
    }
}

/// Read an API key from the environment variable `env_var`. Empty values
/// count as unset.
pub(crate) fn resolve_api_key(env_var: &str) -> Option<String> {
    std::env::var(env_var).ok().filter(|key| !key.trim().is_empty())
}

/// Reject prompts that no backend could answer.
pub(crate) fn require_prompt(ctx: &ModelInvocationContext) -> std::result::Result<(), InvocationError> {
    if ctx.prompt.trim().is_empty() {
        return Err(InvocationError::InvalidRequest("prompt is empty".to_string()));
    }
    Ok(())
}

/// `[system?, user]` chat messages for `ctx`.
pub(crate) fn chat_messages(ctx: &ModelInvocationContext) -> Vec<Value> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = ctx.system_prompt() {
        messages.push(json!({ "role": "system", "content": system }));
    }
    messages.push(json!({ "role": "user", "content": ctx.prompt }));
    messages
}

/// Join `base` and `path` with exactly one slash.
pub(crate) fn endpoint(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
