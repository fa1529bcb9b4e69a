//! Adapter implementations for local and remote model backends.
//!
//! Each sub-module is gated behind a Cargo feature flag. Only adapters whose
//! features are enabled will be compiled.
//!
//! | Module | Kind | Feature | Backend |
//! |--------|------|---------|---------|
//! | `mistralrs` | `local/mistralrs` | `adapter-mistralrs` | [mistral.rs](https://github.com/EricLBuehler/mistral.rs) in process |
//! | `daemon` | `local/daemon` | `adapter-daemon` | [Ollama](https://ollama.com) chat API on the local host |
//! | `openai` | `remote/openai` | `adapter-openai` | OpenAI-compatible chat completions |

use crate::api::AdapterSpec;
use crate::error::{GatewayError, Result};
use crate::options_validation::validate_adapter_options;
use crate::traits::ModelAdapter;
use std::sync::Arc;

#[cfg(any(feature = "adapter-daemon", feature = "adapter-openai"))]
pub(crate) mod http_common;

#[cfg(feature = "adapter-daemon")]
pub mod daemon;

#[cfg(feature = "adapter-openai")]
pub mod openai;

#[cfg(any(feature = "adapter-mistralrs", test))]
pub(crate) mod load_cooldown;

#[cfg(feature = "adapter-mistralrs")]
pub mod mistralrs;

/// Construct the adapter described by `spec`.
///
/// Options are validated first; a kind whose feature is not compiled in is a
/// configuration error.
pub fn build_adapter(spec: &AdapterSpec) -> Result<Arc<dyn ModelAdapter>> {
    validate_adapter_options(&spec.kind, &spec.options)?;
    tracing::debug!(adapter = %spec.descriptor.id, kind = %spec.kind, "Constructing adapter");

    match spec.kind.as_str() {
        #[cfg(feature = "adapter-daemon")]
        "local/daemon" => Ok(Arc::new(daemon::LocalDaemonAdapter::from_options(
            &spec.options,
        )?)),
        #[cfg(feature = "adapter-openai")]
        "remote/openai" => Ok(Arc::new(openai::RemoteApiAdapter::from_options(
            &spec.options,
        )?)),
        #[cfg(feature = "adapter-mistralrs")]
        "local/mistralrs" => Ok(Arc::new(mistralrs::LocalAcceleratedAdapter::from_options(
            &spec.options,
        )?)),
        other => Err(GatewayError::Config(format!(
            "Adapter kind '{}' for '{}' is not enabled in this build",
            other, spec.descriptor.id
        ))),
    }
}
