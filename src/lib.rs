//! Multi-provider model invocation gateway.
//!
//! Xervo Gateway puts local accelerated engines, local inference daemons, and
//! hosted APIs behind one [`ModelAdapter`](traits::ModelAdapter) interface and
//! routes every request through a reliability pipeline: static budgets,
//! sticky sessions or shard selection, health-ranked fallback chains, and a
//! circuit breaker per adapter.
//!
//! # Key concepts
//!
//! - **[`ModelGateway`](runtime::ModelGateway)**: the registry of adapters and
//!   routes, and the entry point for [`invoke`](runtime::ModelGateway::invoke).
//! - **[`ModelRoute`](api::ModelRoute)**: maps a logical model id (e.g.
//!   `"chat/default"`) to a primary adapter and its fallbacks.
//! - **Adapters**: backends implementing [`ModelAdapter`](traits::ModelAdapter).
//!   Built-in ones live in [`adapter`] behind feature flags.
//! - **Reliability**: [`CircuitBreaker`](reliability::CircuitBreaker),
//!   [`HealthScorer`](health::HealthScorer),
//!   [`FallbackChain`](fallback::FallbackChain),
//!   [`StickySessionRouter`](session::StickySessionRouter),
//!   [`BudgetEnforcer`](budget::BudgetEnforcer), and
//!   [`ShardingLayer`](sharding::ShardingLayer).
//!
//! # Quick start
//!
//! ```rust,no_run
//! use xervo_gateway::api::{AdapterDescriptor, InvokeRequest, ModelRoute};
//! use xervo_gateway::runtime::ModelGateway;
//! # #[cfg(all(feature = "adapter-daemon", feature = "adapter-openai"))]
//! use xervo_gateway::adapter::{daemon::LocalDaemonAdapter, openai::RemoteApiAdapter};
//! # use std::sync::Arc;
//!
//! # #[cfg(all(feature = "adapter-daemon", feature = "adapter-openai"))]
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let gateway = ModelGateway::builder()
//!     .register_adapter(
//!         AdapterDescriptor::new("local"),
//!         Arc::new(LocalDaemonAdapter::new("llama3.2")),
//!     )
//!     .register_adapter(
//!         AdapterDescriptor::new("cloud"),
//!         Arc::new(RemoteApiAdapter::new("gpt-4o-mini")),
//!     )
//!     .route(ModelRoute::new("chat/default", "local").with_fallback("cloud"))
//!     .build()
//!     .await?;
//!
//! let outcome = gateway
//!     .invoke(InvokeRequest::new("chat/default", "Hello!").with_session("user-1"))
//!     .await?;
//! println!("{} answered: {}", outcome.adapter_id, outcome.result.output);
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod api;
pub mod budget;
pub mod error;
pub mod fallback;
pub mod health;
mod options_validation;
pub mod reliability;
pub mod runtime;
pub mod session;
pub mod sharding;
pub mod state;
pub mod traits;

#[cfg(test)]
mod mock;
