//! Switchboard Core - Headless Dispatch for Multi-Agent AI Orchestration
//!
//! This crate is the decision-making core that sits between a fleet of
//! specialist agents and the AI backends that serve them. It owns four
//! cooperating subsystems, completely independent of any UI or wire
//! protocol:
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           Callers                                │
//! │        (task submission)            (model requests)             │
//! └──────────────┬───────────────────────────┬──────────────────────┘
//!                │                           │
//! ┌──────────────┼───────────────────────────┼──────────────────────┐
//! │              ▼       DISPATCH CORE       ▼                       │
//! │  ┌──────────────────┐          ┌──────────────────┐              │
//! │  │   Task Router    │          │  Model Selector  │              │
//! │  │ (agent profiles, │          │ (bindings, model │              │
//! │  │  weighted score) │          │  metrics, catalog│              │
//! │  └────────┬─────────┘          └────────┬─────────┘              │
//! │           │        ┌────────────────────┘                        │
//! │           ▼        ▼                                             │
//! │  ┌─────────────────────────────────────────────────┐             │
//! │  │            Provider Pool Manager                 │             │
//! │  │  pools ── members ── circuit breakers ──┐        │             │
//! │  │     │                                   │        │             │
//! │  │  strategies (7)              rate limiters       │             │
//! │  └──────────────────────┬──────────────────────────┘             │
//! │                         │ BackendAdapter contract                 │
//! └─────────────────────────┼───────────────────────────────────────┘
//!                           ▼
//!               concrete AI backends (one adapter each)
//! ```
//!
//! # Key Types
//!
//! - [`Dispatcher`]: the assembled core, driving task → agent → model →
//!   backend with a closed feedback loop
//! - [`router::TaskRouter`]: maps tasks to specialist-agent types
//! - [`selector::ModelSelector`]: picks a (model, pool) pair per request
//! - [`pool::PoolManager`]: resolves a pool to one live backend instance
//!   with circuit breaking, load balancing and bounded failover
//! - [`rate_limit::ThroughputLimiter`]: per-backend token-bucket admission
//! - [`events::EventBus`]: broadcast channel every component reports on
//!
//! # Quick Start
//!
//! ```ignore
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use switchboard_core::{
//!     backend::{BackendAdapter, MockAdapter},
//!     config::DispatchConfig,
//!     router::TaskDescriptor,
//!     Dispatcher,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DispatchConfig::from_path("switchboard.toml")?;
//!     let adapters: HashMap<String, Arc<dyn BackendAdapter>> = HashMap::from([(
//!         "local-0".to_string(),
//!         Arc::new(MockAdapter::new("local-0")) as Arc<dyn BackendAdapter>,
//!     )]);
//!
//!     let dispatcher = Dispatcher::new(config, adapters).await?;
//!     dispatcher.start();
//!
//!     let task = TaskDescriptor::new("task-1", "add an api endpoint");
//!     let outcome = dispatcher.dispatch(&task, "write the handler").await?;
//!     println!("{}", outcome.response.content);
//!
//!     dispatcher.stop().await;
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_errors_doc)]

pub mod backend;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod pool;
pub mod rate_limit;
pub mod router;
pub mod selector;

pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use error::{AttemptRecord, DispatchError, DispatchResult};
pub use events::{DispatchEvent, EventBus, EventKind};
