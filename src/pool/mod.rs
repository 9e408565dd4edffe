//! Provider Pools
//!
//! Groups concrete backend instances into named pools and spreads traffic
//! across them:
//!
//! ```text
//! PoolManager
//!   +-- ProviderPool "fast-chat"          (strategy: round_robin)
//!   |     +-- PoolMember "ollama-0"       [circuit, limiter, latency EMA]
//!   |     +-- PoolMember "ollama-1"
//!   +-- ProviderPool "premium"            (strategy: weighted_round_robin)
//!         +-- PoolMember "remote-a"
//! ```
//!
//! Each member carries its own circuit breaker and admission limiter; the
//! pool owns the selection state and a background health-check loop.

pub mod circuit;
pub mod manager;
pub mod member;
pub mod strategy;

pub use circuit::{CircuitBreaker, CircuitState, CircuitTransition};
pub use manager::{PoolManager, PoolSnapshot, ProviderPool};
pub use member::{MemberSnapshot, PoolMember};
pub use strategy::{StrategyKind, StrategyState};
