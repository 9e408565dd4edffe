//! Task Routing
//!
//! Classifies inbound tasks and assigns each to the best-scoring
//! specialist-agent profile, with workload tracking, redistribution and a
//! periodic utilization optimizer.

pub mod profile;
pub mod router;
pub mod task;

pub use profile::{PerformanceEntry, TaskRoutingProfile};
pub use router::{
    AgentUtilization, AlternativeCandidate, RedistributionReason, RouterStats, RoutingDecision,
    TaskRouter,
};
pub use task::{classify, TaskClassification, TaskComplexity, TaskDescriptor};
