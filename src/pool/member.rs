//! Pool Member
//!
//! Wraps one concrete backend instance with the mutable state the pool
//! manager maintains for it: weight/priority, health flag, circuit breaker,
//! rolling latency, in-flight connection count and success/failure totals.
//!
//! All mutable fields are owned and mutated exclusively by the pool manager
//! under the pool's lock; other components read through snapshots.

use std::sync::Arc;
use std::time::Instant;

use crate::backend::BackendAdapter;
use crate::config::{CircuitSettings, MemberConfig};
use crate::pool::circuit::{CircuitBreaker, CircuitState, CircuitTransition};
use crate::rate_limit::ThroughputLimiter;

/// Smoothing factor for the rolling average response time
const LATENCY_EMA_ALPHA: f64 = 0.3;

/// One backend instance inside a provider pool
pub struct PoolMember {
    /// Backend instance identifier
    pub backend_id: String,
    /// Adapter driving the concrete backend
    pub adapter: Arc<dyn BackendAdapter>,
    /// Weight for weighted round-robin
    pub weight: u32,
    /// Priority, doubling as the cost proxy for cost-optimized selection
    pub priority: u32,
    /// Health flag maintained by the background health check
    pub healthy: bool,
    /// When the member was last health-checked
    pub last_health_check: Option<Instant>,
    /// Failure-isolation state machine
    pub circuit: CircuitBreaker,
    /// Rolling average response time (exponential blend)
    pub avg_response_time_ms: f64,
    /// Requests currently in flight against this member
    pub active_connections: u32,
    /// Completed successful requests
    pub total_successes: u64,
    /// Completed failed requests
    pub total_failures: u64,
    /// Admission limiter for this instance
    pub limiter: Arc<ThroughputLimiter>,
    /// Smooth weighted round-robin accumulator
    pub(crate) current_weight: i64,
}

impl PoolMember {
    /// Build a member from config plus its adapter
    pub fn new(
        config: &MemberConfig,
        circuit: CircuitSettings,
        adapter: Arc<dyn BackendAdapter>,
        limiter: Arc<ThroughputLimiter>,
    ) -> Self {
        Self {
            backend_id: config.backend_id.clone(),
            adapter,
            weight: config.weight,
            priority: config.priority,
            healthy: true,
            last_health_check: None,
            circuit: CircuitBreaker::new(circuit),
            avg_response_time_ms: 0.0,
            active_connections: 0,
            total_successes: 0,
            total_failures: 0,
            limiter,
            current_weight: 0,
        }
    }

    /// Whether any strategy may select this member for regular traffic
    ///
    /// Open circuits and unhealthy members are excluded; half-open members
    /// stay selectable so they can carry probe traffic.
    #[must_use]
    pub fn selectable(&self) -> bool {
        self.healthy && self.circuit.allows_requests()
    }

    /// Observed success rate; optimistic (1.0) before any traffic
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let total = self.total_successes + self.total_failures;
        if total == 0 {
            1.0
        } else {
            self.total_successes as f64 / total as f64
        }
    }

    /// Record a completed request against this member
    pub fn record_outcome(&mut self, success: bool, latency_ms: u64) -> Option<CircuitTransition> {
        if self.avg_response_time_ms == 0.0 {
            self.avg_response_time_ms = latency_ms as f64;
        } else {
            self.avg_response_time_ms = LATENCY_EMA_ALPHA * latency_ms as f64
                + (1.0 - LATENCY_EMA_ALPHA) * self.avg_response_time_ms;
        }

        if success {
            self.total_successes += 1;
            self.circuit.record_success()
        } else {
            self.total_failures += 1;
            self.circuit.record_failure()
        }
    }

    /// Read-only view of the member's mutable state
    #[must_use]
    pub fn snapshot(&self) -> MemberSnapshot {
        MemberSnapshot {
            backend_id: self.backend_id.clone(),
            weight: self.weight,
            priority: self.priority,
            healthy: self.healthy,
            circuit_state: self.circuit.state(),
            avg_response_time_ms: self.avg_response_time_ms,
            active_connections: self.active_connections,
            total_successes: self.total_successes,
            total_failures: self.total_failures,
        }
    }
}

/// Point-in-time view of one pool member
#[derive(Clone, Debug)]
pub struct MemberSnapshot {
    /// Backend instance identifier
    pub backend_id: String,
    /// Configured weight
    pub weight: u32,
    /// Configured priority
    pub priority: u32,
    /// Health flag
    pub healthy: bool,
    /// Circuit breaker state
    pub circuit_state: CircuitState,
    /// Rolling average response time
    pub avg_response_time_ms: f64,
    /// Requests in flight
    pub active_connections: u32,
    /// Completed successful requests
    pub total_successes: u64,
    /// Completed failed requests
    pub total_failures: u64,
}
