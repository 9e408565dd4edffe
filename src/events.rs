//! Dispatch Events
//!
//! Every component of the dispatch core reports its outcomes as typed events
//! on a broadcast channel rather than invoking registered callbacks.
//! Consumers (analytics sinks, optimizers, dashboards) subscribe with
//! [`EventBus::subscribe`] and receive their own copy of each event; a slow
//! or absent consumer never blocks the request path.
//!
//! Events are serializable so an external telemetry collaborator can ship
//! them as structured records. The core itself persists nothing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::pool::CircuitState;

/// Default buffer depth for the event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// A timestamped dispatch event
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DispatchEvent {
    /// When the event was emitted
    pub timestamp: DateTime<Utc>,
    /// What happened
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Typed outcome events emitted by the dispatch core
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    /// The task router produced a routing decision
    RoutingDecision {
        /// Routed task identifier
        task_id: String,
        /// Chosen specialist agent type
        agent_type: String,
        /// Confidence in the choice [0,1]
        confidence: f64,
    },

    /// A task was moved from one agent to another
    TaskRedistributed {
        /// Task identifier
        task_id: String,
        /// Agent the task was taken from
        from_agent: String,
        /// Agent the task now belongs to
        to_agent: String,
        /// Why the task moved
        reason: String,
    },

    /// An agent crossed the configured workload threshold
    AgentOverloaded {
        /// Agent type that is overloaded
        agent_type: String,
        /// Current workload / max workload
        utilization: f64,
    },

    /// The periodic optimizer recommends rebalancing an agent
    RebalanceRecommended {
        /// Agent type the recommendation targets
        agent_type: String,
        /// Current utilization that triggered the recommendation
        utilization: f64,
        /// Whether the agent is under- or over-utilized
        overloaded: bool,
    },

    /// The model selector chose a (model, backend) pair
    ModelSelected {
        /// Requesting agent type
        agent_type: String,
        /// Task type the selection was made for
        task_type: String,
        /// Chosen model identifier
        model_id: String,
        /// Backend the model runs on
        backend_id: String,
        /// Selection score
        score: f64,
    },

    /// A bound model underperforms its binding threshold
    ModelSwitchRecommended {
        /// Agent type of the binding
        agent_type: String,
        /// Task type of the binding
        task_type: String,
        /// Underperforming model
        current_model: String,
        /// Better-performing bound alternative
        suggested_model: String,
        /// Observed success rate of the current model
        success_rate: f64,
    },

    /// A pool member's circuit breaker changed state
    CircuitStateChanged {
        /// Pool the member belongs to
        pool_id: String,
        /// Backend instance identifier
        backend_id: String,
        /// State before the transition
        from: CircuitState,
        /// State after the transition
        to: CircuitState,
    },

    /// A pool member's health flag flipped during a health check
    MemberHealthChanged {
        /// Pool the member belongs to
        pool_id: String,
        /// Backend instance identifier
        backend_id: String,
        /// New health status
        healthy: bool,
    },

    /// A backend request completed (success or failure)
    RequestCompleted {
        /// Pool the request was executed against
        pool_id: String,
        /// Member that served (or failed) the request
        backend_id: String,
        /// Whether the adapter call succeeded
        success: bool,
        /// Round-trip latency in milliseconds
        latency_ms: u64,
    },

    /// A rate limiter queue is saturated
    RateLimitSaturated {
        /// Backend whose limiter is saturated
        backend_id: String,
        /// Current queue depth
        queue_depth: usize,
    },
}

impl DispatchEvent {
    /// Wrap an event kind with the current timestamp
    #[must_use]
    pub fn now(kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
        }
    }
}

/// Broadcast bus carrying [`DispatchEvent`]s to any number of subscribers
///
/// Cloning the bus is cheap; all clones share the same channel. Emitting
/// never blocks: if no subscriber is attached the event is dropped, and a
/// lagging subscriber loses oldest events first (broadcast semantics).
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<DispatchEvent>,
}

impl EventBus {
    /// Create an event bus with the given channel capacity
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all current subscribers
    pub fn emit(&self, kind: EventKind) {
        // A send error only means there are no subscribers right now.
        let _ = self.tx.send(DispatchEvent::now(kind));
    }

    /// Number of active subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_and_receive() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.emit(EventKind::AgentOverloaded {
            agent_type: "backend-dev".to_string(),
            utilization: 0.9,
        });

        let event = rx.recv().await.expect("event");
        match event.kind {
            EventKind::AgentOverloaded { agent_type, .. } => {
                assert_eq!(agent_type, "backend-dev");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_emit_without_subscribers_is_noop() {
        let bus = EventBus::default();
        // Must not panic or block.
        bus.emit(EventKind::RateLimitSaturated {
            backend_id: "b1".to_string(),
            queue_depth: 42,
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_events_serialize_as_tagged_records() {
        let event = DispatchEvent::now(EventKind::RequestCompleted {
            pool_id: "chat".to_string(),
            backend_id: "b1".to_string(),
            success: true,
            latency_ms: 120,
        });
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["event"], "request_completed");
        assert_eq!(json["pool_id"], "chat");
    }
}
