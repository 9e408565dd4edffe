//! Circuit Breaker
//!
//! Failure-isolation state machine embedded in every pool member:
//!
//! ```text
//! +--------+  failures >= threshold  +------+  health probe ok  +-----------+
//! | Closed | ----------------------> | Open | ----------------> | Half-Open |
//! +--------+                         +------+                   +-----------+
//!     ^                                  ^                            |
//!     |       successes >= threshold     |        any failure         |
//!     +----------------------------------+----------------------------+
//! ```
//!
//! - **Closed**: requests pass through; consecutive failures accumulate.
//! - **Open**: requests fail immediately; only the periodic health check
//!   probes the backend, and a successful probe moves to half-open.
//! - **Half-Open**: limited probe traffic; success closes the circuit and
//!   resets the failure count, any failure reopens it.
//!
//! The breaker itself holds no locks: it is owned by a pool member and
//! mutated only under the pool's lock, so transitions are deterministic
//! under concurrent dispatch.

use serde::{Deserialize, Serialize};

use crate::config::CircuitSettings;

/// Circuit breaker state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, requests allowed
    #[default]
    Closed,
    /// Circuit tripped, requests rejected immediately
    Open,
    /// Testing recovery, limited probe traffic allowed
    HalfOpen,
}

/// A completed state transition, reported so the pool manager can emit a
/// circuit event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CircuitTransition {
    /// State before
    pub from: CircuitState,
    /// State after
    pub to: CircuitState,
}

/// Per-member circuit breaker
#[derive(Clone, Debug)]
pub struct CircuitBreaker {
    settings: CircuitSettings,
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
}

impl CircuitBreaker {
    /// Create a closed breaker with the given thresholds
    #[must_use]
    pub fn new(settings: CircuitSettings) -> Self {
        Self {
            settings,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Consecutive failures since the last Closed/Half-Open transition
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Consecutive successes since the last failure
    #[must_use]
    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes
    }

    /// Whether request traffic may be sent through this breaker
    ///
    /// Half-open allows traffic so the member can carry probe requests.
    #[must_use]
    pub fn allows_requests(&self) -> bool {
        !matches!(self.state, CircuitState::Open)
    }

    /// Record a successful request
    pub fn record_success(&mut self) -> Option<CircuitTransition> {
        self.consecutive_failures = 0;
        self.consecutive_successes += 1;

        match self.state {
            CircuitState::HalfOpen => {
                if self.consecutive_successes >= self.settings.success_threshold {
                    Some(self.transition(CircuitState::Closed))
                } else {
                    None
                }
            }
            CircuitState::Closed | CircuitState::Open => None,
        }
    }

    /// Record a failed request
    pub fn record_failure(&mut self) -> Option<CircuitTransition> {
        self.consecutive_successes = 0;
        self.consecutive_failures += 1;

        match self.state {
            CircuitState::Closed => {
                if self.consecutive_failures >= self.settings.failure_threshold {
                    Some(self.transition(CircuitState::Open))
                } else {
                    None
                }
            }
            // Any failure while half-open reopens the circuit.
            CircuitState::HalfOpen => Some(self.transition(CircuitState::Open)),
            CircuitState::Open => None,
        }
    }

    /// A background health probe succeeded while the circuit was open
    pub fn probe_succeeded(&mut self) -> Option<CircuitTransition> {
        match self.state {
            CircuitState::Open => Some(self.transition(CircuitState::HalfOpen)),
            CircuitState::Closed | CircuitState::HalfOpen => None,
        }
    }

    /// Swap thresholds (hot config update); state is preserved
    pub fn update_settings(&mut self, settings: CircuitSettings) {
        self.settings = settings;
    }

    fn transition(&mut self, to: CircuitState) -> CircuitTransition {
        let from = self.state;
        self.state = to;
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
        CircuitTransition { from, to }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure_threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(CircuitSettings {
            failure_threshold,
            success_threshold: 1,
        })
    }

    #[test]
    fn test_opens_exactly_at_threshold() {
        let mut cb = breaker(3);
        assert!(cb.record_failure().is_none());
        assert!(cb.record_failure().is_none());
        assert_eq!(cb.state(), CircuitState::Closed);

        let transition = cb.record_failure().expect("third failure opens");
        assert_eq!(transition.from, CircuitState::Closed);
        assert_eq!(transition.to, CircuitState::Open);
        assert!(!cb.allows_requests());
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let mut cb = breaker(3);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        // Streak broken: two more failures must not open the circuit.
        assert!(cb.record_failure().is_none());
        assert!(cb.record_failure().is_none());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_recovery_path() {
        let mut cb = breaker(1);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        let transition = cb.probe_succeeded().expect("open -> half-open");
        assert_eq!(transition.to, CircuitState::HalfOpen);
        assert!(cb.allows_requests());

        let transition = cb.record_success().expect("half-open -> closed");
        assert_eq!(transition.to, CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 0);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let mut cb = breaker(1);
        cb.record_failure();
        cb.probe_succeeded();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let transition = cb.record_failure().expect("half-open -> open");
        assert_eq!(transition.to, CircuitState::Open);
    }

    #[test]
    fn test_probe_is_noop_when_closed() {
        let mut cb = breaker(3);
        assert!(cb.probe_succeeded().is_none());
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
