//! Load-Balancing Strategies
//!
//! A single enumerated strategy identifier selects a selection function from
//! a fixed table; no per-strategy trait objects. Every strategy is a pure
//! choice over the candidate members handed to it (already filtered to
//! selectable, non-excluded members), plus a small amount of cursor state
//! owned by the pool and advanced atomically with the selection under the
//! pool's lock.
//!
//! Strategies:
//!
//! - `round_robin`: cyclic cursor per pool.
//! - `weighted_round_robin`: smooth weighted round-robin using a per-member
//!   weight accumulator.
//! - `least_connections`: smallest in-flight counter.
//! - `least_response_time`: smallest rolling-average latency.
//! - `cost_optimized`: lowest priority-as-cost-proxy.
//! - `performance_based`: composite of success rate, latency and load.
//! - `adaptive`: rotates through {round-robin, least-response-time,
//!   performance-based}, switching when the trailing 10-sample latency
//!   trend degrades by more than 10%.

use serde::{Deserialize, Serialize};

use crate::pool::member::PoolMember;

/// Trailing latency samples the adaptive strategy watches
const ADAPTIVE_WINDOW: usize = 10;
/// Relative degradation that triggers an adaptive strategy switch
const ADAPTIVE_DEGRADATION: f64 = 0.10;
/// Rotation the adaptive strategy cycles through
const ADAPTIVE_ROTATION: [StrategyKind; 3] = [
    StrategyKind::RoundRobin,
    StrategyKind::LeastResponseTime,
    StrategyKind::PerformanceBased,
];

/// Load-balancing strategy identifier
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Cyclic selection
    #[default]
    RoundRobin,
    /// Cyclic selection weighted by member weight
    WeightedRoundRobin,
    /// Fewest in-flight requests
    LeastConnections,
    /// Lowest rolling-average latency
    LeastResponseTime,
    /// Lowest configured priority (cost proxy)
    CostOptimized,
    /// Composite success/latency/load score
    PerformanceBased,
    /// Rotates strategies when the latency trend degrades
    Adaptive,
}

/// Mutable selection state owned by one pool
#[derive(Debug, Default)]
pub struct StrategyState {
    /// Round-robin cursor; advances exactly once per selection
    cursor: u64,
    /// Index into [`ADAPTIVE_ROTATION`]
    adaptive_index: usize,
    /// Trailing latency samples for the adaptive trend
    window: Vec<u64>,
    /// Mean of the previous full window
    previous_mean: Option<f64>,
}

impl StrategyState {
    /// Select one member among `candidates` (indices into `members`)
    ///
    /// Returns the chosen index into `members`, or `None` when no candidate
    /// is available. Selection and cursor advance are a single operation;
    /// the caller must hold the pool lock.
    pub fn select(
        &mut self,
        kind: StrategyKind,
        members: &mut [PoolMember],
        candidates: &[usize],
    ) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        match kind {
            StrategyKind::RoundRobin => self.select_round_robin(candidates),
            StrategyKind::WeightedRoundRobin => select_weighted(members, candidates),
            StrategyKind::LeastConnections => {
                select_min_by(members, candidates, |m| f64::from(m.active_connections))
            }
            StrategyKind::LeastResponseTime => {
                select_min_by(members, candidates, |m| m.avg_response_time_ms)
            }
            StrategyKind::CostOptimized => {
                select_min_by(members, candidates, |m| f64::from(m.priority))
            }
            StrategyKind::PerformanceBased => select_min_by(members, candidates, |m| {
                // Negate so the max composite score wins.
                -performance_score(m)
            }),
            StrategyKind::Adaptive => {
                let active = ADAPTIVE_ROTATION[self.adaptive_index];
                self.select(active, members, candidates)
            }
        }
    }

    /// Feed a completed request's latency into the adaptive trend
    ///
    /// No-op for non-adaptive pools.
    pub fn observe_latency(&mut self, kind: StrategyKind, latency_ms: u64) {
        if kind != StrategyKind::Adaptive {
            return;
        }
        self.window.push(latency_ms);
        if self.window.len() < ADAPTIVE_WINDOW {
            return;
        }

        let mean = self.window.iter().sum::<u64>() as f64 / self.window.len() as f64;
        if let Some(previous) = self.previous_mean {
            if previous > 0.0 && mean > previous * (1.0 + ADAPTIVE_DEGRADATION) {
                self.adaptive_index = (self.adaptive_index + 1) % ADAPTIVE_ROTATION.len();
                tracing::debug!(
                    strategy = ?ADAPTIVE_ROTATION[self.adaptive_index],
                    previous_mean = previous,
                    current_mean = mean,
                    "adaptive strategy rotated"
                );
            }
        }
        self.previous_mean = Some(mean);
        self.window.clear();
    }

    /// Strategy the adaptive rotation currently delegates to
    #[must_use]
    pub fn adaptive_active(&self) -> StrategyKind {
        ADAPTIVE_ROTATION[self.adaptive_index]
    }

    fn select_round_robin(&mut self, candidates: &[usize]) -> Option<usize> {
        let position = (self.cursor as usize) % candidates.len();
        self.cursor = self.cursor.wrapping_add(1);
        Some(candidates[position])
    }
}

/// Composite performance score; higher is better
fn performance_score(member: &PoolMember) -> f64 {
    let latency_part = (1.0 - member.avg_response_time_ms / 10_000.0).max(0.0);
    let load_part = (1.0 - f64::from(member.active_connections) / 100.0).max(0.0);
    0.5 * member.success_rate() + 0.3 * latency_part + 0.2 * load_part
}

/// Smooth weighted round-robin over the candidates
fn select_weighted(members: &mut [PoolMember], candidates: &[usize]) -> Option<usize> {
    let total: i64 = candidates
        .iter()
        .map(|&i| i64::from(members[i].weight))
        .sum();
    if total == 0 {
        return None;
    }

    let mut best: Option<usize> = None;
    for &i in candidates {
        members[i].current_weight += i64::from(members[i].weight);
        match best {
            Some(b) if members[b].current_weight >= members[i].current_weight => {}
            _ => best = Some(i),
        }
    }
    let chosen = best?;
    members[chosen].current_weight -= total;
    Some(chosen)
}

/// Pick the candidate minimizing `key`; ties resolve to the earliest member
fn select_min_by<F>(members: &[PoolMember], candidates: &[usize], key: F) -> Option<usize>
where
    F: Fn(&PoolMember) -> f64,
{
    candidates.iter().copied().min_by(|&a, &b| {
        key(&members[a])
            .partial_cmp(&key(&members[b]))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    })
}
