//! Agent Routing Profiles
//!
//! One profile per specialist-agent type: expertise domains, workload
//! counters, exponentially updated quality/reliability/efficiency scores and
//! a bounded log of completed work. Profiles are owned and mutated
//! exclusively by the task router; everything else reads snapshots.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::AgentConfig;

/// Smoothing factor for the exponentially updated scores
const SCORE_EMA_ALPHA: f64 = 0.3;

/// One completed task recorded against a profile
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PerformanceEntry {
    /// Task identifier
    pub task_id: String,
    /// Task type that was executed
    pub task_type: String,
    /// Whether the task succeeded
    pub success: bool,
    /// Reported quality [0,10]
    pub quality: f64,
    /// Whether the task was collaborative
    pub collaborative: bool,
    /// When the task completed
    pub completed_at: DateTime<Utc>,
}

/// Routing profile for one specialist-agent type
#[derive(Clone, Debug)]
pub struct TaskRoutingProfile {
    /// Agent type identifier
    pub agent_type: String,
    /// Expertise domains this agent covers
    pub expertise: Vec<String>,
    /// Tasks currently assigned
    pub current_workload: u32,
    /// Maximum concurrent workload
    pub max_workload: u32,
    /// Exponentially updated delivery-speed score [0,1]
    pub efficiency_score: f64,
    /// Exponentially updated success-rate score [0,1]
    pub reliability_score: f64,
    /// Exponentially updated quality score [0,1]
    pub quality_score: f64,
    /// Agent types this agent collaborates well with
    pub collaborates_with: Vec<String>,
    history: VecDeque<PerformanceEntry>,
    history_cap: usize,
}

impl TaskRoutingProfile {
    /// Build a fresh profile from config
    #[must_use]
    pub fn from_config(config: &AgentConfig, history_cap: usize) -> Self {
        Self {
            agent_type: config.agent_type.clone(),
            expertise: config.expertise.clone(),
            current_workload: 0,
            max_workload: config.max_workload,
            efficiency_score: 0.5,
            reliability_score: 0.5,
            quality_score: 0.5,
            collaborates_with: config.collaborates_with.clone(),
            history: VecDeque::new(),
            history_cap: history_cap.max(1),
        }
    }

    /// Current workload as a fraction of capacity
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max_workload == 0 {
            return 1.0;
        }
        f64::from(self.current_workload) / f64::from(self.max_workload)
    }

    /// Workload sub-score: remaining headroom, floored at 0
    #[must_use]
    pub fn workload_score(&self) -> f64 {
        (1.0 - self.utilization()).max(0.0)
    }

    /// Expertise sub-score: fraction of required tags this agent covers
    ///
    /// A task with no required expertise matches every agent fully.
    #[must_use]
    pub fn expertise_score(&self, required: &[String]) -> f64 {
        if required.is_empty() {
            return 1.0;
        }
        let covered = required
            .iter()
            .filter(|tag| self.expertise.contains(tag))
            .count();
        covered as f64 / required.len() as f64
    }

    /// Performance sub-score: average of recent quality and success rate,
    /// 0.5 with no history
    #[must_use]
    pub fn performance_score(&self) -> f64 {
        if self.history.is_empty() {
            return 0.5;
        }
        let n = self.history.len() as f64;
        let quality: f64 = self.history.iter().map(|e| e.quality / 10.0).sum::<f64>() / n;
        let success: f64 = self
            .history
            .iter()
            .filter(|e| e.success)
            .count() as f64
            / n;
        (quality + success) / 2.0
    }

    /// Collaboration sub-score: average quality of past collaborative work,
    /// or 1.0 when the task needs no collaboration or no such history exists
    #[must_use]
    pub fn collaboration_score(&self, needs_collaboration: bool) -> f64 {
        if !needs_collaboration {
            return 1.0;
        }
        let collaborative: Vec<&PerformanceEntry> =
            self.history.iter().filter(|e| e.collaborative).collect();
        if collaborative.is_empty() {
            return 1.0;
        }
        collaborative.iter().map(|e| e.quality / 10.0).sum::<f64>() / collaborative.len() as f64
    }

    /// Take on one task
    pub fn assign(&mut self) {
        self.current_workload += 1;
    }

    /// Release one task; the counter never goes negative
    pub fn release(&mut self) {
        if self.current_workload == 0 {
            tracing::warn!(agent = %self.agent_type, "release with zero workload");
            return;
        }
        self.current_workload -= 1;
    }

    /// Record a completed task and fold it into the exponential scores
    pub fn record_completion(&mut self, entry: PerformanceEntry) {
        let success_value = if entry.success { 1.0 } else { 0.0 };
        let quality_value = (entry.quality / 10.0).clamp(0.0, 1.0);

        self.reliability_score =
            SCORE_EMA_ALPHA * success_value + (1.0 - SCORE_EMA_ALPHA) * self.reliability_score;
        self.quality_score =
            SCORE_EMA_ALPHA * quality_value + (1.0 - SCORE_EMA_ALPHA) * self.quality_score;
        // Delivery speed proxies on the same blend of quality and success
        // until duration tracking lands with the scheduler integration.
        self.efficiency_score = SCORE_EMA_ALPHA * (success_value + quality_value) / 2.0
            + (1.0 - SCORE_EMA_ALPHA) * self.efficiency_score;

        if self.history.len() == self.history_cap {
            self.history.pop_front();
        }
        self.history.push_back(entry);
    }

    /// Number of completed tasks retained
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(expertise: &[&str], max_workload: u32) -> TaskRoutingProfile {
        TaskRoutingProfile::from_config(
            &AgentConfig {
                agent_type: "backend-dev".to_string(),
                expertise: expertise.iter().map(|s| (*s).to_string()).collect(),
                max_workload,
                collaborates_with: vec![],
            },
            100,
        )
    }

    fn entry(success: bool, quality: f64, collaborative: bool) -> PerformanceEntry {
        PerformanceEntry {
            task_id: "t".to_string(),
            task_type: "backend".to_string(),
            success,
            quality,
            collaborative,
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn test_expertise_fraction() {
        let p = profile(&["backend", "infra"], 10);
        let required = vec!["backend".to_string(), "frontend".to_string()];
        assert!((p.expertise_score(&required) - 0.5).abs() < f64::EPSILON);
        assert!((p.expertise_score(&[]) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_workload_score_floors_at_zero() {
        let mut p = profile(&["backend"], 2);
        p.assign();
        p.assign();
        p.assign();
        assert!((p.workload_score() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_release_never_goes_negative() {
        let mut p = profile(&["backend"], 2);
        p.release();
        assert_eq!(p.current_workload, 0);
    }

    #[test]
    fn test_performance_defaults_without_history() {
        let p = profile(&["backend"], 2);
        assert!((p.performance_score() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_performance_blends_quality_and_success() {
        let mut p = profile(&["backend"], 2);
        p.record_completion(entry(true, 8.0, false));
        p.record_completion(entry(false, 4.0, false));
        // quality avg = 0.6, success rate = 0.5 -> 0.55
        assert!((p.performance_score() - 0.55).abs() < 1e-9);
    }

    #[test]
    fn test_collaboration_defaults_when_not_needed() {
        let mut p = profile(&["backend"], 2);
        p.record_completion(entry(true, 2.0, true));
        assert!((p.collaboration_score(false) - 1.0).abs() < f64::EPSILON);
        assert!((p.collaboration_score(true) - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut p = TaskRoutingProfile::from_config(
            &AgentConfig {
                agent_type: "a".to_string(),
                expertise: vec![],
                max_workload: 1,
                collaborates_with: vec![],
            },
            3,
        );
        for _ in 0..10 {
            p.record_completion(entry(true, 7.0, false));
        }
        assert_eq!(p.history_len(), 3);
    }
}
