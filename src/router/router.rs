//! Task Router
//!
//! Maps one unit of work to exactly one specialist-agent type with an
//! inspectable justification:
//!
//! ```text
//! route(task)
//!   -> classify (type, complexity, required expertise)
//!   -> score every profile: expertise / workload / performance / collaboration
//!   -> weighted sum, discard below the confidence threshold
//!   -> primary + two alternatives with pros/cons + risk assessment
//!   -> workload increment, overload warning, bounded history append
//! ```
//!
//! Scoring is fully deterministic: identical profiles, task and config
//! always produce the same decision. Ties between equal scores resolve by
//! agent-type name so ordering never depends on map iteration order.
//!
//! All profiles live behind one lock, which is what makes redistribution
//! atomic: the old agent's decrement and the new agent's increment happen
//! under a single write guard, so no reader ever observes the task counted
//! twice or not at all.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::{AgentConfig, RouterSettings, RouterWeights};
use crate::error::{DispatchError, DispatchResult};
use crate::events::{EventBus, EventKind};
use crate::router::profile::{PerformanceEntry, TaskRoutingProfile};
use crate::router::task::{classify, TaskClassification, TaskDescriptor};

/// Why a task is being moved off its current agent
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedistributionReason {
    /// The current agent is overloaded
    Overload,
    /// Output quality from the current agent is unacceptable
    QualityIssue,
    /// The task turned out to need different expertise
    ExpertiseMismatch,
    /// The task's priority changed and deserves a full re-evaluation
    PriorityChange,
    /// The current agent failed or became unavailable
    AgentFailure,
}

impl RedistributionReason {
    /// Scoring weights implied by the reason
    ///
    /// A priority change is the only reason that re-runs the full
    /// configured weighting; the others collapse onto the sub-scores that
    /// address the problem being escaped.
    #[must_use]
    pub fn weights(&self, configured: RouterWeights) -> RouterWeights {
        match self {
            Self::Overload => RouterWeights {
                expertise: 0.0,
                workload: 1.0,
                performance: 0.0,
                collaboration: 0.0,
            },
            Self::QualityIssue => RouterWeights {
                expertise: 0.2,
                workload: 0.1,
                performance: 0.6,
                collaboration: 0.1,
            },
            Self::ExpertiseMismatch => RouterWeights {
                expertise: 0.7,
                workload: 0.1,
                performance: 0.1,
                collaboration: 0.1,
            },
            Self::AgentFailure => RouterWeights {
                expertise: 0.2,
                workload: 0.2,
                performance: 0.5,
                collaboration: 0.1,
            },
            Self::PriorityChange => configured,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Overload => "overload",
            Self::QualityIssue => "quality_issue",
            Self::ExpertiseMismatch => "expertise_mismatch",
            Self::PriorityChange => "priority_change",
            Self::AgentFailure => "agent_failure",
        }
    }
}

/// A non-primary candidate kept for auditability
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AlternativeCandidate {
    /// Agent type
    pub agent_type: String,
    /// Combined score
    pub score: f64,
    /// Points in this candidate's favor
    pub pros: Vec<String>,
    /// Points against this candidate
    pub cons: Vec<String>,
}

/// Immutable output of one routing evaluation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Unique decision identifier
    pub decision_id: Uuid,
    /// Routed task
    pub task_id: String,
    /// Chosen agent type
    pub agent_type: String,
    /// Combined score of the chosen agent [0,1]
    pub confidence: f64,
    /// Next-best candidates with pros/cons
    pub alternatives: Vec<AlternativeCandidate>,
    /// Expected duration in seconds
    pub estimated_duration_secs: u64,
    /// Expected quality [0,10] from the agent's track record
    pub estimated_quality: f64,
    /// Assessed risks of the chosen assignment
    pub risks: Vec<String>,
    /// When the decision was made
    pub decided_at: DateTime<Utc>,
}

/// What the router remembers about one in-flight assignment
#[derive(Clone, Debug)]
struct Assignment {
    agent_type: String,
    classification: TaskClassification,
}

/// One scored candidate with its sub-scores, kept for pros/cons generation
#[derive(Clone, Debug)]
struct ScoredCandidate {
    agent_type: String,
    expertise: f64,
    workload: f64,
    performance: f64,
    collaboration: f64,
    combined: f64,
}

/// Point-in-time utilization of one agent
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentUtilization {
    /// Agent type
    pub agent_type: String,
    /// Tasks currently assigned
    pub current_workload: u32,
    /// Maximum concurrent workload
    pub max_workload: u32,
    /// Workload as a fraction of capacity
    pub utilization: f64,
}

/// Point-in-time router statistics
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RouterStats {
    /// Sum of all workload counters
    pub total_workload: u32,
    /// In-flight task assignments being tracked
    pub in_flight_assignments: usize,
    /// Decisions retained in the routing history
    pub history_len: usize,
    /// Per-agent utilization, sorted by agent type
    pub agents: Vec<AgentUtilization>,
}

/// Routes tasks to specialist agents and tracks their workload
pub struct TaskRouter {
    settings: RwLock<RouterSettings>,
    profiles: RwLock<HashMap<String, TaskRoutingProfile>>,
    assignments: RwLock<HashMap<String, Assignment>>,
    history: Mutex<VecDeque<RoutingDecision>>,
    events: EventBus,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    optimizer: Mutex<Option<JoinHandle<()>>>,
}

impl TaskRouter {
    /// Build a router from agent configs
    #[must_use]
    pub fn new(agents: &[AgentConfig], settings: RouterSettings, events: EventBus) -> Self {
        let profiles = agents
            .iter()
            .map(|config| {
                (
                    config.agent_type.clone(),
                    TaskRoutingProfile::from_config(config, settings.profile_history_cap),
                )
            })
            .collect();
        Self {
            settings: RwLock::new(settings),
            profiles: RwLock::new(profiles),
            assignments: RwLock::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            events,
            shutdown_tx: Mutex::new(None),
            optimizer: Mutex::new(None),
        }
    }

    /// Route one task to the best-scoring agent
    pub fn route(&self, task: &TaskDescriptor) -> DispatchResult<RoutingDecision> {
        let classification = classify(task);
        let settings = self.settings.read().clone();
        let weights = settings.weights;

        let decision = {
            let mut profiles = self.profiles.write();
            let ranked = rank_candidates(&profiles, &classification, weights, &[]);
            let (primary, alternatives) =
                split_ranked(ranked, settings.confidence_threshold).ok_or_else(|| {
                    DispatchError::NoCandidate {
                        subject: "agent".to_string(),
                        detail: format!(
                            "no agent cleared confidence {} for task type {}",
                            settings.confidence_threshold, classification.task_type
                        ),
                    }
                })?;

            let profile = profiles
                .get_mut(&primary.agent_type)
                .ok_or_else(|| DispatchError::UnknownId {
                    kind: "agent",
                    id: primary.agent_type.clone(),
                })?;
            let estimated_quality = profile.performance_score() * 10.0;
            profile.assign();
            let utilization = profile.utilization();

            let decision = RoutingDecision {
                decision_id: Uuid::new_v4(),
                task_id: task.task_id.clone(),
                agent_type: primary.agent_type.clone(),
                confidence: primary.combined,
                alternatives: alternatives
                    .into_iter()
                    .map(|c| describe_alternative(&c, &settings))
                    .collect(),
                estimated_duration_secs: task
                    .estimated_duration_secs
                    .unwrap_or_else(|| classification.complexity.default_duration_secs()),
                estimated_quality,
                risks: assess_risks(&primary, &settings),
                decided_at: Utc::now(),
            };

            self.assignments.write().insert(
                task.task_id.clone(),
                Assignment {
                    agent_type: primary.agent_type.clone(),
                    classification: classification.clone(),
                },
            );

            if utilization > settings.workload_warning_threshold {
                tracing::warn!(
                    agent = %primary.agent_type,
                    utilization,
                    "agent workload past warning threshold"
                );
                self.events.emit(EventKind::AgentOverloaded {
                    agent_type: primary.agent_type.clone(),
                    utilization,
                });
            }
            decision
        };

        tracing::debug!(
            task = %decision.task_id,
            agent = %decision.agent_type,
            confidence = decision.confidence,
            "task routed"
        );
        self.events.emit(EventKind::RoutingDecision {
            task_id: decision.task_id.clone(),
            agent_type: decision.agent_type.clone(),
            confidence: decision.confidence,
        });
        self.push_history(decision.clone(), settings.history_cap);
        Ok(decision)
    }

    /// Report a routed task as finished
    ///
    /// Releases the agent's workload unit and folds the outcome into its
    /// exponential scores.
    pub fn complete_task(&self, task_id: &str, success: bool, quality: f64) -> DispatchResult<()> {
        let assignment = self.assignments.write().remove(task_id).ok_or_else(|| {
            DispatchError::UnknownId {
                kind: "assignment",
                id: task_id.to_string(),
            }
        })?;

        let mut profiles = self.profiles.write();
        let profile = profiles
            .get_mut(&assignment.agent_type)
            .ok_or_else(|| DispatchError::UnknownId {
                kind: "agent",
                id: assignment.agent_type.clone(),
            })?;
        profile.release();
        profile.record_completion(PerformanceEntry {
            task_id: task_id.to_string(),
            task_type: assignment.classification.task_type.clone(),
            success,
            quality,
            collaborative: assignment.classification.needs_collaboration,
            completed_at: Utc::now(),
        });
        Ok(())
    }

    /// Abandon a routed task that never ran
    ///
    /// Releases the agent's workload unit without recording a completion:
    /// the agent's scores stay untouched by failures downstream of routing.
    pub fn cancel_task(&self, task_id: &str) -> DispatchResult<()> {
        let assignment = self.assignments.write().remove(task_id).ok_or_else(|| {
            DispatchError::UnknownId {
                kind: "assignment",
                id: task_id.to_string(),
            }
        })?;

        let mut profiles = self.profiles.write();
        let profile = profiles
            .get_mut(&assignment.agent_type)
            .ok_or_else(|| DispatchError::UnknownId {
                kind: "agent",
                id: assignment.agent_type.clone(),
            })?;
        profile.release();
        Ok(())
    }

    /// Move an in-flight task to a different agent
    ///
    /// Candidates are re-scored with the weighting the reason implies, the
    /// current agent excluded. The workload unit moves atomically: decrement
    /// and increment happen under one write guard. On failure (no candidate
    /// clears the threshold) the existing assignment is left untouched.
    pub fn redistribute(
        &self,
        task_id: &str,
        reason: RedistributionReason,
    ) -> DispatchResult<RoutingDecision> {
        let assignment = self
            .assignments
            .read()
            .get(task_id)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownId {
                kind: "assignment",
                id: task_id.to_string(),
            })?;
        let settings = self.settings.read().clone();
        let weights = reason.weights(settings.weights);

        let decision = {
            let mut profiles = self.profiles.write();
            let excluded = [assignment.agent_type.clone()];
            let ranked =
                rank_candidates(&profiles, &assignment.classification, weights, &excluded);
            let (primary, alternatives) =
                split_ranked(ranked, settings.confidence_threshold).ok_or_else(|| {
                    DispatchError::NoCandidate {
                        subject: "agent".to_string(),
                        detail: format!(
                            "no agent other than {} clears confidence {}",
                            assignment.agent_type, settings.confidence_threshold
                        ),
                    }
                })?;

            // Atomic move: both counters change under this one guard.
            if let Some(old) = profiles.get_mut(&assignment.agent_type) {
                old.release();
            }
            let new_profile = profiles
                .get_mut(&primary.agent_type)
                .ok_or_else(|| DispatchError::UnknownId {
                    kind: "agent",
                    id: primary.agent_type.clone(),
                })?;
            let estimated_quality = new_profile.performance_score() * 10.0;
            new_profile.assign();

            self.assignments.write().insert(
                task_id.to_string(),
                Assignment {
                    agent_type: primary.agent_type.clone(),
                    classification: assignment.classification.clone(),
                },
            );

            RoutingDecision {
                decision_id: Uuid::new_v4(),
                task_id: task_id.to_string(),
                agent_type: primary.agent_type.clone(),
                confidence: primary.combined,
                alternatives: alternatives
                    .into_iter()
                    .map(|c| describe_alternative(&c, &settings))
                    .collect(),
                estimated_duration_secs: assignment
                    .classification
                    .complexity
                    .default_duration_secs(),
                estimated_quality,
                risks: assess_risks(&primary, &settings),
                decided_at: Utc::now(),
            }
        };

        tracing::info!(
            task = %task_id,
            from = %assignment.agent_type,
            to = %decision.agent_type,
            reason = reason.as_str(),
            "task redistributed"
        );
        self.events.emit(EventKind::TaskRedistributed {
            task_id: task_id.to_string(),
            from_agent: assignment.agent_type,
            to_agent: decision.agent_type.clone(),
            reason: reason.as_str().to_string(),
        });
        self.push_history(decision.clone(), settings.history_cap);
        Ok(decision)
    }

    /// Route a batch, then rebalance so one agent does not absorb the batch
    ///
    /// Rebalancing moves the lowest-confidence decisions off any agent that
    /// received more than its fair share (⌈batch/agents⌉) of the batch.
    pub fn route_batch(
        &self,
        tasks: &[TaskDescriptor],
    ) -> Vec<DispatchResult<RoutingDecision>> {
        let mut results: Vec<DispatchResult<RoutingDecision>> =
            tasks.iter().map(|task| self.route(task)).collect();

        let agent_count = self.profiles.read().len().max(1);
        let routed: usize = results.iter().filter(|r| r.is_ok()).count();
        if routed < 2 {
            return results;
        }
        let fair_share = routed.div_ceil(agent_count);

        // Bounded rebalance: at most one move per routed task.
        for _ in 0..routed {
            let mut counts: HashMap<String, usize> = HashMap::new();
            for decision in results.iter().flatten() {
                *counts.entry(decision.agent_type.clone()).or_default() += 1;
            }
            let Some(overfull) = counts
                .iter()
                .filter(|(_, &count)| count > fair_share)
                .max_by_key(|(_, &count)| count)
                .map(|(agent, _)| agent.clone())
            else {
                break;
            };

            let Some(victim_index) = results
                .iter()
                .enumerate()
                .filter_map(|(i, r)| r.as_ref().ok().map(|d| (i, d)))
                .filter(|(_, d)| d.agent_type == overfull)
                .min_by(|(_, a), (_, b)| {
                    a.confidence
                        .partial_cmp(&b.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|(i, _)| i)
            else {
                break;
            };

            let task_id = match &results[victim_index] {
                Ok(decision) => decision.task_id.clone(),
                Err(_) => break,
            };
            match self.redistribute(&task_id, RedistributionReason::Overload) {
                Ok(new_decision) => results[victim_index] = Ok(new_decision),
                // Nowhere better to put it; the batch stays as routed.
                Err(_) => break,
            }
        }
        results
    }

    /// One optimization pass over all profiles
    ///
    /// Emits rebalance recommendations for agents under 30% or over 90%
    /// utilization; it never moves in-flight work itself.
    pub fn run_optimization_pass(&self) {
        let settings = self.settings.read().clone();
        let profiles = self.profiles.read();

        // An idle system needs no rebalancing.
        if profiles.values().all(|p| p.current_workload == 0) {
            return;
        }

        for profile in profiles.values() {
            let utilization = profile.utilization();
            if utilization > settings.overutilized_threshold {
                self.events.emit(EventKind::RebalanceRecommended {
                    agent_type: profile.agent_type.clone(),
                    utilization,
                    overloaded: true,
                });
            } else if utilization < settings.underutilized_threshold {
                self.events.emit(EventKind::RebalanceRecommended {
                    agent_type: profile.agent_type.clone(),
                    utilization,
                    overloaded: false,
                });
            }
        }
    }

    /// Start the periodic optimization loop
    pub fn start(self: &Arc<Self>) {
        let mut shutdown_slot = self.shutdown_tx.lock();
        if shutdown_slot.is_some() {
            return;
        }
        let (tx, mut rx) = watch::channel(false);
        *shutdown_slot = Some(tx);
        drop(shutdown_slot);

        let interval_secs = self.settings.read().optimization_interval_secs.max(1);
        let router = Arc::clone(self);
        *self.optimizer.lock() = Some(tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => router.run_optimization_pass(),
                    _ = rx.changed() => break,
                }
            }
        }));
    }

    /// Stop the optimization loop
    pub async fn stop(&self) {
        let tx = self.shutdown_tx.lock().take();
        if let Some(tx) = tx {
            let _ = tx.send(true);
        }
        let task = self.optimizer.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Clone of one agent's profile, if registered
    #[must_use]
    pub fn profile(&self, agent_type: &str) -> Option<TaskRoutingProfile> {
        self.profiles.read().get(agent_type).cloned()
    }

    /// Sum of all workload counters; equals in-flight assignments
    #[must_use]
    pub fn total_workload(&self) -> u32 {
        self.profiles
            .read()
            .values()
            .map(|p| p.current_workload)
            .sum()
    }

    /// Decisions retained in the bounded routing history, newest last
    #[must_use]
    pub fn history(&self) -> Vec<RoutingDecision> {
        self.history.lock().iter().cloned().collect()
    }

    /// Point-in-time statistics across all agents
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        let profiles = self.profiles.read();
        let mut agents: Vec<AgentUtilization> = profiles
            .values()
            .map(|p| AgentUtilization {
                agent_type: p.agent_type.clone(),
                current_workload: p.current_workload,
                max_workload: p.max_workload,
                utilization: p.utilization(),
            })
            .collect();
        agents.sort_by(|a, b| a.agent_type.cmp(&b.agent_type));
        RouterStats {
            total_workload: agents.iter().map(|a| a.current_workload).sum(),
            in_flight_assignments: self.assignments.read().len(),
            history_len: self.history.lock().len(),
            agents,
        }
    }

    /// Register or replace agents from config; existing counters survive
    pub fn apply_agents(&self, agents: &[AgentConfig]) {
        let history_cap = self.settings.read().profile_history_cap;
        let mut profiles = self.profiles.write();
        for config in agents {
            match profiles.get_mut(&config.agent_type) {
                Some(existing) => {
                    existing.expertise = config.expertise.clone();
                    existing.max_workload = config.max_workload;
                    existing.collaborates_with = config.collaborates_with.clone();
                }
                None => {
                    profiles.insert(
                        config.agent_type.clone(),
                        TaskRoutingProfile::from_config(config, history_cap),
                    );
                }
            }
        }
    }

    /// Swap router tuning live
    pub fn apply_settings(&self, settings: RouterSettings) {
        *self.settings.write() = settings;
    }

    fn push_history(&self, decision: RoutingDecision, cap: usize) {
        let mut history = self.history.lock();
        while history.len() >= cap.max(1) {
            history.pop_front();
        }
        history.push_back(decision);
    }
}

fn score_profile(
    profile: &TaskRoutingProfile,
    classification: &TaskClassification,
    weights: RouterWeights,
) -> ScoredCandidate {
    let expertise = profile.expertise_score(&classification.required_expertise);
    let workload = profile.workload_score();
    let performance = profile.performance_score();
    let collaboration = profile.collaboration_score(classification.needs_collaboration);
    ScoredCandidate {
        agent_type: profile.agent_type.clone(),
        expertise,
        workload,
        performance,
        collaboration,
        combined: weights.expertise * expertise
            + weights.workload * workload
            + weights.performance * performance
            + weights.collaboration * collaboration,
    }
}

/// Score all profiles, excluding named agents, sorted best-first
///
/// Ties break by agent-type name so the ranking is deterministic.
fn rank_candidates(
    profiles: &HashMap<String, TaskRoutingProfile>,
    classification: &TaskClassification,
    weights: RouterWeights,
    excluded: &[String],
) -> Vec<ScoredCandidate> {
    let mut ranked: Vec<ScoredCandidate> = profiles
        .values()
        .filter(|p| !excluded.contains(&p.agent_type))
        .map(|p| score_profile(p, classification, weights))
        .collect();
    ranked.sort_by(|a, b| {
        b.combined
            .partial_cmp(&a.combined)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.agent_type.cmp(&b.agent_type))
    });
    ranked
}

/// Apply the confidence threshold and split primary from up to two
/// alternatives
fn split_ranked(
    ranked: Vec<ScoredCandidate>,
    threshold: f64,
) -> Option<(ScoredCandidate, Vec<ScoredCandidate>)> {
    let mut surviving: Vec<ScoredCandidate> = ranked
        .into_iter()
        .filter(|c| c.combined >= threshold)
        .collect();
    if surviving.is_empty() {
        return None;
    }
    let primary = surviving.remove(0);
    surviving.truncate(2);
    Some((primary, surviving))
}

fn assess_risks(candidate: &ScoredCandidate, settings: &RouterSettings) -> Vec<String> {
    let mut risks = Vec::new();
    if candidate.workload < settings.overload_risk_threshold {
        risks.push(format!(
            "overload risk: workload headroom {:.2} below {:.2}",
            candidate.workload, settings.overload_risk_threshold
        ));
    }
    if candidate.expertise < settings.expertise_risk_threshold {
        risks.push(format!(
            "expertise mismatch risk: coverage {:.2} below {:.2}",
            candidate.expertise, settings.expertise_risk_threshold
        ));
    }
    risks
}

fn describe_alternative(
    candidate: &ScoredCandidate,
    settings: &RouterSettings,
) -> AlternativeCandidate {
    let mut pros = Vec::new();
    let mut cons = Vec::new();

    if candidate.expertise >= 0.8 {
        pros.push("strong expertise match".to_string());
    } else if candidate.expertise < settings.expertise_risk_threshold {
        cons.push("weak expertise coverage".to_string());
    }
    if candidate.workload >= 0.5 {
        pros.push("has spare capacity".to_string());
    } else if candidate.workload < settings.overload_risk_threshold {
        cons.push("near workload capacity".to_string());
    }
    if candidate.performance >= 0.7 {
        pros.push("strong track record".to_string());
    } else if candidate.performance < 0.4 {
        cons.push("weak recent performance".to_string());
    }

    AlternativeCandidate {
        agent_type: candidate.agent_type.clone(),
        score: candidate.combined,
        pros,
        cons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(agent_type: &str, expertise: &[&str], max_workload: u32) -> AgentConfig {
        AgentConfig {
            agent_type: agent_type.to_string(),
            expertise: expertise.iter().map(|s| (*s).to_string()).collect(),
            max_workload,
            collaborates_with: vec![],
        }
    }

    fn router(agents: &[AgentConfig]) -> TaskRouter {
        TaskRouter::new(agents, RouterSettings::default(), EventBus::default())
    }

    fn backend_task(task_id: &str) -> TaskDescriptor {
        TaskDescriptor::new(task_id, "add an api endpoint")
    }

    #[test]
    fn test_expertise_match_beats_overloaded_mismatch() {
        let r = router(&[
            agent("backend-dev", &["backend"], 10),
            agent("frontend-dev", &["frontend"], 10),
        ]);
        // frontend-dev to 9/10, backend-dev to 2/10.
        for i in 0..9 {
            r.route(&TaskDescriptor::new(
                format!("warm-fe-{i}"),
                "update the ui component",
            ))
            .expect("route");
        }
        for i in 0..2 {
            r.route(&backend_task(&format!("warm-be-{i}"))).expect("route");
        }
        assert_eq!(r.profile("frontend-dev").expect("profile").current_workload, 9);
        assert_eq!(r.profile("backend-dev").expect("profile").current_workload, 2);

        // Complex backend task: the matching, lightly loaded agent wins.
        let mut task = backend_task("t-main");
        for i in 0..7 {
            task = task.with_criterion(format!("criterion {i}"));
        }
        let decision = r.route(&task).expect("route");
        assert_eq!(decision.agent_type, "backend-dev");
    }

    #[test]
    fn test_routing_is_deterministic() {
        let make = || {
            router(&[
                agent("a", &["backend"], 10),
                agent("b", &["backend"], 10),
                agent("c", &["frontend"], 10),
            ])
        };
        let task = backend_task("t1");
        let d1 = make().route(&task).expect("route");
        let d2 = make().route(&task).expect("route");
        assert_eq!(d1.agent_type, d2.agent_type);
        assert!((d1.confidence - d2.confidence).abs() < f64::EPSILON);
    }

    #[test]
    fn test_below_threshold_is_rejected() {
        // No expertise overlap and half-used capacity keeps every score
        // below the 0.7 default threshold.
        let r = router(&[agent("frontend-dev", &["frontend"], 2)]);
        r.route(&TaskDescriptor::new("warm", "tidy")).expect("route");

        let err = r.route(&backend_task("t1")).expect_err("reject");
        assert!(matches!(err, DispatchError::NoCandidate { .. }));
    }

    #[test]
    fn test_workload_conservation() {
        let r = router(&[
            agent("a", &["backend"], 10),
            agent("b", &["backend"], 10),
        ]);
        for i in 0..6 {
            r.route(&backend_task(&format!("t{i}"))).expect("route");
        }
        assert_eq!(r.total_workload(), 6);

        r.complete_task("t0", true, 8.0).expect("complete");
        r.complete_task("t1", false, 3.0).expect("complete");
        assert_eq!(r.total_workload(), 4);

        r.redistribute("t2", RedistributionReason::PriorityChange)
            .expect("redistribute");
        assert_eq!(r.total_workload(), 4);
    }

    #[test]
    fn test_stats_match_in_flight_assignments() {
        let r = router(&[
            agent("a", &["backend"], 10),
            agent("b", &["backend"], 10),
        ]);
        for i in 0..5 {
            r.route(&backend_task(&format!("t{i}"))).expect("route");
        }
        let stats = r.stats();
        assert_eq!(stats.total_workload, 5);
        assert_eq!(stats.in_flight_assignments, 5);
        assert_eq!(stats.agents.len(), 2);
        assert_eq!(
            stats.agents.iter().map(|a| a.current_workload).sum::<u32>(),
            5
        );
    }

    #[test]
    fn test_cancel_releases_without_recording() {
        let r = router(&[agent("a", &["backend"], 10)]);
        r.route(&backend_task("t1")).expect("route");

        r.cancel_task("t1").expect("cancel");
        assert_eq!(r.total_workload(), 0);
        let p = r.profile("a").expect("profile");
        assert_eq!(p.history_len(), 0);
        assert!((p.reliability_score - 0.5).abs() < f64::EPSILON);
        assert!((p.quality_score - 0.5).abs() < f64::EPSILON);
        // The assignment is gone; a later completion must fail.
        assert!(r.complete_task("t1", true, 5.0).is_err());
    }

    #[test]
    fn test_complete_unknown_task_fails() {
        let r = router(&[agent("a", &["backend"], 10)]);
        let err = r.complete_task("ghost", true, 5.0).expect_err("unknown");
        assert!(matches!(err, DispatchError::UnknownId { .. }));
    }

    #[test]
    fn test_redistribute_excludes_current_agent() {
        let r = router(&[
            agent("a", &["backend"], 10),
            agent("b", &["backend"], 10),
        ]);
        let decision = r.route(&backend_task("t1")).expect("route");
        let moved = r
            .redistribute("t1", RedistributionReason::AgentFailure)
            .expect("redistribute");
        assert_ne!(moved.agent_type, decision.agent_type);
    }

    #[test]
    fn test_redistribute_failure_leaves_assignment_intact() {
        let r = router(&[agent("only", &["backend"], 10)]);
        r.route(&backend_task("t1")).expect("route");

        let err = r
            .redistribute("t1", RedistributionReason::Overload)
            .expect_err("nowhere to go");
        assert!(matches!(err, DispatchError::NoCandidate { .. }));
        assert_eq!(r.total_workload(), 1);
        // Completion still works against the original agent.
        r.complete_task("t1", true, 7.0).expect("complete");
        assert_eq!(r.total_workload(), 0);
    }

    #[test]
    fn test_overload_event_past_threshold() {
        let r = router(&[agent("a", &["backend"], 2)]);
        let mut rx = r.events.subscribe();

        r.route(&backend_task("t1")).expect("route");
        r.route(&backend_task("t2")).expect("route");

        let mut overloaded = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event.kind, EventKind::AgentOverloaded { .. }) {
                overloaded = true;
            }
        }
        assert!(overloaded, "2/2 workload must trip the 0.8 warning");
    }

    #[test]
    fn test_history_is_bounded() {
        let settings = RouterSettings {
            history_cap: 5,
            ..RouterSettings::default()
        };
        let r = TaskRouter::new(
            &[agent("a", &["backend"], 100)],
            settings,
            EventBus::default(),
        );
        for i in 0..20 {
            r.route(&backend_task(&format!("t{i}"))).expect("route");
        }
        assert_eq!(r.history().len(), 5);
    }

    #[test]
    fn test_batch_rebalance_spreads_load() {
        let r = router(&[
            agent("a", &["backend"], 20),
            agent("b", &["backend"], 20),
        ]);
        let tasks: Vec<TaskDescriptor> = (0..6)
            .map(|i| backend_task(&format!("t{i}")))
            .collect();
        let results = r.route_batch(&tasks);
        assert!(results.iter().all(|r| r.is_ok()));

        let a_load = r.profile("a").expect("profile").current_workload;
        let b_load = r.profile("b").expect("profile").current_workload;
        // Fair share for 6 tasks over 2 agents is 3.
        assert!(a_load <= 3 && b_load <= 3, "{a_load}/{b_load}");
    }

    #[test]
    fn test_optimization_pass_flags_extremes() {
        let r = router(&[
            agent("hot", &["backend"], 2),
            agent("cold", &["frontend"], 100),
        ]);
        let mut rx = r.events.subscribe();
        // Load "hot" to 2/2 and "cold" to 1/100.
        r.route(&backend_task("t1")).expect("route");
        r.route(&backend_task("t2")).expect("route");
        r.route(&TaskDescriptor::new("t3", "update the ui component"))
            .expect("route");

        r.run_optimization_pass();
        let mut flagged_hot = false;
        let mut flagged_cold = false;
        while let Ok(event) = rx.try_recv() {
            if let EventKind::RebalanceRecommended {
                agent_type,
                overloaded,
                ..
            } = event.kind
            {
                match (agent_type.as_str(), overloaded) {
                    ("hot", true) => flagged_hot = true,
                    ("cold", false) => flagged_cold = true,
                    _ => {}
                }
            }
        }
        assert!(flagged_hot && flagged_cold);
    }

    #[test]
    fn test_alternatives_carry_pros_and_cons() {
        let r = router(&[
            agent("a", &["backend"], 10),
            agent("b", &["backend"], 10),
            agent("c", &["backend"], 10),
        ]);
        let decision = r.route(&backend_task("t1")).expect("route");
        assert_eq!(decision.alternatives.len(), 2);
        for alt in &decision.alternatives {
            assert!(!alt.pros.is_empty() || !alt.cons.is_empty());
        }
    }
}
