//! Model Selector
//!
//! Chooses one (model, pool) pair for a model request:
//!
//! ```text
//! ModelQuery (agent-type, task-type, priority, constraints)
//!   -> binding lookup (agent-type, task-type)
//!   -> hard-constraint filter (budget, latency, capabilities, context)
//!   -> score preferred list, then fallback list
//!   -> catalog search ranked by quality tier, then cost
//! ```
//!
//! Scoring starts from a 0.5 base and blends live performance metrics with
//! static catalog data; absent metrics, the model's quality-tier default
//! stands in. After every invocation the caller reports the outcome back via
//! [`ModelSelector::record_outcome`], which updates the model's running
//! averages by incremental averaging and may emit a switch recommendation
//! when a bound model drifts below its binding's performance threshold.
//!
//! Metrics are owned by the selector alone; other components read them
//! through [`ModelSelector::metrics`] snapshots.

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::backend::Capability;
use crate::config::{BindingConfig, ModelSpec, SelectorSettings};
use crate::error::{DispatchError, DispatchResult};
use crate::events::{EventBus, EventKind};

/// Base score every candidate starts from
const BASE_SCORE: f64 = 0.5;
/// Weight of the observed success rate
const SUCCESS_WEIGHT: f64 = 0.3;
/// Weight of the quality score (normalized to [0,1])
const QUALITY_WEIGHT: f64 = 0.2;
/// Penalty when average latency exceeds the binding's ceiling
const LATENCY_PENALTY: f64 = 0.2;
/// Penalty when average cost exceeds the binding's ceiling
const COST_PENALTY: f64 = 0.1;
/// Bonus for models on the preferred (not fallback) list
const PREFERRED_BONUS: f64 = 0.2;
/// Scale of the priority bonus; priority is clamped to [0,3]
const PRIORITY_BONUS: f64 = 0.1;
const PRIORITY_CEILING: u8 = 3;

/// A model request from an agent
#[derive(Clone, Debug)]
pub struct ModelQuery {
    /// Requesting agent type
    pub agent_type: String,
    /// Task type the model will work on
    pub task_type: String,
    /// Request priority, 0 (background) to 3 (urgent)
    pub priority: u8,
    /// Hard budget ceiling (cost per 1k tokens, USD)
    pub max_cost: Option<f64>,
    /// Hard latency ceiling in milliseconds
    pub max_latency_ms: Option<u64>,
    /// Capabilities the model must support
    pub required_capabilities: Vec<Capability>,
    /// Minimum context window in tokens
    pub min_context_window: Option<u32>,
}

impl ModelQuery {
    /// Unconstrained query for the given (agent-type, task-type)
    pub fn new(agent_type: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            agent_type: agent_type.into(),
            task_type: task_type.into(),
            priority: 0,
            max_cost: None,
            max_latency_ms: None,
            required_capabilities: Vec::new(),
            min_context_window: None,
        }
    }

    /// Set the request priority (clamped to 3)
    #[must_use]
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(PRIORITY_CEILING);
        self
    }

    /// Set a hard budget ceiling
    #[must_use]
    pub fn with_max_cost(mut self, max_cost: f64) -> Self {
        self.max_cost = Some(max_cost);
        self
    }

    /// Set a hard latency ceiling
    #[must_use]
    pub fn with_max_latency_ms(mut self, max_latency_ms: u64) -> Self {
        self.max_latency_ms = Some(max_latency_ms);
        self
    }

    /// Require a capability
    #[must_use]
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.required_capabilities.push(capability);
        self
    }

    /// Require a minimum context window
    #[must_use]
    pub fn with_min_context_window(mut self, tokens: u32) -> Self {
        self.min_context_window = Some(tokens);
        self
    }
}

/// The selector's answer: which model, on which pool, and why
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelChoice {
    /// Chosen model identifier
    pub model_id: String,
    /// Pool the model is served from
    pub pool_id: String,
    /// Selection score
    pub score: f64,
    /// Expected cost per 1k tokens (USD)
    pub estimated_cost_per_1k: f64,
    /// Expected latency in milliseconds
    pub estimated_latency_ms: u64,
}

/// Running averages for one model, weighted by sample count
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct ModelPerformanceMetrics {
    /// Fraction of invocations that succeeded
    pub success_rate: f64,
    /// Average round-trip latency in milliseconds
    pub avg_latency_ms: f64,
    /// Average cost per invocation (USD)
    pub avg_cost: f64,
    /// Average reported quality [0,10]
    pub quality_score: f64,
    /// Fraction of invocations that failed
    pub error_rate: f64,
    /// Completed invocations folded into the averages
    pub sample_count: u64,
}

impl ModelPerformanceMetrics {
    /// Fold one completed invocation into the running averages
    ///
    /// Each average moves by `(old*n + value) / (n + 1)`.
    pub fn record(&mut self, success: bool, latency_ms: u64, cost: f64, quality: Option<f64>) {
        let n = self.sample_count as f64;
        let success_value = if success { 1.0 } else { 0.0 };

        self.success_rate = (self.success_rate * n + success_value) / (n + 1.0);
        self.error_rate = (self.error_rate * n + (1.0 - success_value)) / (n + 1.0);
        self.avg_latency_ms = (self.avg_latency_ms * n + latency_ms as f64) / (n + 1.0);
        self.avg_cost = (self.avg_cost * n + cost) / (n + 1.0);
        if let Some(quality) = quality {
            self.quality_score = (self.quality_score * n + quality) / (n + 1.0);
        }
        self.sample_count += 1;
    }
}

/// One scored candidate during selection
struct Candidate {
    spec: ModelSpec,
    score: f64,
}

/// Chooses models for (agent-type, task-type) requests
///
/// Owns the model catalog, the bindings table and all per-model performance
/// metrics. All tables are id-keyed and safe for concurrent access.
pub struct ModelSelector {
    catalog: DashMap<String, ModelSpec>,
    bindings: DashMap<(String, String), BindingConfig>,
    metrics: DashMap<String, ModelPerformanceMetrics>,
    settings: RwLock<SelectorSettings>,
    events: EventBus,
}

impl ModelSelector {
    /// Create a selector from a catalog and bindings
    #[must_use]
    pub fn new(
        models: Vec<ModelSpec>,
        bindings: Vec<BindingConfig>,
        settings: SelectorSettings,
        events: EventBus,
    ) -> Self {
        let catalog = DashMap::new();
        for spec in models {
            catalog.insert(spec.model_id.clone(), spec);
        }
        let binding_table = DashMap::new();
        for binding in bindings {
            binding_table.insert(
                (binding.agent_type.clone(), binding.task_type.clone()),
                binding,
            );
        }
        Self {
            catalog,
            bindings: binding_table,
            metrics: DashMap::new(),
            settings: RwLock::new(settings),
            events,
        }
    }

    /// Choose one (model, pool) pair for the query
    ///
    /// With a binding: the preferred list is evaluated first; the fallback
    /// list only when no preferred model passes the query's hard constraints.
    /// If the binding is exhausted and allows auto-selection, or no binding
    /// exists, the global catalog is searched ranked by quality tier then
    /// cost per token.
    pub fn select(&self, query: &ModelQuery) -> DispatchResult<ModelChoice> {
        let binding_key = (query.agent_type.clone(), query.task_type.clone());
        let binding = self.bindings.get(&binding_key).map(|b| b.value().clone());

        let choice = match &binding {
            Some(binding) => {
                let preferred = self.score_list(&binding.preferred, query, binding, true);
                let ranked = if preferred.is_empty() {
                    self.score_list(&binding.fallbacks, query, binding, false)
                } else {
                    preferred
                };
                match self.pick_best(ranked) {
                    Some(choice) => Some(choice),
                    None if binding.auto_select => self.catalog_search(query),
                    None => None,
                }
            }
            None => self.catalog_search(query),
        };

        let choice = choice.ok_or_else(|| DispatchError::NoCandidate {
            subject: "model".to_string(),
            detail: format!(
                "no model satisfies constraints for ({}, {})",
                query.agent_type, query.task_type
            ),
        })?;

        tracing::debug!(
            agent = %query.agent_type,
            task = %query.task_type,
            model = %choice.model_id,
            pool = %choice.pool_id,
            score = choice.score,
            "model selected"
        );
        self.events.emit(EventKind::ModelSelected {
            agent_type: query.agent_type.clone(),
            task_type: query.task_type.clone(),
            model_id: choice.model_id.clone(),
            backend_id: choice.pool_id.clone(),
            score: choice.score,
        });
        Ok(choice)
    }

    /// Report the outcome of one model invocation
    ///
    /// Updates the model's running averages and, if the model is bound and
    /// its success rate has drifted below the binding's performance threshold
    /// by more than the configured margin, emits a switch recommendation
    /// naming the best-scoring bound alternative. Recommendations are never
    /// auto-applied.
    pub fn record_outcome(
        &self,
        model_id: &str,
        success: bool,
        latency_ms: u64,
        cost: f64,
        quality: Option<f64>,
    ) {
        let updated = {
            let mut entry = self.metrics.entry(model_id.to_string()).or_default();
            entry.record(success, latency_ms, cost, quality);
            *entry
        };

        let margin = self.settings.read().switch_margin;
        for binding in self.bindings.iter() {
            let binding = binding.value();
            if !binding.preferred.iter().any(|m| m == model_id) {
                continue;
            }
            if updated.success_rate >= binding.min_performance - margin {
                continue;
            }
            if let Some(suggested) = self.best_alternative(binding, model_id) {
                tracing::info!(
                    agent = %binding.agent_type,
                    task = %binding.task_type,
                    current = %model_id,
                    suggested = %suggested,
                    success_rate = updated.success_rate,
                    "model underperforming, switch recommended"
                );
                self.events.emit(EventKind::ModelSwitchRecommended {
                    agent_type: binding.agent_type.clone(),
                    task_type: binding.task_type.clone(),
                    current_model: model_id.to_string(),
                    suggested_model: suggested,
                    success_rate: updated.success_rate,
                });
            }
        }
    }

    /// Live metrics for a model, if any invocations have been recorded
    #[must_use]
    pub fn metrics(&self, model_id: &str) -> Option<ModelPerformanceMetrics> {
        self.metrics.get(model_id).map(|entry| *entry.value())
    }

    /// Register or replace a catalog model
    pub fn upsert_model(&self, spec: ModelSpec) {
        self.catalog.insert(spec.model_id.clone(), spec);
    }

    /// Register or replace a binding
    pub fn upsert_binding(&self, binding: BindingConfig) {
        self.bindings.insert(
            (binding.agent_type.clone(), binding.task_type.clone()),
            binding,
        );
    }

    /// Swap selector tuning live
    pub fn apply_settings(&self, settings: SelectorSettings) {
        *self.settings.write() = settings;
    }

    fn score_list(
        &self,
        model_ids: &[String],
        query: &ModelQuery,
        binding: &BindingConfig,
        preferred: bool,
    ) -> Vec<Candidate> {
        model_ids
            .iter()
            .filter_map(|model_id| {
                let spec = self.catalog.get(model_id)?.value().clone();
                if !self.passes_hard_constraints(&spec, query) {
                    return None;
                }
                let score = self.score(&spec, query, binding, preferred);
                Some(Candidate { spec, score })
            })
            .collect()
    }

    /// Hard constraints come from the query; binding thresholds only shape
    /// the score.
    fn passes_hard_constraints(&self, spec: &ModelSpec, query: &ModelQuery) -> bool {
        if let Some(max_cost) = query.max_cost {
            if spec.cost_per_1k_tokens > max_cost {
                return false;
            }
        }
        if let Some(max_latency) = query.max_latency_ms {
            if spec.avg_latency_ms > max_latency {
                return false;
            }
        }
        if let Some(min_context) = query.min_context_window {
            if spec.context_window < min_context {
                return false;
            }
        }
        query
            .required_capabilities
            .iter()
            .all(|needed| spec.capabilities.contains(needed))
    }

    fn score(
        &self,
        spec: &ModelSpec,
        query: &ModelQuery,
        binding: &BindingConfig,
        preferred: bool,
    ) -> f64 {
        let metrics = self.metrics(&spec.model_id);

        // No live metrics: optimistic on success, tier default on quality.
        let success_rate = metrics
            .filter(|m| m.sample_count > 0)
            .map_or(1.0, |m| m.success_rate);
        let quality = metrics
            .filter(|m| m.sample_count > 0 && m.quality_score > 0.0)
            .map_or_else(|| spec.quality_tier.default_quality(), |m| m.quality_score);
        let avg_latency_ms = metrics
            .filter(|m| m.sample_count > 0)
            .map_or(spec.avg_latency_ms as f64, |m| m.avg_latency_ms);
        let avg_cost = metrics
            .filter(|m| m.sample_count > 0)
            .map_or(spec.cost_per_1k_tokens, |m| m.avg_cost);

        let mut score = BASE_SCORE;
        score += SUCCESS_WEIGHT * success_rate;
        score += QUALITY_WEIGHT * (quality / 10.0);
        if avg_latency_ms > binding.max_latency_ms as f64 {
            score -= LATENCY_PENALTY;
        }
        if avg_cost > binding.max_cost {
            score -= COST_PENALTY;
        }
        if preferred {
            score += PREFERRED_BONUS;
        }
        score += f64::from(query.priority.min(PRIORITY_CEILING)) / f64::from(PRIORITY_CEILING)
            * PRIORITY_BONUS;
        score
    }

    /// Highest score wins; ties broken by lower cost, then lower latency
    fn pick_best(&self, candidates: Vec<Candidate>) -> Option<ModelChoice> {
        let best = candidates.into_iter().max_by(|a, b| {
            a.score
                .partial_cmp(&b.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.spec
                        .cost_per_1k_tokens
                        .partial_cmp(&a.spec.cost_per_1k_tokens)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| b.spec.avg_latency_ms.cmp(&a.spec.avg_latency_ms))
        })?;
        Some(ModelChoice {
            model_id: best.spec.model_id.clone(),
            pool_id: best.spec.pool_id.clone(),
            score: best.score,
            estimated_cost_per_1k: best.spec.cost_per_1k_tokens,
            estimated_latency_ms: best.spec.avg_latency_ms,
        })
    }

    /// Catalog search: quality tier first, then cheapest within a tier
    fn catalog_search(&self, query: &ModelQuery) -> Option<ModelChoice> {
        let mut passing: Vec<ModelSpec> = self
            .catalog
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|spec| self.passes_hard_constraints(spec, query))
            .collect();
        passing.sort_by(|a, b| {
            b.quality_tier.cmp(&a.quality_tier).then_with(|| {
                a.cost_per_1k_tokens
                    .partial_cmp(&b.cost_per_1k_tokens)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
        });
        let spec = passing.into_iter().next()?;
        Some(ModelChoice {
            model_id: spec.model_id.clone(),
            pool_id: spec.pool_id.clone(),
            // Catalog fallback carries no binding context; tier quality
            // stands in for a score.
            score: spec.quality_tier.default_quality() / 10.0,
            estimated_cost_per_1k: spec.cost_per_1k_tokens,
            estimated_latency_ms: spec.avg_latency_ms,
        })
    }

    /// Best bound alternative to `exclude`, by observed success rate then
    /// quality tier
    fn best_alternative(&self, binding: &BindingConfig, exclude: &str) -> Option<String> {
        binding
            .preferred
            .iter()
            .chain(binding.fallbacks.iter())
            .filter(|id| id.as_str() != exclude)
            .filter_map(|id| {
                let spec = self.catalog.get(id)?;
                let rate = self
                    .metrics(id)
                    .filter(|m| m.sample_count > 0)
                    .map_or(1.0, |m| m.success_rate);
                Some((id.clone(), rate, spec.quality_tier))
            })
            .max_by(|a, b| {
                a.1.partial_cmp(&b.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.2.cmp(&b.2))
            })
            .map(|(id, _, _)| id)
    }
}
