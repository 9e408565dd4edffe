//! Dispatch Configuration
//!
//! Closed, explicitly enumerated configuration for every component of the
//! dispatch core: pool membership, load-balancing strategy per pool,
//! circuit-breaker thresholds, rate limits, model bindings, the model
//! catalog, agent profiles and router scoring weights.
//!
//! Unknown fields are rejected at parse time (`deny_unknown_fields`) and
//! [`DispatchConfig::validate`] checks numeric ranges before any component
//! accepts the config. All sections are hot-swappable: components expose
//! `apply_*` methods that take the relevant section without a restart.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::Capability;
use crate::pool::StrategyKind;

/// Configuration errors, raised at load time
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML source failed to parse (includes unknown fields)
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A numeric value is outside its sane range
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Dotted path of the offending field
        field: String,
        /// Why the value was rejected
        reason: String,
    },

    /// Two aggregates share an identifier
    #[error("duplicate {kind} id: {id}")]
    DuplicateId {
        /// Aggregate kind
        kind: &'static str,
        /// The duplicated identifier
        id: String,
    },

    /// A cross-reference names an aggregate that does not exist
    #[error("{field} references unknown {kind} {id}")]
    DanglingReference {
        /// Dotted path of the referencing field
        field: String,
        /// Referenced aggregate kind
        kind: &'static str,
        /// The missing identifier
        id: String,
    },
}

fn check_unit(field: &str, value: f64) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) || value.is_nan() {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            reason: format!("{value} not in [0, 1]"),
        });
    }
    Ok(())
}

fn check_positive(field: &str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            reason: format!("{value} must be > 0"),
        });
    }
    Ok(())
}

// ============================================================================
// Router Settings
// ============================================================================

/// Weights for the four routing sub-scores
///
/// Empirically chosen defaults; tune per deployment rather than treating
/// them as invariants.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RouterWeights {
    /// Weight of the expertise-match sub-score
    pub expertise: f64,
    /// Weight of the workload sub-score
    pub workload: f64,
    /// Weight of the historical-performance sub-score
    pub performance: f64,
    /// Weight of the collaboration-fit sub-score
    pub collaboration: f64,
}

impl Default for RouterWeights {
    fn default() -> Self {
        Self {
            expertise: 0.4,
            workload: 0.25,
            performance: 0.15,
            collaboration: 0.2,
        }
    }
}

impl RouterWeights {
    /// Sum of all weights
    #[must_use]
    pub fn total(&self) -> f64 {
        self.expertise + self.workload + self.performance + self.collaboration
    }
}

/// Task router configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RouterSettings {
    /// Sub-score weights
    pub weights: RouterWeights,
    /// Candidates below this combined score are discarded
    pub confidence_threshold: f64,
    /// Post-assignment workload ratio that triggers an overload warning
    pub workload_warning_threshold: f64,
    /// Workload sub-score below which overload risk is flagged
    pub overload_risk_threshold: f64,
    /// Expertise sub-score below which mismatch risk is flagged
    pub expertise_risk_threshold: f64,
    /// Maximum routing decisions kept in history
    pub history_cap: usize,
    /// Maximum per-agent historical performance entries
    pub profile_history_cap: usize,
    /// Seconds between optimization passes
    pub optimization_interval_secs: u64,
    /// Utilization below this is flagged as under-used
    pub underutilized_threshold: f64,
    /// Utilization above this is flagged as overloaded
    pub overutilized_threshold: f64,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            weights: RouterWeights::default(),
            confidence_threshold: 0.7,
            workload_warning_threshold: 0.8,
            overload_risk_threshold: 0.2,
            expertise_risk_threshold: 0.5,
            history_cap: 1000,
            profile_history_cap: 100,
            optimization_interval_secs: 60,
            underutilized_threshold: 0.3,
            overutilized_threshold: 0.9,
        }
    }
}

impl RouterSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        check_unit("router.weights.expertise", self.weights.expertise)?;
        check_unit("router.weights.workload", self.weights.workload)?;
        check_unit("router.weights.performance", self.weights.performance)?;
        check_unit("router.weights.collaboration", self.weights.collaboration)?;
        check_positive("router.weights (sum)", self.weights.total())?;
        check_unit("router.confidence_threshold", self.confidence_threshold)?;
        check_unit(
            "router.workload_warning_threshold",
            self.workload_warning_threshold,
        )?;
        check_unit("router.underutilized_threshold", self.underutilized_threshold)?;
        check_unit("router.overutilized_threshold", self.overutilized_threshold)?;
        if self.profile_history_cap == 0 || self.history_cap == 0 {
            return Err(ConfigError::InvalidValue {
                field: "router.history_cap".to_string(),
                reason: "history caps must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Agent Profiles
// ============================================================================

/// Static configuration of one specialist-agent type
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Agent type identifier (e.g. "backend-dev", "reviewer")
    pub agent_type: String,
    /// Expertise domains this agent covers
    pub expertise: Vec<String>,
    /// Maximum concurrent workload
    pub max_workload: u32,
    /// Agent types this agent collaborates well with
    #[serde(default)]
    pub collaborates_with: Vec<String>,
}

impl AgentConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workload == 0 {
            return Err(ConfigError::InvalidValue {
                field: format!("agents.{}.max_workload", self.agent_type),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Model Catalog & Bindings
// ============================================================================

/// Quality tier of a catalog model, used when no live metrics exist
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    /// Small/fast models
    Basic,
    /// General-purpose models
    Standard,
    /// Frontier models
    Premium,
}

impl QualityTier {
    /// Default quality score [0,10] used absent live metrics
    #[must_use]
    pub fn default_quality(&self) -> f64 {
        match self {
            Self::Basic => 4.0,
            Self::Standard => 6.5,
            Self::Premium => 8.5,
        }
    }
}

/// One entry in the global model catalog
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelSpec {
    /// Model identifier
    pub model_id: String,
    /// Provider pool this model is served from
    pub pool_id: String,
    /// Quality tier
    pub quality_tier: QualityTier,
    /// Cost per 1k tokens (USD)
    pub cost_per_1k_tokens: f64,
    /// Expected average latency in milliseconds
    pub avg_latency_ms: u64,
    /// Features this model supports
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    /// Maximum context window in tokens
    pub context_window: u32,
}

impl ModelSpec {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.cost_per_1k_tokens < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: format!("models.{}.cost_per_1k_tokens", self.model_id),
                reason: "cost cannot be negative".to_string(),
            });
        }
        if self.context_window == 0 {
            return Err(ConfigError::InvalidValue {
                field: format!("models.{}.context_window", self.model_id),
                reason: "context window must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// A configured (agent-type, task-type) → models binding
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BindingConfig {
    /// Requesting agent type
    pub agent_type: String,
    /// Task type being executed
    pub task_type: String,
    /// Ordered preferred model identifiers
    pub preferred: Vec<String>,
    /// Ordered fallback model identifiers
    #[serde(default)]
    pub fallbacks: Vec<String>,
    /// Whether the selector may auto-select outside this binding
    #[serde(default = "default_true")]
    pub auto_select: bool,
    /// Minimum acceptable success rate [0,1]
    pub min_performance: f64,
    /// Maximum acceptable average cost per request (USD)
    pub max_cost: f64,
    /// Maximum acceptable average latency in milliseconds
    pub max_latency_ms: u64,
}

fn default_true() -> bool {
    true
}

impl BindingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let field = format!("bindings.{}.{}", self.agent_type, self.task_type);
        check_unit(&format!("{field}.min_performance"), self.min_performance)?;
        if self.preferred.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: format!("{field}.preferred"),
                reason: "at least one preferred model is required".to_string(),
            });
        }
        if self.max_cost < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: format!("{field}.max_cost"),
                reason: "cost ceiling cannot be negative".to_string(),
            });
        }
        Ok(())
    }
}

/// Model-selector tuning knobs
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SelectorSettings {
    /// How far below a binding's performance threshold a model's success
    /// rate must fall before a switch recommendation is emitted
    pub switch_margin: f64,
}

impl Default for SelectorSettings {
    fn default() -> Self {
        Self { switch_margin: 0.1 }
    }
}

// ============================================================================
// Pools, Circuit Breakers, Rate Limits
// ============================================================================

/// Circuit-breaker thresholds for a pool
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CircuitSettings {
    /// Consecutive failures before a member's circuit opens
    pub failure_threshold: u32,
    /// Consecutive half-open successes before the circuit closes
    pub success_threshold: u32,
}

impl Default for CircuitSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 1,
        }
    }
}

/// Rate limits for one backend instance
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RateLimitSettings {
    /// Request admissions replenished per one-second tick
    pub requests_per_second: u32,
    /// Token allowance replenished per one-second tick
    pub tokens_per_second: u64,
    /// Maximum request tokens the bucket may hold
    pub burst: u32,
    /// How long a caller waits for admission before a capacity error
    pub queue_timeout_ms: u64,
    /// Queue depth at which a saturation event is emitted
    pub saturation_depth: usize,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            requests_per_second: 10,
            tokens_per_second: 10_000,
            burst: 20,
            queue_timeout_ms: 30_000,
            saturation_depth: 64,
        }
    }
}

impl RateLimitSettings {
    fn validate(&self, field: &str) -> Result<(), ConfigError> {
        if self.requests_per_second == 0 || self.burst == 0 {
            return Err(ConfigError::InvalidValue {
                field: field.to_string(),
                reason: "requests_per_second and burst must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// One backend instance inside a pool
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemberConfig {
    /// Backend instance identifier (matches the adapter's `id()`)
    pub backend_id: String,
    /// Weight for weighted round-robin
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Priority, used as the cost proxy by the cost-optimized strategy
    /// (lower = cheaper/preferred)
    #[serde(default)]
    pub priority: u32,
    /// Rate limits for this instance
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
}

fn default_weight() -> u32 {
    1
}

/// A named pool of backend instances
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    /// Pool identifier (the logical backend name the selector targets)
    pub pool_id: String,
    /// Load-balancing strategy
    #[serde(default)]
    pub strategy: StrategyKind,
    /// Circuit-breaker thresholds applied to every member
    #[serde(default)]
    pub circuit: CircuitSettings,
    /// Seconds between background health checks
    #[serde(default = "default_health_interval")]
    pub health_check_interval_secs: u64,
    /// Member instances
    pub members: Vec<MemberConfig>,
}

fn default_health_interval() -> u64 {
    15
}

impl PoolConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.members.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: format!("pools.{}.members", self.pool_id),
                reason: "a pool needs at least one member".to_string(),
            });
        }
        if self.circuit.failure_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                field: format!("pools.{}.circuit.failure_threshold", self.pool_id),
                reason: "must be at least 1".to_string(),
            });
        }
        let mut seen = HashSet::new();
        for member in &self.members {
            if !seen.insert(member.backend_id.as_str()) {
                return Err(ConfigError::DuplicateId {
                    kind: "pool member",
                    id: member.backend_id.clone(),
                });
            }
            if member.weight == 0 {
                return Err(ConfigError::InvalidValue {
                    field: format!("pools.{}.{}.weight", self.pool_id, member.backend_id),
                    reason: "weight must be at least 1".to_string(),
                });
            }
            member
                .rate_limit
                .validate(&format!("pools.{}.{}.rate_limit", self.pool_id, member.backend_id))?;
        }
        Ok(())
    }
}

// ============================================================================
// Top-Level Config
// ============================================================================

/// Complete dispatch-core configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DispatchConfig {
    /// Task router settings
    pub router: RouterSettings,
    /// Model selector settings
    pub selector: SelectorSettings,
    /// Specialist agent profiles
    pub agents: Vec<AgentConfig>,
    /// Global model catalog
    pub models: Vec<ModelSpec>,
    /// (agent-type, task-type) model bindings
    pub bindings: Vec<BindingConfig>,
    /// Provider pools
    pub pools: Vec<PoolConfig>,
}

impl DispatchConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML config file
    pub fn from_path(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    /// Validate numeric ranges, identifier uniqueness and cross-references
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.router.validate()?;
        check_unit("selector.switch_margin", self.selector.switch_margin)?;

        let mut agent_ids = HashSet::new();
        for agent in &self.agents {
            agent.validate()?;
            if !agent_ids.insert(agent.agent_type.as_str()) {
                return Err(ConfigError::DuplicateId {
                    kind: "agent",
                    id: agent.agent_type.clone(),
                });
            }
        }

        let mut pool_ids = HashSet::new();
        for pool in &self.pools {
            pool.validate()?;
            if !pool_ids.insert(pool.pool_id.as_str()) {
                return Err(ConfigError::DuplicateId {
                    kind: "pool",
                    id: pool.pool_id.clone(),
                });
            }
        }

        let mut model_ids = HashSet::new();
        for model in &self.models {
            model.validate()?;
            if !model_ids.insert(model.model_id.as_str()) {
                return Err(ConfigError::DuplicateId {
                    kind: "model",
                    id: model.model_id.clone(),
                });
            }
            if !pool_ids.contains(model.pool_id.as_str()) {
                return Err(ConfigError::DanglingReference {
                    field: format!("models.{}.pool_id", model.model_id),
                    kind: "pool",
                    id: model.pool_id.clone(),
                });
            }
        }

        let mut binding_keys = HashSet::new();
        for binding in &self.bindings {
            binding.validate()?;
            let key = (binding.agent_type.clone(), binding.task_type.clone());
            if !binding_keys.insert(key) {
                return Err(ConfigError::DuplicateId {
                    kind: "binding",
                    id: format!("{}/{}", binding.agent_type, binding.task_type),
                });
            }
            for model_id in binding.preferred.iter().chain(binding.fallbacks.iter()) {
                if !model_ids.contains(model_id.as_str()) {
                    return Err(ConfigError::DanglingReference {
                        field: format!("bindings.{}.{}", binding.agent_type, binding.task_type),
                        kind: "model",
                        id: model_id.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}
