//! Dispatcher
//!
//! The assembled dispatch core. One [`Dispatcher`] owns the task router,
//! the model selector and the provider pool manager, wired to a shared
//! event bus, and drives the full control flow for a unit of work:
//!
//! ```text
//! dispatch(task, input)
//!   -> TaskRouter::route            (which agent)
//!   -> ModelSelector::select        (which model, which pool)
//!   -> PoolManager::execute         (which backend instance, with failover)
//!   -> feedback: model metrics, agent profile, circuit state, events
//! ```
//!
//! Components remain individually usable; the dispatcher only composes
//! them and closes the feedback loop after each backend response.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::backend::{BackendAdapter, BackendRequest, BackendResponse};
use crate::config::DispatchConfig;
use crate::error::{DispatchError, DispatchResult};
use crate::events::{DispatchEvent, EventBus};
use crate::pool::{PoolManager, PoolSnapshot};
use crate::router::{classify, RoutingDecision, TaskDescriptor, TaskRouter};
use crate::selector::{ModelChoice, ModelQuery, ModelSelector};

/// Rough token estimate: four characters of input per token
const CHARS_PER_TOKEN: usize = 4;

/// Result of one fully dispatched unit of work
#[derive(Clone, Debug)]
pub struct DispatchOutcome {
    /// Which agent the task was routed to
    pub decision: RoutingDecision,
    /// Which model/pool served it
    pub model: ModelChoice,
    /// The backend's response
    pub response: BackendResponse,
}

/// The assembled dispatch core
pub struct Dispatcher {
    router: Arc<TaskRouter>,
    selector: Arc<ModelSelector>,
    pools: Arc<PoolManager>,
    events: EventBus,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Assemble a dispatcher from validated config and backend adapters
    ///
    /// Adapters are keyed by backend id; every pool member in the config
    /// must have one. Config is validated before anything is built.
    pub async fn new(
        config: DispatchConfig,
        adapters: HashMap<String, Arc<dyn BackendAdapter>>,
    ) -> DispatchResult<Self> {
        config
            .validate()
            .map_err(|e| DispatchError::Validation(e.to_string()))?;

        let events = EventBus::default();
        let router = Arc::new(TaskRouter::new(
            &config.agents,
            config.router.clone(),
            events.clone(),
        ));
        let selector = Arc::new(ModelSelector::new(
            config.models.clone(),
            config.bindings.clone(),
            config.selector,
            events.clone(),
        ));
        let pools = Arc::new(PoolManager::new(events.clone()));
        for pool_config in &config.pools {
            let pool_adapters: HashMap<String, Arc<dyn BackendAdapter>> = pool_config
                .members
                .iter()
                .filter_map(|m| {
                    adapters
                        .get(&m.backend_id)
                        .map(|a| (m.backend_id.clone(), Arc::clone(a)))
                })
                .collect();
            pools.add_pool(pool_config, pool_adapters).await?;
        }

        Ok(Self {
            router,
            selector,
            pools,
            events,
        })
    }

    /// Run the full dispatch flow for one task
    ///
    /// On success the task is marked complete against its agent and the
    /// model's metrics are updated; on failure the failure is fed back the
    /// same way before the error is returned.
    pub async fn dispatch(
        &self,
        task: &TaskDescriptor,
        input: &str,
    ) -> DispatchResult<DispatchOutcome> {
        let decision = self.router.route(task)?;
        let classification = classify(task);

        let query = ModelQuery::new(&decision.agent_type, &classification.task_type)
            .with_priority(task.priority);
        let model = match self.selector.select(&query) {
            Ok(model) => model,
            Err(err) => {
                // Routing already took a workload unit; give it back without
                // penalizing the agent for a selection problem.
                self.router.cancel_task(&task.task_id)?;
                return Err(err);
            }
        };

        let estimated_tokens = (input.len() / CHARS_PER_TOKEN) as u64;
        let request = BackendRequest::new(&model.model_id, input)
            .with_estimated_tokens(estimated_tokens);

        let started = Instant::now();
        let result = self.pools.execute(&model.pool_id, &request).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(response) => {
                let tokens = response.tokens_used.unwrap_or(estimated_tokens);
                let cost = model.estimated_cost_per_1k * (tokens as f64 / 1000.0);
                self.selector
                    .record_outcome(&model.model_id, true, latency_ms, cost, None);
                self.router
                    .complete_task(&task.task_id, true, model.score.clamp(0.0, 1.0) * 10.0)?;
                Ok(DispatchOutcome {
                    decision,
                    model,
                    response,
                })
            }
            Err(err) => {
                let cost = model.estimated_cost_per_1k * (estimated_tokens as f64 / 1000.0);
                self.selector
                    .record_outcome(&model.model_id, false, latency_ms, cost, None);
                self.router.complete_task(&task.task_id, false, 0.0)?;
                Err(err)
            }
        }
    }

    /// Route a task without executing anything
    pub fn route_task(&self, task: &TaskDescriptor) -> DispatchResult<RoutingDecision> {
        self.router.route(task)
    }

    /// Select a model without executing anything
    pub fn select_model(&self, query: &ModelQuery) -> DispatchResult<ModelChoice> {
        self.selector.select(query)
    }

    /// The task router
    #[must_use]
    pub fn router(&self) -> &Arc<TaskRouter> {
        &self.router
    }

    /// The model selector
    #[must_use]
    pub fn selector(&self) -> &Arc<ModelSelector> {
        &self.selector
    }

    /// The provider pool manager
    #[must_use]
    pub fn pools(&self) -> &Arc<PoolManager> {
        &self.pools
    }

    /// Subscribe to all dispatch events
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<DispatchEvent> {
        self.events.subscribe()
    }

    /// Read-only views of every pool
    #[must_use]
    pub fn pool_snapshots(&self) -> Vec<PoolSnapshot> {
        self.pools.snapshots()
    }

    /// Start background work: health checks, limiter ticks, optimization
    pub fn start(&self) {
        self.pools.start();
        self.router.start();
    }

    /// Stop background work and shut down adapters
    pub async fn stop(&self) {
        self.router.stop().await;
        self.pools.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockAdapter;
    use crate::config::{
        AgentConfig, BindingConfig, CircuitSettings, MemberConfig, ModelSpec, PoolConfig,
        QualityTier, RateLimitSettings, RouterSettings, SelectorSettings,
    };
    use crate::pool::StrategyKind;

    fn test_config() -> DispatchConfig {
        DispatchConfig {
            router: RouterSettings::default(),
            selector: SelectorSettings::default(),
            agents: vec![AgentConfig {
                agent_type: "backend-dev".to_string(),
                expertise: vec!["backend".to_string()],
                max_workload: 10,
                collaborates_with: vec![],
            }],
            models: vec![ModelSpec {
                model_id: "general-7b".to_string(),
                pool_id: "chat".to_string(),
                quality_tier: QualityTier::Standard,
                cost_per_1k_tokens: 0.2,
                avg_latency_ms: 400,
                capabilities: vec![],
                context_window: 8192,
            }],
            bindings: vec![BindingConfig {
                agent_type: "backend-dev".to_string(),
                task_type: "backend".to_string(),
                preferred: vec!["general-7b".to_string()],
                fallbacks: vec![],
                auto_select: true,
                min_performance: 0.7,
                max_cost: 1.0,
                max_latency_ms: 5_000,
            }],
            pools: vec![PoolConfig {
                pool_id: "chat".to_string(),
                strategy: StrategyKind::RoundRobin,
                circuit: CircuitSettings::default(),
                health_check_interval_secs: 3600,
                members: vec![MemberConfig {
                    backend_id: "mock-0".to_string(),
                    weight: 1,
                    priority: 0,
                    rate_limit: RateLimitSettings::default(),
                }],
            }],
        }
    }

    async fn dispatcher() -> (Dispatcher, Arc<MockAdapter>) {
        let mock = Arc::new(MockAdapter::new("mock-0"));
        let adapters: HashMap<String, Arc<dyn BackendAdapter>> = HashMap::from([(
            "mock-0".to_string(),
            Arc::clone(&mock) as Arc<dyn BackendAdapter>,
        )]);
        let d = Dispatcher::new(test_config(), adapters)
            .await
            .expect("dispatcher");
        (d, mock)
    }

    #[tokio::test]
    async fn test_end_to_end_dispatch() {
        let (d, mock) = dispatcher().await;
        let task = TaskDescriptor::new("t1", "add an api endpoint");

        let outcome = d.dispatch(&task, "write the handler").await.expect("dispatch");
        assert_eq!(outcome.decision.agent_type, "backend-dev");
        assert_eq!(outcome.model.model_id, "general-7b");
        assert_eq!(mock.served(), 1);

        // Feedback loop closed: workload released, metrics recorded.
        assert_eq!(d.router().total_workload(), 0);
        let metrics = d.selector().metrics("general-7b").expect("metrics");
        assert_eq!(metrics.sample_count, 1);
        assert!((metrics.success_rate - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_failed_dispatch_feeds_back_failure() {
        let (d, mock) = dispatcher().await;
        mock.fail_next(1);
        let task = TaskDescriptor::new("t1", "add an api endpoint");

        let err = d.dispatch(&task, "write the handler").await.expect_err("fails");
        assert!(matches!(err, DispatchError::BackendExecution { .. }));
        assert_eq!(d.router().total_workload(), 0);
        let metrics = d.selector().metrics("general-7b").expect("metrics");
        assert!((metrics.success_rate - 0.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_selection_failure_returns_workload_without_penalty() {
        let mut config = test_config();
        config.models.clear();
        config.bindings.clear();
        config.pools.clear();
        let d = Dispatcher::new(config, HashMap::new())
            .await
            .expect("dispatcher");

        let task = TaskDescriptor::new("t1", "add an api endpoint");
        let err = d.dispatch(&task, "x").await.expect_err("no model");
        assert!(matches!(err, DispatchError::NoCandidate { .. }));

        // Workload returned, and the agent's record carries no failure.
        let profile = d.router().profile("backend-dev").expect("profile");
        assert_eq!(profile.current_workload, 0);
        assert_eq!(profile.history_len(), 0);
        assert!((profile.quality_score - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = test_config();
        config.agents[0].max_workload = 0;
        let err = Dispatcher::new(config, HashMap::new())
            .await
            .expect_err("invalid");
        assert!(matches!(err, DispatchError::Validation(_)));
    }
}
