//! Provider Pool Manager
//!
//! Resolves a logical backend request to one live pool member:
//!
//! ```text
//! execute(pool, request)
//!   -> filter members (healthy, circuit not open, not yet attempted)
//!   -> strategy selects one member (selection + cursor advance atomic)
//!   -> rate-limiter admission (the only suspension point)
//!   -> adapter call
//!   -> record outcome: circuit, latency EMA, strategy metrics, events
//!   -> on failure, fail over to the next member (bounded by pool size)
//! ```
//!
//! Failover is bounded: each member is attempted at most once per request,
//! and the original error (with the full attempt history) is returned once
//! all members are exhausted. Background health checks run on a fixed
//! interval independent of traffic and can flip members healthy/unhealthy
//! and walk open circuits toward recovery.
//!
//! The per-pool lock is held only for selection and bookkeeping, never
//! across an adapter call or an admission wait.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::backend::{BackendAdapter, BackendRequest, BackendResponse, StreamChunk};
use crate::config::{PoolConfig, RateLimitSettings};
use crate::error::{AttemptRecord, DispatchError, DispatchResult};
use crate::events::{EventBus, EventKind};
use crate::pool::member::{MemberSnapshot, PoolMember};
use crate::pool::strategy::{StrategyKind, StrategyState};

/// Read-only view of one pool
#[derive(Clone, Debug)]
pub struct PoolSnapshot {
    /// Pool identifier
    pub pool_id: String,
    /// Active strategy
    pub strategy: StrategyKind,
    /// Member states
    pub members: Vec<MemberSnapshot>,
}

struct PoolInner {
    strategy: StrategyKind,
    selection: StrategyState,
    members: Vec<PoolMember>,
}

/// One named pool of backend instances
pub struct ProviderPool {
    pool_id: String,
    health_interval: Duration,
    inner: Mutex<PoolInner>,
    events: EventBus,
}

impl ProviderPool {
    fn new(config: &PoolConfig, members: Vec<PoolMember>, events: EventBus) -> Self {
        Self {
            pool_id: config.pool_id.clone(),
            health_interval: Duration::from_secs(config.health_check_interval_secs),
            inner: Mutex::new(PoolInner {
                strategy: config.strategy,
                selection: StrategyState::default(),
                members,
            }),
            events,
        }
    }

    /// Pool identifier
    #[must_use]
    pub fn pool_id(&self) -> &str {
        &self.pool_id
    }

    /// Execute a request against one member, failing over across the pool
    pub async fn execute(&self, request: &BackendRequest) -> DispatchResult<BackendResponse> {
        let pool_size = self.inner.lock().members.len();
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut excluded: Vec<String> = Vec::new();

        for _ in 0..pool_size {
            let Some(selected) = self.select_member(&excluded) else {
                break;
            };

            // Admission wait happens outside the pool lock.
            if let Err(err) = selected.limiter.acquire(request.estimated_tokens).await {
                self.abandon_in_flight(&selected.backend_id);
                return Err(DispatchError::Capacity {
                    backend_id: selected.backend_id,
                    waited: match err {
                        crate::rate_limit::RateLimitError::Timeout { waited, .. } => waited,
                    },
                });
            }

            let start = Instant::now();
            let result = selected.adapter.execute(request).await;
            let latency = start.elapsed();
            let latency_ms = latency.as_millis() as u64;

            self.record_outcome(&selected.backend_id, result.is_ok(), latency_ms);

            match result {
                Ok(response) => return Ok(response),
                Err(err) => {
                    tracing::warn!(
                        pool = %self.pool_id,
                        backend = %selected.backend_id,
                        error = %err,
                        "member failed, trying next"
                    );
                    attempts.push(AttemptRecord::new(
                        selected.backend_id.clone(),
                        latency,
                        err.to_string(),
                    ));
                    excluded.push(selected.backend_id);
                }
            }
        }

        if attempts.is_empty() {
            Err(DispatchError::CircuitOpen {
                pool_id: self.pool_id.clone(),
                attempted: pool_size,
            })
        } else {
            let last_error = attempts
                .last()
                .map(|a| a.outcome.clone())
                .unwrap_or_default();
            Err(DispatchError::BackendExecution {
                pool_id: self.pool_id.clone(),
                attempts,
                last_error,
            })
        }
    }

    /// Execute a streaming request against one member
    ///
    /// Failover covers the initial call only; once a stream is handed to the
    /// caller, mid-stream errors arrive as [`StreamChunk::Error`].
    pub async fn execute_streaming(
        &self,
        request: &BackendRequest,
    ) -> DispatchResult<(String, mpsc::Receiver<StreamChunk>)> {
        let pool_size = self.inner.lock().members.len();
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut excluded: Vec<String> = Vec::new();

        for _ in 0..pool_size {
            let Some(selected) = self.select_member(&excluded) else {
                break;
            };

            if let Err(err) = selected.limiter.acquire(request.estimated_tokens).await {
                self.abandon_in_flight(&selected.backend_id);
                return Err(DispatchError::Capacity {
                    backend_id: selected.backend_id,
                    waited: match err {
                        crate::rate_limit::RateLimitError::Timeout { waited, .. } => waited,
                    },
                });
            }

            let start = Instant::now();
            let result = selected.adapter.execute_streaming(request).await;
            let latency_ms = start.elapsed().as_millis() as u64;

            self.record_outcome(&selected.backend_id, result.is_ok(), latency_ms);

            match result {
                Ok(receiver) => return Ok((selected.backend_id, receiver)),
                Err(err) => {
                    attempts.push(AttemptRecord::new(
                        selected.backend_id.clone(),
                        start.elapsed(),
                        err.to_string(),
                    ));
                    excluded.push(selected.backend_id);
                }
            }
        }

        if attempts.is_empty() {
            Err(DispatchError::CircuitOpen {
                pool_id: self.pool_id.clone(),
                attempted: pool_size,
            })
        } else {
            let last_error = attempts
                .last()
                .map(|a| a.outcome.clone())
                .unwrap_or_default();
            Err(DispatchError::BackendExecution {
                pool_id: self.pool_id.clone(),
                attempts,
                last_error,
            })
        }
    }

    /// Read-only view of the pool
    #[must_use]
    pub fn snapshot(&self) -> PoolSnapshot {
        let inner = self.inner.lock();
        PoolSnapshot {
            pool_id: self.pool_id.clone(),
            strategy: inner.strategy,
            members: inner.members.iter().map(PoolMember::snapshot).collect(),
        }
    }

    /// Swap the load-balancing strategy live
    pub fn set_strategy(&self, strategy: StrategyKind) {
        let mut inner = self.inner.lock();
        inner.strategy = strategy;
        inner.selection = StrategyState::default();
    }

    /// Swap one member's rate limits live
    pub fn update_rate_limits(
        &self,
        backend_id: &str,
        settings: RateLimitSettings,
    ) -> DispatchResult<()> {
        let inner = self.inner.lock();
        let member = inner
            .members
            .iter()
            .find(|m| m.backend_id == backend_id)
            .ok_or_else(|| DispatchError::UnknownId {
                kind: "pool member",
                id: backend_id.to_string(),
            })?;
        member.limiter.update_settings(settings);
        Ok(())
    }

    fn select_member(&self, excluded: &[String]) -> Option<SelectedMember> {
        let mut inner = self.inner.lock();
        let strategy = inner.strategy;

        let candidates: Vec<usize> = inner
            .members
            .iter()
            .enumerate()
            .filter(|(_, m)| m.selectable() && !excluded.contains(&m.backend_id))
            .map(|(i, _)| i)
            .collect();

        let PoolInner {
            selection, members, ..
        } = &mut *inner;
        let index = selection.select(strategy, members, &candidates)?;
        let member = &mut members[index];
        member.active_connections += 1;

        Some(SelectedMember {
            backend_id: member.backend_id.clone(),
            adapter: Arc::clone(&member.adapter),
            limiter: Arc::clone(&member.limiter),
        })
    }

    /// Undo the in-flight increment for a request that never executed
    fn abandon_in_flight(&self, backend_id: &str) {
        let mut inner = self.inner.lock();
        if let Some(member) = inner.members.iter_mut().find(|m| m.backend_id == backend_id) {
            member.active_connections = member.active_connections.saturating_sub(1);
        }
    }

    fn record_outcome(&self, backend_id: &str, success: bool, latency_ms: u64) {
        let transition = {
            let mut inner = self.inner.lock();
            let strategy = inner.strategy;
            inner.selection.observe_latency(strategy, latency_ms);
            let Some(member) = inner.members.iter_mut().find(|m| m.backend_id == backend_id)
            else {
                return;
            };
            member.active_connections = member.active_connections.saturating_sub(1);
            member.record_outcome(success, latency_ms)
        };

        self.events.emit(EventKind::RequestCompleted {
            pool_id: self.pool_id.clone(),
            backend_id: backend_id.to_string(),
            success,
            latency_ms,
        });
        if let Some(transition) = transition {
            tracing::info!(
                pool = %self.pool_id,
                backend = %backend_id,
                from = ?transition.from,
                to = ?transition.to,
                "circuit state changed"
            );
            self.events.emit(EventKind::CircuitStateChanged {
                pool_id: self.pool_id.clone(),
                backend_id: backend_id.to_string(),
                from: transition.from,
                to: transition.to,
            });
        }
    }

    /// Run one health-check pass over every member
    ///
    /// Probes run outside the pool lock; results are applied under it.
    pub async fn run_health_checks(&self) {
        let probes: Vec<(String, Arc<dyn BackendAdapter>)> = {
            let inner = self.inner.lock();
            inner
                .members
                .iter()
                .map(|m| (m.backend_id.clone(), Arc::clone(&m.adapter)))
                .collect()
        };

        for (backend_id, adapter) in probes {
            let alive = adapter.health_check().await;
            let (health_flip, transition) = {
                let mut inner = self.inner.lock();
                let Some(member) = inner
                    .members
                    .iter_mut()
                    .find(|m| m.backend_id == backend_id)
                else {
                    continue;
                };
                member.last_health_check = Some(Instant::now());

                let flipped = if member.healthy != alive {
                    member.healthy = alive;
                    Some(alive)
                } else {
                    None
                };
                let transition = if alive {
                    member.circuit.probe_succeeded()
                } else {
                    None
                };
                (flipped, transition)
            };

            if let Some(healthy) = health_flip {
                tracing::info!(
                    pool = %self.pool_id,
                    backend = %backend_id,
                    healthy,
                    "member health changed"
                );
                self.events.emit(EventKind::MemberHealthChanged {
                    pool_id: self.pool_id.clone(),
                    backend_id: backend_id.clone(),
                    healthy,
                });
            }
            if let Some(transition) = transition {
                self.events.emit(EventKind::CircuitStateChanged {
                    pool_id: self.pool_id.clone(),
                    backend_id: backend_id.clone(),
                    from: transition.from,
                    to: transition.to,
                });
            }
        }
    }

    fn limiters(&self) -> Vec<Arc<crate::rate_limit::ThroughputLimiter>> {
        let inner = self.inner.lock();
        inner
            .members
            .iter()
            .map(|m| Arc::clone(&m.limiter))
            .collect()
    }

    fn adapters(&self) -> Vec<Arc<dyn BackendAdapter>> {
        let inner = self.inner.lock();
        inner
            .members
            .iter()
            .map(|m| Arc::clone(&m.adapter))
            .collect()
    }
}

struct SelectedMember {
    backend_id: String,
    adapter: Arc<dyn BackendAdapter>,
    limiter: Arc<crate::rate_limit::ThroughputLimiter>,
}

// ============================================================================
// Pool Manager
// ============================================================================

/// Owns every provider pool, keyed by pool id
pub struct PoolManager {
    pools: DashMap<String, Arc<ProviderPool>>,
    events: EventBus,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PoolManager {
    /// Create an empty manager reporting on the given event bus
    #[must_use]
    pub fn new(events: EventBus) -> Self {
        Self {
            pools: DashMap::new(),
            events,
            shutdown_tx: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Register a pool from config, wiring each member to its adapter
    ///
    /// Every member must have a matching adapter (by backend id); adapters
    /// are initialized here, before the pool accepts traffic.
    pub async fn add_pool(
        &self,
        config: &PoolConfig,
        adapters: HashMap<String, Arc<dyn BackendAdapter>>,
    ) -> DispatchResult<()> {
        if self.pools.contains_key(&config.pool_id) {
            return Err(DispatchError::Validation(format!(
                "pool {} already exists",
                config.pool_id
            )));
        }

        let mut members = Vec::with_capacity(config.members.len());
        for member_config in &config.members {
            let adapter = adapters
                .get(&member_config.backend_id)
                .cloned()
                .ok_or_else(|| {
                    DispatchError::Validation(format!(
                        "no adapter supplied for backend {}",
                        member_config.backend_id
                    ))
                })?;
            adapter.initialize().await.map_err(|e| {
                DispatchError::Validation(format!(
                    "failed to initialize backend {}: {e}",
                    member_config.backend_id
                ))
            })?;

            let limiter = Arc::new(
                crate::rate_limit::ThroughputLimiter::new(
                    &member_config.backend_id,
                    member_config.rate_limit,
                )
                .with_events(self.events.clone()),
            );
            members.push(PoolMember::new(
                member_config,
                config.circuit,
                adapter,
                limiter,
            ));
        }

        let pool = Arc::new(ProviderPool::new(config, members, self.events.clone()));
        self.pools.insert(config.pool_id.clone(), Arc::clone(&pool));
        tracing::info!(pool = %config.pool_id, members = config.members.len(), "pool registered");

        // A pool registered while running gets its background loops now.
        let shutdown = self.shutdown_tx.lock().as_ref().map(watch::Sender::subscribe);
        if let Some(shutdown) = shutdown {
            self.launch_pool(pool, shutdown);
        }
        Ok(())
    }

    /// Remove a pool; in-flight requests finish against their held handles
    pub fn remove_pool(&self, pool_id: &str) -> DispatchResult<()> {
        self.pools
            .remove(pool_id)
            .map(|_| ())
            .ok_or_else(|| DispatchError::UnknownId {
                kind: "pool",
                id: pool_id.to_string(),
            })
    }

    /// Look up a pool
    pub fn pool(&self, pool_id: &str) -> DispatchResult<Arc<ProviderPool>> {
        self.pools
            .get(pool_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| DispatchError::UnknownId {
                kind: "pool",
                id: pool_id.to_string(),
            })
    }

    /// Execute a request against a pool
    pub async fn execute(
        &self,
        pool_id: &str,
        request: &BackendRequest,
    ) -> DispatchResult<BackendResponse> {
        self.pool(pool_id)?.execute(request).await
    }

    /// Execute a streaming request against a pool
    pub async fn execute_streaming(
        &self,
        pool_id: &str,
        request: &BackendRequest,
    ) -> DispatchResult<(String, mpsc::Receiver<StreamChunk>)> {
        self.pool(pool_id)?.execute_streaming(request).await
    }

    /// Snapshots of every pool
    #[must_use]
    pub fn snapshots(&self) -> Vec<PoolSnapshot> {
        self.pools
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect()
    }

    /// Start background work: limiter tick loops and per-pool health checks
    ///
    /// Idempotent; a second call while running is a no-op. Pools registered
    /// after this point get their loops from [`PoolManager::add_pool`].
    pub fn start(&self) {
        let mut shutdown_slot = self.shutdown_tx.lock();
        if shutdown_slot.is_some() {
            return;
        }
        let (tx, rx) = watch::channel(false);
        *shutdown_slot = Some(tx);
        drop(shutdown_slot);

        for entry in self.pools.iter() {
            self.launch_pool(Arc::clone(entry.value()), rx.clone());
        }
    }

    /// Start one pool's limiters and health-check loop
    fn launch_pool(&self, pool: Arc<ProviderPool>, mut shutdown: watch::Receiver<bool>) {
        for limiter in pool.limiters() {
            limiter.start();
        }
        self.tasks.lock().push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(pool.health_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so startup state
            // comes from config, not an instant probe.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => pool.run_health_checks().await,
                    _ = shutdown.changed() => break,
                }
            }
        }));
    }

    /// Stop background work and shut down adapters
    pub async fn stop(&self) {
        let tx = self.shutdown_tx.lock().take();
        if let Some(tx) = tx {
            let _ = tx.send(true);
        }
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        for entry in self.pools.iter() {
            for limiter in entry.value().limiters() {
                limiter.stop().await;
            }
            for adapter in entry.value().adapters() {
                if let Err(err) = adapter.shutdown().await {
                    tracing::warn!(backend = %adapter.id(), error = %err, "adapter shutdown failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockAdapter;
    use crate::config::{CircuitSettings, MemberConfig};
    use crate::pool::circuit::CircuitState;

    fn pool_config(pool_id: &str, backends: &[&str]) -> PoolConfig {
        PoolConfig {
            pool_id: pool_id.to_string(),
            strategy: StrategyKind::RoundRobin,
            circuit: CircuitSettings {
                failure_threshold: 3,
                success_threshold: 1,
            },
            health_check_interval_secs: 3600,
            members: backends
                .iter()
                .map(|id| MemberConfig {
                    backend_id: (*id).to_string(),
                    weight: 1,
                    priority: 0,
                    rate_limit: RateLimitSettings::default(),
                })
                .collect(),
        }
    }

    async fn manager_with(
        pool_id: &str,
        backends: &[&str],
    ) -> (PoolManager, Vec<Arc<MockAdapter>>) {
        let manager = PoolManager::new(EventBus::default());
        let mocks: Vec<Arc<MockAdapter>> = backends
            .iter()
            .map(|id| Arc::new(MockAdapter::new(*id)))
            .collect();
        let adapters: HashMap<String, Arc<dyn BackendAdapter>> = backends
            .iter()
            .zip(mocks.iter())
            .map(|(id, mock)| ((*id).to_string(), Arc::clone(mock) as Arc<dyn BackendAdapter>))
            .collect();
        manager
            .add_pool(&pool_config(pool_id, backends), adapters)
            .await
            .expect("add pool");
        (manager, mocks)
    }

    #[tokio::test]
    async fn test_round_robin_across_pool() {
        let (manager, mocks) = manager_with("p", &["a", "b", "c"]).await;
        let request = BackendRequest::new("m", "hi");

        for _ in 0..9 {
            manager.execute("p", &request).await.expect("execute");
        }
        for mock in &mocks {
            assert_eq!(mock.served(), 3);
        }
    }

    #[tokio::test]
    async fn test_failover_to_next_member() {
        let (manager, mocks) = manager_with("p", &["a", "b"]).await;
        mocks[0].fail_next(1);

        let response = manager
            .execute("p", &BackendRequest::new("m", "hi"))
            .await
            .expect("failover succeeds");
        assert_eq!(response.content, "echo: hi");
        assert_eq!(mocks[1].served(), 1);
    }

    #[tokio::test]
    async fn test_breaker_opens_and_member_is_skipped() {
        let (manager, mocks) = manager_with("p", &["a", "b"]).await;
        // Down, not scripted: "a" fails whenever tried.
        mocks[0].set_down(true);

        // Three requests: round-robin tries "a" (fails, breaker counts),
        // fails over to "b" each time. After the 3rd failure the circuit
        // for "a" is open.
        for _ in 0..3 {
            manager
                .execute("p", &BackendRequest::new("m", "x"))
                .await
                .expect("b absorbs traffic");
        }
        let snapshot = manager.pool("p").expect("pool").snapshot();
        let a = snapshot
            .members
            .iter()
            .find(|m| m.backend_id == "a")
            .expect("member a");
        assert_eq!(a.circuit_state, CircuitState::Open);

        // Fourth request must go straight to "b" without touching "a".
        let before = mocks[1].served();
        manager
            .execute("p", &BackendRequest::new("m", "x"))
            .await
            .expect("open member skipped");
        assert_eq!(mocks[1].served(), before + 1);
    }

    #[tokio::test]
    async fn test_all_members_down_is_circuit_open_error() {
        let (manager, mocks) = manager_with("p", &["a"]).await;
        mocks[0].set_down(true);

        // Trip the breaker.
        for _ in 0..3 {
            let _ = manager.execute("p", &BackendRequest::new("m", "x")).await;
        }
        let err = manager
            .execute("p", &BackendRequest::new("m", "x"))
            .await
            .expect_err("no members left");
        assert!(matches!(err, DispatchError::CircuitOpen { .. }));
    }

    #[tokio::test]
    async fn test_exhausted_failover_reports_attempts() {
        let (manager, mocks) = manager_with("p", &["a", "b"]).await;
        mocks[0].fail_next(1);
        mocks[1].fail_next(1);

        let err = manager
            .execute("p", &BackendRequest::new("m", "x"))
            .await
            .expect_err("both fail");
        match err {
            DispatchError::BackendExecution { attempts, .. } => {
                assert_eq!(attempts.len(), 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_health_check_recovers_open_circuit() {
        let (manager, mocks) = manager_with("p", &["a", "b"]).await;
        mocks[0].set_down(true);
        for _ in 0..3 {
            let _ = manager.execute("p", &BackendRequest::new("m", "x")).await;
        }
        let pool = manager.pool("p").expect("pool");
        assert_eq!(
            pool.snapshot().members[0].circuit_state,
            CircuitState::Open
        );

        // Backend comes back; a health pass moves the circuit to half-open.
        mocks[0].set_down(false);
        pool.run_health_checks().await;
        assert_eq!(
            pool.snapshot().members[0].circuit_state,
            CircuitState::HalfOpen
        );

        // A successful request through "a" closes it. Force selection of
        // "a" by excluding traffic order: round-robin will reach it.
        let mut closed = false;
        for _ in 0..2 {
            manager
                .execute("p", &BackendRequest::new("m", "x"))
                .await
                .expect("execute");
            if pool.snapshot().members[0].circuit_state == CircuitState::Closed {
                closed = true;
                break;
            }
        }
        assert!(closed, "half-open member should close after a success");
    }

    #[tokio::test]
    async fn test_health_check_flips_health_flag() {
        let (manager, mocks) = manager_with("p", &["a"]).await;
        let pool = manager.pool("p").expect("pool");

        mocks[0].set_down(true);
        pool.run_health_checks().await;
        assert!(!pool.snapshot().members[0].healthy);

        mocks[0].set_down(false);
        pool.run_health_checks().await;
        assert!(pool.snapshot().members[0].healthy);
    }

    #[tokio::test]
    async fn test_missing_adapter_rejected() {
        let manager = PoolManager::new(EventBus::default());
        let err = manager
            .add_pool(&pool_config("p", &["a"]), HashMap::new())
            .await
            .expect_err("no adapter");
        assert!(matches!(err, DispatchError::Validation(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_added_while_running_gets_background_loops() {
        let manager = PoolManager::new(EventBus::default());
        manager.start();

        let mock = Arc::new(MockAdapter::new("a"));
        let adapters: HashMap<String, Arc<dyn BackendAdapter>> = HashMap::from([(
            "a".to_string(),
            Arc::clone(&mock) as Arc<dyn BackendAdapter>,
        )]);
        let mut config = pool_config("p", &["a"]);
        config.health_check_interval_secs = 1;
        config.members[0].rate_limit = RateLimitSettings {
            requests_per_second: 1,
            tokens_per_second: 10_000,
            burst: 1,
            queue_timeout_ms: 30_000,
            saturation_depth: 64,
        };
        manager.add_pool(&config, adapters).await.expect("add pool");

        // Burst is one request; only a running tick loop can admit the
        // second call before the queue timeout.
        let request = BackendRequest::new("m", "x");
        manager.execute("p", &request).await.expect("burst");
        manager
            .execute("p", &request)
            .await
            .expect("tick loop releases the queued admission");

        // The health loop is live too.
        mock.set_down(true);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!manager.pool("p").expect("pool").snapshot().members[0].healthy);

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_circuit_events_emitted() {
        let (manager, mocks) = manager_with("p", &["a", "b"]).await;
        let mut rx = manager.events.subscribe();
        mocks[0].set_down(true);

        for _ in 0..3 {
            let _ = manager.execute("p", &BackendRequest::new("m", "x")).await;
        }

        let mut opened = false;
        while let Ok(event) = rx.try_recv() {
            if let EventKind::CircuitStateChanged { to, backend_id, .. } = event.kind {
                if to == CircuitState::Open && backend_id == "a" {
                    opened = true;
                }
            }
        }
        assert!(opened, "expected a circuit-opened event");
    }
}
