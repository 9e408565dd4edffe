//! Mock Backend Adapter
//!
//! A scriptable in-process adapter used by the integration tests and for
//! running the dispatch core headless. Supports fixed response latency,
//! failure injection (fail the next N requests, or fail permanently until
//! healed) and configurable capabilities.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::traits::{
    AdapterError, BackendAdapter, BackendRequest, BackendResponse, Capability, StreamChunk,
};

/// Scriptable mock backend
pub struct MockAdapter {
    id: String,
    latency: Duration,
    capabilities: Vec<Capability>,
    /// Fail the next N execute calls, then recover
    fail_next: AtomicU64,
    /// When set, every call (and health check) fails until cleared
    down: AtomicBool,
    /// Requests served successfully
    served: AtomicU64,
    /// Canned response content, if any
    canned: Mutex<Option<String>>,
}

impl MockAdapter {
    /// Create a mock backend with zero latency and chat+streaming support
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            latency: Duration::ZERO,
            capabilities: vec![Capability::Chat, Capability::Streaming],
            fail_next: AtomicU64::new(0),
            down: AtomicBool::new(false),
            served: AtomicU64::new(0),
            canned: Mutex::new(None),
        }
    }

    /// Set the simulated per-request latency
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Set the advertised capabilities
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Vec<Capability>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Script the next `n` execute calls to fail
    pub fn fail_next(&self, n: u64) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Take the backend down entirely (health checks fail too)
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Set a canned response returned for every request
    pub fn set_response(&self, content: impl Into<String>) {
        *self.canned.lock() = Some(content.into());
    }

    /// How many requests this mock served successfully
    pub fn served(&self) -> u64 {
        self.served.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        if self.down.load(Ordering::SeqCst) {
            return true;
        }
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn respond(&self, request: &BackendRequest) -> BackendResponse {
        let content = self
            .canned
            .lock()
            .clone()
            .unwrap_or_else(|| format!("echo: {}", request.input));
        BackendResponse {
            content,
            model: request.model.clone(),
            tokens_used: Some(request.estimated_tokens.max(1)),
            duration_ms: Some(self.latency.as_millis() as u64),
        }
    }
}

#[async_trait]
impl BackendAdapter for MockAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn initialize(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn health_check(&self) -> bool {
        !self.down.load(Ordering::SeqCst)
    }

    async fn execute(&self, request: &BackendRequest) -> Result<BackendResponse, AdapterError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.take_failure() {
            return Err(AdapterError::RequestFailed(format!(
                "{} scripted failure",
                self.id
            )));
        }
        self.served.fetch_add(1, Ordering::SeqCst);
        Ok(self.respond(request))
    }

    async fn execute_streaming(
        &self,
        request: &BackendRequest,
    ) -> Result<mpsc::Receiver<StreamChunk>, AdapterError> {
        if self.take_failure() {
            return Err(AdapterError::RequestFailed(format!(
                "{} scripted failure",
                self.id
            )));
        }
        let response = self.respond(request);
        self.served.fetch_add(1, Ordering::SeqCst);
        let latency = self.latency;

        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            // One delta per whitespace-separated word, then the full response.
            for word in response.content.split_whitespace() {
                if tx.send(StreamChunk::Delta(word.to_string())).await.is_err() {
                    return;
                }
            }
            let _ = tx.send(StreamChunk::Done(response)).await;
        });
        Ok(rx)
    }

    fn capabilities(&self) -> Vec<Capability> {
        self.capabilities.clone()
    }
}
