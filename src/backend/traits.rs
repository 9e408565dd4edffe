//! Backend Adapter Contract
//!
//! Trait definition for concrete backend-service adapters. The dispatch core
//! treats every backend instance uniformly through this contract: lifecycle
//! (`initialize`/`shutdown`), liveness (`health_check`), execution
//! (`execute`/`execute_streaming`) and feature discovery (`capabilities`).
//!
//! Adapters own all provider-specific detail: wire format, authentication,
//! endpoint discovery. None of that leaks into the core.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Feature a backend model may support
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Chat/completion generation
    Chat,
    /// Incremental token streaming
    Streaming,
    /// Tool / function calling
    Tools,
    /// Image inputs
    Vision,
    /// Embedding generation
    Embeddings,
    /// Structured JSON output mode
    JsonMode,
}

/// A request handed to a backend adapter
#[derive(Clone, Debug)]
pub struct BackendRequest {
    /// Unique request identifier
    pub request_id: String,
    /// Model to invoke (backend-specific identifier)
    pub model: String,
    /// The input payload (prompt or serialized messages)
    pub input: String,
    /// Estimated token consumption, used for rate-limit admission
    pub estimated_tokens: u64,
}

impl BackendRequest {
    /// Create a new request for a model
    pub fn new(model: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            model: model.into(),
            input: input.into(),
            estimated_tokens: 0,
        }
    }

    /// Set the estimated token consumption
    #[must_use]
    pub fn with_estimated_tokens(mut self, tokens: u64) -> Self {
        self.estimated_tokens = tokens;
        self
    }
}

/// Response from a completed backend call
#[derive(Clone, Debug)]
pub struct BackendResponse {
    /// The response content
    pub content: String,
    /// Model that produced the response
    pub model: String,
    /// Tokens consumed, if the backend reports it
    pub tokens_used: Option<u64>,
    /// Backend-measured generation time in milliseconds
    pub duration_ms: Option<u64>,
}

/// Incremental output from a streaming backend call
#[derive(Clone, Debug)]
pub enum StreamChunk {
    /// A fragment of the response
    Delta(String),
    /// The stream finished; carries the assembled response
    Done(BackendResponse),
    /// The stream failed mid-flight
    Error(String),
}

/// Errors produced by adapter implementations
#[derive(Clone, Debug, Error)]
pub enum AdapterError {
    /// The backend refused or could not serve the request
    #[error("backend request failed: {0}")]
    RequestFailed(String),

    /// The backend did not answer within the adapter's deadline
    #[error("backend timed out after {0} ms")]
    Timeout(u64),

    /// The adapter has not been initialized or was shut down
    #[error("adapter not ready: {0}")]
    NotReady(String),
}

/// Uniform contract for concrete backend-service adapters
///
/// Implementations must be cheap to share (`Arc<dyn BackendAdapter>`); the
/// pool manager holds one instance per pool member.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Stable identifier of this backend instance
    fn id(&self) -> &str;

    /// Prepare the adapter for traffic (open clients, verify credentials)
    async fn initialize(&self) -> Result<(), AdapterError>;

    /// Release adapter resources; no calls may follow
    async fn shutdown(&self) -> Result<(), AdapterError>;

    /// Probe backend liveness; used by circuit-breaker recovery
    async fn health_check(&self) -> bool;

    /// Execute a request and wait for the complete response
    async fn execute(&self, request: &BackendRequest) -> Result<BackendResponse, AdapterError>;

    /// Execute a request, streaming output chunks as they arrive
    ///
    /// Returns a channel receiver; the channel closes after a
    /// [`StreamChunk::Done`] or [`StreamChunk::Error`] is delivered.
    async fn execute_streaming(
        &self,
        request: &BackendRequest,
    ) -> Result<mpsc::Receiver<StreamChunk>, AdapterError>;

    /// Features this backend supports
    fn capabilities(&self) -> Vec<Capability>;
}
