//! Backend Adapter Boundary
//!
//! The dispatch core never speaks a concrete AI service's wire protocol.
//! Instead, each backend instance is driven through the [`BackendAdapter`]
//! contract; concrete adapters (one per external service) live outside this
//! crate and implement it. The pool manager is the only component that calls
//! adapters directly.
//!
//! [`mock::MockAdapter`] is the in-tree implementation used for tests and
//! headless operation.

pub mod mock;
pub mod traits;

pub use mock::MockAdapter;
pub use traits::{
    AdapterError, BackendAdapter, BackendRequest, BackendResponse, Capability, StreamChunk,
};
