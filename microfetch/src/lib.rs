//! microfetch - Request deduplication, caching, and microbatching over HTTP
//!
//! This library sits between call sites and an HTTP transport: overlapping
//! requests for the same cache key collapse into a single network call,
//! results are cached per fetch policy, bursts of requests issued within a
//! few milliseconds are flushed as one batch, and cross-cutting concerns
//! attach as ordered pre-send and post-receive hook pipelines.
//!
//! # High-Level API
//!
//! Most applications construct one [`Coordinator`] and issue requests
//! through it:
//!
//! ```ignore
//! use microfetch::{Coordinator, FetchOptions, ReqwestTransport};
//! use std::sync::Arc;
//!
//! let coordinator = Coordinator::new(Arc::new(ReqwestTransport::new()?));
//! let response = coordinator
//!     .fetch("https://api.example.com/users", FetchOptions::default())
//!     .await?;
//! ```
//!
//! The free functions at the crate root ([`request`], [`fetch`],
//! [`register_endpoint`], [`ext_pre`], [`ext_post`]) operate on the
//! process-wide default coordinator for call sites that do not want to
//! thread an instance around.

pub mod coordinator;
pub mod endpoint;
pub mod error;
pub mod executor;
pub mod hooks;
pub mod request;
pub mod response;
pub mod scheduler;
pub mod transport;

pub use coordinator::{Coordinator, CoordinatorStats, Target};
pub use endpoint::Endpoint;
pub use error::FetchError;
pub use executor::{Event, ExecutorHandle, ExecutorState, Subscription};
pub use hooks::{post_hook, pre_hook, PostHook, PreHook, Validate, Validator};
pub use request::{CacheKey, FetchOptions, FetchPolicy, RequestBody, RequestOptions};
pub use response::{Response, ResponseBody};
pub use transport::{ReqwestTransport, Transport};

use std::sync::Arc;

/// Version of the microfetch library and CLI.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Issues a request on the default coordinator.
///
/// See [`Coordinator::request`].
pub fn request(
    target: impl Into<Target>,
    options: FetchOptions,
) -> Result<ExecutorHandle, FetchError> {
    Coordinator::global().request(target, options)
}

/// Issues a request on the default coordinator and awaits the first
/// delivery.
///
/// See [`Coordinator::fetch`].
pub async fn fetch(
    target: impl Into<Target>,
    options: FetchOptions,
) -> Result<Arc<Response>, Arc<FetchError>> {
    Coordinator::global().fetch(target, options).await
}

/// Registers an endpoint on the default coordinator.
pub fn register_endpoint(name: impl Into<String>, endpoint: Endpoint) {
    Coordinator::global().register_endpoint(name, endpoint);
}

/// Registers a global pre-send hook on the default coordinator.
pub fn ext_pre(hook: PreHook) {
    Coordinator::global().ext_pre(hook);
}

/// Registers a global post-receive hook on the default coordinator.
pub fn ext_post(hook: PostHook) {
    Coordinator::global().ext_post(hook);
}
