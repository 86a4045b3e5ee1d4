//! Hook pipeline: ordered pre-send and post-receive transformation chains.
//!
//! Every dispatch is wrapped by two chains with a fixed stage order:
//!
//! - pre-send: built-in body validator, then global hooks in registration
//!   order, then the per-call hook;
//! - post-receive: global hooks in registration order, then the per-call
//!   hook, then the built-in response validator.
//!
//! Built-in validation sees the caller's original intent before any global
//! mutation on the way out, and the fully-processed response last on the
//! way in, so validation reflects the value actually delivered to data
//! subscribers. The stage order is structural ([`PrePipeline`] and
//! [`PostPipeline`] hold each stage in its own field) rather than an
//! artifact of list concatenation.

use crate::error::FetchError;
use crate::request::{RequestBody, RequestOptions};
use crate::response::{Response, ResponseBody};
use futures::future::BoxFuture;
use std::sync::{Arc, RwLock};

/// A pre-send hook: transforms outgoing request options or fails, which
/// aborts the dispatch before any transport call.
pub type PreHook =
    Arc<dyn Fn(RequestOptions) -> BoxFuture<'static, Result<RequestOptions, FetchError>> + Send + Sync>;

/// A post-receive hook: transforms an incoming response or fails, which
/// turns the dispatch outcome into an error.
pub type PostHook =
    Arc<dyn Fn(Response) -> BoxFuture<'static, Result<Response, FetchError>> + Send + Sync>;

/// A built-in validator over a JSON value. Returns the (possibly coerced)
/// replacement value, or a rejection message passed through verbatim.
pub type Validator =
    Arc<dyn Fn(&serde_json::Value) -> Result<serde_json::Value, String> + Send + Sync>;

/// Wraps a synchronous transform as a [`PreHook`].
pub fn pre_hook<F>(f: F) -> PreHook
where
    F: Fn(RequestOptions) -> Result<RequestOptions, FetchError> + Send + Sync + 'static,
{
    Arc::new(move |options| {
        let result = f(options);
        Box::pin(async move { result })
    })
}

/// Wraps a synchronous transform as a [`PostHook`].
pub fn post_hook<F>(f: F) -> PostHook
where
    F: Fn(Response) -> Result<Response, FetchError> + Send + Sync + 'static,
{
    Arc::new(move |response| {
        let result = f(response);
        Box::pin(async move { result })
    })
}

/// Built-in validators attached to a call or an endpoint.
///
/// `body` runs against JSON request bodies before any other pre-send
/// stage; `response` runs against JSON response bodies after every other
/// post-receive stage.
#[derive(Clone, Default)]
pub struct Validate {
    /// Validator for the outgoing JSON body.
    pub body: Option<Validator>,
    /// Validator for the incoming JSON response body.
    pub response: Option<Validator>,
}

impl Validate {
    /// Sets the body validator.
    pub fn body<F>(mut self, f: F) -> Self
    where
        F: Fn(&serde_json::Value) -> Result<serde_json::Value, String> + Send + Sync + 'static,
    {
        self.body = Some(Arc::new(f));
        self
    }

    /// Sets the response validator.
    pub fn response<F>(mut self, f: F) -> Self
    where
        F: Fn(&serde_json::Value) -> Result<serde_json::Value, String> + Send + Sync + 'static,
    {
        self.response = Some(Arc::new(f));
        self
    }

    /// Returns true if no validator is set.
    pub fn is_empty(&self) -> bool {
        self.body.is_none() && self.response.is_none()
    }
}

/// Global hook lists owned by a coordinator.
///
/// Hooks are appended in registration order and snapshotted once per
/// dispatch, so lists are read-only while a pipeline runs.
#[derive(Default)]
pub(crate) struct HookRegistry {
    pre: RwLock<Vec<PreHook>>,
    post: RwLock<Vec<PostHook>>,
}

impl HookRegistry {
    /// Appends a global pre-send hook.
    pub(crate) fn add_pre(&self, hook: PreHook) {
        self.pre.write().unwrap().push(hook);
    }

    /// Appends a global post-receive hook.
    pub(crate) fn add_post(&self, hook: PostHook) {
        self.post.write().unwrap().push(hook);
    }

    /// Snapshots the global pre-send hooks in registration order.
    pub(crate) fn pre_snapshot(&self) -> Vec<PreHook> {
        self.pre.read().unwrap().clone()
    }

    /// Snapshots the global post-receive hooks in registration order.
    pub(crate) fn post_snapshot(&self) -> Vec<PostHook> {
        self.post.read().unwrap().clone()
    }
}

/// The pre-send chain composed for one dispatch.
pub(crate) struct PrePipeline {
    validate: Option<Validator>,
    global: Vec<PreHook>,
    per_call: Option<PreHook>,
}

impl PrePipeline {
    pub(crate) fn new(
        validate: Option<Validator>,
        global: Vec<PreHook>,
        per_call: Option<PreHook>,
    ) -> Self {
        Self {
            validate,
            global,
            per_call,
        }
    }

    /// Runs the chain in stage order: built-in validator, global hooks,
    /// per-call hook.
    pub(crate) async fn run(&self, mut options: RequestOptions) -> Result<RequestOptions, FetchError> {
        if let Some(validator) = &self.validate {
            if let RequestBody::Json(body) = &options.body {
                match validator(body) {
                    Ok(coerced) => options.body = RequestBody::Json(coerced),
                    Err(message) => {
                        return Err(FetchError::Validation {
                            message,
                            response: None,
                        })
                    }
                }
            }
        }
        for hook in &self.global {
            options = hook(options).await?;
        }
        if let Some(hook) = &self.per_call {
            options = hook(options).await?;
        }
        Ok(options)
    }
}

/// The post-receive chain composed for one dispatch.
pub(crate) struct PostPipeline {
    global: Vec<PostHook>,
    per_call: Option<PostHook>,
    validate: Option<Validator>,
}

impl PostPipeline {
    pub(crate) fn new(
        global: Vec<PostHook>,
        per_call: Option<PostHook>,
        validate: Option<Validator>,
    ) -> Self {
        Self {
            global,
            per_call,
            validate,
        }
    }

    /// Runs the chain in stage order: global hooks, per-call hook,
    /// built-in validator. A validator rejection carries the response
    /// that failed validation.
    pub(crate) async fn run(&self, mut response: Response) -> Result<Response, FetchError> {
        for hook in &self.global {
            response = hook(response).await?;
        }
        if let Some(hook) = &self.per_call {
            response = hook(response).await?;
        }
        if let Some(validator) = &self.validate {
            if let ResponseBody::Json(body) = &response.body {
                match validator(body) {
                    Ok(coerced) => response.body = ResponseBody::Json(coerced),
                    Err(message) => {
                        return Err(FetchError::Validation {
                            message,
                            response: Some(Box::new(response)),
                        })
                    }
                }
            }
        }
        Ok(response)
    }
}
