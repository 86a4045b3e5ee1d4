//! Per-cache-key request executor.
//!
//! A [`RequestExecutor`] owns the lifecycle of one logical cached
//! request: the cached response/error, the subscriber channels, and a
//! dispatch closure that runs the hook pipeline around one transport
//! call. The state guard in [`RequestExecutor::send`] guarantees at most
//! one in-flight transport call per executor; a per-executor generation
//! counter stamped at send time discards completions that lost a race
//! with a newer send.

use crate::error::FetchError;
use crate::request::{CacheKey, FetchPolicy};
use crate::response::Response;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;
use tracing::debug;

/// Shared handle to a request executor.
///
/// Clones refer to the same underlying executor; the coordinator's
/// registry holds one for every non-network-only cache key.
pub type ExecutorHandle = Arc<RequestExecutor>;

/// Dispatch closure: one run of the hook pipeline around one transport
/// call, built by the coordinator and owned by the executor.
pub(crate) type Dispatch =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Response, FetchError>> + Send + Sync>;

type RefetchFn = Arc<dyn Fn() + Send + Sync>;

/// Executor lifecycle state.
///
/// There is no terminal state: after every settle, success or failure,
/// the executor returns to `Idle` and is ready to be sent again.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExecutorState {
    /// No transport call outstanding.
    #[default]
    Idle,
    /// A transport call is outstanding.
    Running,
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Running => write!(f, "Running"),
        }
    }
}

/// The closed set of executor event kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// A dispatch is starting (no payload).
    Request,
    /// A dispatch settled successfully with a response.
    Data,
    /// A dispatch settled with an error.
    Error,
}

/// Token identifying one subscription, used for removal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Subscription {
    event: Event,
    id: u64,
}

impl Subscription {
    /// Returns the event kind this subscription listens on.
    pub fn event(&self) -> Event {
        self.event
    }
}

type RequestCallback = dyn Fn() + Send + Sync;
type DataCallback = dyn Fn(&Arc<Response>) + Send + Sync;
type ErrorCallback = dyn Fn(&Arc<FetchError>) + Send + Sync;

struct Listener<F: ?Sized> {
    id: u64,
    once: bool,
    callback: Arc<F>,
}

#[derive(Default)]
struct Channels {
    request: Mutex<Vec<Listener<RequestCallback>>>,
    data: Mutex<Vec<Listener<DataCallback>>>,
    error: Mutex<Vec<Listener<ErrorCallback>>>,
    next_id: AtomicU64,
}

fn subscribe<F: ?Sized>(
    list: &Mutex<Vec<Listener<F>>>,
    next_id: &AtomicU64,
    event: Event,
    once: bool,
    callback: Arc<F>,
) -> Subscription {
    let id = next_id.fetch_add(1, Ordering::Relaxed) + 1;
    list.lock().unwrap().push(Listener { id, once, callback });
    Subscription { event, id }
}

fn unsubscribe<F: ?Sized>(list: &Mutex<Vec<Listener<F>>>, id: u64) -> bool {
    let mut list = list.lock().unwrap();
    let before = list.len();
    list.retain(|listener| listener.id != id);
    list.len() != before
}

/// Invokes every listener in registration order, removing `once`
/// listeners before the callbacks run. The lock is not held during
/// invocation so callbacks may subscribe or issue new requests.
fn notify<F: ?Sized>(list: &Mutex<Vec<Listener<F>>>, invoke: impl Fn(&F)) {
    let snapshot: Vec<Arc<F>> = {
        let mut list = list.lock().unwrap();
        let snapshot = list
            .iter()
            .map(|listener| Arc::clone(&listener.callback))
            .collect();
        list.retain(|listener| !listener.once);
        snapshot
    };
    for callback in snapshot {
        invoke(&callback);
    }
}

#[derive(Default)]
struct CachedState {
    response: Option<Arc<Response>>,
    error: Option<Arc<FetchError>>,
    last_success: Option<Instant>,
}

/// Per-cache-key state machine owning one logical cached request.
pub struct RequestExecutor {
    key: CacheKey,
    fetch_policy: FetchPolicy,
    state: Mutex<ExecutorState>,
    generation: AtomicU64,
    cached: Mutex<CachedState>,
    channels: Channels,
    dispatch: Dispatch,
    refetch: OnceLock<RefetchFn>,
}

impl RequestExecutor {
    pub(crate) fn new(key: CacheKey, fetch_policy: FetchPolicy, dispatch: Dispatch) -> ExecutorHandle {
        Arc::new(Self {
            key,
            fetch_policy,
            state: Mutex::new(ExecutorState::Idle),
            generation: AtomicU64::new(0),
            cached: Mutex::new(CachedState::default()),
            channels: Channels::default(),
            dispatch,
            refetch: OnceLock::new(),
        })
    }

    /// Wires the coordinator's re-enqueue closure. Set once, right after
    /// construction.
    pub(crate) fn set_refetch(&self, refetch: RefetchFn) {
        let _ = self.refetch.set(refetch);
    }

    /// Returns this executor's cache key.
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Returns the fetch policy this executor was created under.
    pub fn fetch_policy(&self) -> FetchPolicy {
        self.fetch_policy
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> ExecutorState {
        *self.state.lock().unwrap()
    }

    /// Returns the cached response, if a dispatch has succeeded.
    pub fn cached_response(&self) -> Option<Arc<Response>> {
        self.cached.lock().unwrap().response.clone()
    }

    /// Returns the error from the most recent failed dispatch, if any.
    pub fn cached_error(&self) -> Option<Arc<FetchError>> {
        self.cached.lock().unwrap().error.clone()
    }

    /// Returns when the last successful dispatch settled.
    pub fn last_success_at(&self) -> Option<Instant> {
        self.cached.lock().unwrap().last_success
    }

    pub(crate) fn has_response(&self) -> bool {
        self.cached.lock().unwrap().response.is_some()
    }

    /// Subscribes to dispatch starts.
    pub fn on_request<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        subscribe(
            &self.channels.request,
            &self.channels.next_id,
            Event::Request,
            false,
            Arc::new(callback),
        )
    }

    /// Subscribes to successful dispatches, in registration order.
    ///
    /// If a cached response already exists and the policy is not
    /// network-only, the callback is invoked synchronously with the
    /// cached value before being registered for future deliveries, so a
    /// late subscriber observes a value that already satisfied the cache
    /// policy without waiting for a network round trip.
    pub fn on_data<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Arc<Response>) + Send + Sync + 'static,
    {
        self.replay_cached_response(&callback);
        subscribe(
            &self.channels.data,
            &self.channels.next_id,
            Event::Data,
            false,
            Arc::new(callback),
        )
    }

    /// Subscribes to the next successful dispatch only.
    ///
    /// If a cached response is replayed, the delivery already happened
    /// and the returned subscription is spent.
    pub fn once_data<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Arc<Response>) + Send + Sync + 'static,
    {
        if self.replay_cached_response(&callback) {
            return Subscription {
                event: Event::Data,
                id: self.channels.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            };
        }
        subscribe(
            &self.channels.data,
            &self.channels.next_id,
            Event::Data,
            true,
            Arc::new(callback),
        )
    }

    /// Subscribes to failed dispatches, in registration order.
    ///
    /// Cache-only executors replay a recorded cache miss to late
    /// subscribers, so the miss is observable without a dispatch.
    pub fn on_error<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Arc<FetchError>) + Send + Sync + 'static,
    {
        self.replay_cached_error(&callback);
        subscribe(
            &self.channels.error,
            &self.channels.next_id,
            Event::Error,
            false,
            Arc::new(callback),
        )
    }

    /// Subscribes to the next failed dispatch only.
    pub fn once_error<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Arc<FetchError>) + Send + Sync + 'static,
    {
        if self.replay_cached_error(&callback) {
            return Subscription {
                event: Event::Error,
                id: self.channels.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            };
        }
        subscribe(
            &self.channels.error,
            &self.channels.next_id,
            Event::Error,
            true,
            Arc::new(callback),
        )
    }

    /// Removes a subscription. Returns false if it was already removed
    /// (or spent, for `once` subscriptions).
    pub fn off(&self, subscription: Subscription) -> bool {
        match subscription.event {
            Event::Request => unsubscribe(&self.channels.request, subscription.id),
            Event::Data => unsubscribe(&self.channels.data, subscription.id),
            Event::Error => unsubscribe(&self.channels.error, subscription.id),
        }
    }

    /// Re-enqueues this executor into the coordinator's dispatch queue,
    /// regardless of cached state or policy.
    ///
    /// A refetch issued while a dispatch is still running is dropped by
    /// the state guard when the flush reaches it.
    pub fn refetch(&self) {
        if let Some(refetch) = self.refetch.get() {
            refetch();
        }
    }

    fn replay_cached_response(&self, callback: &impl Fn(&Arc<Response>)) -> bool {
        if self.fetch_policy == FetchPolicy::NetworkOnly {
            return false;
        }
        match self.cached.lock().unwrap().response.clone() {
            Some(response) => {
                callback(&response);
                true
            }
            None => false,
        }
    }

    fn replay_cached_error(&self, callback: &impl Fn(&Arc<FetchError>)) -> bool {
        if self.fetch_policy != FetchPolicy::CacheOnly {
            return false;
        }
        match self.cached.lock().unwrap().error.clone() {
            Some(error) => {
                callback(&error);
                true
            }
            None => false,
        }
    }

    /// Starts one dispatch. No-op unless the executor is idle, which
    /// guarantees at most one in-flight transport call per cache key.
    pub(crate) fn send(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().unwrap();
            if *state != ExecutorState::Idle {
                debug!(key = %self.key, "send skipped, dispatch already running");
                return;
            }
            *state = ExecutorState::Running;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        notify(&self.channels.request, |callback| callback());
        self.cached.lock().unwrap().error = None;
        debug!(key = %self.key, generation, "dispatching request");

        let dispatch = Arc::clone(&self.dispatch);
        let executor = Arc::clone(self);
        tokio::spawn(async move {
            let result = dispatch().await;
            executor.complete(generation, result);
        });
    }

    /// Drops the cached error. Called when a new dispatch is enqueued so
    /// a superseded failure is not replayed to subscribers attached
    /// before the flush runs.
    pub(crate) fn clear_error(&self) {
        self.cached.lock().unwrap().error = None;
    }

    /// Records a cache miss for a cache-only call that found nothing to
    /// serve, delivering it through the error channel.
    pub(crate) fn record_cache_miss(&self) {
        let error = Arc::new(FetchError::CacheMiss {
            key: self.key.clone(),
        });
        self.cached.lock().unwrap().error = Some(Arc::clone(&error));
        notify(&self.channels.error, |callback| callback(&error));
    }

    /// Settles one dispatch. Completions stamped with a stale generation
    /// update nothing and notify nobody.
    fn complete(&self, generation: u64, result: Result<Response, FetchError>) {
        *self.state.lock().unwrap() = ExecutorState::Idle;

        if generation != self.generation.load(Ordering::SeqCst) {
            debug!(key = %self.key, generation, "discarding stale completion");
            return;
        }

        match result {
            Ok(response) => {
                let response = Arc::new(response);
                {
                    let mut cached = self.cached.lock().unwrap();
                    cached.response = Some(Arc::clone(&response));
                    cached.last_success = Some(Instant::now());
                }
                notify(&self.channels.data, |callback| callback(&response));
            }
            Err(error) => {
                let error = Arc::new(error);
                // A failure never clears a previously cached response.
                self.cached.lock().unwrap().error = Some(Arc::clone(&error));
                notify(&self.channels.error, |callback| callback(&error));
            }
        }
    }
}

impl fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("key", &self.key)
            .field("fetch_policy", &self.fetch_policy)
            .field("state", &self.state())
            .field("has_response", &self.has_response())
            .finish()
    }
}
