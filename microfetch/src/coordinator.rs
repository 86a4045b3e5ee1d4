//! Request coordination: policy and key resolution, the executor
//! registry, and the microbatched dispatch queue.
//!
//! The coordinator is the public entry point. Each call resolves a
//! method, fetch policy, and cache key, looks up or creates the executor
//! for that key, and decides by policy whether the call enqueues a
//! dispatch. Queued dispatches are flushed in batches a few milliseconds
//! after the last enqueue, with at most one `send()` per cache key per
//! flush.

use crate::endpoint::Endpoint;
use crate::error::FetchError;
use crate::executor::{Dispatch, ExecutorHandle, RequestExecutor};
use crate::hooks::{HookRegistry, PostHook, PostPipeline, PreHook, PrePipeline};
use crate::request::{
    apply_params, merge_query, CacheKey, FetchOptions, FetchPolicy, RequestOptions,
};
use crate::response::Response;
use crate::scheduler::{FlushScheduler, DEFAULT_TICK};
use crate::transport::{ReqwestTransport, Transport};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::debug;

/// What a request is aimed at: a URL directly, or a registered endpoint
/// name whose defaults are merged with the per-call options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A URL, absolute or path-only.
    Url(String),
    /// The name of a registered endpoint.
    Endpoint(String),
}

impl Target {
    /// Targets a registered endpoint by name.
    pub fn endpoint(name: impl Into<String>) -> Self {
        Self::Endpoint(name.into())
    }
}

impl From<&str> for Target {
    fn from(url: &str) -> Self {
        Self::Url(url.to_string())
    }
}

impl From<String> for Target {
    fn from(url: String) -> Self {
        Self::Url(url)
    }
}

struct QueueItem {
    executor: ExecutorHandle,
    enqueued_at: Instant,
}

#[derive(Default)]
struct Counters {
    requests: AtomicU64,
    executor_reuses: AtomicU64,
    flushes: AtomicU64,
    dispatches: AtomicU64,
}

/// Point-in-time snapshot of coordinator activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    /// Calls to `request()` that resolved successfully.
    pub requests: u64,
    /// Calls that found an existing executor for their cache key.
    pub executor_reuses: u64,
    /// Flush passes over the dispatch queue.
    pub flushes: u64,
    /// `send()` calls issued by flushes after per-key dedup.
    pub dispatches: u64,
}

struct CoordinatorInner {
    transport: Arc<dyn Transport>,
    executors: DashMap<CacheKey, ExecutorHandle>,
    endpoints: DashMap<String, Endpoint>,
    hooks: Arc<HookRegistry>,
    queue: Mutex<Vec<QueueItem>>,
    scheduler: FlushScheduler,
    flushing: AtomicBool,
    counters: Counters,
}

/// Deduplicating, caching, microbatching front end over a [`Transport`].
///
/// Cheap to clone; clones share the same registry, queue, and hooks.
/// Applications normally construct one per transport configuration, or
/// use [`Coordinator::global`] for the process-wide default.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

impl Coordinator {
    /// Creates a coordinator over the given transport with the default
    /// flush tick.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_tick(transport, DEFAULT_TICK)
    }

    /// Creates a coordinator with a custom flush tick.
    pub fn with_tick(transport: Arc<dyn Transport>, tick: Duration) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                transport,
                executors: DashMap::new(),
                endpoints: DashMap::new(),
                hooks: Arc::new(HookRegistry::default()),
                queue: Mutex::new(Vec::new()),
                scheduler: FlushScheduler::new(tick),
                flushing: AtomicBool::new(false),
                counters: Counters::default(),
            }),
        }
    }

    /// Returns the process-wide default coordinator, backed by the
    /// production HTTP transport. It is an ordinary instance; nothing
    /// prevents applications from constructing their own alongside it.
    pub fn global() -> &'static Coordinator {
        static INSTANCE: OnceLock<Coordinator> = OnceLock::new();
        INSTANCE.get_or_init(|| Coordinator::new(Arc::new(ReqwestTransport::default())))
    }

    /// Registers an endpoint under a name, replacing any previous
    /// registration.
    pub fn register_endpoint(&self, name: impl Into<String>, endpoint: Endpoint) {
        self.inner.endpoints.insert(name.into(), endpoint);
    }

    /// Registers a batch of endpoints.
    pub fn register_endpoints<I, N>(&self, endpoints: I)
    where
        I: IntoIterator<Item = (N, Endpoint)>,
        N: Into<String>,
    {
        for (name, endpoint) in endpoints {
            self.register_endpoint(name, endpoint);
        }
    }

    /// Registers a global pre-send hook, applied to every dispatch in
    /// registration order, after the built-in body validator and before
    /// the per-call hook.
    pub fn ext_pre(&self, hook: PreHook) {
        self.inner.hooks.add_pre(hook);
    }

    /// Registers a global post-receive hook, applied to every dispatch in
    /// registration order, before the per-call hook and the built-in
    /// response validator.
    pub fn ext_post(&self, hook: PostHook) {
        self.inner.hooks.add_post(hook);
    }

    /// Drops every cached executor. In-flight dispatches settle on their
    /// now-unregistered executors; subsequent requests start fresh.
    pub fn clear(&self) {
        self.inner.executors.clear();
    }

    /// Returns a snapshot of coordinator activity counters.
    pub fn stats(&self) -> CoordinatorStats {
        let counters = &self.inner.counters;
        CoordinatorStats {
            requests: counters.requests.load(Ordering::Relaxed),
            executor_reuses: counters.executor_reuses.load(Ordering::Relaxed),
            flushes: counters.flushes.load(Ordering::Relaxed),
            dispatches: counters.dispatches.load(Ordering::Relaxed),
        }
    }

    /// Issues a request and returns the executor handle for its cache
    /// key. The caller attaches listeners on the handle to observe the
    /// eventual result; any dispatch this call requires is enqueued and
    /// flushed after the batching tick.
    ///
    /// Fails synchronously only on usage errors (unknown or missing
    /// endpoint name); all asynchronous failures go through the handle's
    /// error channel.
    pub fn request(
        &self,
        target: impl Into<Target>,
        options: FetchOptions,
    ) -> Result<ExecutorHandle, FetchError> {
        let (url, options) = self.resolve_target(target.into(), options)?;

        let method = options
            .method
            .as_deref()
            .unwrap_or("GET")
            .to_ascii_uppercase();
        let url = merge_query(&apply_params(&url, &options.params), &options.query);
        let policy = options
            .fetch_policy
            .unwrap_or_else(|| FetchPolicy::default_for_method(&method));
        let key = match &options.key {
            Some(key) => CacheKey::explicit(key.clone()),
            None => CacheKey::derive(&url, &method, policy.is_network_only()),
        };

        self.inner.counters.requests.fetch_add(1, Ordering::Relaxed);

        // Network-only executors are never persisted: each call gets a
        // fresh one, owned solely by the returned handle.
        let executor = if policy.is_network_only() {
            self.build_executor(key, policy, method, url, options)
        } else {
            match self.inner.executors.entry(key.clone()) {
                Entry::Occupied(entry) => {
                    self.inner
                        .counters
                        .executor_reuses
                        .fetch_add(1, Ordering::Relaxed);
                    debug!(key = %key, "reusing executor");
                    Arc::clone(entry.get())
                }
                Entry::Vacant(entry) => {
                    let executor = self.build_executor(key, policy, method, url, options);
                    entry.insert(Arc::clone(&executor));
                    executor
                }
            }
        };

        match policy {
            FetchPolicy::NetworkOnly | FetchPolicy::CacheAndNetwork => {
                self.enqueue(Arc::clone(&executor));
            }
            FetchPolicy::CacheFirst => {
                if !executor.has_response() {
                    self.enqueue(Arc::clone(&executor));
                }
            }
            FetchPolicy::CacheOnly => {
                // Never dispatches. A miss is recorded so error
                // subscribers observe it without a network round trip.
                if !executor.has_response() {
                    executor.record_cache_miss();
                }
            }
        }

        Ok(executor)
    }

    /// Issues a request and resolves with the first data delivery, or
    /// fails with the first error delivery. Cached replays count: under a
    /// cache-serving policy with a warm cache this returns without any
    /// network round trip.
    pub async fn fetch(
        &self,
        target: impl Into<Target>,
        options: FetchOptions,
    ) -> Result<Arc<Response>, Arc<FetchError>> {
        let executor = self.request(target, options).map_err(Arc::new)?;

        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(Mutex::new(Some(tx)));

        let data_tx = Arc::clone(&tx);
        let data_sub = executor.once_data(move |response| {
            if let Some(tx) = data_tx.lock().unwrap().take() {
                let _ = tx.send(Ok(Arc::clone(response)));
            }
        });
        let error_tx = Arc::clone(&tx);
        let error_sub = executor.once_error(move |error| {
            if let Some(tx) = error_tx.lock().unwrap().take() {
                let _ = tx.send(Err(Arc::clone(error)));
            }
        });

        let result = rx.await.map_err(|_| {
            Arc::new(FetchError::Transport(
                "executor dropped before settling".to_string(),
            ))
        })?;

        // Whichever listener lost the race is still registered.
        executor.off(data_sub);
        executor.off(error_sub);
        result
    }

    fn resolve_target(
        &self,
        target: Target,
        options: FetchOptions,
    ) -> Result<(String, FetchOptions), FetchError> {
        match target {
            Target::Url(url) => Ok((url, options)),
            Target::Endpoint(name) => {
                if name.is_empty() {
                    return Err(FetchError::MissingEndpoint);
                }
                let endpoint = self
                    .inner
                    .endpoints
                    .get(&name)
                    .ok_or(FetchError::UnknownEndpoint(name))?;
                Ok((endpoint.url.clone(), endpoint.merge(options)))
            }
        }
    }

    fn build_executor(
        &self,
        key: CacheKey,
        policy: FetchPolicy,
        method: String,
        url: String,
        options: FetchOptions,
    ) -> ExecutorHandle {
        debug!(key = %key, policy = %policy, "creating executor");

        let transport = Arc::clone(&self.inner.transport);
        let hooks = Arc::clone(&self.inner.hooks);
        let base = RequestOptions {
            method,
            headers: options.headers,
            body: options.body,
        };
        let pre = options.pre;
        let post = options.post;
        let validate = options.validate;

        let dispatch: Dispatch = Arc::new(move || {
            let transport = Arc::clone(&transport);
            let hooks = Arc::clone(&hooks);
            let url = url.clone();
            let base = base.clone();
            let pre = pre.clone();
            let post = post.clone();
            let validate = validate.clone();
            Box::pin(async move {
                let pre_pipeline = PrePipeline::new(validate.body, hooks.pre_snapshot(), pre);
                let options = pre_pipeline.run(base).await?;
                let response = transport.send(url, options).await?;
                let post_pipeline =
                    PostPipeline::new(hooks.post_snapshot(), post, validate.response);
                post_pipeline.run(response).await
            })
        });

        let executor = RequestExecutor::new(key, policy, dispatch);

        // Weak on both sides so refetch closures never keep a dropped
        // coordinator or executor alive.
        let inner: Weak<CoordinatorInner> = Arc::downgrade(&self.inner);
        let target: Weak<RequestExecutor> = Arc::downgrade(&executor);
        executor.set_refetch(Arc::new(move || {
            if let (Some(inner), Some(executor)) = (inner.upgrade(), target.upgrade()) {
                Coordinator { inner }.enqueue(executor);
            }
        }));

        executor
    }

    fn enqueue(&self, executor: ExecutorHandle) {
        executor.clear_error();
        self.inner.queue.lock().unwrap().push(QueueItem {
            executor,
            enqueued_at: Instant::now(),
        });
        self.schedule_flush();
    }

    fn schedule_flush(&self) {
        let inner = Arc::downgrade(&self.inner);
        self.inner.scheduler.schedule(move || {
            if let Some(inner) = inner.upgrade() {
                Coordinator { inner }.flush();
            }
        });
    }

    /// Flushes the dispatch queue: one pass over the items enqueued
    /// before the flush began, deduplicated by cache key, sent in queue
    /// order. Items enqueued during the pass are left for the next flush.
    fn flush(&self) {
        if self.inner.flushing.swap(true, Ordering::SeqCst) {
            self.schedule_flush();
            return;
        }

        self.inner.counters.flushes.fetch_add(1, Ordering::Relaxed);
        let cutoff = Instant::now();
        let batch: Vec<QueueItem> = {
            let mut queue = self.inner.queue.lock().unwrap();
            let split = queue
                .iter()
                .position(|item| item.enqueued_at >= cutoff)
                .unwrap_or(queue.len());
            queue.drain(..split).collect()
        };
        debug!(batch = batch.len(), "flushing dispatch queue");

        let mut seen: HashSet<CacheKey> = HashSet::with_capacity(batch.len());
        for item in batch {
            if seen.insert(item.executor.key().clone()) {
                self.inner
                    .counters
                    .dispatches
                    .fetch_add(1, Ordering::Relaxed);
                item.executor.send();
            } else {
                debug!(key = %item.executor.key(), "deduplicated within flush");
            }
        }

        self.inner.flushing.store(false, Ordering::SeqCst);
        if !self.inner.queue.lock().unwrap().is_empty() {
            self.schedule_flush();
        }
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("executors", &self.inner.executors.len())
            .field("endpoints", &self.inner.endpoints.len())
            .field("queued", &self.inner.queue.lock().unwrap().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::ResponseBody;
    use futures::future::BoxFuture;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::sleep;

    struct MockTransport {
        calls: Arc<AtomicUsize>,
    }

    impl MockTransport {
        fn new() -> (Arc<Self>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Arc::new(Self {
                    calls: Arc::clone(&calls),
                }),
                calls,
            )
        }
    }

    impl Transport for MockTransport {
        fn send(
            &self,
            _url: String,
            _options: RequestOptions,
        ) -> BoxFuture<'static, Result<Response, FetchError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                Ok(Response {
                    ok: true,
                    status: 200,
                    status_text: "OK".to_string(),
                    body: ResponseBody::Json(json!({"a": 123})),
                    ..Response::default()
                })
            })
        }
    }

    fn coordinator() -> (Coordinator, Arc<AtomicUsize>) {
        let (transport, calls) = MockTransport::new();
        (Coordinator::new(transport), calls)
    }

    async fn settle() {
        sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_key_requests_share_an_executor() {
        let (coordinator, calls) = coordinator();

        let first = coordinator.request("/users", FetchOptions::default()).unwrap();
        let second = coordinator.request("/users", FetchOptions::default()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.stats().executor_reuses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_only_executors_are_ephemeral() {
        let (coordinator, calls) = coordinator();

        let first = coordinator
            .request(
                "/users",
                FetchOptions::default().policy(FetchPolicy::NetworkOnly),
            )
            .unwrap();
        settle().await;
        let second = coordinator
            .request(
                "/users",
                FetchOptions::default().policy(FetchPolicy::NetworkOnly),
            )
            .unwrap();
        settle().await;

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_first_enqueues_only_until_cached() {
        let (coordinator, calls) = coordinator();

        coordinator.request("/users", FetchOptions::default()).unwrap();
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Warm cache: a later call must not dispatch again.
        coordinator.request("/users", FetchOptions::default()).unwrap();
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_only_never_dispatches() {
        let (coordinator, calls) = coordinator();

        let executor = coordinator
            .request(
                "/users",
                FetchOptions::default().policy(FetchPolicy::CacheOnly),
            )
            .unwrap();
        settle().await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(matches!(
            executor.cached_error().as_deref(),
            Some(FetchError::CacheMiss { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_method_distinguishes_cache_keys() {
        let (coordinator, calls) = coordinator();

        coordinator.request("/users", FetchOptions::default()).unwrap();
        coordinator
            .request(
                "/users",
                FetchOptions::default()
                    .method("POST")
                    .policy(FetchPolicy::CacheFirst),
            )
            .unwrap();
        settle().await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_key_overrides_derivation() {
        let (coordinator, _) = coordinator();

        let first = coordinator
            .request("/users", FetchOptions::default().key("shared"))
            .unwrap();
        let second = coordinator
            .request("/posts", FetchOptions::default().key("shared"))
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.key().as_str(), "shared");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_endpoint_is_a_synchronous_usage_error() {
        let (coordinator, _) = coordinator();

        let error = coordinator
            .request(Target::endpoint("missing"), FetchOptions::default())
            .unwrap_err();
        assert!(matches!(error, FetchError::UnknownEndpoint(_)));

        let error = coordinator
            .request(Target::endpoint(""), FetchOptions::default())
            .unwrap_err();
        assert!(matches!(error, FetchError::MissingEndpoint));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_drops_cached_executors() {
        let (coordinator, calls) = coordinator();

        coordinator.request("/users", FetchOptions::default()).unwrap();
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        coordinator.clear();
        coordinator.request("/users", FetchOptions::default()).unwrap();
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refetch_redispatches() {
        let (coordinator, calls) = coordinator();

        let executor = coordinator.request("/users", FetchOptions::default()).unwrap();
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        executor.refetch();
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_snapshot() {
        let (coordinator, _) = coordinator();

        coordinator.request("/users", FetchOptions::default()).unwrap();
        coordinator.request("/users", FetchOptions::default()).unwrap();
        settle().await;

        let stats = coordinator.stats();
        assert_eq!(stats.requests, 2);
        assert_eq!(stats.executor_reuses, 1);
        assert_eq!(stats.dispatches, 1);
        assert!(stats.flushes >= 1);
    }
}
