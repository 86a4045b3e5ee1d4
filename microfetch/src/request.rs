//! Request-side types: fetch policies, cache keys, and request options.

use crate::hooks::{PostHook, PreHook, Validate};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;
use url::Url;

/// Governs whether and when a cached value satisfies a call without a
/// network dispatch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FetchPolicy {
    /// Always dispatch; never read from or persist into the registry.
    #[default]
    NetworkOnly,
    /// Serve the cached response when one exists; dispatch otherwise.
    CacheFirst,
    /// Serve only cached state; never dispatch.
    CacheOnly,
    /// Serve the cached response immediately and dispatch as well.
    CacheAndNetwork,
}

impl FetchPolicy {
    /// Default policy for a resolved method: GET requests are
    /// cache-first, everything else is network-only.
    pub fn default_for_method(method: &str) -> Self {
        if method == "GET" {
            Self::CacheFirst
        } else {
            Self::NetworkOnly
        }
    }

    /// Returns true for the network-only policy.
    pub fn is_network_only(&self) -> bool {
        matches!(self, Self::NetworkOnly)
    }
}

impl fmt::Display for FetchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NetworkOnly => write!(f, "network-only"),
            Self::CacheFirst => write!(f, "cache-first"),
            Self::CacheOnly => write!(f, "cache-only"),
            Self::CacheAndNetwork => write!(f, "cache-and-network"),
        }
    }
}

/// Identifier used to deduplicate and cache requests.
///
/// At most one executor exists per cache key at any time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Separator for derived keys. A control character cannot appear in a
    /// URL or method token, so derived keys never collide with each other
    /// across component boundaries.
    const SEPARATOR: char = '\u{1}';

    /// Wraps a caller-supplied key override.
    pub fn explicit(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Derives the default key from the resolved URL, method, and
    /// whether the policy is network-only.
    pub fn derive(url: &str, method: &str, network_only: bool) -> Self {
        let sep = Self::SEPARATOR;
        Self(format!("{url}{sep}{method}{sep}{network_only}"))
    }

    /// Returns the raw key string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outgoing request body.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    /// No body.
    #[default]
    None,
    /// JSON value, serialized with `content-type: application/json`.
    Json(serde_json::Value),
    /// Raw text. Gains a JSON content type when it looks like a JSON
    /// object or array and no content type was set explicitly.
    Text(String),
    /// URL-encoded form pairs. Any explicit content type is stripped so
    /// the transport sets its own encoding.
    Form(Vec<(String, String)>),
}

impl RequestBody {
    /// Returns true if no body is present.
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Returns the JSON value, if this body is JSON.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }
}

/// Normalized options handed to the hook pipeline and the transport.
///
/// This is what a pre-send hook receives and may transform: the method is
/// already resolved and upper-cased, params and query are already folded
/// into the URL held by the dispatch closure.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Upper-cased HTTP method.
    pub method: String,
    /// Request headers.
    pub headers: HashMap<String, String>,
    /// Request body.
    pub body: RequestBody,
}

impl RequestOptions {
    /// Looks up a header value by name, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Sets a header, replacing any existing value under the same name
    /// regardless of case.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.remove_header(name);
        self.headers.insert(name.to_string(), value.into());
    }

    /// Removes a header by name, case-insensitively.
    pub fn remove_header(&mut self, name: &str) {
        self.headers.retain(|key, _| !key.eq_ignore_ascii_case(name));
    }
}

/// Per-call options accepted by `Coordinator::request`.
///
/// All fields are optional; unset fields fall back to endpoint defaults
/// (when the target is a named endpoint) and then to the policy defaults.
#[derive(Default)]
pub struct FetchOptions {
    /// HTTP method; defaults to GET.
    pub method: Option<String>,
    /// Request headers.
    pub headers: HashMap<String, String>,
    /// Request body.
    pub body: RequestBody,
    /// Cache key override.
    pub key: Option<String>,
    /// Fetch policy override.
    pub fetch_policy: Option<FetchPolicy>,
    /// Per-call pre-send hook, applied after global hooks.
    pub pre: Option<PreHook>,
    /// Per-call post-receive hook, applied after global hooks.
    pub post: Option<PostHook>,
    /// Built-in body/response validators.
    pub validate: Validate,
    /// Extra query pairs merged into the URL (call-site pairs win).
    pub query: Vec<(String, String)>,
    /// Values substituted for `:name` segments in the URL path.
    pub params: HashMap<String, String>,
}

impl FetchOptions {
    /// Sets the HTTP method.
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Sets the fetch policy.
    pub fn policy(mut self, policy: FetchPolicy) -> Self {
        self.fetch_policy = Some(policy);
        self
    }

    /// Sets a JSON body.
    pub fn body_json(mut self, value: serde_json::Value) -> Self {
        self.body = RequestBody::Json(value);
        self
    }

    /// Adds a request header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Overrides the cache key.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Sets the per-call pre-send hook.
    pub fn pre(mut self, hook: PreHook) -> Self {
        self.pre = Some(hook);
        self
    }

    /// Sets the per-call post-receive hook.
    pub fn post(mut self, hook: PostHook) -> Self {
        self.post = Some(hook);
        self
    }

    /// Sets the built-in validators.
    pub fn validate(mut self, validate: Validate) -> Self {
        self.validate = validate;
        self
    }

    /// Adds a query pair to merge into the URL.
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Adds a `:name` path substitution.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }
}

/// Substitutes `:name` segments in a URL from the params map.
pub(crate) fn apply_params(url: &str, params: &HashMap<String, String>) -> String {
    let mut out = url.to_string();
    for (name, value) in params {
        out = out.replace(&format!(":{name}"), value);
    }
    out
}

/// Merges extra query pairs into a URL's query string.
///
/// Existing pairs are kept; a merged pair with the same name replaces the
/// existing one. Path-only URLs are resolved against a placeholder base
/// and returned as path + query.
pub(crate) fn merge_query(url: &str, query: &[(String, String)]) -> String {
    if query.is_empty() {
        return url.to_string();
    }

    let path_only = url.starts_with('/');
    let candidate = if path_only {
        format!("http://placeholder.invalid{url}")
    } else {
        url.to_string()
    };

    let mut parsed = match Url::parse(&candidate) {
        Ok(parsed) => parsed,
        Err(error) => {
            debug!(url, %error, "could not parse URL for query merge");
            return url.to_string();
        }
    };

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();
    for (name, value) in query {
        match pairs.iter_mut().find(|(existing, _)| existing == name) {
            Some(pair) => pair.1 = value.clone(),
            None => pairs.push((name.clone(), value.clone())),
        }
    }

    {
        let mut serializer = parsed.query_pairs_mut();
        serializer.clear();
        for (name, value) in &pairs {
            serializer.append_pair(name, value);
        }
    }

    if path_only {
        match parsed.query() {
            Some(q) => format!("{}?{}", parsed.path(), q),
            None => parsed.path().to_string(),
        }
    } else {
        parsed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_defaults_by_method() {
        assert_eq!(FetchPolicy::default_for_method("GET"), FetchPolicy::CacheFirst);
        assert_eq!(
            FetchPolicy::default_for_method("POST"),
            FetchPolicy::NetworkOnly
        );
        assert_eq!(
            FetchPolicy::default_for_method("DELETE"),
            FetchPolicy::NetworkOnly
        );
    }

    #[test]
    fn test_policy_display() {
        assert_eq!(format!("{}", FetchPolicy::CacheFirst), "cache-first");
        assert_eq!(format!("{}", FetchPolicy::NetworkOnly), "network-only");
    }

    #[test]
    fn test_cache_key_derivation() {
        let key = CacheKey::derive("/users", "GET", false);
        assert_eq!(key.as_str(), "/users\u{1}GET\u{1}false");

        let network_only = CacheKey::derive("/users", "GET", true);
        assert_ne!(key, network_only);
    }

    #[test]
    fn test_cache_key_explicit_override() {
        let key = CacheKey::explicit("users-page-1");
        assert_eq!(key.as_str(), "users-page-1");
    }

    #[test]
    fn test_apply_params_substitutes_segments() {
        let mut params = HashMap::new();
        params.insert("id".to_string(), "42".to_string());
        assert_eq!(apply_params("/users/:id/posts", &params), "/users/42/posts");
    }

    #[test]
    fn test_apply_params_without_params_is_identity() {
        assert_eq!(apply_params("/users", &HashMap::new()), "/users");
    }

    #[test]
    fn test_merge_query_appends_to_path_only_url() {
        let query = vec![("page".to_string(), "2".to_string())];
        assert_eq!(merge_query("/users", &query), "/users?page=2");
    }

    #[test]
    fn test_merge_query_replaces_existing_pair() {
        let query = vec![("page".to_string(), "2".to_string())];
        assert_eq!(
            merge_query("/users?page=1&limit=10", &query),
            "/users?page=2&limit=10"
        );
    }

    #[test]
    fn test_merge_query_on_absolute_url() {
        let query = vec![("q".to_string(), "rust".to_string())];
        assert_eq!(
            merge_query("https://example.com/search", &query),
            "https://example.com/search?q=rust"
        );
    }

    #[test]
    fn test_merge_query_empty_is_identity() {
        assert_eq!(merge_query("/users?page=1", &[]), "/users?page=1");
    }

    #[test]
    fn test_request_options_header_helpers() {
        let mut options = RequestOptions::default();
        options.set_header("Content-Type", "text/plain");
        assert_eq!(options.header("content-type"), Some("text/plain"));

        options.set_header("content-type", "application/json");
        assert_eq!(options.headers.len(), 1);
        assert_eq!(options.header("CONTENT-TYPE"), Some("application/json"));

        options.remove_header("Content-Type");
        assert!(options.headers.is_empty());
    }
}
