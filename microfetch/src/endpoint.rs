//! Named endpoint configurations.
//!
//! An endpoint binds a name to a URL plus default request options.
//! Issuing a request against the name merges those defaults with the
//! per-call options, with the call site winning every conflict.

use crate::hooks::{PostHook, PreHook, Validate};
use crate::request::{FetchOptions, FetchPolicy, RequestBody};
use std::collections::HashMap;

/// Defaults registered under an endpoint name.
#[derive(Clone, Default)]
pub struct Endpoint {
    /// Target URL, possibly containing `:name` path segments.
    pub url: String,
    /// Default HTTP method.
    pub method: Option<String>,
    /// Default headers.
    pub headers: HashMap<String, String>,
    /// Default body.
    pub body: RequestBody,
    /// Default cache key override.
    pub key: Option<String>,
    /// Default fetch policy.
    pub fetch_policy: Option<FetchPolicy>,
    /// Default per-call pre-send hook.
    pub pre: Option<PreHook>,
    /// Default per-call post-receive hook.
    pub post: Option<PostHook>,
    /// Default built-in validators.
    pub validate: Validate,
    /// Default query pairs.
    pub query: Vec<(String, String)>,
    /// Default `:name` path substitutions.
    pub params: HashMap<String, String>,
}

impl Endpoint {
    /// Creates an endpoint configuration for the given URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Sets the default HTTP method.
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Adds a default header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the default JSON body.
    pub fn body_json(mut self, value: serde_json::Value) -> Self {
        self.body = RequestBody::Json(value);
        self
    }

    /// Sets the default cache key override.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Sets the default fetch policy.
    pub fn policy(mut self, policy: FetchPolicy) -> Self {
        self.fetch_policy = Some(policy);
        self
    }

    /// Sets the default pre-send hook.
    pub fn pre(mut self, hook: PreHook) -> Self {
        self.pre = Some(hook);
        self
    }

    /// Sets the default post-receive hook.
    pub fn post(mut self, hook: PostHook) -> Self {
        self.post = Some(hook);
        self
    }

    /// Sets the default validators.
    pub fn validate(mut self, validate: Validate) -> Self {
        self.validate = validate;
        self
    }

    /// Adds a default query pair.
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Adds a default `:name` path substitution.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Merges per-call options over these defaults.
    ///
    /// Scalar fields fall back to the endpoint when unset at the call
    /// site. Headers, query pairs, and params merge name-wise with the
    /// call site replacing same-named entries. Per-call validators, when
    /// any are set, replace the endpoint's validators wholesale.
    pub(crate) fn merge(&self, call: FetchOptions) -> FetchOptions {
        let mut headers = self.headers.clone();
        headers.extend(call.headers);

        let mut query = self.query.clone();
        for (name, value) in call.query {
            match query.iter_mut().find(|(existing, _)| *existing == name) {
                Some(pair) => pair.1 = value,
                None => query.push((name, value)),
            }
        }

        let mut params = self.params.clone();
        params.extend(call.params);

        FetchOptions {
            method: call.method.or_else(|| self.method.clone()),
            headers,
            body: if call.body.is_none() {
                self.body.clone()
            } else {
                call.body
            },
            key: call.key.or_else(|| self.key.clone()),
            fetch_policy: call.fetch_policy.or(self.fetch_policy),
            pre: call.pre.or_else(|| self.pre.clone()),
            post: call.post.or_else(|| self.post.clone()),
            validate: if call.validate.is_empty() {
                self.validate.clone()
            } else {
                call.validate
            },
            query,
            params,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_falls_back_to_endpoint_defaults() {
        let endpoint = Endpoint::new("/users")
            .method("POST")
            .header("x-app", "demo")
            .policy(FetchPolicy::CacheAndNetwork)
            .query("limit", "10");

        let merged = endpoint.merge(FetchOptions::default());

        assert_eq!(merged.method.as_deref(), Some("POST"));
        assert_eq!(merged.headers.get("x-app").map(String::as_str), Some("demo"));
        assert_eq!(merged.fetch_policy, Some(FetchPolicy::CacheAndNetwork));
        assert_eq!(merged.query, vec![("limit".to_string(), "10".to_string())]);
    }

    #[test]
    fn test_merge_call_site_wins() {
        let endpoint = Endpoint::new("/users")
            .method("POST")
            .header("x-app", "demo")
            .body_json(json!({"from": "endpoint"}))
            .query("limit", "10");

        let merged = endpoint.merge(
            FetchOptions::default()
                .method("PUT")
                .header("x-app", "override")
                .body_json(json!({"from": "call"}))
                .query("limit", "25")
                .query("page", "2"),
        );

        assert_eq!(merged.method.as_deref(), Some("PUT"));
        assert_eq!(
            merged.headers.get("x-app").map(String::as_str),
            Some("override")
        );
        assert_eq!(merged.body.as_json(), Some(&json!({"from": "call"})));
        assert_eq!(
            merged.query,
            vec![
                ("limit".to_string(), "25".to_string()),
                ("page".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn test_merge_params_call_site_wins() {
        let endpoint = Endpoint::new("/users/:id").param("id", "1");
        let merged = endpoint.merge(FetchOptions::default().param("id", "2"));
        assert_eq!(merged.params.get("id").map(String::as_str), Some("2"));
    }

    #[test]
    fn test_merge_per_call_validators_replace_wholesale() {
        let endpoint = Endpoint::new("/users").validate(
            Validate::default()
                .body(|body| Ok(body.clone()))
                .response(|body| Ok(body.clone())),
        );

        // A call-site body validator drops the endpoint's response
        // validator too.
        let merged = endpoint.merge(
            FetchOptions::default().validate(Validate::default().body(|body| Ok(body.clone()))),
        );
        assert!(merged.validate.body.is_some());
        assert!(merged.validate.response.is_none());

        let merged = endpoint.merge(FetchOptions::default());
        assert!(merged.validate.body.is_some());
        assert!(merged.validate.response.is_some());
    }
}
