//! Production transport over reqwest.
//!
//! Implements the wire-side rules of the fetch layer: request-body
//! serialization with content-type inference, response normalization by
//! content type, and error-message extraction for non-success statuses.

use super::Transport;
use crate::error::FetchError;
use crate::request::{RequestBody, RequestOptions};
use crate::response::{Response, ResponseBody};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{trace, warn};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// HTTP transport backed by a pooled reqwest client.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport with the default timeout.
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a transport with a custom total-request timeout.
    pub fn with_timeout(timeout_secs: u64) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| FetchError::Transport(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new().expect("failed to create default HTTP transport")
    }
}

impl Transport for ReqwestTransport {
    fn send(
        &self,
        url: String,
        options: RequestOptions,
    ) -> BoxFuture<'static, Result<Response, FetchError>> {
        let client = self.client.clone();
        Box::pin(async move {
            let method = reqwest::Method::from_bytes(options.method.as_bytes())
                .map_err(|_| FetchError::Transport(format!("invalid method {:?}", options.method)))?;

            let (headers, body) = encode_body(options.headers, options.body)?;

            let mut request = client.request(method, &url);
            for (name, value) in &headers {
                request = request.header(name, value);
            }
            request = match body {
                EncodedBody::None => request,
                EncodedBody::Text(text) => request.body(text),
                EncodedBody::Form(pairs) => request.form(&pairs),
            };

            trace!(url = %url, "transport request starting");
            let response = request.send().await.map_err(|e| {
                warn!(url = %url, error = %e, "transport request failed");
                FetchError::Transport(format!("request failed: {e}"))
            })?;

            normalize(response, &url).await
        })
    }
}

/// Request body after serialization, paired with adjusted headers.
#[derive(Debug, PartialEq)]
pub(crate) enum EncodedBody {
    None,
    Text(String),
    Form(Vec<(String, String)>),
}

/// Serializes a request body and applies the content-type rules:
/// JSON values gain an explicit JSON content type, string bodies that
/// look like JSON and carry no explicit content type are inferred as
/// JSON, and form bodies strip any explicit content type so the client
/// sets its own encoding.
pub(crate) fn encode_body(
    headers: HashMap<String, String>,
    body: RequestBody,
) -> Result<(HashMap<String, String>, EncodedBody), FetchError> {
    let mut options = RequestOptions {
        method: String::new(),
        headers,
        body: RequestBody::None,
    };
    let encoded = match body {
        RequestBody::None => EncodedBody::None,
        RequestBody::Json(value) => {
            let text = serde_json::to_string(&value)
                .map_err(|e| FetchError::Transport(format!("invalid JSON body: {e}")))?;
            options.set_header("content-type", "application/json; charset=UTF-8");
            EncodedBody::Text(text)
        }
        RequestBody::Text(text) => {
            if options.header("content-type").is_none() && looks_like_json(&text) {
                options.set_header("content-type", "application/json; charset=UTF-8");
            }
            EncodedBody::Text(text)
        }
        RequestBody::Form(pairs) => {
            options.remove_header("content-type");
            EncodedBody::Form(pairs)
        }
    };
    Ok((options.headers, encoded))
}

fn looks_like_json(text: &str) -> bool {
    let bytes = text.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(b'{'), Some(b'}')) => true,
        (Some(b'['), Some(b']')) => true,
        _ => false,
    }
}

/// Normalizes a reqwest response: headers flattened with lower-cased
/// names, body decoded by content type, and non-success statuses turned
/// into [`FetchError::Http`] with an extracted message.
async fn normalize(response: reqwest::Response, requested_url: &str) -> Result<Response, FetchError> {
    let status = response.status();
    let final_url = response.url().to_string();
    let headers: HashMap<String, String> = response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_ascii_lowercase(),
                value.to_str().unwrap_or("").to_string(),
            )
        })
        .collect();

    let bytes = response
        .bytes()
        .await
        .map_err(|e| FetchError::Transport(format!("failed to read response body: {e}")))?;

    let mut normalized = Response {
        headers,
        ok: status.is_success(),
        status: status.as_u16(),
        status_text: status.canonical_reason().unwrap_or("").to_string(),
        redirected: final_url != requested_url,
        url: final_url,
        body: ResponseBody::None,
    };

    let content_type = normalized.content_type().unwrap_or("").to_string();
    if content_type.contains("json") {
        match serde_json::from_slice(&bytes) {
            Ok(value) => normalized.body = ResponseBody::Json(value),
            Err(source) => {
                return Err(FetchError::Parse {
                    response: Box::new(normalized),
                    source,
                })
            }
        }
    } else if content_type.contains("text") {
        normalized.body = ResponseBody::Text(String::from_utf8_lossy(&bytes).into_owned());
    }

    if !normalized.ok {
        warn!(url = %normalized.url, status = normalized.status, "HTTP error status");
        return Err(FetchError::Http {
            message: status_error_message(&normalized),
            response: Box::new(normalized),
        });
    }

    Ok(normalized)
}

/// Extracts a human-readable message from a failed response: the
/// `message`/`msg` field for JSON bodies, the raw text for text bodies,
/// and a generic fallback otherwise.
pub(crate) fn status_error_message(response: &Response) -> String {
    match &response.body {
        ResponseBody::Json(value) => value
            .get("message")
            .or_else(|| value.get("msg"))
            .and_then(|field| field.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("fetch failed: {}", response.status_text)),
        ResponseBody::Text(text) => text.clone(),
        ResponseBody::None => format!("fetch failed: {}", response.status_text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn test_encode_json_body_sets_content_type() {
        let (headers, body) =
            encode_body(HashMap::new(), RequestBody::Json(json!({"a": 1}))).unwrap();
        assert_eq!(
            headers.get("content-type").map(String::as_str),
            Some("application/json; charset=UTF-8")
        );
        assert_eq!(body, EncodedBody::Text(r#"{"a":1}"#.to_string()));
    }

    #[test]
    fn test_encode_json_looking_text_infers_content_type() {
        let (headers, body) =
            encode_body(HashMap::new(), RequestBody::Text(r#"{"a":1}"#.to_string())).unwrap();
        assert_eq!(
            headers.get("content-type").map(String::as_str),
            Some("application/json; charset=UTF-8")
        );
        assert_eq!(body, EncodedBody::Text(r#"{"a":1}"#.to_string()));
    }

    #[test]
    fn test_encode_text_respects_explicit_content_type() {
        let (headers, _) = encode_body(
            headers(&[("Content-Type", "text/plain")]),
            RequestBody::Text(r#"{"a":1}"#.to_string()),
        )
        .unwrap();
        assert_eq!(
            headers.get("Content-Type").map(String::as_str),
            Some("text/plain")
        );
    }

    #[test]
    fn test_encode_plain_text_left_untyped() {
        let (headers, body) =
            encode_body(HashMap::new(), RequestBody::Text("hello".to_string())).unwrap();
        assert!(headers.is_empty());
        assert_eq!(body, EncodedBody::Text("hello".to_string()));
    }

    #[test]
    fn test_encode_form_strips_content_type() {
        let (headers, body) = encode_body(
            headers(&[("content-type", "application/json")]),
            RequestBody::Form(vec![("a".to_string(), "1".to_string())]),
        )
        .unwrap();
        assert!(headers.is_empty());
        assert_eq!(body, EncodedBody::Form(vec![("a".to_string(), "1".to_string())]));
    }

    #[test]
    fn test_looks_like_json() {
        assert!(looks_like_json(r#"{"a":1}"#));
        assert!(looks_like_json("[1,2]"));
        assert!(!looks_like_json("hello"));
        assert!(!looks_like_json(""));
    }

    #[test]
    fn test_status_error_message_from_json_message_field() {
        let mut response = Response::default();
        response.body = ResponseBody::Json(json!({"message": "x"}));
        assert_eq!(status_error_message(&response), "x");
    }

    #[test]
    fn test_status_error_message_from_json_msg_field() {
        let mut response = Response::default();
        response.body = ResponseBody::Json(json!({"msg": "y"}));
        assert_eq!(status_error_message(&response), "y");
    }

    #[test]
    fn test_status_error_message_from_text_body_verbatim() {
        let mut response = Response::default();
        response.body = ResponseBody::Text("service melting".to_string());
        assert_eq!(status_error_message(&response), "service melting");
    }

    #[test]
    fn test_status_error_message_fallback() {
        let mut response = Response::default();
        response.status_text = "Bad Gateway".to_string();
        assert_eq!(status_error_message(&response), "fetch failed: Bad Gateway");

        response.body = ResponseBody::Json(json!({"detail": "no message field"}));
        assert_eq!(status_error_message(&response), "fetch failed: Bad Gateway");
    }
}
