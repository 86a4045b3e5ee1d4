//! Error types for the fetch layer.

use crate::request::CacheKey;
use crate::response::Response;
use thiserror::Error;

/// Errors surfaced by the fetch layer.
///
/// Asynchronous failures (everything from `Transport` through `CacheMiss`)
/// are delivered exclusively through an executor's error channel. The usage
/// errors (`UnknownEndpoint`, `MissingEndpoint`) are returned synchronously
/// from `request()` because they indicate a programming mistake that is
/// discoverable before any I/O is attempted.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level failure from the transport collaborator.
    #[error("transport error: {0}")]
    Transport(String),

    /// Response body failed to parse under its declared content type.
    ///
    /// Carries the normalized response (with an empty body) so callers
    /// retain visibility into the headers and status of the raw reply.
    #[error("failed to parse response body: {source}")]
    Parse {
        response: Box<Response>,
        #[source]
        source: serde_json::Error,
    },

    /// Transport call completed but the server signalled failure (`!ok`).
    ///
    /// The message is extracted from the body: the `message`/`msg` field
    /// for JSON bodies, the raw text for text bodies, or a generic
    /// fallback otherwise.
    #[error("{message}")]
    Http {
        message: String,
        response: Box<Response>,
    },

    /// A pre- or post-hook validator rejected.
    ///
    /// The message is the validator's own message, passed through
    /// verbatim. Post-receive rejections carry the response that failed
    /// validation, even though the transport call itself succeeded.
    #[error("{message}")]
    Validation {
        message: String,
        response: Option<Box<Response>>,
    },

    /// A cache-only request found no cached response to serve.
    #[error("no cached response for key {key:?}")]
    CacheMiss { key: CacheKey },

    /// Request referenced an endpoint name that was never registered.
    #[error("unknown endpoint {0:?}")]
    UnknownEndpoint(String),

    /// Request referenced an endpoint with an empty name.
    #[error("request target must name an endpoint")]
    MissingEndpoint,
}

impl FetchError {
    /// Returns the normalized response attached to this error, if any.
    pub fn response(&self) -> Option<&Response> {
        match self {
            Self::Parse { response, .. } | Self::Http { response, .. } => Some(response),
            Self::Validation { response, .. } => response.as_deref(),
            _ => None,
        }
    }

    /// Returns true if this error is a synchronous usage error.
    pub fn is_usage(&self) -> bool {
        matches!(self, Self::UnknownEndpoint(_) | Self::MissingEndpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_error_displays_extracted_message() {
        let error = FetchError::Http {
            message: "quota exceeded".to_string(),
            response: Box::new(Response::default()),
        };
        assert_eq!(format!("{}", error), "quota exceeded");
    }

    #[test]
    fn test_validation_error_passes_message_verbatim() {
        let error = FetchError::Validation {
            message: "\"a\" is required".to_string(),
            response: None,
        };
        assert_eq!(format!("{}", error), "\"a\" is required");
    }

    #[test]
    fn test_usage_errors_are_flagged() {
        assert!(FetchError::UnknownEndpoint("users".to_string()).is_usage());
        assert!(FetchError::MissingEndpoint.is_usage());
        assert!(!FetchError::Transport("boom".to_string()).is_usage());
    }

    #[test]
    fn test_response_accessor() {
        let mut response = Response::default();
        response.status = 503;
        let error = FetchError::Http {
            message: "unavailable".to_string(),
            response: Box::new(response),
        };
        assert_eq!(error.response().map(|r| r.status), Some(503));
        assert!(FetchError::MissingEndpoint.response().is_none());
    }
}
