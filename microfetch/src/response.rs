//! Normalized HTTP response shape.
//!
//! The transport collaborator reduces every wire response to this shape
//! before it enters the hook pipeline: headers flattened to a string map,
//! the body parsed as JSON or read as text according to its content type,
//! anything else left as [`ResponseBody::None`].

use serde::Serialize;
use std::collections::HashMap;

/// Normalized response body.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    /// No body, or a content type the normalizer does not decode.
    #[default]
    None,
    /// Parsed JSON body (content type containing `json`).
    Json(serde_json::Value),
    /// Raw text body (content type containing `text`).
    Text(String),
}

impl ResponseBody {
    /// Returns the parsed JSON value, if this body is JSON.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the raw text, if this body is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Returns true if no decoded body is present.
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// A normalized HTTP response.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Response {
    /// Response headers with lower-cased names.
    pub headers: HashMap<String, String>,
    /// True when the status code is in the 2xx range.
    pub ok: bool,
    /// HTTP status code.
    pub status: u16,
    /// Canonical reason phrase for the status code.
    pub status_text: String,
    /// True when the final URL differs from the requested URL.
    pub redirected: bool,
    /// Final URL of the response.
    pub url: String,
    /// Decoded body.
    pub body: ResponseBody,
}

impl Response {
    /// Looks up a header value by name, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns the content type header, if present.
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }
}
