//! Transport boundary: the external collaborator performing network calls.
//!
//! The core never talks to the wire directly; it hands a URL and
//! normalized request options to a [`Transport`] and receives a
//! normalized response or error back. The trait is dyn-compatible so a
//! coordinator can hold any implementation, including test mocks.

mod http;

pub use http::ReqwestTransport;

use crate::error::FetchError;
use crate::request::RequestOptions;
use crate::response::Response;
use futures::future::BoxFuture;

/// Performs one network call for the given URL and options.
///
/// Implementations own body serialization, response normalization, and
/// any timeout behavior; the core adds no timeout of its own.
pub trait Transport: Send + Sync {
    /// Sends one request and resolves to a normalized response, or fails
    /// with a normalized error.
    fn send(
        &self,
        url: String,
        options: RequestOptions,
    ) -> BoxFuture<'static, Result<Response, FetchError>>;
}
