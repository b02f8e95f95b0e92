//! Error types for the proxy.

use grpcweb_core::TextError;
use http::StatusCode;

/// Proxy error type
///
/// Only `Configuration` is fatal; every other variant is recovered into a
/// client-visible status for the request that hit it.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connect error: {0}")]
    Connect(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Request body error: {0}")]
    RequestBody(String),

    #[error(transparent)]
    Text(#[from] TextError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// Status surfaced to the gRPC-Web client for this failure
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::Connect(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Stream(_) | ProxyError::RequestBody(_) | ProxyError::Text(_) => {
                StatusCode::BAD_GATEWAY
            }
            ProxyError::Configuration(_) | ProxyError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub(crate) fn stream(context: &str, err: h2::Error) -> Self {
        ProxyError::Stream(format!("{context}: {err}"))
    }
}
