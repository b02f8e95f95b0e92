//! CORS handling for browser gRPC-Web clients

use crate::body::{empty_body, ProxyBody};
use http::{header, HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};

/// Headers every gRPC-Web client must be able to read
pub const DEFAULT_EXPOSED_HEADERS: [&str; 2] = ["grpc-status", "grpc-message"];

/// CORS configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Fixed allowed origin; `*` when unset
    pub origin: Option<String>,
    /// Exposed headers in addition to `grpc-status` and `grpc-message`
    pub exposed_headers: Vec<String>,
    /// Send `Access-Control-Allow-Credentials: true`
    pub allow_credentials: bool,
}

impl CorsConfig {
    /// Create the default gRPC-Web CORS config
    pub fn new() -> Self {
        Self {
            origin: None,
            exposed_headers: Vec::new(),
            allow_credentials: true,
        }
    }

    /// Set the allowed origin
    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Expose extra response headers; each entry may hold a comma-separated list
    pub fn expose_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exposed_headers.extend(headers.into_iter().map(Into::into));
        self
    }

    /// Allow credentials
    pub fn allow_credentials(mut self, allow: bool) -> Self {
        self.allow_credentials = allow;
        self
    }

    /// Value of `Access-Control-Expose-Headers`
    pub fn exposed_header_value(&self) -> String {
        DEFAULT_EXPOSED_HEADERS
            .iter()
            .copied()
            .chain(self.exposed_headers.iter().flat_map(|h| h.split(',')))
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Any `OPTIONS` request is answered as a preflight
    pub fn is_preflight<B>(&self, req: &Request<B>) -> bool {
        req.method() == Method::OPTIONS
    }

    /// 204 answer to a preflight request
    pub fn preflight_response<B>(&self, req: &Request<B>) -> Response<ProxyBody> {
        let mut response = Response::new(empty_body());
        *response.status_mut() = StatusCode::NO_CONTENT;

        let headers = response.headers_mut();
        self.add_common_headers(headers);
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("POST"),
        );
        if let Some(requested) = req.headers().get(header::ACCESS_CONTROL_REQUEST_HEADERS) {
            headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, requested.clone());
            headers.append(
                header::VARY,
                HeaderValue::from_static("Access-Control-Request-Headers"),
            );
        }
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
        response
    }

    /// Add CORS headers to an actual response
    pub fn apply(&self, response: &mut Response<ProxyBody>) {
        self.add_common_headers(response.headers_mut());
    }

    fn add_common_headers(&self, headers: &mut HeaderMap) {
        match self.origin.as_deref() {
            Some(origin) if origin != "*" => {
                if let Ok(value) = HeaderValue::from_str(origin) {
                    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
                }
                headers.append(header::VARY, HeaderValue::from_static("Origin"));
            }
            _ => {
                headers.insert(
                    header::ACCESS_CONTROL_ALLOW_ORIGIN,
                    HeaderValue::from_static("*"),
                );
            }
        }

        if self.allow_credentials {
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }

        if let Ok(value) = HeaderValue::from_str(&self.exposed_header_value()) {
            headers.insert(header::ACCESS_CONTROL_EXPOSE_HEADERS, value);
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self::new()
    }
}
