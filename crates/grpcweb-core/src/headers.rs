//! Header hygiene between the gRPC-Web client and the gRPC server.
//!
//! The same filter runs in both directions: hop-by-hop and connection
//! management headers, content negotiation headers, origin markers and the
//! gRPC-Web negotiation markers never cross the proxy.

use http::{HeaderMap, HeaderName};

/// Header names that are never forwarded (lowercase)
pub const IGNORED_HEADERS: [&str; 18] = [
    "accept",
    "accept-encoding",
    "accept-language",
    "cache-control",
    "connection",
    "content-length",
    "content-type",
    "dnt",
    "host",
    "keep-alive",
    "origin",
    "pragma",
    "proxy-connection",
    "referer",
    "transfer-encoding",
    "upgrade",
    "x-grpc-web",
    "x-user-agent",
];

/// Check whether a header may be forwarded across the proxy
pub fn is_forwardable(name: &HeaderName) -> bool {
    // HeaderName is always lowercase
    let name = name.as_str();
    !name.starts_with(':') && !IGNORED_HEADERS.contains(&name)
}

/// Copy every forwardable header, keeping all values of repeated headers
pub fn filter_headers(headers: &HeaderMap) -> HeaderMap {
    let mut filtered = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if is_forwardable(name) {
            filtered.append(name.clone(), value.clone());
        }
    }
    filtered
}
