//! Content negotiation for gRPC-Web requests.
//!
//! A request is eligible when it is a `POST` whose content type is one of
//! `application/grpc-web`, `application/grpc-web-text`, or either of those
//! followed by a `+format` suffix. The downstream peer always sees the binary
//! `application/grpc` family with the same suffix.

use http::{header, HeaderMap, Method};

/// Binary gRPC-Web media type
pub const GRPC_WEB: &str = "application/grpc-web";

/// Text (base64) gRPC-Web media type
pub const GRPC_WEB_TEXT: &str = "application/grpc-web-text";

/// Native gRPC media type used downstream
pub const GRPC: &str = "application/grpc";

/// How the client encodes the body on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Raw gRPC length-prefixed frames
    Binary,
    /// The whole body is base64 encoded
    Text,
}

/// Parsed gRPC-Web content type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrpcWebContentType {
    original: String,
    encoding: Encoding,
    format: String,
}

impl GrpcWebContentType {
    /// Parse a raw content-type value, returning `None` if it is not a
    /// gRPC-Web type.
    pub fn parse(raw: &str) -> Option<Self> {
        let (encoding, prefix) = if has_family(raw, GRPC_WEB_TEXT) {
            (Encoding::Text, GRPC_WEB_TEXT)
        } else if has_family(raw, GRPC_WEB) {
            (Encoding::Binary, GRPC_WEB)
        } else {
            return None;
        };

        Some(Self {
            original: raw.to_string(),
            encoding,
            format: raw[prefix.len()..].to_string(),
        })
    }

    /// Parse the content type of a header map
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(Self::parse)
    }

    /// The content type exactly as the client sent it
    pub fn as_str(&self) -> &str {
        &self.original
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Payload sub-format suffix including the leading `+`, or empty
    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn is_text(&self) -> bool {
        self.encoding == Encoding::Text
    }

    /// Content type to send to the native gRPC server
    pub fn downstream(&self) -> String {
        format!("{}{}", GRPC, self.format)
    }
}

/// `raw` is exactly `family` or `family+...`
fn has_family(raw: &str, family: &str) -> bool {
    match raw.strip_prefix(family) {
        Some(rest) => rest.is_empty() || rest.starts_with('+'),
        None => false,
    }
}

/// Check whether a request should be translated by the proxy
pub fn is_grpc_web_request(method: &Method, headers: &HeaderMap) -> bool {
    if method != Method::POST {
        return false;
    }
    GrpcWebContentType::from_headers(headers).is_some()
}

/// `application/grpc` plus everything from the first `+` of `content_type`
pub fn downstream_content_type(content_type: &str) -> String {
    let format = content_type
        .find('+')
        .map(|index| &content_type[index..])
        .unwrap_or("");
    format!("{}{}", GRPC, format)
}

/// Check if the content type selects the base64 text encoding
pub fn is_text_mode(content_type: &str) -> bool {
    content_type.starts_with(GRPC_WEB_TEXT)
}
