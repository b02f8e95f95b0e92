//! Core types and utilities for the gRPC-Web translator.
//!
//! This crate holds the I/O-free pieces shared by the proxy:
//! - Content negotiation (eligibility, downstream content type, text mode)
//! - Header hygiene in both directions
//! - Trailer frame encoding and parsing
//! - Streaming base64 transcoding for `grpc-web-text`

pub mod content_type;
pub mod error;
pub mod headers;
pub mod text;
pub mod trailer;

pub use content_type::{
    downstream_content_type, is_grpc_web_request, is_text_mode, Encoding, GrpcWebContentType,
};
pub use error::{TextError, TrailerError};
pub use headers::{filter_headers, is_forwardable, IGNORED_HEADERS};
pub use text::{Base64Decoder, Base64Encoder};
pub use trailer::{
    encode_trailers, parse_trailer_frame, MAX_TRAILER_PAYLOAD, TRAILER_FLAG, TRAILER_HEADER_LEN,
};
