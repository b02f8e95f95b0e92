//! gRPC-Web to gRPC translating proxy.
//!
//! Accepts gRPC-Web calls (binary or base64 text) and relays them to a
//! native gRPC server over HTTP/2, streaming in both directions:
//! - Per-request downstream sessions with explicit lifecycle
//! - Request body forwarding with flow control
//! - Response transcoding with an in-band trailer frame
//! - CORS, configuration and a ready-to-run server

pub mod body;
pub mod config;
pub mod cors;
pub mod error;
pub mod events;
pub mod forward;
pub mod proxy;
pub mod server;
pub mod session;
pub mod target;
pub mod transcode;

pub use body::{empty_body, status_response, ProxyBody, ResponseBody};
pub use config::ProxyConfig;
pub use cors::CorsConfig;
pub use error::ProxyError;
pub use events::DownstreamEvent;
pub use proxy::{Dispatch, GrpcWebProxy, DEFAULT_BUFFER};
pub use server::{route, ProxyServer};
pub use session::{Session, SessionState};
pub use target::{Connector, DownstreamConnection, SessionFactory, Target};
