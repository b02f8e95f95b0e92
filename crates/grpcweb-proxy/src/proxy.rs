//! The gRPC-Web translator entry point.

use crate::body::{session_status, ProxyBody};
use crate::error::ProxyError;
use crate::events::pump_events;
use crate::forward::{downstream_request, forward_body, BoxError};
use crate::session::Session;
use crate::target::{Connector, Target};
use crate::transcode::transcode;
use bytes::Bytes;
use grpcweb_core::{is_grpc_web_request, Base64Decoder, GrpcWebContentType};
use http::{Request, Response, StatusCode};
use http_body::Body;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

/// Default capacity of the per-request event and body channels
pub const DEFAULT_BUFFER: usize = 8;

/// Outcome of offering a request to the proxy
pub enum Dispatch<B> {
    /// The request was a gRPC-Web call and has been answered
    Handled(Response<ProxyBody>),
    /// Not a gRPC-Web call; the next handler in the chain decides
    PassThrough(Request<B>),
}

/// Translates gRPC-Web requests into gRPC calls against one target
///
/// Cloning is cheap; clones share the resolved target.
#[derive(Clone, Debug)]
pub struct GrpcWebProxy {
    connector: Connector,
    buffer: usize,
}

impl GrpcWebProxy {
    /// Build a proxy for `target`; an empty or invalid target fails here
    pub fn new(target: impl Into<Target>) -> Result<Self, ProxyError> {
        Ok(Self {
            connector: Connector::new(target.into())?,
            buffer: DEFAULT_BUFFER,
        })
    }

    /// Set the per-request channel capacity (minimum 1)
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    /// Handle the request if it is gRPC-Web, otherwise hand it back
    pub async fn dispatch<B>(&self, req: Request<B>) -> Dispatch<B>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError> + Send,
    {
        if !is_grpc_web_request(req.method(), req.headers()) {
            return Dispatch::PassThrough(req);
        }
        match GrpcWebContentType::from_headers(req.headers()) {
            Some(content_type) => Dispatch::Handled(self.handle(req, content_type).await),
            None => Dispatch::PassThrough(req),
        }
    }

    /// Proxy one eligible gRPC-Web call
    ///
    /// 200 with streamed body and trailer frame on success, 503 if the gRPC
    /// server cannot be reached, 502 if the call fails before headers.
    #[instrument(skip_all, fields(path = %req.uri().path()))]
    async fn handle<B>(&self, req: Request<B>, content_type: GrpcWebContentType) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError> + Send,
    {
        let (parts, body) = req.into_parts();

        let mut session = Session::new(self.connector.clone());
        if let Err(err) = session.connect().await {
            warn!(error = %err, "An error occurred while connecting to the gRPC server");
            return session_status(StatusCode::SERVICE_UNAVAILABLE, session);
        }

        let request = match downstream_request(&parts, &content_type) {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, "could not build the gRPC request");
                return session_status(StatusCode::BAD_GATEWAY, session);
            }
        };
        let (response, sink) = match session.open_stream(request).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(error = %err, "An error occurred while sending the request to the gRPC server");
                return session_status(StatusCode::BAD_GATEWAY, session);
            }
        };
        debug!(content_type = content_type.as_str(), "gRPC stream opened");

        let decoder = content_type.is_text().then(Base64Decoder::new);
        tokio::spawn(forward_body(body, sink, decoder));

        let (events, events_rx) = mpsc::channel(self.buffer);
        tokio::spawn(pump_events(response, events));

        transcode(events_rx, content_type, session, self.buffer).await
    }
}
