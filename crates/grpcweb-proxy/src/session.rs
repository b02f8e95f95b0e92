//! Per-request downstream session lifecycle.
//!
//! `Idle -> Connecting -> {Connected | Failed} -> Streaming -> Closed`
//!
//! Every response the proxy produces owns its [`Session`]; the session is
//! closed when that response body completes or is dropped, and nowhere else.

use crate::error::ProxyError;
use crate::target::{Connector, DownstreamConnection};
use bytes::Bytes;
use h2::client::ResponseFuture;
use h2::SendStream;
use http::{Request, Uri};
use tracing::{debug, trace};

/// Lifecycle state of a downstream session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Failed,
    Streaming,
    Closed,
}

impl SessionState {
    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Idle, Connecting)
            | (Connecting, Connected)
            | (Connecting, Failed)
            | (Connected, Streaming) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Failed => "failed",
            SessionState::Streaming => "streaming",
            SessionState::Closed => "closed",
        }
    }
}

/// One downstream connection owned by one inbound request
#[derive(Debug)]
pub struct Session {
    connector: Connector,
    state: SessionState,
    connection: Option<DownstreamConnection>,
}

impl Session {
    pub fn new(connector: Connector) -> Self {
        Self {
            connector,
            state: SessionState::Idle,
            connection: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn advance(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal session transition {} -> {}",
            self.state.as_str(),
            next.as_str()
        );
        trace!(from = self.state.as_str(), to = next.as_str(), "session transition");
        self.state = next;
    }

    /// Open the downstream connection through the configured target
    pub async fn connect(&mut self) -> Result<(), ProxyError> {
        self.advance(SessionState::Connecting);
        match self.connector.open().await {
            Ok(connection) => {
                debug!(authority = %connection.authority(), "connected to gRPC server");
                self.connection = Some(connection);
                self.advance(SessionState::Connected);
                Ok(())
            }
            Err(err) => {
                self.advance(SessionState::Failed);
                Err(err)
            }
        }
    }

    /// Open the single downstream stream for this request
    ///
    /// `request` carries the path; scheme and authority come from the
    /// connection.
    pub async fn open_stream(
        &mut self,
        mut request: Request<()>,
    ) -> Result<(ResponseFuture, SendStream<Bytes>), ProxyError> {
        let connection = match (&self.connection, self.state) {
            (Some(connection), SessionState::Connected) => connection,
            _ => {
                return Err(ProxyError::Stream(format!(
                    "cannot open a stream on a {} session",
                    self.state.as_str()
                )))
            }
        };

        let path = request
            .uri()
            .path_and_query()
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        *request.uri_mut() = Uri::builder()
            .scheme(connection.scheme().clone())
            .authority(connection.authority().clone())
            .path_and_query(path)
            .build()
            .map_err(|e| ProxyError::Stream(format!("invalid downstream URI: {e}")))?;

        let mut sender = connection
            .sender()
            .ready()
            .await
            .map_err(|e| ProxyError::stream("gRPC server connection not ready", e))?;
        let (response, stream) = sender
            .send_request(request, false)
            .map_err(|e| ProxyError::stream("sending request to gRPC server failed", e))?;

        self.advance(SessionState::Streaming);
        Ok((response, stream))
    }

    /// Tear the session down; safe to call in any state, more than once
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        let had_connection = self.connection.take().is_some();
        self.advance(SessionState::Closed);
        if had_connection {
            debug!("downstream session closed");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
