//! Downstream stream events.
//!
//! The downstream HTTP/2 stream is turned into an ordered sequence of
//! [`DownstreamEvent`]s on a bounded per-request channel, which drives the
//! response transcoder.

use crate::error::ProxyError;
use bytes::Bytes;
use h2::client::ResponseFuture;
use http::HeaderMap;
use tokio::sync::mpsc;
use tracing::debug;

/// What the gRPC server just did
#[derive(Debug)]
pub enum DownstreamEvent {
    /// Response headers arrived
    Headers(HeaderMap),
    /// A chunk of response body
    Data(Bytes),
    /// Trailing metadata arrived; the stream is complete
    Trailers(HeaderMap),
    /// The stream ended without trailers
    End,
    /// The stream was reset or the connection failed
    Error(ProxyError),
}

impl DownstreamEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            DownstreamEvent::Headers(_) => "headers",
            DownstreamEvent::Data(_) => "data",
            DownstreamEvent::Trailers(_) => "trailers",
            DownstreamEvent::End => "end",
            DownstreamEvent::Error(_) => "error",
        }
    }
}

/// Convert a downstream response into events until it finishes
///
/// Receive window is released only after a data event was accepted by the
/// channel, so the server is throttled to the speed of the client.
pub async fn pump_events(response: ResponseFuture, events: mpsc::Sender<DownstreamEvent>) {
    let response = tokio::select! {
        response = response => response,
        _ = events.closed() => return,
    };
    let response = match response {
        Ok(response) => response,
        Err(err) => {
            let _ = events
                .send(DownstreamEvent::Error(ProxyError::stream(
                    "awaiting gRPC response headers failed",
                    err,
                )))
                .await;
            return;
        }
    };

    let (parts, mut body) = response.into_parts();
    if parts.status != http::StatusCode::OK {
        debug!(status = %parts.status, "gRPC server answered with a non-200 status");
    }
    if events.send(DownstreamEvent::Headers(parts.headers)).await.is_err() {
        return;
    }

    loop {
        let next = tokio::select! {
            next = body.data() => next,
            _ = events.closed() => return,
        };
        match next {
            Some(Ok(data)) => {
                let len = data.len();
                if events.send(DownstreamEvent::Data(data)).await.is_err() {
                    return;
                }
                let _ = body.flow_control().release_capacity(len);
            }
            Some(Err(err)) => {
                let _ = events
                    .send(DownstreamEvent::Error(ProxyError::stream(
                        "reading gRPC response body failed",
                        err,
                    )))
                    .await;
                return;
            }
            None => break,
        }
    }

    let last = tokio::select! {
        trailers = body.trailers() => trailers,
        _ = events.closed() => return,
    };
    let last = match last {
        Ok(Some(trailers)) => DownstreamEvent::Trailers(trailers),
        Ok(None) => DownstreamEvent::End,
        Err(err) => DownstreamEvent::Error(ProxyError::stream("reading gRPC trailers failed", err)),
    };
    let _ = events.send(last).await;
}
