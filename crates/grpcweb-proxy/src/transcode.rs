//! Response direction: gRPC server -> gRPC-Web client.
//!
//! Headers, body chunks and the trailer frame are forwarded as soon as each
//! arrives. In text mode a single base64 encoder spans the whole body so the
//! client sees one continuous base64 stream.

use crate::body::{session_status, ProxyBody, ResponseBody};
use crate::error::ProxyError;
use crate::events::DownstreamEvent;
use crate::session::Session;
use bytes::Bytes;
use grpcweb_core::{encode_trailers, filter_headers, Base64Encoder, GrpcWebContentType};
use http::{header, HeaderValue, Response, StatusCode};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Turn downstream events into the outbound response
///
/// Resolves once the first event is known: `Headers` yields a streaming 200,
/// anything else a 502. The rest of the body is written by a spawned task.
pub async fn transcode(
    mut events: mpsc::Receiver<DownstreamEvent>,
    content_type: GrpcWebContentType,
    session: Session,
    buffer: usize,
) -> Response<ProxyBody> {
    let headers = match events.recv().await {
        Some(DownstreamEvent::Headers(headers)) => headers,
        Some(DownstreamEvent::Error(err)) => {
            warn!(error = %err, "An error occurred while sending the request to the gRPC server");
            return session_status(StatusCode::BAD_GATEWAY, session);
        }
        Some(other) => {
            warn!(event = other.kind(), "gRPC server sent {} before response headers", other.kind());
            return session_status(StatusCode::BAD_GATEWAY, session);
        }
        None => {
            warn!("gRPC stream ended before response headers");
            return session_status(StatusCode::BAD_GATEWAY, session);
        }
    };

    let (chunks, body) = mpsc::channel(buffer.max(1));
    let encoder = content_type.is_text().then(Base64Encoder::new);
    tokio::spawn(write_body(events, OutboundSink { chunks, encoder }));

    let mut response = Response::new(ResponseBody::streaming(body, session).boxed());
    *response.status_mut() = StatusCode::OK;
    *response.headers_mut() = filter_headers(&headers);
    // The client gets its own framing family back, not the downstream type
    match HeaderValue::from_str(content_type.as_str()) {
        Ok(value) => {
            response.headers_mut().insert(header::CONTENT_TYPE, value);
        }
        Err(err) => debug!(error = %err, "content type not echoed"),
    }
    response
}

/// Outbound byte channel with the optional text-safe stage in front of it
struct OutboundSink {
    chunks: mpsc::Sender<Result<Bytes, ProxyError>>,
    encoder: Option<Base64Encoder>,
}

impl OutboundSink {
    /// Returns false once the client is gone
    async fn write(&mut self, data: Bytes) -> bool {
        let data = match self.encoder.as_mut() {
            Some(encoder) => encoder.push(&data),
            None => data,
        };
        if data.is_empty() {
            return true;
        }
        self.chunks.send(Ok(data)).await.is_ok()
    }

    async fn finish(mut self) {
        if let Some(encoder) = self.encoder.as_mut() {
            let tail = encoder.finish();
            if !tail.is_empty() {
                let _ = self.chunks.send(Ok(tail)).await;
            }
        }
    }

    async fn abort(self, err: ProxyError) {
        let _ = self.chunks.send(Err(err)).await;
    }
}

async fn write_body(mut events: mpsc::Receiver<DownstreamEvent>, mut sink: OutboundSink) {
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = sink.chunks.closed() => {
                debug!("client closed the response");
                return;
            }
        };

        match event {
            Some(DownstreamEvent::Data(data)) => {
                if !sink.write(data).await {
                    debug!("client closed the response");
                    return;
                }
            }
            Some(DownstreamEvent::Trailers(trailers)) => {
                if sink.write(encode_trailers(&trailers)).await {
                    sink.finish().await;
                }
                return;
            }
            Some(DownstreamEvent::End) | None => {
                sink.finish().await;
                return;
            }
            Some(DownstreamEvent::Headers(_)) => {
                debug!("ignoring repeated response headers");
            }
            Some(DownstreamEvent::Error(err)) => {
                // Headers are already out, so the client only sees an abrupt close
                warn!(error = %err, "gRPC stream failed mid-response");
                sink.abort(err).await;
                return;
            }
        }
    }
}
