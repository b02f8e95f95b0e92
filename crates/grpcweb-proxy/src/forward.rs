//! Request direction: gRPC-Web client -> gRPC server.

use crate::error::ProxyError;
use bytes::Bytes;
use grpcweb_core::{filter_headers, Base64Decoder, GrpcWebContentType};
use h2::{Reason, SendStream};
use http::{header, request, HeaderValue, Method, Request, Uri};
use http_body::Body;
use http_body_util::BodyExt;
use std::future::poll_fn;
use tracing::{debug, warn};

/// Boxed error accepted from inbound bodies
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Build the downstream request head for an inbound gRPC-Web request
///
/// Only the path is reused; the query string is dropped. The method is always
/// `POST` and the content type is the binary `application/grpc` variant.
pub fn downstream_request(
    parts: &request::Parts,
    content_type: &GrpcWebContentType,
) -> Result<Request<()>, ProxyError> {
    let path = match parts.uri.path() {
        "" => "/",
        path => path,
    };
    let uri = Uri::builder()
        .path_and_query(path)
        .build()
        .map_err(|e| ProxyError::Stream(format!("invalid request path {path:?}: {e}")))?;

    let mut request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(())
        .map_err(|e| ProxyError::Stream(format!("failed to build downstream request: {e}")))?;

    let mut headers = filter_headers(&parts.headers);
    let downstream_type = HeaderValue::from_str(&content_type.downstream())
        .map_err(|e| ProxyError::Stream(format!("invalid content type: {e}")))?;
    headers.insert(header::CONTENT_TYPE, downstream_type);
    *request.headers_mut() = headers;

    Ok(request)
}

/// Stream the inbound body into the downstream stream
///
/// Text-mode bodies are base64-decoded on the way through. On failure the
/// downstream stream is reset so the server sees a cancelled call.
pub async fn forward_body<B>(body: B, mut sink: SendStream<Bytes>, decoder: Option<Base64Decoder>)
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError> + Send,
{
    match pump_body(body, &mut sink, decoder).await {
        Ok(total) => debug!(bytes = total, "request body forwarded"),
        Err(err) => {
            warn!(error = %err, "forwarding request body to the gRPC server failed");
            sink.send_reset(Reason::CANCEL);
        }
    }
}

async fn pump_body<B>(
    body: B,
    sink: &mut SendStream<Bytes>,
    mut decoder: Option<Base64Decoder>,
) -> Result<u64, ProxyError>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let mut body = std::pin::pin!(body);
    let mut total = 0u64;

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|e| ProxyError::RequestBody(e.into().to_string()))?;
        // Inbound trailers have no gRPC meaning here
        let Ok(data) = frame.into_data() else {
            continue;
        };
        let data = match decoder.as_mut() {
            Some(decoder) => decoder.push(&data)?,
            None => data,
        };
        total += data.len() as u64;
        send_with_capacity(sink, data).await?;
    }

    if let Some(decoder) = decoder.as_mut() {
        let tail = decoder.finish()?;
        total += tail.len() as u64;
        send_with_capacity(sink, tail).await?;
    }

    sink.send_data(Bytes::new(), true)
        .map_err(|e| ProxyError::stream("closing request stream failed", e))?;
    Ok(total)
}

/// Write `data` downstream, waiting for HTTP/2 send window before each piece
async fn send_with_capacity(sink: &mut SendStream<Bytes>, mut data: Bytes) -> Result<(), ProxyError> {
    while !data.is_empty() {
        sink.reserve_capacity(data.len());
        let available = match poll_fn(|cx| sink.poll_capacity(cx)).await {
            Some(Ok(capacity)) => capacity,
            Some(Err(e)) => return Err(ProxyError::stream("waiting for send capacity failed", e)),
            None => {
                return Err(ProxyError::Stream(
                    "downstream stream closed while sending".to_string(),
                ))
            }
        };
        if available == 0 {
            continue;
        }
        let chunk = data.split_to(available.min(data.len()));
        sink.send_data(chunk, false)
            .map_err(|e| ProxyError::stream("sending request data failed", e))?;
    }
    Ok(())
}
