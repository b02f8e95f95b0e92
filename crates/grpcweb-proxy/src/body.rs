//! Outbound response bodies.

use crate::error::ProxyError;
use crate::session::Session;
use bytes::Bytes;
use http::{Response, StatusCode};
use http_body::{Body, Frame};
use http_body_util::{combinators::UnsyncBoxBody, BodyExt, Empty};
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::sync::mpsc;

/// Body type of every response produced by the proxy and its glue
pub type ProxyBody = UnsyncBoxBody<Bytes, ProxyError>;

/// Response body fed by the transcoder, owning the downstream session
///
/// Completing the body or dropping it (client went away) closes the session.
pub struct ResponseBody {
    chunks: mpsc::Receiver<Result<Bytes, ProxyError>>,
    session: Option<Session>,
}

impl ResponseBody {
    pub(crate) fn streaming(
        chunks: mpsc::Receiver<Result<Bytes, ProxyError>>,
        session: Session,
    ) -> Self {
        Self {
            chunks,
            session: Some(session),
        }
    }

    /// A body with no bytes that still holds the session until it is consumed
    pub(crate) fn closed(session: Session) -> Self {
        let (_, chunks) = mpsc::channel(1);
        Self::streaming(chunks, session)
    }

    pub fn boxed(self) -> ProxyBody {
        BodyExt::boxed_unsync(self)
    }
}

impl Body for ResponseBody {
    type Data = Bytes;
    type Error = ProxyError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, ProxyError>>> {
        let this = self.get_mut();
        match ready!(this.chunks.poll_recv(cx)) {
            Some(Ok(data)) => Poll::Ready(Some(Ok(Frame::data(data)))),
            Some(Err(err)) => {
                this.session.take();
                Poll::Ready(Some(Err(err)))
            }
            None => {
                this.session.take();
                Poll::Ready(None)
            }
        }
    }
}

/// Empty body for responses that carry only a status
pub fn empty_body() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// Status-only response that keeps `session` alive until it is sent
pub(crate) fn session_status(status: StatusCode, session: Session) -> Response<ProxyBody> {
    let mut response = Response::new(ResponseBody::closed(session).boxed());
    *response.status_mut() = status;
    response
}

/// Status-only response with no session attached
pub fn status_response(status: StatusCode) -> Response<ProxyBody> {
    let mut response = Response::new(empty_body());
    *response.status_mut() = status;
    response
}
