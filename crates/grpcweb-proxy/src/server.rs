//! HTTP server fronting the translator

use crate::body::{status_response, ProxyBody};
use crate::config::ProxyConfig;
use crate::cors::CorsConfig;
use crate::error::ProxyError;
use crate::forward::BoxError;
use crate::proxy::{Dispatch, GrpcWebProxy};
use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body::Body;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// gRPC-Web proxy server
///
/// Every request runs through CORS, then the translator; anything the
/// translator passes through gets an empty 404.
pub struct ProxyServer {
    proxy: GrpcWebProxy,
    cors: Arc<CorsConfig>,
}

impl ProxyServer {
    /// Create a new server from a translator and CORS settings
    pub fn new(proxy: GrpcWebProxy, cors: CorsConfig) -> Self {
        Self {
            proxy,
            cors: Arc::new(cors),
        }
    }

    /// Build a server from a validated configuration
    pub fn from_config(config: &ProxyConfig) -> Result<Self, ProxyError> {
        config.validate()?;
        let target = config.target.clone().unwrap_or_default();
        let proxy = GrpcWebProxy::new(target)?.with_buffer(config.buffer());
        Ok(Self::new(proxy, config.cors()))
    }

    /// Serve on the given address
    pub async fn serve(self, addr: SocketAddr) -> Result<(), ProxyError> {
        let listener = TcpListener::bind(addr).await?;
        self.serve_with_listener(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve_with_listener(self, listener: TcpListener) -> Result<(), ProxyError> {
        info!("gRPC-Web proxy listening on {}", listener.local_addr()?);

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let _ = stream.set_nodelay(true);
            let proxy = self.proxy.clone();
            let cors = Arc::clone(&self.cors);

            tokio::spawn(async move {
                let io = TokioIo::new(stream);

                let service = hyper::service::service_fn(move |req: Request<Incoming>| {
                    let proxy = proxy.clone();
                    let cors = Arc::clone(&cors);
                    async move { Ok::<_, hyper::Error>(route(&proxy, &cors, req).await) }
                });

                if let Err(err) = auto::Builder::new(TokioExecutor::new())
                    .serve_connection(io, service)
                    .await
                {
                    error!("Error serving connection from {}: {}", remote_addr, err);
                }
            });
        }
    }
}

/// Run one request through the CORS, translator and not-found chain
pub async fn route<B>(proxy: &GrpcWebProxy, cors: &CorsConfig, req: Request<B>) -> Response<ProxyBody>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError> + Send,
{
    if cors.is_preflight(&req) {
        return cors.preflight_response(&req);
    }

    let mut response = match proxy.dispatch(req).await {
        Dispatch::Handled(response) => response,
        Dispatch::PassThrough(req) => {
            debug!(method = %req.method(), path = req.uri().path(), "not a gRPC-Web request");
            status_response(StatusCode::NOT_FOUND)
        }
    };
    cors.apply(&mut response);
    response
}
