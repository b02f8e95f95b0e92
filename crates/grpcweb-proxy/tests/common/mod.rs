//! Loopback gRPC servers for integration tests

#![allow(dead_code)]

use bytes::{BufMut, Bytes, BytesMut};
use h2::server::SendResponse;
use h2::RecvStream;
use http::{HeaderMap, Request, Response};
use http_body::Body;
use http_body_util::BodyExt;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

type Handler =
    Arc<dyn Fn(Request<RecvStream>, SendResponse<Bytes>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// An HTTP/2 gRPC server on a loopback port
pub struct GrpcServer {
    pub addr: SocketAddr,
    closed: Arc<AtomicUsize>,
}

impl GrpcServer {
    pub async fn start<F, Fut>(handler: F) -> Self
    where
        F: Fn(Request<RecvStream>, SendResponse<Bytes>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let _ = tracing_subscriber::fmt::try_init();
        let handler: Handler = Arc::new(
            move |req: Request<RecvStream>,
                  respond: SendResponse<Bytes>|
                  -> Pin<Box<dyn Future<Output = ()> + Send>> { Box::pin(handler(req, respond)) },
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let closed = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&closed);
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                let handler = Arc::clone(&handler);
                let counter = Arc::clone(&counter);
                tokio::spawn(async move {
                    if let Ok(mut connection) = h2::server::handshake(socket).await {
                        while let Some(Ok((req, respond))) = connection.accept().await {
                            tokio::spawn(handler(req, respond));
                        }
                    }
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
        });

        Self { addr, closed }
    }

    pub fn target(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Wait until `count` connections were closed by the proxy
    pub async fn wait_closed(&self, count: usize) -> bool {
        for _ in 0..200 {
            if self.closed.load(Ordering::SeqCst) >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

/// A plaintext HTTP/1.1 server that rejects whatever it receives
pub async fn start_http1_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                    .await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// A loopback address nothing listens on
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Read the whole request body, releasing flow control as it goes
pub async fn read_body(body: &mut RecvStream) -> Bytes {
    let mut out = BytesMut::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk.unwrap();
        let _ = body.flow_control().release_capacity(chunk.len());
        out.extend_from_slice(&chunk);
    }
    out.freeze()
}

/// Send `chunks` followed by `grpc-status`/`grpc-message` trailers
pub fn reply(mut respond: SendResponse<Bytes>, chunks: Vec<Bytes>, status: &str, message: &str) {
    let response = Response::builder()
        .status(200)
        .header("content-type", "application/grpc+proto")
        .header("x-served-by", "loopback")
        .body(())
        .unwrap();
    let mut stream = respond.send_response(response, false).unwrap();
    for chunk in chunks {
        stream.send_data(chunk, false).unwrap();
    }
    let mut trailers = HeaderMap::new();
    trailers.insert("grpc-status", status.parse().unwrap());
    trailers.insert("grpc-message", message.parse().unwrap());
    stream.send_trailers(trailers).unwrap();
}

/// Length-prefixed gRPC message
pub fn grpc_message(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(5 + payload.len());
    buf.put_u8(0);
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(payload);
    buf.freeze()
}

/// Collected response body: data chunks, then the terminating error if any
pub struct Collected {
    pub chunks: Vec<Bytes>,
    pub error: Option<String>,
}

impl Collected {
    pub fn bytes(&self) -> Bytes {
        let mut out = BytesMut::new();
        for chunk in &self.chunks {
            out.extend_from_slice(chunk);
        }
        out.freeze()
    }
}

pub async fn collect<B>(body: B) -> Collected
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: std::fmt::Display,
{
    let mut body = body;
    let mut chunks = Vec::new();
    while let Some(frame) = body.frame().await {
        match frame {
            Ok(frame) => {
                if let Ok(data) = frame.into_data() {
                    chunks.push(data);
                }
            }
            Err(err) => {
                return Collected {
                    chunks,
                    error: Some(err.to_string()),
                }
            }
        }
    }
    Collected { chunks, error: None }
}
