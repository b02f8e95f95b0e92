//! Downstream target resolution.
//!
//! A [`Target`] is either a fixed address or a caller-supplied factory. It is
//! resolved once, when the proxy is built, into a [`Connector`] whose single
//! `open` operation yields a fresh [`DownstreamConnection`].

use crate::error::ProxyError;
use bytes::Bytes;
use h2::client::SendRequest;
use http::uri::{Authority, Scheme};
use http::Uri;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::debug;

/// Boxed, sendable future
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Opens a downstream HTTP/2 connection on demand
pub type SessionFactory =
    Arc<dyn Fn() -> BoxFuture<Result<DownstreamConnection, ProxyError>> + Send + Sync>;

/// Where the gRPC server lives
#[derive(Clone)]
pub enum Target {
    /// `host:port` or `http://host[:port]`
    Address(String),
    /// Custom connection factory (TLS, unix sockets, pooling)
    Factory(SessionFactory),
}

impl Target {
    pub fn address(address: impl Into<String>) -> Self {
        Target::Address(address.into())
    }

    pub fn factory<F, Fut>(factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<DownstreamConnection, ProxyError>> + Send + 'static,
    {
        Target::Factory(Arc::new(move || Box::pin(factory()) as BoxFuture<_>))
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Address(address) => f.debug_tuple("Address").field(address).finish(),
            Target::Factory(_) => f.debug_tuple("Factory").field(&"<fn>").finish(),
        }
    }
}

impl From<&str> for Target {
    fn from(address: &str) -> Self {
        Target::address(address)
    }
}

impl From<String> for Target {
    fn from(address: String) -> Self {
        Target::Address(address)
    }
}

/// An HTTP/2 client connection to the gRPC server
///
/// Dropping it aborts the connection driver task (if this connection owns
/// one), which closes the underlying transport.
pub struct DownstreamConnection {
    sender: SendRequest<Bytes>,
    driver: Option<JoinHandle<()>>,
    scheme: Scheme,
    authority: Authority,
}

impl DownstreamConnection {
    /// Perform the HTTP/2 handshake over `io` and spawn the connection driver
    pub async fn handshake<T>(io: T, authority: Authority) -> Result<Self, ProxyError>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sender, connection) = h2::client::handshake(io)
            .await
            .map_err(|e| ProxyError::Connect(format!("HTTP/2 handshake failed: {e}")))?;

        let driver = tokio::spawn(async move {
            if let Err(err) = connection.await {
                debug!(error = %err, "downstream connection terminated");
            }
        });

        Ok(Self {
            sender,
            driver: Some(driver),
            scheme: Scheme::HTTP,
            authority,
        })
    }

    /// Wrap a sender whose connection is driven elsewhere (e.g. a pool)
    pub fn from_parts(sender: SendRequest<Bytes>, authority: Authority) -> Self {
        Self {
            sender,
            driver: None,
            scheme: Scheme::HTTP,
            authority,
        }
    }

    /// Override the scheme sent in `:scheme` (defaults to `http`)
    pub fn with_scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    pub(crate) fn sender(&self) -> SendRequest<Bytes> {
        self.sender.clone()
    }
}

impl Drop for DownstreamConnection {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

impl fmt::Debug for DownstreamConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownstreamConnection")
            .field("scheme", &self.scheme)
            .field("authority", &self.authority)
            .field("owns_driver", &self.driver.is_some())
            .finish()
    }
}

/// Resolved target: one `open` operation, shared read-only by all requests
#[derive(Clone)]
pub struct Connector {
    open: SessionFactory,
}

impl Connector {
    /// Resolve a target, validating addresses up front
    pub fn new(target: Target) -> Result<Self, ProxyError> {
        let open: SessionFactory = match target {
            Target::Factory(factory) => factory,
            Target::Address(address) => {
                let address = Arc::new(parse_address(&address)?);
                Arc::new(move || {
                    let address = Arc::clone(&address);
                    Box::pin(async move { connect_tcp(&address).await }) as BoxFuture<_>
                })
            }
        };
        Ok(Self { open })
    }

    /// Open a new downstream connection
    pub fn open(&self) -> BoxFuture<Result<DownstreamConnection, ProxyError>> {
        (self.open)()
    }
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector").finish_non_exhaustive()
    }
}

/// A validated plaintext address
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TargetAddress {
    host: String,
    port: u16,
    authority: Authority,
}

pub(crate) fn parse_address(address: &str) -> Result<TargetAddress, ProxyError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(ProxyError::Configuration(
            "Please specify the gRPC server address.".to_string(),
        ));
    }

    let uri: Uri = address
        .parse()
        .map_err(|e| ProxyError::Configuration(format!("Invalid gRPC server address {address:?}: {e}")))?;

    match uri.scheme_str() {
        None | Some("http") => {}
        Some("https") => {
            return Err(ProxyError::Configuration(format!(
                "TLS targets need a connection factory: {address}"
            )))
        }
        Some(other) => {
            return Err(ProxyError::Configuration(format!(
                "Unsupported scheme {other:?} in gRPC server address"
            )))
        }
    }

    let authority = uri.authority().cloned().ok_or_else(|| {
        ProxyError::Configuration(format!("Missing host in gRPC server address {address:?}"))
    })?;
    let host = authority
        .host()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();
    let port = authority.port_u16().unwrap_or(80);

    Ok(TargetAddress {
        host,
        port,
        authority,
    })
}

async fn connect_tcp(address: &TargetAddress) -> Result<DownstreamConnection, ProxyError> {
    let stream = TcpStream::connect((address.host.as_str(), address.port))
        .await
        .map_err(|e| {
            ProxyError::Connect(format!("{}:{}: {e}", address.host, address.port))
        })?;
    let _ = stream.set_nodelay(true);
    DownstreamConnection::handshake(stream, address.authority.clone()).await
}
