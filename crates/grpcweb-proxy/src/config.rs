//! Proxy configuration, loadable from a JSON file

use crate::cors::CorsConfig;
use crate::error::ProxyError;
use crate::proxy::DEFAULT_BUFFER;
use serde::{Deserialize, Deserializer, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;

pub const MISSING_TARGET: &str = "Please specify the gRPC server address. --target <address>.";
pub const MISSING_LISTEN: &str = "Please specify a port for the proxy server. --listen <number>";

/// Proxy configuration
///
/// ```json
/// {
///   "target": "http://localhost:9090",
///   "listen": 8080,
///   "origin": "https://app.example.com",
///   "headers": ["x-request-id"]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Address of the gRPC server
    pub target: Option<String>,
    /// Port, or `host:port`, to accept gRPC-Web requests on
    #[serde(deserialize_with = "port_or_address")]
    pub listen: Option<String>,
    /// Fixed CORS origin
    pub origin: Option<String>,
    /// Extra headers exposed to browsers
    #[serde(deserialize_with = "list_or_string")]
    pub headers: Vec<String>,
    /// Per-request channel capacity
    pub buffer: Option<usize>,
}

impl ProxyConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ProxyError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::Configuration(format!("failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            ProxyError::Configuration(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Overlay `other` on top of `self`; set fields in `other` win
    pub fn merge(mut self, other: ProxyConfig) -> Self {
        if other.target.is_some() {
            self.target = other.target;
        }
        if other.listen.is_some() {
            self.listen = other.listen;
        }
        if other.origin.is_some() {
            self.origin = other.origin;
        }
        if !other.headers.is_empty() {
            self.headers = other.headers;
        }
        if other.buffer.is_some() {
            self.buffer = other.buffer;
        }
        self
    }

    /// Check that a target and a listen address are present
    pub fn validate(&self) -> Result<(), ProxyError> {
        if self.target.as_deref().map_or(true, |t| t.trim().is_empty()) {
            return Err(ProxyError::Configuration(MISSING_TARGET.to_string()));
        }
        if self.listen.as_deref().map_or(true, |l| l.trim().is_empty()) {
            return Err(ProxyError::Configuration(MISSING_LISTEN.to_string()));
        }
        Ok(())
    }

    /// Socket address to bind; a bare port binds all interfaces
    pub fn listen_addr(&self) -> Result<SocketAddr, ProxyError> {
        let listen = self
            .listen
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .ok_or_else(|| ProxyError::Configuration(MISSING_LISTEN.to_string()))?;

        if let Ok(port) = listen.parse::<u16>() {
            return Ok(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)));
        }
        listen
            .parse()
            .map_err(|_| ProxyError::Configuration(format!("invalid listen address: {}", listen)))
    }

    pub fn buffer(&self) -> usize {
        self.buffer.unwrap_or(DEFAULT_BUFFER)
    }

    /// CORS settings derived from `origin` and `headers`
    pub fn cors(&self) -> CorsConfig {
        let mut cors = CorsConfig::new().expose_headers(self.headers.iter().cloned());
        if let Some(origin) = &self.origin {
            cors = cors.origin(origin.clone());
        }
        cors
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PortOrAddress {
    Port(u16),
    Address(String),
}

fn port_or_address<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(
        Option::<PortOrAddress>::deserialize(deserializer)?.map(|value| match value {
            PortOrAddress::Port(port) => port.to_string(),
            PortOrAddress::Address(address) => address,
        }),
    )
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ListOrString {
    List(Vec<String>),
    String(String),
}

fn list_or_string<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<ListOrString>::deserialize(deserializer)? {
        Some(ListOrString::List(list)) => list,
        Some(ListOrString::String(joined)) => vec![joined],
        None => Vec::new(),
    })
}
