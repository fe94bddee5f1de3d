use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RotaError};

/// Proxy protocol type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    #[default]
    Http,
    Https,
    Socks4,
    Socks5,
}

impl ProxyProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyProtocol::Http => "http",
            ProxyProtocol::Https => "https",
            ProxyProtocol::Socks4 => "socks4",
            ProxyProtocol::Socks5 => "socks5",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "http" => Some(ProxyProtocol::Http),
            "https" => Some(ProxyProtocol::Https),
            "socks4" => Some(ProxyProtocol::Socks4),
            "socks5" | "socks5h" => Some(ProxyProtocol::Socks5),
            _ => None,
        }
    }

    /// Parse a protocol name, rejecting anything unknown
    pub fn parse(s: &str) -> Result<Self> {
        Self::from_str(s).ok_or_else(|| RotaError::UnsupportedProtocol(s.to_string()))
    }

    /// URL scheme used when handing the endpoint to the HTTP client.
    ///
    /// SOCKS5 resolves target hostnames on the proxy side.
    pub fn url_scheme(&self) -> &'static str {
        match self {
            ProxyProtocol::Http => "http",
            ProxyProtocol::Https => "https",
            ProxyProtocol::Socks4 => "socks4",
            ProxyProtocol::Socks5 => "socks5h",
        }
    }

    pub fn is_socks(&self) -> bool {
        matches!(self, ProxyProtocol::Socks4 | ProxyProtocol::Socks5)
    }
}

impl std::fmt::Display for ProxyProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Credentials presented to every endpoint in the pool
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct ProxyCredentials {
    pub username: String,
    pub password: String,
}

impl ProxyCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for ProxyCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One upstream proxy process, identified by its (host, port) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProxyEndpoint {
    pub host: String,
    pub port: u16,
}

impl ProxyEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host:port`, bracketing bare IPv6 hosts
    pub fn authority(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl std::fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.authority())
    }
}

/// Mutable bookkeeping for one endpoint, owned by the pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointState {
    /// Wall-clock time of the last selection
    pub last_used_at: Option<DateTime<Utc>>,
    /// Consecutive failures since the last success or reset
    pub failure_count: u32,
    pub healthy: bool,
    /// Monotonic selection sequence; orders least-recently-used even when
    /// two selections share a timestamp
    pub(crate) last_used_seq: Option<u64>,
}

impl EndpointState {
    pub fn is_never_used(&self) -> bool {
        self.last_used_seq.is_none()
    }

    pub(crate) fn mark_used(&mut self, seq: u64) {
        self.last_used_at = Some(Utc::now());
        self.last_used_seq = Some(seq);
    }
}

impl Default for EndpointState {
    fn default() -> Self {
        Self {
            last_used_at: None,
            failure_count: 0,
            healthy: true,
            last_used_seq: None,
        }
    }
}

/// Point-in-time view of one endpoint for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSnapshot {
    pub host: String,
    pub port: u16,
    pub last_used_at: Option<DateTime<Utc>>,
    pub failure_count: u32,
    pub is_healthy: bool,
}

impl EndpointSnapshot {
    pub fn new(endpoint: &ProxyEndpoint, state: &EndpointState) -> Self {
        Self {
            host: endpoint.host.clone(),
            port: endpoint.port,
            last_used_at: state.last_used_at,
            failure_count: state.failure_count,
            is_healthy: state.healthy,
        }
    }

    pub fn endpoint(&self) -> ProxyEndpoint {
        ProxyEndpoint::new(self.host.clone(), self.port)
    }
}
