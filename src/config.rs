use crate::error::{Result, RotaError};
use crate::models::{ProxyCredentials, ProxyEndpoint, ProxyProtocol};
use crate::proxy::rotation::RotationStrategy;
use std::env;
use std::time::Duration;

/// Consecutive failures after which an endpoint is flagged unhealthy
pub const DEFAULT_UNHEALTHY_THRESHOLD: u32 = 3;

pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Concurrent probes during a health check round
pub const DEFAULT_HEALTHCHECK_WORKERS: usize = 4;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Endpoint pool and retry policy
    pub rotation: RotationConfig,
    /// HTTP client configuration
    pub client: ClientConfig,
    /// Logging configuration
    pub log: LogConfig,
}

/// Base proxy configuration the endpoint pool is derived from
#[derive(Debug, Clone, PartialEq)]
pub struct RotationConfig {
    /// Host every proxy process listens on
    pub host: String,
    /// First port of the pool
    pub port_range_start: u16,
    /// Last port of the pool (inclusive)
    pub port_range_end: u16,
    /// Retries after the first attempt; a dispatch makes at most `max_retries + 1` attempts
    pub max_retries: u32,
    /// Delay between attempts in milliseconds
    pub retry_delay_ms: u64,
    /// Optional credentials presented to every endpoint
    pub credentials: Option<ProxyCredentials>,
    /// Protocol spoken by the proxy processes
    pub protocol: ProxyProtocol,
    /// Consecutive failures before an endpoint is flagged unhealthy
    pub unhealthy_threshold: u32,
    /// Endpoint selection strategy
    pub strategy: RotationStrategy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Connection timeout in seconds
    pub connect_timeout: u64,
    /// Request timeout in seconds
    pub request_timeout: u64,
    /// URL fetched through each endpoint by the active health probe
    pub healthcheck_url: String,
    /// Concurrent probes during a health check round
    pub healthcheck_workers: usize,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let credentials = match (
            env::var("ROTA_PROXY_USERNAME").ok().filter(|s| !s.is_empty()),
            env::var("ROTA_PROXY_PASSWORD").ok(),
        ) {
            (Some(username), Some(password)) => Some(ProxyCredentials::new(username, password)),
            (Some(_), None) => {
                return Err(RotaError::InvalidConfig(
                    "ROTA_PROXY_USERNAME requires ROTA_PROXY_PASSWORD".into(),
                ))
            }
            (None, _) => None,
        };

        let protocol = ProxyProtocol::from_str(&get_env_or("ROTA_PROXY_PROTOCOL", "http"))
            .ok_or_else(|| {
                RotaError::InvalidConfig(
                    "ROTA_PROXY_PROTOCOL must be one of http, https, socks4, socks5".into(),
                )
            })?;

        let rotation = RotationConfig {
            host: get_env_or("ROTA_PROXY_HOST", "127.0.0.1"),
            port_range_start: parse_env("ROTA_PROXY_PORT_START", "10000", "a valid port number")?,
            port_range_end: parse_env("ROTA_PROXY_PORT_END", "10009", "a valid port number")?,
            max_retries: parse_env("ROTA_MAX_RETRIES", "3", "a non-negative integer")?,
            retry_delay_ms: parse_env("ROTA_RETRY_DELAY_MS", "1000", "a non-negative integer")?,
            credentials,
            protocol,
            unhealthy_threshold: parse_env(
                "ROTA_UNHEALTHY_THRESHOLD",
                "3",
                "a positive integer",
            )?,
            strategy: RotationStrategy::from_str(&get_env_or(
                "ROTA_ROTATION_STRATEGY",
                "least_recently_used",
            )),
        };
        rotation.validate()?;

        let client = ClientConfig {
            connect_timeout: parse_env("ROTA_CONNECT_TIMEOUT", "10", "a positive integer")?,
            request_timeout: parse_env("ROTA_REQUEST_TIMEOUT", "30", "a positive integer")?,
            healthcheck_url: get_env_or("ROTA_HEALTHCHECK_URL", "http://www.google.com"),
            healthcheck_workers: parse_env("ROTA_HEALTHCHECK_WORKERS", "4", "a positive integer")?,
        };
        client.validate()?;

        Ok(Config {
            rotation,
            client,
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        })
    }
}

impl RotationConfig {
    pub fn new(host: impl Into<String>, port_range_start: u16, port_range_end: u16) -> Self {
        Self {
            host: host.into(),
            port_range_start,
            port_range_end,
            max_retries: 3,
            retry_delay_ms: 1000,
            credentials: None,
            protocol: ProxyProtocol::Http,
            unhealthy_threshold: DEFAULT_UNHEALTHY_THRESHOLD,
            strategy: RotationStrategy::LeastRecentlyUsed,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay_ms(mut self, retry_delay_ms: u64) -> Self {
        self.retry_delay_ms = retry_delay_ms;
        self
    }

    pub fn with_credentials(mut self, credentials: ProxyCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_protocol(mut self, protocol: ProxyProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_unhealthy_threshold(mut self, threshold: u32) -> Self {
        self.unhealthy_threshold = threshold;
        self
    }

    pub fn with_strategy(mut self, strategy: RotationStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Reject configurations that cannot produce a usable pool
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(RotaError::InvalidConfig("proxy host must not be empty".into()));
        }
        if self.port_range_start == 0 {
            return Err(RotaError::InvalidConfig("port 0 is not a valid proxy port".into()));
        }
        if self.port_range_end < self.port_range_start {
            return Err(RotaError::InvalidConfig(format!(
                "empty port range {}-{}: end must be >= start",
                self.port_range_start, self.port_range_end
            )));
        }
        if self.unhealthy_threshold == 0 {
            return Err(RotaError::InvalidConfig(
                "unhealthy threshold must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Endpoints described by this configuration, ascending by port
    pub fn endpoints(&self) -> Vec<ProxyEndpoint> {
        (self.port_range_start..=self.port_range_end)
            .map(|port| ProxyEndpoint::new(self.host.clone(), port))
            .collect()
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout == 0 {
            return Err(RotaError::InvalidConfig(
                "Connect timeout must be at least one second".into(),
            ));
        }
        if self.request_timeout == 0 {
            return Err(RotaError::InvalidConfig(
                "Request timeout must be at least one second".into(),
            ));
        }
        if self.healthcheck_workers == 0 {
            return Err(RotaError::InvalidConfig(
                "Health check needs at least one worker".into(),
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_SECS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT_SECS,
            healthcheck_url: "http://www.google.com".to_string(),
            healthcheck_workers: DEFAULT_HEALTHCHECK_WORKERS,
        }
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable, reporting `expected` when it does not parse
fn parse_env<T: std::str::FromStr>(key: &str, default: &str, expected: &str) -> Result<T> {
    get_env_or(key, default)
        .trim()
        .parse()
        .map_err(|_| RotaError::InvalidConfig(format!("{} must be {}", key, expected)))
}
