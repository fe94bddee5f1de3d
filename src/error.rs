use thiserror::Error;

use crate::models::ProxyEndpoint;

/// Unified error type for rota-dispatch
#[derive(Error, Debug)]
pub enum RotaError {
    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unsupported proxy protocol: {0}")]
    UnsupportedProtocol(String),

    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Transport errors
    #[error("Proxy connection failed: {0}")]
    ProxyConnectionFailed(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("HTTP error: {0}")]
    Http(String),

    // Dispatch errors
    #[error("No proxy endpoints available")]
    NoEndpointsAvailable,

    #[error("Endpoint not in pool: {0}")]
    UnknownEndpoint(String),

    #[error(
        "All {attempts} attempts failed (tried {}): {source}",
        format_tried(.tried)
    )]
    RetryExhausted {
        attempts: u32,
        tried: Vec<ProxyEndpoint>,
        #[source]
        source: Box<RotaError>,
    },

    #[error("Request cancelled")]
    Cancelled,

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for rota-dispatch operations
pub type Result<T> = std::result::Result<T, RotaError>;

impl RotaError {
    /// Whether this error came from the network path through an endpoint.
    ///
    /// Only transport failures count against an endpoint's health and
    /// trigger a retry on a different endpoint.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            RotaError::ProxyConnectionFailed(_)
                | RotaError::Timeout
                | RotaError::Http(_)
                | RotaError::Io(_)
        )
    }

    /// Whether this error is a construction-time configuration problem
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            RotaError::InvalidConfig(_) | RotaError::UnsupportedProtocol(_)
        )
    }

    /// Endpoints tried before giving up, empty for anything but `RetryExhausted`
    pub fn tried_endpoints(&self) -> &[ProxyEndpoint] {
        match self {
            RotaError::RetryExhausted { tried, .. } => tried,
            _ => &[],
        }
    }
}

fn format_tried(tried: &[ProxyEndpoint]) -> String {
    tried
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

// Convert from reqwest errors
impl From<reqwest::Error> for RotaError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RotaError::Timeout
        } else if err.is_connect() {
            RotaError::ProxyConnectionFailed(err.to_string())
        } else if err.is_builder() {
            RotaError::InvalidRequest(err.to_string())
        } else {
            RotaError::Http(err.to_string())
        }
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for RotaError {
    fn from(err: url::ParseError) -> Self {
        RotaError::InvalidRequest(format!("Invalid URL: {}", err))
    }
}
