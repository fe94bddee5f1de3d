//! Rota Dispatch - Outbound Proxy Rotation
//!
//! Spreads outgoing HTTP and GraphQL requests across a pool of upstream proxy
//! endpoints running on one host over a contiguous port range.
//!
//! ## Features
//!
//! - Never-used-first, then least-recently-used endpoint rotation (round-robin optional)
//! - Per-endpoint failure counting with an advisory health flag
//! - Automatic retry on a different endpoint with a bounded budget and delay
//! - Cancellable dispatch and concurrent batch dispatch
//! - HTTP, HTTPS, SOCKS4 and SOCKS5 upstream proxies
//! - Request-builder client and bare request callable sharing one pool

pub mod config;
pub mod error;
pub mod models;
pub mod proxy;

pub use config::{Config, RotationConfig};
pub use error::{Result, RotaError};
pub use models::{DispatchRequest, DispatchResponse, PoolStats, ProxyEndpoint, RequestOptions};
pub use proxy::{request_fn, RequestDispatcher, RotatingClient};
