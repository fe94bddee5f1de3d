//! Outbound proxy rotation
//!
//! This module provides the rotation layer including:
//! - The fixed endpoint pool derived from a host and port range
//! - Rotation strategies for choosing the next endpoint
//! - Health tracking and active probing
//! - Request dispatch with retry across endpoints
//! - Client surfaces over the dispatcher

pub mod client;
pub mod dispatcher;
pub mod health;
pub mod pool;
pub mod rotation;
pub mod transport;

pub use client::{request_fn, RequestBuilder, RequestFn, RotatingClient};
pub use dispatcher::RequestDispatcher;
pub use health::{HealthCheckSummary, HealthProbe, HealthTracker};
pub use pool::EndpointPool;
pub use rotation::{create_selector, ProxySelector, RotationStrategy};
pub use transport::{HttpTransport, ProxyRoute, ReqwestTransport};
