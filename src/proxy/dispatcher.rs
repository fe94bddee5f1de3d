//! Request dispatcher with endpoint rotation and retry
//!
//! Executes one logical request through the rotating pool. Each attempt goes
//! through a freshly selected endpoint; transport failures are charged to that
//! endpoint and retried elsewhere until the retry budget runs out.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::RotationConfig;
use crate::error::{Result, RotaError};
use crate::models::{DispatchRequest, DispatchResponse, PoolStats, ProxyEndpoint};
use crate::proxy::health::HealthTracker;
use crate::proxy::pool::EndpointPool;
use crate::proxy::rotation::{create_selector, ProxySelector};
use crate::proxy::transport::{HttpTransport, ProxyRoute};

/// Dispatches requests through the endpoint pool
///
/// One dispatcher owns one pool; every surface built on it shares the same
/// rotation and health state.
pub struct RequestDispatcher {
    config: RotationConfig,
    selector: Arc<dyn ProxySelector>,
    tracker: Arc<HealthTracker>,
    transport: Arc<dyn HttpTransport>,
}

impl RequestDispatcher {
    /// Build the pool, selector and tracker described by `config`
    pub fn new(config: RotationConfig, transport: Arc<dyn HttpTransport>) -> Result<Self> {
        let pool = Arc::new(EndpointPool::new(&config)?);
        let selector = create_selector(config.strategy, pool.clone());
        let tracker = Arc::new(HealthTracker::new(pool, config.unhealthy_threshold));

        info!(
            "Dispatcher ready: {} endpoints on {} ({}), strategy {}, max retries {}",
            selector.pool().len(),
            config.host,
            config.protocol,
            selector.strategy_name(),
            config.max_retries
        );

        Ok(Self {
            config,
            selector,
            tracker,
            transport,
        })
    }

    pub fn config(&self) -> &RotationConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<EndpointPool> {
        self.selector.pool()
    }

    pub fn selector(&self) -> &Arc<dyn ProxySelector> {
        &self.selector
    }

    pub fn tracker(&self) -> &Arc<HealthTracker> {
        &self.tracker
    }

    pub fn transport(&self) -> &Arc<dyn HttpTransport> {
        &self.transport
    }

    /// Current per-endpoint statistics
    pub fn stats(&self) -> PoolStats {
        self.tracker.stats()
    }

    /// Reset usage and health of every endpoint
    pub fn reset_stats(&self) {
        self.tracker.reset();
    }

    /// Dispatch a request, retrying on transport failures
    pub async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchResponse> {
        self.dispatch_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Dispatch a request, giving up with `Cancelled` as soon as `cancel` fires
    #[instrument(skip(self, request, cancel), fields(method = %request.method, url = %request.url))]
    pub async fn dispatch_with_cancel(
        &self,
        request: DispatchRequest,
        cancel: &CancellationToken,
    ) -> Result<DispatchResponse> {
        let start = Instant::now();
        let max_attempts = self.config.max_retries + 1;
        let delay = self.config.retry_delay();
        let mut tried: Vec<ProxyEndpoint> = Vec::new();
        let mut attempts = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(RotaError::Cancelled);
            }

            let endpoint = self.next_endpoint(&tried)?;
            tried.push(endpoint.clone());
            attempts += 1;

            debug!(
                port = endpoint.port,
                attempt = attempts,
                max_attempts,
                "Dispatching through {}",
                endpoint
            );

            let route = ProxyRoute::from_config(endpoint.clone(), &self.config);
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RotaError::Cancelled),
                result = self.transport.execute(&route, &request) => result,
            };

            let err = match outcome {
                Ok(mut response) => {
                    self.tracker.report_success(&endpoint)?;
                    response.attempts = attempts;
                    debug!(
                        port = endpoint.port,
                        status = response.status.as_u16(),
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Request succeeded after {} attempt(s)",
                        attempts
                    );
                    return Ok(response);
                }
                Err(e) if e.is_transport_failure() => e,
                // Anything else is the caller's problem, not the endpoint's
                Err(e) => return Err(e),
            };

            self.tracker.report_failure(&endpoint)?;
            warn!(
                port = endpoint.port,
                error = %err,
                "Request through {} failed (attempt {}/{})",
                endpoint,
                attempts,
                max_attempts
            );

            if attempts >= max_attempts {
                error!(
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "All {} attempts failed", attempts
                );
                return Err(RotaError::RetryExhausted {
                    attempts,
                    tried,
                    source: Box::new(err),
                });
            }

            if !delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(RotaError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    /// Dispatch every request concurrently; results keep the input order
    pub async fn dispatch_all(
        &self,
        requests: Vec<DispatchRequest>,
    ) -> Vec<Result<DispatchResponse>> {
        futures::future::join_all(requests.into_iter().map(|request| self.dispatch(request)))
            .await
    }

    /// First attempt follows plain rotation; retries prefer healthy endpoints
    /// not yet tried by this dispatch
    fn next_endpoint(&self, tried: &[ProxyEndpoint]) -> Result<ProxyEndpoint> {
        if tried.is_empty() {
            return self.selector.next();
        }

        self.selector
            .next_matching(&|endpoint, state| state.healthy && !tried.contains(endpoint))
    }
}
