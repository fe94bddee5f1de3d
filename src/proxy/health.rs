//! Health tracking for proxy endpoints
//!
//! Health is an advisory flag derived from consecutive failures. It never
//! removes an endpoint from rotation; the dispatcher uses it to prefer healthy
//! endpoints when retrying.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::config::{
    ClientConfig, RotationConfig, DEFAULT_HEALTHCHECK_WORKERS, DEFAULT_REQUEST_TIMEOUT_SECS,
    DEFAULT_UNHEALTHY_THRESHOLD,
};
use crate::error::Result;
use crate::models::{DispatchRequest, EndpointSnapshot, PoolStats, ProxyEndpoint};
use crate::proxy::pool::EndpointPool;
use crate::proxy::transport::{HttpTransport, ProxyRoute};

/// Records request outcomes per endpoint
pub struct HealthTracker {
    pool: Arc<EndpointPool>,
    threshold: u32,
}

impl HealthTracker {
    pub fn new(pool: Arc<EndpointPool>, threshold: u32) -> Self {
        Self {
            pool,
            threshold: threshold.max(1),
        }
    }

    pub fn with_default_threshold(pool: Arc<EndpointPool>) -> Self {
        Self::new(pool, DEFAULT_UNHEALTHY_THRESHOLD)
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Clear the endpoint's failure count and mark it healthy
    pub fn report_success(&self, endpoint: &ProxyEndpoint) -> Result<()> {
        let recovered = self.pool.with_state(endpoint, |state| {
            let recovered = !state.healthy;
            state.failure_count = 0;
            state.healthy = true;
            recovered
        })?;

        if recovered {
            info!(port = endpoint.port, "Endpoint {} recovered", endpoint);
        }
        Ok(())
    }

    /// Count a failure; flips the endpoint unhealthy once the threshold is reached
    ///
    /// Returns the endpoint's consecutive failure count.
    pub fn report_failure(&self, endpoint: &ProxyEndpoint) -> Result<u32> {
        let threshold = self.threshold;
        let (failures, flipped) = self.pool.with_state(endpoint, |state| {
            state.failure_count = state.failure_count.saturating_add(1);
            let flipped = state.healthy && state.failure_count >= threshold;
            if flipped {
                state.healthy = false;
            }
            (state.failure_count, flipped)
        })?;

        if flipped {
            warn!(
                port = endpoint.port,
                failures, "Endpoint {} marked unhealthy", endpoint
            );
        } else {
            debug!(port = endpoint.port, failures, "Recorded failure for {}", endpoint);
        }
        Ok(failures)
    }

    /// Whether the endpoint is currently healthy; unknown endpoints are not
    pub fn is_healthy(&self, endpoint: &ProxyEndpoint) -> bool {
        self.pool
            .with_state(endpoint, |state| state.healthy)
            .unwrap_or(false)
    }

    /// Endpoints currently healthy, ascending by port
    pub fn healthy_endpoints(&self) -> Vec<ProxyEndpoint> {
        self.pool
            .snapshot()
            .into_iter()
            .filter(|s| s.is_healthy)
            .map(|s| s.endpoint())
            .collect()
    }

    pub fn snapshot(&self) -> Vec<EndpointSnapshot> {
        self.pool.snapshot()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats::from_snapshots(self.pool.snapshot())
    }

    /// Reset every endpoint to never used, zero failures, healthy
    pub fn reset(&self) {
        self.pool.reset_all();
    }
}

/// Outcome of one active health check round
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HealthCheckSummary {
    pub checked: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub duration_ms: u64,
}

/// Actively probes every endpoint with a request to a known URL
pub struct HealthProbe {
    tracker: Arc<HealthTracker>,
    transport: Arc<dyn HttpTransport>,
    rotation: RotationConfig,
    check_url: String,
    check_timeout: Duration,
    workers: usize,
}

impl HealthProbe {
    pub fn new(
        tracker: Arc<HealthTracker>,
        transport: Arc<dyn HttpTransport>,
        rotation: RotationConfig,
        check_url: impl Into<String>,
    ) -> Self {
        Self {
            tracker,
            transport,
            rotation,
            check_url: check_url.into(),
            check_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            workers: DEFAULT_HEALTHCHECK_WORKERS,
        }
    }

    /// Probe configured by the client settings: check URL, request timeout and worker count
    pub fn from_config(
        tracker: Arc<HealthTracker>,
        transport: Arc<dyn HttpTransport>,
        rotation: RotationConfig,
        client: &ClientConfig,
    ) -> Self {
        Self::new(tracker, transport, rotation, client.healthcheck_url.clone())
            .with_timeout(client.request_timeout())
            .with_workers(client.healthcheck_workers)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout = timeout;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Probe every endpoint once and record the outcomes
    ///
    /// Probes do not count as rotation usage.
    #[instrument(skip(self, endpoints), fields(check_url = %self.check_url))]
    pub async fn check_all(&self, endpoints: &[ProxyEndpoint]) -> Result<HealthCheckSummary> {
        let start = Instant::now();
        let request = DispatchRequest::get(&self.check_url)?.timeout(self.check_timeout);

        info!("Checking health of {} endpoints", endpoints.len());

        let results = futures::stream::iter(endpoints.iter().cloned())
            .map(|endpoint| self.check_endpoint(endpoint, &request))
            .buffer_unordered(self.workers)
            .collect::<Vec<bool>>()
            .await;

        let healthy = results.iter().filter(|&&v| v).count();
        let summary = HealthCheckSummary {
            checked: results.len(),
            healthy,
            unhealthy: results.len() - healthy,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            "Health check complete: {} healthy, {} unhealthy",
            summary.healthy, summary.unhealthy
        );
        Ok(summary)
    }

    /// Probe one endpoint; returns whether the probe went through
    async fn check_endpoint(&self, endpoint: ProxyEndpoint, request: &DispatchRequest) -> bool {
        let route = ProxyRoute::from_config(endpoint, &self.rotation);

        let outcome = match self.transport.execute(&route, request).await {
            Ok(response) => {
                debug!(
                    port = route.endpoint.port,
                    status = response.status.as_u16(),
                    "Probe through {} succeeded",
                    route.endpoint
                );
                self.tracker.report_success(&route.endpoint).map(|_| true)
            }
            Err(e) => {
                warn!(port = route.endpoint.port, error = %e, "Probe through {} failed", route.endpoint);
                self.tracker.report_failure(&route.endpoint).map(|_| false)
            }
        };

        outcome.unwrap_or_else(|e| {
            warn!("Failed to record probe outcome for {}: {}", route.endpoint, e);
            false
        })
    }
}
