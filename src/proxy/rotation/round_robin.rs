//! Round-robin endpoint selection strategy

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::debug;

use super::{candidate_indices, EndpointFilter, ProxySelector};
use crate::error::Result;
use crate::models::ProxyEndpoint;
use crate::proxy::pool::EndpointPool;

/// Cycles through endpoints in port order
///
/// The cursor only advances under the pool's selection lock.
pub struct RoundRobinSelector {
    pool: Arc<EndpointPool>,
    cursor: AtomicUsize,
}

impl RoundRobinSelector {
    pub fn new(pool: Arc<EndpointPool>) -> Self {
        Self {
            pool,
            cursor: AtomicUsize::new(0),
        }
    }
}

impl ProxySelector for RoundRobinSelector {
    fn next_matching(&self, filter: EndpointFilter<'_>) -> Result<ProxyEndpoint> {
        let endpoints = self.pool.all_endpoints();
        let len = endpoints.len();

        let endpoint = self.pool.select_with(|states| {
            let candidates = candidate_indices(endpoints, states, filter);
            let cursor = self.cursor.load(Ordering::Relaxed) % len;

            // First candidate at or after the cursor, wrapping around
            let idx = candidates
                .iter()
                .copied()
                .find(|&idx| idx >= cursor)
                .or_else(|| candidates.first().copied())?;

            self.cursor.store((idx + 1) % len, Ordering::Relaxed);
            Some(idx)
        })?;

        debug!(port = endpoint.port, "Selected round-robin endpoint");
        Ok(endpoint)
    }

    fn pool(&self) -> &Arc<EndpointPool> {
        &self.pool
    }

    fn strategy_name(&self) -> &'static str {
        "round_robin"
    }
}
