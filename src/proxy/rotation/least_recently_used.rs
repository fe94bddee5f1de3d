//! Least-recently-used endpoint selection strategy

use std::sync::Arc;

use tracing::debug;

use super::{candidate_indices, EndpointFilter, ProxySelector};
use crate::error::Result;
use crate::models::ProxyEndpoint;
use crate::proxy::pool::EndpointPool;

/// Selects never-used endpoints first, then the least recently used one
///
/// Never-used endpoints are taken in ascending port order, so the first N
/// selections over a pool of N cover every endpoint exactly once. After that
/// the endpoint with the oldest use wins, which continues the cycle in the
/// same order.
pub struct LeastRecentlyUsedSelector {
    pool: Arc<EndpointPool>,
}

impl LeastRecentlyUsedSelector {
    pub fn new(pool: Arc<EndpointPool>) -> Self {
        Self { pool }
    }
}

impl ProxySelector for LeastRecentlyUsedSelector {
    fn next_matching(&self, filter: EndpointFilter<'_>) -> Result<ProxyEndpoint> {
        let endpoints = self.pool.all_endpoints();

        let endpoint = self.pool.select_with(|states| {
            let candidates = candidate_indices(endpoints, states, filter);

            // Never-used candidates come first, in port order
            if let Some(&idx) = candidates.iter().find(|&&idx| states[idx].is_never_used()) {
                return Some(idx);
            }

            candidates
                .into_iter()
                .min_by_key(|&idx| states[idx].last_used_seq)
        })?;

        debug!(port = endpoint.port, "Selected least recently used endpoint");
        Ok(endpoint)
    }

    fn pool(&self) -> &Arc<EndpointPool> {
        &self.pool
    }

    fn strategy_name(&self) -> &'static str {
        "least_recently_used"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RotationConfig;
    use std::collections::HashSet;

    fn create_selector(start: u16, end: u16) -> LeastRecentlyUsedSelector {
        let pool = EndpointPool::new(&RotationConfig::new("127.0.0.1", start, end)).unwrap();
        LeastRecentlyUsedSelector::new(Arc::new(pool))
    }

    #[test]
    fn test_first_n_calls_cover_pool_in_port_order() {
        let selector = create_selector(9000, 9004);

        let ports: Vec<u16> = (0..5).map(|_| selector.next().unwrap().port).collect();
        assert_eq!(ports, vec![9000, 9001, 9002, 9003, 9004]);
    }

    #[test]
    fn test_call_after_full_coverage_returns_lru() {
        let selector = create_selector(9000, 9002);

        for _ in 0..3 {
            selector.next().unwrap();
        }

        // Should continue 9000, 9001, 9002, 9000...
        assert_eq!(selector.next().unwrap().port, 9000);
        assert_eq!(selector.next().unwrap().port, 9001);
        assert_eq!(selector.next().unwrap().port, 9002);
        assert_eq!(selector.next().unwrap().port, 9000);
    }

    #[test]
    fn test_single_endpoint_repeats() {
        let selector = create_selector(9000, 9000);
        assert_eq!(selector.next().unwrap().port, 9000);
        assert_eq!(selector.next().unwrap().port, 9000);
    }

    #[test]
    fn test_next_ignores_health() {
        let selector = create_selector(9000, 9001);
        let first = selector.pool().all_endpoints()[0].clone();
        selector
            .pool()
            .with_state(&first, |s| {
                s.failure_count = 10;
                s.healthy = false;
            })
            .unwrap();

        assert_eq!(selector.next().unwrap(), first);
    }

    #[test]
    fn test_never_used_endpoint_preferred_after_reset() {
        let selector = create_selector(9000, 9002);
        selector.next().unwrap();
        selector.next().unwrap();

        selector.pool().reset_all();
        assert_eq!(selector.next().unwrap().port, 9000);
    }

    #[test]
    fn test_next_matching_skips_filtered() {
        let selector = create_selector(9000, 9003);
        let tried: HashSet<u16> = [9000, 9001].into_iter().collect();

        let picked = selector
            .next_matching(&|endpoint, state| state.healthy && !tried.contains(&endpoint.port))
            .unwrap();
        assert_eq!(picked.port, 9002);

        // Filtered-out endpoints remain never used
        assert!(selector
            .pool()
            .state_of(&selector.pool().all_endpoints()[0])
            .unwrap()
            .is_never_used());
    }

    #[test]
    fn test_next_matching_falls_back_when_nothing_passes() {
        let selector = create_selector(9000, 9001);
        let picked = selector.next_matching(&|_, _| false).unwrap();
        assert_eq!(picked.port, 9000);
    }

    #[test]
    fn test_concurrent_selection_assigns_distinct_endpoints() {
        let selector = Arc::new(create_selector(9000, 9009));

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let selector = selector.clone();
                std::thread::spawn(move || selector.next().unwrap())
            })
            .collect();

        let picked: HashSet<ProxyEndpoint> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(picked.len(), 5);

        let used = selector
            .pool()
            .snapshot()
            .iter()
            .filter(|s| s.last_used_at.is_some())
            .count();
        assert_eq!(used, 5);
    }
}
