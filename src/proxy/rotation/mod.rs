//! Endpoint rotation strategies
//!
//! This module provides the strategies for choosing the next endpoint from the pool.

mod least_recently_used;
mod round_robin;

pub use least_recently_used::LeastRecentlyUsedSelector;
pub use round_robin::RoundRobinSelector;

use std::sync::Arc;

use crate::error::Result;
use crate::models::{EndpointState, ProxyEndpoint};
use crate::proxy::pool::EndpointPool;

/// Strategy types for endpoint rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationStrategy {
    #[default]
    LeastRecentlyUsed,
    RoundRobin,
}

impl RotationStrategy {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "round_robin" | "roundrobin" | "round-robin" => Self::RoundRobin,
            _ => Self::LeastRecentlyUsed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LeastRecentlyUsed => "least_recently_used",
            Self::RoundRobin => "round_robin",
        }
    }
}

/// Predicate applied to candidate endpoints during selection
pub type EndpointFilter<'a> = &'a (dyn Fn(&ProxyEndpoint, &EndpointState) -> bool + Sync);

/// Trait for endpoint selection strategies
///
/// Every successful call marks the returned endpoint as used; selection and
/// marking are a single atomic step against the pool.
pub trait ProxySelector: Send + Sync {
    /// Select the next endpoint, ignoring health
    fn next(&self) -> Result<ProxyEndpoint> {
        self.next_matching(&|_, _| true)
    }

    /// Select the next endpoint among those accepted by `filter`
    ///
    /// Falls back to the whole pool when no endpoint passes the filter.
    fn next_matching(&self, filter: EndpointFilter<'_>) -> Result<ProxyEndpoint>;

    /// The pool this selector rotates over
    fn pool(&self) -> &Arc<EndpointPool>;

    /// Get the strategy name
    fn strategy_name(&self) -> &'static str;
}

/// Indices of endpoints accepted by `filter`, or every index if none pass
pub(crate) fn candidate_indices(
    endpoints: &[ProxyEndpoint],
    states: &[EndpointState],
    filter: EndpointFilter<'_>,
) -> Vec<usize> {
    let accepted: Vec<usize> = endpoints
        .iter()
        .zip(states)
        .enumerate()
        .filter(|(_, (endpoint, state))| filter(endpoint, state))
        .map(|(idx, _)| idx)
        .collect();

    if accepted.is_empty() {
        (0..endpoints.len()).collect()
    } else {
        accepted
    }
}

/// Create a selector based on the strategy type
pub fn create_selector(
    strategy: RotationStrategy,
    pool: Arc<EndpointPool>,
) -> Arc<dyn ProxySelector> {
    match strategy {
        RotationStrategy::LeastRecentlyUsed => Arc::new(LeastRecentlyUsedSelector::new(pool)),
        RotationStrategy::RoundRobin => Arc::new(RoundRobinSelector::new(pool)),
    }
}
