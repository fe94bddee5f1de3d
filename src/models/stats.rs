use serde::{Deserialize, Serialize};

use super::EndpointSnapshot;

/// Aggregate pool statistics
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PoolStats {
    /// Number of endpoints in the pool
    pub total: usize,
    /// Endpoints currently marked healthy
    pub healthy: usize,
    /// Endpoints that crossed the failure threshold
    pub unhealthy: usize,
    /// Endpoints selected at least once since the last reset
    pub used: usize,
    pub never_used: usize,
    pub endpoints: Vec<EndpointSnapshot>,
}

impl PoolStats {
    pub fn from_snapshots(endpoints: Vec<EndpointSnapshot>) -> Self {
        let total = endpoints.len();
        let healthy = endpoints.iter().filter(|e| e.is_healthy).count();
        let used = endpoints.iter().filter(|e| e.last_used_at.is_some()).count();

        Self {
            total,
            healthy,
            unhealthy: total - healthy,
            used,
            never_used: total - used,
            endpoints,
        }
    }

    /// Percentage of the pool currently healthy (0-100)
    pub fn health_ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.healthy as f64 / self.total as f64) * 100.0
        }
    }
}
