//! Endpoint pool
//!
//! Holds the fixed set of proxy endpoints derived from a host and a port range,
//! together with one mutable state entry per endpoint.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::RotationConfig;
use crate::error::{Result, RotaError};
use crate::models::{EndpointSnapshot, EndpointState, ProxyEndpoint};

/// Fixed set of candidate endpoints and their bookkeeping
///
/// Each state entry sits behind its own lock, so health reports against
/// different endpoints never contend. Selection additionally holds the pool's
/// selection lock, which makes "pick + mark used" atomic across callers.
pub struct EndpointPool {
    endpoints: Vec<ProxyEndpoint>,
    states: Vec<Mutex<EndpointState>>,
    positions: HashMap<ProxyEndpoint, usize>,
    selection: Mutex<()>,
    sequence: AtomicU64,
}

impl EndpointPool {
    /// Build the pool for `host:start..=end`
    pub fn new(config: &RotationConfig) -> Result<Self> {
        config.validate()?;
        Self::from_endpoints(config.endpoints())
    }

    /// Build a pool from an explicit endpoint list, sorted ascending by port
    pub fn from_endpoints(mut endpoints: Vec<ProxyEndpoint>) -> Result<Self> {
        endpoints.sort_by(|a, b| a.port.cmp(&b.port).then_with(|| a.host.cmp(&b.host)));
        endpoints.dedup();

        if endpoints.is_empty() {
            return Err(RotaError::InvalidConfig(
                "endpoint pool must contain at least one endpoint".into(),
            ));
        }

        let positions = endpoints
            .iter()
            .enumerate()
            .map(|(idx, endpoint)| (endpoint.clone(), idx))
            .collect();
        let states = endpoints
            .iter()
            .map(|_| Mutex::new(EndpointState::default()))
            .collect();

        debug!("Created endpoint pool with {} endpoints", endpoints.len());

        Ok(Self {
            endpoints,
            states,
            positions,
            selection: Mutex::new(()),
            sequence: AtomicU64::new(0),
        })
    }

    /// Every endpoint, ascending by port
    pub fn all_endpoints(&self) -> &[ProxyEndpoint] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn contains(&self, endpoint: &ProxyEndpoint) -> bool {
        self.positions.contains_key(endpoint)
    }

    /// Copy of an endpoint's current state
    pub fn state_of(&self, endpoint: &ProxyEndpoint) -> Result<EndpointState> {
        self.with_state(endpoint, |state| state.clone())
    }

    /// Run `f` with exclusive access to one endpoint's state
    pub fn with_state<R>(
        &self,
        endpoint: &ProxyEndpoint,
        f: impl FnOnce(&mut EndpointState) -> R,
    ) -> Result<R> {
        let idx = *self
            .positions
            .get(endpoint)
            .ok_or_else(|| RotaError::UnknownEndpoint(endpoint.to_string()))?;
        let mut state = self.states[idx].lock();
        Ok(f(&mut state))
    }

    /// Atomically pick an endpoint and mark it used
    ///
    /// `pick` sees a consistent copy of every state, in port order, and returns
    /// the index of the endpoint to use.
    pub(crate) fn select_with<F>(&self, pick: F) -> Result<ProxyEndpoint>
    where
        F: FnOnce(&[EndpointState]) -> Option<usize>,
    {
        let _selection = self.selection.lock();

        let states: Vec<EndpointState> = self.states.iter().map(|s| s.lock().clone()).collect();
        let idx = pick(&states)
            .filter(|&idx| idx < self.endpoints.len())
            .ok_or(RotaError::NoEndpointsAvailable)?;

        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.states[idx].lock().mark_used(seq);

        Ok(self.endpoints[idx].clone())
    }

    /// Restore every endpoint to never used, zero failures, healthy
    pub fn reset_all(&self) {
        let _selection = self.selection.lock();
        for state in &self.states {
            *state.lock() = EndpointState::default();
        }
        info!("Reset state of {} endpoints", self.endpoints.len());
    }

    /// Per-endpoint view for observability, ascending by port
    pub fn snapshot(&self) -> Vec<EndpointSnapshot> {
        self.endpoints
            .iter()
            .zip(&self.states)
            .map(|(endpoint, state)| EndpointSnapshot::new(endpoint, &state.lock()))
            .collect()
    }
}
