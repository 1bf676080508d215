// ABOUTME: A health-tracked pool of endpoints reachable through one listener.
// ABOUTME: Membership is mutated only by the release service; health is observed by probes.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::types::{Endpoint, PoolId};

/// How a pool's members are probed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckPolicy {
    pub path: String,
    pub interval: Duration,
    pub timeout: Duration,
}

/// Result of the last probe against one member.
#[derive(Debug, Clone, Copy)]
pub struct Observation {
    pub healthy: bool,
    pub observed_at: Instant,
}

/// Point-in-time health summary of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolHealth {
    pub members: usize,
    pub healthy: usize,
    pub unprobed: usize,
}

impl PoolHealth {
    /// An empty pool is unhealthy; otherwise every member must have passed.
    pub fn is_healthy(&self) -> bool {
        self.members > 0 && self.healthy == self.members
    }

    /// Members whose last observation was a failed probe.
    pub fn failing(&self) -> usize {
        self.members - self.healthy - self.unprobed
    }
}

/// Cheaply cloneable handle to a traffic pool.
///
/// All clones share the same membership and observations, so the router,
/// the release service, health monitors, and proxy listeners see one pool.
#[derive(Clone)]
pub struct TrafficPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    id: PoolId,
    listener_port: u16,
    policy: HealthCheckPolicy,
    members: RwLock<BTreeMap<Endpoint, Option<Observation>>>,
    cursor: AtomicUsize,
}

impl std::fmt::Debug for TrafficPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrafficPool")
            .field("id", &self.inner.id)
            .field("listener_port", &self.inner.listener_port)
            .field("members", &self.members())
            .finish()
    }
}

impl TrafficPool {
    pub fn new(id: PoolId, listener_port: u16, policy: HealthCheckPolicy) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                id,
                listener_port,
                policy,
                members: RwLock::new(BTreeMap::new()),
                cursor: AtomicUsize::new(0),
            }),
        }
    }

    pub fn id(&self) -> &PoolId {
        &self.inner.id
    }

    pub fn listener_port(&self) -> u16 {
        self.inner.listener_port
    }

    pub fn policy(&self) -> &HealthCheckPolicy {
        &self.inner.policy
    }

    /// Current members in a stable order.
    pub fn members(&self) -> Vec<Endpoint> {
        self.inner.members.read().keys().cloned().collect()
    }

    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        self.inner.members.read().contains_key(endpoint)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.members.read().is_empty()
    }

    /// True iff the pool has members and every one passed its last probe.
    ///
    /// Reads the last observations only; never probes.
    pub fn is_healthy(&self) -> bool {
        self.health().is_healthy()
    }

    pub fn health(&self) -> PoolHealth {
        self.summarize(None)
    }

    /// Like [`health`](Self::health), but observations older than
    /// `max_age` count as unprobed.
    pub fn health_within(&self, max_age: Duration) -> PoolHealth {
        self.summarize(Some(max_age))
    }

    fn summarize(&self, max_age: Option<Duration>) -> PoolHealth {
        let members = self.inner.members.read();
        let mut health = PoolHealth {
            members: members.len(),
            healthy: 0,
            unprobed: 0,
        };
        let fresh = |o: &Observation| max_age.is_none_or(|age| o.observed_at.elapsed() <= age);
        for observation in members.values() {
            match observation.filter(fresh) {
                Some(o) if o.healthy => health.healthy += 1,
                Some(_) => {}
                None => health.unprobed += 1,
            }
        }
        health
    }

    pub fn observation(&self, endpoint: &Endpoint) -> Option<Observation> {
        self.inner.members.read().get(endpoint).copied().flatten()
    }

    /// Record a probe result. Results for endpoints that left the pool
    /// while the probe was in flight are dropped.
    pub fn record_probe(&self, endpoint: &Endpoint, healthy: bool) {
        let mut members = self.inner.members.write();
        if let Some(slot) = members.get_mut(endpoint) {
            *slot = Some(Observation {
                healthy,
                observed_at: Instant::now(),
            });
        }
    }

    /// Next member to receive a connection, round-robin over members that
    /// passed their last probe. Falls back to all members when none has.
    pub fn next_member(&self) -> Option<Endpoint> {
        let members = self.inner.members.read();
        let healthy: Vec<&Endpoint> = members
            .iter()
            .filter(|(_, o)| o.is_some_and(|o| o.healthy))
            .map(|(ep, _)| ep)
            .collect();
        let candidates: Vec<&Endpoint> = if healthy.is_empty() {
            members.keys().collect()
        } else {
            healthy
        };
        if candidates.is_empty() {
            return None;
        }
        let idx = self.inner.cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
        Some(candidates[idx].clone())
    }

    /// Add a member. New members start unprobed, hence unhealthy.
    pub(crate) fn register(&self, endpoint: Endpoint) -> bool {
        let mut members = self.inner.members.write();
        if members.contains_key(&endpoint) {
            return false;
        }
        tracing::debug!(pool = %self.inner.id, endpoint = %endpoint, "registered member");
        members.insert(endpoint, None);
        true
    }

    pub(crate) fn deregister(&self, endpoint: &Endpoint) -> bool {
        let removed = self.inner.members.write().remove(endpoint).is_some();
        if removed {
            tracing::debug!(pool = %self.inner.id, endpoint = %endpoint, "deregistered member");
        }
        removed
    }
}
