// ABOUTME: Blue/green router: maps active/standby roles onto two traffic pools.
// ABOUTME: Shifts a weight of new connections to standby and swaps roles atomically.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::RouterError;
use super::pool::TrafficPool;
use crate::types::PoolId;

/// Physical identity of a pool. Fixed for the pool's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    Blue,
    Green,
}

impl Slot {
    pub const ALL: [Slot; 2] = [Slot::Blue, Slot::Green];

    pub fn other(self) -> Self {
        match self {
            Slot::Blue => Slot::Green,
            Slot::Green => Slot::Blue,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Slot::Blue => "blue",
            Slot::Green => "green",
        }
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Traffic role of a pool. Changes on every swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Active,
    Standby,
}

/// Percentage of new connections sent to the standby pool.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "u32", into = "u32")]
pub struct Weight(u8);

impl Weight {
    pub const ZERO: Weight = Weight(0);
    pub const FULL: Weight = Weight(100);

    pub fn new(value: u32) -> Result<Self, RouterError> {
        if value > 100 {
            return Err(RouterError::InvalidWeight(value));
        }
        Ok(Weight(value as u8))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl TryFrom<u32> for Weight {
    type Error = RouterError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Weight::new(value)
    }
}

impl From<Weight> for u32 {
    fn from(weight: Weight) -> Self {
        u32::from(weight.0)
    }
}

impl std::fmt::Display for Weight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Durable routing state: which slot is active and the standby weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterState {
    pub active: Slot,
    pub weight: Weight,
}

impl Default for RouterState {
    fn default() -> Self {
        Self {
            active: Slot::Blue,
            weight: Weight::ZERO,
        }
    }
}

/// Resolved view of the routing state, for status output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteSnapshot {
    pub active: PoolId,
    pub standby: PoolId,
    pub active_slot: Slot,
    pub weight: Weight,
}

/// Owns the two pools and the role indirection between them.
///
/// Clones share state. Readers (proxy listeners, status) take a short read
/// lock; the single writer is the cutover controller.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    blue: TrafficPool,
    green: TrafficPool,
    route: RwLock<RouterState>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("blue", self.inner.blue.id())
            .field("green", self.inner.green.id())
            .field("route", &*self.inner.route.read())
            .finish()
    }
}

impl Router {
    /// Blue starts active with all traffic.
    pub fn new(blue: TrafficPool, green: TrafficPool) -> Self {
        Self::with_state(blue, green, RouterState::default())
    }

    pub fn with_state(blue: TrafficPool, green: TrafficPool, state: RouterState) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                blue,
                green,
                route: RwLock::new(state),
            }),
        }
    }

    pub fn pool(&self, slot: Slot) -> &TrafficPool {
        match slot {
            Slot::Blue => &self.inner.blue,
            Slot::Green => &self.inner.green,
        }
    }

    pub fn pool_for(&self, role: Role) -> &TrafficPool {
        let active = self.inner.route.read().active;
        match role {
            Role::Active => self.pool(active),
            Role::Standby => self.pool(active.other()),
        }
    }

    pub fn active(&self) -> &TrafficPool {
        self.pool_for(Role::Active)
    }

    pub fn standby(&self) -> &TrafficPool {
        self.pool_for(Role::Standby)
    }

    pub fn slot_of(&self, pool: &PoolId) -> Option<Slot> {
        Slot::ALL.into_iter().find(|slot| self.pool(*slot).id() == pool)
    }

    pub fn owns(&self, pool: &PoolId) -> bool {
        self.slot_of(pool).is_some()
    }

    pub fn role_of(&self, pool: &PoolId) -> Option<Role> {
        let slot = self.slot_of(pool)?;
        if slot == self.inner.route.read().active {
            Some(Role::Active)
        } else {
            Some(Role::Standby)
        }
    }

    pub fn state(&self) -> RouterState {
        *self.inner.route.read()
    }

    pub fn weight(&self) -> Weight {
        self.inner.route.read().weight
    }

    pub fn snapshot(&self) -> RouteSnapshot {
        let state = self.state();
        RouteSnapshot {
            active: self.pool(state.active).id().clone(),
            standby: self.pool(state.active.other()).id().clone(),
            active_slot: state.active,
            weight: state.weight,
        }
    }

    /// Set the percentage of new connections sent to standby.
    ///
    /// Within a cutover the weight only grows; the one permitted decrease is
    /// straight back to 0.
    pub fn shift_traffic(&self, weight: u32) -> Result<(), RouterError> {
        let weight = Weight::new(weight)?;
        let mut route = self.inner.route.write();
        if weight < route.weight && !weight.is_zero() {
            return Err(RouterError::NonMonotonicShift {
                current: route.weight.get(),
                requested: weight.get(),
            });
        }
        if weight != route.weight {
            tracing::info!(
                standby = %self.pool(route.active.other()).id(),
                from = route.weight.get(),
                to = weight.get(),
                "shifted traffic"
            );
        }
        route.weight = weight;
        Ok(())
    }

    /// Exchange roles and reset the weight, under one write lock.
    pub fn swap(&self) -> RouterState {
        let mut route = self.inner.route.write();
        route.active = route.active.other();
        route.weight = Weight::ZERO;
        tracing::info!(
            active = %self.pool(route.active).id(),
            standby = %self.pool(route.active.other()).id(),
            "swapped active and standby pools"
        );
        *route
    }

    /// Choose the pool for a new production connection.
    ///
    /// `roll` is taken modulo 100; rolls below the weight go to standby, so
    /// any 100 consecutive rolls send exactly `weight` connections there.
    pub fn pick(&self, roll: u64) -> &TrafficPool {
        let route = *self.inner.route.read();
        if ((roll % 100) as u8) < route.weight.get() {
            self.pool(route.active.other())
        } else {
            self.pool(route.active)
        }
    }

    /// Reinstate persisted routing state on startup.
    pub(crate) fn restore(&self, state: RouterState) {
        *self.inner.route.write() = state;
    }
}
