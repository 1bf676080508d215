// ABOUTME: Traffic layer: pools, blue/green router, health probing, and listeners.
// ABOUTME: No retries at this layer; health is a point-in-time observation.

mod error;
mod monitor;
mod pool;
mod probe;
mod proxy;
mod router;

pub use error::{ProbeError, RouterError};
pub use monitor::{MonitorHandle, probe_pool, spawn_monitor};
pub use pool::{HealthCheckPolicy, Observation, PoolHealth, TrafficPool};
pub use probe::{HealthProbe, HttpProbe};
pub use proxy::{ProxyHandle, Route, start_proxy};
pub use router::{Role, RouteSnapshot, Router, RouterState, Slot, Weight};
