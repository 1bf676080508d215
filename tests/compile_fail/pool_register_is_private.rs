// ABOUTME: Compile-fail test verifying pool membership cannot be changed outside the crate.
// ABOUTME: Only the release service registers and deregisters endpoints.

use cutover::traffic::{HealthCheckPolicy, TrafficPool};
use cutover::types::{Endpoint, PoolId};
use std::time::Duration;

fn main() {
    let pool = TrafficPool::new(
        PoolId::new("web-blue"),
        9001,
        HealthCheckPolicy {
            path: "/".to_string(),
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(5),
        },
    );
    pool.register(Endpoint::new("10.0.0.1", 80)); // ERROR: method is private
}
