// ABOUTME: Compile-fail test verifying PoolId and DeploymentId are not interchangeable.
// ABOUTME: This test should fail to compile, validating type safety.

use cutover::types::{DeploymentId, PoolId};

fn takes_pool_id(_id: PoolId) {}

fn main() {
    let deployment = DeploymentId::new("dep-123");
    takes_pool_id(deployment); // ERROR: expected PoolId, found DeploymentId
}
