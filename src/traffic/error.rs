// ABOUTME: Error types for routing and health probing.
// ABOUTME: Point failures surfaced synchronously to the caller, never retried here.

use crate::types::PoolId;

/// Errors from router operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouterError {
    /// Weight outside 0..=100.
    #[error("invalid traffic weight {0} (must be 0-100)")]
    InvalidWeight(u32),

    /// A cutover tried to lower the weight without reverting to 0.
    #[error("traffic weight may not decrease from {current}% to {requested}% during a cutover")]
    NonMonotonicShift { current: u8, requested: u8 },

    /// The pool is not one of the router's two pools.
    #[error("pool {0} is not owned by this router")]
    UnknownPool(PoolId),
}

/// Errors from a single HTTP health probe.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("connect failed: {0}")]
    Connect(#[from] std::io::Error),

    #[error("invalid probe request: {0}")]
    Request(#[from] hyper::http::Error),

    #[error("HTTP exchange failed: {0}")]
    Http(#[from] hyper::Error),
}
