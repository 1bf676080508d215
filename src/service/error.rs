// ABOUTME: Error types for the release service and its replica scheduler.
// ABOUTME: Point failures surface synchronously; the controller decides what to do with them.

use crate::traffic::RouterError;
use crate::types::PoolId;

/// Scheduler collaborator failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("failed to launch replica: {0}")]
    Launch(String),

    #[error("launch command printed `{output}`, expected host:port: {reason}")]
    InvalidEndpoint { output: String, reason: String },

    #[error("failed to stop replica: {0}")]
    Stop(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Router(#[from] RouterError),

    /// A staged replica set already exists; revert or promote it first.
    #[error("pool {pool} already has a staged replica set")]
    BindInProgress { pool: PoolId },

    /// The currently bound pool carries live traffic and cannot be replaced.
    #[error("pool {0} is the current binding")]
    PoolServing(PoolId),

    #[error("no staged replica set")]
    NothingStaged,

    #[error("replica {index} failed to launch: {source}")]
    Launch {
        index: usize,
        source: SchedulerError,
    },

    /// Some replicas could not be stopped. Membership changes were still applied.
    #[error("{failed} replica(s) failed to stop, first error: {first}")]
    Stop { failed: usize, first: SchedulerError },
}
