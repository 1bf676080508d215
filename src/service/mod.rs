// ABOUTME: Release service module: replica sets and the scheduler that runs them.
// ABOUTME: The only place that mutates traffic pool membership.

mod error;
mod release;
mod scheduler;

pub use error::{SchedulerError, ServiceError};
pub use release::{BindProgress, ReleaseService, ServiceRecord, StagedSet};
pub use scheduler::{CommandScheduler, CommandSpec, LaunchRequest, Replica, ReplicaScheduler};
