// ABOUTME: Error types for cutover operations.
// ABOUTME: Point failures inside a deployment become rollbacks; these are what reach callers.

use super::deployment::RollbackReason;
use super::plan::PlanError;
use super::state::{DeploymentState, IllegalTransition};
use crate::service::ServiceError;
use crate::store::StoreError;
use crate::types::{DeploymentId, ServiceName};

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// A non-terminal deployment already exists for the service.
    #[error("deployment {active} is still in progress for {service}")]
    InProgress {
        service: ServiceName,
        active: DeploymentId,
    },

    /// The deployment ended in `RolledBack`.
    #[error("deployment {id} rolled back: {reason}")]
    RolledBack {
        id: DeploymentId,
        reason: RollbackReason,
    },

    #[error("deployment {id} cannot be cancelled while {state}")]
    NotCancellable {
        id: DeploymentId,
        state: DeploymentState,
    },

    #[error("no live deployment {0}")]
    Unknown(DeploymentId),

    #[error("nothing has been deployed")]
    NoDeployment,

    #[error(transparent)]
    Transition(#[from] IllegalTransition),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("failed to persist deployment state: {0}")]
    Store(#[from] StoreError),
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployErrorKind {
    DeploymentInProgress,
    DeploymentStalled,
    InvalidWeight,
    RolledBack,
    NotCancellable,
    UnknownDeployment,
    IllegalTransition,
    InvalidPlan,
    Service,
    Store,
}

impl DeployError {
    pub fn kind(&self) -> DeployErrorKind {
        match self {
            DeployError::InProgress { .. } => DeployErrorKind::DeploymentInProgress,
            DeployError::RolledBack { reason, .. } => reason.kind(),
            DeployError::NotCancellable { .. } => DeployErrorKind::NotCancellable,
            DeployError::Unknown(_) | DeployError::NoDeployment => {
                DeployErrorKind::UnknownDeployment
            }
            DeployError::Transition(_) => DeployErrorKind::IllegalTransition,
            DeployError::Plan(_) => DeployErrorKind::InvalidPlan,
            DeployError::Service(_) => DeployErrorKind::Service,
            DeployError::Store(_) => DeployErrorKind::Store,
        }
    }
}
