// ABOUTME: Pipeline failure reasons recorded on runs, and errors returned to callers.
// ABOUTME: A failure halts its run; nothing here is retried automatically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::deploy::{DeployError, RollbackReason};
use crate::store::StoreError;
use crate::types::{DeploymentId, RunId};

/// Why a stage failed. Persisted on the run for operator inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineFailure {
    #[error("source unavailable: {message}")]
    SourceUnavailable { message: String },

    #[error("build failed: {message}{}", log_suffix(.log))]
    BuildFailed {
        message: String,
        log: Option<PathBuf>,
    },

    #[error("approval rejected: {reason}")]
    ApprovalRejected { reason: String },

    #[error("approval timed out at {deadline}")]
    ApprovalTimedOut { deadline: DateTime<Utc> },

    #[error("cancelled by operator")]
    Cancelled,

    #[error("deployment {deployment} rolled back: {reason}")]
    DeploymentRolledBack {
        deployment: DeploymentId,
        reason: RollbackReason,
    },

    #[error("deployment {active} is still in progress")]
    DeploymentInProgress { active: DeploymentId },

    #[error("deployment could not start: {message}")]
    DeploymentFailed { message: String },
}

fn log_suffix(log: &Option<PathBuf>) -> String {
    log.as_ref()
        .map(|path| format!(" (log: {})", path.display()))
        .unwrap_or_default()
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineFailureKind {
    SourceUnavailable,
    BuildFailed,
    ApprovalRejected,
    ApprovalTimedOut,
    Cancelled,
    RolledBack,
    DeploymentInProgress,
    DeploymentFailed,
}

impl PipelineFailure {
    pub fn kind(&self) -> PipelineFailureKind {
        match self {
            PipelineFailure::SourceUnavailable { .. } => PipelineFailureKind::SourceUnavailable,
            PipelineFailure::BuildFailed { .. } => PipelineFailureKind::BuildFailed,
            PipelineFailure::ApprovalRejected { .. } => PipelineFailureKind::ApprovalRejected,
            PipelineFailure::ApprovalTimedOut { .. } => PipelineFailureKind::ApprovalTimedOut,
            PipelineFailure::Cancelled => PipelineFailureKind::Cancelled,
            PipelineFailure::DeploymentRolledBack { .. } => PipelineFailureKind::RolledBack,
            PipelineFailure::DeploymentInProgress { .. } => {
                PipelineFailureKind::DeploymentInProgress
            }
            PipelineFailure::DeploymentFailed { .. } => PipelineFailureKind::DeploymentFailed,
        }
    }
}

/// Source collaborator failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("{0}")]
    Unavailable(String),

    #[error("source returned an invalid revision: {0}")]
    InvalidRevision(String),
}

/// Build collaborator failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct BuildError {
    pub message: String,
    /// Where the full build output was kept, if anywhere.
    pub log: Option<PathBuf>,
}

/// Errors returned by pipeline operations. Stage failures are not errors;
/// they are recorded on the run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("no pipeline run {0}")]
    UnknownRun(RunId),

    #[error("run {run} is not awaiting approval (currently {status})")]
    NotAwaitingApproval { run: RunId, status: String },

    #[error("run {0} has already finished")]
    Finished(RunId),

    #[error(transparent)]
    Deploy(#[from] DeployError),

    #[error("failed to persist pipeline state: {0}")]
    Store(#[from] StoreError),
}
