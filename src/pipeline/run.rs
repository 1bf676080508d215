// ABOUTME: Pipeline stages and the durable run record.
// ABOUTME: Stages advance strictly in order; the first failure ends the run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::error::PipelineFailure;
use crate::types::{ArtifactRef, DeploymentId, Revision, RunId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Source,
    Build,
    Approval,
    Deploy,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Source, Stage::Build, Stage::Approval, Stage::Deploy];

    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Source => Some(Stage::Build),
            Stage::Build => Some(Stage::Approval),
            Stage::Approval => Some(Stage::Deploy),
            Stage::Deploy => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Source => "source",
            Stage::Build => "build",
            Stage::Approval => "approval",
            Stage::Deploy => "deploy",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageOutcome {
    Succeeded,
    Failed { failure: PipelineFailure },
}

/// One finished stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    #[serde(flatten)]
    pub outcome: StageOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Where a run stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStage {
    InProgress {
        stage: Stage,
        since: DateTime<Utc>,
    },
    Succeeded,
    Failed {
        stage: Stage,
        failure: PipelineFailure,
    },
}

impl std::fmt::Display for RunStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStage::InProgress {
                stage: Stage::Approval,
                ..
            } => f.write_str("awaiting approval"),
            RunStage::InProgress { stage, .. } => write!(f, "running {stage}"),
            RunStage::Succeeded => f.write_str("succeeded"),
            RunStage::Failed { stage, failure } => write!(f, "failed at {stage}: {failure}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: RunId,
    /// Revision asked for by the trigger, if any.
    #[serde(default)]
    pub requested: Option<Revision>,
    /// Revision the source stage resolved.
    #[serde(default)]
    pub revision: Option<Revision>,
    #[serde(default)]
    pub artifact: Option<ArtifactRef>,
    #[serde(default)]
    pub build_log: Option<PathBuf>,
    #[serde(default)]
    pub deployment: Option<DeploymentId>,
    #[serde(default)]
    pub approval_deadline: Option<DateTime<Utc>>,
    pub stage: RunStage,
    #[serde(default)]
    pub history: Vec<StageRecord>,
    pub created_at: DateTime<Utc>,
}

impl PipelineRun {
    pub fn new(id: RunId, requested: Option<Revision>) -> Self {
        let now = Utc::now();
        Self {
            id,
            requested,
            revision: None,
            artifact: None,
            build_log: None,
            deployment: None,
            approval_deadline: None,
            stage: RunStage::InProgress {
                stage: Stage::Source,
                since: now,
            },
            history: Vec::new(),
            created_at: now,
        }
    }

    pub fn current_stage(&self) -> Option<Stage> {
        match self.stage {
            RunStage::InProgress { stage, .. } => Some(stage),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self.stage, RunStage::InProgress { .. })
    }

    pub fn is_awaiting_approval(&self) -> bool {
        self.current_stage() == Some(Stage::Approval)
    }

    pub fn failure(&self) -> Option<&PipelineFailure> {
        match &self.stage {
            RunStage::Failed { failure, .. } => Some(failure),
            _ => None,
        }
    }

    /// Stages in the order they finished.
    pub fn stages(&self) -> impl Iterator<Item = Stage> + '_ {
        self.history.iter().map(|r| r.stage)
    }

    /// Close the current stage as succeeded and open the next one.
    /// Returns the new current stage, `None` once the run succeeded.
    pub(crate) fn succeed_stage(&mut self) -> Option<Stage> {
        let RunStage::InProgress { stage, since } = self.stage else {
            return None;
        };
        let now = Utc::now();
        self.history.push(StageRecord {
            stage,
            outcome: StageOutcome::Succeeded,
            started_at: since,
            finished_at: now,
        });
        tracing::info!(run = %self.id, stage = %stage, "stage succeeded");

        self.stage = match stage.next() {
            Some(next) => RunStage::InProgress {
                stage: next,
                since: now,
            },
            None => RunStage::Succeeded,
        };
        self.current_stage()
    }

    /// Close the current stage as failed, ending the run.
    pub(crate) fn fail_stage(&mut self, failure: PipelineFailure) {
        let RunStage::InProgress { stage, since } = self.stage else {
            return;
        };
        tracing::warn!(run = %self.id, stage = %stage, %failure, "stage failed");
        self.history.push(StageRecord {
            stage,
            outcome: StageOutcome::Failed {
                failure: failure.clone(),
            },
            started_at: since,
            finished_at: Utc::now(),
        });
        self.stage = RunStage::Failed { stage, failure };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run() -> PipelineRun {
        PipelineRun::new(RunId::new("run-1"), None)
    }

    #[test]
    fn stages_advance_in_order() {
        let mut r = run();
        assert_eq!(r.succeed_stage(), Some(Stage::Build));
        assert_eq!(r.succeed_stage(), Some(Stage::Approval));
        assert!(r.is_awaiting_approval());
        assert_eq!(r.succeed_stage(), Some(Stage::Deploy));
        assert_eq!(r.succeed_stage(), None);
        assert_eq!(r.stage, RunStage::Succeeded);
        assert_eq!(r.stages().collect::<Vec<_>>(), Stage::ALL.to_vec());
    }

    #[test]
    fn failure_ends_the_run() {
        let mut r = run();
        r.succeed_stage();
        r.fail_stage(PipelineFailure::BuildFailed {
            message: "exit code 2".to_string(),
            log: None,
        });
        assert!(r.is_finished());
        assert_eq!(r.succeed_stage(), None);
        assert_eq!(r.stages().collect::<Vec<_>>(), vec![Stage::Source, Stage::Build]);
        assert!(matches!(
            r.stage,
            RunStage::Failed {
                stage: Stage::Build,
                ..
            }
        ));
    }

    #[test]
    fn serialized_run_round_trips() {
        let mut r = run();
        r.succeed_stage();
        r.fail_stage(PipelineFailure::ApprovalRejected {
            reason: "perf regression".to_string(),
        });
        let json = serde_json::to_string(&r).unwrap();
        let back: PipelineRun = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }
}
