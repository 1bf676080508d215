// ABOUTME: Release pipeline: source, build, approval, deploy, strictly in that order.
// ABOUTME: Source and build run as background tasks; the deploy stage follows its deployment.

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::collaborators::{BuildOutput, Builder, SourceProvider};
use super::error::{BuildError, PipelineError, PipelineFailure, SourceError};
use super::request::OperatorRequest;
use super::run::{PipelineRun, Stage};
use crate::deploy::{CutoverController, DeployError, Deployment, DeploymentState, RollbackReason};
use crate::store::{Collection, Store};
use crate::types::{ArtifactRef, DeploymentId, Revision, RunId};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Fail runs left awaiting approval this long. `None` waits forever.
    pub approval_timeout: Option<Duration>,
}

/// What a background source or build task hands back.
enum StageResult {
    Fetched(Result<Revision, SourceError>),
    Built(Result<BuildOutput, BuildError>),
}

pub struct ReleasePipeline {
    controller: CutoverController,
    source: Arc<dyn SourceProvider>,
    builder: Arc<dyn Builder>,
    store: Store,
    settings: PipelineSettings,
    runs: BTreeMap<RunId, PipelineRun>,
    /// In-flight source or build task per run.
    running: BTreeMap<RunId, JoinHandle<StageResult>>,
}

impl ReleasePipeline {
    pub fn new(
        controller: CutoverController,
        source: Arc<dyn SourceProvider>,
        builder: Arc<dyn Builder>,
        store: Store,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            controller,
            source,
            builder,
            store,
            settings,
            runs: BTreeMap::new(),
            running: BTreeMap::new(),
        }
    }

    pub fn controller(&self) -> &CutoverController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut CutoverController {
        &mut self.controller
    }

    pub fn run(&self, id: &RunId) -> Option<&PipelineRun> {
        self.runs.get(id)
    }

    /// All known runs, oldest first.
    pub fn runs(&self) -> impl Iterator<Item = &PipelineRun> {
        self.runs.values()
    }

    /// True while `id` has a source or build task in flight.
    pub fn is_stage_running(&self, id: &RunId) -> bool {
        self.running.contains_key(id)
    }

    /// Reload runs and the controller from the store. Source and build
    /// stages cut short by a restart start again in the background.
    pub fn resume(&mut self) -> Result<(), PipelineError> {
        self.controller.resume()?;
        for run in self.store.list::<PipelineRun>(Collection::Runs)? {
            self.runs.insert(run.id.clone(), run);
        }

        let interrupted: Vec<RunId> = self
            .runs
            .values()
            .filter(|r| matches!(r.current_stage(), Some(Stage::Source | Stage::Build)))
            .map(|r| r.id.clone())
            .collect();
        for id in interrupted {
            tracing::info!(run = %id, "re-running interrupted stage");
            self.spawn_stage(&id)?;
        }
        Ok(())
    }

    /// Start a run for `requested` (latest when `None`). Returns once the
    /// run is persisted and its source stage has started; [`tick`](Self::tick)
    /// collects the source and build results.
    pub fn trigger(&mut self, requested: Option<Revision>) -> Result<RunId, PipelineError> {
        let run = PipelineRun::new(RunId::generate(), requested);
        let id = run.id.clone();
        tracing::info!(
            run = %id,
            revision = run.requested.as_ref().map_or("latest", |r| r.as_str()),
            "pipeline run triggered"
        );
        self.store.put(Collection::Runs, id.as_str(), &run)?;
        self.runs.insert(id.clone(), run);

        self.spawn_stage(&id)?;
        Ok(id)
    }

    pub async fn approve(&mut self, id: &RunId) -> Result<(), PipelineError> {
        let run = awaiting_approval(&mut self.runs, id)?;
        tracing::info!(run = %id, "approved");
        run.approval_deadline = None;
        run.succeed_stage();
        self.store.put(Collection::Runs, id.as_str(), &*run)?;

        self.start_deploy(id).await
    }

    pub fn reject(&mut self, id: &RunId, reason: impl Into<String>) -> Result<(), PipelineError> {
        let run = awaiting_approval(&mut self.runs, id)?;
        run.fail_stage(PipelineFailure::ApprovalRejected {
            reason: reason.into(),
        });
        self.store.put(Collection::Runs, id.as_str(), &*run)?;
        Ok(())
    }

    /// Cancel a run. During deploy this rolls the deployment back; before
    /// that the run fails straight away.
    pub async fn cancel(&mut self, id: &RunId) -> Result<(), PipelineError> {
        let run = run_in(&mut self.runs, id)?;
        if run.is_finished() {
            return Err(PipelineError::Finished(id.clone()));
        }

        match (run.current_stage(), run.deployment.clone()) {
            (Some(Stage::Deploy), Some(deployment)) => {
                self.controller.cancel(&deployment).await?;
                self.settle_deploy(id)
            }
            _ => {
                if let Some(task) = self.running.remove(id) {
                    task.abort();
                }
                run.fail_stage(PipelineFailure::Cancelled);
                self.store.put(Collection::Runs, id.as_str(), &*run)?;
                Ok(())
            }
        }
    }

    /// Advance everything that moves on its own: finished source and build
    /// tasks, approval deadlines, the live deployment, and deploy stages
    /// waiting on it. Never waits on a running stage.
    pub async fn tick(&mut self) -> Result<(), PipelineError> {
        self.collect_stages().await?;

        let now = Utc::now();
        let expired: Vec<RunId> = self
            .runs
            .values()
            .filter(|r| r.is_awaiting_approval())
            .filter(|r| r.approval_deadline.is_some_and(|deadline| now >= deadline))
            .map(|r| r.id.clone())
            .collect();
        for id in expired {
            let run = run_in(&mut self.runs, &id)?;
            if let Some(deadline) = run.approval_deadline {
                run.fail_stage(PipelineFailure::ApprovalTimedOut { deadline });
                self.store.put(Collection::Runs, id.as_str(), &*run)?;
            }
        }

        self.controller.tick().await?;

        let deploying: Vec<(RunId, bool)> = self
            .runs
            .values()
            .filter(|r| r.current_stage() == Some(Stage::Deploy))
            .map(|r| (r.id.clone(), r.deployment.is_some()))
            .collect();
        for (id, started) in deploying {
            if started {
                self.settle_deploy(&id)?;
            } else {
                self.start_deploy(&id).await?;
            }
        }
        Ok(())
    }

    /// Apply one operator request. Returns the run a trigger created.
    pub async fn handle(
        &mut self,
        request: OperatorRequest,
    ) -> Result<Option<RunId>, PipelineError> {
        match request {
            OperatorRequest::Trigger { revision } => self.trigger(revision).map(Some),
            OperatorRequest::Approve { run } => self.approve(&run).await.map(|()| None),
            OperatorRequest::Reject { run, reason } => self.reject(&run, reason).map(|()| None),
            OperatorRequest::Cancel { run } => self.cancel(&run).await.map(|()| None),
        }
    }

    /// Start the background task for the run's current stage when it is
    /// source or build.
    fn spawn_stage(&mut self, id: &RunId) -> Result<(), PipelineError> {
        let run = run_in(&mut self.runs, id)?;
        let task = match run.current_stage() {
            Some(Stage::Source) => {
                let source = self.source.clone();
                let requested = run.requested.clone();
                tokio::spawn(async move {
                    StageResult::Fetched(source.fetch(requested.as_ref()).await)
                })
            }
            Some(Stage::Build) => {
                let Some(revision) = run.revision.clone() else {
                    run.fail_stage(PipelineFailure::BuildFailed {
                        message: "no source revision to build".to_string(),
                        log: None,
                    });
                    self.store.put(Collection::Runs, id.as_str(), &*run)?;
                    return Ok(());
                };
                let builder = self.builder.clone();
                let run_id = id.clone();
                tokio::spawn(async move {
                    StageResult::Built(builder.build(&run_id, &revision).await)
                })
            }
            _ => return Ok(()),
        };
        tracing::debug!(run = %id, stage = %run.stage, "stage started");
        if let Some(previous) = self.running.insert(id.clone(), task) {
            previous.abort();
        }
        Ok(())
    }

    /// Fold finished source and build tasks into their runs.
    async fn collect_stages(&mut self) -> Result<(), PipelineError> {
        let finished: Vec<RunId> = self
            .running
            .iter()
            .filter(|(_, task)| task.is_finished())
            .map(|(id, _)| id.clone())
            .collect();

        for id in finished {
            let Some(task) = self.running.remove(&id) else {
                continue;
            };
            match task.await {
                Ok(result) => self.apply_stage(&id, result)?,
                Err(e) => {
                    tracing::error!(run = %id, "stage task failed: {}", e);
                    let run = run_in(&mut self.runs, &id)?;
                    let message = format!("stage task failed: {e}");
                    let failure = match run.current_stage() {
                        Some(Stage::Source) => PipelineFailure::SourceUnavailable { message },
                        _ => PipelineFailure::BuildFailed { message, log: None },
                    };
                    run.fail_stage(failure);
                    self.store.put(Collection::Runs, id.as_str(), &*run)?;
                }
            }
        }
        Ok(())
    }

    fn apply_stage(&mut self, id: &RunId, result: StageResult) -> Result<(), PipelineError> {
        let timeout = self.settings.approval_timeout;
        let run = run_in(&mut self.runs, id)?;
        match (run.current_stage(), result) {
            (Some(Stage::Source), StageResult::Fetched(fetched)) => match fetched {
                Ok(revision) => {
                    tracing::info!(run = %id, revision = %revision.short(), "fetched source");
                    run.revision = Some(revision);
                    run.succeed_stage();
                }
                Err(e) => run.fail_stage(PipelineFailure::SourceUnavailable {
                    message: e.to_string(),
                }),
            },
            (Some(Stage::Build), StageResult::Built(built)) => match built {
                Ok(output) => {
                    tracing::info!(run = %id, artifact = %output.artifact, "built artifact");
                    run.artifact = Some(output.artifact);
                    run.build_log = output.log;
                    run.succeed_stage();
                    run.approval_deadline = timeout
                        .and_then(|t| chrono::Duration::from_std(t).ok())
                        .and_then(|t| Utc::now().checked_add_signed(t));
                    tracing::info!(run = %id, deadline = ?run.approval_deadline, "awaiting approval");
                }
                Err(e) => run.fail_stage(PipelineFailure::BuildFailed {
                    message: e.message,
                    log: e.log,
                }),
            },
            _ => {
                tracing::debug!(run = %id, "dropping result of a stage that already ended");
                return Ok(());
            }
        }
        self.store.put(Collection::Runs, id.as_str(), &*run)?;
        self.spawn_stage(id)
    }

    async fn start_deploy(&mut self, id: &RunId) -> Result<(), PipelineError> {
        let Some(artifact) = run_in(&mut self.runs, id)?.artifact.clone() else {
            return self.finish_deploy(
                id,
                Err(PipelineFailure::DeploymentFailed {
                    message: "run has no artifact".to_string(),
                }),
            );
        };

        match self.controller.deploy(artifact.clone()).await {
            Ok(deployment) => {
                tracing::info!(run = %id, deployment = %deployment, "deploy stage started");
                self.own_deployment(id, deployment)
            }
            Err(DeployError::InProgress { active, .. }) if self.is_orphan(&active, &artifact) => {
                tracing::info!(run = %id, deployment = %active, "adopting deployment started before a restart");
                self.own_deployment(id, active)
            }
            Err(DeployError::InProgress { active, .. }) => {
                self.finish_deploy(id, Err(PipelineFailure::DeploymentInProgress { active }))
            }
            Err(DeployError::Store(e)) => Err(e.into()),
            Err(e) => self.finish_deploy(
                id,
                Err(PipelineFailure::DeploymentFailed {
                    message: e.to_string(),
                }),
            ),
        }
    }

    fn own_deployment(&mut self, id: &RunId, deployment: DeploymentId) -> Result<(), PipelineError> {
        let run = run_in(&mut self.runs, id)?;
        run.deployment = Some(deployment);
        self.store.put(Collection::Runs, id.as_str(), &*run)?;
        self.settle_deploy(id)
    }

    /// The live deployment ships `artifact` and no run owns it: the run
    /// was not saved after its deploy started.
    fn is_orphan(&self, deployment: &DeploymentId, artifact: &ArtifactRef) -> bool {
        let live = self
            .controller
            .current()
            .is_some_and(|d| &d.id == deployment && &d.artifact == artifact);
        live && !self
            .runs
            .values()
            .any(|r| r.deployment.as_ref() == Some(deployment))
    }

    /// Close the deploy stage if its deployment reached a terminal state.
    fn settle_deploy(&mut self, id: &RunId) -> Result<(), PipelineError> {
        let Some(deployment) = run_in(&mut self.runs, id)?.deployment.clone() else {
            return Ok(());
        };

        let record = match self.controller.current().filter(|d| d.id == deployment) {
            Some(record) => Some(record.clone()),
            None => self
                .store
                .get::<Deployment>(Collection::Deployments, deployment.as_str())?,
        };
        let Some(record) = record else {
            return self.finish_deploy(
                id,
                Err(PipelineFailure::DeploymentFailed {
                    message: format!("deployment record {deployment} is missing"),
                }),
            );
        };

        match record.state {
            DeploymentState::Completed => self.finish_deploy(id, Ok(())),
            DeploymentState::RolledBack => self.finish_deploy(
                id,
                Err(PipelineFailure::DeploymentRolledBack {
                    deployment,
                    reason: record.failure.unwrap_or(RollbackReason::Cancelled),
                }),
            ),
            _ => Ok(()),
        }
    }

    fn finish_deploy(
        &mut self,
        id: &RunId,
        outcome: Result<(), PipelineFailure>,
    ) -> Result<(), PipelineError> {
        let run = run_in(&mut self.runs, id)?;
        if run.current_stage() != Some(Stage::Deploy) {
            return Ok(());
        }
        match outcome {
            Ok(()) => {
                run.succeed_stage();
                tracing::info!(run = %id, "pipeline run succeeded");
            }
            Err(failure) => run.fail_stage(failure),
        }
        self.store.put(Collection::Runs, id.as_str(), &*run)?;
        Ok(())
    }
}

impl Drop for ReleasePipeline {
    fn drop(&mut self) {
        for task in self.running.values() {
            task.abort();
        }
    }
}

fn run_in<'a>(
    runs: &'a mut BTreeMap<RunId, PipelineRun>,
    id: &RunId,
) -> Result<&'a mut PipelineRun, PipelineError> {
    runs.get_mut(id)
        .ok_or_else(|| PipelineError::UnknownRun(id.clone()))
}

fn awaiting_approval<'a>(
    runs: &'a mut BTreeMap<RunId, PipelineRun>,
    id: &RunId,
) -> Result<&'a mut PipelineRun, PipelineError> {
    let run = run_in(runs, id)?;
    if !run.is_awaiting_approval() {
        return Err(PipelineError::NotAwaitingApproval {
            run: id.clone(),
            status: run.stage.to_string(),
        });
    }
    Ok(run)
}
