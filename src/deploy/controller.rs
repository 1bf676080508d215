// ABOUTME: Cutover controller: drives one deployment at a time through the state table.
// ABOUTME: Tick-driven and resumable; every failure on the way is turned into a rollback.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::deployment::{Deployment, DeploymentStatus, RollbackReason};
use super::error::DeployError;
use super::plan::TrafficShiftPlan;
use super::state::{DeploymentState, Event};
use crate::service::{BindProgress, ReleaseService, ServiceRecord};
use crate::store::{Collection, Store, StoreError};
use crate::traffic::{HealthProbe, Router, RouterState, Weight, probe_pool};
use crate::types::{ArtifactRef, DeploymentId, ServiceName};

/// Tunables for a controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSettings {
    pub plan: TrafficShiftPlan,
    /// Consecutive passing verification rounds required before any traffic moves.
    pub verify_probes: u32,
    /// Spacing between verification rounds.
    pub verify_interval: Duration,
    /// How long the former active set keeps draining after the swap.
    pub deregistration_delay: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            plan: TrafficShiftPlan::default(),
            verify_probes: 3,
            verify_interval: Duration::from_secs(10),
            deregistration_delay: Duration::from_secs(30),
        }
    }
}

/// Observations older than this many health-check intervals are ignored
/// while traffic is shifting.
const STALE_AFTER_INTERVALS: u32 = 3;

/// Shared, read-only view of the live deployment for concurrent readers.
pub type StatusHandle = Arc<RwLock<Option<DeploymentStatus>>>;

/// In-memory timers beside the durable record. Rebuilt from scratch on resume.
struct Live {
    record: Deployment,
    phase_since: Instant,
    passes: u32,
    next_round: Option<Instant>,
    drain_until: Option<Instant>,
}

impl Live {
    fn new(record: Deployment) -> Self {
        Self {
            record,
            phase_since: Instant::now(),
            passes: 0,
            next_round: None,
            drain_until: None,
        }
    }
}

/// Owns the release service and is the single writer of router weight,
/// router roles, and (through the service) pool membership.
pub struct CutoverController {
    service: ReleaseService,
    probe: Arc<dyn HealthProbe>,
    store: Store,
    settings: ControllerSettings,
    live: Option<Live>,
    status: StatusHandle,
}

impl CutoverController {
    pub fn new(
        service: ReleaseService,
        probe: Arc<dyn HealthProbe>,
        store: Store,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            service,
            probe,
            store,
            settings,
            live: None,
            status: Arc::new(RwLock::new(None)),
        }
    }

    pub fn router(&self) -> &Router {
        self.service.router()
    }

    pub fn service(&self) -> &ReleaseService {
        &self.service
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Most recent deployment, live or settled.
    pub fn current(&self) -> Option<&Deployment> {
        self.live.as_ref().map(|live| &live.record)
    }

    pub fn is_busy(&self) -> bool {
        self.current().is_some_and(|d| !d.is_terminal())
    }

    pub fn status(&self) -> Option<DeploymentStatus> {
        self.current().map(Deployment::status)
    }

    pub fn status_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    /// Reinstate persisted routing, replicas, and the last deployment.
    ///
    /// A deployment caught mid-shift keeps its step and weight; only the
    /// current hold restarts.
    pub fn resume(&mut self) -> Result<Option<DeploymentState>, DeployError> {
        let key = self.service.service().clone();
        let router = self.router().clone();

        if let Some(state) = self.store.get::<RouterState>(Collection::Routers, key.as_str())? {
            router.restore(state);
        }
        if let Some(record) = self.store.get::<ServiceRecord>(Collection::Services, key.as_str())? {
            self.service.restore(record)?;
        }

        let Some(id) = self.store.get::<DeploymentId>(Collection::Live, key.as_str())? else {
            return Ok(None);
        };
        let Some(mut record) = self
            .store
            .get::<Deployment>(Collection::Deployments, id.as_str())?
        else {
            tracing::warn!(deployment = %id, "live deployment record is missing");
            return Ok(None);
        };

        let state = record.state;
        if state == DeploymentState::ShiftingTraffic && router.active().id() != &record.target {
            adopt_applied_step(&mut record, router.weight());
            router.restore(RouterState {
                active: record.prior.active,
                weight: record.current_weight,
            });
        }

        if !record.is_terminal() {
            tracing::info!(
                deployment = %record.id,
                service = %key,
                state = %state,
                step = record.step_index,
                weight = record.current_weight.get(),
                "resuming deployment"
            );
        }
        self.live = Some(Live::new(record));
        self.publish();
        Ok(Some(state))
    }

    /// Start deploying `artifact` to the standby pool.
    ///
    /// Returns the new deployment id as soon as its `Staging` record is
    /// durable; replicas are launched by the next [`tick`](Self::tick), so
    /// callers can record the id before anything is started. Fails with
    /// `DeployError::InProgress` and changes nothing while another
    /// deployment is live.
    pub async fn deploy(&mut self, artifact: ArtifactRef) -> Result<DeploymentId, DeployError> {
        if let Some(live) = &self.live
            && !live.record.is_terminal()
        {
            return Err(DeployError::InProgress {
                service: self.service.service().clone(),
                active: live.record.id.clone(),
            });
        }

        let router = self.router().clone();
        let service = self.service.service().clone();
        let target = router.standby().id().clone();
        let mut record = Deployment::new(
            DeploymentId::generate(),
            service.clone(),
            artifact.clone(),
            self.settings.plan.clone(),
            target.clone(),
            router.state(),
        );
        record.apply(Event::Deploy)?;
        save_deployment(&self.store, &record)?;
        self.store.put(Collection::Live, service.as_str(), &record.id)?;

        tracing::info!(
            deployment = %record.id,
            service = %service,
            artifact = %artifact,
            target = %target,
            "starting deployment"
        );

        let id = record.id.clone();
        self.live = Some(Live::new(record));
        self.publish();
        Ok(id)
    }

    /// Advance the live deployment by at most one transition.
    ///
    /// Returns the state afterwards, or `None` when nothing was ever
    /// deployed. Errors only when state cannot be persisted.
    pub async fn tick(&mut self) -> Result<Option<DeploymentState>, DeployError> {
        let Some(state) = self.current().map(|d| d.state) else {
            return Ok(None);
        };

        match state {
            DeploymentState::Staging => self.tick_staging().await?,
            DeploymentState::Verifying => self.tick_verifying().await?,
            DeploymentState::ShiftingTraffic => self.tick_shifting().await?,
            DeploymentState::Finalizing => self.tick_finalizing().await?,
            DeploymentState::RollingBack => self.roll_back().await?,
            DeploymentState::Idle | DeploymentState::Completed | DeploymentState::RolledBack => {}
        }

        self.publish();
        Ok(self.current().map(|d| d.state))
    }

    /// Operator cancel: rolls back from `Staging`, `Verifying` or
    /// `ShiftingTraffic`. Refused once `Finalizing` has begun.
    pub async fn cancel(&mut self, id: &DeploymentId) -> Result<(), DeployError> {
        let Some(record) = self.current().filter(|d| &d.id == id) else {
            return Err(DeployError::Unknown(id.clone()));
        };
        if !record.state.is_cancellable() {
            return Err(DeployError::NotCancellable {
                id: id.clone(),
                state: record.state,
            });
        }

        tracing::info!(deployment = %id, "deployment cancelled by operator");
        self.abort(Event::Cancel, RollbackReason::Cancelled).await?;
        self.publish();
        Ok(())
    }

    /// Tick every `interval` until the live deployment settles.
    ///
    /// Returns the final status on `Completed` and `DeployError::RolledBack`
    /// on `RolledBack`.
    pub async fn run_until_settled(
        &mut self,
        interval: Duration,
    ) -> Result<DeploymentStatus, DeployError> {
        loop {
            self.tick().await?;
            let Some(record) = self.current() else {
                return Err(DeployError::NoDeployment);
            };
            match record.state {
                DeploymentState::Completed => return Ok(record.status()),
                DeploymentState::RolledBack => {
                    return Err(DeployError::RolledBack {
                        id: record.id.clone(),
                        reason: record.failure.clone().unwrap_or(RollbackReason::Cancelled),
                    });
                }
                _ => tokio::time::sleep(interval).await,
            }
        }
    }

    async fn tick_staging(&mut self) -> Result<(), DeployError> {
        match self.service.bind_progress() {
            BindProgress::Pending {
                healthy, desired, ..
            } => {
                tracing::debug!(healthy, desired, "waiting for staged replicas");
                Ok(())
            }
            BindProgress::Ready => {
                let Some(live) = self.live.as_mut() else {
                    return Ok(());
                };
                live.record.apply(Event::Bound)?;
                live.passes = 0;
                live.next_round = None;
                live.phase_since = Instant::now();
                save_deployment(&self.store, &live.record)?;
                Ok(())
            }
            BindProgress::Stalled { elapsed } => {
                self.abort(
                    Event::Abort,
                    RollbackReason::BindStalled {
                        waited_secs: elapsed.as_secs(),
                    },
                )
                .await
            }
            BindProgress::Idle => self.stage(false).await,
            BindProgress::Incomplete { launched, desired } => {
                tracing::info!(launched, desired, "launching the rest of an interrupted replica set");
                self.stage(true).await
            }
        }
    }

    /// Open the staged set on the target pool, or finish launching one a
    /// restart cut short. The service record is saved after every launch.
    async fn stage(&mut self, remaining: bool) -> Result<(), DeployError> {
        let Some(record) = self.current() else {
            return Ok(());
        };
        let (target, artifact) = (record.target.clone(), record.artifact.clone());

        let store = &self.store;
        let mut unsaved = None;
        let checkpoint = |record: &ServiceRecord| {
            if let Err(e) = store.put(Collection::Services, record.service.as_str(), record) {
                unsaved.get_or_insert(e);
            }
        };
        let staged = if remaining {
            self.service.launch_remaining(checkpoint).await
        } else {
            self.service.bind(&target, &artifact, checkpoint).await
        };
        if let Some(e) = unsaved {
            return Err(e.into());
        }

        match staged {
            Ok(()) => Ok(()),
            Err(e) => {
                self.abort(
                    Event::Abort,
                    RollbackReason::BindFailed {
                        message: e.to_string(),
                    },
                )
                .await
            }
        }
    }

    async fn tick_verifying(&mut self) -> Result<(), DeployError> {
        let now = Instant::now();
        let due = self
            .live
            .as_ref()
            .is_some_and(|live| live.next_round.is_none_or(|at| now >= at));
        if !due {
            return Ok(());
        }

        let standby = self.router().standby().clone();
        let health = probe_pool(&standby, self.probe.as_ref()).await;

        let Some(live) = self.live.as_mut() else {
            return Ok(());
        };
        let round = live.passes + 1;
        if !health.is_healthy() {
            tracing::warn!(
                deployment = %live.record.id,
                pool = %standby.id(),
                round,
                healthy = health.healthy,
                members = health.members,
                "verification failed"
            );
            return self
                .abort(Event::Abort, RollbackReason::VerificationFailed { round })
                .await;
        }

        live.passes = round;
        tracing::debug!(deployment = %live.record.id, round, "verification round passed");
        if live.passes < self.settings.verify_probes.max(1) {
            live.next_round = Some(now + self.settings.verify_interval);
            return Ok(());
        }

        live.record.apply(Event::Verified)?;
        self.enter_step(0).await
    }

    async fn tick_shifting(&mut self) -> Result<(), DeployError> {
        let router = self.router().clone();
        let Some(live) = self.live.as_ref() else {
            return Ok(());
        };

        // Swap already applied before a restart.
        if router.active().id() == &live.record.target {
            return self.begin_finalizing();
        }

        let index = live.record.step_index;
        let Some(step) = live.record.plan.step(index).copied() else {
            return self.begin_finalizing();
        };

        // Members without a recent observation are unknown, not failed: a
        // restart re-registers every member unprobed.
        let standby = router.standby();
        let health = standby.health_within(standby.policy().interval * STALE_AFTER_INTERVALS);
        let held = live.phase_since.elapsed() >= step.hold;
        let unknown = health.unprobed > 0 && health.failing() == 0;
        if health.members == 0 || health.failing() > 0 || (unknown && held) {
            tracing::warn!(
                deployment = %live.record.id,
                pool = %standby.id(),
                healthy = health.healthy,
                failing = health.failing(),
                unprobed = health.unprobed,
                "standby unhealthy during traffic shift"
            );
            let reason = RollbackReason::StandbyUnhealthy {
                step: index + 1,
                weight: step.weight.get(),
            };
            return self.abort(Event::Abort, reason).await;
        }
        if unknown {
            tracing::debug!(deployment = %live.record.id, unprobed = health.unprobed, "waiting for standby observations");
            return Ok(());
        }

        if !held {
            return Ok(());
        }

        if live.record.plan.is_last(index) {
            self.begin_finalizing()
        } else {
            self.enter_step(index + 1).await
        }
    }

    /// Apply plan step `index` and start its hold.
    async fn enter_step(&mut self, index: usize) -> Result<(), DeployError> {
        let router = self.router().clone();
        let key = self.service.service().clone();
        let Some(live) = self.live.as_mut() else {
            return Ok(());
        };
        let Some(step) = live.record.plan.step(index).copied() else {
            return Ok(());
        };

        if let Err(e) = router.shift_traffic(step.weight.into()) {
            let reason = RollbackReason::ShiftRejected {
                message: e.to_string(),
            };
            return self.abort(Event::Abort, reason).await;
        }

        live.record.step_index = index;
        live.record.current_weight = step.weight;
        live.phase_since = Instant::now();
        tracing::info!(
            deployment = %live.record.id,
            step = index + 1,
            steps = live.record.plan.len(),
            weight = step.weight.get(),
            hold = ?step.hold,
            "holding traffic step"
        );

        save_deployment(&self.store, &live.record)?;
        save_router(&self.store, &key, &router)?;
        Ok(())
    }

    /// Point of no return: swap roles, promote the staged set, start draining.
    fn begin_finalizing(&mut self) -> Result<(), DeployError> {
        let router = self.router().clone();
        let key = self.service.service().clone();
        let Some(live) = self.live.as_mut() else {
            return Ok(());
        };

        live.record.apply(Event::PlanCompleted)?;
        if router.active().id() != &live.record.target {
            router.swap();
        }
        live.record.current_weight = Weight::ZERO;
        if self.service.staged().is_some() {
            self.service.promote()?;
        }
        live.drain_until = Some(Instant::now() + self.settings.deregistration_delay);

        save_router(&self.store, &key, &router)?;
        save_service(&self.store, &self.service)?;
        save_deployment(&self.store, &live.record)?;
        Ok(())
    }

    async fn tick_finalizing(&mut self) -> Result<(), DeployError> {
        let router = self.router().clone();
        let key = self.service.service().clone();
        let delay = self.settings.deregistration_delay;
        let Some(live) = self.live.as_mut() else {
            return Ok(());
        };

        if router.active().id() != &live.record.target {
            router.swap();
            save_router(&self.store, &key, &router)?;
        }
        if self.service.staged().is_some() {
            self.service.promote()?;
            save_service(&self.store, &self.service)?;
        }

        let until = *live
            .drain_until
            .get_or_insert_with(|| Instant::now() + delay);
        if Instant::now() < until {
            return Ok(());
        }

        if let Err(e) = self.service.decommission().await {
            tracing::warn!(deployment = %live.record.id, "decommission incomplete: {}", e);
        }
        live.record.apply(Event::Drained)?;
        save_service(&self.store, &self.service)?;
        save_deployment(&self.store, &live.record)?;
        tracing::info!(
            deployment = %live.record.id,
            service = %key,
            active = %router.active().id(),
            "deployment completed"
        );
        Ok(())
    }

    /// Enter `RollingBack` with `reason`, then roll back.
    async fn abort(&mut self, event: Event, reason: RollbackReason) -> Result<(), DeployError> {
        let Some(live) = self.live.as_mut() else {
            return Ok(());
        };
        tracing::warn!(deployment = %live.record.id, %reason, "rolling back deployment");
        live.record.apply(event)?;
        live.record.failure = Some(reason);
        save_deployment(&self.store, &live.record)?;
        self.roll_back().await
    }

    /// Revert traffic to the active pool, then revert standby membership.
    /// Safe to repeat.
    async fn roll_back(&mut self) -> Result<(), DeployError> {
        let router = self.router().clone();
        let key = self.service.service().clone();
        let Some(live) = self.live.as_mut() else {
            return Ok(());
        };

        if let Err(e) = router.shift_traffic(0) {
            tracing::warn!(deployment = %live.record.id, "failed to reset traffic weight: {}", e);
        }
        live.record.current_weight = Weight::ZERO;
        save_router(&self.store, &key, &router)?;

        if let Err(e) = self.service.revert().await {
            tracing::warn!(deployment = %live.record.id, "staged replicas not fully removed: {}", e);
        }
        save_service(&self.store, &self.service)?;

        live.record.apply(Event::Reverted)?;
        save_deployment(&self.store, &live.record)?;
        tracing::warn!(
            deployment = %live.record.id,
            service = %key,
            reason = ?live.record.failure,
            "deployment rolled back"
        );
        Ok(())
    }

    fn publish(&self) {
        *self.status.write() = self.status();
    }
}

/// `getDeployment(service)`: status of the service's most recent deployment.
pub fn load_status(
    store: &Store,
    service: &ServiceName,
) -> Result<Option<DeploymentStatus>, StoreError> {
    let Some(id) = store.get::<DeploymentId>(Collection::Live, service.as_str())? else {
        return Ok(None);
    };
    let record = store.get::<Deployment>(Collection::Deployments, id.as_str())?;
    Ok(record.map(|d| d.status()))
}

/// A router persisted ahead of its deployment record already carries a
/// later step's weight. Move the record up to that step so the resumed
/// shift never lowers the weight.
fn adopt_applied_step(record: &mut Deployment, applied: Weight) {
    if applied <= record.current_weight {
        return;
    }
    let Some(index) = record.plan.steps().iter().position(|s| s.weight == applied) else {
        tracing::warn!(
            deployment = %record.id,
            weight = applied.get(),
            "persisted router weight matches no plan step"
        );
        return;
    };
    tracing::info!(
        deployment = %record.id,
        from = record.step_index + 1,
        to = index + 1,
        "router is ahead of the deployment record; adopting its step"
    );
    record.step_index = index;
    record.current_weight = applied;
}

fn save_deployment(store: &Store, record: &Deployment) -> Result<(), StoreError> {
    store.put(Collection::Deployments, record.id.as_str(), record)
}

fn save_router(store: &Store, service: &ServiceName, router: &Router) -> Result<(), StoreError> {
    store.put(Collection::Routers, service.as_str(), &router.state())
}

fn save_service(store: &Store, service: &ReleaseService) -> Result<(), StoreError> {
    store.put(
        Collection::Services,
        service.service().as_str(),
        service.record(),
    )
}
