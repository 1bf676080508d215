// ABOUTME: Test support utilities.
// ABOUTME: Fake collaborators and a tick-by-tick harness around the cutover controller.

// Each test binary only uses some of these helpers, so allow dead_code.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::Once;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;

use cutover::deploy::{ControllerSettings, CutoverController, DeploymentState, TrafficShiftPlan};
use cutover::pipeline::{BuildError, BuildOutput, Builder, SourceError, SourceProvider};
use cutover::service::{LaunchRequest, ReleaseService, Replica, ReplicaScheduler, SchedulerError};
use cutover::store::Store;
use cutover::traffic::{
    HealthCheckPolicy, HealthProbe, Router, Slot, TrafficPool, Weight, probe_pool,
};
use cutover::types::{ArtifactRef, Endpoint, PoolId, ReplicaId, Revision, RunId, ServiceName};

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env().add_directive("cutover=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub fn service_name() -> ServiceName {
    ServiceName::new("web").unwrap()
}

pub fn artifact(tag: &str) -> ArtifactRef {
    ArtifactRef::parse(&format!("registry/web:{tag}")).unwrap()
}

pub fn policy() -> HealthCheckPolicy {
    HealthCheckPolicy {
        path: "/health".to_string(),
        interval: Duration::from_secs(10),
        timeout: Duration::from_secs(5),
    }
}

pub fn router() -> Router {
    Router::new(
        TrafficPool::new(PoolId::new("web-blue"), 0, policy()),
        TrafficPool::new(PoolId::new("web-green"), 0, policy()),
    )
}

/// Scheduler that hands out endpoints without starting anything.
///
/// Endpoints come from `queue` while it lasts, then `replica-N:8080`.
#[derive(Default)]
pub struct FakeScheduler {
    launched: Mutex<Vec<Replica>>,
    stopped: Mutex<Vec<Replica>>,
    queue: Mutex<VecDeque<Endpoint>>,
    fail_launch_at: Mutex<Option<usize>>,
    seq: AtomicUsize,
}

impl FakeScheduler {
    pub fn with_endpoints(endpoints: impl IntoIterator<Item = Endpoint>) -> Self {
        let scheduler = Self::default();
        scheduler.queue.lock().extend(endpoints);
        scheduler
    }

    /// Fail the launch of replica `index` within a set.
    pub fn fail_launch_at(&self, index: usize) {
        *self.fail_launch_at.lock() = Some(index);
    }

    pub fn launched(&self) -> Vec<Replica> {
        self.launched.lock().clone()
    }

    pub fn stopped(&self) -> Vec<Replica> {
        self.stopped.lock().clone()
    }
}

#[async_trait]
impl ReplicaScheduler for FakeScheduler {
    async fn launch(&self, request: &LaunchRequest) -> Result<Replica, SchedulerError> {
        if *self.fail_launch_at.lock() == Some(request.index) {
            return Err(SchedulerError::Launch("capacity exhausted".to_string()));
        }
        let n = self.seq.fetch_add(1, Ordering::Relaxed);
        let endpoint = self
            .queue
            .lock()
            .pop_front()
            .unwrap_or_else(|| Endpoint::new(format!("replica-{n}"), 8080));
        let replica = Replica {
            id: ReplicaId::new(format!("{}-{}", request.pool, n)),
            endpoint,
            pool: request.pool.clone(),
            artifact: request.artifact.clone(),
        };
        self.launched.lock().push(replica.clone());
        Ok(replica)
    }

    async fn stop(&self, replica: &Replica) -> Result<(), SchedulerError> {
        self.stopped.lock().push(replica.clone());
        Ok(())
    }
}

/// Every endpoint is healthy unless marked failing.
#[derive(Default)]
pub struct FakeProbe {
    failing: Mutex<HashSet<Endpoint>>,
}

impl FakeProbe {
    pub fn fail(&self, endpoint: &Endpoint) {
        self.failing.lock().insert(endpoint.clone());
    }

    pub fn fail_pool(&self, pool: &TrafficPool) {
        for endpoint in pool.members() {
            self.fail(&endpoint);
        }
    }

    pub fn heal_all(&self) {
        self.failing.lock().clear();
    }
}

#[async_trait]
impl HealthProbe for FakeProbe {
    async fn probe(&self, endpoint: &Endpoint, _path: &str, _timeout: Duration) -> bool {
        !self.failing.lock().contains(endpoint)
    }
}

/// Source with a current revision that tests can move.
pub struct FakeSource {
    latest: Mutex<Result<Revision, SourceError>>,
    fetched: AtomicUsize,
}

impl FakeSource {
    pub fn at(revision: &str) -> Self {
        Self {
            latest: Mutex::new(Ok(Revision::parse(revision).unwrap())),
            fetched: AtomicUsize::new(0),
        }
    }

    pub fn unavailable(message: &str) -> Self {
        Self {
            latest: Mutex::new(Err(SourceError::Unavailable(message.to_string()))),
            fetched: AtomicUsize::new(0),
        }
    }

    pub fn move_to(&self, revision: &str) {
        *self.latest.lock() = Ok(Revision::parse(revision).unwrap());
    }

    pub fn fetches(&self) -> usize {
        self.fetched.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SourceProvider for FakeSource {
    async fn fetch(&self, requested: Option<&Revision>) -> Result<Revision, SourceError> {
        self.fetched.fetch_add(1, Ordering::Relaxed);
        match requested {
            Some(revision) => Ok(revision.clone()),
            None => self.latest.lock().clone(),
        }
    }
}

/// Builds `registry/web:<revision>`, or fails for revisions marked broken.
/// A held builder does not finish until released.
#[derive(Default)]
pub struct FakeBuilder {
    broken: Mutex<HashSet<String>>,
    builds: AtomicUsize,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeBuilder {
    pub fn hold(&self) {
        *self.gate.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self) {
        if let Some(gate) = self.gate.lock().take() {
            gate.add_permits(1024);
        }
    }

    pub fn break_revision(&self, revision: &str) {
        self.broken.lock().insert(revision.to_string());
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Builder for FakeBuilder {
    async fn build(&self, _run: &RunId, revision: &Revision) -> Result<BuildOutput, BuildError> {
        self.builds.fetch_add(1, Ordering::Relaxed);
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            let _permit = gate.acquire().await;
        }
        if self.broken.lock().contains(revision.as_str()) {
            return Err(BuildError {
                message: "exit code 2: compilation failed".to_string(),
                log: None,
            });
        }
        Ok(BuildOutput {
            artifact: artifact(revision.as_str()),
            log: None,
        })
    }
}

pub fn settings(plan: TrafficShiftPlan) -> ControllerSettings {
    ControllerSettings {
        plan,
        verify_probes: 3,
        verify_interval: Duration::from_secs(10),
        deregistration_delay: Duration::from_secs(30),
    }
}

/// `[(25%, 60s), (50%, 60s), (100%, 60s)]`
pub fn three_step_plan() -> TrafficShiftPlan {
    let minute = Duration::from_secs(60);
    TrafficShiftPlan::from_pairs(&[(25, minute), (50, minute), (100, minute)]).unwrap()
}

pub const BIND_TIMEOUT: Duration = Duration::from_secs(300);

pub fn assert_weight_matches_state(router: &Router, state: Option<DeploymentState>) {
    let weight = router.weight();
    assert!(
        weight == Weight::ZERO || state == Some(DeploymentState::ShiftingTraffic),
        "standby weight {weight} while {state:?}"
    );
}

/// A controller wired to fakes, driven one tick at a time.
pub struct Harness {
    pub router: Router,
    pub scheduler: Arc<FakeScheduler>,
    pub probe: Arc<FakeProbe>,
    pub store: Store,
    pub controller: CutoverController,
}

impl Harness {
    pub fn new(settings: ControllerSettings) -> Self {
        Self::with_store(Store::memory(), settings)
    }

    /// A fresh process over existing state: new pools, new fakes, same store.
    pub fn with_store(store: Store, settings: ControllerSettings) -> Self {
        Self::build(store, settings, Arc::new(FakeScheduler::default()))
    }

    pub fn build(store: Store, settings: ControllerSettings, scheduler: Arc<FakeScheduler>) -> Self {
        init_tracing();
        let router = router();
        let probe = Arc::new(FakeProbe::default());
        let service = ReleaseService::new(
            service_name(),
            2,
            BIND_TIMEOUT,
            router.clone(),
            scheduler.clone(),
        );
        let controller = CutoverController::new(service, probe.clone(), store.clone(), settings);
        Self {
            router,
            scheduler,
            probe,
            store,
            controller,
        }
    }

    pub fn pool(&self, slot: Slot) -> &TrafficPool {
        self.router.pool(slot)
    }

    /// Probe both pools once, as the background monitors would.
    pub async fn observe(&self) {
        for slot in Slot::ALL {
            probe_pool(self.router.pool(slot), self.probe.as_ref()).await;
        }
    }

    pub fn state(&self) -> Option<DeploymentState> {
        self.controller.current().map(|d| d.state)
    }

    /// Observe, then tick once. Traffic only ever reaches standby while
    /// shifting, and every step checks that.
    pub async fn step(&mut self) -> Option<DeploymentState> {
        self.observe().await;
        let state = self.controller.tick().await.unwrap();
        assert_weight_matches_state(&self.router, state);
        state
    }

    /// Step every `every` of paused time until `done` holds, recording the
    /// router weight after each step.
    pub async fn step_until(
        &mut self,
        every: Duration,
        mut done: impl FnMut(&Harness) -> bool,
    ) -> Vec<Weight> {
        let mut weights = Vec::new();
        for _ in 0..1_000 {
            self.step().await;
            weights.push(self.router.weight());
            if done(self) {
                return weights;
            }
            tokio::time::advance(every).await;
        }
        panic!("condition not reached; state {:?}", self.state());
    }

    pub async fn settle(&mut self) -> Vec<Weight> {
        self.step_until(Duration::from_secs(5), |h| {
            h.controller.current().is_some_and(|d| d.is_terminal())
        })
        .await
    }
}
