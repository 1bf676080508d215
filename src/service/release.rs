// ABOUTME: The release service: replica sets bound to the router's pools.
// ABOUTME: Stages a new set on standby, reverts or promotes it, and retires the old set.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::error::{SchedulerError, ServiceError};
use super::scheduler::{LaunchRequest, Replica, ReplicaScheduler};
use crate::traffic::{Router, RouterError, TrafficPool};
use crate::types::{ArtifactRef, Endpoint, PoolId, ServiceName};

/// Replicas launched for a deployment, not yet carrying the binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedSet {
    pub pool: PoolId,
    pub artifact: ArtifactRef,
    pub replicas: Vec<Replica>,
    /// Members the pool had before staging; re-registered on revert.
    #[serde(default)]
    pub parked: Vec<Endpoint>,
}

/// Durable view of the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub service: ServiceName,
    pub binding: PoolId,
    #[serde(default)]
    pub artifact: Option<ArtifactRef>,
    #[serde(default)]
    pub serving: Vec<Replica>,
    #[serde(default)]
    pub staged: Option<StagedSet>,
    /// Former serving replicas awaiting decommission.
    #[serde(default)]
    pub retiring: Vec<Replica>,
    /// Endpoints parked by a staged set that was then promoted. They are
    /// no longer in any pool and nothing here stops them.
    #[serde(default)]
    pub displaced: Vec<Endpoint>,
}

/// How far a staged replica set is from being bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindProgress {
    /// Nothing staged.
    Idle,
    /// Staged, but not every replica was launched.
    Incomplete { launched: usize, desired: usize },
    Pending {
        healthy: usize,
        desired: usize,
        elapsed: Duration,
    },
    Ready,
    /// The bind grace period elapsed before every replica reported healthy.
    Stalled { elapsed: Duration },
}

/// A running set of replicas bound to exactly one of the router's pools.
pub struct ReleaseService {
    router: Router,
    scheduler: Arc<dyn ReplicaScheduler>,
    desired: usize,
    bind_timeout: Duration,
    record: ServiceRecord,
    staged_since: Option<Instant>,
}

impl std::fmt::Debug for ReleaseService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseService")
            .field("desired", &self.desired)
            .field("bind_timeout", &self.bind_timeout)
            .field("record", &self.record)
            .finish()
    }
}

impl ReleaseService {
    /// A service with no replicas, bound to the router's active pool.
    pub fn new(
        service: ServiceName,
        desired: usize,
        bind_timeout: Duration,
        router: Router,
        scheduler: Arc<dyn ReplicaScheduler>,
    ) -> Self {
        let binding = router.active().id().clone();
        Self {
            router,
            scheduler,
            desired,
            bind_timeout,
            record: ServiceRecord {
                service,
                binding,
                artifact: None,
                serving: Vec::new(),
                staged: None,
                retiring: Vec::new(),
                displaced: Vec::new(),
            },
            staged_since: None,
        }
    }

    pub fn service(&self) -> &ServiceName {
        &self.record.service
    }

    pub fn desired_replicas(&self) -> usize {
        self.desired
    }

    pub fn current_binding(&self) -> &PoolId {
        &self.record.binding
    }

    pub fn artifact(&self) -> Option<&ArtifactRef> {
        self.record.artifact.as_ref()
    }

    pub fn staged(&self) -> Option<&StagedSet> {
        self.record.staged.as_ref()
    }

    pub fn record(&self) -> &ServiceRecord {
        &self.record
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Reinstate a persisted record and re-register its replicas.
    ///
    /// Parked endpoints stay out of their pool. A staged set restarts its
    /// bind grace period.
    pub fn restore(&mut self, record: ServiceRecord) -> Result<(), ServiceError> {
        let binding = self.pool(&record.binding)?.clone();
        for replica in &record.serving {
            binding.register(replica.endpoint.clone());
        }
        if let Some(staged) = &record.staged {
            let pool = self.pool(&staged.pool)?;
            for replica in &staged.replicas {
                pool.register(replica.endpoint.clone());
            }
            self.staged_since = Some(Instant::now());
        }
        for replica in &record.retiring {
            if let Ok(pool) = self.pool(&replica.pool) {
                pool.register(replica.endpoint.clone());
            }
        }

        tracing::debug!(
            service = %record.service,
            binding = %record.binding,
            serving = record.serving.len(),
            staged = record.staged.is_some(),
            "restored release service"
        );
        self.record = record;
        Ok(())
    }

    /// Stage `desired` replicas of `artifact` in `pool`.
    ///
    /// Whatever the pool held before is deregistered and parked. Returns
    /// once every replica is launched and registered; use
    /// [`bind_progress`](Self::bind_progress) to learn when they are healthy.
    /// `checkpoint` sees the record once the set is opened and again after
    /// every launch. A launch failure stops the replicas started so far and
    /// restores the pool before returning.
    pub async fn bind(
        &mut self,
        pool: &PoolId,
        artifact: &ArtifactRef,
        mut checkpoint: impl FnMut(&ServiceRecord),
    ) -> Result<(), ServiceError> {
        if let Some(staged) = &self.record.staged {
            return Err(ServiceError::BindInProgress {
                pool: staged.pool.clone(),
            });
        }
        let target = self.pool(pool)?.clone();
        if *pool == self.record.binding {
            return Err(ServiceError::PoolServing(pool.clone()));
        }

        let parked = target.members();
        for endpoint in &parked {
            target.deregister(endpoint);
        }
        self.record.staged = Some(StagedSet {
            pool: pool.clone(),
            artifact: artifact.clone(),
            replicas: Vec::with_capacity(self.desired),
            parked,
        });
        self.staged_since = Some(Instant::now());
        checkpoint(&self.record);

        self.launch_remaining(checkpoint).await
    }

    /// Launch the replicas a staged set is still missing, as after a
    /// restart cut a bind short.
    pub async fn launch_remaining(
        &mut self,
        mut checkpoint: impl FnMut(&ServiceRecord),
    ) -> Result<(), ServiceError> {
        let Some(staged) = &self.record.staged else {
            return Err(ServiceError::NothingStaged);
        };
        let target = self.pool(&staged.pool)?.clone();
        let (pool, artifact) = (staged.pool.clone(), staged.artifact.clone());

        for index in staged.replicas.len()..self.desired {
            let request = LaunchRequest {
                service: self.record.service.clone(),
                pool: pool.clone(),
                artifact: artifact.clone(),
                index,
            };
            match self.scheduler.launch(&request).await {
                Ok(replica) => {
                    target.register(replica.endpoint.clone());
                    if let Some(staged) = self.record.staged.as_mut() {
                        staged.replicas.push(replica);
                    }
                    checkpoint(&self.record);
                }
                Err(source) => {
                    tracing::warn!(pool = %pool, index, "replica launch failed: {}", source);
                    self.staged_since = None;
                    if let Some(staged) = self.record.staged.take() {
                        self.unstage(&target, &staged.replicas, &staged.parked).await;
                    }
                    checkpoint(&self.record);
                    return Err(ServiceError::Launch { index, source });
                }
            }
        }

        tracing::info!(
            service = %self.record.service,
            pool = %pool,
            artifact = %artifact,
            replicas = self.desired,
            "staged replica set"
        );
        Ok(())
    }

    pub fn bind_progress(&self) -> BindProgress {
        let (Some(staged), Some(since)) = (&self.record.staged, self.staged_since) else {
            return BindProgress::Idle;
        };
        let elapsed = since.elapsed();
        if staged.replicas.len() < self.desired {
            return BindProgress::Incomplete {
                launched: staged.replicas.len(),
                desired: self.desired,
            };
        }
        let health = match self.pool(&staged.pool) {
            Ok(pool) => pool.health(),
            Err(_) => return BindProgress::Stalled { elapsed },
        };

        if health.is_healthy() && health.members >= self.desired {
            BindProgress::Ready
        } else if elapsed >= self.bind_timeout {
            BindProgress::Stalled { elapsed }
        } else {
            BindProgress::Pending {
                healthy: health.healthy,
                desired: self.desired,
                elapsed,
            }
        }
    }

    /// Undo the staged set: deregister and stop its replicas and give the
    /// pool back its parked members. Nothing staged is a no-op.
    ///
    /// Membership is restored even when stopping fails; the stop failures
    /// are reported afterwards.
    pub async fn revert(&mut self) -> Result<(), ServiceError> {
        let Some(staged) = self.record.staged.take() else {
            return Ok(());
        };
        self.staged_since = None;
        let pool = self.pool(&staged.pool)?.clone();

        tracing::info!(pool = %staged.pool, replicas = staged.replicas.len(), "reverting staged replica set");
        let failures = self.unstage(&pool, &staged.replicas, &staged.parked).await;
        stop_result(failures)
    }

    /// Make the staged set the current binding. The previous serving set
    /// stays registered until [`decommission`](Self::decommission).
    pub fn promote(&mut self) -> Result<(), ServiceError> {
        let staged = self
            .record
            .staged
            .take()
            .ok_or(ServiceError::NothingStaged)?;
        self.staged_since = None;

        let previous = std::mem::replace(&mut self.record.serving, staged.replicas);
        self.record.retiring.extend(previous);
        if !staged.parked.is_empty() {
            tracing::warn!(
                service = %self.record.service,
                pool = %staged.pool,
                endpoints = ?staged.parked,
                "promoted over {} parked endpoint(s); they stay out of the pool",
                staged.parked.len()
            );
            self.record.displaced.extend(staged.parked);
        }
        tracing::info!(
            service = %self.record.service,
            from = %self.record.binding,
            to = %staged.pool,
            "promoted staged replica set"
        );
        self.record.binding = staged.pool;
        self.record.artifact = Some(staged.artifact);
        Ok(())
    }

    /// Deregister and stop the retired replicas. Callers drain first.
    pub async fn decommission(&mut self) -> Result<(), ServiceError> {
        let retiring = std::mem::take(&mut self.record.retiring);
        if retiring.is_empty() {
            return Ok(());
        }

        for replica in &retiring {
            if let Ok(pool) = self.pool(&replica.pool) {
                pool.deregister(&replica.endpoint);
            }
        }

        let mut failures = Vec::new();
        for replica in &retiring {
            if let Err(e) = self.scheduler.stop(replica).await {
                tracing::warn!(replica = %replica.id, "failed to stop retired replica: {}", e);
                failures.push(e);
            }
        }

        tracing::info!(replicas = retiring.len(), "decommissioned retired replicas");
        stop_result(failures)
    }

    fn pool(&self, id: &PoolId) -> Result<&TrafficPool, ServiceError> {
        self.router
            .slot_of(id)
            .map(|slot| self.router.pool(slot))
            .ok_or_else(|| RouterError::UnknownPool(id.clone()).into())
    }

    async fn unstage(
        &self,
        pool: &TrafficPool,
        replicas: &[Replica],
        parked: &[Endpoint],
    ) -> Vec<SchedulerError> {
        for replica in replicas {
            pool.deregister(&replica.endpoint);
        }
        for endpoint in parked {
            pool.register(endpoint.clone());
        }

        let mut failures = Vec::new();
        for replica in replicas {
            if let Err(e) = self.scheduler.stop(replica).await {
                tracing::warn!(replica = %replica.id, "failed to stop staged replica: {}", e);
                failures.push(e);
            }
        }
        failures
    }
}

fn stop_result(failures: Vec<SchedulerError>) -> Result<(), ServiceError> {
    let failed = failures.len();
    match failures.into_iter().next() {
        None => Ok(()),
        Some(first) => Err(ServiceError::Stop { failed, first }),
    }
}
