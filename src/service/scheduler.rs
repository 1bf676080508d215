// ABOUTME: Replica scheduler collaborator: starts and stops task replicas.
// ABOUTME: CommandScheduler shells out to operator-provided launch/stop commands.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::error::SchedulerError;
use crate::exec;
use crate::types::{ArtifactRef, Endpoint, PoolId, ReplicaId, ServiceName};

/// One running replica of the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replica {
    pub id: ReplicaId,
    pub endpoint: Endpoint,
    pub pool: PoolId,
    pub artifact: ArtifactRef,
}

/// What to launch.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub service: ServiceName,
    pub pool: PoolId,
    pub artifact: ArtifactRef,
    /// Position of this replica within the set, `0..desired`.
    pub index: usize,
}

#[async_trait]
pub trait ReplicaScheduler: Send + Sync {
    /// Start one replica. Returns once the scheduler knows its endpoint;
    /// the replica need not be healthy yet.
    async fn launch(&self, request: &LaunchRequest) -> Result<Replica, SchedulerError>;

    /// Stop a replica. Stopping one that is already gone succeeds.
    async fn stop(&self, replica: &Replica) -> Result<(), SchedulerError>;
}

/// A configured shell command with an optional time limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub command: String,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

/// Launches replicas with `launch_command` and stops them with `stop_command`.
///
/// Both commands see `CUTOVER_SERVICE`, `CUTOVER_POOL`, `CUTOVER_ARTIFACT`
/// and `CUTOVER_REPLICA_ID`; launch also sees `CUTOVER_REPLICA_INDEX` and
/// stop sees `CUTOVER_ENDPOINT`. Launch must print the replica's
/// `host:port` as its last line of output.
#[derive(Debug, Clone)]
pub struct CommandScheduler {
    launch: CommandSpec,
    stop: CommandSpec,
    env: HashMap<String, String>,
}

impl CommandScheduler {
    pub fn new(launch: CommandSpec, stop: CommandSpec, env: HashMap<String, String>) -> Self {
        Self { launch, stop, env }
    }

    fn env_for(
        &self,
        pool: &PoolId,
        artifact: &ArtifactRef,
        replica: &ReplicaId,
    ) -> HashMap<String, String> {
        let mut env = self.env.clone();
        env.insert("CUTOVER_POOL".to_string(), pool.to_string());
        env.insert("CUTOVER_ARTIFACT".to_string(), artifact.to_string());
        env.insert("CUTOVER_REPLICA_ID".to_string(), replica.to_string());
        env
    }
}

#[async_trait]
impl ReplicaScheduler for CommandScheduler {
    async fn launch(&self, request: &LaunchRequest) -> Result<Replica, SchedulerError> {
        let id = ReplicaId::generate();
        let mut env = self.env_for(&request.pool, &request.artifact, &id);
        env.insert("CUTOVER_SERVICE".to_string(), request.service.to_string());
        env.insert(
            "CUTOVER_REPLICA_INDEX".to_string(),
            request.index.to_string(),
        );

        let out = exec::run_shell(&self.launch.command, &env, None, self.launch.timeout)
            .await
            .map_err(|e| SchedulerError::Launch(e.to_string()))?;
        if !out.success {
            return Err(SchedulerError::Launch(out.failure_summary()));
        }

        let line = out.last_line().unwrap_or_default();
        let endpoint = Endpoint::parse(line).map_err(|e| SchedulerError::InvalidEndpoint {
            output: line.to_string(),
            reason: e.to_string(),
        })?;

        tracing::debug!(replica = %id, %endpoint, pool = %request.pool, "launched replica");

        Ok(Replica {
            id,
            endpoint,
            pool: request.pool.clone(),
            artifact: request.artifact.clone(),
        })
    }

    async fn stop(&self, replica: &Replica) -> Result<(), SchedulerError> {
        let mut env = self.env_for(&replica.pool, &replica.artifact, &replica.id);
        env.insert("CUTOVER_ENDPOINT".to_string(), replica.endpoint.to_string());

        let out = exec::run_shell(&self.stop.command, &env, None, self.stop.timeout)
            .await
            .map_err(|e| SchedulerError::Stop(e.to_string()))?;
        if !out.success {
            return Err(SchedulerError::Stop(out.failure_summary()));
        }

        tracing::debug!(replica = %replica.id, "stopped replica");
        Ok(())
    }
}
