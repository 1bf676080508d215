// ABOUTME: Status command: routing, the latest deployment, and recent runs.
// ABOUTME: Reads persisted state only, so it works with or without a daemon.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write;

use cutover::config::Config;
use cutover::deploy::{DeploymentStatus, load_status};
use cutover::error::Result;
use cutover::output::Output;
use cutover::pipeline::PipelineRun;
use cutover::store::{Collection, LockInfo, StateLock, Store};
use cutover::traffic::{RouteSnapshot, RouterState};
use cutover::types::{ArtifactRef, DeploymentId, Revision, RunId, ServiceName};

const RECENT_RUNS: usize = 10;

#[derive(Serialize)]
struct StatusReport {
    service: ServiceName,
    daemon: Option<LockInfo>,
    router: RouteSnapshot,
    deployment: Option<DeploymentStatus>,
    runs: Vec<RunSummary>,
}

#[derive(Serialize)]
struct RunSummary {
    id: RunId,
    status: String,
    revision: Option<Revision>,
    artifact: Option<ArtifactRef>,
    deployment: Option<DeploymentId>,
    created_at: DateTime<Utc>,
}

impl From<PipelineRun> for RunSummary {
    fn from(run: PipelineRun) -> Self {
        Self {
            status: run.stage.to_string(),
            id: run.id,
            revision: run.revision.or(run.requested),
            artifact: run.artifact,
            deployment: run.deployment,
            created_at: run.created_at,
        }
    }
}

pub fn status(config: &Config, output: &Output) -> Result<()> {
    let store = Store::open(&config.state_dir)?;

    let state = store
        .get::<RouterState>(Collection::Routers, config.service.as_str())?
        .unwrap_or_default();
    let router = RouteSnapshot {
        active: config.pool_id(state.active),
        standby: config.pool_id(state.active.other()),
        active_slot: state.active,
        weight: state.weight,
    };

    let mut runs = store.list::<PipelineRun>(Collection::Runs)?;
    runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    runs.truncate(RECENT_RUNS);

    let report = StatusReport {
        service: config.service.clone(),
        daemon: StateLock::read(&config.state_dir)?,
        router,
        deployment: load_status(&store, &config.service)?,
        runs: runs.into_iter().map(RunSummary::from).collect(),
    };

    output.document(&report, || render(&report));
    Ok(())
}

fn render(report: &StatusReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Service: {}", report.service);

    match &report.daemon {
        Some(lock) if lock.is_stale() => {
            let _ = writeln!(
                out,
                "Daemon: stale lock from {} (pid {})",
                lock.holder, lock.pid
            );
        }
        Some(lock) => {
            let _ = writeln!(out, "Daemon: running on {} (pid {})", lock.holder, lock.pid);
        }
        None => {
            let _ = writeln!(out, "Daemon: not running");
        }
    }

    let r = &report.router;
    let _ = writeln!(
        out,
        "Router: {} active ({}), standby {} at {}",
        r.active_slot, r.active, r.standby, r.weight
    );

    match &report.deployment {
        Some(d) => {
            let _ = write!(out, "Deployment {}: {}", d.id, d.state);
            if let Some(step) = d.step {
                let _ = write!(out, " step {step}/{}", d.steps);
            }
            let _ = writeln!(
                out,
                ", weight {}, artifact {}, started {}",
                d.current_weight,
                d.artifact,
                d.started_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
            if let Some(failure) = &d.failure {
                let _ = writeln!(out, "  rolled back: {failure}");
            }
        }
        None => {
            let _ = writeln!(out, "Deployment: none");
        }
    }

    if report.runs.is_empty() {
        let _ = writeln!(out, "Runs: none");
    } else {
        let _ = writeln!(out, "Runs:");
        for run in &report.runs {
            let revision = run.revision.as_ref().map_or("latest", |r| r.short());
            let _ = writeln!(out, "  {}  {}  {}", run.id, revision, run.status);
        }
    }
    out
}
