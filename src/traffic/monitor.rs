// ABOUTME: Background health monitoring, one independent task per pool.
// ABOUTME: Probes every member each interval and records the observations on the pool.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::pool::{PoolHealth, TrafficPool};
use super::probe::HealthProbe;

/// Probe every current member of `pool` once, concurrently, and record
/// the results. The pool's own timeout bounds each probe.
pub async fn probe_pool(pool: &TrafficPool, probe: &dyn HealthProbe) -> PoolHealth {
    let policy = pool.policy().clone();
    let checks = pool.members().into_iter().map(|endpoint| {
        let policy = &policy;
        async move {
            let healthy = tokio::time::timeout(
                policy.timeout,
                probe.probe(&endpoint, &policy.path, policy.timeout),
            )
            .await
            .unwrap_or(false);
            (endpoint, healthy)
        }
    });

    for (endpoint, healthy) in futures::future::join_all(checks).await {
        pool.record_probe(&endpoint, healthy);
    }

    pool.health()
}

/// Handle to a running pool monitor. Dropping it stops the monitor.
pub struct MonitorHandle {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Stop the monitor and wait for the in-flight round to finish.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// Start probing `pool` every `policy.interval`.
///
/// Each pool gets its own task so a slow pool never delays the other, and
/// nothing here waits on traffic-shift progress.
pub fn spawn_monitor(pool: TrafficPool, probe: Arc<dyn HealthProbe>) -> MonitorHandle {
    let (shutdown, mut stopped) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(pool.policy().interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let before = pool.is_healthy();
                    let health = probe_pool(&pool, probe.as_ref()).await;
                    if before != health.is_healthy() {
                        tracing::info!(
                            pool = %pool.id(),
                            healthy = health.healthy,
                            members = health.members,
                            "pool health changed to {}",
                            if health.is_healthy() { "healthy" } else { "unhealthy" }
                        );
                    }
                }
                changed = stopped.changed() => {
                    if changed.is_err() || *stopped.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::debug!(pool = %pool.id(), "health monitor stopped");
    });

    MonitorHandle {
        shutdown,
        task: Some(task),
    }
}
