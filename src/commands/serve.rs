// ABOUTME: The release daemon: one loop drives inbox, source polling, pipeline, and cutover.
// ABOUTME: Health monitors and proxy listeners run beside it until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use cutover::config::Config;
use cutover::deploy::{CutoverController, DeployError};
use cutover::diagnostics::{Diagnostics, Warning};
use cutover::error::{Error, Result};
use cutover::output::Output;
use cutover::pipeline::{
    CommandBuilder, CommandSource, OperatorRequest, PipelineError, PolledRevision, ReleasePipeline,
    SourcePoller, SourceProvider,
};
use cutover::service::{CommandScheduler, ReleaseService};
use cutover::store::{Inbox, StateLock, Store};
use cutover::traffic::{HealthProbe, HttpProbe, Router, Slot, spawn_monitor, start_proxy};
use cutover::types::RunId;

const LOCK_REFRESH: Duration = Duration::from_secs(60);

pub async fn serve(config: Config, force_lock: bool, output: &Output) -> Result<()> {
    let daemon = config.daemon_commands()?;
    let env = config.resolved_env()?;
    let settings = config.controller_settings()?;

    std::fs::create_dir_all(&config.state_dir)?;
    let mut lock = StateLock::acquire(&config.state_dir, force_lock)?;
    let store = Store::open(&config.state_dir)?;
    let mut diag = Diagnostics::default();

    let (blue, green) = config.build_pools();
    let router = Router::new(blue, green);
    let scheduler = Arc::new(CommandScheduler::new(
        daemon.scheduler.launch.clone(),
        daemon.scheduler.stop.clone(),
        env.clone(),
    ));
    let probe: Arc<dyn HealthProbe> = Arc::new(HttpProbe::new());
    let service = ReleaseService::new(
        config.service.clone(),
        config.replicas,
        config.deploy.bind_timeout,
        router.clone(),
        scheduler,
    );
    let controller = CutoverController::new(service, probe.clone(), store.clone(), settings);

    let source: Arc<dyn SourceProvider> =
        Arc::new(CommandSource::new(daemon.source.spec(), env.clone()));
    let builder = Arc::new(CommandBuilder::new(
        daemon.build.clone(),
        env,
        config.build_log_dir(),
    ));
    let mut pipeline = ReleasePipeline::new(
        controller,
        source.clone(),
        builder,
        store.clone(),
        config.pipeline_settings(),
    );

    let result = drive(
        &config,
        &mut pipeline,
        &router,
        probe,
        source,
        &store,
        &mut lock,
        &mut diag,
        output,
    )
    .await;

    if let Err(e) = lock.release() {
        diag.warn(Warning::lock_release(format!(
            "failed to remove state lock: {e}"
        )));
    }
    for warning in diag.warnings() {
        output.warning(&warning.message);
    }

    if result.is_ok() {
        output.success("Daemon stopped");
    }
    result
}

/// Resume persisted work, start monitors and listeners, and run until shutdown.
#[allow(clippy::too_many_arguments)]
async fn drive(
    config: &Config,
    pipeline: &mut ReleasePipeline,
    router: &Router,
    probe: Arc<dyn HealthProbe>,
    source: Arc<dyn SourceProvider>,
    store: &Store,
    lock: &mut StateLock,
    diag: &mut Diagnostics,
    output: &Output,
) -> Result<()> {
    pipeline.resume()?;
    if let Some(status) = pipeline.controller().status() {
        output.progress(&format!(
            "Resumed deployment {} in {}",
            status.id, status.state
        ));
    }

    let monitors = Slot::ALL.map(|slot| spawn_monitor(router.pool(slot).clone(), probe.clone()));
    let proxy = start_proxy(router.clone(), config.router.bind, &config.listeners())
        .await
        .map_err(Error::Proxy)?;
    for (route, _) in config.listeners() {
        if let Some(addr) = proxy.local_addr(route) {
            output.progress(&format!("  → {route} listening on {addr}"));
        }
    }

    let (poller, revisions) = config
        .source
        .as_ref()
        .and_then(|s| s.poll_interval)
        .map(|every| {
            let newest = pipeline.runs().filter_map(|r| r.revision.clone()).last();
            SourcePoller::new(source, every, newest).spawn()
        })
        .unzip();

    output.progress(&format!("Serving {}", config.service));
    let outcome = run_loop(
        config,
        pipeline,
        &Inbox::new(store.clone()),
        revisions,
        lock,
        diag,
        output,
    )
    .await;

    if let Some(poller) = poller {
        poller.abort();
    }
    proxy.stop().await;
    for monitor in monitors {
        monitor.stop().await;
    }
    outcome
}

async fn run_loop(
    config: &Config,
    pipeline: &mut ReleasePipeline,
    inbox: &Inbox,
    mut revisions: Option<mpsc::Receiver<PolledRevision>>,
    lock: &mut StateLock,
    diag: &mut Diagnostics,
    output: &Output,
) -> Result<()> {
    let mut ticker = tokio::time::interval(config.deploy.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut refresh = tokio::time::interval(LOCK_REFRESH);
    refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                output.progress("Shutting down");
                return Ok(());
            }
            _ = refresh.tick() => {
                if let Err(e) = lock.refresh() {
                    diag.warn(Warning::lock_refresh(format!("failed to refresh state lock: {e}")));
                }
            }
            Some(polled) = next_polled(&mut revisions) => {
                match polled {
                    Ok(revision) => {
                        let run = pipeline.trigger(Some(revision));
                        report(run.map(Some), diag, output, "source change")?;
                    }
                    Err(e) => diag.warn(Warning::source_poll(e.to_string())),
                }
            }
            _ = ticker.tick() => {
                drain_inbox(pipeline, inbox, diag, output).await?;

                let ticked = pipeline.tick().await;
                report(ticked.map(|()| None), diag, output, "tick")?;
            }
        }

        for warning in diag.drain() {
            output.warning(&warning.message);
        }
    }
}

/// Next result from the source poller; never resolves without one.
async fn next_polled(
    revisions: &mut Option<mpsc::Receiver<PolledRevision>>,
) -> Option<PolledRevision> {
    match revisions {
        Some(revisions) => revisions.recv().await,
        None => std::future::pending().await,
    }
}

/// Apply queued operator requests in submission order.
async fn drain_inbox(
    pipeline: &mut ReleasePipeline,
    inbox: &Inbox,
    diag: &mut Diagnostics,
    output: &Output,
) -> Result<()> {
    for (key, request) in inbox.pending::<OperatorRequest>()? {
        tracing::info!(%request, "operator request");
        let label = request.to_string();
        let handled = pipeline.handle(request).await;
        report(handled, diag, output, &label)?;
        inbox.ack(&key)?;
    }
    Ok(())
}

/// Persistence failures stop the daemon; anything else is a warning.
fn report(
    result: std::result::Result<Option<RunId>, PipelineError>,
    diag: &mut Diagnostics,
    output: &Output,
    context: &str,
) -> Result<()> {
    match result {
        Ok(Some(run)) => {
            output.progress(&format!("Run {run} triggered ({context})"));
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(e @ (PipelineError::Store(_) | PipelineError::Deploy(DeployError::Store(_)))) => {
            Err(e.into())
        }
        Err(e) => {
            diag.warn(Warning::request_rejected(format!("{context}: {e}")));
            Ok(())
        }
    }
}
