// ABOUTME: Queue an operator request in the inbox for the daemon to apply.
// ABOUTME: Approve, reject, and cancel are checked against the persisted run first.

use cutover::config::Config;
use cutover::error::Result;
use cutover::output::Output;
use cutover::pipeline::{OperatorRequest, PipelineError, PipelineRun};
use cutover::store::{Collection, Inbox, StateLock, Store};

pub fn submit(config: &Config, request: OperatorRequest, output: &Output) -> Result<()> {
    let store = Store::open(&config.state_dir)?;

    let named = match &request {
        OperatorRequest::Trigger { .. } => None,
        OperatorRequest::Approve { run }
        | OperatorRequest::Reject { run, .. }
        | OperatorRequest::Cancel { run } => Some(run),
    };
    if let Some(id) = named {
        let run = store
            .get::<PipelineRun>(Collection::Runs, id.as_str())?
            .ok_or_else(|| PipelineError::UnknownRun(id.clone()))?;
        if run.is_finished() {
            return Err(PipelineError::Finished(id.clone()).into());
        }
    }

    let key = Inbox::new(store).submit(&request)?;
    tracing::debug!(%key, "request queued");

    if StateLock::read(&config.state_dir)?.is_none() {
        output.warning("no daemon holds the state lock; the request waits for `cutover serve`");
    }
    output.success(&format!("Queued {request}"));
    Ok(())
}
