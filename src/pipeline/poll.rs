// ABOUTME: Source polling: asks the source for its latest revision on an interval.
// ABOUTME: Reports each revision once so the daemon can trigger a run for it.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::collaborators::SourceProvider;
use super::error::SourceError;
use crate::types::Revision;

/// A new revision, or why a poll failed.
pub type PolledRevision = Result<Revision, SourceError>;

pub struct SourcePoller {
    source: Arc<dyn SourceProvider>,
    interval: Duration,
    next_poll: Instant,
    last_seen: Option<Revision>,
}

impl SourcePoller {
    /// The first poll is due immediately. `last_seen` is usually the
    /// revision of the newest run, so a restart does not re-trigger it.
    pub fn new(
        source: Arc<dyn SourceProvider>,
        interval: Duration,
        last_seen: Option<Revision>,
    ) -> Self {
        Self {
            source,
            interval,
            next_poll: Instant::now(),
            last_seen,
        }
    }

    pub fn last_seen(&self) -> Option<&Revision> {
        self.last_seen.as_ref()
    }

    /// Poll if due. Returns the latest revision when it differs from the
    /// last one seen.
    pub async fn poll(&mut self) -> Result<Option<Revision>, SourceError> {
        let now = Instant::now();
        if now < self.next_poll {
            return Ok(None);
        }
        self.next_poll = now + self.interval;

        let revision = self.source.fetch(None).await?;
        if self.last_seen.as_ref() == Some(&revision) {
            return Ok(None);
        }
        tracing::info!(revision = %revision.short(), "new source revision");
        self.last_seen = Some(revision.clone());
        Ok(Some(revision))
    }

    /// Poll on a background task so a slow source never holds up the
    /// daemon loop. Every new revision and every failed poll is sent on
    /// the returned channel; the task ends once the receiver is dropped.
    pub fn spawn(mut self) -> (JoinHandle<()>, mpsc::Receiver<PolledRevision>) {
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep_until(self.next_poll).await;
                let polled = match self.poll().await {
                    Ok(None) => continue,
                    Ok(Some(revision)) => Ok(revision),
                    Err(e) => Err(e),
                };
                if tx.send(polled).await.is_err() {
                    return;
                }
            }
        });
        (task, rx)
    }
}
