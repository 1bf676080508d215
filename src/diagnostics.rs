// ABOUTME: Diagnostics accumulator for non-fatal warnings while the daemon runs.
// ABOUTME: Collects warnings that shouldn't stop the daemon but should be shown to operators.

/// Collects non-fatal warnings.
#[derive(Default)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    /// Record a warning, auto-logging it via tracing.
    pub fn warn(&mut self, warning: Warning) {
        tracing::warn!(kind = ?warning.kind, "{}", warning.message);
        self.warnings.push(warning);
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Hand back everything collected so far.
    pub fn drain(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }
}

#[derive(Debug, Clone)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn lock_release(message: impl Into<String>) -> Self {
        Self::new(WarningKind::LockRelease, message)
    }

    pub fn lock_refresh(message: impl Into<String>) -> Self {
        Self::new(WarningKind::LockRefresh, message)
    }

    /// An operator request that could not be applied.
    pub fn request_rejected(message: impl Into<String>) -> Self {
        Self::new(WarningKind::RequestRejected, message)
    }

    pub fn source_poll(message: impl Into<String>) -> Self {
        Self::new(WarningKind::SourcePoll, message)
    }
}

/// Categories of warnings the daemon can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    /// Failed to release the state lock (lock file may remain).
    LockRelease,
    /// Failed to refresh the state lock; another daemon may break it.
    LockRefresh,
    /// An inbox request was invalid for the run it named.
    RequestRejected,
    /// Polling the source for a new revision failed.
    SourcePoll,
}
