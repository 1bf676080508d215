// ABOUTME: Persistence error types with SNAFU context selectors.
// ABOUTME: Carries the path or record key that failed for operator inspection.

use chrono::{DateTime, Utc};
use snafu::Snafu;
use std::path::PathBuf;

use super::Collection;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    #[snafu(display("failed to access {}: {source}", path.display()))]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to encode {collection}/{key}: {source}"))]
    Encode {
        collection: Collection,
        key: String,
        source: serde_json::Error,
    },

    #[snafu(display("corrupt record {collection}/{key}: {source}"))]
    Decode {
        collection: Collection,
        key: String,
        source: serde_json::Error,
    },

    #[snafu(display(
        "state directory is locked by {holder} (pid {pid}) since {since}; stop that daemon or pass --force"
    ))]
    Locked {
        holder: String,
        pid: u32,
        since: DateTime<Utc>,
    },
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    Io,
    Corrupt,
    Locked,
}

impl StoreError {
    pub fn kind(&self) -> StoreErrorKind {
        match self {
            StoreError::Io { .. } => StoreErrorKind::Io,
            StoreError::Encode { .. } | StoreError::Decode { .. } => StoreErrorKind::Corrupt,
            StoreError::Locked { .. } => StoreErrorKind::Locked,
        }
    }
}
