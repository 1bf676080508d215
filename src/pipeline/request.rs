// ABOUTME: Operator requests delivered to the daemon through the inbox.

use serde::{Deserialize, Serialize};

use crate::types::{Revision, RunId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum OperatorRequest {
    Trigger {
        #[serde(default)]
        revision: Option<Revision>,
    },
    Approve {
        run: RunId,
    },
    Reject {
        run: RunId,
        reason: String,
    },
    Cancel {
        run: RunId,
    },
}

impl std::fmt::Display for OperatorRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperatorRequest::Trigger { revision: Some(r) } => write!(f, "trigger {r}"),
            OperatorRequest::Trigger { revision: None } => f.write_str("trigger latest"),
            OperatorRequest::Approve { run } => write!(f, "approve {run}"),
            OperatorRequest::Reject { run, .. } => write!(f, "reject {run}"),
            OperatorRequest::Cancel { run } => write!(f, "cancel {run}"),
        }
    }
}
