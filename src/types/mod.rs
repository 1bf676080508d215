// ABOUTME: Type-safe identifiers and validated domain types.
// ABOUTME: Uses phantom types to prevent ID confusion at compile time.

mod artifact;
mod endpoint;
mod id;
mod service_name;

pub use artifact::{ArtifactRef, ReferenceError, Revision};
pub use endpoint::{Endpoint, EndpointError};
pub use id::{DeploymentId, Id, IdKind, PoolId, ReplicaId, RunId};
pub use service_name::{ServiceName, ServiceNameError};
