// ABOUTME: Deployment orchestration: state table, shift plans, and the cutover controller.
// ABOUTME: One live deployment per service, persisted at every checkpoint.

mod controller;
mod deployment;
mod error;
mod plan;
mod state;

pub use controller::{ControllerSettings, CutoverController, StatusHandle, load_status};
pub use deployment::{Deployment, DeploymentStatus, RollbackReason, TransitionRecord};
pub use error::{DeployError, DeployErrorKind};
pub use plan::{PlanError, ShiftStep, TrafficShiftPlan};
pub use state::{DeploymentState, Event, IllegalTransition};
