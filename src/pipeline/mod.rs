// ABOUTME: Release pipeline module: ordered stages from source revision to cutover.
// ABOUTME: Collaborators for source and build are traits with command-backed defaults.

mod collaborators;
mod error;
#[allow(clippy::module_inception)]
mod pipeline;
mod poll;
mod request;
mod run;

pub use collaborators::{BuildOutput, Builder, CommandBuilder, CommandSource, SourceProvider};
pub use error::{BuildError, PipelineError, PipelineFailure, PipelineFailureKind, SourceError};
pub use pipeline::{PipelineSettings, ReleasePipeline};
pub use poll::{PolledRevision, SourcePoller};
pub use request::OperatorRequest;
pub use run::{PipelineRun, RunStage, Stage, StageOutcome, StageRecord};
