// ABOUTME: Source and build collaborators consumed by the release pipeline.
// ABOUTME: Command-backed implementations run operator shell commands via `exec`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;

use super::error::{BuildError, SourceError};
use crate::exec;
use crate::service::CommandSpec;
use crate::types::{ArtifactRef, Revision, RunId};

/// Resolves the revision a run builds.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Fetch `requested`, or the latest revision when `None`.
    async fn fetch(&self, requested: Option<&Revision>) -> Result<Revision, SourceError>;
}

/// Produced by a successful build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutput {
    pub artifact: ArtifactRef,
    pub log: Option<PathBuf>,
}

#[async_trait]
pub trait Builder: Send + Sync {
    async fn build(&self, run: &RunId, revision: &Revision) -> Result<BuildOutput, BuildError>;
}

/// Runs `command` with `CUTOVER_REQUESTED_REVISION` set when a revision was
/// asked for; the last line of output is the resolved revision.
#[derive(Debug, Clone)]
pub struct CommandSource {
    spec: CommandSpec,
    env: HashMap<String, String>,
}

impl CommandSource {
    pub fn new(spec: CommandSpec, env: HashMap<String, String>) -> Self {
        Self { spec, env }
    }
}

#[async_trait]
impl SourceProvider for CommandSource {
    async fn fetch(&self, requested: Option<&Revision>) -> Result<Revision, SourceError> {
        let mut env = self.env.clone();
        if let Some(revision) = requested {
            env.insert(
                "CUTOVER_REQUESTED_REVISION".to_string(),
                revision.to_string(),
            );
        }

        let out = exec::run_shell(&self.spec.command, &env, None, self.spec.timeout)
            .await
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;
        if !out.success {
            return Err(SourceError::Unavailable(out.failure_summary()));
        }

        let line = out.last_line().unwrap_or_default();
        Revision::parse(line).map_err(|e| SourceError::InvalidRevision(e.to_string()))
    }
}

/// Runs `command` with `CUTOVER_REVISION` and `CUTOVER_RUN_ID` set. The
/// full output is written to `<log_dir>/<run>.log`; the last stdout line
/// is the artifact reference.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    spec: CommandSpec,
    env: HashMap<String, String>,
    log_dir: PathBuf,
}

impl CommandBuilder {
    pub fn new(spec: CommandSpec, env: HashMap<String, String>, log_dir: PathBuf) -> Self {
        Self { spec, env, log_dir }
    }

    async fn write_log(&self, run: &RunId, stdout: &str, stderr: &str) -> Option<PathBuf> {
        let path = self
            .log_dir
            .join(format!("{}.log", urlencoding::encode(run.as_str())));
        let contents = format!("{stdout}\n--- stderr ---\n{stderr}");
        let written = async {
            tokio::fs::create_dir_all(&self.log_dir).await?;
            tokio::fs::write(&path, contents).await
        }
        .await;

        match written {
            Ok(()) => Some(path),
            Err(e) => {
                tracing::warn!(run = %run, "failed to keep build log: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl Builder for CommandBuilder {
    async fn build(&self, run: &RunId, revision: &Revision) -> Result<BuildOutput, BuildError> {
        let mut env = self.env.clone();
        env.insert("CUTOVER_REVISION".to_string(), revision.to_string());
        env.insert("CUTOVER_RUN_ID".to_string(), run.to_string());

        let out = exec::run_shell(&self.spec.command, &env, None, self.spec.timeout)
            .await
            .map_err(|e| BuildError {
                message: e.to_string(),
                log: None,
            })?;
        let log = self.write_log(run, &out.stdout, &out.stderr).await;

        if !out.success {
            return Err(BuildError {
                message: out.failure_summary(),
                log,
            });
        }

        let line = out.last_line().unwrap_or_default();
        let artifact = ArtifactRef::parse(line).map_err(|e| BuildError {
            message: format!("build printed no artifact reference: {e}"),
            log: log.clone(),
        })?;

        Ok(BuildOutput { artifact, log })
    }
}
