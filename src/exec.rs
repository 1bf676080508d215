// ABOUTME: Shell command runner for the command-backed collaborators.
// ABOUTME: Runs `sh -c` with extra env vars, captures output, and enforces a timeout.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Captured result of one command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Last non-empty stdout line, trimmed. Collaborators report their
    /// result (revision, artifact, endpoint) on this line.
    pub fn last_line(&self) -> Option<&str> {
        self.stdout
            .lines()
            .map(str::trim)
            .rfind(|line| !line.is_empty())
    }

    /// Short description for error messages.
    pub fn failure_summary(&self) -> String {
        let stderr = self.stderr.trim();
        match (self.exit_code, stderr.is_empty()) {
            (Some(code), true) => format!("exit code {code}"),
            (Some(code), false) => format!("exit code {code}: {stderr}"),
            (None, true) => "terminated by signal".to_string(),
            (None, false) => format!("terminated by signal: {stderr}"),
        }
    }
}

/// Errors launching or waiting on a command.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("`{command}` timed out after {timeout:?}")]
    TimedOut { command: String, timeout: Duration },
}

/// Run `command` through `sh -c`.
///
/// # Errors
///
/// Returns `ExecError::Spawn` if the shell cannot be started and
/// `ExecError::TimedOut` if `timeout` elapses first (the child is killed).
/// A non-zero exit is not an error; inspect `CommandOutput::success`.
pub async fn run_shell(
    command: &str,
    env: &HashMap<String, String>,
    cwd: Option<&Path>,
    timeout: Option<Duration>,
) -> Result<CommandOutput, ExecError> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    tracing::debug!("running `{}`", command);

    let child = cmd.output();
    let output = match timeout {
        Some(limit) => tokio::time::timeout(limit, child)
            .await
            .map_err(|_| ExecError::TimedOut {
                command: command.to_string(),
                timeout: limit,
            })?,
        None => child.await,
    }
    .map_err(|source| ExecError::Spawn {
        command: command.to_string(),
        source,
    })?;

    let result = CommandOutput {
        success: output.status.success(),
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };

    if !result.success {
        tracing::debug!(
            "`{}` failed with exit code {:?}",
            command,
            result.exit_code
        );
    }

    Ok(result)
}
