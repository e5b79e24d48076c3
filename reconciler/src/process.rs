//! Runs the proxy's external commands.
use async_trait::async_trait;
use std::io;
use std::path::Path;
use tokio::time::Duration;

use crate::config::CONFIG_PLACEHOLDER;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Combined output, stderr first since that is where HAProxy reports.
    pub fn diagnostics(&self) -> String {
        match (self.stderr.trim(), self.stdout.trim()) {
            ("", out) => out.to_string(),
            (err, "") => err.to_string(),
            (err, out) => format!("{err}\n{out}"),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ProcessError {
    #[error("could not run {program}: {source}")]
    Spawn { program: String, source: io::Error },
    #[error("{program} did not finish within {timeout:?}")]
    Timeout { program: String, timeout: Duration },
}

#[async_trait]
pub trait ProcessExecutor: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> Result<ProcessOutput, ProcessError>;
}

/// Spawns real processes. Commands that outlive the timeout are killed.
pub struct TokioProcessExecutor {
    timeout: Duration,
}

impl TokioProcessExecutor {
    pub fn new(timeout: Duration) -> Self {
        TokioProcessExecutor { timeout }
    }
}

#[async_trait]
impl ProcessExecutor for TokioProcessExecutor {
    async fn run(&self, program: &str, args: &[String]) -> Result<ProcessOutput, ProcessError> {
        let mut command = tokio::process::Command::new(program);
        command.args(args).kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| ProcessError::Timeout {
                program: program.to_string(),
                timeout: self.timeout,
            })?
            .map_err(|source| ProcessError::Spawn {
                program: program.to_string(),
                source,
            })?;

        Ok(ProcessOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Splits a configured command into program and arguments, substituting the
/// configuration path for `{config}`.
pub fn expand_command(command: &[String], config_path: &Path) -> Option<(String, Vec<String>)> {
    let path = config_path.to_string_lossy();
    let mut parts = command
        .iter()
        .map(|part| part.replace(CONFIG_PLACEHOLDER, &path));
    let program = parts.next()?;
    Some((program, parts.collect()))
}
