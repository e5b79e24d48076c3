//! Writes, validates and activates proxy configurations.
//!
//! A candidate is written next to the live file and checked there. Only a
//! candidate the proxy accepts is renamed over the live file, so a rejected
//! configuration never touches what the running proxy reads.
use crate::config::ProxyConfig;
use crate::metrics_defs::{
    APPLY_DURATION, APPLY_RELOAD_FAILURES, APPLY_SUCCESS, APPLY_VALIDATION_FAILURES,
    APPLY_WRITE_FAILURES,
};
use crate::process::{ProcessExecutor, ProcessOutput, expand_command};
use crate::types::{ConfigArtifact, Fingerprint};
use parking_lot::RwLock;
use shared::admin_service::ProbeState;
use shared::{counter, histogram};
use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::NamedTempFile;
use tokio::sync::{AcquireError, Semaphore, SemaphorePermit};
use tokio::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyState {
    Idle,
    CandidateReady,
    Validating,
    Validated,
    Invalid,
    Reloading,
    Active,
}

impl fmt::Display for ApplyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ApplyState::Idle => "idle",
            ApplyState::CandidateReady => "candidate_ready",
            ApplyState::Validating => "validating",
            ApplyState::Validated => "validated",
            ApplyState::Invalid => "invalid",
            ApplyState::Reloading => "reloading",
            ApplyState::Active => "active",
        };
        f.write_str(name)
    }
}

#[derive(Debug, PartialEq)]
pub enum ApplyOutcome {
    /// The configuration was validated and the proxy reloaded.
    Activated,
    /// The configuration is byte-identical to the active one.
    Unchanged,
}

#[derive(thiserror::Error, Debug)]
pub enum ApplyError {
    #[error("could not write candidate configuration: {0}")]
    Write(#[from] io::Error),
    #[error("could not replace {path:?}: {source}")]
    Persist { path: PathBuf, source: io::Error },
    #[error("configuration rejected by check command (exit code {exit_code:?})")]
    Invalid {
        exit_code: Option<i32>,
        diagnostics: String,
    },
    #[error("reload command failed (exit code {exit_code:?})")]
    Reload {
        exit_code: Option<i32>,
        diagnostics: String,
    },
    #[error("{0} command is empty")]
    EmptyCommand(&'static str),
    #[error("another apply is in progress")]
    ConcurrentApply(#[from] AcquireError),
}

/// Exit code and diagnostics of a failed command, `None` on success.
/// Timeouts and spawn failures count as a failure without an exit code.
fn command_failure(
    result: Result<ProcessOutput, impl fmt::Display>,
) -> Option<(Option<i32>, String)> {
    match result {
        Ok(output) if output.success() => None,
        Ok(output) => Some((output.exit_code, output.diagnostics())),
        Err(e) => Some((None, e.to_string())),
    }
}

/// Serializes applies against the proxy and tracks what is active.
pub struct ApplyEngine {
    config_path: PathBuf,
    check_command: Vec<String>,
    reload_command: Vec<String>,
    executor: Arc<dyn ProcessExecutor>,
    update_lock: Semaphore,
    state: RwLock<ApplyState>,
    active: RwLock<Option<Fingerprint>>,
    // What the live file holds. Differs from `active` after a failed reload.
    on_disk: RwLock<Option<Fingerprint>>,
    // Set once the first configuration is active; read by the readiness probe.
    ready: AtomicBool,
}

impl ApplyEngine {
    /// Fails when the directory holding the configuration is not writable,
    /// which would make every later apply fail.
    pub fn new(
        config: &ProxyConfig,
        executor: Arc<dyn ProcessExecutor>,
    ) -> Result<Self, ApplyError> {
        let engine = ApplyEngine {
            config_path: config.config_path.clone(),
            check_command: config.check_command.clone(),
            reload_command: config.reload_command.clone(),
            executor,
            update_lock: Semaphore::new(1),
            state: RwLock::new(ApplyState::Idle),
            active: RwLock::new(None),
            on_disk: RwLock::new(None),
            ready: AtomicBool::new(false),
        };

        NamedTempFile::new_in(engine.config_dir())?;
        Ok(engine)
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn state(&self) -> ApplyState {
        *self.state.read()
    }

    pub fn active_fingerprint(&self) -> Option<Fingerprint> {
        self.active.read().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn probe(&self) -> ProbeState {
        let detail = match self.active_fingerprint() {
            Some(fp) => format!("state: {}\nactive: {}\n", self.state(), fp.as_str()),
            None => format!("state: {}\nactive: none\n", self.state()),
        };
        ProbeState {
            ready: self.is_ready(),
            detail,
        }
    }

    fn config_dir(&self) -> &Path {
        match self.config_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        }
    }

    fn transition(&self, to: ApplyState) {
        let mut state = self.state.write();
        tracing::debug!(from = %*state, %to, "Apply state transition");
        *state = to;
    }

    async fn get_permit(&self) -> Result<SemaphorePermit<'_>, AcquireError> {
        self.update_lock.acquire().await
    }

    /// Validates the artifact and makes it the live configuration.
    ///
    /// On a validation failure the live file and the running proxy are left
    /// as they were. On a reload failure the live file already holds the new
    /// configuration but the active fingerprint is not advanced. The apply is
    /// skipped only when both the proxy and the live file have the artifact.
    pub async fn apply(&self, artifact: &ConfigArtifact) -> Result<ApplyOutcome, ApplyError> {
        let _permit = self.get_permit().await?;

        let fingerprint = Some(artifact.fingerprint());
        if self.active.read().as_ref() == fingerprint
            && self.on_disk.read().as_ref() == fingerprint
        {
            tracing::debug!(fingerprint = %artifact.fingerprint(), "Configuration already active");
            return Ok(ApplyOutcome::Unchanged);
        }

        let start = Instant::now();
        let result = self.apply_locked(artifact).await;
        histogram!(APPLY_DURATION).record(start.elapsed().as_secs_f64());

        match &result {
            Ok(_) => {
                *self.active.write() = Some(artifact.fingerprint().clone());
                self.ready.store(true, Ordering::Relaxed);
                self.transition(ApplyState::Active);
                counter!(APPLY_SUCCESS).increment(1);
                tracing::info!(
                    fingerprint = %artifact.fingerprint(),
                    path = ?self.config_path,
                    "Configuration activated"
                );
            }
            Err(ApplyError::Invalid {
                exit_code,
                diagnostics,
            }) => {
                counter!(APPLY_VALIDATION_FAILURES).increment(1);
                tracing::error!(
                    fingerprint = %artifact.fingerprint(),
                    ?exit_code,
                    %diagnostics,
                    "Candidate configuration rejected, keeping the active one"
                );
                self.transition(ApplyState::Idle);
            }
            Err(ApplyError::Reload {
                exit_code,
                diagnostics,
            }) => {
                counter!(APPLY_RELOAD_FAILURES).increment(1);
                tracing::error!(
                    fingerprint = %artifact.fingerprint(),
                    ?exit_code,
                    %diagnostics,
                    "Reload failed"
                );
                self.transition(ApplyState::Idle);
            }
            Err(e) => {
                counter!(APPLY_WRITE_FAILURES).increment(1);
                tracing::error!(
                    error = %e,
                    path = ?self.config_path,
                    "Could not stage configuration"
                );
                self.transition(ApplyState::Idle);
            }
        }

        result.map(|_| ApplyOutcome::Activated)
    }

    async fn apply_locked(&self, artifact: &ConfigArtifact) -> Result<(), ApplyError> {
        let candidate = self.write_candidate(artifact)?;
        self.transition(ApplyState::CandidateReady);

        self.transition(ApplyState::Validating);
        let (program, args) = expand_command(&self.check_command, candidate.path())
            .ok_or(ApplyError::EmptyCommand("check"))?;
        if let Some((exit_code, diagnostics)) =
            command_failure(self.executor.run(&program, &args).await)
        {
            self.transition(ApplyState::Invalid);
            // Dropping the candidate removes it.
            return Err(ApplyError::Invalid {
                exit_code,
                diagnostics,
            });
        }
        self.transition(ApplyState::Validated);

        candidate
            .persist(&self.config_path)
            .map_err(|e| ApplyError::Persist {
                path: self.config_path.clone(),
                source: e.error,
            })?;
        *self.on_disk.write() = Some(artifact.fingerprint().clone());

        self.transition(ApplyState::Reloading);
        let (program, args) = expand_command(&self.reload_command, &self.config_path)
            .ok_or(ApplyError::EmptyCommand("reload"))?;
        if let Some((exit_code, diagnostics)) =
            command_failure(self.executor.run(&program, &args).await)
        {
            return Err(ApplyError::Reload {
                exit_code,
                diagnostics,
            });
        }

        Ok(())
    }

    fn write_candidate(&self, artifact: &ConfigArtifact) -> Result<NamedTempFile, ApplyError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(".haproxy-candidate-").suffix(".cfg");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            builder.permissions(std::fs::Permissions::from_mode(0o644));
        }

        let mut candidate = builder.tempfile_in(self.config_dir())?;
        candidate.write_all(artifact.text().as_bytes())?;
        candidate.as_file().sync_all()?;
        Ok(candidate)
    }
}
