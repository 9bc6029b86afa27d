//! Run requests and execution records.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SandboxError;

/// Lifecycle state of an [`ExecutionRun`].
///
/// `Pending -> Running -> {Completed, TimedOut, Killed, Cancelled, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Waiting for an execution slot.
    Pending,
    /// The container is running.
    Running,
    /// The process exited on its own (any exit code).
    Completed,
    /// The wall-clock timeout expired and the container was torn down.
    TimedOut,
    /// The isolation layer killed the process (memory or process ceiling).
    Killed,
    /// Cancelled by the caller or by shutdown.
    Cancelled,
    /// The run could not be started or was interrupted.
    Failed,
}

impl RunStatus {
    /// Stable snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::TimedOut => "timed_out",
            Self::Killed => "killed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    /// Whether the state is final.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource ceilings applied to one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Memory limit in runtime syntax (`4g`, `512m`); swap is pinned to it.
    pub memory: String,
    /// CPU quota (`2`, `0.5`).
    pub cpus: String,
    /// Network mode; `none` disables networking.
    pub network: String,
    /// Maximum number of processes inside the container.
    pub pids_limit: u32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory: "4g".to_string(),
            cpus: "2".to_string(),
            network: "none".to_string(),
            pids_limit: 512,
        }
    }
}

/// A bind mount from the host into the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    /// Absolute host path.
    pub host: PathBuf,
    /// Absolute container path.
    pub container: String,
    /// Mount read-only.
    pub read_only: bool,
}

/// What to run. Built with [`RunRequest::new`] and the builder methods.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub(crate) image: String,
    pub(crate) command: Vec<String>,
    pub(crate) mounts: Vec<Mount>,
    pub(crate) workdir: Option<String>,
    pub(crate) env: Vec<(String, String)>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) limits: Option<ResourceLimits>,
    pub(crate) project: Option<String>,
    pub(crate) ledger_dir: Option<PathBuf>,
}

impl RunRequest {
    /// Run `command` (an argv, never a shell string) in `image`.
    pub fn new<I, S>(image: impl Into<String>, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            image: image.into(),
            command: command.into_iter().map(Into::into).collect(),
            mounts: Vec::new(),
            workdir: None,
            env: Vec::new(),
            timeout: None,
            limits: None,
            project: None,
            ledger_dir: None,
        }
    }

    /// Add a bind mount.
    pub fn mount(mut self, host: impl Into<PathBuf>, container: impl Into<String>, read_only: bool) -> Self {
        self.mounts.push(Mount {
            host: host.into(),
            container: container.into(),
            read_only,
        });
        self
    }

    /// Working directory inside the container.
    pub fn workdir(mut self, dir: impl Into<String>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    /// Set an environment variable inside the container.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Override the executor's default timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Override the executor's default resource limits.
    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Tag the run with its project (for logs and audit entries).
    pub fn project(mut self, name: impl Into<String>) -> Self {
        self.project = Some(name.into());
        self
    }

    /// Persist run records under `dir`.
    pub fn ledger(mut self, dir: impl Into<PathBuf>) -> Self {
        self.ledger_dir = Some(dir.into());
        self
    }

    /// The image to run.
    pub fn image(&self) -> &str {
        &self.image
    }

    /// The argv to run.
    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub(crate) fn validate(&self) -> Result<(), SandboxError> {
        if self.image.trim().is_empty() || self.image.starts_with('-') {
            return Err(SandboxError::invalid("image must be a non-empty image reference"));
        }
        if self.command.is_empty() || self.command[0].is_empty() {
            return Err(SandboxError::invalid("command must not be empty"));
        }
        for mount in &self.mounts {
            let host = mount.host.to_string_lossy();
            if !mount.host.is_absolute() || host.contains([':', ',']) {
                return Err(SandboxError::invalid(format!(
                    "mount source must be an absolute path without ':' or ',': {host}"
                )));
            }
            if !mount.container.starts_with('/') || mount.container.contains([':', ',']) {
                return Err(SandboxError::invalid(format!(
                    "mount target must be an absolute container path: {}",
                    mount.container
                )));
            }
        }
        if let Some(dir) = &self.workdir {
            if !dir.starts_with('/') {
                return Err(SandboxError::invalid("workdir must be absolute"));
            }
        }
        for (key, _) in &self.env {
            let valid = !key.is_empty()
                && !key.starts_with(|c: char| c.is_ascii_digit())
                && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            if !valid {
                return Err(SandboxError::invalid(format!("invalid environment variable name '{key}'")));
            }
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(SandboxError::invalid("timeout must be positive"));
        }
        Ok(())
    }
}

/// The record of one sandboxed execution.
///
/// Persisted as `<ledger>/<run_id>.json`; once [`RunStatus::is_terminal`]
/// holds the record never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRun {
    /// Unique run id, also the container name.
    pub run_id: String,
    /// Project the run belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// Container image.
    pub image: String,
    /// Command argv.
    pub command: Vec<String>,
    /// Applied resource limits.
    pub limits: ResourceLimits,
    /// Bind mounts.
    pub mounts: Vec<Mount>,
    /// Working directory inside the container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
    /// Wall-clock timeout in seconds.
    pub timeout_secs: u64,
    /// Current state.
    pub status: RunStatus,
    /// Exit code when the process exited (signals map to 128 + signal).
    pub exit_code: Option<i32>,
    /// Captured stdout (bounded).
    pub stdout: String,
    /// Captured stderr (bounded).
    pub stderr: String,
    /// Whether stdout was truncated.
    pub stdout_truncated: bool,
    /// Whether stderr was truncated.
    pub stderr_truncated: bool,
    /// Time from slot acquisition to termination, in milliseconds.
    pub duration_ms: u64,
    /// When the run was submitted.
    pub created_at: DateTime<Utc>,
    /// When the container was started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the run reached its terminal state.
    pub finished_at: Option<DateTime<Utc>>,
    /// Termination note (timeout, cancellation, spawn error, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ExecutionRun {
    pub(crate) fn pending(
        run_id: String,
        request: &RunRequest,
        limits: ResourceLimits,
        timeout: Duration,
    ) -> Self {
        Self {
            run_id,
            project: request.project.clone(),
            image: request.image.clone(),
            command: request.command.clone(),
            limits,
            mounts: request.mounts.clone(),
            workdir: request.workdir.clone(),
            timeout_secs: timeout.as_secs().max(1),
            status: RunStatus::Pending,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            stdout_truncated: false,
            stderr_truncated: false,
            duration_ms: 0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            note: None,
        }
    }

    /// Whether the process exited on its own with status 0.
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Completed && self.exit_code == Some(0)
    }

    /// stdout and stderr joined, trimmed.
    pub fn combined_output(&self) -> String {
        match (self.stdout.trim(), self.stderr.trim()) {
            ("", err) => err.to_string(),
            (out, "") => out.to_string(),
            (out, err) => format!("{out}\n{err}"),
        }
    }
}
