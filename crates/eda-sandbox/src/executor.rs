//! Sandbox executor: runs one EDA tool invocation in a fresh container.
//!
//! Each run gets its own container, named after the run id, with resource
//! ceilings, no network and the project directory as its only writable
//! mount. A semaphore bounds how many containers run at once; a run waits
//! in `pending` until a slot frees up.
//!
//! On timeout or cancellation the runtime client is killed and the container
//! is force-removed concurrently, both bounded by a short grace period, so
//! teardown never waits on the daemon.

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditLogger, NoopAuditLogger};
use crate::capture::{self, SharedOutput};
use crate::container::{self, ContainerGuard};
use crate::error::SandboxError;
use crate::ledger::RunLedger;
#[cfg(feature = "metrics")]
use crate::metrics::SandboxMetrics;
use crate::run::{ExecutionRun, ResourceLimits, RunRequest, RunStatus};

/// Exit status the container runtime reports for a SIGKILLed process.
const SIGKILL_EXIT: i32 = 137;

/// How long to wait for output pipes to close after a normal exit.
const OUTPUT_DRAIN: Duration = Duration::from_secs(2);

/// Configuration for the sandbox executor.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Container runtime binary (`docker`, `podman`, or a path).
    pub runtime: String,
    /// Default resource ceilings for every run.
    pub limits: ResourceLimits,
    /// Maximum containers running at once.
    pub max_concurrent: usize,
    /// Maximum bytes kept per output stream.
    pub max_output_bytes: usize,
    /// Timeout for runs that do not set their own.
    pub default_timeout: Duration,
    /// Upper bound on teardown after a timeout or cancellation.
    pub kill_grace: Duration,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            runtime: "docker".to_string(),
            limits: ResourceLimits::default(),
            max_concurrent: 2,
            max_output_bytes: 256 * 1024, // 256 KB
            default_timeout: Duration::from_secs(600),
            kill_grace: Duration::from_millis(500),
        }
    }
}

/// How the wait on a running container ended.
enum Ending {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// The sandbox executor.
///
/// `Send + Sync`; share it behind an `Arc`. Run outcomes are reported in the
/// returned [`ExecutionRun`], never as errors.
pub struct SandboxExecutor {
    config: SandboxConfig,
    slots: Arc<Semaphore>,
    audit_logger: Arc<dyn AuditLogger>,
    #[cfg(feature = "metrics")]
    metrics: Option<Arc<SandboxMetrics>>,
}

impl SandboxExecutor {
    /// Create a new sandbox executor with the given configuration.
    pub fn new(config: SandboxConfig) -> Self {
        Self::with_audit_logger(config, Arc::new(NoopAuditLogger))
    }

    /// Create a new sandbox executor with an audit logger.
    pub fn with_audit_logger(config: SandboxConfig, logger: Arc<dyn AuditLogger>) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            config,
            slots,
            audit_logger: logger,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Record run counts and durations into `metrics`.
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: Arc<SandboxMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The executor's configuration.
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Execution slots not currently in use.
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Stop handing out slots. Runs still waiting fail with
    /// [`SandboxError::Closed`]; runs already started are unaffected.
    pub fn close(&self) {
        self.slots.close();
    }

    /// Run `request` to completion, timeout or cancellation.
    ///
    /// Returns `Err` only when the request is invalid, the executor is shut
    /// down, or the initial run record cannot be written.
    pub async fn execute(
        &self,
        request: RunRequest,
        cancel: CancellationToken,
    ) -> Result<ExecutionRun, SandboxError> {
        request.validate()?;

        let run_id = format!("eda-{}", Uuid::new_v4().simple());
        let limits = request
            .limits
            .clone()
            .unwrap_or_else(|| self.config.limits.clone());
        let timeout = request.timeout.unwrap_or(self.config.default_timeout);
        let ledger = request.ledger_dir.as_ref().map(RunLedger::new);
        let mut run = ExecutionRun::pending(run_id.clone(), &request, limits.clone(), timeout);

        tracing::info!(
            run_id = %run_id,
            project = request.project.as_deref().unwrap_or("-"),
            image = %request.image,
            timeout_secs = run.timeout_secs,
            "execute: submitted"
        );
        if let Some(ledger) = &ledger {
            ledger.record(&run).await?;
        }

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = self.slots.clone().acquire_owned() => Some(permit),
        };
        let _permit = match permit {
            None => {
                run.status = RunStatus::Cancelled;
                run.note = Some("cancelled while waiting for an execution slot".to_string());
                self.finish(&mut run, ledger.as_ref()).await;
                return Ok(run);
            }
            Some(Err(_)) => {
                run.status = RunStatus::Failed;
                run.note = Some("sandbox executor shut down before the run started".to_string());
                self.finish(&mut run, ledger.as_ref()).await;
                return Err(SandboxError::Closed);
            }
            Some(Ok(permit)) => permit,
        };

        run.status = RunStatus::Running;
        run.started_at = Some(Utc::now());
        if let Some(ledger) = &ledger {
            if let Err(e) = ledger.record(&run).await {
                tracing::warn!(run_id = %run_id, error = %e, "failed to record running state");
            }
        }

        #[cfg(feature = "metrics")]
        if let Some(m) = &self.metrics {
            m.active_runs.inc();
        }
        let started = Instant::now();
        self.run_container(&mut run, &request, &limits, timeout, &cancel)
            .await;
        run.duration_ms = started.elapsed().as_millis() as u64;
        #[cfg(feature = "metrics")]
        if let Some(m) = &self.metrics {
            m.active_runs.dec();
        }

        self.finish(&mut run, ledger.as_ref()).await;
        Ok(run)
    }

    /// Spawn the container and wait for it; fills status, exit code and
    /// output on `run`.
    async fn run_container(
        &self,
        run: &mut ExecutionRun,
        request: &RunRequest,
        limits: &ResourceLimits,
        timeout: Duration,
        cancel: &CancellationToken,
    ) {
        let args = container::run_args(&run.run_id, request, limits);
        let spawned = tokio::process::Command::new(&self.config.runtime)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(run_id = %run.run_id, runtime = %self.config.runtime, error = %e, "failed to start container runtime");
                run.status = RunStatus::Failed;
                run.note = Some(format!(
                    "failed to start container runtime '{}': {e}",
                    self.config.runtime
                ));
                return;
            }
        };
        let mut guard = ContainerGuard::new(self.config.runtime.as_str(), run.run_id.as_str());

        let stdout = capture::shared(self.config.max_output_bytes);
        let stderr = capture::shared(self.config.max_output_bytes);
        let stdout_task = child
            .stdout
            .take()
            .map(|r| tokio::spawn(capture::pump(r, stdout.clone())));
        let stderr_task = child
            .stderr
            .take()
            .map(|r| tokio::spawn(capture::pump(r, stderr.clone())));

        let ending = tokio::select! {
            status = child.wait() => Ending::Exited(status),
            _ = tokio::time::sleep(timeout) => Ending::TimedOut,
            _ = cancel.cancelled() => Ending::Cancelled,
        };

        let drain_for = match ending {
            Ending::Exited(Ok(status)) => {
                guard.disarm();
                let code = exit_code(status);
                run.exit_code = code;
                if code == Some(SIGKILL_EXIT) {
                    run.status = RunStatus::Killed;
                    run.note = Some(
                        "process was killed by the sandbox (exit 137); the memory or process limit was likely exceeded"
                            .to_string(),
                    );
                } else {
                    run.status = RunStatus::Completed;
                }
                OUTPUT_DRAIN
            }
            Ending::Exited(Err(e)) => {
                run.status = RunStatus::Failed;
                run.note = Some(format!("waiting for the container failed: {e}"));
                self.teardown(&mut child, &mut guard).await;
                self.config.kill_grace
            }
            Ending::TimedOut => {
                tracing::warn!(run_id = %run.run_id, timeout_secs = timeout.as_secs(), "run timed out");
                run.status = RunStatus::TimedOut;
                run.note = Some(format!("timed out after {}s", timeout.as_secs().max(1)));
                self.teardown(&mut child, &mut guard).await;
                self.config.kill_grace
            }
            Ending::Cancelled => {
                tracing::info!(run_id = %run.run_id, "run cancelled");
                run.status = RunStatus::Cancelled;
                run.note = Some("cancelled while running".to_string());
                self.teardown(&mut child, &mut guard).await;
                self.config.kill_grace
            }
        };

        drain(stdout_task, drain_for).await;
        drain(stderr_task, drain_for).await;
        fill_output(run, &stdout, &stderr);
    }

    /// Kill the runtime client and force-remove the container, concurrently
    /// and within the grace period.
    async fn teardown(&self, child: &mut tokio::process::Child, guard: &mut ContainerGuard) {
        let grace = self.config.kill_grace;
        if let Err(e) = child.start_kill() {
            tracing::debug!(error = %e, "runtime client already exited");
        }
        let both = async { tokio::join!(guard.remove(grace), child.wait()) };
        if tokio::time::timeout(grace, both).await.is_err() {
            tracing::debug!("teardown exceeded grace period; continuing in background");
        }
    }

    /// Write the terminal record, emit the audit entry and metrics.
    async fn finish(&self, run: &mut ExecutionRun, ledger: Option<&RunLedger>) {
        run.finished_at = Some(Utc::now());
        if let Some(ledger) = ledger {
            if let Err(e) = ledger.record(run).await {
                tracing::warn!(run_id = %run.run_id, error = %e, "failed to record finished run");
            }
        }

        self.audit_logger.log(&AuditEntry::for_run(run)).await;

        #[cfg(feature = "metrics")]
        if let Some(m) = &self.metrics {
            m.record_run(&run.image, run.status, run.duration_ms as f64 / 1000.0);
        }

        match run.status {
            RunStatus::Completed => tracing::info!(
                run_id = %run.run_id,
                exit_code = ?run.exit_code,
                duration_ms = run.duration_ms,
                "execute: complete"
            ),
            status => tracing::warn!(
                run_id = %run.run_id,
                status = %status,
                exit_code = ?run.exit_code,
                note = run.note.as_deref().unwrap_or(""),
                "execute: did not complete"
            ),
        }
    }
}

/// Wait for an output pump to finish, abandoning it after `limit`.
async fn drain(task: Option<JoinHandle<()>>, limit: Duration) {
    if let Some(mut task) = task {
        if tokio::time::timeout(limit, &mut task).await.is_err() {
            task.abort();
        }
    }
}

fn fill_output(run: &mut ExecutionRun, stdout: &SharedOutput, stderr: &SharedOutput) {
    let out = capture::snapshot(stdout);
    let err = capture::snapshot(stderr);
    run.stdout = out.text;
    run.stdout_truncated = out.truncated;
    run.stderr = err.text;
    run.stderr_truncated = err.truncated;
}

/// Exit code of a process; a fatal signal maps to `128 + signal`.
fn exit_code(status: ExitStatus) -> Option<i32> {
    if let Some(code) = status.code() {
        return Some(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Some(128 + signal);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = SandboxConfig::default();
        assert_eq!(config.runtime, "docker");
        assert_eq!(config.max_concurrent, 2);
        assert_eq!(config.default_timeout, Duration::from_secs(600));
        assert_eq!(config.limits.network, "none");
    }

    #[test]
    fn zero_concurrency_still_runs_one() {
        let executor = SandboxExecutor::new(SandboxConfig {
            max_concurrent: 0,
            ..Default::default()
        });
        assert_eq!(executor.available_slots(), 1);
    }

    #[tokio::test]
    async fn invalid_request_is_rejected_before_recording() {
        let dir = tempfile::tempdir().unwrap();
        let executor = SandboxExecutor::new(SandboxConfig::default());
        let request = RunRequest::new("img", Vec::<String>::new()).ledger(dir.path());
        let err = executor
            .execute(request, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::InvalidRequest { .. }));
        assert!(RunLedger::new(dir.path()).list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn closed_executor_fails_waiting_runs() {
        let executor = SandboxExecutor::new(SandboxConfig::default());
        executor.close();
        let err = executor
            .execute(RunRequest::new("img", ["true"]), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Closed));
    }

    #[cfg(unix)]
    #[test]
    fn signals_map_to_shell_convention() {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(exit_code(ExitStatus::from_raw(9)), Some(137));
        assert_eq!(exit_code(ExitStatus::from_raw(1 << 8)), Some(1));
    }
}
