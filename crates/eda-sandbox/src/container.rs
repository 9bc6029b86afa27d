//! Container runtime command lines and teardown.

use std::process::Stdio;
use std::time::Duration;

use crate::run::{ResourceLimits, RunRequest};

/// Arguments for `<runtime> run ...` for one execution.
///
/// Every value is passed as its own argv element in `--flag=value` form;
/// nothing is interpreted by a shell.
pub fn run_args(run_id: &str, request: &RunRequest, limits: &ResourceLimits) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "--rm".to_string(),
        format!("--name={run_id}"),
        format!("--memory={}", limits.memory),
        format!("--memory-swap={}", limits.memory),
        format!("--cpus={}", limits.cpus),
        format!("--network={}", limits.network),
        format!("--pids-limit={}", limits.pids_limit),
        "--security-opt=no-new-privileges".to_string(),
        "--cap-drop=ALL".to_string(),
    ];
    for mount in &request.mounts {
        let mut spec = format!("--volume={}:{}", mount.host.display(), mount.container);
        if mount.read_only {
            spec.push_str(":ro");
        }
        args.push(spec);
    }
    if let Some(dir) = &request.workdir {
        args.push(format!("--workdir={dir}"));
    }
    for (key, value) in &request.env {
        args.push(format!("--env={key}={value}"));
    }
    args.push(request.image.clone());
    args.extend(request.command.iter().cloned());
    args
}

/// Removes a container on drop unless the run finished normally.
///
/// The runtime client is killed on timeout or cancellation, but the
/// container itself lives in the daemon; this guard makes sure it goes away
/// on every exit path, including panics and dropped futures.
pub struct ContainerGuard {
    runtime: String,
    name: String,
    armed: bool,
}

impl ContainerGuard {
    /// Guard the container `name` started through `runtime`.
    pub fn new(runtime: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            runtime: runtime.into(),
            name: name.into(),
            armed: true,
        }
    }

    /// The run exited on its own; `--rm` takes care of the container.
    pub fn disarm(&mut self) {
        self.armed = false;
    }

    /// Force-remove the container now, waiting at most `grace`.
    ///
    /// A removal that outlives `grace` keeps running in the background.
    pub async fn remove(&mut self, grace: Duration) {
        if !self.armed {
            return;
        }
        self.armed = false;
        let spawned = tokio::process::Command::new(&self.runtime)
            .args(["rm", "-f", self.name.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        match spawned {
            Ok(mut child) => match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) if status.success() => {
                    tracing::debug!(container = %self.name, "container removed");
                }
                Ok(Ok(status)) => {
                    tracing::warn!(container = %self.name, status = %status, "container removal failed");
                }
                Ok(Err(e)) => {
                    tracing::warn!(container = %self.name, error = %e, "container removal failed");
                }
                Err(_) => {
                    tracing::debug!(container = %self.name, "container removal still in progress");
                }
            },
            Err(e) => {
                tracing::warn!(container = %self.name, error = %e, "failed to spawn container removal");
            }
        }
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::debug!(container = %self.name, "removing container from drop guard");
        let spawned = std::process::Command::new(&self.runtime)
            .args(["rm", "-f", self.name.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        match spawned {
            // Reap off the async runtime so the child does not linger as a zombie.
            Ok(mut child) => {
                std::thread::spawn(move || {
                    let _ = child.wait();
                });
            }
            Err(e) => {
                tracing::warn!(container = %self.name, error = %e, "failed to spawn container removal");
            }
        }
    }
}
