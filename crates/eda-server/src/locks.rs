//! Per-project run serialization.
//!
//! A project holds at most one active run. Acquisition is one test-and-set
//! under a mutex; release happens when the [`RunGuard`] drops, on every exit
//! path. Each active run carries a [`CancellationToken`] so that `cancel_run`
//! and server shutdown can stop it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use eda_error::EdaError;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::registry::ToolName;

#[derive(Debug)]
struct Slot {
    tool: ToolName,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
}

/// Description of an active run, as reported by `cancel_run`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveRun {
    /// Project holding the lock.
    pub project: String,
    /// Tool that holds it.
    pub tool: &'static str,
    /// When the lock was taken.
    pub started_at: DateTime<Utc>,
}

/// Busy flags for every project.
#[derive(Debug, Clone, Default)]
pub struct ProjectLocks {
    active: Arc<Mutex<HashMap<String, Slot>>>,
}

impl ProjectLocks {
    /// No project is busy.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mark `project` busy for `tool`, or fail with [`EdaError::Busy`].
    pub fn acquire(&self, project: &str, tool: ToolName) -> Result<RunGuard, EdaError> {
        let mut active = self.lock();
        if active.contains_key(project) {
            return Err(EdaError::Busy {
                project: project.to_string(),
            });
        }
        let cancel = CancellationToken::new();
        active.insert(
            project.to_string(),
            Slot {
                tool,
                started_at: Utc::now(),
                cancel: cancel.clone(),
            },
        );
        tracing::debug!(project = %project, tool = %tool, "project lock acquired");
        Ok(RunGuard {
            locks: self.clone(),
            project: project.to_string(),
            cancel,
        })
    }

    /// Fail with [`EdaError::Busy`] if `project` has an active run.
    pub fn ensure_idle(&self, project: &str) -> Result<(), EdaError> {
        if self.is_busy(project) {
            Err(EdaError::Busy {
                project: project.to_string(),
            })
        } else {
            Ok(())
        }
    }

    /// Whether `project` has an active run.
    pub fn is_busy(&self, project: &str) -> bool {
        self.lock().contains_key(project)
    }

    /// Cancel the active run of `project`, if any.
    pub fn cancel(&self, project: &str) -> Option<ActiveRun> {
        let active = self.lock();
        let slot = active.get(project)?;
        slot.cancel.cancel();
        Some(ActiveRun {
            project: project.to_string(),
            tool: slot.tool.as_str(),
            started_at: slot.started_at,
        })
    }

    /// Cancel every active run. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let active = self.lock();
        for slot in active.values() {
            slot.cancel.cancel();
        }
        active.len()
    }

    /// Number of projects with an active run.
    pub fn active_count(&self) -> usize {
        self.lock().len()
    }
}

/// Holds a project's busy flag until dropped.
#[derive(Debug)]
pub struct RunGuard {
    locks: ProjectLocks,
    project: String,
    cancel: CancellationToken,
}

impl RunGuard {
    /// The locked project.
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Token cancelled by `cancel_run` or shutdown.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.locks.lock().remove(&self.project);
        tracing::debug!(project = %self.project, "project lock released");
    }
}
