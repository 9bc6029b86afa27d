//! Persistent run records.
//!
//! Each run is written to `<dir>/<run_id>.json` when it is submitted, when
//! it starts and when it ends. Records are replaced atomically (write to a
//! temporary file, then rename). A terminal record is never overwritten.
//!
//! After a crash, records may be stuck in `pending` or `running`;
//! [`RunLedger::reconcile`] marks them `failed` at start-up.

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::SandboxError;
use crate::run::{ExecutionRun, RunStatus};

/// Note written into records repaired by [`RunLedger::reconcile`].
pub const INTERRUPTED_NOTE: &str = "interrupted by server restart";

/// A directory of run records.
#[derive(Debug, Clone)]
pub struct RunLedger {
    dir: PathBuf,
}

impl RunLedger {
    /// Ledger rooted at `dir` (created on first write).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The ledger directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{run_id}.json"))
    }

    fn ledger_err(path: &Path, source: std::io::Error) -> SandboxError {
        SandboxError::Ledger {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Persist `run`, unless a terminal record for it already exists.
    pub async fn record(&self, run: &ExecutionRun) -> Result<(), SandboxError> {
        let path = self.path_for(&run.run_id);
        if let Ok(existing) = self.load(&run.run_id).await {
            if existing.status.is_terminal() {
                tracing::warn!(run_id = %run.run_id, "refusing to overwrite terminal run record");
                return Ok(());
            }
        }
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Self::ledger_err(&self.dir, e))?;
        let json = serde_json::to_vec_pretty(run)?;
        let tmp = self.dir.join(format!(".{}.json.tmp", run.run_id));
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| Self::ledger_err(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Self::ledger_err(&path, e))?;
        Ok(())
    }

    /// Read one record.
    pub async fn load(&self, run_id: &str) -> Result<ExecutionRun, SandboxError> {
        let path = self.path_for(run_id);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| Self::ledger_err(&path, e))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Every readable record, newest first.
    pub fn list(&self) -> Result<Vec<ExecutionRun>, SandboxError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Self::ledger_err(&self.dir, e)),
        };
        let mut runs: Vec<ExecutionRun> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|p| {
                let bytes = std::fs::read(&p).ok()?;
                match serde_json::from_slice(&bytes) {
                    Ok(run) => Some(run),
                    Err(e) => {
                        tracing::warn!(path = %p.display(), error = %e, "skipping unreadable run record");
                        None
                    }
                }
            })
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs)
    }

    /// Mark every non-terminal record as failed. Returns how many changed.
    ///
    /// Runs only before the executor accepts work, so nothing can be
    /// legitimately in flight.
    pub fn reconcile(&self) -> Result<usize, SandboxError> {
        let mut repaired = 0;
        for mut run in self.list()? {
            if run.status.is_terminal() {
                continue;
            }
            let previous = run.status;
            run.status = RunStatus::Failed;
            run.finished_at = Some(Utc::now());
            run.note = Some(INTERRUPTED_NOTE.to_string());
            let path = self.path_for(&run.run_id);
            let json = serde_json::to_vec_pretty(&run)?;
            std::fs::write(&path, json).map_err(|e| Self::ledger_err(&path, e))?;
            tracing::info!(run_id = %run.run_id, previous = %previous, "reconciled interrupted run");
            repaired += 1;
        }
        Ok(repaired)
    }
}
