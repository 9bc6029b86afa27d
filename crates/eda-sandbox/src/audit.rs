//! Audit logging for sandboxed runs.
//!
//! Every finished run emits an [`AuditEntry`] containing:
//! - Run ID and project
//! - Image and a SHA-256 hash of the command (argv joined by NUL)
//! - A redacted preview of the command
//! - Final status, exit code, duration and output sizes
//!
//! The [`AuditLogger`] trait allows pluggable backends.
//! [`JsonLinesAuditLogger`] writes newline-delimited JSON to any `AsyncWrite`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::run::{ExecutionRun, RunStatus};

/// Maximum length of the command preview in audit entries.
const COMMAND_PREVIEW_MAX: usize = 500;

/// A complete audit record for a single run.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    /// Run identifier.
    pub run_id: String,
    /// When the entry was produced.
    pub timestamp: DateTime<Utc>,
    /// Project the run belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// Container image.
    pub image: String,
    /// SHA-256 hash of the argv.
    pub command_hash: String,
    /// First N characters of the argv, redacted.
    pub command_preview: String,
    /// Final status.
    pub status: RunStatus,
    /// Exit code, when the process exited.
    pub exit_code: Option<i32>,
    /// Duration in milliseconds.
    pub duration_ms: u64,
    /// Captured stdout size in bytes.
    pub stdout_bytes: usize,
    /// Captured stderr size in bytes.
    pub stderr_bytes: usize,
}

impl AuditEntry {
    /// Build the entry for a finished run.
    pub fn for_run(run: &ExecutionRun) -> Self {
        let joined = run.command.join("\0");
        Self {
            run_id: run.run_id.clone(),
            timestamp: Utc::now(),
            project: run.project.clone(),
            image: run.image.clone(),
            command_hash: sha256_hex(&joined),
            command_preview: crate::redact::redact_error_message(&command_preview(
                &run.command.join(" "),
            )),
            status: run.status,
            exit_code: run.exit_code,
            duration_ms: run.duration_ms,
            stdout_bytes: run.stdout.len(),
            stderr_bytes: run.stderr.len(),
        }
    }
}

/// Trait for audit log backends.
#[async_trait::async_trait]
pub trait AuditLogger: Send + Sync {
    /// Write an audit entry.
    async fn log(&self, entry: &AuditEntry);
}

/// Writes audit entries as newline-delimited JSON to an `AsyncWrite` sink.
pub struct JsonLinesAuditLogger<W: AsyncWrite + Unpin + Send> {
    writer: Mutex<W>,
}

impl<W: AsyncWrite + Unpin + Send> JsonLinesAuditLogger<W> {
    /// Create a new JSON lines audit logger writing to the given sink.
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl JsonLinesAuditLogger<tokio::fs::File> {
    /// Append to the file at `path`, creating it if needed.
    pub async fn open(path: &std::path::Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self::new(file))
    }
}

#[async_trait::async_trait]
impl<W: AsyncWrite + Unpin + Send + 'static> AuditLogger for JsonLinesAuditLogger<W> {
    async fn log(&self, entry: &AuditEntry) {
        let mut line = match serde_json::to_string(entry) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize audit entry");
                return;
            }
        };
        line.push('\n');

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            tracing::warn!(error = %e, "failed to write audit entry");
        }
        let _ = writer.flush().await;
    }
}

/// Compute the SHA-256 hash of a string, returned as a hex string.
pub fn sha256_hex(data: &str) -> String {
    let digest = Sha256::digest(data.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Create a command preview (first N bytes, with ellipsis if truncated).
///
/// Truncates at a valid UTF-8 char boundary.
pub fn command_preview(command: &str) -> String {
    if command.len() <= COMMAND_PREVIEW_MAX {
        command.to_string()
    } else {
        let mut end = COMMAND_PREVIEW_MAX;
        while !command.is_char_boundary(end) {
            end -= 1;
        }
        let mut preview = command[..end].to_string();
        preview.push_str("...");
        preview
    }
}

/// A no-op audit logger for when auditing is not needed.
pub struct NoopAuditLogger;

#[async_trait::async_trait]
impl AuditLogger for NoopAuditLogger {
    async fn log(&self, _entry: &AuditEntry) {}
}

/// An audit logger that emits structured events via the [`tracing`] framework.
///
/// Entries are logged at `INFO` level with `audit = true` for easy
/// filtering. Use `RUST_LOG=eda=info` to capture them.
pub struct TracingAuditLogger;

#[async_trait::async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn log(&self, entry: &AuditEntry) {
        tracing::info!(
            audit = true,
            run_id = %entry.run_id,
            project = entry.project.as_deref().unwrap_or("-"),
            image = %entry.image,
            command_hash = %entry.command_hash,
            status = %entry.status,
            exit_code = ?entry.exit_code,
            duration_ms = entry.duration_ms,
            "run audit"
        );
    }
}
