#![warn(missing_docs)]

//! # eda-sandbox
//!
//! Resource-bounded container execution for EDA tool runs.
//!
//! Every run starts a fresh container through the configured runtime and is
//! tracked as an [`ExecutionRun`] whose state is persisted to a per-project
//! [`RunLedger`].
//!
//! ## Isolation model
//!
//! - **Fresh container per run**: named after the run id, removed afterwards
//! - **No network**: `--network=none` unless configured otherwise
//! - **Resource ceilings**: memory (swap pinned), CPU quota and process count
//! - **No privileges**: all capabilities dropped, `no-new-privileges`
//! - **Single writable mount**: the project directory at `/work`
//! - **Argv only**: commands are never interpreted by a host shell
//! - **Bounded output**: head and tail of each stream are kept
//! - **Deadline**: wall-clock timeout with forced teardown

pub mod audit;
pub mod capture;
pub mod container;
pub mod error;
pub mod executor;
pub mod ledger;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod redact;
pub mod run;

pub use audit::{AuditEntry, AuditLogger, JsonLinesAuditLogger, NoopAuditLogger, TracingAuditLogger};
pub use error::SandboxError;
pub use executor::{SandboxConfig, SandboxExecutor};
pub use ledger::RunLedger;
#[cfg(feature = "metrics")]
pub use metrics::SandboxMetrics;
pub use run::{ExecutionRun, Mount, ResourceLimits, RunRequest, RunStatus};
pub use tokio_util::sync::CancellationToken;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executor_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SandboxExecutor>();
        assert_send_sync::<RunLedger>();
    }
}
