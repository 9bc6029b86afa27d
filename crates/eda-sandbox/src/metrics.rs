//! Prometheus metrics for sandboxed runs.
//!
//! This module is only compiled when the `metrics` feature is enabled.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;
use std::sync::atomic::AtomicI64;

use crate::run::RunStatus;

/// Label set for finished runs.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RunLabels {
    /// Container image.
    pub image: String,
    /// Final status.
    pub status: String,
}

/// Label set for run durations.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ImageLabels {
    /// Container image.
    pub image: String,
}

/// Prometheus metrics for the sandbox executor.
pub struct SandboxMetrics {
    /// Finished runs by image and status.
    pub runs_total: Family<RunLabels, Counter>,
    /// Run duration in seconds.
    pub run_duration_seconds: Family<ImageLabels, Histogram>,
    /// Runs currently holding an execution slot.
    pub active_runs: Gauge<i64, AtomicI64>,
}

impl SandboxMetrics {
    /// Create and register all metrics with the given registry.
    pub fn new(registry: &mut Registry) -> Self {
        let runs_total = Family::default();
        registry.register(
            "eda_runs_total",
            "Finished sandbox runs by image and status",
            runs_total.clone(),
        );

        let run_duration_seconds = Family::<ImageLabels, Histogram>::new_with_constructor(|| {
            Histogram::new([1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0].into_iter())
        });
        registry.register(
            "eda_run_duration_seconds",
            "Sandbox run duration",
            run_duration_seconds.clone(),
        );

        let active_runs = Gauge::default();
        registry.register(
            "eda_active_runs",
            "Runs currently holding an execution slot",
            active_runs.clone(),
        );

        Self {
            runs_total,
            run_duration_seconds,
            active_runs,
        }
    }

    /// Record a finished run.
    pub fn record_run(&self, image: &str, status: RunStatus, duration_secs: f64) {
        self.runs_total
            .get_or_create(&RunLabels {
                image: image.to_string(),
                status: status.as_str().to_string(),
            })
            .inc();
        self.run_duration_seconds
            .get_or_create(&ImageLabels {
                image: image.to_string(),
            })
            .observe(duration_secs);
    }
}
