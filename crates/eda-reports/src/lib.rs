#![warn(missing_docs)]

//! # eda-reports
//!
//! Pure extraction of PPA figures from EDA tool reports, plus the log
//! excerpt helpers used to build diagnostics.
//!
//! - [`metrics::parse`] turns report bytes into a [`MetricsReport`]
//! - [`MetricsCache`] memoizes parses by path, modification time and length
//! - [`logs::tail`] and [`logs::extract_error_details`] shorten long logs

pub mod cache;
pub mod logs;
pub mod metrics;

pub use cache::{LoadError, MetricsCache};
pub use logs::{extract_error_details, tail};
pub use metrics::{parse, MetricsReport, ParseError, ReportKind};
