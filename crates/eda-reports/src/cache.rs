//! Memoization of parsed reports.
//!
//! Entries are keyed by path and validated against the file's modification
//! time and length on every lookup. The cache never answers for a file that
//! changed since it was parsed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use crate::metrics::{parse, MetricsReport, ParseError, ReportKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamp {
    modified: Option<SystemTime>,
    len: u64,
    kind: ReportKind,
}

/// Errors from [`MetricsCache::load`].
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The report could not be read.
    #[error("failed to read report {path}: {source}")]
    Io {
        /// The report path.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The report did not parse.
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Process-wide cache of parsed reports.
#[derive(Debug, Default)]
pub struct MetricsCache {
    entries: Mutex<HashMap<PathBuf, (Stamp, MetricsReport)>>,
}

impl MetricsCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `path` as `kind`, reusing the previous result if the file is unchanged.
    pub fn load(&self, path: &Path, kind: ReportKind) -> Result<MetricsReport, LoadError> {
        let io = |source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        };
        let meta = std::fs::metadata(path).map_err(io)?;
        let stamp = Stamp {
            modified: meta.modified().ok(),
            len: meta.len(),
            kind,
        };

        {
            let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            if let Some((cached, report)) = entries.get(path) {
                if *cached == stamp && stamp.modified.is_some() {
                    tracing::trace!(path = %path.display(), "metrics cache hit");
                    return Ok(report.clone());
                }
            }
        }

        let bytes = std::fs::read(path).map_err(io)?;
        let report = parse(&bytes, kind)?;
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_path_buf(), (stamp, report.clone()));
        Ok(report)
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
