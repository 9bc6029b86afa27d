//! Extraction of power/performance/area figures from tool reports.
//!
//! [`parse`] is pure: the same bytes and kind always produce the same
//! report. A missing required figure is a [`ParseError`], never a default.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const NUMBER: &str = r"(-?[0-9]+(?:\.[0-9]+)?(?:[eE][+-]?[0-9]+)?)";

static YOSYS_AREA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?m)^\s*Chip area for (?:top )?module\s+[^:]*:\s*{NUMBER}")).unwrap()
});

static YOSYS_CELLS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*Number of cells:\s*([0-9]+)").unwrap());

static OPENROAD_AREA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"Design area {NUMBER} u\^2 {NUMBER}% utilization\.")).unwrap()
});

static OPENROAD_WNS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"(?m)^\s*wns(?:\s+max)?\s+{NUMBER}\s*$")).unwrap());

static OPENROAD_TNS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"(?m)^\s*tns(?:\s+max)?\s+{NUMBER}\s*$")).unwrap());

static OPENROAD_SLACK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?m)^\s*worst slack(?:\s+max)?\s+{NUMBER}\s*$")).unwrap()
});

/// Format of a report file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    /// Yosys `stat` output.
    YosysStat,
    /// OpenROAD console log.
    OpenroadLog,
    /// OpenLane `metrics.csv`.
    OpenlaneCsv,
    /// OpenLane 2 `metrics.json`.
    OpenlaneJson,
}

impl ReportKind {
    /// Stable snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::YosysStat => "yosys_stat",
            Self::OpenroadLog => "openroad_log",
            Self::OpenlaneCsv => "openlane_csv",
            Self::OpenlaneJson => "openlane_json",
        }
    }

    /// Guess the kind from a report's file name.
    pub fn for_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        match name {
            "synth_stats.txt" => Some(Self::YosysStat),
            "metrics.csv" => Some(Self::OpenlaneCsv),
            "metrics.json" => Some(Self::OpenlaneJson),
            n if n.starts_with("openroad_") && n.ends_with(".log") => Some(Self::OpenroadLog),
            _ => None,
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "yosys_stat" => Ok(Self::YosysStat),
            "openroad_log" => Ok(Self::OpenroadLog),
            "openlane_csv" => Ok(Self::OpenlaneCsv),
            "openlane_json" => Ok(Self::OpenlaneJson),
            other => Err(format!("unknown report kind '{other}'")),
        }
    }
}

/// Failure to extract a required figure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// A required field was absent or not numeric.
    #[error("failed to parse {kind} report: missing field '{field}'")]
    MissingField {
        /// Report kind.
        kind: ReportKind,
        /// The required field.
        field: String,
    },
    /// The report is structurally unreadable.
    #[error("failed to parse {kind} report: {detail}")]
    Malformed {
        /// Report kind.
        kind: ReportKind,
        /// What went wrong.
        detail: String,
    },
}

impl From<ParseError> for eda_error::EdaError {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::MissingField { kind, field } => Self::ParseFailure {
                kind: kind.to_string(),
                field,
            },
            ParseError::Malformed { kind, .. } => Self::ParseFailure {
                kind: kind.to_string(),
                field: "<document>".to_string(),
            },
        }
    }
}

/// Parsed figures of one report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsReport {
    /// Report kind.
    pub kind: ReportKind,
    /// Project-relative source path, filled in by the caller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Figures keyed by metric name (`area_um2`, `wns_ns`, ...).
    pub metrics: BTreeMap<String, f64>,
}

impl MetricsReport {
    fn new(kind: ReportKind) -> Self {
        Self {
            kind,
            source: None,
            metrics: BTreeMap::new(),
        }
    }

    /// Look up one figure.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    /// Attach the source path.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    fn set(&mut self, name: &str, value: Option<f64>) {
        if let Some(value) = value.filter(|v| v.is_finite()) {
            self.metrics.insert(name.to_string(), value);
        }
    }
}

/// Parse `bytes` as a report of `kind`.
pub fn parse(bytes: &[u8], kind: ReportKind) -> Result<MetricsReport, ParseError> {
    let text = String::from_utf8_lossy(bytes);
    match kind {
        ReportKind::YosysStat => parse_yosys_stat(&text),
        ReportKind::OpenroadLog => parse_openroad_log(&text),
        ReportKind::OpenlaneCsv => parse_openlane_csv(&text),
        ReportKind::OpenlaneJson => parse_openlane_json(&text),
    }
}

fn missing(kind: ReportKind, field: &str) -> ParseError {
    ParseError::MissingField {
        kind,
        field: field.to_string(),
    }
}

fn last_capture(re: &Regex, text: &str, group: usize) -> Option<f64> {
    re.captures_iter(text)
        .last()
        .and_then(|c| c.get(group))
        .and_then(|m| m.as_str().parse().ok())
}

fn first_capture(re: &Regex, text: &str) -> Option<f64> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn parse_yosys_stat(text: &str) -> Result<MetricsReport, ParseError> {
    let kind = ReportKind::YosysStat;
    let mut report = MetricsReport::new(kind);
    // The top module's figures come last in a hierarchical stat.
    let area = last_capture(&YOSYS_AREA_RE, text, 1).ok_or_else(|| missing(kind, "Chip area"))?;
    report.set("area_um2", Some(area));
    report.set("cell_count", last_capture(&YOSYS_CELLS_RE, text, 1));
    Ok(report)
}

fn parse_openroad_log(text: &str) -> Result<MetricsReport, ParseError> {
    let kind = ReportKind::OpenroadLog;
    let mut report = MetricsReport::new(kind);
    let caps = OPENROAD_AREA_RE
        .captures_iter(text)
        .last()
        .ok_or_else(|| missing(kind, "Design area"))?;
    let area = caps.get(1).and_then(|m| m.as_str().parse().ok());
    let util = caps.get(2).and_then(|m| m.as_str().parse().ok());
    report.set("area_um2", Some(area.ok_or_else(|| missing(kind, "Design area"))?));
    report.set("utilization_pct", util);
    report.set("wns_ns", first_capture(&OPENROAD_WNS_RE, text));
    report.set("tns_ns", first_capture(&OPENROAD_TNS_RE, text));
    report.set("worst_slack_ns", first_capture(&OPENROAD_SLACK_RE, text));
    Ok(report)
}

fn parse_openlane_csv(text: &str) -> Result<MetricsReport, ParseError> {
    let kind = ReportKind::OpenlaneCsv;
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let header = lines.next().ok_or_else(|| ParseError::Malformed {
        kind,
        detail: "empty file".to_string(),
    })?;
    let row = lines.next().ok_or_else(|| ParseError::Malformed {
        kind,
        detail: "no data row".to_string(),
    })?;
    let names = csv_cells(kind, header)?;
    let values = csv_cells(kind, row)?;
    if names.len() != values.len() {
        return Err(ParseError::Malformed {
            kind,
            detail: format!(
                "header has {} columns but the data row has {}",
                names.len(),
                values.len()
            ),
        });
    }
    let fields: BTreeMap<&str, &str> = names.into_iter().zip(values).collect();
    let number = |name: &str| fields.get(name).and_then(|v| v.parse::<f64>().ok());

    let mut report = MetricsReport::new(kind);
    match (number("CoreArea_um^2"), number("DIEAREA_mm^2")) {
        (Some(core), die) => {
            report.set("area_um2", Some(core));
            report.set("die_area_mm2", die);
        }
        (None, Some(die)) => {
            report.set("area_um2", Some(die * 1e6));
            report.set("die_area_mm2", Some(die));
        }
        (None, None) => return Err(missing(kind, "CoreArea_um^2")),
    }
    report.set("wns_ns", number("wns"));
    report.set("tns_ns", number("tns"));
    report.set("cell_count", number("TotalCells"));
    let internal = number("power_typical_internal_uW");
    let switching = number("power_typical_switching_uW");
    report.set("power_internal_uw", internal);
    report.set("power_switching_uw", switching);
    if let (Some(i), Some(s)) = (internal, switching) {
        report.set("power_total_w", Some((i + s) * 1e-6));
    }
    Ok(report)
}

/// Cells of one unquoted CSV line. Quoting is refused rather than guessed
/// at, since a quoted comma would shift every later column.
fn csv_cells(kind: ReportKind, line: &str) -> Result<Vec<&str>, ParseError> {
    if line.contains('"') {
        return Err(ParseError::Malformed {
            kind,
            detail: "quoted CSV fields are not supported".to_string(),
        });
    }
    Ok(line.split(',').map(str::trim).collect())
}

fn parse_openlane_json(text: &str) -> Result<MetricsReport, ParseError> {
    let kind = ReportKind::OpenlaneJson;
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| ParseError::Malformed {
            kind,
            detail: e.to_string(),
        })?;
    let object = value.as_object().ok_or_else(|| ParseError::Malformed {
        kind,
        detail: "expected a JSON object".to_string(),
    })?;
    let number = |name: &str| {
        object.get(name).and_then(|v| match v {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        })
    };

    let mut report = MetricsReport::new(kind);
    let area = number("design__instance__area")
        .ok_or_else(|| missing(kind, "design__instance__area"))?;
    report.set("area_um2", Some(area));
    report.set("wns_ns", number("timing__setup__ws"));
    report.set("tns_ns", number("timing__setup__tns"));
    report.set("cell_count", number("design__instance__count"));
    // Reported as a fraction of the core area.
    report.set(
        "utilization_pct",
        number("design__instance__utilization").map(|u| u * 100.0),
    );
    report.set("power_total_w", number("power__total"));
    Ok(report)
}
