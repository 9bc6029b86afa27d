//! The closed tool registry and typed tool arguments.
//!
//! Every tool the server exposes is a [`ToolName`] variant, and every call is
//! a [`ToolCall`] variant carrying already-validated arguments. Anything that
//! ends up in a script or an argv passes an allow-list here first.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use eda_error::EdaError;
use eda_security::names::{validate_identifier, validate_project_name, validate_token};
use regex::Regex;
use rmcp::schemars::{self, JsonSchema};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Largest file accepted by `write_file`.
pub const MAX_CONTENT_BYTES: usize = 4 * 1024 * 1024;

/// Largest custom OpenROAD script.
pub const MAX_TCL_BODY_BYTES: usize = 64 * 1024;

static MISSING_FIELD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"missing field `([^`]+)`").unwrap());

static UNKNOWN_VARIANT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"unknown variant `([^`]*)`").unwrap());

/// Every tool the server knows. Unknown names fail closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    /// Create (or reopen) a project workspace.
    InitializeProject,
    /// Write a file into a project.
    WriteFile,
    /// List a project's files.
    ListProjectFiles,
    /// List every project.
    ListProjects,
    /// Synthesize with Yosys.
    RunYosysSynthesis,
    /// Run one OpenROAD stage.
    RunOpenroadTask,
    /// Run the full OpenLane flow.
    RunOpenlaneFlow,
    /// Parse PPA figures from the latest reports.
    ReadMetrics,
    /// Build a download URL for a project file.
    GetFileUrl,
    /// Render a PNG preview of a GDS layout.
    RenderGdsPreview,
    /// Cancel the active run of a project.
    CancelRun,
}

impl ToolName {
    /// All tools, in registry order.
    pub const ALL: [ToolName; 11] = [
        Self::InitializeProject,
        Self::WriteFile,
        Self::ListProjectFiles,
        Self::ListProjects,
        Self::RunYosysSynthesis,
        Self::RunOpenroadTask,
        Self::RunOpenlaneFlow,
        Self::ReadMetrics,
        Self::GetFileUrl,
        Self::RenderGdsPreview,
        Self::CancelRun,
    ];

    /// Wire name of the tool.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InitializeProject => "initialize_project",
            Self::WriteFile => "write_file",
            Self::ListProjectFiles => "list_project_files",
            Self::ListProjects => "list_projects",
            Self::RunYosysSynthesis => "run_yosys_synthesis",
            Self::RunOpenroadTask => "run_openroad_task",
            Self::RunOpenlaneFlow => "run_openlane_flow",
            Self::ReadMetrics => "read_metrics",
            Self::GetFileUrl => "get_file_url",
            Self::RenderGdsPreview => "render_gds_preview",
            Self::CancelRun => "cancel_run",
        }
    }

    /// Wire names of every tool, for "did you mean" suggestions.
    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|t| t.as_str()).collect()
    }

    /// Whether the tool starts a sandboxed run.
    pub fn is_run(&self) -> bool {
        matches!(
            self,
            Self::RunYosysSynthesis
                | Self::RunOpenroadTask
                | Self::RunOpenlaneFlow
                | Self::RenderGdsPreview
        )
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = EdaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| EdaError::UnknownTool {
                name: s.to_string(),
            })
    }
}

/// Arguments of `initialize_project`.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
pub struct InitializeProjectArgs {
    /// Project name (`[A-Za-z0-9_-]{1,64}`). Generated when omitted.
    #[serde(default)]
    pub project_name: Option<String>,
}

/// Arguments of `write_file`.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct WriteFileArgs {
    /// Target project.
    pub project_name: String,
    /// Path relative to the project root, e.g. `src/adder.v`.
    pub filename: String,
    /// File content (UTF-8, at most 4 MiB).
    pub content: String,
}

/// Arguments naming only a project.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct ProjectArgs {
    /// Target project.
    pub project_name: String,
}

/// Arguments of `run_yosys_synthesis`.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct YosysArgs {
    /// Target project.
    pub project_name: String,
    /// Name of the top-level Verilog module.
    pub top_module: String,
}

/// OpenROAD stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OpenroadTask {
    /// Initialize the floorplan.
    Floorplan,
    /// Global and detailed placement.
    Place,
    /// Clock tree synthesis.
    Cts,
    /// Global and detailed routing.
    Route,
    /// Static timing analysis.
    Timing,
    /// A caller-supplied Tcl body.
    Custom,
}

impl OpenroadTask {
    /// Wire name, also used in script and log file names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Floorplan => "floorplan",
            Self::Place => "place",
            Self::Cts => "cts",
            Self::Route => "route",
            Self::Timing => "timing",
            Self::Custom => "custom",
        }
    }
}

/// A value bound to an OpenROAD script variable.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(untagged)]
pub enum ParamValue {
    /// Rendered as `1` or `0`.
    Bool(bool),
    /// A finite number.
    Number(f64),
    /// A plain token (`[A-Za-z0-9_.-]{1,128}`).
    Token(String),
}

impl ParamValue {
    /// Tcl rendering of the value.
    pub fn render(&self) -> String {
        match self {
            Self::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            Self::Number(n) => n.to_string(),
            Self::Token(t) => t.clone(),
        }
    }
}

/// Arguments of `run_openroad_task`.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct OpenroadArgs {
    /// Target project (must have a synthesized netlist).
    pub project_name: String,
    /// One of `floorplan`, `place`, `cts`, `route`, `timing`, `custom`.
    pub task: OpenroadTask,
    /// Script variables, e.g. `{"utilization": 40}`.
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
    /// Tcl body for the `custom` task (at most 64 KiB).
    #[serde(default)]
    pub tcl_body: Option<String>,
}

/// Process design kits accepted by OpenLane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
pub enum Pdk {
    /// SkyWater 130 nm, variant A.
    #[default]
    #[serde(rename = "sky130A")]
    Sky130A,
    /// SkyWater 130 nm, variant B.
    #[serde(rename = "sky130B")]
    Sky130B,
    /// GlobalFoundries 180 nm MCU, variant D.
    #[serde(rename = "gf180mcuD")]
    Gf180mcuD,
}

impl Pdk {
    /// Name as OpenLane spells it.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sky130A => "sky130A",
            Self::Sky130B => "sky130B",
            Self::Gf180mcuD => "gf180mcuD",
        }
    }
}

/// Arguments of `run_openlane_flow`.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct OpenlaneArgs {
    /// Target project.
    pub project_name: String,
    /// Name of the top-level Verilog module.
    pub top_module: String,
    /// Clock period in nanoseconds, in (0, 1000]. Defaults to 10.
    #[serde(default)]
    pub clock_period_ns: Option<f64>,
    /// Target core utilization in percent, in [1, 99]. Defaults to 50.
    #[serde(default)]
    pub core_utilization: Option<f64>,
    /// `sky130A` (default), `sky130B` or `gf180mcuD`.
    #[serde(default)]
    pub pdk: Option<Pdk>,
    /// Clock port name. Defaults to `clk`.
    #[serde(default)]
    pub clock_port: Option<String>,
}

/// Which reports `read_metrics` looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MetricsSource {
    /// The most recent report of any kind.
    #[default]
    Auto,
    /// `reports/synth_stats.txt`.
    Synthesis,
    /// The latest `reports/openroad_*.log`.
    Openroad,
    /// The latest OpenLane run's metrics.
    Openlane,
}

/// Arguments of `read_metrics`.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct ReadMetricsArgs {
    /// Target project.
    pub project_name: String,
    /// `auto` (default), `synthesis`, `openroad` or `openlane`.
    #[serde(default)]
    pub source: Option<MetricsSource>,
}

/// Arguments of `get_file_url`.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct FileUrlArgs {
    /// Target project.
    pub project_name: String,
    /// Path relative to the project root.
    pub file_path: String,
}

/// Arguments of `render_gds_preview`.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct GdsPreviewArgs {
    /// Target project.
    pub project_name: String,
    /// Path of the layout (`.gds`, `.gds2` or `.oas`) relative to the project root.
    pub gds_path: String,
}

/// A validated tool invocation.
#[derive(Debug, Clone)]
pub enum ToolCall {
    /// `initialize_project`
    InitializeProject(InitializeProjectArgs),
    /// `write_file`
    WriteFile(WriteFileArgs),
    /// `list_project_files`
    ListProjectFiles(ProjectArgs),
    /// `list_projects`
    ListProjects,
    /// `run_yosys_synthesis`
    RunYosysSynthesis(YosysArgs),
    /// `run_openroad_task`
    RunOpenroadTask(OpenroadArgs),
    /// `run_openlane_flow`
    RunOpenlaneFlow(OpenlaneArgs),
    /// `read_metrics`
    ReadMetrics(ReadMetricsArgs),
    /// `get_file_url`
    GetFileUrl(FileUrlArgs),
    /// `render_gds_preview`
    RenderGdsPreview(GdsPreviewArgs),
    /// `cancel_run`
    CancelRun(ProjectArgs),
}

impl ToolCall {
    /// Decode and validate `arguments` for `name`.
    ///
    /// `null` arguments are treated as an empty object.
    pub fn parse(name: ToolName, arguments: Value) -> Result<Self, EdaError> {
        let arguments = match arguments {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        let call = match name {
            ToolName::InitializeProject => Self::InitializeProject(decode(&arguments)?),
            ToolName::WriteFile => Self::WriteFile(decode(&arguments)?),
            ToolName::ListProjectFiles => Self::ListProjectFiles(decode(&arguments)?),
            ToolName::ListProjects => Self::ListProjects,
            ToolName::RunYosysSynthesis => Self::RunYosysSynthesis(decode(&arguments)?),
            ToolName::RunOpenroadTask => Self::RunOpenroadTask(decode(&arguments)?),
            ToolName::RunOpenlaneFlow => Self::RunOpenlaneFlow(decode(&arguments)?),
            ToolName::ReadMetrics => Self::ReadMetrics(decode(&arguments)?),
            ToolName::GetFileUrl => Self::GetFileUrl(decode(&arguments)?),
            ToolName::RenderGdsPreview => Self::RenderGdsPreview(decode(&arguments)?),
            ToolName::CancelRun => Self::CancelRun(decode(&arguments)?),
        };
        call.validate()?;
        Ok(call)
    }

    /// The tool this call invokes.
    pub fn name(&self) -> ToolName {
        match self {
            Self::InitializeProject(_) => ToolName::InitializeProject,
            Self::WriteFile(_) => ToolName::WriteFile,
            Self::ListProjectFiles(_) => ToolName::ListProjectFiles,
            Self::ListProjects => ToolName::ListProjects,
            Self::RunYosysSynthesis(_) => ToolName::RunYosysSynthesis,
            Self::RunOpenroadTask(_) => ToolName::RunOpenroadTask,
            Self::RunOpenlaneFlow(_) => ToolName::RunOpenlaneFlow,
            Self::ReadMetrics(_) => ToolName::ReadMetrics,
            Self::GetFileUrl(_) => ToolName::GetFileUrl,
            Self::RenderGdsPreview(_) => ToolName::RenderGdsPreview,
            Self::CancelRun(_) => ToolName::CancelRun,
        }
    }

    /// The project the call targets, if any.
    pub fn project(&self) -> Option<&str> {
        match self {
            Self::InitializeProject(a) => a.project_name.as_deref(),
            Self::WriteFile(a) => Some(&a.project_name),
            Self::ListProjectFiles(a) | Self::CancelRun(a) => Some(&a.project_name),
            Self::ListProjects => None,
            Self::RunYosysSynthesis(a) => Some(&a.project_name),
            Self::RunOpenroadTask(a) => Some(&a.project_name),
            Self::RunOpenlaneFlow(a) => Some(&a.project_name),
            Self::ReadMetrics(a) => Some(&a.project_name),
            Self::GetFileUrl(a) => Some(&a.project_name),
            Self::RenderGdsPreview(a) => Some(&a.project_name),
        }
    }

    /// Check every argument against its allow-list.
    ///
    /// Paths are only checked for presence here; containment is enforced
    /// by the gatekeeper when they are resolved.
    pub fn validate(&self) -> Result<(), EdaError> {
        if let Some(project) = self.project() {
            validate_project_name(project)?;
        }
        match self {
            Self::InitializeProject(_)
            | Self::ListProjectFiles(_)
            | Self::ListProjects
            | Self::ReadMetrics(_)
            | Self::CancelRun(_) => Ok(()),
            Self::WriteFile(a) => {
                require_path("filename", &a.filename)?;
                if a.content.len() > MAX_CONTENT_BYTES {
                    return Err(EdaError::invalid(
                        "content",
                        format!("exceeds the {MAX_CONTENT_BYTES} byte limit"),
                    ));
                }
                Ok(())
            }
            Self::RunYosysSynthesis(a) => validate_identifier("top_module", &a.top_module),
            Self::RunOpenroadTask(a) => validate_openroad(a),
            Self::RunOpenlaneFlow(a) => validate_openlane(a),
            Self::GetFileUrl(a) => require_path("file_path", &a.file_path),
            Self::RenderGdsPreview(a) => {
                require_path("gds_path", &a.gds_path)?;
                let lower = a.gds_path.to_ascii_lowercase();
                if [".gds", ".gds2", ".oas"].iter().any(|ext| lower.ends_with(ext)) {
                    Ok(())
                } else {
                    Err(EdaError::invalid(
                        "gds_path",
                        "must name a .gds, .gds2 or .oas layout",
                    ))
                }
            }
        }
    }
}

fn validate_openroad(args: &OpenroadArgs) -> Result<(), EdaError> {
    for (key, value) in &args.params {
        validate_identifier("params", key)?;
        match value {
            ParamValue::Number(n) if !n.is_finite() => {
                return Err(EdaError::invalid("params", format!("'{key}' must be finite")));
            }
            ParamValue::Token(t) => validate_token("params", t)?,
            _ => {}
        }
    }
    match (&args.task, &args.tcl_body) {
        (OpenroadTask::Custom, None) => Err(EdaError::invalid(
            "tcl_body",
            "is required for task 'custom'",
        )),
        (OpenroadTask::Custom, Some(body)) if body.trim().is_empty() => {
            Err(EdaError::invalid("tcl_body", "must not be empty"))
        }
        (OpenroadTask::Custom, Some(body)) if body.len() > MAX_TCL_BODY_BYTES => Err(
            EdaError::invalid("tcl_body", format!("exceeds the {MAX_TCL_BODY_BYTES} byte limit")),
        ),
        (OpenroadTask::Custom, Some(body)) if body.contains('\0') => {
            Err(EdaError::invalid("tcl_body", "must not contain NUL bytes"))
        }
        (task, Some(_)) if *task != OpenroadTask::Custom => Err(EdaError::invalid(
            "tcl_body",
            "is only accepted with task 'custom'",
        )),
        _ => Ok(()),
    }
}

fn validate_openlane(args: &OpenlaneArgs) -> Result<(), EdaError> {
    validate_identifier("top_module", &args.top_module)?;
    if let Some(port) = &args.clock_port {
        validate_identifier("clock_port", port)?;
    }
    if let Some(period) = args.clock_period_ns {
        if !(period.is_finite() && period > 0.0 && period <= 1000.0) {
            return Err(EdaError::invalid("clock_period_ns", "must be in (0, 1000]"));
        }
    }
    if let Some(util) = args.core_utilization {
        if !(util.is_finite() && (1.0..=99.0).contains(&util)) {
            return Err(EdaError::invalid("core_utilization", "must be in [1, 99]"));
        }
    }
    Ok(())
}

fn require_path(field: &str, value: &str) -> Result<(), EdaError> {
    if value.trim().is_empty() {
        Err(EdaError::invalid(field, "must not be empty"))
    } else {
        Ok(())
    }
}

/// Deserialize tool arguments, naming the offending field on failure.
fn decode<T: DeserializeOwned>(arguments: &Value) -> Result<T, EdaError> {
    serde_json::from_value(arguments.clone()).map_err(|e| {
        let message = e.to_string();
        EdaError::invalid(field_of(&message, arguments), message)
    })
}

fn field_of(message: &str, arguments: &Value) -> String {
    if let Some(caps) = MISSING_FIELD_RE.captures(message) {
        return caps[1].to_string();
    }
    if let (Some(caps), Some(obj)) = (UNKNOWN_VARIANT_RE.captures(message), arguments.as_object()) {
        if let Some((key, _)) = obj.iter().find(|(_, v)| v.as_str() == Some(&caps[1])) {
            return key.clone();
        }
    }
    "arguments".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn invalid_field(err: EdaError) -> String {
        match err {
            EdaError::InvalidArgument { field, .. } => field,
            other => panic!("expected InvalidArgument, got {other:?}"),
        }
    }

    #[test]
    fn names_round_trip() {
        for tool in ToolName::ALL {
            assert_eq!(tool.as_str().parse::<ToolName>().unwrap(), tool);
        }
        assert_eq!(ToolName::names().len(), 11);
    }

    #[test]
    fn unknown_tool_fails_closed() {
        let err = "run_magic_drc".parse::<ToolName>().unwrap_err();
        assert!(matches!(err, EdaError::UnknownTool { name } if name == "run_magic_drc"));
    }

    #[test]
    fn missing_field_is_named() {
        let err = ToolCall::parse(
            ToolName::RunYosysSynthesis,
            json!({"project_name": "adder8"}),
        )
        .unwrap_err();
        assert_eq!(invalid_field(err), "top_module");
    }

    #[test]
    fn unknown_enum_value_names_its_field() {
        let err = ToolCall::parse(
            ToolName::RunOpenroadTask,
            json!({"project_name": "adder8", "task": "detail_route"}),
        )
        .unwrap_err();
        assert_eq!(invalid_field(err), "task");
    }

    #[test]
    fn null_arguments_are_empty() {
        let call = ToolCall::parse(ToolName::InitializeProject, Value::Null).unwrap();
        assert!(call.project().is_none());
        assert!(matches!(
            ToolCall::parse(ToolName::ListProjects, Value::Null).unwrap(),
            ToolCall::ListProjects
        ));
    }

    #[test]
    fn identifiers_are_allow_listed() {
        for top in ["adder; exec rm -rf /", "1adder", "", "a b", "$top"] {
            let err = ToolCall::parse(
                ToolName::RunYosysSynthesis,
                json!({"project_name": "adder8", "top_module": top}),
            )
            .unwrap_err();
            assert_eq!(invalid_field(err), "top_module");
        }
        let err = ToolCall::parse(
            ToolName::ListProjectFiles,
            json!({"project_name": "../etc"}),
        )
        .unwrap_err();
        assert_eq!(invalid_field(err), "project_name");
    }

    #[test]
    fn openroad_params() {
        let call = ToolCall::parse(
            ToolName::RunOpenroadTask,
            json!({
                "project_name": "adder8",
                "task": "floorplan",
                "params": {"utilization": 40, "aspect_ratio": 1.5, "verbose": true, "site": "unithd"}
            }),
        )
        .unwrap();
        let ToolCall::RunOpenroadTask(args) = call else {
            panic!("wrong variant");
        };
        assert_eq!(args.params["utilization"].render(), "40");
        assert_eq!(args.params["aspect_ratio"].render(), "1.5");
        assert_eq!(args.params["verbose"].render(), "1");
        assert_eq!(args.params["site"].render(), "unithd");

        for params in [
            json!({"bad key": 1}),
            json!({"k": "[exec whoami]"}),
            json!({"k": "a b"}),
        ] {
            let err = ToolCall::parse(
                ToolName::RunOpenroadTask,
                json!({"project_name": "p", "task": "place", "params": params}),
            )
            .unwrap_err();
            assert_eq!(invalid_field(err), "params");
        }
    }

    #[test]
    fn custom_task_requires_body() {
        let err = ToolCall::parse(
            ToolName::RunOpenroadTask,
            json!({"project_name": "p", "task": "custom"}),
        )
        .unwrap_err();
        assert_eq!(invalid_field(err), "tcl_body");

        let err = ToolCall::parse(
            ToolName::RunOpenroadTask,
            json!({"project_name": "p", "task": "route", "tcl_body": "puts hi"}),
        )
        .unwrap_err();
        assert_eq!(invalid_field(err), "tcl_body");

        let big = "#".repeat(MAX_TCL_BODY_BYTES + 1);
        let err = ToolCall::parse(
            ToolName::RunOpenroadTask,
            json!({"project_name": "p", "task": "custom", "tcl_body": big}),
        )
        .unwrap_err();
        assert_eq!(invalid_field(err), "tcl_body");

        assert!(ToolCall::parse(
            ToolName::RunOpenroadTask,
            json!({"project_name": "p", "task": "custom", "tcl_body": "report_design_area"}),
        )
        .is_ok());
    }

    #[test]
    fn openlane_ranges() {
        let base = |extra: Value| {
            let mut args = json!({"project_name": "p", "top_module": "adder"});
            for (k, v) in extra.as_object().unwrap() {
                args[k] = v.clone();
            }
            ToolCall::parse(ToolName::RunOpenlaneFlow, args)
        };
        assert!(base(json!({})).is_ok());
        assert!(base(json!({"clock_period_ns": 1000, "core_utilization": 99, "pdk": "gf180mcuD"})).is_ok());
        assert_eq!(invalid_field(base(json!({"clock_period_ns": 0})).unwrap_err()), "clock_period_ns");
        assert_eq!(invalid_field(base(json!({"clock_period_ns": 1000.5})).unwrap_err()), "clock_period_ns");
        assert_eq!(invalid_field(base(json!({"core_utilization": 0.5})).unwrap_err()), "core_utilization");
        assert_eq!(invalid_field(base(json!({"pdk": "tsmc5"})).unwrap_err()), "pdk");
        assert_eq!(invalid_field(base(json!({"clock_port": "clk;x"})).unwrap_err()), "clock_port");
    }

    #[test]
    fn write_file_limits() {
        let big = "x".repeat(MAX_CONTENT_BYTES + 1);
        let err = ToolCall::parse(
            ToolName::WriteFile,
            json!({"project_name": "p", "filename": "src/a.v", "content": big}),
        )
        .unwrap_err();
        assert_eq!(invalid_field(err), "content");
        let err = ToolCall::parse(
            ToolName::WriteFile,
            json!({"project_name": "p", "filename": " ", "content": ""}),
        )
        .unwrap_err();
        assert_eq!(invalid_field(err), "filename");
    }

    #[test]
    fn gds_extension_required() {
        assert!(ToolCall::parse(
            ToolName::RenderGdsPreview,
            json!({"project_name": "p", "gds_path": "runs/r1/results/final/gds/adder.gds"}),
        )
        .is_ok());
        let err = ToolCall::parse(
            ToolName::RenderGdsPreview,
            json!({"project_name": "p", "gds_path": "reports/synth.v"}),
        )
        .unwrap_err();
        assert_eq!(invalid_field(err), "gds_path");
    }
}
