//! Tool dispatch: one handler per [`ToolCall`] variant.
//!
//! The dispatcher owns the per-project busy flags, the report cache and the
//! per-tool container settings. Run-type tools follow the same shape:
//! acquire the project lock, write the generated script into the project,
//! run the container through the shared [`SandboxExecutor`], then map the
//! run's outcome onto a JSON result or a sandbox error carrying
//! [`RunDiagnostics`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use eda_audit::{AuditEvent, AuditEventKind};
use eda_config::{
    EdaConfig, ToolOverrides, ToolsSection, DEFAULT_OPENLANE_IMAGE, DEFAULT_OPENROAD_IMAGE,
    DEFAULT_YOSYS_IMAGE,
};
use eda_error::{EdaError, RunDiagnostics};
use eda_reports::{extract_error_details, tail, LoadError, MetricsCache, MetricsReport, ReportKind};
use eda_sandbox::redact::redact_output;
use eda_sandbox::{ExecutionRun, RunRequest, RunStatus, SandboxExecutor};
use eda_security::{CallerIdentity, Gatekeeper};
use eda_workspace::{slash_path, Project, Workspace};
use serde_json::{json, Value};

use crate::locks::{ProjectLocks, RunGuard};
use crate::registry::{
    FileUrlArgs, GdsPreviewArgs, InitializeProjectArgs, MetricsSource, OpenlaneArgs, OpenroadArgs,
    ParamValue, ProjectArgs, ReadMetricsArgs, ToolCall, ToolName, WriteFileArgs, YosysArgs,
};
use crate::scripts::{self, CONTAINER_WORKDIR};

/// Lines of stdout/stderr included in a run result.
const RESULT_TAIL_LINES: usize = 20;

/// Output files listed in a run result.
const MAX_RESULT_FILES: usize = 50;

/// OpenLane runs take much longer than the other tools.
const OPENLANE_DEFAULT_TIMEOUT: Duration = Duration::from_secs(3600);

/// Routes typed tool calls to their handlers.
pub struct Dispatcher {
    workspace: Workspace,
    gatekeeper: Arc<Gatekeeper>,
    executor: Arc<SandboxExecutor>,
    locks: ProjectLocks,
    reports: MetricsCache,
    tools: ToolsSection,
    file_base_url: String,
}

impl Dispatcher {
    /// Build a dispatcher from explicit parts.
    pub fn new(
        workspace: Workspace,
        gatekeeper: Arc<Gatekeeper>,
        executor: Arc<SandboxExecutor>,
        tools: ToolsSection,
        file_base_url: impl Into<String>,
    ) -> Self {
        Self {
            workspace,
            gatekeeper,
            executor,
            locks: ProjectLocks::new(),
            reports: MetricsCache::new(),
            tools,
            file_base_url: file_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Build a dispatcher with the tool settings and file URL of `config`.
    pub fn from_config(
        config: &EdaConfig,
        workspace: Workspace,
        gatekeeper: Arc<Gatekeeper>,
        executor: Arc<SandboxExecutor>,
    ) -> Self {
        Self::new(
            workspace,
            gatekeeper,
            executor,
            config.tools.clone(),
            config.file_base_url(),
        )
    }

    /// The workspace all projects live in.
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// The shared gatekeeper.
    pub fn gatekeeper(&self) -> &Arc<Gatekeeper> {
        &self.gatekeeper
    }

    /// Per-project busy flags.
    pub fn locks(&self) -> &ProjectLocks {
        &self.locks
    }

    /// Cancel every active run and refuse new ones. Returns how many runs
    /// were signalled.
    pub fn shutdown(&self) -> usize {
        self.executor.close();
        let cancelled = self.locks.cancel_all();
        tracing::info!(cancelled, "dispatcher shut down");
        cancelled
    }

    /// Resolve `name`, decode `arguments` and dispatch.
    pub async fn dispatch_named(
        &self,
        name: &str,
        arguments: Value,
        identity: &CallerIdentity,
    ) -> Result<Value, EdaError> {
        let tool: ToolName = name.parse()?;
        let call = ToolCall::parse(tool, arguments)?;
        self.dispatch(call, identity).await
    }

    /// Run one validated tool call on behalf of `identity`.
    pub async fn dispatch(&self, call: ToolCall, identity: &CallerIdentity) -> Result<Value, EdaError> {
        let tool = call.name();
        let project = call.project().unwrap_or("-").to_string();
        tracing::info!(tool = %tool, project = %project, identity = %identity, "tool call");

        let result = match call {
            ToolCall::InitializeProject(args) => self.initialize_project(args),
            ToolCall::WriteFile(args) => self.write_file(args, identity),
            ToolCall::ListProjectFiles(args) => self.list_project_files(args),
            ToolCall::ListProjects => self.list_projects(),
            ToolCall::RunYosysSynthesis(args) => self.run_yosys(args, identity).await,
            ToolCall::RunOpenroadTask(args) => self.run_openroad(args, identity).await,
            ToolCall::RunOpenlaneFlow(args) => self.run_openlane(args, identity).await,
            ToolCall::ReadMetrics(args) => self.read_metrics(args),
            ToolCall::GetFileUrl(args) => self.get_file_url(args, identity),
            ToolCall::RenderGdsPreview(args) => self.render_gds_preview(args, identity).await,
            ToolCall::CancelRun(args) => self.cancel_run(args, identity),
        };

        match &result {
            Ok(_) => tracing::info!(tool = %tool, project = %project, "tool call succeeded"),
            Err(EdaError::Internal(e)) => {
                tracing::error!(tool = %tool, project = %project, error = ?e, "tool call failed")
            }
            Err(e) => {
                tracing::warn!(tool = %tool, project = %project, code = e.code(), error = %e, "tool call failed")
            }
        }
        result
    }

    fn initialize_project(&self, args: InitializeProjectArgs) -> Result<Value, EdaError> {
        let init = self.workspace.initialize(args.project_name.as_deref())?;
        Ok(json!({
            "tool": ToolName::InitializeProject.as_str(),
            "project": init.project.name(),
            "created": init.created,
            "created_at": init.meta.created_at,
            "directories": ["src", "scripts", "reports", "runs"],
        }))
    }

    fn write_file(&self, args: WriteFileArgs, identity: &CallerIdentity) -> Result<Value, EdaError> {
        let project = self.workspace.project(&args.project_name)?;
        self.locks.ensure_idle(project.name())?;
        let entry = project.write_file(
            &self.gatekeeper,
            &args.filename,
            args.content.as_bytes(),
            identity,
        )?;
        Ok(json!({
            "tool": ToolName::WriteFile.as_str(),
            "project": project.name(),
            "path": entry.path,
            "size": entry.size,
        }))
    }

    fn list_project_files(&self, args: ProjectArgs) -> Result<Value, EdaError> {
        let project = self.workspace.project(&args.project_name)?;
        self.locks.ensure_idle(project.name())?;
        let listing = project.list_files()?;
        Ok(json!({
            "tool": ToolName::ListProjectFiles.as_str(),
            "project": project.name(),
            "files": listing.files,
            "omitted": listing.omitted,
        }))
    }

    fn list_projects(&self) -> Result<Value, EdaError> {
        let projects: Vec<Value> = self
            .workspace
            .list_projects()?
            .into_iter()
            .map(|summary| {
                let busy = self.locks.is_busy(&summary.name);
                let mut value = json!(summary);
                value["busy"] = Value::Bool(busy);
                value
            })
            .collect();
        Ok(json!({
            "tool": ToolName::ListProjects.as_str(),
            "projects": projects,
        }))
    }

    async fn run_yosys(&self, args: YosysArgs, identity: &CallerIdentity) -> Result<Value, EdaError> {
        let project = self.workspace.project(&args.project_name)?;
        let guard = self.locks.acquire(project.name(), ToolName::RunYosysSynthesis)?;

        let sources = project.verilog_sources()?;
        if sources.is_empty() {
            return Err(EdaError::invalid(
                "project_name",
                "project has no Verilog sources; add *.v files under src/ with write_file",
            ));
        }
        if let Some(bad) = sources.iter().find(|s| !scripts::is_script_safe(s)) {
            return Err(EdaError::invalid(
                "project_name",
                format!("source file name '{bad}' cannot be used in a synthesis script"),
            ));
        }

        let settings = &self.tools.yosys;
        let script = scripts::yosys_script(&sources, &args.top_module, settings.liberty.as_deref());
        project.write_file(&self.gatekeeper, scripts::YOSYS_SCRIPT, script.as_bytes(), identity)?;
        // A failed run must not leave an earlier netlist looking current.
        remove_stale(&project, &[scripts::NETLIST, scripts::SYNTH_STATS])?;

        let request = self.project_request(&project, settings, DEFAULT_YOSYS_IMAGE, scripts::yosys_command());
        let run = self.execute(&project, &guard, request).await?;

        if !project.root().join(scripts::NETLIST).is_file() {
            return Err(self.run_error(
                EdaError::SandboxFailed,
                &run,
                "synthesis finished without writing reports/synth.v",
            ));
        }
        project.record_top_module(&args.top_module)?;

        let mut result = self.run_result(ToolName::RunYosysSynthesis, &project, &run, "reports/");
        result["netlist"] = json!(scripts::NETLIST);
        result["top_module"] = json!(args.top_module);
        self.attach_metrics(&mut result, &project, scripts::SYNTH_STATS, ReportKind::YosysStat);
        Ok(result)
    }

    async fn run_openroad(&self, args: OpenroadArgs, identity: &CallerIdentity) -> Result<Value, EdaError> {
        let project = self.workspace.project(&args.project_name)?;
        let guard = self.locks.acquire(project.name(), ToolName::RunOpenroadTask)?;

        if !project.root().join(scripts::NETLIST).is_file() {
            return Err(EdaError::invalid(
                "project_name",
                "no synthesized netlist at reports/synth.v; run run_yosys_synthesis first",
            ));
        }
        let top = match args.params.get("top_module") {
            Some(ParamValue::Token(top)) => top.clone(),
            _ => project.meta()?.top_module.ok_or_else(|| {
                EdaError::invalid(
                    "project_name",
                    "top module unknown; run run_yosys_synthesis or pass params.top_module",
                )
            })?,
        };

        let settings = &self.tools.openroad;
        let script = scripts::openroad_script(
            args.task,
            &top,
            &args.params,
            self.tools.yosys.liberty.as_deref(),
            args.tcl_body.as_deref(),
        );
        let script_path = scripts::openroad_script_path(args.task);
        let log_path = scripts::openroad_log_path(args.task);
        project.write_file(&self.gatekeeper, &script_path, script.as_bytes(), identity)?;
        remove_stale(&project, &[log_path.as_str()])?;

        let request = self.project_request(
            &project,
            settings,
            DEFAULT_OPENROAD_IMAGE,
            scripts::openroad_command(args.task),
        );
        let run = self.execute(&project, &guard, request).await?;

        let mut result = self.run_result(ToolName::RunOpenroadTask, &project, &run, "reports/");
        result["task"] = json!(args.task.as_str());
        result["script"] = json!(script_path);
        result["log"] = json!(log_path);
        if project.root().join(&log_path).is_file() {
            self.attach_metrics(&mut result, &project, &log_path, ReportKind::OpenroadLog);
        }
        Ok(result)
    }

    async fn run_openlane(&self, args: OpenlaneArgs, identity: &CallerIdentity) -> Result<Value, EdaError> {
        let project = self.workspace.project(&args.project_name)?;
        let guard = self.locks.acquire(project.name(), ToolName::RunOpenlaneFlow)?;

        let has_src = project
            .verilog_sources()?
            .iter()
            .any(|s| s.starts_with("src/") && s.ends_with(".v"));
        if !has_src {
            return Err(EdaError::invalid(
                "project_name",
                "OpenLane reads src/*.v; add the design under src/ with write_file",
            ));
        }

        let config = serde_json::to_vec_pretty(&scripts::openlane_config(&args))
            .map_err(|e| EdaError::Internal(anyhow::Error::new(e).context("encode OpenLane config")))?;
        project.write_file(&self.gatekeeper, scripts::OPENLANE_CONFIG, &config, identity)?;

        let tag = format!("run_{}", Utc::now().format("%Y%m%d_%H%M%S"));
        let settings = &self.tools.openlane;
        let mut request = self
            .project_request(&project, settings, DEFAULT_OPENLANE_IMAGE, scripts::openlane_command(&tag))
            .env("PDK_ROOT", scripts::OPENLANE_PDK_ROOT)
            .timeout(
                settings
                    .timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(OPENLANE_DEFAULT_TIMEOUT),
            );
        if let Some(cache) = &settings.pdk_cache_dir {
            request = request.mount(cache, scripts::OPENLANE_PDK_ROOT, false);
        }
        let run = self.execute(&project, &guard, request).await?;

        let run_dir = format!("runs/{tag}/");
        let mut result = self.run_result(ToolName::RunOpenlaneFlow, &project, &run, &run_dir);
        result["run_tag"] = json!(tag);
        result["pdk"] = json!(args.pdk.unwrap_or_default().as_str());

        let gds = format!("runs/{tag}/results/final/gds/{}.gds", args.top_module);
        if project.root().join(&gds).is_file() {
            result["gds"] = json!(gds);
            result["gds_url"] = json!(self.file_url(project.name(), &gds));
        }
        if let Some((path, kind)) = openlane_metrics(&project, Some(&tag)) {
            let relative = relative_to(&project, &path);
            self.attach_metrics(&mut result, &project, &relative, kind);
        }
        Ok(result)
    }

    fn read_metrics(&self, args: ReadMetricsArgs) -> Result<Value, EdaError> {
        let project = self.workspace.project(&args.project_name)?;
        let source = args.source.unwrap_or_default();
        let (path, kind) = newest(report_candidates(&project, source)?).ok_or_else(|| {
            EdaError::not_found(format!(
                "{} report in project '{}'; run a synthesis, OpenROAD task or OpenLane flow first",
                source_label(source),
                project.name()
            ))
        })?;
        let relative = relative_to(&project, &path);
        let report = self.load_report(&path, kind)?;
        Ok(json!({
            "tool": ToolName::ReadMetrics.as_str(),
            "project": project.name(),
            "source": relative,
            "kind": kind.as_str(),
            "metrics": report.metrics,
        }))
    }

    fn get_file_url(&self, args: FileUrlArgs, identity: &CallerIdentity) -> Result<Value, EdaError> {
        let project = self.workspace.project(&args.project_name)?;
        let file = project.resolve_file(&self.gatekeeper, "file_path", &args.file_path, identity)?;
        Ok(json!({
            "tool": ToolName::GetFileUrl.as_str(),
            "project": project.name(),
            "path": file.relative,
            "size": file.size,
            "url": self.file_url(project.name(), &file.relative),
        }))
    }

    async fn render_gds_preview(
        &self,
        args: GdsPreviewArgs,
        identity: &CallerIdentity,
    ) -> Result<Value, EdaError> {
        let project = self.workspace.project(&args.project_name)?;
        let guard = self.locks.acquire(project.name(), ToolName::RenderGdsPreview)?;
        let layout = project.resolve_file(&self.gatekeeper, "gds_path", &args.gds_path, identity)?;

        let layout_rel = Path::new(&layout.relative);
        let (Some(file_name), Some(stem)) = (
            layout_rel.file_name().and_then(|n| n.to_str()),
            layout_rel.file_stem().and_then(|n| n.to_str()),
        ) else {
            return Err(EdaError::invalid("gds_path", "must name a layout file"));
        };
        let parent_rel = layout_rel.parent().map(slash_path).unwrap_or_default();
        let in_parent = |name: &str| {
            if parent_rel.is_empty() {
                name.to_string()
            } else {
                format!("{parent_rel}/{name}")
            }
        };
        let png = scripts::preview_name(stem);
        let script = scripts::klayout_script(file_name, &png);
        project.write_file(
            &self.gatekeeper,
            &in_parent(scripts::KLAYOUT_SCRIPT),
            script.as_bytes(),
            identity,
        )?;
        let png_rel = in_parent(&png);
        remove_stale(&project, &[png_rel.as_str()])?;

        let settings = &self.tools.klayout;
        let image = settings
            .image
            .as_deref()
            .unwrap_or_else(|| self.tools.openlane.image_or(DEFAULT_OPENLANE_IMAGE));
        let host_dir = layout
            .absolute
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| project.root().to_path_buf());
        let mut request = RunRequest::new(image, scripts::klayout_command())
            .mount(host_dir, CONTAINER_WORKDIR, false)
            .workdir(CONTAINER_WORKDIR)
            .env("QT_QPA_PLATFORM", "offscreen");
        if let Some(secs) = settings.timeout_secs {
            request = request.timeout(Duration::from_secs(secs));
        }
        let run = self.execute(&project, &guard, request).await?;

        if !project.root().join(&png_rel).is_file() {
            return Err(self.run_error(
                EdaError::SandboxFailed,
                &run,
                "KLayout finished without writing the preview image",
            ));
        }
        let mut result = self.run_result(ToolName::RenderGdsPreview, &project, &run, &png_rel);
        result["gds"] = json!(layout.relative);
        result["preview"] = json!(png_rel);
        result["url"] = json!(self.file_url(project.name(), &png_rel));
        Ok(result)
    }

    fn cancel_run(&self, args: ProjectArgs, identity: &CallerIdentity) -> Result<Value, EdaError> {
        let project = self.workspace.project(&args.project_name)?;
        let cancelled = self.locks.cancel(project.name());
        if let Some(active) = &cancelled {
            AuditEvent::new(
                AuditEventKind::RunCancelled,
                identity.to_string(),
                format!("cancelled {} run in project '{}'", active.tool, active.project),
            )
            .emit();
        }
        Ok(json!({
            "tool": ToolName::CancelRun.as_str(),
            "project": project.name(),
            "cancelled": cancelled.is_some(),
            "run": cancelled,
        }))
    }

    /// A request running `command` with the project mounted at `/work`.
    fn project_request(
        &self,
        project: &Project,
        settings: &ToolOverrides,
        default_image: &str,
        command: Vec<String>,
    ) -> RunRequest {
        let mut request = RunRequest::new(settings.image_or(default_image), command)
            .mount(project.root(), CONTAINER_WORKDIR, false)
            .workdir(CONTAINER_WORKDIR);
        if let Some(secs) = settings.timeout_secs {
            request = request.timeout(Duration::from_secs(secs));
        }
        request
    }

    /// Execute under `guard`'s cancellation token, mapping any outcome other
    /// than exit 0 to a sandbox error.
    async fn execute(
        &self,
        project: &Project,
        guard: &RunGuard,
        request: RunRequest,
    ) -> Result<ExecutionRun, EdaError> {
        let request = request.project(project.name()).ledger(project.runs_dir());
        let run = self.executor.execute(request, guard.cancellation()).await?;
        if run.succeeded() {
            return Ok(run);
        }
        let error: fn(Box<RunDiagnostics>) -> EdaError = match run.status {
            RunStatus::TimedOut => EdaError::SandboxTimeout,
            RunStatus::Killed => EdaError::SandboxResourceExceeded,
            RunStatus::Cancelled => EdaError::SandboxCancelled,
            _ => EdaError::SandboxFailed,
        };
        Err(self.run_error(error, &run, ""))
    }

    fn run_error(
        &self,
        variant: fn(Box<RunDiagnostics>) -> EdaError,
        run: &ExecutionRun,
        detail: &str,
    ) -> EdaError {
        let mut excerpt = extract_error_details(&run.combined_output());
        for extra in [run.note.as_deref().unwrap_or_default(), detail] {
            if !extra.is_empty() {
                if !excerpt.is_empty() {
                    excerpt.push('\n');
                }
                excerpt.push_str(extra);
            }
        }
        variant(Box::new(RunDiagnostics {
            run_id: run.run_id.clone(),
            exit_code: run.exit_code,
            duration_ms: run.duration_ms,
            output_excerpt: self.redact(&excerpt),
        }))
    }

    /// Common result fields of a finished run, listing files under `prefix`.
    fn run_result(&self, tool: ToolName, project: &Project, run: &ExecutionRun, prefix: &str) -> Value {
        let files: Vec<Value> = project
            .list_files()
            .map(|listing| listing.files)
            .unwrap_or_default()
            .into_iter()
            .filter(|f| f.path.starts_with(prefix))
            .take(MAX_RESULT_FILES)
            .map(|f| json!({ "path": f.path, "size": f.size }))
            .collect();
        json!({
            "tool": tool.as_str(),
            "project": project.name(),
            "run_id": run.run_id,
            "status": run.status,
            "exit_code": run.exit_code,
            "duration_ms": run.duration_ms,
            "stdout_tail": self.redact(&tail(&run.stdout, RESULT_TAIL_LINES)),
            "stderr_tail": self.redact(&tail(&run.stderr, RESULT_TAIL_LINES)),
            "output_truncated": run.stdout_truncated || run.stderr_truncated,
            "files": files,
        })
    }

    /// Add `metrics` (or `metrics_error`) for the report at `relative`.
    ///
    /// A run that succeeded stays successful when its report does not parse.
    fn attach_metrics(&self, result: &mut Value, project: &Project, relative: &str, kind: ReportKind) {
        let path = project.root().join(relative);
        match self.load_report(&path, kind) {
            Ok(report) => {
                result["metrics"] = json!(report.metrics);
                result["metrics_source"] = json!(relative);
            }
            Err(e) => {
                tracing::debug!(project = %project.name(), report = %relative, error = %e, "no metrics for run");
                result["metrics_error"] = json!(e.public_message());
            }
        }
    }

    fn load_report(&self, path: &Path, kind: ReportKind) -> Result<MetricsReport, EdaError> {
        self.reports.load(path, kind).map_err(|e| match e {
            LoadError::Parse(e) => e.into(),
            LoadError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
                EdaError::not_found(format!("{} report", kind.as_str()))
            }
            other => EdaError::Internal(anyhow::Error::new(other)),
        })
    }

    fn redact(&self, text: &str) -> String {
        redact_output(text, &[self.workspace.root()])
    }

    fn file_url(&self, project: &str, relative: &str) -> String {
        let encoded: Vec<String> = relative.split('/').map(percent_encode).collect();
        format!("{}/{}/{}", self.file_base_url, percent_encode(project), encoded.join("/"))
    }
}

/// Percent-encode one URL path segment, keeping RFC 3986 unreserved bytes.
pub fn percent_encode(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => out.push(byte as char),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

fn remove_stale(project: &Project, relatives: &[&str]) -> Result<(), EdaError> {
    for relative in relatives {
        match std::fs::remove_file(project.root().join(relative)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(EdaError::Internal(
                    anyhow::Error::new(e).context(format!("remove stale {relative}")),
                ))
            }
        }
    }
    Ok(())
}

fn relative_to(project: &Project, path: &Path) -> String {
    path.strip_prefix(project.root())
        .map(slash_path)
        .unwrap_or_else(|_| path.display().to_string())
}

fn source_label(source: MetricsSource) -> &'static str {
    match source {
        MetricsSource::Auto => "metrics",
        MetricsSource::Synthesis => "synthesis",
        MetricsSource::Openroad => "OpenROAD",
        MetricsSource::Openlane => "OpenLane",
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path)
        .ok()
        .filter(|m| m.is_file())
        .and_then(|m| m.modified().ok())
}

/// The most recently modified existing candidate.
fn newest(candidates: Vec<(PathBuf, ReportKind)>) -> Option<(PathBuf, ReportKind)> {
    candidates
        .into_iter()
        .filter_map(|(path, kind)| modified(&path).map(|m| (m, path, kind)))
        .max_by_key(|(m, _, _)| *m)
        .map(|(_, path, kind)| (path, kind))
}

fn report_candidates(project: &Project, source: MetricsSource) -> Result<Vec<(PathBuf, ReportKind)>, EdaError> {
    let mut candidates = Vec::new();
    let synthesis = matches!(source, MetricsSource::Auto | MetricsSource::Synthesis);
    let openroad = matches!(source, MetricsSource::Auto | MetricsSource::Openroad);
    let openlane = matches!(source, MetricsSource::Auto | MetricsSource::Openlane);

    if synthesis {
        candidates.push((project.root().join(scripts::SYNTH_STATS), ReportKind::YosysStat));
    }
    if openroad {
        candidates.extend(
            read_dir_files(&project.root().join("reports"))?
                .into_iter()
                .filter(|p| ReportKind::for_path(p) == Some(ReportKind::OpenroadLog))
                .map(|p| (p, ReportKind::OpenroadLog)),
        );
    }
    if openlane {
        candidates.extend(openlane_metrics(project, None));
    }
    Ok(candidates)
}

/// Metrics report of the OpenLane run `tag`, or of the newest run.
fn openlane_metrics(project: &Project, tag: Option<&str>) -> Option<(PathBuf, ReportKind)> {
    let runs = project.root().join("runs");
    let run_dirs: Vec<PathBuf> = match tag {
        Some(tag) => vec![runs.join(tag)],
        None => std::fs::read_dir(&runs)
            .ok()?
            .filter_map(Result::ok)
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .map(|e| e.path())
            .collect(),
    };
    let candidates = run_dirs
        .iter()
        .flat_map(|dir| {
            [
                (dir.join("reports").join("metrics.csv"), ReportKind::OpenlaneCsv),
                (dir.join("final").join("metrics.json"), ReportKind::OpenlaneJson),
            ]
        })
        .collect();
    newest(candidates)
}

fn read_dir_files(dir: &Path) -> Result<Vec<PathBuf>, EdaError> {
    match std::fs::read_dir(dir) {
        Ok(entries) => Ok(entries
            .filter_map(Result::ok)
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|e| e.path())
            .collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(EdaError::Internal(
            anyhow::Error::new(e).context(format!("read {}", dir.display())),
        )),
    }
}
