#![warn(missing_docs)]

//! # eda-server
//!
//! MCP server exposing EDA tools to agents.
//!
//! Tools fall into four groups:
//! - **workspace**: `initialize_project`, `write_file`, `list_project_files`, `list_projects`
//! - **runs**: `run_yosys_synthesis`, `run_openroad_task`, `run_openlane_flow`,
//!   `render_gds_preview`, each in a fresh sandboxed container
//! - **reads**: `read_metrics`, `get_file_url`
//! - **control**: `cancel_run`
//!
//! Every call is admitted by the gatekeeper (the HTTP middleware, or a
//! rate-limit check for stdio) before it reaches the [`Dispatcher`].
//! Failures are returned as structured JSON errors with host details
//! redacted.

pub mod dispatcher;
pub mod http;
pub mod locks;
pub mod registry;
pub mod scripts;

use std::sync::Arc;

use eda_error::EdaError;
use eda_sandbox::redact::redact_structured_error;
use eda_security::middleware::identity_of;
use eda_security::CallerIdentity;
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{Implementation, ServerCapabilities, ServerInfo};
use rmcp::service::RequestContext;
use rmcp::{tool, tool_handler, tool_router, RoleServer, ServerHandler};

pub use dispatcher::Dispatcher;
pub use locks::{ActiveRun, ProjectLocks, RunGuard};
pub use registry::{
    FileUrlArgs, GdsPreviewArgs, InitializeProjectArgs, MetricsSource, OpenlaneArgs, OpenroadArgs,
    OpenroadTask, ParamValue, Pdk, ProjectArgs, ReadMetricsArgs, ToolCall, ToolName,
    WriteFileArgs, YosysArgs,
};

/// The EDA MCP server handler.
///
/// Cheap to clone; every clone shares one [`Dispatcher`], which is what the
/// streamable HTTP transport needs for its per-session service factory.
#[derive(Clone)]
pub struct EdaServer {
    dispatcher: Arc<Dispatcher>,
    tool_router: ToolRouter<Self>,
}

impl EdaServer {
    /// Create a server around `dispatcher`.
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            tool_router: Self::tool_router(),
        }
    }

    /// The shared dispatcher.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Validate and dispatch `call`, rendering the outcome for the agent.
    ///
    /// `identity` is the caller admitted by the HTTP middleware; `None`
    /// means the stdio transport, which is admitted here.
    pub async fn handle(&self, call: ToolCall, identity: Option<CallerIdentity>) -> Result<String, String> {
        let tool = call.name();
        let outcome = async {
            let identity = match identity {
                Some(identity) => identity,
                None => self.dispatcher.gatekeeper().admit_stdio()?,
            };
            call.validate()?;
            self.dispatcher.dispatch(call, &identity).await
        }
        .await;

        match outcome {
            Ok(value) => {
                let json = serde_json::to_string_pretty(&value)
                    .map_err(|e| format!("result serialization failed: {e}"))?;
                tracing::debug!(tool = %tool, result_len = json.len(), "tool result");
                Ok(json)
            }
            Err(err) => Err(self.render_error(tool.as_str(), &err)),
        }
    }

    /// Structured, redacted JSON for `err`.
    pub fn render_error(&self, tool: &str, err: &EdaError) -> String {
        let names = ToolName::names();
        let mut value = err.to_structured_error(Some(&names));
        redact_structured_error(tool, &mut value, &[self.dispatcher.workspace().root()]);
        value.to_string()
    }

    async fn serve_call(&self, call: ToolCall, ctx: &RequestContext<RoleServer>) -> Result<String, String> {
        match ctx.extensions.get::<axum::http::request::Parts>() {
            Some(parts) => match identity_of(parts) {
                Some(identity) => self.handle(call, Some(identity)).await,
                None => Err(self.render_error(call.name().as_str(), &EdaError::Unauthorized)),
            },
            None => self.handle(call, None).await,
        }
    }
}

#[tool_router(router = tool_router)]
impl EdaServer {
    /// Create a project directory.
    #[tool(
        name = "initialize_project",
        description = "Create a project (or return the existing one). Without `project_name` a fresh `proj-xxxxxxxx` name is generated. Projects get src/, scripts/, reports/ and runs/ directories. Names: letters, digits, '_' and '-', at most 64 characters."
    )]
    pub async fn initialize_project(
        &self,
        Parameters(input): Parameters<InitializeProjectArgs>,
        ctx: RequestContext<RoleServer>,
    ) -> Result<String, String> {
        self.serve_call(ToolCall::InitializeProject(input), &ctx).await
    }

    /// Write a file into a project.
    #[tool(
        name = "write_file",
        description = "Write a UTF-8 file (at most 4 MiB) into a project, creating parent directories. Put Verilog sources under src/. Paths are relative to the project; absolute paths and '..' are rejected. Fails with BUSY while a run is active."
    )]
    pub async fn write_file(
        &self,
        Parameters(input): Parameters<WriteFileArgs>,
        ctx: RequestContext<RoleServer>,
    ) -> Result<String, String> {
        self.serve_call(ToolCall::WriteFile(input), &ctx).await
    }

    /// List the files of a project.
    #[tool(
        name = "list_project_files",
        description = "List a project's files with sizes and modification times. Intermediate OpenLane directories are skipped. Fails with BUSY while a run is active."
    )]
    pub async fn list_project_files(
        &self,
        Parameters(input): Parameters<ProjectArgs>,
        ctx: RequestContext<RoleServer>,
    ) -> Result<String, String> {
        self.serve_call(ToolCall::ListProjectFiles(input), &ctx).await
    }

    /// List all projects.
    #[tool(
        name = "list_projects",
        description = "List every project with its file count, total size, whether a netlist exists and whether a run is active."
    )]
    pub async fn list_projects(&self, ctx: RequestContext<RoleServer>) -> Result<String, String> {
        self.serve_call(ToolCall::ListProjects, &ctx).await
    }

    /// Synthesize with Yosys.
    #[tool(
        name = "run_yosys_synthesis",
        description = "Synthesize the project's Verilog (*.v, *.sv under src/ or the project root) with Yosys. Writes reports/synth.v and reports/synth_stats.txt and returns area and cell count. Remembers `top_module` for later OpenROAD tasks."
    )]
    pub async fn run_yosys_synthesis(
        &self,
        Parameters(input): Parameters<YosysArgs>,
        ctx: RequestContext<RoleServer>,
    ) -> Result<String, String> {
        self.serve_call(ToolCall::RunYosysSynthesis(input), &ctx).await
    }

    /// Run one OpenROAD step.
    #[tool(
        name = "run_openroad_task",
        description = "Run an OpenROAD step on the synthesized netlist: floorplan, place, cts, route, timing, or custom (with `tcl_body`). Steps read the previous step's DEF from reports/, so run them in order. `params` become Tcl variables (numbers, booleans or simple tokens), e.g. {\"utilization\": 40}. The log is kept in reports/openroad_<task>.log."
    )]
    pub async fn run_openroad_task(
        &self,
        Parameters(input): Parameters<OpenroadArgs>,
        ctx: RequestContext<RoleServer>,
    ) -> Result<String, String> {
        self.serve_call(ToolCall::RunOpenroadTask(input), &ctx).await
    }

    /// Run the complete OpenLane flow.
    #[tool(
        name = "run_openlane_flow",
        description = "Run the full OpenLane RTL-to-GDSII flow on src/*.v. Writes config.json and produces runs/<run_tag>/. Defaults: clock_period_ns 10, core_utilization 50 (percent), pdk sky130A, clock_port clk. Can take up to an hour."
    )]
    pub async fn run_openlane_flow(
        &self,
        Parameters(input): Parameters<OpenlaneArgs>,
        ctx: RequestContext<RoleServer>,
    ) -> Result<String, String> {
        self.serve_call(ToolCall::RunOpenlaneFlow(input), &ctx).await
    }

    /// Read parsed PPA metrics.
    #[tool(
        name = "read_metrics",
        description = "Read area, timing and power figures from the project's reports. `source` is auto (newest report), synthesis, openroad or openlane."
    )]
    pub async fn read_metrics(
        &self,
        Parameters(input): Parameters<ReadMetricsArgs>,
        ctx: RequestContext<RoleServer>,
    ) -> Result<String, String> {
        self.serve_call(ToolCall::ReadMetrics(input), &ctx).await
    }

    /// Get a download URL for a project file.
    #[tool(
        name = "get_file_url",
        description = "Return a download URL for an existing project file (netlists, DEF, GDS, previews). The file server applies the same API key as this server."
    )]
    pub async fn get_file_url(
        &self,
        Parameters(input): Parameters<FileUrlArgs>,
        ctx: RequestContext<RoleServer>,
    ) -> Result<String, String> {
        self.serve_call(ToolCall::GetFileUrl(input), &ctx).await
    }

    /// Render a PNG preview of a layout.
    #[tool(
        name = "render_gds_preview",
        description = "Render a PNG preview of a .gds/.gds2/.oas layout in the project with KLayout. The image is written next to the layout as <stem>_preview.png and a download URL is returned."
    )]
    pub async fn render_gds_preview(
        &self,
        Parameters(input): Parameters<GdsPreviewArgs>,
        ctx: RequestContext<RoleServer>,
    ) -> Result<String, String> {
        self.serve_call(ToolCall::RenderGdsPreview(input), &ctx).await
    }

    /// Cancel a project's active run.
    #[tool(
        name = "cancel_run",
        description = "Cancel the project's active run, if any. The run ends with status `cancelled` and its container is removed."
    )]
    pub async fn cancel_run(
        &self,
        Parameters(input): Parameters<ProjectArgs>,
        ctx: RequestContext<RoleServer>,
    ) -> Result<String, String> {
        self.serve_call(ToolCall::CancelRun(input), &ctx).await
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for EdaServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            instructions: Some(
                "EDA tools in sandboxed containers (Yosys, OpenROAD, OpenLane, KLayout).\n\
                 \n\
                 Typical session:\n\
                 1. initialize_project {\"project_name\": \"adder8\"}\n\
                 2. write_file {\"project_name\": \"adder8\", \"filename\": \"src/adder8.v\", \"content\": \"...\"}\n\
                 3. run_yosys_synthesis {\"project_name\": \"adder8\", \"top_module\": \"adder8\"}\n\
                 4. read_metrics {\"project_name\": \"adder8\"}\n\
                 5. run_openroad_task (floorplan, place, cts, route, timing) or run_openlane_flow\n\
                 6. get_file_url / render_gds_preview for artifacts\n\
                 \n\
                 One run per project at a time: a second run fails with BUSY until the first \
                 finishes or cancel_run stops it. Errors are JSON objects with `code`, \
                 `message`, `retryable` and, for failed runs, a `run` object with the exit \
                 code and an excerpt of the tool output."
                    .to_string(),
            ),
            server_info: Implementation {
                name: "eda-mcp".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            ..Default::default()
        }
    }
}
