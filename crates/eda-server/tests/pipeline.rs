//! End-to-end dispatcher tests against a fake container runtime.
//!
//! The fake runtime is a shell script standing in for `docker`. It changes
//! into the first mounted host directory and imitates each wrapped tool by
//! writing the files the real tool would produce:
//! - `yosys`: netlist and stat report for the `adder8` design; a source
//!   containing `hang_forever` scribbles look-alike server state into the
//!   project and then hangs, one containing `exhaust_memory` dies of SIGKILL
//! - `openroad`: a log with a design area line
//! - `flow.tcl`: an OpenLane run directory with metrics and a GDS (slowly)
//! - `klayout`: the preview PNG named in the render script
//!
//! Tests are serialized: writing and executing scripts from parallel test
//! threads can fail with ETXTBSY.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use eda_config::{ToolOverrides, ToolsSection};
use eda_error::EdaError;
use eda_sandbox::{RunLedger, RunStatus, SandboxConfig, SandboxExecutor};
use eda_security::{CallerIdentity, Gatekeeper, GatekeeperSettings};
use eda_server::Dispatcher;
use eda_workspace::Workspace;
use serde_json::{json, Value};
use serial_test::serial;

const FAKE_RUNTIME: &str = r#"#!/bin/sh
cmd="$1"; shift
case "$cmd" in
  rm|kill) exit 0 ;;
  run) ;;
  *) echo "unsupported: $cmd" >&2; exit 125 ;;
esac
host=""
while [ $# -gt 0 ]; do
  case "$1" in
    --volume=*) spec="${1#--volume=}"; h="${spec%%:*}"; [ -z "$host" ] && host="$h" ;;
    --*) ;;
    *) break ;;
  esac
  shift
done
shift
[ -n "$host" ] && cd "$host"
case "$1" in
  yosys)
    grep -q "hierarchy -check -top" scripts/synth.ys || { echo "ERROR: bad script" >&2; exit 1; }
    if grep -q "hang_forever" src/*.v 2>/dev/null; then
      mkdir -p .eda/runs
      echo '{"name":"adder8","top_module":"x; exec sh"}' > .eda/project.json
      echo '{"run_id":"eda-forged","status":"completed"}' > .eda/runs/eda-forged.json
      for f in $(find . -name '*.json'); do echo '{}' > "$f"; done
      echo "synthesizing..."
      exec sleep 30
    fi
    if grep -q "exhaust_memory" src/*.v 2>/dev/null; then
      echo "ERROR: out of memory" >&2
      kill -9 $$
    fi
    if grep -q "syntax_error" src/*.v 2>/dev/null; then
      echo "ERROR: syntax error, unexpected TOK_ID" >&2
      exit 1
    fi
    mkdir -p reports
    echo "module adder8(a, b, sum); endmodule" > reports/synth.v
    printf '=== adder8 ===\n\n   Number of cells:                 24\n\n   Chip area for module %s: 183.926400\n' "'\\adder8'" > reports/synth_stats.txt
    echo "End of script."
    exit 0 ;;
  openroad)
    log="${5#/work/}"
    mkdir -p reports
    echo "Design area 410 u^2 38% utilization." > "$log"
    echo "openroad done"
    exit 0 ;;
  flow.tcl)
    tag="$5"
    sleep 1
    mkdir -p "runs/$tag/reports" "runs/$tag/results/final/gds"
    printf 'design,CoreArea_um^2,wns,tns,TotalCells\nadder8,2304.5,0.0,0.0,31\n' > "runs/$tag/reports/metrics.csv"
    echo "GDSII" > "runs/$tag/results/final/gds/adder8.gds"
    echo "[SUCCESS]: Flow complete."
    exit 0 ;;
  klayout)
    png=$(grep -o '"[^"]*_preview.png"' _render_gds.py | head -1 | tr -d '"')
    echo "PNG" > "$png"
    echo "OK: rendered $png"
    exit 0 ;;
esac
exec "$@"
"#;

const ADDER8: &str = "module adder8(input [7:0] a, input [7:0] b, output [8:0] sum);\n  assign sum = a + b;\nendmodule\n";

struct Fixture {
    _dir: tempfile::TempDir,
    workspace_root: PathBuf,
    dispatcher: Arc<Dispatcher>,
}

impl Fixture {
    fn new() -> Self {
        Self::with_tools(ToolsSection::default())
    }

    fn with_tools(tools: ToolsSection) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let runtime = dir.path().join("fake-runtime");
        std::fs::write(&runtime, FAKE_RUNTIME).unwrap();
        std::fs::set_permissions(&runtime, std::fs::Permissions::from_mode(0o755)).unwrap();
        let workspace_root = dir.path().join("workspace");
        std::fs::create_dir_all(&workspace_root).unwrap();

        let executor = SandboxExecutor::new(SandboxConfig {
            runtime: runtime.display().to_string(),
            ..Default::default()
        });
        let dispatcher = Dispatcher::new(
            Workspace::new(&workspace_root).unwrap(),
            Arc::new(Gatekeeper::new(GatekeeperSettings::default())),
            Arc::new(executor),
            tools,
            "https://eda.example.com/files",
        );
        Self {
            _dir: dir,
            workspace_root,
            dispatcher: Arc::new(dispatcher),
        }
    }

    async fn call(&self, tool: &str, args: Value) -> Result<Value, EdaError> {
        self.dispatcher
            .dispatch_named(tool, args, &CallerIdentity::Stdio)
            .await
    }

    fn project_dir(&self, name: &str) -> PathBuf {
        self.workspace_root.join(name)
    }

    fn ledger_runs(&self, name: &str) -> Vec<eda_sandbox::ExecutionRun> {
        let project = Workspace::new(&self.workspace_root)
            .unwrap()
            .project(name)
            .unwrap();
        RunLedger::new(project.runs_dir()).list().unwrap()
    }

    async fn synthesize(&self) -> Result<Value, EdaError> {
        self.call(
            "run_yosys_synthesis",
            json!({"project_name": "adder8", "top_module": "adder8"}),
        )
        .await
    }

    async fn add_source(&self, filename: &str, content: &str) {
        self.call(
            "write_file",
            json!({"project_name": "adder8", "filename": filename, "content": content}),
        )
        .await
        .unwrap();
    }

    async fn adder8(&self) {
        self.call("initialize_project", json!({"project_name": "adder8"}))
            .await
            .unwrap();
        self.call(
            "write_file",
            json!({"project_name": "adder8", "filename": "src/adder8.v", "content": ADDER8}),
        )
        .await
        .unwrap();
    }
}

fn yosys_timeout(secs: u64) -> ToolsSection {
    ToolsSection {
        yosys: ToolOverrides {
            timeout_secs: Some(secs),
            ..Default::default()
        },
        ..Default::default()
    }
}

#[tokio::test]
#[serial]
async fn adder8_synthesis_and_metrics() {
    let fx = Fixture::new();
    fx.adder8().await;

    let synth = fx
        .call(
            "run_yosys_synthesis",
            json!({"project_name": "adder8", "top_module": "adder8"}),
        )
        .await
        .unwrap();
    assert_eq!(synth["status"], "completed");
    assert_eq!(synth["exit_code"], 0);
    assert_eq!(synth["netlist"], "reports/synth.v");
    assert_eq!(synth["metrics"]["area_um2"], 183.9264);
    assert_eq!(synth["metrics"]["cell_count"], 24.0);
    assert!(synth["stdout_tail"].as_str().unwrap().contains("End of script."));
    let files: Vec<&str> = synth["files"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["path"].as_str().unwrap())
        .collect();
    assert!(files.contains(&"reports/synth.v"));
    assert!(files.contains(&"reports/synth_stats.txt"));

    let script = std::fs::read_to_string(fx.project_dir("adder8").join("scripts/synth.ys")).unwrap();
    assert!(script.contains("read_verilog src/adder8.v"));

    let metrics = fx
        .call("read_metrics", json!({"project_name": "adder8"}))
        .await
        .unwrap();
    assert_eq!(metrics["kind"], "yosys_stat");
    assert!(metrics["metrics"]["area_um2"].as_f64().unwrap() > 0.0);

    let runs = fx.ledger_runs("adder8");
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Completed);
}

#[tokio::test]
#[serial]
async fn openroad_uses_the_synthesized_top_module() {
    let fx = Fixture::new();
    fx.adder8().await;
    fx.call(
        "run_yosys_synthesis",
        json!({"project_name": "adder8", "top_module": "adder8"}),
    )
    .await
    .unwrap();

    let result = fx
        .call(
            "run_openroad_task",
            json!({"project_name": "adder8", "task": "floorplan", "params": {"utilization": 40}}),
        )
        .await
        .unwrap();
    assert_eq!(result["task"], "floorplan");
    assert_eq!(result["log"], "reports/openroad_floorplan.log");
    assert_eq!(result["metrics"]["area_um2"], 410.0);

    let script = std::fs::read_to_string(
        fx.project_dir("adder8").join("scripts/openroad_floorplan.tcl"),
    )
    .unwrap();
    assert!(script.contains("set utilization 40"));
    assert!(script.contains("link_design adder8"));
}

#[tokio::test]
#[serial]
async fn failed_synthesis_carries_diagnostics() {
    let fx = Fixture::new();
    fx.adder8().await;
    fx.call(
        "write_file",
        json!({"project_name": "adder8", "filename": "src/broken.v", "content": "syntax_error here"}),
    )
    .await
    .unwrap();

    let err = fx
        .call(
            "run_yosys_synthesis",
            json!({"project_name": "adder8", "top_module": "adder8"}),
        )
        .await
        .unwrap_err();
    let diag = err.diagnostics().expect("sandbox error carries diagnostics");
    assert!(matches!(err, EdaError::SandboxFailed(_)));
    assert_eq!(diag.exit_code, Some(1));
    assert!(diag.output_excerpt.contains("syntax error"));
    assert!(!diag.output_excerpt.contains(&fx.workspace_root.display().to_string()));
    assert!(!fx.project_dir("adder8").join("reports/synth.v").exists());
    assert!(!fx.dispatcher.locks().is_busy("adder8"));
}

#[tokio::test]
#[serial]
async fn concurrent_openlane_runs_are_busy() {
    let fx = Fixture::new();
    fx.adder8().await;

    let args = json!({"project_name": "adder8", "top_module": "adder8", "clock_period_ns": 12.5});
    let first = {
        let dispatcher = fx.dispatcher.clone();
        let args = args.clone();
        tokio::spawn(async move {
            dispatcher
                .dispatch_named("run_openlane_flow", args, &CallerIdentity::Stdio)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;

    let second = fx.call("run_openlane_flow", args.clone()).await.unwrap_err();
    assert!(matches!(second, EdaError::Busy { ref project } if project == "adder8"));
    assert!(second.retryable());

    let listing = fx
        .call("list_project_files", json!({"project_name": "adder8"}))
        .await
        .unwrap_err();
    assert!(matches!(listing, EdaError::Busy { .. }));

    let result = first.await.unwrap().unwrap();
    assert_eq!(result["status"], "completed");
    let tag = result["run_tag"].as_str().unwrap();
    assert!(tag.starts_with("run_"));
    assert_eq!(result["metrics"]["area_um2"], 2304.5);
    assert_eq!(
        result["gds"],
        format!("runs/{tag}/results/final/gds/adder8.gds")
    );

    let config: Value = serde_json::from_slice(
        &std::fs::read(fx.project_dir("adder8").join("config.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(config["DESIGN_NAME"], "adder8");
    assert_eq!(config["CLOCK_PERIOD"], 12.5);

    // Accepted again once the first run is done.
    assert!(fx
        .call("list_project_files", json!({"project_name": "adder8"}))
        .await
        .is_ok());
}

#[tokio::test]
#[serial]
async fn cancel_run_stops_an_openlane_flow() {
    let fx = Fixture::new();
    fx.adder8().await;

    let run = {
        let dispatcher = fx.dispatcher.clone();
        tokio::spawn(async move {
            dispatcher
                .dispatch_named(
                    "run_openlane_flow",
                    json!({"project_name": "adder8", "top_module": "adder8"}),
                    &CallerIdentity::Stdio,
                )
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;

    let cancelled = fx
        .call("cancel_run", json!({"project_name": "adder8"}))
        .await
        .unwrap();
    assert_eq!(cancelled["cancelled"], true);

    let err = run.await.unwrap().unwrap_err();
    assert!(matches!(err, EdaError::SandboxCancelled(_)));
    assert!(!fx.dispatcher.locks().is_busy("adder8"));
}

#[tokio::test]
#[serial]
async fn gds_preview_is_rendered_next_to_the_layout() {
    let fx = Fixture::with_tools(ToolsSection {
        klayout: ToolOverrides {
            image: Some("klayout:test".into()),
            ..Default::default()
        },
        ..Default::default()
    });
    fx.adder8().await;
    fx.call(
        "write_file",
        json!({"project_name": "adder8", "filename": "layout/adder8.gds", "content": "GDSII"}),
    )
    .await
    .unwrap();

    let result = fx
        .call(
            "render_gds_preview",
            json!({"project_name": "adder8", "gds_path": "layout/adder8.gds"}),
        )
        .await
        .unwrap();
    assert_eq!(result["preview"], "layout/adder8_preview.png");
    assert_eq!(
        result["url"],
        "https://eda.example.com/files/adder8/layout/adder8_preview.png"
    );
    assert!(fx
        .project_dir("adder8")
        .join("layout/adder8_preview.png")
        .is_file());
    let runs = fx.ledger_runs("adder8");
    assert_eq!(runs[0].image, "klayout:test");
}

#[tokio::test]
#[serial]
async fn traversal_is_rejected() {
    let fx = Fixture::new();
    fx.adder8().await;

    let err = fx
        .call(
            "get_file_url",
            json!({"project_name": "adder8", "file_path": "../../etc/passwd"}),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EdaError::PathTraversal { .. }));

    let err = fx
        .call(
            "write_file",
            json!({"project_name": "adder8", "filename": "/etc/cron.d/x", "content": ""}),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EdaError::PathTraversal { .. }));

    let err = fx
        .call(
            "get_file_url",
            json!({"project_name": "adder8", "file_path": "./."}),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EdaError::InvalidArgument { ref field, .. } if field == "file_path"));
}

#[tokio::test]
#[serial]
async fn write_list_and_url_round_trip() {
    let fx = Fixture::new();
    fx.adder8().await;

    let listing = fx
        .call("list_project_files", json!({"project_name": "adder8"}))
        .await
        .unwrap();
    let entry = listing["files"]
        .as_array()
        .unwrap()
        .iter()
        .find(|f| f["path"] == "src/adder8.v")
        .cloned()
        .unwrap();
    assert_eq!(entry["size"], ADDER8.len() as u64);

    let url = fx
        .call(
            "get_file_url",
            json!({"project_name": "adder8", "file_path": "src/adder8.v"}),
        )
        .await
        .unwrap();
    assert_eq!(url["url"], "https://eda.example.com/files/adder8/src/adder8.v");
    assert_eq!(url["size"], ADDER8.len() as u64);

    let projects = fx.call("list_projects", Value::Null).await.unwrap();
    assert_eq!(projects["projects"][0]["name"], "adder8");
    assert_eq!(projects["projects"][0]["busy"], false);
}

#[tokio::test]
#[serial]
async fn unknown_tool_gets_a_suggestion() {
    let fx = Fixture::new();
    let err = fx
        .call("run_yosys_synthesys", json!({"project_name": "adder8"}))
        .await
        .unwrap_err();
    assert!(matches!(err, EdaError::UnknownTool { .. }));
    let names = eda_server::ToolName::names();
    let structured = err.to_structured_error(Some(&names));
    assert!(structured["suggested_fix"]
        .as_str()
        .unwrap()
        .contains("run_yosys_synthesis"));
}

#[tokio::test]
#[serial]
async fn shutdown_refuses_new_runs() {
    let fx = Fixture::new();
    fx.adder8().await;
    assert_eq!(fx.dispatcher.shutdown(), 0);

    let err = fx
        .call(
            "run_yosys_synthesis",
            json!({"project_name": "adder8", "top_module": "adder8"}),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INTERNAL");
    assert!(!fx.dispatcher.locks().is_busy("adder8"));
}

#[tokio::test]
#[serial]
async fn timed_out_synthesis_reports_sandbox_timeout() {
    let fx = Fixture::with_tools(yosys_timeout(1));
    fx.adder8().await;
    fx.add_source("src/hang.v", "// hang_forever\n").await;

    let started = Instant::now();
    let err = fx.synthesize().await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, EdaError::SandboxTimeout(_)), "got {err}");
    assert_eq!(err.code(), "SANDBOX_TIMEOUT");
    let diag = err.diagnostics().unwrap();
    assert_eq!(diag.exit_code, None);
    assert!(diag.output_excerpt.contains("timed out after 1s"));
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_secs(3), "took {elapsed:?}");
    assert!(!fx.dispatcher.locks().is_busy("adder8"));
    assert_eq!(fx.ledger_runs("adder8")[0].status, RunStatus::TimedOut);
}

#[tokio::test]
#[serial]
async fn killed_synthesis_reports_resource_exhaustion() {
    let fx = Fixture::new();
    fx.adder8().await;
    fx.add_source("src/big.v", "// exhaust_memory\n").await;

    let err = fx.synthesize().await.unwrap_err();
    assert!(matches!(err, EdaError::SandboxResourceExceeded(_)), "got {err}");
    let diag = err.diagnostics().unwrap();
    assert_eq!(diag.exit_code, Some(137));
    assert!(diag.output_excerpt.contains("out of memory"));
    assert!(diag.output_excerpt.contains("exit 137"));
    assert!(!fx.dispatcher.locks().is_busy("adder8"));
    assert_eq!(fx.ledger_runs("adder8")[0].status, RunStatus::Killed);
}

#[tokio::test]
#[serial]
async fn container_writes_cannot_reach_server_state() {
    let fx = Fixture::with_tools(yosys_timeout(1));
    fx.adder8().await;
    fx.synthesize().await.unwrap();

    fx.add_source("src/hang.v", "// hang_forever\n").await;
    let err = fx.synthesize().await.unwrap_err();
    assert!(matches!(err, EdaError::SandboxTimeout(_)));

    // The run scribbled over every JSON file it could see.
    let forged = fx.project_dir("adder8").join(".eda/runs/eda-forged.json");
    assert_eq!(std::fs::read_to_string(forged).unwrap().trim(), "{}");

    let runs = fx.ledger_runs("adder8");
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].status, RunStatus::TimedOut);
    assert_eq!(runs[1].status, RunStatus::Completed);
    assert!(runs.iter().all(|r| r.run_id != "eda-forged"));

    let meta = Workspace::new(&fx.workspace_root)
        .unwrap()
        .project("adder8")
        .unwrap()
        .meta()
        .unwrap();
    assert_eq!(meta.top_module.as_deref(), Some("adder8"));
}
