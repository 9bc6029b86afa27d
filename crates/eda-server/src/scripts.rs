//! Script generation for the wrapped EDA tools.
//!
//! Scripts are written into the project and executed by the tool inside the
//! container; nothing here is ever handed to a shell. Every value spliced
//! into a script has already passed the registry's allow-lists.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::json;

use crate::registry::{OpenlaneArgs, OpenroadTask, ParamValue};

/// Mount point of the project inside every container.
pub const CONTAINER_WORKDIR: &str = "/work";

/// Project-relative path of the generated Yosys script.
pub const YOSYS_SCRIPT: &str = "scripts/synth.ys";

/// Project-relative path of the synthesized netlist.
pub const NETLIST: &str = "reports/synth.v";

/// Project-relative path of the synthesis statistics.
pub const SYNTH_STATS: &str = "reports/synth_stats.txt";

/// Project-relative path of the OpenLane configuration.
pub const OPENLANE_CONFIG: &str = "config.json";

/// Name of the KLayout render script written next to the layout.
pub const KLAYOUT_SCRIPT: &str = "_render_gds.py";

/// PDK root inside the OpenLane image.
pub const OPENLANE_PDK_ROOT: &str = "/root/.volare";

/// Technology LEF of the sky130 high-density library.
pub const SKY130_TLEF: &str =
    "/opt/pdk/share/pdk/sky130A/libs.ref/sky130_fd_sc_hd/techlef/sky130_fd_sc_hd__nom.tlef";

/// Cell LEF of the sky130 high-density library.
pub const SKY130_LEF: &str = "/opt/pdk/share/pdk/sky130A/libs.ref/sky130_fd_sc_hd/lef/sky130_fd_sc_hd.lef";

/// Typical-corner liberty of the sky130 high-density library.
pub const SKY130_LIB: &str =
    "/opt/pdk/share/pdk/sky130A/libs.ref/sky130_fd_sc_hd/lib/sky130_fd_sc_hd__tt_025C_1v80.lib";

/// Project-relative paths that can be named in a tool script verbatim.
static SCRIPT_SAFE_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_./\-]*$").unwrap());

/// Whether `path` can appear unquoted in a Yosys or Tcl script.
pub fn is_script_safe(path: &str) -> bool {
    SCRIPT_SAFE_PATH_RE.is_match(path) && !path.split('/').any(|seg| seg == "..")
}

/// Yosys synthesis script.
///
/// Without a liberty file the design is mapped to Yosys' internal cell
/// library; with one, flip-flops and combinational logic are mapped to it.
pub fn yosys_script(sources: &[String], top: &str, liberty: Option<&str>) -> String {
    let mut script = format!("# eda-mcp synthesis script\n# top module: {top}\n\n");
    for source in sources {
        if source.ends_with(".sv") {
            script.push_str(&format!("read_verilog -sv {source}\n"));
        } else {
            script.push_str(&format!("read_verilog {source}\n"));
        }
    }
    script.push_str(&format!(
        "\nhierarchy -check -top {top}\n\
         proc; opt; fsm; opt; memory; opt\n\
         synth -top {top}\n"
    ));
    match liberty {
        Some(lib) => script.push_str(&format!(
            "dfflibmap -liberty {lib}\n\
             abc -liberty {lib}\n\
             opt_clean -purge\n\
             tee -o {SYNTH_STATS} stat -liberty {lib}\n"
        )),
        None => script.push_str(&format!(
            "opt_clean -purge\n\
             tee -o {SYNTH_STATS} stat\n"
        )),
    }
    script.push_str(&format!("write_verilog -noattr {NETLIST}\n"));
    script
}

/// Argv that runs the Yosys script (working directory is the project).
pub fn yosys_command() -> Vec<String> {
    vec!["yosys".into(), "-s".into(), YOSYS_SCRIPT.into()]
}

/// Project-relative path of an OpenROAD task script.
pub fn openroad_script_path(task: OpenroadTask) -> String {
    format!("scripts/openroad_{}.tcl", task.as_str())
}

/// Project-relative path of an OpenROAD task log.
pub fn openroad_log_path(task: OpenroadTask) -> String {
    format!("reports/openroad_{}.log", task.as_str())
}

/// OpenROAD script for `task`.
///
/// `params` become `set` statements ahead of the body; built-in bodies
/// fall back to defaults for variables that were not set.
pub fn openroad_script(
    task: OpenroadTask,
    top: &str,
    params: &BTreeMap<String, ParamValue>,
    liberty: Option<&str>,
    tcl_body: Option<&str>,
) -> String {
    let reports = format!("{CONTAINER_WORKDIR}/reports");
    let mut script = format!("# eda-mcp OpenROAD script, task: {}\n", task.as_str());
    for (key, value) in params {
        script.push_str(&format!("set {key} {}\n", value.render()));
    }
    script.push_str(&format!(
        "\nread_lef {SKY130_TLEF}\n\
         read_lef {SKY130_LEF}\n\
         read_verilog {reports}/synth.v\n\
         link_design {top}\n\n"
    ));

    let body = match task {
        OpenroadTask::Floorplan => format!(
            "initialize_floorplan \\\n    \
             -utilization [expr {{[info exists utilization] ? $utilization : 50}}] \\\n    \
             -aspect_ratio [expr {{[info exists aspect_ratio] ? $aspect_ratio : 1.0}}] \\\n    \
             -core_space [expr {{[info exists core_margin] ? $core_margin : 2}}] \\\n    \
             -site [expr {{[info exists site] ? $site : \"unithd\"}}]\n\n\
             report_design_area\n\
             write_def {reports}/floorplan.def\n"
        ),
        OpenroadTask::Place => format!(
            "read_def {reports}/floorplan.def\n\n\
             global_placement -density [expr {{[info exists density] ? $density : 0.6}}]\n\
             detailed_placement\n\
             check_placement\n\n\
             report_design_area\n\
             write_def {reports}/placed.def\n"
        ),
        OpenroadTask::Cts => format!(
            "read_def {reports}/placed.def\n\n\
             clock_tree_synthesis \\\n    \
             -buf_list [expr {{[info exists cts_buf_list] ? $cts_buf_list : \"sky130_fd_sc_hd__clkbuf_4\"}}] \\\n    \
             -root_buf [expr {{[info exists cts_root_buf] ? $cts_root_buf : \"sky130_fd_sc_hd__clkbuf_16\"}}]\n\n\
             report_cts\n\
             write_def {reports}/cts.def\n"
        ),
        OpenroadTask::Route => format!(
            "read_def {reports}/cts.def\n\n\
             global_route -verbose\n\
             detailed_route\n\n\
             check_antennas\n\
             report_design_area\n\
             write_def {reports}/routed.def\n"
        ),
        OpenroadTask::Timing => format!(
            "read_def {reports}/routed.def\n\
             read_liberty {}\n\n\
             create_clock -name clk \\\n    \
             -period [expr {{[info exists clock_period] ? $clock_period : 10.0}}] \\\n    \
             [get_ports [expr {{[info exists clock_port] ? $clock_port : \"clk\"}}]]\n\n\
             report_checks -path_delay min_max -format full_clock_expanded\n\
             report_wns\n\
             report_tns\n\
             report_worst_slack -max\n\
             report_worst_slack -min\n",
            liberty.unwrap_or(SKY130_LIB)
        ),
        OpenroadTask::Custom => {
            let mut body = tcl_body.unwrap_or_default().to_string();
            if !body.ends_with('\n') {
                body.push('\n');
            }
            body
        }
    };
    script.push_str(&body);
    script
}

/// Argv that runs an OpenROAD task script, logging to its report file.
pub fn openroad_command(task: OpenroadTask) -> Vec<String> {
    vec![
        "openroad".into(),
        "-no_init".into(),
        "-exit".into(),
        "-log".into(),
        format!("{CONTAINER_WORKDIR}/{}", openroad_log_path(task)),
        format!("{CONTAINER_WORKDIR}/{}", openroad_script_path(task)),
    ]
}

/// OpenLane `config.json` for a flow run.
pub fn openlane_config(args: &OpenlaneArgs) -> serde_json::Value {
    json!({
        "DESIGN_NAME": args.top_module,
        "VERILOG_FILES": "dir::src/*.v",
        "CLOCK_PORT": args.clock_port.as_deref().unwrap_or("clk"),
        "CLOCK_PERIOD": args.clock_period_ns.unwrap_or(10.0),
        "FP_CORE_UTIL": args.core_utilization.unwrap_or(50.0),
        "PDK": args.pdk.unwrap_or_default().as_str(),
        "FP_PDN_AUTO_ADJUST": 0,
        "FP_PDN_VPITCH": 50,
        "FP_PDN_HPITCH": 50,
        "FP_PDN_VOFFSET": 5,
        "FP_PDN_HOFFSET": 5,
        "FP_SIZING": "absolute",
        "DIE_AREA": "0 0 200 200",
    })
}

/// Argv that runs the OpenLane flow into `runs/<tag>`.
pub fn openlane_command(tag: &str) -> Vec<String> {
    vec![
        "flow.tcl".into(),
        "-design".into(),
        CONTAINER_WORKDIR.into(),
        "-tag".into(),
        tag.into(),
        "-overwrite".into(),
    ]
}

/// File name of the preview rendered for layout `stem`.
pub fn preview_name(stem: &str) -> String {
    format!("{stem}_preview.png")
}

/// Python string literal for `value`.
///
/// A JSON string is also a valid Python 3 literal: quotes, backslashes and
/// control characters come out escaped.
fn python_str(value: &str) -> String {
    serde_json::Value::from(value).to_string()
}

/// KLayout batch script rendering `layout` (a file name in the working
/// directory) to `png`.
pub fn klayout_script(layout: &str, png: &str) -> String {
    let layout = python_str(layout);
    let png = python_str(png);
    format!(
        "import klayout.db as db\n\
         import klayout.lay as lay\n\
         \n\
         layout = db.Layout()\n\
         layout.read({layout})\n\
         \n\
         view = lay.LayoutView()\n\
         view.load_layout(layout, 0, True)\n\
         view.max_hier()\n\
         view.zoom_fit()\n\
         view.save_image({png}, 1200, 900)\n\
         print(\"OK: rendered \" + {png})\n"
    )
}

/// Argv that runs the KLayout render script.
pub fn klayout_command() -> Vec<String> {
    vec!["klayout".into(), "-b".into(), "-r".into(), KLAYOUT_SCRIPT.into()]
}
