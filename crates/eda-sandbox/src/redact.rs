//! Redaction of error text before it reaches the agent.
//!
//! Error messages lose URLs, addresses, host paths, credentials and stack
//! traces. Tool output is treated more gently: EDA logs are only useful
//! with their container paths intact, so output excerpts only lose
//! credentials and the host location of the workspace.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

// --- Compiled regex patterns (initialized once) ---

static URL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"https?://[^\s'")\]}>]+"#).unwrap());

static IP_PORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}(:\d+)?").unwrap());

static UNIX_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/(home|Users|etc|var|tmp|opt|usr|root|mnt|srv|data|proc|sys|dev|run|boot|snap|nix)(/[\w.\-]+)+").unwrap()
});

static CREDENTIAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(Bearer\s+\S+|x-api-key\s*[:=]\s*\S+|api_key\s*=\s*\S+|token\s*=\s*\S+|password\s*=\s*\S+|secret\s*=\s*\S+)",
    )
    .unwrap()
});

/// PEM-encoded private key blocks.
static PEM_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"-----BEGIN[A-Z\s]+PRIVATE KEY-----[\s\S]*?-----END[A-Z\s]+PRIVATE KEY-----")
        .unwrap()
});

/// Long hex strings (64+ chars) that look like secret keys.
static HEX_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[0-9a-fA-F]{64,}\b").unwrap());

/// Python and Tcl stack frames.
static STACK_TRACE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*(File ".+", line \d+.*|\(procedure ".+" line \d+\)|invoked from within|Caused by:.*)$"#)
        .unwrap()
});

/// Redact an error message for a specific tool call before exposing it to the agent.
///
/// The tool name is kept so the agent can correlate the failure.
pub fn redact_error_for_agent(tool: &str, error: &str) -> String {
    format!("tool '{tool}' failed: {}", redact_error_message(error))
}

/// Redact sensitive patterns from an error message.
///
/// - URLs → `[url]`
/// - IP:port addresses → `[addr]`
/// - Host file paths → `[path]`
/// - Credentials (Bearer tokens, api_key=, PEM blocks, long hex keys) → `[REDACTED]`
/// - Stack trace lines → removed entirely
pub fn redact_error_message(error: &str) -> String {
    let mut msg = redact_credentials(error);
    msg = URL_RE.replace_all(&msg, "[url]").to_string();
    msg = IP_PORT_RE.replace_all(&msg, "[addr]").to_string();
    msg = UNIX_PATH_RE.replace_all(&msg, "[path]").to_string();
    msg = STACK_TRACE_RE.replace_all(&msg, "").to_string();

    // Clean up blank lines left by stack trace removal
    let lines: Vec<&str> = msg.lines().filter(|l| !l.trim().is_empty()).collect();
    lines.join("\n")
}

fn redact_credentials(text: &str) -> String {
    // Most specific patterns first.
    let mut msg = PEM_KEY_RE.replace_all(text, "[REDACTED]").to_string();
    msg = CREDENTIAL_RE.replace_all(&msg, "[REDACTED]").to_string();
    HEX_TOKEN_RE.replace_all(&msg, "[REDACTED]").to_string()
}

/// Redact tool output: credentials, and any of `host_roots` replaced by
/// `<workspace>`.
pub fn redact_output(text: &str, host_roots: &[&Path]) -> String {
    let mut out = redact_credentials(text);
    for root in host_roots {
        let root = root.to_string_lossy();
        if root.len() > 1 {
            out = out.replace(root.as_ref(), "<workspace>");
        }
    }
    out
}

/// Redact sensitive data from a structured error JSON object.
///
/// Applies [`redact_error_for_agent`] to `message`, [`redact_error_message`]
/// to `suggested_fix` and [`redact_output`] to `run.output_excerpt`,
/// preserving every other field.
pub fn redact_structured_error(tool: &str, error: &mut serde_json::Value, host_roots: &[&Path]) {
    if let Some(msg) = error
        .get("message")
        .and_then(|m| m.as_str())
        .map(|s| s.to_string())
    {
        error["message"] = serde_json::Value::String(redact_error_for_agent(tool, &msg));
    }
    if let Some(fix) = error
        .get("suggested_fix")
        .and_then(|f| f.as_str())
        .map(|s| s.to_string())
    {
        error["suggested_fix"] = serde_json::Value::String(redact_error_message(&fix));
    }
    if let Some(excerpt) = error
        .pointer("/run/output_excerpt")
        .and_then(|e| e.as_str())
        .map(|s| s.to_string())
    {
        error["run"]["output_excerpt"] = serde_json::Value::String(redact_output(&excerpt, host_roots));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_error_format() {
        let result = redact_error_for_agent("run_yosys_synthesis", "something failed");
        assert_eq!(result, "tool 'run_yosys_synthesis' failed: something failed");
    }

    #[test]
    fn redacts_urls_and_addresses() {
        let result = redact_error_message("pull failed: https://registry.internal:5000/v2 via 10.0.0.5:3128");
        assert!(result.contains("[url]"), "{result}");
        assert!(!result.contains("registry.internal"), "{result}");
        assert!(!result.contains("10.0.0.5"), "{result}");
    }

    #[test]
    fn redacts_host_paths() {
        let result = redact_error_message("cannot open /srv/eda/workspace/adder8/src/adder.v");
        assert!(result.contains("[path]"), "{result}");
        assert!(!result.contains("/srv/eda"), "{result}");
    }

    #[test]
    fn redacts_credentials() {
        for msg in [
            "auth failed with Bearer abc.def.ghi",
            "rejected api_key=sk-abc123def456",
            "X-API-Key: hunter2",
        ] {
            let result = redact_error_message(msg);
            assert!(result.contains("[REDACTED]"), "{result}");
        }
        let hex = "f".repeat(64);
        assert!(!redact_error_message(&format!("key {hex}")).contains(&hex));
    }

    #[test]
    fn strips_stack_frames() {
        let msg = "Traceback (most recent call last):\n  File \"/opt/klayout/render.py\", line 3, in <module>\nRuntimeError: no layout";
        let result = redact_error_message(msg);
        assert!(!result.contains("render.py"), "{result}");
        assert!(result.contains("RuntimeError: no layout"), "{result}");

        let tcl = "Error: unknown command\n    (procedure \"foo\" line 1)\n    invoked from within\nfinal";
        let result = redact_error_message(tcl);
        assert!(!result.contains("procedure"), "{result}");
        assert!(result.contains("final"));
    }

    #[test]
    fn preserves_actionable_messages() {
        for msg in [
            "invalid argument 'top_module': must be an identifier",
            "project 'adder8' is busy with an active run",
            "error code 0xDEADBEEF at offset 0x1234",
            "the password field is required",
        ] {
            assert_eq!(redact_error_message(msg), msg);
        }
    }

    #[test]
    fn output_keeps_container_paths() {
        let out = "ERROR: /work/src/adder.v:3: syntax error\nread_lef /opt/pdk/sky130A/x.tlef";
        assert_eq!(redact_output(out, &[]), out);
    }

    #[test]
    fn output_hides_workspace_root_and_credentials() {
        let root = Path::new("/data/eda-workspace");
        let out = "writing /data/eda-workspace/adder8/reports/synth.v\ntoken=abc";
        let result = redact_output(out, &[root]);
        assert_eq!(result, "writing <workspace>/adder8/reports/synth.v\n[REDACTED]");
    }

    #[test]
    fn structured_error_fields() {
        let mut err = serde_json::json!({
            "error": true,
            "code": "SANDBOX_FAILED",
            "message": "sandbox run eda-1 failed at https://internal.corp/x",
            "retryable": false,
            "suggested_fix": "see /home/user/notes",
            "run": { "run_id": "eda-1", "output_excerpt": "ERROR in /ws/p/src/a.v" }
        });
        redact_structured_error("run_yosys_synthesis", &mut err, &[Path::new("/ws")]);
        let msg = err["message"].as_str().unwrap();
        assert!(msg.starts_with("tool 'run_yosys_synthesis' failed"));
        assert!(!msg.contains("internal.corp"));
        assert!(!err["suggested_fix"].as_str().unwrap().contains("/home/user"));
        assert_eq!(err["run"]["output_excerpt"], "ERROR in <workspace>/p/src/a.v");
        assert_eq!(err["code"], "SANDBOX_FAILED");
        assert_eq!(err["retryable"], false);
    }
}
