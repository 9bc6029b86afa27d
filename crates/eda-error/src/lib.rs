//! Typed error taxonomy for the EDA MCP server.
//!
//! Provides [`EdaError`], the canonical error returned by the gatekeeper,
//! the workspace store, the dispatcher and the artifact endpoint, plus
//! [`RunDiagnostics`] which carries the context of a failed sandbox run.

use serde::Serialize;
use thiserror::Error;

/// Diagnostic context attached to sandbox-layer errors.
///
/// A failed synthesis run is an ordinary outcome the agent has to react to,
/// so the captured output travels with the error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunDiagnostics {
    /// Identifier of the execution run.
    pub run_id: String,
    /// Exit code of the container, when the process exited on its own.
    pub exit_code: Option<i32>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Error-focused excerpt of the combined stdout/stderr.
    pub output_excerpt: String,
}

/// Canonical error type for EDA server operations.
///
/// The enum is `#[non_exhaustive]` to allow future additions without
/// breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EdaError {
    /// Missing or invalid credential.
    #[error("unauthorized: missing or invalid API key")]
    Unauthorized,

    /// The caller exceeded its request budget for the current window.
    #[error("rate limit exceeded for '{identity}': {limit} requests per window, retry after {retry_after_secs}s")]
    RateLimited {
        /// The identity that was throttled.
        identity: String,
        /// Configured requests per window.
        limit: u32,
        /// Seconds until the oldest request leaves the window.
        retry_after_secs: u64,
    },

    /// A tool argument is missing or malformed.
    #[error("invalid argument '{field}': {reason}")]
    InvalidArgument {
        /// Name of the offending argument.
        field: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The requested tool is not part of the registry.
    #[error("unknown tool: '{name}'")]
    UnknownTool {
        /// The tool name that was requested.
        name: String,
    },

    /// A path resolved outside of its project root.
    #[error("path traversal rejected: '{path}'")]
    PathTraversal {
        /// The rejected relative path, as supplied by the caller.
        path: String,
    },

    /// The project already has an active run.
    #[error("project '{project}' is busy with an active run")]
    Busy {
        /// The project that is busy.
        project: String,
    },

    /// The run exceeded its wall-clock timeout and was terminated.
    #[error("sandbox run {} timed out after {}ms", .0.run_id, .0.duration_ms)]
    SandboxTimeout(Box<RunDiagnostics>),

    /// The run was killed by the isolation layer (memory or process ceiling).
    #[error("sandbox run {} was killed after exceeding a resource limit", .0.run_id)]
    SandboxResourceExceeded(Box<RunDiagnostics>),

    /// The run finished with a non-zero exit or could not be started.
    #[error("sandbox run {} failed{}", .0.run_id, exit_suffix(.0.exit_code))]
    SandboxFailed(Box<RunDiagnostics>),

    /// The run was cancelled before it finished.
    #[error("sandbox run {} was cancelled", .0.run_id)]
    SandboxCancelled(Box<RunDiagnostics>),

    /// A report did not contain a required metric.
    #[error("failed to parse {kind} report: missing field '{field}'")]
    ParseFailure {
        /// The report kind being parsed.
        kind: String,
        /// The expected field that was missing or malformed.
        field: String,
    },

    /// A project, file or artifact does not exist.
    #[error("not found: {what}")]
    NotFound {
        /// Description of what was looked up.
        what: String,
    },

    /// The request is not allowed (origin policy, reserved path, non-regular file).
    #[error("forbidden: {reason}")]
    Forbidden {
        /// Why the request was refused.
        reason: String,
    },

    /// An internal error (catch-all for unexpected failures).
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

fn exit_suffix(code: Option<i32>) -> String {
    match code {
        Some(code) => format!(" with exit code {code}"),
        None => String::new(),
    }
}

impl EdaError {
    /// Shorthand for [`EdaError::InvalidArgument`].
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for [`EdaError::NotFound`].
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Returns a static error code string for programmatic matching.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::UnknownTool { .. } => "UNKNOWN_TOOL",
            Self::PathTraversal { .. } => "PATH_TRAVERSAL",
            Self::Busy { .. } => "BUSY",
            Self::SandboxTimeout(_) => "SANDBOX_TIMEOUT",
            Self::SandboxResourceExceeded(_) => "SANDBOX_RESOURCE_EXCEEDED",
            Self::SandboxFailed(_) => "SANDBOX_FAILED",
            Self::SandboxCancelled(_) => "SANDBOX_CANCELLED",
            Self::ParseFailure { .. } => "PARSE_FAILURE",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Forbidden { .. } => "FORBIDDEN",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Returns whether the same call may succeed if issued again later.
    ///
    /// Nothing is retried automatically; this is advice for the agent.
    pub fn retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Busy { .. } => true,
            Self::SandboxTimeout(_) => true,
            Self::SandboxCancelled(_) => true,
            Self::Unauthorized => false,
            Self::InvalidArgument { .. } => false,
            Self::UnknownTool { .. } => false,
            Self::PathTraversal { .. } => false,
            Self::SandboxResourceExceeded(_) => false,
            Self::SandboxFailed(_) => false,
            Self::ParseFailure { .. } => false,
            Self::NotFound { .. } => false,
            Self::Forbidden { .. } => false,
            Self::Internal(_) => false,
        }
    }

    /// HTTP status used when this error terminates an HTTP request.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Unauthorized => 401,
            Self::RateLimited { .. } => 429,
            Self::InvalidArgument { .. } => 400,
            Self::UnknownTool { .. } => 404,
            Self::PathTraversal { .. } => 403,
            Self::Busy { .. } => 409,
            Self::SandboxTimeout(_) => 504,
            Self::SandboxResourceExceeded(_)
            | Self::SandboxFailed(_)
            | Self::SandboxCancelled(_) => 502,
            Self::ParseFailure { .. } => 422,
            Self::NotFound { .. } => 404,
            Self::Forbidden { .. } => 403,
            Self::Internal(_) => 500,
        }
    }

    /// Diagnostics of the failed run, for sandbox-layer errors.
    pub fn diagnostics(&self) -> Option<&RunDiagnostics> {
        match self {
            Self::SandboxTimeout(d)
            | Self::SandboxResourceExceeded(d)
            | Self::SandboxFailed(d)
            | Self::SandboxCancelled(d) => Some(d),
            _ => None,
        }
    }

    /// Message safe to show to a caller.
    ///
    /// Internal errors collapse to a generic message; their detail belongs
    /// in the server log only.
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }

    /// Convert to a structured JSON error response for LLM consumption.
    ///
    /// Returns a JSON object with `error`, `code`, `message`, `retryable`,
    /// optionally `suggested_fix` (fuzzy-matched against `known_tools` for
    /// [`EdaError::UnknownTool`]) and `run` for sandbox-layer errors.
    pub fn to_structured_error(&self, known_tools: Option<&[&str]>) -> serde_json::Value {
        let suggested_fix = match self {
            Self::UnknownTool { name } => known_tools.and_then(|tools| find_similar_tool(name, tools)),
            Self::RateLimited {
                retry_after_secs, ..
            } => Some(format!("Retry after {retry_after_secs}s")),
            Self::Busy { .. } => {
                Some("Wait for the active run to finish or call cancel_run".to_string())
            }
            Self::NotFound { .. } => {
                Some("Check the name with list_projects or list_project_files".to_string())
            }
            Self::SandboxTimeout(_) => {
                Some("Reduce the design size or raise the tool timeout".to_string())
            }
            Self::SandboxFailed(_) => {
                Some("Inspect output_excerpt, fix the sources and run again".to_string())
            }
            _ => None,
        };

        let mut obj = serde_json::json!({
            "error": true,
            "code": self.code(),
            "message": self.public_message(),
            "retryable": self.retryable(),
        });

        if let Some(fix) = suggested_fix {
            obj["suggested_fix"] = serde_json::Value::String(fix);
        }
        if let Some(diag) = self.diagnostics() {
            obj["run"] = serde_json::to_value(diag).unwrap_or(serde_json::Value::Null);
        }

        obj
    }
}

/// Find the closest matching tool name using Levenshtein distance.
///
/// Returns a suggestion string if a tool within edit distance 3 is found.
fn find_similar_tool(name: &str, known_tools: &[&str]) -> Option<String> {
    let mut best: Option<(usize, &str)> = None;

    for &tool in known_tools {
        let dist = strsim::levenshtein(name, tool);
        if dist <= 3 && best.is_none_or(|(d, _)| dist < d) {
            best = Some((dist, tool));
        }
    }

    best.map(|(_, tool)| format!("Did you mean '{tool}'?"))
}

// Compile-time assertion: EdaError must be Send + Sync + 'static
const _: fn() = || {
    fn assert_bounds<T: Send + Sync + 'static>() {}
    assert_bounds::<EdaError>();
};

#[cfg(test)]
mod tests {
    use super::*;

    fn diag(exit_code: Option<i32>) -> Box<RunDiagnostics> {
        Box::new(RunDiagnostics {
            run_id: "run-1".into(),
            exit_code,
            duration_ms: 1200,
            output_excerpt: "ERROR: syntax error near 'endmodule'".into(),
        })
    }

    #[test]
    fn display_invalid_argument_names_field() {
        let err = EdaError::invalid("top_module", "must be a Verilog identifier");
        assert_eq!(
            err.to_string(),
            "invalid argument 'top_module': must be a Verilog identifier"
        );
    }

    #[test]
    fn display_rate_limited() {
        let err = EdaError::RateLimited {
            identity: "ip:10.0.0.1".into(),
            limit: 60,
            retry_after_secs: 12,
        };
        assert_eq!(
            err.to_string(),
            "rate limit exceeded for 'ip:10.0.0.1': 60 requests per window, retry after 12s"
        );
    }

    #[test]
    fn display_sandbox_failed_includes_exit_code() {
        let err = EdaError::SandboxFailed(diag(Some(1)));
        assert_eq!(err.to_string(), "sandbox run run-1 failed with exit code 1");

        let err = EdaError::SandboxFailed(diag(None));
        assert_eq!(err.to_string(), "sandbox run run-1 failed");
    }

    #[test]
    fn display_timeout() {
        let err = EdaError::SandboxTimeout(diag(None));
        assert_eq!(err.to_string(), "sandbox run run-1 timed out after 1200ms");
    }

    #[test]
    fn code_exhaustive() {
        let cases: Vec<(EdaError, &str)> = vec![
            (EdaError::Unauthorized, "UNAUTHORIZED"),
            (
                EdaError::RateLimited {
                    identity: "x".into(),
                    limit: 1,
                    retry_after_secs: 1,
                },
                "RATE_LIMITED",
            ),
            (EdaError::invalid("f", "r"), "INVALID_ARGUMENT"),
            (EdaError::UnknownTool { name: "t".into() }, "UNKNOWN_TOOL"),
            (EdaError::PathTraversal { path: "..".into() }, "PATH_TRAVERSAL"),
            (EdaError::Busy { project: "p".into() }, "BUSY"),
            (EdaError::SandboxTimeout(diag(None)), "SANDBOX_TIMEOUT"),
            (
                EdaError::SandboxResourceExceeded(diag(Some(137))),
                "SANDBOX_RESOURCE_EXCEEDED",
            ),
            (EdaError::SandboxFailed(diag(Some(1))), "SANDBOX_FAILED"),
            (EdaError::SandboxCancelled(diag(None)), "SANDBOX_CANCELLED"),
            (
                EdaError::ParseFailure {
                    kind: "yosys_stat".into(),
                    field: "area".into(),
                },
                "PARSE_FAILURE",
            ),
            (EdaError::not_found("project 'x'"), "NOT_FOUND"),
            (EdaError::Forbidden { reason: "r".into() }, "FORBIDDEN"),
            (EdaError::Internal(anyhow::anyhow!("x")), "INTERNAL"),
        ];
        for (err, expected_code) in &cases {
            assert_eq!(err.code(), *expected_code, "wrong code for {err}");
        }
    }

    #[test]
    fn retryable_cases() {
        assert!(EdaError::Busy { project: "p".into() }.retryable());
        assert!(EdaError::SandboxTimeout(diag(None)).retryable());
        assert!(!EdaError::SandboxFailed(diag(Some(1))).retryable());
        assert!(!EdaError::PathTraversal { path: "..".into() }.retryable());
        assert!(!EdaError::Internal(anyhow::anyhow!("x")).retryable());
    }

    #[test]
    fn http_status_for_gatekeeper_errors() {
        assert_eq!(EdaError::Unauthorized.http_status(), 401);
        assert_eq!(
            EdaError::PathTraversal { path: "..".into() }.http_status(),
            403
        );
        assert_eq!(EdaError::not_found("file").http_status(), 404);
        assert_eq!(
            EdaError::RateLimited {
                identity: "x".into(),
                limit: 1,
                retry_after_secs: 1
            }
            .http_status(),
            429
        );
    }

    #[test]
    fn structured_error_unknown_tool_with_suggestion() {
        let err = EdaError::UnknownTool {
            name: "run_yosys_synth".into(),
        };
        let tools = ["run_yosys_synthesis", "read_metrics"];
        let json = err.to_structured_error(Some(&tools));
        // "run_yosys_synth" is 4 edits away, beyond the threshold
        assert!(json.get("suggested_fix").is_none());

        let err = EdaError::UnknownTool {
            name: "read_metric".into(),
        };
        let json = err.to_structured_error(Some(&tools));
        assert_eq!(json["code"], "UNKNOWN_TOOL");
        let fix = json["suggested_fix"].as_str().unwrap();
        assert!(fix.contains("read_metrics"), "expected suggestion, got: {fix}");
    }

    #[test]
    fn structured_error_carries_run_diagnostics() {
        let err = EdaError::SandboxFailed(diag(Some(1)));
        let json = err.to_structured_error(None);
        assert_eq!(json["code"], "SANDBOX_FAILED");
        assert_eq!(json["run"]["run_id"], "run-1");
        assert_eq!(json["run"]["exit_code"], 1);
        assert_eq!(json["run"]["duration_ms"], 1200);
        assert!(json["run"]["output_excerpt"]
            .as_str()
            .unwrap()
            .contains("syntax error"));
    }

    #[test]
    fn structured_error_internal_is_generic() {
        let err = EdaError::Internal(anyhow::anyhow!("open /srv/eda/secret.key: denied"));
        let json = err.to_structured_error(None);
        assert_eq!(json["code"], "INTERNAL");
        assert_eq!(json["message"], "internal error");
        assert!(json.get("suggested_fix").is_none());
        assert!(json.get("run").is_none());
    }

    #[test]
    fn internal_is_display_transparent() {
        let err = EdaError::Internal(anyhow::anyhow!("root cause"));
        assert_eq!(err.to_string(), "root cause");
    }

    #[test]
    fn from_anyhow_error() {
        let err: EdaError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, EdaError::Internal(_)));
    }

    #[test]
    fn fuzzy_match_no_match_beyond_threshold() {
        assert!(find_similar_tool("zzzzzz", &["write_file", "get_file_url"]).is_none());
    }
}
