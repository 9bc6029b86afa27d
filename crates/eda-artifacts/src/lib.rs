#![warn(missing_docs)]

//! # eda-artifacts
//!
//! Read-only HTTP endpoint for project files: `GET /{project}/{*path}`.
//!
//! Requests pass the same admission middleware as the MCP endpoint (origin
//! policy, API key, rate limit). Paths are resolved with
//! [`Project::resolve_file`](eda_workspace::Project::resolve_file), the same
//! function `get_file_url` uses, so a URL handed to an agent always names a
//! file this server will return. The file is then opened with
//! [`Project::open_file`](eda_workspace::Project::open_file), which refuses
//! it if a container swapped it for a symlink in between.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Router};
use eda_error::EdaError;
use eda_security::middleware::{build_cors_layer, error_response, require_access};
use eda_security::{CallerIdentity, Gatekeeper};
use eda_workspace::Workspace;
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
struct ArtifactState {
    workspace: Workspace,
    gatekeeper: Arc<Gatekeeper>,
}

/// Router serving project files.
pub fn router(workspace: Workspace, gatekeeper: Arc<Gatekeeper>) -> Router {
    let cors = build_cors_layer(gatekeeper.origins());
    let state = ArtifactState {
        workspace,
        gatekeeper: gatekeeper.clone(),
    };
    Router::new()
        .route("/{project}/{*path}", get(serve_file))
        .with_state(state)
        .layer(from_fn_with_state(gatekeeper, require_access))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn serve_file(
    State(state): State<ArtifactState>,
    Path((project, path)): Path<(String, String)>,
    Extension(identity): Extension<CallerIdentity>,
) -> Response {
    match open_file(&state, &project, &path, &identity).await {
        Ok(response) => response,
        Err(err) => {
            tracing::debug!(project = %project, path = %path, code = err.code(), "artifact request refused");
            error_response(&err)
        }
    }
}

async fn open_file(
    state: &ArtifactState,
    project: &str,
    path: &str,
    identity: &CallerIdentity,
) -> Result<Response, EdaError> {
    let project = state.workspace.project(project)?;
    let file = project.resolve_file(&state.gatekeeper, "path", path, identity)?;
    let handle = tokio::fs::File::from_std(project.open_file(&file)?);

    tracing::info!(
        project = %project.name(),
        path = %file.relative,
        bytes = file.size,
        identity = %identity,
        "artifact served"
    );
    let mut response = Body::from_stream(ReaderStream::new(handle)).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type(&file.relative)));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(file.size));
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    *response.status_mut() = StatusCode::OK;
    Ok(response)
}

/// Content type for a project file, by extension.
///
/// Markup is served as plain text so that nothing a run produced executes
/// in the caller's browser.
pub fn content_type(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "json" => "application/json",
        "csv" => "text/csv; charset=utf-8",
        "v" | "sv" | "vh" | "ys" | "tcl" | "sdc" | "log" | "txt" | "rpt" | "def" | "lef"
        | "lib" | "spef" | "py" | "md" | "html" | "htm" | "svg" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_types() {
        assert_eq!(content_type("reports/synth.v"), "text/plain; charset=utf-8");
        assert_eq!(content_type("layout/adder8_preview.PNG"), "image/png");
        assert_eq!(content_type("runs/r/final/metrics.json"), "application/json");
        assert_eq!(content_type("final.gds"), "application/octet-stream");
        assert_eq!(content_type("index.html"), "text/plain; charset=utf-8");
        assert_eq!(content_type("Makefile"), "application/octet-stream");
    }
}
