//! Streamable HTTP transport for [`EdaServer`].
//!
//! `/mcp` is gated by the admission middleware; `/healthz` (and `/metrics`
//! with the `metrics` feature) are not. Every response carries the CORS
//! headers of the gatekeeper's origin policy.

use std::sync::Arc;

use axum::middleware::from_fn_with_state;
use axum::routing::get;
use axum::{Json, Router};
use eda_security::middleware::{build_cors_layer, require_access};
use eda_security::Gatekeeper;
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use rmcp::transport::streamable_http_server::StreamableHttpService;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::EdaServer;

/// Router serving MCP at `/mcp` plus `/healthz`.
pub fn router(server: EdaServer) -> Router {
    let gatekeeper: Arc<Gatekeeper> = server.dispatcher().gatekeeper().clone();
    let health = server.clone();
    let service = StreamableHttpService::new(
        move || Ok(server.clone()),
        LocalSessionManager::default().into(),
        Default::default(),
    );

    let mcp = Router::new()
        .nest_service("/mcp", service)
        .layer(from_fn_with_state(gatekeeper.clone(), require_access));

    Router::new()
        .merge(mcp)
        .route("/healthz", get(move || healthz(health.clone())))
        .layer(build_cors_layer(gatekeeper.origins()))
        .layer(TraceLayer::new_for_http())
}

async fn healthz(server: EdaServer) -> Json<Value> {
    let locks = server.dispatcher().locks();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "active_runs": locks.active_count(),
    }))
}

/// Add `GET /metrics` in the Prometheus text format.
#[cfg(feature = "metrics")]
pub fn with_metrics(router: Router, registry: Arc<prometheus_client::registry::Registry>) -> Router {
    use axum::http::{header, StatusCode};
    use axum::response::IntoResponse;

    router.route(
        "/metrics",
        get(move || {
            let registry = registry.clone();
            async move {
                let mut body = String::new();
                match prometheus_client::encoding::text::encode(&mut body, &registry) {
                    Ok(()) => (
                        [(
                            header::CONTENT_TYPE,
                            "application/openmetrics-text; version=1.0.0; charset=utf-8",
                        )],
                        body,
                    )
                        .into_response(),
                    Err(e) => {
                        tracing::error!(error = %e, "metrics encoding failed");
                        StatusCode::INTERNAL_SERVER_ERROR.into_response()
                    }
                }
            }
        }),
    )
}
