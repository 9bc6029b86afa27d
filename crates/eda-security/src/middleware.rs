//! axum integration: admission middleware, error responses and CORS layer.
//!
//! ```ignore
//! let app = Router::new()
//!     .route("/...", get(handler))
//!     .layer(axum::middleware::from_fn_with_state(gatekeeper.clone(), require_access))
//!     .layer(build_cors_layer(gatekeeper.origins()));
//! ```
//!
//! On success the derived [`CallerIdentity`] is inserted into the request
//! extensions for handlers (and the MCP service) to pick up.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Query, Request, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use eda_error::EdaError;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::{extract_credential, CallerIdentity, Gatekeeper, Inbound, OriginPolicy};

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Admit or refuse a request through the [`Gatekeeper`].
pub async fn require_access(
    State(gatekeeper): State<Arc<Gatekeeper>>,
    mut request: Request,
    next: Next,
) -> Response {
    let query: Option<Query<HashMap<String, String>>> = Query::try_from_uri(request.uri()).ok();
    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let admission = {
        let headers = request.headers();
        let inbound = Inbound {
            origin: header_str(headers, header::ORIGIN.as_str()),
            credential: extract_credential(
                header_str(headers, API_KEY_HEADER),
                header_str(headers, header::AUTHORIZATION.as_str()),
                query
                    .as_ref()
                    .and_then(|Query(q)| q.get("api_key"))
                    .map(String::as_str),
            ),
            remote,
        };
        gatekeeper.admit(&inbound)
    };

    match admission {
        Ok(identity) => {
            tracing::debug!(identity = %identity, path = %request.uri().path(), "request admitted");
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(err) => error_response(&err),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Render an [`EdaError`] as an HTTP response with a structured JSON body.
pub fn error_response(err: &EdaError) -> Response {
    if let EdaError::Internal(inner) = err {
        tracing::error!(error = ?inner, "internal error");
    }
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, Json(err.to_structured_error(None))).into_response();
    match err {
        EdaError::RateLimited {
            retry_after_secs, ..
        } => {
            let value = HeaderValue::from_str(&retry_after_secs.to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("60"));
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        EdaError::Unauthorized => {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        _ => {}
    }
    response
}

/// The identity inserted by [`require_access`], if the request went through it.
pub fn identity_of(request: &axum::http::request::Parts) -> Option<CallerIdentity> {
    request.extensions.get::<CallerIdentity>().cloned()
}

/// CORS layer mirroring the origin policy; answers preflight requests.
pub fn build_cors_layer(policy: &OriginPolicy) -> CorsLayer {
    let origins = if policy.allows_any() {
        AllowOrigin::any()
    } else {
        let parsed: Vec<HeaderValue> = policy
            .allowed()
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        AllowOrigin::list(parsed)
    };
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            HeaderName::from_static(API_KEY_HEADER),
            HeaderName::from_static("mcp-session-id"),
            HeaderName::from_static("mcp-protocol-version"),
            HeaderName::from_static("last-event-id"),
        ])
        .expose_headers([HeaderName::from_static("mcp-session-id")])
}
