#![warn(missing_docs)]

//! # eda-security
//!
//! The security gatekeeper for the EDA MCP server.
//!
//! Every inbound call passes through [`Gatekeeper`] before any side effect:
//!
//! - **Origin policy**: browser requests from origins outside the allow-list
//!   are refused before dispatch
//! - **Authentication**: API keys are compared via SHA-256 digests and
//!   constant-time equality
//! - **Rate limiting**: per-identity sliding window with atomic check-and-record
//! - **Path confinement**: caller paths are checked lexically before any
//!   filesystem access, then resolved against the canonical project root
//!
//! Public-access mode (no API key) only skips the credential check; rate
//! limiting, origin policy and path confinement stay active.

pub mod auth;
pub mod middleware;
pub mod names;
pub mod origin;
pub mod paths;
pub mod rate_limit;

use std::fmt;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use eda_audit::{AuditEvent, AuditEventKind};
use eda_error::EdaError;

pub use auth::Authenticator;
pub use origin::OriginPolicy;
pub use paths::{lexical_check, ValidatedPath};
pub use rate_limit::RateLimiter;

/// Who is calling. Used as the rate-limit key and in audit records.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CallerIdentity {
    /// Holder of the configured API key (labelled by a digest prefix).
    ApiKey(String),
    /// Unauthenticated caller identified by its network address.
    Remote(IpAddr),
    /// The local stdio transport.
    Stdio,
    /// Network caller whose address is unknown.
    Anonymous,
}

impl fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiKey(label) => write!(f, "key:{label}"),
            Self::Remote(ip) => write!(f, "ip:{ip}"),
            Self::Stdio => f.write_str("stdio"),
            Self::Anonymous => f.write_str("anonymous"),
        }
    }
}

/// Settings for [`Gatekeeper::new`].
#[derive(Debug, Clone)]
pub struct GatekeeperSettings {
    /// Shared API key; `None` enables public access.
    pub api_key: Option<String>,
    /// Requests per identity per window.
    pub rate_limit: u32,
    /// Sliding window length.
    pub window: Duration,
    /// Allowed browser origins (`*` for any).
    pub allowed_origins: Vec<String>,
}

impl Default for GatekeeperSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            rate_limit: 60,
            window: Duration::from_secs(60),
            allowed_origins: vec!["*".into()],
        }
    }
}

/// What an inbound network request presents to the gatekeeper.
#[derive(Debug, Clone, Default)]
pub struct Inbound<'a> {
    /// The `Origin` header, if any.
    pub origin: Option<&'a str>,
    /// The extracted credential, if any.
    pub credential: Option<&'a str>,
    /// The peer address, if known.
    pub remote: Option<IpAddr>,
}

/// Process-wide access control state.
///
/// Constructed once at start-up and shared behind an `Arc`; the only way to
/// reach the rate-limit windows is through this type.
pub struct Gatekeeper {
    auth: Authenticator,
    limiter: RateLimiter,
    origins: OriginPolicy,
}

impl Gatekeeper {
    /// Build a gatekeeper from settings.
    pub fn new(settings: GatekeeperSettings) -> Self {
        if settings.api_key.is_none() {
            tracing::warn!("no API key configured: public access mode, rate limiting and path checks remain active");
        }
        Self {
            auth: Authenticator::new(settings.api_key.as_deref()),
            limiter: RateLimiter::new(settings.rate_limit.max(1) as usize, settings.window),
            origins: OriginPolicy::new(&settings.allowed_origins),
        }
    }

    /// The origin policy, for building CORS layers.
    pub fn origins(&self) -> &OriginPolicy {
        &self.origins
    }

    /// Whether an API key is required.
    pub fn auth_enabled(&self) -> bool {
        self.auth.enabled()
    }

    /// Refuse browser requests from origins outside the allow-list.
    ///
    /// Requests without an `Origin` header are not browser-originated and pass.
    pub fn check_origin(&self, origin: Option<&str>, identity_hint: &str) -> Result<(), EdaError> {
        match origin {
            Some(origin) if !self.origins.allows(origin) => {
                AuditEvent::new(
                    AuditEventKind::OriginRejected,
                    identity_hint,
                    format!("origin '{origin}' is not in the allow-list"),
                )
                .emit();
                Err(EdaError::Forbidden {
                    reason: format!("origin '{origin}' is not allowed"),
                })
            }
            _ => Ok(()),
        }
    }

    /// Verify a credential and derive the caller identity.
    pub fn authenticate(
        &self,
        credential: Option<&str>,
        remote: Option<IpAddr>,
    ) -> Result<CallerIdentity, EdaError> {
        let network_identity = match remote {
            Some(ip) => CallerIdentity::Remote(ip),
            None => CallerIdentity::Anonymous,
        };
        if !self.auth.verify(credential) {
            AuditEvent::new(
                AuditEventKind::AuthFailure,
                network_identity.to_string(),
                if credential.is_some() {
                    "invalid API key"
                } else {
                    "missing API key"
                },
            )
            .emit();
            return Err(EdaError::Unauthorized);
        }
        Ok(match self.auth.key_label() {
            Some(label) => CallerIdentity::ApiKey(label),
            None => network_identity,
        })
    }

    /// Record one request for `identity`, refusing it once the window is full.
    pub fn check_rate_limit(&self, identity: &CallerIdentity) -> Result<(), EdaError> {
        let key = identity.to_string();
        self.limiter.check(&key).map_err(|retry_after_secs| {
            AuditEvent::new(
                AuditEventKind::RateLimited,
                key.clone(),
                format!("rate limit of {} requests exceeded", self.limiter.limit()),
            )
            .emit();
            EdaError::RateLimited {
                identity: key,
                limit: self.limiter.limit() as u32,
                retry_after_secs,
            }
        })
    }

    /// Full admission for a network request: origin, credential, rate limit.
    ///
    /// A failed credential also counts against the peer address so that key
    /// guessing is throttled like any other traffic.
    pub fn admit(&self, inbound: &Inbound<'_>) -> Result<CallerIdentity, EdaError> {
        let hint = inbound
            .remote
            .map(|ip| CallerIdentity::Remote(ip).to_string())
            .unwrap_or_else(|| CallerIdentity::Anonymous.to_string());
        self.check_origin(inbound.origin, &hint)?;
        let identity = match self.authenticate(inbound.credential, inbound.remote) {
            Ok(identity) => identity,
            Err(err) => {
                let peer = match inbound.remote {
                    Some(ip) => CallerIdentity::Remote(ip),
                    None => CallerIdentity::Anonymous,
                };
                self.check_rate_limit(&peer)?;
                return Err(err);
            }
        };
        self.check_rate_limit(&identity)?;
        Ok(identity)
    }

    /// Admission for one call on the stdio transport.
    pub fn admit_stdio(&self) -> Result<CallerIdentity, EdaError> {
        let identity = CallerIdentity::Stdio;
        self.check_rate_limit(&identity)?;
        Ok(identity)
    }

    /// Confine `relative` to `root`, auditing rejected attempts.
    ///
    /// `field` is the tool argument the path came from.
    pub fn validate_path(
        &self,
        root: &Path,
        field: &str,
        relative: &str,
        identity: &CallerIdentity,
    ) -> Result<ValidatedPath, EdaError> {
        paths::validate_path(root, field, relative).inspect_err(|err| {
            if let EdaError::PathTraversal { path } = err {
                AuditEvent::new(
                    AuditEventKind::PathTraversal,
                    identity.to_string(),
                    format!("rejected path '{path}'"),
                )
                .emit();
            }
        })
    }

    /// Drop idle rate-limit windows.
    pub fn sweep(&self) {
        self.limiter.cleanup();
    }
}

/// Pick the credential from the supported carriers, in priority order:
/// `X-API-Key`, `Authorization: Bearer`, then the `api_key` query parameter.
pub fn extract_credential<'a>(
    api_key_header: Option<&'a str>,
    authorization: Option<&'a str>,
    query_api_key: Option<&'a str>,
) -> Option<&'a str> {
    api_key_header
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .or_else(|| {
            authorization
                .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
                .map(str::trim)
                .filter(|k| !k.is_empty())
        })
        .or(query_api_key.filter(|k| !k.is_empty()))
}
