//! Security audit events for the EDA MCP server.
//!
//! Provides [`AuditEvent`], a structured, serializable record of every
//! request the gatekeeper refuses. Run-level audit entries live in
//! `eda-sandbox`; this crate only covers access decisions.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// What kind of access decision was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum AuditEventKind {
    /// A credential was missing or did not match.
    AuthFailure,
    /// A caller exceeded its rate limit.
    RateLimited,
    /// A browser origin outside the allow-list was refused.
    OriginRejected,
    /// A relative path tried to leave its project root.
    PathTraversal,
    /// A run was cancelled on request.
    RunCancelled,
}

impl AuditEventKind {
    /// Stable snake_case label, matching the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthFailure => "auth_failure",
            Self::RateLimited => "rate_limited",
            Self::OriginRejected => "origin_rejected",
            Self::PathTraversal => "path_traversal",
            Self::RunCancelled => "run_cancelled",
        }
    }
}

/// A structured audit event emitted by the gatekeeper.
#[derive(Debug, Clone, Serialize)]
#[non_exhaustive]
pub struct AuditEvent {
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// The type of event.
    pub kind: AuditEventKind,
    /// Caller identity (`key:<prefix>`, `ip:<addr>` or `stdio`).
    pub identity: String,
    /// Human-readable description. Never contains credentials.
    pub description: String,
}

impl AuditEvent {
    /// Create a new audit event with the current timestamp.
    pub fn new(
        kind: AuditEventKind,
        identity: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            identity: identity.into(),
            description: description.into(),
        }
    }

    /// Emit the event through `tracing` with `audit = true` for filtering.
    pub fn emit(&self) {
        tracing::warn!(
            audit = true,
            kind = self.kind.as_str(),
            identity = %self.identity,
            timestamp = %self.timestamp.to_rfc3339(),
            "{}",
            self.description
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_to_json_without_panic() {
        let event = AuditEvent::new(
            AuditEventKind::PathTraversal,
            "ip:10.1.2.3",
            "rejected '../../etc/passwd' for project 'adder8'",
        );
        let json = serde_json::to_string(&event).expect("should serialize");
        assert!(json.contains("\"path_traversal\""));
        assert!(json.contains("ip:10.1.2.3"));
        assert!(json.contains("timestamp"));
    }

    #[test]
    fn kind_label_matches_serde() {
        for kind in [
            AuditEventKind::AuthFailure,
            AuditEventKind::RateLimited,
            AuditEventKind::OriginRejected,
            AuditEventKind::PathTraversal,
            AuditEventKind::RunCancelled,
        ] {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, kind.as_str());
        }
    }

    #[test]
    fn emit_does_not_panic_without_subscriber() {
        AuditEvent::new(AuditEventKind::AuthFailure, "stdio", "bad key").emit();
    }
}
