#![warn(missing_docs)]

//! # eda-config
//!
//! Configuration loading for the EDA MCP server.
//!
//! Supports TOML configuration files with `${ENV_VAR}` expansion, followed
//! by the deployment environment variables (`MCP_API_KEY`, `RATE_LIMIT_RPM`,
//! `YOSYS_DOCKER_IMAGE`, ...). Configuration is read once at start-up and is
//! immutable for the lifetime of the process.
//!
//! ## Example
//!
//! ```toml
//! [server]
//! transport = "streamable-http"
//! port = 3334
//! workspace_root = "/srv/eda/workspace"
//! public_base_url = "https://eda.example.com/files"
//!
//! [security]
//! api_key = "${MCP_API_KEY}"
//! rate_limit_rpm = 60
//! allowed_origins = ["https://claude.ai"]
//!
//! [sandbox]
//! memory_limit = "4g"
//! cpu_limit = "2"
//! network = "none"
//! max_concurrent = 4
//!
//! [tools.openlane]
//! image = "efabless/openlane:latest"
//! timeout_secs = 3600
//! pdk_cache_dir = "/srv/eda/pdk_cache"
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

/// Default Yosys container image.
pub const DEFAULT_YOSYS_IMAGE: &str = "yosys:local";
/// Default OpenROAD container image.
pub const DEFAULT_OPENROAD_IMAGE: &str = "openroad:local";
/// Default OpenLane container image (also ships KLayout).
pub const DEFAULT_OPENLANE_IMAGE: &str = "efabless/openlane:latest";

/// Errors from config parsing.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Invalid configuration value.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level EDA server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EdaConfig {
    /// MCP listener and workspace location.
    #[serde(default)]
    pub server: ServerSection,

    /// Authentication, rate limiting and CORS.
    #[serde(default)]
    pub security: SecuritySection,

    /// Sandbox execution settings.
    #[serde(default)]
    pub sandbox: SandboxOverrides,

    /// Per-tool container settings.
    #[serde(default)]
    pub tools: ToolsSection,

    /// Artifact file server.
    #[serde(default)]
    pub files: FilesSection,

    /// Audit log sink.
    #[serde(default)]
    pub audit: AuditSection,
}

/// MCP transport selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Transport {
    /// Line-delimited JSON-RPC over stdin/stdout.
    #[default]
    Stdio,
    /// MCP streamable HTTP, mounted at `/mcp`.
    #[serde(alias = "http")]
    StreamableHttp,
}

impl FromStr for Transport {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stdio" => Ok(Self::Stdio),
            "streamable-http" | "http" => Ok(Self::StreamableHttp),
            other => Err(ConfigError::Invalid(format!(
                "unsupported transport '{other}', supported: stdio, streamable-http"
            ))),
        }
    }
}

/// `[server]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Which MCP transport to serve.
    pub transport: Transport,
    /// Bind address for the HTTP transport.
    pub host: String,
    /// Port for the HTTP transport.
    pub port: u16,
    /// Directory that holds one subdirectory per project.
    pub workspace_root: PathBuf,
    /// Base URL used by `get_file_url`. Derived from the file server
    /// address when absent.
    pub public_base_url: Option<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            transport: Transport::Stdio,
            host: "0.0.0.0".into(),
            port: 3334,
            workspace_root: PathBuf::from("workspace"),
            public_base_url: None,
        }
    }
}

/// `[security]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecuritySection {
    /// Shared API key. `None` means public access; rate limiting and
    /// path checks stay active regardless.
    pub api_key: Option<String>,
    /// Requests allowed per identity per window.
    pub rate_limit_rpm: u32,
    /// Length of the sliding window in seconds.
    pub rate_limit_window_secs: u64,
    /// Allowed browser origins. `"*"` allows any origin.
    pub allowed_origins: Vec<String>,
}

impl Default for SecuritySection {
    fn default() -> Self {
        Self {
            api_key: None,
            rate_limit_rpm: 60,
            rate_limit_window_secs: 60,
            allowed_origins: vec!["*".into()],
        }
    }
}

/// Sandbox configuration overrides.
///
/// Absent values fall back to the executor defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SandboxOverrides {
    /// Container runtime binary (`docker`, `podman`, or an absolute path).
    #[serde(default)]
    pub runtime: Option<String>,

    /// Memory ceiling passed to `--memory`, e.g. `"4g"`.
    #[serde(default)]
    pub memory_limit: Option<String>,

    /// CPU ceiling passed to `--cpus`, e.g. `"2"`.
    #[serde(default)]
    pub cpu_limit: Option<String>,

    /// Container network mode.
    #[serde(default)]
    pub network: Option<String>,

    /// Maximum number of processes inside the container.
    #[serde(default)]
    pub pids_limit: Option<u32>,

    /// Maximum concurrent sandbox executions.
    #[serde(default)]
    pub max_concurrent: Option<usize>,

    /// Per-stream output capture limit in kilobytes.
    #[serde(default)]
    pub max_output_kb: Option<usize>,

    /// Default run timeout in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Grace period between a timeout firing and the run being reported.
    #[serde(default)]
    pub kill_grace_ms: Option<u64>,
}

/// Settings for one wrapped tool.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolOverrides {
    /// Container image.
    #[serde(default)]
    pub image: Option<String>,

    /// Run timeout in seconds, overriding `[sandbox] timeout_secs`.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Liberty file used for technology mapping (Yosys only).
    #[serde(default)]
    pub liberty: Option<String>,

    /// Host directory mounted as the PDK cache (OpenLane only).
    #[serde(default)]
    pub pdk_cache_dir: Option<PathBuf>,
}

impl ToolOverrides {
    /// The configured image, or `default` when unset.
    pub fn image_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.image.as_deref().unwrap_or(default)
    }
}

/// `[tools.*]` sections.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolsSection {
    /// `[tools.yosys]`
    #[serde(default)]
    pub yosys: ToolOverrides,
    /// `[tools.openroad]`
    #[serde(default)]
    pub openroad: ToolOverrides,
    /// `[tools.openlane]`
    #[serde(default)]
    pub openlane: ToolOverrides,
    /// `[tools.klayout]`; the image defaults to the OpenLane image.
    #[serde(default)]
    pub klayout: ToolOverrides,
}

/// `[files]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilesSection {
    /// Whether to start the artifact file server.
    pub enabled: bool,
    /// Bind address; defaults to `[server] host`.
    pub host: Option<String>,
    /// Listening port.
    pub port: u16,
}

impl Default for FilesSection {
    fn default() -> Self {
        Self {
            enabled: true,
            host: None,
            port: 8081,
        }
    }
}

/// `[audit]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditSection {
    /// Append run audit entries as JSON lines to this file. When absent,
    /// entries are emitted through `tracing`.
    #[serde(default)]
    pub log_path: Option<PathBuf>,
}

impl EdaConfig {
    /// Parse a config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: EdaConfig = toml::from_str(toml_str)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse a config from a TOML string, expanding `${ENV_VAR}` references.
    pub fn from_toml_with_env(toml_str: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(toml_str);
        Self::from_toml(&expanded)
    }

    /// Load config from a file path, expanding environment variables.
    pub fn from_file_with_env(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_with_env(&content)
    }

    /// Apply the deployment environment variables on top of the file values.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup, then re-validate.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MCP_API_KEY") {
            self.security.api_key = Some(v);
        }
        if let Some(v) = lookup("RATE_LIMIT_RPM") {
            self.security.rate_limit_rpm = parse_var("RATE_LIMIT_RPM", &v)?;
        }
        if let Some(v) = lookup("ALLOWED_ORIGINS") {
            self.security.allowed_origins = v
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }
        if let Some(v) = lookup("YOSYS_DOCKER_IMAGE") {
            self.tools.yosys.image = Some(v);
        }
        if let Some(v) = lookup("OPENROAD_DOCKER_IMAGE") {
            self.tools.openroad.image = Some(v);
        }
        if let Some(v) = lookup("OPENLANE_DOCKER_IMAGE") {
            self.tools.openlane.image = Some(v);
        }
        if let Some(v) = lookup("EDA_TIMEOUT_SECONDS") {
            self.sandbox.timeout_secs = Some(parse_var("EDA_TIMEOUT_SECONDS", &v)?);
        }
        if let Some(v) = lookup("DOCKER_MEMORY_LIMIT") {
            self.sandbox.memory_limit = Some(v);
        }
        if let Some(v) = lookup("DOCKER_CPU_LIMIT") {
            self.sandbox.cpu_limit = Some(v);
        }
        if let Some(v) = lookup("DOCKER_NETWORK") {
            self.sandbox.network = Some(v);
        }
        if let Some(v) = lookup("HOST") {
            self.server.host = v;
        }
        if let Some(v) = lookup("PORT") {
            self.server.port = parse_var("PORT", &v)?;
        }
        if let Some(v) = lookup("FILE_SERVER_PORT") {
            self.files.port = parse_var("FILE_SERVER_PORT", &v)?;
        }
        if let Some(v) = lookup("MCP_TRANSPORT") {
            self.server.transport = v.parse()?;
        }
        if let Some(v) = lookup("WORKSPACE_ROOT") {
            self.server.workspace_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("PUBLIC_BASE_URL") {
            self.server.public_base_url = Some(v);
        }
        self.normalize();
        self.validate()
    }

    /// Whether an API key is configured.
    pub fn auth_enabled(&self) -> bool {
        self.security.api_key.is_some()
    }

    /// Base URL that `get_file_url` prefixes to project paths.
    pub fn file_base_url(&self) -> String {
        match &self.server.public_base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://localhost:{}", self.files.port),
        }
    }

    // An empty key or base URL means "unset".
    fn normalize(&mut self) {
        if self
            .security
            .api_key
            .as_deref()
            .is_some_and(|k| k.trim().is_empty())
        {
            self.security.api_key = None;
        }
        if self
            .server
            .public_base_url
            .as_deref()
            .is_some_and(|u| u.trim().is_empty())
        {
            self.server.public_base_url = None;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.security.rate_limit_rpm == 0 {
            return Err(ConfigError::Invalid(
                "security.rate_limit_rpm must be greater than 0".into(),
            ));
        }
        if self.security.rate_limit_window_secs == 0 {
            return Err(ConfigError::Invalid(
                "security.rate_limit_window_secs must be greater than 0".into(),
            ));
        }
        if self.security.allowed_origins.is_empty() {
            return Err(ConfigError::Invalid(
                "security.allowed_origins must list at least one origin (use \"*\" for any)"
                    .into(),
            ));
        }
        if let Some(url) = &self.server.public_base_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid(format!(
                    "server.public_base_url '{url}' must start with http:// or https://"
                )));
            }
        }
        if self.sandbox.max_concurrent == Some(0) {
            return Err(ConfigError::Invalid(
                "sandbox.max_concurrent must be greater than 0".into(),
            ));
        }
        if self.sandbox.timeout_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "sandbox.timeout_secs must be greater than 0".into(),
            ));
        }
        if let Some(mem) = &self.sandbox.memory_limit {
            if !is_memory_limit(mem) {
                return Err(ConfigError::Invalid(format!(
                    "sandbox.memory_limit '{mem}' must look like 512m or 4g"
                )));
            }
        }
        if let Some(cpus) = &self.sandbox.cpu_limit {
            match cpus.parse::<f64>() {
                Ok(n) if n > 0.0 && n.is_finite() => {}
                _ => {
                    return Err(ConfigError::Invalid(format!(
                        "sandbox.cpu_limit '{cpus}' must be a positive number"
                    )))
                }
            }
        }
        if let Some(net) = &self.sandbox.network {
            if net.is_empty() || !net.chars().all(|c| c.is_ascii_alphanumeric() || "_-.".contains(c)) {
                return Err(ConfigError::Invalid(format!(
                    "sandbox.network '{net}' is not a valid network name"
                )));
            }
        }
        for (name, tool) in [
            ("yosys", &self.tools.yosys),
            ("openroad", &self.tools.openroad),
            ("openlane", &self.tools.openlane),
            ("klayout", &self.tools.klayout),
        ] {
            if tool.timeout_secs == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "tools.{name}.timeout_secs must be greater than 0"
                )));
            }
            if tool.image.as_deref().is_some_and(|i| i.trim().is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "tools.{name}.image must not be empty"
                )));
            }
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("environment variable {name}='{value}' is not valid")))
}

fn is_memory_limit(s: &str) -> bool {
    let digits = s.trim_end_matches(|c: char| "bkmgBKMG".contains(c));
    !digits.is_empty()
        && s.len() - digits.len() <= 1
        && digits.chars().all(|c| c.is_ascii_digit())
}

/// Expand `${ENV_VAR}` patterns in a string using environment variables.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(value) => result.push_str(&value),
                Err(_) => {
                    tracing::debug!(var = %var_name, "config references unset environment variable");
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(ch);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = EdaConfig::from_toml("").unwrap();
        assert_eq!(config.server.transport, Transport::Stdio);
        assert_eq!(config.server.port, 3334);
        assert_eq!(config.files.port, 8081);
        assert!(config.files.enabled);
        assert_eq!(config.security.rate_limit_rpm, 60);
        assert_eq!(config.security.allowed_origins, vec!["*"]);
        assert!(!config.auth_enabled());
        assert!(config.sandbox.timeout_secs.is_none());
        assert_eq!(config.tools.yosys.image_or(DEFAULT_YOSYS_IMAGE), "yosys:local");
    }

    #[test]
    fn config_parses_full_example() {
        let toml = r#"
            [server]
            transport = "streamable-http"
            host = "127.0.0.1"
            port = 9000
            workspace_root = "/srv/eda"
            public_base_url = "https://eda.example.com/files/"

            [security]
            api_key = "s3cret"
            rate_limit_rpm = 10
            allowed_origins = ["https://claude.ai"]

            [sandbox]
            runtime = "podman"
            memory_limit = "8g"
            cpu_limit = "1.5"
            network = "none"
            pids_limit = 128
            max_concurrent = 2
            timeout_secs = 300

            [tools.openlane]
            image = "efabless/openlane:2024.01"
            timeout_secs = 3600
            pdk_cache_dir = "/srv/pdk"

            [tools.yosys]
            liberty = "/opt/pdk/sky130.lib"

            [files]
            port = 9001

            [audit]
            log_path = "/var/log/eda-audit.jsonl"
        "#;

        let config = EdaConfig::from_toml(toml).unwrap();
        assert_eq!(config.server.transport, Transport::StreamableHttp);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.security.api_key.as_deref(), Some("s3cret"));
        assert_eq!(config.security.rate_limit_rpm, 10);
        assert_eq!(config.sandbox.runtime.as_deref(), Some("podman"));
        assert_eq!(config.sandbox.pids_limit, Some(128));
        assert_eq!(
            config.tools.openlane.image_or(DEFAULT_OPENLANE_IMAGE),
            "efabless/openlane:2024.01"
        );
        assert_eq!(config.tools.openlane.pdk_cache_dir, Some(PathBuf::from("/srv/pdk")));
        assert_eq!(config.tools.yosys.liberty.as_deref(), Some("/opt/pdk/sky130.lib"));
        assert_eq!(config.file_base_url(), "https://eda.example.com/files");
        assert_eq!(config.files.port, 9001);
        assert!(config.audit.log_path.is_some());
    }

    #[test]
    fn transport_accepts_http_alias() {
        let config = EdaConfig::from_toml("[server]\ntransport = \"http\"").unwrap();
        assert_eq!(config.server.transport, Transport::StreamableHttp);
    }

    #[test]
    fn config_rejects_unknown_transport() {
        let err = EdaConfig::from_toml("[server]\ntransport = \"grpc\"").unwrap_err();
        assert!(err.to_string().contains("grpc"), "got: {err}");
    }

    #[test]
    fn config_rejects_zero_rate_limit() {
        let err = EdaConfig::from_toml("[security]\nrate_limit_rpm = 0").unwrap_err();
        assert!(err.to_string().contains("rate_limit_rpm"));
    }

    #[test]
    fn config_rejects_bad_memory_limit() {
        let err = EdaConfig::from_toml("[sandbox]\nmemory_limit = \"lots\"").unwrap_err();
        assert!(err.to_string().contains("memory_limit"));
    }

    #[test]
    fn config_rejects_relative_base_url() {
        let err = EdaConfig::from_toml("[server]\npublic_base_url = \"files.example.com\"")
            .unwrap_err();
        assert!(err.to_string().contains("public_base_url"));
    }

    #[test]
    fn empty_api_key_means_public_access() {
        let config = EdaConfig::from_toml("[security]\napi_key = \"\"").unwrap();
        assert!(!config.auth_enabled());
    }

    #[test]
    fn file_base_url_defaults_to_file_port() {
        let config = EdaConfig::from_toml("[files]\nport = 8099").unwrap();
        assert_eq!(config.file_base_url(), "http://localhost:8099");
    }

    #[test]
    fn env_overrides_apply_deployment_variables() {
        let mut config = EdaConfig::from_toml("").unwrap();
        config
            .apply_overrides_from(lookup(&[
                ("MCP_API_KEY", "k-123"),
                ("RATE_LIMIT_RPM", "5"),
                ("ALLOWED_ORIGINS", "https://a.example, https://b.example"),
                ("YOSYS_DOCKER_IMAGE", "ghcr.io/yosys:0.40"),
                ("EDA_TIMEOUT_SECONDS", "120"),
                ("DOCKER_MEMORY_LIMIT", "2g"),
                ("MCP_TRANSPORT", "streamable-http"),
                ("PORT", "4000"),
                ("FILE_SERVER_PORT", "4001"),
            ]))
            .unwrap();

        assert_eq!(config.security.api_key.as_deref(), Some("k-123"));
        assert_eq!(config.security.rate_limit_rpm, 5);
        assert_eq!(
            config.security.allowed_origins,
            vec!["https://a.example", "https://b.example"]
        );
        assert_eq!(config.tools.yosys.image.as_deref(), Some("ghcr.io/yosys:0.40"));
        assert_eq!(config.sandbox.timeout_secs, Some(120));
        assert_eq!(config.sandbox.memory_limit.as_deref(), Some("2g"));
        assert_eq!(config.server.transport, Transport::StreamableHttp);
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.files.port, 4001);
    }

    #[test]
    fn env_overrides_reject_unparseable_numbers() {
        let mut config = EdaConfig::from_toml("").unwrap();
        let err = config
            .apply_overrides_from(lookup(&[("RATE_LIMIT_RPM", "sixty")]))
            .unwrap_err();
        assert!(err.to_string().contains("RATE_LIMIT_RPM"));
    }

    #[test]
    #[serial_test::serial]
    fn config_expands_environment_variables() {
        std::env::set_var("EDA_TEST_API_KEY", "from-env");
        let config =
            EdaConfig::from_toml_with_env("[security]\napi_key = \"${EDA_TEST_API_KEY}\"").unwrap();
        assert_eq!(config.security.api_key.as_deref(), Some("from-env"));
        std::env::remove_var("EDA_TEST_API_KEY");
    }

    #[test]
    fn config_loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eda-mcp.toml");
        std::fs::write(&path, "[server]\nport = 7000\n").unwrap();

        let config = EdaConfig::from_file(&path).unwrap();
        assert_eq!(config.server.port, 7000);
    }

    #[test]
    fn env_var_expansion_preserves_unresolved() {
        let result = expand_env_vars("prefix ${DEFINITELY_NOT_SET_12345} suffix");
        assert_eq!(result, "prefix ${DEFINITELY_NOT_SET_12345} suffix");
    }

    #[test]
    fn memory_limit_shapes() {
        assert!(is_memory_limit("4g"));
        assert!(is_memory_limit("512m"));
        assert!(is_memory_limit("1073741824"));
        assert!(!is_memory_limit("g"));
        assert!(!is_memory_limit("4gb"));
        assert!(!is_memory_limit("-1g"));
    }
}
