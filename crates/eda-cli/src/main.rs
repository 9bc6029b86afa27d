#![warn(missing_docs)]

//! eda-mcp: MCP server for sandboxed open-source EDA flows.
//!
//! Serves the tool surface over stdio or streamable HTTP, plus an optional
//! artifact file server for downloading run outputs.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use eda_config::{EdaConfig, SandboxOverrides, Transport};
use eda_sandbox::{
    AuditLogger, CancellationToken, JsonLinesAuditLogger, RunLedger, SandboxConfig,
    SandboxExecutor, TracingAuditLogger,
};
use eda_security::{Gatekeeper, GatekeeperSettings};
use eda_server::{Dispatcher, EdaServer};
use eda_workspace::Workspace;
use rmcp::ServiceExt;
use tracing_subscriber::EnvFilter;

/// How often idle rate-limit windows are dropped.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Build SandboxConfig from config overrides.
fn build_sandbox_config(overrides: &SandboxOverrides) -> SandboxConfig {
    let mut config = SandboxConfig::default();
    if let Some(ref runtime) = overrides.runtime {
        config.runtime = runtime.clone();
    }
    if let Some(ref memory) = overrides.memory_limit {
        config.limits.memory = memory.clone();
    }
    if let Some(ref cpus) = overrides.cpu_limit {
        config.limits.cpus = cpus.clone();
    }
    if let Some(ref network) = overrides.network {
        config.limits.network = network.clone();
    }
    if let Some(pids) = overrides.pids_limit {
        config.limits.pids_limit = pids;
    }
    if let Some(concurrent) = overrides.max_concurrent {
        config.max_concurrent = concurrent;
    }
    if let Some(kb) = overrides.max_output_kb {
        config.max_output_bytes = kb * 1024;
    }
    if let Some(timeout) = overrides.timeout_secs {
        config.default_timeout = Duration::from_secs(timeout);
    }
    if let Some(grace) = overrides.kill_grace_ms {
        config.kill_grace = Duration::from_millis(grace);
    }
    config
}

/// Build GatekeeperSettings from the `[security]` section.
fn build_gatekeeper_settings(config: &EdaConfig) -> GatekeeperSettings {
    GatekeeperSettings {
        api_key: config.security.api_key.clone(),
        rate_limit: config.security.rate_limit_rpm,
        window: Duration::from_secs(config.security.rate_limit_window_secs.max(1)),
        allowed_origins: config.security.allowed_origins.clone(),
    }
}

/// Locate the config file.
///
/// Search order:
/// 1. `EDA_MCP_CONFIG` environment variable
/// 2. `./eda-mcp.toml` in the current directory
/// 3. None (defaults plus environment variables)
fn find_config_file() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("EDA_MCP_CONFIG") {
        let p = PathBuf::from(path);
        if p.exists() {
            return Some(p);
        }
    }

    let cwd = PathBuf::from("eda-mcp.toml");
    if cwd.exists() {
        return Some(cwd);
    }

    None
}

/// Log filter: `RUST_LOG`, then `LOG_LEVEL`, then `info`.
fn log_filter() -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    match std::env::var("LOG_LEVEL") {
        Ok(level) if !level.trim().is_empty() => {
            EnvFilter::try_new(level.trim().to_ascii_lowercase())
                .unwrap_or_else(|_| EnvFilter::new("info"))
        }
        _ => EnvFilter::new("info"),
    }
}

/// Fail any run a previous process left in a non-terminal state.
fn reconcile_ledgers(workspace: &Workspace) -> Result<()> {
    let mut repaired = 0;
    for project in workspace.projects()? {
        match RunLedger::new(project.runs_dir()).reconcile() {
            Ok(n) => repaired += n,
            Err(e) => {
                tracing::warn!(project = %project.name(), error = %e, "run ledger reconciliation failed")
            }
        }
    }
    if repaired > 0 {
        tracing::info!(runs = repaired, "marked interrupted runs as failed");
    }
    Ok(())
}

async fn build_audit_logger(config: &EdaConfig) -> Result<Arc<dyn AuditLogger>> {
    match &config.audit.log_path {
        Some(path) => {
            let logger = JsonLinesAuditLogger::open(path)
                .await
                .with_context(|| format!("failed to open audit log {}", path.display()))?;
            tracing::info!(path = %path.display(), "writing run audit log");
            Ok(Arc::new(logger))
        }
        None => Ok(Arc::new(TracingAuditLogger)),
    }
}

async fn serve_http(
    name: &'static str,
    addr: String,
    app: axum::Router,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {name} on {addr}"))?;
    tracing::info!(addr = %addr, "{name} listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await
    .with_context(|| format!("{name} failed"))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Handle --version / -V before anything else
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("eda-mcp {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(log_filter())
        .with_writer(std::io::stderr)
        .init();

    let config = match find_config_file() {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading config");
            let mut config = EdaConfig::from_file_with_env(&path)
                .with_context(|| format!("failed to load config from {}", path.display()))?;
            config.apply_env_overrides()?;
            config
        }
        None => {
            tracing::info!("no config file found, using defaults and environment");
            let mut config = EdaConfig::from_toml("")?;
            config.apply_env_overrides()?;
            config
        }
    };

    std::fs::create_dir_all(&config.server.workspace_root).with_context(|| {
        format!(
            "failed to create workspace root {}",
            config.server.workspace_root.display()
        )
    })?;
    let workspace = Workspace::new(&config.server.workspace_root)?;
    reconcile_ledgers(&workspace)?;

    let gatekeeper = Arc::new(Gatekeeper::new(build_gatekeeper_settings(&config)));
    let audit_logger = build_audit_logger(&config).await?;
    let executor = SandboxExecutor::with_audit_logger(build_sandbox_config(&config.sandbox), audit_logger);

    #[cfg(feature = "metrics")]
    let (executor, registry) = {
        let mut registry = prometheus_client::registry::Registry::default();
        let metrics = Arc::new(eda_sandbox::SandboxMetrics::new(&mut registry));
        (executor.with_metrics(metrics), Arc::new(registry))
    };

    let dispatcher = Arc::new(Dispatcher::from_config(
        &config,
        workspace.clone(),
        gatekeeper.clone(),
        Arc::new(executor),
    ));
    let server = EdaServer::new(dispatcher.clone());

    tracing::info!(
        transport = ?config.server.transport,
        workspace = %workspace.root().display(),
        auth = config.auth_enabled(),
        "eda-mcp starting"
    );

    let shutdown = CancellationToken::new();

    let sweeper = {
        let gatekeeper = gatekeeper.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.tick().await; // skip the first immediate tick
            loop {
                interval.tick().await;
                gatekeeper.sweep();
            }
        })
    };

    let files = if config.files.enabled {
        let host = config
            .files
            .host
            .clone()
            .unwrap_or_else(|| config.server.host.clone());
        let addr = format!("{host}:{}", config.files.port);
        let app = eda_artifacts::router(workspace.clone(), gatekeeper.clone());
        Some(tokio::spawn(serve_http(
            "file server",
            addr,
            app,
            shutdown.clone(),
        )))
    } else {
        None
    };

    match config.server.transport {
        Transport::Stdio => {
            let service = server.serve(rmcp::transport::io::stdio()).await?;
            tokio::select! {
                result = service.waiting() => { result?; }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("received shutdown signal, stopping gracefully");
                }
            }
        }
        Transport::StreamableHttp => {
            let app = eda_server::http::router(server);
            #[cfg(feature = "metrics")]
            let app = eda_server::http::with_metrics(app, registry);
            let addr = format!("{}:{}", config.server.host, config.server.port);
            let mcp = tokio::spawn(serve_http("MCP endpoint", addr, app, shutdown.clone()));
            tokio::select! {
                result = mcp => { result??; }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("received shutdown signal, stopping gracefully");
                }
            }
        }
    }

    shutdown.cancel();
    let cancelled = dispatcher.shutdown();
    if cancelled > 0 {
        tracing::info!(runs = cancelled, "cancelled active runs");
    }
    // Let cancelled runs tear down their containers.
    let grace = Duration::from_secs(5);
    let _ = tokio::time::timeout(grace, async {
        while dispatcher.locks().active_count() > 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;

    sweeper.abort();
    if let Some(handle) = files {
        match handle.await {
            Ok(Err(e)) => tracing::warn!(error = %e, "file server stopped with an error"),
            Err(e) => tracing::warn!(error = %e, "file server task failed"),
            Ok(Ok(())) => {}
        }
    }

    Ok(())
}
