mod cli;
mod config;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use audit_log::{AuditEntry, AuditEventType, AuditSink, AuditSource};
use query_policy::{QueryAuthorizer, Whitelist};
use ws_gateway::{EmptySession, Gateway, LoggingMode, SessionCreator, UrlParamsSession};

use crate::cli::Cli;
use crate::config::SessionMode;

const COMPONENT: &str = "reql-guard";

/// Time allowed for the audit writer to drain after shutdown.
const AUDIT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

fn load_whitelist(path: &Path, unsafely_allow_any: bool) -> Result<Whitelist> {
    if unsafely_allow_any && !path.exists() {
        warn!(
            path = %path.display(),
            "whitelist file not found; continuing with an empty whitelist"
        );
        return Ok(Whitelist::default());
    }
    Whitelist::load(path).context("failed to load whitelist")
}

/// Resolves on ctrl-c, or SIGTERM on unix.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("failed to register SIGTERM handler")?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => {
                r.context("failed to listen for ctrl-c")?;
                info!("received SIGINT (ctrl-c)");
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for ctrl-c")?;
        info!("received SIGINT (ctrl-c)");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = config::load(&cli.config)?;

    if let Some(ref whitelist) = cli.whitelist {
        cfg.whitelist_file = whitelist.clone();
    }
    if let Some(ref listen) = cli.listen {
        cfg.listen_addr = listen.clone();
    }
    if let Some(ref backend) = cli.backend {
        cfg.set_backend(backend)?;
    }
    if cli.unsafely_allow_any_query {
        cfg.unsafely_allow_any_query = true;
    }

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.logging.level));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let gateway_config = cfg.gateway_config()?;

    info!(
        config_file = %cli.config.display(),
        whitelist_file = %cfg.whitelist_file.display(),
        listen = %gateway_config.listen_addr,
        path = %gateway_config.http_path,
        backend_host = %gateway_config.backend.host,
        backend_port = gateway_config.backend.port,
        backend_tls = gateway_config.backend.tls.is_some(),
        "reql-guard starting"
    );

    let (audit, audit_handle) = if cfg.logging.mode == LoggingMode::None {
        (AuditSink::disabled(), None)
    } else {
        let (sink, handle) = AuditSink::start(&cfg.logging.audit_log_path)
            .await
            .context("failed to start audit logger")?;
        (sink, Some(handle))
    };

    audit
        .log(AuditEntry::new(
            AuditEventType::GatewayStarted,
            AuditSource::new(COMPONENT),
            serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "config_file": cli.config.display().to_string(),
                "listen_addr": gateway_config.listen_addr.to_string(),
            }),
        ))
        .await;

    let whitelist = load_whitelist(&cfg.whitelist_file, cfg.unsafely_allow_any_query)?;
    info!(
        whitelist_file = %cfg.whitelist_file.display(),
        patterns = whitelist.len(),
        "whitelist loaded"
    );
    audit
        .log(AuditEntry::new(
            AuditEventType::WhitelistLoaded,
            AuditSource::new(COMPONENT),
            serde_json::json!({
                "whitelist_file": cfg.whitelist_file.display().to_string(),
                "patterns": whitelist.len(),
            }),
        ))
        .await;

    let authorizer = Arc::new(QueryAuthorizer::new(
        whitelist,
        cfg.unsafely_allow_any_query,
    ));

    let sessions: Arc<dyn SessionCreator> = match cfg.session.mode {
        SessionMode::Empty => Arc::new(EmptySession),
        SessionMode::UrlParams => Arc::new(UrlParamsSession),
    };
    info!(mode = ?cfg.session.mode, "session creator configured");

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(err) = shutdown_signal().await {
            warn!(error = %err, "signal handling failed; shutting down");
        }
        let _ = signal_tx.send(());
    });

    let gateway = Gateway::new(gateway_config, authorizer, sessions, audit.clone());
    let result = gateway.run(shutdown_rx).await;
    drop(gateway);

    info!("reql-guard shutting down");

    audit
        .log(AuditEntry::new(
            AuditEventType::GatewayStopped,
            AuditSource::new(COMPONENT),
            serde_json::json!({
                "result": match &result {
                    Ok(()) => "ok".to_string(),
                    Err(err) => err.to_string(),
                },
            }),
        ))
        .await;
    drop(audit);

    if let Some(handle) = audit_handle {
        if tokio::time::timeout(AUDIT_DRAIN_TIMEOUT, handle).await.is_err() {
            warn!("audit writer did not finish before shutdown");
        }
    }

    result.context("gateway failed")?;
    Ok(())
}
