use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use kiln_core::HandlerContract;
use kiln_runtime::HostConfig;
use kiln_trigger::{DEFAULT_MAX_BODY, HttpTrigger, host_handler};
use tokio::sync::watch;
use tracing::{info, warn};

use super::{load_host, resolve_config};

const DEFAULT_LISTEN: &str = "127.0.0.1:3000";

pub async fn serve(
    script: Option<PathBuf>,
    config: Option<PathBuf>,
    contract: Option<HandlerContract>,
    listen: Option<String>,
) -> anyhow::Result<()> {
    let config = resolve_config(script, config, contract)?;
    let host_config = HostConfig::from_kiln_config(&config)?;
    let host = Arc::new(load_host(&config, &host_config)?);

    if !host.contract().is_per_request() {
        let response = host.startup().await;
        info!(
            module = host.module().name(),
            status = response.status(),
            output = %String::from_utf8_lossy(response.body()),
            "ran zero-arg module at process start"
        );
        bail!(
            "module `{}` only defines `main`, which runs once at process start; define `handleRequest(req, res)` or `handleBody(body)` to serve requests",
            host.module().name()
        );
    }

    let listen = listen
        .or_else(|| config.listen().map(str::to_string))
        .unwrap_or_else(|| DEFAULT_LISTEN.to_string());
    let addr: SocketAddr = listen
        .parse()
        .with_context(|| format!("invalid listen address `{listen}`"))?;
    let max_body = config.max_body()?.unwrap_or(DEFAULT_MAX_BODY);

    let handler = host_handler(host.clone(), max_body)?;
    let trigger = HttpTrigger::new(addr, handler);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown signal received"),
            Err(e) => warn!(error = %e, "failed to listen for Ctrl-C; shutting down"),
        }
        let _ = shutdown_tx.send(true);
    });

    info!(
        module = host.module().name(),
        contract = %host.contract(),
        %addr,
        max_body,
        max_concurrent = host.slots().max(),
        "serving handler"
    );
    trigger.serve(shutdown_rx).await
}
