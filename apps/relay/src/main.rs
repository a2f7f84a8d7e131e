use anyhow::{Context, Result};
use backstream_relay::{AppState, Args, AuthPolicy, Config, Hub, LogFormat, RulePolicy, serve};
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: bool, format: LogFormat) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl-C, shutting down gracefully...");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose, args.log_format);

    info!("Backstream relay v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_args(&args)?;

    let policy: Option<Arc<dyn AuthPolicy>> = if config.policy_paths.is_empty() {
        None
    } else {
        let policy = RulePolicy::load(&config.policy_paths)
            .with_context(|| format!("failed to load policy from {:?}", config.policy_paths))?;
        info!(queries = ?policy.queries().collect::<Vec<_>>(), "auth policy loaded");
        Some(Arc::new(policy))
    };

    let hub = Arc::new(Hub::new(config.queue_capacity));
    let listener = TcpListener::bind(&config.addr)
        .await
        .with_context(|| format!("failed to listen on {}", config.addr))?;

    info!(
        addr = %config.addr,
        no_client_status = config.no_client_status.as_u16(),
        request_timeout = ?config.request_timeout,
        "Start server"
    );

    let state = AppState::new(hub, policy, config);
    serve(listener, state, shutdown_signal())
        .await
        .context("failed to serve")?;

    Ok(())
}
