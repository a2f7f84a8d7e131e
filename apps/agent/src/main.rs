use anyhow::{Context, Result};
use backstream_agent::{
    Args, CaptureCaller, Config, HttpCaller, LocalCaller, LogFormat, TracingCaller, TunnelClient,
};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
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

async fn run<C: HttpCaller>(config: Config, caller: C) -> Result<()> {
    let client = TunnelClient::new(config, caller);
    let shutdown = CancellationToken::new();

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            return;
        }
        info!("Received Ctrl-C, shutting down gracefully...");
        signal.cancel();
    });

    client.run(shutdown).await.context("tunnel failed")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose, args.log_format);

    info!("Backstream agent v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_args(&args)?;
    info!("Relay: {}", config.relay_url);
    info!("Local service: {}", config.target_url);

    let local = LocalCaller::new(config.target_url.clone(), config.request_timeout)
        .context("failed to build HTTP client")?;
    let caller = TracingCaller::new(local);

    match config.output_dir.clone() {
        Some(dir) => {
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("failed to create {}", dir.display()))?;
            info!("Capturing exchanges into {}", dir.display());
            run(config, CaptureCaller::new(caller, dir)).await
        }
        None => run(config, caller).await,
    }
}
