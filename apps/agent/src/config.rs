use anyhow::{Context, Result, bail};
use backstream_common::constants::{
    DEFAULT_MAX_IN_FLIGHT, HEARTBEAT_INTERVAL_SECS, LOCAL_REQUEST_TIMEOUT_SECS,
    RECONNECT_MAX_DELAY_MS, RECONNECT_MIN_DELAY_MS, RECONNECT_MULTIPLIER,
};
use backstream_common::to_websocket_url;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// CLI arguments for the tunnel agent
#[derive(Parser, Debug)]
#[command(name = "agent")]
#[command(about = "Serve backstream tunnel requests against a local HTTP service", long_about = None)]
#[command(version)]
pub struct Args {
    /// Relay URL to connect to (http, https, ws or wss)
    #[arg(short, long, env = "BACKSTREAM_SRC_URL")]
    pub src: String,

    /// Base URL of the local service requests are replayed against
    #[arg(short, long, env = "BACKSTREAM_DST_URL")]
    pub dst: String,

    /// Extra header sent on the relay handshake, as "Name: value" (repeatable)
    #[arg(short = 'H', long = "header", env = "BACKSTREAM_HEADER")]
    pub headers: Vec<String>,

    /// Directory to write a JSON capture of every exchange into
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Local calls allowed to run at the same time
    #[arg(long, default_value_t = DEFAULT_MAX_IN_FLIGHT)]
    pub max_in_flight: usize,

    /// Connection timeout in seconds
    #[arg(long, default_value = "10")]
    pub connect_timeout: u64,

    /// Local call timeout in seconds
    #[arg(long, default_value_t = LOCAL_REQUEST_TIMEOUT_SECS)]
    pub request_timeout: u64,

    /// Seconds between WebSocket pings, 0 disables them
    #[arg(long, default_value_t = HEARTBEAT_INTERVAL_SECS)]
    pub heartbeat: u64,

    /// Reconnect with exponential backoff instead of exiting when the tunnel drops
    #[arg(long)]
    pub reconnect: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Configuration for the agent
#[derive(Debug, Clone)]
pub struct Config {
    /// Relay endpoint, already mapped to ws/wss
    pub relay_url: Url,

    /// Local service base URL
    pub target_url: Url,

    /// Static handshake headers
    pub headers: Vec<(String, String)>,

    /// Capture directory
    pub output_dir: Option<PathBuf>,

    pub max_in_flight: usize,

    pub connect_timeout: Duration,

    /// Request timeout when calling local service
    pub request_timeout: Duration,

    /// Heartbeat interval, `None` when disabled
    pub heartbeat_interval: Option<Duration>,

    /// Reconnection strategy, `None` to exit when the tunnel drops
    pub reconnect: Option<ReconnectConfig>,
}

/// Reconnection configuration with exponential backoff
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub max_attempts: Option<usize>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(RECONNECT_MIN_DELAY_MS),
            max_delay: Duration::from_millis(RECONNECT_MAX_DELAY_MS),
            multiplier: RECONNECT_MULTIPLIER,
            max_attempts: None, // Infinite retries
        }
    }
}

impl ReconnectConfig {
    /// Delay to wait after `current`, capped at `max_delay`
    pub fn next_delay(&self, current: Duration) -> Duration {
        Duration::from_millis(
            ((current.as_millis() as f64 * self.multiplier).min(self.max_delay.as_millis() as f64))
                as u64,
        )
    }
}

impl Config {
    /// Build a configuration with defaults for everything but the two endpoints
    pub fn new(relay_url: &str, target_url: &str) -> Result<Self> {
        Ok(Self {
            relay_url: to_websocket_url(relay_url)
                .with_context(|| format!("invalid relay URL {:?}", relay_url))?,
            target_url: parse_target(target_url)?,
            headers: Vec::new(),
            output_dir: None,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(LOCAL_REQUEST_TIMEOUT_SECS),
            heartbeat_interval: Some(Duration::from_secs(HEARTBEAT_INTERVAL_SECS)),
            reconnect: None,
        })
    }

    pub fn from_args(args: &Args) -> Result<Self> {
        if args.max_in_flight == 0 {
            bail!("--max-in-flight must be at least 1");
        }

        let headers = args
            .headers
            .iter()
            .map(|raw| parse_header(raw))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            headers,
            output_dir: args.output.clone(),
            max_in_flight: args.max_in_flight,
            connect_timeout: Duration::from_secs(args.connect_timeout),
            request_timeout: Duration::from_secs(args.request_timeout),
            heartbeat_interval: (args.heartbeat > 0).then(|| Duration::from_secs(args.heartbeat)),
            reconnect: args.reconnect.then(ReconnectConfig::default),
            ..Self::new(&args.src, &args.dst)?
        })
    }
}

fn parse_target(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).with_context(|| format!("invalid destination URL {:?}", raw))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => bail!("unsupported destination scheme {:?}", scheme),
    }
}

/// Parse a "Name: value" header argument
pub fn parse_header(raw: &str) -> Result<(String, String)> {
    let Some((name, value)) = raw.split_once(':') else {
        bail!("invalid header {:?}, expected \"Name: value\"", raw);
    };

    let name = name.trim();
    if name.is_empty() {
        bail!("invalid header {:?}, name is empty", raw);
    }

    Ok((name.to_string(), value.trim().to_string()))
}
