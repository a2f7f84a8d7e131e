use anyhow::{Result, bail};
use backstream_common::constants::{
    AGENT_QUEUE_CAPACITY, DEFAULT_NO_CLIENT_STATUS, MAX_BODY_SIZE_BYTES,
};
use clap::{Parser, ValueEnum};
use http::StatusCode;
use std::path::PathBuf;
use std::time::Duration;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// CLI arguments for the relay
#[derive(Parser, Debug)]
#[command(name = "relay")]
#[command(about = "Public relay for backstream HTTP tunnels", long_about = None)]
#[command(version)]
pub struct Args {
    /// Listen address
    #[arg(short, long, env = "BACKSTREAM_ADDR", default_value = "127.0.0.1:8080")]
    pub addr: String,

    /// Directory or file path of auth policy documents (repeatable)
    #[arg(short, long, env = "BACKSTREAM_POLICY", value_delimiter = ',')]
    pub policy: Vec<PathBuf>,

    /// HTTP status code when no tunnel agent is connected
    #[arg(short = 'c', long = "code", env = "BACKSTREAM_NO_CLIENT_CODE", default_value_t = DEFAULT_NO_CLIENT_STATUS)]
    pub no_client_code: u16,

    /// Seconds a caller waits for an agent reply (waits indefinitely when unset)
    #[arg(long, env = "BACKSTREAM_REQUEST_TIMEOUT")]
    pub request_timeout: Option<u64>,

    /// Requests buffered per agent before broadcasts skip it
    #[arg(long, default_value_t = AGENT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// Maximum caller request body in bytes
    #[arg(long, default_value_t = MAX_BODY_SIZE_BYTES)]
    pub max_body_size: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Runtime configuration of the relay
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to listen on
    pub addr: String,

    /// Policy documents to load
    pub policy_paths: Vec<PathBuf>,

    /// Status returned when no agent is registered
    pub no_client_status: StatusCode,

    /// Upper bound on a caller's wait for a reply
    pub request_timeout: Option<Duration>,

    /// Per-agent queue capacity
    pub queue_capacity: usize,

    /// Maximum buffered caller body
    pub max_body_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8080".to_string(),
            policy_paths: Vec::new(),
            no_client_status: StatusCode::SERVICE_UNAVAILABLE,
            request_timeout: None,
            queue_capacity: AGENT_QUEUE_CAPACITY,
            max_body_size: MAX_BODY_SIZE_BYTES,
        }
    }
}

impl Config {
    pub fn from_args(args: &Args) -> Result<Self> {
        let Ok(no_client_status) = StatusCode::from_u16(args.no_client_code) else {
            bail!("invalid no-client status code: {}", args.no_client_code);
        };
        if args.queue_capacity == 0 {
            bail!("queue capacity must be at least 1");
        }

        Ok(Self {
            addr: args.addr.clone(),
            policy_paths: args.policy.clone(),
            no_client_status,
            request_timeout: args
                .request_timeout
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            queue_capacity: args.queue_capacity,
            max_body_size: args.max_body_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["relay"]);
        let config = Config::from_args(&args).unwrap();

        assert_eq!(config.addr, "127.0.0.1:8080");
        assert!(config.policy_paths.is_empty());
        assert_eq!(config.no_client_status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(config.request_timeout, None);
        assert_eq!(config.queue_capacity, AGENT_QUEUE_CAPACITY);
        assert_eq!(config.max_body_size, MAX_BODY_SIZE_BYTES);
        assert_eq!(args.log_format, LogFormat::Text);
    }

    #[test]
    fn test_custom_values() {
        let args = Args::parse_from([
            "relay",
            "--addr",
            "0.0.0.0:9000",
            "-p",
            "policy/auth.json",
            "--policy",
            "policy/extra",
            "--code",
            "502",
            "--request-timeout",
            "15",
            "--log-format",
            "json",
        ]);
        let config = Config::from_args(&args).unwrap();

        assert_eq!(config.addr, "0.0.0.0:9000");
        assert_eq!(config.policy_paths.len(), 2);
        assert_eq!(config.no_client_status, StatusCode::BAD_GATEWAY);
        assert_eq!(config.request_timeout, Some(Duration::from_secs(15)));
        assert_eq!(args.log_format, LogFormat::Json);
    }

    #[test]
    fn test_zero_timeout_means_wait_forever() {
        let args = Args::parse_from(["relay", "--request-timeout", "0"]);
        let config = Config::from_args(&args).unwrap();
        assert_eq!(config.request_timeout, None);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let args = Args::parse_from(["relay", "--code", "42"]);
        assert!(Config::from_args(&args).is_err());

        let args = Args::parse_from(["relay", "--queue-capacity", "0"]);
        assert!(Config::from_args(&args).is_err());
    }
}
