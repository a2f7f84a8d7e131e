//! Backstream tunnel agent
//!
//! Runs on the private side of a backstream tunnel: dials the relay, receives
//! the HTTP requests its callers made and replays them against a local
//! service, sending each response back over the same connection.

pub mod caller;
pub mod config;
pub mod tunnel;

pub use caller::{CaptureCaller, HttpCaller, LocalCaller, TracingCaller};
pub use config::{Args, Config, LogFormat, ReconnectConfig};
pub use tunnel::TunnelClient;
