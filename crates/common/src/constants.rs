/// Header marking an upgrade request as a tunnel agent. Only its presence matters.
pub const CLIENT_HEADER: &str = "backstream-client";

/// Value the agent sends in [`CLIENT_HEADER`]
pub const CLIENT_HEADER_VALUE: &str = "default";

/// Header attached to replies synthesized by the tunnel rather than the target
pub const TUNNEL_ERROR_HEADER: &str = "x-tunnel-error";

/// Policy query evaluated for ordinary inbound callers
pub const CALLER_POLICY_QUERY: &str = "data.auth.server";

/// Policy query evaluated before registering a tunnel agent
pub const AGENT_POLICY_QUERY: &str = "data.auth.client";

/// Per-agent inbound queue capacity
pub const AGENT_QUEUE_CAPACITY: usize = 32;

/// Status returned to callers when no agent is registered
pub const DEFAULT_NO_CLIENT_STATUS: u16 = 503;

/// Maximum caller request body buffered by the relay (10 MB)
pub const MAX_BODY_SIZE_BYTES: usize = 10 * 1024 * 1024;

/// Default number of concurrent local calls per agent connection
pub const DEFAULT_MAX_IN_FLIGHT: usize = 8;

/// Default timeout for a single local call made by the agent
pub const LOCAL_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Interval between WebSocket pings sent by the agent
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Minimum delay for exponential backoff reconnection (1 second)
pub const RECONNECT_MIN_DELAY_MS: u64 = 1000;

/// Maximum delay for exponential backoff reconnection (60 seconds)
pub const RECONNECT_MAX_DELAY_MS: u64 = 60000;

/// Multiplier for exponential backoff reconnection
pub const RECONNECT_MULTIPLIER: f64 = 2.0;
