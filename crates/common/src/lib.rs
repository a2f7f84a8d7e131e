//! Common types and utilities for the backstream tunnel
//!
//! This crate holds the wire protocol spoken between the relay and its tunnel
//! agents, the conversions between wire messages and `http` types, and the
//! small helpers (ids, header maps, body encoding, URLs) both sides share.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod utils;

// Re-export commonly used types for convenience
pub use error::{Result, TunnelError};
pub use protocol::{Request, Response, decode_frame, encode_frame};
pub use utils::{
    decode_body, encode_body, generate_agent_id, generate_request_id, headers_to_map,
    map_to_headers, strip_hop_by_hop, to_websocket_url,
};
