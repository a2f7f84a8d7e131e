//! Wire protocol between the relay and its tunnel agents
//!
//! Frames are JSON text messages carrying a bare [`Request`] (relay → agent)
//! or [`Response`] (agent → relay). Direction is not tagged on the wire; each
//! side knows which type it expects to read.

mod request;
mod response;

pub use request::Request;
pub use response::Response;

use serde::{Serialize, de::DeserializeOwned};

use crate::{Result, TunnelError};

/// Serialize a protocol message into a text frame
pub fn encode_frame<T: Serialize>(message: &T) -> Result<String> {
    Ok(serde_json::to_string(message)?)
}

/// Parse a text frame into a protocol message
pub fn decode_frame<T: DeserializeOwned>(text: &str) -> Result<T> {
    serde_json::from_str(text)
        .map_err(|e| TunnelError::InvalidMessage(format!("Failed to parse frame: {}", e)))
}
