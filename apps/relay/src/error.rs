//! Relay error responses
//!
//! Full error details are logged; callers only ever see a status code and a
//! generic message.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use backstream_common::TunnelError;
use backstream_common::constants::TUNNEL_ERROR_HEADER;
use thiserror::Error;
use tracing::{error, warn};

use crate::policy::PolicyError;

/// Body returned when no agent is registered
pub const NO_CLIENT_MESSAGE: &str = "no tunnel agent connected";

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("auth policy denied")]
    Forbidden,

    #[error("auth policy evaluation failed: {0}")]
    Policy(#[from] PolicyError),

    #[error("failed to read request body: {0}")]
    BadRequest(String),

    #[error("failed to upgrade: {0}")]
    Upgrade(String),

    #[error(transparent)]
    Tunnel(#[from] TunnelError),
}

impl RelayError {
    /// Status code and client-facing message
    pub fn status_and_message(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Forbidden => (StatusCode::FORBIDDEN, "auth policy denied"),
            Self::Policy(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed auth policy evaluation",
            ),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "failed to create request"),
            Self::Upgrade(_) => (StatusCode::INTERNAL_SERVER_ERROR, "failed to upgrade"),
            Self::Tunnel(TunnelError::NoClient) => {
                (StatusCode::SERVICE_UNAVAILABLE, NO_CLIENT_MESSAGE)
            }
            Self::Tunnel(TunnelError::AgentsBusy) => {
                (StatusCode::SERVICE_UNAVAILABLE, "tunnel agents busy")
            }
            Self::Tunnel(TunnelError::Timeout) => (
                StatusCode::GATEWAY_TIMEOUT,
                "Gateway Timeout: No response from agent",
            ),
            Self::Tunnel(TunnelError::InvalidMessage(_)) => {
                (StatusCode::BAD_GATEWAY, "invalid response from agent")
            }
            Self::Tunnel(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
        }
    }
}

/// Plain text response marked as produced by the tunnel itself
pub fn tunnel_error_response(status: StatusCode, message: &'static str) -> Response {
    let mut response = (status, message).into_response();
    response.headers_mut().insert(
        TUNNEL_ERROR_HEADER,
        HeaderValue::from_static(status.canonical_reason().unwrap_or("error")),
    );
    response
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();

        match &self {
            Self::Forbidden | Self::BadRequest(_) => warn!("Client error: {}", self),
            Self::Tunnel(TunnelError::NoClient) | Self::Tunnel(TunnelError::AgentsBusy) => {
                warn!("Tunnel unavailable: {}", self)
            }
            _ => error!("Internal error: {:#}", self),
        }

        tunnel_error_response(status, message)
    }
}
