//! Caller path
//!
//! Captures an ordinary HTTP request, hands it to the hub and blocks until an
//! agent answers. The agent's reply is written back verbatim.

use axum::body::{Body, to_bytes};
use axum::response::{IntoResponse, Response};
use backstream_common::constants::CALLER_POLICY_QUERY;
use backstream_common::{Request, TunnelError};
use tracing::{debug, info};

use super::{AppState, authorize, remote_addr};
use crate::error::{NO_CLIENT_MESSAGE, RelayError, tunnel_error_response};

/// Handler for ordinary inbound HTTP requests
pub async fn handle_forwarding(state: AppState, request: http::Request<Body>) -> Response {
    let remote = remote_addr(&request);
    let (parts, body) = request.into_parts();

    if let Err(e) = authorize(&state, CALLER_POLICY_QUERY, &parts, remote) {
        return e.into_response();
    }

    let body = match to_bytes(body, state.config.max_body_size).await {
        Ok(bytes) => bytes.to_vec(),
        Err(e) => return RelayError::BadRequest(e.to_string()).into_response(),
    };

    let tunnel_request = Request::from_http(&parts, body, remote);
    let request_id = tunnel_request.id.clone();
    debug!(
        request_id = %request_id,
        method = %tunnel_request.method,
        path = %tunnel_request.path,
        "received HTTP request"
    );

    let dispatched = match state.config.request_timeout {
        Some(timeout) => tokio::time::timeout(timeout, state.hub.dispatch(tunnel_request))
            .await
            .unwrap_or(Err(TunnelError::Timeout)),
        None => state.hub.dispatch(tunnel_request).await,
    };

    let reply = match dispatched {
        Ok(reply) => reply,
        Err(TunnelError::NoClient) => {
            info!(request_id = %request_id, "no tunnel agent connected");
            return tunnel_error_response(state.config.no_client_status, NO_CLIENT_MESSAGE);
        }
        Err(e) => return RelayError::from(e).into_response(),
    };

    let code = reply.code;
    match reply.into_http() {
        Ok(response) => {
            info!(
                request_id = %request_id,
                method = %parts.method,
                path = %parts.uri.path(),
                code,
                "sent HTTP response"
            );
            response.map(Body::from)
        }
        Err(e) => RelayError::from(e).into_response(),
    }
}
