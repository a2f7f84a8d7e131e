//! Agent path
//!
//! Authorizes a tunnel agent, upgrades the connection to a WebSocket and hands
//! it to a [`session`](super::session).

use axum::body::Body;
use axum::extract::FromRequestParts;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::{IntoResponse, Response};
use backstream_common::constants::AGENT_POLICY_QUERY;
use backstream_common::generate_agent_id;
use tracing::{info, warn};

use super::session::run_session;
use super::{AppState, authorize, remote_addr};
use crate::error::RelayError;

/// Handler for agent upgrade requests
pub async fn handle_connect(state: AppState, request: http::Request<Body>) -> Response {
    let remote = remote_addr(&request);
    let (mut parts, _body) = request.into_parts();

    if let Err(e) = authorize(&state, AGENT_POLICY_QUERY, &parts, remote) {
        return e.into_response();
    }

    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
        Ok(upgrade) => upgrade,
        Err(rejection) => return RelayError::Upgrade(rejection.body_text()).into_response(),
    };

    let agent_id = generate_agent_id();
    info!(
        agent_id = %agent_id,
        remote = ?remote,
        "accepting tunnel agent"
    );

    let hub = state.hub.clone();
    upgrade
        .on_failed_upgrade(|e| warn!("WebSocket upgrade failed: {}", e))
        .on_upgrade(move |socket| run_session(hub, socket, agent_id, remote))
}
