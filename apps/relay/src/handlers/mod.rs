//! Relay protocol handlers
//!
//! A single entry point serves every path. Requests carrying the agent
//! sentinel header are upgraded to a tunnel session; everything else is an
//! ordinary caller whose request is forwarded through the hub.

pub mod connect;
pub mod forwarding;
pub mod session;

#[cfg(test)]
mod tests;

use axum::Router;
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use backstream_common::constants::CLIENT_HEADER;
use http::request::Parts;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::debug;

use crate::config::Config;
use crate::error::RelayError;
use crate::hub::Hub;
use crate::policy::{AuthPolicy, PolicyInput};

pub use connect::handle_connect;
pub use forwarding::handle_forwarding;

/// Shared state handed to every request
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub policy: Option<Arc<dyn AuthPolicy>>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(hub: Arc<Hub>, policy: Option<Arc<dyn AuthPolicy>>, config: Config) -> Self {
        Self {
            hub,
            policy,
            config: Arc::new(config),
        }
    }
}

/// Build the relay router
pub fn build_router(state: AppState) -> Router {
    Router::new().fallback(handle_entry).with_state(state)
}

/// Serve the relay on `listener` until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

async fn handle_entry(State(state): State<AppState>, request: http::Request<Body>) -> Response {
    if request.headers().contains_key(CLIENT_HEADER) {
        handle_connect(state, request).await
    } else {
        handle_forwarding(state, request).await
    }
}

/// Address of the peer, when the server was started with connect info
pub(crate) fn remote_addr<B>(request: &http::Request<B>) -> Option<SocketAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0)
}

/// Evaluate `query` for this request. Passes when no policy is configured.
pub(crate) fn authorize(
    state: &AppState,
    query: &str,
    parts: &Parts,
    remote: Option<SocketAddr>,
) -> Result<(), RelayError> {
    let Some(policy) = &state.policy else {
        return Ok(());
    };

    let input = PolicyInput::from_parts(parts, remote);
    let output = policy.query(query, &input)?;
    if !output.allow {
        return Err(RelayError::Forbidden);
    }

    debug!(query, method = %input.method, path = %input.path, "auth policy allowed request");
    Ok(())
}
