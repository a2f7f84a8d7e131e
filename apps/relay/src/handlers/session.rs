//! Tunnel session
//!
//! One session per connected agent. The outbound pump drains the agent's hub
//! queue onto the socket, the inbound pump feeds replies back into the hub.
//! When either side stops, the registration is torn down exactly once.

use axum::extract::ws::{Message, WebSocket};
use backstream_common::{Response, Result, TunnelError, decode_frame, encode_frame};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::hub::{AgentQueue, Hub};

/// Run a registered agent connection until it drops
pub async fn run_session(
    hub: Arc<Hub>,
    socket: WebSocket,
    agent_id: String,
    remote: Option<SocketAddr>,
) {
    let mut queue = hub.register_agent(agent_id.clone());
    info!(agent_id = %agent_id, remote = ?remote, agents = hub.agent_count(), "tunnel agent registered");

    let (sink, stream) = socket.split();

    tokio::select! {
        result = pump_requests(sink, &mut queue) => {
            match result {
                Ok(()) => info!(agent_id = %agent_id, "agent queue closed"),
                Err(e) => error!(agent_id = %agent_id, "Failed to write to agent: {}", e),
            }
        }
        result = pump_responses(stream, &hub, &agent_id) => {
            match result {
                Ok(()) => info!(agent_id = %agent_id, "agent disconnected"),
                Err(e) => error!(agent_id = %agent_id, "Failed to read from agent: {}", e),
            }
        }
    }

    hub.leave(queue);
    info!(agent_id = %agent_id, agents = hub.agent_count(), "tunnel agent unregistered");
}

/// Serialize every queued request onto the socket
async fn pump_requests(
    mut sink: SplitSink<WebSocket, Message>,
    queue: &mut AgentQueue,
) -> Result<()> {
    while let Some(request) = queue.recv().await {
        let frame = encode_frame(request.as_ref())?;
        sink.send(Message::Text(frame.into()))
            .await
            .map_err(|e| TunnelError::WebSocketError(e.to_string()))?;

        info!(
            agent_id = %queue.agent_id(),
            request_id = %request.id,
            method = %request.method,
            path = %request.path,
            "sent request to agent"
        );
    }

    // Registration replaced or removed: say goodbye to the agent
    if let Err(e) = sink.send(Message::Close(None)).await {
        debug!("Failed to send close frame: {}", e);
    }
    Ok(())
}

/// Read reply frames and complete the matching pending requests
async fn pump_responses(
    mut stream: SplitStream<WebSocket>,
    hub: &Hub,
    agent_id: &str,
) -> Result<()> {
    while let Some(message) = stream.next().await {
        let message = message.map_err(|e| TunnelError::WebSocketError(e.to_string()))?;

        let response: Response = match message {
            Message::Text(text) => decode_frame(text.as_str())?,
            Message::Binary(data) => {
                let text = std::str::from_utf8(&data).map_err(|e| {
                    TunnelError::InvalidMessage(format!("Binary frame is not UTF-8: {}", e))
                })?;
                decode_frame(text)?
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => {
                debug!(agent_id, "agent sent close frame");
                break;
            }
        };

        debug!(
            agent_id,
            request_id = %response.id,
            code = response.code,
            "received response"
        );

        hub.complete_reply(response);
    }

    Ok(())
}
