//! Tunnel client
//!
//! Dials the relay with the agent sentinel header, then serves tunnelled
//! requests until the connection drops. Requests are handed to a bounded
//! pool of tasks; their responses are funnelled through a single writer so
//! frames never interleave on the socket.

use backstream_common::constants::{CLIENT_HEADER, CLIENT_HEADER_VALUE, TUNNEL_ERROR_HEADER};
use backstream_common::{Request, Result, TunnelError, decode_frame, encode_frame};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message as WsMessage,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::caller::HttpCaller;
use crate::config::Config;

type WebSocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Value of [`TUNNEL_ERROR_HEADER`] on replies for failed local calls
pub const LOCAL_FAILURE: &str = "local-service-unavailable";

const OUTGOING_BUFFER: usize = 100;

/// Connects to the relay and serves requests with an [`HttpCaller`]
pub struct TunnelClient<C> {
    config: Config,
    caller: Arc<C>,
}

impl<C: HttpCaller> TunnelClient<C> {
    pub fn new(config: Config, caller: C) -> Self {
        Self {
            config,
            caller: Arc::new(caller),
        }
    }

    /// Run until the tunnel drops or `shutdown` fires.
    ///
    /// Without a reconnect strategy a failed dial is returned immediately.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let Some(reconnect) = &self.config.reconnect else {
            let socket = self.connect().await?;
            return self.serve(socket, &shutdown).await;
        };

        let mut reconnect_delay = reconnect.min_delay;
        let mut attempt = 0;

        loop {
            match self.connect().await {
                Ok(socket) => {
                    reconnect_delay = reconnect.min_delay;
                    attempt = 0;

                    if let Err(e) = self.serve(socket, &shutdown).await {
                        error!("Connection error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Failed to connect: {}", e);
                }
            }

            if shutdown.is_cancelled() {
                return Ok(());
            }

            attempt += 1;
            if let Some(max_attempts) = reconnect.max_attempts
                && attempt >= max_attempts
            {
                return Err(TunnelError::ConnectionError(format!(
                    "Giving up after {} attempts",
                    attempt
                )));
            }

            info!(
                "Reconnecting in {:?} (attempt {})",
                reconnect_delay, attempt
            );
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = tokio::time::sleep(reconnect_delay) => {}
            }

            reconnect_delay = reconnect.next_delay(reconnect_delay);
        }
    }

    /// Dial the relay with the sentinel and configured handshake headers
    pub async fn connect(&self) -> Result<WebSocket> {
        debug!("Connecting to {}", self.config.relay_url);

        let mut request = self
            .config
            .relay_url
            .as_str()
            .into_client_request()
            .map_err(|e| TunnelError::ConnectionError(format!("Invalid URL: {}", e)))?;

        let headers = request.headers_mut();
        for (name, value) in &self.config.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                TunnelError::ConnectionError(format!("Invalid header name {:?}: {}", name, e))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                TunnelError::ConnectionError(format!("Invalid header value for {}: {}", name, e))
            })?;
            headers.append(name, value);
        }
        headers.insert(CLIENT_HEADER, HeaderValue::from_static(CLIENT_HEADER_VALUE));

        let (socket, _) = tokio::time::timeout(self.config.connect_timeout, connect_async(request))
            .await
            .map_err(|_| TunnelError::ConnectionError("Connection timeout".to_string()))?
            .map_err(|e| TunnelError::ConnectionError(e.to_string()))?;

        info!(relay = %self.config.relay_url, target = %self.config.target_url, "Tunnel established");
        Ok(socket)
    }

    /// Serve requests on an established connection.
    ///
    /// A malformed frame or a read error ends the session with an error; a
    /// close from the relay or `shutdown` ends it cleanly. On shutdown the
    /// calls already running are allowed to finish and reply. A failed write
    /// ends the session before any further request is read.
    pub async fn serve<S>(
        &self,
        socket: WebSocketStream<S>,
        shutdown: &CancellationToken,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (write, mut read) = socket.split();
        let (outgoing_tx, outgoing_rx) = mpsc::channel(OUTGOING_BUFFER);

        let write_handle = tokio::spawn(spawn_write_task(write, outgoing_rx));
        let heartbeat_handle = self
            .config
            .heartbeat_interval
            .map(|interval| tokio::spawn(spawn_heartbeat_task(outgoing_tx.clone(), interval)));

        let limiter = Arc::new(Semaphore::new(self.config.max_in_flight));
        let mut in_flight = JoinSet::new();

        let result = loop {
            // Only read the next request once a worker slot is free
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                _ = outgoing_tx.closed() => break Err(writer_closed()),
                permit = limiter.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(e) => break Err(TunnelError::InternalError(e.to_string())),
                },
            };

            let message = tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                _ = outgoing_tx.closed() => break Err(writer_closed()),
                message = read.next() => message,
            };
            if outgoing_tx.is_closed() {
                break Err(writer_closed());
            }

            while let Some(joined) = in_flight.try_join_next() {
                log_task_result(joined);
            }

            let text = match message {
                Some(Ok(WsMessage::Text(text))) => text,
                Some(Ok(WsMessage::Binary(_))) => {
                    warn!("Received unexpected binary message");
                    continue;
                }
                Some(Ok(WsMessage::Ping(data))) => {
                    debug!("Received WebSocket ping");
                    if outgoing_tx.send(WsMessage::Pong(data)).await.is_err() {
                        break Err(writer_closed());
                    }
                    continue;
                }
                Some(Ok(WsMessage::Close(_))) => {
                    info!("Server closed connection");
                    break Ok(());
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => break Err(TunnelError::WebSocketError(e.to_string())),
                None => break Ok(()),
            };

            let request: Request = match decode_frame(text.as_str()) {
                Ok(request) => request,
                Err(e) => break Err(e),
            };

            debug!(request_id = %request.id, "Received {} {}", request.method, request.path);

            let caller = Arc::clone(&self.caller);
            let outgoing_tx = outgoing_tx.clone();
            in_flight.spawn(async move {
                let _permit = permit;
                handle_request(caller.as_ref(), request, &outgoing_tx).await
            });
        };

        match &result {
            Ok(()) => {
                while let Some(joined) = in_flight.join_next().await {
                    log_task_result(joined);
                }
            }
            Err(_) => in_flight.shutdown().await,
        }

        if let Some(handle) = heartbeat_handle {
            handle.abort();
        }
        drop(outgoing_tx);
        if let Err(e) = write_handle.await {
            warn!("Write task ended: {:?}", e);
        }

        result
    }
}

/// Run one local call and queue its response frame
async fn handle_request<C: HttpCaller>(
    caller: &C,
    request: Request,
    outgoing_tx: &mpsc::Sender<WsMessage>,
) -> Result<()> {
    let response = match caller.call(&request).await {
        Ok(response) => response,
        Err(e) => {
            error!(request_id = %request.id, "Local service error: {}", e);
            request
                .respond(502)
                .with_header(TUNNEL_ERROR_HEADER, LOCAL_FAILURE)
                .with_header("content-type", "text/plain; charset=utf-8")
                .with_body("local service unavailable")
        }
    };

    let frame = encode_frame(&response)?;
    outgoing_tx
        .send(WsMessage::Text(frame.into()))
        .await
        .map_err(|e| TunnelError::WebSocketError(e.to_string()))
}

fn writer_closed() -> TunnelError {
    TunnelError::WebSocketError("connection writer closed".to_string())
}

fn log_task_result(joined: std::result::Result<Result<()>, tokio::task::JoinError>) {
    match joined {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Failed to handle request: {}", e),
        Err(e) => error!("Request task failed: {}", e),
    }
}

/// Write task sends outgoing messages through WebSocket
async fn spawn_write_task<S>(
    mut write: SplitSink<WebSocketStream<S>, WsMessage>,
    mut outgoing_rx: mpsc::Receiver<WsMessage>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(message) = outgoing_rx.recv().await {
        if let Err(e) = write.send(message).await {
            error!("Failed to send message: {}", e);
            return;
        }
    }

    if let Err(e) = write.close().await {
        debug!("Failed to close connection: {}", e);
    }
    debug!("Write task exiting");
}

/// Heartbeat task sends periodic WebSocket pings
async fn spawn_heartbeat_task(outgoing_tx: mpsc::Sender<WsMessage>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;

        if let Err(e) = outgoing_tx.send(WsMessage::Ping(Vec::new().into())).await {
            error!("Failed to send heartbeat: {}", e);
            break;
        }

        debug!("Sent heartbeat");
    }
}
