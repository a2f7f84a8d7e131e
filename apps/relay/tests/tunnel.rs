//! End-to-end tests: a real relay, real WebSocket agents and real HTTP callers.

use backstream_common::constants::CLIENT_HEADER;
use backstream_common::{Request, decode_frame, encode_frame};
use backstream_relay::{AppState, Config, Hub, serve};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type AgentSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_relay(config: Config) -> (SocketAddr, Arc<Hub>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hub = Arc::new(Hub::new(config.queue_capacity));
    let state = AppState::new(hub.clone(), None, config);

    tokio::spawn(serve(listener, state, std::future::pending()));
    (addr, hub)
}

async fn connect_agent(addr: SocketAddr) -> AgentSocket {
    let mut request = format!("ws://{}/", addr).into_client_request().unwrap();
    request
        .headers_mut()
        .insert(CLIENT_HEADER, HeaderValue::from_static("default"));

    let (socket, _) = connect_async(request).await.unwrap();
    socket
}

async fn wait_for_agents(hub: &Hub, count: usize) {
    for _ in 0..200 {
        if hub.agent_count() == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {} agents, got {}", count, hub.agent_count());
}

async fn next_request(socket: &mut AgentSocket) -> Request {
    loop {
        match socket.next().await.unwrap().unwrap() {
            Message::Text(text) => return decode_frame(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

/// Answer every request with `code` and `body` until the socket closes
fn spawn_agent(mut socket: AgentSocket, code: u16, body: &'static str) {
    tokio::spawn(async move {
        while let Some(Ok(message)) = socket.next().await {
            if let Message::Text(text) = message {
                let request: Request = decode_frame(text.as_str()).unwrap();
                let response = request
                    .respond(code)
                    .with_header("x-echo-path", request.path.clone())
                    .with_body(body);
                let frame = encode_frame(&response).unwrap();
                if socket.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
        }
    });
}

#[tokio::test]
async fn test_caller_reaches_agent() {
    let (addr, hub) = start_relay(Config::default()).await;
    let agent = connect_agent(addr).await;
    wait_for_agents(&hub, 1).await;
    spawn_agent(agent, 200, "ok");

    let response = reqwest::get(format!("http://{}/status?verbose=1", addr))
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(
        response.headers().get("x-echo-path").unwrap(),
        "/status?verbose=1"
    );
    assert_eq!(response.text().await.unwrap(), "ok");
    assert_eq!(hub.pending_count(), 0);
}

#[tokio::test]
async fn test_no_agent_returns_configured_status() {
    let (addr, _hub) = start_relay(Config::default()).await;

    let response = reqwest::get(format!("http://{}/", addr)).await.unwrap();

    assert_eq!(response.status().as_u16(), 503);
    assert_eq!(response.text().await.unwrap(), "no tunnel agent connected");
}

#[tokio::test]
async fn test_disconnect_unregisters_agent() {
    let (addr, hub) = start_relay(Config::default()).await;
    let mut agent = connect_agent(addr).await;
    wait_for_agents(&hub, 1).await;

    agent.close(None).await.unwrap();
    wait_for_agents(&hub, 0).await;

    let response = reqwest::get(format!("http://{}/", addr)).await.unwrap();
    assert_eq!(response.status().as_u16(), 503);
}

#[tokio::test]
async fn test_malformed_frame_only_drops_that_agent() {
    let (addr, hub) = start_relay(Config::default()).await;
    let healthy = connect_agent(addr).await;
    let mut broken = connect_agent(addr).await;
    wait_for_agents(&hub, 2).await;

    broken
        .send(Message::Text("definitely not json".into()))
        .await
        .unwrap();
    wait_for_agents(&hub, 1).await;

    spawn_agent(healthy, 200, "still here");
    let response = reqwest::get(format!("http://{}/ping", addr)).await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.text().await.unwrap(), "still here");
}

#[tokio::test]
async fn test_fan_out_first_reply_wins() {
    let (addr, hub) = start_relay(Config::default()).await;
    let mut first = connect_agent(addr).await;
    let mut second = connect_agent(addr).await;
    wait_for_agents(&hub, 2).await;

    let caller = tokio::spawn(async move {
        let response = reqwest::Client::new()
            .post(format!("http://{}/hook", addr))
            .body("event")
            .send()
            .await
            .unwrap();
        (response.status().as_u16(), response.text().await.unwrap())
    });

    let seen_first = next_request(&mut first).await;
    let seen_second = next_request(&mut second).await;
    assert_eq!(seen_first.id, seen_second.id);
    assert_eq!(seen_first.body, b"event");

    let winner = encode_frame(&seen_first.respond(201).with_body("first")).unwrap();
    first.send(Message::Text(winner.into())).await.unwrap();

    let (status, body) = caller.await.unwrap();
    assert_eq!(status, 201);
    assert_eq!(body, "first");

    let late = encode_frame(&seen_second.respond(500).with_body("second")).unwrap();
    second.send(Message::Text(late.into())).await.unwrap();

    // The late reply is discarded and the second agent stays connected
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(hub.agent_count(), 2);
    assert_eq!(hub.pending_count(), 0);
}
