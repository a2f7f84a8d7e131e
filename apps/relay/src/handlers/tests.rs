//! Router tests for the caller and agent paths

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use backstream_common::constants::{CLIENT_HEADER, TUNNEL_ERROR_HEADER};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use super::{AppState, build_router};
use crate::config::Config;
use crate::hub::{AgentQueue, Hub};
use crate::policy::{AuthPolicy, PolicyError, PolicyInput, PolicyOutput, RulePolicy};

const POLICY: &str = r#"{
    "data.auth.client": {"rules": [{"headers": {"authorization": "Bearer valid_token"}}]},
    "data.auth.server": {"rules": [{"path_prefix": "/public"}]}
}"#;

struct FailingPolicy;

impl AuthPolicy for FailingPolicy {
    fn query(&self, _query: &str, _input: &PolicyInput) -> Result<PolicyOutput, PolicyError> {
        Err(PolicyError::Evaluation("engine unavailable".to_string()))
    }
}

fn state_with(hub: Arc<Hub>, policy: Option<Arc<dyn AuthPolicy>>, config: Config) -> AppState {
    AppState::new(hub, policy, config)
}

fn rule_policy() -> Option<Arc<dyn AuthPolicy>> {
    Some(Arc::new(RulePolicy::from_json(POLICY).unwrap()))
}

async fn send(state: AppState, request: Request<Body>) -> (StatusCode, String) {
    let response = build_router(state).oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8_lossy(&body).into_owned())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// Answer every request with `code` and `body`
fn spawn_agent(hub: Arc<Hub>, mut queue: AgentQueue, code: u16, body: &'static str) {
    tokio::spawn(async move {
        while let Some(request) = queue.recv().await {
            hub.complete_reply(
                request
                    .respond(code)
                    .with_header("content-type", "text/plain")
                    .with_header("x-agent", queue.agent_id().to_string())
                    .with_body(body),
            );
        }
    });
}

#[tokio::test]
async fn test_end_to_end_status_ok() {
    let hub = Arc::new(Hub::default());
    let queue = hub.register_agent("A1");
    spawn_agent(hub.clone(), queue, 200, "ok");

    let response = build_router(state_with(hub.clone(), None, Config::default()))
        .oneshot(get("/status"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-agent").unwrap(), "A1");
    assert_eq!(response.headers().get("content-type").unwrap(), "text/plain");
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"ok");
    assert_eq!(hub.pending_count(), 0);
}

#[tokio::test]
async fn test_request_is_captured_verbatim() {
    let hub = Arc::new(Hub::default());
    let mut queue = hub.register_agent("A1");

    let state = state_with(hub.clone(), None, Config::default());
    let call = tokio::spawn(send(
        state,
        Request::builder()
            .method("POST")
            .uri("/api/items?limit=5")
            .header("x-trace", "one")
            .header("x-trace", "two")
            .body(Body::from("payload"))
            .unwrap(),
    ));

    let request = queue.recv().await.unwrap();
    assert_eq!(request.method, "POST");
    assert_eq!(request.path, "/api/items?limit=5");
    assert_eq!(request.header["x-trace"], vec!["one", "two"]);
    assert_eq!(request.body, b"payload");

    hub.complete_reply(request.respond(204));
    let (status, body) = call.await.unwrap();
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_no_agent_default_status() {
    let hub = Arc::new(Hub::default());
    let response = build_router(state_with(hub.clone(), None, Config::default()))
        .oneshot(get("/anything"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(response.headers().contains_key(TUNNEL_ERROR_HEADER));
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"no tunnel agent connected");
    assert_eq!(hub.pending_count(), 0);
}

#[tokio::test]
async fn test_no_agent_custom_status() {
    for code in [StatusCode::BAD_REQUEST, StatusCode::OK] {
        let config = Config {
            no_client_status: code,
            ..Config::default()
        };
        let (status, body) = send(
            state_with(Arc::new(Hub::default()), None, config),
            get("/"),
        )
        .await;

        assert_eq!(status, code);
        assert_eq!(body, "no tunnel agent connected");
    }
}

#[tokio::test]
async fn test_caller_denied_never_reaches_hub() {
    let hub = Arc::new(Hub::default());
    let mut queue = hub.register_agent("A1");

    let (status, body) = send(
        state_with(hub.clone(), rule_policy(), Config::default()),
        get("/private/data"),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, "auth policy denied");
    assert!(queue.try_recv().is_none());
    assert_eq!(hub.pending_count(), 0);
}

#[tokio::test]
async fn test_caller_allowed_by_policy() {
    let hub = Arc::new(Hub::default());
    let queue = hub.register_agent("A1");
    spawn_agent(hub.clone(), queue, 200, "public");

    let (status, body) = send(
        state_with(hub, rule_policy(), Config::default()),
        get("/public/index.html"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "public");
}

#[tokio::test]
async fn test_caller_policy_failure_is_internal_error() {
    let hub = Arc::new(Hub::default());
    let mut queue = hub.register_agent("A1");

    let (status, _) = send(
        state_with(hub, Some(Arc::new(FailingPolicy)), Config::default()),
        get("/"),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(queue.try_recv().is_none());
}

#[tokio::test]
async fn test_agent_auth() {
    let cases = [
        ("Bearer valid_token", StatusCode::INTERNAL_SERVER_ERROR), // auth passed, upgrade failed
        ("Bearer invalid_token", StatusCode::FORBIDDEN),
    ];

    for (token, expected) in cases {
        let hub = Arc::new(Hub::default());
        let request = Request::builder()
            .uri("/")
            .header("authorization", token)
            .header(CLIENT_HEADER, "test")
            .body(Body::empty())
            .unwrap();

        let (status, _) = send(
            state_with(hub.clone(), rule_policy(), Config::default()),
            request,
        )
        .await;

        assert_eq!(status, expected, "for {}", token);
        assert_eq!(hub.agent_count(), 0);
    }
}

#[tokio::test]
async fn test_agent_policy_failure_is_internal_error() {
    let request = Request::builder()
        .uri("/")
        .header(CLIENT_HEADER, "test")
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(
        state_with(
            Arc::new(Hub::default()),
            Some(Arc::new(FailingPolicy)),
            Config::default(),
        ),
        request,
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "failed auth policy evaluation");
}

#[tokio::test]
async fn test_timeout_releases_pending_reply() {
    let hub = Arc::new(Hub::default());
    let _queue = hub.register_agent("silent");
    let config = Config {
        request_timeout: Some(Duration::from_millis(50)),
        ..Config::default()
    };

    let (status, _) = send(state_with(hub.clone(), None, config), get("/slow")).await;

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(hub.pending_count(), 0);
}

#[tokio::test]
async fn test_invalid_agent_status_is_bad_gateway() {
    let hub = Arc::new(Hub::default());
    let queue = hub.register_agent("A1");
    spawn_agent(hub.clone(), queue, 42, "weird");

    let (status, body) = send(state_with(hub, None, Config::default()), get("/")).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body, "invalid response from agent");
}

#[tokio::test]
async fn test_oversized_body_rejected() {
    let hub = Arc::new(Hub::default());
    let mut queue = hub.register_agent("A1");
    let config = Config {
        max_body_size: 4,
        ..Config::default()
    };

    let request = Request::builder()
        .method("POST")
        .uri("/upload")
        .body(Body::from("far too long"))
        .unwrap();
    let (status, _) = send(state_with(hub, None, config), request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(queue.try_recv().is_none());
}
