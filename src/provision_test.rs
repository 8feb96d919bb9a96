use super::*;
use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

// =============================================================================
// PARSING
// =============================================================================

#[test]
fn parse_full_response() {
    let json = r#"{
        "url": "https://abc.example.net/",
        "name": "abc",
        "ready_url": "https://api.example.net/backend/abc/ready",
        "status_url": "https://api.example.net/backend/abc/status",
        "spawned": true,
        "bearer_token": "tok"
    }"#;
    let result = parse_response(json).expect("parse");
    assert_eq!(result.name, "abc");
    assert!(result.spawned);
    assert_eq!(result.bearer_token.as_deref(), Some("tok"));
    assert_eq!(
        result.coordinates(),
        ConnectionCoordinates {
            realtime_url: "https://abc.example.net/".into(),
            status_url: "https://api.example.net/backend/abc/status".into(),
        }
    );
}

#[test]
fn bearer_token_is_optional() {
    let json = r#"{"url":"u","name":"n","ready_url":"r","status_url":"s","spawned":false}"#;
    let result = parse_response(json).expect("parse");
    assert!(!result.spawned);
    assert_eq!(result.bearer_token, None);
}

#[test]
fn missing_fields_are_parse_errors() {
    let err = parse_response(r#"{"url":"u"}"#).expect_err("incomplete");
    assert!(matches!(err, ProvisionError::Parse(_)));
}

#[test]
fn request_body_omits_absent_fields() {
    let empty = ApiRequest { lock: None, env: None };
    assert_eq!(serde_json::to_value(&empty).expect("json"), json!({}));

    let env = BTreeMap::from([("MODE".to_string(), "demo".to_string())]);
    let full = ApiRequest { lock: Some("board"), env: Some(&env) };
    assert_eq!(serde_json::to_value(&full).expect("json"), json!({"lock": "board", "env": {"MODE": "demo"}}));
}

// =============================================================================
// CLIENT
// =============================================================================

#[derive(Clone, Default)]
struct Seen {
    calls: Arc<Mutex<Vec<(String, String, Option<String>, Value)>>>,
}

async fn spawn_handler(
    State(seen): State<Seen>,
    Path((account, service)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    seen.calls
        .lock()
        .expect("lock")
        .push((account.clone(), service, auth, body));
    if account == "nobody" {
        return (StatusCode::FORBIDDEN, Json(json!({"error": "no such account"})));
    }
    (
        StatusCode::OK,
        Json(json!({
            "url": "http://127.0.0.1:1/",
            "name": "backend-1",
            "ready_url": "http://127.0.0.1:1/ready",
            "status_url": "http://127.0.0.1:1/status",
            "spawned": true
        })),
    )
}

async fn fake_api() -> (String, Seen) {
    let seen = Seen::default();
    let app = Router::new()
        .route("/user/{account}/service/{service}/spawn", post(spawn_handler))
        .with_state(seen.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}/"), seen)
}

fn request(account: &str) -> SpawnRequest {
    SpawnRequest {
        account: account.into(),
        service: "whiteboard".into(),
        token: "secret".into(),
        lock: Some("main-board".into()),
        env: None,
    }
}

#[tokio::test]
async fn spawn_posts_to_account_service_path_with_bearer_token() {
    let (api_url, seen) = fake_api().await;
    let client = ProvisionClient::new(&api_url, Duration::from_secs(5)).expect("client");

    let result = client.spawn(&request("acme")).await.expect("spawn");
    assert_eq!(result.name, "backend-1");
    assert_eq!(result.coordinates().status_url, "http://127.0.0.1:1/status");

    let calls = seen.calls.lock().expect("lock").clone();
    assert_eq!(
        calls,
        vec![(
            "acme".to_string(),
            "whiteboard".to_string(),
            Some("Bearer secret".to_string()),
            json!({"lock": "main-board"}),
        )]
    );
}

#[tokio::test]
async fn non_success_status_carries_body() {
    let (api_url, _) = fake_api().await;
    let client = ProvisionClient::new(&api_url, Duration::from_secs(5)).expect("client");

    match client.spawn(&request("nobody")).await {
        Err(ProvisionError::Api { status, body }) => {
            assert_eq!(status, 403);
            assert!(body.contains("no such account"));
        }
        other => panic!("expected api error, got {other:?}"),
    }
}

#[test]
fn spawn_request_from_config() {
    let config = ProvisionConfig {
        api_url: "https://api.example.net".into(),
        account: "acme".into(),
        service: "whiteboard".into(),
        token: "secret".into(),
        lock: Some("main-board".into()),
        request_timeout: Duration::from_secs(30),
    };
    let request = SpawnRequest::from_config(&config);
    assert_eq!(request.account, "acme");
    assert_eq!(request.lock.as_deref(), Some("main-board"));
    assert_eq!(request.env, None);
}
