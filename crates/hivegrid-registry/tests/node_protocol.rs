//! End-to-end tests of the node client, discovery, and health polling
//! against an in-process fake model server.

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::Json;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use hivegrid_core::config::{DiscoveryConfig, HealthPollConfig};
use hivegrid_core::Node;
use hivegrid_registry::{ChatRequest, Discovery, HealthPoller, NodeClient, NodeError, NodeRegistry};

async fn models() -> Json<Value> {
    Json(json!({"object": "list", "data": [{"id": "m1"}, {"id": "m2"}]}))
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok", "gpu_util": 42}))
}

async fn chat(headers: HeaderMap, Json(body): Json<Value>) -> Result<Json<Value>, StatusCode> {
    if let Some(auth) = headers.get("authorization") {
        if auth != "Bearer sekrit" {
            return Err(StatusCode::UNAUTHORIZED);
        }
    }
    let prompt = body["messages"][0]["content"].as_str().unwrap_or_default().to_string();
    Ok(Json(json!({
        "choices": [{"message": {"role": "assistant", "content": format!("echo: {prompt}")}}]
    })))
}

async fn spawn_fake_node() -> SocketAddr {
    let app = Router::new()
        .route("/v1/models", get(models))
        .route("/health", get(health))
        .route("/v1/chat/completions", post(chat));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn client_speaks_node_protocol() {
    let addr = spawn_fake_node().await;
    let client = NodeClient::new(Some("sekrit".into()));
    let address = addr.to_string();

    let models = client.list_models(&address, Duration::from_secs(5)).await.unwrap();
    assert_eq!(models, vec!["m1", "m2"]);

    let health = client.health(&address, Duration::from_secs(5)).await.unwrap();
    assert_eq!(health["status"], "ok");

    let req = ChatRequest::user_prompt("m1", "ping", 0.7, 16);
    let text = client.chat_completion(&address, &req, Duration::from_secs(5)).await.unwrap();
    assert_eq!(text, "echo: ping");
}

#[tokio::test]
async fn wrong_api_key_surfaces_status() {
    let addr = spawn_fake_node().await;
    let client = NodeClient::new(Some("wrong".into()));
    let req = ChatRequest::user_prompt("m1", "ping", 0.7, 16);

    let err = client
        .chat_completion(&addr.to_string(), &req, Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::Status(401)));
}

#[tokio::test]
async fn discovery_registers_responding_endpoint() {
    let addr = spawn_fake_node().await;
    let registry = NodeRegistry::new();
    let config = DiscoveryConfig {
        enabled: true,
        scan_range: "127.0.0.1/32".into(),
        ports: vec![addr.port()],
        timeout: Duration::from_secs(2),
        benchmark_on_discovery: true,
        ..DiscoveryConfig::default()
    };
    let discovery = Discovery::new(registry.clone(), NodeClient::default(), config);

    let registered = discovery.scan().await.unwrap();
    let expected_id = format!("discovered_127.0.0.1_{}", addr.port());
    assert_eq!(registered, vec![expected_id.clone()]);

    let node = registry.get(&expected_id).await.unwrap();
    assert_eq!(node.model, "m1");
    assert_eq!(node.name, "Discovered-127.0.0.1");
    assert_eq!(node.capabilities, vec!["general"]);
    assert_eq!(node.max_concurrent, 1);
    assert_eq!(node.priority_weight, 1);
    assert!(node.avg_response_time > 0.0, "benchmark should seed latency");

    // A second scan finds the same endpoint but does not re-register it.
    assert!(discovery.scan().await.unwrap().is_empty());
    assert_eq!(registry.len().await, 1);
}

#[tokio::test]
async fn health_poll_stores_node_payload() {
    let addr = spawn_fake_node().await;
    let mut node = Node::new("live", "127.0.0.1", addr.port());
    node.last_seen = 0.0;
    let registry = NodeRegistry::from_nodes(vec![node]);
    let poller = HealthPoller::new(registry.clone(), NodeClient::default(), HealthPollConfig::default());

    assert_eq!(poller.poll_once().await, 1);
    let stored = registry.get("live").await.unwrap();
    assert_eq!(stored.metrics["gpu_util"], 42);
    assert!(stored.last_seen > 0.0);
}
