//! Dispatcher end-to-end tests against in-process fake model nodes.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Json, State};
use axum::routing::{get, post};
use axum::Router;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use hivegrid_core::{ClusterConfig, Job, JobKind, JobPriority, JobStatus, Payload};
use hivegrid_scheduler::Dispatcher;

#[derive(Clone, Default)]
struct FakeNode {
    /// Prompts in the order requests arrived.
    seen: Arc<Mutex<Vec<String>>>,
    delay: Duration,
}

async fn chat(State(node): State<FakeNode>, Json(body): Json<Value>) -> Json<Value> {
    let prompt = body["messages"][0]["content"].as_str().unwrap_or_default().to_string();
    node.seen.lock().unwrap().push(prompt.clone());
    tokio::time::sleep(node.delay).await;
    Json(json!({
        "choices": [{"message": {"role": "assistant", "content": format!("done: {prompt}")}}]
    }))
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn spawn_node(node: FakeNode) -> SocketAddr {
    let app = Router::new()
        .route("/v1/chat/completions", post(chat))
        .route("/health", get(health))
        .with_state(node);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn cluster(port: u16, max_concurrent: u32, request_timeout: &str) -> ClusterConfig {
    ClusterConfig::from_toml_str(&format!(
        r#"
[cluster]
workers = 4
request_timeout = "{request_timeout}"
requeue_backoff = "20ms"

[nodes.gpu-box]
name = "GPU Box"
host = "127.0.0.1"
port = {port}
model = "m1"
capabilities = ["general"]
max_concurrent = {max_concurrent}
"#
    ))
    .unwrap()
}

fn chat_payload(text: &str) -> Payload {
    let mut payload = Payload::new();
    payload.insert("messages".into(), json!([{"role": "user", "content": text}]));
    payload
}

fn object(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected an object"),
    }
}

async fn wait_for_terminal(dispatcher: &Dispatcher, id: &str) -> Job {
    for _ in 0..400 {
        if let Some(job) = dispatcher.get_job(id).await {
            if job.status.is_terminal() {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job {id} did not finish");
}

#[tokio::test]
async fn dispatches_urgent_then_normal_then_bulk() {
    let node = FakeNode {
        delay: Duration::from_millis(50),
        ..FakeNode::default()
    };
    let addr = spawn_node(node.clone()).await;
    let dispatcher = Dispatcher::new(&cluster(addr.port(), 1, "5s"));

    let urgent = dispatcher.submit(JobKind::Chat, chat_payload("urgent"), JobPriority::Urgent).await;
    let bulk = dispatcher.submit(JobKind::Chat, chat_payload("bulk"), JobPriority::Bulk).await;
    let normal = dispatcher.submit(JobKind::Chat, chat_payload("normal"), JobPriority::Normal).await;

    dispatcher.start().await.unwrap();
    for id in [&urgent, &bulk, &normal] {
        assert_eq!(wait_for_terminal(&dispatcher, id).await.status, JobStatus::Completed);
    }
    dispatcher.stop().await.unwrap();

    let seen = node.seen.lock().unwrap().clone();
    assert_eq!(seen, vec!["urgent", "normal", "bulk"]);

    let job = dispatcher.get_job(&urgent).await.unwrap();
    let result = job.result.unwrap();
    assert_eq!(result["response"], "done: urgent");
    assert_eq!(result["node"], "GPU Box");
    assert!(job.started_at.unwrap() >= job.created_at);
    assert!(job.completed_at.unwrap() >= job.started_at.unwrap());

    let status = dispatcher.get_status().await;
    assert_eq!(status.stats.jobs_processed, 3);
    assert_eq!(status.completed_jobs, 3);
    assert_eq!(status.nodes["gpu-box"].total_jobs, 3);
    assert_eq!(status.nodes["gpu-box"].success_rate, 1.0);
    assert!(status.nodes["gpu-box"].avg_response_time > 0.0);
}

#[tokio::test]
async fn timed_out_call_fails_job_and_frees_node() {
    let node = FakeNode {
        delay: Duration::from_secs(3),
        ..FakeNode::default()
    };
    let addr = spawn_node(node).await;
    let dispatcher = Dispatcher::new(&cluster(addr.port(), 1, "200ms"));
    dispatcher.start().await.unwrap();

    let id = dispatcher.submit(JobKind::Chat, chat_payload("slow"), JobPriority::Normal).await;
    let job = wait_for_terminal(&dispatcher, &id).await;

    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.unwrap();
    assert!(error.contains("timed out"), "unexpected error: {error}");

    dispatcher.stop().await.unwrap();
    let node = dispatcher.registry().get("gpu-box").await.unwrap();
    assert_eq!(node.active_jobs, 0);
    assert_eq!(node.failed_jobs, 1);
    assert_eq!(dispatcher.get_status().await.stats.jobs_failed, 1);
}

#[tokio::test]
async fn refactor_job_reads_source_file() {
    let addr = spawn_node(FakeNode::default()).await;
    let dispatcher = Dispatcher::new(&cluster(addr.port(), 1, "5s"));
    dispatcher.start().await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("util.py");
    std::fs::write(&path, "def add(a, b): return a+b\n").unwrap();

    let payload = object(json!({"file_path": path.to_str().unwrap()}));
    let id = dispatcher.submit(JobKind::Refactor, payload, JobPriority::Normal).await;
    let job = wait_for_terminal(&dispatcher, &id).await;
    dispatcher.stop().await.unwrap();

    assert_eq!(job.status, JobStatus::Completed, "error: {:?}", job.error);
    let result = job.result.unwrap();
    assert_eq!(result["original_content"], "def add(a, b): return a+b\n");
    assert_eq!(result["language"], "python");
    let rewritten = result["refactored_content"].as_str().unwrap();
    assert!(rewritten.starts_with("done: You are an expert Python developer."));
    assert!(rewritten.contains("def add(a, b)"));
}

#[tokio::test]
async fn codegen_and_doc_query_results() {
    let addr = spawn_node(FakeNode::default()).await;
    let dispatcher = Dispatcher::new(&cluster(addr.port(), 2, "5s"));
    dispatcher.start().await.unwrap();

    let codegen = dispatcher
        .submit(
            JobKind::Codegen,
            object(json!({"description": "fizzbuzz", "language": "typescript"})),
            JobPriority::Normal,
        )
        .await;
    let query = dispatcher
        .submit(
            JobKind::DocQuery,
            object(json!({"query": "where is main?", "context": "src/main.rs"})),
            JobPriority::Normal,
        )
        .await;

    let codegen = wait_for_terminal(&dispatcher, &codegen).await.result.unwrap();
    assert_eq!(codegen["language"], "typescript");
    assert_eq!(codegen["description"], "fizzbuzz");
    assert!(codegen["generated_code"].as_str().unwrap().contains("REQUIREMENT: fizzbuzz"));

    let answer = wait_for_terminal(&dispatcher, &query).await.result.unwrap();
    assert_eq!(answer["query"], "where is main?");
    assert_eq!(
        answer["answer"],
        "done: Answer this question about the codebase:\n\nQuestion: where is main?\n\nContext:\nsrc/main.rs"
    );

    dispatcher.stop().await.unwrap();
}

#[tokio::test]
async fn active_counts_match_active_table() {
    let node = FakeNode {
        delay: Duration::from_millis(100),
        ..FakeNode::default()
    };
    let addr = spawn_node(node).await;
    let dispatcher = Dispatcher::new(&cluster(addr.port(), 2, "5s"));
    dispatcher.start().await.unwrap();

    let mut ids = Vec::new();
    for i in 0..6 {
        ids.push(
            dispatcher
                .submit(JobKind::Chat, chat_payload(&format!("job {i}")), JobPriority::Normal)
                .await,
        );
    }

    for _ in 0..20 {
        let status = dispatcher.get_status().await;
        let node = &status.nodes["gpu-box"];
        assert!(node.active_jobs <= 2);
        assert_eq!(node.active_jobs as usize, status.active_jobs);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    for id in &ids {
        assert_eq!(wait_for_terminal(&dispatcher, id).await.status, JobStatus::Completed);
    }
    dispatcher.stop().await.unwrap();
}

#[tokio::test]
async fn stop_waits_for_in_flight_jobs() {
    let node = FakeNode {
        delay: Duration::from_millis(300),
        ..FakeNode::default()
    };
    let addr = spawn_node(node).await;
    let dispatcher = Dispatcher::new(&cluster(addr.port(), 1, "5s"));
    dispatcher.start().await.unwrap();

    let id = dispatcher.submit(JobKind::Chat, chat_payload("drain me"), JobPriority::Normal).await;
    for _ in 0..100 {
        if dispatcher.get_job(&id).await.unwrap().status == JobStatus::Running {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    dispatcher.stop().await.unwrap();
    let job = dispatcher.get_job(&id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(dispatcher.active_jobs().await.is_empty());
}
