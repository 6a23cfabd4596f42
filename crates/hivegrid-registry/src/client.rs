//! HTTP client for the node protocol.
//!
//! Nodes expose an OpenAI-style surface:
//!
//! - `GET  /health`               → arbitrary JSON health object
//! - `GET  /v1/models`            → `{"data": [{"id": "<model>"}, ...]}`
//! - `POST /v1/chat/completions`  → `{"choices": [{"message": {"content": "..."}}]}`
//!
//! Every call opens a fresh HTTP/1 connection and runs under a hard
//! timeout; a timeout is reported like any other failure.

use std::time::{Duration, Instant};

use bytes::Bytes;
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HOST, USER_AGENT};
use http::{Method, Request};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tracing::debug;

use hivegrid_core::{Node, Payload};

use crate::error::{NodeError, NodeResult};

const HEALTH_PATH: &str = "/health";
const MODELS_PATH: &str = "/v1/models";
const CHAT_PATH: &str = "/v1/chat/completions";

/// Prompt sent when benchmarking a freshly discovered node.
const BENCHMARK_PROMPT: &str = "Hello, world!";

/// Body of a chat-completion request.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    /// Chat messages, passed through verbatim.
    pub messages: Vec<Value>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    pub max_tokens: u32,
}

impl ChatRequest {
    /// A non-streaming request carrying a single user message.
    pub fn user_prompt(model: impl Into<String>, content: impl Into<String>, temperature: f64, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            messages: vec![json!({"role": "user", "content": content.into()})],
            stream: false,
            temperature: Some(temperature),
            max_tokens,
        }
    }
}

/// Client for model-serving nodes.
#[derive(Debug, Clone, Default)]
pub struct NodeClient {
    api_key: Option<String>,
}

impl NodeClient {
    /// Create a client; `api_key` is sent as a bearer token when set.
    pub fn new(api_key: Option<String>) -> Self {
        Self { api_key }
    }

    /// Fetch a node's health object.
    ///
    /// Non-object bodies are wrapped as `{"health": <value>}`.
    pub async fn health(&self, address: &str, timeout: Duration) -> NodeResult<Payload> {
        match self.get_json(address, HEALTH_PATH, timeout).await? {
            Value::Object(map) => Ok(map),
            other => {
                let mut map = Payload::new();
                map.insert("health".to_string(), other);
                Ok(map)
            }
        }
    }

    /// List the model IDs a node serves.
    pub async fn list_models(&self, address: &str, timeout: Duration) -> NodeResult<Vec<String>> {
        let body = self.get_json(address, MODELS_PATH, timeout).await?;
        let data = body
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| NodeError::Malformed("models response has no `data` array".to_string()))?;

        Ok(data
            .iter()
            .filter_map(|m| m.get("id").and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }

    /// Run a chat completion and return the first choice's text.
    pub async fn chat_completion(
        &self,
        address: &str,
        request: &ChatRequest,
        timeout: Duration,
    ) -> NodeResult<String> {
        let body = serde_json::to_value(request)?;
        let response = self.post_json(address, CHAT_PATH, &body, timeout).await?;
        extract_content(&response)
    }

    /// Send one minimal completion and measure its wall-clock latency.
    pub async fn benchmark(&self, node: &Node, timeout: Duration) -> NodeResult<Duration> {
        let request = ChatRequest {
            model: node.model.clone(),
            messages: vec![json!({"role": "user", "content": BENCHMARK_PROMPT})],
            stream: false,
            temperature: None,
            max_tokens: 10,
        };
        let body = serde_json::to_value(&request)?;

        let started = Instant::now();
        self.post_json(&node.address(), CHAT_PATH, &body, timeout).await?;
        Ok(started.elapsed())
    }

    pub async fn get_json(&self, address: &str, path: &str, timeout: Duration) -> NodeResult<Value> {
        self.send(Method::GET, address, path, None, timeout).await
    }

    pub async fn post_json(
        &self,
        address: &str,
        path: &str,
        body: &Value,
        timeout: Duration,
    ) -> NodeResult<Value> {
        let bytes = serde_json::to_vec(body)?;
        self.send(Method::POST, address, path, Some(bytes), timeout).await
    }

    async fn send(
        &self,
        method: Method,
        address: &str,
        path: &str,
        body: Option<Vec<u8>>,
        timeout: Duration,
    ) -> NodeResult<Value> {
        let exchange = async {
            let stream = TcpStream::connect(address)
                .await
                .map_err(|source| NodeError::Connect {
                    address: address.to_string(),
                    source,
                })?;

            let io = TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(NodeError::Handshake)?;

            // Drive the connection in the background.
            tokio::spawn(async move {
                if let Err(e) = conn.await {
                    debug!(error = %e, "node connection closed with error");
                }
            });

            let mut builder = Request::builder()
                .method(method.clone())
                .uri(path)
                .header(HOST, address)
                .header(USER_AGENT, "hivegrid/0.1")
                .header(ACCEPT, "application/json");
            if let Some(key) = &self.api_key {
                builder = builder.header(AUTHORIZATION, format!("Bearer {key}"));
            }
            let payload = match body {
                Some(bytes) => {
                    builder = builder.header(CONTENT_TYPE, "application/json");
                    Full::new(Bytes::from(bytes))
                }
                None => Full::new(Bytes::new()),
            };
            let req = builder
                .body(payload)
                .map_err(|e| NodeError::Request(e.to_string()))?;

            let resp = sender
                .send_request(req)
                .await
                .map_err(|e| NodeError::Request(e.to_string()))?;

            let status = resp.status();
            if !status.is_success() {
                debug!(%address, %path, %status, "node returned non-2xx");
                return Err(NodeError::Status(status.as_u16()));
            }

            let bytes = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| NodeError::Request(e.to_string()))?
                .to_bytes();
            Ok(serde_json::from_slice(&bytes)?)
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                debug!(%address, %path, ?timeout, "node request timed out");
                Err(NodeError::Timeout(timeout))
            }
        }
    }
}

/// Pull `choices[0].message.content` out of a completion response.
pub fn extract_content(response: &Value) -> NodeResult<String> {
    response
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| NodeError::Malformed("completion has no choices[0].message.content".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_content_reads_first_choice() {
        let resp = json!({
            "choices": [
                {"message": {"role": "assistant", "content": "first"}},
                {"message": {"role": "assistant", "content": "second"}}
            ]
        });
        assert_eq!(extract_content(&resp).unwrap(), "first");
    }

    #[test]
    fn extract_content_rejects_missing_choices() {
        let err = extract_content(&json!({"choices": []})).unwrap_err();
        assert!(matches!(err, NodeError::Malformed(_)));

        let err = extract_content(&json!({"error": "overloaded"})).unwrap_err();
        assert!(matches!(err, NodeError::Malformed(_)));
    }

    #[test]
    fn user_prompt_request_shape() {
        let req = ChatRequest::user_prompt("m1", "hi", 0.1, 4000);
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["model"], "m1");
        assert_eq!(v["stream"], false);
        assert_eq!(v["temperature"], 0.1);
        assert_eq!(v["max_tokens"], 4000);
        assert_eq!(v["messages"][0]["role"], "user");
        assert_eq!(v["messages"][0]["content"], "hi");
    }

    #[test]
    fn temperature_omitted_when_unset() {
        let req = ChatRequest {
            model: "m1".into(),
            messages: vec![],
            stream: false,
            temperature: None,
            max_tokens: 10,
        };
        let v = serde_json::to_value(&req).unwrap();
        assert!(v.get("temperature").is_none());
    }

    #[tokio::test]
    async fn connect_failure_is_reported() {
        // Port 1 on localhost is essentially never listening.
        let client = NodeClient::default();
        let err = client
            .get_json("127.0.0.1:1", "/health", Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Connect { .. } | NodeError::Timeout(_)));
    }
}
