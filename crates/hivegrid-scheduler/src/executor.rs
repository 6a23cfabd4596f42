//! Job execution against a single node.
//!
//! Each job kind builds one chat-completion request and shapes the reply
//! into a result payload:
//!
//! | kind      | prompt                          | temperature | max_tokens |
//! |-----------|---------------------------------|-------------|------------|
//! | chat      | caller's messages, passed through | 0.7*      | 1000*      |
//! | refactor  | rendered refactor template      | 0.1         | 4000       |
//! | lint      | rendered lint template          | 0.1         | 4000       |
//! | codegen   | rendered codegen template       | 0.3         | 2000       |
//! | doc_query | fixed question/context template | 0.5         | 1000       |
//!
//! `*` defaults, overridable from the payload.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use hivegrid_core::{Job, JobKind, Node, Payload};
use hivegrid_registry::{ChatRequest, NodeClient};

use crate::error::{SchedulerError, SchedulerResult};
use crate::prompts::{PromptRenderer, detect_language};

const CHAT_TEMPERATURE: f64 = 0.7;
const CHAT_MAX_TOKENS: u32 = 1000;
const REWRITE_TEMPERATURE: f64 = 0.1;
const REWRITE_MAX_TOKENS: u32 = 4000;
const CODEGEN_TEMPERATURE: f64 = 0.3;
const CODEGEN_MAX_TOKENS: u32 = 2000;
const DOC_QUERY_TEMPERATURE: f64 = 0.5;
const DOC_QUERY_MAX_TOKENS: u32 = 1000;
const DEFAULT_CODEGEN_LANGUAGE: &str = "python";

/// Runs a job body on an assigned node.
#[derive(Clone)]
pub struct JobExecutor {
    client: NodeClient,
    prompts: Arc<dyn PromptRenderer>,
    timeout: Duration,
}

impl JobExecutor {
    pub fn new(client: NodeClient, prompts: Arc<dyn PromptRenderer>, timeout: Duration) -> Self {
        Self {
            client,
            prompts,
            timeout,
        }
    }

    /// Execute `job` on `node` and return its result payload.
    pub async fn execute(&self, job: &Job, node: &Node) -> SchedulerResult<Payload> {
        match job.kind {
            JobKind::Chat => self.chat(job, node).await,
            JobKind::Refactor | JobKind::Lint => self.rewrite(job, node).await,
            JobKind::Codegen => self.codegen(job, node).await,
            JobKind::DocQuery => self.doc_query(job, node).await,
        }
    }

    async fn chat(&self, job: &Job, node: &Node) -> SchedulerResult<Payload> {
        let messages = job
            .payload
            .get("messages")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let request = ChatRequest {
            model: job.payload_str("model").unwrap_or(&node.model).to_string(),
            messages,
            stream: job.payload.get("stream").and_then(Value::as_bool).unwrap_or(false),
            temperature: Some(
                job.payload
                    .get("temperature")
                    .and_then(Value::as_f64)
                    .unwrap_or(CHAT_TEMPERATURE),
            ),
            max_tokens: job
                .payload
                .get("max_tokens")
                .and_then(Value::as_u64)
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(CHAT_MAX_TOKENS),
        };

        let response = self.complete(node, &request).await?;
        Ok(payload([("response", json!(response)), ("node", json!(node.name))]))
    }

    /// Refactor and lint: read a source file and ask for a rewritten copy.
    async fn rewrite(&self, job: &Job, node: &Node) -> SchedulerResult<Payload> {
        let file_path = require(job, "file_path")?;
        let content = tokio::fs::read_to_string(file_path)
            .await
            .map_err(|source| SchedulerError::Io {
                path: file_path.to_string(),
                source,
            })?;

        let language = job
            .payload_str("language")
            .unwrap_or_else(|| detect_language(Path::new(file_path), &content))
            .to_string();

        let prompt = self.prompts.render(job.kind, &language, &content);
        let request = ChatRequest::user_prompt(&node.model, prompt, REWRITE_TEMPERATURE, REWRITE_MAX_TOKENS);
        let rewritten = self.complete(node, &request).await?;

        Ok(payload([
            ("original_content", json!(content)),
            ("refactored_content", json!(rewritten)),
            ("file_path", json!(file_path)),
            ("language", json!(language)),
            ("node", json!(node.name)),
        ]))
    }

    async fn codegen(&self, job: &Job, node: &Node) -> SchedulerResult<Payload> {
        let description = require(job, "description")?;
        let language = job.payload_str("language").unwrap_or(DEFAULT_CODEGEN_LANGUAGE);

        let prompt = self.prompts.render(JobKind::Codegen, language, description);
        let request = ChatRequest::user_prompt(&node.model, prompt, CODEGEN_TEMPERATURE, CODEGEN_MAX_TOKENS);
        let code = self.complete(node, &request).await?;

        Ok(payload([
            ("generated_code", json!(code)),
            ("language", json!(language)),
            ("description", json!(description)),
            ("node", json!(node.name)),
        ]))
    }

    async fn doc_query(&self, job: &Job, node: &Node) -> SchedulerResult<Payload> {
        let query = require(job, "query")?;
        let context = job.payload_str("context").unwrap_or_default();

        let prompt = doc_query_prompt(query, context);
        let request = ChatRequest::user_prompt(&node.model, prompt, DOC_QUERY_TEMPERATURE, DOC_QUERY_MAX_TOKENS);
        let answer = self.complete(node, &request).await?;

        Ok(payload([
            ("answer", json!(answer)),
            ("query", json!(query)),
            ("node", json!(node.name)),
        ]))
    }

    async fn complete(&self, node: &Node, request: &ChatRequest) -> SchedulerResult<String> {
        Ok(self
            .client
            .chat_completion(&node.address(), request, self.timeout)
            .await?)
    }
}

/// Prompt for a documentation question over caller-supplied context.
pub fn doc_query_prompt(query: &str, context: &str) -> String {
    format!("Answer this question about the codebase:\n\nQuestion: {query}\n\nContext:\n{context}")
}

fn require<'a>(job: &'a Job, field: &'static str) -> SchedulerResult<&'a str> {
    job.payload_str(field)
        .ok_or(SchedulerError::MissingField { kind: job.kind, field })
}

fn payload<const N: usize>(entries: [(&str, Value); N]) -> Payload {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts::PromptLibrary;
    use hivegrid_core::JobPriority;
    use hivegrid_registry::NodeError;

    fn executor() -> JobExecutor {
        JobExecutor::new(
            NodeClient::default(),
            Arc::new(PromptLibrary::new()),
            Duration::from_millis(500),
        )
    }

    fn job(kind: JobKind, payload: Value) -> Job {
        let Value::Object(map) = payload else {
            panic!("payload must be an object");
        };
        Job::new("j1".into(), kind, JobPriority::Normal, map)
    }

    #[test]
    fn doc_query_prompt_layout() {
        assert_eq!(
            doc_query_prompt("what is X?", "X is a thing"),
            "Answer this question about the codebase:\n\nQuestion: what is X?\n\nContext:\nX is a thing"
        );
    }

    #[tokio::test]
    async fn missing_fields_are_reported() {
        let node = Node::new("n1", "127.0.0.1", 1);
        let exec = executor();

        let err = exec.execute(&job(JobKind::Codegen, json!({})), &node).await.unwrap_err();
        assert_eq!(err.to_string(), "codegen job is missing payload field `description`");

        let err = exec.execute(&job(JobKind::Refactor, json!({})), &node).await.unwrap_err();
        assert!(matches!(err, SchedulerError::MissingField { field: "file_path", .. }));

        let err = exec.execute(&job(JobKind::DocQuery, json!({})), &node).await.unwrap_err();
        assert!(matches!(err, SchedulerError::MissingField { field: "query", .. }));
    }

    #[tokio::test]
    async fn unreadable_source_file_fails() {
        let node = Node::new("n1", "127.0.0.1", 1);
        let j = job(JobKind::Lint, json!({"file_path": "/definitely/not/here.py"}));
        let err = executor().execute(&j, &node).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Io { .. }));
    }

    #[tokio::test]
    async fn unreachable_node_fails_chat() {
        let node = Node::new("n1", "127.0.0.1", 1);
        let j = job(JobKind::Chat, json!({"messages": [{"role": "user", "content": "hi"}]}));
        let err = executor().execute(&j, &node).await.unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::Node(NodeError::Connect { .. } | NodeError::Timeout(_))
        ));
    }
}
