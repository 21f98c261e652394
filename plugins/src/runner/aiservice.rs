use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use docmigrate_core::api::{
    AgentOutput, MigrationTask, OutputSink, PipelineAgents, ScaffoldReport, SchemaDesign,
    ServiceConfig, TaskOutcome, TaskRunner, TokenUsage,
};

use super::http_client::{AiServiceClient, ServiceHttpError};

/// Billing fields any service reply may carry next to its payload.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Billing {
    #[serde(default)]
    usage: Option<TokenUsage>,
    #[serde(default)]
    cost: Option<f64>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MigrateReply {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default, alias = "output_ref")]
    output_ref: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

fn default_success() -> bool {
    true
}

/// Converts one document per request through the AI service.
pub struct AiServiceTaskRunner {
    client: AiServiceClient,
    model: String,
}

impl AiServiceTaskRunner {
    pub fn new(client: AiServiceClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    pub fn from_config(cfg: &ServiceConfig) -> Result<Self> {
        let client = AiServiceClient::new(&cfg.endpoint, cfg.api_key.clone(), cfg.timeout_ms)?;
        Ok(Self::new(client, cfg.model.clone()))
    }
}

#[async_trait]
impl TaskRunner for AiServiceTaskRunner {
    fn name(&self) -> &str {
        "aiservice"
    }

    async fn execute(&self, task: &MigrationTask, sink: &dyn OutputSink) -> Result<TaskOutcome> {
        let payload = json!({
            "sourceRef": task.source_ref,
            "targetRef": task.target_ref,
            "category": task.category,
            "model": self.model,
        });
        let reply = match self.client.post("v1/migrate", &payload).await {
            Ok(reply) => reply,
            Err(err) => return settle_http_error(err),
        };
        forward_text(&reply, &task.source_ref, sink);

        let body: MigrateReply = serde_json::from_value(reply.clone())
            .with_context(|| format!("unexpected migrate reply for {}", task.source_ref))?;
        let mut outcome = if body.success {
            TaskOutcome::succeeded(body.output_ref.unwrap_or_else(|| task.target_ref.clone()))
        } else {
            TaskOutcome::failed(body.error.unwrap_or_else(|| "service reported failure".into()))
        };

        let billing = billing_of(&reply);
        if let Some(usage) = billing.usage {
            outcome = outcome.with_usage(billing.model.unwrap_or_else(|| self.model.clone()), usage);
        }
        if let Some(cost) = billing.cost {
            outcome = outcome.with_cost(cost);
        }
        Ok(outcome)
    }
}

/// The analyze, design and scaffold stages, each one service call.
pub struct AiServiceAgents {
    client: AiServiceClient,
    model: String,
}

impl AiServiceAgents {
    pub fn new(client: AiServiceClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    pub fn from_config(cfg: &ServiceConfig) -> Result<Self> {
        let client = AiServiceClient::new(&cfg.endpoint, cfg.api_key.clone(), cfg.timeout_ms)?;
        Ok(Self::new(client, cfg.model.clone()))
    }

    async fn call<T: DeserializeOwned>(
        &self,
        path: &str,
        key: &str,
        payload: Value,
        sink: &dyn OutputSink,
    ) -> Result<AgentOutput<T>> {
        let mut reply = self.client.post(path, &payload).await?;
        forward_text(&reply, path, sink);
        let billing = billing_of(&reply);

        // Replies either wrap the payload under `key` or are the payload.
        let body = match reply.get_mut(key).map(Value::take) {
            Some(inner) => inner,
            None => reply,
        };
        let value = serde_json::from_value(body)
            .with_context(|| format!("unexpected {key} in reply from {path}"))?;

        let mut out = AgentOutput::free(value);
        if let Some(usage) = billing.usage {
            out = out.with_usage(billing.model.unwrap_or_else(|| self.model.clone()), usage);
        }
        out.cost = billing.cost;
        Ok(out)
    }
}

#[async_trait]
impl PipelineAgents for AiServiceAgents {
    fn name(&self) -> &str {
        "aiservice"
    }

    async fn analyze(&self, root: &Path, sink: &dyn OutputSink) -> Result<AgentOutput<Value>> {
        let payload = json!({ "root": root.display().to_string(), "model": self.model });
        self.call("v1/analyze", "report", payload, sink).await
    }

    async fn design_schemas(
        &self,
        report: &Value,
        sink: &dyn OutputSink,
    ) -> Result<AgentOutput<SchemaDesign>> {
        let payload = json!({ "report": report, "model": self.model });
        self.call("v1/design", "design", payload, sink).await
    }

    async fn scaffold(
        &self,
        root: &Path,
        design: &SchemaDesign,
        sink: &dyn OutputSink,
    ) -> Result<AgentOutput<ScaffoldReport>> {
        let payload = json!({
            "root": root.display().to_string(),
            "design": design,
            "model": self.model,
        });
        self.call("v1/scaffold", "scaffold", payload, sink).await
    }
}

/// Errors the service would repeat become a permanent failed outcome so the
/// executor does not retry them; anything else stays an `Err` for the
/// retry strategy.
fn settle_http_error(err: anyhow::Error) -> Result<TaskOutcome> {
    match err.downcast_ref::<ServiceHttpError>() {
        Some(http) if !http.is_retryable() => {
            tracing::debug!(kind = %http.kind(), status = ?http.status(), "service rejected task");
            Ok(TaskOutcome::failed(format!("{err:#}")).permanent())
        }
        _ => Err(err),
    }
}

fn billing_of(reply: &Value) -> Billing {
    serde_json::from_value(reply.clone()).unwrap_or_default()
}

fn forward_text(reply: &Value, source: &str, sink: &dyn OutputSink) {
    if let Some(text) = extract_textish(reply) {
        sink.on_chunk(source, &text);
    }
}

fn extract_textish(v: &Value) -> Option<String> {
    if let Some(s) = v.get("text").and_then(|x| x.as_str()) {
        return Some(s.to_string());
    }
    // OpenAI-ish: { choices: [ { message: { content: "..." } } ] }
    v.get("choices")
        .and_then(|x| x.get(0))
        .and_then(|x| x.get("message"))
        .and_then(|x| x.get("content"))
        .and_then(|x| x.as_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use docmigrate_core::api::NullSink;
    use mockito::Server;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct CaptureSink(Mutex<Vec<String>>);

    impl OutputSink for CaptureSink {
        fn on_chunk(&self, source: &str, text: &str) {
            self.0.lock().unwrap().push(format!("{source}: {text}"));
        }
    }

    fn task() -> MigrationTask {
        MigrationTask::new("docs/guide.md", "src/content/docs/guides/guide.md", "guide", 2, 3_500)
    }

    #[tokio::test]
    async fn test_runner_reports_usage_and_cost() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/v1/migrate")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"outputRef":"out/guide.md","text":"converted","usage":{"input_tokens":1200,"output_tokens":800},"cost":0.02}"#,
            )
            .create_async()
            .await;

        let runner = AiServiceTaskRunner::new(
            AiServiceClient::new(&server.url(), String::new(), 1_000).unwrap(),
            "claude-sonnet-4",
        );
        let sink = CaptureSink::default();
        let outcome = runner.execute(&task(), &sink).await.unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.output_ref.as_deref(), Some("out/guide.md"));
        assert_eq!(outcome.usage, Some(TokenUsage::new(1_200, 800)));
        assert_eq!(outcome.model.as_deref(), Some("claude-sonnet-4"));
        assert_eq!(outcome.cost, Some(0.02));
        assert_eq!(*sink.0.lock().unwrap(), vec!["docs/guide.md: converted".to_string()]);
    }

    #[tokio::test]
    async fn test_runner_maps_reported_failure() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/v1/migrate")
            .with_status(200)
            .with_body(r#"{"success":false,"error":"unsupported syntax"}"#)
            .create_async()
            .await;

        let runner = AiServiceTaskRunner::new(
            AiServiceClient::new(&server.url(), String::new(), 1_000).unwrap(),
            "claude-sonnet-4",
        );
        let outcome = runner.execute(&task(), &NullSink).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("unsupported syntax"));
        assert!(outcome.usage.is_none());
    }

    #[tokio::test]
    async fn test_runner_marks_client_errors_permanent() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/v1/migrate")
            .with_status(401)
            .with_body("invalid api key")
            .create_async()
            .await;

        let runner = AiServiceTaskRunner::new(
            AiServiceClient::new(&server.url(), String::new(), 1_000).unwrap(),
            "claude-sonnet-4",
        );
        let outcome = runner.execute(&task(), &NullSink).await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.permanent);
        assert!(outcome.error.unwrap().contains("status=401"));
    }

    #[tokio::test]
    async fn test_runner_leaves_server_errors_to_retry() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/v1/migrate")
            .with_status(503)
            .with_body("upstream said status=401")
            .create_async()
            .await;

        let runner = AiServiceTaskRunner::new(
            AiServiceClient::new(&server.url(), String::new(), 1_000).unwrap(),
            "claude-sonnet-4",
        );
        let err = runner.execute(&task(), &NullSink).await.unwrap_err();
        assert_eq!(err.downcast_ref::<ServiceHttpError>().unwrap().status(), Some(503));
    }

    #[tokio::test]
    async fn test_agents_unwrap_design_payload() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/v1/design")
            .with_status(200)
            .with_body(
                r#"{"design":{"collections":[{"name":"guides"}]},"usage":{"input_tokens":10,"output_tokens":5},"model":"claude-haiku-3-5"}"#,
            )
            .create_async()
            .await;

        let agents = AiServiceAgents::new(
            AiServiceClient::new(&server.url(), String::new(), 1_000).unwrap(),
            "claude-sonnet-4",
        );
        let out = agents
            .design_schemas(&json!({ "files": ["a.md"] }), &NullSink)
            .await
            .unwrap();
        assert_eq!(out.value.collection_names(), vec!["guides".to_string()]);
        assert_eq!(out.model.as_deref(), Some("claude-haiku-3-5"));
        assert_eq!(out.cost, None);
    }

    #[tokio::test]
    async fn test_agents_accept_bare_report() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/v1/analyze")
            .with_status(200)
            .with_body(r#"{"files":["README.md","docs/intro.md"]}"#)
            .create_async()
            .await;

        let agents = AiServiceAgents::new(
            AiServiceClient::new(&server.url(), String::new(), 1_000).unwrap(),
            "claude-sonnet-4",
        );
        let out = agents.analyze(Path::new("/repo"), &NullSink).await.unwrap();
        assert_eq!(out.value["files"][1], "docs/intro.md");
        assert!(out.usage.is_none());
    }
}
