//! Summarization agent.
//!
//! Asks the OpenAI Responses API (with web search enabled) for a short summary
//! of an article URL.

use crate::config::Config;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Timeout for one summarization request, web search included
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("OpenAI API error: {status} - {body}")]
    Api { status: u16, body: String },
    #[error("OpenAI API error: {0}")]
    Provider(String),
    #[error("OpenAI API response not completed: {0}")]
    NotCompleted(String),
    #[error("no summary found in response")]
    NoSummary,
    #[error("configuration error: {0}")]
    ConfigError(#[from] crate::config::ConfigError),
}

/// Something that can summarize an article given its URL
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, url: &str) -> Result<String, AgentError>;
}

/// Reply of the Responses API, reduced to the fields we read
#[derive(Debug, Deserialize)]
pub struct ResponsesReply {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
    #[serde(default)]
    pub output: Vec<OutputItem>,
}

#[derive(Debug, Deserialize)]
pub struct OutputItem {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: String,
}

impl ResponsesReply {
    /// The first assistant `output_text`, or why there is none
    pub fn into_summary(self) -> Result<String, AgentError> {
        if let Some(error) = self.error.filter(|e| !e.is_null()) {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(AgentError::Provider(message));
        }
        if self.status != "completed" {
            return Err(AgentError::NotCompleted(self.status));
        }
        self.output
            .into_iter()
            .filter(|item| item.kind == "message" && item.role.as_deref() == Some("assistant"))
            .flat_map(|item| item.content)
            .find(|part| part.kind == "output_text")
            .map(|part| part.text)
            .ok_or(AgentError::NoSummary)
    }
}

/// Summarizer backed by the OpenAI Responses API
pub struct OpenAiSummarizer {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    prompt: String,
}

impl OpenAiSummarizer {
    pub fn new(config: &Config) -> Result<Self, AgentError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/v1/responses", config.api.base_url.trim_end_matches('/')),
            api_key: config.api_key().ok().map(str::to_string),
            model: config.agent.model.clone(),
            prompt: config.agent.prompt.clone(),
        })
    }

    fn request_body(&self, url: &str) -> serde_json::Value {
        json!({
            "model": self.model,
            "tools": [{ "type": "web_search_preview" }],
            "input": format!(
                "{} {} and don't include any other text or links in your response",
                self.prompt, url
            ),
        })
    }
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(&self, url: &str) -> Result<String, AgentError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| crate::config::ConfigError::MissingApiKey("openai".to_string()))?;

        debug!(url, model = %self.model, "requesting summary");
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&self.request_body(url))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let reply: ResponsesReply = response.json().await?;
        reply.into_summary()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn completed_reply(text: &str) -> serde_json::Value {
        json!({
            "id": "resp_1",
            "object": "response",
            "status": "completed",
            "error": null,
            "model": "gpt-4.1",
            "output": [
                { "type": "web_search_call", "id": "ws_1", "status": "completed" },
                {
                    "type": "message",
                    "id": "msg_1",
                    "status": "completed",
                    "role": "assistant",
                    "content": [
                        { "type": "output_text", "text": text, "annotations": [] }
                    ]
                }
            ]
        })
    }

    fn summarizer_for(server: &MockServer, key: Option<&str>) -> OpenAiSummarizer {
        let mut config = Config::default();
        config.api.base_url = server.uri();
        config.api.openai_key = key.map(str::to_string);
        OpenAiSummarizer::new(&config).unwrap()
    }

    #[test]
    fn test_reply_extracts_assistant_text() {
        let reply: ResponsesReply = serde_json::from_value(completed_reply("Short.")).unwrap();
        assert_eq!(reply.into_summary().unwrap(), "Short.");
    }

    #[test]
    fn test_reply_error_field() {
        let reply: ResponsesReply = serde_json::from_value(json!({
            "status": "failed",
            "error": { "code": "server_error", "message": "boom" },
            "output": []
        }))
        .unwrap();
        assert!(matches!(reply.into_summary(), Err(AgentError::Provider(m)) if m == "boom"));
    }

    #[test]
    fn test_reply_not_completed() {
        let reply: ResponsesReply =
            serde_json::from_value(json!({ "status": "incomplete", "output": [] })).unwrap();
        assert!(matches!(reply.into_summary(), Err(AgentError::NotCompleted(s)) if s == "incomplete"));
    }

    #[test]
    fn test_reply_without_text() {
        let reply: ResponsesReply = serde_json::from_value(json!({
            "status": "completed",
            "output": [{ "type": "message", "role": "user", "content": [] }]
        }))
        .unwrap();
        assert!(matches!(reply.into_summary(), Err(AgentError::NoSummary)));
    }

    #[tokio::test]
    async fn test_summarize_against_mock_api() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/responses"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completed_reply("It works.")))
            .expect(1)
            .mount(&server)
            .await;

        let summarizer = summarizer_for(&server, Some("sk-test"));
        let summary = summarizer.summarize("http://a.test").await.unwrap();
        assert_eq!(summary, "It works.");

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["model"], "gpt-4.1");
        assert_eq!(body["tools"][0]["type"], "web_search_preview");
        assert!(body["input"].as_str().unwrap().contains("http://a.test"));
    }

    #[tokio::test]
    async fn test_summarize_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let summarizer = summarizer_for(&server, Some("sk-test"));
        let err = summarizer.summarize("http://a.test").await.unwrap_err();
        assert!(matches!(err, AgentError::Api { status: 429, ref body } if body == "slow down"));
    }

    #[tokio::test]
    async fn test_summarize_without_key() {
        let server = MockServer::start().await;
        for key in [None, Some("")] {
            let summarizer = summarizer_for(&server, key);
            let err = summarizer.summarize("http://a.test").await.unwrap_err();
            assert!(matches!(err, AgentError::ConfigError(_)));
        }
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
