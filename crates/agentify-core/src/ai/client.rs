//! HTTP completion client
//!
//! Posts a chat/completions request with the tool catalog and
//! `tool_choice: "auto"`. Error bodies are surfaced in full because
//! provider errors are the most common operational failure here.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::types::{CompletionRequest, CompletionResponse, CompletionService, ToolDefinition};
use crate::constants::COMPLETION_MAX_TOKENS;

pub struct HttpCompletionService {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpCompletionService {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }

    fn build_body(&self, request: &CompletionRequest) -> Value {
        let mut body = json!({
            "model": &request.model,
            "max_tokens": COMPLETION_MAX_TOKENS,
            "messages": &request.messages,
        });
        if !request.tools.is_empty() {
            body["tools"] = json!(convert_tools(&request.tools));
            body["tool_choice"] = json!("auto");
        }
        body
    }
}

/// Chat Completions tool shape: nested under "function"
fn convert_tools(tools: &[ToolDefinition]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                }
            })
        })
        .collect()
}

#[async_trait]
impl CompletionService for HttpCompletionService {
    async fn create(&self, request: CompletionRequest) -> anyhow::Result<CompletionResponse> {
        let body = self.build_body(&request);
        tracing::debug!(model = %request.model, tools = request.tools.len(), "completion request");

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("completion service returned {status}: {text}");
        }

        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::types::ChatMessage;

    fn tool(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: format!("The {name} backend"),
            parameters: json!({"type": "object"}),
        }
    }

    #[test]
    fn test_body_includes_tools_and_auto_choice() {
        let service = HttpCompletionService::new("http://localhost/v1/chat/completions", "key");
        let body = service.build_body(&CompletionRequest {
            model: "gpt-4o".to_string(),
            messages: vec![ChatMessage::system("sys"), ChatMessage::user("query")],
            tools: vec![tool("filesystem"), tool("browser")],
        });

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["tools"].as_array().unwrap().len(), 2);
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "filesystem");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "query");
    }

    #[test]
    fn test_body_without_tools_omits_tool_choice() {
        let service = HttpCompletionService::new("http://localhost", "key");
        let body = service.build_body(&CompletionRequest {
            model: "gpt-4o".to_string(),
            messages: vec![ChatMessage::user("hi")],
            tools: vec![],
        });
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
    }
}
