use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::debug;

use super::{Message, MessageContent, Provider, Role};
use crate::{
    arguments::Arguments,
    config::AnthropicConfig,
    error::{Error, Result},
    registry::OperationDescriptor,
};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Messages API with tool use.
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    config: AnthropicConfig,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicConfig) -> Result<Self> {
        let api_key = config.require_api_key()?.to_string();
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            config,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn messages_to_anthropic_spec(messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|message| {
                let role = match message.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                let content: Vec<Value> = message
                    .content
                    .iter()
                    .map(|content| match content {
                        MessageContent::Text { text } => json!({
                            "type": "text",
                            "text": text,
                        }),
                        MessageContent::ToolRequest(request) => json!({
                            "type": "tool_use",
                            "id": request.id,
                            "name": request.name,
                            "input": request.arguments,
                        }),
                        MessageContent::ToolResult(result) => json!({
                            "type": "tool_result",
                            "tool_use_id": result.id,
                            "content": result.content,
                            "is_error": result.is_error,
                        }),
                    })
                    .collect();
                json!({ "role": role, "content": content })
            })
            .collect()
    }

    fn tools_to_anthropic_spec(operations: &[OperationDescriptor]) -> Vec<Value> {
        operations
            .iter()
            .map(|op| {
                json!({
                    "name": op.name,
                    "description": op.description,
                    "input_schema": op.input_schema(),
                })
            })
            .collect()
    }

    fn response_to_message(response: &Value) -> Result<Message> {
        let blocks = response
            .get("content")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::Model("Invalid response format from Anthropic API".into()))?;

        let mut message = Message::assistant();
        for block in blocks {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    let text = block.get("text").and_then(Value::as_str).unwrap_or_default();
                    message = message.with_text(text);
                }
                Some("tool_use") => {
                    let id = block.get("id").and_then(Value::as_str);
                    let name = block.get("name").and_then(Value::as_str);
                    let (Some(id), Some(name)) = (id, name) else {
                        return Err(Error::Model("tool_use block without id or name".into()));
                    };
                    let input = block.get("input").cloned().unwrap_or(Value::Null);
                    let arguments = Arguments::try_from(input)
                        .map_err(|e| Error::Model(format!("Invalid input for {name}: {e}")))?;
                    message = message.with_tool_request(id, name, arguments);
                }
                other => debug!("Skipping content block of type {:?}", other),
            }
        }
        Ok(message)
    }

    async fn post(&self, payload: Value) -> Result<Value> {
        let url = format!("{}/v1/messages", self.config.host.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Model(format!("Request to {url} failed: {e}")))?;

        match response.status() {
            StatusCode::OK => response
                .json()
                .await
                .map_err(|e| Error::Model(format!("Invalid JSON from Anthropic API: {e}"))),
            status => {
                let error_text = response.text().await.unwrap_or_default();
                let detail = serde_json::from_str::<Value>(&error_text)
                    .ok()
                    .and_then(|v| {
                        v.pointer("/error/message")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                    })
                    .unwrap_or(error_text);
                Err(Error::Model(format!("Request failed: {status} - {detail}")))
            }
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        operations: &[OperationDescriptor],
    ) -> Result<Message> {
        let mut payload = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "messages": Self::messages_to_anthropic_spec(messages),
        });
        if let Value::Object(body) = &mut payload {
            if !system.is_empty() {
                body.insert("system".into(), json!(system));
            }
            if !operations.is_empty() {
                body.insert(
                    "tools".into(),
                    Value::Array(Self::tools_to_anthropic_spec(operations)),
                );
            }
        }

        let response = self.post(payload).await?;
        Self::response_to_message(&response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invocation::InvocationResult;
    use crate::registry::{ParamType, Parameter};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup_mock_server(status: u16, response_body: Value) -> (MockServer, AnthropicProvider) {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test_api_key"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .respond_with(ResponseTemplate::new(status).set_body_json(response_body))
            .mount(&mock_server)
            .await;

        let provider = AnthropicProvider::new(config(&mock_server)).unwrap();
        (mock_server, provider)
    }

    fn config(server: &MockServer) -> AnthropicConfig {
        AnthropicConfig {
            api_key: Some("test_api_key".into()),
            host: server.uri(),
            ..AnthropicConfig::default()
        }
    }

    fn forecast_operation() -> OperationDescriptor {
        OperationDescriptor::new("get_weather_forecast", "Forecast")
            .with_parameter(Parameter::optional("location", ParamType::String))
    }

    #[tokio::test]
    async fn test_complete_text() {
        let (_, provider) = setup_mock_server(
            200,
            json!({
                "id": "msg_123",
                "type": "message",
                "role": "assistant",
                "content": [{"type": "text", "text": "Hello! How can I help?"}],
                "stop_reason": "end_turn"
            }),
        )
        .await;

        let message = provider
            .complete("system", &[Message::user().with_text("Hello?")], &[])
            .await
            .unwrap();
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.text(), "Hello! How can I help?");
        assert!(!message.has_tool_requests());
    }

    #[tokio::test]
    async fn test_complete_tool_use() {
        let (_, provider) = setup_mock_server(
            200,
            json!({
                "content": [
                    {"type": "text", "text": "Checking the forecast."},
                    {
                        "type": "tool_use",
                        "id": "toolu_01",
                        "name": "get_weather_forecast",
                        "input": {"location": "Ames, Iowa", "days": 3}
                    }
                ],
                "stop_reason": "tool_use"
            }),
        )
        .await;

        let message = provider
            .complete(
                "system",
                &[Message::user().with_text("Forecast for Ames?")],
                &[forecast_operation()],
            )
            .await
            .unwrap();
        let invocations = message.invocations();
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].id, "toolu_01");
        assert_eq!(
            invocations[0].arguments.get_string("location").as_deref(),
            Some("Ames, Iowa")
        );
    }

    #[tokio::test]
    async fn test_request_carries_tools_and_tool_results() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(body_partial_json(json!({
                "system": "be helpful",
                "tools": [{"name": "get_weather_forecast"}],
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"content": [{"type": "text", "text": "Sunny."}]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let provider = AnthropicProvider::new(config(&server)).unwrap();
        let messages = vec![
            Message::user().with_text("Forecast?"),
            Message::assistant().with_tool_request(
                "toolu_01",
                "get_weather_forecast",
                Arguments::new().set("location", "Ames"),
            ),
            Message::user()
                .with_tool_result(&InvocationResult::success("toolu_01", json!({"daily": {}}))),
        ];
        let message = provider
            .complete("be helpful", &messages, &[forecast_operation()])
            .await
            .unwrap();
        assert_eq!(message.text(), "Sunny.");

        let spec = AnthropicProvider::messages_to_anthropic_spec(&messages);
        assert_eq!(spec[1]["content"][0]["type"], "tool_use");
        assert_eq!(spec[2]["content"][0]["tool_use_id"], "toolu_01");
        assert_eq!(spec[2]["content"][0]["is_error"], false);
    }

    #[tokio::test]
    async fn test_error_status_is_a_model_error() {
        let (_, provider) = setup_mock_server(
            400,
            json!({
                "type": "error",
                "error": {"type": "invalid_request_error", "message": "max_tokens too large"}
            }),
        )
        .await;

        let err = provider
            .complete("", &[Message::user().with_text("Hi")], &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Model);
        assert!(err.to_string().contains("max_tokens too large"));
    }

    #[test]
    fn test_missing_api_key() {
        let err = AnthropicProvider::new(AnthropicConfig::default())
            .err()
            .unwrap();
        assert!(err.to_string().contains("ANTHROPIC_API_KEY"));
    }
}
