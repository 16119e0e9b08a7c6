//! Anthropic Messages API adapter.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::{ProviderConfig, ProviderType};
use crate::provider::{arguments_to_value, http_client, send_json, AiProvider, LlmError};
use crate::types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ChatRole, FinishReason, ModelInfo,
    ToolCallRequest, Usage,
};

const ANTHROPIC_VERSION: &str = "2023-06-01";
/// The Messages API requires `max_tokens`.
const DEFAULT_MAX_TOKENS: u32 = 4096;

struct Ready {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    default_model: Option<String>,
}

pub struct AnthropicProvider {
    ready: Option<Ready>,
}

impl AnthropicProvider {
    pub fn new() -> Self {
        Self { ready: None }
    }

    fn ready(&self) -> Result<&Ready, LlmError> {
        self.ready
            .as_ref()
            .ok_or(LlmError::NotInitialized(ProviderType::Anthropic))
    }

    fn headers(ready: &Ready, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("x-api-key", &ready.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
    }

    /// Build the request body for `/v1/messages`.
    ///
    /// System messages move to the top-level `system` field. Tool results become
    /// `tool_result` blocks in a user turn, and consecutive results share one turn.
    pub(crate) fn build_request_body(request: &ChatCompletionRequest, model: &str) -> Value {
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str())
            .collect();

        let mut messages: Vec<Value> = Vec::new();
        for msg in request.messages.iter().filter(|m| m.role != ChatRole::System) {
            if msg.role == ChatRole::Tool {
                let block = json!({
                    "type": "tool_result",
                    "tool_use_id": msg.tool_call_id,
                    "content": msg.content,
                });
                if let Some(last) = messages.last_mut() {
                    let last_is_results = last["role"] == "user"
                        && last["content"]
                            .as_array()
                            .is_some_and(|b| b.iter().all(|b| b["type"] == "tool_result"));
                    if last_is_results {
                        if let Some(blocks) = last["content"].as_array_mut() {
                            blocks.push(block);
                            continue;
                        }
                    }
                }
                messages.push(json!({ "role": "user", "content": [block] }));
                continue;
            }
            messages.push(message_to_anthropic(msg));
        }

        let mut body = json!({
            "model": model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        });
        if !system.is_empty() {
            body["system"] = json!(system.join("\n\n"));
        }
        if let Some(t) = request.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(tools) = &request.tools {
            body["tools"] = tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.input_schema(),
                    })
                })
                .collect();
        }
        body
    }

    pub(crate) fn parse_response(resp: &Value, model: &str) -> Result<ChatCompletionResponse, LlmError> {
        let blocks = resp["content"]
            .as_array()
            .ok_or_else(|| LlmError::InvalidResponse("missing content[]".into()))?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for block in blocks {
            match block["type"].as_str() {
                Some("text") => text.push_str(block["text"].as_str().unwrap_or_default()),
                Some("tool_use") => tool_calls.push(ToolCallRequest::new(
                    block["id"].as_str().unwrap_or_default(),
                    block["name"].as_str().unwrap_or_default(),
                    block["input"].to_string(),
                )),
                _ => {}
            }
        }

        let finish_reason = match resp["stop_reason"].as_str() {
            Some("tool_use") => FinishReason::ToolCalls,
            Some("max_tokens") => FinishReason::Length,
            Some("refusal") => FinishReason::ContentFilter,
            _ => FinishReason::Stop,
        };

        let usage = resp.get("usage").filter(|u| u.is_object()).map(|u| {
            Usage::new(
                u["input_tokens"].as_u64().unwrap_or(0) as u32,
                u["output_tokens"].as_u64().unwrap_or(0) as u32,
            )
        });

        Ok(ChatCompletionResponse::single(
            resp["id"].as_str().unwrap_or_default(),
            resp["model"].as_str().unwrap_or(model),
            text,
            tool_calls,
            finish_reason,
            usage,
        ))
    }
}

impl Default for AnthropicProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn message_to_anthropic(msg: &ChatMessage) -> Value {
    match msg.role {
        ChatRole::Assistant if !msg.tool_calls().is_empty() => {
            let mut blocks: Vec<Value> = Vec::new();
            if !msg.content.is_empty() {
                blocks.push(json!({ "type": "text", "text": msg.content }));
            }
            for tc in msg.tool_calls() {
                blocks.push(json!({
                    "type": "tool_use",
                    "id": tc.id,
                    "name": tc.name,
                    "input": arguments_to_value(&tc.arguments),
                }));
            }
            json!({ "role": "assistant", "content": blocks })
        }
        ChatRole::Assistant => json!({ "role": "assistant", "content": msg.content }),
        _ => json!({ "role": "user", "content": msg.content }),
    }
}

#[async_trait]
impl AiProvider for AnthropicProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Anthropic
    }

    fn initialize(&mut self, config: &ProviderConfig) -> Result<(), LlmError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| LlmError::NotConfigured("ANTHROPIC_API_KEY not set".into()))?;
        let base_url = config
            .base_url_or_default()
            .unwrap_or_else(|| "https://api.anthropic.com".to_string());

        self.ready = Some(Ready {
            client: http_client(config.request_timeout_secs),
            api_key,
            base_url,
            default_model: config.default_model.clone(),
        });
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.is_some()
    }

    fn default_model(&self) -> Option<String> {
        self.ready.as_ref().and_then(|r| r.default_model.clone())
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, LlmError> {
        let ready = self.ready()?;
        let url = format!("{}/v1/models", ready.base_url);
        let resp = send_json(Self::headers(ready, ready.client.get(&url))).await?;

        Ok(resp["data"]
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| {
                        let id = m["id"].as_str()?;
                        Some(ModelInfo {
                            id: id.to_string(),
                            name: m["display_name"].as_str().unwrap_or(id).to_string(),
                            provider: ProviderType::Anthropic.to_string(),
                            context_length: None,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_chat_completion(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, LlmError> {
        let ready = self.ready()?;
        let model = request
            .model
            .clone()
            .or_else(|| ready.default_model.clone())
            .ok_or_else(|| LlmError::NotConfigured("no model set for anthropic".into()))?;

        let url = format!("{}/v1/messages", ready.base_url);
        let body = Self::build_request_body(request, &model);

        debug!(provider = "anthropic", model = %model, messages = request.messages.len(), "chat completion request");

        let resp = send_json(Self::headers(ready, ready.client.post(&url)).json(&body)).await?;
        Self::parse_response(&resp, &model)
    }
}
