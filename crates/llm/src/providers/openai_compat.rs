//! OpenAI chat-completions wire format.
//!
//! Serves every backend that speaks it: OpenAI itself, the OpenRouter gateway,
//! a local LM Studio server and arbitrary compatible endpoints.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::{ProviderConfig, ProviderType};
use crate::provider::{http_client, send_json, AiProvider, LlmError};
use crate::types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ChatRole, FinishReason, ModelInfo,
    ToolCallRequest, Usage,
};

struct Ready {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    default_model: Option<String>,
    http_referer: Option<String>,
    app_title: Option<String>,
}

pub struct OpenAiCompatProvider {
    kind: ProviderType,
    ready: Option<Ready>,
}

impl OpenAiCompatProvider {
    pub fn new(kind: ProviderType) -> Self {
        Self { kind, ready: None }
    }

    fn ready(&self) -> Result<&Ready, LlmError> {
        self.ready.as_ref().ok_or(LlmError::NotInitialized(self.kind))
    }

    fn authorized(&self, ready: &Ready, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut builder = builder.header("Content-Type", "application/json");
        if let Some(key) = &ready.api_key {
            builder = builder.bearer_auth(key);
        }
        if self.kind == ProviderType::OpenRouter {
            if let Some(referer) = &ready.http_referer {
                builder = builder.header("HTTP-Referer", referer);
            }
            if let Some(title) = &ready.app_title {
                builder = builder.header("X-Title", title);
            }
        }
        builder
    }

    /// Build the request body for the chat-completions endpoint.
    pub(crate) fn build_request_body(request: &ChatCompletionRequest, model: &str) -> Value {
        let messages: Vec<Value> = request.messages.iter().map(message_to_openai).collect();

        let mut body = json!({
            "model": model,
            "messages": messages,
            "stream": false,
        });
        if let Some(t) = request.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(m) = request.max_tokens {
            body["max_tokens"] = json!(m);
        }
        if let Some(tools) = &request.tools {
            body["tools"] = tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.input_schema(),
                        }
                    })
                })
                .collect();
        }
        body
    }

    pub(crate) fn parse_response(resp: &Value, model: &str) -> Result<ChatCompletionResponse, LlmError> {
        let choice = resp["choices"]
            .get(0)
            .ok_or_else(|| LlmError::InvalidResponse("missing choices[0]".into()))?;
        let message = &choice["message"];

        let tool_calls = message["tool_calls"]
            .as_array()
            .map(|calls| {
                calls
                    .iter()
                    .map(|c| {
                        let arguments = match &c["function"]["arguments"] {
                            Value::String(s) => s.clone(),
                            Value::Null => "{}".to_string(),
                            other => other.to_string(),
                        };
                        ToolCallRequest::new(
                            c["id"].as_str().unwrap_or_default(),
                            c["function"]["name"].as_str().unwrap_or_default(),
                            arguments,
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();

        let finish_reason = match choice["finish_reason"].as_str() {
            Some("tool_calls") | Some("function_call") => FinishReason::ToolCalls,
            Some("length") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            _ => FinishReason::Stop,
        };

        let usage = resp.get("usage").filter(|u| u.is_object()).map(|u| {
            Usage::new(
                u["prompt_tokens"].as_u64().unwrap_or(0) as u32,
                u["completion_tokens"].as_u64().unwrap_or(0) as u32,
            )
        });

        Ok(ChatCompletionResponse::single(
            resp["id"].as_str().unwrap_or_default(),
            resp["model"].as_str().unwrap_or(model),
            message["content"].as_str().unwrap_or_default(),
            tool_calls,
            finish_reason,
            usage,
        ))
    }
}

fn message_to_openai(msg: &ChatMessage) -> Value {
    match msg.role {
        ChatRole::System => json!({ "role": "system", "content": msg.content }),
        ChatRole::User => json!({ "role": "user", "content": msg.content }),
        ChatRole::Assistant => {
            let calls = msg.tool_calls();
            if calls.is_empty() {
                return json!({ "role": "assistant", "content": msg.content });
            }
            let content = if msg.content.is_empty() {
                Value::Null
            } else {
                json!(msg.content)
            };
            json!({
                "role": "assistant",
                "content": content,
                "tool_calls": calls
                    .iter()
                    .map(|c| json!({
                        "id": c.id,
                        "type": "function",
                        "function": { "name": c.name, "arguments": c.arguments },
                    }))
                    .collect::<Vec<_>>(),
            })
        }
        ChatRole::Tool => json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id,
            "content": msg.content,
        }),
    }
}

#[async_trait]
impl AiProvider for OpenAiCompatProvider {
    fn provider_type(&self) -> ProviderType {
        self.kind
    }

    fn initialize(&mut self, config: &ProviderConfig) -> Result<(), LlmError> {
        if self.kind.requires_api_key() && config.api_key.is_none() {
            return Err(LlmError::NotConfigured(format!("{} requires an API key", self.kind)));
        }
        let base_url = config
            .base_url_or_default()
            .ok_or_else(|| LlmError::NotConfigured(format!("{} requires a base URL", self.kind)))?;

        self.ready = Some(Ready {
            client: http_client(config.request_timeout_secs),
            base_url,
            api_key: config.api_key.clone(),
            default_model: config.default_model.clone(),
            http_referer: config.option_str("http_referer").map(str::to_string),
            app_title: config.option_str("app_title").map(str::to_string),
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
        let url = format!("{}/models", ready.base_url);
        let resp = send_json(self.authorized(ready, ready.client.get(&url))).await?;

        let models = resp["data"]
            .as_array()
            .ok_or_else(|| LlmError::InvalidResponse("missing data[] in model list".into()))?
            .iter()
            .filter_map(|m| {
                let id = m["id"].as_str()?;
                Some(ModelInfo {
                    id: id.to_string(),
                    name: m["name"].as_str().unwrap_or(id).to_string(),
                    provider: self.kind.to_string(),
                    context_length: m["context_length"].as_u64(),
                })
            })
            .collect();
        Ok(models)
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
            .ok_or_else(|| LlmError::NotConfigured(format!("no model set for {}", self.kind)))?;

        let url = format!("{}/chat/completions", ready.base_url);
        let body = Self::build_request_body(request, &model);

        debug!(provider = %self.kind, model = %model, messages = request.messages.len(), "chat completion request");

        let resp = send_json(self.authorized(ready, ready.client.post(&url)).json(&body)).await?;
        Self::parse_response(&resp, &model)
    }
}
