use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::{ProviderConfig, ProviderType};
use crate::provider::{arguments_to_value, http_client, send_json, AiProvider, LlmError};
use crate::types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ChatRole, FinishReason, ModelInfo,
    ToolCallRequest, Usage,
};

struct Ready {
    client: reqwest::Client,
    base_url: String,
    default_model: Option<String>,
}

/// Local Ollama server via `/api/chat`.
pub struct OllamaProvider {
    ready: Option<Ready>,
}

impl OllamaProvider {
    pub fn new() -> Self {
        Self { ready: None }
    }

    fn ready(&self) -> Result<&Ready, LlmError> {
        self.ready
            .as_ref()
            .ok_or(LlmError::NotInitialized(ProviderType::Ollama))
    }

    pub(crate) fn build_request_body(request: &ChatCompletionRequest, model: &str) -> Value {
        let messages: Vec<Value> = request.messages.iter().map(message_to_ollama).collect();

        let mut options = json!({});
        if let Some(t) = request.temperature {
            options["temperature"] = json!(t);
        }
        if let Some(m) = request.max_tokens {
            options["num_predict"] = json!(m);
        }

        let mut body = json!({
            "model": model,
            "messages": messages,
            "stream": false,
            "options": options,
        });
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
        let message = resp
            .get("message")
            .ok_or_else(|| LlmError::InvalidResponse("missing message".into()))?;

        // Ollama does not assign call ids; synthesize stable ones per response.
        let tool_calls: Vec<ToolCallRequest> = message["tool_calls"]
            .as_array()
            .map(|calls| {
                calls
                    .iter()
                    .enumerate()
                    .map(|(n, c)| {
                        ToolCallRequest::new(
                            format!("call_{n}"),
                            c["function"]["name"].as_str().unwrap_or_default(),
                            c["function"]["arguments"].to_string(),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();

        let finish_reason = match resp["done_reason"].as_str() {
            Some("length") => FinishReason::Length,
            _ => FinishReason::Stop,
        };

        let usage = resp["prompt_eval_count"].as_u64().map(|prompt| {
            Usage::new(prompt as u32, resp["eval_count"].as_u64().unwrap_or(0) as u32)
        });

        Ok(ChatCompletionResponse::single(
            resp["created_at"].as_str().unwrap_or_default(),
            resp["model"].as_str().unwrap_or(model),
            message["content"].as_str().unwrap_or_default(),
            tool_calls,
            finish_reason,
            usage,
        ))
    }
}

impl Default for OllamaProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn message_to_ollama(msg: &ChatMessage) -> Value {
    let role = match msg.role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
        ChatRole::Tool => "tool",
    };
    let mut value = json!({ "role": role, "content": msg.content });
    if !msg.tool_calls().is_empty() {
        value["tool_calls"] = msg
            .tool_calls()
            .iter()
            .map(|c| {
                json!({
                    "function": { "name": c.name, "arguments": arguments_to_value(&c.arguments) }
                })
            })
            .collect();
    }
    value
}

#[async_trait]
impl AiProvider for OllamaProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Ollama
    }

    fn initialize(&mut self, config: &ProviderConfig) -> Result<(), LlmError> {
        let base_url = config
            .base_url_or_default()
            .ok_or_else(|| LlmError::NotConfigured("OLLAMA_URL not set".into()))?;
        self.ready = Some(Ready {
            client: http_client(config.request_timeout_secs),
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
        let url = format!("{}/api/tags", ready.base_url);
        let resp = send_json(ready.client.get(&url)).await?;

        Ok(resp["models"]
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| {
                        let name = m["name"].as_str()?;
                        Some(ModelInfo {
                            id: name.to_string(),
                            name: name.to_string(),
                            provider: ProviderType::Ollama.to_string(),
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
            .ok_or_else(|| LlmError::NotConfigured("no model set for ollama".into()))?;

        let url = format!("{}/api/chat", ready.base_url);
        let body = Self::build_request_body(request, &model);

        debug!(provider = "ollama", model = %model, "chat completion request");

        let resp = send_json(ready.client.post(&url).json(&body)).await?;
        Self::parse_response(&resp, &model)
    }
}
