//! n8n workflow webhook adapter.
//!
//! The workflow receives the latest user message as `chatInput` plus the full
//! transcript and answers with free text. Tool calling is not available, so tool
//! schemas in the request are ignored and every reply finishes with `stop`.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::{ProviderConfig, ProviderType};
use crate::provider::{http_client, AiProvider, LlmError};
use crate::types::{ChatCompletionRequest, ChatCompletionResponse, ChatRole, FinishReason, ModelInfo};

/// Reply fields checked in order.
const REPLY_FIELDS: &[&str] = &["output", "text", "response", "message", "content"];

struct Ready {
    client: reqwest::Client,
    webhook_url: String,
    api_key: Option<String>,
    default_model: Option<String>,
    models: Vec<String>,
}

pub struct N8nProvider {
    ready: Option<Ready>,
}

impl N8nProvider {
    pub fn new() -> Self {
        Self { ready: None }
    }

    fn ready(&self) -> Result<&Ready, LlmError> {
        self.ready
            .as_ref()
            .ok_or(LlmError::NotInitialized(ProviderType::N8n))
    }

    pub(crate) fn build_request_body(request: &ChatCompletionRequest, model: Option<&str>) -> Value {
        let chat_input = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str())
            .collect();

        json!({
            "chatInput": chat_input,
            "systemPrompt": system.join("\n\n"),
            "messages": request.messages,
            "model": model,
        })
    }

    /// Extract the reply text from a webhook response body.
    pub(crate) fn parse_reply(body: &str) -> Result<String, LlmError> {
        let Ok(value) = serde_json::from_str::<Value>(body) else {
            return Ok(body.trim().to_string());
        };

        fn from_object(value: &Value) -> Option<String> {
            REPLY_FIELDS.iter().find_map(|field| match &value[*field] {
                Value::String(s) => Some(s.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
        }

        match &value {
            Value::String(s) => Some(s.clone()),
            Value::Object(_) => from_object(&value),
            Value::Array(items) => items.first().and_then(|first| match first {
                Value::String(s) => Some(s.clone()),
                other => from_object(other),
            }),
            _ => None,
        }
        .ok_or_else(|| {
            LlmError::InvalidResponse(format!(
                "webhook reply has none of the fields {}",
                REPLY_FIELDS.join(", ")
            ))
        })
    }
}

impl Default for N8nProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AiProvider for N8nProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::N8n
    }

    fn initialize(&mut self, config: &ProviderConfig) -> Result<(), LlmError> {
        let webhook_url = config
            .base_url
            .clone()
            .ok_or_else(|| LlmError::NotConfigured("N8N_WEBHOOK_URL not set".into()))?;

        let mut models = config.available_models.clone();
        if let Some(default) = &config.default_model {
            if !models.contains(default) {
                models.insert(0, default.clone());
            }
        }

        self.ready = Some(Ready {
            client: http_client(config.request_timeout_secs),
            webhook_url,
            api_key: config.api_key.clone(),
            default_model: config.default_model.clone(),
            models,
        });
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.is_some()
    }

    fn default_model(&self) -> Option<String> {
        self.ready.as_ref().and_then(|r| r.default_model.clone())
    }

    /// Reports the configured models; the webhook has no listing endpoint.
    async fn list_models(&self) -> Result<Vec<ModelInfo>, LlmError> {
        let ready = self.ready()?;
        Ok(ready
            .models
            .iter()
            .map(|m| ModelInfo {
                id: m.clone(),
                name: m.clone(),
                provider: ProviderType::N8n.to_string(),
                context_length: None,
            })
            .collect())
    }

    async fn create_chat_completion(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, LlmError> {
        let ready = self.ready()?;
        let model = request.model.clone().or_else(|| ready.default_model.clone());

        if request.tools.is_some() {
            debug!(provider = "n8n", "tool schemas ignored, webhook has no tool calling");
        }

        let body = Self::build_request_body(request, model.as_deref());
        let mut builder = ready.client.post(&ready.webhook_url).json(&body);
        if let Some(key) = &ready.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(LlmError::Api {
                status: status.as_u16(),
                body: text,
            });
        }

        let reply = Self::parse_reply(&text)?;
        Ok(ChatCompletionResponse::single(
            "",
            model.unwrap_or_else(|| "n8n".to_string()),
            reply,
            Vec::new(),
            FinishReason::Stop,
            None,
        ))
    }
}
