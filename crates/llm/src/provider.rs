use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::config::{ProviderConfig, ProviderType};
use crate::types::{ChatCompletionRequest, ChatCompletionResponse, ConnectionTest, ModelInfo};

/// Contract every LLM backend adapter implements.
///
/// Adapters are constructed unconfigured; [`AiProvider::initialize`] validates
/// and stores the settings. Calls before a successful `initialize` fail with
/// [`LlmError::NotInitialized`].
#[async_trait]
pub trait AiProvider: Send + Sync {
    fn provider_type(&self) -> ProviderType;

    /// Validate and adopt a configuration.
    fn initialize(&mut self, config: &ProviderConfig) -> Result<(), LlmError>;

    fn is_ready(&self) -> bool;

    /// Model used when a request leaves `model` unset.
    fn default_model(&self) -> Option<String>;

    async fn list_models(&self) -> Result<Vec<ModelInfo>, LlmError>;

    /// Send a chat completion request and return the normalized response.
    async fn create_chat_completion(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, LlmError>;

    /// Probe the backend. Succeeds when the model list can be fetched.
    async fn test_connection(&self) -> ConnectionTest {
        match self.list_models().await {
            Ok(_) => ConnectionTest::ok(),
            Err(e) => ConnectionTest::failed(e.to_string()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {status}: {body}")]
    Api { status: u16, body: String },
    #[error("failed to parse response: {0}")]
    InvalidResponse(String),
    #[error("provider not configured: {0}")]
    NotConfigured(String),
    #[error("provider {0} is not initialized")]
    NotInitialized(ProviderType),
    #[error("{provider} does not support {operation}")]
    Unsupported {
        provider: ProviderType,
        operation: &'static str,
    },
    #[error("primary provider {primary} failed ({primary_error}); fallback {fallback} failed: {fallback_error}")]
    FallbackFailed {
        primary: ProviderType,
        primary_error: String,
        fallback: ProviderType,
        fallback_error: String,
    },
}

// ── Shared HTTP helpers ──────────────────────────────────────

pub(crate) fn http_client(timeout_secs: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .unwrap_or_default()
}

/// Send a prepared request and decode a JSON body.
///
/// Non-2xx responses become [`LlmError::Api`] carrying the response text.
pub(crate) async fn send_json(request: reqwest::RequestBuilder) -> Result<Value, LlmError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(LlmError::Api {
            status: status.as_u16(),
            body,
        });
    }
    let text = response.text().await?;
    serde_json::from_str(&text)
        .map_err(|e| LlmError::InvalidResponse(format!("invalid JSON body: {e}")))
}

/// Parse tool-call arguments that a backend delivers as structured JSON.
pub(crate) fn arguments_to_value(arguments: &str) -> Value {
    if arguments.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(arguments).unwrap_or_else(|_| Value::String(arguments.to_string()))
}
