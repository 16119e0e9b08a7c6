//! Scripted in-memory adapter for tests.
//!
//! Replays queued responses in order and records every request it receives.
//! Clones share the same script and recordings, so a test can keep a handle
//! after boxing one into a [`ProviderRegistry`](crate::registry::ProviderRegistry).

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::config::{ProviderConfig, ProviderType};
use crate::provider::{AiProvider, LlmError};
use crate::types::{
    ChatCompletionRequest, ChatCompletionResponse, FinishReason, ModelInfo, ToolCallRequest,
};

enum Scripted {
    Text(String),
    ToolCalls(Vec<(String, String)>),
    Error { status: u16, body: String },
}

#[derive(Default)]
struct Inner {
    script: VecDeque<Scripted>,
    always_tool_call: Option<(String, String)>,
    requests: Vec<ChatCompletionRequest>,
    ready: bool,
    default_model: Option<String>,
    init_error: Option<String>,
    next_call_id: usize,
}

#[derive(Clone)]
pub struct ScriptedProvider {
    kind: ProviderType,
    inner: Arc<Mutex<Inner>>,
}

impl ScriptedProvider {
    pub fn new(kind: ProviderType) -> Self {
        Self {
            kind,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// A provider that is already initialized, for use without a registry config.
    pub fn ready(kind: ProviderType) -> Self {
        let provider = Self::new(kind);
        provider.lock().ready = true;
        provider
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn kind(&self) -> ProviderType {
        self.kind
    }

    /// Queue a plain text answer (finish reason `stop`).
    pub fn queue_text(&self, text: impl Into<String>) -> &Self {
        self.lock().script.push_back(Scripted::Text(text.into()));
        self
    }

    /// Queue a turn requesting one tool call.
    pub fn queue_tool_call(&self, name: impl Into<String>, arguments: impl Into<String>) -> &Self {
        self.queue_tool_calls(vec![(name.into(), arguments.into())])
    }

    /// Queue a turn requesting several tool calls, in order.
    pub fn queue_tool_calls(&self, calls: Vec<(String, String)>) -> &Self {
        self.lock().script.push_back(Scripted::ToolCalls(calls));
        self
    }

    /// Queue an API error with the given status and body.
    pub fn queue_error(&self, status: u16, body: impl Into<String>) -> &Self {
        self.lock().script.push_back(Scripted::Error {
            status,
            body: body.into(),
        });
        self
    }

    /// Once the script runs out, request this tool call on every turn.
    pub fn always_tool_call(&self, name: impl Into<String>, arguments: impl Into<String>) -> &Self {
        self.lock().always_tool_call = Some((name.into(), arguments.into()));
        self
    }

    /// Make `initialize` fail with the given message.
    pub fn fail_init(&self, message: impl Into<String>) -> &Self {
        self.lock().init_error = Some(message.into());
        self
    }

    pub fn requests(&self) -> Vec<ChatCompletionRequest> {
        self.lock().requests.clone()
    }

    pub fn call_count(&self) -> usize {
        self.lock().requests.len()
    }
}

#[async_trait]
impl AiProvider for ScriptedProvider {
    fn provider_type(&self) -> ProviderType {
        self.kind
    }

    fn initialize(&mut self, config: &ProviderConfig) -> Result<(), LlmError> {
        let mut inner = self.lock();
        if let Some(message) = &inner.init_error {
            return Err(LlmError::NotConfigured(message.clone()));
        }
        inner.default_model.clone_from(&config.default_model);
        inner.ready = true;
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.lock().ready
    }

    fn default_model(&self) -> Option<String> {
        self.lock().default_model.clone()
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, LlmError> {
        let inner = self.lock();
        if !inner.ready {
            return Err(LlmError::NotInitialized(self.kind));
        }
        let id = inner
            .default_model
            .clone()
            .unwrap_or_else(|| "mock-model".to_string());
        Ok(vec![ModelInfo {
            name: id.clone(),
            id,
            provider: self.kind.to_string(),
            context_length: None,
        }])
    }

    async fn create_chat_completion(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, LlmError> {
        let mut inner = self.lock();
        if !inner.ready {
            return Err(LlmError::NotInitialized(self.kind));
        }
        inner.requests.push(request.clone());
        let model = request
            .model
            .clone()
            .or_else(|| inner.default_model.clone())
            .unwrap_or_else(|| "mock-model".to_string());
        let id = format!("mock-{}", inner.requests.len());

        let next = inner.script.pop_front().or_else(|| {
            inner
                .always_tool_call
                .clone()
                .map(|call| Scripted::ToolCalls(vec![call]))
        });

        match next {
            Some(Scripted::Text(text)) => Ok(ChatCompletionResponse::single(
                id,
                model,
                text,
                Vec::new(),
                FinishReason::Stop,
                None,
            )),
            Some(Scripted::ToolCalls(calls)) => {
                let calls = calls
                    .into_iter()
                    .map(|(name, arguments)| {
                        inner.next_call_id += 1;
                        ToolCallRequest::new(format!("call_{}", inner.next_call_id), name, arguments)
                    })
                    .collect();
                Ok(ChatCompletionResponse::single(
                    id,
                    model,
                    "",
                    calls,
                    FinishReason::ToolCalls,
                    None,
                ))
            }
            Some(Scripted::Error { status, body }) => Err(LlmError::Api { status, body }),
            None => Ok(ChatCompletionResponse::single(
                id,
                model,
                "done",
                Vec::new(),
                FinishReason::Stop,
                None,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMessage;

    #[tokio::test]
    async fn test_script_replays_in_order() {
        let provider = ScriptedProvider::ready(ProviderType::OpenAi);
        provider.queue_tool_call("echo", r#"{"message":"hi"}"#).queue_text("final");

        let req = ChatCompletionRequest::new(vec![ChatMessage::user("go")]);
        let first = provider.create_chat_completion(&req).await.unwrap();
        assert_eq!(first.choices[0].finish_reason, FinishReason::ToolCalls);
        assert_eq!(first.choices[0].message.tool_calls.as_ref().unwrap()[0].id, "call_1");

        let second = provider.create_chat_completion(&req).await.unwrap();
        assert_eq!(second.choices[0].message.content, "final");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_uninitialized_rejects_calls() {
        let provider = ScriptedProvider::new(ProviderType::Ollama);
        let req = ChatCompletionRequest::new(vec![ChatMessage::user("go")]);
        assert!(provider.create_chat_completion(&req).await.is_err());
        assert_eq!(provider.call_count(), 0);
    }
}
