use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::debug;

use crate::config::{ProviderConfig, ProviderType};
use crate::provider::{arguments_to_value, http_client, send_json, AiProvider, LlmError};
use crate::types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatRole, FinishReason, ModelInfo,
    ToolCallRequest, Usage,
};

struct Ready {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    default_model: Option<String>,
}

pub struct GeminiProvider {
    ready: Option<Ready>,
}

impl GeminiProvider {
    pub fn new() -> Self {
        Self { ready: None }
    }

    fn ready(&self) -> Result<&Ready, LlmError> {
        self.ready
            .as_ref()
            .ok_or(LlmError::NotInitialized(ProviderType::Gemini))
    }

    /// Build the request body for the Gemini generateContent API.
    pub(crate) fn build_request_body(request: &ChatCompletionRequest) -> Value {
        // functionResponse parts are keyed by function name, not call id.
        let call_names: HashMap<&str, &str> = request
            .messages
            .iter()
            .flat_map(|m| m.tool_calls())
            .map(|c| (c.id.as_str(), c.name.as_str()))
            .collect();

        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str())
            .collect();

        let mut contents: Vec<Value> = Vec::new();
        for msg in request.messages.iter().filter(|m| m.role != ChatRole::System) {
            match msg.role {
                ChatRole::Tool => {
                    let call_id = msg.tool_call_id.as_deref().unwrap_or_default();
                    let name = call_names.get(call_id).copied().unwrap_or(call_id);
                    let response = match arguments_to_value(&msg.content) {
                        obj @ Value::Object(_) => obj,
                        other => json!({ "content": other }),
                    };
                    let part = json!({ "functionResponse": { "name": name, "response": response } });

                    let merged = contents.last_mut().is_some_and(|last| {
                        let is_responses = last["role"] == "function";
                        if is_responses {
                            if let Some(parts) = last["parts"].as_array_mut() {
                                parts.push(part.clone());
                            }
                        }
                        is_responses
                    });
                    if !merged {
                        contents.push(json!({ "role": "function", "parts": [part] }));
                    }
                }
                ChatRole::Assistant => {
                    let mut parts: Vec<Value> = Vec::new();
                    if !msg.content.is_empty() {
                        parts.push(json!({ "text": msg.content }));
                    }
                    for call in msg.tool_calls() {
                        parts.push(json!({
                            "functionCall": {
                                "name": call.name,
                                "args": arguments_to_value(&call.arguments),
                            }
                        }));
                    }
                    if parts.is_empty() {
                        parts.push(json!({ "text": "" }));
                    }
                    contents.push(json!({ "role": "model", "parts": parts }));
                }
                _ => contents.push(json!({ "role": "user", "parts": [{ "text": msg.content }] })),
            }
        }

        let mut generation_config = json!({});
        if let Some(t) = request.temperature {
            generation_config["temperature"] = json!(t);
        }
        if let Some(m) = request.max_tokens {
            generation_config["maxOutputTokens"] = json!(m);
        }

        let mut body = json!({
            "contents": contents,
            "generationConfig": generation_config,
        });

        if !system.is_empty() {
            body["system_instruction"] = json!({
                "parts": [{ "text": system.join("\n\n") }],
            });
        }
        if let Some(tools) = &request.tools {
            let declarations: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema(),
                    })
                })
                .collect();
            body["tools"] = json!([{ "functionDeclarations": declarations }]);
        }

        body
    }

    pub(crate) fn parse_response(resp: &Value, model: &str) -> Result<ChatCompletionResponse, LlmError> {
        let candidate = resp["candidates"]
            .get(0)
            .ok_or_else(|| LlmError::InvalidResponse("missing candidates[0]".into()))?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        if let Some(parts) = candidate["content"]["parts"].as_array() {
            for part in parts {
                if let Some(t) = part["text"].as_str() {
                    text.push_str(t);
                }
                if let Some(call) = part.get("functionCall") {
                    // Gemini does not always assign call ids.
                    let id = call["id"]
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("call_{}", tool_calls.len()));
                    tool_calls.push(ToolCallRequest::new(
                        id,
                        call["name"].as_str().unwrap_or_default(),
                        call["args"].to_string(),
                    ));
                }
            }
        }

        let finish_reason = match candidate["finishReason"].as_str() {
            Some("MAX_TOKENS") => FinishReason::Length,
            Some("SAFETY") | Some("RECITATION") | Some("BLOCKLIST") | Some("PROHIBITED_CONTENT") => {
                FinishReason::ContentFilter
            }
            _ => FinishReason::Stop,
        };

        let usage = resp.get("usageMetadata").map(|u| {
            Usage::new(
                u["promptTokenCount"].as_u64().unwrap_or(0) as u32,
                u["candidatesTokenCount"].as_u64().unwrap_or(0) as u32,
            )
        });

        Ok(ChatCompletionResponse::single(
            resp["responseId"].as_str().unwrap_or_default(),
            resp["modelVersion"].as_str().unwrap_or(model),
            text,
            tool_calls,
            finish_reason,
            usage,
        ))
    }
}

impl Default for GeminiProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AiProvider for GeminiProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Gemini
    }

    fn initialize(&mut self, config: &ProviderConfig) -> Result<(), LlmError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| LlmError::NotConfigured("GEMINI_API_KEY not set".into()))?;
        let base_url = config
            .base_url_or_default()
            .unwrap_or_else(|| "https://generativelanguage.googleapis.com".to_string());

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
        let url = format!("{}/v1beta/models", ready.base_url);
        let resp = send_json(ready.client.get(&url).query(&[("key", &ready.api_key)])).await?;

        Ok(resp["models"]
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| {
                        let full = m["name"].as_str()?;
                        let id = full.strip_prefix("models/").unwrap_or(full);
                        Some(ModelInfo {
                            id: id.to_string(),
                            name: m["displayName"].as_str().unwrap_or(id).to_string(),
                            provider: ProviderType::Gemini.to_string(),
                            context_length: m["inputTokenLimit"].as_u64(),
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
            .ok_or_else(|| LlmError::NotConfigured("no model set for gemini".into()))?;

        let url = format!("{}/v1beta/models/{}:generateContent", ready.base_url, model);
        let body = Self::build_request_body(request);

        debug!(provider = "gemini", model = %model, "chat completion request");

        let resp = send_json(
            ready
                .client
                .post(&url)
                .query(&[("key", &ready.api_key)])
                .header("Content-Type", "application/json")
                .json(&body),
        )
        .await?;
        Self::parse_response(&resp, &model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMessage;

    #[test]
    fn test_request_body_structure() {
        let request = ChatCompletionRequest::new(vec![
            ChatMessage::system("You are helpful."),
            ChatMessage::user("Hello"),
            ChatMessage::assistant("Hi there!"),
            ChatMessage::user("How are you?"),
        ])
        .with_temperature(0.1)
        .with_max_tokens(4096);

        let body = GeminiProvider::build_request_body(&request);

        // System instruction is separate
        assert_eq!(
            body["system_instruction"]["parts"][0]["text"].as_str().unwrap(),
            "You are helpful.",
        );

        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "user");
        // Assistant turns are "model", not "assistant"
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[1]["parts"][0]["text"], "Hi there!");

        let temp = body["generationConfig"]["temperature"].as_f64().unwrap();
        assert!((temp - 0.1).abs() < 1e-6, "temperature should be ~0.1, got {temp}");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 4096);
    }

    #[test]
    fn test_function_response_uses_call_name() {
        let request = ChatCompletionRequest::new(vec![
            ChatMessage::user("Stats please"),
            ChatMessage::assistant_with_tool_calls(
                "",
                vec![
                    ToolCallRequest::new("call_0", "statistical_analysis", r#"{"data":[1,2,3]}"#),
                    ToolCallRequest::new("call_1", "correlation", r#"{"x":[1],"y":[2]}"#),
                ],
            ),
            ChatMessage::tool("call_0", r#"{"success":true,"data":{"mean":2.0}}"#),
            ChatMessage::tool("call_1", "plain text"),
        ]);

        let body = GeminiProvider::build_request_body(&request);
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1]["parts"][0]["functionCall"]["args"]["data"], json!([1, 2, 3]));

        let responses = contents[2]["parts"].as_array().unwrap();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["functionResponse"]["name"], "statistical_analysis");
        assert_eq!(responses[0]["functionResponse"]["response"]["data"]["mean"], 2.0);
        assert_eq!(responses[1]["functionResponse"]["name"], "correlation");
        assert_eq!(responses[1]["functionResponse"]["response"]["content"], "plain text");
    }

    #[test]
    fn test_parse_function_call() {
        let resp = json!({
            "candidates": [{
                "content": { "role": "model", "parts": [
                    { "functionCall": { "name": "web_fetch", "args": { "url": "https://example.com" } } }
                ]},
                "finishReason": "STOP"
            }],
            "usageMetadata": { "promptTokenCount": 3, "candidatesTokenCount": 4 }
        });

        let parsed = GeminiProvider::parse_response(&resp, "gemini-2.0-flash").unwrap();
        let choice = &parsed.choices[0];
        assert_eq!(choice.finish_reason, FinishReason::ToolCalls);
        let call = &choice.message.tool_calls.as_ref().unwrap()[0];
        assert_eq!(call.id, "call_0");
        assert_eq!(call.name, "web_fetch");
        assert_eq!(parsed.model, "gemini-2.0-flash");
        assert_eq!(parsed.usage.unwrap().total_tokens, 7);
    }

    #[test]
    fn test_parse_safety_block() {
        let resp = json!({ "candidates": [{ "finishReason": "SAFETY" }] });
        let parsed = GeminiProvider::parse_response(&resp, "m").unwrap();
        assert_eq!(parsed.choices[0].finish_reason, FinishReason::ContentFilter);
        assert_eq!(parsed.choices[0].message.content, "");
    }
}
