use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;

/// JSON type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Integer => "integer",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }
}

/// Declared shape of one tool parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Element type for `array` parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<ParamType>,
}

impl ParameterSpec {
    pub fn new(param_type: ParamType, description: impl Into<String>) -> Self {
        Self {
            param_type,
            description: description.into(),
            required: false,
            enum_values: None,
            default: None,
            items: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_enum<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enum_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_items(mut self, items: ParamType) -> Self {
        self.items = Some(items);
        self
    }

    fn to_json_schema(&self) -> Value {
        let mut schema = json!({
            "type": self.param_type.as_str(),
            "description": self.description,
        });
        if let Some(values) = &self.enum_values {
            // Enums on arrays constrain the elements, not the array itself.
            if self.param_type == ParamType::Array {
                schema["items"] = json!({ "type": "string", "enum": values });
            } else {
                schema["enum"] = json!(values);
            }
        }
        if let (Some(items), None) = (self.items, &self.enum_values) {
            schema["items"] = json!({ "type": items.as_str() });
        }
        if let Some(default) = &self.default {
            schema["default"] = default.clone();
        }
        schema
    }
}

/// Describes a tool's interface for LLM consumption.
/// Rendered to Claude's `input_schema` and OpenAI's function `parameters`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name within one registry (e.g., "statistical_analysis")
    pub name: String,
    /// Human-readable description for the LLM
    pub description: String,
    /// Parameters in declaration order
    #[serde(default)]
    pub parameters: IndexMap<String, ParameterSpec>,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: IndexMap::new(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, spec: ParameterSpec) -> Self {
        self.parameters.insert(name.into(), spec);
        self
    }

    /// Names of parameters flagged as required.
    pub fn required_parameters(&self) -> Vec<&str> {
        self.parameters
            .iter()
            .filter(|(_, spec)| spec.required)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// JSON Schema object describing the expected input.
    pub fn input_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .parameters
            .iter()
            .map(|(name, spec)| (name.clone(), spec.to_json_schema()))
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": self.required_parameters(),
        })
    }
}

impl fmt::Display for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.description)
    }
}

/// Outcome of a tool execution, serialized back to the LLM.
///
/// Only constructible through [`ToolResult::success`] / [`ToolResult::failure`],
/// so a failed result never carries data and a successful one never carries an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawToolResult")]
pub struct ToolResult {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<HashMap<String, Value>>,
}

#[derive(Deserialize)]
struct RawToolResult {
    success: bool,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    metadata: Option<HashMap<String, Value>>,
}

impl TryFrom<RawToolResult> for ToolResult {
    type Error = String;

    fn try_from(raw: RawToolResult) -> Result<Self, Self::Error> {
        match (raw.success, &raw.data, &raw.error) {
            (true, _, Some(_)) => return Err("successful tool result carries an error".into()),
            (false, Some(_), _) => return Err("failed tool result carries data".into()),
            (false, _, None) => return Err("failed tool result has no error".into()),
            _ => {}
        }
        Ok(Self {
            success: raw.success,
            data: raw.data,
            error: raw.error,
            metadata: raw.metadata,
        })
    }
}

impl ToolResult {
    pub fn success(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            metadata: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn metadata(&self) -> Option<&HashMap<String, Value>> {
        self.metadata.as_ref()
    }

    /// JSON text placed in the tool-role message.
    pub fn to_message_content(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"success":false,"error":"unserializable tool result: {e}"}}"#)
        })
    }
}

/// The primary extension point: all tools implement this trait.
///
/// Tools are object-safe, Send + Sync, and async. Returning `Err` is fine:
/// the registry converts it into a failed [`ToolResult`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the tool's definition (name, description, parameters).
    fn definition(&self) -> ToolDefinition;

    /// Execute the tool with the given JSON object of parameters.
    async fn execute(&self, params: Value) -> Result<ToolResult, ToolError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
    #[error("Timeout after {0:?}")]
    Timeout(std::time::Duration),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Read a required string parameter.
pub fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidInput(format!("missing '{key}' field")))
}

/// Read a required array of numbers.
pub fn required_numbers(params: &Value, key: &str) -> Result<Vec<f64>, ToolError> {
    let values = params
        .get(key)
        .and_then(|v| v.as_array())
        .ok_or_else(|| ToolError::InvalidInput(format!("'{key}' must be an array of numbers")))?;
    values
        .iter()
        .map(|v| {
            v.as_f64().ok_or_else(|| {
                ToolError::InvalidInput(format!("'{key}' contains a non-numeric value: {v}"))
            })
        })
        .collect()
}

/// Simple echo tool for testing purposes.
#[cfg(any(test, feature = "test-utils"))]
pub struct EchoTool;

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl Tool for EchoTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("echo", "Echoes back the input message. For testing.").param(
            "message",
            ParameterSpec::new(ParamType::String, "The message to echo back").required(),
        )
    }

    async fn execute(&self, params: Value) -> Result<ToolResult, ToolError> {
        let message = required_str(&params, "message")?;
        Ok(ToolResult::success(json!(message)))
    }
}
