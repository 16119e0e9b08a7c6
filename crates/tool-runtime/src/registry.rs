use crate::tool::{Tool, ToolDefinition, ToolResult};
use futures::FutureExt;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

/// Manages available tools, their schemas, and lookup.
///
/// Tools keep registration order so the schema list sent to the model is stable.
/// [`ToolRegistry::execute`] and [`ToolRegistry::invoke`] are the execution
/// boundary: they always return a [`ToolResult`], never an error.
pub struct ToolRegistry {
    tools: IndexMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: IndexMap::new(),
        }
    }

    /// Register a tool. Returns error if name already registered.
    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), RegistryError> {
        self.register_arc(Arc::new(tool))
    }

    /// Register an already shared tool.
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let def = tool.definition();
        if self.tools.contains_key(&def.name) {
            return Err(RegistryError::DuplicateName(def.name));
        }
        self.tools.insert(def.name, tool);
        Ok(())
    }

    /// Register several tools, stopping at the first duplicate.
    pub fn register_all(
        &mut self,
        tools: impl IntoIterator<Item = Arc<dyn Tool>>,
    ) -> Result<(), RegistryError> {
        for tool in tools {
            self.register_arc(tool)?;
        }
        Ok(())
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// List all registered tool definitions (for sending to LLM).
    pub fn list(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    /// Registered tool names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool call whose arguments arrive as serialized JSON text.
    ///
    /// An empty argument string is treated as `{}`.
    pub async fn invoke(&self, name: &str, raw_arguments: &str) -> ToolResult {
        let params = if raw_arguments.trim().is_empty() {
            Value::Object(Map::new())
        } else {
            match serde_json::from_str::<Value>(raw_arguments) {
                Ok(v) => v,
                Err(e) => {
                    debug!(tool = name, error = %e, "unparsable tool arguments");
                    return ToolResult::failure(format!(
                        "invalid arguments for tool '{name}': {e}"
                    ));
                }
            }
        };
        self.execute(name, params).await
    }

    /// Execute a tool by name with parsed parameters.
    pub async fn execute(&self, name: &str, params: Value) -> ToolResult {
        let Some(tool) = self.get(name) else {
            warn!(tool = name, "model requested an unknown tool");
            return ToolResult::failure(format!("unknown tool: {name}"));
        };

        if !params.is_object() {
            return ToolResult::failure(format!(
                "arguments for tool '{name}' must be a JSON object"
            ));
        }

        let definition = tool.definition();
        if let Some(missing) = definition
            .required_parameters()
            .into_iter()
            .find(|p| params.get(*p).map_or(true, Value::is_null))
        {
            return ToolResult::failure(format!(
                "missing required parameter '{missing}' for tool '{name}'"
            ));
        }

        debug!(tool = name, "executing tool");
        match AssertUnwindSafe(tool.execute(params)).catch_unwind().await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                debug!(tool = name, error = %e, "tool returned an error");
                ToolResult::failure(e.to_string())
            }
            Err(_) => {
                warn!(tool = name, "tool panicked during execution");
                ToolResult::failure(format!("tool '{name}' panicked during execution"))
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Tool with name '{0}' is already registered")]
    DuplicateName(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{EchoTool, ToolError};
    use async_trait::async_trait;
    use serde_json::json;

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new("failing", "Always fails")
        }

        async fn execute(&self, _params: Value) -> Result<ToolResult, ToolError> {
            Err(ToolError::ExecutionFailed("disk on fire".into()))
        }
    }

    struct PanickingTool;

    #[async_trait]
    impl Tool for PanickingTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new("panicking", "Always panics")
        }

        async fn execute(&self, _params: Value) -> Result<ToolResult, ToolError> {
            panic!("unexpected state");
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        registry.register(FailingTool).unwrap();
        registry.register(PanickingTool).unwrap();
        registry
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = registry();
        assert_eq!(registry.len(), 3);
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
        assert_eq!(registry.names(), vec!["echo", "failing", "panicking"]);
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        assert!(matches!(
            registry.register(EchoTool),
            Err(RegistryError::DuplicateName(name)) if name == "echo"
        ));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_a_failed_result() {
        let result = registry().invoke("does_not_exist", "{}").await;
        assert!(!result.is_success());
        assert!(result.error().unwrap().contains("unknown tool"));
    }

    #[tokio::test]
    async fn test_unparsable_arguments() {
        let result = registry().invoke("echo", "{not json").await;
        assert!(!result.is_success());
        assert!(result.error().unwrap().contains("invalid arguments"));
    }

    #[tokio::test]
    async fn test_non_object_arguments() {
        let result = registry().invoke("echo", "[1, 2]").await;
        assert!(!result.is_success());
    }

    #[tokio::test]
    async fn test_missing_required_parameter() {
        let result = registry().invoke("echo", "").await;
        assert_eq!(
            result.error(),
            Some("missing required parameter 'message' for tool 'echo'")
        );
    }

    #[tokio::test]
    async fn test_tool_error_and_panic_are_contained() {
        let registry = registry();

        let failed = registry.execute("failing", json!({})).await;
        assert_eq!(failed.error(), Some("Execution failed: disk on fire"));

        let panicked = registry.execute("panicking", json!({})).await;
        assert!(!panicked.is_success());
        assert!(panicked.error().unwrap().contains("panicked"));
    }

    #[tokio::test]
    async fn test_successful_invoke() {
        let result = registry().invoke("echo", r#"{"message": "hi"}"#).await;
        assert!(result.is_success());
        assert_eq!(result.data(), Some(&json!("hi")));
    }
}
