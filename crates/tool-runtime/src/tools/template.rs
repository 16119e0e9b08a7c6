//! Jinja-style template rendering for content generation.

use async_trait::async_trait;
use minijinja::Environment;
use serde_json::{json, Value};

use crate::tool::{required_str, ParamType, ParameterSpec, Tool, ToolDefinition, ToolError, ToolResult};

pub struct RenderTemplateTool;

#[async_trait]
impl Tool for RenderTemplateTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "render_template",
            "Render a Jinja2-style template (e.g. 'Hello {{ name }}') with the given variables.",
        )
        .param(
            "template",
            ParameterSpec::new(ParamType::String, "Template source").required(),
        )
        .param(
            "variables",
            ParameterSpec::new(ParamType::Object, "Values available inside the template")
                .with_default(json!({})),
        )
    }

    async fn execute(&self, params: Value) -> Result<ToolResult, ToolError> {
        let source = required_str(&params, "template")?;
        let variables = params
            .get("variables")
            .filter(|v| v.is_object())
            .cloned()
            .unwrap_or_else(|| json!({}));

        let env = Environment::new();
        match env.render_str(source, variables) {
            Ok(rendered) => Ok(ToolResult::success(json!({ "rendered": rendered }))),
            Err(e) => Ok(ToolResult::failure(format!("template error: {e}"))),
        }
    }
}
