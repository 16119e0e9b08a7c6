pub mod registry;
pub mod tool;
pub mod tools;

pub use registry::{RegistryError, ToolRegistry};
pub use tool::{ParamType, ParameterSpec, Tool, ToolDefinition, ToolError, ToolResult};
pub use tools::{
    CorrelationTool, ExtractKeywordsTool, RenderTemplateTool, StatisticalAnalysisTool,
    TextMetricsTool, WebFetchTool,
};

#[cfg(any(test, feature = "test-utils"))]
pub use tool::EchoTool;
