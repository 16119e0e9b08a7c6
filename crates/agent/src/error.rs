use maestro_core::ConfigError;
use maestro_llm::LlmError;
use maestro_tool_runtime::RegistryError;

use crate::task::TaskError;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("max_iterations must be at least 1")]
    InvalidMaxIterations,
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
    #[error("model returned no choices")]
    EmptyResponse,
    #[error("tool registration failed: {0}")]
    Registry(#[from] RegistryError),
    #[error("sub-agent '{0}' is already registered")]
    DuplicateSubAgent(String),
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}
