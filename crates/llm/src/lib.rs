pub mod config;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use config::{provider_configs_from_env, ProviderConfig, ProviderType};
pub use provider::{AiProvider, LlmError};
pub use registry::{FallbackPolicy, InitSummary, ProviderRegistry, ProviderStatus};
pub use types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ChatRole, Choice, ConnectionTest,
    FinishReason, ModelInfo, ToolCallRequest, Usage,
};
