//! Shared fixtures for unit tests.

use maestro_llm::mock::ScriptedProvider;
use maestro_llm::{FallbackPolicy, ProviderRegistry, ProviderType};
use std::sync::Arc;

use crate::agent::LlmHandle;

/// A ready scripted backend set as the active provider, with fallback disabled.
pub(crate) fn scripted_llm() -> (ScriptedProvider, LlmHandle) {
    let provider = ScriptedProvider::ready(ProviderType::OpenAi);
    let registry = ProviderRegistry::new().with_adapter(Box::new(provider.clone()));
    registry.set_active(ProviderType::OpenAi);
    (
        provider,
        LlmHandle::new(Arc::new(registry), FallbackPolicy::Disabled),
    )
}
