pub mod anthropic;
pub mod gemini;
pub mod n8n;
pub mod ollama;
pub mod openai_compat;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use n8n::N8nProvider;
pub use ollama::OllamaProvider;
pub use openai_compat::OpenAiCompatProvider;

use crate::config::ProviderType;
use crate::provider::AiProvider;

/// Create the (uninitialized) adapter for a backend type.
pub fn create_adapter(kind: ProviderType) -> Box<dyn AiProvider> {
    match kind {
        ProviderType::OpenAi
        | ProviderType::OpenRouter
        | ProviderType::LmStudio
        | ProviderType::Custom => Box::new(OpenAiCompatProvider::new(kind)),
        ProviderType::Anthropic => Box::new(AnthropicProvider::new()),
        ProviderType::Gemini => Box::new(GeminiProvider::new()),
        ProviderType::Ollama => Box::new(OllamaProvider::new()),
        ProviderType::N8n => Box::new(N8nProvider::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_type_has_an_adapter() {
        for kind in ProviderType::ALL {
            let adapter = create_adapter(kind);
            assert_eq!(adapter.provider_type(), kind);
            assert!(!adapter.is_ready());
        }
    }
}
