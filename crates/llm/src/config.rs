//! Backend selection and per-backend settings.

use maestro_core::LlmConfig;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::provider::LlmError;

/// The closed set of supported backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    OpenAi,
    Anthropic,
    Gemini,
    Ollama,
    LmStudio,
    OpenRouter,
    N8n,
    Custom,
}

impl ProviderType {
    pub const ALL: [ProviderType; 8] = [
        ProviderType::OpenAi,
        ProviderType::Anthropic,
        ProviderType::Gemini,
        ProviderType::Ollama,
        ProviderType::LmStudio,
        ProviderType::OpenRouter,
        ProviderType::N8n,
        ProviderType::Custom,
    ];

    /// Backend used when nothing else is configured, and the default fallback.
    pub const DEFAULT: ProviderType = ProviderType::OpenAi;

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::OpenAi => "openai",
            ProviderType::Anthropic => "anthropic",
            ProviderType::Gemini => "gemini",
            ProviderType::Ollama => "ollama",
            ProviderType::LmStudio => "lmstudio",
            ProviderType::OpenRouter => "openrouter",
            ProviderType::N8n => "n8n",
            ProviderType::Custom => "custom",
        }
    }

    /// Whether the backend needs an API key to be usable.
    pub fn requires_api_key(&self) -> bool {
        matches!(
            self,
            ProviderType::OpenAi
                | ProviderType::Anthropic
                | ProviderType::Gemini
                | ProviderType::OpenRouter
        )
    }

    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            ProviderType::OpenAi => Some("https://api.openai.com/v1"),
            ProviderType::Anthropic => Some("https://api.anthropic.com"),
            ProviderType::Gemini => Some("https://generativelanguage.googleapis.com"),
            ProviderType::Ollama => Some("http://localhost:11434"),
            ProviderType::LmStudio => Some("http://localhost:1234/v1"),
            ProviderType::OpenRouter => Some("https://openrouter.ai/api/v1"),
            ProviderType::N8n | ProviderType::Custom => None,
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(ProviderType::OpenAi),
            "anthropic" | "claude" => Ok(ProviderType::Anthropic),
            "gemini" | "google" => Ok(ProviderType::Gemini),
            "ollama" => Ok(ProviderType::Ollama),
            "lmstudio" | "lm-studio" => Ok(ProviderType::LmStudio),
            "openrouter" => Ok(ProviderType::OpenRouter),
            "n8n" => Ok(ProviderType::N8n),
            "custom" => Ok(ProviderType::Custom),
            other => Err(LlmError::NotConfigured(format!(
                "unknown LLM provider: '{other}'"
            ))),
        }
    }
}

/// Settings for one backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider_type: ProviderType,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    #[serde(default)]
    pub available_models: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Backend-specific extras (e.g. OpenRouter `http_referer`, `app_title`).
    #[serde(default)]
    pub options: Map<String, Value>,
}

fn default_timeout_secs() -> u64 {
    120
}

impl ProviderConfig {
    /// Disabled config with nothing set.
    pub fn new(provider_type: ProviderType) -> Self {
        Self {
            provider_type,
            enabled: false,
            api_key: None,
            base_url: None,
            default_model: None,
            available_models: Vec::new(),
            request_timeout_secs: default_timeout_secs(),
            options: Map::new(),
        }
    }

    pub fn enabled(mut self) -> Self {
        self.enabled = true;
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    /// Configured base URL, else the backend's well-known one.
    pub fn base_url_or_default(&self) -> Option<String> {
        self.base_url
            .as_deref()
            .or(self.provider_type.default_base_url())
            .map(|u| u.trim_end_matches('/').to_string())
    }

    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(|v| v.as_str())
    }

    /// Merge another config's explicitly set fields over this one.
    pub fn overlay(&mut self, other: &ProviderConfig) {
        self.enabled = other.enabled;
        if other.api_key.is_some() {
            self.api_key.clone_from(&other.api_key);
        }
        if other.base_url.is_some() {
            self.base_url.clone_from(&other.base_url);
        }
        if other.default_model.is_some() {
            self.default_model.clone_from(&other.default_model);
        }
        if !other.available_models.is_empty() {
            self.available_models.clone_from(&other.available_models);
        }
        self.request_timeout_secs = other.request_timeout_secs;
        for (k, v) in &other.options {
            self.options.insert(k.clone(), v.clone());
        }
    }
}

/// Build one [`ProviderConfig`] per backend from environment-derived settings.
///
/// A backend is enabled when the settings it cannot work without are present.
pub fn provider_configs_from_env(llm: &LlmConfig) -> HashMap<ProviderType, ProviderConfig> {
    let timeout = llm.request_timeout_secs;
    let mut configs = HashMap::new();

    let mut insert = |mut cfg: ProviderConfig| {
        cfg.request_timeout_secs = timeout;
        configs.insert(cfg.provider_type, cfg);
    };

    let mut openai = ProviderConfig::new(ProviderType::OpenAi)
        .with_default_model(&llm.openai_model);
    openai.api_key.clone_from(&llm.openai_api_key);
    openai.base_url.clone_from(&llm.openai_base_url);
    openai.enabled = openai.api_key.is_some();
    insert(openai);

    let mut anthropic = ProviderConfig::new(ProviderType::Anthropic)
        .with_default_model(&llm.anthropic_model);
    anthropic.api_key.clone_from(&llm.anthropic_api_key);
    anthropic.base_url.clone_from(&llm.anthropic_base_url);
    anthropic.enabled = anthropic.api_key.is_some();
    insert(anthropic);

    let mut gemini = ProviderConfig::new(ProviderType::Gemini)
        .with_default_model(&llm.gemini_model);
    gemini.api_key.clone_from(&llm.gemini_api_key);
    gemini.enabled = gemini.api_key.is_some();
    insert(gemini);

    let mut ollama = ProviderConfig::new(ProviderType::Ollama)
        .with_default_model(&llm.ollama_model);
    ollama.base_url.clone_from(&llm.ollama_url);
    ollama.enabled = ollama.base_url.is_some();
    insert(ollama);

    let mut lmstudio = ProviderConfig::new(ProviderType::LmStudio)
        .with_default_model(&llm.lmstudio_model);
    lmstudio.base_url.clone_from(&llm.lmstudio_url);
    lmstudio.enabled = lmstudio.base_url.is_some();
    insert(lmstudio);

    let mut openrouter = ProviderConfig::new(ProviderType::OpenRouter)
        .with_default_model(&llm.openrouter_model);
    openrouter.api_key.clone_from(&llm.openrouter_api_key);
    openrouter.enabled = openrouter.api_key.is_some();
    openrouter
        .options
        .insert("app_title".into(), Value::String("maestro".into()));
    insert(openrouter);

    let mut n8n = ProviderConfig::new(ProviderType::N8n).with_default_model("n8n-workflow");
    n8n.base_url.clone_from(&llm.n8n_webhook_url);
    n8n.api_key.clone_from(&llm.n8n_api_key);
    n8n.enabled = n8n.base_url.is_some();
    insert(n8n);

    let mut custom = ProviderConfig::new(ProviderType::Custom);
    custom.base_url.clone_from(&llm.custom_base_url);
    custom.api_key.clone_from(&llm.custom_api_key);
    custom.default_model.clone_from(&llm.custom_model);
    custom.enabled = custom.base_url.is_some();
    insert(custom);

    configs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn llm_config() -> LlmConfig {
        LlmConfig {
            active_provider: "anthropic".into(),
            fallback_provider: Some("openai".into()),
            openai_api_key: Some("sk-test".into()),
            openai_model: "gpt-4o".into(),
            openai_base_url: None,
            anthropic_api_key: None,
            anthropic_model: "claude-sonnet-4-20250514".into(),
            anthropic_base_url: None,
            gemini_api_key: None,
            gemini_model: "gemini-2.0-flash".into(),
            ollama_url: Some("http://gpu-box:11434".into()),
            ollama_model: "llama3.2".into(),
            lmstudio_url: None,
            lmstudio_model: "local-model".into(),
            openrouter_api_key: None,
            openrouter_model: "openai/gpt-4o".into(),
            n8n_webhook_url: None,
            n8n_api_key: None,
            custom_base_url: None,
            custom_api_key: None,
            custom_model: None,
            temperature: 0.7,
            max_tokens: 4096,
            request_timeout_secs: 30,
        }
    }

    #[test]
    fn test_provider_type_round_trip_names() {
        for kind in ProviderType::ALL {
            assert_eq!(kind.as_str().parse::<ProviderType>().unwrap(), kind);
        }
        assert_eq!("Claude".parse::<ProviderType>().unwrap(), ProviderType::Anthropic);
        assert!("mystery".parse::<ProviderType>().is_err());
    }

    #[test]
    fn test_configs_from_env() {
        let configs = provider_configs_from_env(&llm_config());
        assert_eq!(configs.len(), ProviderType::ALL.len());

        let openai = &configs[&ProviderType::OpenAi];
        assert!(openai.enabled);
        assert_eq!(openai.request_timeout_secs, 30);
        assert_eq!(
            openai.base_url_or_default().as_deref(),
            Some("https://api.openai.com/v1")
        );

        assert!(!configs[&ProviderType::Anthropic].enabled);
        assert!(configs[&ProviderType::Ollama].enabled);
        assert!(!configs[&ProviderType::Custom].enabled);
    }

    #[test]
    fn test_overlay_keeps_unset_fields() {
        let mut base = ProviderConfig::new(ProviderType::Ollama)
            .with_base_url("http://localhost:11434")
            .with_default_model("llama3.2");
        let patch = ProviderConfig::new(ProviderType::Ollama)
            .enabled()
            .with_default_model("qwen2.5");
        base.overlay(&patch);
        assert!(base.enabled);
        assert_eq!(base.base_url.as_deref(), Some("http://localhost:11434"));
        assert_eq!(base.default_model.as_deref(), Some("qwen2.5"));
    }
}
