use std::env;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub llm: LlmConfig,
    pub agents: AgentLimits,
}

/// Well-known env keys that identify a profile when prefixed.
const PROFILE_MARKER_KEYS: &[&str] = &[
    "LLM_PROVIDER",
    "OPENAI_API_KEY",
    "ANTHROPIC_API_KEY",
    "GEMINI_API_KEY",
    "OPENROUTER_API_KEY",
    "N8N_WEBHOOK_URL",
];

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `MAESTRO_PROFILE` env var. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("MAESTRO_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            llm: LlmConfig::from_env_profiled(p),
            agents: AgentLimits::from_env_profiled(p),
        }
    }

    /// Discover available profiles by scanning env vars for `{PREFIX}_{MARKER_KEY}` patterns.
    /// Always includes "default" (the unprefixed config).
    pub fn available_profiles() -> Vec<String> {
        let mut profiles = std::collections::BTreeSet::new();
        profiles.insert("default".to_string());

        for (key, _) in env::vars() {
            for marker in PROFILE_MARKER_KEYS {
                if let Some(prefix) = key.strip_suffix(&format!("_{}", marker)) {
                    if !prefix.is_empty()
                        && prefix.chars().all(|c| c.is_ascii_uppercase() || c == '_')
                    {
                        profiles.insert(prefix.to_string());
                    }
                }
            }
        }

        profiles.into_iter().collect()
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let caps = [
            ("MASTER_MAX_ITERATIONS", self.agents.master_max_iterations as u64),
            ("ANALYTICS_MAX_ITERATIONS", self.agents.analytics_max_iterations as u64),
            ("RESEARCH_MAX_ITERATIONS", self.agents.research_max_iterations as u64),
            ("CONTENT_MAX_ITERATIONS", self.agents.content_max_iterations as u64),
            ("TASK_TIMEOUT_SECS", self.agents.task_timeout_secs),
            ("LLM_REQUEST_TIMEOUT_SECS", self.llm.request_timeout_secs),
        ];
        for (key, value) in caps {
            if value == 0 {
                return Err(ConfigError::ZeroLimit { key, value });
            }
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::TemperatureOutOfRange(self.llm.temperature));
        }
        Ok(())
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  llm:         provider={}, fallback={}",
            self.llm.active_provider,
            self.llm.fallback_provider.as_deref().unwrap_or("(disabled)")
        );
        tracing::info!(
            "  agents:      master={}, analytics={}, research={}, content={}, timeout={}s",
            self.agents.master_max_iterations,
            self.agents.analytics_max_iterations,
            self.agents.research_max_iterations,
            self.agents.content_max_iterations,
            self.agents.task_timeout_secs
        );
    }

    /// Return a redacted view safe for API responses (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "llm": {
                "active_provider": self.llm.active_provider,
                "fallback_provider": self.llm.fallback_provider,
                "temperature": self.llm.temperature,
                "max_tokens": self.llm.max_tokens,
                "openai_configured": self.llm.openai_api_key.is_some(),
                "anthropic_configured": self.llm.anthropic_api_key.is_some(),
                "gemini_configured": self.llm.gemini_api_key.is_some(),
                "openrouter_configured": self.llm.openrouter_api_key.is_some(),
                "n8n_configured": self.llm.n8n_webhook_url.is_some(),
                "custom_configured": self.llm.custom_base_url.is_some(),
                "ollama_url": self.llm.ollama_url,
                "lmstudio_url": self.llm.lmstudio_url,
            },
            "agents": self.agents,
        })
    }
}

// ── LLM backends ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "openai", "anthropic", "gemini", "ollama", "lmstudio", "openrouter", "n8n", "custom"
    pub active_provider: String,
    /// Backend retried when the active one fails. `None` disables the retry.
    pub fallback_provider: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub anthropic_model: String,
    pub anthropic_base_url: Option<String>,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub ollama_url: Option<String>,
    pub ollama_model: String,
    pub lmstudio_url: Option<String>,
    pub lmstudio_model: String,
    pub openrouter_api_key: Option<String>,
    pub openrouter_model: String,
    pub n8n_webhook_url: Option<String>,
    pub n8n_api_key: Option<String>,
    pub custom_base_url: Option<String>,
    pub custom_api_key: Option<String>,
    pub custom_model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
}

impl LlmConfig {
    fn from_env_profiled(p: &str) -> Self {
        let fallback = profiled_env_or(p, "LLM_FALLBACK_PROVIDER", "openai");
        Self {
            active_provider: profiled_env_or(p, "LLM_PROVIDER", "openai").to_lowercase(),
            fallback_provider: match fallback.to_lowercase().as_str() {
                "" | "none" | "off" => None,
                other => Some(other.to_string()),
            },
            openai_api_key: profiled_env_opt(p, "OPENAI_API_KEY"),
            openai_model: profiled_env_or(p, "OPENAI_MODEL", "gpt-4o"),
            openai_base_url: profiled_env_opt(p, "OPENAI_BASE_URL"),
            anthropic_api_key: profiled_env_opt(p, "ANTHROPIC_API_KEY"),
            anthropic_model: profiled_env_or(p, "ANTHROPIC_MODEL", "claude-sonnet-4-20250514"),
            anthropic_base_url: profiled_env_opt(p, "ANTHROPIC_BASE_URL"),
            gemini_api_key: profiled_env_opt(p, "GEMINI_API_KEY"),
            gemini_model: profiled_env_or(p, "GEMINI_MODEL", "gemini-2.0-flash"),
            ollama_url: profiled_env_opt(p, "OLLAMA_URL"),
            ollama_model: profiled_env_or(p, "OLLAMA_MODEL", "llama3.2"),
            lmstudio_url: profiled_env_opt(p, "LMSTUDIO_URL"),
            lmstudio_model: profiled_env_or(p, "LMSTUDIO_MODEL", "local-model"),
            openrouter_api_key: profiled_env_opt(p, "OPENROUTER_API_KEY"),
            openrouter_model: profiled_env_or(p, "OPENROUTER_MODEL", "openai/gpt-4o"),
            n8n_webhook_url: profiled_env_opt(p, "N8N_WEBHOOK_URL"),
            n8n_api_key: profiled_env_opt(p, "N8N_API_KEY"),
            custom_base_url: profiled_env_opt(p, "CUSTOM_LLM_BASE_URL"),
            custom_api_key: profiled_env_opt(p, "CUSTOM_LLM_API_KEY"),
            custom_model: profiled_env_opt(p, "CUSTOM_LLM_MODEL"),
            temperature: profiled_env_or(p, "LLM_TEMPERATURE", "0.7")
                .parse()
                .unwrap_or(0.7),
            max_tokens: profiled_env_u32(p, "LLM_MAX_TOKENS", 4096),
            request_timeout_secs: profiled_env_u64(p, "LLM_REQUEST_TIMEOUT_SECS", 120),
        }
    }
}

// ── Agent hierarchy ──────────────────────────────────────────

/// Iteration caps per orchestrator and the wall-clock budget of one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLimits {
    pub master_max_iterations: usize,
    pub analytics_max_iterations: usize,
    pub research_max_iterations: usize,
    pub content_max_iterations: usize,
    pub task_timeout_secs: u64,
}

impl AgentLimits {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            master_max_iterations: profiled_env_u32(p, "MASTER_MAX_ITERATIONS", 20) as usize,
            analytics_max_iterations: profiled_env_u32(p, "ANALYTICS_MAX_ITERATIONS", 15) as usize,
            research_max_iterations: profiled_env_u32(p, "RESEARCH_MAX_ITERATIONS", 15) as usize,
            content_max_iterations: profiled_env_u32(p, "CONTENT_MAX_ITERATIONS", 10) as usize,
            task_timeout_secs: profiled_env_u64(p, "TASK_TIMEOUT_SECS", 300),
        }
    }
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self {
            master_max_iterations: 20,
            analytics_max_iterations: 15,
            research_max_iterations: 15,
            content_max_iterations: 10,
            task_timeout_secs: 300,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiled_lookup_prefers_prefixed_key() {
        env::set_var("MAESTROTESTA_LLM_PROVIDER", "Anthropic");
        env::set_var("MAESTROTESTA_MASTER_MAX_ITERATIONS", "7");

        let config = Config::for_profile("maestrotesta");
        assert_eq!(config.profile, "MAESTROTESTA");
        assert_eq!(config.llm.active_provider, "anthropic");
        assert_eq!(config.agents.master_max_iterations, 7);
        assert_eq!(config.profile_label(), "MAESTROTESTA");
    }

    #[test]
    fn test_fallback_can_be_disabled() {
        env::set_var("MAESTROTESTB_LLM_FALLBACK_PROVIDER", "none");
        let config = Config::for_profile("MAESTROTESTB");
        assert!(config.llm.fallback_provider.is_none());
    }

    #[test]
    fn test_available_profiles_includes_prefixed() {
        env::set_var("MAESTROTESTC_OPENAI_API_KEY", "sk-test");
        let profiles = Config::available_profiles();
        assert!(profiles.contains(&"default".to_string()));
        assert!(profiles.contains(&"MAESTROTESTC".to_string()));
    }

    #[test]
    fn test_validate_rejects_zero_caps() {
        let mut config = Config::for_profile("MAESTROTESTD");
        config.agents = AgentLimits::default();
        config.llm.temperature = 0.2;
        assert!(config.validate().is_ok());

        config.agents.content_max_iterations = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroLimit { key: "CONTENT_MAX_ITERATIONS", value: 0 })
        );
    }

    #[test]
    fn test_validate_rejects_temperature() {
        let mut config = Config::for_profile("MAESTROTESTE");
        config.agents = AgentLimits::default();
        config.llm.request_timeout_secs = 30;
        config.llm.temperature = 3.5;
        assert_eq!(config.validate(), Err(ConfigError::TemperatureOutOfRange(3.5)));
    }

    #[test]
    fn test_redacted_summary_hides_keys() {
        let mut config = Config::for_profile("MAESTROTESTF");
        config.llm.openai_api_key = Some("sk-secret".into());
        let summary = config.redacted_summary().to_string();
        assert!(!summary.contains("sk-secret"));
        assert!(summary.contains("openai_configured"));
    }
}
