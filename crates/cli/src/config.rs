use anyhow::{Context, Result};
use maestro_core::Config;
use maestro_llm::{ProviderConfig, ProviderType};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tracing::debug;

/// Per-backend overrides from the settings file. Unset fields keep the env value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub available_models: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,
}

impl ProviderSettings {
    /// Apply onto an env-derived config. Setting credentials without an explicit
    /// `enabled = false` enables the backend.
    fn apply(&self, cfg: &mut ProviderConfig) {
        if self.api_key.is_some() {
            cfg.api_key.clone_from(&self.api_key);
        }
        if self.base_url.is_some() {
            cfg.base_url.clone_from(&self.base_url);
        }
        if self.default_model.is_some() {
            cfg.default_model.clone_from(&self.default_model);
        }
        if !self.available_models.is_empty() {
            cfg.available_models.clone_from(&self.available_models);
        }
        if let Some(secs) = self.request_timeout_secs {
            cfg.request_timeout_secs = secs;
        }
        for (k, v) in &self.options {
            cfg.options.insert(k.clone(), v.clone());
        }

        cfg.enabled = self
            .enabled
            .unwrap_or(cfg.enabled || self.api_key.is_some() || self.base_url.is_some());
    }
}

/// Settings loaded from TOML.
///
/// ```toml
/// active_provider = "anthropic"
/// fallback_provider = "openai"
///
/// [providers.anthropic]
/// api_key = "sk-ant-..."
/// default_model = "claude-sonnet-4-20250514"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_provider: Option<String>,
    /// `"none"` disables fallback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_provider: Option<String>,
    /// Keyed by provider name (`openai`, `lmstudio`, ...).
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderSettings>,
}

impl CliSettings {
    /// Return the default settings directory path: ~/.config/maestro/
    pub fn default_config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("could not determine user config directory")?
            .join("maestro");
        Ok(config_dir)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        Ok(Self::default_config_dir()?.join("config.toml"))
    }

    /// Load from the given path, or the default path.
    /// A missing default file yields empty settings; a missing explicit path is an error.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let (config_path, explicit) = match path {
            Some(p) => (PathBuf::from(p), true),
            None => (Self::default_config_path()?, false),
        };

        if !config_path.exists() {
            if explicit {
                anyhow::bail!("settings file not found: {}", config_path.display());
            }
            debug!(?config_path, "Settings file not found, using environment only");
            return Ok(Self::default());
        }

        debug!(?config_path, "Loading settings");
        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("failed to read settings: {}", config_path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("failed to parse settings: {}", config_path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let settings: Self = toml::from_str(content)?;
        for name in settings.providers.keys() {
            name.parse::<ProviderType>()
                .with_context(|| format!("unknown provider table [providers.{name}]"))?;
        }
        Ok(settings)
    }

    /// Active/fallback selection. Precedence: `--provider` > settings file > env.
    pub fn apply_selection(&self, config: &mut Config, cli_provider: Option<&str>) {
        if let Some(active) = cli_provider.or(self.active_provider.as_deref()) {
            config.llm.active_provider = active.to_string();
        }
        if self.fallback_provider.is_some() {
            config.llm.fallback_provider.clone_from(&self.fallback_provider);
        }
    }

    /// Overlay the `[providers.*]` tables onto env-derived backend configs.
    pub fn overlay(&self, configs: &mut HashMap<ProviderType, ProviderConfig>) -> Result<()> {
        for (name, settings) in &self.providers {
            let kind: ProviderType = name
                .parse()
                .with_context(|| format!("unknown provider table [providers.{name}]"))?;
            let cfg = configs
                .entry(kind)
                .or_insert_with(|| ProviderConfig::new(kind));
            settings.apply(cfg);
            debug!(provider = %kind, enabled = cfg.enabled, "applied settings overlay");
        }
        Ok(())
    }
}
