//! Holds one adapter per backend and routes completions to the active one.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock as StdRwLock;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::{ProviderConfig, ProviderType};
use crate::provider::{AiProvider, LlmError};
use crate::providers::create_adapter;
use crate::types::{ChatCompletionRequest, ChatCompletionResponse, ConnectionTest, ModelInfo};

/// What to do when the active backend fails a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", content = "provider", rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Propagate the error.
    Disabled,
    /// Retry once against this backend with its default model.
    Provider(ProviderType),
}

impl FallbackPolicy {
    /// Parse a setting value; `None`, `"none"` and `"off"` disable the retry.
    pub fn from_setting(value: Option<&str>) -> Result<Self, LlmError> {
        match value.map(str::trim) {
            None => Ok(FallbackPolicy::Disabled),
            Some(v) if v.is_empty() || v.eq_ignore_ascii_case("none") || v.eq_ignore_ascii_case("off") => {
                Ok(FallbackPolicy::Disabled)
            }
            Some(v) => Ok(FallbackPolicy::Provider(v.parse()?)),
        }
    }

    pub fn target(&self) -> Option<ProviderType> {
        match self {
            FallbackPolicy::Disabled => None,
            FallbackPolicy::Provider(kind) => Some(*kind),
        }
    }
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        FallbackPolicy::Provider(ProviderType::DEFAULT)
    }
}

/// Outcome of [`ProviderRegistry::initialize_all`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct InitSummary {
    pub initialized: Vec<ProviderType>,
    pub failed: Vec<(ProviderType, String)>,
    pub skipped: Vec<ProviderType>,
}

/// Point-in-time view of one backend.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub provider_type: ProviderType,
    pub enabled: bool,
    pub ready: bool,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

/// Registry of backend adapters.
///
/// Constructed explicitly and shared by `Arc`; there is no process-wide instance.
/// Adapters sit behind async locks because initialization mutates them while
/// completions may be in flight on other backends.
pub struct ProviderRegistry {
    adapters: HashMap<ProviderType, RwLock<Box<dyn AiProvider>>>,
    configs: StdRwLock<HashMap<ProviderType, ProviderConfig>>,
    active: StdRwLock<ProviderType>,
}

impl ProviderRegistry {
    /// One unconfigured adapter per backend type, active = the default backend.
    pub fn new() -> Self {
        let adapters = ProviderType::ALL
            .into_iter()
            .map(|kind| (kind, RwLock::new(create_adapter(kind))))
            .collect();
        Self {
            adapters,
            configs: StdRwLock::new(HashMap::new()),
            active: StdRwLock::new(ProviderType::DEFAULT),
        }
    }

    /// Replace the adapter for its backend type.
    pub fn with_adapter(mut self, adapter: Box<dyn AiProvider>) -> Self {
        self.adapters.insert(adapter.provider_type(), RwLock::new(adapter));
        self
    }

    fn adapter(&self, kind: ProviderType) -> Result<&RwLock<Box<dyn AiProvider>>, LlmError> {
        self.adapters
            .get(&kind)
            .ok_or_else(|| LlmError::NotConfigured(format!("no adapter registered for {kind}")))
    }

    /// Store every config and initialize the enabled ones.
    ///
    /// Individual failures are logged and reported in the summary, never returned.
    pub async fn initialize_all(
        &self,
        configs: impl IntoIterator<Item = ProviderConfig>,
    ) -> InitSummary {
        let mut summary = InitSummary::default();
        let configs: Vec<ProviderConfig> = configs.into_iter().collect();

        {
            let mut stored = self.configs.write().unwrap_or_else(|e| e.into_inner());
            for cfg in &configs {
                stored.insert(cfg.provider_type, cfg.clone());
            }
        }

        for cfg in configs {
            let kind = cfg.provider_type;
            if !cfg.enabled {
                summary.skipped.push(kind);
                continue;
            }
            match self.initialize_provider(kind, &cfg).await {
                Ok(()) => summary.initialized.push(kind),
                Err(e) => {
                    warn!(provider = %kind, error = %e, "provider initialization failed");
                    summary.failed.push((kind, e.to_string()));
                }
            }
        }

        summary.initialized.sort();
        summary.skipped.sort();
        info!(
            initialized = summary.initialized.len(),
            failed = summary.failed.len(),
            skipped = summary.skipped.len(),
            "provider registry initialized"
        );
        summary
    }

    /// Initialize one backend with the given config (stored for later lazy use).
    pub async fn initialize_provider(
        &self,
        kind: ProviderType,
        config: &ProviderConfig,
    ) -> Result<(), LlmError> {
        self.configs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(kind, config.clone());
        let mut adapter = self.adapter(kind)?.write().await;
        adapter.initialize(config)?;
        debug!(provider = %kind, "provider initialized");
        Ok(())
    }

    pub fn set_active(&self, kind: ProviderType) {
        *self.active.write().unwrap_or_else(|e| e.into_inner()) = kind;
        info!(provider = %kind, "active provider set");
    }

    pub fn active_provider(&self) -> ProviderType {
        *self.active.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn config_for(&self, kind: ProviderType) -> Option<ProviderConfig> {
        self.configs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&kind)
            .cloned()
    }

    /// Initialize from the stored config unless already ready.
    async fn ensure_initialized(&self, kind: ProviderType) -> Result<(), LlmError> {
        if self.adapter(kind)?.read().await.is_ready() {
            return Ok(());
        }
        let config = self
            .config_for(kind)
            .ok_or_else(|| LlmError::NotConfigured(format!("no configuration stored for {kind}")))?;
        let mut adapter = self.adapter(kind)?.write().await;
        if !adapter.is_ready() {
            adapter.initialize(&config)?;
            debug!(provider = %kind, "provider lazily initialized");
        }
        Ok(())
    }

    async fn complete_with(
        &self,
        kind: ProviderType,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, LlmError> {
        let adapter = self.adapter(kind)?.read().await;
        adapter.create_chat_completion(request).await
    }

    /// Route a completion to the active backend only.
    pub async fn create_chat_completion(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, LlmError> {
        self.complete_with(self.active_provider(), request).await
    }

    /// Completion on the active backend, retried once on the fallback backend.
    ///
    /// The retry drops the requested model so the fallback uses its own default.
    /// When the active backend is the fallback backend the error is returned as-is.
    pub async fn complete(
        &self,
        request: &ChatCompletionRequest,
        policy: &FallbackPolicy,
    ) -> Result<ChatCompletionResponse, LlmError> {
        let active = self.active_provider();
        let primary_error = match self.complete_with(active, request).await {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };

        let fallback = match policy.target() {
            Some(fallback) if fallback != active => fallback,
            _ => return Err(primary_error),
        };

        warn!(
            primary = %active,
            fallback = %fallback,
            error = %primary_error,
            "active provider failed, retrying on fallback"
        );

        let fallback_failed = |e: LlmError| LlmError::FallbackFailed {
            primary: active,
            primary_error: primary_error.to_string(),
            fallback,
            fallback_error: e.to_string(),
        };

        self.ensure_initialized(fallback)
            .await
            .map_err(&fallback_failed)?;

        let mut retry = request.clone();
        retry.model = None;
        self.complete_with(fallback, &retry)
            .await
            .map_err(&fallback_failed)
    }

    /// Probe a backend, initializing it from its stored config first. Never errors.
    pub async fn test_provider(&self, kind: ProviderType) -> ConnectionTest {
        if let Err(e) = self.ensure_initialized(kind).await {
            return ConnectionTest::failed(e.to_string());
        }
        match self.adapter(kind) {
            Ok(adapter) => adapter.read().await.test_connection().await,
            Err(e) => ConnectionTest::failed(e.to_string()),
        }
    }

    pub async fn list_models(&self, kind: ProviderType) -> Result<Vec<ModelInfo>, LlmError> {
        self.ensure_initialized(kind).await?;
        self.adapter(kind)?.read().await.list_models().await
    }

    pub async fn default_model(&self, kind: ProviderType) -> Option<String> {
        let adapter = self.adapter(kind).ok()?;
        let guard = adapter.read().await;
        guard.default_model()
    }

    /// Enabled / ready / active flags for every backend, in declaration order.
    pub async fn statuses(&self) -> Vec<ProviderStatus> {
        let active = self.active_provider();
        let mut out = Vec::with_capacity(ProviderType::ALL.len());
        for kind in ProviderType::ALL {
            let enabled = self.config_for(kind).is_some_and(|c| c.enabled);
            let (ready, default_model) = match self.adapters.get(&kind) {
                Some(adapter) => {
                    let guard = adapter.read().await;
                    (guard.is_ready(), guard.default_model())
                }
                None => (false, None),
            };
            out.push(ProviderStatus {
                provider_type: kind,
                enabled,
                ready,
                active: kind == active,
                default_model,
            });
        }
        out
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedProvider;
    use crate::types::ChatMessage;

    fn request() -> ChatCompletionRequest {
        ChatCompletionRequest::new(vec![ChatMessage::user("hello")])
            .with_model(Some("primary-model".into()))
    }

    fn enabled(kind: ProviderType) -> ProviderConfig {
        ProviderConfig::new(kind).enabled().with_default_model(format!("{kind}-default"))
    }

    async fn registry_with(
        primary: &ScriptedProvider,
        fallback: &ScriptedProvider,
    ) -> ProviderRegistry {
        let registry = ProviderRegistry::new()
            .with_adapter(Box::new(primary.clone()))
            .with_adapter(Box::new(fallback.clone()));
        registry
            .initialize_all([
                enabled(primary.kind()),
                // Stored but not initialized: exercised lazily on fallback.
                ProviderConfig::new(fallback.kind()).with_default_model("fallback-default"),
            ])
            .await;
        registry.set_active(primary.kind());
        registry
    }

    #[tokio::test]
    async fn test_routes_to_active_only() {
        let anthropic = ScriptedProvider::new(ProviderType::Anthropic);
        let openai = ScriptedProvider::new(ProviderType::OpenAi);
        anthropic.queue_text("from anthropic");
        let registry = registry_with(&anthropic, &openai).await;

        let resp = registry.create_chat_completion(&request()).await.unwrap();
        assert_eq!(resp.choices[0].message.content, "from anthropic");
        assert_eq!(openai.call_count(), 0);
    }

    #[tokio::test]
    async fn test_fallback_retries_with_default_model() {
        let anthropic = ScriptedProvider::new(ProviderType::Anthropic);
        let openai = ScriptedProvider::new(ProviderType::OpenAi);
        anthropic.queue_error(503, "overloaded");
        openai.queue_text("rescued");
        let registry = registry_with(&anthropic, &openai).await;

        let resp = registry
            .complete(&request(), &FallbackPolicy::default())
            .await
            .unwrap();
        assert_eq!(resp.choices[0].message.content, "rescued");

        let retried = openai.requests();
        assert_eq!(retried.len(), 1);
        assert!(retried[0].model.is_none());
        assert!(openai.is_ready());
    }

    #[tokio::test]
    async fn test_fallback_failure_reports_both() {
        let anthropic = ScriptedProvider::new(ProviderType::Anthropic);
        let openai = ScriptedProvider::new(ProviderType::OpenAi);
        anthropic.queue_error(500, "primary down");
        openai.queue_error(401, "bad key");
        let registry = registry_with(&anthropic, &openai).await;

        let err = registry
            .complete(&request(), &FallbackPolicy::default())
            .await
            .unwrap_err();
        match err {
            LlmError::FallbackFailed { primary, fallback, fallback_error, .. } => {
                assert_eq!(primary, ProviderType::Anthropic);
                assert_eq!(fallback, ProviderType::OpenAi);
                assert!(fallback_error.contains("bad key"));
            }
            other => panic!("expected FallbackFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_default_backend_error_propagates() {
        let openai = ScriptedProvider::new(ProviderType::OpenAi);
        let anthropic = ScriptedProvider::new(ProviderType::Anthropic);
        openai.queue_error(500, "boom");
        let registry = registry_with(&openai, &anthropic).await;

        let err = registry
            .complete(&request(), &FallbackPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Api { status: 500, .. }));
        assert_eq!(openai.call_count(), 1);
    }

    #[tokio::test]
    async fn test_disabled_policy_does_not_retry() {
        let anthropic = ScriptedProvider::new(ProviderType::Anthropic);
        let openai = ScriptedProvider::new(ProviderType::OpenAi);
        anthropic.queue_error(500, "boom");
        let registry = registry_with(&anthropic, &openai).await;

        assert!(registry
            .complete(&request(), &FallbackPolicy::Disabled)
            .await
            .is_err());
        assert_eq!(openai.call_count(), 0);
    }

    #[tokio::test]
    async fn test_initialize_all_swallows_failures() {
        let broken = ScriptedProvider::new(ProviderType::Gemini);
        broken.fail_init("GEMINI_API_KEY not set");
        let registry = ProviderRegistry::new().with_adapter(Box::new(broken.clone()));

        let summary = registry
            .initialize_all([
                enabled(ProviderType::Gemini),
                ProviderConfig::new(ProviderType::Ollama),
            ])
            .await;
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.skipped, vec![ProviderType::Ollama]);

        let statuses = registry.statuses().await;
        let gemini = statuses
            .iter()
            .find(|s| s.provider_type == ProviderType::Gemini)
            .unwrap();
        assert!(gemini.enabled && !gemini.ready);
        assert!(statuses.iter().any(|s| s.active && s.provider_type == ProviderType::OpenAi));
    }

    #[tokio::test]
    async fn test_lazy_initialization_for_test_and_models() {
        let ollama = ScriptedProvider::new(ProviderType::Ollama);
        let registry = ProviderRegistry::new().with_adapter(Box::new(ollama.clone()));
        registry
            .initialize_all([ProviderConfig::new(ProviderType::Ollama).with_default_model("llama3.2")])
            .await;
        assert!(!ollama.is_ready());

        assert!(registry.test_provider(ProviderType::Ollama).await.success);
        assert!(ollama.is_ready());
        let models = registry.list_models(ProviderType::Ollama).await.unwrap();
        assert_eq!(models[0].id, "llama3.2");

        let unknown = registry.test_provider(ProviderType::N8n).await;
        assert!(!unknown.success);
    }

    #[test]
    fn test_fallback_policy_parsing() {
        assert_eq!(FallbackPolicy::from_setting(None).unwrap(), FallbackPolicy::Disabled);
        assert_eq!(
            FallbackPolicy::from_setting(Some("NONE")).unwrap(),
            FallbackPolicy::Disabled
        );
        assert_eq!(
            FallbackPolicy::from_setting(Some("ollama")).unwrap(),
            FallbackPolicy::Provider(ProviderType::Ollama)
        );
        assert!(FallbackPolicy::from_setting(Some("bogus")).is_err());
        assert_eq!(
            FallbackPolicy::default(),
            FallbackPolicy::Provider(ProviderType::OpenAi)
        );
    }
}
