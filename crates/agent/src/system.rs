//! Entry point: builds the provider registry and the agent hierarchy from config.

use futures::FutureExt;
use maestro_core::{AgentLimits, Config};
use maestro_llm::{
    provider_configs_from_env, FallbackPolicy, ProviderConfig, ProviderRegistry, ProviderType,
};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::agent::{Agent, LlmHandle};
use crate::error::AgentError;
use crate::master::MasterOrchestrator;
use crate::task::{Task, TaskResult};
use crate::types::SystemStatus;

/// A ready-to-use hierarchy: master, domain orchestrators and the shared registry.
pub struct AgentSystem {
    master: MasterOrchestrator,
    providers: Arc<ProviderRegistry>,
    task_timeout: Duration,
}

/// Build a registry from `config`, initialize every enabled backend and wire the hierarchy.
///
/// Backend initialization failures are logged, not returned; an unusable active
/// backend surfaces on the first task.
pub async fn create_agent_system(config: &Config) -> Result<AgentSystem, AgentError> {
    create_agent_system_with(config, provider_configs_from_env(&config.llm)).await
}

/// Like [`create_agent_system`], with backend configs supplied by the caller
/// (e.g. environment values overlaid with a settings file).
pub async fn create_agent_system_with(
    config: &Config,
    provider_configs: HashMap<ProviderType, ProviderConfig>,
) -> Result<AgentSystem, AgentError> {
    config.validate()?;
    config.log_summary();

    let active: ProviderType = config.llm.active_provider.parse()?;
    let fallback = FallbackPolicy::from_setting(config.llm.fallback_provider.as_deref())?;

    let registry = ProviderRegistry::new();
    let summary = registry.initialize_all(provider_configs.into_values()).await;
    info!(
        initialized = ?summary.initialized,
        failed = summary.failed.len(),
        skipped = summary.skipped.len(),
        "providers initialized"
    );
    if !summary.initialized.contains(&active) {
        warn!(provider = %active, "active provider is not ready");
    }
    registry.set_active(active);

    let llm = LlmHandle::new(Arc::new(registry), fallback)
        .with_generation(config.llm.temperature, config.llm.max_tokens);
    AgentSystem::with_handle(llm, &config.agents)
}

impl AgentSystem {
    /// Build the hierarchy over a registry the caller already configured.
    pub fn with_registry(
        providers: Arc<ProviderRegistry>,
        limits: AgentLimits,
        fallback: FallbackPolicy,
    ) -> Result<Self, AgentError> {
        Self::with_handle(LlmHandle::new(providers, fallback), &limits)
    }

    pub fn with_handle(llm: LlmHandle, limits: &AgentLimits) -> Result<Self, AgentError> {
        let providers = llm.providers.clone();
        let master = MasterOrchestrator::new(llm, limits)?;
        Ok(Self {
            master,
            providers,
            task_timeout: Duration::from_secs(limits.task_timeout_secs),
        })
    }

    pub fn master(&self) -> &MasterOrchestrator {
        &self.master
    }

    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }

    pub fn task_timeout(&self) -> Duration {
        self.task_timeout
    }

    /// Run a request through the master. An empty description yields a failed result.
    pub async fn execute(&self, description: &str, context: Option<Map<String, Value>>) -> TaskResult {
        match Task::new(description) {
            Ok(task) => self.execute_task(task.with_metadata(context.unwrap_or_default())).await,
            Err(e) => TaskResult::failure(Uuid::new_v4().to_string(), e.to_string()),
        }
    }

    /// Run a prepared task through the master under the configured timeout.
    pub async fn execute_task(&self, task: Task) -> TaskResult {
        let start = Instant::now();
        let run = AssertUnwindSafe(self.master.execute(&task)).catch_unwind();

        match tokio::time::timeout(self.task_timeout, run).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                error!(task_id = %task.id, "master orchestrator panicked");
                TaskResult::failure(task.id.clone(), "master orchestrator panicked")
                    .with_execution_time(start.elapsed())
            }
            Err(_) => {
                warn!(task_id = %task.id, timeout_secs = self.task_timeout.as_secs(), "task timed out");
                TaskResult::failure(
                    task.id.clone(),
                    format!("task timed out after {}s", self.task_timeout.as_secs()),
                )
                .with_execution_time(start.elapsed())
            }
        }
    }

    pub async fn status(&self) -> SystemStatus {
        self.master.system_status().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::scripted_llm;

    #[tokio::test]
    async fn test_empty_description_fails_without_model_call() {
        let (provider, llm) = scripted_llm();
        let system = AgentSystem::with_handle(llm, &AgentLimits::default()).unwrap();

        let result = system.execute("   ", None).await;
        assert!(!result.is_success());
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_context_reaches_master_prompt() {
        let (provider, llm) = scripted_llm();
        provider.queue_text("hello");
        let system = AgentSystem::with_handle(llm, &AgentLimits::default()).unwrap();

        let mut context = Map::new();
        context.insert("audience".into(), Value::String("ops team".into()));
        let result = system.execute("Say hello", Some(context)).await;
        assert_eq!(result.output_text().as_deref(), Some("hello"));
        assert_eq!(result.agent_id.as_deref(), Some("master"));

        let user = &provider.requests()[0].messages[1];
        assert!(user.content.contains("## Context"));
        assert!(user.content.contains("ops team"));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = Config::for_profile("");
        config.agents.master_max_iterations = 0;
        assert!(matches!(
            create_agent_system(&config).await,
            Err(AgentError::Config(_))
        ));

        let mut config = Config::for_profile("");
        config.llm.active_provider = "skynet".into();
        assert!(matches!(
            create_agent_system(&config).await,
            Err(AgentError::Llm(_))
        ));
    }
}
