//! Top of the hierarchy: plans a request and delegates to the domain orchestrators.

use async_trait::async_trait;
use indexmap::IndexMap;
use maestro_core::AgentLimits;
use maestro_tool_runtime::{ParamType, ParameterSpec};
use std::sync::Arc;

use crate::agent::{Agent, AgentCore, LlmHandle};
use crate::domains::{
    push_section, AnalyticsOrchestrator, ContentOrchestrator, ResearchOrchestrator,
};
use crate::error::AgentError;
use crate::orchestrator::Orchestrator;
use crate::task::{Task, TaskResult};
use crate::types::{AgentConfig, AgentRole, SystemStatus};

pub const MASTER_ID: &str = "master";

const SYSTEM_PROMPT: &str = include_str!("prompts/master.md");

pub struct MasterOrchestrator {
    inner: Orchestrator,
    analytics: Arc<AnalyticsOrchestrator>,
    research: Arc<ResearchOrchestrator>,
    content: Arc<ContentOrchestrator>,
    max_iterations: usize,
}

impl MasterOrchestrator {
    /// Build the master and its three domain orchestrators over one shared handle.
    pub fn new(llm: LlmHandle, limits: &AgentLimits) -> Result<Self, AgentError> {
        let analytics = Arc::new(AnalyticsOrchestrator::new(
            llm.clone(),
            limits.analytics_max_iterations,
        )?);
        let research = Arc::new(ResearchOrchestrator::new(
            llm.clone(),
            limits.research_max_iterations,
        )?);
        let content = Arc::new(ContentOrchestrator::new(
            llm.clone(),
            limits.content_max_iterations,
        )?);

        let config = llm.configure(
            AgentConfig::new(MASTER_ID, "Master Orchestrator", AgentRole::MasterOrchestrator)
                .description("Plans requests and coordinates the domain orchestrators")
                .domain("general")
                .system_prompt(SYSTEM_PROMPT),
        );
        let mut inner = Orchestrator::new(AgentCore::new(config, llm));

        let mut extra = IndexMap::new();
        extra.insert(
            "data".to_string(),
            ParameterSpec::new(ParamType::Array, "Numeric data to analyze").with_items(ParamType::Number),
        );
        extra.insert(
            "analysis_type".to_string(),
            ParameterSpec::new(ParamType::String, "Kind of analysis to run")
                .with_enum(["descriptive", "correlation", "trend", "comparative"]),
        );
        inner.register_sub_agent_with_tool(
            analytics.clone(),
            AnalyticsOrchestrator::capabilities(),
            "delegate_to_analytics",
            "Delegate data analysis, statistics, correlations or trend detection to the Analytics Orchestrator.",
            extra,
        )?;

        let mut extra = IndexMap::new();
        extra.insert(
            "urls".to_string(),
            ParameterSpec::new(ParamType::Array, "Web pages to read").with_items(ParamType::String),
        );
        extra.insert(
            "topic".to_string(),
            ParameterSpec::new(ParamType::String, "Research topic"),
        );
        inner.register_sub_agent_with_tool(
            research.clone(),
            ResearchOrchestrator::capabilities(),
            "delegate_to_research",
            "Delegate web research, source summarization or keyword extraction to the Research Orchestrator.",
            extra,
        )?;

        let mut extra = IndexMap::new();
        extra.insert(
            "topic".to_string(),
            ParameterSpec::new(ParamType::String, "Subject of the piece"),
        );
        extra.insert(
            "tone".to_string(),
            ParameterSpec::new(ParamType::String, "Writing tone").with_default("professional".into()),
        );
        extra.insert(
            "format".to_string(),
            ParameterSpec::new(ParamType::String, "Output format, e.g. article, blog, summary")
                .with_default("article".into()),
        );
        inner.register_sub_agent_with_tool(
            content.clone(),
            ContentOrchestrator::capabilities(),
            "delegate_to_content",
            "Delegate writing of articles, posts, summaries or other copy to the Content Orchestrator.",
            extra,
        )?;

        Ok(Self {
            inner,
            analytics,
            research,
            content,
            max_iterations: limits.master_max_iterations,
        })
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.inner
    }

    pub fn analytics(&self) -> &AnalyticsOrchestrator {
        &self.analytics
    }

    pub fn research(&self) -> &ResearchOrchestrator {
        &self.research
    }

    pub fn content(&self) -> &ContentOrchestrator {
        &self.content
    }

    fn build_prompt(task: &Task) -> String {
        let mut prompt = task.description.clone();
        if !task.metadata.is_empty() {
            let context = serde_json::to_string_pretty(&task.metadata).unwrap_or_default();
            push_section(&mut prompt, "Context", &context);
        }
        prompt
    }

    /// Snapshot of the whole hierarchy and the backends.
    pub async fn system_status(&self) -> SystemStatus {
        let providers = &self.inner.core().llm().providers;
        SystemStatus {
            master: self.inner.core().snapshot(),
            orchestrators: vec![
                self.analytics.status(),
                self.research.status(),
                self.content.status(),
            ],
            active_provider: providers.active_provider(),
            providers: providers.statuses().await,
            delegation: self.inner.get_stats(),
        }
    }
}

#[async_trait]
impl Agent for MasterOrchestrator {
    fn core(&self) -> &AgentCore {
        self.inner.core()
    }

    async fn execute(&self, task: &Task) -> TaskResult {
        self.inner
            .core()
            .execute_prompt(task, Self::build_prompt(task), self.max_iterations)
            .await
    }
}
