use async_trait::async_trait;
use maestro_tool_runtime::{CorrelationTool, StatisticalAnalysisTool};

use super::{capabilities, meta_text, push_section};
use crate::agent::{Agent, AgentCore, LlmHandle};
use crate::error::AgentError;
use crate::orchestrator::Orchestrator;
use crate::task::{Task, TaskResult};
use crate::types::{AgentConfig, AgentRole};

pub const ANALYTICS_ID: &str = "analytics";
pub const ANALYTICS_CAPABILITIES: &[&str] =
    &["analytics", "analysis", "statistics", "data", "correlation", "trend"];

const SYSTEM_PROMPT: &str = include_str!("../prompts/analytics.md");
const DEFAULT_ANALYSIS: &str = "descriptive";

/// Numeric analysis over `data` supplied in task metadata.
pub struct AnalyticsOrchestrator {
    inner: Orchestrator,
    max_iterations: usize,
}

impl AnalyticsOrchestrator {
    pub fn new(llm: LlmHandle, max_iterations: usize) -> Result<Self, AgentError> {
        let config = llm.configure(
            AgentConfig::new(ANALYTICS_ID, "Analytics Orchestrator", AgentRole::SubOrchestrator)
                .description("Statistical analysis, correlations and trend detection over numeric data")
                .domain("analytics")
                .system_prompt(SYSTEM_PROMPT),
        );
        let mut core = AgentCore::new(config, llm);
        core.register_tool(StatisticalAnalysisTool)?;
        core.register_tool(CorrelationTool)?;

        Ok(Self {
            inner: Orchestrator::new(core),
            max_iterations,
        })
    }

    pub fn capabilities() -> Vec<String> {
        capabilities(ANALYTICS_CAPABILITIES)
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.inner
    }

    pub fn orchestrator_mut(&mut self) -> &mut Orchestrator {
        &mut self.inner
    }

    fn build_prompt(task: &Task) -> String {
        let mut prompt = task.description.clone();
        let analysis = task.meta_str("analysis_type").unwrap_or(DEFAULT_ANALYSIS);
        push_section(&mut prompt, "Analysis Type", analysis);
        match meta_text(task, "data") {
            Some(data) => push_section(&mut prompt, "Data", &data),
            None => push_section(
                &mut prompt,
                "Data",
                "No data was supplied. Work from the values in the request, or explain what data is needed.",
            ),
        }
        prompt
    }
}

#[async_trait]
impl Agent for AnalyticsOrchestrator {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::scripted_llm;
    use serde_json::json;

    #[test]
    fn test_prompt_includes_data_and_analysis_type() {
        let mut task = Task::new("Find the trend").unwrap();
        task.metadata.insert("data".into(), json!([1, 2, 3]));
        task.metadata.insert("analysis_type".into(), json!("trend"));

        let prompt = AnalyticsOrchestrator::build_prompt(&task);
        assert!(prompt.starts_with("Find the trend"));
        assert!(prompt.contains("## Analysis Type\ntrend"));
        assert!(prompt.contains("## Data\n[\n  1,"));
    }

    #[test]
    fn test_prompt_defaults() {
        let prompt = AnalyticsOrchestrator::build_prompt(&Task::new("Describe").unwrap());
        assert!(prompt.contains("## Analysis Type\ndescriptive"));
        assert!(prompt.contains("No data was supplied"));
    }

    #[tokio::test]
    async fn test_execute_runs_statistics_tool() {
        let (provider, llm) = scripted_llm();
        provider
            .queue_tool_call("statistical_analysis", r#"{"data":[1,2,3,4,5]}"#)
            .queue_text("Mean 3, median 3.");

        let analytics = AnalyticsOrchestrator::new(llm, 15).unwrap();
        assert_eq!(
            analytics.core().tools().names(),
            vec!["statistical_analysis", "correlation"]
        );

        let result = analytics.execute(&Task::new("Summarize").unwrap()).await;
        assert!(result.is_success());
        assert_eq!(result.output_text().as_deref(), Some("Mean 3, median 3."));
        assert_eq!(result.agent_id.as_deref(), Some(ANALYTICS_ID));

        let system = &provider.requests()[0].messages[0];
        assert!(system.content.contains("Analytics Orchestrator"));
    }
}
