use async_trait::async_trait;
use maestro_tool_runtime::{ExtractKeywordsTool, WebFetchTool};
use serde_json::Value;

use super::{capabilities, push_section};
use crate::agent::{Agent, AgentCore, LlmHandle};
use crate::error::AgentError;
use crate::orchestrator::Orchestrator;
use crate::task::{Task, TaskResult};
use crate::types::{AgentConfig, AgentRole};

pub const RESEARCH_ID: &str = "research";
pub const RESEARCH_CAPABILITIES: &[&str] = &["research", "search", "web", "url", "fetch", "keywords"];

const SYSTEM_PROMPT: &str = include_str!("../prompts/research.md");

/// Source gathering and synthesis over `urls` and `topic`.
pub struct ResearchOrchestrator {
    inner: Orchestrator,
    max_iterations: usize,
}

impl ResearchOrchestrator {
    pub fn new(llm: LlmHandle, max_iterations: usize) -> Result<Self, AgentError> {
        let config = llm.configure(
            AgentConfig::new(RESEARCH_ID, "Research Orchestrator", AgentRole::SubOrchestrator)
                .description("Fetches web sources, extracts themes and writes research briefs")
                .domain("research")
                .system_prompt(SYSTEM_PROMPT),
        );
        let mut core = AgentCore::new(config, llm);
        core.register_tool(WebFetchTool::new())?;
        core.register_tool(ExtractKeywordsTool)?;

        Ok(Self {
            inner: Orchestrator::new(core),
            max_iterations,
        })
    }

    pub fn capabilities() -> Vec<String> {
        capabilities(RESEARCH_CAPABILITIES)
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.inner
    }

    pub fn orchestrator_mut(&mut self) -> &mut Orchestrator {
        &mut self.inner
    }

    /// `urls` may be a list or a single string.
    fn urls(task: &Task) -> Vec<String> {
        match task.metadata.get("urls") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
            _ => Vec::new(),
        }
    }

    fn build_prompt(task: &Task) -> String {
        let mut prompt = task.description.clone();
        if let Some(topic) = task.meta_str("topic") {
            push_section(&mut prompt, "Topic", topic);
        }
        let urls = Self::urls(task);
        if !urls.is_empty() {
            let list: Vec<String> = urls.iter().map(|u| format!("- {u}")).collect();
            push_section(&mut prompt, "Sources", &list.join("\n"));
        }
        let depth = task.meta_str("depth").unwrap_or("standard");
        push_section(&mut prompt, "Depth", depth);
        prompt
    }
}

#[async_trait]
impl Agent for ResearchOrchestrator {
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
