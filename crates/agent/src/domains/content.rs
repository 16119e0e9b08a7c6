use async_trait::async_trait;
use maestro_tool_runtime::{RenderTemplateTool, TextMetricsTool};

use super::{capabilities, meta_text, push_section};
use crate::agent::{Agent, AgentCore, LlmHandle};
use crate::error::AgentError;
use crate::orchestrator::Orchestrator;
use crate::task::{Task, TaskResult};
use crate::types::{AgentConfig, AgentRole};

pub const CONTENT_ID: &str = "content";
pub const CONTENT_CAPABILITIES: &[&str] = &["content", "write", "article", "blog", "copy", "summary"];

const SYSTEM_PROMPT: &str = include_str!("../prompts/content.md");
const DEFAULT_TONE: &str = "professional";
const DEFAULT_FORMAT: &str = "article";

/// Writing in a requested tone and format.
pub struct ContentOrchestrator {
    inner: Orchestrator,
    max_iterations: usize,
}

impl ContentOrchestrator {
    pub fn new(llm: LlmHandle, max_iterations: usize) -> Result<Self, AgentError> {
        let config = llm.configure(
            AgentConfig::new(CONTENT_ID, "Content Orchestrator", AgentRole::SubOrchestrator)
                .description("Writes articles, summaries and marketing copy")
                .domain("content")
                .system_prompt(SYSTEM_PROMPT),
        );
        let mut core = AgentCore::new(config, llm);
        core.register_tool(TextMetricsTool)?;
        core.register_tool(RenderTemplateTool)?;

        Ok(Self {
            inner: Orchestrator::new(core),
            max_iterations,
        })
    }

    pub fn capabilities() -> Vec<String> {
        capabilities(CONTENT_CAPABILITIES)
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.inner
    }

    pub fn orchestrator_mut(&mut self) -> &mut Orchestrator {
        &mut self.inner
    }

    fn build_prompt(task: &Task) -> String {
        let mut prompt = task.description.clone();

        let mut brief = Vec::new();
        if let Some(topic) = task.meta_str("topic") {
            brief.push(format!("- Topic: {topic}"));
        }
        brief.push(format!("- Tone: {}", task.meta_str("tone").unwrap_or(DEFAULT_TONE)));
        brief.push(format!("- Format: {}", task.meta_str("format").unwrap_or(DEFAULT_FORMAT)));
        if let Some(audience) = task.meta_str("audience") {
            brief.push(format!("- Audience: {audience}"));
        }
        if let Some(length) = meta_text(task, "length") {
            brief.push(format!("- Length: {length}"));
        }
        push_section(&mut prompt, "Brief", &brief.join("\n"));

        if let Some(source) = meta_text(task, "source_material") {
            push_section(&mut prompt, "Source Material", &source);
        }
        prompt
    }
}

#[async_trait]
impl Agent for ContentOrchestrator {
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
    fn test_prompt_defaults_tone_and_format() {
        let prompt = ContentOrchestrator::build_prompt(&Task::new("Write about Rust").unwrap());
        assert!(prompt.contains("- Tone: professional"));
        assert!(prompt.contains("- Format: article"));
        assert!(!prompt.contains("Audience"));
    }

    #[test]
    fn test_prompt_uses_metadata() {
        let mut task = Task::new("Write a post").unwrap();
        task.metadata.insert("topic".into(), json!("ownership"));
        task.metadata.insert("tone".into(), json!("playful"));
        task.metadata.insert("format".into(), json!("blog"));
        task.metadata.insert("audience".into(), json!("beginners"));
        task.metadata.insert("length".into(), json!(500));

        let prompt = ContentOrchestrator::build_prompt(&task);
        assert!(prompt.contains(
            "## Brief\n- Topic: ownership\n- Tone: playful\n- Format: blog\n- Audience: beginners\n- Length: 500"
        ));
    }

    #[tokio::test]
    async fn test_execute_failure_is_reported() {
        let (provider, llm) = scripted_llm();
        provider.queue_error(429, "rate limited");

        let content = ContentOrchestrator::new(llm, 10).unwrap();
        let result = content.execute(&Task::new("Write").unwrap()).await;
        assert!(!result.is_success());
        assert!(result.error().unwrap().contains("rate limited"));
    }
}
