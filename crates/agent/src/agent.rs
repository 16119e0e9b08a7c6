//! Agent core: per-agent tools, state and the reasoning/tool-call loop.

use async_trait::async_trait;
use chrono::Utc;
use maestro_llm::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, FallbackPolicy, FinishReason,
    ProviderRegistry,
};
use maestro_tool_runtime::{Tool, ToolRegistry};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::AgentError;
use crate::task::{Task, TaskResult, MAX_ITERATIONS_REACHED};
use crate::types::{AgentConfig, AgentState, AgentStatus, AgentStatusSnapshot};

/// Shared access to the model backends plus generation defaults.
#[derive(Clone)]
pub struct LlmHandle {
    pub providers: Arc<ProviderRegistry>,
    pub fallback: FallbackPolicy,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl LlmHandle {
    pub fn new(providers: Arc<ProviderRegistry>, fallback: FallbackPolicy) -> Self {
        Self {
            providers,
            fallback,
            temperature: 0.7,
            max_tokens: 4096,
        }
    }

    pub fn with_generation(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    /// Apply this handle's generation defaults to an agent config.
    pub fn configure(&self, mut config: AgentConfig) -> AgentConfig {
        config.temperature = self.temperature;
        config.max_tokens = self.max_tokens;
        config
    }
}

/// What one run of the reasoning loop produced.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub messages: Vec<ChatMessage>,
    pub result: String,
    pub iterations: usize,
    pub model_calls: usize,
    /// The iteration cap was hit before the model stopped.
    pub exhausted: bool,
}

/// State and machinery shared by every agent.
pub struct AgentCore {
    config: AgentConfig,
    state: Mutex<AgentState>,
    tools: ToolRegistry,
    llm: LlmHandle,
}

impl AgentCore {
    pub fn new(config: AgentConfig, llm: LlmHandle) -> Self {
        Self {
            config,
            state: Mutex::new(AgentState::default()),
            tools: ToolRegistry::new(),
            llm,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn llm(&self) -> &LlmHandle {
        &self.llm
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn register_tool(&mut self, tool: impl Tool + 'static) -> Result<(), AgentError> {
        self.tools.register(tool)?;
        Ok(())
    }

    pub fn register_tools(
        &mut self,
        tools: impl IntoIterator<Item = Arc<dyn Tool>>,
    ) -> Result<(), AgentError> {
        self.tools.register_all(tools)?;
        Ok(())
    }

    // ── State ────────────────────────────────────────────────

    fn state(&self) -> MutexGuard<'_, AgentState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_status(&self, status: AgentStatus) {
        let mut state = self.state();
        state.status = status;
        state.last_activity = Utc::now();
    }

    pub fn current_status(&self) -> AgentStatus {
        self.state().status
    }

    /// Transcript of the most recent loop run.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.state().messages.clone()
    }

    pub fn snapshot(&self) -> AgentStatusSnapshot {
        let state = self.state();
        AgentStatusSnapshot {
            id: self.config.id.clone(),
            name: self.config.name.clone(),
            role: self.config.role,
            domain: self.config.domain.clone(),
            status: state.status,
            current_task: state.current_task.clone(),
            last_activity: state.last_activity,
            message_count: state.messages.len(),
            tools: self.tools.names(),
        }
    }

    fn begin_task(&self, task: &Task) -> RunGuard<'_> {
        let mut state = self.state();
        state.current_task = Some(task.id.clone());
        state.last_activity = Utc::now();
        state
            .context
            .insert("task_priority".into(), json!(task.priority));
        RunGuard {
            core: self,
            armed: true,
            clear_task: true,
        }
    }

    fn finish_loop(&self, status: AgentStatus, messages: &[ChatMessage]) {
        let mut state = self.state();
        state.status = status;
        state.last_activity = Utc::now();
        state.messages = messages.to_vec();
    }

    // ── Model calls ──────────────────────────────────────────

    /// One completion over the transcript, with this agent's tool schemas attached.
    pub async fn call_llm(
        &self,
        messages: &[ChatMessage],
    ) -> Result<ChatCompletionResponse, AgentError> {
        let request = ChatCompletionRequest::new(messages.to_vec())
            .with_model(self.config.model.clone())
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens)
            .with_tools(self.tools.list());

        let response = self
            .llm
            .providers
            .complete(&request, &self.llm.fallback)
            .await?;
        Ok(response)
    }

    /// Run the reasoning loop until the model stops or `max_iterations` model calls are made.
    ///
    /// Tool calls within one turn run sequentially in the order the model gave them,
    /// each answered by a tool message carrying the call id. A backend error leaves
    /// the agent in [`AgentStatus::Error`] and is returned.
    pub async fn run_agent_loop(
        &self,
        initial_messages: Vec<ChatMessage>,
        max_iterations: usize,
    ) -> Result<LoopOutcome, AgentError> {
        if max_iterations == 0 {
            return Err(AgentError::InvalidMaxIterations);
        }

        let agent = self.config.id.as_str();
        let mut messages = initial_messages;
        let mut model_calls = 0;
        let run = RunGuard {
            core: self,
            armed: true,
            clear_task: false,
        };

        for iteration in 1..=max_iterations {
            self.set_status(AgentStatus::Thinking);
            debug!(agent, iteration, messages = messages.len(), "calling model");

            let response = match self.call_llm(&messages).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(agent, iteration, error = %e, "model call failed");
                    run.finish(AgentStatus::Error, &messages);
                    return Err(e);
                }
            };
            model_calls += 1;

            let Some(choice) = response.first_choice() else {
                run.finish(AgentStatus::Error, &messages);
                return Err(AgentError::EmptyResponse);
            };

            let content = choice.message.content.clone();
            let tool_calls = choice.message.tool_calls.clone().unwrap_or_default();
            messages.push(ChatMessage::assistant_with_tool_calls(
                content.clone(),
                tool_calls.clone(),
            ));

            if choice.finish_reason != FinishReason::ToolCalls
                || tool_calls.is_empty()
                || self.tools.is_empty()
            {
                debug!(agent, iteration, finish_reason = %choice.finish_reason, "loop finished");
                run.finish(AgentStatus::Idle, &messages);
                return Ok(LoopOutcome {
                    messages,
                    result: content,
                    iterations: iteration,
                    model_calls,
                    exhausted: false,
                });
            }

            self.set_status(AgentStatus::Executing);
            for call in &tool_calls {
                let result = self.tools.invoke(&call.name, &call.arguments).await;
                debug!(
                    agent,
                    tool = %call.name,
                    call_id = %call.id,
                    success = result.is_success(),
                    "tool call finished"
                );
                messages.push(ChatMessage::tool(&call.id, result.to_message_content()));
            }
        }

        info!(agent, max_iterations, "iteration cap reached");
        run.finish(AgentStatus::Idle, &messages);
        Ok(LoopOutcome {
            messages,
            result: MAX_ITERATIONS_REACHED.to_string(),
            iterations: max_iterations,
            model_calls,
            exhausted: true,
        })
    }

    /// System prompt + `user_prompt` through the loop, wrapped as a [`TaskResult`].
    ///
    /// Errors become failed results; exhaustion is a successful result flagged
    /// with `iterations_exhausted`.
    pub async fn execute_prompt(
        &self,
        task: &Task,
        user_prompt: String,
        max_iterations: usize,
    ) -> TaskResult {
        let start = Instant::now();
        let run = self.begin_task(task);
        info!(agent = %self.config.id, task_id = %task.id, "executing task");

        let mut messages = Vec::with_capacity(2);
        if !self.config.system_prompt.is_empty() {
            messages.push(ChatMessage::system(&self.config.system_prompt));
        }
        messages.push(ChatMessage::user(user_prompt));

        let result = match self.run_agent_loop(messages, max_iterations).await {
            Ok(outcome) => {
                let mut result = TaskResult::success(task.id.clone(), Value::String(outcome.result))
                    .with_metadata("iterations", json!(outcome.iterations))
                    .with_metadata("model_calls", json!(outcome.model_calls));
                if outcome.exhausted {
                    result = result.with_metadata("iterations_exhausted", json!(true));
                }
                result
            }
            Err(e) => {
                error!(agent = %self.config.id, task_id = %task.id, error = %e, "task failed");
                TaskResult::failure(task.id.clone(), e.to_string())
            }
        };

        run.end_task();
        let result = result
            .with_agent(self.config.id.clone())
            .with_execution_time(start.elapsed());
        info!(
            agent = %self.config.id,
            task_id = %task.id,
            success = result.is_success(),
            elapsed_ms = result.execution_time_ms,
            "task finished"
        );
        result
    }
}

/// Resets an agent whose run was dropped mid-flight (e.g. by a task timeout)
/// back to idle, so it does not stay stuck in `Thinking`/`Executing`.
struct RunGuard<'a> {
    core: &'a AgentCore,
    armed: bool,
    clear_task: bool,
}

impl RunGuard<'_> {
    fn finish(mut self, status: AgentStatus, messages: &[ChatMessage]) {
        self.armed = false;
        self.core.finish_loop(status, messages);
    }

    fn end_task(mut self) {
        self.armed = false;
        let mut state = self.core.state();
        state.current_task = None;
        state.last_activity = Utc::now();
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.core.state();
        state.status = AgentStatus::Idle;
        if self.clear_task {
            state.current_task = None;
        }
        state.last_activity = Utc::now();
        warn!(agent = %self.core.config.id, "run cancelled before completion, state reset");
    }
}

/// An executable member of the hierarchy.
///
/// `execute` never fails: every error is reported inside the returned [`TaskResult`].
#[async_trait]
pub trait Agent: Send + Sync {
    fn core(&self) -> &AgentCore;

    async fn execute(&self, task: &Task) -> TaskResult;

    fn id(&self) -> &str {
        self.core().id()
    }

    fn name(&self) -> &str {
        self.core().name()
    }

    fn status(&self) -> AgentStatusSnapshot {
        self.core().snapshot()
    }
}

/// General-purpose agent: the task description is the prompt, metadata is appended as context.
pub struct SpecialistAgent {
    core: AgentCore,
    max_iterations: usize,
}

impl SpecialistAgent {
    pub fn new(config: AgentConfig, llm: LlmHandle, max_iterations: usize) -> Self {
        Self {
            core: AgentCore::new(config, llm),
            max_iterations,
        }
    }

    pub fn core_mut(&mut self) -> &mut AgentCore {
        &mut self.core
    }

    fn build_prompt(task: &Task) -> String {
        let mut prompt = task.description.clone();
        if !task.metadata.is_empty() {
            prompt.push_str("\n\n## Additional Context\n");
            prompt.push_str(&serde_json::to_string_pretty(&task.metadata).unwrap_or_default());
        }
        prompt
    }
}

#[async_trait]
impl Agent for SpecialistAgent {
    fn core(&self) -> &AgentCore {
        &self.core
    }

    async fn execute(&self, task: &Task) -> TaskResult {
        self.core
            .execute_prompt(task, Self::build_prompt(task), self.max_iterations)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::scripted_llm;
    use crate::types::AgentRole;
    use maestro_llm::ChatRole;
    use maestro_tool_runtime::{EchoTool, StatisticalAnalysisTool};

    fn core(llm: LlmHandle) -> AgentCore {
        AgentCore::new(
            AgentConfig::new("analyst", "Analyst", AgentRole::Specialist).system_prompt("Be exact."),
            llm,
        )
    }

    #[tokio::test]
    async fn test_loop_executes_tools_and_correlates_ids() {
        let (provider, llm) = scripted_llm();
        provider
            .queue_tool_calls(vec![
                ("statistical_analysis".into(), r#"{"data":[1,2,3,4,5],"operations":["mean"]}"#.into()),
                ("no_such_tool".into(), "{}".into()),
            ])
            .queue_text("The mean is 3.");

        let mut core = core(llm);
        core.register_tool(StatisticalAnalysisTool).unwrap();

        let outcome = core
            .run_agent_loop(vec![ChatMessage::user("mean?")], 5)
            .await
            .unwrap();
        assert_eq!(outcome.result, "The mean is 3.");
        assert_eq!(outcome.model_calls, 2);
        assert!(!outcome.exhausted);

        // user, assistant(tool calls), tool, tool, assistant
        let roles: Vec<ChatRole> = outcome.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![ChatRole::User, ChatRole::Assistant, ChatRole::Tool, ChatRole::Tool, ChatRole::Assistant]
        );
        let calls = outcome.messages[1].tool_calls();
        assert_eq!(outcome.messages[2].tool_call_id.as_deref(), Some(calls[0].id.as_str()));
        assert_eq!(outcome.messages[3].tool_call_id.as_deref(), Some(calls[1].id.as_str()));

        let stats: Value = serde_json::from_str(&outcome.messages[2].content).unwrap();
        assert_eq!(stats["data"]["mean"], 3.0);
        let unknown: Value = serde_json::from_str(&outcome.messages[3].content).unwrap();
        assert_eq!(unknown["success"], false);
        assert_eq!(unknown["error"], "unknown tool: no_such_tool");

        // Second request carried the tool results and the tool schemas.
        let second = &provider.requests()[1];
        assert_eq!(second.messages.len(), 4);
        assert_eq!(second.tools.as_ref().unwrap()[0].name, "statistical_analysis");
        assert_eq!(core.current_status(), AgentStatus::Idle);
        assert_eq!(core.messages().len(), 5);
    }

    #[tokio::test]
    async fn test_single_iteration_exhausts_after_one_call() {
        let (provider, llm) = scripted_llm();
        provider.always_tool_call("echo", r#"{"message":"again"}"#);

        let mut core = core(llm);
        core.register_tool(EchoTool).unwrap();

        let outcome = core
            .run_agent_loop(vec![ChatMessage::user("loop forever")], 1)
            .await
            .unwrap();
        assert!(outcome.exhausted);
        assert_eq!(outcome.result, MAX_ITERATIONS_REACHED);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_zero_tools_stops_after_one_call() {
        let (provider, llm) = scripted_llm();
        provider.always_tool_call("echo", "{}");

        let core = core(llm);
        let outcome = core
            .run_agent_loop(vec![ChatMessage::user("hi")], 10)
            .await
            .unwrap();
        assert_eq!(provider.call_count(), 1);
        assert!(!outcome.exhausted);
        assert!(provider.requests()[0].tools.is_none());
    }

    #[tokio::test]
    async fn test_zero_max_iterations_rejected() {
        let (_provider, llm) = scripted_llm();
        let err = core(llm).run_agent_loop(vec![], 0).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidMaxIterations));
    }

    #[tokio::test]
    async fn test_provider_error_sets_error_state() {
        let (provider, llm) = scripted_llm();
        provider.queue_error(500, "backend down");

        let core = core(llm);
        let err = core
            .run_agent_loop(vec![ChatMessage::user("hi")], 3)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Llm(_)));
        assert_eq!(core.current_status(), AgentStatus::Error);
    }

    #[tokio::test]
    async fn test_execute_prompt_reports_failures_and_exhaustion() {
        let (provider, llm) = scripted_llm();
        provider.queue_error(502, "bad gateway");

        let mut core = core(llm);
        core.register_tool(EchoTool).unwrap();
        let task = Task::new("do it").unwrap();

        let failed = core.execute_prompt(&task, "do it".into(), 3).await;
        assert!(!failed.is_success());
        assert!(failed.error().unwrap().contains("bad gateway"));
        assert_eq!(failed.agent_id.as_deref(), Some("analyst"));

        provider.always_tool_call("echo", r#"{"message":"x"}"#);
        let exhausted = core.execute_prompt(&task, "do it".into(), 2).await;
        assert!(exhausted.is_success());
        assert_eq!(exhausted.output_text().as_deref(), Some(MAX_ITERATIONS_REACHED));
        assert_eq!(exhausted.metadata["iterations_exhausted"], true);
        assert!(core.snapshot().current_task.is_none());
    }

    #[tokio::test]
    async fn test_request_uses_config_generation_settings() {
        let (provider, llm) = scripted_llm();
        provider.queue_text("ok");
        let llm = llm.with_generation(0.1, 99);
        let agent = SpecialistAgent::new(
            llm.configure(AgentConfig::new("s", "S", AgentRole::Specialist)),
            llm,
            3,
        );
        let mut task = Task::new("Say ok").unwrap();
        task.metadata.insert("tone".into(), json!("dry"));

        let result = agent.execute(&task).await;
        assert_eq!(result.output_text().as_deref(), Some("ok"));

        let request = &provider.requests()[0];
        assert!(request.model.is_none());
        assert_eq!(request.temperature, Some(0.1));
        assert_eq!(request.max_tokens, Some(99));
        assert!(request.messages[0].content.contains("\"tone\": \"dry\""));
    }
}
