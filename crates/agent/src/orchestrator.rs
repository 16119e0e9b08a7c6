//! Sub-agent registry, task delegation and the delegation ledger.

use async_trait::async_trait;
use futures::FutureExt;
use indexmap::IndexMap;
use maestro_tool_runtime::{
    tool::required_str, ParamType, ParameterSpec, Tool, ToolDefinition, ToolError, ToolResult,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::{Agent, AgentCore};
use crate::error::AgentError;
use crate::task::{Task, TaskResult};
use crate::types::TaskStats;

/// Name of the description parameter every delegation tool takes.
pub const TASK_DESCRIPTION_PARAM: &str = "task_description";

/// A registered sub-agent.
#[derive(Clone)]
pub struct SubAgent {
    pub id: String,
    pub name: String,
    pub agent: Arc<dyn Agent>,
    pub capabilities: Vec<String>,
}

/// A finished delegation: the task in its terminal state and its result.
#[derive(Debug, Clone, Serialize)]
pub struct CompletedTask {
    pub task: Task,
    pub result: TaskResult,
}

#[derive(Default)]
struct LedgerInner {
    pending: IndexMap<String, Task>,
    completed: IndexMap<String, CompletedTask>,
}

/// Pending and completed delegations, shared between an orchestrator and its
/// delegation tools.
///
/// A task id is in exactly one of the two maps; the move happens under one lock.
#[derive(Clone, Default)]
pub struct TaskLedger {
    inner: Arc<Mutex<LedgerInner>>,
}

impl TaskLedger {
    fn lock(&self) -> MutexGuard<'_, LedgerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn insert_pending(&self, task: Task) {
        self.lock().pending.insert(task.id.clone(), task);
    }

    /// Move a pending task to completed, finishing it with `result`.
    fn complete(&self, task_id: &str, result: TaskResult) {
        let mut inner = self.lock();
        let Some(mut task) = inner.pending.shift_remove(task_id) else {
            warn!(task_id, "completion for a task that is not pending");
            return;
        };
        if let Err(e) = task.finish(result.clone()) {
            warn!(task_id, error = %e, "could not finish delegated task");
        }
        inner
            .completed
            .insert(task_id.to_string(), CompletedTask { task, result });
    }

    pub fn pending(&self) -> Vec<Task> {
        self.lock().pending.values().cloned().collect()
    }

    pub fn completed(&self) -> Vec<CompletedTask> {
        self.lock().completed.values().cloned().collect()
    }

    pub fn is_pending(&self, task_id: &str) -> bool {
        self.lock().pending.contains_key(task_id)
    }

    pub fn completed_task(&self, task_id: &str) -> Option<CompletedTask> {
        self.lock().completed.get(task_id).cloned()
    }

    fn counts(&self) -> (usize, usize, usize) {
        let inner = self.lock();
        let succeeded = inner
            .completed
            .values()
            .filter(|c| c.result.is_success())
            .count();
        (inner.pending.len(), inner.completed.len(), succeeded)
    }
}

/// Moves the task to completed as failed if the delegation future is dropped early.
struct PendingGuard {
    ledger: TaskLedger,
    task_id: String,
    done: bool,
}

impl PendingGuard {
    fn finish(mut self, result: TaskResult) {
        self.ledger.complete(&self.task_id, result);
        self.done = true;
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if !self.done {
            warn!(task_id = %self.task_id, "delegation cancelled before completion");
            self.ledger.complete(
                &self.task_id,
                TaskResult::failure(self.task_id.clone(), "delegation cancelled before completion"),
            );
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// The delegation path shared by [`Orchestrator::delegate_task`] and [`DelegationTool`].
async fn run_delegation(
    sub: &SubAgent,
    ledger: &TaskLedger,
    description: &str,
    context: Map<String, Value>,
) -> TaskResult {
    let start = Instant::now();
    let mut task = match Task::new(description) {
        Ok(task) => task.with_metadata(context),
        Err(e) => return TaskResult::failure(Uuid::new_v4().to_string(), e.to_string()),
    };
    task.assigned_to = Some(sub.id.clone());
    if let Err(e) = task.start() {
        return TaskResult::failure(task.id, e.to_string());
    }

    let task_id = task.id.clone();
    ledger.insert_pending(task.clone());
    let guard = PendingGuard {
        ledger: ledger.clone(),
        task_id: task_id.clone(),
        done: false,
    };
    info!(agent = %sub.id, task_id = %task_id, "delegating task");

    let result = match AssertUnwindSafe(sub.agent.execute(&task)).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!(agent = %sub.id, task_id = %task_id, panic = %message, "sub-agent panicked");
            TaskResult::failure(task_id.clone(), format!("sub-agent '{}' panicked: {message}", sub.id))
                .with_agent(sub.id.clone())
                .with_execution_time(start.elapsed())
        }
    };

    guard.finish(result.clone());
    debug!(agent = %sub.id, task_id = %task_id, success = result.is_success(), "delegation finished");
    result
}

/// `delegate_to_<snake_case(name)>`.
pub fn delegation_tool_name(agent_name: &str) -> String {
    let mut snake = String::with_capacity(agent_name.len());
    for c in agent_name.chars() {
        if c.is_alphanumeric() {
            snake.extend(c.to_lowercase());
        } else if !snake.ends_with('_') && !snake.is_empty() {
            snake.push('_');
        }
    }
    format!("delegate_to_{}", snake.trim_end_matches('_'))
}

/// Exposes delegation to one sub-agent as a tool of the owning orchestrator.
///
/// Every argument other than `task_description` becomes task metadata; an object
/// passed as `context` is flattened into it.
pub struct DelegationTool {
    name: String,
    description: String,
    extra_parameters: IndexMap<String, ParameterSpec>,
    target: SubAgent,
    ledger: TaskLedger,
}

impl DelegationTool {
    fn context_from(params: &Value) -> Map<String, Value> {
        let mut context = Map::new();
        if let Some(obj) = params.as_object() {
            for (key, value) in obj {
                match (key.as_str(), value) {
                    (TASK_DESCRIPTION_PARAM, _) | (_, Value::Null) => {}
                    ("context", Value::Object(inner)) => {
                        context.extend(inner.iter().map(|(k, v)| (k.clone(), v.clone())));
                    }
                    _ => {
                        context.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        context
    }
}

#[async_trait]
impl Tool for DelegationTool {
    fn definition(&self) -> ToolDefinition {
        let mut def = ToolDefinition::new(&self.name, &self.description).param(
            TASK_DESCRIPTION_PARAM,
            ParameterSpec::new(
                ParamType::String,
                format!("What {} should do", self.target.name),
            )
            .required(),
        );
        for (name, spec) in &self.extra_parameters {
            def = def.param(name, spec.clone());
        }
        def
    }

    async fn execute(&self, params: Value) -> Result<ToolResult, ToolError> {
        let description = required_str(&params, TASK_DESCRIPTION_PARAM)?;
        let context = Self::context_from(&params);

        let result = run_delegation(&self.target, &self.ledger, description, context).await;
        let tool_result = if result.is_success() {
            ToolResult::success(json!({
                "task_id": result.task_id,
                "agent": self.target.id,
                "output": result.output(),
            }))
        } else {
            ToolResult::failure(result.error().unwrap_or("delegation failed"))
        };
        Ok(tool_result.with_metadata("execution_time_ms", json!(result.execution_time_ms)))
    }
}

/// An agent that owns sub-agents and can delegate tasks to them.
pub struct Orchestrator {
    core: AgentCore,
    sub_agents: IndexMap<String, SubAgent>,
    ledger: TaskLedger,
}

impl Orchestrator {
    pub fn new(core: AgentCore) -> Self {
        Self {
            core,
            sub_agents: IndexMap::new(),
            ledger: TaskLedger::default(),
        }
    }

    pub fn core(&self) -> &AgentCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut AgentCore {
        &mut self.core
    }

    pub fn ledger(&self) -> &TaskLedger {
        &self.ledger
    }

    /// Register a sub-agent with a generic `delegate_to_<name>` tool that accepts a
    /// free-form `context` object.
    pub fn register_sub_agent(
        &mut self,
        agent: Arc<dyn Agent>,
        capabilities: Vec<String>,
    ) -> Result<(), AgentError> {
        let tool_name = delegation_tool_name(agent.name());
        let description = format!(
            "Delegate a task to {}. Capabilities: {}.",
            agent.name(),
            capabilities.join(", ")
        );
        let mut extra = IndexMap::new();
        extra.insert(
            "context".to_string(),
            ParameterSpec::new(ParamType::Object, "Additional context for the task"),
        );
        self.register_sub_agent_with_tool(agent, capabilities, tool_name, description, extra)
    }

    /// Register a sub-agent with an explicitly named and described delegation tool.
    pub fn register_sub_agent_with_tool(
        &mut self,
        agent: Arc<dyn Agent>,
        capabilities: Vec<String>,
        tool_name: impl Into<String>,
        tool_description: impl Into<String>,
        extra_parameters: IndexMap<String, ParameterSpec>,
    ) -> Result<(), AgentError> {
        let id = agent.id().to_string();
        if self.sub_agents.contains_key(&id) {
            return Err(AgentError::DuplicateSubAgent(id));
        }

        let sub = SubAgent {
            id: id.clone(),
            name: agent.name().to_string(),
            agent,
            capabilities,
        };
        self.core.register_tool(DelegationTool {
            name: tool_name.into(),
            description: tool_description.into(),
            extra_parameters,
            target: sub.clone(),
            ledger: self.ledger.clone(),
        })?;
        debug!(orchestrator = %self.core.id(), sub_agent = %id, "sub-agent registered");
        self.sub_agents.insert(id, sub);
        Ok(())
    }

    pub fn sub_agents(&self) -> impl Iterator<Item = &SubAgent> {
        self.sub_agents.values()
    }

    pub fn sub_agent(&self, id: &str) -> Option<&SubAgent> {
        self.sub_agents.get(id)
    }

    /// Delegate a task to a sub-agent by id and wait for its result.
    ///
    /// An unknown id yields a failed result without touching the ledger.
    pub async fn delegate_task(
        &self,
        agent_id: &str,
        description: &str,
        context: Option<Map<String, Value>>,
    ) -> TaskResult {
        let Some(sub) = self.sub_agents.get(agent_id) else {
            warn!(orchestrator = %self.core.id(), agent_id, "delegation to unknown sub-agent");
            return TaskResult::failure(
                Uuid::new_v4().to_string(),
                format!("unknown sub-agent: {agent_id}"),
            );
        };
        run_delegation(sub, &self.ledger, description, context.unwrap_or_default()).await
    }

    /// First sub-agent (registration order) with a capability found in the
    /// description, else the first sub-agent.
    pub fn select_best_agent(&self, description: &str) -> Option<String> {
        let description = description.to_lowercase();
        self.sub_agents
            .values()
            .find(|sub| {
                sub.capabilities
                    .iter()
                    .any(|cap| description.contains(&cap.to_lowercase()))
            })
            .or_else(|| self.sub_agents.values().next())
            .map(|sub| sub.id.clone())
    }

    pub fn get_stats(&self) -> TaskStats {
        let (pending, completed, succeeded) = self.ledger.counts();
        TaskStats {
            pending,
            completed,
            succeeded,
            failed: completed - succeeded,
            sub_agents: self.sub_agents.len(),
        }
    }

    pub fn pending_tasks(&self) -> Vec<Task> {
        self.ledger.pending()
    }

    pub fn completed_tasks(&self) -> Vec<CompletedTask> {
        self.ledger.completed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{LlmHandle, SpecialistAgent};
    use crate::task::TaskStatus;
    use crate::testing::scripted_llm;
    use crate::types::{AgentConfig, AgentRole};
    use std::time::Duration;

    fn specialist(id: &str, name: &str, llm: &LlmHandle) -> Arc<dyn Agent> {
        Arc::new(SpecialistAgent::new(
            AgentConfig::new(id, name, AgentRole::Specialist),
            llm.clone(),
            3,
        ))
    }

    fn orchestrator(llm: &LlmHandle) -> Orchestrator {
        Orchestrator::new(AgentCore::new(
            AgentConfig::new("boss", "Boss", AgentRole::MasterOrchestrator),
            llm.clone(),
        ))
    }

    struct PanickingAgent {
        core: AgentCore,
    }

    #[async_trait]
    impl Agent for PanickingAgent {
        fn core(&self) -> &AgentCore {
            &self.core
        }

        async fn execute(&self, _task: &Task) -> TaskResult {
            panic!("sub-agent exploded");
        }
    }

    struct SlowAgent {
        core: AgentCore,
    }

    #[async_trait]
    impl Agent for SlowAgent {
        fn core(&self) -> &AgentCore {
            &self.core
        }

        async fn execute(&self, task: &Task) -> TaskResult {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            TaskResult::success(task.id.clone(), json!("late"))
        }
    }

    #[test]
    fn test_delegation_tool_name() {
        assert_eq!(
            delegation_tool_name("Research Orchestrator"),
            "delegate_to_research_orchestrator"
        );
        assert_eq!(delegation_tool_name("  Data--Viz 2 "), "delegate_to_data_viz_2");
    }

    #[test]
    fn test_select_best_agent() {
        let (_provider, llm) = scripted_llm();
        let mut orch = orchestrator(&llm);
        assert_eq!(orch.select_best_agent("anything"), None);

        orch.register_sub_agent(specialist("analytics", "Analytics", &llm), vec!["analytics".into()])
            .unwrap();
        orch.register_sub_agent(
            specialist("research", "Research", &llm),
            vec!["search".into(), "web".into()],
        )
        .unwrap();

        assert_eq!(
            orch.select_best_agent("search the web for X").as_deref(),
            Some("research")
        );
        assert_eq!(
            orch.select_best_agent("Bake a cake").as_deref(),
            Some("analytics")
        );
    }

    #[test]
    fn test_duplicate_sub_agent_rejected() {
        let (_provider, llm) = scripted_llm();
        let mut orch = orchestrator(&llm);
        orch.register_sub_agent(specialist("a", "A", &llm), vec![]).unwrap();
        assert!(matches!(
            orch.register_sub_agent(specialist("a", "A again", &llm), vec![]),
            Err(AgentError::DuplicateSubAgent(id)) if id == "a"
        ));
    }

    #[tokio::test]
    async fn test_unknown_target_leaves_ledger_untouched() {
        let (_provider, llm) = scripted_llm();
        let orch = orchestrator(&llm);

        let result = orch.delegate_task("ghost", "do things", None).await;
        assert!(!result.is_success());
        assert!(orch.pending_tasks().is_empty());
        assert!(orch.completed_tasks().is_empty());
    }

    #[tokio::test]
    async fn test_delegated_task_ends_completed() {
        let (provider, llm) = scripted_llm();
        provider.queue_text("research summary");
        let mut orch = orchestrator(&llm);
        orch.register_sub_agent(specialist("research", "Research", &llm), vec![])
            .unwrap();

        let mut context = Map::new();
        context.insert("topic".into(), json!("rust"));
        let result = orch
            .delegate_task("research", "Look into rust", Some(context))
            .await;
        assert!(result.is_success());
        assert_eq!(result.agent_id.as_deref(), Some("research"));

        assert!(orch.pending_tasks().is_empty());
        let done = orch.ledger().completed_task(&result.task_id).unwrap();
        assert_eq!(done.task.status(), TaskStatus::Completed);
        assert_eq!(done.task.assigned_to.as_deref(), Some("research"));
        assert_eq!(done.task.metadata["topic"], "rust");
        assert!(done.task.updated_at >= done.task.created_at);

        let stats = orch.get_stats();
        assert_eq!((stats.pending, stats.completed, stats.succeeded, stats.failed), (0, 1, 1, 0));
    }

    #[tokio::test]
    async fn test_failed_sub_agent_marks_task_failed() {
        let (provider, llm) = scripted_llm();
        provider.queue_error(500, "upstream");
        let mut orch = orchestrator(&llm);
        orch.register_sub_agent(specialist("content", "Content", &llm), vec![])
            .unwrap();

        let result = orch.delegate_task("content", "Write", None).await;
        assert!(!result.is_success());
        let done = orch.ledger().completed_task(&result.task_id).unwrap();
        assert_eq!(done.task.status(), TaskStatus::Failed);
        assert_eq!(orch.get_stats().failed, 1);
    }

    #[tokio::test]
    async fn test_panicking_sub_agent_is_contained() {
        let (_provider, llm) = scripted_llm();
        let mut orch = orchestrator(&llm);
        let bomb = PanickingAgent {
            core: AgentCore::new(AgentConfig::new("bomb", "Bomb", AgentRole::Specialist), llm.clone()),
        };
        orch.register_sub_agent(Arc::new(bomb), vec![]).unwrap();

        let result = orch.delegate_task("bomb", "tick", None).await;
        assert!(result.error().unwrap().contains("sub-agent exploded"));
        assert!(orch.pending_tasks().is_empty());
        assert_eq!(orch.completed_tasks().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_delegation_is_not_left_pending() {
        let (_provider, llm) = scripted_llm();
        let mut orch = orchestrator(&llm);
        let slow = SlowAgent {
            core: AgentCore::new(AgentConfig::new("slow", "Slow", AgentRole::Specialist), llm.clone()),
        };
        orch.register_sub_agent(Arc::new(slow), vec![]).unwrap();

        let outcome = tokio::time::timeout(
            Duration::from_millis(20),
            orch.delegate_task("slow", "wait", None),
        )
        .await;
        assert!(outcome.is_err());
        assert!(orch.pending_tasks().is_empty());

        let completed = orch.completed_tasks();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].task.status(), TaskStatus::Failed);
        assert!(completed[0].result.error().unwrap().contains("cancelled"));
    }

    #[tokio::test]
    async fn test_delegation_tool_targets_named_sub_agent() {
        let (provider, llm) = scripted_llm();
        provider.queue_text("found it");
        let mut orch = orchestrator(&llm);
        orch.register_sub_agent(specialist("analytics", "Analytics Orchestrator", &llm), vec![])
            .unwrap();
        orch.register_sub_agent(specialist("research", "Research Orchestrator", &llm), vec![])
            .unwrap();

        let tool_result = orch
            .core()
            .tools()
            .invoke(
                "delegate_to_research_orchestrator",
                r#"{"task_description": "Find sources on WASM", "context": {"depth": "deep"}}"#,
            )
            .await;
        assert!(tool_result.is_success());
        assert_eq!(tool_result.data().unwrap()["agent"], "research");
        assert_eq!(tool_result.data().unwrap()["output"], "found it");

        let completed = orch.completed_tasks();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].task.assigned_to.as_deref(), Some("research"));
        assert_eq!(completed[0].task.description, "Find sources on WASM");
        assert_eq!(completed[0].task.metadata["depth"], "deep");
    }

    #[tokio::test]
    async fn test_delegation_tool_requires_description() {
        let (_provider, llm) = scripted_llm();
        let mut orch = orchestrator(&llm);
        orch.register_sub_agent(specialist("x", "X", &llm), vec![]).unwrap();

        let result = orch.core().tools().invoke("delegate_to_x", "{}").await;
        assert!(!result.is_success());
        assert!(orch.completed_tasks().is_empty());
    }
}
