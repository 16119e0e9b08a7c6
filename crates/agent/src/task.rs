//! Units of delegated work and their outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Result text reported when a reasoning loop runs out of iterations.
pub const MAX_ITERATIONS_REACHED: &str = "Maximum iterations reached without a final answer.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Delegated,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Forward-only lifecycle: pending → {in_progress, delegated} → {completed, failed},
    /// with delegated → in_progress allowed once a sub-agent picks the task up.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Pending, Delegated)
                | (Delegated, InProgress)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (Delegated, Completed)
                | (Delegated, Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Delegated => "delegated",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("task description must not be empty")]
    EmptyDescription,
    #[error("invalid task transition {from} -> {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },
    #[error("task already finished with status {0}")]
    AlreadyFinished(TaskStatus),
}

/// Outcome of executing a [`Task`].
///
/// A failed result always carries an error and never an output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTaskResult")]
pub struct TaskResult {
    pub task_id: String,
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    pub execution_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Deserialize)]
struct RawTaskResult {
    task_id: String,
    success: bool,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    execution_time_ms: u64,
    #[serde(default)]
    agent_id: Option<String>,
    #[serde(default)]
    metadata: Map<String, Value>,
}

impl TryFrom<RawTaskResult> for TaskResult {
    type Error = String;

    fn try_from(raw: RawTaskResult) -> Result<Self, Self::Error> {
        if raw.success && raw.error.is_some() {
            return Err(format!("task {}: successful result carries an error", raw.task_id));
        }
        if !raw.success && (raw.error.is_none() || raw.output.is_some()) {
            return Err(format!(
                "task {}: failed result needs an error and no output",
                raw.task_id
            ));
        }
        Ok(Self {
            task_id: raw.task_id,
            success: raw.success,
            output: raw.output,
            error: raw.error,
            execution_time_ms: raw.execution_time_ms,
            agent_id: raw.agent_id,
            metadata: raw.metadata,
        })
    }
}

impl TaskResult {
    pub fn success(task_id: impl Into<String>, output: Value) -> Self {
        Self {
            task_id: task_id.into(),
            success: true,
            output: Some(output),
            error: None,
            execution_time_ms: 0,
            agent_id: None,
            metadata: Map::new(),
        }
    }

    pub fn failure(task_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            success: false,
            output: None,
            error: Some(error.into()),
            execution_time_ms: 0,
            agent_id: None,
            metadata: Map::new(),
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_execution_time(mut self, elapsed: Duration) -> Self {
        self.execution_time_ms = elapsed.as_millis() as u64;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn output(&self) -> Option<&Value> {
        self.output.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Output rendered as text: strings verbatim, other JSON serialized.
    pub fn output_text(&self) -> Option<String> {
        self.output.as_ref().map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

/// A unit of work moving through the status lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub priority: TaskPriority,
    status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegated_to: Option<String>,
    #[serde(default)]
    pub sub_tasks: Vec<Task>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<TaskResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Domain payload (data, urls, topic, tone, ...) read by prompt builders.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Task {
    /// New pending task with a fresh id.
    pub fn new(description: impl Into<String>) -> Result<Self, TaskError> {
        let description = description.into();
        if description.trim().is_empty() {
            return Err(TaskError::EmptyDescription);
        }
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            description,
            priority: TaskPriority::default(),
            status: TaskStatus::Pending,
            assigned_to: None,
            delegated_to: None,
            sub_tasks: Vec::new(),
            result: None,
            created_at: now,
            updated_at: now,
            metadata: Map::new(),
        })
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn result(&self) -> Option<&TaskResult> {
        self.result.as_ref()
    }

    /// Metadata value rendered as a trimmed, non-empty string.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    fn transition(&mut self, next: TaskStatus) -> Result<(), TaskError> {
        if self.status.is_terminal() {
            return Err(TaskError::AlreadyFinished(self.status));
        }
        if !self.status.can_transition_to(next) {
            return Err(TaskError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Begin execution (from pending or delegated).
    pub fn start(&mut self) -> Result<(), TaskError> {
        self.transition(TaskStatus::InProgress)
    }

    /// Hand the task to a named sub-agent before execution begins.
    pub fn delegate(&mut self, agent_id: impl Into<String>) -> Result<(), TaskError> {
        self.transition(TaskStatus::Delegated)?;
        self.delegated_to = Some(agent_id.into());
        Ok(())
    }

    /// Record the result and move to completed or failed according to it.
    pub fn finish(&mut self, result: TaskResult) -> Result<(), TaskError> {
        let next = if result.is_success() {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        self.transition(next)?;
        self.result = Some(result);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_task_defaults() {
        let task = Task::new("Summarize Q3 revenue").unwrap();
        assert_eq!(task.status(), TaskStatus::Pending);
        assert_eq!(task.priority, TaskPriority::Medium);
        assert!(Uuid::parse_str(&task.id).is_ok());
        assert_eq!(task.created_at, task.updated_at);
    }

    #[test]
    fn test_empty_description_rejected() {
        assert_eq!(Task::new("   ").unwrap_err(), TaskError::EmptyDescription);
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut task = Task::new("work").unwrap();
        let created = task.updated_at;
        task.start().unwrap();
        assert_eq!(task.status(), TaskStatus::InProgress);
        assert!(task.updated_at >= created);

        task.finish(TaskResult::success(task.id.clone(), json!("ok"))).unwrap();
        assert_eq!(task.status(), TaskStatus::Completed);
        assert!(task.result().unwrap().is_success());
    }

    #[test]
    fn test_delegated_path() {
        let mut task = Task::new("work").unwrap();
        task.delegate("research").unwrap();
        assert_eq!(task.delegated_to.as_deref(), Some("research"));
        task.finish(TaskResult::failure(task.id.clone(), "boom")).unwrap();
        assert_eq!(task.status(), TaskStatus::Failed);
    }

    #[test]
    fn test_cannot_skip_in_progress() {
        let mut task = Task::new("work").unwrap();
        let err = task
            .finish(TaskResult::success(task.id.clone(), json!(null)))
            .unwrap_err();
        assert_eq!(
            err,
            TaskError::InvalidTransition {
                from: TaskStatus::Pending,
                to: TaskStatus::Completed
            }
        );
        assert!(task.result().is_none());
    }

    #[test]
    fn test_terminal_is_final() {
        let mut task = Task::new("work").unwrap();
        task.start().unwrap();
        task.finish(TaskResult::failure(task.id.clone(), "x")).unwrap();

        assert_eq!(
            task.finish(TaskResult::success(task.id.clone(), json!(1))),
            Err(TaskError::AlreadyFinished(TaskStatus::Failed))
        );
        assert_eq!(task.start(), Err(TaskError::AlreadyFinished(TaskStatus::Failed)));
        assert_eq!(task.result().unwrap().error(), Some("x"));
    }

    #[test]
    fn test_result_invariants() {
        let failed = TaskResult::failure("t", "nope");
        assert!(!failed.is_success());
        assert!(failed.output().is_none());

        let ok = TaskResult::success("t", json!({"a": 1}))
            .with_agent("analytics")
            .with_execution_time(Duration::from_millis(42));
        assert!(ok.error().is_none());
        assert_eq!(ok.execution_time_ms, 42);
        assert_eq!(ok.output_text().unwrap(), r#"{"a":1}"#);
    }

    #[test]
    fn test_result_deserialize_checks_outcome() {
        let bad = [
            r#"{"task_id":"t","success":false,"output":1}"#,
            r#"{"task_id":"t","success":false,"output":1,"error":"x"}"#,
            r#"{"task_id":"t","success":true,"output":1,"error":"x"}"#,
        ];
        for raw in bad {
            assert!(serde_json::from_str::<TaskResult>(raw).is_err(), "{raw}");
        }

        let ok = TaskResult::success("t", json!("done")).with_agent("content");
        let back: TaskResult = serde_json::from_str(&serde_json::to_string(&ok).unwrap()).unwrap();
        assert_eq!(back, ok);
    }
}
