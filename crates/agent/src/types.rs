use chrono::{DateTime, Utc};
use maestro_llm::{ChatMessage, ProviderStatus, ProviderType};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Position of an agent in the hierarchy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Top-level planner that delegates to domain orchestrators
    MasterOrchestrator,
    /// Domain orchestrator with its own tools
    SubOrchestrator,
    /// Leaf agent
    Specialist,
}

/// Static description of an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    pub name: String,
    pub description: String,
    pub role: AgentRole,
    pub domain: String,
    /// `None` uses the active provider's default model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub system_prompt: String,
}

impl AgentConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: AgentRole) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            role,
            domain: "general".into(),
            model: None,
            temperature: 0.7,
            max_tokens: 4096,
            system_prompt: String::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }
}

/// Runtime status of an agent.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Idle,
    Thinking,
    Executing,
    Waiting,
    Error,
}

/// Mutable runtime state, one per agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub status: AgentStatus,
    pub current_task: Option<String>,
    pub last_activity: DateTime<Utc>,
    pub messages: Vec<ChatMessage>,
    pub context: Map<String, Value>,
}

impl Default for AgentState {
    fn default() -> Self {
        Self {
            status: AgentStatus::Idle,
            current_task: None,
            last_activity: Utc::now(),
            messages: Vec::new(),
            context: Map::new(),
        }
    }
}

/// Read-only copy of an agent's identity and state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatusSnapshot {
    pub id: String,
    pub name: String,
    pub role: AgentRole,
    pub domain: String,
    pub status: AgentStatus,
    pub current_task: Option<String>,
    pub last_activity: DateTime<Utc>,
    pub message_count: usize,
    pub tools: Vec<String>,
}

/// Delegation bookkeeping counts, recomputed on each read.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskStats {
    pub pending: usize,
    pub completed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub sub_agents: usize,
}

/// Whole-hierarchy status.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub master: AgentStatusSnapshot,
    pub orchestrators: Vec<AgentStatusSnapshot>,
    pub active_provider: ProviderType,
    pub providers: Vec<ProviderStatus>,
    pub delegation: TaskStats,
}
