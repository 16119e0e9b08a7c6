pub mod agent;
pub mod domains;
pub mod error;
pub mod master;
pub mod orchestrator;
pub mod system;
pub mod task;
pub mod types;

#[cfg(test)]
mod testing;

pub use agent::{Agent, AgentCore, LlmHandle, LoopOutcome, SpecialistAgent};
pub use domains::{AnalyticsOrchestrator, ContentOrchestrator, ResearchOrchestrator};
pub use error::AgentError;
pub use master::MasterOrchestrator;
pub use orchestrator::{delegation_tool_name, CompletedTask, Orchestrator, SubAgent, TaskLedger};
pub use system::{create_agent_system, create_agent_system_with, AgentSystem};
pub use task::{Task, TaskError, TaskPriority, TaskResult, TaskStatus, MAX_ITERATIONS_REACHED};
pub use types::*;
