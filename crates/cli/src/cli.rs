use clap::{Parser, Subcommand, ValueEnum};
use maestro_agent::TaskPriority;

/// Run requests through the maestro agent hierarchy.
///
/// Provider credentials come from the environment (`.env` is loaded) and can be
/// overridden by a TOML settings file.
#[derive(Parser, Debug)]
#[command(name = "maestro", about = "Hierarchical LLM agent engine")]
pub struct CliArgs {
    /// Path to settings file (default: ~/.config/maestro/config.toml)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Provider to use: openai, anthropic, gemini, ollama, lmstudio, openrouter, n8n, custom.
    /// Overrides LLM_PROVIDER and the settings file; also selects the target of `models` and `test`.
    #[arg(long, global = true)]
    pub provider: Option<String>,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute a request through the master orchestrator
    Run {
        /// What to do, in plain language
        description: String,

        /// JSON object passed to the master as task context
        #[arg(long)]
        context: Option<String>,

        #[arg(long, value_enum, default_value_t = Priority::Medium)]
        priority: Priority,
    },
    /// Print agent and provider status
    Status,
    /// List models offered by the selected provider (default: the active one)
    Models,
    /// Probe provider connectivity (default: every enabled provider)
    Test,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl From<Priority> for TaskPriority {
    fn from(p: Priority) -> Self {
        match p {
            Priority::Low => TaskPriority::Low,
            Priority::Medium => TaskPriority::Medium,
            Priority::High => TaskPriority::High,
            Priority::Critical => TaskPriority::Critical,
        }
    }
}
