mod cli;
mod config;

use anyhow::{Context, Result};
use clap::Parser;
use maestro_agent::{create_agent_system_with, AgentSystem, Task};
use maestro_core::Config;
use maestro_llm::{provider_configs_from_env, ProviderType};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::process::ExitCode;
use tracing::{debug, info};

use crate::cli::{CliArgs, Command};
use crate::config::CliSettings;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = CliArgs::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    maestro_core::load_dotenv();
    let settings = CliSettings::load(args.config.as_deref())
        .context("failed to load settings")?;

    let mut config = Config::from_env();
    settings.apply_selection(&mut config, args.provider.as_deref());

    let mut provider_configs = provider_configs_from_env(&config.llm);
    settings
        .overlay(&mut provider_configs)
        .context("invalid provider settings")?;

    let system = create_agent_system_with(&config, provider_configs)
        .await
        .context("failed to build agent system")?;
    info!(
        profile = config.profile_label(),
        provider = %system.providers().active_provider(),
        "agent system ready"
    );

    match args.command {
        Command::Run {
            description,
            context,
            priority,
        } => run(&system, &description, context.as_deref(), priority.into()).await,
        Command::Status => {
            print_json(&system.status().await)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Models => models(&system).await,
        Command::Test => test_providers(&system, args.provider.is_some()).await,
    }
}

fn print_json(value: &impl Serialize) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{out}");
    Ok(())
}

fn parse_context(raw: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw).context("--context is not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("--context must be a JSON object, got {other}"),
    }
}

async fn run(
    system: &AgentSystem,
    description: &str,
    context: Option<&str>,
    priority: maestro_agent::TaskPriority,
) -> Result<ExitCode> {
    let metadata = context.map(parse_context).transpose()?.unwrap_or_default();
    let task = Task::new(description)
        .context("invalid task")?
        .with_priority(priority)
        .with_metadata(metadata);
    debug!(task_id = %task.id, "running task");

    let result = system.execute_task(task).await;
    print_json(&result)?;
    Ok(if result.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn models(system: &AgentSystem) -> Result<ExitCode> {
    let kind = system.providers().active_provider();
    let models = system
        .providers()
        .list_models(kind)
        .await
        .with_context(|| format!("failed to list models for {kind}"))?;
    print_json(&json!({ "provider": kind, "models": models }))?;
    Ok(ExitCode::SUCCESS)
}

/// Probe the active provider when one was named, else every enabled provider.
async fn test_providers(system: &AgentSystem, only_active: bool) -> Result<ExitCode> {
    let registry = system.providers();
    let targets: Vec<ProviderType> = if only_active {
        vec![registry.active_provider()]
    } else {
        registry
            .statuses()
            .await
            .into_iter()
            .filter(|s| s.enabled)
            .map(|s| s.provider_type)
            .collect()
    };
    if targets.is_empty() {
        anyhow::bail!("no provider is enabled; set an API key or URL in the environment or settings file");
    }

    let mut all_ok = true;
    let mut results = Vec::with_capacity(targets.len());
    for kind in targets {
        let outcome = registry.test_provider(kind).await;
        all_ok &= outcome.success;
        results.push(json!({ "provider": kind, "result": outcome }));
    }
    print_json(&results)?;
    Ok(if all_ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
