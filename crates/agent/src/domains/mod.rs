//! Domain orchestrators: analytics, research and content.

pub mod analytics;
pub mod content;
pub mod research;

pub use analytics::AnalyticsOrchestrator;
pub use content::ContentOrchestrator;
pub use research::ResearchOrchestrator;

use serde_json::Value;

use crate::task::Task;

/// Append a `## title` section to a prompt.
pub(crate) fn push_section(prompt: &mut String, title: &str, body: &str) {
    prompt.push_str("\n\n## ");
    prompt.push_str(title);
    prompt.push('\n');
    prompt.push_str(body);
}

/// Metadata value rendered for a prompt: strings verbatim, other JSON pretty-printed.
pub(crate) fn meta_text(task: &Task, key: &str) -> Option<String> {
    match task.metadata.get(key)? {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.trim().to_string()),
        other => serde_json::to_string_pretty(other).ok(),
    }
}

pub(crate) fn capabilities(caps: &[&str]) -> Vec<String> {
    caps.iter().map(|c| c.to_string()).collect()
}
