//! Readability-oriented counts for a piece of text.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::tool::{required_str, ParamType, ParameterSpec, Tool, ToolDefinition, ToolError, ToolResult};

/// Average adult silent reading speed.
const WORDS_PER_MINUTE: f64 = 200.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextMetrics {
    pub characters: usize,
    pub words: usize,
    pub sentences: usize,
    pub paragraphs: usize,
    pub average_word_length: f64,
    pub reading_time_minutes: f64,
}

impl TextMetrics {
    pub fn measure(text: &str) -> Self {
        let words: Vec<&str> = text.split_whitespace().collect();
        let letters: usize = words
            .iter()
            .map(|w| w.chars().filter(|c| c.is_alphanumeric()).count())
            .sum();

        let sentences = text
            .split(['.', '!', '?'])
            .filter(|s| !s.trim().is_empty())
            .count();
        let paragraphs = text
            .split("\n\n")
            .filter(|p| !p.trim().is_empty())
            .count();

        let average_word_length = if words.is_empty() {
            0.0
        } else {
            letters as f64 / words.len() as f64
        };

        Self {
            characters: text.chars().count(),
            words: words.len(),
            sentences,
            paragraphs,
            average_word_length,
            reading_time_minutes: words.len() as f64 / WORDS_PER_MINUTE,
        }
    }
}

pub struct TextMetricsTool;

#[async_trait]
impl Tool for TextMetricsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "text_metrics",
            "Count words, sentences, characters and paragraphs and estimate reading time of a text.",
        )
        .param(
            "text",
            ParameterSpec::new(ParamType::String, "Text to measure").required(),
        )
    }

    async fn execute(&self, params: Value) -> Result<ToolResult, ToolError> {
        let text = required_str(&params, "text")?;
        let metrics = serde_json::to_value(TextMetrics::measure(text))
            .map_err(|e| ToolError::Other(e.into()))?;
        Ok(ToolResult::success(metrics))
    }
}
