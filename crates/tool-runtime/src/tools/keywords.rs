//! Term-frequency keyword extraction.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::tool::{required_str, ParamType, ParameterSpec, Tool, ToolDefinition, ToolError, ToolResult};

const DEFAULT_TOP_N: usize = 10;

const STOP_WORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "been",
    "but", "by", "can", "could", "did", "do", "does", "for", "from", "had", "has", "have", "he",
    "her", "his", "how", "i", "if", "in", "into", "is", "it", "its", "more", "most", "no", "not",
    "of", "on", "one", "or", "other", "our", "out", "she", "so", "some", "such", "than", "that",
    "the", "their", "them", "then", "there", "these", "they", "this", "those", "to", "up", "was",
    "we", "were", "what", "when", "which", "while", "who", "will", "with", "would", "you", "your",
];

/// Ranks the most frequent non stop-words in a text.
pub struct ExtractKeywordsTool;

/// Word frequencies sorted by count descending, then alphabetically.
pub fn rank_keywords(text: &str, top_n: usize) -> Vec<(String, usize)> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for word in text
        .split(|c: char| !c.is_alphanumeric() && c != '\'' && c != '-')
        .map(|w| w.trim_matches(|c| c == '\'' || c == '-').to_lowercase())
        .filter(|w| w.chars().count() > 2 && !STOP_WORDS.contains(&w.as_str()))
        .filter(|w| !w.chars().all(|c| c.is_numeric()))
    {
        *counts.entry(word).or_default() += 1;
    }

    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(top_n);
    ranked
}

#[async_trait]
impl Tool for ExtractKeywordsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "extract_keywords",
            "Extract the most frequent meaningful keywords from a text.",
        )
        .param(
            "text",
            ParameterSpec::new(ParamType::String, "Text to analyze").required(),
        )
        .param(
            "top_n",
            ParameterSpec::new(ParamType::Integer, "Number of keywords to return")
                .with_default(json!(DEFAULT_TOP_N)),
        )
    }

    async fn execute(&self, params: Value) -> Result<ToolResult, ToolError> {
        let text = required_str(&params, "text")?;
        let top_n = params
            .get("top_n")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_TOP_N);

        let keywords: Vec<Value> = rank_keywords(text, top_n)
            .into_iter()
            .map(|(keyword, count)| json!({ "keyword": keyword, "count": count }))
            .collect();

        Ok(ToolResult::success(json!({ "keywords": keywords })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_keywords() {
        let text = "Rust is fast. Rust is safe. The compiler makes Rust safe and fast, 2024.";
        let ranked = rank_keywords(text, 3);
        assert_eq!(
            ranked,
            vec![
                ("rust".to_string(), 3),
                ("fast".to_string(), 2),
                ("safe".to_string(), 2),
            ]
        );
    }

    #[tokio::test]
    async fn test_tool_output_shape() {
        let result = ExtractKeywordsTool
            .execute(json!({"text": "the and of", "top_n": 5}))
            .await
            .unwrap();
        assert_eq!(result.data().unwrap()["keywords"], json!([]));
    }
}
