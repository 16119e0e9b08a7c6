//! HTTP fetch tool: downloads a page and reduces it to readable text.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::tool::{required_str, ParamType, ParameterSpec, Tool, ToolDefinition, ToolError, ToolResult};

/// Default cap on returned characters.
const DEFAULT_MAX_CHARS: usize = 8000;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct WebFetchTool {
    client: reqwest::Client,
}

impl WebFetchTool {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("maestro/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for WebFetchTool {
    fn default() -> Self {
        Self::new()
    }
}

/// Strip tags, scripts and styles from HTML and collapse whitespace.
pub fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len() / 2);
    let lower = html.to_ascii_lowercase();
    let bytes = html.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'<' {
            // Drop the whole body of script/style blocks.
            let skip_to = ["script", "style"].iter().find_map(|tag| {
                if lower[i + 1..].starts_with(tag) {
                    let close = format!("</{tag}");
                    lower[i..].find(&close).map(|pos| i + pos + close.len())
                } else {
                    None
                }
            });
            let from = skip_to.unwrap_or(i);
            match lower[from..].find('>') {
                Some(end) => i = from + end + 1,
                None => break,
            }
            out.push(' ');
            continue;
        }
        let next = html[i..].find('<').map_or(html.len(), |p| i + p);
        out.push_str(&html[i..next]);
        i = next;
    }

    let decoded = out
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate on a char boundary. Returns the text and whether it was cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => (text[..idx].to_string(), true),
        None => (text.to_string(), false),
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "web_fetch",
            "Fetch a web page over HTTP(S) and return its readable text content.",
        )
        .param(
            "url",
            ParameterSpec::new(ParamType::String, "Absolute http(s) URL to fetch").required(),
        )
        .param(
            "max_chars",
            ParameterSpec::new(ParamType::Integer, "Maximum number of characters to return")
                .with_default(json!(DEFAULT_MAX_CHARS)),
        )
    }

    async fn execute(&self, params: Value) -> Result<ToolResult, ToolError> {
        let url = required_str(&params, "url")?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ToolError::InvalidInput(format!(
                "url must start with http:// or https://, got '{url}'"
            )));
        }
        let max_chars = params
            .get("max_chars")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_MAX_CHARS);

        debug!(url, "fetching url");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Ok(ToolResult::failure(format!("GET {url} returned HTTP {status}")));
        }

        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("html"));
        let body = response
            .text()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("failed to read body: {e}")))?;

        let text = if is_html { html_to_text(&body) } else { body };
        let (content, truncated) = truncate_chars(&text, max_chars);

        Ok(ToolResult::success(json!({
            "url": url,
            "status": status.as_u16(),
            "content": content,
            "truncated": truncated,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_to_text() {
        let html = r#"<html><head><style>p { color: red; }</style>
            <script>var x = "<b>";</script></head>
            <body><h1>Title</h1><p>Hello &amp; welcome</p></body></html>"#;
        assert_eq!(html_to_text(html), "Title Hello & welcome");
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        let (text, cut) = truncate_chars("héllo wörld", 4);
        assert_eq!(text, "héll");
        assert!(cut);

        let (text, cut) = truncate_chars("short", 100);
        assert_eq!(text, "short");
        assert!(!cut);
    }

    #[tokio::test]
    async fn test_rejects_non_http_url() {
        let err = WebFetchTool::new()
            .execute(json!({"url": "file:///etc/passwd"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }
}
